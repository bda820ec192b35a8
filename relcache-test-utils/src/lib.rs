//! relcache Test Utilities
//!
//! Centralized test infrastructure for the relcache workspace:
//! - Fixture value kinds with relationships and merge behavior
//! - Proptest generators for those kinds and for dependency graphs
//! - Custom assertions for relcache-specific results

pub use relcache_core::{
    CacheConfig, ConfigError, Identifiable, Key, Mergeable, RelCacheError, RelCacheResult,
    RuntimeError,
};

// ============================================================================
// FIXTURE KINDS
// ============================================================================

/// A mergeable record with optional fields. `None` means "not provided".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl Author {
    /// An author with only a name set.
    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            email: None,
        }
    }

    /// An author with no fields set, for partial updates.
    pub fn partial(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

impl Identifiable for Author {
    type Id = String;

    fn type_tag() -> &'static str {
        "author"
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    fn merge(&self, incoming: Self) -> Self {
        Self {
            id: self.id.clone(),
            name: incoming.name.or_else(|| self.name.clone()),
            email: incoming.email.or_else(|| self.email.clone()),
        }
    }
}

impl Mergeable for Author {}

/// A record that depends on one [`Author`] and any number of [`Tag`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub tags: Vec<String>,
}

impl Post {
    pub fn new(id: impl Into<String>, author_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author_id: author_id.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

impl Identifiable for Post {
    type Id = String;

    fn type_tag() -> &'static str {
        "post"
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    fn related_keys(&self) -> Vec<Key> {
        std::iter::once(Key::of::<Author>(&self.author_id))
            .chain(self.tags.iter().map(Key::of::<Tag>))
            .collect()
    }
}

/// A leaf record identified by its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Identifiable for Tag {
    type Id = String;

    fn type_tag() -> &'static str {
        "tag"
    }

    fn id(&self) -> String {
        self.name.clone()
    }
}

/// A graph vertex depending on other vertices by id. Cycles are allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    pub deps: Vec<String>,
    pub version: u32,
}

impl Node {
    pub fn new<I, S>(id: impl Into<String>, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            deps: deps.into_iter().map(Into::into).collect(),
            version: 0,
        }
    }

    /// A vertex with no dependencies.
    pub fn leaf(id: impl Into<String>) -> Self {
        Self::new(id, Vec::<String>::new())
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}

impl Identifiable for Node {
    type Id = String;

    fn type_tag() -> &'static str {
        "node"
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    fn related_keys(&self) -> Vec<Key> {
        self.deps.iter().map(Key::of::<Node>).collect()
    }
}

/// A mergeable kind whose merge always panics, so any second write fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragile {
    pub id: String,
    pub revision: u32,
}

impl Fragile {
    pub fn new(id: impl Into<String>, revision: u32) -> Self {
        Self {
            id: id.into(),
            revision,
        }
    }
}

impl Identifiable for Fragile {
    type Id = String;

    fn type_tag() -> &'static str {
        "fragile"
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    fn merge(&self, incoming: Self) -> Self {
        panic!(
            "fragile record {} refused merge of revision {}",
            self.id, incoming.revision
        );
    }
}

impl Mergeable for Fragile {}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating fixture values.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate a random identifier.
    pub fn arb_identifier() -> impl Strategy<Value = String> {
        any::<[u8; 16]>().prop_map(|bytes| Uuid::from_bytes(bytes).to_string())
    }

    /// Generate a short, human-readable identifier (collisions likely).
    pub fn arb_short_identifier() -> impl Strategy<Value = String> {
        "[a-e][0-9]"
    }

    /// Generate a key with a random tag and identifier.
    pub fn arb_key() -> impl Strategy<Value = Key> {
        ("[a-z]{1,8}", "[a-z0-9]{0,12}").prop_map(|(tag, id)| Key::new(tag, id))
    }

    /// Generate a partial author update for a fixed id.
    pub fn arb_author_patch(id: String) -> impl Strategy<Value = Author> {
        (
            proptest::option::of("[A-Z][a-z]{2,8}"),
            proptest::option::of("[a-z]{3,8}@example\\.com"),
        )
            .prop_map(move |(name, email)| Author {
                id: id.clone(),
                name,
                email,
            })
    }

    /// Generate a tag.
    pub fn arb_tag() -> impl Strategy<Value = Tag> {
        "[a-z]{1,6}".prop_map(Tag::new)
    }

    /// Generate a post by one of a few authors with up to three tags.
    pub fn arb_post() -> impl Strategy<Value = Post> {
        (
            arb_short_identifier(),
            arb_short_identifier(),
            proptest::collection::vec("[a-c]", 0..=3),
        )
            .prop_map(|(id, author, tags)| Post::new(id, author).with_tags(tags))
    }

    /// Generate a dependency graph over vertices `n0..n{size}`.
    ///
    /// Each vertex depends on up to three others, self-loops and cycles
    /// included.
    pub fn arb_graph(size: usize) -> impl Strategy<Value = Vec<Node>> {
        let size = size.max(1);
        proptest::collection::vec(proptest::collection::vec(0..size, 0..=3), size).prop_map(
            |adjacency| {
                adjacency
                    .into_iter()
                    .enumerate()
                    .map(|(i, deps)| {
                        Node::new(
                            format!("n{i}"),
                            deps.into_iter().map(|d| format!("n{d}")),
                        )
                    })
                    .collect()
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use uuid::Uuid;

    /// A fresh, unique identifier.
    pub fn unique_id() -> String {
        Uuid::now_v7().to_string()
    }

    /// The three-vertex ring `a -> b -> c -> a`.
    pub fn ring() -> Vec<Node> {
        vec![
            Node::new("a", ["b"]),
            Node::new("b", ["c"]),
            Node::new("c", ["a"]),
        ]
    }

    /// A post by `a1` tagged `rust`, with its author and tag.
    pub fn blog() -> (Post, Author, Tag) {
        (
            Post::new("p1", "a1").with_tags(["rust"]),
            Author::named("a1", "Ada").with_email("ada@example.com"),
            Tag::new("rust"),
        )
    }

    /// A configuration with thread names unique to one test.
    pub fn test_config(label: &str) -> CacheConfig {
        CacheConfig::new()
            .with_writer_thread_name(format!("{label}-writer"))
            .with_notifier_thread_name(format!("{label}-notifier"))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for relcache-specific validation.

    use super::*;

    /// Assert that a RelCacheResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &RelCacheResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a RelCacheResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &RelCacheResult<T>) {
        match result {
            Err(RelCacheError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a RelCacheResult is a specific runtime error.
    #[track_caller]
    pub fn assert_runtime_error<T: std::fmt::Debug>(
        result: &RelCacheResult<T>,
        expected: RuntimeError,
    ) {
        match result {
            Err(RelCacheError::Runtime(e)) if *e == expected => {}
            other => panic!("Expected {:?}, got: {:?}", expected, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_author_merge_prefers_incoming_fields() {
        let stored = Author::named("a1", "Ada").with_email("old@example.com");
        let merged = stored.merge(Author::partial("a1").with_email("new@example.com"));
        assert_eq!(merged.name.as_deref(), Some("Ada"));
        assert_eq!(merged.email.as_deref(), Some("new@example.com"));
    }

    #[test]
    fn test_post_relationships() {
        let post = Post::new("p1", "a1").with_tags(["x", "y"]);
        assert_eq!(
            post.related_keys(),
            vec![
                Key::new("author", "a1"),
                Key::new("tag", "x"),
                Key::new("tag", "y"),
            ]
        );
    }

    #[test]
    fn test_node_leaf_has_no_relationships() {
        assert!(Node::leaf("z").related_keys().is_empty());
        assert_eq!(Node::new("a", ["a"]).related_keys(), vec![Key::new("node", "a")]);
    }

    #[test]
    #[should_panic(expected = "refused merge")]
    fn test_fragile_merge_panics() {
        Fragile::new("f", 1).merge(Fragile::new("f", 2));
    }

    #[test]
    fn test_unique_ids_differ() {
        assert_ne!(fixtures::unique_id(), fixtures::unique_id());
    }
}
