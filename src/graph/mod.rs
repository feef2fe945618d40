//! Graph store adapter.
//!
//! The engine never owns the story graph. It issues read statements and
//! contradiction upserts through [`GraphStore`], which any backend (a Cypher
//! database client, the in-process [`InMemoryGraph`]) can implement.

mod memory;
pub mod model;
pub mod query;

use thiserror::Error;

pub use memory::InMemoryGraph;
pub use model::{
    Character, ContradictionEdge, EventKind, KnowledgeFact, KnowsEdge, Location, PresenceEdge,
    RelationshipEdge, RelationshipKind, Scene, StoryEvent,
};
pub use query::{GraphQuery, GraphWrite, Row, WriteAck};

/// Errors reported by a graph adapter.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The backend cannot be reached.
    #[error("Graph backend unavailable: {0}")]
    Unavailable(String),

    /// A referenced node does not exist.
    #[error("Node not found: {0}")]
    NotFound(String),

    /// A pre-write validation rule rejected the write.
    #[error("Write rejected by '{rule}': {reason}")]
    Rejected {
        rule: String,
        reason: String,
    },

    /// Any other backend failure.
    #[error("Graph backend error: {0}")]
    Backend(String),

    /// A row could not be decoded into the expected shape.
    #[error("Row decode error: {0}")]
    Decode(String),
}

/// Capability the engine depends on: run a read statement, apply a write.
///
/// # Safety Considerations
/// - Each `write` must be atomic: a contradiction edge is either fully present or absent.
/// - Implementations must tolerate concurrent calls from scans of different stories.
pub trait GraphStore: Send + Sync {
    /// Executes a read statement and returns its rows.
    fn query(&self, query: &GraphQuery) -> Result<Vec<Row>, GraphError>;

    /// Applies a write. Contradiction writes are upserts keyed by
    /// `(unordered fact pair, rule)` and report `WriteAck::Unchanged` on repeats.
    fn write(&self, write: GraphWrite) -> Result<WriteAck, GraphError>;
}

impl<T: GraphStore + ?Sized> GraphStore for std::sync::Arc<T> {
    fn query(&self, query: &GraphQuery) -> Result<Vec<Row>, GraphError> {
        (**self).query(query)
    }

    fn write(&self, write: GraphWrite) -> Result<WriteAck, GraphError> {
        (**self).write(write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure the adapter trait is object-safe
    fn _assert_graph_store_object_safe(_: &dyn GraphStore) {}

    #[test]
    fn test_graph_error_display() {
        let err = GraphError::Rejected {
            rule: "prevent_relationship_self_loops".to_string(),
            reason: "self loop".to_string(),
        };
        assert!(err.to_string().contains("prevent_relationship_self_loops"));

        let err = GraphError::Unavailable("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }
}
