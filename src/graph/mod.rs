//! Session-scoped property-graph contract.
//!
//! Every node and relationship carries `session_id` and `language`; the
//! adapter refuses writes lacking a session scope, and every read filters by
//! it. Node identity is deterministic: the hex digest of
//! `(label, session_id, normalised natural key)`, so upserts converge across
//! repeated ingests.

pub mod cypher;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

use crate::language::Language;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph backend response invalid: {details}")]
    Backend { details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("write refused: missing session scope")]
    MissingSession,
}

/// Node labels of the legal knowledge graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeLabel {
    Entity,
    Fact,
    LegalConcept,
    Case,
    Document,
    DocumentChunk,
}

impl NodeLabel {
    pub const ALL: [NodeLabel; 6] = [
        NodeLabel::Entity,
        NodeLabel::Fact,
        NodeLabel::LegalConcept,
        NodeLabel::Case,
        NodeLabel::Document,
        NodeLabel::DocumentChunk,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entity => "Entity",
            Self::Fact => "Fact",
            Self::LegalConcept => "LegalConcept",
            Self::Case => "Case",
            Self::Document => "Document",
            Self::DocumentChunk => "DocumentChunk",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "Entity" | "ENTITY" => Some(Self::Entity),
            "Fact" | "FACT" => Some(Self::Fact),
            "LegalConcept" | "LEGAL_CONCEPT" | "Concept" | "CONCEPT" => Some(Self::LegalConcept),
            "Case" | "CASE" => Some(Self::Case),
            "Document" | "DOCUMENT" => Some(Self::Document),
            "DocumentChunk" | "DOCUMENT_CHUNK" => Some(Self::DocumentChunk),
            _ => None,
        }
    }
}

/// Typed directed relationship kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipType {
    About,
    Contains,
    Mentions,
    RelatedTo,
    AppliesTo,
    Involves,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 6] = [
        RelationshipType::About,
        RelationshipType::Contains,
        RelationshipType::Mentions,
        RelationshipType::RelatedTo,
        RelationshipType::AppliesTo,
        RelationshipType::Involves,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::About => "ABOUT",
            Self::Contains => "CONTAINS",
            Self::Mentions => "MENTIONS",
            Self::RelatedTo => "RELATED_TO",
            Self::AppliesTo => "APPLIES_TO",
            Self::Involves => "INVOLVES",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "ABOUT" => Some(Self::About),
            "CONTAINS" => Some(Self::Contains),
            "MENTIONS" => Some(Self::Mentions),
            "RELATED_TO" => Some(Self::RelatedTo),
            "APPLIES_TO" => Some(Self::AppliesTo),
            "INVOLVES" => Some(Self::Involves),
            _ => None,
        }
    }
}

/// NFKC + casefold + whitespace collapse. The upsert identity key.
#[must_use]
pub fn normalise(name: &str) -> String {
    let folded: String = name.nfkc().collect::<String>().to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deterministic node id for `(label, session, key)`.
#[must_use]
pub fn node_id(label: NodeLabel, session_id: i64, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(label.as_str().as_bytes());
    hasher.update(session_id.to_le_bytes());
    hasher.update(normalise(key).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A node write: merged on the deterministic id, language inherited from
/// the originating chunk.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub label: NodeLabel,
    pub session_id: i64,
    /// Natural key: entity name, concept term, case number, chunk id…
    pub key: String,
    pub language: Language,
    pub attrs: Map<String, Value>,
}

/// An edge write, idempotent per `(type, from, to)`.
#[derive(Debug, Clone)]
pub struct EdgeSpec {
    pub rel: RelationshipType,
    pub session_id: i64,
    pub from: (NodeLabel, String),
    pub to: (NodeLabel, String),
    pub language: Language,
}

#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub id: String,
    pub created: bool,
}

/// A persisted document chunk read back for retrieval.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: String,
    pub content: String,
    pub source_file: String,
    pub page: i64,
    pub offset: i64,
    pub language: Language,
    pub embedding: Vec<f32>,
}

/// A graph node surfaced by the keyword pass.
#[derive(Debug, Clone)]
pub struct GraphEntity {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    pub description: Option<String>,
    pub language: Option<Language>,
    /// Lower is better: content=1, name=2, description=3, other=4.
    pub relevance: i64,
}

/// One-hop neighbour of a surfaced node.
#[derive(Debug, Clone)]
pub struct NeighbourRecord {
    pub entity: GraphEntity,
    pub relationship_type: String,
    pub relationship_language: Option<Language>,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Idempotent index DDL for every label/relationship of the data model.
    async fn ensure_indices(&self) -> Result<(), GraphError>;

    async fn upsert_node(&self, spec: NodeSpec) -> Result<UpsertOutcome, GraphError>;

    /// Returns whether a new relationship was created.
    async fn relate(&self, spec: EdgeSpec) -> Result<bool, GraphError>;

    /// All chunks of a session, in document order.
    async fn session_chunks(&self, session_id: i64) -> Result<Vec<StoredChunk>, GraphError>;

    async fn keyword_search(
        &self,
        session_id: i64,
        terms: &[String],
        language_filter: Option<Language>,
        limit: usize,
    ) -> Result<Vec<GraphEntity>, GraphError>;

    /// One-hop expansion; both endpoints must belong to the session.
    async fn neighbours(
        &self,
        session_id: i64,
        node_ids: &[String],
        limit: usize,
    ) -> Result<Vec<NeighbourRecord>, GraphError>;

    async fn count_session_nodes(&self, session_id: i64) -> Result<u64, GraphError>;

    /// Remove every node and edge of the session in one logical operation.
    async fn delete_session(&self, session_id: i64) -> Result<(), GraphError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalise_collapses_whitespace_and_case() {
        assert_eq!(normalise("  Acme   Corp \n"), "acme corp");
        assert_eq!(normalise("ACME CORP"), "acme corp");
    }

    #[test]
    fn normalise_applies_nfkc() {
        // Fullwidth Latin compatibility forms fold to ASCII under NFKC.
        assert_eq!(normalise("Ａｃｍｅ"), "acme");
        // Arabic presentation forms fold back to base letters.
        assert_eq!(normalise("\u{FEDF}\u{FEE4}"), normalise("\u{0644}\u{0645}"));
    }

    #[test]
    fn node_ids_are_stable_under_name_variants() {
        let a = node_id(NodeLabel::Entity, 7, "Acme Corp");
        let b = node_id(NodeLabel::Entity, 7, "  acme   CORP ");
        assert_eq!(a, b);
    }

    #[test]
    fn node_ids_differ_across_sessions_and_labels() {
        let base = node_id(NodeLabel::Entity, 1, "Acme Corp");
        assert_ne!(base, node_id(NodeLabel::Entity, 2, "Acme Corp"));
        assert_ne!(base, node_id(NodeLabel::Case, 1, "Acme Corp"));
    }

    #[test]
    fn relationship_parse_round_trips() {
        for rel in RelationshipType::ALL {
            assert_eq!(RelationshipType::parse(rel.as_str()), Some(rel));
        }
        assert_eq!(RelationshipType::parse("related_to"), Some(RelationshipType::RelatedTo));
        assert_eq!(RelationshipType::parse("OWNS"), None);
    }

    #[test]
    fn label_parse_accepts_spec_spellings() {
        assert_eq!(NodeLabel::parse("LegalConcept"), Some(NodeLabel::LegalConcept));
        assert_eq!(NodeLabel::parse("CONCEPT"), Some(NodeLabel::LegalConcept));
        assert_eq!(NodeLabel::parse("Widget"), None);
    }
}
