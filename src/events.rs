//! Wire model for the streamed chat response.
//!
//! Every event is one SSE frame, `data: <json>\n\n`. The stream carries any
//! number of `chunk` fragments, then a single terminal frame: `done` with the
//! sources of the context pack, or `error` with a user-safe sentence.

use serde::Serialize;

use crate::graph::{GraphEntity, NeighbourRecord};
use crate::language::Language;
use crate::retrieve::{RetrievalOutcome, RetrievedRelationship};

/// A citation entry in the terminal `sources` record.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
}

impl SourceRef {
    fn entity(entity: &GraphEntity) -> Self {
        Self {
            kind: "entity",
            name: Some(entity.name.clone()),
            entity_type: Some(entity.entity_type.clone()),
            relationship_type: None,
            language: entity.language,
            source_file: None,
            page: None,
        }
    }

    fn relationship(rel: &RetrievedRelationship) -> Self {
        Self {
            kind: "relationship",
            name: None,
            entity_type: None,
            relationship_type: Some(rel.relationship_type.clone()),
            language: rel.language,
            source_file: None,
            page: None,
        }
    }

    fn chunk(source_file: &str, page: i64, language: Language) -> Self {
        Self {
            kind: "chunk",
            name: None,
            entity_type: None,
            relationship_type: None,
            language: Some(language),
            source_file: Some(source_file.to_string()),
            page: Some(page),
        }
    }
}

/// Derive the citation list from everything included in the context pack.
#[must_use]
pub fn extract_sources(retrieval: &RetrievalOutcome) -> Vec<SourceRef> {
    let mut sources = Vec::new();
    for entity in &retrieval.entities {
        sources.push(SourceRef::entity(entity));
    }
    for rel in &retrieval.relationships {
        sources.push(SourceRef::relationship(rel));
    }
    for NeighbourRecord { entity, .. } in &retrieval.expanded {
        sources.push(SourceRef::entity(entity));
    }
    for scored in &retrieval.chunks {
        sources.push(SourceRef::chunk(
            &scored.chunk.source_file,
            scored.chunk.page,
            scored.chunk.language,
        ));
    }
    sources
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ChatEvent {
    Chunk { chunk: String },
    Done { done: bool, sources: Vec<SourceRef> },
    Error { error: String },
}

impl ChatEvent {
    #[must_use]
    pub fn done(sources: Vec<SourceRef>) -> Self {
        Self::Done { done: true, sources }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk { .. })
    }
}

/// Format one event as an SSE frame.
#[must_use]
pub fn sse_frame(event: &ChatEvent) -> String {
    let json = serde_json::to_string(event)
        .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string());
    format!("data: {json}\n\n")
}
