//! Ingestion pipeline: PDF → pages → windows → extraction → graph writes.
//!
//! Chunk processing is strictly sequential within one ingest (the shared
//! extract rate limit dictates the pace), while ingests for different
//! sessions run concurrently and converge through upsert idempotency.

pub mod chunker;
pub mod extract;
pub mod pdf;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::embedding::EmbeddingProvider;
use crate::error::AppError;
use crate::genmodel::{ExtractRateLimiter, GenerativeModel};
use crate::graph::{EdgeSpec, GraphStore, NodeLabel, NodeSpec, RelationshipType};
use crate::language::Language;

use chunker::{ChunkWindow, Chunker};
use extract::{extraction_prompt, fallback_extraction, parse_extraction, ExtractionPayload};
use pdf::PageText;

/// Result of one ingest, reported to the caller even when partial.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub chunks_created: u64,
    pub nodes_created: u64,
    pub relationships_created: u64,
    pub language_distribution: BTreeMap<String, u64>,
    pub batch_id: String,
}

pub struct Ingestor {
    graph: Arc<dyn GraphStore>,
    model: Arc<dyn GenerativeModel>,
    embedder: Arc<EmbeddingProvider>,
    chunker: Chunker,
    limiter: Arc<ExtractRateLimiter>,
    max_upload_bytes: usize,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish()
    }
}

impl Ingestor {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        model: Arc<dyn GenerativeModel>,
        embedder: Arc<EmbeddingProvider>,
        limiter: Arc<ExtractRateLimiter>,
        max_upload_bytes: usize,
    ) -> Result<Self, AppError> {
        Ok(Self {
            graph,
            model,
            embedder,
            chunker: Chunker::with_defaults()?,
            limiter,
            max_upload_bytes,
        })
    }

    /// Full pipeline from raw upload bytes.
    pub async fn ingest(
        &self,
        session_id: i64,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<IngestReport, AppError> {
        if !matches!(content_type, "application/pdf" | "application/octet-stream") {
            return Err(AppError::InvalidInput(
                "Invalid file type. Only PDF is supported.".to_string(),
            ));
        }
        if bytes.len() > self.max_upload_bytes {
            return Err(AppError::InvalidInput(format!(
                "file exceeds the {} byte upload limit",
                self.max_upload_bytes
            )));
        }

        let pages = pdf::extract_pages(bytes).await?;
        self.ingest_pages(session_id, file_name, &pages, cancel).await
    }

    /// Pipeline from already-extracted page texts.
    pub async fn ingest_pages(
        &self,
        session_id: i64,
        file_name: &str,
        pages: &[PageText],
        cancel: &CancellationToken,
    ) -> Result<IngestReport, AppError> {
        let mut windows = Vec::new();
        for page in pages {
            windows.extend(self.chunker.windows(file_name, page.number, &page.text));
        }

        let stem = file_name
            .rsplit_once('.')
            .map_or(file_name, |(stem, _)| stem);
        let batch_id = format!("ingest_sess{session_id}_{}_{stem}", uuid::Uuid::new_v4());

        let mut report = IngestReport {
            chunks_created: 0,
            nodes_created: 0,
            relationships_created: 0,
            language_distribution: BTreeMap::new(),
            batch_id,
        };

        if windows.is_empty() {
            return Ok(report);
        }

        // Document-level record, one per upload.
        let document_language = windows
            .iter()
            .map(|w| w.language)
            .reduce(Language::merge)
            .unwrap_or(Language::En);
        let total_bytes: usize = pages.iter().map(|p| p.text.len()).sum();
        let mut doc_attrs = Map::new();
        doc_attrs.insert("title".to_string(), Value::String(file_name.to_string()));
        doc_attrs.insert("document_type".to_string(), Value::String("PDF".to_string()));
        doc_attrs.insert("file_size".to_string(), Value::from(total_bytes as i64));
        doc_attrs.insert(
            "upload_date".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        if self
            .upsert(NodeLabel::Document, session_id, file_name, document_language, doc_attrs, cancel)
            .await?
        {
            report.nodes_created += 1;
        }

        let total = windows.len();
        let mut last_error: Option<AppError> = None;

        for (index, window) in windows.iter().enumerate() {
            if cancel.is_cancelled() {
                // Already-persisted chunks are retained; no rollback.
                return Err(AppError::SessionGone);
            }

            let payload = self.extract_chunk(index, total, window).await;

            if let Err(error) = self
                .persist_extraction(session_id, file_name, window, &payload, &mut report, cancel)
                .await
            {
                if matches!(error, AppError::SessionGone) {
                    return Err(error);
                }
                warn!(
                    session_id,
                    chunk = index + 1,
                    error = %error,
                    "graph write failed for chunk, skipping its extraction"
                );
                last_error = Some(error);
            }

            match self
                .persist_chunk(session_id, file_name, index, window, cancel)
                .await
            {
                Ok(created) => {
                    if created {
                        report.chunks_created += 1;
                        *report
                            .language_distribution
                            .entry(window.language.as_str().to_string())
                            .or_insert(0) += 1;
                    }
                }
                Err(error) => {
                    if matches!(error, AppError::SessionGone) {
                        return Err(error);
                    }
                    warn!(
                        session_id,
                        chunk = index + 1,
                        error = %error,
                        "dropping chunk: embedding or persist failed"
                    );
                    last_error = Some(error);
                }
            }
        }

        if report.chunks_created == 0 {
            if let Some(error) = last_error {
                return Err(error);
            }
        }

        info!(
            session_id,
            chunks = report.chunks_created,
            nodes = report.nodes_created,
            relationships = report.relationships_created,
            batch_id = %report.batch_id,
            "ingest finished"
        );
        Ok(report)
    }

    /// One rate-limited extract call; malformed or failed responses fall back
    /// to the deterministic extractor.
    async fn extract_chunk(
        &self,
        index: usize,
        total: usize,
        window: &ChunkWindow,
    ) -> ExtractionPayload {
        self.limiter.acquire().await;

        let prompt = extraction_prompt(window.language, &window.content);
        match self.model.generate(&prompt).await {
            Ok(raw) => match parse_extraction(&raw) {
                Ok(payload) => payload,
                Err(error) => {
                    warn!(
                        chunk = index + 1,
                        total,
                        error = %error,
                        "model output failed schema validation, using fallback extractor"
                    );
                    fallback_extraction(&window.content)
                }
            },
            Err(error) => {
                warn!(
                    chunk = index + 1,
                    total,
                    error = %error,
                    "extract call failed, using fallback extractor"
                );
                fallback_extraction(&window.content)
            }
        }
    }

    async fn persist_extraction(
        &self,
        session_id: i64,
        file_name: &str,
        window: &ChunkWindow,
        payload: &ExtractionPayload,
        report: &mut IngestReport,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        let language = window.language;

        for entity in &payload.entities {
            let mut attrs = Map::new();
            attrs.insert("name".to_string(), Value::String(entity.name.clone()));
            attrs.insert(
                "entity_type".to_string(),
                Value::String(entity.entity_type.clone()),
            );
            if let Some(description) = &entity.description {
                attrs.insert("description".to_string(), Value::String(description.clone()));
            }
            if let Some(confidence) = entity.confidence {
                attrs.insert("confidence".to_string(), Value::from(confidence));
            }
            let outcome = self
                .upsert(NodeLabel::Entity, session_id, &entity.name, language, attrs, cancel)
                .await?;
            if outcome {
                report.nodes_created += 1;
            }

            // The document mentions every entity extracted from it.
            if self
                .relate(
                    RelationshipType::Mentions,
                    session_id,
                    (NodeLabel::Document, file_name.to_string()),
                    (NodeLabel::Entity, entity.name.clone()),
                    language,
                    cancel,
                )
                .await?
            {
                report.relationships_created += 1;
            }
        }

        for fact in &payload.facts {
            let mut attrs = Map::new();
            attrs.insert("content".to_string(), Value::String(fact.content.clone()));
            attrs.insert("fact_type".to_string(), Value::String(fact.fact_type.clone()));
            attrs.insert("confidence".to_string(), Value::from(fact.confidence));
            if self
                .upsert(NodeLabel::Fact, session_id, &fact.content, language, attrs, cancel)
                .await?
            {
                report.nodes_created += 1;
            }

            if self
                .relate(
                    RelationshipType::Contains,
                    session_id,
                    (NodeLabel::Document, file_name.to_string()),
                    (NodeLabel::Fact, fact.content.clone()),
                    language,
                    cancel,
                )
                .await?
            {
                report.relationships_created += 1;
            }
        }

        for concept in &payload.concepts {
            let mut attrs = Map::new();
            attrs.insert("term".to_string(), Value::String(concept.term.clone()));
            attrs.insert("name".to_string(), Value::String(concept.term.clone()));
            attrs.insert(
                "definition".to_string(),
                Value::String(concept.definition.clone()),
            );
            attrs.insert("category".to_string(), Value::String(concept.category.clone()));
            if self
                .upsert(NodeLabel::LegalConcept, session_id, &concept.term, language, attrs, cancel)
                .await?
            {
                report.nodes_created += 1;
            }
        }

        for case in &payload.cases {
            let mut attrs = Map::new();
            attrs.insert(
                "case_number".to_string(),
                Value::String(case.case_number.clone()),
            );
            attrs.insert("case_name".to_string(), Value::String(case.case_name.clone()));
            attrs.insert("name".to_string(), Value::String(case.case_name.clone()));
            if let Some(court) = &case.court {
                attrs.insert("court".to_string(), Value::String(court.clone()));
            }
            if let Some(jurisdiction) = &case.jurisdiction {
                attrs.insert(
                    "jurisdiction".to_string(),
                    Value::String(jurisdiction.clone()),
                );
            }
            if let Some(status) = &case.status {
                attrs.insert("status".to_string(), Value::String(status.clone()));
            }
            if self
                .upsert(NodeLabel::Case, session_id, &case.case_number, language, attrs, cancel)
                .await?
            {
                report.nodes_created += 1;
            }
        }

        for relation in &payload.relations {
            let Some((rel, src_label, dst_label)) = relation.resolve() else {
                // Validation upstream makes this unreachable for model
                // output; fallback payloads carry no relations.
                continue;
            };
            if self
                .relate(
                    rel,
                    session_id,
                    (src_label, relation.src_name.clone()),
                    (dst_label, relation.dst_name.clone()),
                    language,
                    cancel,
                )
                .await?
            {
                report.relationships_created += 1;
            }
        }

        Ok(())
    }

    /// Embed and persist the chunk itself so retrieval can always reach its
    /// text, even when extraction produced nothing.
    async fn persist_chunk(
        &self,
        session_id: i64,
        file_name: &str,
        index: usize,
        window: &ChunkWindow,
        cancel: &CancellationToken,
    ) -> Result<bool, AppError> {
        let embedding = self.embedder.embed(&window.content).await?;

        let mut attrs = Map::new();
        attrs.insert("content".to_string(), Value::String(window.content.clone()));
        attrs.insert(
            "source_file".to_string(),
            Value::String(window.source_file.clone()),
        );
        attrs.insert("page".to_string(), Value::from(i64::from(window.page)));
        attrs.insert("offset".to_string(), Value::from(window.offset as i64));
        attrs.insert("chunk_index".to_string(), Value::from(index as i64));
        attrs.insert(
            "embedding".to_string(),
            serde_json::to_value(&embedding)
                .map_err(|e| AppError::Internal(e.to_string()))?,
        );

        let key = format!("{file_name}:{}:{}", window.page, window.offset);
        self.upsert(NodeLabel::DocumentChunk, session_id, &key, window.language, attrs, cancel)
            .await
    }

    /// Checked immediately before every graph write: a delete barrier that
    /// fires while this ingest is asleep (extract pacing, model latency) must
    /// not see writes land after the session is gone.
    async fn upsert(
        &self,
        label: NodeLabel,
        session_id: i64,
        key: &str,
        language: Language,
        attrs: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<bool, AppError> {
        if cancel.is_cancelled() {
            return Err(AppError::SessionGone);
        }
        let outcome = self
            .graph
            .upsert_node(NodeSpec {
                label,
                session_id,
                key: key.to_string(),
                language,
                attrs,
            })
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;
        Ok(outcome.created)
    }

    async fn relate(
        &self,
        rel: RelationshipType,
        session_id: i64,
        from: (NodeLabel, String),
        to: (NodeLabel, String),
        language: Language,
        cancel: &CancellationToken,
    ) -> Result<bool, AppError> {
        if cancel.is_cancelled() {
            return Err(AppError::SessionGone);
        }
        self.graph
            .relate(EdgeSpec {
                rel,
                session_id,
                from,
                to,
                language,
            })
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))
    }
}
