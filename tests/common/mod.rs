//! Shared fakes for the integration suite: an in-memory graph store and a
//! scripted generative model, wired with the hash-fallback embedder and an
//! in-memory SQLite store.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value};

use lexgraph::answer::Answerer;
use lexgraph::embedding::EmbeddingProvider;
use lexgraph::genmodel::{AnswerStream, ExtractRateLimiter, GenerativeModel, ModelError};
use lexgraph::graph::{
    node_id, EdgeSpec, GraphEntity, GraphError, GraphStore, NeighbourRecord, NodeLabel, NodeSpec,
    StoredChunk, UpsertOutcome,
};
use lexgraph::ingest::Ingestor;
use lexgraph::language::Language;
use lexgraph::retrieve::Retriever;
use lexgraph::store::RelationalStore;

// =============================================================================
// In-memory graph store
// =============================================================================

#[derive(Debug, Clone)]
struct NodeData {
    label: NodeLabel,
    session_id: i64,
    language: Language,
    attrs: Map<String, Value>,
    seq: i64,
}

#[derive(Debug, Clone)]
struct EdgeData {
    session_id: i64,
    language: Language,
}

#[derive(Default)]
pub struct InMemoryGraph {
    nodes: Mutex<HashMap<String, NodeData>>,
    edges: Mutex<HashMap<(String, String, String), EdgeData>>,
    seq: AtomicI64,
}

impl InMemoryGraph {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn node_count(&self, session_id: i64) -> usize {
        self.nodes
            .lock()
            .unwrap()
            .values()
            .filter(|n| n.session_id == session_id)
            .count()
    }

    pub fn edge_count(&self, session_id: i64) -> usize {
        self.edges
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.session_id == session_id)
            .count()
    }

    pub fn chunk_count(&self, session_id: i64) -> usize {
        self.nodes
            .lock()
            .unwrap()
            .values()
            .filter(|n| n.session_id == session_id && n.label == NodeLabel::DocumentChunk)
            .count()
    }

    pub fn node_ids(&self, session_id: i64) -> Vec<String> {
        let mut ids: Vec<String> = self
            .nodes
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, n)| n.session_id == session_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn entity_view(data: &NodeData, id: &str) -> GraphEntity {
        let attrs = &data.attrs;
        let name = attrs
            .get("name")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .unwrap_or_else(|| {
                attrs
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .chars()
                    .take(50)
                    .collect()
            });
        let relevance = if attrs.contains_key("content") {
            1
        } else if attrs.contains_key("name") {
            2
        } else if attrs.contains_key("description") {
            3
        } else {
            4
        };
        GraphEntity {
            id: id.to_string(),
            name,
            entity_type: data.label.as_str().to_string(),
            description: attrs
                .get("description")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            language: Some(data.language),
            relevance,
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryGraph {
    async fn ensure_indices(&self) -> Result<(), GraphError> {
        Ok(())
    }

    async fn upsert_node(&self, spec: NodeSpec) -> Result<UpsertOutcome, GraphError> {
        if spec.session_id <= 0 {
            return Err(GraphError::MissingSession);
        }
        let id = node_id(spec.label, spec.session_id, &spec.key);
        let mut nodes = self.nodes.lock().unwrap();

        if let Some(existing) = nodes.get_mut(&id) {
            existing.language = existing.language.merge(spec.language);
            for (k, v) in spec.attrs {
                existing.attrs.insert(k, v);
            }
            Ok(UpsertOutcome { id, created: false })
        } else {
            nodes.insert(
                id.clone(),
                NodeData {
                    label: spec.label,
                    session_id: spec.session_id,
                    language: spec.language,
                    attrs: spec.attrs,
                    seq: self.seq.fetch_add(1, Ordering::SeqCst),
                },
            );
            Ok(UpsertOutcome { id, created: true })
        }
    }

    async fn relate(&self, spec: EdgeSpec) -> Result<bool, GraphError> {
        if spec.session_id <= 0 {
            return Err(GraphError::MissingSession);
        }
        let from_id = node_id(spec.from.0, spec.session_id, &spec.from.1);
        let to_id = node_id(spec.to.0, spec.session_id, &spec.to.1);

        {
            let nodes = self.nodes.lock().unwrap();
            let from_ok = nodes
                .get(&from_id)
                .is_some_and(|n| n.session_id == spec.session_id);
            let to_ok = nodes
                .get(&to_id)
                .is_some_and(|n| n.session_id == spec.session_id);
            if !from_ok || !to_ok {
                return Ok(false);
            }
        }

        let key = (spec.rel.as_str().to_string(), from_id, to_id);
        let mut edges = self.edges.lock().unwrap();
        if edges.contains_key(&key) {
            Ok(false)
        } else {
            edges.insert(
                key,
                EdgeData {
                    session_id: spec.session_id,
                    language: spec.language,
                },
            );
            Ok(true)
        }
    }

    async fn session_chunks(&self, session_id: i64) -> Result<Vec<StoredChunk>, GraphError> {
        let nodes = self.nodes.lock().unwrap();
        let mut chunks: Vec<StoredChunk> = nodes
            .iter()
            .filter(|(_, n)| n.session_id == session_id && n.label == NodeLabel::DocumentChunk)
            .map(|(id, n)| StoredChunk {
                id: id.clone(),
                content: n
                    .attrs
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                source_file: n
                    .attrs
                    .get("source_file")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                page: n.attrs.get("page").and_then(Value::as_i64).unwrap_or(0),
                offset: n.attrs.get("offset").and_then(Value::as_i64).unwrap_or(0),
                language: n.language,
                embedding: n
                    .attrs
                    .get("embedding")
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(Value::as_f64).map(|v| v as f32).collect())
                    .unwrap_or_default(),
            })
            .collect();
        chunks.sort_by(|a, b| {
            (a.source_file.as_str(), a.page, a.offset)
                .cmp(&(b.source_file.as_str(), b.page, b.offset))
        });
        Ok(chunks)
    }

    async fn keyword_search(
        &self,
        session_id: i64,
        terms: &[String],
        language_filter: Option<Language>,
        limit: usize,
    ) -> Result<Vec<GraphEntity>, GraphError> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let nodes = self.nodes.lock().unwrap();
        let mut hits: Vec<(i64, GraphEntity)> = nodes
            .iter()
            .filter(|(_, n)| n.session_id == session_id)
            .filter(|(_, n)| language_filter.is_none_or(|l| n.language == l))
            .filter(|(_, n)| {
                // Mirrors the Cypher adapter: scored fields first, every
                // other textual attribute at the lowest relevance tier.
                const EXCLUDED: [&str; 6] =
                    ["session_id", "created_at", "language", "id", "embedding", "chunk_index"];
                terms.iter().any(|term| {
                    let term = term.to_lowercase();
                    n.attrs.iter().any(|(key, value)| {
                        !EXCLUDED.contains(&key.as_str())
                            && value
                                .as_str()
                                .is_some_and(|v| v.to_lowercase().contains(&term))
                    })
                })
            })
            .map(|(id, n)| (n.seq, Self::entity_view(n, id)))
            .collect();

        hits.sort_by(|a, b| {
            a.1.relevance
                .cmp(&b.1.relevance)
                .then(b.0.cmp(&a.0))
                .then(a.1.id.cmp(&b.1.id))
        });
        Ok(hits.into_iter().take(limit).map(|(_, e)| e).collect())
    }

    async fn neighbours(
        &self,
        session_id: i64,
        node_ids: &[String],
        limit: usize,
    ) -> Result<Vec<NeighbourRecord>, GraphError> {
        if node_ids.is_empty() {
            return Ok(Vec::new());
        }
        let nodes = self.nodes.lock().unwrap();
        let edges = self.edges.lock().unwrap();

        let mut out: Vec<NeighbourRecord> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for ((rel, from, to), edge) in edges.iter() {
            if edge.session_id != session_id {
                continue;
            }
            let other = if node_ids.contains(from) {
                to
            } else if node_ids.contains(to) {
                from
            } else {
                continue;
            };
            let Some(data) = nodes.get(other) else { continue };
            if data.session_id != session_id {
                continue;
            }
            if !seen.insert((other.clone(), rel.clone())) {
                continue;
            }
            out.push(NeighbourRecord {
                entity: Self::entity_view(data, other),
                relationship_type: rel.clone(),
                relationship_language: Some(edge.language),
            });
        }
        out.sort_by(|a, b| a.entity.id.cmp(&b.entity.id));
        out.truncate(limit);
        Ok(out)
    }

    async fn count_session_nodes(&self, session_id: i64) -> Result<u64, GraphError> {
        Ok(self.node_count(session_id) as u64)
    }

    async fn delete_session(&self, session_id: i64) -> Result<(), GraphError> {
        self.nodes
            .lock()
            .unwrap()
            .retain(|_, n| n.session_id != session_id);
        self.edges
            .lock()
            .unwrap()
            .retain(|_, e| e.session_id != session_id);
        Ok(())
    }
}

// =============================================================================
// Scripted generative model
// =============================================================================

pub struct ScriptedModel {
    extract_responses: Mutex<VecDeque<String>>,
    default_extract: String,
    answer_fragments: Vec<String>,
    /// Yield this many fragments, then pend forever (for cancellation tests).
    hang_after: Option<usize>,
    fail_answer: bool,
    extract_calls: Mutex<Vec<Instant>>,
}

impl ScriptedModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            extract_responses: Mutex::new(VecDeque::new()),
            default_extract: "{}".to_string(),
            answer_fragments: vec!["Based on the document, ".to_string(), "yes.".to_string()],
            hang_after: None,
            fail_answer: false,
            extract_calls: Mutex::new(Vec::new()),
        })
    }

    pub fn with_default_extract(extract: &str) -> Arc<Self> {
        Arc::new(Self {
            extract_responses: Mutex::new(VecDeque::new()),
            default_extract: extract.to_string(),
            answer_fragments: vec!["Based on the document, ".to_string(), "yes.".to_string()],
            hang_after: None,
            fail_answer: false,
            extract_calls: Mutex::new(Vec::new()),
        })
    }

    pub fn with_answer_fragments(fragments: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            extract_responses: Mutex::new(VecDeque::new()),
            default_extract: "{}".to_string(),
            answer_fragments: fragments.into_iter().map(String::from).collect(),
            hang_after: None,
            fail_answer: false,
            extract_calls: Mutex::new(Vec::new()),
        })
    }

    pub fn hanging_after(fragments: Vec<&str>, hang_after: usize) -> Arc<Self> {
        Arc::new(Self {
            extract_responses: Mutex::new(VecDeque::new()),
            default_extract: "{}".to_string(),
            answer_fragments: fragments.into_iter().map(String::from).collect(),
            hang_after: Some(hang_after),
            fail_answer: false,
            extract_calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing_answers() -> Arc<Self> {
        Arc::new(Self {
            extract_responses: Mutex::new(VecDeque::new()),
            default_extract: "{}".to_string(),
            answer_fragments: Vec::new(),
            hang_after: None,
            fail_answer: true,
            extract_calls: Mutex::new(Vec::new()),
        })
    }

    pub fn push_extract_response(&self, response: &str) {
        self.extract_responses
            .lock()
            .unwrap()
            .push_back(response.to_string());
    }

    pub fn extract_call_times(&self) -> Vec<Instant> {
        self.extract_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    async fn generate(&self, _prompt: &str) -> Result<String, ModelError> {
        self.extract_calls.lock().unwrap().push(Instant::now());
        let scripted = self.extract_responses.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| self.default_extract.clone()))
    }

    async fn stream_answer(&self, _prompt: &str) -> Result<AnswerStream, ModelError> {
        if self.fail_answer {
            return Err(ModelError::Api {
                status: 503,
                details: "scripted failure".to_string(),
            });
        }

        let fragments = self.answer_fragments.clone();
        let hang_after = self.hang_after;
        let stream = async_stream::stream! {
            for (i, fragment) in fragments.into_iter().enumerate() {
                if hang_after.is_some_and(|h| i >= h) {
                    futures::future::pending::<()>().await;
                }
                yield Ok(fragment);
            }
            if hang_after.is_some() {
                futures::future::pending::<()>().await;
            }
        };
        Ok(Box::pin(stream))
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub graph: Arc<InMemoryGraph>,
    pub model: Arc<ScriptedModel>,
    pub store: Arc<RelationalStore>,
    pub ingestor: Arc<Ingestor>,
    pub retriever: Arc<Retriever>,
    pub answerer: Arc<Answerer>,
}

impl Harness {
    pub async fn new(model: Arc<ScriptedModel>) -> Self {
        Self::with_interval(model, Duration::from_millis(1)).await
    }

    pub async fn with_interval(model: Arc<ScriptedModel>, min_interval: Duration) -> Self {
        let graph = InMemoryGraph::new();
        let store = Arc::new(
            RelationalStore::connect("sqlite::memory:")
                .await
                .expect("in-memory store"),
        );
        let embedder = Arc::new(EmbeddingProvider::local_fallback());
        let limiter = Arc::new(ExtractRateLimiter::new(min_interval));

        let graph_dyn: Arc<dyn GraphStore> = graph.clone();
        let model_dyn: Arc<dyn GenerativeModel> = model.clone();

        let ingestor = Arc::new(
            Ingestor::new(
                Arc::clone(&graph_dyn),
                Arc::clone(&model_dyn),
                Arc::clone(&embedder),
                limiter,
                20 * 1024 * 1024,
            )
            .expect("ingestor"),
        );

        let retriever = Arc::new(Retriever::new(Arc::clone(&graph_dyn), Arc::clone(&embedder)));
        let answerer = Arc::new(Answerer::new(
            Arc::clone(&store),
            Arc::clone(&retriever),
            model_dyn,
            1000,
        ));

        Self {
            graph,
            model,
            store,
            ingestor,
            retriever,
            answerer,
        }
    }
}

/// Extraction script for a simple English payment contract.
pub const CONTRACT_EXTRACTION: &str = r#"{
  "entities": [
    {"name": "Acme Corp", "entity_type": "ORG", "description": "Paying party"},
    {"name": "Beta LLC", "entity_type": "ORG", "description": "Receiving party"}
  ],
  "facts": [
    {"content": "Acme Corp pays Beta LLC 1,000 USD on 2024-05-01", "fact_type": "PAYMENT", "confidence": 0.9}
  ],
  "concepts": [],
  "cases": [],
  "relations": [
    {"src_name": "Acme Corp pays Beta LLC 1,000 USD on 2024-05-01", "dst_name": "Acme Corp", "type": "ABOUT", "src_label": "Fact", "dst_label": "Entity"},
    {"src_name": "Acme Corp pays Beta LLC 1,000 USD on 2024-05-01", "dst_name": "Beta LLC", "type": "ABOUT", "src_label": "Fact", "dst_label": "Entity"}
  ]
}"#;

pub fn contract_pages() -> Vec<lexgraph::ingest::pdf::PageText> {
    vec![lexgraph::ingest::pdf::PageText {
        number: 1,
        text: "Acme Corp shall pay Beta LLC 1,000 USD on 2024-05-01.".to_string(),
    }]
}

pub fn arabic_pages() -> Vec<lexgraph::ingest::pdf::PageText> {
    vec![lexgraph::ingest::pdf::PageText {
        number: 1,
        text: "يلتزم المستأجر بدفع الإيجار شهرياً للمؤجر".to_string(),
    }]
}
