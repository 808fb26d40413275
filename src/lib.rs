//! lexgraph
//!
//! A session-isolated, multilingual legal-document question-answering
//! service. Users create conversations, upload PDFs into them, and ask
//! questions; the service extracts a knowledge graph per document, indexes
//! chunk embeddings, and streams grounded, cited answers.
//!
//! # Architecture
//!
//! - **Server**: Axum HTTP surface with SSE streaming for `/chat`
//! - **Ingestion**: PDF → chunks → language tag → model extraction → graph
//! - **Retrieval**: semantic chunk ranking + graph keyword search + one-hop
//!   expansion, joined into a cited context pack
//! - **Stores**: WAL SQLite for sessions/messages/uploads, a Cypher property
//!   graph for the extracted knowledge
//!
//! # Modules
//!
//! - [`ingest`]: the ingestion pipeline and its extraction schema
//! - [`retrieve`] / [`answer`]: hybrid retrieval and streamed answering
//! - [`graph`] / [`store`]: the two persistence seams
//! - [`genmodel`] / [`embedding`]: remote model driver and embeddings

pub mod answer;
pub mod api;
pub mod config;
pub mod embedding;
pub mod error;
pub mod events;
pub mod genmodel;
pub mod graph;
pub mod ingest;
pub mod language;
pub mod retrieve;
pub mod server;
pub mod session;
pub mod store;
pub mod telemetry;

use std::sync::Arc;

use answer::Answerer;
use config::AppConfig;
use embedding::EmbeddingProvider;
use genmodel::GenerativeModel;
use graph::GraphStore;
use ingest::Ingestor;
use retrieve::Retriever;
use session::SessionCoordinator;
use store::RelationalStore;

/// Application state shared across all handlers. One of each collaborator
/// exists per process; everything is wired explicitly at start-up.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RelationalStore>,
    pub graph: Arc<dyn GraphStore>,
    pub embedder: Arc<EmbeddingProvider>,
    pub genmodel: Arc<dyn GenerativeModel>,
    pub ingestor: Arc<Ingestor>,
    pub retriever: Arc<Retriever>,
    pub answerer: Arc<Answerer>,
    pub sessions: SessionCoordinator,
    pub config: Arc<AppConfig>,
}
