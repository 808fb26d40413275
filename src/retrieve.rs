//! Hybrid retrieval: semantic ranking over chunk embeddings, keyword search
//! over the graph, and one-hop neighbourhood expansion, all scoped to one
//! session.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::debug;

use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::error::AppError;
use crate::graph::{GraphEntity, GraphStore, NeighbourRecord, StoredChunk};
use crate::language::{detect_language, Language};

/// Similarity floor for targeted queries.
const DEFAULT_THRESHOLD: f32 = 0.5;

const ENGLISH_STOP_WORDS: &[&str] = &[
    "what", "is", "are", "in", "the", "a", "an", "and", "or", "but", "for", "with", "by", "how",
    "when", "where", "why", "who", "whom", "which", "tell", "me", "about", "can", "you", "please",
    "of", "to", "does", "do",
];

const ARABIC_STOP_WORDS: &[&str] = &[
    "ماذا", "ما", "هو", "هي", "في", "من", "إلى", "على", "مع", "ب", "ل", "كيف", "متى", "أين",
    "لماذا", "أي", "أخبر", "ني", "عن", "هل", "يمكن", "أن", "تخبرني", "يوجد", "موجود", "يحتوي",
    "يضم",
];

/// Arabic compound forms (ف + ال + noun) unprefixed before term matching.
const ARABIC_COMPOUND_MAP: &[(&str, &str)] = &[
    ("فالملف", "ملف"),
    ("فالمستند", "مستند"),
    ("فالمحتوى", "محتوى"),
    ("فالمعلومات", "معلومات"),
    ("فالتفاصيل", "تفاصيل"),
    ("فالعقد", "عقد"),
    ("فالعقار", "عقار"),
    ("فالشقة", "شقة"),
    ("فالمنزل", "منزل"),
    ("فالإيجار", "إيجار"),
    ("فالدفع", "دفع"),
    ("فالمبلغ", "مبلغ"),
    ("فالمدة", "مدة"),
    ("فالتأمين", "تأمين"),
    ("فالغرامة", "غرامة"),
    ("فالبند", "بند"),
    ("فالمادة", "مادة"),
    ("فالقانون", "قانون"),
    ("فالمحكمة", "محكمة"),
    ("فالاختصاص", "اختصاص"),
    ("فالطرف", "طرف"),
    ("فالأطراف", "أطراف"),
    ("فالمؤجر", "مؤجر"),
    ("فالمستأجر", "مستأجر"),
];

/// Phrases marking a general "what is in the file" query, in both languages.
const GENERAL_CONTENT_PHRASES: &[&str] = &[
    "ماذا يوجد",
    "ماذا يحتوي",
    "ماذا يضم",
    "ما هو المحتوى",
    "ما هي المعلومات",
    "ماذا في",
    "ماذا عن",
    "what is in",
    "what contains",
    "what does it contain",
    "what is about",
    "describe the file",
    "describe the document",
];

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetrievedRelationship {
    pub relationship_type: String,
    pub language: Option<Language>,
}

#[derive(Debug)]
pub struct RetrievalOutcome {
    pub entities: Vec<GraphEntity>,
    pub relationships: Vec<RetrievedRelationship>,
    pub chunks: Vec<ScoredChunk>,
    pub expanded: Vec<NeighbourRecord>,
    pub search_terms: Vec<String>,
    pub query_language: Language,
    /// How many chunks exist for the session, before any similarity cut.
    pub session_chunk_total: usize,
}

pub struct Retriever {
    graph: Arc<dyn GraphStore>,
    embedder: Arc<EmbeddingProvider>,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever").finish()
    }
}

impl Retriever {
    pub fn new(graph: Arc<dyn GraphStore>, embedder: Arc<EmbeddingProvider>) -> Self {
        Self { graph, embedder }
    }

    pub async fn retrieve(
        &self,
        session_id: i64,
        query: &str,
        limit: usize,
        language_filter: Option<Language>,
    ) -> Result<RetrievalOutcome, AppError> {
        let query_language = detect_language(query);
        let search_terms = meaningful_terms(query);
        let general = is_general_content_query(query);

        debug!(
            session_id,
            language = %query_language,
            general,
            terms = ?search_terms,
            "retrieval started"
        );

        // Semantic and graph passes fan out concurrently and join before
        // expansion.
        let (semantic, keyword) = tokio::join!(
            self.semantic_pass(session_id, query, limit, general),
            self.graph_pass(session_id, &search_terms, language_filter, limit),
        );
        let (chunks, session_chunk_total) = semantic?;
        let entities = keyword?;

        let entity_ids: Vec<String> = entities.iter().map(|e| e.id.clone()).collect();
        let expanded = self
            .graph
            .neighbours(session_id, &entity_ids, limit)
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;

        let mut relationships = Vec::new();
        let mut seen = HashSet::new();
        for record in &expanded {
            let rel = RetrievedRelationship {
                relationship_type: record.relationship_type.clone(),
                language: record.relationship_language,
            };
            if seen.insert(rel.clone()) {
                relationships.push(rel);
            }
        }

        Ok(RetrievalOutcome {
            entities,
            relationships,
            chunks,
            expanded,
            search_terms,
            query_language,
            session_chunk_total,
        })
    }

    /// Rank every chunk of the session by cosine similarity to the query.
    /// General content queries keep the full set so the prompt assembler can
    /// cover the whole document; targeted queries cut at the threshold and
    /// the top-k bound.
    async fn semantic_pass(
        &self,
        session_id: i64,
        query: &str,
        limit: usize,
        general: bool,
    ) -> Result<(Vec<ScoredChunk>, usize), AppError> {
        let stored = self
            .graph
            .session_chunks(session_id)
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;
        let total = stored.len();
        if total == 0 {
            return Ok((Vec::new(), 0));
        }

        let query_vec = self.embedder.embed(query).await?;

        let mut scored: Vec<ScoredChunk> = stored
            .into_iter()
            .map(|chunk| {
                let similarity = cosine_similarity(&query_vec, &chunk.embedding);
                ScoredChunk { chunk, similarity }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });

        if !general {
            scored.retain(|c| c.similarity >= DEFAULT_THRESHOLD);
            scored.truncate(limit);
        }
        // General content queries keep every chunk, ordered by similarity:
        // the prompt assembler needs full document coverage.

        Ok((scored, total))
    }

    async fn graph_pass(
        &self,
        session_id: i64,
        terms: &[String],
        language_filter: Option<Language>,
        limit: usize,
    ) -> Result<Vec<GraphEntity>, AppError> {
        self.graph
            .keyword_search(session_id, terms, language_filter, limit)
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))
    }
}

fn word_regex() -> &'static Regex {
    static WORD_RE: OnceLock<Regex> = OnceLock::new();
    WORD_RE.get_or_init(|| Regex::new(r"\b\w+\b").expect("static word regex"))
}

/// Tokenise the query and drop question words, articles, pronouns, and
/// connectors in both languages. An empty result keeps the original query as
/// a single term.
#[must_use]
pub fn meaningful_terms(query: &str) -> Vec<String> {
    let mut cleaned = query.trim().to_lowercase();
    for (compound, simple) in ARABIC_COMPOUND_MAP {
        cleaned = cleaned.replace(compound, simple);
    }

    let terms: Vec<String> = word_regex()
        .find_iter(&cleaned)
        .map(|m| m.as_str().to_string())
        .filter(|w| {
            !ENGLISH_STOP_WORDS.contains(&w.as_str()) && !ARABIC_STOP_WORDS.contains(&w.as_str())
        })
        .collect();

    if terms.is_empty() {
        vec![cleaned]
    } else {
        terms
    }
}

/// Heuristic for "what is in the file" style queries.
#[must_use]
pub fn is_general_content_query(query: &str) -> bool {
    let mut cleaned = query.trim().to_lowercase();
    for (compound, simple) in ARABIC_COMPOUND_MAP {
        cleaned = cleaned.replace(compound, simple);
    }
    GENERAL_CONTENT_PHRASES
        .iter()
        .any(|phrase| cleaned.contains(phrase))
}
