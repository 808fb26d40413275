//! Streaming answer synthesis over the retrieved context pack.
//!
//! One answer at a time per session: the caller acquires the session's
//! answer lock and hands the owned guard in, so the user append, the model
//! stream, and the assistant append serialise as one unit.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{AppError, USER_SAFE_FAILURE};
use crate::events::{extract_sources, ChatEvent, SourceRef};
use crate::genmodel::GenerativeModel;
use crate::language::Language;
use crate::retrieve::{RetrievalOutcome, Retriever};
use crate::store::{MessageRecord, RelationalStore, Role};

/// Retrieval breadth for answer assembly.
const RETRIEVAL_LIMIT: usize = 15;

const UPLOAD_GUIDANCE_EN: &str =
    "I don't have any documents for this conversation yet. Please upload a PDF \
     document and I will answer questions grounded in its contents.";

const UPLOAD_GUIDANCE_AR: &str =
    "لا توجد مستندات في هذه المحادثة بعد. يرجى رفع ملف PDF وسأجيب على أسئلتك \
     استناداً إلى محتواه.";

#[derive(Clone)]
pub struct Answerer {
    store: Arc<RelationalStore>,
    retriever: Arc<Retriever>,
    model: Arc<dyn GenerativeModel>,
    history_token_budget: i64,
}

impl std::fmt::Debug for Answerer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Answerer")
            .field("history_token_budget", &self.history_token_budget)
            .finish()
    }
}

impl Answerer {
    pub fn new(
        store: Arc<RelationalStore>,
        retriever: Arc<Retriever>,
        model: Arc<dyn GenerativeModel>,
        history_token_budget: i64,
    ) -> Self {
        Self {
            store,
            retriever,
            model,
            history_token_budget,
        }
    }

    /// Produce the ordered event stream for one answer. The owned lock guard
    /// is held until the stream finishes.
    pub fn stream(
        &self,
        session_id: i64,
        query: String,
        cancel: CancellationToken,
        guard: OwnedMutexGuard<()>,
    ) -> impl Stream<Item = ChatEvent> + Send + 'static {
        let this = self.clone();

        async_stream::stream! {
            // Held for the whole answer; dropped when the stream ends.
            let _guard = guard;

            if let Err(err) = this
                .store
                .append_message(session_id, Role::User, &query, false)
                .await
            {
                error!(session_id, error = %err, "failed to append user message");
                yield ChatEvent::Error { error: USER_SAFE_FAILURE.to_string() };
                return;
            }

            let history = match this
                .store
                .history_window(session_id, this.history_token_budget)
                .await
            {
                Ok(history) => history,
                Err(err) => {
                    error!(session_id, error = %err, "failed to load history");
                    yield ChatEvent::Error { error: USER_SAFE_FAILURE.to_string() };
                    return;
                }
            };

            let retrieval = match this
                .retriever
                .retrieve(session_id, &query, RETRIEVAL_LIMIT, None)
                .await
            {
                Ok(retrieval) => retrieval,
                Err(err) => {
                    error!(session_id, error = %err, "retrieval failed");
                    yield ChatEvent::Error { error: USER_SAFE_FAILURE.to_string() };
                    return;
                }
            };

            // Nothing ingested for this session: instruct instead of
            // hallucinating an answer.
            if retrieval.session_chunk_total == 0 && retrieval.entities.is_empty() {
                let guidance = match retrieval.query_language {
                    Language::Ar => UPLOAD_GUIDANCE_AR,
                    _ => UPLOAD_GUIDANCE_EN,
                };
                let _ = this
                    .store
                    .append_message(session_id, Role::Assistant, guidance, false)
                    .await;
                yield ChatEvent::Chunk { chunk: guidance.to_string() };
                yield ChatEvent::done(Vec::new());
                return;
            }

            let sources = extract_sources(&retrieval);
            let prompt = build_prompt(retrieval.query_language, &retrieval, &history, &query);

            let mut fragments = String::new();
            let mut upstream_failed = false;
            let mut truncated = false;

            match this.model.stream_answer(&prompt).await {
                Ok(mut answer) => {
                    loop {
                        tokio::select! {
                            () = cancel.cancelled() => {
                                truncated = true;
                                break;
                            }
                            next = answer.next() => {
                                match next {
                                    Some(Ok(fragment)) => {
                                        fragments.push_str(&fragment);
                                        yield ChatEvent::Chunk { chunk: fragment };
                                    }
                                    Some(Err(err)) => {
                                        warn!(session_id, error = %err, "answer stream failed");
                                        upstream_failed = true;
                                        break;
                                    }
                                    None => break,
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(session_id, error = %err, "answer call failed to start");
                    upstream_failed = true;
                }
            }

            if upstream_failed {
                // Delivered fragments stand; the stream ends with a single
                // user-safe error fragment.
                let stored = if fragments.is_empty() {
                    USER_SAFE_FAILURE.to_string()
                } else {
                    fragments.clone()
                };
                let _ = this
                    .store
                    .append_message(session_id, Role::Assistant, &stored, !fragments.is_empty())
                    .await;
                yield ChatEvent::Error { error: USER_SAFE_FAILURE.to_string() };
                return;
            }

            if truncated {
                // Cancelled mid-stream: persist exactly what was emitted,
                // flagged as truncated, and end cleanly. Nothing was emitted
                // means nothing is stored.
                if !fragments.is_empty() {
                    let _ = this
                        .store
                        .append_message(session_id, Role::Assistant, &fragments, true)
                        .await;
                }
                info!(session_id, emitted = fragments.len(), "answer cancelled mid-stream");
                return;
            }

            if let Err(err) = this
                .store
                .append_message(session_id, Role::Assistant, &fragments, false)
                .await
            {
                error!(session_id, error = %err, "failed to append assistant message");
            }

            yield ChatEvent::done(sources);
        }
    }

    /// Drive the stream to completion and return the assembled response,
    /// for the non-streaming endpoint.
    pub async fn collect(
        &self,
        session_id: i64,
        query: String,
        cancel: CancellationToken,
        guard: OwnedMutexGuard<()>,
    ) -> Result<(String, Vec<SourceRef>), AppError> {
        let stream = self.stream(session_id, query, cancel, guard);
        futures::pin_mut!(stream);

        let mut response = String::new();
        let mut sources = Vec::new();
        while let Some(event) = stream.next().await {
            match event {
                ChatEvent::Chunk { chunk } => response.push_str(&chunk),
                ChatEvent::Done { sources: s, .. } => sources = s,
                ChatEvent::Error { error } => {
                    return Err(AppError::UpstreamUnavailable(error));
                }
            }
        }
        Ok((response, sources))
    }
}

// =============================================================================
// Prompt assembly
// =============================================================================

const DISCLAIMER_BLOCK: &str = "You are a professional legal assistant with \
expertise in legal document analysis.\n\nDISCLAIMER: This is not legal advice. \
All responses are for informational purposes only; users should consult \
qualified legal professionals for specific legal matters.";

const ARABIC_ANSWER_GUIDANCE: &str = "\nأجب باللغة العربية مستخدماً المصطلحات \
القانونية العربية المناسبة، مع مراعاة السياق القانوني والثقافي العربي.";

/// Pure function of (language, context pack, history, question): four
/// labelled blocks in fixed order. User text is never translated.
#[must_use]
pub fn build_prompt(
    query_language: Language,
    retrieval: &RetrievalOutcome,
    history: &[MessageRecord],
    question: &str,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(DISCLAIMER_BLOCK);
    if query_language == Language::Ar {
        prompt.push_str(ARABIC_ANSWER_GUIDANCE);
    }

    prompt.push_str("\n\n=== CONTEXT FROM KNOWLEDGE GRAPH ===\n");

    if !retrieval.entities.is_empty() {
        prompt.push_str("Entities:\n");
        for entity in &retrieval.entities {
            prompt.push_str(&format!("- {} ({})", entity.name, entity.entity_type));
            if let Some(description) = &entity.description {
                prompt.push_str(&format!(": {description}"));
            }
            if let Some(language) = entity.language {
                prompt.push_str(&format!(" [Language: {language}]"));
            }
            prompt.push_str(&format!(" [Relevance: {}]\n", entity.relevance));
        }
    }

    if !retrieval.relationships.is_empty() {
        prompt.push_str("Relationships:\n");
        for rel in &retrieval.relationships {
            prompt.push_str(&format!("- {}", rel.relationship_type));
            if let Some(language) = rel.language {
                prompt.push_str(&format!(" [Language: {language}]"));
            }
            prompt.push('\n');
        }
    }

    if !retrieval.expanded.is_empty() {
        prompt.push_str("Related:\n");
        for record in &retrieval.expanded {
            prompt.push_str(&format!(
                "- {} ({}) via {}\n",
                record.entity.name, record.entity.entity_type, record.relationship_type
            ));
        }
    }

    if !retrieval.chunks.is_empty() {
        prompt.push_str("Document chunks:\n");
        for (i, scored) in retrieval.chunks.iter().enumerate() {
            prompt.push_str(&format!(
                "Chunk {} [{}, page {}, {}]: {}\n",
                i + 1,
                scored.chunk.source_file,
                scored.chunk.page,
                scored.chunk.language,
                scored.chunk.content
            ));
        }
    }

    if !retrieval.search_terms.is_empty() {
        prompt.push_str(&format!(
            "Search terms used: {}\n",
            retrieval.search_terms.join(", ")
        ));
    }

    prompt.push_str("\n=== RECENT HISTORY ===\n");
    for message in history {
        let role = if message.role == "assistant" {
            "Assistant"
        } else {
            "User"
        };
        prompt.push_str(&format!("{role}: {}\n", message.content));
    }

    prompt.push_str(&format!("\n=== USER QUESTION ===\n{question}\n\nAssistant response:"));
    prompt
}
