//! Extract-mode output schema, validation, prompts, and the deterministic
//! fallback extractor.
//!
//! The model's JSON is validated before anything leaves the ingestion
//! boundary; a response that does not conform is replaced by the fallback
//! extraction rather than propagated.

use serde::Deserialize;

use crate::error::AppError;
use crate::graph::{NodeLabel, RelationshipType};
use crate::language::Language;

/// Confidence assigned to fallback-extracted candidates.
pub const FALLBACK_CONFIDENCE: f64 = 0.2;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExtractionPayload {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub facts: Vec<ExtractedFact>,
    #[serde(default)]
    pub concepts: Vec<ExtractedConcept>,
    #[serde(default)]
    pub cases: Vec<ExtractedCase>,
    #[serde(default)]
    pub relations: Vec<ExtractedRelation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Set by the fallback path; model output leaves it absent.
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedFact {
    pub content: String,
    pub fact_type: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedConcept {
    pub term: String,
    pub definition: String,
    pub category: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedCase {
    pub case_number: String,
    pub case_name: String,
    #[serde(default)]
    pub court: Option<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedRelation {
    pub src_name: String,
    pub dst_name: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub src_label: String,
    pub dst_label: String,
}

impl ExtractedRelation {
    pub fn resolve(&self) -> Option<(RelationshipType, NodeLabel, NodeLabel)> {
        Some((
            RelationshipType::parse(&self.rel_type)?,
            NodeLabel::parse(&self.src_label)?,
            NodeLabel::parse(&self.dst_label)?,
        ))
    }
}

impl ExtractionPayload {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.facts.is_empty()
            && self.concepts.is_empty()
            && self.cases.is_empty()
            && self.relations.is_empty()
    }
}

/// Parse and validate a raw model response against the extract schema.
///
/// The model frequently wraps its JSON in prose or code fences, so the first
/// balanced `{…}` span is recovered before parsing.
pub fn parse_extraction(raw: &str) -> Result<ExtractionPayload, AppError> {
    let start = raw
        .find('{')
        .ok_or_else(|| AppError::ExtractionMalformed("no JSON object in response".to_string()))?;
    let end = raw
        .rfind('}')
        .ok_or_else(|| AppError::ExtractionMalformed("no JSON object in response".to_string()))?;
    if end < start {
        return Err(AppError::ExtractionMalformed(
            "unbalanced JSON object in response".to_string(),
        ));
    }

    let payload: ExtractionPayload = serde_json::from_str(&raw[start..=end])
        .map_err(|e| AppError::ExtractionMalformed(e.to_string()))?;

    validate(&payload)?;
    Ok(payload)
}

fn validate(payload: &ExtractionPayload) -> Result<(), AppError> {
    for entity in &payload.entities {
        if entity.name.trim().is_empty() {
            return Err(AppError::ExtractionMalformed("entity with empty name".to_string()));
        }
        if entity.entity_type.trim().is_empty() {
            return Err(AppError::ExtractionMalformed("entity with empty type".to_string()));
        }
    }
    for fact in &payload.facts {
        if fact.content.trim().is_empty() {
            return Err(AppError::ExtractionMalformed("fact with empty content".to_string()));
        }
        if !(0.0..=1.0).contains(&fact.confidence) {
            return Err(AppError::ExtractionMalformed(format!(
                "fact confidence {} outside [0, 1]",
                fact.confidence
            )));
        }
    }
    for concept in &payload.concepts {
        if concept.term.trim().is_empty() {
            return Err(AppError::ExtractionMalformed("concept with empty term".to_string()));
        }
    }
    for case in &payload.cases {
        if case.case_number.trim().is_empty() {
            return Err(AppError::ExtractionMalformed("case with empty number".to_string()));
        }
    }
    for relation in &payload.relations {
        if relation.resolve().is_none() {
            return Err(AppError::ExtractionMalformed(format!(
                "unknown relation {} ({} -> {})",
                relation.rel_type, relation.src_label, relation.dst_label
            )));
        }
        if relation.src_name.trim().is_empty() || relation.dst_name.trim().is_empty() {
            return Err(AppError::ExtractionMalformed(
                "relation with empty endpoint name".to_string(),
            ));
        }
    }
    Ok(())
}

/// Deterministic, non-model extraction: capitalised token spans become
/// candidate entities, zero relationships, low confidence. Arabic-only text
/// has no capitalisation and yields nothing, which is acceptable: the chunk
/// text itself is still embedded and retrievable.
#[must_use]
pub fn fallback_extraction(text: &str) -> ExtractionPayload {
    let mut entities: Vec<ExtractedEntity> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut span: Vec<&str> = Vec::new();

    let mut flush = |span: &mut Vec<&str>, entities: &mut Vec<ExtractedEntity>| {
        if span.is_empty() {
            return;
        }
        let name = span.join(" ");
        span.clear();
        // Single short tokens are usually sentence-initial words, not names.
        if name.len() < 3 {
            return;
        }
        if seen.insert(name.to_lowercase()) {
            entities.push(ExtractedEntity {
                name,
                entity_type: "ENTITY".to_string(),
                description: None,
                confidence: Some(FALLBACK_CONFIDENCE),
            });
        }
    };

    for token in text.split_whitespace() {
        let word = token.trim_matches(|c: char| !c.is_alphanumeric());
        let capitalised = word
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_uppercase());
        if capitalised {
            span.push(word);
        } else {
            flush(&mut span, &mut entities);
        }
    }
    flush(&mut span, &mut entities);

    ExtractionPayload {
        entities,
        ..Default::default()
    }
}

// =============================================================================
// Prompts
// =============================================================================

const EXTRACTION_PROMPT: &str = r#"You are a knowledge graph extraction expert for legal documents. Extract entities and relationships from the given text.

Focus on:
- Legal entities (persons, organizations, contracts, laws, regulations)
- Standalone factual assertions (payments, obligations, deadlines)
- Legal concepts and terms with their definitions
- Case references (case numbers, courts, jurisdictions)

Be precise and avoid duplicates. Keep every extracted name in its original script; do not transliterate or translate names.

Return ONLY a JSON object matching this schema:
{
  "entities":  [{ "name": "...", "entity_type": "PERSON|ORG|CONTRACT|LAW|...", "description": "..." }],
  "facts":     [{ "content": "...", "fact_type": "...", "confidence": 0.0 }],
  "concepts":  [{ "term": "...", "definition": "...", "category": "..." }],
  "cases":     [{ "case_number": "...", "case_name": "...", "court": "...", "jurisdiction": "...", "status": "..." }],
  "relations": [{ "src_name": "...", "dst_name": "...", "type": "ABOUT|CONTAINS|MENTIONS|RELATED_TO|APPLIES_TO|INVOLVES", "src_label": "Entity|Fact|LegalConcept|Case|Document", "dst_label": "Entity|Fact|LegalConcept|Case|Document" }]
}"#;

const ARABIC_GUIDANCE: &str = "\n\nIMPORTANT: This text is in Arabic. \
Extract entities and relationships in Arabic, preserve Arabic names, terms, \
and legal concepts exactly as they appear, and use Arabic legal terminology \
appropriately.";

const MIXED_GUIDANCE: &str = "\n\nIMPORTANT: This text contains both Arabic \
and English content. Extract entities and relationships in their original \
language and preserve Arabic and English names and terms exactly as they \
appear.";

/// Build the extract-mode prompt for a chunk. Arabic and mixed chunks carry
/// Arabic-legal-terminology guidance; names keep their original script in
/// every case.
#[must_use]
pub fn extraction_prompt(language: Language, chunk: &str) -> String {
    let guidance = match language {
        Language::Ar => ARABIC_GUIDANCE,
        Language::Mixed => MIXED_GUIDANCE,
        Language::En => "",
    };
    format!("{EXTRACTION_PROMPT}{guidance}\n\nText to extract from:\n{chunk}")
}
