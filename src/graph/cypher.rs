//! Property-graph adapter over the Neo4j HTTP transaction endpoint.
//!
//! All statements are parameterised; user-supplied text only ever travels in
//! the `parameters` map. Labels and relationship types are interpolated from
//! the closed enums in [`super`], never from input.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};

use super::{
    node_id, EdgeSpec, GraphEntity, GraphError, GraphStore, NeighbourRecord, NodeLabel, NodeSpec,
    RelationshipType, StoredChunk, UpsertOutcome,
};
use crate::language::Language;

pub struct CypherGraphStore {
    endpoint: String,
    database: String,
    username: String,
    password: String,
    client: Client,
}

impl CypherGraphStore {
    pub fn new(
        endpoint: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            database: database.into(),
            username: username.into(),
            password: password.into(),
            client: Client::new(),
        }
    }

    fn tx_url(&self) -> String {
        format!(
            "{}/db/{}/tx/commit",
            self.endpoint.trim_end_matches('/'),
            self.database
        )
    }

    /// Execute one parameterised statement and return its rows.
    pub async fn run(&self, statement: &str, parameters: Value) -> Result<Vec<Value>, GraphError> {
        let response = self
            .client
            .post(self.tx_url())
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({
                "statements": [
                    { "statement": statement, "parameters": parameters }
                ]
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GraphError::Backend {
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;

        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if let Some(first) = errors.first() {
                return Err(GraphError::Backend {
                    details: first
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown cypher error")
                        .to_string(),
                });
            }
        }

        let rows = body
            .pointer("/results/0/data")
            .and_then(Value::as_array)
            .map(|data| {
                data.iter()
                    .filter_map(|entry| entry.get("row").cloned())
                    .collect()
            })
            .unwrap_or_default();

        Ok(rows)
    }

    fn require_session(session_id: i64) -> Result<String, GraphError> {
        if session_id <= 0 {
            return Err(GraphError::MissingSession);
        }
        Ok(session_id.to_string())
    }
}

fn row_str(row: &Value, idx: usize) -> String {
    row.get(idx)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn row_opt_str(row: &Value, idx: usize) -> Option<String> {
    row.get(idx)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn row_i64(row: &Value, idx: usize) -> i64 {
    row.get(idx).and_then(Value::as_i64).unwrap_or_default()
}

fn row_language(row: &Value, idx: usize) -> Option<Language> {
    row.get(idx)
        .and_then(Value::as_str)
        .and_then(Language::parse)
}

fn row_embedding(row: &Value, idx: usize) -> Vec<f32> {
    row.get(idx)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_f64)
                .map(|v| v as f32)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl GraphStore for CypherGraphStore {
    async fn ensure_indices(&self) -> Result<(), GraphError> {
        let mut statements: Vec<String> = Vec::new();

        for label in NodeLabel::ALL {
            let l = label.as_str();
            statements.push(format!(
                "CREATE INDEX {}_session_idx IF NOT EXISTS FOR (n:{l}) ON (n.session_id)",
                l.to_lowercase()
            ));
            statements.push(format!(
                "CREATE INDEX {}_language_idx IF NOT EXISTS FOR (n:{l}) ON (n.language)",
                l.to_lowercase()
            ));
        }

        for rel in RelationshipType::ALL {
            let r = rel.as_str();
            statements.push(format!(
                "CREATE INDEX {}_session_idx IF NOT EXISTS FOR ()-[r:{r}]-() ON (r.session_id)",
                r.to_lowercase()
            ));
            statements.push(format!(
                "CREATE INDEX {}_language_idx IF NOT EXISTS FOR ()-[r:{r}]-() ON (r.language)",
                r.to_lowercase()
            ));
        }

        statements.push(
            "CREATE INDEX entity_type_idx IF NOT EXISTS FOR (n:Entity) ON (n.entity_type)"
                .to_string(),
        );
        statements.push(
            "CREATE FULLTEXT INDEX chunk_content_idx IF NOT EXISTS \
             FOR (n:DocumentChunk) ON EACH [n.content]"
                .to_string(),
        );

        for statement in statements {
            self.run(&statement, json!({})).await?;
            tracing::debug!(statement = %statement, "graph index ensured");
        }
        Ok(())
    }

    async fn upsert_node(&self, spec: NodeSpec) -> Result<UpsertOutcome, GraphError> {
        let session = Self::require_session(spec.session_id)?;
        let id = node_id(spec.label, spec.session_id, &spec.key);

        let statement = format!(
            "MERGE (n:{label} {{id: $id}}) \
             ON CREATE SET n.session_id = $session_id, n.language = $language, \
                           n.created_at = $now, n._brand_new = true \
             ON MATCH SET n.language = \
                 CASE WHEN n.language <> $language THEN 'mixed' ELSE n.language END \
             SET n += $attrs \
             WITH n, coalesce(n._brand_new, false) AS created \
             REMOVE n._brand_new \
             RETURN created",
            label = spec.label.as_str()
        );

        let mut attrs = spec.attrs;
        attrs.remove("session_id");
        attrs.remove("id");

        let rows = self
            .run(
                &statement,
                json!({
                    "id": id,
                    "session_id": session,
                    "language": spec.language.as_str(),
                    "now": chrono::Utc::now().to_rfc3339(),
                    "attrs": Value::Object(attrs),
                }),
            )
            .await?;

        let created = rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(UpsertOutcome { id, created })
    }

    async fn relate(&self, spec: EdgeSpec) -> Result<bool, GraphError> {
        let session = Self::require_session(spec.session_id)?;
        let from_id = node_id(spec.from.0, spec.session_id, &spec.from.1);
        let to_id = node_id(spec.to.0, spec.session_id, &spec.to.1);

        let statement = format!(
            "MATCH (a:{from} {{id: $from_id}}), (b:{to} {{id: $to_id}}) \
             WHERE a.session_id = $session_id AND b.session_id = $session_id \
             MERGE (a)-[r:{rel}]->(b) \
             ON CREATE SET r.session_id = $session_id, r.language = $language, \
                           r.created_at = $now, r._brand_new = true \
             WITH r, coalesce(r._brand_new, false) AS created \
             REMOVE r._brand_new \
             RETURN created",
            from = spec.from.0.as_str(),
            to = spec.to.0.as_str(),
            rel = spec.rel.as_str()
        );

        let rows = self
            .run(
                &statement,
                json!({
                    "from_id": from_id,
                    "to_id": to_id,
                    "session_id": session,
                    "language": spec.language.as_str(),
                    "now": chrono::Utc::now().to_rfc3339(),
                }),
            )
            .await?;

        Ok(rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    async fn session_chunks(&self, session_id: i64) -> Result<Vec<StoredChunk>, GraphError> {
        let session = Self::require_session(session_id)?;

        let rows = self
            .run(
                "MATCH (n:DocumentChunk) WHERE n.session_id = $session_id \
                 RETURN n.id, n.content, n.source_file, n.page, n.offset, \
                        n.language, n.embedding \
                 ORDER BY n.source_file, n.page, n.offset",
                json!({ "session_id": session }),
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| StoredChunk {
                id: row_str(row, 0),
                content: row_str(row, 1),
                source_file: row_str(row, 2),
                page: row_i64(row, 3),
                offset: row_i64(row, 4),
                language: row_language(row, 5).unwrap_or(Language::En),
                embedding: row_embedding(row, 6),
            })
            .collect())
    }

    async fn keyword_search(
        &self,
        session_id: i64,
        terms: &[String],
        language_filter: Option<Language>,
        limit: usize,
    ) -> Result<Vec<GraphEntity>, GraphError> {
        let session = Self::require_session(session_id)?;
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut params = Map::new();
        params.insert("session_id".to_string(), Value::String(session));
        params.insert("limit".to_string(), json!(limit as i64));

        // Scoring keys off name/content/description; the ANY disjunct keeps
        // the remaining attributes (case numbers, definitions, fact types,
        // courts…) searchable at the lowest relevance tier.
        let mut term_conditions = Vec::new();
        for (i, term) in terms.iter().enumerate() {
            let p = format!("term_{i}");
            term_conditions.push(format!(
                "(n.name IS NOT NULL AND toLower(n.name) CONTAINS ${p}) \
                 OR (n.content IS NOT NULL AND toLower(n.content) CONTAINS ${p}) \
                 OR (n.description IS NOT NULL AND toLower(n.description) CONTAINS ${p}) \
                 OR ANY(prop IN keys(n) WHERE \
                     NOT prop IN ['session_id', 'created_at', 'language', 'id', \
                                  'embedding', 'chunk_index', 'name', 'content', \
                                  'description'] \
                     AND toLower(toString(n[prop])) CONTAINS ${p})"
            ));
            params.insert(p, Value::String(term.to_lowercase()));
        }

        let mut filter = String::new();
        if let Some(language) = language_filter {
            filter.push_str(" AND n.language = $language_filter");
            params.insert(
                "language_filter".to_string(),
                Value::String(language.as_str().to_string()),
            );
        }

        let statement = format!(
            "MATCH (n) WHERE n.session_id = $session_id{filter} AND ({conditions}) \
             WITH n, CASE \
                 WHEN n.content IS NOT NULL THEN 1 \
                 WHEN n.name IS NOT NULL THEN 2 \
                 WHEN n.description IS NOT NULL THEN 3 \
                 ELSE 4 \
             END AS relevance \
             ORDER BY relevance ASC, n.created_at DESC, n.id ASC \
             LIMIT $limit \
             RETURN n.id, n.name, labels(n)[0], n.description, n.language, relevance, n.content",
            conditions = term_conditions.join(" OR ")
        );

        let rows = self.run(&statement, Value::Object(params)).await?;

        Ok(rows
            .iter()
            .map(|row| {
                // Chunk nodes have no name; surface the leading content line.
                let name = row_opt_str(row, 1).unwrap_or_else(|| {
                    row_str(row, 6)
                        .lines()
                        .next()
                        .unwrap_or_default()
                        .chars()
                        .take(50)
                        .collect()
                });
                GraphEntity {
                    id: row_str(row, 0),
                    name,
                    entity_type: row_str(row, 2),
                    description: row_opt_str(row, 3),
                    language: row_language(row, 4),
                    relevance: row_i64(row, 5),
                }
            })
            .collect())
    }

    async fn neighbours(
        &self,
        session_id: i64,
        node_ids: &[String],
        limit: usize,
    ) -> Result<Vec<NeighbourRecord>, GraphError> {
        let session = Self::require_session(session_id)?;
        if node_ids.is_empty() {
            return Ok(Vec::new());
        }

        // Both endpoints and the edge are filtered by session.
        let rows = self
            .run(
                "MATCH (n)-[r]-(related) \
                 WHERE n.session_id = $session_id \
                   AND related.session_id = $session_id \
                   AND r.session_id = $session_id \
                   AND n.id IN $node_ids \
                 RETURN DISTINCT related.id, related.name, labels(related)[0], \
                        related.description, related.language, type(r), r.language \
                 ORDER BY related.id \
                 LIMIT $limit",
                json!({
                    "session_id": session,
                    "node_ids": node_ids,
                    "limit": limit as i64,
                }),
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| NeighbourRecord {
                entity: GraphEntity {
                    id: row_str(row, 0),
                    name: row_opt_str(row, 1).unwrap_or_default(),
                    entity_type: row_str(row, 2),
                    description: row_opt_str(row, 3),
                    language: row_language(row, 4),
                    relevance: 4,
                },
                relationship_type: row_str(row, 5),
                relationship_language: row_language(row, 6),
            })
            .collect())
    }

    async fn count_session_nodes(&self, session_id: i64) -> Result<u64, GraphError> {
        let session = Self::require_session(session_id)?;
        let rows = self
            .run(
                "MATCH (n) WHERE n.session_id = $session_id RETURN count(n)",
                json!({ "session_id": session }),
            )
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    async fn delete_session(&self, session_id: i64) -> Result<(), GraphError> {
        let session = Self::require_session(session_id)?;
        self.run(
            "MATCH (n) WHERE n.session_id = $session_id DETACH DELETE n",
            json!({ "session_id": session }),
        )
        .await?;
        tracing::info!(session_id, "graph data cleared for session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_url_includes_database() {
        let store = CypherGraphStore::new("http://localhost:7474/", "neo4j", "neo4j", "secret");
        assert_eq!(store.tx_url(), "http://localhost:7474/db/neo4j/tx/commit");
    }

    #[test]
    fn writes_without_session_scope_are_refused() {
        assert!(matches!(
            CypherGraphStore::require_session(0),
            Err(GraphError::MissingSession)
        ));
        assert!(CypherGraphStore::require_session(42).is_ok());
    }

    #[test]
    fn row_helpers_tolerate_nulls() {
        let row = serde_json::json!(["abc", null, 7, [0.5, 0.25]]);
        assert_eq!(row_str(&row, 0), "abc");
        assert_eq!(row_opt_str(&row, 1), None);
        assert_eq!(row_i64(&row, 2), 7);
        assert_eq!(row_embedding(&row, 3), vec![0.5, 0.25]);
        assert_eq!(row_embedding(&row, 9), Vec::<f32>::new());
    }
}
