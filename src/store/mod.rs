//! Storage-engine contract.
//!
//! The [`SearchStore`] trait expresses everything this layer consumes from
//! the relational engine: content-hash change detection, a transactional
//! batch upsert, parameterized CRUD per record kind, and the hybrid
//! ranking procedure. Ranking and score fusion happen entirely inside the
//! engine; the layer only supplies normalized parameters and consumes
//! ranked rows.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! | Method group | Purpose |
//! |--------------|---------|
//! | `changed_sources` | Which `(src, content)` pairs need writing |
//! | `upsert_documents` | All-or-nothing batch write |
//! | `get_* / match_* / update_* / delete_* / clear_*` | CRUD per kind |
//! | `search_documents` / `search_entities` | Ranking procedure dispatch |

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Document, Entity, RecordFilter, UpsertCandidate};

/// Parameters handed to the engine's ranking procedure.
///
/// `query_vector` is the Vector Codec literal; `filter` contains only the
/// filter keys that were actually supplied (key absent = no constraint).
#[derive(Debug, Clone)]
pub struct HybridSearchParams {
    pub query: String,
    pub query_vector: String,
    pub limit: i64,
    pub filter: Value,
    pub literal_weight: f64,
    pub keyword_weight: f64,
    pub semantic_weight: f64,
    pub fusion_constant: f64,
}

/// A fully-prepared document write: content hash and embedding literal
/// already computed, so the store only persists.
#[derive(Debug, Clone)]
pub struct DocumentWrite {
    pub project_id: String,
    pub kind: String,
    pub name: String,
    pub src: String,
    pub content: String,
    pub content_hash: String,
    pub metadata: Option<Value>,
    pub embedding: String,
}

/// A fully-prepared entity write.
#[derive(Debug, Clone)]
pub struct EntityWrite {
    pub project_id: String,
    pub kind: String,
    pub content: Value,
    pub content_projection: String,
    pub metadata: Option<Value>,
    pub embedding: String,
}

/// Raw ranked row for a document search.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentSearchRow {
    #[sqlx(flatten)]
    pub record: Document,
    pub keyword_score: f64,
    pub text_score: f64,
    pub vec_score: f64,
    pub total_score: f64,
}

/// Raw ranked row for an entity search.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EntitySearchRow {
    #[sqlx(flatten)]
    pub record: Entity,
    pub keyword_score: f64,
    pub text_score: f64,
    pub vec_score: f64,
    pub total_score: f64,
}

/// Abstract storage engine.
#[async_trait]
pub trait SearchStore: Send + Sync {
    // ---- documents ----

    /// Return the subset of candidate `src` values that are absent or
    /// whose stored content digest differs from a digest of the supplied
    /// content. Pure read; no side effects.
    async fn changed_sources(
        &self,
        project_id: &str,
        candidates: &[UpsertCandidate],
    ) -> Result<Vec<String>>;

    /// Upsert a batch of documents in one transaction. Either every write
    /// commits or none is visible. Returns the written rows in input
    /// order; a repeated `(project_id, src)` within one batch collapses
    /// to its last write. `updated_at` strictly increases on every
    /// rewrite of the same pair.
    async fn upsert_documents(&self, writes: &[DocumentWrite]) -> Result<Vec<Document>>;

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>>;

    /// Get-by-locator: the unique `(project_id, src)` pair.
    async fn get_document_by_src(&self, project_id: &str, src: &str) -> Result<Option<Document>>;

    /// Update an existing document in place by id. Returns `None` when
    /// the id is unknown. `updated_at` strictly increases.
    async fn update_document(&self, id: Uuid, write: &DocumentWrite) -> Result<Option<Document>>;

    /// Non-ranked equality-filtered read.
    async fn match_documents(&self, filter: &RecordFilter) -> Result<Vec<Document>>;

    /// Delete by id; returns whether a row existed.
    async fn delete_document(&self, id: Uuid) -> Result<bool>;

    /// Bulk delete, optionally scoped to a project. Returns rows removed.
    async fn clear_documents(&self, project_id: Option<&str>) -> Result<u64>;

    /// Invoke the engine's ranking procedure over documents.
    async fn search_documents(&self, params: &HybridSearchParams)
        -> Result<Vec<DocumentSearchRow>>;

    // ---- entities ----

    /// Insert a new entity; the store assigns the id.
    async fn insert_entity(&self, write: &EntityWrite) -> Result<Entity>;

    /// Update an existing entity in place. Returns `None` when the id is
    /// unknown. `updated_at` strictly increases.
    async fn update_entity(&self, id: Uuid, write: &EntityWrite) -> Result<Option<Entity>>;

    async fn get_entity(&self, id: Uuid) -> Result<Option<Entity>>;

    async fn match_entities(&self, filter: &RecordFilter) -> Result<Vec<Entity>>;

    async fn delete_entity(&self, id: Uuid) -> Result<bool>;

    async fn clear_entities(&self, project_id: Option<&str>) -> Result<u64>;

    /// Invoke the engine's ranking procedure over entities.
    async fn search_entities(&self, params: &HybridSearchParams) -> Result<Vec<EntitySearchRow>>;
}

/// SHA-256 digest of record content, hex-encoded.
///
/// The digest is the change-detection key shared between the upsert engine
/// and the store implementations; it is never exposed as a relevance
/// signal.
pub fn content_digest(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_digest_deterministic() {
        assert_eq!(content_digest("hello"), content_digest("hello"));
        assert_ne!(content_digest("hello"), content_digest("hello!"));
    }

    #[test]
    fn test_content_digest_is_hex_sha256() {
        let digest = content_digest("");
        assert_eq!(digest.len(), 64);
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
