//! Core data models.
//!
//! Two record kinds flow through the layer, structurally parallel: free-form
//! text [`Document`]s and JSON-shaped [`Entity`]s. Wire names are camelCase
//! and the `kind` field serializes as `type`, matching the shapes callers
//! exchange with the layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A stored free-form text record.
///
/// `(project_id, src)` is unique: re-upserting the same pair updates in
/// place. `content_hash` is a SHA-256 digest of `content`, recomputed on
/// every write and used only for change detection — never as a relevance
/// signal. `metadata` never participates in search.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: Uuid,
    pub project_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub src: String,
    pub content: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Option<Value>,
}

/// A stored JSON-shaped record.
///
/// `content` is authoritative; `content_projection` is derived from it on
/// every write and exists solely to feed lexical indexing.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: Uuid,
    pub project_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Value,
    pub content_projection: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Option<Value>,
}

/// Caller input for a document upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInput {
    pub project_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub src: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    /// Precomputed embedding; when present it is reused instead of
    /// recomputed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Caller input for an entity write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityInput {
    pub project_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Must be a JSON object or array.
    pub content: Value,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// A `(src, content)` pair submitted to change detection.
#[derive(Debug, Clone)]
pub struct UpsertCandidate {
    pub src: String,
    pub content: String,
}

/// A ranked row mapped back to its record plus per-signal scores.
///
/// Scores come straight from the storage engine's ranking procedure;
/// the layer never recomputes or reorders them.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit<T> {
    #[serde(flatten)]
    pub record: T,
    /// Lexical (tokenized/stemmed) full-text score.
    pub keyword_score: f64,
    /// Literal substring-match score.
    pub text_score: f64,
    /// Cosine-similarity-derived vector score.
    pub vec_score: f64,
    /// The engine's fused rank-based score.
    pub total_score: f64,
}

/// Equality filter for non-ranked `match` reads.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub project_id: Option<String>,
    pub kind: Option<String>,
    pub src: Option<String>,
    pub name: Option<String>,
}
