//! Search request normalization and result mapping.
//!
//! Callers hand over a [`SearchQuery`]; this module turns it into the exact
//! parameters the storage engine's ranking procedure expects: a clamped
//! limit, a three-way weight split derived from a single `text_weight`
//! knob, and a filter payload that carries only the keys actually supplied.
//! Ranked rows come back as [`SearchHit`]s in engine order; nothing here
//! reorders or rescores them.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::models::SearchHit;
use crate::store::{DocumentSearchRow, EntitySearchRow};

pub const DEFAULT_TEXT_WEIGHT: f64 = 0.5;
pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 1000;

/// A caller-facing search request.
///
/// Every field except `query` is optional; omitted fields fall back to
/// configured defaults and empty filter lists mean "no constraint".
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub query: String,
    /// Share of the fused score given to the two text signals. Clamped to
    /// [0, 1]; the complement goes to the semantic signal.
    #[serde(default)]
    pub text_weight: Option<f64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub ids: Vec<Uuid>,
    #[serde(default, rename = "types")]
    pub kinds: Vec<String>,
    #[serde(default)]
    pub project_ids: Vec<String>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            text_weight: None,
            limit: None,
            ids: Vec::new(),
            kinds: Vec::new(),
            project_ids: Vec::new(),
        }
    }
}

/// The normalized three-way weight split.
///
/// The text share is divided evenly between the literal and keyword
/// signals; the semantic signal takes the remainder. The three always sum
/// to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub literal: f64,
    pub keyword: f64,
    pub semantic: f64,
}

pub fn fusion_weights(text_weight: f64) -> FusionWeights {
    let tw = text_weight.clamp(0.0, 1.0);
    FusionWeights {
        literal: tw / 2.0,
        keyword: tw / 2.0,
        semantic: 1.0 - tw,
    }
}

pub fn clamp_limit(limit: Option<i64>, default_limit: i64) -> i64 {
    limit.unwrap_or(default_limit).clamp(1, MAX_LIMIT)
}

/// Build the filter payload for the ranking procedure.
///
/// Keys are present only for constraints the caller supplied, so the
/// engine can distinguish "unconstrained" from "constrained to nothing".
pub fn filter_payload(query: &SearchQuery) -> Value {
    let mut filter = Map::new();
    if !query.ids.is_empty() {
        filter.insert("ids".to_string(), json!(query.ids));
    }
    if !query.kinds.is_empty() {
        filter.insert("types".to_string(), json!(query.kinds));
    }
    if !query.project_ids.is_empty() {
        filter.insert("projectIds".to_string(), json!(query.project_ids));
    }
    Value::Object(filter)
}

pub fn map_document_rows(
    rows: Vec<DocumentSearchRow>,
) -> Vec<SearchHit<crate::models::Document>> {
    rows.into_iter()
        .map(|row| SearchHit {
            record: row.record,
            keyword_score: row.keyword_score,
            text_score: row.text_score,
            vec_score: row.vec_score,
            total_score: row.total_score,
        })
        .collect()
}

pub fn map_entity_rows(rows: Vec<EntitySearchRow>) -> Vec<SearchHit<crate::models::Entity>> {
    rows.into_iter()
        .map(|row| SearchHit {
            record: row.record,
            keyword_score: row.keyword_score,
            text_score: row.text_score,
            vec_score: row.vec_score,
            total_score: row.total_score,
        })
        .collect()
}
