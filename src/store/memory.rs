//! In-memory [`SearchStore`] implementation.
//!
//! A storage-engine stand-in for tests and local development, holding
//! records behind `std::sync::RwLock` maps. It owns a reference ranking
//! (substring-count literal signal, token-overlap keyword signal,
//! brute-force cosine vector signal, weighted reciprocal-rank fusion) so
//! the orchestration layer can be exercised end to end without a database.
//!
//! [`MemoryStore::inject_upsert_fault`] makes a chosen write inside the
//! next batch fail, which is how batch rollback is tested: a faulted batch
//! leaves the store exactly as it was.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Document, Entity, RecordFilter, UpsertCandidate};
use crate::vector;

use super::{
    content_digest, DocumentSearchRow, DocumentWrite, EntitySearchRow, EntityWrite,
    HybridSearchParams, SearchStore,
};

struct StoredDocument {
    record: Document,
    vector: Vec<f32>,
}

struct StoredEntity {
    record: Entity,
    vector: Vec<f32>,
}

/// In-memory storage engine stand-in.
pub struct MemoryStore {
    documents: RwLock<HashMap<Uuid, StoredDocument>>,
    entities: RwLock<HashMap<Uuid, StoredEntity>>,
    upsert_fault: RwLock<Option<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            entities: RwLock::new(HashMap::new()),
            upsert_fault: RwLock::new(None),
        }
    }

    /// Make the write at `index` inside the next document batch fail.
    /// One-shot: the fault is consumed when it fires.
    pub fn inject_upsert_fault(&self, index: usize) {
        *self.upsert_fault.write().unwrap() = Some(index);
    }

    /// Number of stored documents (test observability).
    pub fn document_count(&self) -> usize {
        self.documents.read().unwrap().len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Next `updated_at` for a rewrite: strictly after the previous value,
/// even when the wall clock has not advanced a millisecond.
fn advance(now: DateTime<Utc>, previous: DateTime<Utc>) -> DateTime<Utc> {
    let floor = previous + Duration::milliseconds(1);
    if now > floor {
        now
    } else {
        floor
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        0.0
    } else {
        f64::from(dot / (norm_a * norm_b))
    }
}

/// Non-overlapping occurrence count of `query` in `text`, case-folded.
fn literal_score(text: &str, query: &str) -> f64 {
    let text = text.to_lowercase();
    let query = query.to_lowercase();
    if query.is_empty() {
        return 0.0;
    }
    text.matches(query.as_str()).count() as f64
}

/// Fraction of query tokens present in the text, case-folded.
fn keyword_score(text: &str, query: &str) -> f64 {
    let text = text.to_lowercase();
    let tokens: Vec<&str> = query.split_whitespace().collect();
    if tokens.is_empty() {
        return 0.0;
    }
    let hits = tokens
        .iter()
        .filter(|t| text.contains(t.to_lowercase().as_str()))
        .count();
    hits as f64 / tokens.len() as f64
}

/// Reciprocal-rank fusion over the three signal lists.
///
/// Each candidate receives `weight / (k + rank)` from every signal where
/// it scored above zero, ranks being 1-based within that signal's
/// descending order. Ties break by id for determinism.
fn fuse(
    scored: &[(Uuid, f64, f64, f64)],
    params: &HybridSearchParams,
) -> HashMap<Uuid, f64> {
    let mut totals: HashMap<Uuid, f64> = HashMap::new();
    let channels: [(usize, f64); 3] = [
        (0, params.literal_weight),
        (1, params.keyword_weight),
        (2, params.semantic_weight),
    ];
    for (channel, weight) in channels {
        let mut ranked: Vec<(Uuid, f64)> = scored
            .iter()
            .map(|(id, literal, keyword, semantic)| {
                let score = match channel {
                    0 => *literal,
                    1 => *keyword,
                    _ => *semantic,
                };
                (*id, score)
            })
            .filter(|(_, score)| *score > 0.0)
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        for (rank, (id, _)) in ranked.iter().enumerate() {
            *totals.entry(*id).or_insert(0.0) +=
                weight / (params.fusion_constant + (rank + 1) as f64);
        }
    }
    totals
}

struct SearchFilter {
    ids: Option<Vec<Uuid>>,
    kinds: Option<Vec<String>>,
    project_ids: Option<Vec<String>>,
}

impl SearchFilter {
    fn parse(filter: &serde_json::Value) -> Self {
        let strings = |key: &str| -> Option<Vec<String>> {
            filter.get(key).and_then(|v| v.as_array()).map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(String::from))
                    .collect()
            })
        };
        Self {
            ids: strings("ids").map(|ids| {
                ids.iter()
                    .filter_map(|s| Uuid::parse_str(s).ok())
                    .collect()
            }),
            kinds: strings("types"),
            project_ids: strings("projectIds"),
        }
    }

    fn accepts(&self, id: Uuid, kind: &str, project_id: &str) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&id) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.iter().any(|k| k == kind) {
                return false;
            }
        }
        if let Some(projects) = &self.project_ids {
            if !projects.iter().any(|p| p == project_id) {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl SearchStore for MemoryStore {
    async fn changed_sources(
        &self,
        project_id: &str,
        candidates: &[UpsertCandidate],
    ) -> Result<Vec<String>> {
        let documents = self.documents.read().unwrap();
        let mut changed = Vec::new();
        for candidate in candidates {
            let stored = documents
                .values()
                .find(|d| d.record.project_id == project_id && d.record.src == candidate.src);
            let unchanged = stored
                .map(|d| d.record.content_hash == content_digest(&candidate.content))
                .unwrap_or(false);
            if !unchanged {
                changed.push(candidate.src.clone());
            }
        }
        Ok(changed)
    }

    async fn upsert_documents(&self, writes: &[DocumentWrite]) -> Result<Vec<Document>> {
        let fault = self.upsert_fault.write().unwrap().take();
        let now = Utc::now();
        let mut documents = self.documents.write().unwrap();

        // Stage everything first so a mid-batch failure leaves the map
        // untouched.
        let mut staged: Vec<StoredDocument> = Vec::with_capacity(writes.len());
        for (index, write) in writes.iter().enumerate() {
            if fault == Some(index) {
                return Err(Error::TransactionFailed(anyhow!(
                    "injected write fault at index {}",
                    index
                )));
            }
            // A repeated locator within the batch updates its own staged
            // row instead of minting a second one.
            let slot = staged
                .iter()
                .position(|d| d.record.project_id == write.project_id && d.record.src == write.src);
            let (id, created_at, updated_at) = match slot {
                Some(index) => {
                    let record = &staged[index].record;
                    (record.id, record.created_at, advance(now, record.updated_at))
                }
                None => {
                    let existing = documents
                        .values()
                        .find(|d| {
                            d.record.project_id == write.project_id && d.record.src == write.src
                        })
                        .map(|d| (d.record.id, d.record.created_at, d.record.updated_at));
                    match existing {
                        Some((id, created, updated)) => (id, created, advance(now, updated)),
                        None => (Uuid::new_v4(), now, now),
                    }
                }
            };
            let stored = StoredDocument {
                record: Document {
                    id,
                    project_id: write.project_id.clone(),
                    kind: write.kind.clone(),
                    name: write.name.clone(),
                    src: write.src.clone(),
                    content: write.content.clone(),
                    content_hash: write.content_hash.clone(),
                    created_at,
                    updated_at,
                    metadata: write.metadata.clone(),
                },
                vector: vector::decode(&write.embedding)?,
            };
            match slot {
                Some(index) => staged[index] = stored,
                None => staged.push(stored),
            }
        }

        let mut written = Vec::with_capacity(staged.len());
        for stored in staged {
            written.push(stored.record.clone());
            documents.insert(stored.record.id, stored);
        }
        Ok(written)
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        Ok(self
            .documents
            .read()
            .unwrap()
            .get(&id)
            .map(|d| d.record.clone()))
    }

    async fn get_document_by_src(&self, project_id: &str, src: &str) -> Result<Option<Document>> {
        Ok(self
            .documents
            .read()
            .unwrap()
            .values()
            .find(|d| d.record.project_id == project_id && d.record.src == src)
            .map(|d| d.record.clone()))
    }

    async fn update_document(&self, id: Uuid, write: &DocumentWrite) -> Result<Option<Document>> {
        let now = Utc::now();
        let mut documents = self.documents.write().unwrap();
        let Some(stored) = documents.get_mut(&id) else {
            return Ok(None);
        };
        stored.record.kind = write.kind.clone();
        stored.record.name = write.name.clone();
        stored.record.src = write.src.clone();
        stored.record.content = write.content.clone();
        stored.record.content_hash = write.content_hash.clone();
        stored.record.metadata = write.metadata.clone();
        stored.record.updated_at = advance(now, stored.record.updated_at);
        stored.vector = vector::decode(&write.embedding)?;
        Ok(Some(stored.record.clone()))
    }

    async fn match_documents(&self, filter: &RecordFilter) -> Result<Vec<Document>> {
        let documents = self.documents.read().unwrap();
        let mut matched: Vec<Document> = documents
            .values()
            .filter(|d| {
                filter
                    .project_id
                    .as_ref()
                    .map_or(true, |p| &d.record.project_id == p)
                    && filter.kind.as_ref().map_or(true, |k| &d.record.kind == k)
                    && filter.src.as_ref().map_or(true, |s| &d.record.src == s)
                    && filter.name.as_ref().map_or(true, |n| &d.record.name == n)
            })
            .map(|d| d.record.clone())
            .collect();
        matched.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matched)
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool> {
        Ok(self.documents.write().unwrap().remove(&id).is_some())
    }

    async fn clear_documents(&self, project_id: Option<&str>) -> Result<u64> {
        let mut documents = self.documents.write().unwrap();
        let before = documents.len();
        match project_id {
            Some(project) => documents.retain(|_, d| d.record.project_id != project),
            None => documents.clear(),
        }
        Ok((before - documents.len()) as u64)
    }

    async fn search_documents(
        &self,
        params: &HybridSearchParams,
    ) -> Result<Vec<DocumentSearchRow>> {
        let query_vec = vector::decode(&params.query_vector)?;
        let filter = SearchFilter::parse(&params.filter);
        let documents = self.documents.read().unwrap();

        let scored: Vec<(Uuid, f64, f64, f64)> = documents
            .values()
            .filter(|d| filter.accepts(d.record.id, &d.record.kind, &d.record.project_id))
            .map(|d| {
                // name and src participate in the text signals alongside
                // content; metadata never does.
                let haystack =
                    format!("{} {} {}", d.record.name, d.record.src, d.record.content);
                (
                    d.record.id,
                    literal_score(&haystack, &params.query),
                    keyword_score(&haystack, &params.query),
                    cosine(&d.vector, &query_vec),
                )
            })
            .collect();

        let totals = fuse(&scored, params);
        let mut rows: Vec<DocumentSearchRow> = scored
            .iter()
            .filter_map(|(id, literal, keyword, semantic)| {
                let total = *totals.get(id)?;
                if total <= 0.0 {
                    return None;
                }
                Some(DocumentSearchRow {
                    record: documents[id].record.clone(),
                    keyword_score: *keyword,
                    text_score: *literal,
                    vec_score: *semantic,
                    total_score: total,
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            b.total_score
                .partial_cmp(&a.total_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        rows.truncate(params.limit as usize);
        Ok(rows)
    }

    async fn insert_entity(&self, write: &EntityWrite) -> Result<Entity> {
        let now = Utc::now();
        let record = Entity {
            id: Uuid::new_v4(),
            project_id: write.project_id.clone(),
            kind: write.kind.clone(),
            content: write.content.clone(),
            content_projection: write.content_projection.clone(),
            created_at: now,
            updated_at: now,
            metadata: write.metadata.clone(),
        };
        self.entities.write().unwrap().insert(
            record.id,
            StoredEntity {
                record: record.clone(),
                vector: vector::decode(&write.embedding)?,
            },
        );
        Ok(record)
    }

    async fn update_entity(&self, id: Uuid, write: &EntityWrite) -> Result<Option<Entity>> {
        let now = Utc::now();
        let mut entities = self.entities.write().unwrap();
        let Some(stored) = entities.get_mut(&id) else {
            return Ok(None);
        };
        stored.record.kind = write.kind.clone();
        stored.record.content = write.content.clone();
        stored.record.content_projection = write.content_projection.clone();
        stored.record.metadata = write.metadata.clone();
        stored.record.updated_at = advance(now, stored.record.updated_at);
        stored.vector = vector::decode(&write.embedding)?;
        Ok(Some(stored.record.clone()))
    }

    async fn get_entity(&self, id: Uuid) -> Result<Option<Entity>> {
        Ok(self
            .entities
            .read()
            .unwrap()
            .get(&id)
            .map(|e| e.record.clone()))
    }

    async fn match_entities(&self, filter: &RecordFilter) -> Result<Vec<Entity>> {
        let entities = self.entities.read().unwrap();
        let mut matched: Vec<Entity> = entities
            .values()
            .filter(|e| {
                filter
                    .project_id
                    .as_ref()
                    .map_or(true, |p| &e.record.project_id == p)
                    && filter.kind.as_ref().map_or(true, |k| &e.record.kind == k)
            })
            .map(|e| e.record.clone())
            .collect();
        matched.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matched)
    }

    async fn delete_entity(&self, id: Uuid) -> Result<bool> {
        Ok(self.entities.write().unwrap().remove(&id).is_some())
    }

    async fn clear_entities(&self, project_id: Option<&str>) -> Result<u64> {
        let mut entities = self.entities.write().unwrap();
        let before = entities.len();
        match project_id {
            Some(project) => entities.retain(|_, e| e.record.project_id != project),
            None => entities.clear(),
        }
        Ok((before - entities.len()) as u64)
    }

    async fn search_entities(&self, params: &HybridSearchParams) -> Result<Vec<EntitySearchRow>> {
        let query_vec = vector::decode(&params.query_vector)?;
        let filter = SearchFilter::parse(&params.filter);
        let entities = self.entities.read().unwrap();

        let scored: Vec<(Uuid, f64, f64, f64)> = entities
            .values()
            .filter(|e| filter.accepts(e.record.id, &e.record.kind, &e.record.project_id))
            .map(|e| {
                (
                    e.record.id,
                    literal_score(&e.record.content_projection, &params.query),
                    keyword_score(&e.record.content_projection, &params.query),
                    cosine(&e.vector, &query_vec),
                )
            })
            .collect();

        let totals = fuse(&scored, params);
        let mut rows: Vec<EntitySearchRow> = scored
            .iter()
            .filter_map(|(id, literal, keyword, semantic)| {
                let total = *totals.get(id)?;
                if total <= 0.0 {
                    return None;
                }
                Some(EntitySearchRow {
                    record: entities[id].record.clone(),
                    keyword_score: *keyword,
                    text_score: *literal,
                    vec_score: *semantic,
                    total_score: total,
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            b.total_score
                .partial_cmp(&a.total_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        rows.truncate(params.limit as usize);
        Ok(rows)
    }
}
