//! Entity write path and search facade.
//!
//! Entities carry structured JSON content. On every write the content is
//! projected to a deterministic text form which feeds both the lexical
//! index and the embedding, so the two text signals and the semantic
//! signal always describe the same material.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingGateway;
use crate::error::{Error, Result};
use crate::models::{Entity, EntityInput, RecordFilter, SearchHit};
use crate::projection;
use crate::search::{clamp_limit, filter_payload, fusion_weights, map_entity_rows, SearchQuery};
use crate::store::{EntityWrite, HybridSearchParams, SearchStore};
use crate::vector;

/// Entity operations over an abstract store and embedding gateway.
pub struct Entities {
    store: Arc<dyn SearchStore>,
    gateway: Arc<EmbeddingGateway>,
    retrieval: RetrievalConfig,
}

impl Entities {
    pub fn new(
        store: Arc<dyn SearchStore>,
        gateway: Arc<EmbeddingGateway>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            retrieval,
        }
    }

    /// Insert a new entity. The store assigns the id.
    pub async fn add(&self, input: EntityInput) -> Result<Entity> {
        let write = self.prepare(&input).await?;
        let entity = self.store.insert_entity(&write).await?;
        debug!(id = %entity.id, kind = %entity.kind, "entity inserted");
        Ok(entity)
    }

    /// Replace an existing entity's content, recomputing the projection
    /// and embedding. Returns `None` when the id is unknown.
    pub async fn update(&self, id: Uuid, input: EntityInput) -> Result<Option<Entity>> {
        let write = self.prepare(&input).await?;
        self.store.update_entity(id, &write).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Entity>> {
        self.store.get_entity(id).await
    }

    /// Non-ranked equality-filtered listing.
    pub async fn match_records(&self, filter: &RecordFilter) -> Result<Vec<Entity>> {
        self.store.match_entities(filter).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        self.store.delete_entity(id).await
    }

    pub async fn clear(&self, project_id: Option<&str>) -> Result<u64> {
        self.store.clear_entities(project_id).await
    }

    /// Hybrid search over entities.
    ///
    /// An empty or whitespace-only query short-circuits to an empty result
    /// before any embedding or engine work.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit<Entity>>> {
        if query.query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query_embedding = self.gateway.embed(&query.query).await?;
        let weights = fusion_weights(query.text_weight.unwrap_or(self.retrieval.text_weight));
        let params = HybridSearchParams {
            query: query.query.clone(),
            query_vector: vector::encode(&query_embedding),
            limit: clamp_limit(query.limit, self.retrieval.default_limit),
            filter: filter_payload(query),
            literal_weight: weights.literal,
            keyword_weight: weights.keyword,
            semantic_weight: weights.semantic,
            fusion_constant: self.retrieval.fusion_constant,
        };
        let rows = self.store.search_entities(&params).await?;
        Ok(map_entity_rows(rows))
    }

    async fn prepare(&self, input: &EntityInput) -> Result<EntityWrite> {
        if input.project_id.is_empty() {
            return Err(Error::InputRejected("projectId must not be empty".into()));
        }
        if !matches!(input.content, Value::Object(_) | Value::Array(_)) {
            return Err(Error::InputRejected(
                "entity content must be a JSON object or array".into(),
            ));
        }
        let content_projection = projection::project(&input.content);
        let embedding = self.gateway.embed(&content_projection).await?;
        Ok(EntityWrite {
            project_id: input.project_id.clone(),
            kind: input.kind.clone(),
            content: input.content.clone(),
            content_projection,
            metadata: input.metadata.clone(),
            embedding: vector::encode(&embedding),
        })
    }
}
