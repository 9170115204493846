//! Document upsert engine and search facade.
//!
//! Writes are content-addressed: every batch is diffed against the store
//! first, unchanged records are skipped before any embedding work happens,
//! and the surviving writes commit in a single transaction. Searches embed
//! the query once, normalize the request, and hand ranking entirely to the
//! storage engine.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingGateway;
use crate::error::{Error, Result};
use crate::models::{Document, DocumentInput, RecordFilter, SearchHit, UpsertCandidate};
use crate::search::{
    clamp_limit, filter_payload, fusion_weights, map_document_rows, SearchQuery,
};
use crate::store::{content_digest, DocumentWrite, HybridSearchParams, SearchStore};
use crate::vector;

/// Document operations over an abstract store and embedding gateway.
pub struct Documents {
    store: Arc<dyn SearchStore>,
    gateway: Arc<EmbeddingGateway>,
    retrieval: RetrievalConfig,
}

impl Documents {
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

    /// Which of the candidate sources would actually be written.
    pub async fn diff(
        &self,
        project_id: &str,
        candidates: &[UpsertCandidate],
    ) -> Result<Vec<String>> {
        if project_id.is_empty() {
            return Err(Error::InputRejected("projectId must not be empty".into()));
        }
        self.store.changed_sources(project_id, candidates).await
    }

    /// Upsert a batch of documents.
    ///
    /// Unchanged records (same `(project_id, src)` and same content digest)
    /// are dropped before any embedding work. The remaining writes share
    /// one embedding batch and one store transaction; the returned rows are
    /// exactly the records that were written, in input order. An empty
    /// batch, or a batch where nothing changed, performs no writes.
    pub async fn upsert_batch(&self, inputs: &[DocumentInput]) -> Result<Vec<Document>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        for input in inputs {
            if input.project_id.is_empty() {
                return Err(Error::InputRejected("projectId must not be empty".into()));
            }
            if input.src.is_empty() {
                return Err(Error::InputRejected("src must not be empty".into()));
            }
        }

        // Last write wins when a batch repeats a locator, so the unique
        // (project_id, src) pair maps to exactly one row.
        let mut deduped: Vec<&DocumentInput> = Vec::with_capacity(inputs.len());
        for input in inputs {
            match deduped
                .iter_mut()
                .find(|d| d.project_id == input.project_id && d.src == input.src)
            {
                Some(slot) => *slot = input,
                None => deduped.push(input),
            }
        }

        // Diff per project so the change check stays a single read per
        // project even in a mixed batch.
        let mut projects: Vec<&str> = Vec::new();
        for input in &deduped {
            if !projects.contains(&input.project_id.as_str()) {
                projects.push(&input.project_id);
            }
        }
        let mut changed: HashSet<(String, String)> = HashSet::new();
        for project_id in projects {
            let candidates: Vec<UpsertCandidate> = deduped
                .iter()
                .filter(|i| i.project_id == project_id)
                .map(|i| UpsertCandidate {
                    src: i.src.clone(),
                    content: i.content.clone(),
                })
                .collect();
            for src in self.store.changed_sources(project_id, &candidates).await? {
                changed.insert((project_id.to_string(), src));
            }
        }

        let pending: Vec<&DocumentInput> = deduped
            .into_iter()
            .filter(|i| changed.contains(&(i.project_id.clone(), i.src.clone())))
            .collect();
        debug!(
            total = inputs.len(),
            changed = pending.len(),
            "document upsert batch diffed"
        );
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        // One embedding round trip for every changed input that did not
        // arrive with a precomputed vector.
        let to_embed: Vec<String> = pending
            .iter()
            .filter(|i| i.embedding.is_none())
            .map(|i| i.content.clone())
            .collect();
        let mut computed = self.gateway.embed_batch(&to_embed).await?.into_iter();

        let mut writes = Vec::with_capacity(pending.len());
        for input in &pending {
            let embedding = match &input.embedding {
                Some(vector) => vector.clone(),
                None => computed
                    .next()
                    .ok_or_else(|| Error::backend(anyhow::anyhow!("embedding batch truncated")))?,
            };
            writes.push(DocumentWrite {
                project_id: input.project_id.clone(),
                kind: input.kind.clone(),
                name: input.name.clone(),
                src: input.src.clone(),
                content: input.content.clone(),
                content_hash: content_digest(&input.content),
                metadata: input.metadata.clone(),
                embedding: vector::encode(&embedding),
            });
        }

        self.store.upsert_documents(&writes).await
    }

    /// Upsert a single document. Returns `None` when the content was
    /// unchanged and nothing was written.
    pub async fn upsert_one(&self, input: DocumentInput) -> Result<Option<Document>> {
        let mut written = self.upsert_batch(std::slice::from_ref(&input)).await?;
        Ok(written.pop())
    }

    /// Replace an existing document by id, recomputing the content digest
    /// and embedding. Returns `None` when the id is unknown.
    pub async fn update(&self, id: uuid::Uuid, input: DocumentInput) -> Result<Option<Document>> {
        if input.project_id.is_empty() {
            return Err(Error::InputRejected("projectId must not be empty".into()));
        }
        if input.src.is_empty() {
            return Err(Error::InputRejected("src must not be empty".into()));
        }
        let embedding = match &input.embedding {
            Some(vector) => vector.clone(),
            None => self.gateway.embed(&input.content).await?,
        };
        let write = DocumentWrite {
            project_id: input.project_id.clone(),
            kind: input.kind.clone(),
            name: input.name.clone(),
            src: input.src.clone(),
            content: input.content.clone(),
            content_hash: content_digest(&input.content),
            metadata: input.metadata.clone(),
            embedding: vector::encode(&embedding),
        };
        self.store.update_document(id, &write).await
    }

    pub async fn get(&self, id: uuid::Uuid) -> Result<Option<Document>> {
        self.store.get_document(id).await
    }

    pub async fn get_by_src(&self, project_id: &str, src: &str) -> Result<Option<Document>> {
        self.store.get_document_by_src(project_id, src).await
    }

    /// Non-ranked equality-filtered listing.
    pub async fn match_records(&self, filter: &RecordFilter) -> Result<Vec<Document>> {
        self.store.match_documents(filter).await
    }

    pub async fn delete(&self, id: uuid::Uuid) -> Result<bool> {
        self.store.delete_document(id).await
    }

    pub async fn clear(&self, project_id: Option<&str>) -> Result<u64> {
        self.store.clear_documents(project_id).await
    }

    /// Hybrid search over documents.
    ///
    /// An empty or whitespace-only query short-circuits to an empty result
    /// before any embedding or engine work.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit<Document>>> {
        if query.query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let params = self.build_params(query).await?;
        let rows = self.store.search_documents(&params).await?;
        Ok(map_document_rows(rows))
    }

    async fn build_params(&self, query: &SearchQuery) -> Result<HybridSearchParams> {
        let query_embedding = self.gateway.embed(&query.query).await?;
        let weights = fusion_weights(query.text_weight.unwrap_or(self.retrieval.text_weight));
        Ok(HybridSearchParams {
            query: query.query.clone(),
            query_vector: vector::encode(&query_embedding),
            limit: clamp_limit(query.limit, self.retrieval.default_limit),
            filter: filter_payload(query),
            literal_weight: weights.literal,
            keyword_weight: weights.keyword,
            semantic_weight: weights.semantic,
            fusion_constant: self.retrieval.fusion_constant,
        })
    }
}
