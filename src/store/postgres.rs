//! Postgres [`SearchStore`] implementation over sqlx.
//!
//! Consumes the storage-engine contract described in `schema/postgres.sql`:
//! `documents` and `entities` tables with native tsvector and pgvector
//! indexes, and the `hybrid_search_documents` / `hybrid_search_entities`
//! ranking procedures. All statements are parameterized; change detection
//! runs over `unnest` parallel arrays in a single round trip; the batch
//! upsert holds one transaction so a failed write rolls back the whole
//! batch.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Document, Entity, RecordFilter, UpsertCandidate};

use super::{
    content_digest, DocumentSearchRow, DocumentWrite, EntitySearchRow, EntityWrite,
    HybridSearchParams, SearchStore,
};

/// Storage engine backed by a Postgres pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SearchStore for PgStore {
    async fn changed_sources(
        &self,
        project_id: &str,
        candidates: &[UpsertCandidate],
    ) -> Result<Vec<String>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let srcs: Vec<String> = candidates.iter().map(|c| c.src.clone()).collect();
        let hashes: Vec<String> = candidates
            .iter()
            .map(|c| content_digest(&c.content))
            .collect();

        let changed: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT c.src
            FROM unnest($2::text[], $3::text[]) AS c(src, hash)
            LEFT JOIN documents d
                   ON d.project_id = $1 AND d.src = c.src
            WHERE d.id IS NULL OR d.content_hash <> c.hash
            "#,
        )
        .bind(project_id)
        .bind(&srcs)
        .bind(&hashes)
        .fetch_all(&self.pool)
        .await?;

        Ok(changed)
    }

    async fn upsert_documents(&self, writes: &[DocumentWrite]) -> Result<Vec<Document>> {
        if writes.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::TransactionFailed(e.into()))?;

        let mut written = Vec::with_capacity(writes.len());
        for write in writes {
            let row: Document = sqlx::query_as(
                r#"
                INSERT INTO documents
                    (id, project_id, kind, name, src, content, content_hash,
                     embedding, created_at, updated_at, metadata)
                VALUES
                    (gen_random_uuid(), $1, $2, $3, $4, $5, $6,
                     $7::vector, now(), now(), $8)
                ON CONFLICT (project_id, src) DO UPDATE SET
                    kind = excluded.kind,
                    name = excluded.name,
                    content = excluded.content,
                    content_hash = excluded.content_hash,
                    embedding = excluded.embedding,
                    metadata = excluded.metadata,
                    updated_at = GREATEST(
                        now(),
                        documents.updated_at + interval '1 millisecond')
                RETURNING id, project_id, kind, name, src, content,
                          content_hash, created_at, updated_at, metadata
                "#,
            )
            .bind(&write.project_id)
            .bind(&write.kind)
            .bind(&write.name)
            .bind(&write.src)
            .bind(&write.content)
            .bind(&write.content_hash)
            .bind(&write.embedding)
            .bind(&write.metadata)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| Error::TransactionFailed(e.into()))?;
            written.push(row);
        }

        tx.commit()
            .await
            .map_err(|e| Error::TransactionFailed(e.into()))?;
        Ok(written)
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        let row = sqlx::query_as(
            r#"
            SELECT id, project_id, kind, name, src, content, content_hash,
                   created_at, updated_at, metadata
            FROM documents WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_document_by_src(&self, project_id: &str, src: &str) -> Result<Option<Document>> {
        let row = sqlx::query_as(
            r#"
            SELECT id, project_id, kind, name, src, content, content_hash,
                   created_at, updated_at, metadata
            FROM documents WHERE project_id = $1 AND src = $2
            "#,
        )
        .bind(project_id)
        .bind(src)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_document(&self, id: Uuid, write: &DocumentWrite) -> Result<Option<Document>> {
        let row = sqlx::query_as(
            r#"
            UPDATE documents SET
                kind = $2,
                name = $3,
                src = $4,
                content = $5,
                content_hash = $6,
                embedding = $7::vector,
                metadata = $8,
                updated_at = GREATEST(
                    now(), documents.updated_at + interval '1 millisecond')
            WHERE id = $1
            RETURNING id, project_id, kind, name, src, content, content_hash,
                      created_at, updated_at, metadata
            "#,
        )
        .bind(id)
        .bind(&write.kind)
        .bind(&write.name)
        .bind(&write.src)
        .bind(&write.content)
        .bind(&write.content_hash)
        .bind(&write.embedding)
        .bind(&write.metadata)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn match_documents(&self, filter: &RecordFilter) -> Result<Vec<Document>> {
        let rows = sqlx::query_as(
            r#"
            SELECT id, project_id, kind, name, src, content, content_hash,
                   created_at, updated_at, metadata
            FROM documents
            WHERE ($1::text IS NULL OR project_id = $1)
              AND ($2::text IS NULL OR kind = $2)
              AND ($3::text IS NULL OR src = $3)
              AND ($4::text IS NULL OR name = $4)
            ORDER BY updated_at DESC, id ASC
            "#,
        )
        .bind(&filter.project_id)
        .bind(&filter.kind)
        .bind(&filter.src)
        .bind(&filter.name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_documents(&self, project_id: Option<&str>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM documents WHERE $1::text IS NULL OR project_id = $1",
        )
        .bind(project_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn search_documents(
        &self,
        params: &HybridSearchParams,
    ) -> Result<Vec<DocumentSearchRow>> {
        let rows = sqlx::query_as(
            r#"
            SELECT id, project_id, kind, name, src, content, content_hash,
                   created_at, updated_at, metadata,
                   keyword_score, text_score, vec_score, total_score
            FROM hybrid_search_documents(
                $1, $2::vector, $3, $4::jsonb, $5, $6, $7, $8)
            "#,
        )
        .bind(&params.query)
        .bind(&params.query_vector)
        .bind(params.limit)
        .bind(&params.filter)
        .bind(params.literal_weight)
        .bind(params.keyword_weight)
        .bind(params.semantic_weight)
        .bind(params.fusion_constant)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_entity(&self, write: &EntityWrite) -> Result<Entity> {
        let row = sqlx::query_as(
            r#"
            INSERT INTO entities
                (id, project_id, kind, content, content_projection,
                 embedding, created_at, updated_at, metadata)
            VALUES
                (gen_random_uuid(), $1, $2, $3, $4, $5::vector, now(), now(), $6)
            RETURNING id, project_id, kind, content, content_projection,
                      created_at, updated_at, metadata
            "#,
        )
        .bind(&write.project_id)
        .bind(&write.kind)
        .bind(&write.content)
        .bind(&write.content_projection)
        .bind(&write.embedding)
        .bind(&write.metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_entity(&self, id: Uuid, write: &EntityWrite) -> Result<Option<Entity>> {
        let row = sqlx::query_as(
            r#"
            UPDATE entities SET
                kind = $2,
                content = $3,
                content_projection = $4,
                embedding = $5::vector,
                metadata = $6,
                updated_at = GREATEST(
                    now(), entities.updated_at + interval '1 millisecond')
            WHERE id = $1
            RETURNING id, project_id, kind, content, content_projection,
                      created_at, updated_at, metadata
            "#,
        )
        .bind(id)
        .bind(&write.kind)
        .bind(&write.content)
        .bind(&write.content_projection)
        .bind(&write.embedding)
        .bind(&write.metadata)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_entity(&self, id: Uuid) -> Result<Option<Entity>> {
        let row = sqlx::query_as(
            r#"
            SELECT id, project_id, kind, content, content_projection,
                   created_at, updated_at, metadata
            FROM entities WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn match_entities(&self, filter: &RecordFilter) -> Result<Vec<Entity>> {
        let rows = sqlx::query_as(
            r#"
            SELECT id, project_id, kind, content, content_projection,
                   created_at, updated_at, metadata
            FROM entities
            WHERE ($1::text IS NULL OR project_id = $1)
              AND ($2::text IS NULL OR kind = $2)
            ORDER BY updated_at DESC, id ASC
            "#,
        )
        .bind(&filter.project_id)
        .bind(&filter.kind)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_entity(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM entities WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_entities(&self, project_id: Option<&str>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM entities WHERE $1::text IS NULL OR project_id = $1",
        )
        .bind(project_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn search_entities(&self, params: &HybridSearchParams) -> Result<Vec<EntitySearchRow>> {
        let rows = sqlx::query_as(
            r#"
            SELECT id, project_id, kind, content, content_projection,
                   created_at, updated_at, metadata,
                   keyword_score, text_score, vec_score, total_score
            FROM hybrid_search_entities(
                $1, $2::vector, $3, $4::jsonb, $5, $6, $7, $8)
            "#,
        )
        .bind(&params.query)
        .bind(&params.query_vector)
        .bind(params.limit)
        .bind(&params.filter)
        .bind(params.literal_weight)
        .bind(params.keyword_weight)
        .bind(params.semantic_weight)
        .bind(params.fusion_constant)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
