//! End-to-end tests over the in-memory storage engine and a counting
//! embedding backend: content-addressed upserts, batch rollback, search
//! short-circuits, and the entity projection pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use trifuse::config::RetrievalConfig;
use trifuse::documents::Documents;
use trifuse::embedding::{
    EmbeddingBackend, EmbeddingGateway, EmbeddingOutput, StaticBackend,
};
use trifuse::entities::Entities;
use trifuse::error::Error;
use trifuse::models::{DocumentInput, EntityInput, RecordFilter, UpsertCandidate};
use trifuse::search::SearchQuery;
use trifuse::store::memory::MemoryStore;

/// Deterministic backend that records how often, and over how many texts,
/// it was invoked.
struct CountingBackend {
    inner: StaticBackend,
    calls: AtomicUsize,
    texts_embedded: AtomicUsize,
}

impl CountingBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: StaticBackend::new(16),
            calls: AtomicUsize::new(0),
            texts_embedded: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for CountingBackend {
    fn model_name(&self) -> &str {
        "counting"
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<EmbeddingOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed_batch(texts).await
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    backend: Arc<CountingBackend>,
    documents: Documents,
    entities: Entities,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let backend = CountingBackend::new();
    let gateway = Arc::new(EmbeddingGateway::with_backend(backend.clone(), true));
    Harness {
        documents: Documents::new(store.clone(), gateway.clone(), RetrievalConfig::default()),
        entities: Entities::new(store.clone(), gateway, RetrievalConfig::default()),
        store,
        backend,
    }
}

fn doc(project: &str, src: &str, content: &str) -> DocumentInput {
    DocumentInput {
        project_id: project.to_string(),
        kind: "note".to_string(),
        name: src.to_string(),
        src: src.to_string(),
        content: content.to_string(),
        metadata: None,
        embedding: None,
    }
}

/// Literal-and-keyword-only query, so ordering assertions do not depend
/// on the deterministic but arbitrary static vectors.
fn text_query(q: &str) -> SearchQuery {
    let mut query = SearchQuery::new(q);
    query.text_weight = Some(1.0);
    query
}

#[tokio::test]
async fn test_upsert_is_idempotent() {
    let h = harness();
    let inputs = vec![
        doc("p1", "a.md", "alpha content"),
        doc("p1", "b.md", "beta content"),
    ];

    let first = h.documents.upsert_batch(&inputs).await.unwrap();
    assert_eq!(first.len(), 2);
    let calls_after_first = h.backend.calls.load(Ordering::SeqCst);

    let second = h.documents.upsert_batch(&inputs).await.unwrap();
    assert!(second.is_empty());
    // Unchanged batch: nothing embedded, nothing written.
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), calls_after_first);

    let stored = h.documents.get_by_src("p1", "a.md").await.unwrap().unwrap();
    assert_eq!(stored.updated_at, first[0].updated_at);
}

#[tokio::test]
async fn test_changed_content_updates_in_place() {
    let h = harness();
    let first = h
        .documents
        .upsert_one(doc("p1", "a.md", "version one"))
        .await
        .unwrap()
        .unwrap();

    let second = h
        .documents
        .upsert_one(doc("p1", "a.md", "version two"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at > first.updated_at);
    assert_ne!(second.content_hash, first.content_hash);
    assert_eq!(h.store.document_count(), 1);
}

#[tokio::test]
async fn test_document_update_by_id() {
    let h = harness();
    let first = h
        .documents
        .upsert_one(doc("p1", "a.md", "original text"))
        .await
        .unwrap()
        .unwrap();

    let updated = h
        .documents
        .update(first.id, doc("p1", "a.md", "rewritten text"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.id, first.id);
    assert_eq!(updated.created_at, first.created_at);
    assert!(updated.updated_at > first.updated_at);
    assert_eq!(updated.content, "rewritten text");
    assert_ne!(updated.content_hash, first.content_hash);

    let stored = h.documents.get(first.id).await.unwrap().unwrap();
    assert_eq!(stored.content, "rewritten text");
    assert_eq!(h.store.document_count(), 1);

    let missing = h
        .documents
        .update(uuid::Uuid::new_v4(), doc("p1", "b.md", "nowhere"))
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_duplicate_locator_in_batch_last_wins() {
    let h = harness();
    let written = h
        .documents
        .upsert_batch(&[
            doc("p1", "a.md", "first version"),
            doc("p1", "b.md", "other file"),
            doc("p1", "a.md", "second version"),
        ])
        .await
        .unwrap();
    assert_eq!(written.len(), 2);
    assert_eq!(h.store.document_count(), 2);

    let stored = h.documents.get_by_src("p1", "a.md").await.unwrap().unwrap();
    assert_eq!(stored.content, "second version");
    assert_eq!(
        stored.content_hash,
        trifuse::store::content_digest("second version")
    );
}

#[tokio::test]
async fn test_diff_reports_only_changed_sources() {
    let h = harness();
    h.documents
        .upsert_one(doc("p1", "a.md", "stable"))
        .await
        .unwrap();

    let changed = h
        .documents
        .diff(
            "p1",
            &[
                UpsertCandidate {
                    src: "a.md".to_string(),
                    content: "stable".to_string(),
                },
                UpsertCandidate {
                    src: "b.md".to_string(),
                    content: "new".to_string(),
                },
            ],
        )
        .await
        .unwrap();
    assert_eq!(changed, vec!["b.md".to_string()]);
}

#[tokio::test]
async fn test_faulted_batch_leaves_store_untouched() {
    let h = harness();
    h.documents
        .upsert_one(doc("p1", "seed.md", "already here"))
        .await
        .unwrap();
    assert_eq!(h.store.document_count(), 1);

    h.store.inject_upsert_fault(1);
    let err = h
        .documents
        .upsert_batch(&[
            doc("p1", "x.md", "one"),
            doc("p1", "y.md", "two"),
            doc("p1", "z.md", "three"),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TransactionFailed(_)));
    assert_eq!(h.store.document_count(), 1);
    assert!(h.documents.get_by_src("p1", "x.md").await.unwrap().is_none());
}

#[tokio::test]
async fn test_empty_query_short_circuits() {
    let h = harness();
    h.documents
        .upsert_one(doc("p1", "a.md", "something"))
        .await
        .unwrap();
    let calls = h.backend.calls.load(Ordering::SeqCst);

    let hits = h.documents.search(&SearchQuery::new("   ")).await.unwrap();
    assert!(hits.is_empty());
    let entity_hits = h.entities.search(&SearchQuery::new("")).await.unwrap();
    assert!(entity_hits.is_empty());
    // No embedding work for a blank query.
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn test_only_changed_inputs_are_embedded() {
    let h = harness();
    h.documents
        .upsert_one(doc("p1", "a.md", "unchanged"))
        .await
        .unwrap();
    let embedded_before = h.backend.texts_embedded.load(Ordering::SeqCst);

    let written = h
        .documents
        .upsert_batch(&[
            doc("p1", "a.md", "unchanged"),
            doc("p1", "b.md", "brand new"),
        ])
        .await
        .unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].src, "b.md");
    assert_eq!(
        h.backend.texts_embedded.load(Ordering::SeqCst),
        embedded_before + 1
    );
}

#[tokio::test]
async fn test_precomputed_embedding_skips_gateway() {
    let h = harness();
    let mut input = doc("p1", "pre.md", "caller embedded this");
    input.embedding = Some(vec![1.0; 16]);

    h.documents.upsert_one(input).await.unwrap().unwrap();
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rejects_blank_identifiers() {
    let h = harness();
    let err = h
        .documents
        .upsert_one(doc("", "a.md", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InputRejected(_)));

    let err = h.documents.upsert_one(doc("p1", "", "x")).await.unwrap_err();
    assert!(matches!(err, Error::InputRejected(_)));
    assert_eq!(h.store.document_count(), 0);
}

#[tokio::test]
async fn test_document_search_ranks_and_filters() {
    let h = harness();
    h.documents
        .upsert_batch(&[
            doc("p1", "rockets.md", "saturn rocket staging and ullage"),
            doc("p1", "gardens.md", "tomato and basil companion planting"),
            doc("p2", "launch.md", "rocket launch weather constraints"),
        ])
        .await
        .unwrap();

    let hits = h.documents.search(&text_query("rocket")).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|hit| hit.record.content.contains("rocket")));
    assert!(hits[0].total_score >= hits[1].total_score);
    assert!(hits[0].text_score > 0.0);

    let mut scoped = text_query("rocket");
    scoped.project_ids = vec!["p2".to_string()];
    let hits = h.documents.search(&scoped).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.src, "launch.md");

    let mut limited = text_query("rocket");
    limited.limit = Some(1);
    let hits = h.documents.search(&limited).await.unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_match_reads_are_equality_filtered() {
    let h = harness();
    h.documents
        .upsert_batch(&[
            doc("p1", "a.md", "one"),
            doc("p1", "b.md", "two"),
            doc("p2", "c.md", "three"),
        ])
        .await
        .unwrap();

    let filter = RecordFilter {
        project_id: Some("p1".to_string()),
        ..Default::default()
    };
    let matched = h.documents.match_records(&filter).await.unwrap();
    assert_eq!(matched.len(), 2);

    let filter = RecordFilter {
        src: Some("c.md".to_string()),
        ..Default::default()
    };
    let matched = h.documents.match_records(&filter).await.unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].project_id, "p2");
}

#[tokio::test]
async fn test_clear_is_project_scoped() {
    let h = harness();
    h.documents
        .upsert_batch(&[doc("p1", "a.md", "one"), doc("p2", "b.md", "two")])
        .await
        .unwrap();

    let removed = h.documents.clear(Some("p1")).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(h.store.document_count(), 1);

    let removed = h.documents.clear(None).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(h.store.document_count(), 0);
}

#[tokio::test]
async fn test_entity_projection_feeds_search() {
    let h = harness();
    let entity = h
        .entities
        .add(EntityInput {
            project_id: "p1".to_string(),
            kind: "spacecraft".to_string(),
            content: json!({"name": "voyager", "status": "interstellar"}),
            metadata: None,
        })
        .await
        .unwrap();
    assert_eq!(entity.content_projection, "voyager interstellar");

    h.entities
        .add(EntityInput {
            project_id: "p1".to_string(),
            kind: "spacecraft".to_string(),
            content: json!({"name": "sojourner", "status": "retired"}),
            metadata: None,
        })
        .await
        .unwrap();

    let hits = h.entities.search(&text_query("voyager")).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.id, entity.id);
    assert!(hits[0].text_score > 0.0);
}

#[tokio::test]
async fn test_entity_update_recomputes_projection() {
    let h = harness();
    let entity = h
        .entities
        .add(EntityInput {
            project_id: "p1".to_string(),
            kind: "probe".to_string(),
            content: json!({"name": "cassini"}),
            metadata: None,
        })
        .await
        .unwrap();

    let updated = h
        .entities
        .update(
            entity.id,
            EntityInput {
                project_id: "p1".to_string(),
                kind: "probe".to_string(),
                content: json!({"name": "cassini", "phase": "grand finale"}),
                metadata: None,
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert!(updated.content_projection.contains("grand finale"));
    assert!(updated.updated_at > entity.updated_at);

    let missing = h
        .entities
        .update(
            uuid::Uuid::new_v4(),
            EntityInput {
                project_id: "p1".to_string(),
                kind: "probe".to_string(),
                content: json!({"name": "ghost"}),
                metadata: None,
            },
        )
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_entity_content_must_be_structured() {
    let h = harness();
    let err = h
        .entities
        .add(EntityInput {
            project_id: "p1".to_string(),
            kind: "note".to_string(),
            content: json!("just a string"),
            metadata: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InputRejected(_)));
}
