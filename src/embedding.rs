//! Embedding gateway and backend abstraction.
//!
//! Defines the [`EmbeddingBackend`] trait and concrete implementations:
//! - **[`OpenAiBackend`]** — calls an OpenAI-compatible `/v1/embeddings` endpoint.
//! - **[`OllamaBackend`]** — calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`StaticBackend`]** — deterministic content-derived vectors; no network.
//!
//! Backends return an [`EmbeddingOutput`], a closed union over the output
//! shapes an embedding model may produce. The [`EmbeddingGateway`] resolves
//! that shape into one vector per input text, applies L2 normalization
//! unless disabled, and owns the lazily-initialized shared backend handle:
//! the first caller pays initialization and concurrent callers await that
//! same initialization rather than re-initializing.
//!
//! Backend failures surface unchanged — retry, if wanted, belongs to the
//! caller. A malformed or missing output is a hard error, never coerced to
//! a zero vector.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

// ============ Output shapes ============

/// An accelerator-resident tensor reachable only through a host transfer.
pub trait DeviceTensor: Send + Sync {
    /// Number of rows (one per input text).
    fn rows(&self) -> usize;
    /// Vector width per row.
    fn width(&self) -> usize;
    /// Copy the tensor to host memory as a row-major buffer.
    fn to_host(&self) -> anyhow::Result<Vec<f32>>;
}

/// The raw output shapes an embedding backend may return.
///
/// Resolution order is fixed: tensor shapes are sliced by their declared
/// dimensions, nested sequences map one inner vector per input, and a flat
/// buffer is accepted only for single-item calls. Anything that does not
/// line up with the batch size is an [`Error::UnsupportedOutputShape`].
pub enum EmbeddingOutput {
    /// Flat numeric buffer; valid only for single-text calls.
    Flat(Vec<f32>),
    /// One inner vector per input text, in input order.
    Nested(Vec<Vec<f32>>),
    /// Row-major tensor: `rows × width` values in one contiguous buffer.
    Tensor {
        rows: usize,
        width: usize,
        data: Vec<f32>,
    },
    /// Tensor behind a device-transfer handle.
    Device(Box<dyn DeviceTensor>),
}

/// Slice a backend output into exactly `expected` vectors, in order.
fn resolve_batch(output: EmbeddingOutput, expected: usize) -> Result<Vec<Vec<f32>>> {
    match output {
        EmbeddingOutput::Tensor { rows, width, data } => slice_tensor(rows, width, data, expected),
        EmbeddingOutput::Device(handle) => {
            let (rows, width) = (handle.rows(), handle.width());
            let data = handle.to_host().map_err(Error::backend)?;
            slice_tensor(rows, width, data, expected)
        }
        EmbeddingOutput::Nested(vectors) => {
            if vectors.len() != expected {
                return Err(Error::UnsupportedOutputShape {
                    shape: format!(
                        "nested sequence of {} vectors for batch of {}",
                        vectors.len(),
                        expected
                    ),
                });
            }
            Ok(vectors)
        }
        EmbeddingOutput::Flat(buffer) => {
            if expected == 1 {
                Ok(vec![buffer])
            } else {
                Err(Error::UnsupportedOutputShape {
                    shape: format!(
                        "flat buffer of {} values for batch of {}",
                        buffer.len(),
                        expected
                    ),
                })
            }
        }
    }
}

fn slice_tensor(
    rows: usize,
    width: usize,
    data: Vec<f32>,
    expected: usize,
) -> Result<Vec<Vec<f32>>> {
    if rows != expected || width == 0 || data.len() != rows * width {
        return Err(Error::UnsupportedOutputShape {
            shape: format!(
                "tensor {}x{} with {} values for batch of {}",
                rows,
                width,
                data.len(),
                expected
            ),
        });
    }
    Ok(data.chunks_exact(width).map(<[f32]>::to_vec).collect())
}

// ============ Backend trait ============

/// An external embedding capability: text in, vector-like shape out.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, returning one of the supported shapes.
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<EmbeddingOutput>;

    /// Embed a single text. Defaults to a batch of one.
    async fn embed(&self, text: &str) -> anyhow::Result<EmbeddingOutput> {
        let batch = [text.to_string()];
        self.embed_batch(&batch).await
    }
}

type BackendFuture =
    Pin<Box<dyn Future<Output = anyhow::Result<Arc<dyn EmbeddingBackend>>> + Send>>;
type BackendFactory = Box<dyn Fn() -> BackendFuture + Send + Sync>;

// ============ Gateway ============

/// Normalized embedding computation over a shared, lazily-initialized backend.
pub struct EmbeddingGateway {
    backend: OnceCell<Arc<dyn EmbeddingBackend>>,
    factory: Option<BackendFactory>,
    normalize: bool,
    // 0 = unknown until the first successful call.
    dims: AtomicUsize,
}

impl EmbeddingGateway {
    /// Build a gateway that initializes its backend on first use.
    ///
    /// Initialization is single-flight: concurrent first callers await one
    /// initialization instead of each running the factory.
    pub fn new<F, Fut>(factory: F, normalize: bool) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Arc<dyn EmbeddingBackend>>> + Send + 'static,
    {
        Self {
            backend: OnceCell::new(),
            factory: Some(Box::new(move || Box::pin(factory()))),
            normalize,
            dims: AtomicUsize::new(0),
        }
    }

    /// Build a gateway around an already-initialized backend.
    pub fn with_backend(backend: Arc<dyn EmbeddingBackend>, normalize: bool) -> Self {
        Self {
            backend: OnceCell::new_with(Some(backend)),
            factory: None,
            normalize,
            dims: AtomicUsize::new(0),
        }
    }

    /// Build a gateway from configuration, resolving the backend lazily.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let normalize = config.normalize;
        let config = config.clone();
        Self::new(
            move || {
                let config = config.clone();
                async move { create_backend(&config) }
            },
            normalize,
        )
    }

    async fn backend(&self) -> Result<&Arc<dyn EmbeddingBackend>> {
        self.backend
            .get_or_try_init(|| async {
                match &self.factory {
                    Some(factory) => factory().await,
                    None => Err(anyhow!("embedding backend not configured")),
                }
            })
            .await
            .map_err(Error::backend)
    }

    /// Embedding dimensionality, known after the first successful call.
    pub fn dims(&self) -> Option<usize> {
        match self.dims.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }

    /// Compute a normalized embedding for one text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let backend = self.backend().await?;
        let output = backend.embed(text).await.map_err(Error::backend)?;
        let mut vectors = resolve_batch(output, 1)?;
        let mut vector = vectors.pop().unwrap_or_default();
        self.finish(&mut vector);
        Ok(vector)
    }

    /// Compute normalized embeddings for a batch of texts.
    ///
    /// Returns exactly one vector per input, in input order. An empty
    /// input returns an empty sequence without touching the backend.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let backend = self.backend().await?;
        let output = backend.embed_batch(texts).await.map_err(Error::backend)?;
        let mut vectors = resolve_batch(output, texts.len())?;
        for vector in &mut vectors {
            self.finish(vector);
        }
        Ok(vectors)
    }

    fn finish(&self, vector: &mut Vec<f32>) {
        if self.normalize {
            l2_normalize(vector);
        }
        self.dims.store(vector.len(), Ordering::Relaxed);
    }
}

/// Divide every component by the Euclidean norm; no-op for a zero norm.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

// ============ OpenAI-compatible backend ============

/// Backend for OpenAI-compatible embedding endpoints.
pub struct OpenAiBackend {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiBackend {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for openai provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url,
            model,
            api_key: std::env::var("OPENAI_API_KEY").ok(),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<EmbeddingOutput> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let mut request = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("embeddings API error {}: {}", status, text);
        }

        let json: serde_json::Value = response.json().await?;
        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| anyhow!("embeddings response missing data array"))?;

        let mut vectors = Vec::with_capacity(data.len());
        for item in data {
            vectors.push(parse_vector(
                item.get("embedding")
                    .ok_or_else(|| anyhow!("embeddings response item missing embedding"))?,
            )?);
        }
        Ok(EmbeddingOutput::Nested(vectors))
    }
}

// ============ Ollama backend ============

/// Backend for a local Ollama instance's `/api/embed` endpoint.
pub struct OllamaBackend {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, url, model })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<EmbeddingOutput> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("is Ollama running at {}?", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, text);
        }

        let json: serde_json::Value = response.json().await?;
        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Ollama response missing embeddings array"))?;

        let mut vectors = Vec::with_capacity(embeddings.len());
        for embedding in embeddings {
            vectors.push(parse_vector(embedding)?);
        }
        Ok(EmbeddingOutput::Nested(vectors))
    }
}

/// Parse a JSON array of numbers strictly — a non-numeric component is a
/// hard error, never coerced to zero.
fn parse_vector(value: &serde_json::Value) -> anyhow::Result<Vec<f32>> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow!("embedding is not an array"))?;
    items
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow!("non-numeric embedding component: {}", v))
        })
        .collect()
}

// ============ Static backend ============

/// Deterministic, content-derived vectors for offline and test use.
///
/// Produces the row-major tensor shape so the full resolution path is
/// exercised even without a model.
pub struct StaticBackend {
    dims: usize,
}

impl StaticBackend {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dims);
        let mut block: u32 = 0;
        while out.len() < self.dims {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(block.to_le_bytes());
            let digest = hasher.finalize();
            for byte in digest.iter() {
                if out.len() == self.dims {
                    break;
                }
                out.push(f32::from(*byte) / 127.5 - 1.0);
            }
            block += 1;
        }
        out
    }
}

#[async_trait]
impl EmbeddingBackend for StaticBackend {
    fn model_name(&self) -> &str {
        "static"
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<EmbeddingOutput> {
        let mut data = Vec::with_capacity(texts.len() * self.dims);
        for text in texts {
            data.extend(self.vector_for(text));
        }
        Ok(EmbeddingOutput::Tensor {
            rows: texts.len(),
            width: self.dims,
            data,
        })
    }
}

/// Create the configured [`EmbeddingBackend`].
pub fn create_backend(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn EmbeddingBackend>> {
    debug!(provider = %config.provider, "initializing embedding backend");
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiBackend::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaBackend::new(config)?)),
        "static" => Ok(Arc::new(StaticBackend::new(config.dims.unwrap_or(64)))),
        "disabled" => bail!("embedding provider is disabled"),
        other => bail!("unknown embedding provider: {}", other),
    }
}
