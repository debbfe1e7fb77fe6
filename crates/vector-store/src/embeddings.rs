use crate::error::{Result, VectorStoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Dimension of stub vectors
pub const STUB_DIMENSION: usize = 256;

const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";
const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingMode {
    /// Remote embedding endpoint
    #[default]
    Http,
    /// Deterministic hashed bag-of-words vectors, no network
    Stub,
    /// No embedder; similarity search is unavailable
    Off,
}

impl EmbeddingMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Stub => "stub",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for EmbeddingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbeddingMode {
    type Err = VectorStoreError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "stub" => Ok(Self::Stub),
            "off" | "none" | "disabled" => Ok(Self::Off),
            other => Err(VectorStoreError::Config(format!(
                "Unsupported embedding mode '{other}' (expected 'http', 'stub' or 'off')"
            ))),
        }
    }
}

/// Wire format of the embedding endpoint
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// `POST {endpoint}/api/embed`
    #[default]
    Ollama,
    /// `POST {endpoint}/v1/embeddings`
    #[serde(alias = "openai-compatible")]
    OpenAi,
}

impl FromStr for EmbeddingProvider {
    type Err = VectorStoreError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" | "openai-compatible" => Ok(Self::OpenAi),
            other => Err(VectorStoreError::Config(format!(
                "Unsupported embedding provider '{other}' (expected 'ollama' or 'openai')"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub mode: EmbeddingMode,
    pub provider: EmbeddingProvider,
    /// Base URL without the API path
    pub endpoint: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            mode: EmbeddingMode::default(),
            provider: EmbeddingProvider::default(),
            endpoint: DEFAULT_OLLAMA_ENDPOINT.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            api_key: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl EmbeddingConfig {
    #[must_use]
    pub fn stub() -> Self {
        Self {
            mode: EmbeddingMode::Stub,
            ..Self::default()
        }
    }
}

/// Ollama `/api/embed` request
#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// OpenAI-compatible `/v1/embeddings` request
#[derive(Debug, Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
    index: usize,
}

struct HttpBackend {
    client: reqwest::Client,
    provider: EmbeddingProvider,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpBackend {
    fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        let base = config.endpoint.trim_end_matches('/');
        let url = match config.provider {
            EmbeddingProvider::Ollama => format!("{base}/api/embed"),
            EmbeddingProvider::OpenAi => format!("{base}/v1/embeddings"),
        };

        Ok(Self {
            client,
            provider: config.provider,
            url,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut request = match self.provider {
            EmbeddingProvider::Ollama => self.client.post(&self.url).json(&OllamaEmbedRequest {
                model: &self.model,
                input: texts,
            }),
            EmbeddingProvider::OpenAi => self.client.post(&self.url).json(&OpenAiEmbedRequest {
                model: &self.model,
                input: texts,
            }),
        };
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VectorStoreError::EmbeddingError(format!(
                "{} returned {}: {body}",
                self.url,
                status.as_u16()
            )));
        }

        let vectors = match self.provider {
            EmbeddingProvider::Ollama => response.json::<OllamaEmbedResponse>().await?.embeddings,
            EmbeddingProvider::OpenAi => {
                let mut data = response.json::<OpenAiEmbedResponse>().await?.data;
                data.sort_by_key(|d| d.index);
                data.into_iter().map(|d| d.embedding).collect()
            }
        };

        if vectors.len() != texts.len() {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}

struct StubBackend {
    dimension: usize,
}

impl StubBackend {
    /// Sum of per-word hash vectors, so texts sharing words land close together.
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dimension];
        let mut words = 0usize;
        for word in text.split_whitespace() {
            words += 1;
            for (slot, value) in vec.iter_mut().zip(stub_embed(word, self.dimension)) {
                *slot += value;
            }
        }
        if words == 0 {
            return stub_embed(text, self.dimension);
        }
        normalize(&mut vec);
        vec
    }
}

enum EmbeddingBackend {
    Http(HttpBackend),
    Stub(StubBackend),
    Off,
}

/// Turns text into vectors through the configured backend
pub struct EmbeddingModel {
    backend: EmbeddingBackend,
    model_id: String,
}

impl EmbeddingModel {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (backend, model_id) = match config.mode {
            EmbeddingMode::Http => (
                EmbeddingBackend::Http(HttpBackend::new(config)?),
                format!("http:{}", config.model),
            ),
            EmbeddingMode::Stub => (
                EmbeddingBackend::Stub(StubBackend {
                    dimension: STUB_DIMENSION,
                }),
                format!("stub:{STUB_DIMENSION}"),
            ),
            EmbeddingMode::Off => (EmbeddingBackend::Off, "off".to_string()),
        };
        Ok(Self { backend, model_id })
    }

    #[must_use]
    pub fn stub() -> Self {
        Self {
            backend: EmbeddingBackend::Stub(StubBackend {
                dimension: STUB_DIMENSION,
            }),
            model_id: format!("stub:{STUB_DIMENSION}"),
        }
    }

    /// Identifies the vector space; persisted vectors from another id are discarded.
    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !matches!(self.backend, EmbeddingBackend::Off)
    }

    /// Embed a short text once to check the backend is reachable.
    pub async fn probe(&self) -> Result<usize> {
        let vector = self.embed("consolidator probe").await?;
        if vector.is_empty() {
            return Err(VectorStoreError::EmbeddingError(
                "Embedding backend returned an empty vector".to_string(),
            ));
        }
        Ok(vector.len())
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_batch(vec![text]).await?;
        embeddings
            .pop()
            .ok_or_else(|| VectorStoreError::EmbeddingError("Empty embedding result".to_string()))
    }

    pub async fn embed_batch(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let owned: Vec<String> = texts.into_iter().map(ToString::to_string).collect();
        match &self.backend {
            EmbeddingBackend::Stub(stub) => Ok(owned.iter().map(|t| stub.embed(t)).collect()),
            EmbeddingBackend::Http(http) => http.embed_batch(&owned).await,
            EmbeddingBackend::Off => Err(VectorStoreError::Unavailable(
                "embeddings are disabled".to_string(),
            )),
        }
    }

    #[must_use]
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }

        let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        dot_product / (norm_a * norm_b)
    }
}

fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

fn stub_embed(text: &str, dimension: usize) -> Vec<f32> {
    let mut state =
        fnv1a_64(text.as_bytes()) ^ (dimension as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut vec = Vec::with_capacity(dimension);
    for _ in 0..dimension {
        let bits = splitmix64(&mut state);
        let high = (bits >> 32) as u32;
        let mantissa = high >> 9;
        let unit = f32::from_bits(0x3f80_0000 | mantissa) - 1.0;
        vec.push(unit.mul_add(2.0, -1.0));
    }
    normalize(&mut vec);
    vec
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

const fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_vectors_are_deterministic_and_normalized() {
        let model = EmbeddingModel::stub();
        let a = model.embed("parse config yaml").await.unwrap();
        let b = model.embed("parse config yaml").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), STUB_DIMENSION);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn shared_words_score_higher_than_disjoint_ones() {
        let model = EmbeddingModel::stub();
        let base = model.embed("config load parse path yaml").await.unwrap();
        let close = model.embed("config load parse yaml").await.unwrap();
        let far = model.embed("socket retry timeout").await.unwrap();

        let close_score = EmbeddingModel::cosine_similarity(&base, &close);
        let far_score = EmbeddingModel::cosine_similarity(&base, &far);
        assert!(close_score > 0.7, "close score {close_score}");
        assert!(far_score < close_score);
    }

    #[tokio::test]
    async fn disabled_model_refuses_to_embed() {
        let model = EmbeddingModel::new(&EmbeddingConfig {
            mode: EmbeddingMode::Off,
            ..EmbeddingConfig::default()
        })
        .unwrap();
        assert!(!model.is_enabled());
        assert!(matches!(
            model.probe().await,
            Err(VectorStoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_the_probe() {
        let model = EmbeddingModel::new(&EmbeddingConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            timeout_ms: 500,
            ..EmbeddingConfig::default()
        })
        .unwrap();
        assert!(model.probe().await.is_err());
    }

    #[test]
    fn modes_parse_from_strings() {
        assert_eq!("STUB".parse::<EmbeddingMode>().unwrap(), EmbeddingMode::Stub);
        assert_eq!("none".parse::<EmbeddingMode>().unwrap(), EmbeddingMode::Off);
        assert!("fast".parse::<EmbeddingMode>().is_err());
        assert_eq!(
            "openai-compatible".parse::<EmbeddingProvider>().unwrap(),
            EmbeddingProvider::OpenAi
        );
    }

    #[test]
    fn cosine_handles_mismatched_and_zero_vectors() {
        assert_eq!(EmbeddingModel::cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(EmbeddingModel::cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        let same = EmbeddingModel::cosine_similarity(&[0.6, 0.8], &[0.6, 0.8]);
        assert!((same - 1.0).abs() < 1e-6);
    }
}
