//! Inference clients for text generation (TGI/Ollama) and embeddings
//! (TEI/Ollama), with a hash-keyed embedding response cache.

use crate::{EngineError, Result};
use kgraph_db::schema::EMBEDDING_DIMENSION;
use lru::LruCache;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

const DEFAULT_EMBED_URL: &str = "http://localhost:8081";
const DEFAULT_EMBED_PROVIDER: &str = "tei";
const DEFAULT_OLLAMA_EMBED_MODEL: &str = "nomic-embed-text:latest";
const DEFAULT_LLM_URL: &str = "http://localhost:8082";
const DEFAULT_LLM_PROVIDER: &str = "tgi";
const DEFAULT_OLLAMA_MODEL: &str = "phi4-mini:latest";
const DEFAULT_EMBED_MAX_BATCH: usize = 32;
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;
const DEFAULT_EMBED_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EMBED_CACHE_SIZE: usize = 2048;

fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_timeout(key: &str, default_secs: u64) -> Duration {
    let secs = std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default_secs);
    Duration::from_secs(secs)
}

fn llm_timeout() -> Duration {
    env_timeout("LLM_TIMEOUT_SECS", DEFAULT_LLM_TIMEOUT_SECS)
}

fn embed_timeout() -> Duration {
    env_timeout("EMBED_TIMEOUT_SECS", DEFAULT_EMBED_TIMEOUT_SECS)
}

#[derive(Clone, Copy)]
enum LlmProvider {
    Tgi,
    Ollama,
}

/// Client for the text-generation collaborator.
///
/// Speaks either the TGI `/generate` API or the Ollama `/api/generate`
/// API, selected by environment.
#[derive(Clone)]
pub struct GenerationClient {
    client: Client,
    base_url: String,
    provider: LlmProvider,
    model: String,
}

impl GenerationClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            provider: LlmProvider::Tgi,
            model: DEFAULT_OLLAMA_MODEL.to_string(),
        }
    }

    pub fn default_local() -> Self {
        let provider = env_or_default("LLM_PROVIDER", DEFAULT_LLM_PROVIDER);
        if provider.eq_ignore_ascii_case("ollama") {
            let url = env_or_default("LLM_URL", "http://localhost:11434");
            let model = env_or_default("LLM_MODEL", DEFAULT_OLLAMA_MODEL);
            Self {
                client: Client::new(),
                base_url: url,
                provider: LlmProvider::Ollama,
                model,
            }
        } else {
            let url = env_or_default("LLM_URL", DEFAULT_LLM_URL);
            Self::new(url)
        }
    }

    /// Generate text from a prompt.
    ///
    /// The caller is responsible for parsing structured output; malformed
    /// or truncated JSON is expected and repaired downstream.
    pub async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        match self.provider {
            LlmProvider::Tgi => self.tgi_generate(prompt, max_tokens, temperature).await,
            LlmProvider::Ollama => self.ollama_generate(prompt, max_tokens, temperature).await,
        }
    }

    pub async fn health(&self) -> Result<bool> {
        let url = match self.provider {
            LlmProvider::Tgi => format!("{}/health", self.base_url),
            LlmProvider::Ollama => format!("{}/api/tags", self.base_url),
        };
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn tgi_generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let url = format!("{}/generate", self.base_url);
        let request = TgiGenerateRequest {
            inputs: prompt.to_string(),
            parameters: TgiParameters {
                max_new_tokens: Some(max_tokens),
                temperature: Some(temperature),
                return_full_text: Some(false),
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(llm_timeout())
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        extract_generated_text(response)
    }

    async fn ollama_generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let request = OllamaGenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            format: Some("json".to_string()),
            options: Some(serde_json::json!({
                "num_predict": max_tokens,
                "temperature": temperature,
            })),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(llm_timeout())
            .send()
            .await?
            .error_for_status()?
            .json::<OllamaGenerateResponse>()
            .await?;

        Ok(response.response)
    }
}

#[derive(Clone, Copy)]
enum EmbedProvider {
    Tei,
    Ollama,
}

/// Client for the embedding collaborator, with an LRU response cache
/// keyed by the SHA-256 hash of the input text.
///
/// The cache sits behind a `Mutex`; concurrent extraction tasks share one
/// client instance. No module-level singletons.
pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    provider: EmbedProvider,
    model: String,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl EmbeddingClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            provider: EmbedProvider::Tei,
            model: DEFAULT_OLLAMA_EMBED_MODEL.to_string(),
            cache: Mutex::new(LruCache::new(cache_capacity())),
        }
    }

    pub fn default_local() -> Self {
        let provider = env_or_default("EMBED_PROVIDER", DEFAULT_EMBED_PROVIDER);
        if provider.eq_ignore_ascii_case("ollama") {
            let url = env_or_default("EMBED_URL", "http://localhost:11434");
            let model = env_or_default("EMBED_MODEL", DEFAULT_OLLAMA_EMBED_MODEL);
            Self {
                client: Client::new(),
                base_url: url,
                provider: EmbedProvider::Ollama,
                model,
                cache: Mutex::new(LruCache::new(cache_capacity())),
            }
        } else {
            let url = env_or_default("EMBED_URL", DEFAULT_EMBED_URL);
            Self::new(url)
        }
    }

    /// Embed a single text, consulting the cache first
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = text_hash(text);
        if let Some(cached) = self.cache.lock().unwrap().get(&key).cloned() {
            debug!("Embedding cache hit");
            return Ok(cached);
        }

        let embedding = self.fetch_one(text).await?;
        validate_embedding_dim(embedding.len())?;
        self.cache.lock().unwrap().put(key, embedding.clone());
        Ok(embedding)
    }

    /// Embed many texts, preserving input order.
    ///
    /// Cached texts are served locally; only the misses go over the wire,
    /// in provider-sized chunks.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses: Vec<(usize, &String)> = Vec::new();

        {
            let mut cache = self.cache.lock().unwrap();
            for (i, text) in texts.iter().enumerate() {
                match cache.get(&text_hash(text)) {
                    Some(cached) => results[i] = Some(cached.clone()),
                    None => misses.push((i, text)),
                }
            }
        }

        if !misses.is_empty() {
            let miss_texts: Vec<String> = misses.iter().map(|(_, t)| (*t).clone()).collect();
            let fetched = self.fetch_batch(&miss_texts).await?;
            if fetched.len() != misses.len() {
                return Err(EngineError::Inference(format!(
                    "Embedding batch returned {} vectors for {} inputs",
                    fetched.len(),
                    misses.len()
                )));
            }
            let mut cache = self.cache.lock().unwrap();
            for ((i, text), embedding) in misses.into_iter().zip(fetched.into_iter()) {
                validate_embedding_dim(embedding.len())?;
                cache.put(text_hash(text), embedding.clone());
                results[i] = Some(embedding);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    /// Number of cached embeddings
    pub fn cache_len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub async fn health(&self) -> Result<bool> {
        let url = match self.provider {
            EmbedProvider::Tei => format!("{}/health", self.base_url),
            EmbedProvider::Ollama => format!("{}/api/tags", self.base_url),
        };
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch_one(&self, text: &str) -> Result<Vec<f32>> {
        match self.provider {
            EmbedProvider::Ollama => self.ollama_embed(text).await,
            EmbedProvider::Tei => {
                let url = format!("{}/embed", self.base_url);
                let request = TeiEmbedRequest {
                    inputs: text,
                    truncate: true,
                };

                let response = self
                    .client
                    .post(&url)
                    .json(&request)
                    .timeout(embed_timeout())
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<Value>()
                    .await?;

                parse_embedding_response(response)
            }
        }
    }

    async fn fetch_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if matches!(self.provider, EmbedProvider::Ollama) {
            let mut results = Vec::with_capacity(texts.len());
            for text in texts {
                results.push(self.ollama_embed(text).await?);
            }
            return Ok(results);
        }

        let max_batch = std::env::var("EMBED_MAX_BATCH")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_EMBED_MAX_BATCH);

        let url = format!("{}/embed", self.base_url);
        let mut results = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(max_batch) {
            let request = TeiEmbedBatchRequest {
                inputs: chunk,
                truncate: true,
            };

            let response = self
                .client
                .post(&url)
                .json(&request)
                .timeout(embed_timeout())
                .send()
                .await?
                .error_for_status()?
                .json::<Value>()
                .await?;

            results.extend(parse_embeddings_response(response)?);
        }

        Ok(results)
    }

    async fn ollama_embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let request = OllamaEmbedRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(embed_timeout())
            .send()
            .await?
            .error_for_status()?
            .json::<OllamaEmbedResponse>()
            .await?;

        Ok(response.embedding)
    }
}

/// SHA-256 hex digest used as the cache key
fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn cache_capacity() -> NonZeroUsize {
    let capacity = std::env::var("EMBED_CACHE_SIZE")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_EMBED_CACHE_SIZE);
    NonZeroUsize::new(capacity.max(1)).expect("cache capacity is at least 1")
}

fn validate_embedding_dim(len: usize) -> Result<()> {
    if len != EMBEDDING_DIMENSION {
        return Err(EngineError::Inference(format!(
            "Embedding dimension {} does not match expected {}. Choose a matching model or update the schema.",
            len, EMBEDDING_DIMENSION
        )));
    }
    Ok(())
}

// ==========================================
// REQUEST/RESPONSE TYPES
// ==========================================

#[derive(Serialize)]
struct TeiEmbedRequest<'a> {
    inputs: &'a str,
    truncate: bool,
}

#[derive(Serialize)]
struct TeiEmbedBatchRequest<'a> {
    inputs: &'a [String],
    truncate: bool,
}

#[derive(Serialize)]
struct TgiGenerateRequest {
    inputs: String,
    parameters: TgiParameters,
}

#[derive(Serialize)]
struct TgiParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_new_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    return_full_text: Option<bool>,
}

#[derive(Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<Value>,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct OllamaEmbedRequest {
    model: String,
    prompt: String,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embedding: Vec<f32>,
}

fn parse_embedding_response(value: Value) -> Result<Vec<f32>> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Ok(Vec::new());
            }
            if items.first().map(|v| v.is_number()).unwrap_or(false) {
                serde_json::from_value(Value::Array(items)).map_err(|e| {
                    EngineError::Inference(format!("Invalid embedding array: {}", e))
                })
            } else {
                let first = items
                    .into_iter()
                    .next()
                    .ok_or_else(|| EngineError::Inference("Missing embeddings".to_string()))?;
                serde_json::from_value(first).map_err(|e| {
                    EngineError::Inference(format!("Invalid embedding array: {}", e))
                })
            }
        }
        other => Err(EngineError::Inference(format!(
            "Unexpected embedding response format: {}",
            other
        ))),
    }
}

fn parse_embeddings_response(value: Value) -> Result<Vec<Vec<f32>>> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Ok(Vec::new());
            }
            if items.first().map(|v| v.is_array()).unwrap_or(false) {
                serde_json::from_value(Value::Array(items)).map_err(|e| {
                    EngineError::Inference(format!("Invalid embeddings response: {}", e))
                })
            } else {
                let single: Vec<f32> =
                    serde_json::from_value(Value::Array(items)).map_err(|e| {
                        EngineError::Inference(format!("Invalid embedding array: {}", e))
                    })?;
                Ok(vec![single])
            }
        }
        other => Err(EngineError::Inference(format!(
            "Unexpected embedding response format: {}",
            other
        ))),
    }
}

fn extract_generated_text(value: Value) -> Result<String> {
    match value {
        Value::Array(mut items) => {
            let first = items
                .pop()
                .ok_or_else(|| EngineError::Inference("Empty generation response".to_string()))?;
            extract_generated_text(first)
        }
        Value::Object(mut obj) => {
            if let Some(Value::String(text)) = obj.remove("generated_text") {
                Ok(text)
            } else if let Some(Value::String(text)) = obj.remove("response") {
                Ok(text)
            } else {
                Err(EngineError::Inference(
                    "Generation response missing text field".to_string(),
                ))
            }
        }
        other => Err(EngineError::Inference(format!(
            "Unexpected generation response format: {}",
            other
        ))),
    }
}
