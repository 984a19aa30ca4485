use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    str::FromStr,
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};

use super::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    OpenAI,
    #[default]
    FastEmbed,
    Hashed,
}

impl FromStr for EmbeddingBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "fastembed" | "fast-embed" | "fast" => Ok(Self::FastEmbed),
            "hashed" => Ok(Self::Hashed),
            other => Err(anyhow!(
                "unrecognized embedding backend '{other}' (expected openai, fastembed, or hashed)"
            )),
        }
    }
}

/// Maps text to fixed-length vectors. The retry policy for the remote model
/// lives here; callers never retry embedding failures themselves.
#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    OpenAI {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimensions: u32,
    },
    FastEmbed {
        model: Arc<Mutex<TextEmbedding>>,
        model_name: EmbeddingModel,
        dimension: usize,
    },
    Hashed {
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub async fn from_config(
        config: &AppConfig,
        openai_client: Option<Arc<Client<OpenAIConfig>>>,
    ) -> Result<Self> {
        match config.embedding_backend {
            EmbeddingBackend::OpenAI => {
                if config.openai_api_key.is_empty() {
                    return Err(anyhow!(
                        "openai embedding backend selected but no API key is configured"
                    ));
                }
                let client = openai_client
                    .ok_or_else(|| anyhow!("openai embedding backend requires an API client"))?;
                Ok(Self::new_openai(
                    client,
                    config.embedding_model.clone(),
                    config.embedding_dimensions,
                ))
            }
            EmbeddingBackend::FastEmbed => Self::new_fastembed(config.fastembed_model.clone()).await,
            EmbeddingBackend::Hashed => Self::new_hashed(config.embedding_dimensions as usize),
        }
    }

    pub fn new_openai(client: Arc<Client<OpenAIConfig>>, model: String, dimensions: u32) -> Self {
        Self {
            inner: EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            },
        }
    }

    /// Loading the model may download weights on first use, so it runs on the
    /// blocking pool.
    pub async fn new_fastembed(model_override: Option<String>) -> Result<Self> {
        let model_name = match model_override {
            Some(code) => EmbeddingModel::from_str(&code).map_err(|err| anyhow!(err))?,
            None => EmbeddingModel::default(),
        };

        let init_model = model_name.clone();
        let (model, dimension) = tokio::task::spawn_blocking(move || -> Result<_> {
            let loaded = TextEmbedding::try_new(
                TextInitOptions::new(init_model.clone()).with_show_download_progress(true),
            )
            .context("loading fastembed model")?;
            let info = EmbeddingModel::get_model_info(&init_model)
                .ok_or_else(|| anyhow!("fastembed metadata missing for {init_model}"))?;
            Ok((loaded, info.dim))
        })
        .await
        .context("joining fastembed load task")??;

        Ok(Self {
            inner: EmbeddingInner::FastEmbed {
                model: Arc::new(Mutex::new(model)),
                model_name,
                dimension,
            },
        })
    }

    /// Deterministic token-bucket embeddings. No model downloads, no network,
    /// cosine similarity still tracks token overlap, which is what tests need.
    pub fn new_hashed(dimension: usize) -> Result<Self> {
        Ok(Self {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
            },
        })
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::OpenAI { .. } => "openai",
            EmbeddingInner::FastEmbed { .. } => "fastembed",
            EmbeddingInner::Hashed { .. } => "hashed",
        }
    }

    /// Configured dimension. For FastEmbed this is the model's native size;
    /// for OpenAI the requested truncation size.
    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::OpenAI { dimensions, .. } => *dimensions as usize,
            EmbeddingInner::FastEmbed { dimension, .. } => *dimension,
            EmbeddingInner::Hashed { dimension } => *dimension,
        }
    }

    pub fn model_code(&self) -> Option<String> {
        match &self.inner {
            EmbeddingInner::OpenAI { model, .. } => Some(model.clone()),
            EmbeddingInner::FastEmbed { model_name, .. } => Some(model_name.to_string()),
            EmbeddingInner::Hashed { .. } => None,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(hashed_embedding(text, *dimension)),
            EmbeddingInner::FastEmbed { model, .. } => {
                let mut engine = model.lock().await;
                let mut vectors = engine
                    .embed(vec![text.to_owned()], None)
                    .context("generating fastembed vector")?;
                if vectors.is_empty() {
                    return Err(anyhow!("fastembed returned no embedding for input"));
                }
                Ok(vectors.swap_remove(0))
            }
            EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            } => {
                let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
                let embedding = Retry::spawn(retry_strategy, || async {
                    let request = CreateEmbeddingRequestArgs::default()
                        .model(model.clone())
                        .input([text])
                        .dimensions(*dimensions)
                        .build()?;

                    let response = client.embeddings().create(request).await?;

                    response
                        .data
                        .into_iter()
                        .next()
                        .map(|item| item.embedding)
                        .ok_or_else(|| anyhow!("no embedding data received from OpenAI API"))
                })
                .await?;

                Ok(embedding)
            }
        }
    }

    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(texts
                .into_iter()
                .map(|text| hashed_embedding(&text, *dimension))
                .collect()),
            EmbeddingInner::FastEmbed { model, .. } => {
                let mut engine = model.lock().await;
                engine
                    .embed(texts, None)
                    .context("generating fastembed batch embeddings")
            }
            EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            } => {
                let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
                let embeddings = Retry::spawn(retry_strategy, || async {
                    let request = CreateEmbeddingRequestArgs::default()
                        .model(model.clone())
                        .input(texts.clone())
                        .dimensions(*dimensions)
                        .build()?;

                    let response = client.embeddings().create(request).await?;

                    anyhow::Ok(
                        response
                            .data
                            .into_iter()
                            .map(|item| item.embedding)
                            .collect::<Vec<_>>(),
                    )
                })
                .await?;

                if embeddings.is_empty() {
                    return Err(anyhow!("OpenAI returned no embeddings for batch input"));
                }

                Ok(embeddings)
            }
        }
    }
}

/// Token counts folded into hash buckets, then L2-normalized. An input with
/// no alphanumeric tokens embeds as the zero vector.
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];
    for token in tokens(text) {
        let slot = bucket(&token, dim);
        if let Some(value) = vector.get_mut(slot) {
            *value += 1.0;
        }
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_ascii_lowercase)
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() % dimension as u64) as usize
}
