// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Job handler
//!
//! Translates one inbound job into embedding calls and an OpenAI-compatible
//! response. The handler is a pure function of (resource state, job): no
//! fault inside it may escape — anything that goes wrong becomes an error
//! envelope so the serving loop stays alive.

use crate::config::EmptyInputPolicy;
use crate::error::{ErrorEnvelope, WorkerError};
use crate::resource::ModelManager;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// One unit of work delivered by the hosting platform
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Job {
    /// Opaque correlation identifier, surfaced only in logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub input: JobInput,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<TextInput>,
}

/// A single string and a one-element list are equivalent inputs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextInput {
    Single(String),
    Many(Vec<String>),
}

impl TextInput {
    fn into_texts(self) -> Vec<String> {
        match self {
            TextInput::Single(text) => vec![text],
            TextInput::Many(texts) => texts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingRecord {
    pub embedding: Vec<f32>,
    /// Zero-based position of the source text; the only ordering signal
    /// consumers rely on
    pub index: usize,
    pub object: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingRecord>,
    pub model: String,
    pub object: String,
    pub usage: Usage,
}

/// Handler result on the wire: either the response or the error envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum JobOutcome {
    Success(EmbeddingResponse),
    Error(ErrorEnvelope),
}

/// Approximate token count for usage accounting
///
/// Whitespace tokens scaled by 1.3, floored per text. This is a heuristic,
/// not a tokenizer count — it is not guaranteed to match the model's actual
/// tokenization and exists only to give callers a stable, deterministic
/// usage figure.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.split_whitespace().count() as f64 * 1.3).floor() as u64
}

/// Runs one job to completion, converting every fault into an envelope
pub async fn handle_job(manager: &ModelManager, job: Job) -> JobOutcome {
    let job_id = job.id.clone().unwrap_or_else(|| "-".to_string());

    match run_job(manager, job).await {
        Ok(response) => {
            info!(
                job_id = %job_id,
                texts = response.data.len(),
                prompt_tokens = response.usage.prompt_tokens,
                "Job completed"
            );
            JobOutcome::Success(response)
        }
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "Job failed");
            JobOutcome::Error(ErrorEnvelope::from(&e))
        }
    }
}

async fn run_job(manager: &ModelManager, job: Job) -> Result<EmbeddingResponse, WorkerError> {
    let config = manager.config();
    let texts = job.input.input.map(TextInput::into_texts).unwrap_or_default();

    if texts.is_empty() {
        match config.empty_input_policy {
            EmptyInputPolicy::Reject => {
                return Err(WorkerError::InvalidInput(
                    "No input texts provided".to_string(),
                ));
            }
            EmptyInputPolicy::EmptyOk => {
                // Valid-but-empty request. Resolved without touching the
                // model, so an empty probe job cannot trigger a load.
                return Ok(EmbeddingResponse {
                    data: Vec::new(),
                    model: config.model_name.clone(),
                    object: "list".to_string(),
                    usage: Usage {
                        prompt_tokens: 0,
                        total_tokens: 0,
                    },
                });
            }
        }
    }

    let backend = manager.acquire().await?;

    let mut data = Vec::with_capacity(texts.len());
    let mut prompt_tokens = 0u64;

    for (i, text) in texts.iter().enumerate() {
        debug!(index = i, chars = text.len(), "Embedding input");
        let embedding = backend.embed(text).await.map_err(|e| match e {
            WorkerError::Inference { reason, .. } => WorkerError::Inference { index: i, reason },
            // Validation faults keep their kind; only infrastructure faults
            // are folded into the inference variant.
            invalid @ WorkerError::InvalidInput(_) => invalid,
            other => WorkerError::Inference {
                index: i,
                reason: other.to_string(),
            },
        })?;

        prompt_tokens += estimate_tokens(text);
        data.push(EmbeddingRecord {
            embedding,
            index: i,
            object: "embedding".to_string(),
        });
    }

    Ok(EmbeddingResponse {
        data,
        model: config.model_name.clone(),
        object: "list".to_string(),
        usage: Usage {
            prompt_tokens,
            total_tokens: prompt_tokens,
        },
    })
}
