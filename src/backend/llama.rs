// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! GGUF embedding backend built on llama.cpp
//!
//! Loads the model once with the configured GPU layer offload and produces
//! embeddings through a short-lived context per call. Contexts are cheap
//! next to the model weights and are not `Send`, so holding one across
//! handler invocations is not an option anyway.

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use llama_cpp_2::{
    context::params::LlamaContextParams,
    llama_backend::LlamaBackend,
    llama_batch::LlamaBatch,
    model::{params::LlamaModelParams, AddBos, LlamaModel},
};
use std::num::NonZeroU32;
use std::sync::Mutex;
use tracing::{debug, info};

use super::EmbeddingBackend;

// Per-call failures carry the inference variant; the handler rewrites the
// index to the position of the text that failed.
fn inference_error(reason: String) -> WorkerError {
    WorkerError::Inference { index: 0, reason }
}

/// Sanitize text before tokenization
///
/// llama.cpp tokenizes through C strings, so embedded null bytes are fatal
/// and other C0 control characters (except common whitespace) are dropped.
/// Input text can come from PDFs and similar binary-adjacent sources.
fn sanitize_for_tokenizer(text: &str) -> String {
    text.chars()
        .filter(|c| *c != '\0' && (*c >= ' ' || *c == '\t' || *c == '\n' || *c == '\r'))
        .collect()
}

struct LlamaState {
    backend: LlamaBackend,
    model: LlamaModel,
    context_size: usize,
}

/// Embedding backend over a loaded GGUF model
pub struct LlamaEmbedder {
    // llama.cpp contexts must be created and used on one thread at a time;
    // the mutex serializes embedding calls against the shared weights.
    state: Mutex<LlamaState>,
    dimension: usize,
}

impl std::fmt::Debug for LlamaEmbedder {
    // llama.cpp context types are not Debug; report just the dimension.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlamaEmbedder")
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl LlamaEmbedder {
    /// Loads the GGUF model named by the configuration
    ///
    /// Fails with `ResourceInit` on any construction error (bad file format,
    /// incompatible GPU driver, out of device memory).
    pub fn load(config: &WorkerConfig) -> Result<Self, WorkerError> {
        let backend = LlamaBackend::init()
            .map_err(|e| WorkerError::ResourceInit(format!("backend init failed: {:?}", e)))?;

        // -1 means offload everything; llama.cpp caps the count at the
        // model's actual layer count.
        let gpu_layers = if config.n_gpu_layers < 0 {
            u32::MAX
        } else {
            config.n_gpu_layers as u32
        };
        let model_params = LlamaModelParams::default().with_n_gpu_layers(gpu_layers);

        info!(
            "Loading GGUF model: {} (gpu_layers={}, context_size={})",
            config.model_path.display(),
            config.n_gpu_layers,
            config.context_size
        );

        let model = LlamaModel::load_from_file(&backend, &config.model_path, &model_params)
            .map_err(|e| WorkerError::ResourceInit(format!("failed to load model: {:?}", e)))?;

        let dimension = model.n_embd() as usize;
        info!("Model loaded, embedding dimension {}", dimension);

        Ok(Self {
            state: Mutex::new(LlamaState {
                backend,
                model,
                context_size: config.context_size,
            }),
            dimension,
        })
    }

    fn embed_sync(&self, text: &str) -> Result<Vec<f32>, WorkerError> {
        let state = self.state.lock().unwrap();

        let sanitized = sanitize_for_tokenizer(text);
        if sanitized.len() != text.len() {
            debug!(
                "Sanitized input: removed {} problematic bytes",
                text.len() - sanitized.len()
            );
        }

        let tokens = state
            .model
            .str_to_token(&sanitized, AddBos::Always)
            .map_err(|e| inference_error(format!("tokenization failed: {:?}", e)))?;

        if tokens.len() > state.context_size {
            return Err(WorkerError::InvalidInput(format!(
                "input of {} tokens exceeds the {}-token context window",
                tokens.len(),
                state.context_size
            )));
        }

        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(state.context_size as u32))
            .with_n_batch(state.context_size as u32)
            .with_embeddings(true);

        let mut context = state
            .model
            .new_context(&state.backend, ctx_params)
            .map_err(|e| inference_error(format!("failed to create context: {:?}", e)))?;

        let mut batch = LlamaBatch::new(state.context_size, 1);
        batch
            .add_sequence(&tokens, 0, false)
            .map_err(|e| inference_error(format!("failed to build batch: {:?}", e)))?;

        context
            .decode(&mut batch)
            .map_err(|e| inference_error(format!("decode failed: {:?}", e)))?;

        let embedding = context
            .embeddings_seq_ith(0)
            .map_err(|e| inference_error(format!("embedding extraction failed: {:?}", e)))?
            .to_vec();

        Ok(embedding)
    }
}

#[async_trait::async_trait]
impl EmbeddingBackend for LlamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, WorkerError> {
        self.embed_sync(text)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
