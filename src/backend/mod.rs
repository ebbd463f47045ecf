// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Embedding backend abstraction
//!
//! The worker talks to the inference library exclusively through
//! [`EmbeddingBackend`], so the handler and resource manager can be tested
//! without a GPU or a model file on disk.

pub mod llama;
pub mod mock;

use crate::error::WorkerError;

pub use llama::LlamaEmbedder;
pub use mock::MockEmbedder;

/// One loaded embedding model
///
/// Implementations are shared-read after construction; `embed` takes `&self`
/// and must be safe to call from concurrent handler invocations.
#[async_trait::async_trait]
pub trait EmbeddingBackend: Send + Sync + std::fmt::Debug {
    /// Produces one fixed-length vector for the given text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, WorkerError>;

    /// Embedding dimension of the loaded model (e.g. 2560)
    fn dimension(&self) -> usize;
}
