// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Deterministic in-memory embedding backend
//!
//! Stands in for the GGUF backend in tests and local development where no
//! model file or GPU is available. Vectors are derived from a hash of the
//! input text, so identical text always produces identical embeddings and
//! different texts almost never collide.

use crate::error::WorkerError;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::EmbeddingBackend;

#[derive(Debug)]
pub struct MockEmbedder {
    dimension: usize,
    /// Texts containing this marker make `embed` fail, for fault-injection
    /// tests at the handler boundary.
    fail_marker: Option<String>,
    /// Texts containing this marker are rejected as invalid input, like an
    /// input that overflows the context window.
    reject_marker: Option<String>,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fail_marker: None,
            reject_marker: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_fail_marker(mut self, marker: impl Into<String>) -> Self {
        self.fail_marker = Some(marker.into());
        self
    }

    pub fn with_reject_marker(mut self, marker: impl Into<String>) -> Self {
        self.reject_marker = Some(marker.into());
        self
    }

    /// Number of embed calls served so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EmbeddingBackend for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, WorkerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(marker) = &self.fail_marker {
            if text.contains(marker.as_str()) {
                return Err(WorkerError::Inference {
                    index: 0,
                    reason: "injected failure".to_string(),
                });
            }
        }

        if let Some(marker) = &self.reject_marker {
            if text.contains(marker.as_str()) {
                return Err(WorkerError::InvalidInput(
                    "input exceeds the context window".to_string(),
                ));
            }
        }

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();

        // Linear congruential generator over the text hash, as cheap a
        // deterministic source as it gets.
        let mut current = seed;
        let mut embedding = Vec::with_capacity(self.dimension);
        for i in 0..self.dimension {
            current = (current.wrapping_mul(1664525).wrapping_add(1013904223)) ^ (i as u64);
            let value = (current as f64 / u64::MAX as f64) * 2.0 - 1.0;
            embedding.push(value as f32);
        }

        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
