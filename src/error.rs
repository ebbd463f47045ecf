// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Error types for the embedding worker
//!
//! Every fault the worker can produce is one of the variants below. Handler
//! code converts them into the wire-level error envelope; nothing past the
//! handler boundary ever sees a raw error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised during configuration, model initialization, or inference
///
/// `Clone` because the resource manager caches a failed initialization and
/// re-surfaces the same error to later callers when retry is disabled.
#[derive(Error, Debug, Clone)]
pub enum WorkerError {
    /// Required environment value missing or unparseable. Fails process
    /// startup, never surfaces in a job response.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Model artifact missing at the configured path
    #[error("Model file not found at {path}")]
    ResourceUnavailable {
        path: String,
        /// Contents of the directory that should hold the model, captured
        /// for diagnosis (mirrors what the worker logs at startup).
        dir_listing: Vec<String>,
    },

    /// Model construction or the post-load self-test failed
    #[error("Model initialization failed: {0}")]
    ResourceInit(String),

    /// Empty or malformed input rejected by the configured policy
    #[error("{0}")]
    InvalidInput(String),

    /// A single embedding call failed inside the inference library
    #[error("Embedding failed for input {index}: {reason}")]
    Inference { index: usize, reason: String },
}

impl WorkerError {
    /// Extra diagnostic detail carried alongside the message in the error
    /// envelope. Validation errors carry none; infrastructure errors carry
    /// whatever helps an operator debug a dead worker from logs alone.
    pub fn diagnostic_detail(&self) -> Option<String> {
        match self {
            WorkerError::Config(_) | WorkerError::InvalidInput(_) => None,
            WorkerError::ResourceUnavailable { path, dir_listing } => {
                let dir = std::path::Path::new(path)
                    .parent()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "/".to_string());
                let mut lines = vec![format!("Contents of {}:", dir)];
                if dir_listing.is_empty() {
                    lines.push("  (directory missing or empty)".to_string());
                } else {
                    for entry in dir_listing {
                        lines.push(format!("  - {}", entry));
                    }
                }
                Some(lines.join("\n"))
            }
            WorkerError::ResourceInit(_) | WorkerError::Inference { .. } => {
                Some(format!("{:?}", self))
            }
        }
    }
}

/// Wire-level error envelope returned for a failed job
///
/// `traceback` is diagnostic detail, not a language traceback; the name is
/// kept for compatibility with callers of the original worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEnvelope {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl From<&WorkerError> for ErrorEnvelope {
    fn from(err: &WorkerError) -> Self {
        ErrorEnvelope {
            error: err.to_string(),
            traceback: err.diagnostic_detail(),
        }
    }
}
