// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Model resource manager
//!
//! Owns the single embedding model instance for the process. The model is
//! constructed at most once, on demand, behind a mutex: if N jobs arrive
//! before the model is ready, exactly one initialization attempt runs and
//! the other callers block until it resolves. Once ready, the handle is an
//! immutable shared-read capability for the rest of the process lifetime.

use crate::backend::{llama::LlamaEmbedder, EmbeddingBackend};
use crate::config::WorkerConfig;
use crate::error::WorkerError;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Constructs the embedding backend when the manager first needs it
///
/// Split out as a trait so tests can count construction attempts and inject
/// failures without touching llama.cpp.
#[async_trait::async_trait]
pub trait BackendLoader: Send + Sync {
    async fn load(&self, config: &WorkerConfig) -> Result<Arc<dyn EmbeddingBackend>, WorkerError>;
}

/// Production loader backed by llama.cpp
pub struct LlamaLoader;

#[async_trait::async_trait]
impl BackendLoader for LlamaLoader {
    async fn load(&self, config: &WorkerConfig) -> Result<Arc<dyn EmbeddingBackend>, WorkerError> {
        // Reading gigabytes of weights and setting up the GPU can take
        // minutes; off the runtime so health probes stay responsive.
        let config = config.clone();
        let embedder = tokio::task::spawn_blocking(move || LlamaEmbedder::load(&config))
            .await
            .map_err(|e| WorkerError::ResourceInit(format!("model load task failed: {}", e)))??;
        Ok(Arc::new(embedder))
    }
}

/// Observable lifecycle state of the model resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceStatus {
    Uninitialized,
    Loading,
    Ready,
    Failed(String),
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Uninitialized => "uninitialized",
            ResourceStatus::Loading => "loading",
            ResourceStatus::Ready => "ready",
            ResourceStatus::Failed(_) => "failed",
        }
    }
}

enum InnerState {
    Uninitialized,
    Ready(Arc<dyn EmbeddingBackend>),
    // The full error is kept so a sticky failure re-surfaces with its
    // original kind and diagnostics, not a flattened message.
    Failed(WorkerError),
}

pub struct ModelManager {
    config: WorkerConfig,
    loader: Arc<dyn BackendLoader>,
    // The mutex is the single-initialization gate: held for the whole load,
    // so concurrent first callers queue here instead of each loading.
    state: Mutex<InnerState>,
}

impl ModelManager {
    pub fn new(config: WorkerConfig) -> Self {
        Self::new_with_loader(config, Arc::new(LlamaLoader))
    }

    pub fn new_with_loader(config: WorkerConfig, loader: Arc<dyn BackendLoader>) -> Self {
        Self {
            config,
            loader,
            state: Mutex::new(InnerState::Uninitialized),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Returns the loaded model, initializing it on the first call
    ///
    /// Verifies the model file exists before attempting construction and
    /// runs one self-test embedding after it. After a failed attempt the
    /// behavior depends on `init_retry`: retry on the next call (default),
    /// or return the cached failure without touching the loader again.
    pub async fn acquire(&self) -> Result<Arc<dyn EmbeddingBackend>, WorkerError> {
        let mut state = self.state.lock().await;

        match &*state {
            InnerState::Ready(handle) => return Ok(handle.clone()),
            InnerState::Failed(err) => {
                if !self.config.init_retry {
                    warn!("Initialization previously failed and retry is disabled: {}", err);
                    return Err(err.clone());
                }
                warn!("Retrying model initialization after earlier failure: {}", err);
            }
            InnerState::Uninitialized => {}
        }

        match self.initialize().await {
            Ok(handle) => {
                *state = InnerState::Ready(handle.clone());
                Ok(handle)
            }
            Err(e) => {
                error!("Model initialization failed: {}", e);
                *state = InnerState::Failed(e.clone());
                Err(e)
            }
        }
    }

    /// Lifecycle state for the health endpoint. Never blocks: if the state
    /// lock is held, an initialization attempt is in flight.
    pub fn status(&self) -> ResourceStatus {
        match self.state.try_lock() {
            Err(_) => ResourceStatus::Loading,
            Ok(guard) => match &*guard {
                InnerState::Uninitialized => ResourceStatus::Uninitialized,
                InnerState::Ready(_) => ResourceStatus::Ready,
                InnerState::Failed(err) => ResourceStatus::Failed(err.to_string()),
            },
        }
    }

    async fn initialize(&self) -> Result<Arc<dyn EmbeddingBackend>, WorkerError> {
        let path = &self.config.model_path;
        if !path.exists() {
            return Err(WorkerError::ResourceUnavailable {
                path: path.display().to_string(),
                dir_listing: list_directory(path.parent()),
            });
        }

        info!("Initializing embedding model from {}", path.display());
        let handle = self.loader.load(&self.config).await?;

        // One self-test embedding confirms the model actually produces
        // vectors before any job relies on it.
        let probe = handle
            .embed("self-test")
            .await
            .map_err(|e| WorkerError::ResourceInit(format!("self-test embedding failed: {}", e)))?;
        if probe.is_empty() {
            return Err(WorkerError::ResourceInit(
                "self-test embedding returned an empty vector".to_string(),
            ));
        }

        info!(
            "Embedding model ready ({} dimensions)",
            handle.dimension()
        );
        Ok(handle)
    }
}

/// Enumerates the directory that should contain the model artifact
///
/// Mirrors the startup diagnostics the worker logs: file sizes in MB, a
/// trailing slash for directories. Returned inside `ResourceUnavailable` so
/// a wrong `MODEL_PATH` is diagnosable from the error alone.
pub fn list_directory(dir: Option<&Path>) -> Vec<String> {
    let Some(dir) = dir else {
        return Vec::new();
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut listing: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            match entry.metadata() {
                Ok(meta) if meta.is_dir() => format!("{}/ (directory)", name),
                Ok(meta) => {
                    let size_mb = meta.len() as f64 / (1024.0 * 1024.0);
                    format!("{} ({:.1} MB)", name, size_mb)
                }
                Err(_) => name,
            }
        })
        .collect();
    listing.sort();
    listing
}
