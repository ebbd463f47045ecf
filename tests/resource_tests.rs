// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Resource manager lifecycle tests
//!
//! These tests verify that the model manager:
//! - Constructs the backend exactly once under concurrent first callers
//! - Fails with ResourceUnavailable (and a directory listing) for a missing
//!   model file, without invoking the loader
//! - Applies the configured retry-after-failure policy
//! - Rejects backends that fail the post-load self-test

use async_trait::async_trait;
use gguf_embed_worker::{
    backend::{EmbeddingBackend, MockEmbedder},
    config::WorkerConfig,
    resource::{BackendLoader, ModelManager, ResourceStatus},
    WorkerError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Loader that counts construction attempts and can fail the first N of them
struct CountingLoader {
    attempts: AtomicUsize,
    fail_first: usize,
    dimension: usize,
    load_delay: Duration,
}

impl CountingLoader {
    fn new(dimension: usize) -> Self {
        Self {
            attempts: AtomicUsize::new(0),
            fail_first: 0,
            dimension,
            load_delay: Duration::ZERO,
        }
    }

    fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendLoader for CountingLoader {
    async fn load(&self, _config: &WorkerConfig) -> Result<Arc<dyn EmbeddingBackend>, WorkerError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        if attempt <= self.fail_first {
            return Err(WorkerError::ResourceInit(format!(
                "injected load failure (attempt {})",
                attempt
            )));
        }
        Ok(Arc::new(MockEmbedder::new(self.dimension)))
    }
}

/// Config pointing at a model file that actually exists on disk
fn config_with_model_file(dir: &tempfile::TempDir) -> WorkerConfig {
    let model_path = dir.path().join("embed.gguf");
    std::fs::write(&model_path, b"not a real gguf").unwrap();
    WorkerConfig {
        model_path,
        ..WorkerConfig::default()
    }
}

#[tokio::test]
async fn test_concurrent_first_callers_trigger_one_load() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_model_file(&dir);
    let loader = Arc::new(CountingLoader::new(32).with_delay(Duration::from_millis(50)));
    let manager = Arc::new(ModelManager::new_with_loader(config, loader.clone()));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move { manager.acquire().await }));
    }

    for task in tasks {
        let handle = task.await.unwrap().expect("acquire should succeed");
        assert_eq!(handle.dimension(), 32);
    }

    assert_eq!(loader.attempts(), 1, "exactly one construction attempt");
    assert_eq!(manager.status(), ResourceStatus::Ready);
}

#[tokio::test]
async fn test_missing_model_file_is_resource_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("some-other-model.gguf"), b"weights").unwrap();

    let config = WorkerConfig {
        model_path: dir.path().join("missing.gguf"),
        ..WorkerConfig::default()
    };
    let loader = Arc::new(CountingLoader::new(32));
    let manager = ModelManager::new_with_loader(config, loader.clone());

    let err = manager.acquire().await.unwrap_err();
    match err {
        WorkerError::ResourceUnavailable { path, dir_listing } => {
            assert!(path.ends_with("missing.gguf"));
            assert!(
                dir_listing.iter().any(|e| e.contains("some-other-model.gguf")),
                "listing should name the files that are present: {:?}",
                dir_listing
            );
        }
        other => panic!("expected ResourceUnavailable, got {:?}", other),
    }

    assert_eq!(loader.attempts(), 0, "loader must not run for a missing file");
    assert!(matches!(manager.status(), ResourceStatus::Failed(_)));
}

#[tokio::test]
async fn test_failed_init_retries_on_next_call_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_model_file(&dir);
    assert!(config.init_retry);

    let loader = Arc::new(CountingLoader::new(32).failing_first(1));
    let manager = ModelManager::new_with_loader(config, loader.clone());

    let err = manager.acquire().await.unwrap_err();
    assert!(matches!(err, WorkerError::ResourceInit(_)));
    assert!(matches!(manager.status(), ResourceStatus::Failed(_)));

    // Transient failure: the next caller re-attempts and succeeds.
    let handle = manager.acquire().await.expect("retry should succeed");
    assert_eq!(handle.dimension(), 32);
    assert_eq!(loader.attempts(), 2);
    assert_eq!(manager.status(), ResourceStatus::Ready);
}

#[tokio::test]
async fn test_failed_init_is_sticky_when_retry_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let config = WorkerConfig {
        init_retry: false,
        ..config_with_model_file(&dir)
    };

    let loader = Arc::new(CountingLoader::new(32).failing_first(usize::MAX));
    let manager = ModelManager::new_with_loader(config, loader.clone());

    let first = manager.acquire().await.unwrap_err();
    let second = manager.acquire().await.unwrap_err();

    // The cached failure is re-surfaced as-is, kind and message intact
    assert!(matches!(second, WorkerError::ResourceInit(_)));
    assert_eq!(second.to_string(), first.to_string());
    assert_eq!(loader.attempts(), 1, "no second attempt with retry disabled");
}

#[tokio::test]
async fn test_sticky_failure_keeps_original_error_kind_and_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("present.gguf"), b"weights").unwrap();

    let config = WorkerConfig {
        model_path: dir.path().join("missing.gguf"),
        init_retry: false,
        ..WorkerConfig::default()
    };
    let loader = Arc::new(CountingLoader::new(32));
    let manager = ModelManager::new_with_loader(config, loader.clone());

    assert!(manager.acquire().await.is_err());

    // Every later call must still see ResourceUnavailable with the
    // directory listing, not a flattened init error.
    let err = manager.acquire().await.unwrap_err();
    match err {
        WorkerError::ResourceUnavailable { path, dir_listing } => {
            assert!(path.ends_with("missing.gguf"));
            assert!(dir_listing.iter().any(|e| e.contains("present.gguf")));
        }
        other => panic!("expected ResourceUnavailable, got {:?}", other),
    }
    assert_eq!(loader.attempts(), 0);
}

#[tokio::test]
async fn test_status_reports_loading_while_init_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_model_file(&dir);
    let loader = Arc::new(CountingLoader::new(8).with_delay(Duration::from_millis(200)));
    let manager = Arc::new(ModelManager::new_with_loader(config, loader));

    let loading = manager.clone();
    let task = tokio::spawn(async move { loading.acquire().await });

    // Well inside the load window; health probing must not block on it
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.status(), ResourceStatus::Loading);

    task.await.unwrap().unwrap();
    assert_eq!(manager.status(), ResourceStatus::Ready);
}

#[tokio::test]
async fn test_self_test_failure_is_resource_init_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_model_file(&dir);

    // A zero-dimension backend produces empty vectors, which the self-test
    // must reject before any job sees the handle.
    let loader = Arc::new(CountingLoader::new(0));
    let manager = ModelManager::new_with_loader(config, loader.clone());

    let err = manager.acquire().await.unwrap_err();
    match err {
        WorkerError::ResourceInit(msg) => assert!(msg.contains("self-test")),
        other => panic!("expected ResourceInit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_status_starts_uninitialized() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_model_file(&dir);
    let manager = ModelManager::new_with_loader(config, Arc::new(CountingLoader::new(8)));

    assert_eq!(manager.status(), ResourceStatus::Uninitialized);
    manager.acquire().await.unwrap();
    assert_eq!(manager.status(), ResourceStatus::Ready);
}

#[tokio::test]
async fn test_ready_handle_is_reused_without_reload() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_model_file(&dir);
    let loader = Arc::new(CountingLoader::new(8));
    let manager = ModelManager::new_with_loader(config, loader.clone());

    manager.acquire().await.unwrap();
    manager.acquire().await.unwrap();
    manager.acquire().await.unwrap();

    assert_eq!(loader.attempts(), 1);
}
