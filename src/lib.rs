// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod backend;
pub mod config;
pub mod error;
pub mod handler;
pub mod resource;
pub mod server;

// Re-export main types
pub use backend::{EmbeddingBackend, LlamaEmbedder, MockEmbedder};
pub use config::{EmptyInputPolicy, InitPolicy, WorkerConfig};
pub use error::{ErrorEnvelope, WorkerError};
pub use handler::{
    handle_job, EmbeddingRecord, EmbeddingResponse, Job, JobInput, JobOutcome, TextInput, Usage,
};
pub use resource::{BackendLoader, LlamaLoader, ModelManager, ResourceStatus};
pub use server::{create_app, serve, AppState};
