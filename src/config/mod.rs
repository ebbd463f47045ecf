// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Worker configuration
//!
//! All configuration is environment-provided, matching how the hosting
//! platform injects settings into worker containers. Invalid values fail
//! process startup with `WorkerError::Config` rather than being silently
//! defaulted.

use crate::error::WorkerError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// When the embedding model is constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPolicy {
    /// Load at process startup, before serving. A bad model file prevents
    /// the process from ever serving, but failures show up immediately.
    Eager,
    /// Load on the first job that needs the model. The process starts even
    /// with a broken model; the first caller pays the load latency.
    Lazy,
}

impl FromStr for InitPolicy {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "eager" => Ok(InitPolicy::Eager),
            "lazy" => Ok(InitPolicy::Lazy),
            other => Err(WorkerError::Config(format!(
                "MODEL_INIT must be 'eager' or 'lazy', got '{}'",
                other
            ))),
        }
    }
}

/// What an empty or missing input list means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyInputPolicy {
    /// Valid-but-empty request: respond with `data: []` and zero usage
    EmptyOk,
    /// Structured error: `{"error": "No input texts provided"}`
    Reject,
}

impl FromStr for EmptyInputPolicy {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "empty-ok" | "empty_ok" => Ok(EmptyInputPolicy::EmptyOk),
            "reject" => Ok(EmptyInputPolicy::Reject),
            other => Err(WorkerError::Config(format!(
                "EMPTY_INPUT_POLICY must be 'empty-ok' or 'reject', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Path to the GGUF model artifact
    pub model_path: PathBuf,
    /// Layers to offload to GPU; -1 offloads all of them
    pub n_gpu_layers: i32,
    /// Model identifier echoed back in every response
    pub model_name: String,
    /// Context window in tokens
    pub context_size: usize,
    pub init_policy: InitPolicy,
    /// Whether a failed initialization may be re-attempted by a later job.
    /// Off reproduces the sticky-failure behavior of older deployments.
    pub init_retry: bool,
    pub empty_input_policy: EmptyInputPolicy,
    /// HTTP listen port for the local job endpoint
    pub port: u16,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("/models/model.gguf"),
            n_gpu_layers: -1,
            model_name: "model".to_string(),
            context_size: 8192,
            init_policy: InitPolicy::Lazy,
            init_retry: true,
            empty_input_policy: EmptyInputPolicy::EmptyOk,
            port: 8080,
        }
    }
}

impl WorkerConfig {
    /// Builds the configuration from environment variables
    ///
    /// Missing variables fall back to defaults; present-but-invalid values
    /// are configuration errors and must abort startup.
    pub fn from_env() -> Result<Self, WorkerError> {
        let defaults = Self::default();

        let model_path = env::var("MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.model_path);

        let n_gpu_layers = parse_env("N_GPU_LAYERS", defaults.n_gpu_layers)?;
        let context_size = parse_env("CONTEXT_SIZE", defaults.context_size)?;
        let port = parse_env("PORT", defaults.port)?;
        let init_retry = parse_env("MODEL_INIT_RETRY", defaults.init_retry)?;

        let init_policy = match env::var("MODEL_INIT") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.init_policy,
        };
        let empty_input_policy = match env::var("EMPTY_INPUT_POLICY") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.empty_input_policy,
        };

        // Default model name is the file stem of the artifact, which is what
        // deployments usually want to see in responses.
        let model_name = env::var("MODEL_NAME").unwrap_or_else(|_| {
            model_path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| defaults.model_name.clone())
        });

        if context_size == 0 {
            return Err(WorkerError::Config(
                "CONTEXT_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            model_path,
            n_gpu_layers,
            model_name,
            context_size,
            init_policy,
            init_retry,
            empty_input_policy,
            port,
        })
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T, WorkerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| WorkerError::Config(format!("{} is invalid: {}", name, e))),
        Err(_) => Ok(default),
    }
}
