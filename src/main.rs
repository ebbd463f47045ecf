// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::Result;
use gguf_embed_worker::{
    config::{InitPolicy, WorkerConfig},
    resource::{list_directory, ModelManager},
    server,
};
use std::{env, sync::Arc};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    println!("🚀 Starting GGUF embedding worker...\n");

    let config = WorkerConfig::from_env().map_err(|e| anyhow::anyhow!("{}", e))?;

    println!("Model:        {}", config.model_path.display());
    println!("Model name:   {}", config.model_name);
    println!("GPU layers:   {}", config.n_gpu_layers);
    println!("Context size: {} tokens", config.context_size);
    println!("Init policy:  {:?}", config.init_policy);
    println!();

    // Startup diagnostics: show what is actually on disk next to the
    // configured model path, the first thing to check when a worker comes
    // up without its model.
    let model_dir = config.model_path.parent();
    let listing = list_directory(model_dir);
    if listing.is_empty() {
        println!("⚠️  Model directory is missing or empty");
    } else {
        println!("Contents of model directory:");
        for entry in &listing {
            println!("  - {}", entry);
        }
    }
    println!();

    let init_policy = config.init_policy;
    let port = config.port;
    let manager = Arc::new(ModelManager::new(config));

    match init_policy {
        InitPolicy::Eager => {
            // Fail fast: a worker that cannot load its model should never
            // report itself as serving.
            println!("🧠 Loading embedding model (eager init)...");
            let backend = manager.acquire().await?;
            println!("✅ Model ready ({} dimensions)\n", backend.dimension());
        }
        InitPolicy::Lazy => {
            println!("🧠 Lazy init: model loads on the first job\n");
        }
    }

    println!("API Endpoints:");
    println!("  Health:  http://localhost:{}/health", port);
    println!("  Run job: POST http://localhost:{}/run", port);
    println!();

    let serve_handle = tokio::spawn(server::serve(manager, port));

    tokio::select! {
        result = serve_handle => result??,
        _ = tokio::signal::ctrl_c() => {
            println!("\n⏹️  Shutting down...");
        }
    }

    Ok(())
}
