use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use emolens_core::{ModelCache, ModelManifest, RawImage, TensorBuilder};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod controller;
mod state;

use config::Config;
use controller::{UploadController, UploadOutcome};
use state::UiState;

#[derive(Parser)]
#[command(name = "emolens", about = "Predict the facial emotion in a photo")]
struct Cli {
    /// Model manifest to use (overrides EMOLENS_MODEL_PATH)
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload one or more photos and show the predicted emotion
    Classify {
        /// Image files, in selection order
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Start every upload at once instead of one after another
        #[arg(long)]
        parallel: bool,
        /// Print every UI update as it happens
        #[arg(long)]
        follow: bool,
    },
    /// Write the 48x48 JPEG the model would see
    Resize { input: PathBuf, output: PathBuf },
    /// Print the grayscale tensor built from a photo
    Tensor { input: PathBuf },
    /// List the model's label table in output order
    Labels,
    /// Show configuration and model manifest
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(model) = cli.model {
        config.model_path = model;
    }
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Classify {
            files,
            parallel,
            follow,
        } => classify(&config, files, parallel, follow).await,
        Commands::Resize { input, output } => {
            let raw = RawImage::open(&input).await?;
            let resized = config.resizer().resize_async(&raw).await?;
            tokio::fs::write(&output, resized.bytes())
                .await
                .with_context(|| format!("writing {}", output.display()))?;
            println!("{} -> {} (48x48 JPEG)", input.display(), output.display());
            Ok(())
        }
        Commands::Tensor { input } => {
            let raw = RawImage::open(&input).await?;
            let resized = config.resizer().resize_async(&raw).await?;
            let tensor = TensorBuilder::build_async(resized).await?;
            let stats = tensor.stats();
            println!(
                "shape {:?}, {} values, min {:.2}, max {:.2}, mean {:.2}",
                tensor.shape(),
                tensor.len(),
                stats.min,
                stats.max,
                stats.mean
            );
            Ok(())
        }
        Commands::Labels => {
            let manifest = ModelManifest::load(&config.model_path)?;
            for (i, label) in manifest.labels.iter().enumerate() {
                println!("{i}: {label}");
            }
            Ok(())
        }
        Commands::Status => {
            let manifest = match ModelManifest::load(&config.model_path) {
                Ok(m) => serde_json::to_value(&m)?,
                Err(e) => serde_json::json!({ "error": e.to_string() }),
            };
            let status = serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "config": config,
                "manifest": manifest,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

async fn classify(config: &Config, files: Vec<PathBuf>, parallel: bool, follow: bool) -> Result<()> {
    let controller = Arc::new(UploadController::new(
        config.resizer(),
        ModelCache::new(config.loader(), &config.model_path),
    ));

    let watcher = follow.then(|| {
        let mut updates = controller.state().subscribe();
        tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let state = updates.borrow_and_update().clone();
                println!("-- update {}", state.generation);
                render(&state);
            }
        })
    });

    let mut failed = 0usize;
    if parallel {
        let mut tasks = tokio::task::JoinSet::new();
        for path in files {
            let raw = match RawImage::open(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    eprintln!("{}: {e}", path.display());
                    failed += 1;
                    continue;
                }
            };
            let ticket = controller.select(&raw);
            let ctl = Arc::clone(&controller);
            tasks.spawn(async move {
                let result = ctl.process(ticket, &raw).await;
                (path, result)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            let (path, result) = joined?;
            if !report(&path, result) {
                failed += 1;
            }
        }
    } else {
        for path in files {
            let result = match RawImage::open(&path).await {
                Ok(raw) => controller.upload(raw).await,
                Err(e) => Err(e.into()),
            };
            if !report(&path, result) {
                failed += 1;
            }
        }
    }

    let last = controller.state().snapshot();
    // Dropping the controller closes the state channel and ends the watcher.
    drop(controller);
    if let Some(watcher) = watcher {
        watcher.await?;
    }
    render(&last);

    if failed > 0 {
        anyhow::bail!("{failed} upload(s) failed");
    }
    Ok(())
}

fn report(path: &std::path::Path, result: Result<UploadOutcome, controller::PipelineError>) -> bool {
    match result {
        Ok(UploadOutcome::Displayed(label)) => {
            println!("{}: {label}", path.display());
            true
        }
        Ok(UploadOutcome::Superseded(label)) => {
            println!("{}: {label} (superseded by a newer upload)", path.display());
            true
        }
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            false
        }
    }
}

fn render(state: &UiState) {
    match &state.preview {
        Some(preview) => println!("image:   {} ({})", preview.uri, preview.mime),
        None => println!("image:   -"),
    }
    match state.label {
        Some(label) => println!("emotion: {label}"),
        None => println!("emotion: -"),
    }
    if let Some(error) = &state.error {
        println!("error:   {error}");
    }
}
