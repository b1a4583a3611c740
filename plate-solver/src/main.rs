use plate_solver::config;
use plate_solver::solve::{
    HttpSolveApi, JsonFileStore, SolveClient, SolveError, SubmissionState,
};

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "plate-solver", version, about = "Submit sky images to astrometry.net and wait for the solution")]
struct Cli {
    /// Image to upload
    image: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Save this API key before authenticating
    #[arg(long)]
    api_key: Option<String>,

    /// Keep polling the last submission instead of uploading
    #[arg(long)]
    resume: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::read_config(&cli.config)?;

    let _logging_guard = plate_solver::logging::init_logging(
        &config.log_dir,
        "plate-solver",
        &config.log_level,
    )?;

    tracing::info!("Plate solver starting...");

    let api = HttpSolveApi::new(&config.api_base, config.request_timeout())?;
    let store = JsonFileStore::new(&config.store_path);
    let client = SolveClient::new(Arc::new(api), Arc::new(store), config.client_options()).await?;

    match cli.api_key.as_deref().or(config.api_key.as_deref()) {
        Some(key) => {
            if let Err(e) = client.set_api_key(key).await {
                tracing::error!("Login failed: {}", e);
            }
        }
        None => {
            if let Err(e) = client.authenticate().await {
                tracing::error!("Login failed: {}", e);
            }
        }
    }

    if let Some(error_state) = client.error_state() {
        anyhow::bail!("{}", error_state);
    }

    if cli.resume {
        match client.resume().await? {
            Some(subid) => tracing::info!("Resumed submission {}", subid),
            None => anyhow::bail!("No previous submission to resume"),
        }
    } else {
        let path = cli.image.context("No image given (pass a path or --resume)")?;
        let image = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read image {:?}", path))?;

        let subid = match client.submit(image.clone()).await {
            Err(SolveError::NoSession) => client.submit(image).await?,
            other => other?,
        };
        tracing::info!("Submitted {:?} as submission {}", path, subid);
    }

    if let Some(url) = client.current_status_url() {
        println!("Progress: {}", url);
    }

    let mut updates = client.subscribe();
    tokio::select! {
        done = updates.wait_for(|s| s.submission_state == SubmissionState::Done) => {
            let snapshot = done.context("Client closed before the submission finished")?.clone();
            match snapshot.result_url {
                Some(url) => println!("Result: {}", url),
                None => println!("Solved, but the service returned no job id"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping");
        }
    }

    client.shutdown();
    Ok(())
}
