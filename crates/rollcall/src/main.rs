//! `rollcall` - simulated classroom attendance console
//!
//! This binary loads configuration, wires the synthetic camera and the
//! Gemini report backend into the console, and runs it on stdin/stdout.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::BufReader;
use tracing::{info, warn};

use rollcall::capture::{CaptureSession, SyntheticCamera};
use rollcall::cli::{Cli, Command, ConfigCommand};
use rollcall::config::API_KEY_ENV;
use rollcall::console::Console;
use rollcall::report::{GeminiClient, ReportGenerator};
use rollcall::{init_logging, Classroom, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    match cli.command {
        Some(Command::Config(ConfigCommand::Validate { file })) => {
            handle_validate(file.or(cli.config))
        }
        Some(Command::Config(ConfigCommand::Path)) => {
            println!("{}", Config::default_config_path().display());
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show { json })) => {
            let config = Config::load_from(cli.config).context("loading configuration")?;
            handle_show(&config, json)
        }
        Some(Command::Run) | None => {
            let config = Config::load_from(cli.config).context("loading configuration")?;
            run_console(&config).await
        }
    }
}

async fn run_console(config: &Config) -> anyhow::Result<()> {
    if !config.report.has_api_key() {
        warn!(
            env = API_KEY_ENV,
            "API key not set. Report generation will fail."
        );
    }

    let classroom = Classroom::from_config(config);
    let camera = CaptureSession::new(Arc::new(SyntheticCamera::new()), &config.camera);
    let reports = ReportGenerator::new(Arc::new(GeminiClient::from_config(&config.report)));
    info!(model = %config.report.model, "Starting attendance console");

    let mut console = Console::new(classroom, camera, reports, io::stdout());
    console.run(BufReader::new(tokio::io::stdin())).await?;
    Ok(())
}

fn handle_validate(path: Option<PathBuf>) -> anyhow::Result<()> {
    let shown = path.clone().unwrap_or_else(Config::default_config_path);
    match Config::load_from(path) {
        Ok(_) => {
            println!("Configuration is valid: {}", shown.display());
            Ok(())
        }
        Err(err) => Err(err).with_context(|| format!("{} is not valid", shown.display())),
    }
}

fn handle_show(config: &Config, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    println!("Current Configuration");
    println!("=====================");
    println!();
    println!("[Report]");
    println!(
        "  API key:            {}",
        if config.report.has_api_key() {
            "set"
        } else {
            "not set"
        }
    );
    println!("  Model:              {}", config.report.model);
    println!("  Endpoint:           {}", config.report.endpoint);
    println!("  Timeout (secs):     {}", config.report.timeout_secs);
    println!();
    println!("[Detection]");
    println!("  Tick interval (ms): {}", config.detection.tick_interval_ms);
    println!("  Notice (ms):        {}", config.detection.notice_duration_ms);
    println!(
        "  Seed:               {}",
        config
            .detection
            .seed
            .map_or_else(|| "random".to_string(), |seed| seed.to_string())
    );
    println!();
    println!("[Camera]");
    println!(
        "  Resolution:         {}x{}",
        config.camera.width, config.camera.height
    );
    println!("  JPEG quality:       {}", config.camera.jpeg_quality);
    Ok(())
}
