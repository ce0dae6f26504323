use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use log::{error, info, warn};
use soilwatch::config::Config;
use soilwatch::error::ConfigError;
use soilwatch::scheduler::MonitoringScheduler;
use std::path::{Path, PathBuf};

/// Command-line arguments for the sensor monitor
#[derive(Parser)]
#[command(
    name = "soilwatch",
    about = "Soil moisture and water tank monitor with prioritized alerting",
    long_about = "Polls soil moisture and water tank sensors on a fixed interval, detects stuck, \
                  erratic and silent sensors, forecasts threshold crossings, and sends \
                  prioritized notifications through log, Telegram, email and digest channels."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Run a single monitoring tick and exit
    #[arg(long, help = "Run one tick, flush pending digests and exit")]
    once: bool,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files fall back to defaults in load_config
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        Ok(())
    }
}

/// Load configuration from file, or defaults with environment overrides
///
/// A missing or unreadable file falls back to defaults with a warning. A file
/// that exists but does not parse or validate is an error.
fn load_config(config_path: Option<&Path>) -> Result<Config, ConfigError> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            match Config::from_file(path) {
                Ok(config) => Ok(config),
                Err(ConfigError::ReadError(e)) => {
                    warn!("Configuration file not readable ({}), using defaults", e);
                    let config = Config::from_env();
                    config.validate()?;
                    Ok(config)
                }
                Err(e) => Err(e),
            }
        }
        None => {
            info!("Using default configuration");
            let config = Config::from_env();
            config.validate()?;
            Ok(config)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    let scheduler =
        MonitoringScheduler::from_config(config).context("Failed to initialize scheduler")?;

    if cli.once {
        let summary = scheduler.run_tick().await;
        scheduler.monitor().log_health();
        scheduler.flush_digest(Utc::now()).await;
        info!(
            "Single tick finished: {} findings dispatched, {} entity failures",
            summary.dispatched().count(),
            summary.failures.len()
        );
        return Ok(());
    }

    let handle = scheduler.start().context("Failed to start scheduler")?;

    // Set up signal handling for graceful shutdown (SIGINT)
    let stop_sender = handle.stop_sender();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), finishing current tick...");
        stop_sender.send_replace(true);
    })
    .context("Error setting SIGINT handler for graceful shutdown")?;

    info!("Sensor monitor is running. Press Ctrl+C to stop.");
    handle.join().await.context("Scheduler task failed")?;

    info!("Sensor monitor stopped");
    Ok(())
}

fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    } else if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    info!("Starting soilwatch");

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli)) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cli(config: Option<PathBuf>) -> Cli {
        Cli {
            config,
            verbose: false,
            once: false,
        }
    }

    #[test]
    fn test_cli_validation_with_existing_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]\ninterval_seconds = 60").unwrap();

        assert!(cli(Some(file.path().to_path_buf())).validate().is_ok());
    }

    #[test]
    fn test_cli_validation_with_missing_file() {
        // Should not fail - missing files are handled gracefully
        assert!(cli(Some(PathBuf::from("/nonexistent/config.toml")))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_cli_validation_with_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cli(Some(dir.path().to_path_buf())).validate().is_err());
    }

    #[test]
    fn test_cli_validation_no_config() {
        assert!(cli(None).validate().is_ok());
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::parse_from(["soilwatch", "--config", "monitor.toml", "--once", "-v"]);
        assert_eq!(cli.config, Some(PathBuf::from("monitor.toml")));
        assert!(cli.once);
        assert!(cli.verbose);
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/soilwatch.toml"))).unwrap();
        assert_eq!(config.entities.len(), 5);
    }

    #[test]
    fn test_load_config_rejects_invalid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]\ninterval_seconds = 0").unwrap();

        assert!(matches!(
            load_config(Some(file.path())),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[entities]]\nid = \"fern\"\n\n[[entities]]\nid = \"cistern\"\nkind = \"tank_level\""
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        let ids: Vec<String> = config.entities.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["fern".to_string(), "cistern".to_string()]);
    }
}
