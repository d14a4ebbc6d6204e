//! Command-line arguments for the `resource-dl` binary.

use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

use resource_dl::manifest::load_manifest;
use resource_dl::{Destination, Error, FetchConfig, ResourceRequest, Result};

/// Destination argument meaning "write the content to standard output"
pub const STDOUT_DEST: &str = "-";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "resource-dl", bin_name = "resource-dl")]
pub struct CliArgs {
    /// Retrieve LOCATOR into DEST ('-' for standard output); repeatable
    #[arg(long = "get", num_args = 2, value_names = ["LOCATOR", "DEST"], action = ArgAction::Append)]
    pub get: Vec<String>,

    /// JSON manifest listing requests
    #[arg(short, long, value_name = "FILE")]
    pub manifest: Option<PathBuf>,

    /// JSON configuration file; flags below override it
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Maximum simultaneous retrievals
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Maximum attempts per request, the first one included
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,

    /// Per-attempt timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<f64>,

    /// Whole-batch timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub batch_timeout: Option<f64>,

    /// User-Agent header for HTTP requests
    #[arg(long, value_name = "AGENT")]
    pub user_agent: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl CliArgs {
    /// Effective configuration: file (or defaults) with flag overrides applied
    pub fn fetch_config(&self) -> Result<FetchConfig> {
        let mut config = match &self.config {
            Some(path) => FetchConfig::from_json_file(path)?,
            None => FetchConfig::default(),
        };

        if let Some(concurrency) = self.concurrency {
            config.max_concurrency = concurrency;
        }
        if let Some(retries) = self.retries {
            config.retry.max_attempts = retries;
        }
        if let Some(secs) = self.timeout {
            config.attempt_timeout = seconds("timeout", secs)?;
        }
        if let Some(secs) = self.batch_timeout {
            config.batch_timeout = Some(seconds("batch_timeout", secs)?);
        }
        if let Some(agent) = &self.user_agent {
            config.user_agent = agent.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Requests from the manifest followed by `--get` pairs
    pub async fn requests(&self) -> Result<Vec<ResourceRequest>> {
        let mut requests = match &self.manifest {
            Some(path) => load_manifest(path).await?,
            None => Vec::new(),
        };

        requests.extend(self.get.chunks(2).filter_map(|pair| match pair {
            [locator, dest] if dest == STDOUT_DEST => Some(ResourceRequest::to_buffer(locator)),
            [locator, dest] => Some(ResourceRequest::to_path(locator, dest)),
            _ => None,
        }));

        if requests.is_empty() {
            return Err(Error::Config {
                message: "nothing to retrieve: pass --get LOCATOR DEST or --manifest FILE"
                    .to_string(),
                key: None,
            });
        }
        Ok(requests)
    }
}

/// Whether a request's content should be printed to standard output
pub fn prints_to_stdout(request: &ResourceRequest) -> bool {
    request.destination == Destination::Buffer
}

fn seconds(key: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| Error::config(key, format!("invalid duration {secs}: {e}")))
}
