//! Stash - a tagged blob store with a consistent metadata index.
//!
//! Serves the blob HTTP API and runs the garbage collector until SIGINT or
//! SIGTERM.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use common::tags::parse_duration;
use service::{CollectorConfig, Config};
use stash_object_store::ObjectStoreConfig;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum StorageKind {
    /// Payloads live in memory and vanish on exit
    Memory,
    /// Payloads are files under --storage-path
    Local,
    /// Payloads go to an S3-compatible bucket
    S3,
    /// Payloads go to an Azure Blob Storage container
    Azure,
}

/// Stash - tagged blob store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on for HTTP requests
    #[arg(short, long, env = "STASH_PORT", default_value = "3333")]
    port: u16,

    /// Path to SQLite database file. In-memory when not set
    #[arg(short, long, env = "STASH_DATABASE")]
    database: Option<PathBuf>,

    /// Where blob payloads are stored
    #[arg(long, env = "STASH_STORAGE", value_enum, default_value = "memory")]
    storage: StorageKind,

    /// Directory for payloads of the local storage backend
    #[arg(long, env = "STASH_STORAGE_PATH")]
    storage_path: Option<PathBuf>,

    /// S3 endpoint URL (e.g. http://localhost:9000 for MinIO)
    #[arg(long, env = "STASH_S3_ENDPOINT")]
    s3_endpoint: Option<String>,

    #[arg(long, env = "STASH_S3_BUCKET")]
    s3_bucket: Option<String>,

    #[arg(long, env = "STASH_S3_ACCESS_KEY")]
    s3_access_key: Option<String>,

    #[arg(long, env = "STASH_S3_SECRET_KEY", hide_env_values = true)]
    s3_secret_key: Option<String>,

    #[arg(long, env = "STASH_S3_REGION")]
    s3_region: Option<String>,

    /// Azure storage account name
    #[arg(long, env = "STASH_AZURE_ACCOUNT")]
    azure_account: Option<String>,

    #[arg(long, env = "STASH_AZURE_ACCESS_KEY", hide_env_values = true)]
    azure_access_key: Option<String>,

    #[arg(long, env = "STASH_AZURE_CONTAINER")]
    azure_container: Option<String>,

    /// Blob service endpoint, for Azurite or sovereign clouds
    #[arg(long, env = "STASH_AZURE_ENDPOINT")]
    azure_endpoint: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "STASH_LOG_LEVEL", default_value = "info")]
    log_level: tracing::Level,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, env = "STASH_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Trace every HTTP request
    #[arg(long, env = "STASH_LOG_REQUESTS", default_value_t = true, action = clap::ArgAction::Set)]
    log_requests: bool,

    /// Time between garbage collection passes (e.g. 30m)
    #[arg(long, env = "STASH_GC_INTERVAL", default_value = "30m", value_parser = parse_duration)]
    gc_interval: Duration,

    /// How long an upload may stay incomplete before it is collected
    #[arg(long, env = "STASH_GC_GRACE_PERIOD", default_value = "30m", value_parser = parse_duration)]
    gc_grace_period: Duration,

    /// Attempts per garbage collection pass
    #[arg(long, env = "STASH_GC_ATTEMPTS", default_value = "10")]
    gc_attempts: u32,

    /// Delay between failed garbage collection attempts
    #[arg(long, env = "STASH_GC_RETRY_DELAY", default_value = "30s", value_parser = parse_duration)]
    gc_retry_delay: Duration,
}

impl Args {
    fn storage_config(&self) -> Result<ObjectStoreConfig> {
        let config = match self.storage {
            StorageKind::Memory => ObjectStoreConfig::Memory,
            StorageKind::Local => ObjectStoreConfig::Local {
                path: self
                    .storage_path
                    .clone()
                    .context("--storage-path is required for local storage")?,
            },
            StorageKind::S3 => ObjectStoreConfig::S3 {
                endpoint: required(&self.s3_endpoint, "--s3-endpoint", "s3")?,
                access_key: required(&self.s3_access_key, "--s3-access-key", "s3")?,
                secret_key: required(&self.s3_secret_key, "--s3-secret-key", "s3")?,
                bucket: required(&self.s3_bucket, "--s3-bucket", "s3")?,
                region: self.s3_region.clone(),
            },
            StorageKind::Azure => ObjectStoreConfig::Azure {
                account: required(&self.azure_account, "--azure-account", "azure")?,
                access_key: required(&self.azure_access_key, "--azure-access-key", "azure")?,
                container: required(&self.azure_container, "--azure-container", "azure")?,
                endpoint: self.azure_endpoint.clone(),
            },
        };
        Ok(config)
    }

    fn into_config(self) -> Result<Config> {
        if self.gc_interval.is_zero() {
            bail!("--gc-interval must be greater than zero");
        }

        Ok(Config {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port),
            log_requests: self.log_requests,
            storage: self.storage_config()?,
            sqlite_path: self.database,
            collector: CollectorConfig {
                interval: self.gc_interval,
                grace_period: self.gc_grace_period,
                max_attempts: self.gc_attempts,
                retry_delay: self.gc_retry_delay,
            },
            log_level: self.log_level,
            log_dir: self.log_dir,
        })
    }
}

fn required(value: &Option<String>, flag: &str, backend: &str) -> Result<String> {
    value
        .clone()
        .with_context(|| format!("{} is required for {} storage", flag, backend))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().into_config()?;

    service::process::spawn_service(&config).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Args::try_parse_from(["stash"]).unwrap().into_config().unwrap();
        assert_eq!(config.listen_addr.port(), 3333);
        assert_eq!(config.storage, ObjectStoreConfig::Memory);
        assert_eq!(config.sqlite_path, None);
        assert!(config.log_requests);
        assert_eq!(config.collector, CollectorConfig::default());
    }

    #[test]
    fn test_local_storage_needs_path() {
        let args = Args::try_parse_from(["stash", "--storage", "local"]).unwrap();
        assert!(args.into_config().is_err());

        let config = Args::try_parse_from([
            "stash",
            "--storage",
            "local",
            "--storage-path",
            "/var/lib/stash",
            "--gc-interval",
            "5m",
            "--log-requests",
            "false",
        ])
        .unwrap()
        .into_config()
        .unwrap();
        assert_eq!(
            config.storage,
            ObjectStoreConfig::Local {
                path: PathBuf::from("/var/lib/stash")
            }
        );
        assert_eq!(config.collector.interval, Duration::from_secs(300));
        assert!(!config.log_requests);
    }

    #[test]
    fn test_azure_storage() {
        let args = Args::try_parse_from(["stash", "--storage", "azure", "--azure-account", "acct"])
            .unwrap();
        let err = args.into_config().unwrap_err();
        assert!(err.to_string().contains("--azure-access-key"));

        let config = Args::try_parse_from([
            "stash",
            "--storage",
            "azure",
            "--azure-account",
            "acct",
            "--azure-access-key",
            "a2V5",
            "--azure-container",
            "blobs",
        ])
        .unwrap()
        .into_config()
        .unwrap();
        assert_eq!(
            config.storage,
            ObjectStoreConfig::Azure {
                account: "acct".into(),
                access_key: "a2V5".into(),
                container: "blobs".into(),
                endpoint: None,
            }
        );
    }

    #[test]
    fn test_bad_duration_is_rejected() {
        assert!(Args::try_parse_from(["stash", "--gc-interval", "soon"]).is_err());
    }
}
