use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::db::DbConfig;
use crate::flow::ExecutorConfig;
use crate::orchestrator::{ContainerImages, OrchestratorTool};
use crate::polling::PollSettings;

/// Where stacks and events are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Postgres,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "postgres" => Ok(StoreKind::Postgres),
            other => bail!("unknown store kind '{other}', expected 'memory' or 'postgres'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub store: StoreKind,
    pub database: DbConfig,
    pub orchestrator: OrchestratorTool,
    pub images: ContainerImages,
    pub polling: PollSettings,
    /// Bound for awaiting an asynchronous cloud result.
    pub cloud_request_timeout: Duration,
    pub executor: ExecutorConfig,
    /// How often running stacks are synced with the cloud. Zero disables it.
    pub sync_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let listen_addr = parse(&var("STACKFLOW_LISTEN_ADDR", "127.0.0.1:8080"), "STACKFLOW_LISTEN_ADDR")?;
        let log_level = var("STACKFLOW_LOG_LEVEL", "info");

        let dev_mode = lookup("STACKFLOW_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let store = parse(&var("STACKFLOW_STORE", "memory"), "STACKFLOW_STORE")?;
        let database = DbConfig::from_env();

        // The mock is the only backend the binary links.
        let orchestrator = parse(&var("STACKFLOW_ORCHESTRATOR", "mock"), "STACKFLOW_ORCHESTRATOR")?;

        let defaults = ContainerImages::default();
        let images = ContainerImages {
            registrator: var("STACKFLOW_IMAGE_REGISTRATOR", &defaults.registrator),
            management: var("STACKFLOW_IMAGE_MANAGEMENT", &defaults.management),
            management_db: var("STACKFLOW_IMAGE_MANAGEMENT_DB", &defaults.management_db),
            watch: var("STACKFLOW_IMAGE_WATCH", &defaults.watch),
        };

        let poll_defaults = PollSettings::default();
        let interval_ms: u64 = match lookup("STACKFLOW_POLL_INTERVAL_MS") {
            Some(raw) => parse(&raw, "STACKFLOW_POLL_INTERVAL_MS")?,
            None => poll_defaults.interval.as_millis() as u64,
        };
        let max_attempts: u32 = match lookup("STACKFLOW_POLL_MAX_ATTEMPTS") {
            Some(raw) => parse(&raw, "STACKFLOW_POLL_MAX_ATTEMPTS")?,
            None => poll_defaults.max_attempts,
        };
        if max_attempts == 0 {
            bail!("STACKFLOW_POLL_MAX_ATTEMPTS must be at least 1");
        }
        let polling = PollSettings {
            interval: Duration::from_millis(interval_ms),
            max_attempts,
        };

        let timeout_secs: u64 = parse(
            &var("STACKFLOW_CLOUD_REQUEST_TIMEOUT_SECS", "3600"),
            "STACKFLOW_CLOUD_REQUEST_TIMEOUT_SECS",
        )?;

        let executor_defaults = ExecutorConfig::default();
        let workers: usize = match lookup("STACKFLOW_WORKERS") {
            Some(raw) => parse(&raw, "STACKFLOW_WORKERS")?,
            None => executor_defaults.workers,
        };
        let queue_capacity: usize = match lookup("STACKFLOW_QUEUE_CAPACITY") {
            Some(raw) => parse(&raw, "STACKFLOW_QUEUE_CAPACITY")?,
            None => executor_defaults.queue_capacity,
        };
        if workers == 0 || queue_capacity == 0 {
            bail!("STACKFLOW_WORKERS and STACKFLOW_QUEUE_CAPACITY must be positive");
        }

        let sync_secs: u64 = parse(&var("STACKFLOW_SYNC_INTERVAL_SECS", "60"), "STACKFLOW_SYNC_INTERVAL_SECS")?;

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            store,
            database,
            orchestrator,
            images,
            polling,
            cloud_request_timeout: Duration::from_secs(timeout_secs),
            executor: ExecutorConfig {
                workers,
                queue_capacity,
            },
            sync_interval: Duration::from_secs(sync_secs),
        })
    }
}

fn parse<T>(raw: &str, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("invalid value for {key}: '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{OrchestratorError, OrchestratorRegistry};
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:8080");
        assert!(!config.dev_mode);
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.orchestrator, OrchestratorTool::Mock);
        assert_eq!(config.polling, PollSettings::default());
        assert_eq!(config.cloud_request_timeout, Duration::from_secs(3600));
        assert_eq!(config.executor, ExecutorConfig::default());
        assert_eq!(config.images, ContainerImages::default());
    }

    #[test]
    fn test_default_orchestrator_is_built_in() {
        for vars in [&[][..], &[("STACKFLOW_DEV", "true")][..]] {
            let config = config(vars).unwrap();
            assert!(OrchestratorRegistry::builtin()
                .resolve(config.orchestrator)
                .is_ok());
        }
    }

    #[test]
    fn test_unlinked_orchestrator_is_rejected_at_resolve() {
        let config = config(&[("STACKFLOW_ORCHESTRATOR", "swarm")]).unwrap();
        assert_eq!(config.orchestrator, OrchestratorTool::Swarm);
        assert!(matches!(
            OrchestratorRegistry::builtin().resolve(config.orchestrator),
            Err(OrchestratorError::NotRegistered(OrchestratorTool::Swarm))
        ));
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("STACKFLOW_STORE", "postgres"),
            ("STACKFLOW_POLL_INTERVAL_MS", "250"),
            ("STACKFLOW_POLL_MAX_ATTEMPTS", "7"),
            ("STACKFLOW_WORKERS", "3"),
            ("STACKFLOW_IMAGE_WATCH", "watch:1"),
        ])
        .unwrap();
        assert_eq!(config.store, StoreKind::Postgres);
        assert_eq!(config.polling.interval, Duration::from_millis(250));
        assert_eq!(config.polling.max_attempts, 7);
        assert_eq!(config.executor.workers, 3);
        assert_eq!(config.images.watch, "watch:1");
    }

    #[test]
    fn test_invalid_values_fail() {
        let err = config(&[("STACKFLOW_POLL_INTERVAL_MS", "soon")]).unwrap_err();
        assert!(format!("{err:#}").contains("STACKFLOW_POLL_INTERVAL_MS"));

        assert!(config(&[("STACKFLOW_STORE", "redis")]).is_err());
        assert!(config(&[("STACKFLOW_ORCHESTRATOR", "kubernetes")]).is_err());
        assert!(config(&[("STACKFLOW_POLL_MAX_ATTEMPTS", "0")]).is_err());
        assert!(config(&[("STACKFLOW_QUEUE_CAPACITY", "0")]).is_err());
    }
}
