//! Service wiring: configuration, backend selection, startup recovery.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::info;

use mc_api::AppState;
use mc_features::Dataset;
use mc_predict::PredictionDispatcher;
use mc_storage::Store;
use mc_train::TrainingBackend;
use mc_train_mock::MockBackend;
use mc_train_native::NativeBackend;
use mc_trainer::{JobConfig, JobManager, ModelRegistry};

pub const CONFIG_ENV: &str = "MATCHCAST_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "matchcast.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_dataset_path")]
    pub dataset_path: PathBuf,
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// 0 disables the limit.
    #[serde(default)]
    pub job_timeout_secs: u64,
    #[serde(default = "default_validation_fraction")]
    pub validation_fraction: f64,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_listen() -> String {
    "127.0.0.1:8000".into()
}
fn default_dataset_path() -> PathBuf {
    PathBuf::from("./seed/matches.csv")
}
fn default_backend() -> String {
    "native".into()
}
fn default_max_concurrent_jobs() -> usize {
    2
}
fn default_validation_fraction() -> f64 {
    0.2
}
fn default_log_filter() -> String {
    "info".into()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            listen: default_listen(),
            dataset_path: default_dataset_path(),
            backend: default_backend(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            job_timeout_secs: 0,
            validation_fraction: default_validation_fraction(),
            log_filter: default_log_filter(),
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            bail!("max_concurrent_jobs must be at least 1");
        }
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            bail!("validation_fraction must be in (0, 1)");
        }
        if !matches!(self.backend.as_str(), "native" | "mock") {
            bail!("unknown backend '{}': expected native or mock", self.backend);
        }
        Ok(())
    }

    pub fn job_config(&self) -> JobConfig {
        JobConfig {
            max_concurrent_jobs: self.max_concurrent_jobs,
            job_timeout: (self.job_timeout_secs > 0)
                .then(|| Duration::from_secs(self.job_timeout_secs)),
        }
    }
}

/// Read `$MATCHCAST_CONFIG`, else `./matchcast.toml`. A missing file means defaults.
pub fn load_config() -> Result<ServiceConfig> {
    let path = std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> Result<ServiceConfig> {
    let config = if path.exists() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parse {}", path.display()))?
    } else {
        ServiceConfig::default()
    };
    config.validate()?;
    Ok(config)
}

pub fn create_backend(config: &ServiceConfig) -> Arc<dyn TrainingBackend> {
    match config.backend.as_str() {
        "mock" => Arc::new(MockBackend::new()),
        _ => Arc::new(NativeBackend::new(config.validation_fraction)),
    }
}

/// Open storage, load the training table, restore persisted models and jobs,
/// and assemble the API state. The active model always starts unset.
pub async fn build_state(config: &ServiceConfig) -> Result<Arc<AppState>> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("create {}", config.data_dir.display()))?;
    let store = Arc::new(Store::open(&config.data_dir).context("open store")?);

    let dataset = Arc::new(
        Dataset::from_path(&config.dataset_path)
            .with_context(|| format!("load training table {}", config.dataset_path.display()))?,
    );

    let backend = create_backend(config);
    let registry = Arc::new(ModelRegistry::new(store.clone()));
    let restored = registry
        .load(backend.as_ref())
        .await
        .context("restore models")?;

    let jobs = JobManager::new(
        registry.clone(),
        backend,
        dataset.clone(),
        Some(store),
        config.job_config(),
    );
    let interrupted = jobs.recover().await.context("recover jobs")?;

    info!(
        models = restored,
        interrupted_jobs = interrupted,
        rows = dataset.len(),
        "state ready"
    );

    Ok(Arc::new(AppState {
        jobs,
        dispatcher: PredictionDispatcher::new(registry.clone()),
        registry,
        account_ids: dataset.account_ids(),
    }))
}
