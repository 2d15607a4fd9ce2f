//! Configuration management using the prefer crate.
//!
//! Two layers: [`Settings`] describe the process environment (API endpoint,
//! local storage, state persistence) and are discovered from a config file
//! plus environment variables; [`ExportInput`] describes one export job.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dataset::DEFAULT_API_BASE_URL;
use crate::destination::ConnectionConfig;
use crate::error::{ExportError, ExportResult};
use crate::loader::state::DEFAULT_STATE_KEY;
use crate::loader::{DEFAULT_BATCH_SIZE, DEFAULT_PARALLEL_LOADS, DEFAULT_PERSIST_INTERVAL};
use crate::models::Record;

/// Default local storage directory.
pub const DEFAULT_STORAGE_DIR: &str = "./storage";

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT: u64 = 300;

/// Records per INSERT statement unless `rowSplit` or `MULTIROW` say otherwise.
pub const DEFAULT_ROW_SPLIT: usize = 10;

/// Key of the job input record in the local key-value store.
pub const DEFAULT_INPUT_KEY: &str = "INPUT";

/// Resolved process settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_base_url: String,
    pub token: Option<String>,
    /// Root of the local storage tree (datasets and key-value stores).
    pub storage_dir: PathBuf,
    pub key_value_store_id: Option<String>,
    /// Running on the platform (remote datasets and key-value store).
    pub is_at_home: bool,
    pub state_key: String,
    pub input_key: String,
    pub persist_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            token: None,
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            key_value_store_id: None,
            is_at_home: false,
            state_key: DEFAULT_STATE_KEY.to_string(),
            input_key: DEFAULT_INPUT_KEY.to_string(),
            persist_interval: DEFAULT_PERSIST_INTERVAL,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

impl Settings {
    /// Defaults, then the config file, then environment variables.
    pub fn resolve(config: &Config) -> Self {
        let mut settings = Self::default();
        let base_dir = config
            .base_dir()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        config.apply_to_settings(&mut settings, &base_dir);
        settings.apply_env(|key| std::env::var(key).ok());
        settings
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("APIFY_API_BASE_URL") {
            self.api_base_url = url;
        }
        if let Some(token) = non_empty("APIFY_TOKEN") {
            self.token = Some(token);
        }
        if let Some(dir) = non_empty("APIFY_LOCAL_STORAGE_DIR") {
            self.storage_dir = PathBuf::from(dir);
        }
        if let Some(store) = non_empty("APIFY_DEFAULT_KEY_VALUE_STORE_ID") {
            self.key_value_store_id = Some(store);
        }
        if let Some(at_home) = non_empty("APIFY_IS_AT_HOME") {
            self.is_at_home = matches!(at_home.trim(), "1" | "true" | "TRUE" | "True");
        }
        if let Some(key) = non_empty("APIFY_INPUT_KEY") {
            self.input_key = key;
        }
        if let Some(key) = non_empty("DSEXPORT_STATE_KEY") {
            self.state_key = key;
        }
        if let Some(secs) = non_empty("DSEXPORT_PERSIST_INTERVAL").and_then(|v| v.parse::<u64>().ok()) {
            self.persist_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = non_empty("DSEXPORT_REQUEST_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.request_timeout = Duration::from_secs(secs);
        }
    }

    /// Path of a record in the local default key-value store.
    pub fn local_record_path(&self, key: &str) -> PathBuf {
        self.storage_dir
            .join("key_value_stores")
            .join("default")
            .join(format!("{key}.json"))
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, prefer::FromValue)]
pub struct Config {
    /// Platform API base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[prefer(default)]
    pub api_base_url: Option<String>,
    /// API token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[prefer(default)]
    pub token: Option<String>,
    /// Local storage directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[prefer(default)]
    pub storage_dir: Option<String>,
    /// Key-value store that holds the loading state when running remotely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[prefer(default)]
    pub key_value_store_id: Option<String>,
    /// Key of the loading-state record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[prefer(default)]
    pub state_key: Option<String>,
    /// Seconds between loading-state flushes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[prefer(default)]
    pub persist_interval: Option<u64>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[prefer(default)]
    pub request_timeout: Option<u64>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    #[prefer(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers dsexport config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("dsexport").await {
            Ok(pref_config) => match Self::from_prefer(&pref_config) {
                Ok(config) => config,
                Err(e) => {
                    if let Some(path) = pref_config.source_path() {
                        tracing::warn!("Ignoring config file {}: {}", path.display(), e);
                    }
                    Self::default()
                }
            },
            // No config file found
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let pref_config = prefer::Config::load_from_path(&path.to_path_buf())
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        Self::from_prefer(&pref_config)
    }

    fn from_prefer(pref_config: &prefer::Config) -> Result<Self, String> {
        use prefer::FromValue;

        let mut config = Config::from_value(pref_config.data())
            .map_err(|e| format!("Invalid config: {}", e))?;
        config.source_path = pref_config.source_path().cloned();
        Ok(config)
    }

    /// Directory relative paths in the file are resolved against.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref url) = self.api_base_url {
            settings.api_base_url = url.clone();
        }
        if let Some(ref token) = self.token {
            settings.token = Some(token.clone());
        }
        if let Some(ref dir) = self.storage_dir {
            let path = Path::new(dir);
            settings.storage_dir = if path.is_absolute() {
                path.to_path_buf()
            } else {
                base_dir.join(path)
            };
        }
        if let Some(ref store) = self.key_value_store_id {
            settings.key_value_store_id = Some(store.clone());
        }
        if let Some(ref key) = self.state_key {
            settings.state_key = key.clone();
        }
        if let Some(secs) = self.persist_interval {
            settings.persist_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = self.request_timeout {
            settings.request_timeout = Duration::from_secs(secs);
        }
    }
}

fn parse_by_extension<T: serde::de::DeserializeOwned>(
    path: &Path,
    contents: &str,
) -> Result<T, String> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
    match ext {
        "toml" => toml::from_str(contents).map_err(|e| format!("Failed to parse TOML: {}", e)),
        "yaml" | "yml" => {
            serde_yaml::from_str(contents).map_err(|e| format!("Failed to parse YAML: {}", e))
        }
        _ => serde_json::from_str(contents).map_err(|e| format!("Failed to parse JSON: {}", e)),
    }
}

/// Run resource that produced the dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_dataset_id: Option<String>,
}

/// One export job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dataset_ids: Vec<String>,
    /// Webhook payload of a finished run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceRef>,
    /// Records to insert directly instead of reading a dataset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Record>>,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Record::is_empty")]
    pub static_param: Record,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exists_attr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_split: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_loads: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Only these fields are requested from the dataset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub debug_log: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_loading_state: Option<bool>,
}

impl ExportInput {
    /// Parse a job file (JSON, TOML or YAML by extension).
    pub async fn load_from_path(path: &Path) -> ExportResult<Self> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            ExportError::config(format!("cannot read input {}: {}", path.display(), e))
        })?;
        parse_by_extension(path, &contents)
            .map_err(|e| ExportError::config(format!("invalid input {}: {}", path.display(), e)))
    }

    /// Read the job from `path`, or from the local key-value store record.
    pub async fn load(path: Option<&Path>, settings: &Settings) -> ExportResult<Self> {
        match path {
            Some(path) => Self::load_from_path(path).await,
            None => {
                let record = settings.local_record_path(&settings.input_key);
                if !record.exists() {
                    return Err(ExportError::config(format!(
                        "no input given and {} does not exist",
                        record.display()
                    )));
                }
                Self::load_from_path(&record).await
            }
        }
    }

    /// Datasets to export, in the order given.
    ///
    /// `resource.defaultDatasetId` wins over `datasetId`; `datasetIds` is
    /// appended after either.
    pub fn dataset_ids(&self) -> Vec<String> {
        let primary = self
            .resource
            .as_ref()
            .and_then(|r| r.default_dataset_id.clone())
            .or_else(|| self.dataset_id.clone());

        let mut ids: Vec<String> = Vec::new();
        for id in primary.into_iter().chain(self.dataset_ids.iter().cloned()) {
            if !id.is_empty() && !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Fail fast on an unusable job.
    pub fn validate(&self) -> ExportResult<()> {
        if self.dataset_ids().is_empty() && self.rows.is_none() {
            return Err(ExportError::config(
                "missing `datasetId` or `rows` in input",
            ));
        }
        if !self.connection.is_usable() {
            return Err(ExportError::config(
                "missing `connection` in input or it has no `host`/`url`",
            ));
        }
        if self.table.as_deref().map_or(true, |t| t.trim().is_empty()) {
            return Err(ExportError::config("missing `table` in input"));
        }
        if self.row_split == Some(0) {
            return Err(ExportError::config("`rowSplit` must be at least 1"));
        }
        if self.batch_size == Some(0) {
            return Err(ExportError::config("`batchSize` must be at least 1"));
        }
        if self.parallel_loads == Some(0) {
            return Err(ExportError::config("`parallelLoads` must be at least 1"));
        }
        Ok(())
    }

    pub fn table(&self) -> &str {
        self.table.as_deref().unwrap_or_default()
    }

    /// Row-group size: `rowSplit`, then the `MULTIROW` variable, then the default.
    pub fn row_split(&self, multirow: Option<&str>) -> usize {
        self.row_split
            .or_else(|| multirow.and_then(|v| v.trim().parse().ok()))
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_ROW_SPLIT)
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }

    pub fn parallel_loads(&self) -> usize {
        self.parallel_loads.unwrap_or(DEFAULT_PARALLEL_LOADS)
    }

    pub fn persist_loading_state(&self) -> bool {
        self.persist_loading_state.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn input(json: &str) -> ExportInput {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_minimal_input_validates() {
        let job = input(
            r#"{"datasetId": "abc", "connection": {"host": "db"}, "table": "items"}"#,
        );
        job.validate().unwrap();
        assert_eq!(job.dataset_ids(), vec!["abc".to_string()]);
        assert_eq!(job.batch_size(), DEFAULT_BATCH_SIZE);
        assert_eq!(job.parallel_loads(), DEFAULT_PARALLEL_LOADS);
        assert!(job.persist_loading_state());
    }

    #[test]
    fn test_validation_failures() {
        let no_source = input(r#"{"connection": {"host": "db"}, "table": "t"}"#);
        assert!(no_source.validate().unwrap_err().to_string().contains("datasetId"));

        let no_host = input(r#"{"rows": [], "connection": {"user": "u"}, "table": "t"}"#);
        assert!(no_host.validate().unwrap_err().to_string().contains("connection"));

        let no_table = input(r#"{"rows": [], "connection": {"host": "db"}}"#);
        assert!(no_table.validate().unwrap_err().to_string().contains("table"));
    }

    #[test]
    fn test_resource_dataset_wins() {
        let job = input(
            r#"{"datasetId": "a", "datasetIds": ["b", "c", "b"], "resource": {"defaultDatasetId": "r"}}"#,
        );
        assert_eq!(job.dataset_ids(), vec!["r", "b", "c"]);
    }

    #[test]
    fn test_row_split_sources() {
        let job = ExportInput::default();
        assert_eq!(job.row_split(None), DEFAULT_ROW_SPLIT);
        assert_eq!(job.row_split(Some("25")), 25);
        assert_eq!(job.row_split(Some("zero")), DEFAULT_ROW_SPLIT);
        let job = input(r#"{"rowSplit": 3}"#);
        assert_eq!(job.row_split(Some("25")), 3);
    }

    #[test]
    fn test_static_param_order_preserved() {
        let job = input(r#"{"staticParam": {"z": 1, "a": "x"}}"#);
        let keys: Vec<&String> = job.static_param.keys().collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("APIFY_TOKEN", "secret"),
            ("APIFY_LOCAL_STORAGE_DIR", "/data/storage"),
            ("APIFY_IS_AT_HOME", "1"),
            ("DSEXPORT_PERSIST_INTERVAL", "5"),
            ("APIFY_API_BASE_URL", ""),
        ]
        .into_iter()
        .collect();
        let mut settings = Settings::default();
        settings.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.token.as_deref(), Some("secret"));
        assert_eq!(settings.storage_dir, PathBuf::from("/data/storage"));
        assert!(settings.is_at_home);
        assert_eq!(settings.persist_interval, Duration::from_secs(5));
        assert_eq!(settings.api_base_url, DEFAULT_API_BASE_URL);
    }

    #[test]
    fn test_config_relative_storage_dir() {
        let config = Config {
            storage_dir: Some("storage".to_string()),
            state_key: Some("MY-STATE".to_string()),
            ..Default::default()
        };
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, Path::new("/etc/dsexport"));
        assert_eq!(settings.storage_dir, PathBuf::from("/etc/dsexport/storage"));
        assert_eq!(settings.state_key, "MY-STATE");
        assert_eq!(
            settings.local_record_path("INPUT"),
            PathBuf::from("/etc/dsexport/storage/key_value_stores/default/INPUT.json")
        );
    }

    #[tokio::test]
    async fn test_config_file_loads_through_prefer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dsexport.toml");
        tokio::fs::write(
            &path,
            r#"
storage_dir = "data"
persist_interval = 30
"#,
        )
        .await
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.storage_dir.as_deref(), Some("data"));
        assert_eq!(config.persist_interval, Some(30));
        // Keys missing from the file stay unset
        assert!(config.token.is_none());
        assert!(config.state_key.is_none());
        assert_eq!(config.base_dir().as_deref(), Some(dir.path()));

        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, dir.path());
        assert_eq!(settings.storage_dir, dir.path().join("data"));
        assert_eq!(settings.persist_interval, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_load_toml_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.toml");
        tokio::fs::write(
            &path,
            r#"
datasetId = "abc"
table = "items"
existsAttr = "url"

[connection]
driver = "sqlite"
database = "/tmp/out.db"

[staticParam]
source = "crawler"
"#,
        )
        .await
        .unwrap();

        let job = ExportInput::load_from_path(&path).await.unwrap();
        job.validate().unwrap();
        assert_eq!(job.exists_attr.as_deref(), Some("url"));
        assert_eq!(job.static_param["source"], "crawler");
    }

    #[tokio::test]
    async fn test_input_falls_back_to_key_value_store() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            storage_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        assert!(ExportInput::load(None, &settings).await.is_err());

        let record = settings.local_record_path(DEFAULT_INPUT_KEY);
        tokio::fs::create_dir_all(record.parent().unwrap()).await.unwrap();
        tokio::fs::write(&record, r#"{"rows": [{"a": 1}], "table": "t"}"#)
            .await
            .unwrap();
        let job = ExportInput::load(None, &settings).await.unwrap();
        assert_eq!(job.rows.as_ref().map(Vec::len), Some(1));
    }
}
