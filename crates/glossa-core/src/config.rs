use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::fs;
use tokio::sync::RwLock;

use crate::guard::CommitRetry;
use crate::tasks::TaskPollSettings;
use crate::{DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: format!("http://{DEFAULT_SERVER_HOST}:{DEFAULT_SERVER_PORT}"),
            api_token: None,
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub enabled: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Present means enabled unless `enabled` is false; absent disables retry.
/// `timeout_ms` of 0 retries without a deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitRetryConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub max_interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for CommitRetryConfig {
    fn default() -> Self {
        let retry = CommitRetry::default();
        Self {
            enabled: true,
            interval_ms: retry.interval.as_millis() as u64,
            max_interval_ms: retry.max_interval.as_millis() as u64,
            timeout_ms: retry.timeout.map_or(0, |timeout| timeout.as_millis() as u64),
        }
    }
}

impl CommitRetryConfig {
    pub fn retry(&self) -> Option<CommitRetry> {
        self.enabled.then(|| CommitRetry {
            interval: Duration::from_millis(self.interval_ms.max(1)),
            max_interval: Duration::from_millis(self.max_interval_ms.max(self.interval_ms)),
            timeout: Some(self.timeout_ms)
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        })
    }
}

/// `timeout_ms` of 0 or absent means wait without a deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    pub interval_ms: u64,
    pub max_interval_ms: u64,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl PollSettings {
    pub fn task_settings(&self) -> TaskPollSettings {
        TaskPollSettings {
            interval: Duration::from_millis(self.interval_ms.max(1)),
            max_interval: Duration::from_millis(self.max_interval_ms.max(self.interval_ms)),
            timeout: self
                .timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    pub batch_translation: PollSettings,
    pub project_creation: PollSettings,
    pub search: PollSettings,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            batch_translation: PollSettings {
                interval_ms: 1_000,
                max_interval_ms: 10_000,
                timeout_ms: None,
            },
            project_creation: PollSettings {
                interval_ms: 500,
                max_interval_ms: 5_000,
                timeout_ms: Some(120_000),
            },
            search: PollSettings {
                interval_ms: 250,
                max_interval_ms: 2_000,
                timeout_ms: Some(30_000),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReviewConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub commit_retry: Option<CommitRetryConfig>,
    #[serde(default)]
    pub polling: PollingConfig,
}

impl ReviewConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms.max(1))
    }

    pub fn commit_retry(&self) -> Option<CommitRetry> {
        self.commit_retry.as_ref().and_then(CommitRetryConfig::retry)
    }
}

#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    global: Value,
    project: Value,
    env: Value,
    cli: Value,
}

/// Layered JSON configuration: defaults, global file, project file,
/// environment, then CLI overrides. Later layers win; `null` never overrides.
#[derive(Clone)]
pub struct ConfigStore {
    project_path: PathBuf,
    global_path: PathBuf,
    layers: Arc<RwLock<ConfigLayers>>,
}

impl ConfigStore {
    pub async fn new(
        project_path: impl AsRef<Path>,
        cli_overrides: Option<Value>,
    ) -> anyhow::Result<Self> {
        let global_path = resolve_global_config_path();
        Self::with_paths(
            project_path.as_ref().to_path_buf(),
            global_path,
            env_layer_from(|key| std::env::var(key).ok()),
            cli_overrides,
        )
        .await
    }

    pub async fn with_paths(
        project_path: PathBuf,
        global_path: PathBuf,
        env: Value,
        cli_overrides: Option<Value>,
    ) -> anyhow::Result<Self> {
        let global = read_json_file(&global_path).await?;
        let project = read_json_file(&project_path).await?;
        Ok(Self {
            project_path,
            global_path,
            layers: Arc::new(RwLock::new(ConfigLayers {
                global,
                project,
                env,
                cli: cli_overrides.unwrap_or_else(empty_object),
            })),
        })
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn global_path(&self) -> &Path {
        &self.global_path
    }

    pub async fn get(&self) -> ReviewConfig {
        let merged = self.get_effective_value().await;
        serde_json::from_value(merged).unwrap_or_default()
    }

    pub async fn get_effective_value(&self) -> Value {
        let layers = self.layers.read().await.clone();
        let mut merged =
            serde_json::to_value(ReviewConfig::default()).unwrap_or_else(|_| empty_object());
        deep_merge(&mut merged, &layers.global);
        deep_merge(&mut merged, &layers.project);
        deep_merge(&mut merged, &layers.env);
        deep_merge(&mut merged, &layers.cli);
        merged
    }

    pub async fn get_layers_value(&self) -> Value {
        let layers = self.layers.read().await;
        json!({
            "global": layers.global,
            "project": layers.project,
            "env": redacted(&layers.env),
            "cli": redacted(&layers.cli),
        })
    }

    pub async fn patch_project(&self, patch: Value) -> anyhow::Result<Value> {
        {
            let mut layers = self.layers.write().await;
            deep_merge(&mut layers.project, &patch);
        }
        self.save_project().await?;
        Ok(self.get_effective_value().await)
    }

    async fn save_project(&self) -> anyhow::Result<()> {
        let snapshot = self.layers.read().await.project.clone();
        write_json_file(&self.project_path, &snapshot).await
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

async fn write_json_file(path: &Path, value: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut to_write = value.clone();
    strip_persisted_secrets(&mut to_write);
    let raw = serde_json::to_string_pretty(&to_write)?;
    fs::write(path, raw).await?;
    Ok(())
}

fn strip_persisted_secrets(value: &mut Value) {
    if let Some(server) = value.get_mut("server").and_then(|v| v.as_object_mut()) {
        server.remove("api_token");
        server.remove("apiToken");
    }
}

fn redacted(value: &Value) -> Value {
    let mut copy = value.clone();
    if let Some(server) = copy.get_mut("server").and_then(|v| v.as_object_mut()) {
        if server.contains_key("api_token") {
            server.insert("api_token".to_string(), json!("[redacted]"));
        }
    }
    copy
}

async fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    if !path.exists() {
        return Ok(empty_object());
    }
    let raw = fs::read_to_string(path).await?;
    Ok(serde_json::from_str::<Value>(&raw).unwrap_or_else(|_| empty_object()))
}

fn resolve_global_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("GLOSSA_GLOBAL_CONFIG") {
        return PathBuf::from(path);
    }
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("glossa").join("config.json");
    }
    PathBuf::from(".glossa/global_config.json")
}

pub fn env_layer_from(lookup: impl Fn(&str) -> Option<String>) -> Value {
    let mut root = empty_object();

    if let Some(url) = lookup("GLOSSA_SERVER_URL") {
        if !url.trim().is_empty() {
            deep_merge(
                &mut root,
                &json!({ "server": { "base_url": url.trim().trim_end_matches('/') } }),
            );
        }
    }
    if let Some(token) = lookup("GLOSSA_API_TOKEN") {
        if !token.trim().is_empty() {
            deep_merge(&mut root, &json!({ "server": { "api_token": token.trim() } }));
        }
    }
    if let Some(raw) = lookup("GLOSSA_REQUEST_TIMEOUT_MS") {
        if let Ok(ms) = raw.trim().parse::<u64>() {
            deep_merge(&mut root, &json!({ "server": { "request_timeout_ms": ms } }));
        }
    }
    if let Some(raw) = lookup("GLOSSA_VALIDATION_ENABLED") {
        if let Some(enabled) = parse_bool_like(&raw) {
            deep_merge(&mut root, &json!({ "validation": { "enabled": enabled } }));
        }
    }

    root
}

fn parse_bool_like(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Value {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        env_layer_from(|key| vars.get(key).cloned())
    }

    #[tokio::test]
    async fn defaults_apply_without_any_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::with_paths(
            dir.path().join("project.json"),
            dir.path().join("global.json"),
            empty_object(),
            None,
        )
        .await
        .expect("store");
        let config = store.get().await;
        assert_eq!(config, ReviewConfig::default());
        assert!(config.validation.enabled);
        assert_eq!(config.commit_retry(), None);
        assert_eq!(
            config.polling.batch_translation.task_settings().timeout,
            None
        );
        assert_eq!(
            config.polling.search.task_settings().timeout,
            Some(Duration::from_secs(30))
        );
    }

    #[tokio::test]
    async fn layers_merge_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let global = dir.path().join("global.json");
        let project = dir.path().join("project.json");
        std::fs::write(
            &global,
            r#"{"server":{"base_url":"http://global:1"},"polling":{"search":{"interval_ms":50}}}"#,
        )
        .expect("write global");
        std::fs::write(
            &project,
            r#"{"server":{"base_url":"http://project:2"},"commit_retry":{"interval_ms":10,"max_interval_ms":80,"timeout_ms":1000}}"#,
        )
        .expect("write project");

        let store = ConfigStore::with_paths(
            project,
            global,
            env(&[
                ("GLOSSA_VALIDATION_ENABLED", "off"),
                ("GLOSSA_REQUEST_TIMEOUT_MS", "900"),
            ]),
            Some(json!({ "server": { "base_url": "http://cli:3/" } })),
        )
        .await
        .expect("store");
        let config = store.get().await;
        assert_eq!(config.server.base_url, "http://cli:3/");
        assert_eq!(config.server.request_timeout_ms, 900);
        assert!(!config.validation.enabled);
        assert_eq!(config.polling.search.interval_ms, 50);
        assert_eq!(config.polling.search.max_interval_ms, 2_000);
        let retry = config.commit_retry().expect("retry enabled");
        assert_eq!(retry.interval, Duration::from_millis(10));
        assert_eq!(retry.timeout, Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn commit_retry_can_be_switched_off_by_a_later_layer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let global = dir.path().join("global.json");
        std::fs::write(
            &global,
            r#"{"commit_retry":{"interval_ms":10,"max_interval_ms":80,"timeout_ms":1000}}"#,
        )
        .expect("write global");
        let store = ConfigStore::with_paths(
            dir.path().join("project.json"),
            global,
            empty_object(),
            Some(json!({ "commit_retry": { "enabled": false } })),
        )
        .await
        .expect("store");
        assert_eq!(store.get().await.commit_retry(), None);
    }

    #[tokio::test]
    async fn empty_commit_retry_section_enables_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::with_paths(
            dir.path().join("project.json"),
            dir.path().join("global.json"),
            empty_object(),
            Some(json!({ "commit_retry": {} })),
        )
        .await
        .expect("store");
        assert_eq!(
            store.get().await.commit_retry(),
            Some(CommitRetry::default())
        );
    }

    #[test]
    fn zero_commit_timeout_means_no_deadline() {
        let retry = CommitRetryConfig {
            timeout_ms: 0,
            ..Default::default()
        }
        .retry()
        .expect("retry enabled");
        assert_eq!(retry.timeout, None);
        assert_eq!(CommitRetryConfig::default().timeout_ms, 15_000);
    }

    #[tokio::test]
    async fn project_saves_never_persist_the_api_token() {
        let dir = tempfile::tempdir().expect("tempdir");
        let project = dir.path().join("nested").join("project.json");
        let store = ConfigStore::with_paths(
            project.clone(),
            dir.path().join("global.json"),
            empty_object(),
            None,
        )
        .await
        .expect("store");
        let effective = store
            .patch_project(json!({
                "server": { "base_url": "http://review:8080", "api_token": "secret-token" }
            }))
            .await
            .expect("patch");
        assert_eq!(effective["server"]["api_token"], "secret-token");

        let raw = std::fs::read_to_string(&project).expect("read project");
        assert!(raw.contains("http://review:8080"));
        assert!(!raw.contains("secret-token"));
    }

    #[test]
    fn env_layer_reads_known_variables() {
        let layer = env(&[
            ("GLOSSA_SERVER_URL", "http://localhost:9000/"),
            ("GLOSSA_API_TOKEN", " tk "),
            ("GLOSSA_REQUEST_TIMEOUT_MS", "not-a-number"),
        ]);
        assert_eq!(layer["server"]["base_url"], "http://localhost:9000");
        assert_eq!(layer["server"]["api_token"], "tk");
        assert!(layer["server"].get("request_timeout_ms").is_none());
        assert!(layer.get("validation").is_none());
    }

    #[test]
    fn layers_view_redacts_tokens() {
        let view = redacted(&json!({ "server": { "api_token": "abc" } }));
        assert_eq!(view["server"]["api_token"], "[redacted]");
    }
}
