use scriptbot_contracts::{ScriptEntry, ScriptFile};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SEND_API_URL: &str = "https://graph.facebook.com/v2.6/me/messages";
pub const DEFAULT_INITIAL_TRIGGER: &str = "INIT_0";
pub const DEFAULT_HELP_TEXT: &str = "You can type \"help\" at any time to see this message again. \
Tap one of the buttons to keep going, or type \"delete\" followed by what you want removed \
(name, goals, hobbies, joys, supporters or everything).";

pub const ENV_PAGE_ACCESS_TOKEN: &str = "SCRIPTBOT_PAGE_ACCESS_TOKEN";
pub const ENV_VERIFY_TOKEN: &str = "SCRIPTBOT_VERIFY_TOKEN";
pub const ENV_PAGE_ID: &str = "SCRIPTBOT_PAGE_ID";
pub const ENV_DEV_PASSWORD: &str = "SCRIPTBOT_DEV_PASSWORD";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
    #[error("script load failed: {0}")]
    Script(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Server,
    pub store: Store,
    pub messenger: Messenger,
    pub conversation: Conversation,
    #[serde(default)]
    pub crypto: Crypto,
    #[serde(default)]
    pub dev: Dev,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub listen_addr: String,
    #[serde(default)]
    pub privacy_policy_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    #[serde(rename = "type")]
    pub kind: String,
    pub sqlite_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Messenger {
    #[serde(default)]
    pub page_id: String,
    #[serde(default)]
    pub verify_token: String,
    #[serde(default)]
    pub page_access_token: String,
    #[serde(default = "default_send_api_url")]
    pub send_api_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub script_path: String,
    #[serde(default = "default_initial_trigger")]
    pub initial_trigger: String,
    #[serde(default = "default_chain_delay_ms")]
    pub chain_delay_ms: u64,
    #[serde(default = "default_help_text")]
    pub help_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Crypto {
    #[serde(default = "default_salt")]
    pub salt: String,
}

impl Default for Crypto {
    fn default() -> Self {
        Self {
            salt: default_salt(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dev {
    #[serde(default)]
    pub password: Option<String>,
}

fn default_send_api_url() -> String {
    DEFAULT_SEND_API_URL.to_string()
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_initial_trigger() -> String {
    DEFAULT_INITIAL_TRIGGER.to_string()
}

fn default_chain_delay_ms() -> u64 {
    2_000
}

fn default_help_text() -> String {
    DEFAULT_HELP_TEXT.to_string()
}

fn default_salt() -> String {
    "DSE".to_string()
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let mut cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

/// Secrets may be supplied through the environment instead of the file.
pub fn apply_env_overrides<F>(cfg: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup(ENV_PAGE_ACCESS_TOKEN) {
        cfg.messenger.page_access_token = v;
    }
    if let Some(v) = lookup(ENV_VERIFY_TOKEN) {
        cfg.messenger.verify_token = v;
    }
    if let Some(v) = lookup(ENV_PAGE_ID) {
        cfg.messenger.page_id = v;
    }
    if let Some(v) = lookup(ENV_DEV_PASSWORD) {
        cfg.dev.password = Some(v);
    }
}

pub fn load_script(path: &str) -> Result<Vec<ScriptEntry>, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Script(format!("read {path}: {e}")))?;
    let file: ScriptFile = serde_json::from_str(&text)
        .map_err(|e| ConfigError::Script(format!("parse {path}: {e}")))?;
    if file.entries.is_empty() {
        return Err(ConfigError::Script(format!("{path} has no script entries")));
    }
    Ok(file.entries)
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_path = [
        std::path::PathBuf::from("config/config.schema.json"),
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("config/config.schema.json"),
    ]
    .into_iter()
    .find(|p| p.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad(
            "config schema not found at config/config.schema.json or workspace config path"
                .to_string(),
        )
    })?;

    let schema_text =
        std::fs::read_to_string(schema_path).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let schema: serde_json::Value =
        serde_json::from_str(&schema_text).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

pub fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.store.kind != "memory" && cfg.store.kind != "sqlite" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "store.type={} is not implemented; supported: memory, sqlite",
            cfg.store.kind
        )));
    }
    if cfg.store.kind == "memory" && cfg.store.sqlite_path.is_some() {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is not supported when store.type=memory".to_string(),
        ));
    }
    if cfg.store.kind == "sqlite"
        && cfg
            .store
            .sqlite_path
            .as_ref()
            .map(|v| v.trim().is_empty())
            .unwrap_or(true)
    {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is required when store.type=sqlite".to_string(),
        ));
    }
    if cfg.messenger.page_id.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(format!(
            "messenger.page_id (or {ENV_PAGE_ID}) is required"
        )));
    }
    if cfg.messenger.verify_token.is_empty() {
        return Err(ConfigError::UnsupportedConfig(format!(
            "messenger.verify_token (or {ENV_VERIFY_TOKEN}) is required"
        )));
    }
    if cfg.messenger.page_access_token.is_empty() {
        return Err(ConfigError::UnsupportedConfig(format!(
            "messenger.page_access_token (or {ENV_PAGE_ACCESS_TOKEN}) is required"
        )));
    }
    if cfg.messenger.timeout_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "messenger.timeout_ms must be >= 1".to_string(),
        ));
    }
    if cfg.conversation.initial_trigger.is_empty() || cfg.conversation.initial_trigger.contains('-')
    {
        return Err(ConfigError::UnsupportedConfig(
            "conversation.initial_trigger must be a non-empty simple trigger".to_string(),
        ));
    }
    if cfg.crypto.salt.is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "crypto.salt must not be empty".to_string(),
        ));
    }
    Ok(())
}
