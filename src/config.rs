use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub twilio: TwilioConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub caps: CapsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub external_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub phone_number: String,
}

/// Which realtime provider backs new calls, and the credentials for both
/// (so a call can be created with either provider id without a restart).
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_provider")]
    pub default: String,
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default)]
    pub elevenlabs_api_key: String,
    #[serde(default)]
    pub elevenlabs_agent_id: String,
    #[serde(default = "default_voice")]
    pub default_voice: String,
    #[serde(default = "default_system_instructions")]
    pub default_system_instructions: String,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_voice() -> String {
    "sage".to_string()
}

fn default_system_instructions() -> String {
    "You are a helpful phone assistant. Keep responses brief and conversational.".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ApiConfig {
    /// Shared secret required on the control-plane query string. If empty,
    /// every control-plane request is rejected.
    #[serde(default)]
    pub secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CapsConfig {
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
    #[serde(default = "default_max_concurrent_outgoing")]
    pub max_concurrent_outgoing_calls: usize,
    #[serde(default = "default_max_concurrent_incoming")]
    pub max_concurrent_incoming_calls: usize,
    #[serde(default = "default_max_outgoing_duration")]
    pub max_outgoing_call_duration: u64,
    #[serde(default = "default_max_incoming_duration")]
    pub max_incoming_call_duration: u64,
}

impl Default for CapsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: default_max_concurrent_calls(),
            max_concurrent_outgoing_calls: default_max_concurrent_outgoing(),
            max_concurrent_incoming_calls: default_max_concurrent_incoming(),
            max_outgoing_call_duration: default_max_outgoing_duration(),
            max_incoming_call_duration: default_max_incoming_duration(),
        }
    }
}

fn default_max_concurrent_calls() -> usize {
    10
}
fn default_max_concurrent_outgoing() -> usize {
    5
}
fn default_max_concurrent_incoming() -> usize {
    5
}
fn default_max_outgoing_duration() -> u64 {
    600
}
fn default_max_incoming_duration() -> u64 {
    1800
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub sqlite_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { sqlite_path: default_db_path() }
    }
}

fn default_db_path() -> String {
    "calls.sqlite3".to_string()
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let env_path = config_dir().join(".env");
        match dotenvy::from_path(&env_path) {
            Ok(()) => tracing::info!("Loaded .env from {}", env_path.display()),
            Err(dotenvy::Error::Io(_)) => {
                tracing::debug!(
                    "No .env file at {}, using environment only",
                    env_path.display()
                );
            }
            Err(e) => tracing::warn!("Failed to parse .env: {e}"),
        }

        let path = config_path();
        tracing::info!("Loading config from {}", path.display());

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            format!(
                "Failed to read config at {}: {}. Copy config.example.toml to {}",
                path.display(),
                e,
                path.display()
            )
        })?;

        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(v) = std::env::var("TWILIO_ACCOUNT_SID") {
            config.twilio.account_sid = v;
        }
        if let Ok(v) = std::env::var("TWILIO_AUTH_TOKEN") {
            config.twilio.auth_token = v;
        }
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            config.provider.openai_api_key = v;
        }
        if let Ok(v) = std::env::var("ELEVENLABS_API_KEY") {
            config.provider.elevenlabs_api_key = v;
        }
        if let Ok(v) = std::env::var("API_SECRET") {
            config.api.secret = v;
        }
        if let Ok(v) = std::env::var("SERVER_EXTERNAL_URL") {
            config.server.external_url = v;
        }
        if let Some(v) = std::env::var("MAX_CONCURRENT_CALLS").ok().and_then(|s| s.parse().ok()) {
            config.caps.max_concurrent_calls = v;
        }
        if let Some(v) = std::env::var("MAX_CONCURRENT_OUTGOING_CALLS").ok().and_then(|s| s.parse().ok()) {
            config.caps.max_concurrent_outgoing_calls = v;
        }
        if let Some(v) = std::env::var("MAX_CONCURRENT_INCOMING_CALLS").ok().and_then(|s| s.parse().ok()) {
            config.caps.max_concurrent_incoming_calls = v;
        }
        if let Some(v) = std::env::var("MAX_OUTGOING_CALL_DURATION").ok().and_then(|s| s.parse().ok()) {
            config.caps.max_outgoing_call_duration = v;
        }
        if let Some(v) = std::env::var("MAX_INCOMING_CALL_DURATION").ok().and_then(|s| s.parse().ok()) {
            config.caps.max_incoming_call_duration = v;
        }

        Ok(config)
    }
}

fn config_dir() -> PathBuf {
    if let Ok(p) = std::env::var("VOICE_BRIDGE_CONFIG") {
        let path = PathBuf::from(p);
        return path.parent().map(|p| p.to_path_buf()).unwrap_or(path);
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".voice-bridge")
}

fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("VOICE_BRIDGE_CONFIG") {
        return PathBuf::from(p);
    }

    config_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_config_defaults_match_spec() {
        let caps = CapsConfig::default();
        assert_eq!(caps.max_concurrent_calls, 10);
        assert_eq!(caps.max_concurrent_outgoing_calls, 5);
        assert_eq!(caps.max_concurrent_incoming_calls, 5);
        assert_eq!(caps.max_outgoing_call_duration, 600);
        assert_eq!(caps.max_incoming_call_duration, 1800);
    }

    #[test]
    fn parses_minimal_toml() {
        let toml_src = r#"
            [server]
            host = "0.0.0.0"
            port = 8443
            external_url = "https://example.com"

            [twilio]
            account_sid = "AC123"
            auth_token = "secret"
            phone_number = "+15550001111"

            [provider]
        "#;
        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.provider.default, "openai");
        assert_eq!(config.provider.default_voice, "sage");
        assert_eq!(config.caps.max_concurrent_calls, 10);
    }
}
