use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Server bind configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    3000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

/// Realtime-inference service configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    pub openai_api_key: String,
    #[serde(default = "default_realtime_model")]
    pub openai_realtime_model: String,
    #[serde(default = "default_voice")]
    pub openai_voice: String,
    #[serde(default)]
    pub voice_agent_instructions: String,
}

fn default_realtime_model() -> String {
    "gpt-4o-realtime-preview".to_string()
}

fn default_voice() -> String {
    "alloy".to_string()
}

/// Datastore (Supabase/Postgres) configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct DatastoreConfig {
    pub supabase_url: String,
    pub supabase_service_role_key: String,
    #[serde(default)]
    pub supabase_anon_key: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

/// Carrier (telephony provider) configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct CarrierConfig {
    pub telnyx_api_key: String,
    pub telnyx_connection_id: String,
    #[serde(default)]
    pub telnyx_phone_number: String,
}

/// Deploy-time switch between the legacy per-turn agent path and the
/// realtime media-bridge path.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModeConfig {
    #[serde(default)]
    pub audio_bridge_url: Option<String>,
    #[serde(default)]
    pub audio_relay_url: Option<String>,
    /// Legacy per-turn agent endpoint, unused once `audio_bridge_url` is set.
    /// Not one of the named external variables; read from the same
    /// environment as everything else in this struct under
    /// `LEGACY_AGENT_TRIGGER_URL`.
    #[serde(default)]
    pub legacy_agent_trigger_url: Option<String>,
}

impl ModeConfig {
    /// The realtime path is active iff `AUDIO_BRIDGE_URL` is set.
    pub fn realtime_enabled(&self) -> bool {
        self.audio_bridge_url.is_some()
    }
}

/// Scheduled cleanup (transcript retention) configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CleanupConfig {
    #[serde(default)]
    pub cron_secret: String,
}

/// Root application configuration, assembled from the bridge's named
/// environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub inference: InferenceConfig,
    pub datastore: DatastoreConfig,
    pub carrier: CarrierConfig,
    #[serde(default)]
    pub mode: ModeConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Maps each fixed external environment variable name onto its logical
/// config path, since these don't follow a namespaced scheme the `config`
/// crate's `Environment` source understands directly.
const ENV_VAR_MAP: &[(&str, &str)] = &[
    ("PORT", "server.port"),
    ("BRIDGE_HOST", "server.host"),
    ("OPENAI_API_KEY", "inference.openai_api_key"),
    ("OPENAI_REALTIME_MODEL", "inference.openai_realtime_model"),
    ("OPENAI_VOICE", "inference.openai_voice"),
    ("VOICE_AGENT_INSTRUCTIONS", "inference.voice_agent_instructions"),
    ("SUPABASE_URL", "datastore.supabase_url"),
    ("SUPABASE_SERVICE_ROLE_KEY", "datastore.supabase_service_role_key"),
    ("SUPABASE_ANON_KEY", "datastore.supabase_anon_key"),
    ("TELNYX_API_KEY", "carrier.telnyx_api_key"),
    ("TELNYX_CONNECTION_ID", "carrier.telnyx_connection_id"),
    ("TELNYX_PHONE_NUMBER", "carrier.telnyx_phone_number"),
    ("AUDIO_BRIDGE_URL", "mode.audio_bridge_url"),
    ("AUDIO_RELAY_URL", "mode.audio_relay_url"),
    ("LEGACY_AGENT_TRIGGER_URL", "mode.legacy_agent_trigger_url"),
    ("CRON_SECRET", "cleanup.cron_secret"),
];

impl AppConfig {
    /// Load configuration from optional files, then the named environment
    /// variables above (which always win).
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));

        for (env_key, path) in ENV_VAR_MAP {
            if let Ok(value) = std::env::var(env_key) {
                builder = builder.set_override(*path, value)?;
            }
        }

        builder.build()?.try_deserialize()
    }

    /// Initialize the global config singleton. Fatal at startup if required
    /// fields are missing.
    pub fn init() -> Result<&'static Self, ConfigError> {
        let config = Self::load()?;
        Ok(CONFIG.get_or_init(|| config))
    }

    /// Get a reference to the global config.
    pub fn get() -> &'static Self {
        CONFIG.get().expect("AppConfig not initialized; call AppConfig::init() first")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_enabled_iff_audio_bridge_url_set() {
        let mut mode = ModeConfig::default();
        assert!(!mode.realtime_enabled());
        mode.audio_bridge_url = Some("wss://bridge.example.com".to_string());
        assert!(mode.realtime_enabled());
    }

    #[test]
    fn env_var_map_covers_every_known_variable() {
        let expected = [
            "PORT",
            "BRIDGE_HOST",
            "OPENAI_API_KEY",
            "OPENAI_REALTIME_MODEL",
            "OPENAI_VOICE",
            "VOICE_AGENT_INSTRUCTIONS",
            "SUPABASE_URL",
            "SUPABASE_SERVICE_ROLE_KEY",
            "SUPABASE_ANON_KEY",
            "TELNYX_API_KEY",
            "TELNYX_CONNECTION_ID",
            "TELNYX_PHONE_NUMBER",
            "AUDIO_BRIDGE_URL",
            "AUDIO_RELAY_URL",
            "LEGACY_AGENT_TRIGGER_URL",
            "CRON_SECRET",
        ];
        for key in expected {
            assert!(
                ENV_VAR_MAP.iter().any(|(k, _)| *k == key),
                "missing env var mapping for {key}"
            );
        }
    }
}
