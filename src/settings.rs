use serde::Deserialize;

use crate::error::SettingsError;

/// Environment variables override the file, e.g. `CAR_ADVISOR__LLM__MODEL`.
pub const ENV_PREFIX: &str = "CAR_ADVISOR";

/// Idle sessions are dropped after this long.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 60;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub data: DataSettings,
    pub llm: LlmSettings,
    pub conversation: ConversationSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub catalog_file: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            catalog_file: "data/cars.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub timeout_ms: u64,
    pub temperature: Option<f32>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            timeout_ms: 30_000,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversationSettings {
    /// Ask the model for 1-2 sentence replies.
    pub concise: bool,
    pub history_limit: usize,
    pub top_matches: usize,
    pub similar_limit: usize,
    pub currency: String,
    pub session_ttl_secs: u64,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            concise: false,
            history_limit: 10,
            top_matches: 3,
            similar_limit: 3,
            currency: "$".to_string(),
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
        }
    }
}

impl Settings {
    /// Loads `name` (any format the `config` crate knows, extension optional)
    /// and overlays the environment. A missing file yields the defaults.
    pub fn load(name: &str) -> Result<Self, SettingsError> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::with_name(name).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.llm.timeout_ms == 0 {
            return Err(SettingsError::Invalid("llm.timeout_ms must be positive".into()));
        }
        if self.conversation.history_limit == 0 {
            return Err(SettingsError::Invalid(
                "conversation.history_limit must be positive".into(),
            ));
        }
        if self.conversation.session_ttl_secs == 0 {
            return Err(SettingsError::Invalid(
                "conversation.session_ttl_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}
