use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use parley_llm::{
    ClientConfig, DEFAULT_API_URL, DEFAULT_MAX_RETRIES, DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT,
    DEFAULT_TIMEOUT_MS, OfflineResponder,
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "parley";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "parley.db";
pub const ENV_PREFIX: &str = "PARLEY_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub use_offline_responder: bool,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Appended to the system prompt when a question looks repository related.
    #[serde(default)]
    pub repository_context: Option<String>,
    #[serde(default = "default_offline_delay_ms")]
    pub offline_delay_ms: u64,
    #[serde(default = "default_persist_history")]
    pub persist_history: bool,
    /// Snapshot database location. Falls back to the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: default_api_url(),
            model: default_model(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            use_offline_responder: false,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            system_prompt: default_system_prompt(),
            repository_context: None,
            offline_delay_ms: default_offline_delay_ms(),
            persist_history: default_persist_history(),
            database_path: None,
        }
    }
}

impl Settings {
    pub fn normalized(mut self) -> Self {
        self.api_key = self.api_key.trim().to_string();
        self.api_url = non_blank_or(self.api_url, default_api_url);
        self.model = non_blank_or(self.model, default_model);
        self.system_prompt = non_blank_or(self.system_prompt, default_system_prompt);
        self.repository_context = self
            .repository_context
            .map(|context| context.trim().to_string())
            .filter(|context| !context.is_empty());
        if self.timeout_ms == 0 {
            self.timeout_ms = default_timeout_ms();
        }
        if self.max_tokens == 0 {
            self.max_tokens = default_max_tokens();
        }
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.top_p = self.top_p.clamp(0.0, 1.0);
        self
    }

    /// Offline mode is forced by the flag or implied by a missing credential.
    pub fn is_offline(&self) -> bool {
        self.use_offline_responder || self.api_key.trim().is_empty()
    }

    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            api_key: self.api_key.clone(),
            api_url: self.api_url.clone(),
            model: self.model.clone(),
            timeout_ms: self.timeout_ms,
            max_retries: self.max_retries,
            use_offline_responder: self.use_offline_responder,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            system_prompt: self.system_prompt.clone(),
            repository_context: self.repository_context.clone(),
            offline_delay_ms: self.offline_delay_ms,
        }
    }

    pub fn database_location(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| default_data_dir().join(DATABASE_FILE_NAME))
    }
}

/// Reads `path` (when present) over the defaults, then `PARLEY_*` variables over both.
pub fn load_settings(path: &Path) -> Result<Settings, SettingsError> {
    let mut figment = Figment::from(Serialized::defaults(Settings::default()));
    if path.exists() {
        figment = figment.merge(Json::file(path));
    } else {
        tracing::info!(path = %path.display(), "settings file not found, using defaults");
    }

    figment
        .merge(Env::prefixed(ENV_PREFIX))
        .extract::<Settings>()
        .map(Settings::normalized)
        .map_err(Box::new)
        .context(ExtractSnafu {
            stage: "extract-settings",
            path: path.to_path_buf(),
        })
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<Settings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".parley"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: Settings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &Path) -> Settings {
        match load_settings(path) {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to load settings, using defaults"
                );
                Settings::default()
            }
        }
    }

    fn persist(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = %self.config_path.display(), "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to read settings from {path:?} on `{stage}`: {source}"))]
    Extract {
        stage: &'static str,
        path: PathBuf,
        source: Box<figment::Error>,
    },
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

/// Used when the settings file does not name a database.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".parley"))
}

fn non_blank_or(value: String, fallback: fn() -> String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback()
    } else {
        trimmed.to_string()
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_max_tokens() -> u32 {
    1_024
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    1.0
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_offline_delay_ms() -> u64 {
    OfflineResponder::DEFAULT_DELAY.as_millis() as u64
}

fn default_persist_history() -> bool {
    true
}
