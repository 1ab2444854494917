use std::env;
use std::path::{Path, PathBuf};

/// Overrides the data directory (models, history, saved images).
pub const HOME_ENV: &str = "GREENGUARDIAN_HOME";
pub const ASSISTANT_URL_ENV: &str = "GREENGUARDIAN_ASSISTANT_URL";
pub const ASSISTANT_MODEL_ENV: &str = "GREENGUARDIAN_ASSISTANT_MODEL";
pub const ASSISTANT_KEY_ENV: &str = "GREENGUARDIAN_ASSISTANT_API_KEY";

const HISTORY_FILE: &str = "history.csv";
const IMAGES_DIR: &str = "saved_images";

/// Where the chat assistant sends its questions.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantConfig {
    /// OpenAI-compatible chat completions endpoint
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/v1/chat/completions".to_string(),
            model: "mistral".to_string(),
            api_key: None,
            max_tokens: 250,
            temperature: 0.7,
        }
    }
}

impl AssistantConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            endpoint: env::var(ASSISTANT_URL_ENV).unwrap_or(defaults.endpoint),
            model: env::var(ASSISTANT_MODEL_ENV).unwrap_or(defaults.model),
            api_key: env::var(ASSISTANT_KEY_ENV).ok().filter(|k| !k.is_empty()),
            ..defaults
        }
    }
}

/// Application paths and collaborator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub home: PathBuf,
    pub assistant: AssistantConfig,
}

impl AppConfig {
    /// Resolves everything from the environment.
    pub fn from_env() -> Self {
        Self {
            home: Self::default_home(),
            assistant: AssistantConfig::from_env(),
        }
    }

    /// Uses an explicit data directory, other settings from the environment.
    pub fn with_home(home: impl AsRef<Path>) -> Self {
        Self {
            home: home.as_ref().to_path_buf(),
            assistant: AssistantConfig::from_env(),
        }
    }

    /// Returns the default data directory
    pub fn default_home() -> PathBuf {
        // 1. Check environment variable
        if let Ok(path) = env::var(HOME_ENV) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }

        // 2. Use platform-specific data directory
        if let Some(data_dir) = dirs::data_dir() {
            return data_dir.join("greenguardian");
        }

        // 3. Fallback to user's home directory
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(".local").join("share").join("greenguardian");
        }

        // 4. If all else fails, use system temp directory
        env::temp_dir().join("greenguardian")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.home.join("models")
    }

    pub fn history_file(&self) -> PathBuf {
        self.home.join(HISTORY_FILE)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.home.join(IMAGES_DIR)
    }
}
