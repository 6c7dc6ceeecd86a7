//! Configuration system (layered: code > env > settings file).

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{Result, StewardError};
use crate::models::{DEFAULT_GEMINI_FLASH_MODEL, DEFAULT_GEMINI_MODEL};
use crate::util::retry::RetryPolicy;

const SETTINGS_FILE_NAME: &str = "settings.toml";
/// Fraction of the context window at which history gets compressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: f64 = 0.7;
/// Fraction of the history (by serialized size) kept verbatim when compressing.
pub const DEFAULT_COMPRESSION_PRESERVE_FRACTION: f64 = 0.3;

/// Policy controlling whether tool execution requires human confirmation.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase", ascii_case_insensitive)]
pub enum ApprovalMode {
    /// Ask before every tool that requests confirmation.
    #[default]
    Default,
    /// Edits are auto-approved; everything else still asks.
    AutoEdit,
    /// Nothing asks.
    Yolo,
}

/// Asked whether to switch from `current` to `fallback` after persistent
/// rate limiting. Resolves to `true` to accept the switch.
pub type FallbackHandler =
    Arc<dyn Fn(String, String, String) -> BoxFuture<'static, bool> + Send + Sync>;

/// On-disk settings (`~/.steward/settings.toml`). Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub model: Option<String>,
    pub approval_mode: Option<ApprovalMode>,
    pub max_session_turns: Option<usize>,
    pub base_url: Option<String>,
    pub error_report_dir: Option<PathBuf>,
    pub compression: CompressionSettings,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompressionSettings {
    pub threshold: Option<f64>,
    pub preserve_fraction: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|e| StewardError::Configuration(format!("invalid settings file: {e}")))
    }

    /// Read settings from a file. A missing file yields empty settings.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Layered configuration shared by the session, chat and scheduler.
///
/// Cloning is cheap; mutable state (model, approval mode, fallback flag) is
/// shared between clones so a fallback or mode flip is seen everywhere.
#[derive(Clone)]
pub struct StewardConfig {
    model: Arc<RwLock<String>>,
    approval_mode: Arc<RwLock<ApprovalMode>>,
    fallback_mode: Arc<RwLock<bool>>,
    fallback_handler: Arc<RwLock<Option<FallbackHandler>>>,
    api_key: Option<String>,
    base_url: Option<String>,
    session_id: String,
    max_session_turns: Option<usize>,
    compression_threshold: f64,
    compression_preserve_fraction: f64,
    retry_policy: RetryPolicy,
    error_report_dir: Option<PathBuf>,
}

impl fmt::Debug for StewardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StewardConfig")
            .field("model", &self.model())
            .field("approval_mode", &self.approval_mode())
            .field("fallback_mode", &self.is_fallback_mode())
            .field("api_key", &self.api_key.as_ref().map(|_| ".."))
            .field("base_url", &self.base_url)
            .field("session_id", &self.session_id)
            .field("max_session_turns", &self.max_session_turns)
            .field("compression_threshold", &self.compression_threshold)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

impl Default for StewardConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl StewardConfig {
    /// Create config with built-in defaults only.
    pub fn new() -> Self {
        Self {
            model: Arc::new(RwLock::new(DEFAULT_GEMINI_MODEL.to_string())),
            approval_mode: Arc::new(RwLock::new(ApprovalMode::Default)),
            fallback_mode: Arc::new(RwLock::new(false)),
            fallback_handler: Arc::new(RwLock::new(None)),
            api_key: None,
            base_url: None,
            session_id: uuid::Uuid::new_v4().to_string(),
            max_session_turns: None,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            compression_preserve_fraction: DEFAULT_COMPRESSION_PRESERVE_FRACTION,
            retry_policy: RetryPolicy::default(),
            error_report_dir: None,
        }
    }

    /// Load the default settings file (if any), then apply environment overrides.
    pub fn from_env() -> Result<Self> {
        let path = default_settings_path();
        Self::load(Some(&path))
    }

    /// Load an explicit settings file (if any), then apply environment overrides.
    pub fn load(settings_path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let settings = match settings_path {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        Self::new().with_settings(&settings)?.with_env_overrides()
    }

    /// Apply values from a settings file on top of the current values.
    pub fn with_settings(mut self, settings: &Settings) -> Result<Self> {
        if let Some(model) = &settings.model {
            self.set_model(model);
        }
        if let Some(mode) = settings.approval_mode {
            self.set_approval_mode(mode);
        }
        if let Some(turns) = settings.max_session_turns {
            self.max_session_turns = (turns > 0).then_some(turns);
        }
        if settings.base_url.is_some() {
            self.base_url = settings.base_url.clone();
        }
        if settings.error_report_dir.is_some() {
            self.error_report_dir = settings.error_report_dir.clone();
        }
        if let Some(threshold) = settings.compression.threshold {
            self.compression_threshold = fraction("compression.threshold", threshold)?;
        }
        if let Some(preserve) = settings.compression.preserve_fraction {
            self.compression_preserve_fraction =
                fraction("compression.preserve_fraction", preserve)?;
        }
        if let Some(max_attempts) = settings.retry.max_attempts {
            self.retry_policy.max_attempts = max_attempts.max(1);
        }
        if let Some(ms) = settings.retry.initial_delay_ms {
            self.retry_policy.initial_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = settings.retry.max_delay_ms {
            self.retry_policy.max_backoff = Duration::from_millis(ms);
        }
        Ok(self)
    }

    fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(key) = env_var("GEMINI_API_KEY").or_else(|| env_var("GOOGLE_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(model) = env_var("STEWARD_MODEL").or_else(|| env_var("GEMINI_MODEL")) {
            self.set_model(&model);
        }
        if let Some(url) = env_var("GEMINI_BASE_URL") {
            self.base_url = Some(url);
        }
        if let Some(mode) = env_var("STEWARD_APPROVAL_MODE") {
            let mode = mode.parse::<ApprovalMode>().map_err(|_| {
                StewardError::Configuration(format!("unknown approval mode: {mode}"))
            })?;
            self.set_approval_mode(mode);
        }
        if let Some(turns) = env_var("STEWARD_MAX_SESSION_TURNS") {
            let turns = turns.trim().parse::<usize>().map_err(|_| {
                StewardError::Configuration(format!("invalid STEWARD_MAX_SESSION_TURNS: {turns}"))
            })?;
            self.max_session_turns = (turns > 0).then_some(turns);
        }
        if let Some(dir) = env_var("STEWARD_ERROR_REPORT_DIR") {
            self.error_report_dir = Some(PathBuf::from(dir));
        }
        Ok(self)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_model(self, model: impl Into<String>) -> Self {
        self.set_model(&model.into());
        self
    }

    pub fn with_approval_mode(self, mode: ApprovalMode) -> Self {
        self.set_approval_mode(mode);
        self
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = id.into();
        self
    }

    /// Cap on model round trips for the whole session. `0` disables the cap.
    pub fn with_max_session_turns(mut self, turns: usize) -> Self {
        self.max_session_turns = (turns > 0).then_some(turns);
        self
    }

    /// Both values must lie strictly between 0 and 1.
    pub fn with_compression(mut self, threshold: f64, preserve_fraction: f64) -> Result<Self> {
        self.compression_threshold = fraction("compression threshold", threshold)?;
        self.compression_preserve_fraction =
            fraction("compression preserve fraction", preserve_fraction)?;
        Ok(self)
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_error_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.error_report_dir = Some(dir.into());
        self
    }

    pub fn with_fallback_handler(self, handler: FallbackHandler) -> Self {
        self.set_fallback_handler(Some(handler));
        self
    }

    /// The model currently in use. Always read fresh; fallback may change it.
    pub fn model(&self) -> String {
        read(&self.model).clone()
    }

    pub fn set_model(&self, model: &str) {
        *write(&self.model) = model.to_string();
    }

    pub fn approval_mode(&self) -> ApprovalMode {
        *read(&self.approval_mode)
    }

    pub fn set_approval_mode(&self, mode: ApprovalMode) {
        *write(&self.approval_mode) = mode;
    }

    pub fn is_fallback_mode(&self) -> bool {
        *read(&self.fallback_mode)
    }

    pub fn set_fallback_mode(&self, active: bool) {
        *write(&self.fallback_mode) = active;
    }

    pub fn fallback_handler(&self) -> Option<FallbackHandler> {
        read(&self.fallback_handler).clone()
    }

    pub fn set_fallback_handler(&self, handler: Option<FallbackHandler>) {
        *write(&self.fallback_handler) = handler;
    }

    pub fn flash_model(&self) -> &'static str {
        DEFAULT_GEMINI_FLASH_MODEL
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn max_session_turns(&self) -> Option<usize> {
        self.max_session_turns
    }

    pub fn compression_threshold(&self) -> f64 {
        self.compression_threshold
    }

    pub fn compression_preserve_fraction(&self) -> f64 {
        self.compression_preserve_fraction
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Where file error reports go; the system temp dir unless configured.
    pub fn error_report_dir(&self) -> PathBuf {
        self.error_report_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

fn fraction(name: &str, value: f64) -> Result<f64> {
    if value > 0.0 && value < 1.0 {
        Ok(value)
    } else {
        Err(StewardError::Configuration(format!(
            "{name} must be between 0 and 1 (exclusive), got {value}"
        )))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// `~/.steward/settings.toml`.
pub fn default_settings_path() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".steward"))
        .unwrap_or_else(|| PathBuf::from(".steward"))
        .join(SETTINGS_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn settings_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            r#"
model = "gemini-2.5-flash"
approval_mode = "autoEdit"
max_session_turns = 12

[compression]
threshold = 0.5

[retry]
max_attempts = 2
initial_delay_ms = 10
"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        let config = StewardConfig::new().with_settings(&settings).unwrap();

        assert_eq!(config.model(), "gemini-2.5-flash");
        assert_eq!(config.approval_mode(), ApprovalMode::AutoEdit);
        assert_eq!(config.max_session_turns(), Some(12));
        assert_eq!(config.compression_threshold(), 0.5);
        assert_eq!(
            config.compression_preserve_fraction(),
            DEFAULT_COMPRESSION_PRESERVE_FRACTION
        );
        assert_eq!(config.retry_policy().max_attempts, 2);
        assert_eq!(
            config.retry_policy().initial_backoff,
            Duration::from_millis(10)
        );
    }

    #[test]
    fn missing_settings_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn malformed_settings_file_is_a_configuration_error() {
        let err = Settings::from_toml_str("model = [").unwrap_err();
        assert!(matches!(err, StewardError::Configuration(_)));
    }

    #[test]
    fn clones_share_mutable_state() {
        let config = StewardConfig::new();
        let clone = config.clone();
        clone.set_model("gemini-2.5-flash");
        clone.set_approval_mode(ApprovalMode::Yolo);
        assert_eq!(config.model(), "gemini-2.5-flash");
        assert_eq!(config.approval_mode(), ApprovalMode::Yolo);
    }

    #[test]
    fn approval_mode_parses_case_insensitively() {
        assert_eq!("yolo".parse::<ApprovalMode>().unwrap(), ApprovalMode::Yolo);
        assert_eq!(
            "autoEdit".parse::<ApprovalMode>().unwrap(),
            ApprovalMode::AutoEdit
        );
        assert_eq!(ApprovalMode::AutoEdit.to_string(), "autoEdit");
    }

    #[test]
    fn zero_session_turns_disables_the_cap() {
        let config = StewardConfig::new().with_max_session_turns(0);
        assert_eq!(config.max_session_turns(), None);
    }

    #[test]
    fn zero_session_turns_in_settings_disables_the_cap() {
        let settings = Settings::from_toml_str("max_session_turns = 0").unwrap();
        let config = StewardConfig::new()
            .with_max_session_turns(5)
            .with_settings(&settings)
            .unwrap();
        assert_eq!(config.max_session_turns(), None);
    }

    #[test]
    fn compression_fractions_must_be_inside_the_unit_interval() {
        for raw in [
            "[compression]\npreserve_fraction = 0.0",
            "[compression]\npreserve_fraction = 1.0",
            "[compression]\nthreshold = 1.5",
            "[compression]\nthreshold = -0.1",
        ] {
            let settings = Settings::from_toml_str(raw).unwrap();
            let err = StewardConfig::new().with_settings(&settings).unwrap_err();
            assert!(matches!(err, StewardError::Configuration(_)), "{raw}");
        }

        assert!(StewardConfig::new().with_compression(0.7, 0.0).is_err());
        assert!(StewardConfig::new().with_compression(1.0, 0.3).is_err());
        let config = StewardConfig::new().with_compression(0.6, 0.4).unwrap();
        assert_eq!(config.compression_threshold(), 0.6);
        assert_eq!(config.compression_preserve_fraction(), 0.4);
    }

    #[test]
    fn error_report_dir_comes_from_settings() {
        let settings = Settings::from_toml_str("error_report_dir = \"/var/tmp/steward\"").unwrap();
        let config = StewardConfig::new().with_settings(&settings).unwrap();
        assert_eq!(config.error_report_dir(), PathBuf::from("/var/tmp/steward"));
        assert_eq!(StewardConfig::new().error_report_dir(), std::env::temp_dir());
    }
}
