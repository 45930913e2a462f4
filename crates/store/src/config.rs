use sessionstate_core::cleanup::DEFAULT_CLEANUP_INTERVAL_MINUTES;
use sessionstate_core::error::CoreError;

/// Default idle timeout handed to `release_only` and `touch`.
pub const DEFAULT_SESSION_TIMEOUT_MINUTES: i32 = 20;

/// Application name used when none is configured.
pub const DEFAULT_APPLICATION_NAME: &str = "/";

/// Session store configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Logical application whose sessions this store owns.
    pub application_name: String,
    /// Idle timeout applied when the host does not pass one.
    pub session_timeout_minutes: i32,
    /// Interval written into a newly created throttle row. An existing row
    /// keeps its own value.
    pub cleanup_interval_minutes: i32,
    /// Whether expire callbacks are honoured at all.
    pub enable_expire_callback: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
            session_timeout_minutes: DEFAULT_SESSION_TIMEOUT_MINUTES,
            cleanup_interval_minutes: DEFAULT_CLEANUP_INTERVAL_MINUTES,
            enable_expire_callback: false,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                            | Default |
    /// |------------------------------------|---------|
    /// | `SESSION_APPLICATION_NAME`         | `/`     |
    /// | `SESSION_TIMEOUT_MINUTES`          | `20`    |
    /// | `SESSION_CLEANUP_INTERVAL_MINUTES` | `10`    |
    /// | `SESSION_ENABLE_EXPIRE_CALLBACK`   | `false` |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from `lookup`.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let defaults = Self::default();

        let application_name = lookup("SESSION_APPLICATION_NAME")
            .map(|s| s.trim().to_string())
            .unwrap_or(defaults.application_name);

        let session_timeout_minutes = match lookup("SESSION_TIMEOUT_MINUTES") {
            Some(raw) => parse_minutes("SESSION_TIMEOUT_MINUTES", &raw)?,
            None => defaults.session_timeout_minutes,
        };

        let cleanup_interval_minutes = match lookup("SESSION_CLEANUP_INTERVAL_MINUTES") {
            Some(raw) => parse_minutes("SESSION_CLEANUP_INTERVAL_MINUTES", &raw)?,
            None => defaults.cleanup_interval_minutes,
        };

        let enable_expire_callback = match lookup("SESSION_ENABLE_EXPIRE_CALLBACK") {
            Some(raw) => parse_bool("SESSION_ENABLE_EXPIRE_CALLBACK", &raw)?,
            None => defaults.enable_expire_callback,
        };

        let config = Self {
            application_name,
            session_timeout_minutes,
            cleanup_interval_minutes,
            enable_expire_callback,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the store cannot work with.
    ///
    /// A non-positive cleanup interval is allowed; the reaper floors it.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.application_name.is_empty() {
            return Err(CoreError::Validation(
                "SESSION_APPLICATION_NAME must not be empty".to_string(),
            ));
        }
        if self.session_timeout_minutes <= 0 {
            return Err(CoreError::Validation(format!(
                "SESSION_TIMEOUT_MINUTES must be positive, got {}",
                self.session_timeout_minutes
            )));
        }
        Ok(())
    }
}

fn parse_minutes(name: &str, raw: &str) -> Result<i32, CoreError> {
    raw.trim()
        .parse()
        .map_err(|_| CoreError::Validation(format!("{name} must be a valid integer, got {raw:?}")))
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, CoreError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(CoreError::Validation(format!(
            "{name} must be true or false, got {raw:?}"
        ))),
    }
}
