use std::path::PathBuf;
use std::sync::{Arc, LazyLock, RwLock};
use std::time::Duration;

use crate::adapter::AdapterKind;
use crate::core::errors::ConfigError;
use crate::lm::LM;

/// Process-wide configuration.
///
/// The global slot is only the bootstrap default: modules take one
/// [`Settings::snapshot`] at entry into forward and read that immutable
/// copy for the rest of the call, so a concurrent `configure` never changes
/// a call mid-flight.
#[derive(Clone)]
pub struct Settings {
    pub lm: Option<Arc<LM>>,
    pub adapter: AdapterKind,
    pub temperature: f32,
    pub max_tokens: u32,
    pub cache_dir: PathBuf,
    pub enable_cache: bool,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Enables the trace sink; every Predict forward then records its
    /// input/output step.
    pub trace: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lm: None,
            adapter: AdapterKind::Chat,
            temperature: 0.0,
            max_tokens: 1000,
            cache_dir: PathBuf::from(shellexpand::tilde("~/.teleprompt/cache").into_owned()),
            enable_cache: true,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            trace: false,
        }
    }
}

static GLOBAL_SETTINGS: LazyLock<RwLock<Arc<Settings>>> =
    LazyLock::new(|| RwLock::new(Arc::new(Settings::default())));

/// Installs new process-wide settings.
pub fn configure(settings: Settings) {
    *GLOBAL_SETTINGS.write().expect("settings lock poisoned") = Arc::new(settings);
}

/// Installs just an LM, keeping every other setting.
pub fn configure_lm(lm: LM) {
    let mut settings = Settings::snapshot().as_ref().clone();
    settings.lm = Some(Arc::new(lm));
    configure(settings);
}

impl Settings {
    /// The current settings as an immutable snapshot.
    pub fn snapshot() -> Arc<Settings> {
        GLOBAL_SETTINGS
            .read()
            .expect("settings lock poisoned")
            .clone()
    }

    /// The configured LM, or [`ConfigError::MissingLm`].
    pub fn require_lm(&self) -> Result<Arc<LM>, ConfigError> {
        self.lm.clone().ok_or(ConfigError::MissingLm)
    }

    pub fn with_lm(mut self, lm: LM) -> Self {
        self.lm = Some(Arc::new(lm));
        self
    }

    pub fn with_adapter(mut self, adapter: AdapterKind) -> Self {
        self.adapter = adapter;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert!(settings.lm.is_none());
        assert_eq!(settings.adapter, AdapterKind::Chat);
        assert_eq!(settings.temperature, 0.0);
        assert_eq!(settings.max_tokens, 1000);
        assert!(settings.enable_cache);
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert_eq!(settings.max_retries, 3);
        assert!(!settings.trace);
    }

    #[test]
    fn require_lm_errors_when_unset() {
        let settings = Settings::default();
        assert!(matches!(
            settings.require_lm(),
            Err(ConfigError::MissingLm)
        ));
    }
}
