//! Engine configuration: built-in defaults, an optional YAML file, then
//! environment overrides.

use crate::catalog::FeatureCatalog;
use crate::errors::EngineError;
use crate::platforms::RecognitionMode;
use crate::verify::ColorTolerance;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const ENV_PREFIX: &str = "CROUPIER_";
/// Webhook endpoint variable kept for existing deployments.
const LEGACY_WEBHOOK_ENV: &str = "WEBHOOK_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding `<app>/{Base,Nav,Act,Ret}` command files.
    pub mapping_root: PathBuf,
    /// Launcher path per app; `{app}` is replaced by the app name.
    pub launcher_template: String,
    pub launch_grace_ms: u64,
    /// How long a launched app may take to show its window.
    pub open_timeout_ms: u64,
    /// How long a closed app may linger before it is terminated.
    pub close_timeout_ms: u64,
    pub window_poll_interval_ms: u64,
    pub webhook_url: Option<String>,
    /// Registered apps and the bot id each one reports as.
    pub apps: BTreeMap<String, u32>,

    pub color_tolerance: ColorTolerance,
    pub color_attempts: u32,
    pub color_interval_ms: u64,
    pub click_condition_attempts: u32,

    pub ocr_attempts: u32,
    pub ocr_retry_delay_ms: u64,
    pub ocr_mode: RecognitionMode,
    /// When set, OCR inputs are saved as PNG for inspection.
    pub capture_dir: Option<PathBuf>,

    pub clear_presses: u32,
    pub clear_interval_ms: u64,
    pub write_pause_ms: u64,
    pub pointer_travel_ms: u64,
    pub drag_travel_ms: u64,
    pub drag_settle_ms: u64,
    pub step_pause_ms: u64,

    pub max_retries: u32,
    pub max_scroll_passes: u32,

    pub lock_acquire_timeout_ms: u64,
    pub lock_retry_interval_ms: u64,
    pub lock_lease_ms: u64,

    pub catalog: FeatureCatalog,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mapping_root: PathBuf::from("Mapeamentos"),
            launcher_template: "{app}.lnk".to_string(),
            launch_grace_ms: 4_000,
            open_timeout_ms: 30_000,
            close_timeout_ms: 5_000,
            window_poll_interval_ms: 250,
            webhook_url: None,
            apps: [("pppoker", 1), ("supremapoker", 2), ("pokerbros", 3)]
                .into_iter()
                .map(|(app, id)| (app.to_string(), id))
                .collect(),
            color_tolerance: ColorTolerance::default(),
            color_attempts: 20,
            color_interval_ms: 300,
            click_condition_attempts: 1,
            ocr_attempts: 2,
            ocr_retry_delay_ms: 300,
            ocr_mode: RecognitionMode::default(),
            capture_dir: None,
            clear_presses: 20,
            clear_interval_ms: 50,
            write_pause_ms: 200,
            pointer_travel_ms: 300,
            drag_travel_ms: 750,
            drag_settle_ms: 300,
            step_pause_ms: 100,
            max_retries: 3,
            max_scroll_passes: 25,
            lock_acquire_timeout_ms: 30_000,
            lock_retry_interval_ms: 500,
            lock_lease_ms: 60_000,
            catalog: FeatureCatalog::default(),
        }
    }
}

impl EngineConfig {
    /// Loads `.env`, the optional YAML file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => warn!("Ignoring unreadable .env file: {}", e),
        }

        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        info!(
            "Configuration ready: mapping root {}, {} apps, webhook {}",
            config.mapping_root.display(),
            config.apps.len(),
            if config.webhook_url.is_some() { "configured" } else { "disabled" }
        );
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, EngineError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies `CROUPIER_*` overrides (and the legacy `WEBHOOK_URL`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty());

        if let Some(url) = var("WEBHOOK_URL").or_else(|| lookup(LEGACY_WEBHOOK_ENV).filter(|v| !v.trim().is_empty())) {
            self.webhook_url = Some(url.trim().to_string());
        }
        if let Some(root) = var("MAPPING_ROOT") {
            self.mapping_root = PathBuf::from(root);
        }
        if let Some(template) = var("LAUNCHER_TEMPLATE") {
            self.launcher_template = template;
        }
        if let Some(dir) = var("CAPTURE_DIR") {
            self.capture_dir = Some(PathBuf::from(dir));
        }
        set_parsed(&mut self.max_retries, var("MAX_RETRIES"), "MAX_RETRIES")?;
        set_parsed(&mut self.max_scroll_passes, var("MAX_SCROLL_PASSES"), "MAX_SCROLL_PASSES")?;
        set_parsed(&mut self.color_attempts, var("COLOR_ATTEMPTS"), "COLOR_ATTEMPTS")?;
        set_parsed(&mut self.ocr_attempts, var("OCR_ATTEMPTS"), "OCR_ATTEMPTS")?;
        set_parsed(&mut self.launch_grace_ms, var("LAUNCH_GRACE_MS"), "LAUNCH_GRACE_MS")?;
        set_parsed(&mut self.open_timeout_ms, var("OPEN_TIMEOUT_MS"), "OPEN_TIMEOUT_MS")?;
        set_parsed(&mut self.close_timeout_ms, var("CLOSE_TIMEOUT_MS"), "CLOSE_TIMEOUT_MS")?;
        set_parsed(
            &mut self.lock_acquire_timeout_ms,
            var("LOCK_ACQUIRE_TIMEOUT_MS"),
            "LOCK_ACQUIRE_TIMEOUT_MS",
        )?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.apps.is_empty() {
            return Err(EngineError::InvalidConfig("no apps configured".to_string()));
        }
        if self.max_retries == 0 {
            return Err(EngineError::InvalidConfig("max_retries must be at least 1".to_string()));
        }
        self.catalog.validate()
    }

    /// Path of the launcher used to (re)start `app`.
    pub fn launcher_for(&self, app: &str) -> PathBuf {
        PathBuf::from(self.launcher_template.replace("{app}", app.trim()))
    }

    /// Bot id for `app`, matched case-insensitively.
    pub fn bot_id(&self, app: &str) -> Option<u32> {
        self.apps
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(app.trim()))
            .map(|(_, id)| *id)
    }

    pub fn launch_grace(&self) -> Duration {
        Duration::from_millis(self.launch_grace_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn window_poll_interval(&self) -> Duration {
        Duration::from_millis(self.window_poll_interval_ms)
    }

    pub fn color_interval(&self) -> Duration {
        Duration::from_millis(self.color_interval_ms)
    }

    pub fn ocr_retry_delay(&self) -> Duration {
        Duration::from_millis(self.ocr_retry_delay_ms)
    }

    pub fn clear_interval(&self) -> Duration {
        Duration::from_millis(self.clear_interval_ms)
    }

    pub fn write_pause(&self) -> Duration {
        Duration::from_millis(self.write_pause_ms)
    }

    pub fn pointer_travel(&self) -> Duration {
        Duration::from_millis(self.pointer_travel_ms)
    }

    pub fn drag_travel(&self) -> Duration {
        Duration::from_millis(self.drag_travel_ms)
    }

    pub fn drag_settle(&self) -> Duration {
        Duration::from_millis(self.drag_settle_ms)
    }

    pub fn step_pause(&self) -> Duration {
        Duration::from_millis(self.step_pause_ms)
    }

    pub fn lock_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_acquire_timeout_ms)
    }

    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock_retry_interval_ms)
    }

    pub fn lock_lease(&self) -> Duration {
        Duration::from_millis(self.lock_lease_ms)
    }

    /// All waits set to zero, for scripted runs. Window and lock timeouts
    /// are kept; only their polling gets faster.
    pub fn without_delays(mut self) -> Self {
        self.launch_grace_ms = 0;
        self.window_poll_interval_ms = 1;
        self.color_interval_ms = 0;
        self.ocr_retry_delay_ms = 0;
        self.clear_interval_ms = 0;
        self.write_pause_ms = 0;
        self.pointer_travel_ms = 0;
        self.drag_travel_ms = 0;
        self.drag_settle_ms = 0;
        self.step_pause_ms = 0;
        self.lock_retry_interval_ms = 1;
        self
    }
}

fn set_parsed<T: FromStr>(slot: &mut T, raw: Option<String>, name: &str) -> Result<(), EngineError> {
    if let Some(raw) = raw {
        *slot = raw.trim().parse().map_err(|_| {
            EngineError::InvalidConfig(format!("{ENV_PREFIX}{name} is not a valid number: '{raw}'"))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_recorded_timings() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.color_attempts, 20);
        assert_eq!(config.color_interval(), Duration::from_millis(300));
        assert_eq!(config.color_tolerance, ColorTolerance { per_channel: 10, total: 20 });
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.close_timeout(), Duration::from_secs(5));
        assert_eq!(config.open_timeout(), Duration::from_secs(30));
        assert_eq!(config.launcher_for("pppoker"), PathBuf::from("pppoker.lnk"));
        assert_eq!(config.bot_id("SupremaPoker"), Some(2));
    }

    #[test]
    fn yaml_overrides_selected_fields() {
        let yaml = r#"
mapping_root: /srv/mapeamentos
max_scroll_passes: 5
ocr_mode: single_line
color_tolerance: { per_channel: 5, total: 12 }
apps: { pppoker: 1 }
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.mapping_root, PathBuf::from("/srv/mapeamentos"));
        assert_eq!(config.max_scroll_passes, 5);
        assert_eq!(config.ocr_mode, RecognitionMode::SingleLine);
        assert_eq!(config.color_tolerance.total, 12);
        assert_eq!(config.apps.len(), 1);
        assert_eq!(config.color_attempts, 20);
        assert!(config.catalog.get("balance").is_some());
    }

    #[test]
    fn env_overrides_and_legacy_webhook() {
        let env: HashMap<&str, &str> = [
            ("WEBHOOK_URL", "http://legacy/hook"),
            ("CROUPIER_MAX_RETRIES", "5"),
            ("CROUPIER_CAPTURE_DIR", "/tmp/ocr"),
        ]
        .into_iter()
        .collect();
        let mut config = EngineConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.webhook_url.as_deref(), Some("http://legacy/hook"));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.capture_dir, Some(PathBuf::from("/tmp/ocr")));
    }

    #[test]
    fn prefixed_webhook_wins_and_bad_numbers_fail() {
        let env: HashMap<&str, &str> = [
            ("WEBHOOK_URL", "http://legacy/hook"),
            ("CROUPIER_WEBHOOK_URL", "http://new/hook"),
        ]
        .into_iter()
        .collect();
        let mut config = EngineConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.webhook_url.as_deref(), Some("http://new/hook"));

        let mut config = EngineConfig::default();
        let result = config.apply_env(|key| (key == "CROUPIER_MAX_RETRIES").then(|| "three".to_string()));
        assert!(result.is_err());
    }
}
