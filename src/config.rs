use anyhow::{Context, Result, bail};
use log::warn;
use std::{env, path::PathBuf, time::Duration};

/// Application configuration, loaded once at startup and handed to the
/// server and handlers explicitly.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// HTTP listener configuration
    pub ui: UiConfig,

    /// Config store (UCI daemon) client configuration
    pub store: StoreConfig,

    /// Browser session configuration
    pub session: SessionConfig,

    /// Wizard policy
    pub wizard: WizardConfig,

    /// Interface languages
    pub language: LanguageConfig,

    /// Path configuration
    pub paths: PathConfig,

    /// Debug mode; enables static file serving and the no-auth switch
    pub debug: bool,

    /// Requested authentication bypass, honoured only in debug mode
    pub no_auth: bool,
}

#[derive(Clone, Debug)]
pub struct UiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub socket_path: PathBuf,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub cookie_secure: bool,
    pub idle_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct WizardConfig {
    /// Furthest allowed step at which a session is authenticated without a
    /// password, i.e. the appliance has not been set up yet. `None` disables
    /// the rule.
    pub auto_auth_step: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct LanguageConfig {
    pub default: String,
    pub available: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct PathConfig {
    pub static_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ui: UiConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            store: StoreConfig {
                socket_path: PathBuf::from("/var/run/foris/uci.sock"),
                timeout: Duration::from_millis(5000),
            },
            session: SessionConfig {
                cookie_name: "foris-session".to_string(),
                cookie_secure: false,
                idle_timeout: Duration::from_secs(900),
            },
            wizard: WizardConfig {
                auto_auth_step: Some(1),
            },
            language: LanguageConfig {
                default: "cs".to_string(),
                available: vec!["cs".to_string(), "en".to_string()],
            },
            paths: PathConfig {
                static_dir: PathBuf::from("static"),
            },
            debug: false,
            no_auth: false,
        }
    }
}

impl AppConfig {
    /// Load the configuration from environment variables on top of the
    /// defaults. Fails on values that are present but malformed.
    pub fn load() -> Result<Self> {
        let defaults = Self::default();

        let debug = env_flag("FORIS_DEBUG")?.unwrap_or(defaults.debug);
        let no_auth = env_flag("FORIS_NOAUTH")?.unwrap_or(defaults.no_auth);
        if no_auth && !debug {
            warn!("FORIS_NOAUTH is only available in debug mode, ignoring it");
        }

        let config = Self {
            ui: UiConfig::load(defaults.ui)?,
            store: StoreConfig::load(defaults.store)?,
            session: SessionConfig::load(defaults.session)?,
            wizard: WizardConfig::load(defaults.wizard)?,
            language: LanguageConfig::load(defaults.language)?,
            paths: PathConfig::load(defaults.paths),
            debug,
            no_auth,
        };

        if config.auth_disabled() {
            warn!("authentication disabled");
        }

        Ok(config)
    }

    pub fn auth_disabled(&self) -> bool {
        self.debug && self.no_auth
    }
}

impl UiConfig {
    fn load(defaults: Self) -> Result<Self> {
        let host = env::var("UI_HOST").unwrap_or(defaults.host);
        let port = match env::var("UI_PORT") {
            Ok(port) => port
                .parse::<u16>()
                .context("failed to parse UI_PORT: invalid format")?,
            Err(_) => defaults.port,
        };

        Ok(Self { host, port })
    }
}

impl StoreConfig {
    fn load(defaults: Self) -> Result<Self> {
        let socket_path = env::var("UCI_SOCKET_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.socket_path);

        let timeout = match env::var("UCI_TIMEOUT_MS") {
            Ok(ms) => Duration::from_millis(
                ms.parse::<u64>()
                    .context("failed to parse UCI_TIMEOUT_MS: invalid format")?,
            ),
            Err(_) => defaults.timeout,
        };

        Ok(Self {
            socket_path,
            timeout,
        })
    }
}

impl SessionConfig {
    fn load(defaults: Self) -> Result<Self> {
        let cookie_secure = env_flag("SESSION_COOKIE_SECURE")?.unwrap_or(defaults.cookie_secure);
        let idle_timeout = match env::var("SESSION_TIMEOUT_SECS") {
            Ok(secs) => Duration::from_secs(
                secs.parse::<u64>()
                    .context("failed to parse SESSION_TIMEOUT_SECS: invalid format")?,
            ),
            Err(_) => defaults.idle_timeout,
        };

        Ok(Self {
            cookie_name: defaults.cookie_name,
            cookie_secure,
            idle_timeout,
        })
    }
}

impl WizardConfig {
    fn load(defaults: Self) -> Result<Self> {
        let auto_auth_step = match env::var("FORIS_AUTO_AUTH_STEP") {
            Ok(value) => parse_auto_auth_step(&value)?,
            Err(_) => defaults.auto_auth_step,
        };

        Ok(Self { auto_auth_step })
    }
}

impl LanguageConfig {
    fn load(defaults: Self) -> Result<Self> {
        let default = env::var("FORIS_DEFAULT_LANG").unwrap_or(defaults.default);
        if !defaults.available.contains(&default) {
            bail!("failed to load FORIS_DEFAULT_LANG: '{default}' is not an available language");
        }

        Ok(Self {
            default,
            available: defaults.available,
        })
    }

    pub fn is_available(&self, lang: &str) -> bool {
        self.available.iter().any(|l| l == lang)
    }
}

impl PathConfig {
    fn load(defaults: Self) -> Self {
        let static_dir = env::var("FORIS_STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.static_dir);

        Self { static_dir }
    }
}

fn env_flag(name: &str) -> Result<Option<bool>> {
    match env::var(name) {
        Ok(value) => parse_flag(&value)
            .map(Some)
            .with_context(|| format!("failed to parse {name}")),
        Err(_) => Ok(None),
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("invalid boolean value '{other}'"),
    }
}

fn parse_auto_auth_step(value: &str) -> Result<Option<u32>> {
    match value.trim() {
        "none" | "off" => Ok(None),
        step => step
            .parse::<u32>()
            .map(Some)
            .context("failed to parse FORIS_AUTO_AUTH_STEP: expected a step number or 'none'"),
    }
}
