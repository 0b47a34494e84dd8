use std::path::Path;
use std::path::PathBuf;

use dirs::home_dir;
use serde::Deserialize;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";

const TOKEN_ENV_VAR: &str = "CONDUCTOR_API_TOKEN";
const HOME_ENV_VAR: &str = "CONDUCTOR_HOME";

/// Application configuration loaded from disk and merged with overrides.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub server_url: String,
    pub poll_interval_ms: u64,
    pub cancel_hint_ms: u64,
    pub confirm_timeout_ms: u64,
    pub stream_idle_timeout_ms: u64,
    /// Agent to chat with on startup instead of the main orchestrator.
    pub default_agent: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            poll_interval_ms: 3_000,
            cancel_hint_ms: 30_000,
            confirm_timeout_ms: 2_000,
            stream_idle_timeout_ms: 300_000,
            default_agent: None,
        }
    }
}

/// Optional overrides for user configuration (e.g., from CLI flags).
#[derive(Default, Debug, Clone)]
pub struct ConfigOverrides {
    pub server_url: Option<String>,
    pub default_agent: Option<String>,
    pub poll_interval_ms: Option<u64>,
}

impl Config {
    /// Load `config.toml` from the conductor home directory and apply
    /// `overrides` (highest precedence). A missing file yields the defaults.
    pub fn load_with_overrides(overrides: ConfigOverrides) -> std::io::Result<Self> {
        Self::load_from_dir(&conductor_home()?, overrides)
    }

    pub fn load_from_dir(home: &Path, overrides: ConfigOverrides) -> std::io::Result<Self> {
        let path = home.join("config.toml");
        let mut cfg = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str::<Config>(&contents).map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("{}: {e}", path.display()),
                )
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(e),
        };

        if let Some(server_url) = overrides.server_url {
            cfg.server_url = server_url;
        }
        if let Some(agent) = overrides.default_agent {
            cfg.default_agent = Some(agent);
        }
        if let Some(ms) = overrides.poll_interval_ms {
            cfg.poll_interval_ms = ms;
        }
        // A zero interval would spin the poll chain.
        cfg.poll_interval_ms = cfg.poll_interval_ms.max(100);
        Ok(cfg)
    }
}

#[derive(Deserialize)]
struct AuthFile {
    token: String,
}

/// Bearer token from `CONDUCTOR_API_TOKEN`, falling back to
/// `<home>/auth.json`. `None` means requests go out unauthenticated.
pub fn load_token(home: &Path) -> Option<String> {
    resolve_token(std::env::var(TOKEN_ENV_VAR).ok(), home)
}

fn resolve_token(from_env: Option<String>, home: &Path) -> Option<String> {
    if let Some(token) = from_env.filter(|t| !t.trim().is_empty()) {
        return Some(token.trim().to_string());
    }
    let contents = std::fs::read_to_string(home.join("auth.json")).ok()?;
    match serde_json::from_str::<AuthFile>(&contents) {
        Ok(auth) if !auth.token.trim().is_empty() => Some(auth.token.trim().to_string()),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("ignoring malformed auth.json: {e}");
            None
        }
    }
}

/// Returns the conductor home directory: `$CONDUCTOR_HOME` if set, otherwise
/// `~/.conductor`. Does not verify that the directory exists.
pub fn conductor_home() -> std::io::Result<PathBuf> {
    if let Some(dir) = std::env::var_os(HOME_ENV_VAR).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let mut p = home_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not find home directory",
        )
    })?;
    p.push(".conductor");
    Ok(p)
}

/// Returns the path to the folder where logs are stored. Does not verify
/// that the directory exists.
pub fn log_dir(home: &Path) -> PathBuf {
    home.join("log")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn missing_file_uses_defaults() {
        let home = TempDir::new().expect("tempdir");
        let cfg = Config::load_from_dir(home.path(), ConfigOverrides::default()).expect("load");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn file_values_then_overrides() {
        let home = TempDir::new().expect("tempdir");
        std::fs::write(
            home.path().join("config.toml"),
            r#"
server_url = "https://conductor.internal"
poll_interval_ms = 5000
default_agent = "planner"
"#,
        )
        .expect("write");

        let cfg = Config::load_from_dir(home.path(), ConfigOverrides::default()).expect("load");
        assert_eq!(cfg.server_url, "https://conductor.internal");
        assert_eq!(cfg.poll_interval_ms, 5000);
        assert_eq!(cfg.cancel_hint_ms, 30_000);
        assert_eq!(cfg.default_agent.as_deref(), Some("planner"));

        let cfg = Config::load_from_dir(
            home.path(),
            ConfigOverrides {
                server_url: Some("http://localhost:9999".to_string()),
                default_agent: None,
                poll_interval_ms: Some(0),
            },
        )
        .expect("load");
        assert_eq!(cfg.server_url, "http://localhost:9999");
        assert_eq!(cfg.poll_interval_ms, 100);
        assert_eq!(cfg.default_agent.as_deref(), Some("planner"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let home = TempDir::new().expect("tempdir");
        std::fs::write(home.path().join("config.toml"), "poll_interval_ms = \"soon\"")
            .expect("write");
        let err = Config::load_from_dir(home.path(), ConfigOverrides::default()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn token_prefers_environment() {
        let home = TempDir::new().expect("tempdir");
        std::fs::write(home.path().join("auth.json"), r#"{"token": "from-file"}"#)
            .expect("write");

        assert_eq!(
            resolve_token(Some("from-env".to_string()), home.path()).as_deref(),
            Some("from-env")
        );
        assert_eq!(
            resolve_token(Some("  ".to_string()), home.path()).as_deref(),
            Some("from-file")
        );
        assert_eq!(resolve_token(None, home.path()).as_deref(), Some("from-file"));
    }

    #[test]
    fn missing_or_bad_auth_file_means_no_token() {
        let home = TempDir::new().expect("tempdir");
        assert_eq!(resolve_token(None, home.path()), None);
        std::fs::write(home.path().join("auth.json"), "not json").expect("write");
        assert_eq!(resolve_token(None, home.path()), None);
    }
}
