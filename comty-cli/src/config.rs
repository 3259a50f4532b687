use anyhow::{Context, Result};
use comty_runtime::{ClientConfig, Credentials};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Stored session tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionFile {
    pub token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Application configuration, persisted as TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionFile,
    pub client: ClientConfig,
}

impl AppConfig {
    /// `<config dir>/comty/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("comty").join("config.toml"))
            .context("Could not determine the configuration directory")
    }

    fn resolve(path: Option<&Path>) -> Result<PathBuf> {
        match path {
            Some(path) => Ok(path.to_path_buf()),
            None => Self::default_path(),
        }
    }

    /// Load from `path` (or the default location). A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve(path)?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = Self::resolve(path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&path, self.show()?)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    pub fn reset(path: Option<&Path>) -> Result<()> {
        Self::default().save(path)
    }

    pub fn show(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Apply command line overrides.
    pub fn apply_overrides(
        &mut self,
        origin: Option<String>,
        token: Option<String>,
        refresh_token: Option<String>,
    ) {
        if let Some(origin) = origin {
            self.client.origin = origin;
        }
        if token.is_some() {
            self.session.token = token;
        }
        if refresh_token.is_some() {
            self.session.refresh_token = refresh_token;
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            access_token: self.session.token.clone(),
            refresh_token: self.session.refresh_token.clone(),
        }
    }

    /// Record `credentials` as the stored session. Returns whether anything changed.
    pub fn update_session(&mut self, credentials: Credentials) -> bool {
        let session = SessionFile {
            token: credentials.access_token,
            refresh_token: credentials.refresh_token,
        };
        if session == self.session {
            return false;
        }
        self.session = session;
        true
    }
}
