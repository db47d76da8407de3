//! User-facing configuration files.
//!
//! Three YAML documents, each with a versioned top level:
//! `stores.yml` (repositories plus a default pointer), `sources.yml`
//! (importer presets) and `destinations.yml` (exporter presets). Entry
//! values may be literal, `env:NAME`, `file:PATH` or `cmd:SHELL`;
//! `passphrase_cmd` is accepted as a legacy alias for `cmd:` bound to
//! `passphrase`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Default, Deserialize)]
pub struct StoresConfig {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub stores: HashMap<String, StoreEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreEntry {
    pub location: String,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default)]
    pub passphrase_cmd: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub sources: HashMap<String, SourceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    pub location: String,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DestinationsConfig {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub destinations: HashMap<String, DestinationEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DestinationEntry {
    pub location: String,
}

/// Platform configuration directory: `$XDG_CONFIG_HOME/silo` with the usual
/// fallbacks.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(dir).join("silo");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config").join("silo");
    }
    PathBuf::from(".silo")
}

/// Platform cache directory: `$XDG_CACHE_HOME/silo` with the usual
/// fallbacks.
pub fn cache_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_CACHE_HOME") {
        return PathBuf::from(dir).join("silo");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".cache").join("silo");
    }
    PathBuf::from(".silo-cache")
}

fn load_yaml<T: Default + serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let parsed: T = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(parsed)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e).with_context(|| format!("reading {what} at {}", path.display())),
    }
}

pub fn load_stores(dir: &Path) -> Result<StoresConfig> {
    let config: StoresConfig = load_yaml(&dir.join("stores.yml"), "stores config")?;
    if config.version > CONFIG_VERSION {
        bail!(
            "stores.yml version {} is newer than supported {CONFIG_VERSION}",
            config.version
        );
    }
    Ok(config)
}

pub fn load_sources(dir: &Path) -> Result<SourcesConfig> {
    load_yaml(&dir.join("sources.yml"), "sources config")
}

pub fn load_destinations(dir: &Path) -> Result<DestinationsConfig> {
    load_yaml(&dir.join("destinations.yml"), "destinations config")
}

/// Resolve a configuration value: literal, `env:NAME`, `file:PATH` or
/// `cmd:SHELL`.
pub fn resolve_value(value: &str) -> Result<String> {
    if let Some(name) = value.strip_prefix("env:") {
        return std::env::var(name).with_context(|| format!("environment variable {name}"));
    }
    if let Some(path) = value.strip_prefix("file:") {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        return Ok(text.trim_end_matches('\n').to_string());
    }
    if let Some(shell) = value.strip_prefix("cmd:") {
        return run_command(shell);
    }
    Ok(value.to_string())
}

fn run_command(shell: &str) -> Result<String> {
    let output = std::process::Command::new("sh")
        .arg("-c")
        .arg(shell)
        .output()
        .with_context(|| format!("running `{shell}`"))?;
    if !output.status.success() {
        bail!("`{shell}` exited with {}", output.status);
    }
    let text = String::from_utf8(output.stdout).context("command output is not UTF-8")?;
    Ok(text.trim_end_matches('\n').to_string())
}

impl StoreEntry {
    /// The entry's passphrase, resolving `env:`/`file:`/`cmd:` values and
    /// the legacy `passphrase_cmd` alias.
    pub fn resolve_passphrase(&self) -> Result<Option<String>> {
        if let Some(value) = &self.passphrase {
            return resolve_value(value).map(Some);
        }
        if let Some(shell) = &self.passphrase_cmd {
            return run_command(shell).map(Some);
        }
        Ok(None)
    }
}

impl StoresConfig {
    /// Look up `@name`, or fall back to the default entry when `name` is
    /// None.
    pub fn entry(&self, name: Option<&str>) -> Result<Option<StoreEntry>> {
        let name = match name {
            Some(name) => name,
            None => match &self.default {
                Some(default) => default,
                None => return Ok(None),
            },
        };
        match self.stores.get(name) {
            Some(entry) => Ok(Some(entry.clone())),
            None => bail!("no store named {name:?} in stores.yml"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stores_yaml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("stores.yml"),
            r#"
version: 1
default: main
stores:
  main:
    location: fs:///var/backups/silo
    passphrase: env:SILO_TEST_PASSPHRASE
  offsite:
    location: memory://offsite
    passphrase_cmd: echo legacy-secret
"#,
        )
        .unwrap();

        let config = load_stores(dir.path()).unwrap();
        assert_eq!(config.default.as_deref(), Some("main"));

        let main = config.entry(None).unwrap().unwrap();
        assert_eq!(main.location, "fs:///var/backups/silo");

        let offsite = config.entry(Some("offsite")).unwrap().unwrap();
        assert_eq!(
            offsite.resolve_passphrase().unwrap().as_deref(),
            Some("legacy-secret")
        );

        assert!(config.entry(Some("absent")).is_err());
    }

    #[test]
    fn missing_files_default_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_stores(dir.path()).unwrap();
        assert!(config.stores.is_empty());
        assert!(config.entry(None).unwrap().is_none());

        assert!(load_sources(dir.path()).unwrap().sources.is_empty());
        assert!(load_destinations(dir.path())
            .unwrap()
            .destinations
            .is_empty());
    }

    #[test]
    fn future_version_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stores.yml"), "version: 99\n").unwrap();
        assert!(load_stores(dir.path()).is_err());
    }

    #[test]
    fn resolves_value_forms() {
        assert_eq!(resolve_value("plain").unwrap(), "plain");

        std::env::set_var("SILO_RESOLVE_TEST", "from-env");
        assert_eq!(
            resolve_value("env:SILO_RESOLVE_TEST").unwrap(),
            "from-env"
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        std::fs::write(&path, "from-file\n").unwrap();
        assert_eq!(
            resolve_value(&format!("file:{}", path.display())).unwrap(),
            "from-file"
        );

        assert_eq!(resolve_value("cmd:echo from-cmd").unwrap(), "from-cmd");
        assert!(resolve_value("cmd:exit 3").is_err());
        assert!(resolve_value("env:SILO_DEFINITELY_UNSET_VAR").is_err());
    }
}
