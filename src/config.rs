use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const DEFAULT_ENDPOINT: &str = "/rpc";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  /// Settings shared by every connection
  #[serde(default)]
  pub defaults: ConnectionConfig,
  #[serde(default)]
  pub connections: BTreeMap<String, ConnectionConfig>,
  /// Connection used when none is given on the command line
  pub default_connection: Option<String>,
  /// Also write logs to this file
  pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
  #[default]
  Roundup,
}

/// One connection's settings. Unset fields fall back to `defaults`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
  pub service: Option<ServiceKind>,
  /// Tracker base URL, e.g. https://bugs.python.org
  pub base: Option<String>,
  pub user: Option<String>,
  /// RPC path below `base`
  pub endpoint: Option<String>,
  /// Request timeout in seconds
  pub timeout: Option<u64>,
  /// Fields shown by `search` when none are requested
  pub search_fields: Option<Vec<String>>,
}

impl ConnectionConfig {
  /// Fill every unset field from `fallback`.
  pub fn or(self, fallback: &ConnectionConfig) -> Self {
    Self {
      service: self.service.or(fallback.service),
      base: self.base.or_else(|| fallback.base.clone()),
      user: self.user.or_else(|| fallback.user.clone()),
      endpoint: self.endpoint.or_else(|| fallback.endpoint.clone()),
      timeout: self.timeout.or(fallback.timeout),
      search_fields: self
        .search_fields
        .or_else(|| fallback.search_fields.clone()),
    }
  }
}

/// Fully resolved settings of the connection in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
  pub name: String,
  pub service: ServiceKind,
  pub base: String,
  pub endpoint: Url,
  pub user: Option<String>,
  pub timeout: Duration,
  pub search_fields: Option<Vec<String>>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./trk.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/trk/config.yaml
  ///
  /// Without any file the defaults apply, which is enough when the tracker is
  /// given with `--base`.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("trk.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("trk").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  /// Resolve the connection to use.
  ///
  /// `name` picks a configured connection, falling back to
  /// `default_connection`, then to the only configured connection. Fields
  /// set in `overrides` (command line flags) win over the connection, which
  /// wins over `defaults`.
  pub fn resolve(&self, name: Option<&str>, overrides: ConnectionConfig) -> Result<ServiceConfig> {
    let name = name
      .map(str::to_string)
      .or_else(|| self.default_connection.clone())
      .or_else(|| match self.connections.len() {
        1 => self.connections.keys().next().cloned(),
        _ => None,
      });

    let connection = match &name {
      Some(name) => self.connections.get(name).cloned().ok_or_else(|| {
        let known: Vec<&str> = self.connections.keys().map(String::as_str).collect();
        eyre!(
          "Unknown connection: {} (configured: {})",
          name,
          if known.is_empty() { "none".to_string() } else { known.join(", ") }
        )
      })?,
      None => ConnectionConfig::default(),
    };

    let merged = overrides.or(&connection.or(&self.defaults));
    let base = merged.base.ok_or_else(|| {
      eyre!("No tracker configured. Pass --base or add a connection to ~/.config/trk/config.yaml")
    })?;
    let endpoint = format!(
      "{}{}",
      base.trim_end_matches('/'),
      merged.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    );
    let endpoint =
      Url::parse(&endpoint).map_err(|e| eyre!("Invalid tracker URL {}: {}", endpoint, e))?;

    Ok(ServiceConfig {
      name: name.unwrap_or_else(|| base.clone()),
      service: merged.service.unwrap_or_default(),
      base,
      endpoint,
      user: merged.user,
      timeout: Duration::from_secs(merged.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS)),
      search_fields: merged.search_fields,
    })
  }

  /// Get the tracker password from the environment.
  ///
  /// Checks TRK_PASSWORD.
  pub fn get_password() -> Result<String> {
    std::env::var("TRK_PASSWORD")
      .map_err(|_| eyre!("Tracker password not found. Set the TRK_PASSWORD environment variable."))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  const SAMPLE: &str = r#"
default_connection: python
defaults:
  service: roundup
  timeout: 10
  search_fields: [id, title]
connections:
  python:
    base: https://bugs.python.org/
    user: alice
  local:
    base: http://localhost:8080/tracker
    endpoint: /json
    timeout: 2
"#;

  fn sample() -> Config {
    serde_yaml::from_str(SAMPLE).unwrap()
  }

  #[test]
  fn test_connection_inherits_defaults() {
    let service = sample().resolve(None, ConnectionConfig::default()).unwrap();
    assert_eq!(service.name, "python");
    assert_eq!(service.service, ServiceKind::Roundup);
    assert_eq!(service.endpoint.as_str(), "https://bugs.python.org/rpc");
    assert_eq!(service.user.as_deref(), Some("alice"));
    assert_eq!(service.timeout, Duration::from_secs(10));
    assert_eq!(
      service.search_fields,
      Some(vec!["id".to_string(), "title".to_string()])
    );
  }

  #[test]
  fn test_connection_overrides_defaults() {
    let service = sample()
      .resolve(Some("local"), ConnectionConfig::default())
      .unwrap();
    assert_eq!(service.endpoint.as_str(), "http://localhost:8080/tracker/json");
    assert_eq!(service.timeout, Duration::from_secs(2));
    assert_eq!(service.user, None);
  }

  #[test]
  fn test_command_line_overrides_win() {
    let overrides = ConnectionConfig {
      user: Some("bob".to_string()),
      ..Default::default()
    };
    let service = sample().resolve(Some("python"), overrides).unwrap();
    assert_eq!(service.user.as_deref(), Some("bob"));
  }

  #[test]
  fn test_unknown_connection() {
    let err = sample()
      .resolve(Some("gentoo"), ConnectionConfig::default())
      .unwrap_err();
    assert!(err.to_string().contains("local, python"));
  }

  #[test]
  fn test_base_without_config() {
    let overrides = ConnectionConfig {
      base: Some("https://bugs.example.org".to_string()),
      ..Default::default()
    };
    let service = Config::default().resolve(None, overrides).unwrap();
    assert_eq!(service.name, "https://bugs.example.org");
    assert_eq!(service.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));

    assert!(Config::default()
      .resolve(None, ConnectionConfig::default())
      .is_err());
  }

  #[test]
  fn test_load_from_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(SAMPLE.as_bytes()).unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.connections.len(), 2);
    assert_eq!(config.default_connection.as_deref(), Some("python"));

    assert!(Config::load(Some(Path::new("/nonexistent/trk.yaml"))).is_err());
  }
}
