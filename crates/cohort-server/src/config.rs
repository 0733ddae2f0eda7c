//! Runtime configuration.

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

/// Server configuration, deserialised from `config.toml` and `COHORT_*`
/// environment variables. Every field has a default.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                 String,
  pub port:                 u16,
  pub store_path:           PathBuf,
  pub sweep_interval_secs:  u64,
  pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:                 "0.0.0.0".to_string(),
      port:                 8080,
      store_path:           PathBuf::from("cohort.db"),
      sweep_interval_secs:  60,
      request_timeout_secs: 30,
    }
  }
}

impl ServerConfig {
  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  /// Never zero; a zero interval would make the sweeper spin.
  pub fn sweep_interval(&self) -> Duration {
    Duration::from_secs(self.sweep_interval_secs.max(1))
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_sources_use_defaults() {
    let cfg: ServerConfig = ::config::Config::builder()
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap();
    assert_eq!(cfg.address(), "0.0.0.0:8080");
    assert_eq!(cfg.store_path, PathBuf::from("cohort.db"));
    assert_eq!(cfg.sweep_interval(), Duration::from_secs(60));
    assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
  }

  #[test]
  fn overrides_apply() {
    let cfg: ServerConfig = ::config::Config::builder()
      .set_override("port", 9000)
      .unwrap()
      .set_override("sweep_interval_secs", 0)
      .unwrap()
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap();
    assert_eq!(cfg.port, 9000);
    assert_eq!(cfg.sweep_interval(), Duration::from_secs(1));
  }
}
