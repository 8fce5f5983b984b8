/* src/server/core/rust/src/config.rs */

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use trellis_router::{Action, ActionClient, RouterOptions, TrailingSlash, Value};
use trellis_serializer::FrameLimits;

use crate::transport::DEFAULT_MAX_GET_PAYLOAD;

/// Contents of `trellis.toml`. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StartConfig {
  #[serde(default)]
  pub router: RouterSection,
  #[serde(default)]
  pub server_fn: ServerFnSection,
  #[serde(default)]
  pub serializer: SerializerSection,
  #[serde(default)]
  pub actions: ActionsSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RouterSection {
  #[serde(default = "default_basepath")]
  pub basepath: String,
  #[serde(default)]
  pub trailing_slash: TrailingSlashSetting,
  #[serde(default)]
  pub case_sensitive: bool,
}

impl Default for RouterSection {
  fn default() -> Self {
    Self { basepath: default_basepath(), trailing_slash: TrailingSlashSetting::default(), case_sensitive: false }
  }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailingSlashSetting {
  Never,
  Always,
  #[default]
  Preserve,
}

impl From<TrailingSlashSetting> for TrailingSlash {
  fn from(setting: TrailingSlashSetting) -> Self {
    match setting {
      TrailingSlashSetting::Never => TrailingSlash::Never,
      TrailingSlashSetting::Always => TrailingSlash::Always,
      TrailingSlashSetting::Preserve => TrailingSlash::Preserve,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerFnSection {
  #[serde(default = "default_server_fn_base")]
  pub base: String,
  #[serde(default = "default_max_get_payload")]
  pub max_get_payload: usize,
}

impl Default for ServerFnSection {
  fn default() -> Self {
    Self { base: default_server_fn_base(), max_get_payload: default_max_get_payload() }
  }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SerializerSection {
  #[serde(default = "default_max_frame_size")]
  pub max_frame_size: usize,
  #[serde(default = "default_max_buffered")]
  pub max_buffered: usize,
}

impl Default for SerializerSection {
  fn default() -> Self {
    Self { max_frame_size: default_max_frame_size(), max_buffered: default_max_buffered() }
  }
}

impl SerializerSection {
  pub fn frame_limits(&self) -> FrameLimits {
    FrameLimits { max_frame_size: self.max_frame_size, max_buffered: self.max_buffered }
  }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActionsSection {
  #[serde(default = "default_max_submissions")]
  pub max_submissions: usize,
}

impl Default for ActionsSection {
  fn default() -> Self {
    Self { max_submissions: default_max_submissions() }
  }
}

fn default_basepath() -> String {
  "/".to_string()
}

fn default_server_fn_base() -> String {
  "/_serverFn".to_string()
}

fn default_max_get_payload() -> usize {
  DEFAULT_MAX_GET_PAYLOAD
}

fn default_max_frame_size() -> usize {
  trellis_serializer::frame::DEFAULT_MAX_FRAME_SIZE
}

fn default_max_buffered() -> usize {
  trellis_serializer::frame::DEFAULT_MAX_BUFFERED
}

fn default_max_submissions() -> usize {
  10
}

impl StartConfig {
  pub fn from_toml_str(s: &str) -> Result<Self> {
    let config: Self = toml::from_str(s).context("failed to parse trellis config")?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    if !self.router.basepath.starts_with('/') {
      bail!("router.basepath \"{}\" must start with '/'", self.router.basepath);
    }
    if !self.server_fn.base.starts_with('/') {
      bail!("server_fn.base \"{}\" must start with '/'", self.server_fn.base);
    }
    if self.server_fn.max_get_payload == 0 {
      bail!("server_fn.max_get_payload must be greater than zero");
    }
    if self.serializer.max_frame_size == 0 || self.serializer.max_buffered == 0 {
      bail!("serializer limits must be greater than zero");
    }
    if self.serializer.max_buffered < self.serializer.max_frame_size {
      bail!(
        "serializer.max_buffered ({}) is smaller than serializer.max_frame_size ({})",
        self.serializer.max_buffered,
        self.serializer.max_frame_size
      );
    }
    if self.actions.max_submissions == 0 {
      bail!("actions.max_submissions must be greater than zero");
    }
    Ok(())
  }

  /// Apply the `[router]` section on top of `base`.
  pub fn router_options(&self, base: RouterOptions) -> RouterOptions {
    RouterOptions {
      basepath: self.router.basepath.clone(),
      trailing_slash: self.router.trailing_slash.into(),
      case_sensitive: self.router.case_sensitive,
      ..base
    }
  }

  /// Action client capped by the `[actions]` section.
  pub fn action_client(&self, actions: impl IntoIterator<Item = Action>, context: Value) -> ActionClient {
    ActionClient::new(actions, context).with_default_max_submissions(self.actions.max_submissions)
  }
}

pub fn load_config(path: &Path) -> Result<StartConfig> {
  let content =
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
  let config = StartConfig::from_toml_str(&content).with_context(|| format!("invalid config {}", path.display()))?;
  tracing::debug!(path = %path.display(), "loaded trellis config");
  Ok(config)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn action_client_uses_configured_cap() {
    let config = StartConfig::from_toml_str("[actions]\nmax_submissions = 2").unwrap();
    let echo = Action::new("echo", |vars, _ctx| async move { Ok(vars) });
    let client = config.action_client([echo], Value::empty_object());
    for n in 0..4 {
      client.submit("echo", Value::from(f64::from(n))).await.unwrap();
    }
    assert_eq!(client.state("echo").unwrap().submissions.len(), 2);
  }

  #[test]
  fn empty_file_uses_defaults() {
    let config = StartConfig::from_toml_str("").unwrap();
    assert_eq!(config, StartConfig::default());
    assert_eq!(config.server_fn.base, "/_serverFn");
    assert_eq!(config.server_fn.max_get_payload, 1_000_000);
    assert_eq!(config.serializer.max_frame_size, 16 * 1024 * 1024);
    assert_eq!(config.actions.max_submissions, 10);
  }

  #[test]
  fn sections_override_defaults() {
    let config = StartConfig::from_toml_str(
      r#"
[router]
basepath = "/app"
trailing_slash = "never"
case_sensitive = true

[server_fn]
base = "/rpc"
max_get_payload = 2048

[serializer]
max_frame_size = 1024
max_buffered = 4096
"#,
    )
    .unwrap();
    let options = config.router_options(RouterOptions::default());
    assert_eq!(options.basepath, "/app");
    assert_eq!(options.trailing_slash, TrailingSlash::Never);
    assert!(options.case_sensitive);
    assert_eq!(config.server_fn.base, "/rpc");
    assert_eq!(config.serializer.frame_limits(), FrameLimits { max_frame_size: 1024, max_buffered: 4096 });
  }

  #[test]
  fn invalid_values_are_rejected() {
    let err = StartConfig::from_toml_str("[router]\nbasepath = \"app\"").unwrap_err();
    assert!(err.to_string().contains("router.basepath"));
    let err = StartConfig::from_toml_str("[server_fn]\nbase = \"rpc\"").unwrap_err();
    assert!(err.to_string().contains("server_fn.base"));
    assert!(StartConfig::from_toml_str("[server_fn]\nmax_get_payload = 0").is_err());
    assert!(StartConfig::from_toml_str("[actions]\nmax_submissions = 0").is_err());
    assert!(StartConfig::from_toml_str("[router]\ntrailing_slash = \"sometimes\"").is_err());
  }

  #[test]
  fn load_config_reads_a_file() {
    let dir = std::env::temp_dir().join("trellis-config-test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("trellis.toml");
    std::fs::write(&path, "[actions]\nmax_submissions = 3\n").unwrap();
    assert_eq!(load_config(&path).unwrap().actions.max_submissions, 3);
    assert!(load_config(&dir.join("missing.toml")).is_err());
  }
}
