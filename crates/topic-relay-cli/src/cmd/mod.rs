pub mod dispatch;
pub mod hydrate;
pub mod validate;

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use topic_relay_core::{Dispatcher, RelayConfig, ReqwestClient, WarnLevel};

pub fn load_config(path: &Path) -> anyhow::Result<RelayConfig> {
    RelayConfig::load(path).with_context(|| format!("failed to load config {}", path.display()))
}

/// Load and validate the config, then wire a dispatcher with the reqwest
/// client and the builtin handlers. Validation errors abort; warnings are
/// logged.
pub fn build_dispatcher(path: &Path) -> anyhow::Result<Dispatcher> {
    let config = load_config(path)?;
    for warning in config.validate() {
        match warning.level {
            WarnLevel::Warning => tracing::warn!("{}", warning.message),
            WarnLevel::Error => anyhow::bail!("invalid config: {}", warning.message),
        }
    }

    let http = ReqwestClient::new(&config.settings).context("failed to build HTTP client")?;
    let handlers = crate::builtin::registry();
    Dispatcher::new(Arc::new(config), Arc::new(http), Arc::new(handlers))
        .context("failed to prepare topic patterns")
}
