use crate::output::print_json;
use std::path::Path;
use topic_relay_core::WarnLevel;

pub fn run(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "actions": config.actions.len(),
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!(
            "Config is valid ({} action{}). No warnings.",
            config.actions.len(),
            if config.actions.len() == 1 { "" } else { "s" }
        );
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
