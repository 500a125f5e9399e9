use crate::output::{print_json, print_table};
use anyhow::Context;
use serde_json::{json, Value};
use std::path::Path;
use topic_relay_core::RunnableAction;

fn read_payload(inline: Option<&str>, file: Option<&Path>) -> anyhow::Result<Value> {
    match (inline, file) {
        (Some(text), _) => serde_json::from_str(text).context("--payload is not valid JSON"),
        (None, Some(path)) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("{} is not valid JSON", path.display()))
        }
        (None, None) => anyhow::bail!("one of --payload or --payload-file is required"),
    }
}

fn target(runnable: &RunnableAction) -> String {
    match runnable {
        RunnableAction::Endpoint { method, url, .. } => format!("{method} {url}"),
        RunnableAction::CustomHandlers { handlers, .. } => handlers
            .iter()
            .map(|h| h.name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

pub fn run(
    config_path: &Path,
    topic: &str,
    payload: Option<&str>,
    payload_file: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let payload = read_payload(payload, payload_file)?;
    let dispatcher = super::build_dispatcher(config_path)?;

    let mut records = Vec::new();
    let mut rows = Vec::new();
    let mut failures = 0;

    let mut actions = dispatcher.actions_for_topic(topic, &payload);
    while let Some(item) = actions.next() {
        match item {
            Ok((name, runnable)) => {
                let requests = match &runnable {
                    RunnableAction::Endpoint { entries, .. } => entries.len().to_string(),
                    RunnableAction::CustomHandlers { .. } => "-".to_string(),
                };
                rows.push(vec![name.clone(), target(&runnable), requests]);
                let mut record = runnable.describe();
                record["action"] = json!(name);
                records.push(record);
            }
            Err(e) => {
                failures += 1;
                let name = actions.last_action().unwrap_or("-").to_string();
                rows.push(vec![name.clone(), format!("error: {e}"), "-".to_string()]);
                records.push(json!({"action": name, "error": e.to_string()}));
            }
        }
    }

    if json {
        print_json(&json!({"topic": topic, "actions": records}))?;
    } else if rows.is_empty() {
        println!("No actions match topic '{topic}'.");
    } else {
        print_table(&["ACTION", "TARGET", "REQUESTS"], &rows);
    }

    if failures > 0 {
        anyhow::bail!("{failures} action(s) failed to hydrate");
    }
    Ok(())
}
