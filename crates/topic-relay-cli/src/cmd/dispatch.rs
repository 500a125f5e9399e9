use crate::output::{print_json_line, print_table};
use anyhow::Context;
use std::io::{BufRead, BufReader};
use std::path::Path;
use topic_relay_core::{handle_message, LocalMessage, MessageReport};

fn open_input(input: Option<&Path>) -> anyhow::Result<Box<dyn BufRead>> {
    Ok(match input {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(std::io::stdin())),
    })
}

fn summary_row(report: &MessageReport) -> Vec<String> {
    let actions = report
        .actions
        .iter()
        .map(|a| {
            let name = a.name.as_deref().unwrap_or("-");
            let state = serde_json::to_value(a.state)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            format!("{name}:{state}")
        })
        .collect::<Vec<_>>()
        .join(", ");
    vec![
        report.message_id.clone(),
        report.topic.clone(),
        if actions.is_empty() { "-".to_string() } else { actions },
        match (&report.delete_error, report.deleted) {
            (Some(e), _) => format!("no ({e})"),
            (None, true) => "yes".to_string(),
            (None, false) => "no".to_string(),
        },
    ]
}

pub fn run(config_path: &Path, input: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let dispatcher = super::build_dispatcher(config_path)?;
    let reader = open_input(input)?;

    let mut rows = Vec::new();
    let mut handled = 0usize;
    let mut kept = 0usize;

    for (index, line) in reader.lines().enumerate() {
        let line = line.context("failed to read messages")?;
        if line.trim().is_empty() {
            continue;
        }
        handled += 1;

        let report = LocalMessage::from_json_str(&line)
            .and_then(|mut message| handle_message(&dispatcher, &mut message));
        let report = match report {
            Ok(report) => report,
            Err(e) => {
                kept += 1;
                tracing::error!(line = index + 1, error = %e, "message could not be handled");
                continue;
            }
        };

        if !report.deleted {
            kept += 1;
        }
        if json {
            print_json_line(&report)?;
        } else {
            rows.push(summary_row(&report));
        }
    }

    if !json {
        if !rows.is_empty() {
            print_table(&["MESSAGE", "TOPIC", "ACTIONS", "DELETED"], &rows);
        }
        println!("{handled} message(s) handled, {} deleted, {kept} kept", handled - kept);
    }

    if kept > 0 {
        anyhow::bail!("{kept} message(s) were not deleted");
    }
    Ok(())
}
