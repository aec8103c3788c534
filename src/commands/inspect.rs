//! Read-only commands: current, history, heads, check.

use crate::commands::{open_manager, Output};
use crate::config::Config;
use crate::error::AppError;
use serde_json::json;

pub fn current(config: &Config, out: &Output) -> Result<(), AppError> {
    let manager = open_manager(config)?;
    let state = manager.current_revision()?;
    out.emit(&state, json!({ "current": state.to_string() }));
    Ok(())
}

pub fn history(config: &Config, out: &Output) -> Result<(), AppError> {
    let manager = open_manager(config)?;
    let entries = manager.history_entries()?;

    let mut lines = Vec::with_capacity(entries.len());
    for entry in entries.iter().rev() {
        let mut flags = Vec::new();
        if entry.head {
            flags.push("head");
        }
        if entry.current {
            flags.push("current");
        }
        let marker = if entry.applied { "*" } else { " " };
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" ({})", flags.join(", "))
        };
        lines.push(format!(
            "{} {} <- {}{}  {}",
            marker,
            entry.id,
            entry.parent.as_deref().unwrap_or("<base>"),
            flags,
            entry.description
        ));
    }
    if lines.is_empty() {
        lines.push("No revisions".to_string());
    }

    out.emit(lines.join("\n"), json!({ "revisions": entries }));
    Ok(())
}

pub fn heads(config: &Config, out: &Output) -> Result<(), AppError> {
    let manager = open_manager(config)?;
    let head = manager.history().head();
    let text = match head {
        Some(rev) => format!("{} (head)  {}", rev.id, rev.description),
        None => "No revisions".to_string(),
    };
    out.emit(
        text,
        json!({ "heads": head.map(|r| vec![r.id.to_string()]).unwrap_or_default() }),
    );
    Ok(())
}

pub fn check(config: &Config, out: &Output) -> Result<(), AppError> {
    let manager = open_manager(config)?;
    let model = config.load_model()?;
    let report = manager.check(model.as_ref())?;

    let mut lines = vec![format!("Checked {} revision(s)", report.revisions_checked)];
    for failure in &report.round_trip_failures {
        lines.push(format!("round trip failed for {}: {}", failure.revision, failure.detail));
    }
    for change in &report.pending_changes {
        lines.push(format!("model not covered by a revision: {}", change));
    }
    if !report.at_head {
        lines.push(format!(
            "database is at {}, not at head",
            manager.current_revision()?
        ));
    }
    out.emit(lines.join("\n"), json!(report));

    if report.is_clean() {
        Ok(())
    } else {
        Err(AppError::Validation("Check found problems".into()))
    }
}
