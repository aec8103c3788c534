//! upgrade / downgrade / stamp commands.

use crate::app::MigrationReport;
use crate::commands::{open_manager, Output};
use crate::config::Config;
use crate::error::AppError;
use serde_json::json;

fn report_json(report: &MigrationReport) -> serde_json::Value {
    json!({
        "from": report.from.to_string(),
        "to": report.to.to_string(),
        "applied": report.applied.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
    })
}

fn report_text(verb: &str, report: &MigrationReport) -> String {
    if report.applied.is_empty() {
        format!("Nothing to {}, database is at {}", verb, report.to)
    } else {
        format!(
            "{} {} -> {} ({} step(s))",
            verb,
            report.from,
            report.to,
            report.applied.len()
        )
    }
}

pub fn upgrade(
    config: &Config,
    message: Option<&str>,
    target: &str,
    out: &Output,
) -> Result<(), AppError> {
    let mut manager = open_manager(config)?;

    let report = match message {
        Some(message) => {
            let model = config.load_model()?.ok_or_else(|| {
                AppError::Config(
                    "Generating a revision needs a model (--model or MODEL_PATH)".into(),
                )
            })?;
            let (generated, report) = manager.upgrade_with_message(message, &model, target)?;
            if let Some(rev) = generated {
                log::info!("Generated revision {} before upgrading", rev.id);
            }
            report
        }
        None => manager.upgrade(target)?,
    };
    out.emit(report_text("upgrade", &report), report_json(&report));
    Ok(())
}

pub fn downgrade(
    config: &Config,
    steps: usize,
    target: Option<&str>,
    out: &Output,
) -> Result<(), AppError> {
    let mut manager = open_manager(config)?;
    let report = match target {
        Some(target) => manager.downgrade_to(target)?,
        None => manager.downgrade(steps)?,
    };
    out.emit(report_text("downgrade", &report), report_json(&report));
    Ok(())
}

pub fn stamp(config: &Config, target: &str, out: &Output) -> Result<(), AppError> {
    let mut manager = open_manager(config)?;
    let state = manager.stamp(target)?;
    out.emit(
        format!("Stamped database at {}", state),
        json!({ "current": state.to_string() }),
    );
    Ok(())
}
