//! revision command: author a revision from the model.

use crate::commands::{open_manager, Output};
use crate::config::Config;
use crate::error::AppError;
use serde_json::json;

pub fn generate(config: &Config, message: &str, out: &Output) -> Result<(), AppError> {
    let model = config.load_model()?.ok_or_else(|| {
        AppError::Config("Generating a revision needs a model (--model or MODEL_PATH)".into())
    })?;
    let mut manager = open_manager(config)?;
    match manager.autogenerate(message, &model)? {
        Some(rev) => out.emit(
            format!("Generated revision {} ({})", rev.id, rev.file_name()),
            json!({ "revision": rev.id.to_string(), "parent": rev.parent.map(|p| p.to_string()) }),
        ),
        None => out.emit("No schema changes detected", json!({ "revision": null })),
    }
    Ok(())
}
