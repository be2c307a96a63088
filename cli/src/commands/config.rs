use clap::Subcommand;
use sentinel_core::{ConfigError, EngineConfig};
use serde_json::json;

use crate::util::{print_json, print_json_err};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate an admission config file without starting the server
    Check {
        /// Path to the JSON config file
        path: String,
    },
}

pub fn run(command: ConfigCommands) -> i32 {
    match command {
        ConfigCommands::Check { path } => check(&path),
    }
}

fn check(path: &str) -> i32 {
    match EngineConfig::from_file(path) {
        Ok(config) => {
            print_json(&json!({
                "valid": true,
                "path": path,
                "config": config
            }));
            0
        }
        Err(err) => {
            let (body, code) = describe_error(path, &err);
            print_json_err(&body);
            code
        }
    }
}

/// Structured report and exit code for a config failure.
/// An unreadable file is a usage error (4); a bad document is a client error (1).
fn describe_error(path: &str, err: &ConfigError) -> (serde_json::Value, i32) {
    match err {
        ConfigError::Io { .. } => (
            json!({
                "error": "cli_error",
                "message": err.to_string(),
                "docs_hint": "Check that the path exists and is readable."
            }),
            4,
        ),
        ConfigError::Parse(_) => (
            json!({
                "error": "validation_failed",
                "valid": false,
                "path": path,
                "message": err.to_string(),
                "docs_hint": "The file must be a JSON object using only known fields; omitted fields take defaults."
            }),
            1,
        ),
        ConfigError::Invalid { field, .. } => (
            json!({
                "error": "validation_failed",
                "valid": false,
                "path": path,
                "field": field,
                "message": err.to_string()
            }),
            1,
        ),
    }
}
