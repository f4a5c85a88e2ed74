//! Eval command - evaluate a script in the platform's engine session.

use anyhow::{Context, Result};
use blinder_engine::EngineValue;
use blinder_platform::Platform;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args)]
pub struct EvalCommand {
    /// Script file to evaluate
    #[arg(required_unless_present = "expr")]
    pub file: Option<PathBuf>,

    /// Evaluate this source instead of a file
    #[arg(long, short = 'e', conflicts_with = "file")]
    pub expr: Option<String>,

    /// Evaluate the bootstrap sources first
    #[arg(long)]
    pub bootstrap: bool,

    /// Keep the session alive this long so timers can fire (milliseconds)
    #[arg(long, default_value_t = 0)]
    pub wait: u64,
}

impl EvalCommand {
    pub async fn run(&self, platform: &Platform) -> Result<()> {
        let (source, name) = match (&self.expr, &self.file) {
            (Some(expr), _) => (expr.clone(), "<eval>".to_string()),
            (None, Some(file)) => (
                std::fs::read_to_string(file)
                    .with_context(|| format!("Failed to read {}", file.display()))?,
                file.display().to_string(),
            ),
            (None, None) => anyhow::bail!("Nothing to evaluate"),
        };

        if self.bootstrap {
            for resource in &platform.config().bootstrap_sources {
                platform.evaluate_resource(resource)?;
            }
        }

        let session = platform.js_engine()?;
        let value = session.evaluate(&source, &name)?;
        if !value.is_undefined() {
            println!("{}", render(&value));
        }

        if self.wait > 0 {
            tokio::time::sleep(Duration::from_millis(self.wait)).await;
        }
        Ok(())
    }
}

/// Strings print raw, everything else as JSON where possible.
fn render(value: &EngineValue) -> String {
    if value.is_string() || value.is_function() {
        return value.as_string().unwrap_or_default();
    }
    match value.to_json() {
        Ok(json) => json.to_string(),
        Err(_) => value
            .as_string()
            .unwrap_or_else(|_| "[unprintable]".to_string()),
    }
}
