//! Output helpers shared across handlers.

use anyhow::Result;
use asset_tiers::models::ItemError;
use serde::Serialize;

/// Chooses between human summaries and JSON on stdout.
pub(crate) struct Output {
    json: bool,
}

impl Output {
    pub(crate) fn new(json: bool) -> Self {
        Self { json }
    }

    /// Print `value` as JSON, or run `summary` for the human form.
    pub(crate) fn report<T: Serialize>(&self, value: &T, summary: impl FnOnce()) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            summary();
        }
        Ok(())
    }
}

pub(crate) fn print_item_errors(errors: &[ItemError]) {
    for item in errors {
        println!("  FAIL {}: {}", item.key, item.message);
    }
}

pub(crate) fn print_messages(label: &str, messages: &[String]) {
    for message in messages {
        println!("  {} {}", label, message);
    }
}
