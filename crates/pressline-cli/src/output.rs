use std::time::Duration;

use colored::Colorize;
use pressline_cache::SlotState;
use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::Style;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_warning(msg: &str) {
    println!("{} {}", "!".yellow(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Two-column table of label/value rows.
pub fn print_rows(rows: &[(&str, String)]) {
    let mut builder = Builder::default();
    builder.push_record(["Field", "Value"]);
    for (label, value) in rows {
        builder.push_record([label.to_string(), value.clone()]);
    }
    let table = builder.build().with(Style::rounded()).to_string();
    println!("{table}");
}

pub fn describe_slot(state: &SlotState) -> String {
    match state {
        SlotState::Value { bytes } => format!("value ({bytes} bytes)"),
        SlotState::Negative => "negative (confirmed absent)".to_string(),
        SlotState::Absent => "-".to_string(),
        SlotState::Corrupt(reason) => format!("corrupt: {reason}"),
    }
}

pub fn slot_json(state: &SlotState) -> Value {
    match state {
        SlotState::Value { bytes } => serde_json::json!({ "state": "value", "bytes": bytes }),
        SlotState::Negative => serde_json::json!({ "state": "negative" }),
        SlotState::Absent => serde_json::json!({ "state": "absent" }),
        SlotState::Corrupt(reason) => serde_json::json!({ "state": "corrupt", "reason": reason }),
    }
}

pub fn format_duration(duration: Option<Duration>) -> String {
    match duration {
        Some(d) if d.as_secs() >= 1 => format!("{:.1}s", d.as_secs_f64()),
        Some(d) => format!("{}ms", d.as_millis()),
        None => "-".to_string(),
    }
}
