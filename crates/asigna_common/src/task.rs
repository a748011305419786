//! Work-order payload assembly.
//!
//! `build_task` is a pure function from a case + resolved worker to the
//! attribute record the task-tracking layer accepts. Timestamps go out in one
//! configured encoding for the whole pass (the destination schema accepts
//! ISO-8601 strings or epoch milliseconds, never a mix), and description text
//! is sanitized because the destination renders it in a context where raw
//! markup and control characters break either rendering or transport.

use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::geometry::Point;
use crate::record::{AttributeRecord, FieldTable};

/// Workforce status code for a freshly assigned task.
pub const TASK_STATUS_ASSIGNED: i64 = 1;
/// Default priority.
pub const TASK_PRIORITY_NONE: i64 = 0;

/// Placeholder written over "no data" sentinels in description text.
const NO_DATA_PLACEHOLDER: &str = "No disponible";

/// How outgoing timestamps are encoded. One choice per pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampEncoding {
    #[default]
    Iso8601,
    EpochMillis,
}

impl TimestampEncoding {
    pub fn encode(&self, ts: DateTime<Utc>) -> Value {
        match self {
            TimestampEncoding::Iso8601 => {
                Value::String(ts.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            TimestampEncoding::EpochMillis => json!(ts.timestamp_millis()),
        }
    }
}

/// One line of a pass's description template: a label plus the historical
/// names of the case field that fills it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptionField {
    pub label: String,
    pub fields: Vec<String>,
    #[serde(default = "default_line_value")]
    pub default: String,
}

fn default_line_value() -> String {
    NO_DATA_PLACEHOLDER.to_string()
}

impl DescriptionField {
    pub fn new(label: &str, fields: &[&str], default: &str) -> Self {
        Self {
            label: label.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            default: default.to_string(),
        }
    }
}

/// Render a pass's description template against one case record.
pub fn render_description(
    case: &AttributeRecord,
    table: &FieldTable,
    template: &[DescriptionField],
) -> String {
    template
        .iter()
        .map(|line| {
            let fields: Vec<&str> = line.fields.iter().map(|f| f.as_str()).collect();
            let value = case
                .resolve_str(table, &fields)
                .unwrap_or_else(|| line.default.clone());
            format!("{}: {}", line.label, value)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip markup, collapse newlines to a visible separator, and replace
/// no-data sentinels.
pub fn sanitize_description(raw: &str) -> String {
    let replaced = raw.replace("<NA>", NO_DATA_PLACEHOLDER).replace("<na>", NO_DATA_PLACEHOLDER);

    // Drop any remaining <...> spans; an unclosed tag swallows to end of text.
    let mut stripped = String::with_capacity(replaced.len());
    let mut in_tag = false;
    for ch in replaced.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            c if !in_tag => stripped.push(c),
            _ => {}
        }
    }

    stripped
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Best-effort parse of a case's reference timestamp (ISO string or epoch
/// milliseconds). Unparseable values degrade to `None` and the due date
/// falls back to "now".
pub fn parse_reference_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok(),
        Value::Number(n) => {
            let millis = n.as_i64()?;
            Utc.timestamp_millis_opt(millis).single()
        }
        _ => None,
    }
}

/// Everything the builder needs from one case/worker pairing.
#[derive(Debug, Clone)]
pub struct TaskInputs<'a> {
    /// Rendered but not yet sanitized description text.
    pub description: &'a str,
    /// Free-text location, passed through from the case record.
    pub location: Value,
    /// The case's unique identifier, cross-referenced by the destination.
    pub work_order_id: String,
    /// The worker's identifier in the task system (directory lookup result).
    pub worker_global_id: &'a str,
    /// Generated case code and the destination field carrying it, if the
    /// pass stamps codes onto tasks.
    pub case_code: Option<(&'a str, &'a str)>,
    pub geometry: Option<Point>,
    /// Case reference timestamp; due date falls back to `now` without it.
    pub reference_time: Option<DateTime<Utc>>,
}

/// Assemble the task record. Pure; `now` is injected by the caller.
pub fn build_task(
    inputs: &TaskInputs<'_>,
    assignment_type: &str,
    due_offset_days: i64,
    encoding: TimestampEncoding,
    now: DateTime<Utc>,
) -> AttributeRecord {
    let due = inputs.reference_time.unwrap_or(now) + Duration::days(due_offset_days);

    let mut task = AttributeRecord::new();
    task.set("description", Value::String(sanitize_description(inputs.description)));
    task.set("status", json!(TASK_STATUS_ASSIGNED));
    task.set("priority", json!(TASK_PRIORITY_NONE));
    task.set("assignmenttype", Value::String(assignment_type.to_string()));
    task.set("location", inputs.location.clone());
    task.set("workorderid", Value::String(inputs.work_order_id.clone()));
    task.set("workerid", Value::String(inputs.worker_global_id.to_string()));
    task.set("duedate", encoding.encode(due));
    task.set("assigneddate", encoding.encode(now));
    if let Some((field, code)) = inputs.case_code {
        task.set(field, Value::String(code.to_string()));
    }
    task.geometry = inputs.geometry.map(|p| p.to_esri_json());
    task
}
