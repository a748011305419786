//! Human-readable case code generation.
//!
//! Codes look like `DGSH-CO-PC-2026-42`: institutional prefix, role code,
//! worker abbreviation, optionally the responsible area's abbreviation, the
//! year, and the worker's next sequence number. The generator never mutates
//! the worker; persisting the incremented counter is the orchestrator's job,
//! and it must apply the increment to its in-memory copy before selecting for
//! the next case or two cases landing on the same worker would collide.

use crate::roster::Worker;

/// Next case code for `worker`. `sequence = worker.sequence_counter + 1`.
pub fn next_code(
    prefix: &str,
    role_code: &str,
    worker: &Worker,
    year: i32,
    area_abbrev: Option<&str>,
) -> String {
    let sequence = worker.sequence_counter + 1;
    match area_abbrev {
        Some(area) => format!(
            "{prefix}-{role_code}-{}-{area}-{year}-{sequence}",
            worker.abbrev
        ),
        None => format!("{prefix}-{role_code}-{}-{year}-{sequence}", worker.abbrev),
    }
}
