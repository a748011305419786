//! Assignment orchestrator: the state machine driving one run of one pass.
//!
//! Fetch snapshots, walk the eligible cases in fetch order, select and charge
//! a worker for each, then submit three batches in a fixed order: new tasks
//! first, case updates second, roster updates last. The batches are
//! independent remote operations, not a transaction; a failure in a later
//! batch after an earlier success is an accepted inconsistency window that
//! operators reconcile manually. The serializability gate runs before any
//! write and blocks the whole run on the first offending record.
//!
//! A run owns its in-memory roster copy, so no locking is needed inside a
//! run. Overlapping runs of the same pass are NOT safe against each other;
//! the external scheduler must guarantee at most one at a time.

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::aliases;
use crate::codegen;
use crate::config::{AsignaConfig, PassConfig};
use crate::error::RunError;
use crate::geometry;
use crate::record::{AttributeRecord, FieldTable};
use crate::roster::{select_worker, EligibilityFilter, Role, Worker};
use crate::store::{DatasetRef, EditResponse, FeatureStore, Filter};
use crate::task::{self, TaskInputs};

// ============================================================================
// Run report
// ============================================================================

/// The three output batches, in commit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Tasks,
    CaseUpdates,
    RosterUpdates,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Tasks => "tasks",
            BatchKind::CaseUpdates => "case-updates",
            BatchKind::RosterUpdates => "roster-updates",
        }
    }
}

impl std::fmt::Display for BatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one batch submission.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub batch: BatchKind,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Whole-batch error, when the remote call itself failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What one run did. Per-case skips live here, not in the error channel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub pass: String,
    pub dry_run: bool,
    pub cases_seen: usize,
    pub assignments: usize,
    pub skipped_no_worker: usize,
    pub tasks_skipped_no_directory: usize,
    pub batches: Vec<BatchOutcome>,
    pub attachments_copied: usize,
    pub attachment_failures: usize,
}

impl RunReport {
    /// True when some batch write failed (run still exits cleanly; the
    /// report is the operator's reconciliation signal).
    pub fn had_write_failures(&self) -> bool {
        self.batches
            .iter()
            .any(|b| b.failed > 0 || b.error.is_some())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop after the serializability gate; write nothing.
    pub dry_run: bool,
}

// ============================================================================
// The run itself
// ============================================================================

/// Execute one assignment pass against `store`.
///
/// `now` is injected so the run is a pure function of its inputs; the binary
/// passes `Utc::now()`.
pub fn run_pass(
    store: &dyn FeatureStore,
    config: &AsignaConfig,
    pass_name: &str,
    options: &RunOptions,
    now: DateTime<Utc>,
) -> Result<RunReport, RunError> {
    let pass = config.pass(pass_name)?;
    let mut report = RunReport {
        pass: pass_name.to_string(),
        dry_run: options.dry_run,
        ..RunReport::default()
    };

    // ---- Fetch ------------------------------------------------------------
    let cases = store.query(&config.datasets.cases, &pass.case_filter(), true)?;
    report.cases_seen = cases.len();
    info!(pass = pass_name, cases = cases.len(), "eligible cases fetched");
    if cases.is_empty() {
        return Ok(report);
    }

    let roster_records = store.query(&config.datasets.roster, &Filter::All, false)?;
    let directory_records = store.query(&config.datasets.workers, &Filter::All, false)?;

    // Field tables are built once per dataset per run; the three schemas are
    // independent and resolve separately.
    let case_table = FieldTable::from_records(&cases);
    let roster_table = FieldTable::from_records(&roster_records);
    let directory_table = FieldTable::from_records(&directory_records);

    let mut roster: Vec<Worker> = Vec::new();
    for record in &roster_records {
        match Worker::from_record(record, &roster_table) {
            Some(worker) => roster.push(worker),
            None => warn!("roster row without an object id, ignored"),
        }
    }
    debug!(workers = roster.len(), "roster snapshot parsed");

    // Directory join (login -> task-system id), built once. A miss later is
    // a normal per-case condition, not an error.
    let mut directory: HashMap<String, String> = HashMap::new();
    for record in &directory_records {
        let user = record.resolve_str(&directory_table, aliases::DIRECTORY_USER);
        let global_id = record.resolve_str(&directory_table, aliases::DIRECTORY_GLOBAL_ID);
        if let (Some(user), Some(global_id)) = (user, global_id) {
            directory.entry(user).or_insert(global_id);
        }
    }

    // Canonical output field names for this snapshot's schemas.
    let case_oid_field = canonical(&case_table, aliases::OBJECT_ID, "objectid");
    let case_state_field = canonical(&case_table, aliases::CASE_STATE, "estado_tramite");
    let roster_oid_field = canonical(&roster_table, aliases::OBJECT_ID, "objectid");
    let pending_field = canonical(&roster_table, aliases::ROSTER_PENDING, "num_tramites");
    let sequence_field = canonical(&roster_table, aliases::ROSTER_SEQUENCE, "ultimo_numero");

    // ---- Per-case processing ----------------------------------------------
    let year = now.year();
    let mut task_adds: Vec<AttributeRecord> = Vec::new();
    let mut task_case_oids: Vec<i64> = Vec::new();
    let mut case_updates: Vec<AttributeRecord> = Vec::new();
    let mut touched_workers: Vec<usize> = Vec::new();

    for case in &cases {
        let Some(case_oid) = case.resolve_i64(&case_table, aliases::OBJECT_ID) else {
            warn!("case without an object id, skipped");
            continue;
        };

        let Some(filter) = eligibility_for(pass, case, &case_table) else {
            warn!(case = case_oid, "case has no region/department to match, skipped");
            report.skipped_no_worker += 1;
            continue;
        };
        let Some(idx) = select_worker(&roster, &filter) else {
            warn!(case = case_oid, "no eligible worker, case left for the next run");
            report.skipped_no_worker += 1;
            continue;
        };
        let worker = roster[idx].clone();

        let area = pass
            .include_area_code
            .then(|| case.resolve_str(&case_table, aliases::CASE_AREA_ABBREV))
            .flatten();
        let code = codegen::next_code(
            &pass.code_prefix,
            &pass.role_code,
            &worker,
            year,
            area.as_deref(),
        );

        // Tentative increment, applied to the working copy before the next
        // selection so codes within one run never collide.
        roster[idx] = worker.after_assignment();
        if !touched_workers.contains(&idx) {
            touched_workers.push(idx);
        }
        report.assignments += 1;
        debug!(case = case_oid, worker = %worker.name, code = %code, "assigned");

        let global_id = case.resolve_str(&case_table, aliases::GLOBAL_ID);

        let mut update = AttributeRecord::new();
        update.set(case_oid_field.clone(), json!(case_oid));
        update.set(case_state_field.clone(), json!(pass.assigned_state.clone()));
        update.set(pass.assignee_field.clone(), json!(worker.name.clone()));
        if let (Some(field), Some(username)) = (&pass.assignee_login_field, &worker.username) {
            update.set(field.clone(), json!(username.clone()));
        }
        if let (Some(field), Some(global_id)) = (&pass.cross_reference_field, &global_id) {
            update.set(field.clone(), json!(global_id.clone()));
        }
        case_updates.push(update);

        // Directory miss: keep the case and roster updates, skip the task.
        let Some(username) = worker.username.as_deref() else {
            warn!(case = case_oid, worker = %worker.name, "worker has no login, task skipped");
            report.tasks_skipped_no_directory += 1;
            continue;
        };
        let Some(worker_global_id) = directory.get(username) else {
            warn!(case = case_oid, worker = username, "worker not in directory, task skipped");
            report.tasks_skipped_no_directory += 1;
            continue;
        };

        let description = task::render_description(case, &case_table, &pass.description);
        let location_fields: Vec<&str> = pass.location_fields.iter().map(String::as_str).collect();
        let location = case
            .resolve(&case_table, &location_fields)
            .cloned()
            .unwrap_or_else(|| Value::String(String::new()));
        let reference_time = case
            .resolve(&case_table, aliases::CASE_REFERENCE_DATE)
            .and_then(task::parse_reference_time);

        let inputs = TaskInputs {
            description: &description,
            location,
            work_order_id: global_id.unwrap_or_else(|| case_oid.to_string()),
            worker_global_id: worker_global_id.as_str(),
            case_code: pass.task_code_field.as_deref().map(|f| (f, code.as_str())),
            geometry: geometry::extract_geometry(case),
            reference_time,
        };
        task_adds.push(task::build_task(
            &inputs,
            &pass.assignment_type,
            pass.due_offset_days,
            pass.timestamp_encoding,
            now,
        ));
        task_case_oids.push(case_oid);
    }

    // One roster update per touched worker, carrying the final counters.
    let mut roster_updates: Vec<AttributeRecord> = Vec::new();
    for &idx in &touched_workers {
        let worker = &roster[idx];
        let mut update = AttributeRecord::new();
        update.set(roster_oid_field.clone(), json!(worker.object_id));
        update.set(pending_field.clone(), json!(worker.pending_count));
        update.set(sequence_field.clone(), json!(worker.sequence_counter));
        roster_updates.push(update);
    }

    // ---- Serializability gate (fail-closed) -------------------------------
    check_batch(BatchKind::Tasks, &task_adds)?;
    check_batch(BatchKind::CaseUpdates, &case_updates)?;
    check_batch(BatchKind::RosterUpdates, &roster_updates)?;

    if options.dry_run {
        info!(
            tasks = task_adds.len(),
            case_updates = case_updates.len(),
            roster_updates = roster_updates.len(),
            "dry run, nothing written"
        );
        return Ok(report);
    }

    // ---- Commit, fixed order ----------------------------------------------
    let task_response = commit(
        store,
        &config.datasets.tasks,
        BatchKind::Tasks,
        &task_adds,
        &[],
        &mut report,
    );
    commit(
        store,
        &config.datasets.cases,
        BatchKind::CaseUpdates,
        &[],
        &case_updates,
        &mut report,
    );
    commit(
        store,
        &config.datasets.roster,
        BatchKind::RosterUpdates,
        &[],
        &roster_updates,
        &mut report,
    );

    // ---- Attachment propagation -------------------------------------------
    if pass.copy_attachments {
        if let Some(response) = task_response {
            copy_attachments(store, config, &response, &task_case_oids, &mut report);
        }
    }

    Ok(report)
}

fn canonical(table: &FieldTable, candidates: &[&str], fallback: &str) -> String {
    table
        .find(candidates)
        .unwrap_or(fallback)
        .to_string()
}

/// Which workers may take this case under this pass.
fn eligibility_for(
    pass: &PassConfig,
    case: &AttributeRecord,
    table: &FieldTable,
) -> Option<EligibilityFilter> {
    if let Some(login) = &pass.fixed_worker {
        return Some(EligibilityFilter::Username(login.clone()));
    }
    match pass.role {
        Role::Inspector => {
            let region = case.resolve_str(table, aliases::CASE_REGION)?;
            let department = case.resolve_str(table, aliases::CASE_DEPARTMENT)?;
            Some(EligibilityFilter::RegionAndDepartment { region, department })
        }
        Role::Supervisor | Role::Commissioner => Some(EligibilityFilter::Any),
    }
}

/// Attribute values must be scalars; the destination's attribute columns
/// cannot take nested mappings or sequences. Geometry is checked separately
/// against the point form the service accepts. One bad record blocks the
/// whole run before anything is written.
fn check_batch(kind: BatchKind, records: &[AttributeRecord]) -> Result<(), RunError> {
    for (index, record) in records.iter().enumerate() {
        for (field, value) in &record.attributes {
            if !is_scalar(value) {
                return Err(RunError::SerializationViolation {
                    batch: kind.as_str(),
                    index,
                    field: field.clone(),
                });
            }
        }
        if let Some(geometry) = &record.geometry {
            if !is_valid_point_json(geometry) {
                return Err(RunError::SerializationViolation {
                    batch: kind.as_str(),
                    index,
                    field: "geometry".to_string(),
                });
            }
        }
    }
    Ok(())
}

fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
    )
}

fn is_valid_point_json(value: &Value) -> bool {
    let Value::Object(map) = value else {
        return false;
    };
    let finite = |key: &str| {
        map.get(key)
            .and_then(Value::as_f64)
            .map(f64::is_finite)
            .unwrap_or(false)
    };
    finite("x") && finite("y")
}

/// Submit one batch. A whole-batch error is recorded and the run moves on to
/// the next batch; there is no rollback of earlier successes.
fn commit(
    store: &dyn FeatureStore,
    dataset: &DatasetRef,
    kind: BatchKind,
    adds: &[AttributeRecord],
    updates: &[AttributeRecord],
    report: &mut RunReport,
) -> Option<EditResponse> {
    let attempted = adds.len() + updates.len();
    if attempted == 0 {
        debug!(batch = %kind, "empty batch, nothing to write");
        report.batches.push(BatchOutcome {
            batch: kind,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            error: None,
        });
        return None;
    }

    match store.apply_edits(dataset, adds, updates) {
        Ok(response) => {
            let succeeded = response
                .add_results
                .iter()
                .chain(&response.update_results)
                .filter(|r| r.success)
                .count();
            let failed = attempted.saturating_sub(succeeded);
            for result in response.add_results.iter().chain(&response.update_results) {
                if !result.success {
                    warn!(
                        batch = %kind,
                        error = result.error.as_deref().unwrap_or("unspecified"),
                        "item rejected"
                    );
                }
            }
            info!(batch = %kind, succeeded, failed, "batch committed");
            report.batches.push(BatchOutcome {
                batch: kind,
                attempted,
                succeeded,
                failed,
                error: None,
            });
            Some(response)
        }
        Err(e) => {
            warn!(batch = %kind, error = %e, "batch write failed, later batches still run");
            report.batches.push(BatchOutcome {
                batch: kind,
                attempted,
                succeeded: 0,
                failed: attempted,
                error: Some(e.to_string()),
            });
            None
        }
    }
}

/// Copy each source case's attachments onto its created task. Failures are
/// per-attachment and never fail the owning task or the run.
fn copy_attachments(
    store: &dyn FeatureStore,
    config: &AsignaConfig,
    response: &EditResponse,
    case_oids: &[i64],
    report: &mut RunReport,
) {
    for (result, case_oid) in response.add_results.iter().zip(case_oids) {
        if !result.success {
            continue;
        }
        let Some(task_oid) = result.object_id else {
            continue;
        };
        let infos = match store.list_attachments(&config.datasets.cases, *case_oid) {
            Ok(infos) => infos,
            Err(e) => {
                warn!(case = case_oid, error = %e, "cannot list attachments");
                report.attachment_failures += 1;
                continue;
            }
        };
        for info in infos {
            let copied = store
                .download_attachment(&config.datasets.cases, *case_oid, info.id)
                .and_then(|bytes| {
                    store.add_attachment(&config.datasets.tasks, task_oid, &info.name, bytes)
                });
            match copied {
                Ok(()) => report.attachments_copied += 1,
                Err(e) => {
                    warn!(attachment = %info.name, error = %e, "attachment copy failed");
                    report.attachment_failures += 1;
                }
            }
        }
    }
}
