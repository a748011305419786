//! Workers, eligibility, and the load-balancing selector.

use serde::{Deserialize, Serialize};

use crate::aliases;
use crate::record::{AttributeRecord, FieldTable};

/// Personnel roles handled by the assignment passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Inspector,
    Supervisor,
    Commissioner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Inspector => "inspector",
            Role::Supervisor => "supervisor",
            Role::Commissioner => "commissioner",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One roster entry with its workload counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub object_id: i64,
    pub name: String,
    pub abbrev: String,
    pub username: Option<String>,
    pub region: Option<String>,
    pub department: Option<String>,
    /// Open cases currently assigned.
    pub pending_count: i64,
    /// Last code number issued. Never decremented.
    pub sequence_counter: i64,
}

impl Worker {
    /// Parse a roster row. Only the object id is mandatory; everything else
    /// degrades to a resolver default.
    pub fn from_record(record: &AttributeRecord, table: &FieldTable) -> Option<Self> {
        let object_id = record.resolve_i64(table, aliases::OBJECT_ID)?;
        Some(Self {
            object_id,
            name: record
                .resolve_str(table, aliases::ROSTER_NAME)
                .unwrap_or_else(|| "SinNombre".to_string()),
            abbrev: record
                .resolve_str(table, aliases::ROSTER_ABBREV)
                .unwrap_or_else(|| "XX".to_string()),
            username: record.resolve_str(table, aliases::ROSTER_USERNAME),
            region: record.resolve_str(table, aliases::ROSTER_REGION),
            department: record.resolve_str(table, aliases::ROSTER_DEPARTMENT),
            pending_count: record.resolve_i64(table, aliases::ROSTER_PENDING).unwrap_or(0),
            sequence_counter: record
                .resolve_i64(table, aliases::ROSTER_SEQUENCE)
                .unwrap_or(0),
        })
    }

    /// Copy with both counters advanced by one assignment. The orchestrator
    /// swaps this into its working roster immediately after generating a
    /// code, so the next selection in the same run sees the new load and the
    /// next sequence number.
    pub fn after_assignment(&self) -> Self {
        Self {
            pending_count: self.pending_count + 1,
            sequence_counter: self.sequence_counter + 1,
            ..self.clone()
        }
    }
}

/// Which workers a case may be assigned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EligibilityFilter {
    /// Any roster entry (supervision and commissioner passes).
    Any,
    /// Exact region + department match (inspection pass).
    RegionAndDepartment { region: String, department: String },
    /// A single pinned login.
    Username(String),
}

impl EligibilityFilter {
    pub fn matches(&self, worker: &Worker) -> bool {
        match self {
            EligibilityFilter::Any => true,
            EligibilityFilter::RegionAndDepartment { region, department } => {
                worker.region.as_deref() == Some(region.as_str())
                    && worker.department.as_deref() == Some(department.as_str())
            }
            EligibilityFilter::Username(username) => {
                worker.username.as_deref() == Some(username.as_str())
            }
        }
    }
}

/// Index of the eligible worker with the minimum pending count.
///
/// Ties break to the earliest roster index: only a strictly smaller count
/// displaces the current best, so the result is deterministic regardless of
/// how the underlying sort would order equal keys. An empty eligible set is
/// `None`; the caller skips the case.
pub fn select_worker(roster: &[Worker], filter: &EligibilityFilter) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, worker) in roster.iter().enumerate() {
        if !filter.matches(worker) {
            continue;
        }
        match best {
            Some(current) if roster[current].pending_count <= worker.pending_count => {}
            _ => best = Some(idx),
        }
    }
    best
}
