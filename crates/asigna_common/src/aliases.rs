//! Historical field-name variants per dataset.
//!
//! The roster table, the case layer, and the worker directory have all been
//! republished several times with renamed or re-cased columns. Every variant
//! ever observed lives here, in preference order; `record::FieldTable`
//! resolves them case-insensitively against whatever schema a given snapshot
//! actually carries. Adding a new variant is a one-line change.

/// Object id, common to every dataset.
pub const OBJECT_ID: &[&str] = &["objectid", "OBJECTID", "oid", "object_id"];

/// Globally-unique record identifier.
pub const GLOBAL_ID: &[&str] = &["globalid", "GlobalID", "GLOBALID"];

// ---------------------------------------------------------------------------
// Roster table
// ---------------------------------------------------------------------------

pub const ROSTER_NAME: &[&str] = &["nombre", "name"];
pub const ROSTER_ABBREV: &[&str] = &["siglas", "siglas_inspector", "sigla"];
// "nomre_de_usuario" is a typo in the published table, kept as-is.
pub const ROSTER_USERNAME: &[&str] =
    &["nomre_de_usuario", "usernamearc", "username", "userid", "usuario"];
pub const ROSTER_PENDING: &[&str] = &["num_tramites", "numtramites", "num_tramite"];
pub const ROSTER_SEQUENCE: &[&str] = &["ultimo_numero", "ultimo_num", "ultimo"];
pub const ROSTER_REGION: &[&str] = &["direccion"];
pub const ROSTER_DEPARTMENT: &[&str] = &["area"];

// ---------------------------------------------------------------------------
// Case layer
// ---------------------------------------------------------------------------

pub const CASE_STATE: &[&str] = &["estado_tramite"];
pub const CASE_REGION: &[&str] = &["direccion_responsable"];
pub const CASE_DEPARTMENT: &[&str] = &["area_responsable"];
pub const CASE_AREA_ABBREV: &[&str] = &["siglas_area", "siglas"];
pub const CASE_REFERENCE_DATE: &[&str] = &["fecha_actual"];

// ---------------------------------------------------------------------------
// Worker directory (task-tracking system)
// ---------------------------------------------------------------------------

pub const DIRECTORY_USER: &[&str] = &["userid", "username", "user", "usuario"];
pub const DIRECTORY_GLOBAL_ID: &[&str] = &["GlobalID", "globalid"];
