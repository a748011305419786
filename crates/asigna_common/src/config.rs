//! Run configuration.
//!
//! Configuration lives in /etc/asigna/config.toml. Each assignment pass is a
//! `[passes.<name>]` table carrying the pass's input/output states, the
//! assignment-type identifier of the destination task system, the due-date
//! offset, and the schema policy (which case fields feed the description,
//! which field receives the assignee's name, and so on).
//!
//! The assignment-type GUIDs are deliberately NOT defaulted: they identify
//! objects in someone's task-tracking deployment and must come from the
//! config file. `validate()` rejects a pass without one before any remote
//! call is made.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::RunError;
use crate::roster::Role;
use crate::store::{DatasetRef, Filter, Session};
use crate::task::{DescriptionField, TimestampEncoding};

/// System configuration directory.
pub const SYSTEM_CONFIG_DIR: &str = "/etc/asigna";
const CONFIG_FILE: &str = "config.toml";

/// Environment variable holding the portal access token. Token acquisition
/// (username/password exchange, OAuth) happens outside this engine.
pub const ENV_TOKEN: &str = "ASIGNA_TOKEN";

/// One field-equality term of a pass's extra case filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldEquals {
    pub field: String,
    pub value: String,
}

/// Configuration of one assignment pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassConfig {
    pub role: Role,
    /// Exact lifecycle state a case must be in to enter this pass.
    pub input_state: String,
    /// State written back once the case is assigned.
    pub assigned_state: String,
    /// Assignment-type identifier in the task system. Must be supplied.
    #[serde(default)]
    pub assignment_type: String,
    #[serde(default = "default_due_offset_days")]
    pub due_offset_days: i64,
    #[serde(default)]
    pub timestamp_encoding: TimestampEncoding,
    #[serde(default = "default_code_prefix")]
    pub code_prefix: String,
    pub role_code: String,
    /// Include the case's area abbreviation in generated codes.
    #[serde(default)]
    pub include_area_code: bool,
    /// Copy case attachments onto created tasks.
    #[serde(default)]
    pub copy_attachments: bool,
    /// Pin the pass to a single login instead of balancing over the roster.
    #[serde(default)]
    pub fixed_worker: Option<String>,
    /// Extra equality terms ANDed into the case query.
    #[serde(default)]
    pub extra_case_filter: Vec<FieldEquals>,
    /// Case field receiving the assignee's display name.
    pub assignee_field: String,
    /// Case field receiving the assignee's login, if the schema has one.
    #[serde(default)]
    pub assignee_login_field: Option<String>,
    /// Case field receiving the case's own unique id for cross-referencing.
    #[serde(default)]
    pub cross_reference_field: Option<String>,
    /// Task field receiving the generated case code.
    #[serde(default)]
    pub task_code_field: Option<String>,
    /// Case fields (in preference order) feeding the task's location text.
    #[serde(default = "default_location_fields")]
    pub location_fields: Vec<String>,
    /// Description template, rendered line by line from the case record.
    #[serde(default)]
    pub description: Vec<DescriptionField>,
}

fn default_due_offset_days() -> i64 {
    3
}

fn default_code_prefix() -> String {
    "DGSH".to_string()
}

fn default_location_fields() -> Vec<String> {
    vec!["direccion".to_string()]
}

impl PassConfig {
    /// Inspection pass: new complaints, balanced over region/department
    /// matched inspectors, attachments copied to the field task.
    pub fn default_inspection() -> Self {
        Self {
            role: Role::Inspector,
            input_state: "Recibido".to_string(),
            assigned_state: "En proceso".to_string(),
            assignment_type: String::new(),
            due_offset_days: default_due_offset_days(),
            timestamp_encoding: TimestampEncoding::default(),
            code_prefix: default_code_prefix(),
            role_code: "IN".to_string(),
            include_area_code: false,
            copy_attachments: true,
            fixed_worker: None,
            extra_case_filter: Vec::new(),
            assignee_field: "inspector_asignado".to_string(),
            assignee_login_field: Some("username".to_string()),
            cross_reference_field: None,
            task_code_field: None,
            location_fields: vec![
                "area_responsable".to_string(),
                "direccion".to_string(),
            ],
            description: vec![
                DescriptionField::new(
                    "Infracción reportada",
                    &["tipo_infraccion"],
                    "Sin especificar",
                ),
                DescriptionField::new("Referencia", &["direccion_infraccion"], "Sin referencia"),
                DescriptionField::new("Denunciado", &["denunciado"], "No registrado"),
                DescriptionField::new(
                    "Información adicional",
                    &["comentario_denuncia"],
                    "Sin detalle",
                ),
                DescriptionField::new(
                    "Contacto del denunciante",
                    &["contacto_denunciante_no"],
                    "No disponible",
                ),
            ],
        }
    }

    /// Supervision pass: submitted inspection reports routed to supervision.
    pub fn default_supervision() -> Self {
        Self {
            role: Role::Supervisor,
            input_state: "Informe enviado".to_string(),
            assigned_state: "En supervisión".to_string(),
            role_code: "SU".to_string(),
            copy_attachments: true,
            assignee_field: "supervisor_asignado".to_string(),
            assignee_login_field: None,
            description: vec![
                DescriptionField::new("Infracción reportada", &["infractor"], "Sin especificar"),
                DescriptionField::new("Referencia", &["direccion"], "Sin referencia"),
                DescriptionField::new(
                    "Inspector",
                    &["inspector_inspeccion"],
                    "No registrado",
                ),
                DescriptionField::new("Cedula Infractor", &["cedula_infractor"], "No registrado"),
                DescriptionField::new(
                    "Nombre denunciado",
                    &["nombre_denunciado"],
                    "No registrado",
                ),
                DescriptionField::new("Antecedentes", &["antecedentes"], "---"),
                DescriptionField::new("Desarrollo", &["desarrollo"], "---"),
                DescriptionField::new("Conclusiones", &["conclusiones"], "---"),
            ],
            ..Self::default_inspection()
        }
    }

    /// Commissioner pass: finished supervisions that require an
    /// administrative process, stamped with a form code.
    pub fn default_commissioner() -> Self {
        Self {
            role: Role::Commissioner,
            input_state: "Supervision Finalizada".to_string(),
            assigned_state: "Asignado a comisario".to_string(),
            role_code: "CO".to_string(),
            copy_attachments: false,
            extra_case_filter: vec![FieldEquals {
                field: "proceso_administrativo".to_string(),
                value: "Si".to_string(),
            }],
            assignee_field: "comisario_asignado".to_string(),
            assignee_login_field: None,
            cross_reference_field: Some("id_denuncia_comparar_comisario".to_string()),
            task_code_field: Some("codigoformulario".to_string()),
            description: vec![
                DescriptionField::new("Informe", &["estado_tramite"], "Supervisión finalizada"),
                DescriptionField::new("Infractor", &["cedula_infractor"], ""),
                DescriptionField::new(
                    "Proceso administrativo",
                    &["proceso_administrativo"],
                    "",
                ),
            ],
            ..Self::default_inspection()
        }
    }

    /// The case query for this pass: exact input state plus any extra terms.
    pub fn case_filter(&self) -> Filter {
        let mut terms = vec![Filter::eq("estado_tramite", self.input_state.as_str())];
        for extra in &self.extra_case_filter {
            terms.push(Filter::eq(&extra.field, extra.value.as_str()));
        }
        Filter::and(terms)
    }
}

/// The four remote datasets one deployment talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Personnel table with workload counters.
    pub roster: DatasetRef,
    /// Case/complaint layer.
    pub cases: DatasetRef,
    /// Task layer in the tracking system.
    pub tasks: DatasetRef,
    /// Worker directory layer in the tracking system.
    pub workers: DatasetRef,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsignaConfig {
    #[serde(default = "default_portal_url")]
    pub portal_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    pub datasets: DatasetConfig,
    #[serde(default = "default_passes")]
    pub passes: BTreeMap<String, PassConfig>,
}

fn default_portal_url() -> String {
    "https://www.arcgis.com".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_passes() -> BTreeMap<String, PassConfig> {
    BTreeMap::from([
        ("inspection".to_string(), PassConfig::default_inspection()),
        ("supervision".to_string(), PassConfig::default_supervision()),
        ("commissioner".to_string(), PassConfig::default_commissioner()),
    ])
}

impl AsignaConfig {
    pub fn default_path() -> PathBuf {
        PathBuf::from(SYSTEM_CONFIG_DIR).join(CONFIG_FILE)
    }

    pub fn load(path: &Path) -> Result<Self, RunError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| RunError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| RunError::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RunError> {
        if self.passes.is_empty() {
            return Err(RunError::Config("no passes configured".to_string()));
        }
        for (name, pass) in &self.passes {
            if pass.assignment_type.trim().is_empty() {
                return Err(RunError::Config(format!(
                    "pass '{name}' is missing assignment_type"
                )));
            }
            if pass.input_state.trim().is_empty() || pass.assigned_state.trim().is_empty() {
                return Err(RunError::Config(format!(
                    "pass '{name}' needs both input_state and assigned_state"
                )));
            }
            if pass.due_offset_days < 0 {
                return Err(RunError::Config(format!(
                    "pass '{name}' has a negative due_offset_days"
                )));
            }
        }
        Ok(())
    }

    pub fn pass(&self, name: &str) -> Result<&PassConfig, RunError> {
        self.passes.get(name).ok_or_else(|| {
            RunError::Config(format!(
                "pass '{name}' is not configured (have: {})",
                self.passes.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })
    }
}

/// Build the portal session from the environment. Missing credentials are a
/// fatal configuration error, reported before any remote call.
pub fn session_from_env(portal_url: &str) -> Result<Session, RunError> {
    match std::env::var(ENV_TOKEN) {
        Ok(token) if !token.trim().is_empty() => Ok(Session::new(portal_url, token.trim())),
        _ => Err(RunError::Config(format!(
            "no session token found: set {ENV_TOKEN} in the environment"
        ))),
    }
}
