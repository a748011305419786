//! End-to-end assignment pass scenarios against the in-memory store.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use asigna_common::config::{AsignaConfig, DatasetConfig, PassConfig};
use asigna_common::error::RunError;
use asigna_common::orchestrator::{run_pass, BatchKind, RunOptions};
use asigna_common::record::AttributeRecord;
use asigna_common::store::{AttachmentInfo, DatasetRef, MemoryFeatureStore};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

fn datasets() -> DatasetConfig {
    DatasetConfig {
        roster: DatasetRef::new("roster"),
        cases: DatasetRef::new("cases"),
        tasks: DatasetRef::new("tasks"),
        workers: DatasetRef::new("workers"),
    }
}

fn config_with(name: &str, pass: PassConfig) -> AsignaConfig {
    AsignaConfig {
        portal_url: "memory://".to_string(),
        request_timeout_secs: 30,
        datasets: datasets(),
        passes: [(name.to_string(), pass)].into_iter().collect(),
    }
}

fn inspection_pass() -> PassConfig {
    let mut pass = PassConfig::default_inspection();
    pass.assignment_type = "22309f2f-e893-4443-97eb-1b6944a27d00".to_string();
    pass
}

fn supervision_pass() -> PassConfig {
    let mut pass = PassConfig::default_supervision();
    pass.assignment_type = "52de28ac-8476-42ca-8e16-d8b7872ad3c5".to_string();
    pass
}

fn commissioner_pass() -> PassConfig {
    let mut pass = PassConfig::default_commissioner();
    pass.assignment_type = "33aec22e-5094-4cce-9493-a3444d8fba8c".to_string();
    pass
}

fn add_inspector(store: &MemoryFeatureStore, oid: i64, name: &str, login: &str, pending: i64) {
    store.insert(
        &DatasetRef::new("roster"),
        AttributeRecord::from_attrs([
            ("objectid", json!(oid)),
            ("nombre", json!(name)),
            ("siglas", json!(name.chars().take(2).collect::<String>())),
            ("username", json!(login)),
            ("direccion", json!("Gestion Ambiental")),
            ("area", json!("Control Urbano")),
            ("num_tramites", json!(pending)),
            ("ultimo_numero", json!(0)),
        ]),
    );
}

fn add_case(store: &MemoryFeatureStore, oid: i64, state: &str) {
    store.insert(
        &DatasetRef::new("cases"),
        AttributeRecord::from_attrs([
            ("objectid", json!(oid)),
            ("globalid", json!(format!("case-guid-{oid}"))),
            ("estado_tramite", json!(state)),
            ("direccion_responsable", json!("Gestion Ambiental")),
            ("area_responsable", json!("Control Urbano")),
            ("tipo_infraccion", json!("Ruido excesivo")),
            ("proceso_administrativo", json!("Si")),
            ("fecha_actual", json!("2026-03-09T00:00:00Z")),
        ]),
    );
}

fn add_directory_entry(store: &MemoryFeatureStore, login: &str, global_id: &str) {
    store.insert(
        &DatasetRef::new("workers"),
        AttributeRecord::from_attrs([
            ("userid", json!(login)),
            ("GlobalID", json!(global_id)),
        ]),
    );
}

#[test]
fn least_loaded_worker_gets_the_case() {
    let store = MemoryFeatureStore::new();
    add_inspector(&store, 1, "Ana", "ana_gad", 2);
    add_inspector(&store, 2, "Bruno", "bruno_gad", 1);
    add_directory_entry(&store, "ana_gad", "{W-ANA}");
    add_directory_entry(&store, "bruno_gad", "{W-BRUNO}");
    add_case(&store, 10, "Recibido");

    let config = config_with("inspection", inspection_pass());
    let report = run_pass(&store, &config, "inspection", &RunOptions::default(), now()).unwrap();

    assert_eq!(report.cases_seen, 1);
    assert_eq!(report.assignments, 1);
    assert_eq!(report.skipped_no_worker, 0);

    let edits = store.recorded_edits();
    assert_eq!(edits.len(), 3);
    // Fixed commit order: tasks, then case updates, then roster updates.
    assert_eq!(edits[0].dataset, DatasetRef::new("tasks"));
    assert_eq!(edits[1].dataset, DatasetRef::new("cases"));
    assert_eq!(edits[2].dataset, DatasetRef::new("roster"));

    let task = &edits[0].adds[0];
    assert_eq!(task.get("workerid"), Some(&json!("{W-BRUNO}")));
    assert_eq!(task.get("workorderid"), Some(&json!("case-guid-10")));
    assert_eq!(task.get("status"), Some(&json!(1)));
    // Due date: case reference timestamp + 3 days, ISO encoded.
    assert_eq!(task.get("duedate"), Some(&json!("2026-03-12T00:00:00Z")));

    let case_update = &edits[1].updates[0];
    assert_eq!(case_update.get("objectid"), Some(&json!(10)));
    assert_eq!(case_update.get("estado_tramite"), Some(&json!("En proceso")));
    assert_eq!(case_update.get("inspector_asignado"), Some(&json!("Bruno")));
    assert_eq!(case_update.get("username"), Some(&json!("bruno_gad")));

    // Exactly one roster entry, for Bruno, with both counters advanced.
    assert_eq!(edits[2].updates.len(), 1);
    let roster_update = &edits[2].updates[0];
    assert_eq!(roster_update.get("objectid"), Some(&json!(2)));
    assert_eq!(roster_update.get("num_tramites"), Some(&json!(2)));
    assert_eq!(roster_update.get("ultimo_numero"), Some(&json!(1)));
}

#[test]
fn sequence_numbers_increase_across_cases_in_one_run() {
    let store = MemoryFeatureStore::new();
    store.insert(
        &DatasetRef::new("roster"),
        AttributeRecord::from_attrs([
            ("objectid", json!(1)),
            ("nombre", json!("Paula Coello")),
            ("siglas", json!("PC")),
            ("username", json!("pcoello")),
            ("num_tramites", json!(0)),
            ("ultimo_numero", json!(41)),
        ]),
    );
    add_directory_entry(&store, "pcoello", "{W-PC}");
    add_case(&store, 20, "Supervision Finalizada");
    add_case(&store, 21, "Supervision Finalizada");

    let config = config_with("commissioner", commissioner_pass());
    let report = run_pass(&store, &config, "commissioner", &RunOptions::default(), now()).unwrap();
    assert_eq!(report.assignments, 2);

    let edits = store.recorded_edits();
    let codes: Vec<&Value> = edits[0]
        .adds
        .iter()
        .map(|t| t.get("codigoformulario").unwrap())
        .collect();
    assert_eq!(codes, vec![&json!("DGSH-CO-PC-2026-42"), &json!("DGSH-CO-PC-2026-43")]);

    // One roster update carrying the final counters.
    assert_eq!(edits[2].updates.len(), 1);
    assert_eq!(edits[2].updates[0].get("num_tramites"), Some(&json!(2)));
    assert_eq!(edits[2].updates[0].get("ultimo_numero"), Some(&json!(43)));

    // Commissioner pass stamps the cross-reference id onto the case.
    assert_eq!(
        edits[1].updates[0].get("id_denuncia_comparar_comisario"),
        Some(&json!("case-guid-20"))
    );
}

#[test]
fn ineligible_state_never_reaches_any_batch() {
    let store = MemoryFeatureStore::new();
    add_inspector(&store, 1, "Ana", "ana_gad", 0);
    add_directory_entry(&store, "ana_gad", "{W-ANA}");
    add_case(&store, 10, "Recibido");
    add_case(&store, 11, "En proceso");

    let config = config_with("inspection", inspection_pass());
    let report = run_pass(&store, &config, "inspection", &RunOptions::default(), now()).unwrap();
    assert_eq!(report.cases_seen, 1);

    for edit in store.recorded_edits() {
        for record in edit.adds.iter().chain(&edit.updates) {
            assert_ne!(record.get("objectid"), Some(&json!(11)));
            assert_ne!(record.get("workorderid"), Some(&json!("case-guid-11")));
        }
    }
}

#[test]
fn empty_case_queue_is_a_successful_noop() {
    let store = MemoryFeatureStore::new();
    add_inspector(&store, 1, "Ana", "ana_gad", 0);

    let config = config_with("inspection", inspection_pass());
    let report = run_pass(&store, &config, "inspection", &RunOptions::default(), now()).unwrap();
    assert_eq!(report.cases_seen, 0);
    assert!(report.batches.is_empty());
    assert!(store.recorded_edits().is_empty());
}

#[test]
fn no_eligible_worker_leaves_the_case_untouched() {
    let store = MemoryFeatureStore::new();
    // Roster belongs to a different region than the case.
    store.insert(
        &DatasetRef::new("roster"),
        AttributeRecord::from_attrs([
            ("objectid", json!(1)),
            ("nombre", json!("Ana")),
            ("siglas", json!("AN")),
            ("username", json!("ana_gad")),
            ("direccion", json!("Obras Publicas")),
            ("area", json!("Vialidad")),
            ("num_tramites", json!(0)),
            ("ultimo_numero", json!(0)),
        ]),
    );
    add_case(&store, 10, "Recibido");

    let config = config_with("inspection", inspection_pass());
    let report = run_pass(&store, &config, "inspection", &RunOptions::default(), now()).unwrap();
    assert_eq!(report.skipped_no_worker, 1);
    assert_eq!(report.assignments, 0);
    // All three batches were empty, so nothing was written.
    assert!(store.recorded_edits().is_empty());
}

#[test]
fn missing_geometry_still_creates_the_task() {
    let store = MemoryFeatureStore::new();
    add_inspector(&store, 1, "Ana", "ana_gad", 0);
    add_directory_entry(&store, "ana_gad", "{W-ANA}");
    add_case(&store, 10, "Recibido"); // fixture has no geometry at all

    let config = config_with("inspection", inspection_pass());
    run_pass(&store, &config, "inspection", &RunOptions::default(), now()).unwrap();

    let edits = store.recorded_edits();
    assert_eq!(edits[0].adds.len(), 1);
    assert!(edits[0].adds[0].geometry.is_none());
}

#[test]
fn extracted_geometry_rides_along_on_the_task() {
    let store = MemoryFeatureStore::new();
    add_inspector(&store, 1, "Ana", "ana_gad", 0);
    add_directory_entry(&store, "ana_gad", "{W-ANA}");

    let mut case = AttributeRecord::from_attrs([
        ("objectid", json!(10)),
        ("globalid", json!("case-guid-10")),
        ("estado_tramite", json!("Recibido")),
        ("direccion_responsable", json!("Gestion Ambiental")),
        ("area_responsable", json!("Control Urbano")),
    ]);
    case.geometry = Some(json!({ "x": 10.5, "y": -5.25 }));
    store.insert(&DatasetRef::new("cases"), case);

    let config = config_with("inspection", inspection_pass());
    run_pass(&store, &config, "inspection", &RunOptions::default(), now()).unwrap();

    let task = &store.recorded_edits()[0].adds[0];
    let geometry = task.geometry.as_ref().unwrap();
    assert_eq!(geometry["x"], json!(10.5));
    assert_eq!(geometry["y"], json!(-5.25));
    assert_eq!(geometry["spatialReference"]["wkid"], json!(4326));
}

#[test]
fn non_scalar_attribute_blocks_every_batch() {
    let store = MemoryFeatureStore::new();
    store.insert(
        &DatasetRef::new("roster"),
        AttributeRecord::from_attrs([
            ("objectid", json!(1)),
            ("nombre", json!("Sofia")),
            ("siglas", json!("SF")),
            ("username", json!("sofia_gad")),
            ("num_tramites", json!(0)),
            ("ultimo_numero", json!(0)),
        ]),
    );
    add_directory_entry(&store, "sofia_gad", "{W-SF}");
    // The location field carries a raw structured value; it passes through
    // into the task payload and must trip the gate.
    store.insert(
        &DatasetRef::new("cases"),
        AttributeRecord::from_attrs([
            ("objectid", json!(30)),
            ("globalid", json!("case-guid-30")),
            ("estado_tramite", json!("Informe enviado")),
            ("area_responsable", json!({ "raw": [1, 2] })),
        ]),
    );

    let config = config_with("supervision", supervision_pass());
    let err = run_pass(&store, &config, "supervision", &RunOptions::default(), now()).unwrap_err();
    match err {
        RunError::SerializationViolation { batch, field, .. } => {
            assert_eq!(batch, BatchKind::Tasks.as_str());
            assert_eq!(field, "location");
        }
        other => panic!("unexpected error: {other}"),
    }
    // Fail-closed: zero writes across all three batches.
    assert!(store.recorded_edits().is_empty());
}

#[test]
fn directory_miss_updates_case_and_roster_but_skips_the_task() {
    let store = MemoryFeatureStore::new();
    add_inspector(&store, 1, "Ana", "ana_gad", 0);
    // No directory entry for ana_gad.
    add_case(&store, 10, "Recibido");

    let config = config_with("inspection", inspection_pass());
    let report = run_pass(&store, &config, "inspection", &RunOptions::default(), now()).unwrap();
    assert_eq!(report.assignments, 1);
    assert_eq!(report.tasks_skipped_no_directory, 1);

    let edits = store.recorded_edits();
    // Task batch was empty and never sent; the other two went through.
    assert_eq!(edits.len(), 2);
    assert_eq!(edits[0].dataset, DatasetRef::new("cases"));
    assert_eq!(edits[0].updates.len(), 1);
    assert_eq!(edits[1].dataset, DatasetRef::new("roster"));
    assert_eq!(edits[1].updates[0].get("num_tramites"), Some(&json!(1)));
}

#[test]
fn later_batches_still_run_after_task_batch_failure() {
    let store = MemoryFeatureStore::new();
    add_inspector(&store, 1, "Ana", "ana_gad", 0);
    add_directory_entry(&store, "ana_gad", "{W-ANA}");
    add_case(&store, 10, "Recibido");
    store.fail_edits_on(&DatasetRef::new("tasks"));

    let config = config_with("inspection", inspection_pass());
    let report = run_pass(&store, &config, "inspection", &RunOptions::default(), now()).unwrap();

    assert!(report.had_write_failures());
    assert_eq!(report.batches.len(), 3);
    assert!(report.batches[0].error.is_some());
    assert!(report.batches[1].error.is_none());
    assert!(report.batches[2].error.is_none());

    // Case and roster updates were still written.
    let edits = store.recorded_edits();
    assert_eq!(edits.len(), 2);
    assert_eq!(edits[0].dataset, DatasetRef::new("cases"));
    assert_eq!(edits[1].dataset, DatasetRef::new("roster"));
}

#[test]
fn attachments_are_copied_to_created_tasks() {
    let store = MemoryFeatureStore::new();
    add_inspector(&store, 1, "Ana", "ana_gad", 0);
    add_directory_entry(&store, "ana_gad", "{W-ANA}");
    add_case(&store, 10, "Recibido");
    store.insert_attachment(
        &DatasetRef::new("cases"),
        10,
        AttachmentInfo {
            id: 1,
            name: "foto.jpg".to_string(),
        },
        vec![0xFF, 0xD8, 0xFF],
    );

    let config = config_with("inspection", inspection_pass());
    let report = run_pass(&store, &config, "inspection", &RunOptions::default(), now()).unwrap();
    assert_eq!(report.attachments_copied, 1);
    assert_eq!(report.attachment_failures, 0);

    // The memory store assigns task object ids starting at 1000.
    let copied = store.attachments_for(&DatasetRef::new("tasks"), 1000);
    assert_eq!(copied.len(), 1);
    assert_eq!(copied[0].name, "foto.jpg");
}

#[test]
fn fixed_worker_pass_ignores_workload() {
    let store = MemoryFeatureStore::new();
    add_inspector(&store, 1, "Ana", "ana_gad", 0);
    add_inspector(&store, 2, "Bruno", "bruno_gad", 5);
    add_directory_entry(&store, "bruno_gad", "{W-BRUNO}");
    add_case(&store, 10, "Informe enviado");

    let mut pass = supervision_pass();
    pass.fixed_worker = Some("bruno_gad".to_string());
    let config = config_with("supervision", pass);
    run_pass(&store, &config, "supervision", &RunOptions::default(), now()).unwrap();

    let task = &store.recorded_edits()[0].adds[0];
    assert_eq!(task.get("workerid"), Some(&json!("{W-BRUNO}")));
}

#[test]
fn dry_run_builds_batches_but_writes_nothing() {
    let store = MemoryFeatureStore::new();
    add_inspector(&store, 1, "Ana", "ana_gad", 0);
    add_directory_entry(&store, "ana_gad", "{W-ANA}");
    add_case(&store, 10, "Recibido");

    let config = config_with("inspection", inspection_pass());
    let options = RunOptions { dry_run: true };
    let report = run_pass(&store, &config, "inspection", &options, now()).unwrap();
    assert!(report.dry_run);
    assert_eq!(report.assignments, 1);
    assert!(store.recorded_edits().is_empty());
}

#[test]
fn unknown_pass_is_a_config_error() {
    let store = MemoryFeatureStore::new();
    let config = config_with("inspection", inspection_pass());
    let err = run_pass(&store, &config, "nightly", &RunOptions::default(), now()).unwrap_err();
    assert!(matches!(err, RunError::Config(_)));
}
