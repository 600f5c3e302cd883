//! Delete entries, persistence interceptors and return preferences.

mod common;

use std::sync::{Arc, Mutex};

use assert_json_diff::assert_json_include;
use async_trait::async_trait;
use common::{RecordingStorage, patient, processor, processor_with, seed, test_config};
use octofhir_bundle::{
    BundleKind, PreferReturn, ProcessOptions, RequestBundle, RequestEntry, ResponseEntry,
};
use octofhir_core::{HookError, PersistenceEvent, PersistenceInterceptor, PersistenceOp};
use serde_json::json;

fn status(entry: &ResponseEntry) -> Option<u16> {
    entry.status_code()
}

fn deleting_processor(storage: &RecordingStorage, max: usize) -> octofhir_bundle::BundleProcessor {
    let mut config = test_config();
    config.processing.allow_delete = true;
    config.processing.conditional_delete_max_number = max;
    processor_with(storage, config)
}

// =============================================================================
// Delete
// =============================================================================

#[tokio::test]
async fn delete_by_id() {
    let storage = RecordingStorage::new();
    let stored = seed(&storage, patient("Gone")).await;

    let bundle = RequestBundle::new(
        BundleKind::Batch,
        vec![
            RequestEntry::delete(format!("Patient/{}", stored.id)),
            RequestEntry::delete("Patient/never-existed"),
        ],
    );
    let response = deleting_processor(&storage, 10)
        .process_bundle(bundle)
        .await
        .unwrap();

    assert_eq!(status(&response.entry[0]), Some(200));
    assert_json_include!(
        actual: response.entry[0].resource.clone().unwrap(),
        expected: json!({
            "resourceType": "OperationOutcome",
            "issue": [{"severity": "information", "code": "informational"}]
        })
    );
    assert_eq!(status(&response.entry[1]), Some(404));
    assert_eq!(storage.count().await, 0);
}

#[tokio::test]
async fn conditional_delete_respects_threshold() {
    let storage = RecordingStorage::new();
    for _ in 0..2 {
        seed(&storage, patient("Pair")).await;
    }
    for _ in 0..3 {
        seed(&storage, patient("Trio")).await;
    }
    let processor = deleting_processor(&storage, 2);

    // Above the threshold: nothing is deleted.
    let response = processor
        .process_bundle(RequestBundle::new(
            BundleKind::Batch,
            vec![RequestEntry::delete("Patient?name=Trio")],
        ))
        .await
        .unwrap();
    assert_eq!(status(&response.entry[0]), Some(412));
    assert!(
        response.entry[0].resource.as_ref().unwrap()["issue"][0]["diagnostics"]
            .as_str()
            .unwrap()
            .contains("too many matches ( > 2 )")
    );
    assert_eq!(storage.count().await, 5);

    // At the threshold: every match is deleted.
    let response = processor
        .process_bundle(RequestBundle::new(
            BundleKind::Batch,
            vec![RequestEntry::delete("Patient?name=Pair")],
        ))
        .await
        .unwrap();
    assert_eq!(status(&response.entry[0]), Some(200));
    assert_eq!(storage.count().await, 3);

    // No matches.
    let response = processor
        .process_bundle(RequestBundle::new(
            BundleKind::Batch,
            vec![RequestEntry::delete("Patient?name=Nobody")],
        ))
        .await
        .unwrap();
    assert_eq!(status(&response.entry[0]), Some(200));
    assert_eq!(
        response.entry[0].resource.as_ref().unwrap()["issue"][0]["severity"],
        "information"
    );
}

#[tokio::test]
async fn delete_is_rejected_when_disabled() {
    let storage = RecordingStorage::new();
    let stored = seed(&storage, patient("Kept")).await;

    let response = processor(&storage)
        .process_bundle(RequestBundle::new(
            BundleKind::Batch,
            vec![RequestEntry::delete(format!("Patient/{}", stored.id))],
        ))
        .await
        .unwrap();

    assert_eq!(status(&response.entry[0]), Some(405));
    assert_eq!(storage.count().await, 1);
}

#[tokio::test]
async fn delete_with_payload_is_structural_error() {
    let storage = RecordingStorage::new();
    let response = deleting_processor(&storage, 10)
        .process_bundle(RequestBundle::new(
            BundleKind::Batch,
            vec![RequestEntry::delete("Patient/x").with_resource(patient("Nope"))],
        ))
        .await
        .unwrap();

    assert_eq!(status(&response.entry[0]), Some(400));
    assert_eq!(
        response.entry[0].resource.as_ref().unwrap()["issue"][0]["code"],
        "structure"
    );
}

// =============================================================================
// Interceptors
// =============================================================================

/// Records every hook invocation as `phase op type`.
struct Journal(Arc<Mutex<Vec<String>>>);

#[async_trait]
impl PersistenceInterceptor for Journal {
    fn name(&self) -> &str {
        "journal"
    }

    async fn before(&self, event: &mut PersistenceEvent) -> Result<(), HookError> {
        self.0
            .lock()
            .unwrap()
            .push(format!("before {} {}", event.op, event.resource_type));
        Ok(())
    }

    async fn after(&self, event: &mut PersistenceEvent) -> Result<(), HookError> {
        self.0
            .lock()
            .unwrap()
            .push(format!("after {} {}", event.op, event.resource_type));
        Ok(())
    }
}

/// Refuses to create Observations and stamps a tag on every Patient it sees.
struct Gatekeeper;

#[async_trait]
impl PersistenceInterceptor for Gatekeeper {
    fn name(&self) -> &str {
        "gatekeeper"
    }

    async fn before(&self, event: &mut PersistenceEvent) -> Result<(), HookError> {
        match (event.op, event.resource_type.as_str()) {
            (PersistenceOp::Create, "Observation") => {
                Err(HookError::rejected("observations are read-only"))
            }
            (PersistenceOp::Create | PersistenceOp::Update, "Patient") => {
                if let Some(resource) = event.resource.as_mut() {
                    resource["meta"] = json!({"tag": [{"code": "gatekeeper"}]});
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[tokio::test]
async fn hooks_bracket_every_storage_call() {
    let storage = RecordingStorage::new();
    let journal = Arc::new(Mutex::new(Vec::new()));
    let processor = processor(&storage);
    processor
        .interceptors()
        .register(Arc::new(Journal(journal.clone())))
        .await;

    let response = processor
        .process_bundle(RequestBundle::new(
            BundleKind::Batch,
            vec![
                RequestEntry::get("Patient"),
                RequestEntry::post("Patient", patient("Hooked")),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(status(&response.entry[1]), Some(201));

    assert_eq!(
        *journal.lock().unwrap(),
        vec![
            "before create Patient",
            "after create Patient",
            "before search Patient",
            "after search Patient",
        ]
    );
}

#[tokio::test]
async fn interceptor_can_reject_and_rewrite() {
    let storage = RecordingStorage::new();
    let processor = processor(&storage);
    processor.interceptors().register(Arc::new(Gatekeeper)).await;

    let response = processor
        .process_bundle(RequestBundle::new(
            BundleKind::Batch,
            vec![
                RequestEntry::post("Observation", common::observation_for("Patient/x")),
                RequestEntry::post("Patient", patient("Tagged")),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(status(&response.entry[0]), Some(400));
    assert_eq!(
        response.entry[0].resource.as_ref().unwrap()["issue"][0]["code"],
        "business-rule"
    );
    assert!(storage.writes().iter().all(|c| c.target != "Observation"));

    let created = response.entry[1].resource.as_ref().unwrap();
    assert_eq!(created["meta"]["tag"][0]["code"], "gatekeeper");
    assert_eq!(created["meta"]["versionId"], "1");
}

#[tokio::test]
async fn interceptor_rejection_aborts_transaction() {
    let storage = RecordingStorage::new();
    let processor = processor(&storage);
    processor.interceptors().register(Arc::new(Gatekeeper)).await;

    let failure = processor
        .process_bundle(RequestBundle::new(
            BundleKind::Transaction,
            vec![
                RequestEntry::post("Patient", patient("Undone")),
                RequestEntry::post("Observation", common::observation_for("Patient/x")),
            ],
        ))
        .await
        .unwrap_err();

    assert_eq!(failure.status(), 400);
    assert_eq!(status(&failure.response.entry[0]), Some(201));
    assert_eq!(status(&failure.response.entry[1]), Some(400));
    assert_eq!(storage.count().await, 0);
}

// =============================================================================
// Return preference
// =============================================================================

#[tokio::test]
async fn return_preference_shapes_write_bodies() {
    let storage = RecordingStorage::new();
    let processor = processor(&storage);
    let create = || {
        RequestBundle::new(
            BundleKind::Batch,
            vec![RequestEntry::post("Patient", patient("Preferred"))],
        )
    };

    let response = processor.process_bundle(create()).await.unwrap();
    assert_eq!(
        response.entry[0].resource.as_ref().unwrap()["resourceType"],
        "Patient"
    );

    let response = processor
        .process_bundle_with(create(), &ProcessOptions::with_prefer_return(PreferReturn::Minimal))
        .await
        .unwrap();
    let entry = &response.entry[0];
    assert!(entry.resource.is_none());
    assert!(entry.response.location.is_some());
    assert_eq!(entry.response.etag.as_deref(), Some("W/\"1\""));

    let response = processor
        .process_bundle_with(
            create(),
            &ProcessOptions::with_prefer_return(PreferReturn::OperationOutcome),
        )
        .await
        .unwrap();
    assert_json_include!(
        actual: response.entry[0].resource.clone().unwrap(),
        expected: json!({
            "resourceType": "OperationOutcome",
            "issue": [{"severity": "information", "diagnostics": "All OK"}]
        })
    );

    let mut config = test_config();
    config.processing.prefer_return = PreferReturn::Minimal;
    let response = processor_with(&storage, config)
        .process_bundle(create())
        .await
        .unwrap();
    assert!(response.entry[0].resource.is_none());
}
