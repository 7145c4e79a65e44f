//! End-to-end lifecycle tests over the in-process collaborators: admission,
//! the full notification -> queue -> renewal pipeline, and device rotation.

use fleetcert::admission::{AdmissionOutcome, AdmissionValidator};
use fleetcert::clients::memory::{
    InMemoryAuditFeed, InMemoryBlobStore, InMemoryCertificateAuthority, InMemoryChannelPublisher,
    InMemoryDeviceRegistry, InMemoryLedger, InMemoryMessageQueue, InMemoryProvisioner,
};
use fleetcert::clients::{BlobStore, KeyValueLedger};
use fleetcert::config::Config;
use fleetcert::gate::ManagedRegistryGate;
use fleetcert::renewal::{
    FleetRenewalScanner, IdempotencyLedger, RenewalPipeline, RenewalProcessor,
};
use fleetcert::revocation::RevocationStoreReader;
use fleetcert::rotation::DeviceRotationHandler;
use fleetcert::types::*;
use bytes::Bytes;
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

struct World {
    config: Config,
    registry: Arc<InMemoryDeviceRegistry>,
    authority: Arc<InMemoryCertificateAuthority>,
    blobs: Arc<InMemoryBlobStore>,
    queue: Arc<InMemoryMessageQueue>,
    ledger: Arc<InMemoryLedger>,
    audit: Arc<InMemoryAuditFeed>,
    provisioner: Arc<InMemoryProvisioner>,
    publisher: Arc<InMemoryChannelPublisher>,
    pipeline: RenewalPipeline,
    validator: AdmissionValidator,
    rotation: DeviceRotationHandler,
}

fn world(findings_page_size: usize, device_page_size: usize) -> World {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .try_init();

    let config = Config::default();
    config.validate().unwrap();

    let registry = Arc::new(InMemoryDeviceRegistry::new());
    let authority = Arc::new(
        InMemoryCertificateAuthority::new()
            .unwrap()
            .with_device_page_size(device_page_size),
    );
    let blobs = Arc::new(InMemoryBlobStore::new());
    let queue = Arc::new(InMemoryMessageQueue::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let audit = Arc::new(InMemoryAuditFeed::new(findings_page_size));
    let provisioner = Arc::new(InMemoryProvisioner::new());
    let publisher = Arc::new(InMemoryChannelPublisher::new());
    let gate = Arc::new(ManagedRegistryGate::new(registry.clone()));

    let scanner = FleetRenewalScanner::new(
        audit.clone(),
        authority.clone(),
        queue.clone(),
        config.scanner.clone(),
    );
    let processor = RenewalProcessor::new(
        registry.clone(),
        authority.clone(),
        IdempotencyLedger::new(ledger.clone()),
        blobs.clone(),
        config.renewal.clone(),
    );
    let pipeline = RenewalPipeline::new(scanner, processor);

    let validator = AdmissionValidator::new(
        RevocationStoreReader::new(blobs.clone(), config.revocation.clone()),
        gate.clone(),
        registry.clone(),
        authority.clone(),
        provisioner.clone(),
    );

    let rotation = DeviceRotationHandler::new(
        gate,
        authority.clone(),
        registry.clone(),
        publisher.clone(),
        config.rotation.clone(),
    );

    World {
        config,
        registry,
        authority,
        blobs,
        queue,
        ledger,
        audit,
        provisioner,
        publisher,
        validator,
        pipeline,
        rotation,
    }
}

async fn put_revocation_list(world: &World, revoked: Vec<RevokedCertificate>) {
    let list = RevocationList {
        revoked_certificates: revoked,
        last_update: Utc::now(),
    };
    world
        .blobs
        .put(
            &world.config.revocation.bucket,
            &world.config.revocation.key,
            Bytes::from(serde_json::to_vec(&list).unwrap()),
        )
        .await
        .unwrap();
}

fn active_device(world: &World, device_id: &str) {
    world.registry.insert_device(DeviceRecord {
        device_id: device_id.to_string(),
        status: DeviceStatus::Active,
        identity_arn: None,
        rotation_status: None,
    });
}

/// Drain the queue repeatedly until no hop emits further messages.
async fn run_pipeline_to_completion(world: &World) {
    loop {
        let bodies = world.queue.drain();
        if bodies.is_empty() {
            break;
        }
        for body in bodies {
            world.pipeline.handle_body(&body).await.unwrap();
        }
    }
}

#[tokio::test]
async fn full_renewal_pipeline_is_exactly_once_across_redelivery() {
    let world = world(1, 1); // page size 1 everywhere to force chaining
    active_device(&world, "d1");
    active_device(&world, "d2");
    active_device(&world, "d3");

    let old_1 = world.authority.seed_certificate("old-1", "d1").unwrap();
    let old_2 = world.authority.seed_certificate("old-2", "d3").unwrap();
    world.authority.seed_device(&old_1.certificate_arn, "d1");
    world.authority.seed_device(&old_1.certificate_arn, "d2");
    world.authority.seed_device(&old_2.certificate_arn, "d3");
    world.authority.seed_policy(&old_1.certificate_arn, "telemetry");

    world.audit.set_findings(
        &world.config.scanner.expiring_check_name,
        "audit-task-1",
        vec![
            AuditFinding { certificate_id: "old-1".to_string() },
            AuditFinding { certificate_id: "old-2".to_string() },
        ],
    );

    let notification = AuditNotification {
        task_id: "audit-task-1".to_string(),
        non_compliant_checks_count: 1,
        check_details: vec![AuditCheckDetail {
            name: world.config.scanner.expiring_check_name.clone(),
            non_compliant_count: 2,
        }],
    };

    world
        .pipeline
        .scanner()
        .handle_notification(&notification)
        .await
        .unwrap();
    run_pipeline_to_completion(&world).await;

    // One replacement per expiring certificate, even though old-1 serves
    // two devices.
    assert_eq!(world.ledger.record_count(), 2);
    assert_eq!(world.authority.issue_call_count(), 2);

    let record_1 = world
        .ledger
        .get_item(&old_1.certificate_arn)
        .await
        .unwrap()
        .unwrap();
    // Policies copied and both devices attached to the shared replacement.
    assert_eq!(
        world.authority.policies_of(&record_1.renewed_certificate_arn),
        vec!["telemetry"]
    );
    let mut devices = world
        .authority
        .devices_of(&record_1.renewed_certificate_arn);
    devices.sort();
    assert_eq!(devices, vec!["d1", "d2"]);

    // Replacement PEMs archived.
    assert_eq!(world.blobs.keys(&world.config.renewal.archive_bucket).len(), 2);

    // Simulate the host redelivering the whole notification: no new
    // certificates are ever issued.
    world
        .pipeline
        .scanner()
        .handle_notification(&notification)
        .await
        .unwrap();
    run_pipeline_to_completion(&world).await;

    assert_eq!(world.authority.issue_call_count(), 2);
    assert_eq!(world.ledger.record_count(), 2);
}

#[tokio::test]
async fn partial_failure_does_not_block_sibling_pairs() {
    let world = world(10, 10);
    active_device(&world, "healthy");
    let good = world.authority.seed_certificate("good", "healthy").unwrap();
    active_device(&world, "cursed");

    // First pair targets an unknown expiring certificate so the policy
    // copy step fails after issuance; the sibling must still renew.
    world
        .pipeline
        .handle_body(
            &json!({
                "batchType": "ready-for-processing",
                "pairs": [
                    {"deviceId": "cursed", "expiringCertificateArn": "arn:fleet:cert/ghost"},
                    {"deviceId": "healthy", "expiringCertificateArn": good.certificate_arn},
                ],
            })
            .to_string(),
        )
        .await
        .unwrap();

    let renewed = world
        .ledger
        .get_item(&good.certificate_arn)
        .await
        .unwrap()
        .expect("sibling pair completed");
    assert_eq!(renewed.thing_name, "healthy");
}

#[tokio::test]
async fn admission_revocation_precedence_and_activation() {
    let world = world(10, 10);
    let listed = world.authority.seed_certificate("listed", "dev-a").unwrap();
    world.authority.seed_certificate("fresh", "dev-b").unwrap();

    put_revocation_list(
        &world,
        vec![RevokedCertificate {
            certificate_id: listed.certificate_id.clone(),
            revoked_on: Utc::now(),
            revoked_reason: RevocationReason::CaCompromise,
        }],
    )
    .await;

    // dev-a is whitelisted, but revocation wins.
    world.registry.insert_device(DeviceRecord {
        device_id: "dev-a".to_string(),
        status: DeviceStatus::Pending,
        identity_arn: None,
        rotation_status: None,
    });

    let event = |id: &str| RegistrationEvent {
        certificate_id: id.to_string(),
        ca_certificate_id: "ca-1".to_string(),
        timestamp: Utc::now(),
        aws_account_id: "123456789012".to_string(),
    };

    let outcome = world.validator.activate(&event("listed")).await.unwrap();
    assert_eq!(outcome, AdmissionOutcome::RevokedListed);
    assert!(world.provisioner.requests().is_empty());

    // dev-b is whitelisted with a provisioning template and activates.
    world.registry.insert_device(DeviceRecord {
        device_id: "dev-b".to_string(),
        status: DeviceStatus::Pending,
        identity_arn: None,
        rotation_status: None,
    });
    world.registry.set_policies(
        "dev-b",
        vec![PolicyDocument {
            name: "provisioning".to_string(),
            document: json!({"template": "fleet-default"}),
        }],
    );

    let outcome = world.validator.activate(&event("fresh")).await.unwrap();
    match outcome {
        AdmissionOutcome::Activated { device_id, .. } => assert_eq!(device_id, "dev-b"),
        other => panic!("expected activation, got {:?}", other),
    }
    assert_eq!(world.provisioner.requests()[0].template_id, "fleet-default");
    assert_eq!(
        world.registry.device("dev-b").unwrap().status,
        DeviceStatus::Active
    );
}

#[tokio::test]
async fn rotation_get_then_ack_cleans_up_exactly_the_predecessor() {
    let world = world(10, 10);
    active_device(&world, "rotator");
    let old = world.authority.seed_certificate("old-cert", "rotator").unwrap();

    world
        .rotation
        .handle(&RotationRequest::Get {
            device_id: "rotator".to_string(),
            cert_id: String::new(),
            csr: None,
            previous_certificate_id: Some(old.certificate_id.clone()),
        })
        .await
        .unwrap();

    let grants = world
        .publisher
        .on_channel(&world.config.rotation.accepted_channel("rotator"));
    assert_eq!(grants.len(), 1);
    let grant: RotationGrant = serde_json::from_str(&grants[0]).unwrap();

    world
        .rotation
        .handle(&RotationRequest::Ack {
            device_id: "rotator".to_string(),
            cert_id: grant.certificate_id.clone(),
            previous_certificate_id: Some(old.certificate_id.clone()),
        })
        .await
        .unwrap();

    assert_eq!(
        world.authority.status_of(&old.certificate_id),
        Some(CertificateStatus::Inactive)
    );
    assert_eq!(
        world.authority.status_of(&grant.certificate_id),
        Some(CertificateStatus::Active)
    );
    assert_eq!(
        world.registry.device("rotator").unwrap().rotation_status,
        Some(RotationStatus::Success)
    );
}
