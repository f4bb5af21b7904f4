mod common;

use arbiter_core::clock::VirtualClock;
use arbiter_core::envelope::EnvelopeStatus;
use common::{broker_with, T0};
use orchestrator::{
    start_chain_verify_job, start_expiry_job, BrokerConfig, EntityRef, ProposeOutcome,
    ProposeRequest,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn expiry_job_sweeps_stale_approvals() {
    let clock = Arc::new(VirtualClock::new(T0));
    let cfg = BrokerConfig {
        default_approvers: vec!["ops".into()],
        expiry_scan_interval_ms: 20,
        ..BrokerConfig::default()
    };
    let (broker, _ads) = broker_with(cfg, clock.clone()).await;

    let mut req = ProposeRequest::new(
        "ads.budget.set",
        json!({"campaignId": "camp_123", "dailyBudget": 250}),
        "default",
        "org-1",
    );
    req.cartridge_id = Some("ads-spend".into());
    req.entity_refs =
        vec![EntityRef { input_ref: "camp_123".into(), entity_type: "campaign".into() }];
    let ProposeOutcome::PendingApproval { envelope, .. } =
        broker.resolve_and_propose(req).await.unwrap()
    else {
        panic!("expected pending approval")
    };

    clock.advance_ms(86_400_001);
    let job = start_expiry_job(Arc::clone(&broker));
    let mut expired = false;
    for _ in 0..200 {
        if broker.envelopes().get(&envelope.id).await.unwrap().status == EnvelopeStatus::Expired {
            expired = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    job.stop().await;
    assert!(expired, "the expiry job never swept the stale approval");
}

#[tokio::test]
async fn chain_verify_job_starts_and_stops_cleanly() {
    let clock = Arc::new(VirtualClock::new(T0));
    let cfg = BrokerConfig { chain_verify_interval_ms: 20, ..BrokerConfig::default() };
    let (broker, _ads) = broker_with(cfg, clock).await;

    let job = start_chain_verify_job(Arc::clone(&broker));
    tokio::time::sleep(Duration::from_millis(80)).await;
    job.stop().await;
    // The pristine ledger never trips the break counter.
    assert_eq!(broker.metrics().counter("chain_breaks_total", ""), 0);
}
