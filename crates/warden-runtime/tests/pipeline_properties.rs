mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    CRITICAL_PAYLOAD, RecordingSink, agent, harness, harness_with_reputation, one_hot, policy,
    request,
};
use warden_memory::SqliteReputationLedger;
use warden_middleware::Topic;
use warden_runtime::ScriptedAgent;
use warden_types::{
    ContainmentSignal, EventPayload, FailureKind, Mode, Resolution, RunStatus,
};

#[tokio::test]
async fn audit_escalation_moves_a_standard_run_to_critical() {
    let agents = [
        agent("alpha", "open the bypass", 0.9, one_hot(0, 4)),
        agent("bravo", "open the bypass", 0.9, one_hot(1, 4)),
    ];
    let h = harness(policy(), &agents, RecordingSink::default());
    let mut lifecycle = h.bus.subscribe_to(Topic::RunLifecycle);

    let snapshot = h
        .service
        .run(request("Check the pumps. Log the readings.", 2, 2))
        .await
        .unwrap();

    assert_eq!(snapshot.status, RunStatus::Completed);
    assert_eq!(snapshot.mode, Some(Mode::Critical));
    let decision = snapshot.decision.unwrap();
    assert_eq!(decision.mode, Mode::Critical);
    assert!(matches!(decision.resolution, Resolution::Adversarial { .. }));
    // Admitted as standard; the latch only moved up.
    assert_eq!(decision.provenance.assessment.recommended_mode, Mode::Standard);
    // Critical synthesis never touches reputation.
    assert!(h.service.reputation().unwrap().is_empty());

    let mut escalated = false;
    while let Ok(Ok(event)) =
        tokio::time::timeout(Duration::from_millis(200), lifecycle.recv()).await
    {
        if matches!(event.payload, EventPayload::ModeEscalated { run_id, .. } if run_id == snapshot.run_id)
        {
            escalated = true;
            break;
        }
    }
    assert!(escalated);
}

#[tokio::test]
async fn declared_emergency_forces_critical_without_sharding() {
    let agents = [
        agent("alpha", "hold", 0.2, one_hot(0, 4)),
        agent("bravo", "hold", 0.2, one_hot(1, 4)),
    ];
    let h = harness(policy(), &agents, RecordingSink::default());
    let mut req = request("Check the pumps.", 1, 1);
    req.emergency = true;

    let snapshot = h.service.run(req).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Completed);
    assert_eq!(snapshot.mode, Some(Mode::Critical));
    // Replicated, so each agent saw the whole payload.
    for a in &agents {
        assert_eq!(a.seen(), vec!["Check the pumps.".to_string()]);
    }
}

#[tokio::test]
async fn deadlock_emits_the_fallback_and_escalates() {
    let agents = [
        agent("alpha", "vent to stack", 0.3, one_hot(0, 8)),
        agent("bravo", "throttle feed", 0.3, one_hot(1, 8)),
        agent("charlie", "trip the pump", 0.3, one_hot(2, 8)),
    ];
    let h = harness(policy(), &agents, RecordingSink::default());
    let mut escalations = h.bus.subscribe_to(Topic::Escalations);

    let snapshot = h.service.run(request(CRITICAL_PAYLOAD, 5, 5)).await.unwrap();

    assert_eq!(
        snapshot.status,
        RunStatus::Escalated(FailureKind::SynthesisDeadlock)
    );
    let decision = snapshot.decision.expect("fallback decision");
    assert_eq!(decision.action, "no-op");
    assert!(decision.is_fallback());
    assert!(decision.requires_human_approval);
    // Nothing is unlocked for a run handed to humans.
    assert_eq!(
        h.containment.for_run(snapshot.run_id),
        vec![ContainmentSignal::NoSignal]
    );

    let event = tokio::time::timeout(Duration::from_secs(1), escalations.recv())
        .await
        .expect("escalation published")
        .unwrap();
    assert!(matches!(
        event.payload,
        EventPayload::EscalationRequired { kind: FailureKind::SynthesisDeadlock, .. }
    ));
}

#[tokio::test]
async fn concurrent_standard_runs_converge_on_reputation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reputation.db");
    let ledger = Arc::new(SqliteReputationLedger::open(path.to_str().unwrap()).unwrap());
    let agents = [
        agent("a", "hold", 0.1, one_hot(0, 4)),
        agent("b", "vent", 0.2, one_hot(1, 4)),
    ];
    let h = harness_with_reputation(policy(), &agents, RecordingSink::default(), ledger.clone());

    let mut ids = Vec::new();
    for i in 0..8 {
        let payload = format!("Check pump {i}. Log the readings.");
        ids.push(h.service.submit(request(&payload, 2, 2)).unwrap());
    }
    for id in ids {
        let snapshot = h.service.wait(id).await.unwrap();
        assert_eq!(snapshot.status, RunStatus::Completed);
        assert_eq!(snapshot.decision.unwrap().action, "hold");
    }

    let snapshot = h.service.reputation().unwrap();
    assert_eq!(snapshot.len(), 2);
    let (a, b) = (&snapshot[0], &snapshot[1]);
    assert_eq!(a.0, "a");
    assert_eq!((a.1.agreements, a.1.disagreements), (8, 0));
    assert_eq!(b.0, "b");
    assert_eq!((b.1.agreements, b.1.disagreements), (0, 8));
}

#[tokio::test]
async fn missed_deadline_leaves_audit_short_of_quorum() {
    let slow = Arc::new(
        ScriptedAgent::proposing("slow", "hold", 0.2, one_hot(1, 4))
            .with_delay(Duration::from_millis(500)),
    );
    let agents = [agent("fast", "hold", 0.2, one_hot(0, 4)), slow];
    let mut policy = policy();
    policy.shard_timeout_ms = 50;
    let h = harness(policy, &agents, RecordingSink::default());

    let snapshot = h
        .service
        .run(request("Close valve 3. Drain loop A.", 4, 4))
        .await
        .unwrap();

    assert_eq!(
        snapshot.status,
        RunStatus::Escalated(FailureKind::AuditQuorumFailure)
    );
    assert!(snapshot.decision.is_none());
    assert_eq!(
        h.containment.for_run(snapshot.run_id),
        vec![ContainmentSignal::NoSignal]
    );
}

#[tokio::test]
async fn single_clause_critical_intent_is_unshardable() {
    let agents = [
        agent("alpha", "hold", 0.2, one_hot(0, 4)),
        agent("bravo", "hold", 0.2, one_hot(1, 4)),
        agent("charlie", "hold", 0.2, one_hot(2, 4)),
    ];
    let h = harness(policy(), &agents, RecordingSink::default());

    let snapshot = h
        .service
        .run(request("Reroute coolant through loop B", 5, 5))
        .await
        .unwrap();

    assert_eq!(
        snapshot.status,
        RunStatus::Failed(FailureKind::UnshardableIntent)
    );
    assert!(agents.iter().all(|a| a.seen().is_empty()));
    assert!(h.sink.requests().is_empty());
}

#[tokio::test]
async fn semantic_trigger_raises_low_tiers_to_ci5() {
    let agents = [
        agent("alpha", "hold", 0.2, one_hot(0, 4)),
        agent("bravo", "hold", 0.2, one_hot(1, 4)),
        agent("charlie", "hold", 0.2, one_hot(2, 4)),
    ];
    let h = harness(policy(), &agents, RecordingSink::default());

    let snapshot = h
        .service
        .run(request(
            "Prepare the meltdown drill. Brief the crew. Seal the doors.",
            1,
            1,
        ))
        .await
        .unwrap();

    assert_eq!(snapshot.status, RunStatus::Completed);
    assert_eq!(snapshot.mode, Some(Mode::Critical));
    let assessment = snapshot.decision.unwrap().provenance.assessment;
    assert!(assessment.triggered);
    assert!(assessment.requires_sharding);
}
