mod common;

use common::{Fault, MockRail, harness, sepa_request, single_attempt_config};
use payment_rails::config::RailConfig;
use payment_rails::domain::authorization::AuthorizationStatus;
use payment_rails::domain::payment::{HealthStatus, RailReference, RailStatus, RailType};
use payment_rails::domain::ports::RailPort;
use payment_rails::error::{ErrorKind, UnavailableReason};
use payment_rails::observability::RailEvent;
use payment_rails::resilience::CircuitState;
use rust_decimal_macros::dec;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_after_failures_and_short_circuits() {
    let h = harness(MockRail::new(RailType::Swift), single_attempt_config());
    h.rail.fail_all_reserves(Some(Fault::Communication));

    for i in 0..10 {
        let err = h
            .service
            .authorize_payment(sepa_request(dec!(10.00)), &format!("order-{i}"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable, "call {i}");
    }
    assert_eq!(MockRail::count(&h.rail.reserve_calls), 10);

    let err = h
        .service
        .authorize_payment(sepa_request(dec!(10.00)), "order-10")
        .await
        .unwrap_err();
    assert_eq!(err.unavailable_reason(), Some(UnavailableReason::CircuitOpen));
    assert_eq!(MockRail::count(&h.rail.reserve_calls), 10);

    assert!(h.observer.events().iter().any(|event| matches!(
        event,
        RailEvent::CircuitTransition {
            to: CircuitState::Open,
            ..
        }
    )));

    let health = h.service.health().await;
    assert_eq!(health.status, HealthStatus::Down);
    assert_eq!(health.circuit, CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_recovers_through_half_open() {
    let h = harness(MockRail::new(RailType::Swift), single_attempt_config());
    h.rail.fail_all_reserves(Some(Fault::Communication));
    for i in 0..10 {
        let _ = h
            .service
            .authorize_payment(sepa_request(dec!(10.00)), &format!("order-{i}"))
            .await;
    }
    assert_eq!(h.service.health().await.circuit, CircuitState::Open);

    h.rail.fail_all_reserves(None);
    tokio::time::advance(Duration::from_secs(61)).await;

    for i in 0..5 {
        let auth = h
            .service
            .authorize_payment(sepa_request(dec!(10.00)), &format!("retry-{i}"))
            .await
            .unwrap();
        assert_eq!(auth.status, AuthorizationStatus::Authorized);
    }
    assert_eq!(h.service.health().await.circuit, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_business_declines_do_not_trip_breaker() {
    let h = harness(MockRail::new(RailType::Sepa), single_attempt_config());
    h.rail.fail_all_reserves(Some(Fault::InsufficientFunds));

    for i in 0..20 {
        let auth = h
            .service
            .authorize_payment(sepa_request(dec!(10.00)), &format!("order-{i}"))
            .await
            .unwrap();
        assert_eq!(auth.status, AuthorizationStatus::Declined);
    }
    assert_eq!(h.service.health().await.circuit, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_transient_reserve_failures_are_retried() {
    let h = harness(MockRail::new(RailType::Sepa), RailConfig::default());
    h.rail.fail_reserves(Fault::Communication, 2);

    let auth = h
        .service
        .authorize_payment(sepa_request(dec!(10.00)), "order-1")
        .await
        .unwrap();
    assert_eq!(auth.status, AuthorizationStatus::Authorized);
    assert_eq!(MockRail::count(&h.rail.reserve_calls), 3);

    let retries = h
        .observer
        .events()
        .into_iter()
        .filter(|event| matches!(event, RailEvent::RetryScheduled { .. }))
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test(start_paused = true)]
async fn test_unrecognized_reserve_failure_is_not_retried() {
    let h = harness(MockRail::new(RailType::Sepa), RailConfig::default());
    h.rail.fail_reserves(Fault::Unrecognized, 1);

    let auth = h
        .service
        .authorize_payment(sepa_request(dec!(10.00)), "order-1")
        .await
        .unwrap();
    assert_eq!(auth.status, AuthorizationStatus::Declined);
    assert_eq!(
        auth.last_error.map(|e| e.kind),
        Some(ErrorKind::RailOperationFailed)
    );
    assert_eq!(MockRail::count(&h.rail.reserve_calls), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retried_submit_checks_rail_before_resubmitting() {
    let mut config = RailConfig::default();
    config.resilience.timeout.timeout_ms = 100;
    let h = harness(MockRail::new(RailType::Sepa), config);

    let auth = h
        .service
        .authorize_payment(sepa_request(dec!(10.00)), "order-1")
        .await
        .unwrap();
    h.rail.lose_next_submit_response(Duration::from_secs(5));

    let result = h.service.confirm_payment(auth.id).await.unwrap();

    assert_eq!(result.status, AuthorizationStatus::Confirmed);
    assert_eq!(MockRail::count(&h.rail.submit_calls), 1);
    assert_eq!(MockRail::count(&h.rail.query_calls), 1);
}

#[tokio::test(start_paused = true)]
async fn test_ambiguous_submit_is_reconciled() {
    let h = harness(MockRail::new(RailType::Sepa), single_attempt_config());
    let auth = h
        .service
        .authorize_payment(sepa_request(dec!(10.00)), "order-1")
        .await
        .unwrap();
    h.rail.fail_submits(Fault::Communication, 1);

    let err = h.service.confirm_payment(auth.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    let in_doubt = h.service.get_authorization(auth.id).await.unwrap();
    assert_eq!(in_doubt.status, AuthorizationStatus::Authorized);
    assert!(in_doubt.submission_in_doubt);

    let reconciled = h.service.reconcile(auth.id).await.unwrap();
    assert_eq!(reconciled.status, AuthorizationStatus::Authorized);
    assert!(!reconciled.submission_in_doubt);

    let result = h.service.confirm_payment(auth.id).await.unwrap();
    assert_eq!(result.status, AuthorizationStatus::Confirmed);
    assert_eq!(MockRail::count(&h.rail.submit_calls), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_rail_reports_down() {
    let h = harness(MockRail::new(RailType::Rtp), RailConfig::default());
    assert_eq!(h.service.health().await.status, HealthStatus::Up);

    h.rail.set_healthy(false);
    let health = h.service.health().await;
    assert_eq!(health.status, HealthStatus::Down);
    assert_eq!(health.circuit, CircuitState::Closed);
    assert!(health.reason.unwrap().contains("RTP"));
}

#[tokio::test(start_paused = true)]
async fn test_confirm_dropped_by_caller_is_not_resubmitted() {
    let h = harness(MockRail::new(RailType::Sepa), RailConfig::default());
    let auth = h
        .service
        .authorize_payment(sepa_request(dec!(10.00)), "order-1")
        .await
        .unwrap();
    h.rail.lose_next_submit_response(Duration::from_secs(20));

    let gave_up =
        tokio::time::timeout(Duration::from_secs(1), h.service.confirm_payment(auth.id)).await;
    assert!(gave_up.is_err());
    let stored = h.service.get_authorization(auth.id).await.unwrap();
    assert_eq!(stored.status, AuthorizationStatus::Authorized);
    assert!(stored.submission_in_doubt);

    let result = h.service.confirm_payment(auth.id).await.unwrap();
    assert_eq!(result.status, AuthorizationStatus::Confirmed);
    assert_eq!(MockRail::count(&h.rail.submit_calls), 1);
    assert_eq!(MockRail::count(&h.rail.query_calls), 1);
}

#[tokio::test(start_paused = true)]
async fn test_aborted_trial_calls_do_not_keep_breaker_half_open() {
    let h = harness(MockRail::new(RailType::Sepa), single_attempt_config());
    let mut authorized = Vec::new();
    for i in 0..5 {
        let auth = h
            .service
            .authorize_payment(sepa_request(dec!(10.00)), &format!("order-{i}"))
            .await
            .unwrap();
        authorized.push(auth.id);
    }

    h.rail.fail_all_reserves(Some(Fault::Communication));
    let mut i = 5;
    while h.service.health().await.circuit != CircuitState::Open {
        let _ = h
            .service
            .authorize_payment(sepa_request(dec!(10.00)), &format!("order-{i}"))
            .await;
        i += 1;
    }
    tokio::time::advance(Duration::from_secs(61)).await;

    h.rail.stall_submits(Some(Duration::from_secs(600)));
    let trials: Vec<_> = authorized
        .iter()
        .map(|id| {
            let service = h.service.clone();
            let id = *id;
            tokio::spawn(async move { service.confirm_payment(id).await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.service.health().await.circuit, CircuitState::HalfOpen);
    for trial in trials {
        trial.abort();
        assert!(trial.await.unwrap_err().is_cancelled());
    }

    h.rail.stall_submits(None);
    tokio::time::advance(Duration::from_secs(3600)).await;
    for id in authorized {
        let result = h.service.confirm_payment(id).await.unwrap();
        assert_eq!(result.status, AuthorizationStatus::Confirmed);
    }
    assert_eq!(h.service.health().await.circuit, CircuitState::Closed);
    assert_eq!(MockRail::count(&h.rail.submit_calls), 5);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_releases_hold_from_unanswered_reserve() {
    let mut config = single_attempt_config();
    config.resilience.timeout.timeout_ms = 100;
    let h = harness(MockRail::new(RailType::Sepa), config);
    h.rail.lose_next_reserve_response(Duration::from_secs(5));

    let err = h
        .service
        .authorize_payment(sepa_request(dec!(10.00)), "order-1")
        .await
        .unwrap_err();
    assert_eq!(
        err.unavailable_reason(),
        Some(UnavailableReason::RetriesExhausted)
    );
    let pending = h
        .service
        .find_by_idempotency_token("order-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.status, AuthorizationStatus::PendingValidation);
    assert!(pending.reservation_id.is_none());

    let cancel = h.service.cancel_authorization(pending.id).await.unwrap();
    assert!(cancel.cancelled);
    assert_eq!(cancel.status, AuthorizationStatus::Cancelled);
    assert_eq!(MockRail::count(&h.rail.release_calls), 1);

    let hold = h
        .rail
        .query_status(&RailReference::Reference(pending.reference.clone()))
        .await
        .unwrap();
    assert_eq!(hold, RailStatus::Released);
}
