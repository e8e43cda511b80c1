use super::context::RailContext;
use super::idempotency::IdempotencyGuard;
use super::locks::LockTable;
use crate::config::{AuthorizationConfig, RailConfig};
use crate::domain::authorization::{
    AuthenticationMethod, Authorization, AuthorizationId, AuthorizationStatus,
};
use crate::domain::idempotency::IdempotencyKey;
use crate::domain::payment::{
    CancellationResult, HealthStatus, PaymentRequest, PaymentResult, PaymentStatusView,
    RailHealth, RailReference, RailStatus,
};
use crate::domain::ports::{AuthorizationStoreRef, RailPortRef, ScaProviderRef};
use crate::domain::validation::{self, ValidationReport};
use crate::error::{RailError, Result};
use crate::observability::RailEvent;
use crate::resilience::{CircuitState, ResilienceEnvelope};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use AuthorizationStatus::*;

/// Drives the two-phase payment lifecycle against one rail.
///
/// Phase 1 (`authorize_payment`) validates the request, reserves funds and,
/// when required, opens an SCA challenge. Phase 2 (`confirm_payment`)
/// submits the reservation. Every rail call goes through the rail's
/// [`ResilienceEnvelope`], and every operation on one authorization holds
/// that authorization's lock from first read to last write.
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct PaymentRailService {
    rail: RailPortRef,
    sca: ScaProviderRef,
    store: AuthorizationStoreRef,
    envelope: Arc<ResilienceEnvelope>,
    guard: Arc<IdempotencyGuard<AuthorizationId>>,
    locks: Arc<LockTable>,
    policy: Arc<AuthorizationConfig>,
    idempotency_window: Duration,
    context: RailContext,
}

impl PaymentRailService {
    pub fn new(
        rail: RailPortRef,
        sca: ScaProviderRef,
        store: AuthorizationStoreRef,
        config: &RailConfig,
        context: RailContext,
    ) -> Self {
        let envelope =
            ResilienceEnvelope::new(rail.rail_type(), &config.resilience, context.observer.clone());
        let idempotency_window = Duration::seconds(config.idempotency.window_secs);
        Self {
            rail,
            sca,
            store,
            envelope: Arc::new(envelope),
            guard: Arc::new(IdempotencyGuard::new(idempotency_window)),
            locks: Arc::new(LockTable::new()),
            policy: Arc::new(config.authorization.clone()),
            idempotency_window,
            context,
        }
    }

    /// Pure check of a request; nothing is stored and the rail is not called.
    pub fn validate_payment(&self, request: &PaymentRequest) -> ValidationReport {
        validation::validate_payment(request)
    }

    /// Phase 1. Repeated calls with the same live token return the same
    /// authorization and reserve funds at most once.
    ///
    /// Business declines come back as `Ok` with status `DECLINED` and
    /// `last_error` set. A try-again-later failure is returned as `Err` and
    /// leaves the authorization in `PENDING_VALIDATION`; calling again with
    /// the same token resumes it.
    pub async fn authorize_payment(
        &self,
        request: PaymentRequest,
        idempotency_token: &str,
    ) -> Result<Authorization> {
        if idempotency_token.trim().is_empty() {
            return Err(RailError::PaymentRejected(
                "Idempotency key must not be blank".to_string(),
            ));
        }

        let service = self.clone();
        let token = idempotency_token.to_string();
        let id = self
            .guard
            .submit(idempotency_token, self.now(), async move {
                service.authorize_once(request, token).await
            })
            .await?;
        self.load(id).await
    }

    /// Answers the outstanding SCA challenge.
    pub async fn complete_authentication(
        &self,
        id: AuthorizationId,
        response: &str,
    ) -> Result<Authorization> {
        let _lock = self.locks.lock(id).await;
        let mut auth = self.load(id).await?;

        if auth.status != PendingAuthentication {
            return Err(auth.invalid_state("no authentication is pending"));
        }
        let Some(challenge) = auth.challenge.clone() else {
            return Err(auth.invalid_state("no outstanding challenge"));
        };

        let now = self.now();
        if challenge.is_expired_at(now) || auth.is_expired_at(now) {
            info!(authorization_id = %auth.id, "SCA challenge expired");
            let cause = RailError::PaymentRejected("Authentication challenge expired".to_string());
            self.close(&mut auth, Expired, &cause).await?;
            self.persist(&auth).await?;
            return Ok(auth);
        }

        if self.sca.verify(&challenge, response).await? {
            self.transition(&mut auth, Authorized)?;
            auth.last_error = None;
            self.persist(&auth).await?;
            return Ok(auth);
        }

        auth.attempt_count += 1;
        let cause = RailError::PaymentRejected(format!(
            "Authentication failed ({} of {} attempts)",
            auth.attempt_count, self.policy.max_authentication_attempts
        ));
        if auth.attempt_count >= self.policy.max_authentication_attempts {
            self.close(&mut auth, Declined, &cause).await?;
        } else {
            auth.record_error(&cause, now);
            let expires_at = now + self.challenge_ttl(challenge.method);
            auth.challenge = Some(self.sca.issue(&auth, challenge.method, expires_at).await?);
        }
        self.persist(&auth).await?;
        Ok(auth)
    }

    /// Phase 2. Confirming an already confirmed authorization returns the
    /// stored result without touching the rail.
    pub async fn confirm_payment(&self, id: AuthorizationId) -> Result<PaymentResult> {
        let _lock = self.locks.lock(id).await;
        let mut auth = self.load(id).await?;

        match auth.status {
            Confirmed => return payment_result(&auth),
            Authorized => {}
            _ => return Err(auth.invalid_state("only authorized payments can be confirmed")),
        }

        if auth.is_expired_at(self.now()) {
            let cause = RailError::PaymentRejected("Authorization expired".to_string());
            self.close(&mut auth, Expired, &cause).await?;
            self.persist(&auth).await?;
            return Err(auth.invalid_state("authorization expired before confirmation"));
        }

        let reservation_id = auth
            .reservation_id
            .clone()
            .ok_or_else(|| auth.invalid_state("no reservation to submit"))?;
        // Submission is not idempotent. The record is marked in doubt before
        // the rail sees anything, so a confirm that is cut short leaves the
        // next one asking the rail first. Retried attempts ask as well.
        let in_doubt = auth.submission_in_doubt;
        if !in_doubt {
            auth.submission_in_doubt = true;
            self.persist(&auth).await?;
        }
        let rail = &self.rail;
        let reservation = &reservation_id;

        let outcome = self
            .envelope
            .call("submit", |attempt| async move {
                if attempt > 1 || in_doubt {
                    let status = rail
                        .query_status(&RailReference::Reservation(reservation.clone()))
                        .await?;
                    if let Some(payment_id) = status.payment_id() {
                        debug!(%payment_id, attempt, "Earlier submission found at the rail");
                        return Ok(payment_id.clone());
                    }
                }
                rail.submit(reservation).await
            })
            .await;

        match outcome {
            Ok(payment_id) => {
                info!(authorization_id = %auth.id, %payment_id, "Payment confirmed");
                auth.payment_id = Some(payment_id);
                auth.submission_in_doubt = false;
                auth.last_error = None;
                self.transition(&mut auth, Confirmed)?;
                self.persist(&auth).await?;
                payment_result(&auth)
            }
            Err(err) if err.is_terminal() => {
                info!(authorization_id = %auth.id, error = %err, "Submission declined by rail");
                auth.submission_in_doubt = false;
                self.close(&mut auth, Declined, &err).await?;
                self.persist(&auth).await?;
                Err(err)
            }
            Err(err) => {
                warn!(
                    authorization_id = %auth.id,
                    error = %err,
                    "Submission outcome unknown; rail status must be queried before retrying"
                );
                auth.record_error(&err, self.now());
                self.persist(&auth).await?;
                Err(err)
            }
        }
    }

    pub async fn cancel_authorization(&self, id: AuthorizationId) -> Result<CancellationResult> {
        let _lock = self.locks.lock(id).await;
        let mut auth = self.load(id).await?;

        match auth.status {
            Cancelled => {
                return Ok(cancellation(&auth, true, Some("already cancelled".to_string())));
            }
            Confirmed => return Err(auth.invalid_state("already confirmed, cannot cancel")),
            Declined | Expired => {
                let reason = format!("authorization is {}", auth.status);
                return Ok(cancellation(&auth, false, Some(reason)));
            }
            _ => {}
        }

        if self.settle_if_submitted(&mut auth).await? {
            self.persist(&auth).await?;
            return Err(auth.invalid_state("already confirmed, cannot cancel"));
        }

        let released = match self.find_lost_reservation(&mut auth).await {
            Ok(()) => self.release_reservation(&auth).await,
            Err(err) => Err(err),
        };
        if let Err(err) = released {
            auth.record_error(&err, self.now());
            self.persist(&auth).await?;
            return Err(err);
        }
        self.transition(&mut auth, Cancelled)?;
        self.persist(&auth).await?;
        Ok(cancellation(&auth, true, None))
    }

    /// Single-phase convenience: authorize, then confirm straight away when
    /// no SCA is needed. Returns the resulting snapshot.
    pub async fn initiate_payment(
        &self,
        request: PaymentRequest,
        idempotency_token: &str,
    ) -> Result<Authorization> {
        let auth = self.authorize_payment(request, idempotency_token).await?;
        if auth.status != Authorized {
            return Ok(auth);
        }
        match self.confirm_payment(auth.id).await {
            Ok(_) => self.load(auth.id).await,
            Err(err) => {
                let snapshot = self.load(auth.id).await?;
                if snapshot.status == Declined {
                    Ok(snapshot)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Expires non-terminal authorizations whose lifetime ended before `now`
    /// and releases their reservations. Records whose release fails are left
    /// for the next sweep. Returns how many were expired.
    pub async fn reap(&self, now: DateTime<Utc>) -> Result<usize> {
        let candidates = self.store.list_non_terminal().await?;
        let mut expired = 0;

        for candidate in candidates.into_iter().filter(|a| a.is_expired_at(now)) {
            let _lock = self.locks.lock(candidate.id).await;
            let mut auth = self.load(candidate.id).await?;
            if auth.status.is_terminal() || !auth.is_expired_at(now) {
                continue;
            }

            match self.settle_if_submitted(&mut auth).await {
                Ok(true) => {
                    self.persist(&auth).await?;
                    continue;
                }
                Ok(false) if auth.submission_in_doubt => continue,
                Ok(false) => {}
                Err(err) => {
                    warn!(authorization_id = %auth.id, error = %err, "Status query failed during sweep");
                    continue;
                }
            }
            if let Err(err) = self.find_lost_reservation(&mut auth).await {
                warn!(authorization_id = %auth.id, error = %err, "Hold lookup failed during sweep");
                continue;
            }

            match self.release_reservation(&auth).await {
                Ok(()) => {
                    self.transition(&mut auth, Expired)?;
                    self.persist(&auth).await?;
                    expired += 1;
                }
                Err(err) => {
                    warn!(authorization_id = %auth.id, error = %err, "Release failed; retrying on next sweep");
                    auth.record_error(&err, now);
                    self.persist(&auth).await?;
                }
            }
        }

        self.locks.prune();
        let forgotten = self.guard.purge_expired(now);
        let evicted = self.store.evict_expired(now).await?;
        debug!(expired, forgotten, evicted, "Reaper sweep finished");
        Ok(expired)
    }

    /// Follow-up for authorizations left in doubt: resumes a reservation that
    /// never got an answer, or asks the rail what happened to a submission.
    pub async fn reconcile(&self, id: AuthorizationId) -> Result<Authorization> {
        let _lock = self.locks.lock(id).await;
        let mut auth = self.load(id).await?;

        match auth.status {
            Initiated | PendingValidation => {
                if auth.status == Initiated {
                    self.transition(&mut auth, PendingValidation)?;
                }
                self.reserve_and_authenticate(&mut auth).await?;
            }
            Authorized if auth.submission_in_doubt => {
                self.settle_if_submitted(&mut auth).await?;
                self.persist(&auth).await?;
            }
            _ => {}
        }
        Ok(auth)
    }

    pub async fn get_authorization(&self, id: AuthorizationId) -> Result<Authorization> {
        self.load(id).await
    }

    /// The authorization a live token maps to, if any.
    pub async fn find_by_idempotency_token(&self, token: &str) -> Result<Option<Authorization>> {
        let now = self.now();
        Ok(self
            .store
            .find_by_idempotency_token(token)
            .await?
            .filter(|auth| auth.idempotency_key.is_valid_at(now)))
    }

    pub async fn get_payment_status(&self, id: AuthorizationId) -> Result<PaymentStatusView> {
        let auth = self.load(id).await?;
        Ok(PaymentStatusView {
            authorization_id: auth.id,
            status: auth.status,
            payment_id: auth.payment_id,
            reserved_amount: auth.reserved_amount,
            last_error: auth.last_error,
            updated_at: auth.updated_at,
        })
    }

    pub async fn list_authorizations(&self) -> Result<Vec<Authorization>> {
        self.store.get_all().await
    }

    pub async fn health(&self) -> RailHealth {
        let rail = self.rail.rail_type();
        let circuit = self.envelope.circuit_state();
        let (status, reason) = if !self.rail.is_healthy().await {
            (HealthStatus::Down, Some(format!("{} rail is not responding", rail)))
        } else if circuit == CircuitState::Open {
            (HealthStatus::Down, Some("circuit breaker is open".to_string()))
        } else {
            (HealthStatus::Up, None)
        };
        RailHealth {
            rail,
            status,
            circuit,
            checked_at: self.now(),
            reason,
        }
    }

    async fn authorize_once(&self, request: PaymentRequest, token: String) -> Result<AuthorizationId> {
        let now = self.now();
        if let Some(existing) = self.store.find_by_idempotency_token(&token).await?
            && existing.idempotency_key.is_valid_at(now)
        {
            return self.resume(existing.id).await;
        }

        let key = IdempotencyKey::new(token.clone(), now, self.idempotency_window);
        let mut auth = Authorization::new(
            request.amount,
            request.debtor,
            request.creditor,
            key,
            None,
            now,
            Duration::seconds(self.policy.ttl_secs),
        );
        auth.authentication = request.authentication;

        let lock = self.locks.lock(auth.id).await;
        self.transition(&mut auth, PendingValidation)?;
        if !self.store.insert_if_absent(auth.clone()).await? {
            // Another writer claimed the token first.
            drop(lock);
            let existing = self
                .store
                .find_by_idempotency_token(&token)
                .await?
                .ok_or_else(|| {
                    RailError::Storage(format!("Idempotency token {} lost its record", token))
                })?;
            return self.resume(existing.id).await;
        }
        info!(authorization_id = %auth.id, amount = %auth.reserved_amount, "Authorization created");

        self.reserve_and_authenticate(&mut auth).await?;
        Ok(auth.id)
    }

    async fn resume(&self, id: AuthorizationId) -> Result<AuthorizationId> {
        let _lock = self.locks.lock(id).await;
        let mut auth = self.load(id).await?;
        if matches!(auth.status, Initiated | PendingValidation) {
            if auth.status == Initiated {
                self.transition(&mut auth, PendingValidation)?;
            }
            debug!(authorization_id = %id, "Resuming reservation");
            self.reserve_and_authenticate(&mut auth).await?;
        }
        Ok(id)
    }

    /// Runs the rest of Phase 1 on an authorization in `PENDING_VALIDATION`
    /// and persists the outcome. The caller holds the authorization's lock.
    async fn reserve_and_authenticate(&self, auth: &mut Authorization) -> Result<()> {
        if auth.is_expired_at(self.now()) {
            if let Err(err) = self.find_lost_reservation(auth).await {
                warn!(authorization_id = %auth.id, error = %err, "Hold lookup failed; leaving it to lapse");
            }
            let cause = RailError::PaymentRejected("Authorization expired".to_string());
            self.close(auth, Expired, &cause).await?;
            return self.persist(auth).await;
        }

        let mut request =
            PaymentRequest::new(auth.reserved_amount, auth.debtor.clone(), auth.creditor.clone());
        request.authentication = auth.authentication.clone();
        match validation::validate_payment(&request).into_result() {
            Ok(warnings) => {
                for warning in warnings {
                    debug!(authorization_id = %auth.id, code = warning.code, "{}", warning.message);
                }
            }
            Err(err) => {
                info!(authorization_id = %auth.id, error = %err, "Payment failed validation");
                self.close(auth, Declined, &err).await?;
                return self.persist(auth).await;
            }
        }

        let outcome = self
            .envelope
            .call("reserve", |_| {
                self.rail.reserve(
                    &auth.reserved_amount,
                    &auth.debtor,
                    &auth.creditor,
                    &auth.reference,
                )
            })
            .await;

        let reservation = match outcome {
            Ok(reservation) => reservation,
            Err(err) if err.is_retry_later() => {
                warn!(authorization_id = %auth.id, error = %err, "Reservation deferred");
                auth.record_error(&err, self.now());
                self.persist(auth).await?;
                return Err(err);
            }
            Err(err) => {
                info!(authorization_id = %auth.id, error = %err, "Reservation declined by rail");
                self.close(auth, Declined, &err).await?;
                return self.persist(auth).await;
            }
        };
        auth.reservation_id = Some(reservation.reservation_id);

        if self.requires_sca(auth, reservation.sca_required) {
            let method = auth
                .authentication
                .as_ref()
                .map(|context| context.method)
                .filter(|method| *method != AuthenticationMethod::None)
                .unwrap_or_default();
            let expires_at = self.now() + self.challenge_ttl(method);
            match self.sca.issue(auth, method, expires_at).await {
                Ok(challenge) => {
                    self.transition(auth, PendingAuthentication)?;
                    auth.challenge = Some(challenge);
                    auth.last_error = None;
                }
                Err(err) => self.close(auth, Declined, &err).await?,
            }
        } else {
            self.transition(auth, Authorized)?;
            auth.last_error = None;
        }
        self.persist(auth).await
    }

    fn requires_sca(&self, auth: &Authorization, rail_requires: bool) -> bool {
        let exempt = self.policy.allow_sca_exemptions
            && auth
                .authentication
                .as_ref()
                .is_some_and(|context| context.has_valid_exemption());
        if exempt && rail_requires {
            debug!(authorization_id = %auth.id, "SCA exemption applied");
        }
        (rail_requires || self.policy.always_require_sca) && !exempt
    }

    fn challenge_ttl(&self, method: AuthenticationMethod) -> Duration {
        match method {
            AuthenticationMethod::OauthRedirect => {
                Duration::seconds(self.policy.redirect_challenge_ttl_secs)
            }
            _ => Duration::seconds(self.policy.otp_challenge_ttl_secs),
        }
    }

    /// Asks the rail whether an ambiguous submission went through and, if
    /// it did, confirms the authorization. Returns `true` when confirmed.
    async fn settle_if_submitted(&self, auth: &mut Authorization) -> Result<bool> {
        if !auth.submission_in_doubt {
            return Ok(false);
        }
        let Some(reservation_id) = auth.reservation_id.clone() else {
            return Ok(false);
        };

        let reference = RailReference::Reservation(reservation_id);
        let status = self
            .envelope
            .call("query_status", |_| self.rail.query_status(&reference))
            .await?;

        match status {
            RailStatus::Submitted(payment_id) | RailStatus::Settled(payment_id) => {
                info!(authorization_id = %auth.id, %payment_id, "Reconciled earlier submission");
                auth.payment_id = Some(payment_id);
                auth.submission_in_doubt = false;
                auth.last_error = None;
                self.transition(auth, Confirmed)?;
                Ok(true)
            }
            RailStatus::Reserved(_) | RailStatus::Released | RailStatus::Rejected(_) => {
                auth.submission_in_doubt = false;
                Ok(false)
            }
            RailStatus::Unknown => Ok(false),
        }
    }

    /// A reserve whose answer never arrived may still have taken effect.
    /// Looks the hold up by reference and adopts its reservation id.
    async fn find_lost_reservation(&self, auth: &mut Authorization) -> Result<()> {
        if auth.reservation_id.is_some() || !matches!(auth.status, Initiated | PendingValidation) {
            return Ok(());
        }
        let reference = RailReference::Reference(auth.reference.clone());
        let status = self
            .envelope
            .call("query_status", |_| self.rail.query_status(&reference))
            .await?;
        if let RailStatus::Reserved(reservation_id) = status {
            debug!(authorization_id = %auth.id, %reservation_id, "Found hold from an unanswered reserve");
            auth.reservation_id = Some(reservation_id);
        }
        Ok(())
    }

    async fn release_reservation(&self, auth: &Authorization) -> Result<()> {
        let Some(reservation_id) = &auth.reservation_id else {
            return Ok(());
        };
        match self
            .envelope
            .call("release", |_| self.rail.release(reservation_id))
            .await
        {
            // Nothing held at the rail any more.
            Ok(()) | Err(RailError::PaymentNotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Moves to a terminal state, releasing the reservation on the way.
    /// A failed release is logged and the hold is left to lapse at the rail.
    async fn close(
        &self,
        auth: &mut Authorization,
        next: AuthorizationStatus,
        cause: &RailError,
    ) -> Result<()> {
        auth.record_error(cause, self.now());
        if let Err(err) = self.release_reservation(auth).await {
            warn!(authorization_id = %auth.id, error = %err, "Reservation release failed");
        }
        self.transition(auth, next)
    }

    fn transition(&self, auth: &mut Authorization, next: AuthorizationStatus) -> Result<()> {
        let from = auth.transition_to(next, self.now())?;
        self.context
            .observer
            .on_event(&RailEvent::AuthorizationTransition {
                authorization_id: auth.id,
                from,
                to: next,
            });
        Ok(())
    }

    async fn load(&self, id: AuthorizationId) -> Result<Authorization> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| RailError::PaymentNotFound(format!("Authorization {} not found", id)))
    }

    async fn persist(&self, auth: &Authorization) -> Result<()> {
        self.store.update(auth.clone()).await
    }

    fn now(&self) -> DateTime<Utc> {
        self.context.now()
    }
}

fn payment_result(auth: &Authorization) -> Result<PaymentResult> {
    let payment_id = auth
        .payment_id
        .clone()
        .ok_or_else(|| RailError::Storage(format!("{} is confirmed without a payment id", auth.id)))?;
    Ok(PaymentResult {
        authorization_id: auth.id,
        payment_id,
        status: auth.status,
    })
}

fn cancellation(auth: &Authorization, cancelled: bool, reason: Option<String>) -> CancellationResult {
    CancellationResult {
        authorization_id: auth.id,
        cancelled,
        status: auth.status,
        reason,
        cancelled_at: (auth.status == Cancelled).then_some(auth.updated_at),
    }
}
