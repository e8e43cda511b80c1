#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use payment_rails::application::context::RailContext;
use payment_rails::application::service::PaymentRailService;
use payment_rails::config::RailConfig;
use payment_rails::domain::account::BankAccount;
use payment_rails::domain::money::{Currency, Money};
use payment_rails::domain::payment::{
    PaymentId, PaymentRequest, RailReference, RailStatus, RailType, ReservationId,
    ReservationResult,
};
use payment_rails::domain::ports::RailPort;
use payment_rails::error::RailError;
use payment_rails::infrastructure::clock::ManualClock;
use payment_rails::infrastructure::in_memory::InMemoryAuthorizationStore;
use payment_rails::infrastructure::otp::InMemoryOtpProvider;
use payment_rails::infrastructure::simulated_rail::SimulatedRail;
use payment_rails::observability::RecordingObserver;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

pub const OTP_CODE: &str = "424242";

/// A scripted failure injected in front of the sandbox rail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Communication,
    Unrecognized,
    InsufficientFunds,
}

impl Fault {
    fn into_error(self) -> anyhow::Error {
        match self {
            Fault::Communication => RailError::RailCommunication("connection reset".into()).into(),
            Fault::Unrecognized => anyhow!("gateway returned garbage"),
            Fault::InsufficientFunds => {
                RailError::InsufficientFunds("balance too low".into()).into()
            }
        }
    }
}

#[derive(Default)]
struct Script {
    reserve_faults: VecDeque<Fault>,
    reserve_always: Option<Fault>,
    lost_reserve_response: Option<Duration>,
    submit_faults: VecDeque<Fault>,
    lost_submit_response: Option<Duration>,
    submit_stall: Option<Duration>,
    healthy: bool,
}

/// Sandbox rail with call counters and scripted faults.
pub struct MockRail {
    inner: SimulatedRail,
    pub reserve_calls: AtomicU32,
    pub release_calls: AtomicU32,
    pub submit_calls: AtomicU32,
    pub query_calls: AtomicU32,
    script: Mutex<Script>,
}

impl MockRail {
    pub fn new(rail: RailType) -> Self {
        Self::wrap(SimulatedRail::new(rail))
    }

    pub fn wrap(inner: SimulatedRail) -> Self {
        Self {
            inner,
            reserve_calls: AtomicU32::new(0),
            release_calls: AtomicU32::new(0),
            submit_calls: AtomicU32::new(0),
            query_calls: AtomicU32::new(0),
            script: Mutex::new(Script {
                healthy: true,
                ..Script::default()
            }),
        }
    }

    pub fn fail_reserves(&self, fault: Fault, times: usize) {
        let mut script = self.script.lock().unwrap();
        script.reserve_faults.extend(std::iter::repeat_n(fault, times));
    }

    pub fn fail_all_reserves(&self, fault: Option<Fault>) {
        self.script.lock().unwrap().reserve_always = fault;
    }

    pub fn fail_submits(&self, fault: Fault, times: usize) {
        let mut script = self.script.lock().unwrap();
        script.submit_faults.extend(std::iter::repeat_n(fault, times));
    }

    /// The next reserve takes effect at the rail, but its response never arrives.
    pub fn lose_next_reserve_response(&self, hang: Duration) {
        self.script.lock().unwrap().lost_reserve_response = Some(hang);
    }

    /// Every submit hangs before reaching the rail until this is cleared.
    pub fn stall_submits(&self, stall: Option<Duration>) {
        self.script.lock().unwrap().submit_stall = stall;
    }

    /// The next submit reaches the rail, but its response never arrives.
    pub fn lose_next_submit_response(&self, hang: Duration) {
        self.script.lock().unwrap().lost_submit_response = Some(hang);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.script.lock().unwrap().healthy = healthy;
    }

    pub fn count(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RailPort for MockRail {
    fn rail_type(&self) -> RailType {
        self.inner.rail_type()
    }

    async fn reserve(
        &self,
        amount: &Money,
        debtor: &BankAccount,
        creditor: &BankAccount,
        reference: &str,
    ) -> anyhow::Result<ReservationResult> {
        self.reserve_calls.fetch_add(1, Ordering::SeqCst);
        let (fault, hang) = {
            let mut script = self.script.lock().unwrap();
            let fault = script.reserve_faults.pop_front().or(script.reserve_always);
            (fault, script.lost_reserve_response.take())
        };
        if let Some(fault) = fault {
            return Err(fault.into_error());
        }
        let reservation = self.inner.reserve(amount, debtor, creditor, reference).await?;
        if let Some(hang) = hang {
            tokio::time::sleep(hang).await;
        }
        Ok(reservation)
    }

    async fn release(&self, reservation_id: &ReservationId) -> anyhow::Result<()> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.release(reservation_id).await
    }

    async fn submit(&self, reservation_id: &ReservationId) -> anyhow::Result<PaymentId> {
        let stall = self.script.lock().unwrap().submit_stall;
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let (fault, hang) = {
            let mut script = self.script.lock().unwrap();
            (script.submit_faults.pop_front(), script.lost_submit_response.take())
        };
        if let Some(fault) = fault {
            return Err(fault.into_error());
        }
        let payment_id = self.inner.submit(reservation_id).await?;
        if let Some(hang) = hang {
            tokio::time::sleep(hang).await;
        }
        Ok(payment_id)
    }

    async fn query_status(&self, reference: &RailReference) -> anyhow::Result<RailStatus> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.query_status(reference).await
    }

    async fn is_healthy(&self) -> bool {
        self.script.lock().unwrap().healthy
    }
}

pub struct Harness {
    pub service: PaymentRailService,
    pub rail: Arc<MockRail>,
    pub clock: Arc<ManualClock>,
    pub observer: Arc<RecordingObserver>,
}

pub fn harness(rail: MockRail, config: RailConfig) -> Harness {
    let rail = Arc::new(rail);
    let clock = Arc::new(ManualClock::default());
    let observer = Arc::new(RecordingObserver::new());
    let service = PaymentRailService::new(
        rail.clone(),
        Arc::new(InMemoryOtpProvider::with_fixed_code(OTP_CODE)),
        Arc::new(InMemoryAuthorizationStore::new()),
        &config,
        RailContext::new(clock.clone(), observer.clone()),
    );
    Harness {
        service,
        rail,
        clock,
        observer,
    }
}

/// Defaults with a single attempt, so each call hits the rail exactly once.
pub fn single_attempt_config() -> RailConfig {
    let mut config = RailConfig::default();
    config.resilience.retry.max_attempts = 1;
    config
}

pub fn us_request(amount: Decimal) -> PaymentRequest {
    PaymentRequest::new(
        Money::new(amount, Currency::Usd).unwrap(),
        BankAccount::from_account_number("Alice Smith", "123456789", Some("021000021".into()))
            .unwrap(),
        BankAccount::from_account_number("Bob Jones", "987654321", Some("011000015".into()))
            .unwrap(),
    )
}

pub fn sepa_request(amount: Decimal) -> PaymentRequest {
    PaymentRequest::new(
        Money::new(amount, Currency::Eur).unwrap(),
        BankAccount::from_iban("Alice", "DE89370400440532013000", Some("DEUTDEFF".into()))
            .unwrap(),
        BankAccount::from_iban("Bob", "FR1420041010050500013M02606", Some("PSSTFRPP".into()))
            .unwrap(),
    )
}
