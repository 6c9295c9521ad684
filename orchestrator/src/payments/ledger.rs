use async_trait::async_trait;
use shared_types::Amount;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Ledger operations, used for logging and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum LedgerOp {
    Hold,
    Settle,
    Cancel,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Connection problems, timeouts, 5xx; safe to retry with the same key.
    #[error("ledger unavailable: {0}")]
    Transient(String),
    /// The ledger refused the operation; retrying will not help.
    #[error("ledger rejected operation: {0}")]
    Rejected(String),
}

impl LedgerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transient(_))
    }
}

/// External settlement service. Every call must be safe to repeat with the same key.
#[async_trait]
pub trait EscrowLedger: Send + Sync {
    /// Reserve `amount` from `from` for `to`; returns the ledger's hold reference.
    async fn hold(
        &self,
        from: &str,
        to: &str,
        amount: Amount,
        idempotency_key: &str,
    ) -> Result<String, LedgerError>;
    /// Transfer a held amount to the payee.
    async fn settle(&self, idempotency_key: &str) -> Result<(), LedgerError>;
    /// Return a held amount to the payer.
    async fn cancel(&self, idempotency_key: &str) -> Result<(), LedgerError>;
}

pub type SharedEscrowLedger = Arc<dyn EscrowLedger>;

/// Counts of ledger side effects actually applied (repeat calls excluded).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerEffects {
    pub holds: usize,
    pub settles: usize,
    pub cancels: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HoldState {
    Held,
    Settled,
    Cancelled,
}

#[derive(Debug, Clone)]
struct HoldEntry {
    hold_ref: String,
    amount: Amount,
    state: HoldState,
}

#[derive(Debug, Default)]
struct LedgerInner {
    holds: HashMap<String, HoldEntry>,
    effects: LedgerEffects,
    calls: HashMap<LedgerOp, usize>,
    scripted_failures: HashMap<LedgerOp, VecDeque<LedgerError>>,
}

/// Offline ledger that settles in memory. Used when no settlement service
/// is configured and as the ledger double in tests.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    inner: Mutex<LedgerInner>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of `op` fail with `error`.
    pub fn fail_next(&self, op: LedgerOp, times: usize, error: LedgerError) {
        if let Ok(mut inner) = self.inner.lock() {
            let queue = inner.scripted_failures.entry(op).or_default();
            queue.extend(std::iter::repeat(error).take(times));
        }
    }

    pub fn effects(&self) -> LedgerEffects {
        self.inner
            .lock()
            .map(|inner| inner.effects)
            .unwrap_or_default()
    }

    /// Raw call count for `op`, including repeats and failures.
    pub fn calls(&self, op: LedgerOp) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.calls.get(&op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Sum currently held (not yet settled or cancelled).
    pub fn held_total(&self) -> Amount {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .holds
                    .values()
                    .filter(|h| h.state == HoldState::Held)
                    .map(|h| h.amount)
                    .sum()
            })
            .unwrap_or(0)
    }

    fn begin(&self, op: LedgerOp) -> Result<std::sync::MutexGuard<'_, LedgerInner>, LedgerError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| LedgerError::Transient("ledger lock poisoned".to_string()))?;
        *inner.calls.entry(op).or_insert(0) += 1;
        if let Some(error) = inner
            .scripted_failures
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        Ok(inner)
    }
}

#[async_trait]
impl EscrowLedger for InMemoryLedger {
    async fn hold(
        &self,
        _from: &str,
        _to: &str,
        amount: Amount,
        idempotency_key: &str,
    ) -> Result<String, LedgerError> {
        let mut inner = self.begin(LedgerOp::Hold)?;
        if let Some(existing) = inner.holds.get(idempotency_key) {
            return Ok(existing.hold_ref.clone());
        }
        let hold_ref = format!("hold_{}", ulid::Ulid::new());
        inner.holds.insert(
            idempotency_key.to_string(),
            HoldEntry {
                hold_ref: hold_ref.clone(),
                amount,
                state: HoldState::Held,
            },
        );
        inner.effects.holds += 1;
        Ok(hold_ref)
    }

    async fn settle(&self, idempotency_key: &str) -> Result<(), LedgerError> {
        let mut inner = self.begin(LedgerOp::Settle)?;
        let state = inner.holds.get(idempotency_key).map(|h| h.state);
        match state {
            Some(HoldState::Held) => {
                if let Some(hold) = inner.holds.get_mut(idempotency_key) {
                    hold.state = HoldState::Settled;
                }
                inner.effects.settles += 1;
                Ok(())
            }
            Some(HoldState::Settled) => Ok(()),
            Some(HoldState::Cancelled) => Err(LedgerError::Rejected(format!(
                "hold {idempotency_key} was cancelled"
            ))),
            None => Err(LedgerError::Rejected(format!(
                "no hold for {idempotency_key}"
            ))),
        }
    }

    async fn cancel(&self, idempotency_key: &str) -> Result<(), LedgerError> {
        let mut inner = self.begin(LedgerOp::Cancel)?;
        let state = inner.holds.get(idempotency_key).map(|h| h.state);
        match state {
            Some(HoldState::Held) => {
                if let Some(hold) = inner.holds.get_mut(idempotency_key) {
                    hold.state = HoldState::Cancelled;
                }
                inner.effects.cancels += 1;
                Ok(())
            }
            Some(HoldState::Cancelled) | None => Ok(()),
            Some(HoldState::Settled) => Err(LedgerError::Rejected(format!(
                "hold {idempotency_key} already settled"
            ))),
        }
    }
}
