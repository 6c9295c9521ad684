//! PaymentCoordinator - sole owner of escrow records
//!
//! Every escrow moves only through `propose`, `authorize`, `release` and
//! `refund`. Operations on one payment are serialized by a per-payment lock;
//! the book itself sits behind a plain mutex that is never held across a
//! ledger call. Locks are dropped once their escrow resolves, and a task's
//! records can be forgotten after every escrow of it is terminal.
//!
//! Budget rule: the AUTHORIZED + RELEASED total of a task never exceeds its
//! limit. It is checked when an escrow is proposed and again right before
//! the ledger hold.

use chrono::Utc;
use shared_types::{Amount, Escrow, EscrowState};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::ledger::{LedgerError, LedgerOp, SharedEscrowLedger};
use crate::retry::{retry_with_backoff, BackoffPolicy};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PaymentError {
    #[error("no budget registered for task {0}")]
    UnknownTask(String),
    #[error("escrow not found: {0}")]
    NotFound(String),
    #[error("budget exceeded for task {task_id}: requested {requested}, committed {committed}, limit {limit}")]
    BudgetExceeded {
        task_id: String,
        requested: Amount,
        committed: Amount,
        limit: Amount,
    },
    #[error("subtask {subtask_id} already has open escrow {payment_id}")]
    EscrowConflict {
        subtask_id: String,
        payment_id: String,
    },
    #[error("cannot {operation} escrow {payment_id} in state {state:?}")]
    InvalidTransition {
        payment_id: String,
        state: EscrowState,
        operation: &'static str,
    },
    #[error("ledger {operation} failed after {attempts} attempt(s): {message}")]
    Ledger {
        operation: String,
        attempts: u32,
        message: String,
    },
    #[error("payment book unavailable: {0}")]
    Internal(String),
}

#[derive(Default)]
struct EscrowBook {
    escrows: HashMap<String, Escrow>,
    /// Payment ids per task, in proposal order.
    by_task: HashMap<String, Vec<String>>,
    /// The single non-terminal escrow of each subtask.
    open_by_subtask: HashMap<String, String>,
    budgets: HashMap<String, Amount>,
    /// Escrows whose hold reached the ledger at least once.
    hold_attempted: HashSet<String>,
    /// Refunds that failed against the ledger and still need to go through.
    pending_refunds: HashMap<String, String>,
    payment_locks: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl EscrowBook {
    fn committed_total(&self, task_id: &str) -> Amount {
        self.by_task
            .get(task_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.escrows.get(id))
            .filter(|e| e.state.is_committed())
            .map(|e| e.amount)
            .sum()
    }

    fn check_budget(&self, task_id: &str, amount: Amount) -> Result<(), PaymentError> {
        let limit = *self
            .budgets
            .get(task_id)
            .ok_or_else(|| PaymentError::UnknownTask(task_id.to_string()))?;
        let committed = self.committed_total(task_id);
        if committed.saturating_add(amount) > limit {
            return Err(PaymentError::BudgetExceeded {
                task_id: task_id.to_string(),
                requested: amount,
                committed,
                limit,
            });
        }
        Ok(())
    }

    fn escrow(&self, payment_id: &str) -> Result<&Escrow, PaymentError> {
        self.escrows
            .get(payment_id)
            .ok_or_else(|| PaymentError::NotFound(payment_id.to_string()))
    }

    fn resolve(&mut self, payment_id: &str, state: EscrowState) -> Option<Escrow> {
        let escrow = self.escrows.get_mut(payment_id)?;
        escrow.state = state;
        escrow.resolved_at = Some(Utc::now());
        let subtask_id = escrow.subtask_id.clone();
        let snapshot = escrow.clone();
        if self.open_by_subtask.get(&subtask_id).map(String::as_str) == Some(payment_id) {
            self.open_by_subtask.remove(&subtask_id);
        }
        // Terminal escrows never change again, so callers racing on the old
        // lock only observe the final state.
        self.payment_locks.remove(payment_id);
        self.hold_attempted.remove(payment_id);
        Some(snapshot)
    }
}

pub struct PaymentCoordinator {
    ledger: SharedEscrowLedger,
    backoff: BackoffPolicy,
    call_timeout: Duration,
    book: Mutex<EscrowBook>,
}

impl PaymentCoordinator {
    pub fn new(ledger: SharedEscrowLedger, backoff: BackoffPolicy, call_timeout: Duration) -> Self {
        Self {
            ledger,
            backoff,
            call_timeout,
            book: Mutex::new(EscrowBook::default()),
        }
    }

    fn book(&self) -> Result<MutexGuard<'_, EscrowBook>, PaymentError> {
        self.book
            .lock()
            .map_err(|_| PaymentError::Internal("escrow book lock poisoned".to_string()))
    }

    fn payment_lock(&self, payment_id: &str) -> Result<Arc<tokio::sync::Mutex<()>>, PaymentError> {
        let mut book = self.book()?;
        if book.escrow(payment_id)?.state.is_terminal() {
            return Ok(Arc::default());
        }
        Ok(book
            .payment_locks
            .entry(payment_id.to_string())
            .or_default()
            .clone())
    }

    /// Register the spending limit for a task before any escrow is proposed.
    pub fn register_task(&self, task_id: &str, budget_limit: Amount) -> Result<(), PaymentError> {
        self.book()?
            .budgets
            .insert(task_id.to_string(), budget_limit);
        Ok(())
    }

    /// Create a PROPOSED escrow. Re-proposing the same payee and amount for a
    /// subtask returns the open escrow instead of creating a second one.
    pub fn propose(
        &self,
        task_id: &str,
        subtask_id: &str,
        payer: &str,
        payee: &str,
        amount: Amount,
    ) -> Result<Escrow, PaymentError> {
        let mut book = self.book()?;

        if let Some(open_id) = book.open_by_subtask.get(subtask_id) {
            let open = book.escrow(open_id)?;
            if open.payee == payee && open.amount == amount && open.payer == payer {
                return Ok(open.clone());
            }
            return Err(PaymentError::EscrowConflict {
                subtask_id: subtask_id.to_string(),
                payment_id: open_id.clone(),
            });
        }

        book.check_budget(task_id, amount)?;

        let escrow = Escrow {
            payment_id: format!("pay_{}", ulid::Ulid::new()),
            task_id: task_id.to_string(),
            subtask_id: subtask_id.to_string(),
            payer: payer.to_string(),
            payee: payee.to_string(),
            amount,
            state: EscrowState::Proposed,
            created_at: Utc::now(),
            resolved_at: None,
            hold_ref: None,
            notes: None,
            refund_reason: None,
        };

        book.by_task
            .entry(task_id.to_string())
            .or_default()
            .push(escrow.payment_id.clone());
        book.open_by_subtask
            .insert(subtask_id.to_string(), escrow.payment_id.clone());
        book.escrows
            .insert(escrow.payment_id.clone(), escrow.clone());

        tracing::info!(
            task_id = %task_id,
            subtask_id = %subtask_id,
            payment_id = %escrow.payment_id,
            payee = %payee,
            amount,
            "Escrow proposed"
        );
        Ok(escrow)
    }

    /// PROPOSED → AUTHORIZED with a ledger hold. Already-AUTHORIZED is a no-op.
    pub async fn authorize(&self, payment_id: &str) -> Result<Escrow, PaymentError> {
        let lock = self.payment_lock(payment_id)?;
        let _guard = lock.lock().await;

        let (payer, payee, amount) = {
            let mut book = self.book()?;
            let escrow = book.escrow(payment_id)?.clone();
            match escrow.state {
                EscrowState::Authorized => return Ok(escrow),
                EscrowState::Proposed => {}
                state => {
                    return Err(PaymentError::InvalidTransition {
                        payment_id: payment_id.to_string(),
                        state,
                        operation: "authorize",
                    })
                }
            }
            book.check_budget(&escrow.task_id, escrow.amount)?;
            book.hold_attempted.insert(payment_id.to_string());
            (escrow.payer, escrow.payee, escrow.amount)
        };

        let hold_ref = self
            .ledger_call(LedgerOp::Hold, || {
                self.ledger.hold(&payer, &payee, amount, payment_id)
            })
            .await?;

        let mut book = self.book()?;
        let escrow = book
            .escrows
            .get_mut(payment_id)
            .ok_or_else(|| PaymentError::NotFound(payment_id.to_string()))?;
        escrow.state = EscrowState::Authorized;
        escrow.hold_ref = Some(hold_ref);
        tracing::info!(
            task_id = %escrow.task_id,
            payment_id = %payment_id,
            amount = escrow.amount,
            "Escrow authorized"
        );
        Ok(escrow.clone())
    }

    /// AUTHORIZED → RELEASED. Already-RELEASED is a no-op.
    pub async fn release(&self, payment_id: &str, notes: Option<String>) -> Result<Escrow, PaymentError> {
        let lock = self.payment_lock(payment_id)?;
        let _guard = lock.lock().await;

        {
            let book = self.book()?;
            let escrow = book.escrow(payment_id)?;
            match escrow.state {
                EscrowState::Released => return Ok(escrow.clone()),
                EscrowState::Authorized => {}
                state => {
                    return Err(PaymentError::InvalidTransition {
                        payment_id: payment_id.to_string(),
                        state,
                        operation: "release",
                    })
                }
            }
        }

        self.ledger_call(LedgerOp::Settle, || self.ledger.settle(payment_id))
            .await?;

        let mut book = self.book()?;
        if let Some(escrow) = book.escrows.get_mut(payment_id) {
            escrow.notes = notes;
        }
        let escrow = book
            .resolve(payment_id, EscrowState::Released)
            .ok_or_else(|| PaymentError::NotFound(payment_id.to_string()))?;
        tracing::info!(
            task_id = %escrow.task_id,
            payment_id = %payment_id,
            amount = escrow.amount,
            "Escrow released"
        );
        Ok(escrow)
    }

    /// AUTHORIZED or PROPOSED → REFUNDED. Already-REFUNDED is a no-op.
    ///
    /// A PROPOSED escrow whose hold never reached the ledger is cancelled
    /// locally. If the ledger cancel exhausts its retries the escrow stays
    /// AUTHORIZED and is queued for [`Self::retry_pending_refunds`].
    pub async fn refund(&self, payment_id: &str, reason: &str) -> Result<Escrow, PaymentError> {
        let lock = self.payment_lock(payment_id)?;
        let _guard = lock.lock().await;

        let needs_ledger = {
            let book = self.book()?;
            let escrow = book.escrow(payment_id)?;
            match escrow.state {
                EscrowState::Refunded => return Ok(escrow.clone()),
                EscrowState::Authorized => true,
                EscrowState::Proposed => book.hold_attempted.contains(payment_id),
                state => {
                    return Err(PaymentError::InvalidTransition {
                        payment_id: payment_id.to_string(),
                        state,
                        operation: "refund",
                    })
                }
            }
        };

        if needs_ledger {
            if let Err(err) = self
                .ledger_call(LedgerOp::Cancel, || self.ledger.cancel(payment_id))
                .await
            {
                self.book()?
                    .pending_refunds
                    .insert(payment_id.to_string(), reason.to_string());
                return Err(err);
            }
        }

        let mut book = self.book()?;
        book.pending_refunds.remove(payment_id);
        if let Some(escrow) = book.escrows.get_mut(payment_id) {
            escrow.refund_reason = Some(reason.to_string());
        }
        let escrow = book
            .resolve(payment_id, EscrowState::Refunded)
            .ok_or_else(|| PaymentError::NotFound(payment_id.to_string()))?;
        tracing::info!(
            task_id = %escrow.task_id,
            payment_id = %payment_id,
            amount = escrow.amount,
            reason = %reason,
            "Escrow refunded"
        );
        Ok(escrow)
    }

    /// Retry every refund that previously failed against the ledger.
    /// Returns the number that went through.
    pub async fn retry_pending_refunds(&self) -> usize {
        let pending: Vec<(String, String)> = match self.book() {
            Ok(book) => book
                .pending_refunds
                .iter()
                .map(|(id, reason)| (id.clone(), reason.clone()))
                .collect(),
            Err(_) => return 0,
        };

        let mut settled = 0;
        for (payment_id, reason) in pending {
            match self.refund(&payment_id, &reason).await {
                Ok(_) => settled += 1,
                Err(err) => {
                    tracing::warn!(payment_id = %payment_id, error = %err, "Pending refund still failing");
                }
            }
        }
        settled
    }

    /// Background loop that keeps retrying stuck refunds.
    pub fn spawn_refund_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let settled = coordinator.retry_pending_refunds().await;
                if settled > 0 {
                    tracing::info!(settled, "Pending refunds settled");
                }
            }
        })
    }

    /// Drop every record of a task whose escrows are all terminal with no
    /// refund outstanding. Returns false and keeps the records otherwise.
    pub fn forget_task(&self, task_id: &str) -> bool {
        let Ok(mut book) = self.book() else {
            return false;
        };
        let ids = book.by_task.get(task_id).cloned().unwrap_or_default();
        let settled = ids.iter().all(|id| {
            !book.pending_refunds.contains_key(id)
                && book.escrows.get(id).map_or(true, |e| e.state.is_terminal())
        });
        if !settled {
            return false;
        }
        for id in &ids {
            book.escrows.remove(id);
            book.payment_locks.remove(id);
            book.hold_attempted.remove(id);
        }
        book.by_task.remove(task_id);
        book.budgets.remove(task_id);
        true
    }

    pub fn get(&self, payment_id: &str) -> Option<Escrow> {
        self.book().ok()?.escrows.get(payment_id).cloned()
    }

    /// All escrows of a task, in proposal order.
    pub fn escrows_for_task(&self, task_id: &str) -> Vec<Escrow> {
        let Ok(book) = self.book() else {
            return Vec::new();
        };
        book.by_task
            .get(task_id)
            .into_iter()
            .flatten()
            .filter_map(|id| book.escrows.get(id).cloned())
            .collect()
    }

    pub fn committed_total(&self, task_id: &str) -> Amount {
        self.book()
            .map(|book| book.committed_total(task_id))
            .unwrap_or(0)
    }

    pub fn released_total(&self, task_id: &str) -> Amount {
        self.escrows_for_task(task_id)
            .iter()
            .filter(|e| e.state == EscrowState::Released)
            .map(|e| e.amount)
            .sum()
    }

    pub fn budget_remaining(&self, task_id: &str) -> Amount {
        let Ok(book) = self.book() else {
            return 0;
        };
        let limit = book.budgets.get(task_id).copied().unwrap_or(0);
        limit.saturating_sub(book.committed_total(task_id))
    }

    pub fn open_escrow_for_subtask(&self, subtask_id: &str) -> Option<Escrow> {
        let book = self.book().ok()?;
        let id = book.open_by_subtask.get(subtask_id)?;
        book.escrows.get(id).cloned()
    }

    pub fn has_pending_refund(&self, payment_id: &str) -> bool {
        self.book()
            .map(|book| book.pending_refunds.contains_key(payment_id))
            .unwrap_or(false)
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.book().map(|book| book.payment_locks.len()).unwrap_or(0)
    }

    async fn ledger_call<T, F, Fut>(&self, operation: LedgerOp, call: F) -> Result<T, PaymentError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let timeout = self.call_timeout;
        retry_with_backoff(
            self.backoff,
            operation.as_ref(),
            |_| {
                let fut = call();
                async move {
                    match tokio::time::timeout(timeout, fut).await {
                        Ok(result) => result,
                        Err(_) => Err(LedgerError::Transient(format!(
                            "timed out after {}ms",
                            timeout.as_millis()
                        ))),
                    }
                }
            },
            LedgerError::is_transient,
        )
        .await
        .map_err(|failure| PaymentError::Ledger {
            operation: operation.to_string(),
            attempts: failure.attempts,
            message: failure.error.to_string(),
        })
    }
}
