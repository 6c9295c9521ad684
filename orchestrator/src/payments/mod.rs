//! Escrowed payments
//!
//! [`EscrowLedger`] is the settlement collaborator (hold/settle/cancel keyed
//! by an idempotency key). [`PaymentCoordinator`] owns every [`Escrow`]
//! record, enforces the per-task budget and drives the ledger with bounded
//! retries.
//!
//! [`Escrow`]: shared_types::Escrow

mod coordinator;
mod http;
mod ledger;

pub use coordinator::{PaymentCoordinator, PaymentError};
pub use http::HttpEscrowLedger;
pub use ledger::{EscrowLedger, InMemoryLedger, LedgerEffects, LedgerError, LedgerOp, SharedEscrowLedger};
