//! Escrowed task orchestrator
//!
//! Accepts a task description with a budget, decomposes it into subtasks and
//! for each one selects an agent, escrows its price, invokes it, scores the
//! output and either releases or refunds the escrow. Every task runs in its
//! own actor and reports progress through an append-only event log.

pub mod actors;
pub mod api;
pub mod app_state;
pub mod config;
pub mod directory;
pub mod error;
pub mod invoker;
pub mod payments;
pub mod planning;
pub mod ranking;
pub mod retry;
pub mod verification;
