//! TaskActor - one actor per submitted task
//!
//! Drives a task through planning, then for each subtask in order: ranking,
//! escrow, invocation, verification and settlement.
//!
//! ## State Machine
//!
//! ```text
//! Planning → Negotiating → Paying → Executing → Verifying → Complete
//!               ↑   ↑         |         |          |  ↑
//!               |   └─────────┴─────────┘          |  └── PendingHuman
//!               └──── next subtask / fallback ─────┘
//!
//! any non-terminal state → Failed | Cancelled
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let handle = spawn_task(task_id, request, services).await?;
//! let mut snapshots = handle.snapshot.clone();
//! snapshots.wait_for(|s| s.status.is_terminal()).await?;
//! ```

pub mod actor;
pub mod events;
pub mod protocol;
mod runtime;
pub mod state;

#[cfg(test)]
mod tests;

pub use actor::{spawn_task, TaskActor, TaskHandle, TaskServices, TaskSettings};
pub use protocol::{Phase, TaskMsg};
pub use state::can_transition;
