//! Verification Gate
//!
//! Scores a subtask's output through the external [`QualityScorer`], then
//! applies the threshold policy:
//!
//! ```text
//! hard constraint below floor        → REJECT
//! aggregate ≥ auto-approve threshold → AUTO_APPROVE
//! aggregate ≥ reject floor           → PENDING_HUMAN (reviewer or timeout → REJECT)
//! otherwise                          → REJECT
//! ```

mod gate;
mod review;
mod scorer;

pub use gate::{aggregate_score, VerificationContext, VerificationError, VerificationGate, VerificationPolicy};
pub use review::{PendingReview, ReviewResolution, StaleDecision};
pub use scorer::{HttpQualityScorer, QualityScorer, ScorerError, ScoringRequest, SharedQualityScorer};
