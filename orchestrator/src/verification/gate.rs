use chrono::Utc;
use shared_types::{VerificationDecision, VerificationMode, VerificationResult};
use std::collections::BTreeMap;
use std::time::Duration;

use super::scorer::{ScorerError, ScoringRequest, SharedQualityScorer};
use crate::config::VerificationConfig;
use crate::retry::{retry_with_backoff, BackoffPolicy};

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationPolicy {
    pub auto_approve_threshold: f64,
    pub enhanced_auto_approve_threshold: f64,
    pub reject_floor: f64,
    /// Dimension checked against `hard_constraint_floor` regardless of the aggregate.
    pub hard_constraint: String,
    pub hard_constraint_floor: f64,
    /// Empty means every dimension weighs the same.
    pub weights: BTreeMap<String, f64>,
    pub review_timeout: Duration,
}

impl From<&VerificationConfig> for VerificationPolicy {
    fn from(config: &VerificationConfig) -> Self {
        Self {
            auto_approve_threshold: config.auto_approve_threshold,
            enhanced_auto_approve_threshold: config.enhanced_auto_approve_threshold,
            reject_floor: config.reject_floor,
            hard_constraint: config.hard_constraint.clone(),
            hard_constraint_floor: config.hard_constraint_floor,
            weights: config.weights.clone(),
            review_timeout: config.review_timeout(),
        }
    }
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self::from(&VerificationConfig::default())
    }
}

/// Identifies the attempt being verified.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationContext {
    pub task_id: String,
    pub subtask_id: String,
    pub description: String,
    pub capability_requirement: String,
    pub agent_id: String,
    pub attempt: u32,
    pub mode: VerificationMode,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum VerificationError {
    #[error("quality scorer unavailable after {attempts} attempt(s): {message}")]
    ScorerUnavailable { attempts: u32, message: String },
    #[error("quality scorer returned invalid scores: {0}")]
    InvalidScores(String),
}

impl VerificationError {
    pub fn retryable(&self) -> bool {
        matches!(self, VerificationError::ScorerUnavailable { .. })
    }
}

/// Weighted mean of the scores that have a weight. With no usable weights it
/// falls back to the plain mean; an empty score map aggregates to 0.
pub fn aggregate_score(scores: &BTreeMap<String, f64>, weights: &BTreeMap<String, f64>) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }

    let (weighted_sum, total_weight) = scores
        .iter()
        .filter_map(|(name, score)| weights.get(name).map(|w| (score * w, *w)))
        .fold((0.0, 0.0), |(sum, total), (ws, w)| (sum + ws, total + w));

    if weights.is_empty() || total_weight <= 0.0 {
        return scores.values().sum::<f64>() / scores.len() as f64;
    }
    weighted_sum / total_weight
}

fn validate_scores(scores: BTreeMap<String, f64>) -> Result<BTreeMap<String, f64>, VerificationError> {
    scores
        .into_iter()
        .map(|(name, score)| {
            if score.is_finite() {
                Ok((name, score.clamp(0.0, 100.0)))
            } else {
                Err(VerificationError::InvalidScores(format!(
                    "dimension '{name}' is not a number"
                )))
            }
        })
        .collect()
}

impl VerificationPolicy {
    pub fn auto_approve_threshold_for(&self, mode: VerificationMode) -> f64 {
        match mode {
            VerificationMode::Standard => self.auto_approve_threshold,
            VerificationMode::Enhanced => self.enhanced_auto_approve_threshold,
        }
    }

    /// Apply the decision policy to already-validated scores.
    pub fn evaluate(
        &self,
        ctx: &VerificationContext,
        dimension_scores: BTreeMap<String, f64>,
    ) -> VerificationResult {
        let aggregate = aggregate_score(&dimension_scores, &self.weights);
        // The hard constraint fails closed: an unscored dimension is a violation.
        let hard_score = dimension_scores.get(&self.hard_constraint).copied();
        let ethics_passed = hard_score.is_some_and(|s| s >= self.hard_constraint_floor);
        let threshold = self.auto_approve_threshold_for(ctx.mode);

        let (decision, rejection_reason) = match hard_score {
            None => (
                VerificationDecision::Reject,
                Some(format!("{} dimension missing from scores", self.hard_constraint)),
            ),
            Some(score) if !ethics_passed => (
                VerificationDecision::Reject,
                Some(format!(
                    "{} score {:.1} is below the floor of {:.1}",
                    self.hard_constraint, score, self.hard_constraint_floor
                )),
            ),
            Some(_) if aggregate >= threshold => (VerificationDecision::AutoApprove, None),
            Some(_) if aggregate >= self.reject_floor => (VerificationDecision::PendingHuman, None),
            Some(_) => (
                VerificationDecision::Reject,
                Some(format!(
                    "aggregate score {:.1} is below the reject floor of {:.1}",
                    aggregate, self.reject_floor
                )),
            ),
        };

        VerificationResult {
            subtask_id: ctx.subtask_id.clone(),
            attempt: ctx.attempt,
            agent_id: ctx.agent_id.clone(),
            dimension_scores,
            aggregate_score: aggregate,
            ethics_passed,
            decision,
            reviewer_decision: None,
            rejection_reason,
            created_at: Utc::now(),
        }
    }
}

/// Scores output and applies [`VerificationPolicy`].
#[derive(Clone)]
pub struct VerificationGate {
    scorer: SharedQualityScorer,
    policy: VerificationPolicy,
    backoff: BackoffPolicy,
    scorer_timeout: Duration,
}

impl VerificationGate {
    pub fn new(
        scorer: SharedQualityScorer,
        policy: VerificationPolicy,
        backoff: BackoffPolicy,
        scorer_timeout: Duration,
    ) -> Self {
        Self {
            scorer,
            policy,
            backoff,
            scorer_timeout,
        }
    }

    pub fn from_config(scorer: SharedQualityScorer, config: &VerificationConfig) -> Self {
        Self::new(
            scorer,
            VerificationPolicy::from(config),
            config.scorer_backoff(),
            config.scorer_timeout(),
        )
    }

    pub fn policy(&self) -> &VerificationPolicy {
        &self.policy
    }

    pub async fn verify(
        &self,
        ctx: &VerificationContext,
        output: &serde_json::Value,
    ) -> Result<VerificationResult, VerificationError> {
        let request = ScoringRequest {
            task_id: ctx.task_id.clone(),
            subtask_id: ctx.subtask_id.clone(),
            description: ctx.description.clone(),
            capability_requirement: ctx.capability_requirement.clone(),
            output: output.clone(),
        };
        let timeout = self.scorer_timeout;

        let scores = retry_with_backoff(
            self.backoff,
            "quality_score",
            |_| {
                let request = &request;
                async move {
                    match tokio::time::timeout(timeout, self.scorer.score(request)).await {
                        Ok(result) => result,
                        Err(_) => Err(ScorerError::Timeout(timeout.as_millis() as u64)),
                    }
                }
            },
            ScorerError::is_transient,
        )
        .await
        .map_err(|failure| match failure.error {
            ScorerError::Invalid(message) => VerificationError::InvalidScores(message),
            other => VerificationError::ScorerUnavailable {
                attempts: failure.attempts,
                message: other.to_string(),
            },
        })?;

        let result = self.policy.evaluate(ctx, validate_scores(scores)?);
        tracing::info!(
            task_id = %ctx.task_id,
            subtask_id = %ctx.subtask_id,
            agent_id = %ctx.agent_id,
            aggregate = result.aggregate_score,
            ethics_passed = result.ethics_passed,
            decision = ?result.decision,
            "Verification evaluated"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::QualityScorer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn ctx(mode: VerificationMode) -> VerificationContext {
        VerificationContext {
            task_id: "task".to_string(),
            subtask_id: "sub".to_string(),
            description: "summarise".to_string(),
            capability_requirement: "research".to_string(),
            agent_id: "agent-a".to_string(),
            attempt: 1,
            mode,
        }
    }

    fn scores(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn uniform(value: f64, ethics: f64) -> BTreeMap<String, f64> {
        scores(&[
            ("completeness", value),
            ("correctness", value),
            ("academic_rigor", value),
            ("clarity", value),
            ("innovation", value),
            ("ethics", ethics),
        ])
    }

    #[test]
    fn test_default_weights_aggregate() {
        let policy = VerificationPolicy::default();
        let all = scores(&[
            ("completeness", 80.0),
            ("correctness", 80.0),
            ("academic_rigor", 80.0),
            ("clarity", 80.0),
            ("innovation", 80.0),
            ("ethics", 100.0),
        ]);
        let agg = aggregate_score(&all, &policy.weights);
        assert!((agg - 82.0).abs() < 1e-9, "got {agg}");
    }

    #[test]
    fn test_aggregate_fallbacks() {
        let s = scores(&[("a", 60.0), ("b", 80.0)]);
        assert_eq!(aggregate_score(&s, &BTreeMap::new()), 70.0);
        assert_eq!(aggregate_score(&s, &scores(&[("z", 1.0)])), 70.0);
        assert_eq!(aggregate_score(&s, &scores(&[("a", 0.0), ("b", 0.0)])), 70.0);
        assert_eq!(aggregate_score(&s, &scores(&[("b", 1.0)])), 80.0);
        assert_eq!(aggregate_score(&BTreeMap::new(), &BTreeMap::new()), 0.0);
    }

    #[test]
    fn test_ethics_floor_rejects_regardless_of_aggregate() {
        let policy = VerificationPolicy::default();
        let result = policy.evaluate(&ctx(VerificationMode::Standard), uniform(100.0, 40.0));
        assert!(!result.ethics_passed);
        assert_eq!(result.decision, VerificationDecision::Reject);
        assert!(result.rejection_reason.unwrap().contains("ethics"));
    }

    #[test]
    fn test_threshold_bands() {
        let policy = VerificationPolicy::default();
        let standard = ctx(VerificationMode::Standard);
        let mut flat = VerificationPolicy::default();
        flat.weights = scores(&[("quality", 1.0)]);

        let decide = |value: f64| {
            flat.evaluate(&standard, scores(&[("quality", value), ("ethics", 100.0)]))
                .decision
        };
        assert_eq!(decide(85.0), VerificationDecision::AutoApprove);
        assert_eq!(decide(75.0), VerificationDecision::AutoApprove);
        assert_eq!(decide(60.0), VerificationDecision::PendingHuman);
        assert_eq!(decide(50.0), VerificationDecision::PendingHuman);
        assert_eq!(decide(40.0), VerificationDecision::Reject);

        let low = policy.evaluate(&standard, uniform(30.0, 100.0));
        assert!(low.rejection_reason.unwrap().contains("reject floor"));
    }

    #[test]
    fn test_enhanced_mode_raises_auto_approve_bar() {
        let mut policy = VerificationPolicy::default();
        policy.weights = scores(&[("quality", 1.0)]);
        let s = scores(&[("quality", 85.0), ("ethics", 100.0)]);
        assert_eq!(
            policy.evaluate(&ctx(VerificationMode::Enhanced), s.clone()).decision,
            VerificationDecision::PendingHuman
        );
        assert_eq!(
            policy.evaluate(&ctx(VerificationMode::Standard), s).decision,
            VerificationDecision::AutoApprove
        );
    }

    #[test]
    fn test_missing_hard_constraint_dimension_rejects() {
        let policy = VerificationPolicy::default();
        let result = policy.evaluate(
            &ctx(VerificationMode::Standard),
            scores(&[("completeness", 95.0), ("correctness", 95.0)]),
        );
        assert!(result.aggregate_score >= policy.auto_approve_threshold);
        assert!(!result.ethics_passed);
        assert_eq!(result.decision, VerificationDecision::Reject);
        assert_eq!(
            result.rejection_reason.as_deref(),
            Some("ethics dimension missing from scores")
        );
    }

    struct FlakyScorer {
        failures: u32,
        calls: AtomicU32,
        scores: BTreeMap<String, f64>,
    }

    #[async_trait]
    impl QualityScorer for FlakyScorer {
        async fn score(&self, _request: &ScoringRequest) -> Result<BTreeMap<String, f64>, ScorerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(ScorerError::Unavailable("503".to_string()))
            } else {
                Ok(self.scores.clone())
            }
        }
    }

    fn gate(failures: u32, s: BTreeMap<String, f64>) -> (VerificationGate, Arc<FlakyScorer>) {
        let scorer = Arc::new(FlakyScorer {
            failures,
            calls: AtomicU32::new(0),
            scores: s,
        });
        let gate = VerificationGate::new(
            scorer.clone(),
            VerificationPolicy::default(),
            BackoffPolicy::new(3, 10, 100),
            Duration::from_secs(1),
        );
        (gate, scorer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_scorer_outage_is_retried_then_reported() {
        let (ok_gate, scorer) = gate(2, uniform(90.0, 100.0));
        let result = ok_gate
            .verify(&ctx(VerificationMode::Standard), &serde_json::json!("out"))
            .await
            .unwrap();
        assert_eq!(result.decision, VerificationDecision::AutoApprove);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 3);

        let (down_gate, _) = gate(10, uniform(90.0, 100.0));
        let err = down_gate
            .verify(&ctx(VerificationMode::Standard), &serde_json::json!("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::ScorerUnavailable { attempts: 3, .. }));
        assert!(err.retryable());
    }

    #[tokio::test]
    async fn test_out_of_range_scores_are_clamped() {
        let (g, _) = gate(0, scores(&[("quality", 140.0), ("ethics", 100.0)]));
        let result = g
            .verify(&ctx(VerificationMode::Standard), &serde_json::json!("out"))
            .await
            .unwrap();
        assert_eq!(result.dimension_scores["quality"], 100.0);
    }
}
