//! Artifact-level results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::score::{ReproducibilityScore, ScoreTier};

/// The artifact-level reproducibility value.
///
/// `NoSnippets` is deliberately distinct from `Mean(0.0)`: a document
/// without runnable examples has nothing to score, which is not the same as
/// every example failing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Aggregate {
    NoSnippets,
    /// Arithmetic mean of the per-snippet scores, in `[0.0, 1.0]`.
    Mean(f64),
}

impl Aggregate {
    /// Mean of `scores`, or `NoSnippets` when there are none.
    pub fn from_scores(scores: &[ReproducibilityScore]) -> Self {
        if scores.is_empty() {
            return Self::NoSnippets;
        }
        let total: f64 = scores.iter().map(ReproducibilityScore::value).sum();
        Self::Mean(total / scores.len() as f64)
    }

    /// The numeric value, if any snippets were scored.
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::NoSnippets => None,
            Self::Mean(mean) => Some(*mean),
        }
    }
}

impl std::fmt::Display for Aggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSnippets => write!(f, "no snippets found"),
            Self::Mean(mean) => write!(f, "{mean:.3}"),
        }
    }
}

/// How many snippets landed in each tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub full: usize,
    pub partial: usize,
    pub zero: usize,
}

impl TierCounts {
    pub fn from_scores(scores: &[ReproducibilityScore]) -> Self {
        scores.iter().fold(Self::default(), |mut counts, score| {
            match score.tier {
                ScoreTier::Full => counts.full += 1,
                ScoreTier::Partial => counts.partial += 1,
                ScoreTier::Zero => counts.zero += 1,
            }
            counts
        })
    }
}

/// Everything one scoring pass produced for one documentation body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactReport {
    pub aggregate: Aggregate,
    /// Per-snippet scores in document order.
    pub snippets: Vec<ReproducibilityScore>,
    pub counts: TierCounts,
    /// Snippets refused by static analysis.
    pub rejected: usize,
    /// Snippets handed to the sandbox.
    pub executed: usize,
    /// Snippets scored as budget exceeded.
    pub budget_exceeded: usize,
    /// Fenced blocks skipped because their language is never executed.
    /// They do not contribute to the aggregate.
    pub skipped: usize,
    pub elapsed_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl ArtifactReport {
    /// Pretty-printed JSON for the surrounding report component.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Shorthand for [`Aggregate::value`].
    pub fn score(&self) -> Option<f64> {
        self.aggregate.value()
    }
}
