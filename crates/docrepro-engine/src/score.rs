//! Outcome classification and scoring.
//!
//! Maps a snippet's [`SafetyVerdict`] and, for executed snippets, its
//! [`ExecutionOutcome`] to one of three tiers.  Runtime failures are
//! classified by an ordered, configurable pattern table matched against the
//! captured error text; anything the table does not recognise lands in the
//! strictest tier.

use docrepro_sandbox::{ExecutionOutcome, ExecutionStatus};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::safety::SafetyVerdict;
use crate::snippet::SnippetPosition;

/// Reason recorded for snippets the orchestrator never got to.
pub const BUDGET_EXCEEDED: &str = "budget exceeded";

/// First line of every Python traceback.
const TRACEBACK_HEADER: &str = "Traceback (most recent call last):";

/// Shape of the line that names a raised exception.  Source lines echoed in
/// a traceback are indented and never match.
const EXCEPTION_LINE: &str = r"^[\w.]+(Error|Exception|Warning)\b";

// ---------------------------------------------------------------------------
// Tiers and scores
// ---------------------------------------------------------------------------

/// The three score tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreTier {
    /// 0.0: irrecoverable, unsafe, or unbounded.
    Zero,
    /// 0.5: a minor, fixable defect such as a missing import.
    Partial,
    /// 1.0: ran cleanly.
    Full,
}

impl ScoreTier {
    pub fn value(self) -> f64 {
        match self {
            Self::Zero => 0.0,
            Self::Partial => 0.5,
            Self::Full => 1.0,
        }
    }
}

impl std::fmt::Display for ScoreTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}", self.value())
    }
}

/// The score assigned to one snippet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReproducibilityScore {
    pub position: SnippetPosition,
    pub tier: ScoreTier,
    /// Short human-readable explanation.
    pub reason: String,
}

impl ReproducibilityScore {
    pub fn new(position: SnippetPosition, tier: ScoreTier, reason: impl Into<String>) -> Self {
        Self {
            position,
            tier,
            reason: reason.into(),
        }
    }

    /// Numeric score.
    pub fn value(&self) -> f64 {
        self.tier.value()
    }
}

// ---------------------------------------------------------------------------
// Classification table
// ---------------------------------------------------------------------------

/// One row of the classification table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRule {
    /// Regex matched against the error text.
    pub pattern: String,
    /// Tier assigned on match.
    pub tier: ScoreTier,
    /// Short label used in the score's reason.
    pub label: String,
}

impl ClassificationRule {
    pub fn new(pattern: impl Into<String>, tier: ScoreTier, label: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            tier,
            label: label.into(),
        }
    }
}

/// The default table for CPython tracebacks.
pub fn default_rules() -> Vec<ClassificationRule> {
    vec![
        ClassificationRule::new(
            r"^(SyntaxError|IndentationError|TabError)\b",
            ScoreTier::Zero,
            "syntax error",
        ),
        ClassificationRule::new(r"^ModuleNotFoundError\b", ScoreTier::Partial, "missing module"),
        ClassificationRule::new(
            r"^ImportError: (No module named|cannot import name)",
            ScoreTier::Partial,
            "missing import",
        ),
        ClassificationRule::new(
            r"^(NameError|UnboundLocalError): .*\bis not defined",
            ScoreTier::Partial,
            "undefined name",
        ),
        ClassificationRule::new(r"^FileNotFoundError\b", ScoreTier::Partial, "missing file"),
        ClassificationRule::new(
            r"^[\w.]+Error: \[Errno 2\] No such file or directory",
            ScoreTier::Partial,
            "missing file",
        ),
    ]
}

/// A compiled classification table.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<(Regex, ClassificationRule)>,
    exception_line: Regex,
}

impl Classifier {
    /// Compile `rules`, preserving their order.
    pub fn new(rules: &[ClassificationRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                let regex = Regex::new(&rule.pattern).map_err(|e| EngineError::InvalidPattern {
                    pattern: rule.pattern.clone(),
                    reason: e.to_string(),
                })?;
                Ok((regex, rule.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        let exception_line = Regex::new(EXCEPTION_LINE).map_err(|e| EngineError::InvalidPattern {
            pattern: EXCEPTION_LINE.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            rules,
            exception_line,
        })
    }

    /// Find the first rule matching `last_line`.  Failing that, try the
    /// other exception lines in `full_text` from the bottom up, which
    /// reaches the heads of chained tracebacks but never echoed source.
    pub fn classify(&self, last_line: &str, full_text: &str) -> Option<&ClassificationRule> {
        self.first_match(last_line).or_else(|| {
            full_text
                .lines()
                .rev()
                .filter(|line| self.exception_line.is_match(line))
                .find_map(|line| self.first_match(line))
        })
    }

    fn first_match(&self, text: &str) -> Option<&ClassificationRule> {
        if text.is_empty() {
            return None;
        }
        self.rules
            .iter()
            .find(|(regex, _)| regex.is_match(text))
            .map(|(_, rule)| rule)
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// Deterministic mapping from verdict and outcome to a score.
#[derive(Debug, Clone)]
pub struct Scorer {
    classifier: Classifier,
}

impl Scorer {
    pub fn new(rules: &[ClassificationRule]) -> Result<Self> {
        Ok(Self {
            classifier: Classifier::new(rules)?,
        })
    }

    /// Score one snippet.  `outcome` is `None` for snippets that were not
    /// executed.
    pub fn score(
        &self,
        position: SnippetPosition,
        verdict: &SafetyVerdict,
        outcome: Option<&ExecutionOutcome>,
    ) -> ReproducibilityScore {
        if let SafetyVerdict::Rejected(rejection) = verdict {
            return ReproducibilityScore::new(
                position,
                ScoreTier::Zero,
                format!("rejected: {rejection}"),
            );
        }
        let Some(outcome) = outcome else {
            return ReproducibilityScore::new(position, ScoreTier::Zero, "not executed");
        };

        let stderr = &outcome.stderr.text;
        match &outcome.status {
            ExecutionStatus::Success if !stderr.contains(TRACEBACK_HEADER) => {
                ReproducibilityScore::new(position, ScoreTier::Full, "ran successfully")
            }
            ExecutionStatus::Success | ExecutionStatus::NonZeroExit(_) => {
                self.classify_failure(position, outcome)
            }
            ExecutionStatus::TimedOut => ReproducibilityScore::new(
                position,
                ScoreTier::Zero,
                format!("timed out after {} ms", outcome.elapsed.as_millis()),
            ),
            ExecutionStatus::Signaled(_) => ReproducibilityScore::new(
                position,
                ScoreTier::Zero,
                format!("crashed: {}", outcome.status),
            ),
            ExecutionStatus::Fault(_) => {
                ReproducibilityScore::new(position, ScoreTier::Zero, outcome.status.to_string())
            }
        }
    }

    /// Score for a snippet the orchestrator had no budget left for.
    pub fn budget_exceeded(&self, position: SnippetPosition) -> ReproducibilityScore {
        ReproducibilityScore::new(position, ScoreTier::Zero, BUDGET_EXCEEDED)
    }

    fn classify_failure(
        &self,
        position: SnippetPosition,
        outcome: &ExecutionOutcome,
    ) -> ReproducibilityScore {
        let last_line = outcome.stderr.last_line().unwrap_or("");
        if let Some(rule) = self.classifier.classify(last_line, &outcome.stderr.text) {
            return ReproducibilityScore::new(
                position,
                rule.tier,
                format!("{}: {}", rule.label, last_line),
            );
        }
        let reason = if last_line.is_empty() {
            format!("runtime error ({})", outcome.status)
        } else {
            format!("runtime error: {last_line}")
        };
        ReproducibilityScore::new(position, ScoreTier::Zero, reason)
    }
}
