//! Scoring pipeline for one documentation body.
//!
//! The [`Orchestrator`] pulls snippets from the extractor and routes each
//! one through analysis, execution, and scoring:
//!
//! ```text
//!   extract ──► budget ──► analyze ──► (rejected) ────────────► score
//!                 │                 └► worker pool ─► sandbox ─► score
//!                 └► (exhausted) ──────────────────────────────► score
//! ```
//!
//! Analysis runs inline on the dispatch loop.  Execution runs on a
//! [`JoinSet`] gated by a shared [`Semaphore`], so at most `workers`
//! sandboxes are alive at once across every document this orchestrator
//! scores.  Results are written into per-snippet slots, which restores
//! document order regardless of completion order.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use docrepro_sandbox::{SandboxEngine, SnippetExecutor};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::budget::{Admission, Budget};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::extract::extract;
use crate::report::{Aggregate, ArtifactReport, TierCounts};
use crate::safety::{SafetyAnalyzer, SafetyVerdict};
use crate::score::{ReproducibilityScore, ScoreTier, Scorer};
use crate::snippet::{Language, SnippetPosition};

/// Reason recorded when a sandbox task dies without producing an outcome.
const TASK_FAILED: &str = "sandbox task failed";

/// Drives extraction, analysis, execution, and scoring.
pub struct Orchestrator {
    config: Arc<EngineConfig>,
    analyzer: SafetyAnalyzer,
    scorer: Arc<Scorer>,
    executor: Arc<dyn SnippetExecutor>,
    pool: Arc<Semaphore>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("available_workers", &self.pool.available_permits())
            .finish_non_exhaustive()
    }
}

/// One snippet's place in the result list.
struct Slot {
    position: SnippetPosition,
    score: Option<ReproducibilityScore>,
}

#[derive(Default)]
struct PassCounters {
    rejected: usize,
    executed: usize,
    budget_exceeded: usize,
    skipped: usize,
}

impl Orchestrator {
    /// Build an orchestrator that runs snippets in [`SandboxEngine`]
    /// sandboxes.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let engine = SandboxEngine::new(config.sandbox.clone());
        Self::with_executor(config, Arc::new(engine))
    }

    /// Build an orchestrator around any [`SnippetExecutor`].
    pub fn with_executor(config: EngineConfig, executor: Arc<dyn SnippetExecutor>) -> Result<Self> {
        config.validate()?;
        let analyzer = SafetyAnalyzer::new(config.safety.clone())?;
        let scorer = Scorer::new(&config.classification)?;
        let pool = Arc::new(Semaphore::new(config.workers));
        info!(
            workers = config.workers,
            max_snippets = config.max_snippets,
            max_total_ms = config.max_total_ms,
            "orchestrator initialized"
        );
        Ok(Self {
            config: Arc::new(config),
            analyzer,
            scorer: Arc::new(scorer),
            executor,
            pool,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Score every supported snippet in `text`.
    ///
    /// Never fails: every snippet that is not skipped for its language ends
    /// up with exactly one score.
    pub async fn score_document(&self, text: &str) -> ArtifactReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let budget = Budget::new(self.config.max_snippets, self.config.total_budget());

        let mut slots: Vec<Slot> = Vec::new();
        let mut counters = PassCounters::default();
        let mut tasks: JoinSet<(usize, ReproducibilityScore)> = JoinSet::new();

        for snippet in extract(text, &self.config.languages) {
            match &snippet.language {
                Language::Python | Language::PythonConsole => {}
                Language::Other(_) | Language::Unknown => {
                    debug!(snippet = %snippet.position, language = %snippet.language, "skipping snippet");
                    counters.skipped += 1;
                    continue;
                }
            }

            let slot = slots.len();
            let position = snippet.position;
            slots.push(Slot {
                position,
                score: None,
            });

            if budget.admit().await != Admission::Admitted {
                slots[slot].score = Some(self.scorer.budget_exceeded(position));
                counters.budget_exceeded += 1;
                continue;
            }

            let verdict = self.analyzer.analyze(&snippet);
            if !verdict.is_allowed() {
                slots[slot].score = Some(self.scorer.score(position, &verdict, None));
                counters.rejected += 1;
                continue;
            }

            // Waiting for a worker is itself bounded by the aggregate budget.
            let acquire = Arc::clone(&self.pool).acquire_owned();
            let permit = match tokio::time::timeout_at(budget.deadline(), acquire).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) | Err(_) => {
                    warn!(snippet = %position, "no worker available before the budget ran out");
                    slots[slot].score = Some(self.scorer.budget_exceeded(position));
                    counters.budget_exceeded += 1;
                    continue;
                }
            };

            counters.executed += 1;
            let executor = Arc::clone(&self.executor);
            let scorer = Arc::clone(&self.scorer);
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = executor.execute(&snippet.source).await;
                debug!(snippet = %snippet.position, status = %outcome.status, "snippet executed");
                let score = scorer.score(snippet.position, &SafetyVerdict::Allowed, Some(&outcome));
                (slot, score)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, score)) => slots[slot].score = Some(score),
                Err(e) => warn!(error = %e, "sandbox task did not complete"),
            }
        }

        let snippets: Vec<ReproducibilityScore> = slots
            .into_iter()
            .map(|slot| {
                slot.score.unwrap_or_else(|| {
                    ReproducibilityScore::new(slot.position, ScoreTier::Zero, TASK_FAILED)
                })
            })
            .collect();

        let report = ArtifactReport {
            aggregate: Aggregate::from_scores(&snippets),
            counts: TierCounts::from_scores(&snippets),
            snippets,
            rejected: counters.rejected,
            executed: counters.executed,
            budget_exceeded: counters.budget_exceeded,
            skipped: counters.skipped,
            elapsed_ms: clock.elapsed().as_millis() as u64,
            started_at,
        };

        info!(
            aggregate = %report.aggregate,
            snippets = report.snippets.len(),
            executed = report.executed,
            rejected = report.rejected,
            budget_exceeded = report.budget_exceeded,
            elapsed_ms = report.elapsed_ms,
            "document scored"
        );
        report
    }
}
