//! Pass pipeline orchestrator
//!
//! Runs an ordered list of configured passes over the leaf set. The anchors
//! are snapshotted into an [`AnchorIndex`] at entry, so a simulation stepping
//! concurrently never leaks into a running pipeline. Faults are contained per
//! pass: the pre-pass snapshot is kept and the pipeline continues.

use serde::Serialize;
use thiserror::Error;

use crate::anchor_index::AnchorIndex;
use crate::model::{Anchor, Leaf, Vec3};
use crate::passes::{PassConfig, PassContext, PassRegistry};

/// Errors that end a pipeline run early
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A newer run superseded this one
    #[error("pipeline cancelled after {completed} of {total} passes")]
    Cancelled { completed: usize, total: usize },
}

/// Checked between passes; a run stops as soon as this returns true
pub trait Cancellation: Sync {
    fn is_cancelled(&self) -> bool;
}

/// A cancellation that never fires
pub struct NeverCancelled;

impl Cancellation for NeverCancelled {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// What happened to one configured pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PassStatus {
    Applied,
    Disabled,
    /// Unknown pass name
    Skipped,
    /// The pass errored; its input was kept
    Failed,
}

/// Progress notification sent after each pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Zero-based index of the pass that just finished
    pub pass_index: usize,
    pub pass_count: usize,
    pub pass_name: String,
    pub status: PassStatus,
}

impl Progress {
    /// Fraction of the pipeline done, in (0, 1]
    pub fn fraction(&self) -> f32 {
        (self.pass_index + 1) as f32 / self.pass_count.max(1) as f32
    }
}

/// Summary of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    /// Passes that ran, in order
    pub applied: Vec<String>,
    pub disabled: Vec<String>,
    /// Unknown pass names
    pub skipped: Vec<String>,
    /// Passes whose output was discarded
    pub failed: Vec<String>,
    /// Leaves whose anchor reference does not resolve
    pub unresolved: usize,
    /// Leaf positions reverted because a pass produced NaN/Infinity
    pub sanitized: usize,
    /// Duplicate anchor identifiers overwritten in the index
    pub duplicate_anchors: usize,
}

/// Pipeline result: the new leaves plus the run report
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub leaves: Vec<Leaf>,
    pub report: PipelineReport,
}

/// Stateless orchestrator; safe to call repeatedly with different configurations
pub struct Pipeline {
    registry: PassRegistry,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Pipeline over all built-in passes
    pub fn new() -> Self {
        Self::with_registry(PassRegistry::with_defaults())
    }

    pub fn with_registry(registry: PassRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PassRegistry {
        &self.registry
    }

    /// Run all passes to completion
    pub fn run(&self, leaves: &[Leaf], anchors: &[Anchor], passes: &[PassConfig]) -> PipelineOutput {
        match self.run_with(leaves, anchors, passes, &mut |_| {}, &NeverCancelled) {
            Ok(output) => output,
            // Unreachable with NeverCancelled; keep the input as the best-effort result
            Err(_) => PipelineOutput {
                leaves: leaves.to_vec(),
                report: PipelineReport::default(),
            },
        }
    }

    /// Run with a progress callback and cancellation checked between passes
    pub fn run_with(
        &self,
        leaves: &[Leaf],
        anchors: &[Anchor],
        passes: &[PassConfig],
        progress: &mut dyn FnMut(Progress),
        cancel: &dyn Cancellation,
    ) -> Result<PipelineOutput, PipelineError> {
        let _span = tracing::info_span!("pipeline", leaves = leaves.len(), passes = passes.len()).entered();

        let index = AnchorIndex::build(anchors);
        let ctx = PassContext::new(&index);
        let mut report = PipelineReport {
            unresolved: leaves
                .iter()
                .filter(|l| index.resolve(&l.anchor_ref).is_none())
                .count(),
            duplicate_anchors: index.duplicates(),
            ..PipelineReport::default()
        };

        let mut current = leaves.to_vec();

        for (i, config) in passes.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(completed = i, "pipeline cancelled");
                return Err(PipelineError::Cancelled {
                    completed: i,
                    total: passes.len(),
                });
            }

            let status = if !config.enabled {
                report.disabled.push(config.name.clone());
                PassStatus::Disabled
            } else {
                match self.registry.create(&config.name, &config.parameters) {
                    None => {
                        tracing::warn!(pass = %config.name, "unknown pass, skipped");
                        report.skipped.push(config.name.clone());
                        PassStatus::Skipped
                    }
                    Some(Err(err)) => {
                        tracing::warn!(pass = %config.name, %err, "invalid pass configuration, input kept");
                        report.failed.push(config.name.clone());
                        PassStatus::Failed
                    }
                    Some(Ok(pass)) => match pass.apply(&current, &ctx) {
                        Ok(mut next) if next.len() == current.len() => {
                            let reverted = revert_non_finite(&current, &mut next);
                            if reverted > 0 {
                                tracing::warn!(pass = pass.name(), reverted, "reverted non-finite leaf positions");
                            }
                            report.sanitized += reverted;
                            report.applied.push(config.name.clone());
                            current = next;
                            tracing::debug!(pass = pass.name(), "pass applied");
                            PassStatus::Applied
                        }
                        Ok(next) => {
                            tracing::warn!(
                                pass = pass.name(),
                                expected = current.len(),
                                got = next.len(),
                                "pass changed the leaf count, input kept"
                            );
                            report.failed.push(config.name.clone());
                            PassStatus::Failed
                        }
                        Err(err) => {
                            tracing::warn!(pass = pass.name(), %err, "pass failed, input kept");
                            report.failed.push(config.name.clone());
                            PassStatus::Failed
                        }
                    },
                }
            };

            progress(Progress {
                pass_index: i,
                pass_count: passes.len(),
                pass_name: config.name.clone(),
                status,
            });
        }

        tracing::info!(
            applied = report.applied.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            unresolved = report.unresolved,
            "pipeline finished"
        );

        Ok(PipelineOutput {
            leaves: current,
            report,
        })
    }
}

/// Restore pre-pass values for leaves whose position or color went non-finite
fn revert_non_finite(before: &[Leaf], after: &mut [Leaf]) -> usize {
    let mut reverted = 0;
    for (old, new) in before.iter().zip(after.iter_mut()) {
        let mut touched = false;
        if !new.position.is_finite() {
            new.position = if old.position.is_finite() { old.position } else { Vec3::ZERO };
            touched = true;
        }
        if new.color.iter().any(|c| !c.is_finite()) {
            new.color = old.color;
            touched = true;
        }
        if touched {
            reverted += 1;
        }
    }
    reverted
}
