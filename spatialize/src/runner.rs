//! Off-thread pipeline execution
//!
//! A [`PipelineRunner`] hands out monotonically increasing [`RunTicket`]s.
//! Beginning a new run supersedes every older one: superseded runs stop at
//! the next pass boundary and their result is never published. Finished
//! layouts are published to a [`LayoutStore`] as `Arc<[Leaf]>`, so readers
//! either see the previous complete layout or the new one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

use crate::model::{Anchor, Leaf};
use crate::passes::PassConfig;
use crate::pipeline::{Cancellation, Pipeline, PipelineError, PipelineReport, Progress};

/// Identifies one run; cancelled as soon as a newer run begins
#[derive(Debug, Clone)]
pub struct RunTicket {
    generation: u64,
    latest: Arc<AtomicU64>,
}

impl RunTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a newer run has begun
    pub fn is_superseded(&self) -> bool {
        self.latest.load(Ordering::Acquire) != self.generation
    }
}

impl Cancellation for RunTicket {
    fn is_cancelled(&self) -> bool {
        self.is_superseded()
    }
}

/// Manually triggered cancellation
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl Cancellation for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct Published {
    leaves: Arc<[Leaf]>,
    generation: u64,
    report: Option<PipelineReport>,
}

/// Copy-on-write holder of the latest complete layout
pub struct LayoutStore {
    inner: RwLock<Published>,
}

impl Default for LayoutStore {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl LayoutStore {
    pub fn new(initial: Vec<Leaf>) -> Self {
        Self {
            inner: RwLock::new(Published {
                leaves: initial.into(),
                generation: 0,
                report: None,
            }),
        }
    }

    /// The current layout; cloning the `Arc` never copies leaves
    pub fn current(&self) -> Arc<[Leaf]> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard.leaves)
    }

    /// Generation of the current layout (0 = initial)
    pub fn generation(&self) -> u64 {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).generation
    }

    /// Report of the run that produced the current layout
    pub fn report(&self) -> Option<PipelineReport> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).report.clone()
    }

    /// Publish a finished layout.
    ///
    /// Rejected when the ticket has been superseded or an equal or newer
    /// generation is already published.
    pub fn publish(&self, ticket: &RunTicket, leaves: Vec<Leaf>, report: PipelineReport) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if ticket.is_superseded() || ticket.generation <= guard.generation {
            return false;
        }
        *guard = Published {
            leaves: leaves.into(),
            generation: ticket.generation,
            report: Some(report),
        };
        true
    }
}

/// Notifications streamed by a spawned run
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Progress(Progress),
    /// The layout was published
    Published(PipelineReport),
    /// A newer run began before this one could publish
    Superseded { completed: usize },
}

/// Handle of a run started with [`PipelineRunner::spawn`]
pub struct RunHandle {
    pub generation: u64,
    pub events: Receiver<RunEvent>,
    join: JoinHandle<()>,
}

impl RunHandle {
    /// Wait for the worker thread to finish
    pub fn join(self) {
        if self.join.join().is_err() {
            tracing::error!(generation = self.generation, "pipeline worker panicked");
        }
    }
}

/// Runs the pipeline with supersession and publishes to a shared store
pub struct PipelineRunner {
    pipeline: Arc<Pipeline>,
    latest: Arc<AtomicU64>,
    store: Arc<LayoutStore>,
}

impl PipelineRunner {
    pub fn new(pipeline: Pipeline, store: Arc<LayoutStore>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            latest: Arc::new(AtomicU64::new(0)),
            store,
        }
    }

    pub fn store(&self) -> &Arc<LayoutStore> {
        &self.store
    }

    /// Start a new generation, superseding all earlier tickets
    pub fn begin(&self) -> RunTicket {
        let generation = self.latest.fetch_add(1, Ordering::AcqRel) + 1;
        RunTicket {
            generation,
            latest: Arc::clone(&self.latest),
        }
    }

    /// Run on the calling thread and publish unless superseded
    pub fn run(
        &self,
        ticket: &RunTicket,
        leaves: &[Leaf],
        anchors: &[Anchor],
        passes: &[PassConfig],
        progress: &mut dyn FnMut(Progress),
    ) -> Result<PipelineReport, PipelineError> {
        execute(&self.pipeline, &self.store, ticket, leaves, anchors, passes, progress)
    }

    /// Run on a worker thread, streaming [`RunEvent`]s
    pub fn spawn(&self, leaves: Vec<Leaf>, anchors: Vec<Anchor>, passes: Vec<PassConfig>) -> RunHandle {
        let ticket = self.begin();
        let generation = ticket.generation;
        let pipeline = Arc::clone(&self.pipeline);
        let store = Arc::clone(&self.store);
        let (tx, rx) = mpsc::channel();

        let join = std::thread::spawn(move || {
            let mut forward = |p: Progress| {
                // The receiver may be gone; the run still completes
                let _ = tx.send(RunEvent::Progress(p));
            };
            let event = match execute(&pipeline, &store, &ticket, &leaves, &anchors, &passes, &mut forward) {
                Ok(report) => RunEvent::Published(report),
                Err(PipelineError::Cancelled { completed, .. }) => RunEvent::Superseded { completed },
            };
            let _ = tx.send(event);
        });

        RunHandle {
            generation,
            events: rx,
            join,
        }
    }
}

fn execute(
    pipeline: &Pipeline,
    store: &LayoutStore,
    ticket: &RunTicket,
    leaves: &[Leaf],
    anchors: &[Anchor],
    passes: &[PassConfig],
    progress: &mut dyn FnMut(Progress),
) -> Result<PipelineReport, PipelineError> {
    let output = pipeline.run_with(leaves, anchors, passes, progress, ticket)?;
    if store.publish(ticket, output.leaves, output.report.clone()) {
        tracing::debug!(generation = ticket.generation, "layout published");
        Ok(output.report)
    } else {
        tracing::debug!(generation = ticket.generation, "superseded before publishing");
        Err(PipelineError::Cancelled {
            completed: passes.len(),
            total: passes.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Vec3;

    fn inputs() -> (Vec<Leaf>, Vec<Anchor>, Vec<PassConfig>) {
        let anchors = vec![Anchor::new("A", Vec3::new(50.0, 0.0, 0.0))];
        let leaves = (0..100).map(|i| Leaf::new(format!("p{i}"), "A")).collect();
        let passes = vec![PassConfig::new("dispersion"), PassConfig::new("flowField")];
        (leaves, anchors, passes)
    }

    fn runner() -> PipelineRunner {
        PipelineRunner::new(Pipeline::new(), Arc::new(LayoutStore::default()))
    }

    #[test]
    fn tickets_are_monotonic_and_supersede() {
        let runner = runner();
        let first = runner.begin();
        let second = runner.begin();

        assert!(second.generation() > first.generation());
        assert!(first.is_superseded());
        assert!(!second.is_superseded());
    }

    #[test]
    fn run_publishes_layout() {
        let runner = runner();
        let (leaves, anchors, passes) = inputs();
        let ticket = runner.begin();

        let report = runner.run(&ticket, &leaves, &anchors, &passes, &mut |_| {}).unwrap();

        assert_eq!(report.applied.len(), 2);
        assert_eq!(runner.store().current().len(), 100);
        assert_eq!(runner.store().generation(), ticket.generation());
        assert_eq!(runner.store().report(), Some(report));
    }

    #[test]
    fn superseded_run_is_not_published() {
        let runner = runner();
        let (leaves, anchors, passes) = inputs();
        let stale = runner.begin();
        let _fresh = runner.begin();

        let result = runner.run(&stale, &leaves, &anchors, &passes, &mut |_| {});

        assert!(matches!(result, Err(PipelineError::Cancelled { completed: 0, .. })));
        assert!(runner.store().current().is_empty());
        assert_eq!(runner.store().generation(), 0);
    }

    #[test]
    fn run_superseded_mid_pipeline_stops_between_passes() {
        let runner = runner();
        let (leaves, anchors, passes) = inputs();
        let ticket = runner.begin();
        let mut seen = 0;

        let result = runner.run(&ticket, &leaves, &anchors, &passes, &mut |_| {
            seen += 1;
            runner.begin();
        });

        assert_eq!(seen, 1);
        assert!(matches!(result, Err(PipelineError::Cancelled { completed: 1, .. })));
    }

    #[test]
    fn store_rejects_older_generations() {
        let runner = runner();
        let old = runner.begin();
        let new = runner.begin();
        let store = runner.store();

        assert!(store.publish(&new, vec![Leaf::new("x", "A")], PipelineReport::default()));
        // Reset `latest` so the old ticket is not superseded, only older
        runner.latest.store(old.generation(), Ordering::Release);
        assert!(!store.publish(&old, Vec::new(), PipelineReport::default()));
        assert_eq!(store.current().len(), 1);
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let runner = runner();
        let (leaves, anchors, passes) = inputs();
        let before = runner.store().current();

        let ticket = runner.begin();
        runner.run(&ticket, &leaves, &anchors, &passes, &mut |_| {}).unwrap();

        assert!(before.is_empty());
        assert_eq!(runner.store().current().len(), 100);
    }

    #[test]
    fn spawned_run_streams_progress_then_publishes() {
        let runner = runner();
        let (leaves, anchors, passes) = inputs();

        let handle = runner.spawn(leaves, anchors, passes);
        let events: Vec<RunEvent> = handle.events.iter().collect();
        handle.join();

        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], RunEvent::Progress(_)));
        assert!(matches!(events[2], RunEvent::Published(_)));
        assert_eq!(runner.store().current().len(), 100);
    }

    #[test]
    fn later_spawn_wins() {
        let runner = runner();
        let (leaves, anchors, passes) = inputs();

        let first = runner.spawn(leaves.clone(), anchors.clone(), passes.clone());
        let second = runner.spawn(leaves, anchors, passes);
        let second_generation = second.generation;
        first.join();
        second.join();

        assert_eq!(runner.store().generation(), second_generation);
    }

    #[test]
    fn cancel_flag() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        flag.clone().cancel();
        assert!(flag.is_cancelled());
    }
}
