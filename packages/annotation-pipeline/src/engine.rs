//! Execution engine
//!
//! Runs a [`Pipeline`] over documents either inline on the calling thread
//! (one worker) or on a fixed pool of worker threads fed by a bounded
//! channel. Submission blocks while the queue is full.
//!
//! Every submitted document ends in exactly one callback invocation carrying
//! an [`Annotation`], whether its stages succeeded, failed, panicked or were
//! interrupted. Failures never cross the worker boundary any other way.

use crate::config::PipelineConfig;
use crate::context::DocumentContext;
use crate::error::{PipelineError, Result};
use crate::pipeline::{panic_message, Pipeline};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Per-document lifecycle: Submitted → Running → {Completed | Failed}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentState {
    Submitted,
    Running,
    Completed,
    Failed,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Submitted => "submitted",
            DocumentState::Running => "running",
            DocumentState::Completed => "completed",
            DocumentState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentState::Completed | DocumentState::Failed)
    }
}

impl std::fmt::Display for DocumentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one document run, handed to the completion callback
#[derive(Debug)]
pub struct Annotation {
    pub document: DocumentContext,
    pub state: DocumentState,
    /// Stage that failed or was cut by an interrupt
    pub failed_stage: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Annotation {
    pub fn is_success(&self) -> bool {
        self.state == DocumentState::Completed
    }

    pub fn error(&self) -> Option<&PipelineError> {
        self.document.last_error()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// The annotated document, or the error recorded in its slot
    pub fn into_result(mut self) -> Result<DocumentContext> {
        match self.document.take_error() {
            Some(e) => Err(e),
            None => Ok(self.document),
        }
    }
}

pub type Callback = Box<dyn FnOnce(Annotation) + Send + 'static>;

/// Engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub workers: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Counters {
    queued: AtomicUsize,
    running: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

/// State shared with worker threads
struct Shared {
    pipeline: Pipeline,
    interrupted: AtomicBool,
    counters: Counters,
}

struct Job {
    document: DocumentContext,
    callback: Callback,
}

struct Pool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

struct EngineInner {
    shared: Arc<Shared>,
    pool: Option<Pool>,
    closed: AtomicBool,
}

/// Runs documents through a pipeline, inline or on a worker pool
#[derive(Clone)]
pub struct AnnotationEngine {
    inner: Arc<EngineInner>,
}

impl AnnotationEngine {
    /// Engine sized from `config.threads` and the queue capacity
    pub fn new(pipeline: Pipeline, config: &PipelineConfig) -> Result<Self> {
        Self::with_workers(pipeline, config.threads, config.effective_queue_capacity())
    }

    /// `workers <= 1` runs inline on the submitting thread
    pub fn with_workers(pipeline: Pipeline, workers: usize, queue_capacity: usize) -> Result<Self> {
        let shared = Arc::new(Shared {
            pipeline,
            interrupted: AtomicBool::new(false),
            counters: Counters::default(),
        });

        let pool = if workers > 1 {
            Some(Pool::start(&shared, workers, queue_capacity.max(1))?)
        } else {
            debug!("Annotation engine running inline");
            None
        };

        Ok(Self {
            inner: Arc::new(EngineInner {
                shared,
                pool,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.shared.pipeline
    }

    pub fn workers(&self) -> usize {
        self.inner.pool.as_ref().map_or(1, |p| p.size)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Submit `document`; `callback` fires exactly once with the outcome.
    ///
    /// Inline engines return after the callback has run. Pool engines
    /// return once the document is queued, blocking while the queue is full.
    pub fn annotate_with<F>(&self, document: DocumentContext, callback: F)
    where
        F: FnOnce(Annotation) + Send + 'static,
    {
        let callback: Callback = Box::new(callback);
        if self.is_closed() {
            deliver(closed_annotation(document), callback);
            return;
        }

        let Some(pool) = &self.inner.pool else {
            let annotation = process(&self.inner.shared, document);
            deliver(annotation, callback);
            return;
        };

        let sender = pool.sender.lock().clone();
        let Some(sender) = sender else {
            deliver(closed_annotation(document), callback);
            return;
        };

        let counters = &self.inner.shared.counters;
        counters.queued.fetch_add(1, Ordering::SeqCst);
        if let Err(rejected) = sender.send(Job { document, callback }) {
            counters.queued.fetch_sub(1, Ordering::SeqCst);
            let job = rejected.into_inner();
            deliver(closed_annotation(job.document), job.callback);
        }
    }

    /// Run `document` to completion and return its outcome
    pub fn annotate(&self, document: DocumentContext) -> Result<Annotation> {
        if self.inner.pool.is_none() && !self.is_closed() {
            return Ok(process(&self.inner.shared, document));
        }

        let (tx, rx) = bounded(1);
        self.annotate_with(document, move |annotation| {
            let _ = tx.send(annotation);
        });
        rx.recv().map_err(|_| PipelineError::EngineClosed)
    }

    /// Async submission; awaits the callback through a oneshot channel
    pub async fn annotate_async(&self, document: DocumentContext) -> Result<Annotation> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let engine = self.clone();
        let submit = tokio::task::spawn_blocking(move || {
            engine.annotate_with(document, move |annotation| {
                let _ = tx.send(annotation);
            });
        });

        if let Err(e) = submit.await {
            error!("Document submission task failed: {}", e);
        }
        rx.await.map_err(|_| PipelineError::EngineClosed)
    }

    /// Ask running documents to stop before their next stage
    pub fn interrupt(&self) {
        warn!("Annotation engine interrupted");
        self.inner.shared.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn clear_interrupt(&self) {
        self.inner.shared.interrupted.store(false, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.shared.interrupted.load(Ordering::SeqCst)
    }

    /// Stop accepting documents, drain the queue and join the workers.
    /// Later submissions fail with [`PipelineError::EngineClosed`].
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn stats(&self) -> EngineStats {
        let counters = &self.inner.shared.counters;
        EngineStats {
            workers: self.workers(),
            queued: counters.queued.load(Ordering::SeqCst),
            running: counters.running.load(Ordering::SeqCst),
            completed: counters.completed.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
        }
    }
}

impl std::fmt::Debug for AnnotationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnotationEngine")
            .field("pipeline", self.pipeline())
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl EngineInner {
    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(pool) = &self.pool else {
            return;
        };

        drop(pool.sender.lock().take());

        let current = thread::current().id();
        let workers: Vec<_> = pool.workers.lock().drain(..).collect();
        let mut joined = 0;
        for handle in workers {
            // a callback running on a worker may drop the last engine handle
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Annotation worker exited with a panic");
            }
            joined += 1;
        }
        info!("Annotation engine shut down ({} workers joined)", joined);
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Pool {
    fn start(shared: &Arc<Shared>, size: usize, capacity: usize) -> Result<Self> {
        let (sender, receiver) = bounded::<Job>(capacity);
        let mut workers = Vec::with_capacity(size);

        for i in 0..size {
            let shared = shared.clone();
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("annotator-{}", i))
                .spawn(move || worker_loop(shared, receiver))?;
            workers.push(handle);
        }

        info!(
            "Started annotation pool: {} workers, queue capacity {}",
            size, capacity
        );

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            size,
        })
    }
}

fn worker_loop(shared: Arc<Shared>, jobs: Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        shared.counters.queued.fetch_sub(1, Ordering::SeqCst);
        let annotation = process(&shared, job.document);
        deliver(annotation, job.callback);
    }
    debug!(
        "Worker {} exiting",
        thread::current().name().unwrap_or("annotator")
    );
}

fn process(shared: &Shared, mut document: DocumentContext) -> Annotation {
    let started_at = Utc::now();
    let counters = &shared.counters;
    counters.running.fetch_add(1, Ordering::SeqCst);
    debug!("Annotating document {}", document.id());

    let interrupted = || shared.interrupted.load(Ordering::SeqCst);
    let (state, failed_stage) = match shared.pipeline.run(&mut document, &interrupted) {
        Ok(()) => {
            counters.completed.fetch_add(1, Ordering::SeqCst);
            (DocumentState::Completed, None)
        }
        Err(e) => {
            warn!("Document {} failed: {}", document.id(), e);
            counters.failed.fetch_add(1, Ordering::SeqCst);
            let stage = e.stage().map(str::to_string);
            document.record_error(e);
            (DocumentState::Failed, stage)
        }
    };
    counters.running.fetch_sub(1, Ordering::SeqCst);

    let finished_at = Utc::now();
    debug!(
        "Document {} {} in {}ms",
        document.id(),
        state,
        (finished_at - started_at).num_milliseconds()
    );

    Annotation {
        document,
        state,
        failed_stage,
        started_at,
        finished_at,
    }
}

fn closed_annotation(mut document: DocumentContext) -> Annotation {
    let now = Utc::now();
    document.record_error(PipelineError::EngineClosed);
    Annotation {
        document,
        state: DocumentState::Failed,
        failed_stage: None,
        started_at: now,
        finished_at: now,
    }
}

fn deliver(annotation: Annotation, callback: Callback) {
    let id = annotation.document.id();
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || callback(annotation))) {
        error!(
            "Completion callback for document {} panicked: {}",
            id,
            panic_message(payload.as_ref())
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SharedStage;
    use crate::capability::{CapabilitySet, TOKENS};
    use crate::stage::Stage;
    use crate::stages::TokenizerStage;
    use std::time::Duration;

    /// Fails on documents whose text contains "fail"
    struct PickyStage;

    impl Stage for PickyStage {
        fn name(&self) -> &str {
            "picky"
        }

        fn requires(&self) -> CapabilitySet {
            CapabilitySet::new()
        }

        fn satisfies(&self) -> CapabilitySet {
            CapabilitySet::new()
        }

        fn run(&self, ctx: &mut DocumentContext) -> anyhow::Result<()> {
            if ctx.text().contains("fail") {
                anyhow::bail!("refusing '{}'", ctx.text());
            }
            Ok(())
        }
    }

    fn pipeline() -> Pipeline {
        Pipeline::from_stages(
            &["tokenize", "picky"],
            vec![
                Arc::new(TokenizerStage::new()) as SharedStage,
                Arc::new(PickyStage) as SharedStage,
            ],
            true,
        )
        .unwrap()
    }

    fn run_batch(workers: usize, texts: &[&str]) -> Vec<Annotation> {
        let engine = AnnotationEngine::with_workers(pipeline(), workers, 4).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let calls = Arc::new(AtomicUsize::new(0));

        for text in texts {
            let tx = tx.clone();
            let calls = calls.clone();
            engine.annotate_with(DocumentContext::new(*text), move |a| {
                calls.fetch_add(1, Ordering::SeqCst);
                tx.send(a).unwrap();
            });
        }
        engine.shutdown();
        drop(tx);

        let annotations: Vec<_> = rx.iter().collect();
        assert_eq!(calls.load(Ordering::SeqCst), texts.len());
        annotations
    }

    #[test]
    fn test_inline_failure_captured_in_context() {
        let annotations = run_batch(1, &["please fail"]);
        assert_eq!(annotations.len(), 1);

        let a = &annotations[0];
        assert_eq!(a.state, DocumentState::Failed);
        assert_eq!(a.failed_stage.as_deref(), Some("picky"));
        assert!(a.document.is_failed());
        assert!(a.document.contains(TOKENS.capability()));
    }

    #[test]
    fn test_pool_failure_isolated_per_document() {
        let texts = ["one", "two fail", "three", "four", "five fail", "six"];
        let annotations = run_batch(3, &texts);
        assert_eq!(annotations.len(), texts.len());

        for a in &annotations {
            let should_fail = a.document.text().contains("fail");
            assert_eq!(a.is_success(), !should_fail, "{}", a.document.text());
            assert_eq!(a.error().is_some(), should_fail);
            assert!(a.state.is_terminal());
        }
    }

    #[test]
    fn test_annotate_returns_outcome() {
        let engine = AnnotationEngine::with_workers(pipeline(), 2, 2).unwrap();
        let ok = engine.annotate(DocumentContext::new("fine")).unwrap();
        assert!(ok.is_success());
        assert!(ok.duration_ms() >= 0);

        let bad = engine.annotate(DocumentContext::new("fail")).unwrap();
        let err = bad.into_result().unwrap_err();
        assert!(matches!(err, PipelineError::StageExecution { ref stage, .. } if stage == "picky"));

        let stats = engine.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.workers, 2);
    }

    #[test]
    fn test_malformed_threads_runs_inline() {
        let config = PipelineConfig::from_properties([("threads", "four")]).unwrap();
        let engine = AnnotationEngine::new(pipeline(), &config).unwrap();
        assert_eq!(engine.workers(), 1);

        let caller = thread::current().id();
        let (tx, rx) = bounded(1);
        engine.annotate_with(DocumentContext::new("hello"), move |_| {
            tx.send(thread::current().id()).unwrap();
        });
        // inline: callback already ran on this thread
        assert_eq!(rx.try_recv().unwrap(), caller);
    }

    #[test]
    fn test_closed_engine_still_calls_back() {
        for workers in [1, 3] {
            let engine = AnnotationEngine::with_workers(pipeline(), workers, 2).unwrap();
            engine.shutdown();

            let annotation = engine.annotate(DocumentContext::new("late")).unwrap();
            assert_eq!(annotation.state, DocumentState::Failed);
            assert!(matches!(annotation.error(), Some(PipelineError::EngineClosed)));
        }
    }

    #[test]
    fn test_interrupt_becomes_interrupted_error() {
        let engine = AnnotationEngine::with_workers(pipeline(), 2, 2).unwrap();
        engine.interrupt();

        let annotation = engine.annotate(DocumentContext::new("text")).unwrap();
        assert!(matches!(
            annotation.error(),
            Some(PipelineError::Interrupted { stage }) if stage == "tokenize"
        ));

        engine.clear_interrupt();
        assert!(engine.annotate(DocumentContext::new("text")).unwrap().is_success());
    }

    #[test]
    fn test_panicking_callback_keeps_worker_alive() {
        let engine = AnnotationEngine::with_workers(pipeline(), 2, 2).unwrap();
        for _ in 0..4 {
            engine.annotate_with(DocumentContext::new("x"), |_| panic!("callback bug"));
        }

        let annotation = engine.annotate(DocumentContext::new("after")).unwrap();
        assert!(annotation.is_success());
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let engine = AnnotationEngine::with_workers(pipeline(), 2, 8).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        for i in 0..8 {
            let done = done.clone();
            engine.annotate_with(DocumentContext::new(format!("doc {}", i)), move |_| {
                thread::sleep(Duration::from_millis(5));
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        engine.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 8);
        assert!(engine.is_closed());
    }
}
