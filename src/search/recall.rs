//! Online recall sampling.
//!
//! A sampled query is queued to a single background worker which re-runs it
//! exhaustively for ground truth, runs the approximate path again, and
//! reports how much of the ground truth the approximate path found. When a
//! realtime segment is present it also reports how much of the result came
//! from realtime ingestion. A full queue drops the sample; the query that
//! triggered it is unaffected.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use tracing::{debug, warn};

use crate::error::{Result, VecSegError};
use crate::metrics::{MetricsSink, TagCache};
use crate::search::context::WorkerId;
use crate::search::query::VectorQuery;
use crate::search::set::{SegmentSet, SubIndexResult};
use crate::vector::config::RecallConfig;
use crate::vector::core::doc::DocId;

pub const RECALL_METRIC: &str = "vector.recall";
pub const REALTIME_RECALL_METRIC: &str = "vector.recall.realtime";
pub const REALTIME_CONTRIBUTION_METRIC: &str = "vector.realtime_contribution";

/// One queued sample.
#[derive(Debug, Clone)]
struct RecallJob {
    query: VectorQuery,
    tags: Vec<(String, String)>,
}

/// Outcome of evaluating one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecallSample {
    pub recall: f64,
    /// Recall of the realtime-only path against realtime ground truth.
    pub realtime_recall: Option<f64>,
    /// Fraction of returned documents at or beyond the realtime base doc-id.
    pub realtime_contribution: Option<f64>,
}

/// Counters of a [`RecallReporter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecallStats {
    pub queries_seen: u64,
    pub submitted: u64,
    pub dropped: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    seen: AtomicU64,
    submitted: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Samples queries and evaluates them on a dedicated thread.
#[derive(Debug)]
pub struct RecallReporter {
    interval: Option<u64>,
    offset: u64,
    sender: Option<Sender<RecallJob>>,
    worker: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl RecallReporter {
    /// Start the sampling worker. With a zero sample ratio nothing is
    /// sampled and no thread is started.
    pub fn start(
        config: &RecallConfig,
        set: Arc<SegmentSet>,
        sink: Arc<dyn MetricsSink>,
        tags: TagCache,
    ) -> Result<Self> {
        let interval = config.interval();
        let mut reporter = RecallReporter::idle(interval);
        if interval.is_none() {
            return Ok(reporter);
        }

        let (sender, receiver) = bounded(config.queue_capacity.max(1));
        let counters = Arc::clone(&reporter.counters);
        let worker = thread::Builder::new()
            .name("vecseg-recall".to_string())
            .spawn(move || run_worker(receiver, set, sink, tags, counters))?;
        reporter.sender = Some(sender);
        reporter.worker = Some(worker);
        debug!(
            interval = interval.unwrap_or_default(),
            queue_capacity = config.queue_capacity,
            "recall sampling started"
        );
        Ok(reporter)
    }

    fn idle(interval: Option<u64>) -> Self {
        let offset = match interval {
            Some(n) => rand::random::<u64>() % n,
            None => 0,
        };
        RecallReporter {
            interval,
            offset,
            sender: None,
            worker: None,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Queue `query` if it falls on the sampling interval.
    ///
    /// Returns whether the query was queued. A full queue returns
    /// [`VecSegError::ResourceExhausted`]; the caller's search result stands.
    pub fn maybe_sample(&self, query: &VectorQuery, tags: &[(String, String)]) -> Result<bool> {
        let Some(interval) = self.interval else {
            return Ok(false);
        };
        let seen = self.counters.seen.fetch_add(1, Ordering::Relaxed);
        if (seen + self.offset) % interval != 0 {
            return Ok(false);
        }
        self.submit(query, tags)?;
        Ok(true)
    }

    /// Queue `query` unconditionally.
    pub fn submit(&self, query: &VectorQuery, tags: &[(String, String)]) -> Result<()> {
        let Some(sender) = &self.sender else {
            return Err(VecSegError::invalid_operation("recall sampling is disabled"));
        };
        let job = RecallJob {
            query: query.clone(),
            tags: tags.to_vec(),
        };
        match sender.try_send(job) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("recall sample dropped, queue is full");
                Err(VecSegError::resource_exhausted("recall sampling queue is full"))
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Err(VecSegError::invalid_operation("recall worker has stopped"))
            }
        }
    }

    pub fn stats(&self) -> RecallStats {
        RecallStats {
            queries_seen: self.counters.seen.load(Ordering::Relaxed),
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Finish queued samples and stop the worker.
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("recall worker panicked");
        }
    }
}

impl Drop for RecallReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    receiver: Receiver<RecallJob>,
    set: Arc<SegmentSet>,
    sink: Arc<dyn MetricsSink>,
    tags: TagCache,
    counters: Arc<Counters>,
) {
    for job in receiver.iter() {
        match evaluate(&set, &job.query) {
            Ok(sample) => {
                let tags = tags.tags(&job.tags);
                sink.report(RECALL_METRIC, sample.recall, &tags);
                if let Some(recall) = sample.realtime_recall {
                    sink.report(REALTIME_RECALL_METRIC, recall, &tags);
                }
                if let Some(contribution) = sample.realtime_contribution {
                    sink.report(REALTIME_CONTRIBUTION_METRIC, contribution, &tags);
                }
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(error = %e, "recall evaluation failed");
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    debug!("recall worker stopped");
}

fn doc_ids(results: &[SubIndexResult]) -> Vec<BTreeSet<DocId>> {
    results
        .iter()
        .map(|result| result.items.iter().map(|item| item.doc_id).collect())
        .collect()
}

/// Hits over ground-truth size, summed across sub-index queries. An empty
/// ground truth counts as full recall.
fn recall(truth: &[BTreeSet<DocId>], found: &[BTreeSet<DocId>]) -> f64 {
    let total: usize = truth.iter().map(BTreeSet::len).sum();
    if total == 0 {
        return 1.0;
    }
    let hits: usize = truth
        .iter()
        .zip(found)
        .map(|(truth, found)| truth.intersection(found).count())
        .sum();
    hits as f64 / total as f64
}

/// Run one sample against `set`.
pub fn evaluate(set: &SegmentSet, query: &VectorQuery) -> Result<RecallSample> {
    let exact = query.to_bruteforce();
    let approximate = VectorQuery {
        bruteforce: false,
        ..query.clone()
    };

    let truth = doc_ids(&set.search(WorkerId::RECALL, &exact)?);
    let found = doc_ids(&set.search(WorkerId::RECALL, &approximate)?);
    let mut sample = RecallSample {
        recall: recall(&truth, &found),
        realtime_recall: None,
        realtime_contribution: None,
    };

    if let Some(base) = set.realtime_base_doc_id() {
        let realtime_truth = doc_ids(&set.search_realtime(WorkerId::RECALL, &exact)?);
        let realtime_found = doc_ids(&set.search_realtime(WorkerId::RECALL, &approximate)?);
        sample.realtime_recall = Some(recall(&realtime_truth, &realtime_found));

        let returned: usize = found.iter().map(BTreeSet::len).sum();
        let from_realtime: usize = found
            .iter()
            .map(|ids| ids.range(base..).count())
            .sum();
        sample.realtime_contribution = Some(if returned == 0 {
            0.0
        } else {
            from_realtime as f64 / returned as f64
        });
    }
    Ok(sample)
}
