//! Request/response correlation with the isolated compute context.
//!
//! ```text
//!   submit() ──ProcessChunk──► stem-worker ──ChunkResult/ChunkError──► stem-router
//!      ▲                                                                   │
//!      └──────────── oneshot (looked up by request id) ◄──────────────────┘
//! ```
//!
//! The worker thread owns the installed models and runs one chunk at a
//! time. The router thread settles pending requests. A pending entry is
//! removed from the table before its completion handle is used, so every
//! request settles exactly once no matter whether the result, a timeout or
//! a cancellation gets there first.

use crate::{
    core::{
        chunker::Chunk,
        protocol::{ProcessChunk, WorkerRequest, WorkerResponse},
    },
    error::{Result, StemError},
    model::stem_model::{ChunkInput, StemModel},
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

pub type StemBuffers = Vec<Vec<f32>>;

struct PendingRequest {
    completion: oneshot::Sender<Result<StemBuffers>>,
    dispatched_at: Instant,
}

type PendingTable = Arc<Mutex<HashMap<u64, PendingRequest>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to one worker/router thread pair.
struct WorkerContext {
    requests: Sender<WorkerRequest>,
}

impl WorkerContext {
    fn spawn(pending: PendingTable, ordinal: u64) -> std::io::Result<Self> {
        let (request_tx, request_rx) = unbounded();
        let (response_tx, response_rx) = unbounded();

        thread::Builder::new()
            .name(format!("stem-worker-{ordinal}"))
            .spawn(move || worker_loop(request_rx, response_tx))?;
        thread::Builder::new()
            .name(format!("stem-router-{ordinal}"))
            .spawn(move || route_responses(response_rx, pending))?;

        Ok(Self {
            requests: request_tx,
        })
    }
}

impl Drop for WorkerContext {
    fn drop(&mut self) {
        // A wedged worker never reads this; its thread is left to finish on its own.
        let _ = self.requests.send(WorkerRequest::Shutdown);
    }
}

fn worker_loop(requests: Receiver<WorkerRequest>, responses: Sender<WorkerResponse>) {
    let mut models: HashMap<String, Arc<dyn StemModel>> = HashMap::new();
    let mut abandoned: HashSet<u64> = HashSet::new();
    let mut backlog: VecDeque<WorkerRequest> = VecDeque::new();

    loop {
        let message = match backlog.pop_front() {
            Some(m) => m,
            None => match requests.recv() {
                Ok(m) => m,
                Err(_) => break,
            },
        };

        match message {
            WorkerRequest::InitModel { model_name, model } => {
                match model.warm_up() {
                    Ok(()) => {
                        let _ = responses.send(WorkerResponse::Progress {
                            data: format!("model `{model_name}` ready"),
                        });
                    }
                    Err(e) => warn!(model = %model_name, error = %e, "model warm-up failed"),
                }
                models.insert(model_name, model);
            }
            WorkerRequest::CancelRequest { request_id } => {
                abandoned.insert(request_id);
            }
            WorkerRequest::Shutdown => break,
            WorkerRequest::ProcessChunk(job) => {
                // Look at what queued up behind this job before spending time on it.
                backlog.extend(requests.try_iter());
                if backlog
                    .iter()
                    .any(|m| matches!(m, WorkerRequest::Shutdown))
                {
                    break;
                }
                backlog.retain(|m| match m {
                    WorkerRequest::CancelRequest { request_id } => {
                        abandoned.insert(*request_id);
                        false
                    }
                    _ => true,
                });
                if abandoned.remove(&job.request_id) {
                    trace!(request_id = job.request_id, "skipping abandoned chunk");
                    continue;
                }

                let response = run_job(&models, job);
                if responses.send(response).is_err() {
                    break;
                }
            }
        }
    }
    trace!("compute context stopped");
}

fn run_job(models: &HashMap<String, Arc<dyn StemModel>>, job: ProcessChunk) -> WorkerResponse {
    let request_id = job.request_id;
    let Some(model) = models.get(&job.model_name) else {
        return WorkerResponse::ChunkError {
            request_id,
            error: format!("model `{}` is not initialised", job.model_name),
        };
    };

    let input = ChunkInput {
        channels: &job.channel_buffers,
        len: job.channel_length,
        sample_rate: job.sample_rate,
        stem_count: job.stem_count,
    };

    match panic::catch_unwind(AssertUnwindSafe(|| model.separate(input))) {
        Ok(Ok(stem_buffers)) => WorkerResponse::ChunkResult {
            request_id,
            stem_buffers,
        },
        Ok(Err(e)) => WorkerResponse::ChunkError {
            request_id,
            error: e.to_string(),
        },
        Err(_) => WorkerResponse::ChunkError {
            request_id,
            error: format!("model `{}` panicked", job.model_name),
        },
    }
}

fn route_responses(responses: Receiver<WorkerResponse>, pending: PendingTable) {
    for response in responses {
        let (request_id, outcome) = match response {
            WorkerResponse::ChunkResult {
                request_id,
                stem_buffers,
            } => (request_id, Ok(stem_buffers)),
            WorkerResponse::ChunkError { request_id, error } => (
                request_id,
                Err(StemError::ChunkCompute {
                    request_id,
                    reason: error,
                }),
            ),
            WorkerResponse::Progress { data } => {
                trace!(%data, "worker progress");
                continue;
            }
        };

        let entry = lock(&pending).remove(&request_id);
        match entry {
            Some(p) => {
                trace!(
                    request_id,
                    latency_ms = p.dispatched_at.elapsed().as_millis() as u64,
                    "chunk settled"
                );
                let _ = p.completion.send(outcome);
            }
            None => debug!(request_id, "late response for a settled request"),
        }
    }
}

/// Hands hops to an isolated compute context and awaits their results
/// under a fixed per-request timeout.
///
/// The channel survives [`cancel`](Self::cancel): outstanding requests fail
/// and a fresh context replaces the old one, with every installed model
/// re-sent to it.
pub struct DispatchChannel {
    timeout: Duration,
    next_id: AtomicU64,
    generation: AtomicU64,
    contexts_spawned: AtomicU64,
    pending: PendingTable,
    models: Mutex<HashMap<String, Arc<dyn StemModel>>>,
    context: Mutex<Option<WorkerContext>>,
}

impl DispatchChannel {
    pub fn new(timeout: Duration) -> Self {
        let channel = Self {
            timeout,
            next_id: AtomicU64::new(1),
            generation: AtomicU64::new(0),
            contexts_spawned: AtomicU64::new(0),
            pending: Arc::new(Mutex::new(HashMap::new())),
            models: Mutex::new(HashMap::new()),
            context: Mutex::new(None),
        };
        *lock(&channel.context) = channel.spawn_context();
        channel
    }

    /// Bumped by every [`cancel`](Self::cancel).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Snapshot the current generation; the watch trips on the next cancel.
    pub fn watch(&self) -> CancelWatch<'_> {
        CancelWatch {
            channel: self,
            generation: self.generation(),
        }
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn has_model(&self, model_name: &str) -> bool {
        lock(&self.models).contains_key(model_name)
    }

    /// The model installed under `model_name`, if any.
    pub fn model(&self, model_name: &str) -> Option<Arc<dyn StemModel>> {
        lock(&self.models).get(model_name).cloned()
    }

    /// Install `model` in the compute context under `model_name`.
    pub fn init_model(&self, model_name: &str, model: Arc<dyn StemModel>) {
        lock(&self.models).insert(model_name.to_string(), model.clone());
        let msg = WorkerRequest::InitModel {
            model_name: model_name.to_string(),
            model,
        };
        if let Err(e) = self.post(msg) {
            warn!(model = model_name, error = %e, "could not send model to compute context");
        }
    }

    /// Send one hop to the compute context and wait for its stems.
    pub async fn submit(
        &self,
        chunk: &Chunk,
        stem_count: usize,
        sample_rate: u32,
        model_name: &str,
    ) -> Result<StemBuffers> {
        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, mut rx) = oneshot::channel();

        lock(&self.pending).insert(
            request_id,
            PendingRequest {
                completion: tx,
                dispatched_at: Instant::now(),
            },
        );

        let msg = WorkerRequest::ProcessChunk(ProcessChunk {
            request_id,
            channel_buffers: chunk.channels.clone(),
            channel_length: chunk.len,
            sample_rate,
            stem_count,
            model_name: model_name.to_string(),
        });
        if let Err(e) = self.post(msg) {
            lock(&self.pending).remove(&request_id);
            return Err(e);
        }
        debug!(request_id, start = chunk.start, len = chunk.len, "chunk dispatched");

        let outcome = match tokio::time::timeout(self.timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(StemError::ChannelClosed),
            Err(_) => {
                let abandoned = lock(&self.pending).remove(&request_id).is_some();
                if !abandoned {
                    // Settled while the timer fired.
                    rx.try_recv().unwrap_or(Err(StemError::ChannelClosed))
                } else {
                    let _ = self.post(WorkerRequest::CancelRequest { request_id });
                    warn!(
                        request_id,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "chunk request timed out, replacing compute context"
                    );
                    self.fail_pending(|id| StemError::ChunkCompute {
                        request_id: id,
                        reason: "compute context replaced after a timeout".into(),
                    });
                    self.recycle();
                    return Err(StemError::Timeout {
                        request_id,
                        after: self.timeout,
                    });
                }
            }
        };

        let stems = outcome?;
        check_shape(request_id, &stems, stem_count, chunk.len)?;
        Ok(stems)
    }

    /// Fail every outstanding request and start over with a fresh context.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let failed = self.fail_pending(|_| StemError::Cancelled);
        debug!(failed, "dispatch channel cancelled");
        self.recycle();
    }

    fn post(&self, msg: WorkerRequest) -> Result<()> {
        match lock(&self.context).as_ref() {
            Some(ctx) => ctx.requests.send(msg).map_err(|_| StemError::ChannelClosed),
            None => Err(StemError::ChannelClosed),
        }
    }

    fn fail_pending(&self, err: impl Fn(u64) -> StemError) -> usize {
        let drained: Vec<(u64, PendingRequest)> = lock(&self.pending).drain().collect();
        let n = drained.len();
        for (id, p) in drained {
            let _ = p.completion.send(Err(err(id)));
        }
        n
    }

    fn spawn_context(&self) -> Option<WorkerContext> {
        let ordinal = self.contexts_spawned.fetch_add(1, Ordering::SeqCst);
        match WorkerContext::spawn(self.pending.clone(), ordinal) {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                error!(error = %e, "failed to start compute context");
                None
            }
        }
    }

    fn recycle(&self) {
        let fresh = self.spawn_context();
        if let Some(ctx) = &fresh {
            for (name, model) in lock(&self.models).iter() {
                let _ = ctx.requests.send(WorkerRequest::InitModel {
                    model_name: name.clone(),
                    model: model.clone(),
                });
            }
        }
        let old = std::mem::replace(&mut *lock(&self.context), fresh);
        drop(old);
    }
}

/// A reply must hold `stem_count` finite buffers of `len` samples.
fn check_shape(request_id: u64, stems: &[Vec<f32>], stem_count: usize, len: usize) -> Result<()> {
    let malformed = |reason: String| StemError::ChunkCompute { request_id, reason };

    if stems.len() != stem_count {
        return Err(malformed(format!(
            "backend returned {} stems, expected {stem_count}",
            stems.len()
        )));
    }
    if let Some(bad) = stems.iter().find(|s| s.len() != len) {
        return Err(malformed(format!(
            "backend returned a stem of {} samples, expected {len}",
            bad.len()
        )));
    }
    if stems.iter().flatten().any(|s| !s.is_finite()) {
        return Err(malformed("backend returned non-finite samples".into()));
    }
    Ok(())
}

/// Observes whether [`DispatchChannel::cancel`] ran since the watch was taken.
#[derive(Clone, Copy)]
pub struct CancelWatch<'a> {
    channel: &'a DispatchChannel,
    generation: u64,
}

impl CancelWatch<'_> {
    pub fn is_cancelled(&self) -> bool {
        self.channel.generation() != self.generation
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(StemError::Cancelled)
        } else {
            Ok(())
        }
    }
}
