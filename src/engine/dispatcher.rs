//! Request/response dispatcher over one lazily created execution context.
//!
//! `submit` serializes a job, hands it to the context and waits for the correlated reply.
//! When the context cannot be used the same handler runs in-process instead, so callers
//! see the same output either way.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{mpsc::UnboundedReceiver, oneshot};

use crate::analysis::ChunkedScheduler;
use crate::config::{DF, DispatcherSettings, EngineConfig, SchedulerSettings, constants};
use crate::utils::AppInstant;

use super::{
    error::DispatchError,
    handler::{ComputeHandler, KernelSuite, run_guarded},
    messages::{ComputeJob, ComputeOutput, ComputeRequest, ComputeResponse, RequestId, peek_id},
    state::{Counters, DispatcherStats, LiveContext, PendingRequest},
    worker::{ContextSpawner, ThreadSpawner, WorkerCommand, WorkerEvent},
};

/// Cheap to clone; all clones share one context.
#[derive(Clone)]
pub struct TaskDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    settings: DispatcherSettings,
    scheduler: SchedulerSettings,
    handler: Arc<dyn ComputeHandler>,
    spawner: Arc<dyn ContextSpawner>,
    /// Held across initialization so concurrent callers share one context.
    context: tokio::sync::Mutex<Option<Arc<LiveContext>>>,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
    generations: AtomicU64,
    faults: AtomicU32,
    /// Set once `max_context_faults` is reached. Never cleared.
    disabled: AtomicBool,
    counters: Counters,
}

impl TaskDispatcher {
    /// Dispatcher running the standard kernel suite on a thread context.
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_parts(config, Arc::new(KernelSuite), Arc::new(ThreadSpawner))
    }

    pub fn with_parts(
        config: &EngineConfig,
        handler: Arc<dyn ComputeHandler>,
        spawner: Arc<dyn ContextSpawner>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings: config.dispatcher,
                scheduler: config.scheduler,
                handler,
                spawner,
                context: tokio::sync::Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
                faults: AtomicU32::new(0),
                disabled: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.inner.settings
    }

    pub fn stats(&self) -> DispatcherStats {
        self.inner.counters.snapshot()
    }

    /// True once repeated faults have permanently disabled the context.
    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.load(Ordering::SeqCst)
    }

    /// Eagerly creates the execution context.
    pub async fn start(&self) -> Result<(), DispatchError> {
        self.ensure_context().await.map(|_| ())
    }

    /// Submits with the configured default timeout.
    pub async fn submit_default(&self, job: ComputeJob) -> Result<ComputeOutput, DispatchError> {
        let timeout = self.inner.settings.request_timeout();
        self.submit(job, timeout).await
    }

    pub async fn submit(
        &self,
        job: ComputeJob,
        timeout: Duration,
    ) -> Result<ComputeOutput, DispatchError> {
        Counters::bump(&self.inner.counters.submitted);

        let result = match self.ensure_context().await {
            Ok(context) => self.submit_remote(&context, job, timeout).await,
            Err(reason) if self.inner.settings.local_fallback => {
                if DF.log_dispatcher {
                    log::info!("DISPATCHER: running {} locally ({})", job.kind(), reason);
                }
                self.run_local(job, timeout).await
            }
            Err(reason) => Err(reason),
        };

        if let Err(e) = &result {
            Counters::bump(&self.inner.counters.failed);
            if e.is_timeout() {
                Counters::bump(&self.inner.counters.timeouts);
            }
        }
        result
    }

    /// Stops the context and rejects whatever it still owed. A later `submit` starts a
    /// fresh context.
    pub async fn shutdown(&self) {
        let context = self.inner.context.lock().await.take();
        let Some(context) = context else {
            return;
        };

        context.close();
        self.inner.reject_generation(
            context.generation,
            DispatchError::ContextUnavailable("dispatcher shut down".to_string()),
        );

        if let Some(thread) = context.take_thread() {
            let joined = tokio::task::spawn_blocking(move || thread.join());
            if tokio::time::timeout(constants::SHUTDOWN_GRACE, joined)
                .await
                .is_err()
            {
                log::warn!(
                    "DISPATCHER: context {} did not stop within {:?}",
                    context.generation,
                    constants::SHUTDOWN_GRACE
                );
            }
        }

        if DF.log_dispatcher {
            log::info!("DISPATCHER: context {} shut down", context.generation);
        }
    }

    async fn ensure_context(&self) -> Result<Arc<LiveContext>, DispatchError> {
        let inner = &self.inner;

        if !inner.settings.offload_enabled {
            return Err(DispatchError::ContextUnavailable(
                "offload disabled by configuration".to_string(),
            ));
        }

        let mut slot = inner.context.lock().await;

        if let Some(context) = slot.as_ref() {
            if context.is_alive() {
                return Ok(Arc::clone(context));
            }
        }
        *slot = None;

        if inner.disabled.load(Ordering::SeqCst) {
            return Err(DispatchError::ContextUnavailable(
                "context previously faulted".to_string(),
            ));
        }

        // 1. Spawn
        let generation = inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let link = inner
            .spawner
            .spawn(Arc::clone(&inner.handler), inner.scheduler, generation, events_tx)
            .map_err(|e| DispatchError::ContextUnavailable(format!("{:#}", e)))?;
        let context = Arc::new(LiveContext::new(generation, link));

        // 2. Route its events
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(route_events(
            Arc::downgrade(inner),
            Arc::downgrade(&context),
            generation,
            events_rx,
            ready_tx,
        ));

        // 3. Wait for Ready
        let init_timeout = inner.settings.init_timeout();
        match tokio::time::timeout(init_timeout, ready_rx).await {
            Ok(Ok(())) => {
                if DF.log_dispatcher {
                    log::info!("DISPATCHER: context {} ready", generation);
                }
                *slot = Some(Arc::clone(&context));
                Ok(context)
            }
            Ok(Err(_)) => Err(DispatchError::ContextUnavailable(format!(
                "context {} exited during initialization",
                generation
            ))),
            Err(_) => {
                context.close();
                inner.record_fault(generation, "initialization timed out");
                Err(DispatchError::ContextUnavailable(format!(
                    "context {} not ready after {:?}",
                    generation, init_timeout
                )))
            }
        }
    }

    async fn submit_remote(
        &self,
        context: &LiveContext,
        job: ComputeJob,
        timeout: Duration,
    ) -> Result<ComputeOutput, DispatchError> {
        let inner = &self.inner;
        let kind = job.kind();
        let request = ComputeRequest::new(job);
        let id = request.id;
        let frame =
            serde_json::to_string(&request).map_err(|e| DispatchError::Encode(e.to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        inner.pending_map().insert(
            id,
            PendingRequest {
                generation: context.generation,
                kind,
                reply: reply_tx,
                started: AppInstant::now(),
            },
        );

        // A fault marks the context dead before draining, so one of the two checks sees it
        if !context.is_alive() || !context.send(WorkerCommand::Request(frame)) {
            inner.pending_map().remove(&id);
            return Err(DispatchError::ContextFault(format!(
                "context {} is gone",
                context.generation
            )));
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => {
                if reply.is_ok() {
                    Counters::bump(&inner.counters.completed_remote);
                }
                reply
            }
            Ok(Err(_)) => Err(DispatchError::ContextFault(
                "request dropped without a reply".to_string(),
            )),
            Err(_) => {
                inner.pending_map().remove(&id);
                context.send(WorkerCommand::Cancel(id));
                log::warn!("DISPATCHER: {} request {} timed out after {:?}", kind, id, timeout);
                Err(DispatchError::RequestTimeout(timeout))
            }
        }
    }

    async fn run_local(
        &self,
        job: ComputeJob,
        timeout: Duration,
    ) -> Result<ComputeOutput, DispatchError> {
        let scheduler = ChunkedScheduler::new(self.inner.scheduler);
        let handler = self.inner.handler.as_ref();

        match tokio::time::timeout(timeout, run_guarded(handler, job, &scheduler)).await {
            Ok(Ok(output)) => {
                Counters::bump(&self.inner.counters.completed_local);
                Ok(output)
            }
            Ok(Err(err)) => {
                let wire = super::messages::WireError::from(&err);
                Err(DispatchError::ComputationError {
                    message: wire.message,
                    trace: wire.trace,
                })
            }
            Err(_) => Err(DispatchError::RequestTimeout(timeout)),
        }
    }
}

impl Inner {
    fn pending_map(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, PendingRequest>> {
        // A panic while holding this lock cannot leave the map half-updated
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn discard(&self, reason: &str) {
        let total = Counters::bump(&self.counters.discarded);
        log::warn!("DISPATCHER: discarded frame ({}), {} so far", reason, total);
    }

    /// Correlates one response frame with its pending request.
    fn resolve_frame(&self, frame: &str) {
        #[cfg(debug_assertions)]
        if DF.log_frames {
            log::trace!("DISPATCHER: <- {}", frame);
        }

        let value: serde_json::Value = match serde_json::from_str(frame) {
            Ok(v) => v,
            Err(e) => return self.discard(&format!("unreadable: {}", e)),
        };

        let Some(id) = peek_id(&value) else {
            return self.discard("missing or invalid id");
        };

        let Some(pending) = self.pending_map().remove(&id) else {
            return self.discard(&format!("unknown or duplicate id {}", id));
        };

        let reply = match serde_json::from_value::<ComputeResponse>(value) {
            Err(e) => Err(DispatchError::MalformedResponse(e.to_string())),
            Ok(ComputeResponse {
                error: Some(error), ..
            }) => Err(DispatchError::ComputationError {
                message: error.message,
                trace: error.trace,
            }),
            Ok(ComputeResponse {
                payload: Some(output),
                ..
            }) if output.kind() == pending.kind => Ok(output),
            Ok(ComputeResponse {
                payload: Some(output),
                ..
            }) => Err(DispatchError::MalformedResponse(format!(
                "expected {} payload, got {}",
                pending.kind,
                output.kind()
            ))),
            Ok(_) => Err(DispatchError::MalformedResponse(
                "response carries neither payload nor error".to_string(),
            )),
        };

        #[cfg(debug_assertions)]
        if DF.log_dispatcher {
            log::debug!(
                "DISPATCHER: {} {} answered in {}ms (ok: {})",
                pending.kind,
                id,
                pending.started.elapsed().as_millis(),
                reply.is_ok()
            );
        }

        // The caller may have given up already
        let _ = pending.reply.send(reply);
    }

    fn reject_generation(&self, generation: u64, error: DispatchError) -> usize {
        let rejected: Vec<PendingRequest> = {
            let mut pending = self.pending_map();
            let ids: Vec<RequestId> = pending
                .iter()
                .filter(|(_, p)| p.generation == generation)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };

        let count = rejected.len();
        for pending in rejected {
            let _ = pending.reply.send(Err(error.clone()));
        }
        count
    }

    fn record_fault(&self, generation: u64, reason: &str) {
        Counters::bump(&self.counters.faults);
        let faults = self.faults.fetch_add(1, Ordering::SeqCst) + 1;
        log::warn!(
            "DISPATCHER: context {} faulted ({}), fault {}/{}",
            generation,
            reason,
            faults,
            self.settings.max_context_faults
        );
        if faults >= self.settings.max_context_faults {
            self.disabled.store(true, Ordering::SeqCst);
            log::error!("DISPATCHER: context disabled after {} faults", faults);
        }
    }

    fn handle_fault(&self, context: &Weak<LiveContext>, generation: u64, reason: &str) {
        if let Some(context) = context.upgrade() {
            context.mark_dead();
        }
        let rejected = self.reject_generation(
            generation,
            DispatchError::ContextFault(reason.to_string()),
        );
        if rejected > 0 {
            log::warn!("DISPATCHER: rejected {} outstanding request(s)", rejected);
        }
        self.record_fault(generation, reason);
    }
}

/// Drains one context's event channel until it closes.
async fn route_events(
    inner: Weak<Inner>,
    context: Weak<LiveContext>,
    generation: u64,
    mut events: UnboundedReceiver<WorkerEvent>,
    ready: oneshot::Sender<()>,
) {
    let mut ready = Some(ready);

    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            WorkerEvent::Ready => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(());
                }
            }
            WorkerEvent::Response(frame) => inner.resolve_frame(&frame),
            WorkerEvent::Fault(reason) => {
                if let Some(context) = context.upgrade() {
                    context.close();
                }
                inner.handle_fault(&context, generation, &reason);
                return;
            }
        }
    }

    // Channel closed
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let closing = context.upgrade().is_none_or(|c| c.is_closing());
    if closing {
        return;
    }
    inner.handle_fault(&context, generation, "execution context exited unexpectedly");
}
