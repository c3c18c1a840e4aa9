//! The auxiliary execution context: a named OS thread running its own single-threaded
//! tokio runtime. It only ever sees JSON frames, never caller memory.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::analysis::{CancelToken, ChunkedScheduler};
use crate::config::SchedulerSettings;

#[cfg(debug_assertions)]
use crate::config::DF;

use super::handler::{ComputeHandler, panic_message, run_guarded};
use super::messages::{ComputeRequest, ComputeResponse, RequestId, WireError, peek_id};

/// Commands sent from the dispatcher to the context.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCommand {
    /// A serialized [`ComputeRequest`]
    Request(String),
    /// Best-effort cooperative cancel of an outstanding request
    Cancel(RequestId),
    Shutdown,
}

/// Events sent from the context back to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Ready,
    /// A serialized [`ComputeResponse`]
    Response(String),
    /// The context can no longer serve requests.
    Fault(String),
}

/// Dispatcher-side handle on a freshly spawned context.
pub struct ContextLink {
    pub commands: UnboundedSender<WorkerCommand>,
    /// Joined on shutdown when present
    pub thread: Option<JoinHandle<()>>,
}

/// Creates execution contexts. The context must send [`WorkerEvent::Ready`] once it can
/// accept requests, answer every request frame with exactly one response frame, and
/// stop when it receives [`WorkerCommand::Shutdown`] or its command channel closes.
pub trait ContextSpawner: Send + Sync + 'static {
    fn spawn(
        &self,
        handler: Arc<dyn ComputeHandler>,
        settings: SchedulerSettings,
        generation: u64,
        events: UnboundedSender<WorkerEvent>,
    ) -> Result<ContextLink>;
}

/// Default spawner: one thread per context.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSpawner;

impl ContextSpawner for ThreadSpawner {
    fn spawn(
        &self,
        handler: Arc<dyn ComputeHandler>,
        settings: SchedulerSettings,
        generation: u64,
        events: UnboundedSender<WorkerEvent>,
    ) -> Result<ContextLink> {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build execution context runtime")?;

        let thread = thread::Builder::new()
            .name(format!("journal-worker-{}", generation))
            .spawn(move || {
                let fault_tx = events.clone();
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    runtime.block_on(run_context(handler, settings, commands_rx, events));
                }));
                if let Err(panic) = outcome {
                    let reason = panic_message(panic.as_ref());
                    log::error!("WORKER {}: context crashed: {}", generation, reason);
                    let _ = fault_tx.send(WorkerEvent::Fault(reason));
                }
            })
            .context("Failed to spawn execution context thread")?;

        Ok(ContextLink {
            commands: commands_tx,
            thread: Some(thread),
        })
    }
}

/// Serves requests until shutdown. Each request runs in its own task so a slow kernel
/// never blocks `Cancel` delivery for the others.
pub async fn run_context(
    handler: Arc<dyn ComputeHandler>,
    settings: SchedulerSettings,
    mut commands: UnboundedReceiver<WorkerCommand>,
    events: UnboundedSender<WorkerEvent>,
) {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<RequestId>();
    let mut inflight: HashMap<RequestId, CancelToken> = HashMap::new();

    if events.send(WorkerEvent::Ready).is_err() {
        return;
    }

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(WorkerCommand::Request(frame)) => {
                    let Some((id, token)) = accept(&frame, &handler, settings, &events, &done_tx) else {
                        continue;
                    };
                    inflight.insert(id, token);
                }
                Some(WorkerCommand::Cancel(id)) => {
                    if let Some(token) = inflight.remove(&id) {
                        #[cfg(debug_assertions)]
                        if DF.log_dispatcher {
                            log::debug!("WORKER: cancelling {}", id);
                        }
                        token.cancel();
                    }
                }
                Some(WorkerCommand::Shutdown) | None => break,
            },
            Some(id) = done_rx.recv() => {
                inflight.remove(&id);
            }
        }
    }

    for token in inflight.values() {
        token.cancel();
    }
}

/// Decodes one request frame and starts it. Undecodable frames are answered with an
/// error response when their id can still be read, and dropped otherwise.
fn accept(
    frame: &str,
    handler: &Arc<dyn ComputeHandler>,
    settings: SchedulerSettings,
    events: &UnboundedSender<WorkerEvent>,
    done: &UnboundedSender<RequestId>,
) -> Option<(RequestId, CancelToken)> {
    #[cfg(debug_assertions)]
    if DF.log_frames {
        log::trace!("WORKER: <- {}", frame);
    }

    let value: serde_json::Value = match serde_json::from_str(frame) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("WORKER: dropping unreadable request frame: {}", e);
            return None;
        }
    };

    let Some(id) = peek_id(&value) else {
        log::warn!("WORKER: dropping request frame without a valid id");
        return None;
    };

    let request: ComputeRequest = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            let response = ComputeResponse::failure(
                id,
                WireError {
                    message: format!("malformed request: {}", e),
                    trace: None,
                },
            );
            send_response(events, &response);
            return None;
        }
    };

    let token = CancelToken::new();
    let scheduler = ChunkedScheduler::with_cancel(settings, token.clone());
    let handler = Arc::clone(handler);
    let events = events.clone();
    let done = done.clone();

    tokio::spawn(async move {
        let kind = request.job.kind();
        let result = crate::trace_time!(&format!("WORKER job [{}]", kind), 5000, {
            run_guarded(handler.as_ref(), request.job, &scheduler).await
        });
        let response = match result {
            Ok(output) => ComputeResponse::success(request.id, output),
            Err(err) => ComputeResponse::failure(request.id, WireError::from(&err)),
        };
        send_response(&events, &response);
        let _ = done.send(request.id);
    });

    Some((id, token))
}

fn send_response(events: &UnboundedSender<WorkerEvent>, response: &ComputeResponse) {
    let frame = match serde_json::to_string(response) {
        Ok(frame) => frame,
        Err(e) => {
            log::error!("WORKER: failed to encode response {}: {}", response.id, e);
            let fallback = ComputeResponse::failure(
                response.id,
                WireError {
                    message: format!("failed to encode response: {}", e),
                    trace: None,
                },
            );
            match serde_json::to_string(&fallback) {
                Ok(frame) => frame,
                Err(_) => return,
            }
        }
    };
    let _ = events.send(WorkerEvent::Response(frame));
}
