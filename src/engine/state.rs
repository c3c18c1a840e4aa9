use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use serde::Serialize;
use tokio::sync::{mpsc::UnboundedSender, oneshot};

use crate::utils::AppInstant;

use super::{
    error::DispatchError,
    messages::{ComputeOutput, JobKind},
    worker::{ContextLink, WorkerCommand},
};

pub(crate) type Reply = Result<ComputeOutput, DispatchError>;

/// Caller-side record of a request that has been sent but not yet answered.
pub(crate) struct PendingRequest {
    /// Generation of the context the request was sent to
    pub generation: u64,
    pub kind: JobKind,
    pub reply: oneshot::Sender<Reply>,
    pub started: AppInstant,
}

/// The one auxiliary execution context a dispatcher may own.
pub(crate) struct LiveContext {
    pub generation: u64,
    commands: UnboundedSender<WorkerCommand>,
    thread: Mutex<Option<JoinHandle<()>>>,
    alive: AtomicBool,
    /// Set before a requested shutdown so the channel close is not read as a fault.
    closing: AtomicBool,
}

impl LiveContext {
    pub fn new(generation: u64, link: ContextLink) -> Self {
        Self {
            generation,
            commands: link.commands,
            thread: Mutex::new(link.thread),
            alive: AtomicBool::new(true),
            closing: AtomicBool::new(false),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Returns false if the context has already gone away.
    pub fn send(&self, command: WorkerCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Requests a graceful stop.
    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.mark_dead();
        let _ = self.commands.send(WorkerCommand::Shutdown);
    }

    pub fn take_thread(&self) -> Option<JoinHandle<()>> {
        self.thread.lock().ok().and_then(|mut guard| guard.take())
    }
}

/// Snapshot of dispatcher activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub submitted: u64,
    pub completed_remote: u64,
    pub completed_local: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub faults: u64,
    /// Frames that matched no outstanding request, or could not be read at all
    pub discarded: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub submitted: AtomicU64,
    pub completed_remote: AtomicU64,
    pub completed_local: AtomicU64,
    pub failed: AtomicU64,
    pub timeouts: AtomicU64,
    pub faults: AtomicU64,
    pub discarded: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed_remote: self.completed_remote.load(Ordering::Relaxed),
            completed_local: self.completed_local.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}
