mod core;
mod dispatcher;
mod error;
mod handler;
mod messages;
mod state;
mod worker;

pub use self::core::ComputeEngine;
pub use dispatcher::TaskDispatcher;
pub use error::DispatchError;
pub use handler::{ComputeHandler, KernelSuite};
pub use messages::{
    ComputeJob, ComputeOutput, ComputeRequest, ComputeResponse, EventQuery, JobKind, RequestId,
    TradeQuery, WireError, peek_id,
};
pub use state::DispatcherStats;
pub use worker::{ContextLink, ContextSpawner, ThreadSpawner, WorkerCommand, WorkerEvent, run_context};
