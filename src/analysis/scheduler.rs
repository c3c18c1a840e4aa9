//! Chunk-and-yield driver shared by every kernel.
//!
//! Kernels hand their iteration to a [`ChunkedScheduler`], which feeds the closure one
//! bounded slice at a time and yields back to the async runtime between slices. The
//! closure carries all state, so the output does not depend on where the boundaries
//! fall. A [`CancelToken`] is checked at each boundary.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::analysis::KernelError;
use crate::config::{DF, SchedulerSettings};

/// Cooperative cancellation flag, cheap to clone and share with the caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct ChunkedScheduler {
    settings: SchedulerSettings,
    cancel: CancelToken,
}

impl ChunkedScheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self::with_cancel(settings, CancelToken::new())
    }

    pub fn with_cancel(settings: SchedulerSettings, cancel: CancelToken) -> Self {
        Self { settings, cancel }
    }

    pub fn chunk_size(&self) -> usize {
        self.settings.chunk_size.max(1)
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn ensure_active(&self) -> Result<(), KernelError> {
        if self.cancel.is_cancelled() {
            Err(KernelError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Suspension point between two chunks.
    pub async fn checkpoint(&self) -> Result<(), KernelError> {
        self.ensure_active()?;
        tokio::task::yield_now().await;
        self.ensure_active()
    }

    /// Always slices `items` into `chunk_size` pieces. Returns the number of chunks run.
    pub async fn for_each_chunk<T, F>(&self, items: &[T], f: F) -> Result<usize, KernelError>
    where
        T: Sync,
        F: FnMut(&[T]) -> Result<(), KernelError> + Send,
    {
        self.drive(items, self.chunk_size(), f).await
    }

    /// Like [`Self::for_each_chunk`], but inputs below `yield_threshold` run in one pass.
    pub async fn for_each_batch<T, F>(&self, items: &[T], f: F) -> Result<usize, KernelError>
    where
        T: Sync,
        F: FnMut(&[T]) -> Result<(), KernelError> + Send,
    {
        let size = if items.len() < self.settings.yield_threshold {
            items.len().max(1)
        } else {
            self.chunk_size()
        };
        self.drive(items, size, f).await
    }

    async fn drive<T, F>(&self, items: &[T], size: usize, mut f: F) -> Result<usize, KernelError>
    where
        T: Sync,
        F: FnMut(&[T]) -> Result<(), KernelError> + Send,
    {
        self.ensure_active()?;

        let total = items.len().div_ceil(size);
        let mut chunks = items.chunks(size).enumerate().peekable();

        while let Some((idx, chunk)) = chunks.next() {
            f(chunk)?;

            if chunks.peek().is_some() {
                if DF.log_scheduler {
                    log::debug!("SCHEDULER: chunk {}/{} done, yielding", idx + 1, total);
                }
                self.checkpoint().await?;
            }
        }

        Ok(total)
    }
}
