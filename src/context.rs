use crate::memory::{AlignedAllocator, Allocator};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Resources an iterator borrows from its caller while producing elements.
#[derive(Clone, Debug)]
pub struct IteratorContext {
    allocator: Arc<dyn Allocator>,
    runner: Option<Arc<rayon::ThreadPool>>,
    cancellation: CancellationToken,
}

impl Default for IteratorContext {
    fn default() -> Self {
        Self {
            allocator: Arc::new(AlignedAllocator),
            runner: None,
            cancellation: CancellationToken::new(),
        }
    }
}

impl IteratorContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the allocator used for output tensors.
    #[must_use]
    pub fn with_allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Sets the worker pool for parallel work. Without one, rayon's global pool
    /// is used.
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<rayon::ThreadPool>) -> Self {
        self.runner = Some(runner);
        self
    }

    #[must_use]
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    #[must_use]
    pub fn allocator(&self) -> &dyn Allocator {
        self.allocator.as_ref()
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Runs `op` in a fork/join scope on the worker pool. Returns once every
    /// task spawned in the scope has finished.
    pub fn scope<'scope, OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce(&rayon::Scope<'scope>) -> R + Send,
        R: Send,
    {
        match &self.runner {
            Some(pool) => pool.scope(op),
            None => rayon::scope(op),
        }
    }
}
