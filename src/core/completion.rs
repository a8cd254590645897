use std::cell::Cell;
use std::time::{Duration, Instant};

/// Decides when the chunk being read is full and should be committed.
///
/// The execution loop calls `start` when it opens a chunk, `update` after
/// every successful read, and `is_complete` to decide whether to stop
/// reading. Implementations use interior mutability so the loop can hold
/// them behind a shared reference.
pub trait CompletionPolicy {
    /// A new chunk is starting.
    fn start(&self);

    /// One item was successfully read into the current chunk.
    fn update(&self);

    fn is_complete(&self) -> bool;
}

/// Completes a chunk after a fixed number of items (the commit interval).
pub struct CountCompletionPolicy {
    commit_interval: usize,
    count: Cell<usize>,
}

impl CountCompletionPolicy {
    pub fn new(commit_interval: usize) -> Self {
        Self {
            commit_interval: commit_interval.max(1),
            count: Cell::new(0),
        }
    }
}

impl CompletionPolicy for CountCompletionPolicy {
    fn start(&self) {
        self.count.set(0);
    }

    fn update(&self) {
        self.count.set(self.count.get() + 1);
    }

    fn is_complete(&self) -> bool {
        self.count.get() >= self.commit_interval
    }
}

/// Completes a chunk once it has been open for longer than the timeout.
///
/// Useful for trickle-feed sources where waiting for a full count would hold
/// a transaction open too long.
pub struct TimeoutCompletionPolicy {
    timeout: Duration,
    opened_at: Cell<Option<Instant>>,
}

impl TimeoutCompletionPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            opened_at: Cell::new(None),
        }
    }
}

impl CompletionPolicy for TimeoutCompletionPolicy {
    fn start(&self) {
        self.opened_at.set(Some(Instant::now()));
    }

    fn update(&self) {}

    fn is_complete(&self) -> bool {
        match self.opened_at.get() {
            Some(opened_at) => opened_at.elapsed() >= self.timeout,
            None => false,
        }
    }
}

/// Completes a chunk as soon as any of the delegate policies does.
pub struct CompositeCompletionPolicy {
    policies: Vec<Box<dyn CompletionPolicy>>,
}

impl CompositeCompletionPolicy {
    pub fn new(policies: Vec<Box<dyn CompletionPolicy>>) -> Self {
        Self { policies }
    }
}

impl CompletionPolicy for CompositeCompletionPolicy {
    fn start(&self) {
        for policy in &self.policies {
            policy.start();
        }
    }

    fn update(&self) {
        for policy in &self.policies {
            policy.update();
        }
    }

    fn is_complete(&self) -> bool {
        self.policies.iter().any(|policy| policy.is_complete())
    }
}
