/// Runs the process phase of a chunk on behalf of the execution loop.
///
/// Contract: `execute` must run the task to completion before returning.
/// This is the join barrier between PROCESS and WRITE — a pooled
/// implementation may fan work out across workers, but it must not return
/// until every item of the chunk has been processed or failed. Chunk
/// boundaries (open, commit, rollback) never go through the executor; they
/// stay on the coordinating thread.
pub trait TaskExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + '_>);
}

/// Executor that runs the task inline on the calling thread. The default
/// when a step is built without an explicit executor.
pub struct SyncTaskExecutor;

impl TaskExecutor for SyncTaskExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + '_>) {
        task();
    }
}
