use crate::core::step::StepExecution;
use crate::error::BatchError;

/// Observes step start and end.
///
/// Listeners are observation points only: they must not fail, and the only
/// control-flow influence they are allowed is
/// [`StepExecution::request_stop`], which takes effect between chunk cycles.
pub trait StepListener {
    fn before_step(&self, _execution: &StepExecution) {}
    fn after_step(&self, _execution: &StepExecution) {}
}

/// Observes chunk boundaries.
pub trait ChunkListener {
    fn before_chunk(&self, _execution: &StepExecution) {}
    fn after_chunk(&self, _execution: &StepExecution) {}
    fn on_chunk_error(&self, _execution: &StepExecution, _error: &BatchError) {}
}

/// Observes skip events, one callback per phase.
pub trait SkipListener<I, O> {
    fn on_skip_in_read(&self, _error: &BatchError) {}
    fn on_skip_in_process(&self, _item: &I, _error: &BatchError) {}
    fn on_skip_in_write(&self, _item: &O, _error: &BatchError) {}
}
