use crate::core::context::ExecutionContext;
use crate::error::BatchError;

/// Result of a single read attempt. `Ok(None)` signals end-of-data.
pub type ItemReaderResult<I> = Result<Option<I>, BatchError>;

/// Result of processing one item. `Ok(None)` means the item was filtered:
/// excluded from the write set as a first-class outcome, not an error.
pub type ItemProcessorResult<O> = Result<Option<O>, BatchError>;

/// Result of a write or writer lifecycle call.
pub type ItemWriterResult = Result<(), BatchError>;

/// Represents the retrieval of input for a step, one item at a time.
pub trait ItemReader<I> {
    fn read(&self) -> ItemReaderResult<I>;

    /// Acknowledges an item back to the underlying resource.
    ///
    /// Only meaningful for transactional-queue sources: when a chunk rolls
    /// back, such a source redelivers its items, and the engine calls this
    /// for items it has decided to skip so they are not redelivered forever.
    fn acknowledge(&self, _item: &I) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Business logic applied to each read item before it is written.
pub trait ItemProcessor<I, O> {
    fn process(&self, item: &I) -> ItemProcessorResult<O>;
}

/// Represents the output of a step, one chunk of items at a time.
///
/// `write` must accept the whole slice atomically; on failure the caller may
/// retry the same sequence.
pub trait ItemWriter<O> {
    fn write(&self, items: &[O]) -> ItemWriterResult;

    fn flush(&self) -> ItemWriterResult {
        Ok(())
    }

    fn open(&self) -> ItemWriterResult {
        Ok(())
    }

    fn close(&self) -> ItemWriterResult {
        Ok(())
    }
}

/// Checkpoint hooks for collaborators that carry restartable position state.
///
/// Streams registered on a step are opened before the first chunk, updated
/// after every commit (a committed chunk boundary is a valid restart point)
/// and closed when the execution ends.
pub trait ItemStream {
    fn open(&self, _ctx: &mut ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    fn update(&self, _ctx: &mut ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Processor used when none is configured: hands each item through unchanged.
pub struct PassThroughProcessor;

impl<I: Clone> ItemProcessor<I, I> for PassThroughProcessor {
    fn process(&self, item: &I) -> ItemProcessorResult<I> {
        Ok(Some(item.clone()))
    }
}
