use std::collections::HashMap;
use std::time::Instant;

use log::{debug, info, warn};

use crate::core::completion::CompletionPolicy;
use crate::core::executor::TaskExecutor;
use crate::core::fault::{FailureClass, FaultPolicy};
use crate::core::item::{ItemProcessor, ItemReader, ItemStream, ItemWriter};
use crate::core::listener::{ChunkListener, SkipListener, StepListener};
use crate::core::repository::JobRepository;
use crate::core::step::{Step, StepExecution, StepProperties, StepStatus};
use crate::core::transaction::{Transaction, TransactionManager};
use crate::error::BatchError;

#[derive(Debug, PartialEq, Eq)]
pub enum ChunkStatus {
    /// More items may still be read into this chunk.
    Continuable,
    /// The completion policy declared the chunk full.
    Full,
    /// The reader signaled end-of-data while this chunk was open.
    Finished,
}

/// The items read for one chunk cycle. Owned by that cycle and discarded
/// after its commit or rollback.
pub struct Chunk<I> {
    items: Vec<I>,
    status: ChunkStatus,
}

impl<I> Chunk<I> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            status: ChunkStatus::Continuable,
        }
    }

    pub fn push(&mut self, item: I) {
        self.items.push(item);
    }

    pub fn mark_full(&mut self) {
        self.status = ChunkStatus::Full;
    }

    pub fn finish(&mut self) {
        self.status = ChunkStatus::Finished;
    }

    pub fn items(&self) -> &[I] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.status == ChunkStatus::Finished
    }

    pub fn status(&self) -> &ChunkStatus {
        &self.status
    }
}

impl<I> Default for Chunk<I> {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-item bookkeeping kept while a chunk is being recovered item by item.
#[derive(Debug, Default)]
pub struct ItemOutcome {
    pub attempts: usize,
    pub last_failure: Option<String>,
    pub skipped: bool,
}

/// Bounded cache of [`ItemOutcome`]s, keyed by the item's position in the
/// chunk. The bound guards against a chunk where every item keeps failing:
/// exceeding the capacity is a fatal error rather than unbounded growth.
pub struct OutcomeCache {
    capacity: usize,
    entries: HashMap<usize, ItemOutcome>,
}

impl OutcomeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
        }
    }

    /// Records one failed attempt for the item at `index` and returns its
    /// updated attempt count.
    pub fn record_failure(&mut self, index: usize, error: &BatchError) -> Result<usize, BatchError> {
        if !self.entries.contains_key(&index) && self.entries.len() >= self.capacity {
            return Err(BatchError::Step(format!(
                "retry cache capacity {} exceeded",
                self.capacity
            )));
        }
        let outcome = self.entries.entry(index).or_default();
        outcome.attempts += 1;
        outcome.last_failure = Some(error.to_string());
        Ok(outcome.attempts)
    }

    pub fn mark_skipped(&mut self, index: usize) {
        self.entries.entry(index).or_default().skipped = true;
    }

    pub fn is_skipped(&self, index: usize) -> bool {
        self.entries.get(&index).is_some_and(|o| o.skipped)
    }

    pub fn attempts(&self, index: usize) -> usize {
        self.entries.get(&index).map_or(0, |o| o.attempts)
    }
}

/// A step that drives the chunk-oriented execution loop: repeated
/// read-process-write cycles under transactional control until the source
/// is exhausted or a stop is requested.
pub struct ChunkOrientedStep<'a, I, O> {
    pub(crate) properties: StepProperties,
    pub(crate) reader: &'a dyn ItemReader<I>,
    pub(crate) processor: &'a dyn ItemProcessor<I, O>,
    pub(crate) writer: &'a dyn ItemWriter<O>,
    pub(crate) completion_policy: Box<dyn CompletionPolicy + 'a>,
    pub(crate) fault_policy: Option<FaultPolicy>,
    pub(crate) transaction_manager: &'a dyn TransactionManager,
    pub(crate) task_executor: &'a dyn TaskExecutor,
    pub(crate) streams: Vec<&'a dyn ItemStream>,
    pub(crate) step_listeners: Vec<&'a dyn StepListener>,
    pub(crate) chunk_listeners: Vec<&'a dyn ChunkListener>,
    pub(crate) skip_listeners: Vec<&'a dyn SkipListener<I, O>>,
    pub(crate) job_repository: Option<&'a dyn JobRepository>,
}

impl<I, O> Step for ChunkOrientedStep<'_, I, O> {
    fn name(&self) -> &str {
        &self.properties.name
    }

    fn execute(&self, execution: &mut StepExecution) -> Result<(), BatchError> {
        if !self.properties.claim_start()? {
            debug!(
                "Step {} already complete and restart not allowed, skipping",
                self.properties.name
            );
            execution.status = StepStatus::Success;
            return Ok(());
        }

        execution.status = StepStatus::Starting;
        let start_time = Instant::now();
        execution.start_time = start_time;

        info!(
            "Start of step: {}, id: {}",
            self.properties.name, execution.id
        );

        let mut result = Ok(());
        for stream in &self.streams {
            if result.is_ok() {
                result = stream.open(&mut execution.execution_context);
            }
        }
        if result.is_ok() {
            result = self.writer.open();
        }
        if result.is_ok() {
            for listener in &self.step_listeners {
                listener.before_step(execution);
            }
            execution.status = StepStatus::Started;
            result = self.do_execute(execution);
        }

        if let Err(error) = result {
            if !execution.status.is_failure() {
                execution.status = StepStatus::Failed;
            }
            execution.failure = Some(error);
        }

        Self::manage_error(self.writer.close());
        for stream in &self.streams {
            Self::manage_error(stream.close());
        }
        for listener in &self.step_listeners {
            listener.after_step(execution);
        }

        execution.end_time = Instant::now();
        execution.duration = start_time.elapsed();

        if let Some(repository) = self.job_repository {
            Self::manage_error(repository.update(execution));
        }

        info!(
            "End of step: {}, id: {}, status: {:?}",
            self.properties.name, execution.id, execution.status
        );

        if execution.failure.is_some() {
            Err(BatchError::Step(self.properties.name.clone()))
        } else {
            if execution.status == StepStatus::Success {
                self.properties.mark_complete();
            }
            Ok(())
        }
    }
}

impl<'a, I, O> ChunkOrientedStep<'a, I, O> {
    pub fn is_fault_tolerant(&self) -> bool {
        self.fault_policy.is_some()
    }

    /// Runs chunk cycles until end-of-data, a stop request, or an
    /// unrecoverable failure.
    fn do_execute(&self, execution: &mut StepExecution) -> Result<(), BatchError> {
        loop {
            // Stop requests only take effect between chunk cycles, so an
            // in-flight chunk always reaches a commit or rollback decision.
            if execution.is_stop_requested() {
                info!("Stop requested, ending step {}", self.properties.name);
                execution.status = StepStatus::Stopped;
                return Ok(());
            }

            let tx = self.transaction_manager.begin()?;
            for listener in &self.chunk_listeners {
                listener.before_chunk(execution);
            }

            let chunk = match self.read_chunk(execution) {
                Ok(chunk) => chunk,
                Err(error) => return self.fail_chunk(execution, tx, error),
            };

            if chunk.is_empty() && chunk.is_finished() {
                self.commit(execution, tx)?;
                // the empty scope still closes the listener pair
                for listener in &self.chunk_listeners {
                    listener.after_chunk(execution);
                }
                execution.status = StepStatus::Success;
                return Ok(());
            }

            let finished = chunk.is_finished();

            // PROCESS runs through the task executor; the executor contract
            // guarantees the whole phase has completed once it returns.
            let mut processed = None;
            self.task_executor.execute(Box::new(|| {
                processed = Some(self.process_chunk(execution, chunk.items()));
            }));
            let (outputs, origins) = match processed {
                Some(Ok(result)) => result,
                Some(Err(error)) => return self.fail_chunk(execution, tx, error),
                None => {
                    let error = BatchError::Step("task executor dropped the process phase".into());
                    return self.fail_chunk(execution, tx, error);
                }
            };

            match self.write_chunk(execution, tx, &outputs, chunk.items(), &origins) {
                Ok(Some(tx)) => self.commit(execution, tx)?,
                // Single-item recovery already demarcated its own scopes.
                Ok(None) => {}
                Err(error) => {
                    for listener in &self.chunk_listeners {
                        listener.on_chunk_error(execution, &error);
                    }
                    return Err(error);
                }
            }

            for listener in &self.chunk_listeners {
                listener.after_chunk(execution);
            }
            self.save_progress(execution)?;

            if finished {
                execution.status = StepStatus::Success;
                return Ok(());
            }
        }
    }

    /// Reads items into a fresh chunk until the completion policy reports it
    /// full or the reader runs out of data.
    fn read_chunk(&self, execution: &mut StepExecution) -> Result<Chunk<I>, BatchError> {
        debug!("Start reading chunk");
        self.completion_policy.start();

        let mut chunk = Chunk::new();
        let mut attempts = 0;

        loop {
            match self.reader.read() {
                Ok(Some(item)) => {
                    chunk.push(item);
                    execution.read_count += 1;
                    attempts = 0;
                    self.completion_policy.update();
                    if self.completion_policy.is_complete() {
                        chunk.mark_full();
                        debug!("End reading chunk: full with {} items", chunk.len());
                        return Ok(chunk);
                    }
                }
                Ok(None) => {
                    chunk.finish();
                    debug!("End reading chunk: finished with {} items", chunk.len());
                    return Ok(chunk);
                }
                Err(error) => {
                    let Some(policy) = &self.fault_policy else {
                        execution.status = StepStatus::ReadError;
                        return Err(error);
                    };
                    if policy.should_retry(&error, attempts) {
                        attempts += 1;
                        execution.retry_count += 1;
                        warn!("Retrying read (attempt {}): {}", attempts, error);
                        continue;
                    }
                    match self.effective_class(policy, &error, execution.skip_count()) {
                        FailureClass::Skip => {
                            execution.read_skip_count += 1;
                            attempts = 0;
                            for listener in &self.skip_listeners {
                                listener.on_skip_in_read(&error);
                            }
                            warn!("Skipping unreadable item: {}", error);
                        }
                        _ => {
                            execution.status = StepStatus::ReadError;
                            return Err(error);
                        }
                    }
                }
            }
        }
    }

    /// Applies the processor to every item of the chunk, in order.
    ///
    /// Returns the surviving outputs plus, for each output, the index of the
    /// chunk item it came from (filtered and skipped items drop out, so the
    /// two sequences are not the same length as the chunk).
    fn process_chunk(
        &self,
        execution: &mut StepExecution,
        items: &[I],
    ) -> Result<(Vec<O>, Vec<usize>), BatchError> {
        debug!("Processing chunk of {} items", items.len());
        let mut outputs = Vec::with_capacity(items.len());
        let mut origins = Vec::with_capacity(items.len());

        for (index, item) in items.iter().enumerate() {
            let mut attempts = 0;
            loop {
                match self.processor.process(item) {
                    Ok(Some(output)) => {
                        outputs.push(output);
                        origins.push(index);
                        break;
                    }
                    Ok(None) => {
                        execution.filter_count += 1;
                        debug!("Item filtered by processor");
                        break;
                    }
                    Err(error) => {
                        let Some(policy) = &self.fault_policy else {
                            execution.status = StepStatus::ProcessorError;
                            return Err(error);
                        };
                        if policy.should_retry(&error, attempts) {
                            attempts += 1;
                            execution.retry_count += 1;
                            warn!("Retrying process (attempt {}): {}", attempts, error);
                            continue;
                        }
                        match self.effective_class(policy, &error, execution.skip_count()) {
                            FailureClass::Skip => {
                                execution.process_skip_count += 1;
                                for listener in &self.skip_listeners {
                                    listener.on_skip_in_process(item, &error);
                                }
                                warn!("Skipping item after processing failure: {}", error);
                                break;
                            }
                            _ => {
                                execution.status = StepStatus::ProcessorError;
                                return Err(error);
                            }
                        }
                    }
                }
            }
        }

        Ok((outputs, origins))
    }

    /// Writes the surviving items as one call, retrying the whole sequence
    /// for transient failures and falling back to single-item recovery when
    /// a failure is skippable.
    ///
    /// Returns the transaction still to be committed by the caller, or
    /// `None` when single-item recovery has already settled every scope.
    fn write_chunk<'t>(
        &'t self,
        execution: &mut StepExecution,
        tx: Box<dyn Transaction + 't>,
        outputs: &[O],
        chunk_items: &[I],
        origins: &[usize],
    ) -> Result<Option<Box<dyn Transaction + 't>>, BatchError> {
        if outputs.is_empty() {
            debug!("No items to write, skipping write call");
            return Ok(Some(tx));
        }

        debug!("Writing chunk of {} items", outputs.len());
        let mut tx = tx;
        let mut attempts = 0;

        loop {
            match self.write_attempt(outputs) {
                Ok(()) => {
                    execution.write_count += outputs.len();
                    return Ok(Some(tx));
                }
                Err(error) => {
                    let Some(policy) = &self.fault_policy else {
                        execution.status = StepStatus::WriteError;
                        self.rollback(execution, tx);
                        return Err(error);
                    };
                    if policy.should_retry(&error, attempts) {
                        attempts += 1;
                        execution.retry_count += 1;
                        warn!("Retrying chunk write (attempt {}): {}", attempts, error);
                        self.rollback(execution, tx);
                        tx = self.transaction_manager.begin()?;
                        continue;
                    }
                    match self.effective_class(policy, &error, execution.skip_count()) {
                        FailureClass::Skip => {
                            warn!("Chunk write failed, recovering item by item: {}", error);
                            self.rollback(execution, tx);
                            self.recover_chunk(execution, policy, outputs, chunk_items, origins)?;
                            return Ok(None);
                        }
                        _ => {
                            execution.status = StepStatus::WriteError;
                            self.rollback(execution, tx);
                            return Err(error);
                        }
                    }
                }
            }
        }
    }

    /// Replays a failed chunk one item at a time, each in its own
    /// transactional scope, so the failing item(s) can be identified and
    /// skipped while the rest still commit.
    fn recover_chunk(
        &self,
        execution: &mut StepExecution,
        policy: &FaultPolicy,
        outputs: &[O],
        chunk_items: &[I],
        origins: &[usize],
    ) -> Result<(), BatchError> {
        let mut cache = OutcomeCache::new(policy.cache_capacity());

        for (index, item) in outputs.iter().enumerate() {
            let mut tx = self.transaction_manager.begin()?;
            loop {
                match self.write_attempt(std::slice::from_ref(item)) {
                    Ok(()) => {
                        tx.commit()?;
                        execution.commit_count += 1;
                        execution.write_count += 1;
                        break;
                    }
                    Err(error) => {
                        let attempts = cache.record_failure(index, &error)?;
                        if policy.should_retry(&error, attempts - 1) {
                            execution.retry_count += 1;
                            warn!("Retrying single-item write (attempt {}): {}", attempts, error);
                            self.rollback(execution, tx);
                            tx = self.transaction_manager.begin()?;
                            continue;
                        }
                        match self.effective_class(policy, &error, execution.skip_count()) {
                            FailureClass::Skip => {
                                cache.mark_skipped(index);
                                execution.write_skip_count += 1;
                                self.rollback(execution, tx);
                                for listener in &self.skip_listeners {
                                    listener.on_skip_in_write(item, &error);
                                }
                                // Transactional-queue sources would otherwise
                                // redeliver the rolled-back item forever.
                                if policy.reader_transactional() {
                                    let origin = &chunk_items[origins[index]];
                                    Self::manage_error(self.reader.acknowledge(origin));
                                }
                                warn!("Skipping unwritable item: {}", error);
                                break;
                            }
                            _ => {
                                execution.status = StepStatus::WriteError;
                                self.rollback(execution, tx);
                                return Err(error);
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn write_attempt(&self, items: &[O]) -> Result<(), BatchError> {
        self.writer.write(items)?;
        self.writer.flush()
    }

    /// Effective classification once retries are off the table: a RETRY
    /// verdict means this occurrence has exhausted its retries and is
    /// reclassified against the skip limit; a SKIP verdict still has to fit
    /// under the limit.
    fn effective_class(
        &self,
        policy: &FaultPolicy,
        error: &BatchError,
        skips_so_far: usize,
    ) -> FailureClass {
        match policy.classify(error) {
            FailureClass::Retry => policy.exhausted(skips_so_far),
            FailureClass::Skip if skips_so_far < policy.skip_limit() => FailureClass::Skip,
            FailureClass::Skip => FailureClass::Fatal,
            FailureClass::Fatal => FailureClass::Fatal,
        }
    }

    fn commit(
        &self,
        execution: &mut StepExecution,
        tx: Box<dyn Transaction + '_>,
    ) -> Result<(), BatchError> {
        tx.commit().map_err(|error| {
            execution.status = StepStatus::Failed;
            error
        })?;
        execution.commit_count += 1;
        Ok(())
    }

    fn rollback(&self, execution: &mut StepExecution, tx: Box<dyn Transaction + '_>) {
        Self::manage_error(tx.rollback());
        execution.rollback_count += 1;
    }

    fn fail_chunk(
        &self,
        execution: &mut StepExecution,
        tx: Box<dyn Transaction + '_>,
        error: BatchError,
    ) -> Result<(), BatchError> {
        for listener in &self.chunk_listeners {
            listener.on_chunk_error(execution, &error);
        }
        self.rollback(execution, tx);
        Err(error)
    }

    /// Persists the committed chunk boundary: counters into the execution
    /// context, stream checkpoints, and a job-repository update.
    fn save_progress(&self, execution: &mut StepExecution) -> Result<(), BatchError> {
        let name = self.properties.name.clone();
        let (read, write, commits) = (
            execution.read_count,
            execution.write_count,
            execution.commit_count,
        );
        let ctx = &mut execution.execution_context;
        ctx.put_usize(&format!("{name}.read.count"), read);
        ctx.put_usize(&format!("{name}.write.count"), write);
        ctx.put_usize(&format!("{name}.chunk.count"), commits);

        for stream in &self.streams {
            stream.update(&mut execution.execution_context)?;
        }
        if let Some(repository) = self.job_repository {
            Self::manage_error(repository.update(execution));
        }
        Ok(())
    }

    fn manage_error(result: Result<(), BatchError>) {
        if let Err(error) = result {
            warn!("Non-fatal error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use anyhow::Result;

    use super::*;
    use crate::core::context::ExecutionContext;
    use crate::core::item::{ItemProcessorResult, ItemReaderResult, ItemWriterResult};
    use crate::core::repository::InMemoryJobRepository;
    use crate::core::step::{StepBuilder, StepExecution, StepStatus};
    use crate::core::transaction::ResourcelessTransactionManager;
    use crate::item::in_memory::{VecItemReader, VecItemWriter};

    struct FailingProcessor {
        fail_on: Vec<i32>,
    }

    impl ItemProcessor<i32, i32> for FailingProcessor {
        fn process(&self, item: &i32) -> ItemProcessorResult<i32> {
            if self.fail_on.contains(item) {
                Err(BatchError::ItemProcessor(format!("cannot process {item}")))
            } else {
                Ok(Some(*item))
            }
        }
    }

    struct EvenFilterProcessor;

    impl ItemProcessor<i32, i32> for EvenFilterProcessor {
        fn process(&self, item: &i32) -> ItemProcessorResult<i32> {
            if item % 2 == 0 {
                Ok(None)
            } else {
                Ok(Some(*item))
            }
        }
    }

    /// Writer that rejects its first `fail_times` write calls.
    struct FlakyWriter {
        fail_times: usize,
        calls: Cell<usize>,
        inner: VecItemWriter<i32>,
    }

    impl FlakyWriter {
        fn new(fail_times: usize) -> Self {
            Self {
                fail_times,
                calls: Cell::new(0),
                inner: VecItemWriter::new(),
            }
        }
    }

    impl ItemWriter<i32> for FlakyWriter {
        fn write(&self, items: &[i32]) -> ItemWriterResult {
            let call = self.calls.get() + 1;
            self.calls.set(call);
            if call <= self.fail_times {
                Err(BatchError::ItemWriter(format!("write attempt {call} failed")))
            } else {
                self.inner.write(items)
            }
        }
    }

    /// Writer that rejects any write containing the poison item.
    struct PoisonedWriter {
        poison: i32,
        inner: VecItemWriter<i32>,
    }

    impl ItemWriter<i32> for PoisonedWriter {
        fn write(&self, items: &[i32]) -> ItemWriterResult {
            if items.contains(&self.poison) {
                Err(BatchError::ItemWriter(format!(
                    "cannot write {}",
                    self.poison
                )))
            } else {
                self.inner.write(items)
            }
        }
    }

    /// Reader that fails exactly once, at the given zero-based read index,
    /// consuming the item at that position.
    struct FlakyReader {
        items: Vec<i32>,
        position: Cell<usize>,
        fail_at: usize,
        failed: Cell<bool>,
    }

    impl FlakyReader {
        fn new(items: Vec<i32>, fail_at: usize) -> Self {
            Self {
                items,
                position: Cell::new(0),
                fail_at,
                failed: Cell::new(false),
            }
        }
    }

    impl ItemReader<i32> for FlakyReader {
        fn read(&self) -> ItemReaderResult<i32> {
            let position = self.position.get();
            if position == self.fail_at && !self.failed.get() {
                self.failed.set(true);
                self.position.set(position + 1);
                return Err(BatchError::ItemReader("bad record".to_string()));
            }
            match self.items.get(position) {
                Some(item) => {
                    self.position.set(position + 1);
                    Ok(Some(*item))
                }
                None => Ok(None),
            }
        }
    }

    /// Reader that records which items were acknowledged back to it.
    struct AckRecordingReader {
        inner: VecItemReader<i32>,
        acked: RefCell<Vec<i32>>,
    }

    impl AckRecordingReader {
        fn new(items: Vec<i32>) -> Self {
            Self {
                inner: VecItemReader::new(items),
                acked: RefCell::new(Vec::new()),
            }
        }
    }

    impl ItemReader<i32> for AckRecordingReader {
        fn read(&self) -> ItemReaderResult<i32> {
            self.inner.read()
        }

        fn acknowledge(&self, item: &i32) -> Result<(), BatchError> {
            self.acked.borrow_mut().push(*item);
            Ok(())
        }
    }

    struct PairCountingListener {
        before: Cell<usize>,
        after: Cell<usize>,
    }

    impl ChunkListener for PairCountingListener {
        fn before_chunk(&self, _execution: &StepExecution) {
            self.before.set(self.before.get() + 1);
        }

        fn after_chunk(&self, _execution: &StepExecution) {
            self.after.set(self.after.get() + 1);
        }
    }

    struct StopAfterFirstChunk;

    impl ChunkListener for StopAfterFirstChunk {
        fn after_chunk(&self, execution: &StepExecution) {
            execution.request_stop();
        }
    }

    struct CheckpointStream {
        updates: Cell<usize>,
    }

    impl ItemStream for CheckpointStream {
        fn update(&self, ctx: &mut ExecutionContext) -> Result<(), BatchError> {
            self.updates.set(self.updates.get() + 1);
            ctx.put_usize("checkpoint.position", self.updates.get());
            Ok(())
        }
    }

    struct SkipRecorder {
        read: Cell<usize>,
        process: Cell<usize>,
        write: Cell<usize>,
    }

    impl SkipRecorder {
        fn new() -> Self {
            Self {
                read: Cell::new(0),
                process: Cell::new(0),
                write: Cell::new(0),
            }
        }
    }

    impl SkipListener<i32, i32> for SkipRecorder {
        fn on_skip_in_read(&self, _error: &BatchError) {
            self.read.set(self.read.get() + 1);
        }

        fn on_skip_in_process(&self, _item: &i32, _error: &BatchError) {
            self.process.set(self.process.get() + 1);
        }

        fn on_skip_in_write(&self, _item: &i32, _error: &BatchError) {
            self.write.set(self.write.get() + 1);
        }
    }

    #[test]
    fn writes_chunks_at_commit_interval_boundaries() -> Result<()> {
        let reader = VecItemReader::new(vec![1, 2, 3, 4, 5]);
        let writer = VecItemWriter::new();

        let step = StepBuilder::new()
            .name("boundaries")
            .reader(&reader)
            .writer(&writer)
            .chunk(2)
            .build()?;

        let mut execution = StepExecution::new("boundaries");
        step.execute(&mut execution)?;

        assert_eq!(execution.status, StepStatus::Success);
        assert_eq!(writer.writes(), vec![vec![1, 2], vec![3, 4], vec![5]]);
        assert_eq!(execution.read_count, 5);
        assert_eq!(execution.write_count, 5);
        assert_eq!(execution.commit_count, 3);
        Ok(())
    }

    #[test]
    fn empty_source_completes_without_writing() -> Result<()> {
        let reader = VecItemReader::new(Vec::<i32>::new());
        let writer = VecItemWriter::new();

        let step = StepBuilder::new()
            .name("empty")
            .reader(&reader)
            .writer(&writer)
            .chunk(2)
            .build()?;

        let mut execution = StepExecution::new("empty");
        step.execute(&mut execution)?;

        assert_eq!(execution.status, StepStatus::Success);
        assert!(writer.writes().is_empty());
        assert_eq!(execution.read_count, 0);
        Ok(())
    }

    #[test]
    fn filtered_items_are_excluded_but_not_errors() -> Result<()> {
        let reader = VecItemReader::new(vec![1, 2, 3, 4, 5]);
        let processor = EvenFilterProcessor;
        let writer = VecItemWriter::new();

        let step = StepBuilder::new()
            .name("filter")
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .chunk(2)
            .build()?;

        let mut execution = StepExecution::new("filter");
        step.execute(&mut execution)?;

        assert_eq!(execution.status, StepStatus::Success);
        assert_eq!(writer.items(), vec![1, 3, 5]);
        assert_eq!(execution.filter_count, 2);
        assert_eq!(execution.skip_count(), 0);
        Ok(())
    }

    #[test]
    fn process_failure_is_skipped_within_the_limit() -> Result<()> {
        let reader = VecItemReader::new(vec![1, 2, 3, 4, 5]);
        let processor = FailingProcessor { fail_on: vec![3] };
        let writer = VecItemWriter::new();
        let skips = SkipRecorder::new();

        let step = StepBuilder::new()
            .name("skip")
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .skip_listener(&skips)
            .chunk(2)
            .skip_limit(1)
            .build()?;

        let mut execution = StepExecution::new("skip");
        step.execute(&mut execution)?;

        assert_eq!(execution.status, StepStatus::Success);
        assert_eq!(writer.items(), vec![1, 2, 4, 5]);
        assert_eq!(execution.process_skip_count, 1);
        assert_eq!(skips.process.get(), 1);
        Ok(())
    }

    #[test]
    fn second_failure_beyond_the_skip_limit_is_fatal() -> Result<()> {
        let reader = VecItemReader::new(vec![1, 2, 3, 4, 5]);
        let processor = FailingProcessor { fail_on: vec![3, 4] };
        let writer = VecItemWriter::new();
        let manager = ResourcelessTransactionManager::new();

        let step = StepBuilder::new()
            .name("skip-exceeded")
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .transaction_manager(&manager)
            .chunk(2)
            .skip_limit(1)
            .build()?;

        let mut execution = StepExecution::new("skip-exceeded");
        let result = step.execute(&mut execution);

        assert!(result.is_err());
        assert_eq!(execution.status, StepStatus::ProcessorError);
        assert_eq!(execution.process_skip_count, 1);
        // the original cause is preserved on the execution record
        assert!(matches!(
            execution.failure,
            Some(BatchError::ItemProcessor(_))
        ));
        // the chunk in flight was rolled back, the first one committed
        assert_eq!(writer.items(), vec![1, 2]);
        assert_eq!(manager.commit_count(), 1);
        assert_eq!(manager.rollback_count(), 1);
        Ok(())
    }

    #[test]
    fn non_fault_tolerant_step_aborts_on_first_failure() -> Result<()> {
        let reader = VecItemReader::new(vec![1, 2, 3]);
        let processor = FailingProcessor { fail_on: vec![2] };
        let writer = VecItemWriter::new();

        let step = StepBuilder::new()
            .name("strict")
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .chunk(10)
            .build()?;

        let mut execution = StepExecution::new("strict");
        assert!(step.execute(&mut execution).is_err());
        assert_eq!(execution.status, StepStatus::ProcessorError);
        assert!(writer.writes().is_empty());
        Ok(())
    }

    #[test]
    fn transient_write_failures_are_retried_without_duplicates() -> Result<()> {
        let reader = VecItemReader::new(vec![1, 2, 3]);
        let writer = FlakyWriter::new(2);
        let manager = ResourcelessTransactionManager::new();

        let step = StepBuilder::new()
            .name("retry-write")
            .reader(&reader)
            .writer(&writer)
            .transaction_manager(&manager)
            .chunk(10)
            .retry_limit(2)
            .build()?;

        let mut execution = StepExecution::new("retry-write");
        step.execute(&mut execution)?;

        assert_eq!(execution.status, StepStatus::Success);
        // the chunk committed exactly once, with no duplicate visible writes
        assert_eq!(writer.inner.writes(), vec![vec![1, 2, 3]]);
        assert_eq!(execution.retry_count, 2);
        assert_eq!(execution.write_count, 3);
        assert_eq!(manager.rollback_count(), 2);
        assert_eq!(manager.commit_count(), 1);
        Ok(())
    }

    #[test]
    fn exhausted_write_retries_fail_without_a_skip_limit() -> Result<()> {
        let reader = VecItemReader::new(vec![1, 2, 3]);
        let writer = FlakyWriter::new(10);

        let step = StepBuilder::new()
            .name("retry-exhausted")
            .reader(&reader)
            .writer(&writer)
            .chunk(10)
            .retry_limit(2)
            .build()?;

        let mut execution = StepExecution::new("retry-exhausted");
        assert!(step.execute(&mut execution).is_err());
        assert_eq!(execution.status, StepStatus::WriteError);
        assert_eq!(execution.retry_count, 2);
        assert!(writer.inner.writes().is_empty());
        Ok(())
    }

    #[test]
    fn failed_chunk_write_recovers_item_by_item() -> Result<()> {
        let reader = VecItemReader::new(vec![1, 2, 3, 4, 5]);
        let writer = PoisonedWriter {
            poison: 3,
            inner: VecItemWriter::new(),
        };
        let manager = ResourcelessTransactionManager::new();
        let skips = SkipRecorder::new();

        let step = StepBuilder::new()
            .name("recover")
            .reader(&reader)
            .writer(&writer)
            .transaction_manager(&manager)
            .skip_listener(&skips)
            .chunk(10)
            .skip_limit(1)
            .build()?;

        let mut execution = StepExecution::new("recover");
        step.execute(&mut execution)?;

        assert_eq!(execution.status, StepStatus::Success);
        // every surviving item was written singly, in the original order
        assert_eq!(
            writer.inner.writes(),
            vec![vec![1], vec![2], vec![4], vec![5]]
        );
        assert_eq!(execution.write_skip_count, 1);
        assert_eq!(skips.write.get(), 1);
        // chunk rollback plus the skipped item's scope
        assert_eq!(manager.rollback_count(), 2);
        Ok(())
    }

    #[test]
    fn transactional_reader_is_acknowledged_for_write_skips() -> Result<()> {
        let reader = AckRecordingReader::new(vec![1, 2, 3, 4, 5]);
        let writer = PoisonedWriter {
            poison: 3,
            inner: VecItemWriter::new(),
        };

        let step = StepBuilder::new()
            .name("ack")
            .reader(&reader)
            .writer(&writer)
            .chunk(10)
            .skip_limit(1)
            .reader_transactional()
            .build()?;

        let mut execution = StepExecution::new("ack");
        step.execute(&mut execution)?;

        assert_eq!(execution.status, StepStatus::Success);
        assert_eq!(*reader.acked.borrow(), vec![3]);
        Ok(())
    }

    #[test]
    fn read_failure_is_skipped_and_excluded_from_the_chunk() -> Result<()> {
        let reader = FlakyReader::new(vec![1, 2, 3, 4], 2);
        let writer = VecItemWriter::new();
        let skips = SkipRecorder::new();

        let step = StepBuilder::new()
            .name("skip-read")
            .reader(&reader)
            .writer(&writer)
            .skip_listener(&skips)
            .chunk(2)
            .skip_limit(1)
            .build()?;

        let mut execution = StepExecution::new("skip-read");
        step.execute(&mut execution)?;

        assert_eq!(execution.status, StepStatus::Success);
        assert_eq!(execution.read_skip_count, 1);
        assert_eq!(skips.read.get(), 1);
        // the item at the failed position was consumed by the source
        assert_eq!(writer.items(), vec![1, 2, 4]);
        Ok(())
    }

    #[test]
    fn exhausted_retries_reclassify_to_skip() -> Result<()> {
        let reader = VecItemReader::new(vec![1, 2, 3, 4, 5]);
        let processor = FailingProcessor { fail_on: vec![3] };
        let writer = VecItemWriter::new();

        let step = StepBuilder::new()
            .name("retry-then-skip")
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .chunk(5)
            .retry_limit(2)
            .skip_limit(1)
            .build()?;

        let mut execution = StepExecution::new("retry-then-skip");
        step.execute(&mut execution)?;

        assert_eq!(execution.status, StepStatus::Success);
        assert_eq!(execution.retry_count, 2);
        assert_eq!(execution.process_skip_count, 1);
        assert_eq!(writer.items(), vec![1, 2, 4, 5]);
        Ok(())
    }

    #[test]
    fn fatal_tag_overrides_the_skip_limit() -> Result<()> {
        let reader = VecItemReader::new(vec![1, 2, 3]);
        let processor = FailingProcessor { fail_on: vec![2] };
        let writer = VecItemWriter::new();

        let step = StepBuilder::new()
            .name("fatal-tag")
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .chunk(10)
            .skip_limit(100)
            .fatal_error("process".into())
            .build()?;

        let mut execution = StepExecution::new("fatal-tag");
        assert!(step.execute(&mut execution).is_err());
        assert_eq!(execution.status, StepStatus::ProcessorError);
        assert_eq!(execution.skip_count(), 0);
        Ok(())
    }

    #[test]
    fn stop_request_takes_effect_between_chunks() -> Result<()> {
        let reader = VecItemReader::new((1..=10).collect());
        let writer = VecItemWriter::new();
        let stopper = StopAfterFirstChunk;

        let step = StepBuilder::new()
            .name("stop")
            .reader(&reader)
            .writer(&writer)
            .chunk_listener(&stopper)
            .chunk(2)
            .build()?;

        let mut execution = StepExecution::new("stop");
        step.execute(&mut execution)?;

        assert_eq!(execution.status, StepStatus::Stopped);
        // the in-flight chunk ran to its commit before the stop applied
        assert_eq!(writer.writes(), vec![vec![1, 2]]);
        Ok(())
    }

    #[test]
    fn chunk_listener_calls_stay_paired_through_the_final_empty_chunk() -> Result<()> {
        let reader = VecItemReader::new(vec![1, 2, 3, 4]);
        let writer = VecItemWriter::new();
        let pairs = PairCountingListener {
            before: Cell::new(0),
            after: Cell::new(0),
        };

        let step = StepBuilder::new()
            .name("paired")
            .reader(&reader)
            .writer(&writer)
            .chunk_listener(&pairs)
            .chunk(2)
            .build()?;

        let mut execution = StepExecution::new("paired");
        step.execute(&mut execution)?;

        assert_eq!(execution.status, StepStatus::Success);
        // two full chunks plus the empty end-of-data chunk, every
        // before_chunk matched by an after_chunk
        assert_eq!(pairs.before.get(), 3);
        assert_eq!(pairs.after.get(), 3);
        Ok(())
    }

    #[test]
    fn progress_is_checkpointed_at_every_commit() -> Result<()> {
        let reader = VecItemReader::new(vec![1, 2, 3, 4]);
        let writer = VecItemWriter::new();
        let stream = CheckpointStream {
            updates: Cell::new(0),
        };
        let repository = InMemoryJobRepository::new();

        let step = StepBuilder::new()
            .name("checkpoint")
            .reader(&reader)
            .writer(&writer)
            .stream(&stream)
            .job_repository(&repository)
            .chunk(2)
            .build()?;

        let mut execution = StepExecution::new("checkpoint");
        step.execute(&mut execution)?;

        assert_eq!(execution.status, StepStatus::Success);
        // two full chunks plus the empty end-of-data chunk
        assert_eq!(stream.updates.get(), 2);
        let ctx = &execution.execution_context;
        assert_eq!(ctx.get_usize("checkpoint.read.count"), Some(4));
        assert_eq!(ctx.get_usize("checkpoint.write.count"), Some(4));
        assert_eq!(ctx.get_usize("checkpoint.position"), Some(2));

        let last = repository.last_snapshot().unwrap();
        assert_eq!(last.status, "Success");
        assert_eq!(last.read_count, 4);
        assert_eq!(last.write_count, 4);
        Ok(())
    }

    #[test]
    fn outcome_cache_enforces_its_capacity() {
        let mut cache = OutcomeCache::new(2);
        let error = BatchError::ItemWriter("boom".to_string());
        assert_eq!(cache.record_failure(0, &error).unwrap(), 1);
        assert_eq!(cache.record_failure(0, &error).unwrap(), 2);
        assert_eq!(cache.record_failure(1, &error).unwrap(), 1);
        assert!(cache.record_failure(2, &error).is_err());

        cache.mark_skipped(1);
        assert!(cache.is_skipped(1));
        assert!(!cache.is_skipped(0));
        assert_eq!(cache.attempts(0), 2);
    }

    #[test]
    fn chunk_tracks_items_and_status() {
        let mut chunk: Chunk<i32> = Chunk::new();
        assert!(chunk.is_empty());
        assert_eq!(*chunk.status(), ChunkStatus::Continuable);

        chunk.push(7);
        chunk.mark_full();
        assert_eq!(chunk.len(), 1);
        assert_eq!(*chunk.status(), ChunkStatus::Full);
        assert!(!chunk.is_finished());

        chunk.finish();
        assert!(chunk.is_finished());
        assert_eq!(chunk.items(), &[7]);
    }
}
