use std::cell::Cell;
use std::time::{Duration, Instant};

use log::{debug, info};
use uuid::Uuid;

use crate::core::build_name;
use crate::core::chunk::ChunkOrientedStep;
use crate::core::completion::{CompletionPolicy, CountCompletionPolicy};
use crate::core::executor::{SyncTaskExecutor, TaskExecutor};
use crate::core::fault::{ErrorClassifier, FaultPolicy, DEFAULT_CACHE_CAPACITY};
use crate::core::item::{ItemProcessor, ItemReader, ItemStream, ItemWriter, PassThroughProcessor};
use crate::core::listener::{ChunkListener, SkipListener, StepListener};
use crate::core::repository::JobRepository;
use crate::core::transaction::{NoopTransactionManager, TransactionManager};
use crate::error::{BatchError, ErrorTag};

/// Commit interval used when neither an interval nor a completion policy is
/// configured.
pub const DEFAULT_COMMIT_INTERVAL: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Starting,
    Started,
    Success,
    Stopped,
    ReadError,
    ProcessorError,
    WriteError,
    TaskletError,
    Failed,
}

impl StepStatus {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StepStatus::ReadError
                | StepStatus::ProcessorError
                | StepStatus::WriteError
                | StepStatus::TaskletError
                | StepStatus::Failed
        )
    }
}

/// Runtime record of one execution of a step.
///
/// Counters are monotonic for the lifetime of the execution and are never
/// reset mid-run. The terminal failure, if any, is attached here unmodified
/// so it is never swallowed by the `Step`-level error the caller receives.
pub struct StepExecution {
    /// Unique identifier for this execution
    pub id: Uuid,
    /// Name of the step being executed
    pub name: String,
    pub status: StepStatus,
    pub start_time: Instant,
    pub end_time: Instant,
    pub duration: Duration,
    /// Number of items successfully read
    pub read_count: usize,
    /// Number of items successfully written
    pub write_count: usize,
    /// Number of items filtered out by the processor
    pub filter_count: usize,
    pub read_skip_count: usize,
    pub process_skip_count: usize,
    pub write_skip_count: usize,
    /// Number of retried operations across all phases
    pub retry_count: usize,
    pub commit_count: usize,
    pub rollback_count: usize,
    /// Restartable progress state, persisted at every committed chunk boundary
    pub execution_context: crate::core::context::ExecutionContext,
    /// The original causing error of a failed execution
    pub failure: Option<BatchError>,
    stop_requested: Cell<bool>,
}

impl StepExecution {
    pub fn new(name: &str) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: StepStatus::Starting,
            start_time: now,
            end_time: now,
            duration: Duration::ZERO,
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            retry_count: 0,
            commit_count: 0,
            rollback_count: 0,
            execution_context: crate::core::context::ExecutionContext::new(),
            failure: None,
            stop_requested: Cell::new(false),
        }
    }

    /// Total skips across the read, process and write phases.
    pub fn skip_count(&self) -> usize {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    /// Asks the step to stop. Honored between chunk cycles only; the chunk
    /// in flight still runs to a commit or rollback decision.
    pub fn request_stop(&self) {
        self.stop_requested.set(true);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.get()
    }
}

/// One unit of batch work, executed once per job run.
pub trait Step {
    fn name(&self) -> &str;

    /// Executes the step, reporting progress and outcome into `execution`.
    fn execute(&self, execution: &mut StepExecution) -> Result<(), BatchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    /// The tasklet wants another execution cycle.
    Continuable,
    /// The tasklet has finished.
    Finished,
}

/// An arbitrary unit of work invoked once per step execution cycle, for
/// steps that do not fit the chunk-oriented read-process-write shape.
pub trait Tasklet {
    fn execute(&self, execution: &StepExecution) -> Result<RepeatStatus, BatchError>;
}

/// Generic knobs shared by both step kinds, plus the start bookkeeping they
/// imply.
pub struct StepProperties {
    pub name: String,
    /// Maximum number of starts of this step instance; 0 means unlimited.
    pub start_limit: usize,
    pub allow_start_if_complete: bool,
    executions: Cell<usize>,
    completed: Cell<bool>,
}

impl StepProperties {
    pub(crate) fn new(name: String, start_limit: usize, allow_start_if_complete: bool) -> Self {
        Self {
            name,
            start_limit,
            allow_start_if_complete,
            executions: Cell::new(0),
            completed: Cell::new(false),
        }
    }

    /// Returns false when a completed step is re-executed without
    /// allow-start-if-complete (a no-op success), fails once the start
    /// limit is exhausted, and otherwise claims one start.
    pub(crate) fn claim_start(&self) -> Result<bool, BatchError> {
        if self.completed.get() && !self.allow_start_if_complete {
            return Ok(false);
        }
        if self.start_limit > 0 && self.executions.get() >= self.start_limit {
            return Err(BatchError::Step(format!(
                "start limit {} exceeded for step {}",
                self.start_limit, self.name
            )));
        }
        self.executions.set(self.executions.get() + 1);
        Ok(true)
    }

    pub(crate) fn mark_complete(&self) {
        self.completed.set(true);
    }
}

/// A step wrapping a single tasklet, driven in repeated transactional
/// cycles until the tasklet reports [`RepeatStatus::Finished`].
pub struct TaskletStep<'a> {
    pub(crate) properties: StepProperties,
    pub(crate) tasklet: &'a dyn Tasklet,
    pub(crate) transaction_manager: &'a dyn TransactionManager,
    pub(crate) step_listeners: Vec<&'a dyn StepListener>,
    pub(crate) job_repository: Option<&'a dyn JobRepository>,
}

impl Step for TaskletStep<'_> {
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
        for listener in &self.step_listeners {
            listener.before_step(execution);
        }
        execution.status = StepStatus::Started;

        loop {
            if execution.is_stop_requested() {
                execution.status = StepStatus::Stopped;
                break;
            }
            let tx = match self.transaction_manager.begin() {
                Ok(tx) => tx,
                Err(error) => {
                    execution.status = StepStatus::Failed;
                    execution.failure = Some(error);
                    break;
                }
            };
            match self.tasklet.execute(execution) {
                Ok(repeat) => {
                    if let Err(error) = tx.commit() {
                        execution.status = StepStatus::Failed;
                        execution.failure = Some(error);
                        break;
                    }
                    execution.commit_count += 1;
                    if repeat == RepeatStatus::Finished {
                        execution.status = StepStatus::Success;
                        break;
                    }
                }
                Err(error) => {
                    if let Err(rollback_error) = tx.rollback() {
                        log::warn!("Non-fatal error: {}", rollback_error);
                    }
                    execution.rollback_count += 1;
                    execution.status = StepStatus::TaskletError;
                    execution.failure = Some(error);
                    break;
                }
            }
        }

        for listener in &self.step_listeners {
            listener.after_step(execution);
        }
        execution.end_time = Instant::now();
        execution.duration = start_time.elapsed();
        if let Some(repository) = self.job_repository {
            if let Err(error) = repository.update(execution) {
                log::warn!("Non-fatal error: {}", error);
            }
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

/// The runnable product of [`StepBuilder::build`]: either a tasklet step or
/// a chunk-oriented step.
pub enum StepInstance<'a, I = (), O = ()> {
    Tasklet(TaskletStep<'a>),
    ChunkOriented(ChunkOrientedStep<'a, I, O>),
}

impl<I, O> StepInstance<'_, I, O> {
    pub fn is_fault_tolerant(&self) -> bool {
        match self {
            StepInstance::Tasklet(_) => false,
            StepInstance::ChunkOriented(step) => step.is_fault_tolerant(),
        }
    }
}

impl<I, O> Step for StepInstance<'_, I, O> {
    fn name(&self) -> &str {
        match self {
            StepInstance::Tasklet(step) => step.name(),
            StepInstance::ChunkOriented(step) => step.name(),
        }
    }

    fn execute(&self, execution: &mut StepExecution) -> Result<(), BatchError> {
        match self {
            StepInstance::Tasklet(step) => step.execute(execution),
            StepInstance::ChunkOriented(step) => step.execute(execution),
        }
    }
}

/// Builder for both step kinds.
///
/// Every field is independently optional; `build` validates the whole
/// configuration at once and decides which step kind to assemble, so
/// contradictory input fails loudly instead of being ignored.
pub struct StepBuilder<'a, I = (), O = ()> {
    name: Option<String>,
    start_limit: usize,
    allow_start_if_complete: bool,
    tasklet: Option<&'a dyn Tasklet>,
    reader: Option<&'a dyn ItemReader<I>>,
    processor: Option<&'a dyn ItemProcessor<I, O>>,
    writer: Option<&'a dyn ItemWriter<O>>,
    commit_interval: Option<usize>,
    completion_policy: Option<Box<dyn CompletionPolicy + 'a>>,
    skip_limit: Option<usize>,
    retry_limit: Option<usize>,
    cache_capacity: Option<usize>,
    reader_transactional: bool,
    retryable_errors: Vec<ErrorTag>,
    skippable_errors: Vec<ErrorTag>,
    fatal_errors: Vec<ErrorTag>,
    transaction_manager: Option<&'a dyn TransactionManager>,
    task_executor: Option<&'a dyn TaskExecutor>,
    job_repository: Option<&'a dyn JobRepository>,
    streams: Vec<&'a dyn ItemStream>,
    step_listeners: Vec<&'a dyn StepListener>,
    chunk_listeners: Vec<&'a dyn ChunkListener>,
    skip_listeners: Vec<&'a dyn SkipListener<I, O>>,
}

impl<'a, I, O> Default for StepBuilder<'a, I, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, I, O> StepBuilder<'a, I, O> {
    pub fn new() -> Self {
        Self {
            name: None,
            start_limit: 0,
            allow_start_if_complete: false,
            tasklet: None,
            reader: None,
            processor: None,
            writer: None,
            commit_interval: None,
            completion_policy: None,
            skip_limit: None,
            retry_limit: None,
            cache_capacity: None,
            reader_transactional: false,
            retryable_errors: Vec::new(),
            skippable_errors: Vec::new(),
            fatal_errors: Vec::new(),
            transaction_manager: None,
            task_executor: None,
            job_repository: None,
            streams: Vec::new(),
            step_listeners: Vec::new(),
            chunk_listeners: Vec::new(),
            skip_listeners: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn start_limit(mut self, start_limit: usize) -> Self {
        self.start_limit = start_limit;
        self
    }

    pub fn allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }

    pub fn tasklet(mut self, tasklet: &'a dyn Tasklet) -> Self {
        self.tasklet = Some(tasklet);
        self
    }

    pub fn reader(mut self, reader: &'a dyn ItemReader<I>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn processor(mut self, processor: &'a dyn ItemProcessor<I, O>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn writer(mut self, writer: &'a dyn ItemWriter<O>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Sets the commit interval: the chunk closes after this many
    /// successfully read items.
    pub fn chunk(mut self, commit_interval: usize) -> Self {
        self.commit_interval = Some(commit_interval);
        self
    }

    pub fn completion_policy(mut self, policy: Box<dyn CompletionPolicy + 'a>) -> Self {
        self.completion_policy = Some(policy);
        self
    }

    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_limit = Some(skip_limit);
        self
    }

    pub fn retry_limit(mut self, retry_limit: usize) -> Self {
        self.retry_limit = Some(retry_limit);
        self
    }

    pub fn cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = Some(cache_capacity);
        self
    }

    /// Marks the reader as a transactional queue: rolled-back reads are
    /// redelivered by the source, so skipped items must be acknowledged
    /// back to it.
    pub fn reader_transactional(mut self) -> Self {
        self.reader_transactional = true;
        self
    }

    pub fn retryable_error(mut self, tag: ErrorTag) -> Self {
        self.retryable_errors.push(tag);
        self
    }

    pub fn skippable_error(mut self, tag: ErrorTag) -> Self {
        self.skippable_errors.push(tag);
        self
    }

    pub fn fatal_error(mut self, tag: ErrorTag) -> Self {
        self.fatal_errors.push(tag);
        self
    }

    pub fn transaction_manager(mut self, manager: &'a dyn TransactionManager) -> Self {
        self.transaction_manager = Some(manager);
        self
    }

    pub fn task_executor(mut self, executor: &'a dyn TaskExecutor) -> Self {
        self.task_executor = Some(executor);
        self
    }

    pub fn job_repository(mut self, repository: &'a dyn JobRepository) -> Self {
        self.job_repository = Some(repository);
        self
    }

    pub fn stream(mut self, stream: &'a dyn ItemStream) -> Self {
        self.streams.push(stream);
        self
    }

    pub fn listener(mut self, listener: &'a dyn StepListener) -> Self {
        self.step_listeners.push(listener);
        self
    }

    pub fn chunk_listener(mut self, listener: &'a dyn ChunkListener) -> Self {
        self.chunk_listeners.push(listener);
        self
    }

    pub fn skip_listener(mut self, listener: &'a dyn SkipListener<I, O>) -> Self {
        self.skip_listeners.push(listener);
        self
    }

    fn has_fault_tolerance_input(&self) -> bool {
        self.skip_limit.is_some()
            || self.retry_limit.is_some()
            || self.cache_capacity.is_some()
            || self.reader_transactional
            || !self.retryable_errors.is_empty()
            || !self.skippable_errors.is_empty()
            || !self.fatal_errors.is_empty()
    }

    /// Validates the configuration as a whole and assembles the step.
    ///
    /// Deterministic and free of I/O: the result is a pure function of the
    /// configured fields, evaluated in a fixed order with the first
    /// inconsistency winning.
    pub fn build(self) -> Result<StepInstance<'a, I, O>, BatchError>
    where
        PassThroughProcessor: ItemProcessor<I, O>,
    {
        let fault_tolerant = self.has_fault_tolerance_input();

        if self.tasklet.is_none() && self.reader.is_none() && self.writer.is_none() {
            return Err(BatchError::Configuration(
                "nothing configured: supply a tasklet or a reader/writer pair".to_string(),
            ));
        }

        if fault_tolerant && (self.reader.is_none() || self.writer.is_none()) {
            return Err(BatchError::Configuration(
                "fault-tolerance settings require full reader/processor/writer chunking"
                    .to_string(),
            ));
        }

        let name = self.name.unwrap_or_else(build_name);
        let properties = StepProperties::new(name, self.start_limit, self.allow_start_if_complete);
        let transaction_manager = self
            .transaction_manager
            .unwrap_or(&NoopTransactionManager);

        if let Some(tasklet) = self.tasklet {
            if self.reader.is_some() || self.processor.is_some() || self.writer.is_some() {
                return Err(BatchError::Configuration(
                    "ambiguous step: both a tasklet and a chunk pipeline supplied".to_string(),
                ));
            }
            if self.commit_interval.is_some() || self.completion_policy.is_some() {
                return Err(BatchError::Configuration(
                    "chunking settings are not applicable to a tasklet step".to_string(),
                ));
            }
            return Ok(StepInstance::Tasklet(TaskletStep {
                properties,
                tasklet,
                transaction_manager,
                step_listeners: self.step_listeners,
                job_repository: self.job_repository,
            }));
        }

        let (Some(reader), Some(writer)) = (self.reader, self.writer) else {
            return Err(BatchError::Configuration(
                "a chunk-oriented step requires both a reader and a writer".to_string(),
            ));
        };

        if self.commit_interval.is_some() && self.completion_policy.is_some() {
            return Err(BatchError::Configuration(
                "commit-interval and an explicit completion policy are mutually exclusive"
                    .to_string(),
            ));
        }
        let completion_policy = match self.completion_policy {
            Some(policy) => policy,
            None => Box::new(CountCompletionPolicy::new(
                self.commit_interval.unwrap_or(DEFAULT_COMMIT_INTERVAL),
            )),
        };

        let fault_policy = if fault_tolerant {
            Some(FaultPolicy::new(
                ErrorClassifier::new(
                    self.retryable_errors,
                    self.skippable_errors,
                    self.fatal_errors,
                ),
                self.retry_limit.unwrap_or(0),
                self.skip_limit.unwrap_or(0),
                self.cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY),
                self.reader_transactional,
            ))
        } else {
            None
        };

        Ok(StepInstance::ChunkOriented(ChunkOrientedStep {
            properties,
            reader,
            processor: self.processor.unwrap_or(&PassThroughProcessor),
            writer,
            completion_policy,
            fault_policy,
            transaction_manager,
            task_executor: self.task_executor.unwrap_or(&SyncTaskExecutor),
            streams: self.streams,
            step_listeners: self.step_listeners,
            chunk_listeners: self.chunk_listeners,
            skip_listeners: self.skip_listeners,
            job_repository: self.job_repository,
        }))
    }
}
