use std::cell::RefCell;

use serde::Serialize;

use crate::core::step::StepExecution;
use crate::error::BatchError;

/// Persists step-execution metadata. The execution loop reports into it
/// after every commit and once more at the terminal state.
pub trait JobRepository {
    fn update(&self, execution: &StepExecution) -> Result<(), BatchError>;
}

/// Serializable point-in-time record of a step execution.
#[derive(Debug, Clone, Serialize)]
pub struct StepExecutionSnapshot {
    pub id: String,
    pub name: String,
    pub status: String,
    pub read_count: usize,
    pub write_count: usize,
    pub filter_count: usize,
    pub read_skip_count: usize,
    pub process_skip_count: usize,
    pub write_skip_count: usize,
    pub retry_count: usize,
    pub commit_count: usize,
    pub rollback_count: usize,
    pub failure: Option<String>,
}

impl StepExecutionSnapshot {
    fn from_execution(execution: &StepExecution) -> Self {
        Self {
            id: execution.id.to_string(),
            name: execution.name.clone(),
            status: format!("{:?}", execution.status),
            read_count: execution.read_count,
            write_count: execution.write_count,
            filter_count: execution.filter_count,
            read_skip_count: execution.read_skip_count,
            process_skip_count: execution.process_skip_count,
            write_skip_count: execution.write_skip_count,
            retry_count: execution.retry_count,
            commit_count: execution.commit_count,
            rollback_count: execution.rollback_count,
            failure: execution.failure.as_ref().map(|e| e.to_string()),
        }
    }
}

/// Repository that keeps every reported snapshot in memory, newest last.
#[derive(Default)]
pub struct InMemoryJobRepository {
    snapshots: RefCell<Vec<StepExecutionSnapshot>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<StepExecutionSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn last_snapshot(&self) -> Option<StepExecutionSnapshot> {
        self.snapshots.borrow().last().cloned()
    }
}

impl JobRepository for InMemoryJobRepository {
    fn update(&self, execution: &StepExecution) -> Result<(), BatchError> {
        self.snapshots
            .borrow_mut()
            .push(StepExecutionSnapshot::from_execution(execution));
        Ok(())
    }
}
