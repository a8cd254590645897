use std::cell::Cell;

use log::debug;

use crate::error::BatchError;

/// A transactional scope opened for one chunk cycle (or one single-item
/// recovery write). The handle is consumed by either outcome.
pub trait Transaction {
    fn commit(self: Box<Self>) -> Result<(), BatchError>;
    fn rollback(self: Box<Self>) -> Result<(), BatchError>;
}

/// Demarcates the transactional scopes the execution loop runs chunks in.
///
/// Scopes are held by the coordinating thread only; workers running the
/// process phase never begin or end transactions.
pub trait TransactionManager {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, BatchError>;
}

/// Manager wired in when a step is built without one. Scopes exist only to
/// satisfy the demarcation protocol; commit and rollback do nothing.
pub struct NoopTransactionManager;

impl TransactionManager for NoopTransactionManager {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, BatchError> {
        Ok(Box::new(NoopTransaction))
    }
}

struct NoopTransaction;

impl Transaction for NoopTransaction {
    fn commit(self: Box<Self>) -> Result<(), BatchError> {
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Transaction manager with no backing resource: scopes are tracked but
/// commit and rollback do nothing.
///
/// The default manager for steps whose writers are not transactional, and
/// the one tests assert commit/rollback counts against.
#[derive(Default)]
pub struct ResourcelessTransactionManager {
    commits: Cell<usize>,
    rollbacks: Cell<usize>,
}

impl ResourcelessTransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.get()
    }

    pub fn rollback_count(&self) -> usize {
        self.rollbacks.get()
    }
}

impl TransactionManager for ResourcelessTransactionManager {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, BatchError> {
        Ok(Box::new(ResourcelessTransaction { manager: self }))
    }
}

struct ResourcelessTransaction<'a> {
    manager: &'a ResourcelessTransactionManager,
}

impl Transaction for ResourcelessTransaction<'_> {
    fn commit(self: Box<Self>) -> Result<(), BatchError> {
        self.manager.commits.set(self.manager.commits.get() + 1);
        debug!("Transaction committed (resourceless)");
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), BatchError> {
        self.manager.rollbacks.set(self.manager.rollbacks.get() + 1);
        debug!("Transaction rolled back (resourceless)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_commits_and_rollbacks() -> Result<(), BatchError> {
        let manager = ResourcelessTransactionManager::new();

        let tx = manager.begin()?;
        tx.commit()?;

        let tx = manager.begin()?;
        tx.rollback()?;

        assert_eq!(manager.commit_count(), 1);
        assert_eq!(manager.rollback_count(), 1);
        Ok(())
    }
}
