use std::fmt;

use thiserror::Error;

/// Hierarchical classification tag carried by item-level failures.
///
/// A tag is a dotted path, e.g. `io` or `io.timeout`. A configured tag
/// matches an error tag when it is the same path or an ancestor of it
/// (`io` matches `io.timeout`); the depth of the configured tag is its
/// specificity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorTag(String);

impl ErrorTag {
    pub fn new(path: &str) -> Self {
        Self(path.to_string())
    }

    pub fn path(&self) -> &str {
        &self.0
    }

    /// Depth of the tag (`io.timeout` has depth 2).
    pub fn depth(&self) -> usize {
        self.0.split('.').count()
    }

    /// Returns the specificity of the match if `self` is the same tag as
    /// `other` or an ancestor of it, `None` otherwise.
    pub fn match_depth(&self, other: &ErrorTag) -> Option<usize> {
        if other.0 == self.0 || other.0.starts_with(&format!("{}.", self.0)) {
            Some(self.depth())
        } else {
            None
        }
    }
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ErrorTag {
    fn from(path: &str) -> Self {
        ErrorTag::new(path)
    }
}

/// Batch error
#[derive(Error, Debug)]
pub enum BatchError {
    /// Inconsistent or incomplete step configuration. Raised at build time
    /// only, never during execution.
    #[error("Configuration: {0}")]
    Configuration(String),

    #[error("ItemReader: {0}")]
    ItemReader(String),

    #[error("ItemProcessor: {0}")]
    ItemProcessor(String),

    #[error("ItemWriter: {0}")]
    ItemWriter(String),

    #[error("Tasklet: {0}")]
    Tasklet(String),

    #[error("Transaction: {0}")]
    Transaction(String),

    #[error("Step: {0}")]
    Step(String),

    /// Item-level failure carrying an explicit classification tag, for
    /// sources that want finer-grained retry/skip routing than the
    /// per-collaborator variants allow.
    #[error("Item [{tag}]: {message}")]
    Item { tag: ErrorTag, message: String },
}

impl BatchError {
    /// Classification tag of this error. Collaborator variants map to a
    /// fixed per-phase tag; `Item` errors carry their own.
    pub fn tag(&self) -> ErrorTag {
        match self {
            BatchError::ItemReader(_) => ErrorTag::new("read"),
            BatchError::ItemProcessor(_) => ErrorTag::new("process"),
            BatchError::ItemWriter(_) => ErrorTag::new("write"),
            BatchError::Item { tag, .. } => tag.clone(),
            BatchError::Tasklet(_) => ErrorTag::new("tasklet"),
            BatchError::Transaction(_) => ErrorTag::new("transaction"),
            BatchError::Configuration(_) => ErrorTag::new("configuration"),
            BatchError::Step(_) => ErrorTag::new("step"),
        }
    }
}
