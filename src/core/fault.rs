use crate::error::{BatchError, ErrorTag};

/// Outcome of classifying an item-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Transient: re-attempt the same operation on the same item.
    Retry,
    /// Exclude the item and keep going, within the skip limit.
    Skip,
    /// Abort the step execution, rolling back the in-flight chunk.
    Fatal,
}

/// Classifies failures into retryable / skippable / fatal by matching the
/// error's [`ErrorTag`] against configured tag lists.
///
/// Matching is hierarchical: a configured `io` tag matches `io.timeout`.
/// The most specific configured match wins across all lists; on equal
/// specificity the precedence is fatal > skip > retry. An error matched by
/// none of the lists is fatal.
///
/// When no list is configured at all, classification falls back to the
/// limits: retry when a retry limit is set, else skip when a skip limit is
/// set, else fatal.
#[derive(Debug, Default)]
pub struct ErrorClassifier {
    retryable: Vec<ErrorTag>,
    skippable: Vec<ErrorTag>,
    fatal: Vec<ErrorTag>,
}

impl ErrorClassifier {
    pub fn new(retryable: Vec<ErrorTag>, skippable: Vec<ErrorTag>, fatal: Vec<ErrorTag>) -> Self {
        Self {
            retryable,
            skippable,
            fatal,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.retryable.is_empty() && self.skippable.is_empty() && self.fatal.is_empty()
    }

    fn best_match(list: &[ErrorTag], tag: &ErrorTag) -> Option<usize> {
        list.iter()
            .filter_map(|candidate| candidate.match_depth(tag))
            .max()
    }

    fn classify_by_lists(&self, error: &BatchError) -> FailureClass {
        let tag = error.tag();
        let fatal = Self::best_match(&self.fatal, &tag);
        let skip = Self::best_match(&self.skippable, &tag);
        let retry = Self::best_match(&self.retryable, &tag);

        // Deepest configured match wins; precedence breaks ties.
        let best = fatal.max(skip).max(retry);
        match best {
            Some(depth) if fatal == Some(depth) => FailureClass::Fatal,
            Some(depth) if skip == Some(depth) => FailureClass::Skip,
            Some(_) => FailureClass::Retry,
            None => FailureClass::Fatal,
        }
    }
}

/// The fault-tolerance settings of one chunk-oriented step: the classifier
/// plus the retry/skip limits it is evaluated against.
#[derive(Debug)]
pub struct FaultPolicy {
    classifier: ErrorClassifier,
    retry_limit: usize,
    skip_limit: usize,
    cache_capacity: usize,
    reader_transactional: bool,
}

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

impl FaultPolicy {
    pub fn new(
        classifier: ErrorClassifier,
        retry_limit: usize,
        skip_limit: usize,
        cache_capacity: usize,
        reader_transactional: bool,
    ) -> Self {
        Self {
            classifier,
            retry_limit,
            skip_limit,
            cache_capacity,
            reader_transactional,
        }
    }

    pub fn retry_limit(&self) -> usize {
        self.retry_limit
    }

    pub fn skip_limit(&self) -> usize {
        self.skip_limit
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }

    pub fn reader_transactional(&self) -> bool {
        self.reader_transactional
    }

    /// Classifies an error, falling back to the configured limits when no
    /// tag list was supplied.
    pub fn classify(&self, error: &BatchError) -> FailureClass {
        if self.classifier.is_empty() {
            if self.retry_limit > 0 {
                FailureClass::Retry
            } else if self.skip_limit > 0 {
                FailureClass::Skip
            } else {
                FailureClass::Fatal
            }
        } else {
            self.classifier.classify_by_lists(error)
        }
    }

    /// True while the error is retryable and the attempt count has not
    /// reached the retry limit.
    pub fn should_retry(&self, error: &BatchError, attempts: usize) -> bool {
        self.classify(error) == FailureClass::Retry && attempts < self.retry_limit
    }

    /// Reclassification applied once retries for a failure occurrence are
    /// exhausted: skip if the skip limit leaves room, else fatal.
    pub fn exhausted(&self, skips_so_far: usize) -> FailureClass {
        if skips_so_far < self.skip_limit {
            FailureClass::Skip
        } else {
            FailureClass::Fatal
        }
    }
}
