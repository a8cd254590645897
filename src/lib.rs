//#![warn(missing_docs)]

/*!
 # Stepwise Batch

 A chunk-oriented batch execution engine for Rust. A **step** reads items
 from a source, optionally transforms them, and writes them to a sink in
 bounded chunks under transactional control, with configurable fault
 tolerance (retry and skip).

 ## Core Concepts

 - **Step:** one unit of batch work, either a simple pass-through **tasklet**
   or a full chunk-oriented read-process-write pipeline.
 - **ItemReader:** retrieval of input for a step, one item at a time.
 - **ItemProcessor:** business logic applied to each item; may filter items
   out of the write set as a first-class outcome.
 - **ItemWriter:** output of a step, one chunk of items at a time.
 - **Chunk:** a bounded batch of items processed and committed together; the
   boundary is decided by a completion policy (count, time, or custom).
 - **Fault tolerance:** a chunk-oriented step configured with retry/skip
   limits and error-tag classification absorbs transient reader, processor
   and writer failures without aborting the whole step.

 `StepBuilder` accepts all of these as independently optional inputs and
 validates the configuration as a whole at build time: contradictory input
 (a tasklet next to a reader, a skip limit without chunking, a commit
 interval next to an explicit completion policy) fails with a configuration
 error instead of being silently ignored.

 ## Getting Started

```rust
use stepwise_batch::{
    core::step::{Step, StepBuilder, StepExecution, StepStatus},
    error::BatchError,
    item::in_memory::{VecItemReader, VecItemWriter},
};

fn main() -> Result<(), BatchError> {
    let reader = VecItemReader::new(vec![1, 2, 3, 4, 5]);
    let writer = VecItemWriter::new();

    let step = StepBuilder::new()
        .name("copy-numbers")
        .reader(&reader)
        .writer(&writer)
        .chunk(2) // commit interval
        .build()?;

    let mut execution = StepExecution::new("copy-numbers");
    step.execute(&mut execution)?;

    assert_eq!(execution.status, StepStatus::Success);
    assert_eq!(execution.commit_count, 3);
    assert_eq!(writer.items(), vec![1, 2, 3, 4, 5]);
    Ok(())
}
```

 Fault tolerance is opt-in per step:

```rust,no_run
# use stepwise_batch::core::step::StepBuilder;
# use stepwise_batch::item::in_memory::{VecItemReader, VecItemWriter};
# let reader = VecItemReader::new(vec![1]);
# let writer = VecItemWriter::new();
let step = StepBuilder::new()
    .name("import")
    .reader(&reader)
    .writer(&writer)
    .chunk(100)
    .skip_limit(10)
    .retry_limit(3)
    .retryable_error("io.timeout".into())
    .skippable_error("parse".into())
    .build()
    .unwrap();
```
 */

/// Core module for batch operations
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Built-in item readers and writers
pub mod item;
