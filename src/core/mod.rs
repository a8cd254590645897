use rand::distr::{Alphanumeric, SampleString};

pub mod chunk;

pub mod completion;

pub mod context;

pub mod executor;

pub mod fault;

pub mod item;

pub mod listener;

pub mod repository;

pub mod step;

pub mod transaction;

/// Generates a random name consisting of alphanumeric characters, used when
/// a step is built without an explicit name.
///
/// # Returns
///
/// A `String` containing the generated random name.
pub(crate) fn build_name() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 8)
}
