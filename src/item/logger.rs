use std::fmt::Debug;

use log::info;

use crate::core::item::{ItemWriter, ItemWriterResult};

/// Writer that logs each item, useful for debugging a pipeline without a
/// real sink.
#[derive(Default)]
pub struct LoggerWriter {}

impl<T> ItemWriter<T> for LoggerWriter
where
    T: Debug,
{
    fn write(&self, items: &[T]) -> ItemWriterResult {
        items.iter().for_each(|item| info!("Record:{:?}", item));
        Ok(())
    }
}
