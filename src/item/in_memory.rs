use std::cell::{Cell, RefCell};

use crate::core::item::{ItemReader, ItemReaderResult, ItemWriter, ItemWriterResult};

/// Reader backed by an in-memory vector. Handy for tests and for feeding a
/// step from data already materialized in the process.
pub struct VecItemReader<I> {
    items: Vec<I>,
    position: Cell<usize>,
}

impl<I> VecItemReader<I> {
    pub fn new(items: Vec<I>) -> Self {
        Self {
            items,
            position: Cell::new(0),
        }
    }
}

impl<I: Clone> ItemReader<I> for VecItemReader<I> {
    fn read(&self) -> ItemReaderResult<I> {
        let position = self.position.get();
        match self.items.get(position) {
            Some(item) => {
                self.position.set(position + 1);
                Ok(Some(item.clone()))
            }
            None => Ok(None),
        }
    }
}

/// Writer that collects items in memory, remembering the boundaries of each
/// write call so tests can assert on chunking.
#[derive(Default)]
pub struct VecItemWriter<O> {
    writes: RefCell<Vec<Vec<O>>>,
}

impl<O: Clone> VecItemWriter<O> {
    pub fn new() -> Self {
        Self {
            writes: RefCell::new(Vec::new()),
        }
    }

    /// Every written item, in write order.
    pub fn items(&self) -> Vec<O> {
        self.writes.borrow().iter().flatten().cloned().collect()
    }

    /// The item sequences of the individual write calls.
    pub fn writes(&self) -> Vec<Vec<O>> {
        self.writes.borrow().clone()
    }
}

impl<O: Clone> ItemWriter<O> for VecItemWriter<O> {
    fn write(&self, items: &[O]) -> ItemWriterResult {
        self.writes.borrow_mut().push(items.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_yields_items_then_end_of_data() {
        let reader = VecItemReader::new(vec![1, 2]);
        assert_eq!(reader.read().unwrap(), Some(1));
        assert_eq!(reader.read().unwrap(), Some(2));
        assert_eq!(reader.read().unwrap(), None);
        assert_eq!(reader.read().unwrap(), None);
    }

    #[test]
    fn writer_records_call_boundaries() {
        let writer = VecItemWriter::new();
        writer.write(&[1, 2]).unwrap();
        writer.write(&[3]).unwrap();
        assert_eq!(writer.items(), vec![1, 2, 3]);
        assert_eq!(writer.writes(), vec![vec![1, 2], vec![3]]);
    }
}
