use parking_lot::RwLock;

use crate::{Error, Row};

/// Rows held in a growable vector.
#[derive(Default)]
pub(crate) struct MemoryRows {
    rows: RwLock<Vec<Row>>,
}

impl MemoryRows {
    pub(crate) fn new(rows: Vec<Row>) -> Self {
        MemoryRows {
            rows: RwLock::new(rows),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub(crate) fn push(&self, row: Row) {
        self.rows.write().push(row);
    }

    pub(crate) fn try_get(&self, index: usize) -> Option<Row> {
        self.rows.read().get(index).cloned()
    }

    pub(crate) fn get(&self, index: usize) -> Result<Row, Error> {
        let rows = self.rows.read();
        rows.get(index).cloned().ok_or(Error::OutOfBounds {
            index,
            len: rows.len(),
        })
    }

    pub(crate) fn clear(&self) {
        self.rows.write().clear();
    }
}
