//! In-memory store. Nothing survives a restart.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{insert_sorted, select, ReadingQuery, ReadingStore};
use crate::domain::{Reading, StoreId};
use crate::error::StorageError;

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    readings: Vec<Reading>,
    next_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn append(&self, reading: Reading) -> Result<StoreId, StorageError> {
        let mut state = self.state();
        insert_sorted(&mut state.readings, reading);
        let id = StoreId(state.next_id);
        state.next_id += 1;
        Ok(id)
    }

    async fn query(&self, query: ReadingQuery) -> Result<Vec<Reading>, StorageError> {
        Ok(select(&self.state().readings, &query))
    }

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.state().readings.len())
    }
}
