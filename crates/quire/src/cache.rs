//! In-memory cache of decrypted content.
//!
//! Entries are keyed by account and file, so one account never sees
//! plaintext decrypted for another. Bounded; the oldest entry goes first.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use quire_core::{AccountAddress, ObjectId};

type Key = (AccountAddress, ObjectId);

#[derive(Debug)]
pub(crate) struct ContentCache {
    entries: HashMap<Key, Arc<Vec<u8>>>,
    order: VecDeque<Key>,
    capacity: usize,
}

impl ContentCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    pub(crate) fn get(&self, account: &AccountAddress, file_id: &ObjectId) -> Option<Arc<Vec<u8>>> {
        self.entries.get(&(*account, *file_id)).cloned()
    }

    pub(crate) fn insert(&mut self, account: AccountAddress, file_id: ObjectId, content: Arc<Vec<u8>>) {
        if self.capacity == 0 {
            return;
        }
        let key = (account, file_id);
        if self.entries.insert(key, content).is_none() {
            self.order.push_back(key);
        }
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
