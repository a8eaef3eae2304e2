use super::{ConfigStore, Filter, StoreError};
use crate::config_tree::{ConfigTree, EditTransaction, QueryResult};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// In-process [`ConfigStore`] used by tests and the `mock` feature.
///
/// Behaves like the daemon: queries return the selected configs, applies are
/// all-or-nothing. Faults can be queued to simulate a store that refuses,
/// times out, or commits but never answers.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    tree: ConfigTree,
    applied: Vec<EditTransaction>,
    query_faults: VecDeque<StoreError>,
    apply_faults: VecDeque<ApplyFault>,
}

enum ApplyFault {
    Fail(StoreError),
    CommitThenFail(StoreError),
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with `edit`, which is not counted as applied.
    pub fn with_edit(edit: EditTransaction) -> Self {
        let store = Self::new();
        store.lock().tree.merge(edit.into_tree());
        store
    }

    pub fn fail_next_query(&self, err: StoreError) {
        self.lock().query_faults.push_back(err);
    }

    /// The next apply changes nothing and returns `err`.
    pub fn fail_next_apply(&self, err: StoreError) {
        self.lock().apply_faults.push_back(ApplyFault::Fail(err));
    }

    /// The next apply is committed but the caller still sees `err`.
    pub fn commit_then_fail_next_apply(&self, err: StoreError) {
        self.lock()
            .apply_faults
            .push_back(ApplyFault::CommitThenFail(err));
    }

    /// Transactions committed so far, in order.
    pub fn applied(&self) -> Vec<EditTransaction> {
        self.lock().applied.clone()
    }

    pub fn snapshot(&self) -> QueryResult {
        QueryResult::new(self.lock().tree.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn commit(&mut self, edit: EditTransaction) {
        self.tree.merge(edit.clone().into_tree());
        self.applied.push(edit);
    }
}

impl ConfigStore for MemoryStore {
    async fn query(&self, filter: Filter) -> Result<QueryResult, StoreError> {
        let mut inner = self.lock();
        if let Some(err) = inner.query_faults.pop_front() {
            return Err(err);
        }
        Ok(QueryResult::new(
            inner.tree.selected(|config| filter.includes(config)),
        ))
    }

    async fn apply(&self, edit: EditTransaction) -> Result<(), StoreError> {
        let mut inner = self.lock();
        match inner.apply_faults.pop_front() {
            Some(ApplyFault::Fail(err)) => Err(err),
            Some(ApplyFault::CommitThenFail(err)) => {
                inner.commit(edit);
                Err(err)
            }
            None => {
                inner.commit(edit);
                Ok(())
            }
        }
    }
}
