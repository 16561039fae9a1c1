//! Unit-of-work guard over a [`ContactStore`].
//!
//! A [`Transaction`] rolls back on drop unless it was committed, so an early
//! return through `?` never leaves a half-applied unit of work open.

use crate::ContactStore;
use cardmirror_core::MirrorResult;
use std::ops::Deref;

/// An open unit of work. Dereferences to the underlying store.
pub struct Transaction<'s, S: ContactStore + ?Sized> {
    store: &'s S,
    finished: bool,
}

impl<'s, S: ContactStore + ?Sized> Transaction<'s, S> {
    /// Begin a unit of work on `store`.
    pub fn begin(store: &'s S) -> MirrorResult<Self> {
        store.begin()?;
        tracing::trace!("Transaction started");
        Ok(Self {
            store,
            finished: false,
        })
    }

    /// Commit. A failed commit is rolled back before the error is returned.
    pub fn commit(mut self) -> MirrorResult<()> {
        self.finished = true;
        match self.store.commit() {
            Ok(()) => {
                tracing::trace!("Transaction committed");
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = self.store.rollback() {
                    tracing::error!(error = %rollback_err, "Rollback after failed commit failed");
                }
                Err(e)
            }
        }
    }

    /// Roll back explicitly.
    pub fn rollback(mut self) -> MirrorResult<()> {
        self.finished = true;
        self.store.rollback()?;
        tracing::debug!("Transaction rolled back");
        Ok(())
    }
}

impl<S: ContactStore + ?Sized> Deref for Transaction<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.store
    }
}

impl<S: ContactStore + ?Sized> Drop for Transaction<'_, S> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.store.rollback() {
            Ok(()) => tracing::warn!("Transaction dropped without commit, rolled back"),
            Err(e) => tracing::error!(error = %e, "Rollback of dropped transaction failed"),
        }
    }
}

/// Run `f` as one unit of work: commit on `Ok`, roll back on `Err`.
pub fn in_transaction<'s, S, T, F>(store: &'s S, f: F) -> MirrorResult<T>
where
    S: ContactStore + ?Sized,
    F: FnOnce(&Transaction<'s, S>) -> MirrorResult<T>,
{
    let tx = Transaction::begin(store)?;
    match f(&tx) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback() {
                tracing::error!(error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}
