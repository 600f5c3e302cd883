//! Commit-or-rollback guard around a storage transaction.

use octofhir_storage::{StorageError, Transaction};
use tracing::{debug, warn};

/// Owns an open transaction until it is committed or rolled back.
///
/// Both `commit` and `rollback` consume the guard, so a transaction is
/// resolved at most once. A guard dropped while the transaction is still open
/// rolls it back on the current tokio runtime.
pub struct ScopedTransaction {
    inner: Option<Box<dyn Transaction>>,
}

impl ScopedTransaction {
    pub fn new(transaction: Box<dyn Transaction>) -> Self {
        Self {
            inner: Some(transaction),
        }
    }

    /// The open transaction. `None` only while the guard is being consumed.
    pub fn transaction(&mut self) -> Option<&mut Box<dyn Transaction>> {
        self.inner.as_mut()
    }

    pub async fn commit(mut self) -> Result<(), StorageError> {
        match self.inner.take() {
            Some(tx) => {
                tx.commit().await?;
                debug!("Transaction committed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub async fn rollback(mut self) -> Result<(), StorageError> {
        match self.inner.take() {
            Some(tx) => {
                tx.rollback().await?;
                debug!("Transaction rolled back");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for ScopedTransaction {
    fn drop(&mut self) {
        let Some(tx) = self.inner.take() else {
            return;
        };
        warn!("Transaction dropped while still open, rolling back");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = tx.rollback().await {
                        warn!(error = %e, "Rollback of dropped transaction failed");
                    }
                });
            }
            Err(_) => {
                warn!("No tokio runtime available; open transaction discarded without rollback");
            }
        }
    }
}

impl std::fmt::Debug for ScopedTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedTransaction")
            .field("open", &self.inner.is_some())
            .finish()
    }
}
