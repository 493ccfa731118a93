//! Publish pipeline: build, re-validate reads, pay, sign, broadcast,
//! finalize, write cache. One queue entry in flight at a time.

use super::Inner;
use crate::domain::builder::{build, BuiltTransaction};
use crate::domain::ledger_tx::SpendStatus;
use crate::domain::value_objects::Txid;
use crate::errors::JigError;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Counts the caller as attended until dropped.
struct Attendance<'a>(&'a Inner);

impl<'a> Attendance<'a> {
    fn new(inner: &'a Inner) -> Self {
        inner.kernel.lock().queue.attend();
        Self(inner)
    }
}

impl Drop for Attendance<'_> {
    fn drop(&mut self) {
        self.0.kernel.lock().queue.leave();
    }
}

impl Inner {
    /// Starts publishing in the background if allowed.
    pub(super) fn schedule(self: &Arc<Self>) {
        if !self.config.auto_publish {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = Arc::clone(self);
            handle.spawn(async move { inner.drive().await });
        }
    }

    /// Waits for the queue to drain while counting as attended.
    pub(super) async fn sync(self: &Arc<Self>) -> Result<(), JigError> {
        let _attendance = Attendance::new(self);
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.drive().await;
            {
                let mut kernel = self.kernel.lock();
                if kernel.queue.is_drained() {
                    return kernel.queue.take_error().map_or(Ok(()), Err);
                }
            }
            notified.await;
        }
    }

    /// Publishes queue entries until the queue is empty, another task holds
    /// the head, or an entry fails. Waiters are woken only on drain or
    /// failure.
    pub(super) async fn drive(self: &Arc<Self>) {
        loop {
            let built = {
                let mut guard = self.kernel.lock();
                let kernel = &mut *guard;
                let Some(head) = kernel.queue.start() else {
                    // Another task owns the head; it notifies when done.
                    if !kernel.queue.is_drained() {
                        return;
                    }
                    break;
                };
                match build(head, &kernel.arena, &self.config.build_options()) {
                    Ok(built) => built,
                    Err(e) => {
                        drop(guard);
                        self.fail(e);
                        return;
                    }
                }
            };
            if let Err(e) = self.publish_next(built).await {
                self.fail(e);
                return;
            }
        }
        self.drained.notify_waiters();
    }

    #[instrument(skip(self, built), fields(actions = built.payload.actions.len(), jigs = built.payload.jigs))]
    async fn publish_next(&self, built: BuiltTransaction) -> Result<Txid, JigError> {
        self.revalidate_reads(&built).await?;

        let paid = self.purse.pay(built.tx).await?;
        let signed = self.signer.sign(paid).await?;
        self.ledger.broadcast(&signed).await?;
        let txid = signed.txid();
        debug!(txid = %txid, inputs = signed.inputs.len(), "broadcast accepted");

        let writes = {
            let mut guard = self.kernel.lock();
            let kernel = &mut *guard;
            kernel
                .queue
                .complete(txid, &mut kernel.arena, &mut kernel.pending)?
        };
        self.seen.lock().insert(txid);
        self.stats.lock().published += 1;

        for (location, state) in writes {
            if let Err(e) = self.cache.set(&location, state).await {
                error!(location = %location, error = %e, "cache write failed after publish");
                return Err(e.into());
            }
        }
        info!(txid = %txid, "published");
        Ok(txid)
    }

    /// Every side-read must still be unspent right before paying.
    async fn revalidate_reads(&self, built: &BuiltTransaction) -> Result<(), JigError> {
        for (location, owner) in &built.reads {
            let Some((txid, vout)) = location.outpoint() else {
                return Err(JigError::conflict(format!("read {location} is not on the ledger")));
            };
            let fetched = self.ledger.fetch(&txid).await?;
            match fetched.spend(vout) {
                SpendStatus::Unspent => {}
                SpendStatus::Spent(by) => {
                    return Err(JigError::conflict(format!("read {location} was spent by {by}")));
                }
                SpendStatus::Unknown => {
                    let utxos = self.ledger.utxos(owner).await?;
                    if !utxos.iter().any(|u| u.location() == *location) {
                        return Err(JigError::conflict(format!("read {location} is no longer unspent")));
                    }
                }
            }
        }
        Ok(())
    }

    fn fail(&self, error: JigError) {
        {
            let mut guard = self.kernel.lock();
            let kernel = &mut *guard;
            if !error.rolls_back_queue() {
                warn!(error = %error, "publish failed with a non-network error");
            }
            let discarded = kernel
                .queue
                .fail(error, &mut kernel.arena, &mut kernel.pending);
            let mut stats = self.stats.lock();
            stats.failed += 1;
            stats.rolled_back += discarded as u64;
        }
        self.drained.notify_waiters();
    }
}
