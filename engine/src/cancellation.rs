//! A small cooperative cancellation token, since this workspace has no
//! dependency on `tokio-util`. Mirrors the teacher's "root context
//! cancellation" idiom (spec.md §5): every worker and ticker holds a
//! [`CancellationToken`] and checks it at its suspension points rather than
//! being killed out from under itself.

use tokio::sync::watch;

#[derive(Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<bool>,
}

pub struct CancellationSource {
    tx: watch::Sender<bool>,
}

/// Creates a linked (source, token) pair. Dropping the source without
/// calling [`CancellationSource::cancel`] leaves the token permanently live
/// (the watch channel closing is treated the same as an explicit cancel by
/// [`CancellationToken::cancelled`]).
pub fn new_pair() -> (CancellationSource, CancellationToken) {
    let (tx, rx) = watch::channel(false);
    (CancellationSource { tx }, CancellationToken { rx })
}

impl CancellationSource {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled. Safe to await repeatedly and to
    /// race inside a `tokio::select!` — exactly the suspension-point
    /// requirement from spec.md §5.
    pub async fn cancelled(&mut self) {
        if self.is_cancelled() {
            return;
        }
        // A closed channel (source dropped) also unblocks callers rather
        // than hanging them forever.
        let _ = self.rx.changed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_unblocks_waiters() {
        let (source, mut token) = new_pair();
        assert!(!token.is_cancelled());
        source.cancel();
        token.cancelled().await;
        assert!(token.is_cancelled());
    }
}
