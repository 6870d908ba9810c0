//! Session-wide close flag observed by every session task.

use tokio::sync::watch;

#[derive(Clone)]
pub(crate) struct Closer {
    sender: watch::Sender<bool>,
}

impl Closer {
    pub(crate) fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Raise the flag; returns `true` for the call that raised it.
    pub(crate) fn set(&self) -> bool {
        self.sender.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub(crate) fn is_set(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolve once the flag is raised.
    pub(crate) async fn closed(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in `self`, so `wait_for` only fails after drop.
        let _ = receiver.wait_for(|closed| *closed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn closed_resolves_after_set() {
        let closer = Closer::new();
        assert!(!closer.is_set());

        let waiter = {
            let closer = closer.clone();
            tokio::spawn(async move { closer.closed().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(closer.set());
        assert!(!closer.set());
        assert!(closer.is_set());
        assert!(
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .is_ok()
        );
        closer.closed().await;
    }
}
