//! Shutdown signalling shared by the background tasks

use tokio::sync::watch;

/// Resolve once the shutdown flag is set or its sender is gone
pub(crate) async fn signalled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
