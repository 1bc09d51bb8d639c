//! Stream operators over `Observable`

use tokio::sync::watch;

use crate::{Observable, Subscription};

/// Wait until any of `sources` changes
///
/// Closed sources never resolve; an empty slice waits forever.
pub async fn changed_any<T>(sources: &mut [Observable<T>]) {
    if sources.is_empty() {
        return std::future::pending().await;
    }

    let waits = sources.iter_mut().map(|rx| {
        Box::pin(async move {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
    });
    futures::future::select_all(waits).await;
}

/// Derive a new observable from `source`, emitting only distinct values
pub fn map_distinct<T, U, F>(mut source: Observable<T>, f: F) -> (Observable<U>, Subscription)
where
    T: Send + Sync + 'static,
    U: PartialEq + Send + Sync + 'static,
    F: Fn(&T) -> U + Send + 'static,
{
    let initial = f(&source.borrow_and_update());
    let (tx, rx) = watch::channel(initial);

    let subscription = Subscription::spawn(async move {
        loop {
            tokio::select! {
                changed = source.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tx.closed() => break,
            }
            let next = f(&source.borrow_and_update());
            publish_if_changed(&tx, next);
        }
    });

    (rx, subscription)
}

fn publish_if_changed<U: PartialEq>(tx: &watch::Sender<U>, next: U) {
    tx.send_if_modified(|current| {
        if *current != next {
            *current = next;
            true
        } else {
            false
        }
    });
}
