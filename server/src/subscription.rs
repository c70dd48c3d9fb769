use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::task::JoinHandle;

use crate::store::{DocKey, Document, DocumentStore, StoreError};

/// Handle for a live listener on one document.
///
/// The callback runs once with the current value before
/// [`Subscription::open`] returns, then once per later change. Call
/// [`unsubscribe`](Self::unsubscribe) (or drop the handle) to stop it; once
/// that returns, no new invocation starts. An invocation already running on
/// the delivery task is not waited for, so `unsubscribe` never blocks.
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Watch `key` and feed every state through `project` into `callback`.
    /// Absent documents and store failures both project from `None`.
    pub(crate) async fn open<T, P, F>(
        store: Arc<dyn DocumentStore>,
        key: DocKey,
        project: P,
        mut callback: F,
    ) -> Self
    where
        T: Send + 'static,
        P: Fn(Option<&Document>) -> T + Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let mut watch = store.watch(&key).await;

        match watch.next().await {
            Some(Ok(snapshot)) => callback(project(snapshot.data.as_ref())),
            Some(Err(e)) => {
                tracing::error!("Error reading {} for subscriber: {}", key, e);
                callback(project(None));
            }
            None => callback(project(None)),
        }

        let active = Arc::new(AtomicBool::new(true));
        let task_active = active.clone();

        let task = tokio::spawn(async move {
            while let Some(next) = watch.next().await {
                let value = match next {
                    Ok(snapshot) => project(snapshot.data.as_ref()),
                    Err(StoreError::Lagged(skipped)) => {
                        tracing::warn!(
                            "Subscriber on {} lagged by {} change(s), re-reading",
                            key,
                            skipped
                        );
                        match store.get(&key).await {
                            Ok(snapshot) => {
                                if !watch.advance(snapshot.revision) {
                                    continue;
                                }
                                project(snapshot.data.as_ref())
                            }
                            Err(e) => {
                                tracing::error!("Error re-reading {} for subscriber: {}", key, e);
                                project(None)
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("Error listening to {} changes: {}", key, e);
                        project(None)
                    }
                };

                // Last step before the call: nothing starts once unsubscribed.
                if !task_active.load(Ordering::Acquire) {
                    break;
                }
                callback(value);
            }
        });

        Self { active, task }
    }

    /// Stop delivering changes. Safe to call more than once.
    pub fn unsubscribe(&self) {
        self.active.store(false, Ordering::Release);
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
