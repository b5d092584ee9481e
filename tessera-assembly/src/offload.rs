// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

use crate::error::AssemblyError;

/// Bounded pool for operations against organization databases.
///
/// Jobs run as separate tasks, at most `capacity` of them at the same time across all callers
/// sharing this pool. A slow organization database only occupies its own permits.
#[derive(Clone, Debug)]
pub struct Offloader {
    permits: Arc<Semaphore>,
}

impl Offloader {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity.max(1))),
        }
    }

    /// Runs all jobs and waits for every one of them.
    ///
    /// Results are returned in completion order next to the key of their job. A failing or
    /// panicking job does not affect the others.
    pub async fn run<K, T, F>(
        &self,
        jobs: impl IntoIterator<Item = (K, F)>,
    ) -> Vec<(K, Result<T, AssemblyError>)>
    where
        K: Clone + Send + 'static,
        T: Send + 'static,
        F: Future<Output = Result<T, AssemblyError>> + Send + 'static,
    {
        let mut join_set = JoinSet::new();
        let mut keys = HashMap::new();

        for (key, job) in jobs {
            let permits = self.permits.clone();
            let task_key = key.clone();
            let handle = join_set.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .expect("offload semaphore is never closed");
                (task_key, job.await)
            });
            keys.insert(handle.id(), key);
        }

        let mut results = Vec::with_capacity(keys.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((key, result)) => results.push((key, result)),
                Err(err) => {
                    error!(%err, "offloaded job failed to complete");
                    if let Some(key) = keys.remove(&err.id()) {
                        results.push((
                            key,
                            Err(AssemblyError::Fatal(format!("job failed to complete: {err}"))),
                        ));
                    }
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;

    use crate::error::AssemblyError;

    use super::Offloader;

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let offloader = Offloader::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs = (0..8).map(|index| {
            let running = running.clone();
            let peak = peak.clone();
            (index, async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, AssemblyError>(index * 2)
            })
        });

        let mut results = offloader.run(jobs).await;
        results.sort_by_key(|(index, _)| *index);

        assert_eq!(results.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        for (index, result) in results {
            assert_eq!(result.unwrap(), index * 2);
        }
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let offloader = Offloader::new(4);
        let jobs = (0..3).map(|index| {
            (index, async move {
                match index {
                    0 => Ok(()),
                    1 => Err(AssemblyError::NotFound("entity set".into())),
                    _ => panic!("job crashed"),
                }
            })
        });

        let mut results = offloader.run(jobs).await;
        results.sort_by_key(|(index, _)| *index);

        assert_matches!(results[0], (0, Ok(())));
        assert_matches!(results[1], (1, Err(AssemblyError::NotFound(_))));
        assert_matches!(results[2], (2, Err(AssemblyError::Fatal(_))));
    }
}
