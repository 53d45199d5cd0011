//! Bounded task pool with per-task logging.
//!
//! Thin layer over `tokio::spawn` + a semaphore: at most `max_concurrency`
//! tasks run at once, each one logs when it starts and how it ended, and
//! `join` hands results back in submission order.

use anyhow::{anyhow, Result};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info};

/// Result of one pooled task
#[derive(Debug)]
pub struct TaskReport<T> {
    pub label: String,
    pub elapsed: Duration,
    pub result: Result<T>,
}

pub struct TaskPool<T> {
    name: String,
    semaphore: Arc<Semaphore>,
    tasks: Vec<(String, JoinHandle<(Duration, Result<T>)>)>,
}

impl<T: Send + 'static> TaskPool<T> {
    pub fn new(name: impl Into<String>, max_concurrency: usize) -> Self {
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            tasks: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Queue `fut`; it starts as soon as a slot is free.
    pub fn spawn<F>(&mut self, label: impl Into<String>, fut: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let label = label.into();
        let semaphore = self.semaphore.clone();
        let pool = self.name.clone();
        let task_label = label.clone();

        let handle = tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return (Duration::ZERO, Err(anyhow!("pool {} closed: {}", pool, e))),
            };
            let start = Instant::now();
            info!("[{}] {} started", pool, task_label);

            let result = fut.await;
            let elapsed = start.elapsed();
            match &result {
                Ok(_) => info!(
                    "[{}] {} finished in {:.1}s",
                    pool,
                    task_label,
                    elapsed.as_secs_f64()
                ),
                Err(e) => error!(
                    "[{}] {} failed after {:.1}s: {:#}",
                    pool,
                    task_label,
                    elapsed.as_secs_f64(),
                    e
                ),
            }
            (elapsed, result)
        });
        self.tasks.push((label, handle));
    }

    /// Wait for every task. Reports come back in submission order; a
    /// panicked task is reported as an error.
    pub async fn join(self) -> Vec<TaskReport<T>> {
        let (labels, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        let finished = join_all(handles).await;

        labels
            .into_iter()
            .zip(finished)
            .map(|(label, joined)| {
                let (elapsed, result) = match joined {
                    Ok(done) => done,
                    Err(e) => {
                        error!("[{}] {} aborted: {}", self.name, label, e);
                        (Duration::ZERO, Err(anyhow!("task {} aborted: {}", label, e)))
                    }
                };
                TaskReport {
                    label,
                    elapsed,
                    result,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_results_in_submission_order() {
        let mut pool = TaskPool::new("test", 4);
        for (i, delay) in [30u64, 10, 20].into_iter().enumerate() {
            pool.spawn(format!("task-{}", i), async move {
                tokio::time::sleep(Duration::from_secs(delay)).await;
                Ok(i)
            });
        }
        assert_eq!(pool.len(), 3);

        let reports = pool.join().await;
        let labels: Vec<&str> = reports.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["task-0", "task-1", "task-2"]);
        let values: Vec<usize> = reports.into_iter().map(|r| r.result.unwrap()).collect();
        assert_eq!(values, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut pool = TaskPool::new("bounded", 2);

        for i in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            pool.spawn(format!("task-{}", i), async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(1)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let start = Instant::now();
        let reports = pool.join().await;
        assert!(reports.iter().all(|r| r.result.is_ok()));
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    async fn explode() -> Result<()> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_reported() {
        let mut pool: TaskPool<()> = TaskPool::new("errors", 2);
        pool.spawn("fails", async { Err(anyhow!("eval timed out")) });
        pool.spawn("panics", explode());
        pool.spawn("works", async { Ok(()) });

        let reports = pool.join().await;
        assert_eq!(
            reports[0].result.as_ref().unwrap_err().to_string(),
            "eval timed out"
        );
        assert!(reports[1]
            .result
            .as_ref()
            .unwrap_err()
            .to_string()
            .contains("aborted"));
        assert!(reports[2].result.is_ok());
    }
}
