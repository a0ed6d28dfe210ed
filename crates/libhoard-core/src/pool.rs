//! Bounded worker pool for per-file transfer jobs
//!
//! Jobs go through one channel, results come back through another, and the
//! caller merges results after every worker has finished. Workers share
//! nothing mutable besides the two channels.

use crossbeam_channel::unbounded;
use tracing::trace;

use crate::error::HoardError;

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `work` over every job; results come back in completion order
    ///
    /// Returns once all jobs are done. A panicking job propagates the panic
    /// to the caller after the remaining workers have been joined.
    pub fn run<T, R, F>(&self, jobs: Vec<T>, work: F) -> Result<Vec<R>, HoardError>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
    {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let workers = self.workers.min(jobs.len());
        let total = jobs.len();

        let (job_tx, job_rx) = unbounded::<T>();
        let (result_tx, result_rx) = unbounded::<R>();
        for job in jobs {
            job_tx
                .send(job)
                .map_err(|_| HoardError::Internal("job queue closed".to_string()))?;
        }
        drop(job_tx);

        std::thread::scope(|scope| -> Result<(), HoardError> {
            for id in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let work = &work;
                std::thread::Builder::new()
                    .name(format!("hoard-worker-{}", id))
                    .spawn_scoped(scope, move || {
                        for job in job_rx.iter() {
                            if result_tx.send(work(job)).is_err() {
                                break;
                            }
                        }
                        trace!(worker = id, "worker drained queue");
                    })?;
            }
            Ok(())
        })?;
        drop(result_tx);

        let results: Vec<R> = result_rx.try_iter().collect();
        if results.len() != total {
            return Err(HoardError::Internal(format!(
                "worker pool finished {} of {} jobs",
                results.len(),
                total
            )));
        }
        Ok(results)
    }
}
