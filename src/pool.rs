// Upload pool: a fixed set of worker threads draining one shared queue of
// file paths into a single project.
//
// Each pass starts the workers (staggered so the server does not see a burst
// of connections), lets them pop paths until the queue is empty, and joins
// them. Workers keep their own success/failure lists; the coordinator merges
// them after the join. Failed paths can be re-driven for a bounded number of
// extra passes.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use indicatif::ProgressBar;

use crate::api::{ProjectId, RemoteApi};
use crate::retry::{random_between, Backoff, RetryPolicy};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads per pass.
    pub workers: usize,
    /// Pause between starting two workers.
    pub start_delay: Duration,
    /// Random pause before each upload is drawn from `[min_delay, max_delay]`.
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Attempts per file within one pass.
    pub max_retries: u32,
    /// Linear backoff step: the wait after attempt `n` is `retry_delay * n`.
    pub retry_delay: Duration,
    /// Extra passes over failed files after the first pass.
    pub redrive_passes: usize,
}

/// Receives per-file outcomes while a batch runs.
pub trait UploadProgress: Sync {
    fn uploaded(&self, path: &Path);

    /// Called once per file that is still failing after the last pass.
    fn failed(&self, path: &Path);

    fn finish(&self) {}
}

impl UploadProgress for () {
    fn uploaded(&self, _path: &Path) {}
    fn failed(&self, _path: &Path) {}
}

impl UploadProgress for ProgressBar {
    fn uploaded(&self, _path: &Path) {
        self.inc(1);
    }

    fn failed(&self, path: &Path) {
        self.set_message(format!("failed: {}", file_label(path)));
    }

    fn finish(&self) {
        ProgressBar::finish(self);
    }
}

/// What one worker did during one pass.
#[derive(Debug, Default)]
struct WorkerResult {
    succeeded: Vec<PathBuf>,
    failed: Vec<PathBuf>,
}

pub struct UploadPool {
    config: PoolConfig,
}

impl UploadPool {
    pub fn new(config: PoolConfig) -> Self {
        UploadPool { config }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Upload `paths` into `project_id` and return the paths that could not
    /// be uploaded.
    ///
    /// Files that fail in a pass are retried in another pass only when some
    /// files of that pass did succeed, and at most `redrive_passes` times.
    pub fn upload_batch<A, P>(
        &self,
        api: &A,
        project_id: ProjectId,
        paths: Vec<PathBuf>,
        progress: &P,
    ) -> Vec<PathBuf>
    where
        A: RemoteApi + ?Sized,
        P: UploadProgress + ?Sized,
    {
        let mut pending = paths;
        let mut pass = 0;

        let failed = loop {
            let total = pending.len();
            if total == 0 {
                break pending;
            }

            tracing::info!(project_id, pass, files = total, "starting upload pass");
            let failed = self.run_pass(api, project_id, pending, progress);

            if failed.is_empty() {
                tracing::info!(project_id, pass, files = total, "upload pass complete");
                break failed;
            }
            if failed.len() >= total {
                tracing::error!(
                    project_id,
                    pass,
                    failed = failed.len(),
                    "every file in the pass failed, not re-driving"
                );
                break failed;
            }
            if pass >= self.config.redrive_passes {
                tracing::warn!(
                    project_id,
                    failed = failed.len(),
                    "re-drive limit reached"
                );
                break failed;
            }

            tracing::warn!(
                project_id,
                failed = failed.len(),
                total,
                "re-driving failed uploads"
            );
            pending = failed;
            pass += 1;
        };

        for path in &failed {
            progress.failed(path);
        }
        failed
    }

    fn run_pass<A, P>(
        &self,
        api: &A,
        project_id: ProjectId,
        paths: Vec<PathBuf>,
        progress: &P,
    ) -> Vec<PathBuf>
    where
        A: RemoteApi + ?Sized,
        P: UploadProgress + ?Sized,
    {
        let workers = self.config.workers.clamp(1, paths.len().max(1));
        let retry = RetryPolicy::new(
            self.config.max_retries,
            Backoff::Linear {
                step: self.config.retry_delay,
            },
        );
        let queue = Mutex::new(paths.iter().cloned().collect::<VecDeque<_>>());
        // Workers log through the caller's subscriber, scoped or global.
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());

        let results: Vec<WorkerResult> = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for worker_id in 0..workers {
                if worker_id > 0 && !self.config.start_delay.is_zero() {
                    thread::sleep(self.config.start_delay);
                }
                let queue = &queue;
                let retry = &retry;
                let dispatch = dispatch.clone();
                let spawned = thread::Builder::new()
                    .name(format!("upload-worker-{worker_id}"))
                    .spawn_scoped(scope, move || {
                        tracing::dispatcher::with_default(&dispatch, || {
                            self.work(worker_id, api, project_id, queue, retry, progress)
                        })
                    });
                match spawned {
                    Ok(handle) => handles.push((worker_id, handle)),
                    Err(e) => {
                        tracing::error!(worker_id, error = %e, "failed to start upload worker")
                    }
                }
            }

            handles
                .into_iter()
                .filter_map(|(worker_id, handle)| match handle.join() {
                    Ok(result) => Some(result),
                    Err(_) => {
                        tracing::error!(worker_id, "upload worker panicked");
                        None
                    }
                })
                .collect()
        });

        let mut succeeded = HashSet::new();
        let mut failed = Vec::new();
        for result in results {
            succeeded.extend(result.succeeded);
            failed.extend(result.failed);
        }

        // Paths popped by a panicked worker, or never popped because no
        // worker could start, count as failed.
        let accounted: HashSet<&PathBuf> = succeeded.iter().chain(failed.iter()).collect();
        let lost: Vec<PathBuf> = paths
            .iter()
            .filter(|p| !accounted.contains(p))
            .cloned()
            .collect();
        if !lost.is_empty() {
            tracing::error!(count = lost.len(), "uploads were never completed by a worker");
        }
        failed.extend(lost);
        failed
    }

    fn work<A, P>(
        &self,
        worker_id: usize,
        api: &A,
        project_id: ProjectId,
        queue: &Mutex<VecDeque<PathBuf>>,
        retry: &RetryPolicy,
        progress: &P,
    ) -> WorkerResult
    where
        A: RemoteApi + ?Sized,
        P: UploadProgress + ?Sized,
    {
        let _worker = tracing::info_span!("upload_worker", worker_id, project_id).entered();
        let mut rng = rand::thread_rng();
        let mut result = WorkerResult::default();

        while let Some(path) = pop(queue) {
            thread::sleep(random_between(
                self.config.min_delay,
                self.config.max_delay,
                &mut rng,
            ));

            let name = file_label(&path);
            let _file = tracing::info_span!("file", name = %name).entered();
            tracing::debug!("uploading");

            match retry.run("upload", || api.upload_file(project_id, &path)) {
                Ok(()) => {
                    // Per-file successes show on the progress bar; at info
                    // they would redraw over it.
                    tracing::debug!(worker_id, file = %name, "uploaded");
                    progress.uploaded(&path);
                    result.succeeded.push(path);
                }
                Err(e) => {
                    tracing::error!(
                        worker_id,
                        file = %name,
                        attempts = retry.max_attempts(),
                        error = %e,
                        "giving up on file"
                    );
                    result.failed.push(path);
                }
            }
        }

        tracing::debug!(
            uploaded = result.succeeded.len(),
            failed = result.failed.len(),
            "worker finished"
        );
        result
    }
}

/// Non-blocking pop; an empty queue ends the worker.
fn pop(queue: &Mutex<VecDeque<PathBuf>>) -> Option<PathBuf> {
    queue
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .pop_front()
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeApi;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn config(workers: usize, max_retries: u32, redrive_passes: usize) -> PoolConfig {
        PoolConfig {
            workers,
            start_delay: Duration::ZERO,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_retries,
            retry_delay: Duration::ZERO,
            redrive_passes,
        }
    }

    fn files(n: usize) -> Vec<PathBuf> {
        (1..=n)
            .map(|i| PathBuf::from(format!("/data/img{i:03}.png")))
            .collect()
    }

    #[derive(Default)]
    struct Counting {
        uploaded: AtomicUsize,
        failed: AtomicUsize,
    }

    impl UploadProgress for Counting {
        fn uploaded(&self, _path: &Path) {
            self.uploaded.fetch_add(1, Ordering::SeqCst);
        }

        fn failed(&self, _path: &Path) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn clean_batch_uploads_each_file_once() {
        let api = FakeApi::new();
        let project = api.add_project("droneA");
        let paths = files(40);
        let progress = Counting::default();

        let pool = UploadPool::new(config(6, 3, 1));
        let failed = pool.upload_batch(&api, project, paths.clone(), &progress);

        assert!(failed.is_empty());
        for path in &paths {
            assert_eq!(api.upload_attempts(path), 1, "{}", path.display());
        }
        assert_eq!(api.task_count(project), 40);
        assert_eq!(progress.uploaded.load(Ordering::SeqCst), 40);
        assert_eq!(progress.failed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn transient_errors_are_absorbed_by_per_file_retries() {
        let api = FakeApi::new();
        let project = api.add_project("droneA");
        let paths = files(5);
        api.fail_uploads(&paths[2], 2);

        let pool = UploadPool::new(config(2, 3, 1));
        let failed = pool.upload_batch(&api, project, paths.clone(), &());

        assert!(failed.is_empty());
        assert_eq!(api.upload_attempts(&paths[2]), 3);
        assert_eq!(api.task_count(project), 5);
    }

    #[test]
    fn redrive_pass_recovers_files_that_exhausted_retries() {
        let api = FakeApi::new();
        let project = api.add_project("droneA");
        let paths = files(6);
        // Two attempts per pass: fails the whole first pass, then one more
        // failure before succeeding in the re-drive.
        api.fail_uploads(&paths[0], 3);

        let pool = UploadPool::new(config(3, 2, 1));
        let failed = pool.upload_batch(&api, project, paths.clone(), &());

        assert!(failed.is_empty());
        assert_eq!(api.upload_attempts(&paths[0]), 4);
        for path in &paths[1..] {
            assert_eq!(api.upload_attempts(path), 1);
        }
    }

    #[test]
    fn persistent_failures_are_returned_without_successful_files() {
        let api = FakeApi::new();
        let project = api.add_project("droneA");
        let paths = files(10);
        let broken = vec![paths[3].clone(), paths[7].clone()];
        for path in &broken {
            api.fail_uploads(path, usize::MAX);
        }

        let progress = Counting::default();
        let pool = UploadPool::new(config(4, 2, 1));
        let mut failed = pool.upload_batch(&api, project, paths.clone(), &progress);
        failed.sort();

        assert_eq!(failed, broken);
        // One first pass plus one re-drive, two attempts each.
        assert_eq!(api.upload_attempts(&paths[3]), 4);
        assert_eq!(api.task_count(project), 8);
        assert_eq!(progress.failed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn no_redrive_when_every_file_failed() {
        let api = FakeApi::new();
        let project = api.add_project("droneA");
        let paths = files(3);
        for path in &paths {
            api.fail_uploads(path, usize::MAX);
        }

        let pool = UploadPool::new(config(2, 2, 3));
        let failed = pool.upload_batch(&api, project, paths.clone(), &());

        assert_eq!(failed.len(), 3);
        for path in &paths {
            assert_eq!(api.upload_attempts(path), 2);
        }
    }

    fn redrive_with_limit(redrive_passes: usize) -> (Vec<PathBuf>, Vec<PathBuf>, FakeApi) {
        let api = FakeApi::new();
        let project = api.add_project("droneA");
        let paths = files(4);
        api.fail_uploads(&paths[0], 1);
        api.fail_uploads(&paths[1], usize::MAX);

        let pool = UploadPool::new(config(2, 1, redrive_passes));
        let failed = pool.upload_batch(&api, project, paths.clone(), &());
        (paths, failed, api)
    }

    #[test]
    fn redrive_passes_are_capped() {
        // Pass 0 loses two files, pass 1 recovers one of them, so only the
        // limit decides whether a third pass runs.
        let (paths, failed, api) = redrive_with_limit(1);
        assert_eq!(failed, vec![paths[1].clone()]);
        assert_eq!(api.upload_attempts(&paths[0]), 2);
        assert_eq!(api.upload_attempts(&paths[1]), 2);

        let (paths, failed, api) = redrive_with_limit(2);
        assert_eq!(failed, vec![paths[1].clone()]);
        assert_eq!(api.upload_attempts(&paths[0]), 2);
        assert_eq!(api.upload_attempts(&paths[1]), 3);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn per_file_successes_are_not_logged_at_info() {
        let logs = Captured::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let api = FakeApi::new();
        let project = api.add_project("droneA");
        let paths = files(3);
        api.fail_uploads(&paths[2], 1);

        let pool = UploadPool::new(config(2, 2, 1));
        let failed = tracing::subscriber::with_default(subscriber, || {
            pool.upload_batch(&api, project, paths, &())
        });

        assert!(failed.is_empty());
        let logs = logs.contents();
        assert!(logs.contains("starting upload pass"));
        // Worker threads log through the same subscriber.
        assert!(logs.contains("attempt failed"), "{logs}");
        assert!(!logs.contains("uploaded"), "{logs}");
    }

    #[test]
    fn empty_batch_makes_no_calls() {
        let api = FakeApi::new();
        let project = api.add_project("droneA");

        let pool = UploadPool::new(config(4, 3, 1));
        let failed = pool.upload_batch(&api, project, Vec::new(), &());

        assert!(failed.is_empty());
        assert_eq!(api.total_upload_attempts(), 0);
    }

    #[test]
    fn more_workers_than_files_is_fine() {
        let api = FakeApi::new();
        let project = api.add_project("droneA");
        let paths = files(2);

        let pool = UploadPool::new(config(15, 1, 1));
        let failed = pool.upload_batch(&api, project, paths, &());

        assert!(failed.is_empty());
        assert_eq!(api.task_count(project), 2);
    }
}
