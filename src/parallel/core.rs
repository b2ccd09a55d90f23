use crossbeam::channel::{Receiver, Sender, bounded, unbounded};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use super::progress::{ProgressObserver, SilentProgress};
use crate::error::BatchError;

/// Name prefix of every pool worker thread
pub const WORKER_THREAD_PREFIX: &str = "facebatch-worker";

/// Execution strategy enum for choosing between parallel and sequential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    Sequential,
    Parallel { workers: usize },
}

impl ExecutionStrategy {
    /// Map a caller-supplied worker count onto a strategy
    ///
    /// `Some(0)` runs in the calling thread, `Some(n)` uses a pool of `n`
    /// workers and `None` sizes the pool to the host's available parallelism.
    pub fn from_worker_count(worker_count: Option<usize>) -> Self {
        match worker_count {
            Some(0) => ExecutionStrategy::Sequential,
            Some(workers) => ExecutionStrategy::Parallel { workers },
            None => ExecutionStrategy::Parallel {
                workers: Self::host_parallelism(),
            },
        }
    }

    /// Number of logical CPUs available to this process
    pub fn host_parallelism() -> usize {
        num_cpus::get().max(1)
    }

    /// Worker threads this strategy creates (0 for sequential)
    pub fn worker_count(&self) -> usize {
        match self {
            ExecutionStrategy::Sequential => 0,
            ExecutionStrategy::Parallel { workers } => *workers,
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.worker_count() > 0
    }

    /// Calculate optimal workers based on available system resources and configuration limits
    ///
    /// # Algorithm
    /// ```text
    /// 1. Detect available CPU cores: num_cpus::get()
    /// 2. Apply percentage: cores * thread_percentage / 100
    /// 3. Apply config limit: min(max_threads_config, percentage_result) if max_threads_config > 0
    /// 4. Ensure minimum: max(1, final_result)
    /// ```
    ///
    /// # Examples
    /// ```rust
    /// use facebatch::parallel::ExecutionStrategy;
    ///
    /// let workers = ExecutionStrategy::calculate_optimal_workers(0, 75);
    /// assert!(workers >= 1);
    ///
    /// let workers = ExecutionStrategy::calculate_optimal_workers(8, 75);
    /// assert!(workers <= 8);
    /// ```
    pub fn calculate_optimal_workers(max_threads_config: usize, thread_percentage: u8) -> usize {
        let available_cores = Self::host_parallelism();

        let workers_by_percentage =
            std::cmp::max(1, (available_cores * thread_percentage as usize) / 100);

        // 0 means use percentage calculation only
        if max_threads_config > 0 {
            std::cmp::min(max_threads_config, workers_by_percentage)
        } else {
            workers_by_percentage
        }
    }
}

/// How each worker obtains its private state
///
/// - `Fork`: the initializer runs in the calling thread once per worker and
///   the result is moved into that worker.
/// - `Spawn`: the initializer runs inside the worker thread itself, so the
///   state never exists outside the thread that uses it. Required for
///   thread-affine native resources such as graphics contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartMethod {
    Fork,
    Spawn,
}

impl StartMethod {
    /// Start method that is safe on the current platform
    ///
    /// macOS and Windows bind native graphics contexts to the thread that
    /// created them, so workers there must build their own state.
    pub fn for_host() -> Self {
        if cfg!(any(target_os = "macos", target_os = "windows")) {
            StartMethod::Spawn
        } else {
            StartMethod::Fork
        }
    }
}

/// Pool configuration shared by every `process` call of one executor
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub strategy: ExecutionStrategy,
    pub start_method: StartMethod,
    /// Channel buffer size multiplier (buffer = workers * multiplier)
    pub buffer_multiplier: usize,
}

impl PoolConfig {
    pub fn new(strategy: ExecutionStrategy) -> Self {
        Self {
            strategy,
            start_method: StartMethod::for_host(),
            buffer_multiplier: 2,
        }
    }

    pub fn with_start_method(mut self, start_method: StartMethod) -> Self {
        self.start_method = start_method;
        self
    }

    pub fn with_buffer_multiplier(mut self, multiplier: usize) -> Self {
        self.buffer_multiplier = multiplier.max(1);
        self
    }
}

/// Per-call options of [`BatchExecutor::process`]
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Label shown next to the progress indicator
    pub description: String,
    /// Yield results in input order instead of completion order
    pub preserve_order: bool,
    /// Block and collect everything instead of returning a lazy stream
    pub gather_results: bool,
    /// Total used for progress when the item iterator has no exact length
    pub total_hint: Option<usize>,
}

impl BatchOptions {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn preserve_order(mut self, preserve_order: bool) -> Self {
        self.preserve_order = preserve_order;
        self
    }

    pub fn gather_results(mut self, gather_results: bool) -> Self {
        self.gather_results = gather_results;
        self
    }

    pub fn with_total_hint(mut self, total: usize) -> Self {
        self.total_hint = Some(total);
        self
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            description: "Processing".to_string(),
            preserve_order: false,
            gather_results: true,
            total_hint: None,
        }
    }
}

/// Results of one `process` call
pub enum BatchOutput<R> {
    Gathered(Vec<R>),
    Streaming(ResultStream<R>),
}

impl<R> BatchOutput<R> {
    /// Materialize the output, draining the stream if necessary
    pub fn into_vec(self) -> Result<Vec<R>, BatchError> {
        match self {
            BatchOutput::Gathered(results) => Ok(results),
            BatchOutput::Streaming(stream) => stream.collect(),
        }
    }
}

/// Generic batch executor
///
/// Runs a worker function once per item, either inline in the calling thread
/// or on a fresh pool of worker threads created for every call and torn down
/// once the call's results have been delivered or dropped.
pub struct BatchExecutor {
    pool: PoolConfig,
    progress: Arc<dyn ProgressObserver>,
}

impl BatchExecutor {
    pub fn new(pool: PoolConfig) -> Self {
        Self {
            pool,
            progress: Arc::new(SilentProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver>) -> Self {
        self.progress = progress;
        self
    }

    /// Execute `worker` once per item
    ///
    /// `init` runs once per worker before it services any item (once in the
    /// calling thread for the sequential strategy) and produces the state
    /// handed to every invocation of `worker` on that worker.
    ///
    /// Returns [`BatchOutput::Gathered`] when `options.gather_results` is set,
    /// otherwise a lazy [`ResultStream`].
    pub fn process<I, T, S, R, N, F>(
        &self,
        items: I,
        init: N,
        worker: F,
        options: &BatchOptions,
    ) -> Result<BatchOutput<R>, BatchError>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
        T: Send + 'static,
        S: Send + 'static,
        R: Send + 'static,
        N: Fn() -> anyhow::Result<S> + Send + Sync + 'static,
        F: Fn(&mut S, T) -> R + Send + Sync + 'static,
    {
        let stream = self.stream(items, init, worker, options)?;
        if options.gather_results {
            stream.collect::<Result<Vec<_>, _>>().map(BatchOutput::Gathered)
        } else {
            Ok(BatchOutput::Streaming(stream))
        }
    }

    /// Start the batch and return its lazy result stream
    pub fn stream<I, T, S, R, N, F>(
        &self,
        items: I,
        init: N,
        worker: F,
        options: &BatchOptions,
    ) -> Result<ResultStream<R>, BatchError>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
        T: Send + 'static,
        S: Send + 'static,
        R: Send + 'static,
        N: Fn() -> anyhow::Result<S> + Send + Sync + 'static,
        F: Fn(&mut S, T) -> R + Send + Sync + 'static,
    {
        let items = items.into_iter();
        let exact = exact_len(&items);
        // The hint only feeds progress and the worker cap, never the item set
        let total = exact.or(options.total_hint);

        let source = match (self.pool.strategy, exact) {
            (_, Some(0)) => StreamSource::Empty,
            (ExecutionStrategy::Sequential, _)
            | (ExecutionStrategy::Parallel { workers: 0 }, _) => {
                StreamSource::Inline(InlineRun::start(items, init, worker)?)
            }
            (ExecutionStrategy::Parallel { workers }, _) => {
                // Don't create more workers than items
                let workers = total.map_or(workers, |total| workers.min(total.max(1)));
                StreamSource::Pooled(PoolRun::start(
                    items,
                    init,
                    worker,
                    workers,
                    &self.pool,
                    options.preserve_order,
                )?)
            }
        };

        self.progress.start(&options.description, total);
        Ok(ResultStream {
            source,
            progress: self.progress.clone(),
            total,
            completed: 0,
            done: false,
        })
    }
}

/// Convenience entry point that builds its own pool from a worker count
///
/// `worker_count` follows [`ExecutionStrategy::from_worker_count`].
pub fn process<I, T, R, F>(
    items: I,
    worker: F,
    worker_count: Option<usize>,
    options: &BatchOptions,
) -> Result<BatchOutput<R>, BatchError>
where
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    let executor = BatchExecutor::new(PoolConfig::new(ExecutionStrategy::from_worker_count(
        worker_count,
    )));
    executor.process(items, || Ok(()), move |_: &mut (), item| worker(item), options)
}

/// Lazy, single-pass sequence of batch results
///
/// Yields `Err` at most once, after which the stream is exhausted. Dropping
/// the stream stops the pool and joins its threads.
pub struct ResultStream<R> {
    source: StreamSource<R>,
    progress: Arc<dyn ProgressObserver>,
    total: Option<usize>,
    completed: usize,
    done: bool,
}

impl<R> ResultStream<R> {
    /// Results delivered so far
    pub fn completed(&self) -> usize {
        self.completed
    }

    fn close(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        if let StreamSource::Pooled(run) = &mut self.source {
            run.teardown();
        }
        self.progress.finish();
    }
}

impl<R> Iterator for ResultStream<R> {
    type Item = Result<R, BatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let next = match &mut self.source {
            StreamSource::Empty => None,
            StreamSource::Inline(run) => run.next_result(),
            StreamSource::Pooled(run) => run.next_result(),
        };

        match next {
            Some(Ok(result)) => {
                self.completed += 1;
                self.progress.advance(self.completed, self.total);
                Some(Ok(result))
            }
            Some(Err(error)) => {
                self.close();
                Some(Err(error))
            }
            None => {
                self.close();
                None
            }
        }
    }
}

impl<R> Drop for ResultStream<R> {
    fn drop(&mut self) {
        self.close();
    }
}

enum StreamSource<R> {
    Empty,
    Inline(InlineRun<R>),
    Pooled(PoolRun<R>),
}

/// Sequential execution in the calling thread, one item per `next`
struct InlineRun<R> {
    next: Box<dyn FnMut() -> Option<Result<R, BatchError>>>,
}

impl<R: 'static> InlineRun<R> {
    fn start<It, T, S, N, F>(mut items: It, init: N, worker: F) -> Result<Self, BatchError>
    where
        It: Iterator<Item = T> + 'static,
        T: 'static,
        S: 'static,
        N: Fn() -> anyhow::Result<S>,
        F: Fn(&mut S, T) -> R + 'static,
    {
        let mut state = run_initializer(&init).map_err(BatchError::Initializer)?;

        let next = move || {
            let item = items.next()?;
            Some(
                panic::catch_unwind(AssertUnwindSafe(|| worker(&mut state, item))).map_err(
                    |payload| BatchError::WorkerPanicked {
                        worker_id: 0,
                        message: panic_message(payload.as_ref()),
                    },
                ),
            )
        };

        Ok(Self {
            next: Box::new(next),
        })
    }
}

impl<R> InlineRun<R> {
    fn next_result(&mut self) -> Option<Result<R, BatchError>> {
        (self.next)()
    }
}

enum WorkerMessage<R> {
    Done { index: usize, result: R },
    Panicked { worker_id: usize, message: String },
}

/// Context for worker threads to avoid too many function parameters
struct WorkerContext<T, S, R, N, F> {
    worker_id: usize,
    work_rx: Receiver<(usize, T)>,
    result_tx: Sender<WorkerMessage<R>>,
    ready_tx: Sender<Result<(), String>>,
    shutdown: Arc<AtomicBool>,
    init: Arc<N>,
    processor: Arc<F>,
    state: Option<S>,
}

/// A running pool of worker threads plus the feeder thread
struct PoolRun<R> {
    results: Option<Receiver<WorkerMessage<R>>>,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    feeder: Option<JoinHandle<()>>,
    preserve_order: bool,
    pending: BTreeMap<usize, R>,
    next_index: usize,
}

impl<R: Send + 'static> PoolRun<R> {
    fn start<It, T, S, N, F>(
        items: It,
        init: N,
        processor: F,
        workers: usize,
        pool: &PoolConfig,
        preserve_order: bool,
    ) -> Result<Self, BatchError>
    where
        It: Iterator<Item = T> + Send + 'static,
        T: Send + 'static,
        S: Send + 'static,
        N: Fn() -> anyhow::Result<S> + Send + Sync + 'static,
        F: Fn(&mut S, T) -> R + Send + Sync + 'static,
    {
        let buffer = workers * pool.buffer_multiplier.max(1);
        let (work_tx, work_rx) = bounded::<(usize, T)>(buffer);
        let (result_tx, result_rx) = bounded::<WorkerMessage<R>>(buffer * 2);
        let (ready_tx, ready_rx) = unbounded::<Result<(), String>>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut prebuilt: Vec<Option<S>> = match pool.start_method {
            StartMethod::Fork => (0..workers)
                .map(|_| run_initializer(&init).map(Some))
                .collect::<Result<_, _>>()
                .map_err(|e| BatchError::PoolStartup(format!("initializer failed: {e}")))?,
            StartMethod::Spawn => (0..workers).map(|_| None).collect(),
        };

        let init = Arc::new(init);
        let processor = Arc::new(processor);

        // The only work sender; it must be dropped before `run` on any early
        // return so idle workers see a closed queue.
        let mut work_tx = Some(work_tx);
        let mut run = PoolRun {
            results: Some(result_rx),
            shutdown: shutdown.clone(),
            workers: Vec::with_capacity(workers),
            feeder: None,
            preserve_order,
            pending: BTreeMap::new(),
            next_index: 0,
        };

        for (worker_id, state) in prebuilt.iter_mut().enumerate() {
            let ctx = WorkerContext {
                worker_id,
                work_rx: work_rx.clone(),
                result_tx: result_tx.clone(),
                ready_tx: ready_tx.clone(),
                shutdown: shutdown.clone(),
                init: init.clone(),
                processor: processor.clone(),
                state: state.take(),
            };

            let spawned = thread::Builder::new()
                .name(format!("{WORKER_THREAD_PREFIX}-{worker_id}"))
                .spawn(move || worker_thread(ctx));

            match spawned {
                Ok(handle) => run.workers.push(handle),
                Err(e) => {
                    drop(work_tx.take());
                    return Err(BatchError::PoolStartup(format!(
                        "could not spawn worker {worker_id}: {e}"
                    )));
                }
            }
        }

        drop(work_rx);
        drop(result_tx);
        drop(ready_tx);

        // Every worker reports exactly once before touching the work queue
        for _ in 0..run.workers.len() {
            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(message)) => {
                    drop(work_tx.take());
                    return Err(BatchError::PoolStartup(message));
                }
                Err(_) => {
                    drop(work_tx.take());
                    return Err(BatchError::PoolStartup(
                        "worker exited before reporting ready".to_string(),
                    ));
                }
            }
        }

        let Some(feed_tx) = work_tx.take() else {
            return Err(BatchError::PoolStartup("work queue already closed".to_string()));
        };
        let feeder_shutdown = shutdown.clone();
        let feeder = thread::Builder::new()
            .name(format!("{WORKER_THREAD_PREFIX}-feeder"))
            .spawn(move || {
                for (index, item) in items.enumerate() {
                    if feeder_shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    if feed_tx.send((index, item)).is_err() {
                        break; // Workers dropped
                    }
                }
            })
            .map_err(|e| BatchError::PoolStartup(format!("could not spawn feeder: {e}")))?;
        run.feeder = Some(feeder);

        Ok(run)
    }
}

impl<R> PoolRun<R> {
    fn next_result(&mut self) -> Option<Result<R, BatchError>> {
        loop {
            if self.preserve_order
                && let Some(result) = self.pending.remove(&self.next_index)
            {
                self.next_index += 1;
                return Some(Ok(result));
            }

            let Some(results) = self.results.as_ref() else {
                return self.pending.pop_first().map(|(_, result)| Ok(result));
            };

            match results.recv() {
                Ok(WorkerMessage::Done { index, result }) => {
                    if !self.preserve_order {
                        return Some(Ok(result));
                    }
                    self.pending.insert(index, result);
                }
                Ok(WorkerMessage::Panicked { worker_id, message }) => {
                    return Some(Err(BatchError::WorkerPanicked { worker_id, message }));
                }
                Err(_) => {
                    // All workers and the feeder have exited
                    self.results = None;
                }
            }
        }
    }

    /// Stop feeding, unblock and join every thread of the pool
    fn teardown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Workers blocked on a full result queue fail their send and exit
        self.results.take();

        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        if let Some(feeder) = self.feeder.take() {
            let _ = feeder.join();
        }
    }
}

impl<R> Drop for PoolRun<R> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn worker_thread<T, S, R, N, F>(ctx: WorkerContext<T, S, R, N, F>)
where
    N: Fn() -> anyhow::Result<S>,
    F: Fn(&mut S, T) -> R,
{
    let WorkerContext {
        worker_id,
        work_rx,
        result_tx,
        ready_tx,
        shutdown,
        init,
        processor,
        state,
    } = ctx;

    let mut state = match state {
        Some(state) => state,
        None => match run_initializer(&*init) {
            Ok(state) => state,
            Err(e) => {
                let _ = ready_tx.send(Err(format!("worker {worker_id} initializer failed: {e}")));
                return;
            }
        },
    };
    let _ = ready_tx.send(Ok(()));
    drop(ready_tx);

    while let Ok((index, item)) = work_rx.recv() {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (*processor)(&mut state, item)));
        let message = match outcome {
            Ok(result) => WorkerMessage::Done { index, result },
            Err(payload) => WorkerMessage::Panicked {
                worker_id,
                message: panic_message(payload.as_ref()),
            },
        };
        let panicked = matches!(message, WorkerMessage::Panicked { .. });

        if result_tx.send(message).is_err() || panicked {
            break; // Receiver dropped
        }
    }
}

/// Run an initializer, turning both errors and panics into a message
fn run_initializer<S, N>(init: &N) -> Result<S, String>
where
    N: Fn() -> anyhow::Result<S> + ?Sized,
{
    match panic::catch_unwind(AssertUnwindSafe(init)) {
        Ok(Ok(state)) => Ok(state),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn exact_len<It: Iterator>(items: &It) -> Option<usize> {
    match items.size_hint() {
        (lower, Some(upper)) if lower == upper => Some(lower),
        _ => None,
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::progress::CountingProgress;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn current_thread_name() -> String {
        thread::current().name().unwrap_or_default().to_string()
    }

    #[test]
    fn test_sequential_executor() {
        let results = process(vec![1, 2, 3, 4, 5], |x| x * 2, Some(0), &BatchOptions::default())
            .unwrap()
            .into_vec()
            .unwrap();
        assert_eq!(results, vec![2, 4, 6, 8, 10]);
    }

    #[test]
    fn test_parallel_executor() {
        let results = process(vec![1, 2, 3, 4, 5], |x| x * 2, Some(2), &BatchOptions::default())
            .unwrap()
            .into_vec()
            .unwrap();

        // Results may be in different order due to parallel execution
        let mut sorted_results = results;
        sorted_results.sort();
        assert_eq!(sorted_results, vec![2, 4, 6, 8, 10]);
    }

    #[test]
    fn test_parallel_preserves_order_when_requested() {
        let items: Vec<u64> = (0..20).collect();
        let options = BatchOptions::default().preserve_order(true);
        let results = process(
            items.clone(),
            |x| {
                // Early items finish last
                thread::sleep(Duration::from_millis(20 - x));
                x
            },
            Some(4),
            &options,
        )
        .unwrap()
        .into_vec()
        .unwrap();

        assert_eq!(results, items);
    }

    #[test]
    fn test_sequential_runs_in_calling_thread() {
        let caller = current_thread_name();
        let options = BatchOptions::default();
        let names = process(vec![1, 2, 3], |_| current_thread_name(), Some(0), &options)
            .unwrap()
            .into_vec()
            .unwrap();
        assert!(names.iter().all(|name| *name == caller));
    }

    #[test]
    fn test_parallel_runs_on_worker_threads() {
        let options = BatchOptions::default();
        let names = process(vec![1, 2, 3, 4], |_| current_thread_name(), Some(2), &options)
            .unwrap()
            .into_vec()
            .unwrap();
        assert_eq!(names.len(), 4);
        assert!(names.iter().all(|name| name.starts_with(WORKER_THREAD_PREFIX)));
    }

    #[test]
    fn test_initializer_runs_once_per_worker() {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = BatchExecutor::new(
            PoolConfig::new(ExecutionStrategy::Parallel { workers: 3 })
                .with_start_method(StartMethod::Spawn),
        );

        let init_calls = calls.clone();
        let results = executor
            .process(
                (0..30).collect::<Vec<_>>(),
                move || {
                    init_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(current_thread_name())
                },
                |built_on: &mut String, item: i32| (built_on.clone(), current_thread_name(), item),
                &BatchOptions::default(),
            )
            .unwrap()
            .into_vec()
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(results.len(), 30);
        // Spawn builds the state on the worker that uses it
        assert!(results.iter().all(|(built_on, runs_on, _)| built_on == runs_on));
    }

    #[test]
    fn test_fork_builds_state_in_calling_thread() {
        let caller = current_thread_name();
        let executor = BatchExecutor::new(
            PoolConfig::new(ExecutionStrategy::Parallel { workers: 2 })
                .with_start_method(StartMethod::Fork),
        );

        let results = executor
            .process(
                vec![1, 2, 3, 4],
                || Ok(current_thread_name()),
                |built_on: &mut String, _item: i32| built_on.clone(),
                &BatchOptions::default(),
            )
            .unwrap()
            .into_vec()
            .unwrap();

        assert!(results.iter().all(|built_on| *built_on == caller));
    }

    #[test]
    fn test_sequential_initializer_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = BatchExecutor::new(PoolConfig::new(ExecutionStrategy::Sequential));
        let init_calls = calls.clone();

        let results = executor
            .process(
                vec![1, 2, 3],
                move || {
                    init_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(10)
                },
                |offset: &mut i32, item: i32| *offset + item,
                &BatchOptions::default(),
            )
            .unwrap()
            .into_vec()
            .unwrap();

        assert_eq!(results, vec![11, 12, 13]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_initializer_failure_fails_pool_startup() {
        let executor = BatchExecutor::new(
            PoolConfig::new(ExecutionStrategy::Parallel { workers: 2 })
                .with_start_method(StartMethod::Spawn),
        );

        let result = executor.process(
            vec![1, 2, 3],
            || -> anyhow::Result<()> { anyhow::bail!("no graphics context") },
            |_: &mut (), item: i32| item,
            &BatchOptions::default(),
        );

        match result {
            Err(BatchError::PoolStartup(message)) => {
                assert!(message.contains("no graphics context"))
            }
            _ => panic!("expected pool startup failure"),
        }
    }

    #[test]
    fn test_worker_panic_fails_batch() {
        let result = process(
            vec![1, 2, 3, 4],
            |x| {
                if x == 3 {
                    panic!("boom at 3");
                }
                x
            },
            Some(2),
            &BatchOptions::default(),
        );

        match result {
            Err(BatchError::WorkerPanicked { message, .. }) => assert_eq!(message, "boom at 3"),
            _ => panic!("expected worker panic"),
        }
    }

    #[test]
    fn test_streaming_results_are_lazy() {
        let processed = Arc::new(AtomicUsize::new(0));
        let counter = processed.clone();
        let options = BatchOptions::default().gather_results(false);

        let output = process(
            vec![1, 2, 3, 4, 5],
            move |x| {
                counter.fetch_add(1, Ordering::SeqCst);
                x
            },
            Some(0),
            &options,
        )
        .unwrap();

        let BatchOutput::Streaming(mut stream) = output else {
            panic!("expected a stream");
        };
        assert_eq!(processed.load(Ordering::SeqCst), 0);

        assert_eq!(stream.next().unwrap().unwrap(), 1);
        assert_eq!(processed.load(Ordering::SeqCst), 1);
        assert_eq!(stream.completed(), 1);

        let rest: Vec<_> = stream.by_ref().map(|r| r.unwrap()).collect();
        assert_eq!(rest, vec![2, 3, 4, 5]);
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_dropping_parallel_stream_stops_pool() {
        let options = BatchOptions::default().gather_results(false);
        let output = process(
            0..1000,
            |x| {
                thread::sleep(Duration::from_millis(1));
                x
            },
            Some(4),
            &options,
        )
        .unwrap();

        let BatchOutput::Streaming(mut stream) = output else {
            panic!("expected a stream");
        };
        assert!(stream.next().unwrap().is_ok());
        drop(stream); // must not hang
    }

    #[test]
    fn test_progress_reports_every_result() {
        let progress = Arc::new(CountingProgress::new());
        let pool = PoolConfig::new(ExecutionStrategy::Parallel { workers: 3 });
        let executor = BatchExecutor::new(pool).with_progress(progress.clone());

        executor
            .process(
                vec![1, 2, 3, 4, 5, 6, 7],
                || Ok(()),
                |_: &mut (), x: i32| x,
                &BatchOptions::default(),
            )
            .unwrap();

        assert_eq!(progress.starts(), 1);
        assert_eq!(progress.advances(), 7);
        assert_eq!(progress.finishes(), 1);
        assert_eq!(progress.last_total(), Some(7));
    }

    #[test]
    fn test_total_hint_used_for_unsized_iterators() {
        let progress = Arc::new(CountingProgress::new());
        let executor = BatchExecutor::new(PoolConfig::new(ExecutionStrategy::Sequential))
            .with_progress(progress.clone());
        let options = BatchOptions::default().with_total_hint(5);

        let results = executor
            .process((0..10).filter(|x| x % 2 == 0), || Ok(()), |_: &mut (), x: i32| x, &options)
            .unwrap()
            .into_vec()
            .unwrap();

        assert_eq!(results, vec![0, 2, 4, 6, 8]);
        assert_eq!(progress.last_total(), Some(5));
    }

    #[test]
    fn test_wrong_total_hint_keeps_every_item() {
        let strategies = [ExecutionStrategy::Sequential, ExecutionStrategy::Parallel { workers: 3 }];
        for strategy in strategies {
            let progress = Arc::new(CountingProgress::new());
            let executor = BatchExecutor::new(PoolConfig::new(strategy))
                .with_progress(progress.clone());
            let options = BatchOptions::default().with_total_hint(0).preserve_order(true);

            let results = executor
                .process(
                    (0..10).filter(|x| x % 2 == 0),
                    || Ok(()),
                    |_: &mut (), x: i32| x,
                    &options,
                )
                .unwrap()
                .into_vec()
                .unwrap();

            assert_eq!(results, vec![0, 2, 4, 6, 8]);
            assert_eq!(progress.advances(), 5);
            assert_eq!(progress.last_total(), Some(0));
        }
    }

    #[test]
    fn test_empty_input() {
        let results = process(Vec::<i32>::new(), |x| x, Some(4), &BatchOptions::default())
            .unwrap()
            .into_vec()
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_from_worker_count() {
        assert_eq!(ExecutionStrategy::from_worker_count(Some(0)), ExecutionStrategy::Sequential);
        assert_eq!(
            ExecutionStrategy::from_worker_count(Some(3)),
            ExecutionStrategy::Parallel { workers: 3 }
        );
        assert_eq!(
            ExecutionStrategy::from_worker_count(None).worker_count(),
            ExecutionStrategy::host_parallelism()
        );
    }

    #[test]
    fn test_optimal_workers_calculation() {
        assert!(ExecutionStrategy::calculate_optimal_workers(0, 75) >= 1);
        assert!(ExecutionStrategy::calculate_optimal_workers(2, 100) <= 2);
        assert_eq!(ExecutionStrategy::calculate_optimal_workers(0, 0), 1);
    }
}
