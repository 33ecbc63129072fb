//! Buffer - accumulates items and hands sealed batches to a worker pool
//!
//! A flush is sealed when the content store reaches `max_len` items, when the interval
//! fires, or when `flush` is called. Sealed flushes wait in a bounded queue
//! (`max_flushes`) until the dispatch loop pairs them with one of `parallelism` ready
//! workers.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use contracts::{
    default_parallelism, AutoflushConfig, AutoflushError, Flush, FlushContext, FlushHandler,
    StatsCollector, Tracer, DEFAULT_INTERVAL_MS, DEFAULT_MAX_FLUSHES, DEFAULT_MAX_LEN,
    DEFAULT_SHUTDOWN_GRACE_PERIOD_MS,
};
use futures::FutureExt;
use lifecycle::{
    report_error, ErrorSink, Interval, IntervalAction, Latch, LatchState, WorkAction, Worker,
    WorkerFinalizer,
};
use tracing::{debug, info, instrument, warn, Instrument};

use crate::instrument::{
    finish, Instruments, Span, METRIC_ADD, METRIC_ADD_ELAPSED, METRIC_ADD_MANY,
    METRIC_ADD_MANY_ELAPSED, METRIC_ADD_MANY_ITEM_COUNT, METRIC_BUFFER_LENGTH, METRIC_FLUSH,
    METRIC_FLUSH_ENQUEUE_ELAPSED, METRIC_FLUSH_HANDLER, METRIC_FLUSH_HANDLER_ELAPSED,
    METRIC_FLUSH_ITEM_COUNT, METRIC_FLUSH_QUEUE_LENGTH,
};
use crate::store::ContentStore;

pub(crate) type FlushWorker<T> = Arc<Worker<Flush<T>>>;

/// Effective buffer settings, frozen at construction
#[derive(Debug, Clone, PartialEq)]
pub struct BufferSettings {
    pub max_len: usize,
    pub max_flushes: usize,
    pub parallelism: usize,
    pub interval: Duration,
    pub shutdown_grace_period: Duration,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_MAX_LEN,
            max_flushes: DEFAULT_MAX_FLUSHES,
            parallelism: default_parallelism(),
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            shutdown_grace_period: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_PERIOD_MS),
        }
    }
}

impl From<&AutoflushConfig> for BufferSettings {
    fn from(config: &AutoflushConfig) -> Self {
        Self {
            max_len: config.max_len,
            max_flushes: config.max_flushes,
            parallelism: config.parallelism(),
            interval: config.interval(),
            shutdown_grace_period: config.shutdown_grace_period(),
        }
    }
}

impl BufferSettings {
    fn check(&self) -> Result<(), AutoflushError> {
        if self.max_len == 0 {
            return Err(AutoflushError::config("max_len", "must be at least 1"));
        }
        if self.max_flushes == 0 {
            return Err(AutoflushError::config("max_flushes", "must be at least 1"));
        }
        if self.parallelism == 0 {
            return Err(AutoflushError::config("parallelism", "must be at least 1"));
        }
        if self.interval.is_zero() {
            return Err(AutoflushError::config("interval", "must be non-zero"));
        }
        Ok(())
    }
}

/// Builder for creating a Buffer
pub struct BufferBuilder<T, H> {
    handler: H,
    settings: BufferSettings,
    context: Option<FlushContext>,
    errors: Option<ErrorSink>,
    instruments: Instruments,
    _items: PhantomData<fn() -> T>,
}

impl<T, H> BufferBuilder<T, H>
where
    T: Send + 'static,
    H: FlushHandler<T> + Sync + 'static,
{
    fn new(handler: H) -> Self {
        Self {
            handler,
            settings: BufferSettings::default(),
            context: None,
            errors: None,
            instruments: Instruments::default(),
            _items: PhantomData,
        }
    }

    /// Apply every setting from a loaded configuration
    pub fn config(mut self, config: &AutoflushConfig) -> Self {
        self.settings = BufferSettings::from(config);
        self
    }

    pub fn max_len(mut self, max_len: usize) -> Self {
        self.settings.max_len = max_len;
        self
    }

    pub fn max_flushes(mut self, max_flushes: usize) -> Self {
        self.settings.max_flushes = max_flushes;
        self
    }

    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.settings.parallelism = parallelism;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.settings.interval = interval;
        self
    }

    pub fn shutdown_grace_period(mut self, grace: Duration) -> Self {
        self.settings.shutdown_grace_period = grace;
        self
    }

    /// Context used for interval flushes and as the parent of the shutdown deadline
    pub fn context(mut self, context: FlushContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Sink for handler errors, panics and discarded batches
    pub fn errors(mut self, errors: ErrorSink) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn stats(mut self, stats: Arc<dyn StatsCollector>) -> Self {
        self.instruments.stats = Some(stats);
        self
    }

    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.instruments.tracer = Some(tracer);
        self
    }

    /// Validate settings and build the buffer
    pub fn build(self) -> Result<Buffer<T, H>, AutoflushError> {
        self.settings.check()?;
        let (flushes_tx, flushes_rx) = async_channel::bounded(self.settings.max_flushes);

        Ok(Buffer {
            contents: Mutex::new(ContentStore::new(self.settings.max_len)),
            settings: self.settings,
            context: self.context.unwrap_or_default(),
            handler: Arc::new(self.handler),
            errors: self.errors,
            instruments: self.instruments,
            latch: Latch::new(),
            flushes_tx,
            flushes_rx,
            carry_over: Mutex::new(Vec::new()),
            runtime: OnceLock::new(),
            stop_requested: AtomicBool::new(false),
        })
    }
}

/// Workers and scheduler allocated by `start`
pub(crate) struct Runtime<T> {
    pub(crate) ready_rx: async_channel::Receiver<FlushWorker<T>>,
    pub(crate) workers: Vec<FlushWorker<T>>,
    pub(crate) interval: Arc<Interval>,
}

/// Size- and time-triggered batching buffer
pub struct Buffer<T, H> {
    pub(crate) settings: BufferSettings,
    pub(crate) context: FlushContext,
    handler: Arc<H>,
    pub(crate) errors: Option<ErrorSink>,
    instruments: Instruments,
    pub(crate) latch: Latch,

    contents: Mutex<ContentStore<T>>,
    pub(crate) flushes_tx: async_channel::Sender<Flush<T>>,
    pub(crate) flushes_rx: async_channel::Receiver<Flush<T>>,
    /// Flushes pulled off a full queue by the stopping dispatch loop
    pub(crate) carry_over: Mutex<Vec<Flush<T>>>,

    pub(crate) runtime: OnceLock<Runtime<T>>,
    pub(crate) stop_requested: AtomicBool,
}

impl<T, H> Buffer<T, H>
where
    T: Send + 'static,
    H: FlushHandler<T> + Sync + 'static,
{
    /// Start building a buffer around `handler`
    pub fn builder(handler: H) -> BufferBuilder<T, H> {
        BufferBuilder::new(handler)
    }

    /// Buffer with default settings
    pub fn new(handler: H) -> Result<Self, AutoflushError> {
        Self::builder(handler).build()
    }

    pub fn settings(&self) -> &BufferSettings {
        &self.settings
    }

    /// Context interval flushes are sealed with
    pub fn background(&self) -> &FlushContext {
        &self.context
    }

    pub fn latch(&self) -> &Latch {
        &self.latch
    }

    pub fn notify_started(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        self.latch.notify_started()
    }

    pub fn notify_stopped(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        self.latch.notify_stopped()
    }

    /// Items buffered and not yet sealed
    pub fn len(&self) -> usize {
        self.lock_contents().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sealed flushes waiting for a worker
    pub fn queued_flushes(&self) -> usize {
        self.flushes_tx.len()
    }

    /// Start the buffer and run the dispatch loop
    ///
    /// Completes once the buffer is stopped. To run it in the background:
    ///
    /// ```ignore
    /// let started = buffer.notify_started();
    /// tokio::spawn({
    ///     let buffer = Arc::clone(&buffer);
    ///     async move { buffer.start().await }
    /// });
    /// started.await;
    /// ```
    #[instrument(
        name = "buffer_start",
        skip(self),
        fields(
            max_len = self.settings.max_len,
            parallelism = self.settings.parallelism,
            max_flushes = self.settings.max_flushes
        )
    )]
    pub async fn start(self: &Arc<Self>) -> Result<(), AutoflushError> {
        if self.runtime.get().is_some()
            || !self
                .latch
                .transition(LatchState::Stopped, LatchState::Starting)
        {
            return Err(AutoflushError::CannotStart);
        }

        let parallelism = self.settings.parallelism;
        let (ready_tx, ready_rx) = async_channel::bounded(parallelism);
        let mut workers = Vec::with_capacity(parallelism);
        for id in 0..parallelism {
            let worker = Arc::new(
                Worker::new(id, self.work_action())
                    .with_errors(self.errors.clone())
                    .with_finalizer(return_to_pool(ready_tx.clone())),
            );
            let started = worker.latch().notify_started();
            tokio::spawn(Arc::clone(&worker).start());
            started.await;
            // the pool holds exactly `parallelism` workers
            let _ = ready_tx.try_send(Arc::clone(&worker));
            workers.push(worker);
        }

        let interval = Arc::new(
            Interval::new(
                self.settings.interval,
                self.context.clone(),
                self.interval_action(),
            )
            .with_errors(self.errors.clone()),
        );
        let interval_started = interval.latch().notify_started();
        let runner = Arc::clone(&interval);
        tokio::spawn(async move { runner.start().await });
        interval_started.await;

        let runtime = Runtime {
            ready_rx,
            workers,
            interval,
        };
        if self.runtime.set(runtime).is_err() {
            return Err(AutoflushError::CannotStart);
        }
        let Some(runtime) = self.runtime.get() else {
            return Err(AutoflushError::CannotStart);
        };

        info!(
            interval_ms = self.settings.interval.as_millis() as u64,
            "Buffer started"
        );
        self.dispatch(&runtime.ready_rx).await;
        info!("Buffer dispatch loop exited");
        Ok(())
    }

    /// Append one item, sealing a flush if it reaches `max_len`
    ///
    /// Never waits on the handler; waits on the flush queue only when it is full.
    pub async fn add(&self, ctx: &FlushContext, item: T) {
        let finisher = self.instruments.start(ctx, Span::Add);
        self.instruments.count(ctx, METRIC_ADD, 1);
        let start = Instant::now();

        let (buffer_length, sealed) = {
            let mut store = self.lock_contents();
            let length = store.len();
            (length, store.enqueue(item))
        };
        if let Some(contents) = sealed {
            self.submit(ctx, contents).await;
        }

        self.instruments
            .gauge(ctx, METRIC_BUFFER_LENGTH, buffer_length as f64);
        self.instruments.elapsed(ctx, METRIC_ADD_ELAPSED, start);
        finish(finisher, None);
    }

    /// Append many items under one lock acquisition
    ///
    /// Every threshold crossing seals its own flush; they are submitted in seal order
    /// before this returns.
    pub async fn add_many<I>(&self, ctx: &FlushContext, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        let finisher = self.instruments.start(ctx, Span::AddMany);
        self.instruments.count(ctx, METRIC_ADD_MANY, 1);
        let start = Instant::now();

        // caller iterators run before the store lock is taken
        let items: Vec<T> = items.into_iter().collect();
        let item_count = items.len();
        let (buffer_length, sealed) = {
            let mut store = self.lock_contents();
            let length = store.len();
            let sealed: Vec<Vec<T>> = items
                .into_iter()
                .filter_map(|item| store.enqueue(item))
                .collect();
            (length, sealed)
        };
        self.instruments
            .count(ctx, METRIC_ADD_MANY_ITEM_COUNT, item_count);

        for contents in sealed {
            self.submit(ctx, contents).await;
        }

        self.instruments
            .gauge(ctx, METRIC_BUFFER_LENGTH, buffer_length as f64);
        self.instruments.elapsed(ctx, METRIC_ADD_MANY_ELAPSED, start);
        finish(finisher, None);
    }

    /// Seal whatever is buffered, regardless of `max_len`
    ///
    /// Empty drains are not submitted.
    pub async fn flush(&self, ctx: &FlushContext) -> Result<(), AutoflushError> {
        let contents = self.lock_contents().drain();
        self.submit(ctx, contents).await;
        Ok(())
    }

    async fn submit(&self, ctx: &FlushContext, contents: Vec<T>) {
        if contents.is_empty() {
            return;
        }
        let finisher = self.instruments.start(ctx, Span::QueueFlush);
        let items = contents.len();
        let queue_length = self.flushes_tx.len();
        self.instruments.count(ctx, METRIC_FLUSH, 1);
        self.instruments
            .gauge(ctx, METRIC_FLUSH_QUEUE_LENGTH, queue_length as f64);
        self.instruments.count(ctx, METRIC_FLUSH_ITEM_COUNT, items);
        let start = Instant::now();

        debug!(queue_length, items, "queue flush");
        let err = match self.flushes_tx.send(Flush::new(ctx.clone(), contents)).await {
            Ok(()) => None,
            Err(_) => {
                warn!(items, "Flush queue closed, batch discarded");
                Some(AutoflushError::QueueClosed { items })
            }
        };

        self.instruments
            .elapsed(ctx, METRIC_FLUSH_ENQUEUE_ELAPSED, start);
        finish(finisher, err.as_ref());
        if let Some(err) = err {
            report_error(self.errors.as_ref(), err);
        }
    }

    fn work_action(&self) -> WorkAction<Flush<T>> {
        let handler = Arc::clone(&self.handler);
        let instruments = self.instruments.clone();
        Arc::new(move |flush: Flush<T>| {
            let handler = Arc::clone(&handler);
            let instruments = instruments.clone();
            async move { run_handler(handler.as_ref(), &instruments, flush).await }.boxed()
        })
    }

    fn interval_action(self: &Arc<Self>) -> IntervalAction {
        let buffer = Arc::downgrade(self);
        Arc::new(move |ctx: FlushContext| {
            let buffer = buffer.clone();
            async move {
                match buffer.upgrade() {
                    Some(buffer) => buffer.flush(&ctx).await,
                    None => Ok(()),
                }
            }
            .boxed()
        })
    }

    pub(crate) fn lock_contents(&self) -> MutexGuard<'_, ContentStore<T>> {
        self.contents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_carry_over(&self) -> MutexGuard<'_, Vec<Flush<T>>> {
        self.carry_over.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T, H> fmt::Debug for Buffer<T, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("settings", &self.settings)
            .field("state", &self.latch.state())
            .field("queued_flushes", &self.flushes_tx.len())
            .finish()
    }
}

async fn run_handler<T, H>(
    handler: &H,
    instruments: &Instruments,
    flush: Flush<T>,
) -> Result<(), AutoflushError>
where
    H: FlushHandler<T>,
{
    let (ctx, contents) = flush.into_parts();
    let (ctx, finisher) = instruments.start_flush(ctx);
    instruments.count(&ctx, METRIC_FLUSH_HANDLER, 1);
    let start = Instant::now();

    let span = ctx.span().clone();
    let result = handler.handle(ctx.clone(), contents).instrument(span).await;

    instruments.elapsed(&ctx, METRIC_FLUSH_HANDLER_ELAPSED, start);
    finish(finisher, result.as_ref().err());
    result
}

fn return_to_pool<T: Send + 'static>(
    ready: async_channel::Sender<FlushWorker<T>>,
) -> WorkerFinalizer<Flush<T>> {
    Arc::new(move |worker: &FlushWorker<T>| {
        ready
            .try_send(Arc::clone(worker))
            .map_err(|_| AutoflushError::WorkerReturn {
                worker_id: worker.id(),
            })
    })
}
