//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 典型场景（数量阈值、间隔刷新、关闭排空、指标事件）
//! - 并发不变量（条目守恒、并发上限、无空批次、调用内顺序）
//! - 关闭超时、错误通道与配置加载的跨 crate 验证

#[cfg(test)]
mod support {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use autoflush::{AutoflushError, Buffer, FlushContext, FlushHandler};

    /// Records every batch handed to the handler
    #[derive(Clone, Default)]
    pub struct Recorder {
        batches: Arc<Mutex<Vec<Vec<u32>>>>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
    }

    impl Recorder {
        pub fn handler(&self) -> impl FlushHandler<u32> + Sync + 'static {
            self.slow_handler(Duration::ZERO)
        }

        /// Handler that holds each batch for `delay` before recording it
        pub fn slow_handler(&self, delay: Duration) -> impl FlushHandler<u32> + Sync + 'static {
            let recorder = self.clone();
            move |_ctx: FlushContext, items: Vec<u32>| {
                let recorder = recorder.clone();
                async move {
                    let now = recorder.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    recorder.max_in_flight.fetch_max(now, Ordering::SeqCst);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    recorder.batches.lock().unwrap().push(items);
                    recorder.in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, AutoflushError>(())
                }
            }
        }

        pub fn batches(&self) -> Vec<Vec<u32>> {
            self.batches.lock().unwrap().clone()
        }

        pub fn total(&self) -> usize {
            self.batches.lock().unwrap().iter().map(Vec::len).sum()
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    /// Start the buffer on its own task and wait until it is running
    pub async fn spawn_started<H>(buffer: &Arc<Buffer<u32, H>>)
    where
        H: FlushHandler<u32> + Sync + 'static,
    {
        let started = buffer.notify_started();
        let runner = Arc::clone(buffer);
        tokio::spawn(async move { runner.start().await });
        started.await;
    }

    /// Poll `check` until it holds or `timeout` passes
    pub async fn eventually(timeout: Duration, check: impl Fn() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        check()
    }
}

#[cfg(test)]
mod scenario_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use autoflush::instrument::{METRIC_FLUSH, METRIC_FLUSH_QUEUE_LENGTH};
    use autoflush::{Buffer, FlushContext};
    use observability::MockCollector;

    use crate::support::{eventually, spawn_started, Recorder};

    /// Size threshold alone seals every batch
    #[tokio::test]
    async fn test_size_triggered_flushes() {
        let recorder = Recorder::default();
        let buffer = Arc::new(
            Buffer::<u32, _>::builder(recorder.handler())
                .max_len(10)
                .interval(Duration::from_secs(3600))
                .build()
                .unwrap(),
        );
        spawn_started(&buffer).await;

        let ctx = FlushContext::background();
        for i in 0..20 {
            buffer.add(&ctx, i).await;
        }

        assert!(eventually(Duration::from_secs(2), || recorder.total() == 20).await);
        assert!(recorder.batches().len() >= 2);
        buffer.stop().await.unwrap();
    }

    /// The interval flushes a batch that never reaches max_len
    #[tokio::test]
    async fn test_interval_triggered_flush() {
        let recorder = Recorder::default();
        let buffer = Arc::new(
            Buffer::<u32, _>::builder(recorder.handler())
                .max_len(100)
                .interval(Duration::from_millis(1))
                .build()
                .unwrap(),
        );
        spawn_started(&buffer).await;

        let ctx = FlushContext::background();
        for i in 0..20 {
            buffer.add(&ctx, i).await;
        }

        assert!(eventually(Duration::from_secs(2), || recorder.total() == 20).await);
        buffer.stop().await.unwrap();
    }

    /// Stop hands the partial batch to a worker before returning
    #[tokio::test]
    async fn test_stop_drains_everything() {
        let recorder = Recorder::default();
        let buffer = Arc::new(
            Buffer::<u32, _>::builder(recorder.handler())
                .max_len(10)
                .interval(Duration::from_secs(3600))
                .shutdown_grace_period(Duration::from_secs(5))
                .build()
                .unwrap(),
        );
        spawn_started(&buffer).await;

        let ctx = FlushContext::background();
        for i in 0..25 {
            buffer.add(&ctx, i).await;
        }
        buffer.stop().await.unwrap();

        assert!(buffer.latch().is_stopped());
        assert_eq!(recorder.total(), 25);
        assert!(buffer.is_empty());
    }

    /// One flush event and one queue-length sample per sealed batch
    #[tokio::test]
    async fn test_flush_metrics_on_unstarted_buffer() {
        let stats = MockCollector::new();
        let buffer = Buffer::<u32, _>::builder(Recorder::default().handler())
            .max_len(10)
            .stats(Arc::new(stats.clone()))
            .build()
            .unwrap();

        let ctx = FlushContext::background();
        for call in 0..5u32 {
            buffer.add_many(&ctx, call * 10..call * 10 + 10).await;
        }

        let flushes = stats.named(METRIC_FLUSH);
        assert_eq!(flushes.len(), 5);
        assert_eq!(stats.total_count(METRIC_FLUSH), 5);
        assert_eq!(
            stats.gauges(METRIC_FLUSH_QUEUE_LENGTH),
            vec![0.0, 1.0, 2.0, 3.0, 4.0]
        );
        assert_eq!(buffer.queued_flushes(), 5);
        assert!(buffer.is_empty());
    }
}

#[cfg(test)]
mod invariant_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use autoflush::{Buffer, FlushContext};

    use crate::support::{spawn_started, Recorder};

    /// Concurrent producers: everything added is handled, in non-empty batches, by at most
    /// `parallelism` handlers at a time
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_conserve_items() {
        let recorder = Recorder::default();
        let buffer = Arc::new(
            Buffer::<u32, _>::builder(recorder.slow_handler(Duration::from_millis(2)))
                .max_len(7)
                .max_flushes(4)
                .parallelism(3)
                .interval(Duration::from_millis(10))
                .build()
                .unwrap(),
        );
        spawn_started(&buffer).await;

        let mut producers = Vec::new();
        for producer in 0..4u32 {
            let buffer = Arc::clone(&buffer);
            producers.push(tokio::spawn(async move {
                let ctx = FlushContext::background().with_label("producer", producer.to_string());
                for i in 0..50 {
                    let item = producer * 1000 + i;
                    if i % 5 == 0 {
                        buffer.add_many(&ctx, [item]).await;
                    } else {
                        buffer.add(&ctx, item).await;
                    }
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        buffer.stop().await.unwrap();

        let batches = recorder.batches();
        assert!(batches.iter().all(|b| !b.is_empty()));
        assert!(batches.iter().all(|b| b.len() <= 7));
        assert_eq!(recorder.total(), 200);
        assert!(recorder.max_in_flight() <= 3, "{}", recorder.max_in_flight());

        let mut items: Vec<u32> = batches.into_iter().flatten().collect();
        items.sort_unstable();
        items.dedup();
        assert_eq!(items.len(), 200);
    }

    /// Items of a single add_many call keep their relative order inside each batch
    #[tokio::test]
    async fn test_add_many_keeps_call_order() {
        let recorder = Recorder::default();
        let buffer = Arc::new(
            Buffer::<u32, _>::builder(recorder.handler())
                .max_len(7)
                .parallelism(2)
                .build()
                .unwrap(),
        );
        spawn_started(&buffer).await;

        buffer.add_many(&FlushContext::background(), 0..100).await;
        buffer.stop().await.unwrap();

        let batches = recorder.batches();
        assert_eq!(recorder.total(), 100);
        for batch in &batches {
            assert!(batch.windows(2).all(|w| w[0] + 1 == w[1]), "{batch:?}");
        }
        let full = batches.iter().filter(|b| b.len() == 7).count();
        assert_eq!(full, 14);
    }

    /// The Nth add seals exactly one batch of N and leaves the store empty
    #[tokio::test]
    async fn test_threshold_boundary() {
        let buffer = Buffer::<u32, _>::builder(Recorder::default().handler())
            .max_len(5)
            .build()
            .unwrap();
        let ctx = FlushContext::background();
        for i in 0..4 {
            buffer.add(&ctx, i).await;
        }
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.queued_flushes(), 0);

        buffer.add(&ctx, 4).await;
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.queued_flushes(), 1);
    }
}

#[cfg(test)]
mod shutdown_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use autoflush::{AutoflushError, Buffer, FlushContext};
    use tokio::sync::mpsc;

    use crate::support::{spawn_started, Recorder};

    /// A handler slower than the grace period does not hold up stop
    #[tokio::test]
    async fn test_stop_abandons_work_after_deadline() {
        let recorder = Recorder::default();
        let buffer = Arc::new(
            Buffer::<u32, _>::builder(recorder.slow_handler(Duration::from_secs(30)))
                .max_len(1)
                .parallelism(1)
                .shutdown_grace_period(Duration::from_millis(100))
                .build()
                .unwrap(),
        );
        spawn_started(&buffer).await;

        let ctx = FlushContext::background();
        for i in 0..3 {
            buffer.add(&ctx, i).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let begin = Instant::now();
        let stopped = tokio::time::timeout(Duration::from_secs(5), buffer.stop())
            .await
            .expect("stop returns once the grace period is spent");
        assert!(stopped.is_ok());
        assert!(begin.elapsed() < Duration::from_secs(5));
        assert_eq!(recorder.total(), 0);
    }

    /// A flush the dispatch loop pulled off the queue when stop arrived is still handled
    #[tokio::test]
    async fn test_requeued_flush_survives_stop() {
        let recorder = Recorder::default();
        let buffer = Arc::new(
            Buffer::<u32, _>::builder(recorder.slow_handler(Duration::from_millis(30)))
                .max_len(1)
                .max_flushes(1)
                .parallelism(1)
                .interval(Duration::from_secs(3600))
                .build()
                .unwrap(),
        );
        spawn_started(&buffer).await;

        let ctx = FlushContext::background();
        for i in 0..6 {
            buffer.add(&ctx, i).await;
        }
        buffer.stop().await.unwrap();

        assert_eq!(recorder.total(), 6);
        let mut items: Vec<u32> = recorder.batches().into_iter().flatten().collect();
        items.sort_unstable();
        assert_eq!(items, (0..6).collect::<Vec<_>>());
    }

    /// A producer whose sealed batch meets a full queue waits instead of dropping it
    #[tokio::test]
    async fn test_full_queue_blocks_producer() {
        let recorder = Recorder::default();
        let buffer = Arc::new(
            Buffer::<u32, _>::builder(recorder.handler())
                .max_len(1)
                .max_flushes(1)
                .interval(Duration::from_secs(3600))
                .build()
                .unwrap(),
        );
        let ctx = FlushContext::background();
        buffer.add(&ctx, 0).await;
        assert_eq!(buffer.queued_flushes(), 1);

        let pending = tokio::time::timeout(Duration::from_millis(50), buffer.add(&ctx, 1)).await;
        assert!(pending.is_err(), "second sealing add should wait on the full queue");

        let blocked = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.add(&FlushContext::background(), 2).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        spawn_started(&buffer).await;
        tokio::time::timeout(Duration::from_secs(2), blocked)
            .await
            .expect("producer released once workers drain the queue")
            .unwrap();
        buffer.stop().await.unwrap();

        // the add abandoned by the timeout above never reached the queue
        let mut items: Vec<u32> = recorder.batches().into_iter().flatten().collect();
        items.sort_unstable();
        assert_eq!(items, vec![0, 2]);
    }

    #[tokio::test]
    async fn test_lifecycle_misuse() {
        let buffer = Arc::new(
            Buffer::<u32, _>::builder(Recorder::default().handler())
                .build()
                .unwrap(),
        );
        assert!(matches!(buffer.stop().await, Err(AutoflushError::CannotStop)));

        spawn_started(&buffer).await;
        assert!(matches!(buffer.start().await, Err(AutoflushError::CannotStart)));

        buffer.stop().await.unwrap();
        assert!(matches!(buffer.stop().await, Err(AutoflushError::CannotStop)));
        assert!(matches!(buffer.start().await, Err(AutoflushError::CannotStart)));
    }

    /// Items added after stop are reported instead of silently lost
    #[tokio::test]
    async fn test_add_after_stop_reports_queue_closed() {
        let (tx, mut rx) = mpsc::channel(8);
        let buffer = Arc::new(
            Buffer::<u32, _>::builder(Recorder::default().handler())
                .max_len(2)
                .errors(tx)
                .build()
                .unwrap(),
        );
        spawn_started(&buffer).await;
        buffer.stop().await.unwrap();

        let ctx = FlushContext::background();
        buffer.add_many(&ctx, [1, 2]).await;

        match rx.recv().await {
            Some(AutoflushError::QueueClosed { items }) => assert_eq!(items, 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    /// Handler errors and panics reach the errors sink; the worker keeps serving
    #[tokio::test]
    async fn test_handler_failures_reach_errors_sink() {
        let (tx, mut rx) = mpsc::channel(8);
        let handled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&handled);
        let handler = move |_ctx: FlushContext, items: Vec<u32>| {
            let counter = Arc::clone(&counter);
            async move {
                match items.first() {
                    Some(7) => Err(AutoflushError::handler("rejected batch")),
                    Some(13) => panic!("poisoned item"),
                    _ => {
                        counter.fetch_add(items.len(), Ordering::SeqCst);
                        Ok(())
                    }
                }
            }
        };
        let buffer = Arc::new(
            Buffer::<u32, _>::builder(handler)
                .max_len(1)
                .parallelism(1)
                .errors(tx)
                .build()
                .unwrap(),
        );
        spawn_started(&buffer).await;

        let ctx = FlushContext::background();
        for item in [1, 7, 13, 2] {
            buffer.add(&ctx, item).await;
        }
        buffer.stop().await.unwrap();

        let mut errors = Vec::new();
        while let Ok(err) = rx.try_recv() {
            errors.push(err);
        }
        assert_eq!(errors.len(), 2, "{errors:?}");
        assert!(errors
            .iter()
            .any(|e| matches!(e, AutoflushError::Handler { .. })));
        assert!(errors.iter().any(
            |e| matches!(e, AutoflushError::Panicked { message, .. } if message.contains("poisoned"))
        ));
        assert_eq!(handled.load(Ordering::SeqCst), 2);
    }
}

#[cfg(test)]
mod instrumentation_tests {
    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use autoflush::instrument::{
        METRIC_ADD, METRIC_ADD_MANY_ITEM_COUNT, METRIC_FLUSH_HANDLER, METRIC_FLUSH_ITEM_COUNT,
    };
    use autoflush::{AutoflushError, Buffer, FlushContext};
    use observability::{MockCollector, MultiCollector, SpanTracer};

    use crate::support::{spawn_started, Recorder};

    /// A failing collector never affects delivery
    #[tokio::test]
    async fn test_failing_collector_is_ignored() {
        let failing = MockCollector::new();
        failing.fail_with("collector down");
        let healthy = MockCollector::new().with_default_tag("env", "test");
        let stats = MultiCollector::new(vec![Arc::new(failing), Arc::new(healthy.clone())]);

        let recorder = Recorder::default();
        let buffer = Arc::new(
            Buffer::<u32, _>::builder(recorder.handler())
                .max_len(4)
                .interval(Duration::from_secs(3600))
                .stats(Arc::new(stats))
                .build()
                .unwrap(),
        );
        spawn_started(&buffer).await;

        let ctx = FlushContext::background().with_label("run", "7");
        for i in 0..6 {
            buffer.add(&ctx, i).await;
        }
        buffer.add_many(&ctx, [6, 7]).await;
        buffer.stop().await.unwrap();

        assert_eq!(recorder.total(), 8);
        assert_eq!(healthy.total_count(METRIC_ADD), 6);
        assert_eq!(healthy.total_count(METRIC_ADD_MANY_ITEM_COUNT), 2);
        assert_eq!(healthy.total_count(METRIC_FLUSH_ITEM_COUNT), 8);
        assert_eq!(healthy.total_count(METRIC_FLUSH_HANDLER), 2);

        let adds = healthy.named(METRIC_ADD);
        assert!(adds
            .iter()
            .all(|m| m.tags.contains(&"env:test".to_string())
                && m.tags.contains(&"run:7".to_string())));
    }

    /// The handler sees the labels of the context that sealed its batch
    #[tokio::test]
    async fn test_tracer_context_reaches_handler() {
        let seen: Arc<Mutex<BTreeSet<String>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let handler = move |ctx: FlushContext, _items: Vec<u32>| {
            let sink = Arc::clone(&sink);
            async move {
                if let Some(tenant) = ctx.labels().get("tenant") {
                    sink.lock().unwrap().insert(tenant.clone());
                }
                Ok::<_, AutoflushError>(())
            }
        };
        let buffer = Arc::new(
            Buffer::<u32, _>::builder(handler)
                .max_len(2)
                .interval(Duration::from_secs(3600))
                .tracer(Arc::new(SpanTracer::new()))
                .build()
                .unwrap(),
        );
        spawn_started(&buffer).await;

        let base = FlushContext::background();
        buffer.add_many(&base.with_label("tenant", "a"), [1, 2]).await;
        buffer.add_many(&base.with_label("tenant", "b"), [3, 4]).await;
        buffer.stop().await.unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, BTreeSet::from(["a".to_string(), "b".to_string()]));
    }
}

#[cfg(test)]
mod end_to_end_tests {
    use std::sync::Arc;

    use autoflush::{Buffer, FileHandler, FileHandlerConfig, FlushContext};
    use config_loader::{ConfigFormat, ConfigLoader};

    use crate::support::{spawn_started, Recorder};

    /// Loaded configuration drives the buffer settings
    #[tokio::test]
    async fn test_config_file_to_buffer() {
        let config = ConfigLoader::load_from_str(
            "[buffer]\nmax_len = 3\nparallelism = 2\ninterval_ms = 3600000\n",
            ConfigFormat::Toml,
        )
        .unwrap();
        let recorder = Recorder::default();
        let buffer = Arc::new(
            Buffer::<u32, _>::builder(recorder.handler())
                .config(&config.buffer)
                .build()
                .unwrap(),
        );
        assert_eq!(buffer.settings().max_len, 3);
        assert_eq!(buffer.settings().parallelism, 2);

        spawn_started(&buffer).await;
        buffer
            .add_many(&FlushContext::background(), 0..10)
            .await;
        buffer.stop().await.unwrap();

        let sizes: Vec<usize> = recorder.batches().iter().map(Vec::len).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 10);
        assert_eq!(sizes.iter().filter(|&&n| n == 3).count(), 3);
    }

    /// Every batch lands as one JSON line, the final partial one included
    #[tokio::test]
    async fn test_file_handler_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("flushes.jsonl");
        let handler = FileHandler::new("e2e", FileHandlerConfig { path: path.clone() }).unwrap();
        let buffer = Arc::new(
            Buffer::<u32, _>::builder(handler)
                .max_len(10)
                .parallelism(1)
                .build()
                .unwrap(),
        );
        spawn_started(&buffer).await;

        let ctx = FlushContext::background().with_label("source", "e2e");
        buffer.add_many(&ctx, 0..25).await;
        buffer.stop().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        // the final partial batch is sealed with the shutdown context, not the caller's
        let labelled = lines
            .iter()
            .filter(|l| l.contains("\"source\":\"e2e\""))
            .count();
        assert_eq!(labelled, 2);
        assert!(lines[2].contains("\"count\":5"));
    }
}
