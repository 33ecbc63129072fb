//! 运行指标模块
//!
//! 汇总 handler 收到的批次大小与耗时，并通过 `metrics` 门面导出。

use std::fmt;

use metrics::{counter, histogram};

/// 记录一次 handler 调用
pub fn record_batch_handled(handler: &str, items: usize, elapsed_ms: f64, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "autoflush_batches_handled_total",
        "handler" => handler.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    counter!("autoflush_items_handled_total", "handler" => handler.to_string())
        .increment(items as u64);
    histogram!("autoflush_batch_size", "handler" => handler.to_string()).record(items as f64);
    histogram!("autoflush_handler_latency_ms", "handler" => handler.to_string())
        .record(elapsed_ms);
}

/// 记录生产者写入的条目数
pub fn record_items_added(producer: usize, items: u64) {
    counter!(
        "autoflush_items_added_total",
        "producer" => producer.to_string()
    )
    .increment(items);
}

/// 批次统计聚合器
///
/// 在内存中聚合 handler 视角的统计，便于输出运行摘要。
#[derive(Debug, Clone, Default)]
pub struct BatchStatsAggregator {
    /// 成功处理的批次数
    pub batches: u64,
    /// 失败的批次数
    pub failed_batches: u64,
    /// 成功处理的条目数
    pub items: u64,
    /// 批次大小统计
    pub batch_size: RunningStats,
    /// handler 耗时统计 (毫秒)
    pub handler_ms: RunningStats,
}

impl BatchStatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新聚合统计
    pub fn update(&mut self, items: usize, elapsed_ms: f64, success: bool) {
        if success {
            self.batches += 1;
            self.items += items as u64;
        } else {
            self.failed_batches += 1;
        }
        self.batch_size.push(items as f64);
        self.handler_ms.push(elapsed_ms);
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            batches: self.batches,
            failed_batches: self.failed_batches,
            items: self.items,
            batch_size: StatsSummary::from(&self.batch_size),
            handler_ms: StatsSummary::from(&self.handler_ms),
        }
    }
}

/// 批次摘要
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub batches: u64,
    pub failed_batches: u64,
    pub items: u64,
    pub batch_size: StatsSummary,
    pub handler_ms: StatsSummary,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Batches handled: {}", self.batches)?;
        if self.failed_batches > 0 {
            writeln!(f, "Batches failed: {}", self.failed_batches)?;
        }
        writeln!(f, "Items handled: {}", self.items)?;
        writeln!(f, "Batch size: {}", self.batch_size)?;
        write!(f, "Handler latency (ms): {}", self.handler_ms)
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count(),
            min: stats.min(),
            max: stats.max(),
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 0 {
            return write!(f, "N/A");
        }
        write!(
            f,
            "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
            self.min, self.max, self.mean, self.std_dev, self.count
        )
    }
}

/// 在线统计 (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
