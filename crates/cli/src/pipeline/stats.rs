//! Run statistics.

use std::time::Duration;

use observability::BatchSummary;

/// Statistics from a `run` invocation
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Items added by all producers
    pub items_added: u64,

    /// Errors delivered on the buffer's errors sink
    pub errors: u64,

    /// Whether producers were stopped by a signal
    pub interrupted: bool,

    /// Time from the first producer start to the end of `stop`
    pub duration: Duration,

    /// Handler-side batch statistics
    pub batches: BatchSummary,
}

impl RunStats {
    /// Items handled per second
    pub fn throughput(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.batches.items as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Items added but never seen by a successful handler call
    pub fn items_lost(&self) -> u64 {
        self.items_added.saturating_sub(self.batches.items)
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Run Statistics ===\n");
        println!("Overview");
        println!("  Duration: {:.2}s", self.duration.as_secs_f64());
        println!("  Items added: {}", self.items_added);
        println!("  Throughput: {:.2} items/s", self.throughput());
        if self.interrupted {
            println!("  Interrupted by signal");
        }
        if self.errors > 0 {
            println!("  Errors reported: {}", self.errors);
        }
        if self.items_lost() > 0 {
            println!("  Items not handled: {}", self.items_lost());
        }

        println!("\nHandler");
        for line in self.batches.to_string().lines() {
            println!("  {}", line);
        }
        println!();
    }
}
