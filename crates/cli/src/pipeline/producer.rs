//! Synthetic producers feeding the buffer

use std::collections::BTreeMap;
use std::sync::Arc;

use autoflush::Buffer;
use contracts::{FlushContext, FlushHandler, LoadConfig};
use observability::record_items_added;
use tokio::task::JoinSet;
use tracing::{debug, Instrument};

use super::SyntheticEvent;

/// Producer settings
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub producers: usize,
    pub items_per_producer: u64,
    pub batch_size: usize,
    pub labels: BTreeMap<String, String>,
}

impl From<&LoadConfig> for ProducerConfig {
    fn from(load: &LoadConfig) -> Self {
        Self {
            producers: load.producers,
            items_per_producer: load.items_per_producer,
            batch_size: load.batch_size.max(1),
            labels: load.labels.clone(),
        }
    }
}

/// Spawn one task per producer; each yields the number of items it added
///
/// Producers stop early once `cancel` is done.
pub fn spawn_producers<H>(
    buffer: &Arc<Buffer<SyntheticEvent, H>>,
    config: &ProducerConfig,
    cancel: &FlushContext,
) -> JoinSet<u64>
where
    H: FlushHandler<SyntheticEvent> + Sync + 'static,
{
    let mut set = JoinSet::new();
    for id in 0..config.producers {
        let mut ctx = cancel.child().with_label("producer", id.to_string());
        for (key, value) in &config.labels {
            ctx = ctx.with_label(key.as_str(), value.as_str());
        }
        let span = tracing::info_span!("producer", id);
        set.spawn(
            produce(
                Arc::clone(buffer),
                id,
                config.items_per_producer,
                config.batch_size,
                ctx,
            )
            .instrument(span),
        );
    }
    set
}

async fn produce<H>(
    buffer: Arc<Buffer<SyntheticEvent, H>>,
    id: usize,
    items: u64,
    batch_size: usize,
    ctx: FlushContext,
) -> u64
where
    H: FlushHandler<SyntheticEvent> + Sync + 'static,
{
    let mut seq = 0u64;
    while seq < items {
        if ctx.is_done() {
            debug!(producer = id, added = seq, "producer cancelled");
            break;
        }
        let end = (seq + batch_size as u64).min(items);
        if end - seq == 1 {
            buffer
                .add(&ctx, SyntheticEvent { producer: id, seq })
                .await;
        } else {
            let batch = (seq..end).map(|seq| SyntheticEvent { producer: id, seq });
            buffer.add_many(&ctx, batch).await;
        }
        record_items_added(id, end - seq);
        seq = end;
    }
    seq
}
