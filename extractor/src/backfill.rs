use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::block::{process_height, RetryConfig};
use crate::error::ExtractError;
use crate::peer::PeerClient;
use crate::reflect::Resolver;
use crate::sink::Sink;

/// Fetches every height the sink reports missing in `[start, upper_bound]`,
/// sequentially (no concurrency — a backfill is expected to be small and
/// run alongside, not instead of, the main sweep).
pub async fn backfill_missing(
    resolver: &Resolver,
    peer: &PeerClient,
    sink: &Arc<dyn Sink>,
    retry_cfg: &RetryConfig,
    start: u64,
    upper_bound: u64,
    cancel: &CancellationToken,
) -> Result<(), ExtractError> {
    let missing = sink
        .missing_block_ids_in_range(start, upper_bound)
        .await
        .map_err(|source| ExtractError::SinkCommit {
            height: start,
            source,
        })?;

    if missing.is_empty() {
        return Ok(());
    }

    info!(count = missing.len(), "backfilling missing blocks");

    for height in missing {
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        let (block, txs) = process_height(resolver, peer, retry_cfg, height, cancel).await?;
        sink.commit(block, txs)
            .await
            .map_err(|source| ExtractError::SinkCommit { height, source })?;
    }

    Ok(())
}
