use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::block::RetryConfig;
use crate::error::ExtractError;
use crate::height::probe_chain_tip_height;
use crate::peer::PeerClient;
use crate::range::{extract_range, RangeOutcome};
use crate::reflect::Resolver;
use crate::sink::Sink;

/// Polls the peer's chain tip every `block_time` and extends the sweep to
/// cover newly observed heights. The poll sleep is cancellable so shutdown
/// is prompt even mid-wait.
pub async fn run_live(
    resolver: Arc<Resolver>,
    peer: Arc<PeerClient>,
    sink: Arc<dyn Sink>,
    retry_cfg: Arc<RetryConfig>,
    mut last_processed: u64,
    block_time: Duration,
    max_concurrency: usize,
    max_retries: u32,
    cancel: &CancellationToken,
) -> Result<(), ExtractError> {
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let tip = probe_chain_tip_height(&resolver, &peer, max_retries, cancel).await?;

        if tip > last_processed {
            let start = last_processed + 1;
            info!(start, stop = tip, "live extraction catching up to tip");

            match extract_range(
                resolver.clone(),
                peer.clone(),
                sink.clone(),
                retry_cfg.clone(),
                start,
                tip,
                max_concurrency,
                cancel,
            )
            .await?
            {
                RangeOutcome::Complete => last_processed = tip,
                RangeOutcome::PrunedRestart { lowest_height } => {
                    warn!(
                        lowest_height,
                        "pruned-node signal during live extraction, restarting from boundary"
                    );
                    last_processed = lowest_height.saturating_sub(1);
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(block_time) => {}
        }
    }
}
