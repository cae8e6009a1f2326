use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::backfill::backfill_missing;
use crate::block::RetryConfig;
use crate::config::Config;
use crate::error::ExtractError;
use crate::height::{probe_chain_tip_height, probe_earliest_available_height};
use crate::live::run_live;
use crate::peer::PeerClient;
use crate::range::{extract_range, RangeOutcome};
use crate::reflect::Resolver;
use crate::sink::Sink;

const MAX_BOUNDARY_ADVANCES: u32 = 10;

/// Resolves the effective `[start, stop]` range per the configuration's
/// reindex/start/stop fields, runs the warm-up probe to find the peer's
/// earliest available height, backfills any gap the sink already reports,
/// then sweeps the range (re-entering on every pruned-node restart) and
/// finally tails the chain tip if `live` is set.
pub async fn extract(
    cfg: &Config,
    peer: Arc<PeerClient>,
    resolver: Arc<Resolver>,
    sink: Arc<dyn Sink>,
    cancel: &CancellationToken,
) -> Result<(), ExtractError> {
    let retry_cfg = Arc::new(RetryConfig {
        max_retries: cfg.max_retries,
    });

    let mut start = resolve_start(cfg, &sink, &resolver, &peer, cancel).await?;
    let tip = probe_chain_tip_height(&resolver, &peer, cfg.max_retries, cancel).await?;
    let mut stop = cfg.stop.unwrap_or(tip);

    if start > stop {
        return Err(ExtractError::RangeMisconfigured(format!(
            "resolved start {start} is greater than resolved stop {stop}"
        )));
    }

    // Warm-up probe: advance `start` past any pruned history before the
    // first real sweep, bounded so a badly pruned peer can't stall forever.
    for _ in 0..MAX_BOUNDARY_ADVANCES {
        let earliest = probe_earliest_available_height(&resolver, &peer, cfg.max_retries, cancel).await?;
        if earliest <= start {
            break;
        }
        if earliest > stop {
            return Err(ExtractError::PruneBoundaryExceedsStop {
                lowest_height: earliest,
                stop,
            });
        }
        start = earliest;
    }

    // §4.6 "Skipping the missing-block backfill": an explicit [start, stop]
    // or a reindex is a declared exact intent, so the recovery pass for
    // holes left by prior crashed sweeps is skipped.
    let skip_backfill = cfg.reindex || (cfg.start.is_some() && cfg.stop.is_some());
    if !skip_backfill {
        if let Some(earliest_stored) = sink
            .earliest_stored()
            .await
            .map_err(|source| ExtractError::SinkCommit { height: start, source })?
        {
            if earliest_stored <= start {
                backfill_missing(
                    &resolver,
                    &peer,
                    &sink,
                    &retry_cfg,
                    earliest_stored,
                    start.saturating_sub(1).max(earliest_stored),
                    cancel,
                )
                .await?;
            }
        }
    }

    loop {
        match extract_range(
            resolver.clone(),
            peer.clone(),
            sink.clone(),
            retry_cfg.clone(),
            start,
            stop,
            cfg.max_concurrency,
            cancel,
        )
        .await?
        {
            RangeOutcome::Complete => break,
            RangeOutcome::PrunedRestart { lowest_height } => {
                info!(lowest_height, "restarting sweep past pruned boundary");
                if lowest_height > stop {
                    return Err(ExtractError::PruneBoundaryExceedsStop { lowest_height, stop });
                }
                start = lowest_height;
            }
        }
    }

    if cfg.live {
        stop = stop.max(probe_chain_tip_height(&resolver, &peer, cfg.max_retries, cancel).await?);
        run_live(
            resolver,
            peer,
            sink,
            retry_cfg,
            stop,
            Duration::from_secs(cfg.block_time_secs),
            cfg.max_concurrency,
            cfg.max_retries,
            cancel,
        )
        .await?;
    }

    Ok(())
}

async fn resolve_start(
    cfg: &Config,
    sink: &Arc<dyn Sink>,
    resolver: &Resolver,
    peer: &PeerClient,
    cancel: &CancellationToken,
) -> Result<u64, ExtractError> {
    if let Some(start) = cfg.start {
        return Ok(start);
    }

    if cfg.reindex {
        let earliest_stored = sink
            .earliest_stored()
            .await
            .map_err(|source| ExtractError::SinkCommit { height: 0, source })?;
        return match earliest_stored {
            Some(height) => Ok(height),
            None => probe_earliest_available_height(resolver, peer, cfg.max_retries, cancel).await,
        };
    }

    let latest = sink
        .latest_stored()
        .await
        .map_err(|source| ExtractError::SinkCommit { height: 0, source })?;

    match latest {
        Some(height) => Ok(height + 1),
        None => probe_earliest_available_height(resolver, peer, cfg.max_retries, cancel).await,
    }
}
