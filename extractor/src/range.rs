use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::block::{process_height, RetryConfig};
use crate::error::ExtractError;
use crate::peer::PeerClient;
use crate::pruned::PrunedNodeSignal;
use crate::reflect::Resolver;
use crate::sink::Sink;

/// Outcome of a range sweep: either every height in `[start, stop]` landed,
/// or a pruned-node signal cut the sweep short at `lowest_height`.
pub enum RangeOutcome {
    Complete,
    PrunedRestart { lowest_height: u64 },
}

const PROGRESS_BAR_THRESHOLD: u64 = 500;

/// Extracts every height in `[start, stop]` (inclusive) with at most
/// `max_concurrency` heights in flight at once. Each worker holds one
/// semaphore permit for its entire lifetime, released on every exit path —
/// success, per-height error, or cancellation — so the pool can never leak
/// permits.
pub async fn extract_range(
    resolver: Arc<Resolver>,
    peer: Arc<PeerClient>,
    sink: Arc<dyn Sink>,
    retry_cfg: Arc<RetryConfig>,
    start: u64,
    stop: u64,
    max_concurrency: usize,
    parent_cancel: &CancellationToken,
) -> Result<RangeOutcome, ExtractError> {
    if start > stop {
        return Err(ExtractError::RangeMisconfigured(format!(
            "start {start} is greater than stop {stop}"
        )));
    }

    let sweep_cancel = parent_cancel.child_token();
    let signal = Arc::new(PrunedNodeSignal::new(sweep_cancel.clone()));
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));

    let total = stop - start + 1;
    let progress = (total >= PROGRESS_BAR_THRESHOLD).then(|| {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} heights ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    });

    let mut tasks = JoinSet::new();
    let mut processed = 0u64;
    let mut first_error: Option<ExtractError> = None;

    for height in start..=stop {
        if sweep_cancel.is_cancelled() {
            break;
        }

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let resolver = resolver.clone();
        let peer = peer.clone();
        let sink = sink.clone();
        let retry_cfg = retry_cfg.clone();
        let signal = signal.clone();
        let worker_cancel = sweep_cancel.clone();

        tasks.spawn(async move {
            let _permit = permit;
            let outcome = process_height(&resolver, &peer, &retry_cfg, height, &worker_cancel).await;
            match outcome {
                Ok((block, txs)) => {
                    if let Err(err) = sink.commit(block, txs).await {
                        return Err(ExtractError::SinkCommit { height, source: err });
                    }
                    Ok(height)
                }
                Err(ExtractError::PrunedNode { lowest_height }) => {
                    signal.signal(lowest_height);
                    Err(ExtractError::PrunedNode { lowest_height })
                }
                Err(err) => Err(err),
            }
        });

        while tasks.len() >= max_concurrency.max(1) {
            if let Some(joined) = tasks.join_next().await {
                handle_joined(joined, &progress, &mut processed, &mut first_error);
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        handle_joined(joined, &progress, &mut processed, &mut first_error);
    }

    if let Some(bar) = &progress {
        bar.finish_and_clear();
    }

    info!(processed, start, stop, "range sweep finished");

    if let Some(lowest_height) = signal.observed() {
        return Ok(RangeOutcome::PrunedRestart { lowest_height });
    }

    if parent_cancel.is_cancelled() {
        return Err(ExtractError::Cancelled);
    }

    if let Some(err) = first_error {
        return Err(err);
    }

    Ok(RangeOutcome::Complete)
}

fn handle_joined(
    joined: Result<Result<u64, ExtractError>, tokio::task::JoinError>,
    progress: &Option<ProgressBar>,
    processed: &mut u64,
    first_error: &mut Option<ExtractError>,
) {
    match joined {
        Ok(Ok(height)) => {
            *processed += 1;
            if let Some(bar) = progress {
                bar.inc(1);
            }
            if *processed % 100 == 0 {
                info!(processed, height, "range sweep progress");
            }
        }
        Ok(Err(ExtractError::PrunedNode { .. })) => {}
        Ok(Err(ExtractError::Cancelled)) => {}
        Ok(Err(err)) => {
            error!(error = %err, "height extraction failed");
            if first_error.is_none() {
                *first_error = Some(err);
            }
        }
        Err(join_err) => {
            error!(error = %join_err, "worker task panicked or was aborted");
        }
    }
}
