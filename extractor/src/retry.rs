use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::ExtractError;
use crate::peer::PeerClient;
use crate::reflect::Resolver;

const BASE_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(5);
const MAX_TOTAL_WAIT: Duration = Duration::from_secs(120);

/// Calls `method_fqn` through the resolver, retrying transport failures with
/// bounded exponential backoff up to `max_retries` times. A peer error
/// matching the "lowest height is N" substring is parsed into
/// `ExtractError::PrunedNode` and returned immediately, never retried.
/// Cancellation is checked before every attempt and every sleep.
pub async fn call_with_retries(
    resolver: &Resolver,
    peer: &PeerClient,
    method_fqn: &str,
    request_json: &serde_json::Value,
    max_retries: u32,
    cancel: &CancellationToken,
) -> Result<serde_json::Value, ExtractError> {
    let mut attempt = 0u32;
    let mut waited = Duration::ZERO;

    loop {
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        match resolver.invoke_json(peer, method_fqn, request_json).await {
            Ok(value) => return Ok(value),
            Err(ExtractError::Transport { method, source }) => {
                if let Some(lowest_height) = parse_pruned_height(source.message()) {
                    return Err(ExtractError::PrunedNode { lowest_height });
                }

                attempt += 1;
                if attempt > max_retries || waited >= MAX_TOTAL_WAIT {
                    return Err(ExtractError::Transport { method, source });
                }

                let backoff = (BASE_BACKOFF * 2u32.saturating_pow(attempt.min(8))).min(MAX_BACKOFF);
                warn!(method = %method, attempt, backoff_ms = backoff.as_millis() as u64, "retrying after transport error");

                tokio::select! {
                    _ = cancel.cancelled() => return Err(ExtractError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
                waited += backoff;
            }
            Err(other) => return Err(other),
        }
    }
}

/// Parses the peer's pruned-history error message for the height below
/// which blocks are no longer available, e.g. `"...lowest height is 100..."`.
pub fn parse_pruned_height(message: &str) -> Option<u64> {
    let idx = message.find("lowest height is")?;
    let rest = &message[idx + "lowest height is".len()..];
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pruned_height_from_typical_message() {
        let msg = "rpc error: code = NotFound desc = block height 5 is not available, lowest height is 100";
        assert_eq!(parse_pruned_height(msg), Some(100));
    }

    #[test]
    fn returns_none_when_phrase_absent() {
        assert_eq!(parse_pruned_height("connection refused"), None);
    }

    #[test]
    fn handles_trailing_non_digit_text() {
        let msg = "lowest height is 42 (pruned)";
        assert_eq!(parse_pruned_height(msg), Some(42));
    }
}
