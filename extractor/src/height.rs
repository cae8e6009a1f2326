use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::ExtractError;
use crate::peer::PeerClient;
use crate::reflect::Resolver;
use crate::retry::call_with_retries;

/// Reads the peer's current chain tip height via the tendermint service.
pub async fn probe_chain_tip_height(
    resolver: &Resolver,
    peer: &PeerClient,
    max_retries: u32,
    cancel: &CancellationToken,
) -> Result<u64, ExtractError> {
    let response = call_with_retries(
        resolver,
        peer,
        "cosmos.base.tendermint.v1beta1.Service.GetLatestBlock",
        &json!({}),
        max_retries,
        cancel,
    )
    .await?;

    response
        .get("block")
        .and_then(|b| b.get("header"))
        .and_then(|h| h.get("height"))
        .and_then(|h| h.as_str().map(str::to_string).or_else(|| h.as_u64().map(|n| n.to_string())))
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| ExtractError::DecodeFailure {
            method: "GetLatestBlock".to_string(),
            reason: "response missing block.header.height".to_string(),
        })
}

/// Attempts height 1; a `PrunedNode` response tells us the lowest height
/// the peer is actually willing to serve.
pub async fn probe_earliest_available_height(
    resolver: &Resolver,
    peer: &PeerClient,
    max_retries: u32,
    cancel: &CancellationToken,
) -> Result<u64, ExtractError> {
    let request = json!({ "height": "1" });
    match call_with_retries(
        resolver,
        peer,
        "cosmos.tx.v1beta1.Service.GetBlockWithTxs",
        &request,
        max_retries,
        cancel,
    )
    .await
    {
        Ok(_) => Ok(1),
        Err(ExtractError::PrunedNode { lowest_height }) => Ok(lowest_height),
        Err(other) => Err(other),
    }
}
