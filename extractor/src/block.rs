use base64::Engine;
use metrics::counter;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::ExtractError;
use crate::peer::PeerClient;
use crate::reflect::Resolver;
use crate::retry::call_with_retries;
use crate::sink::{BlockRecord, TxRecord};

pub struct RetryConfig {
    pub max_retries: u32,
}

/// Fetches one height's block and every transaction it references,
/// demoting a transaction that fails to fetch to an error-metadata record
/// instead of failing the whole block (the block still lands; only the
/// failed transaction's payload is replaced).
pub async fn process_height(
    resolver: &Resolver,
    peer: &PeerClient,
    retry_cfg: &RetryConfig,
    height: u64,
    cancel: &CancellationToken,
) -> Result<(BlockRecord, Vec<TxRecord>), ExtractError> {
    let request = json!({ "height": height.to_string() });
    let block_json = call_with_retries(
        resolver,
        peer,
        "cosmos.tx.v1beta1.Service.GetBlockWithTxs",
        &request,
        retry_cfg.max_retries,
        cancel,
    )
    .await?;

    let tx_hashes = tx_hashes_from_block(&block_json);

    let mut txs = Vec::with_capacity(tx_hashes.len());
    for hash in tx_hashes {
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        let tx_request = json!({ "hash": hash.clone() });
        let payload = match call_with_retries(
            resolver,
            peer,
            "cosmos.tx.v1beta1.Service.GetTx",
            &tx_request,
            retry_cfg.max_retries,
            cancel,
        )
        .await
        {
            Ok(value) => value,
            Err(ExtractError::Cancelled) => return Err(ExtractError::Cancelled),
            Err(ExtractError::PrunedNode { lowest_height }) => {
                return Err(ExtractError::PrunedNode { lowest_height })
            }
            Err(err) => {
                warn!(height, hash = %hash, error = %err, "per-tx fetch failed, recording error metadata");
                counter!("extractor_tx_fetch_failures_total").increment(1);
                json!({
                    "error": "failed to fetch transaction details",
                    "hash": hash,
                    "reason": err.to_string(),
                })
            }
        };

        txs.push(TxRecord { hash, payload });
    }

    Ok((
        BlockRecord {
            height,
            payload: block_json,
        },
        txs,
    ))
}

/// Extracts and hashes each base64-encoded tx blob in `block.data.txs[]`.
fn tx_hashes_from_block(block_json: &Value) -> Vec<String> {
    let Some(raw_txs) = block_json
        .get("block")
        .and_then(|b| b.get("data"))
        .and_then(|d| d.get("txs"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    raw_txs
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|encoded| base64::engine::general_purpose::STANDARD.decode(encoded).ok())
        .map(|bytes| {
            let digest = Sha256::digest(&bytes);
            hex::encode(digest)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_base64_tx_blobs_with_sha256() {
        let raw = base64::engine::general_purpose::STANDARD.encode(b"hello");
        let block = json!({ "block": { "data": { "txs": [raw] } } });
        let hashes = tx_hashes_from_block(&block);
        assert_eq!(hashes.len(), 1);
        assert_eq!(hashes[0], hex::encode(Sha256::digest(b"hello")));
    }

    #[test]
    fn empty_txs_yields_no_hashes() {
        let block = json!({ "block": { "data": { "txs": [] } } });
        assert!(tx_hashes_from_block(&block).is_empty());
    }

    #[test]
    fn missing_data_field_yields_no_hashes() {
        let block = json!({ "block": {} });
        assert!(tx_hashes_from_block(&block).is_empty());
    }
}
