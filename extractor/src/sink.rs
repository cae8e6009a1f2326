use async_trait::async_trait;
use serde_json::Value;

/// One block's record as committed to a sink. The payload is stored
/// opaquely; the sink never interprets its shape.
#[derive(Debug, Clone)]
pub struct BlockRecord {
    pub height: u64,
    pub payload: Value,
}

/// One transaction's record as committed to a sink, keyed by hash.
#[derive(Debug, Clone)]
pub struct TxRecord {
    pub hash: String,
    pub payload: Value,
}

/// The persistence contract the engine depends on. A sink is free to be
/// Postgres, a flat file store, or an in-memory fake for tests — the engine
/// only ever calls through this trait.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn latest_stored(&self) -> anyhow::Result<Option<u64>>;

    async fn earliest_stored(&self) -> anyhow::Result<Option<u64>>;

    async fn missing_block_ids_in_range(&self, lo: u64, hi: u64) -> anyhow::Result<Vec<u64>>;

    /// Commits one block and its transactions atomically. Idempotent: a
    /// repeated commit for the same height/hash overwrites, it doesn't
    /// duplicate.
    async fn commit(&self, block: BlockRecord, txs: Vec<TxRecord>) -> anyhow::Result<()>;
}
