//! Fakes used by this crate's own tests and available to integration tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::sink::{BlockRecord, Sink, TxRecord};

/// In-memory [`Sink`] standing in for Postgres in tests, the way the
/// teacher's worker tests fake the RPC peer instead of a real daemon.
#[derive(Default)]
pub struct FakeSink {
    blocks: Mutex<BTreeMap<u64, (BlockRecord, Vec<TxRecord>)>>,
}

impl FakeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored_heights(&self) -> Vec<u64> {
        self.blocks.lock().unwrap_or_else(|e| e.into_inner()).keys().copied().collect()
    }

    pub fn txs_for(&self, height: u64) -> Option<Vec<TxRecord>> {
        self.blocks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&height)
            .map(|(_, txs)| txs.clone())
    }
}

#[async_trait]
impl Sink for FakeSink {
    async fn latest_stored(&self) -> anyhow::Result<Option<u64>> {
        Ok(self.blocks.lock().unwrap_or_else(|e| e.into_inner()).keys().next_back().copied())
    }

    async fn earliest_stored(&self) -> anyhow::Result<Option<u64>> {
        Ok(self.blocks.lock().unwrap_or_else(|e| e.into_inner()).keys().next().copied())
    }

    async fn missing_block_ids_in_range(&self, lo: u64, hi: u64) -> anyhow::Result<Vec<u64>> {
        let blocks = self.blocks.lock().unwrap_or_else(|e| e.into_inner());
        Ok((lo..=hi).filter(|h| !blocks.contains_key(h)).collect())
    }

    async fn commit(&self, block: BlockRecord, txs: Vec<TxRecord>) -> anyhow::Result<()> {
        self.blocks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(block.height, (block, txs));
        Ok(())
    }
}
