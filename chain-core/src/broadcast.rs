//! Stands in for the P2P layer: a narrow interface the block producer's
//! caller uses to announce a newly sealed or newly accepted block, without
//! chain-core depending on any particular gossip protocol.

use shared::Block;

pub trait BlockBroadcaster: Send + Sync {
    fn announce(&self, block: &Block);
}

/// Logs and otherwise discards every announcement. The default for tests
/// and for the CLI demo command, where there is no real network to reach.
#[derive(Debug, Default)]
pub struct NoopBroadcaster;

impl BlockBroadcaster for NoopBroadcaster {
    fn announce(&self, block: &Block) {
        tracing::debug!(height = block.header.height, hash = %block.header.hash(), "block announced (no-op broadcaster)");
    }
}
