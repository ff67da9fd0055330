//! New-block listener with WebSocket streaming and HTTP polling fallback

use super::ChainData;
use crate::bundle::BlockHeader;
use crate::error::{RescueError, RescueResult};

use ethers::prelude::*;
use ethers::providers::{Provider, Ws};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Pushes every new block header into the submission loop's channel.
///
/// Headers are forwarded in strictly increasing block order; repeats and
/// reorged-away lower numbers are dropped.
pub struct BlockListener {
    chain: Arc<dyn ChainData>,
    ws_url: Option<String>,
    poll_interval: Duration,
    block_tx: mpsc::Sender<BlockHeader>,
    last_forwarded: Option<u64>,
}

impl BlockListener {
    pub fn new(
        chain: Arc<dyn ChainData>,
        ws_url: Option<String>,
        poll_interval: Duration,
        block_tx: mpsc::Sender<BlockHeader>,
    ) -> Self {
        Self {
            chain,
            ws_url,
            poll_interval,
            block_tx,
            last_forwarded: None,
        }
    }

    /// Main listening loop. Returns once the receiving side is gone.
    pub async fn listen(mut self) -> RescueResult<()> {
        if let Some(ws_url) = self.ws_url.clone() {
            match self.listen_ws(&ws_url).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!("WebSocket block stream failed, falling back to polling: {}", e),
            }
        }

        info!("Polling for new blocks every {:?}", self.poll_interval);
        self.listen_polling().await
    }

    /// WebSocket-based block subscription
    async fn listen_ws(&mut self, ws_url: &str) -> RescueResult<()> {
        let provider = Provider::<Ws>::connect(ws_url)
            .await
            .map_err(|e| RescueError::ChainConnection(format!("WebSocket connect failed: {}", e)))?;
        let mut stream = provider
            .subscribe_blocks()
            .await
            .map_err(|e| RescueError::ChainConnection(format!("Block subscription failed: {}", e)))?;

        info!("Subscribed to new blocks over WebSocket");

        while let Some(block) = stream.next().await {
            let Some(number) = block.number else {
                continue;
            };
            let header = BlockHeader {
                number: number.as_u64(),
                base_fee_per_gas: block.base_fee_per_gas.unwrap_or_default(),
                timestamp: block.timestamp.as_u64(),
            };
            if !self.forward(header).await {
                return Ok(());
            }
        }

        Err(RescueError::ChainConnection(
            "WebSocket block stream ended".to_string(),
        ))
    }

    /// HTTP polling-based block listening
    async fn listen_polling(&mut self) -> RescueResult<()> {
        loop {
            match self.chain.latest_block().await {
                Ok(header) => {
                    if !self.forward(header).await {
                        return Ok(());
                    }
                }
                Err(e) => warn!("Failed to poll latest block: {}", e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Forward a header if it is newer than the last one. Returns false once
    /// the receiver has been dropped.
    async fn forward(&mut self, header: BlockHeader) -> bool {
        if self.last_forwarded.is_some_and(|last| header.number <= last) {
            return !self.block_tx.is_closed();
        }

        debug!("New block {}", header.number);
        if self.block_tx.send(header).await.is_err() {
            return false;
        }
        self.last_forwarded = Some(header.number);
        true
    }
}
