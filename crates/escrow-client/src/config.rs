//! client configuration
//!
//! timing knobs for confirmation and convergence polling live here so
//! tests can shrink them to milliseconds.

use serde::{Deserialize, Serialize};

/// client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// escrow node JSON-RPC endpoint
    pub node_endpoint: String,
    /// http request timeout in seconds
    pub request_timeout_secs: u64,
    /// decimals of the payment currency (base-unit conversion)
    pub currency_decimals: u32,
    /// attempts polling for a transaction receipt
    pub receipt_attempts: u32,
    /// spacing between receipt polls, milliseconds
    pub receipt_interval_ms: u64,
    /// attempts polling the read path for the expected post-state
    pub converge_attempts: u32,
    /// spacing between convergence polls, milliseconds
    pub converge_interval_ms: u64,
    /// auto-refresh interval for watch loops, milliseconds
    pub refresh_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            node_endpoint: "http://localhost:8545".into(),
            request_timeout_secs: 30,
            currency_decimals: 18,
            receipt_attempts: 30,
            receipt_interval_ms: 2_000,
            // indexing lag behind transaction finality is normally a few
            // seconds; 12 x 2.5s covers the slow tail
            converge_attempts: 12,
            converge_interval_ms: 2_500,
            refresh_interval_ms: 5_000,
        }
    }
}

impl ClientConfig {
    /// the public barterbox test network node
    pub fn testnet() -> Self {
        Self {
            node_endpoint: "https://testnet-rpc.barterbox.rotko.net".into(),
            ..Default::default()
        }
    }

    /// aggressive timings for tests against an in-process mock
    pub fn fast() -> Self {
        Self {
            receipt_attempts: 5,
            receipt_interval_ms: 1,
            converge_attempts: 5,
            converge_interval_ms: 1,
            refresh_interval_ms: 1,
            ..Default::default()
        }
    }
}
