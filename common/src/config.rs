use serde::{Deserialize, Serialize};

use crate::ingest::PartialUpdatePolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// Readings older than this are reported as invalid.
    pub freshness_window_ms: u64,
    /// Hard cap on an ingest POST body; longer declared lengths are
    /// rejected before the body is read.
    pub max_ingest_body_bytes: usize,
    pub http_port: u16,
    /// UDP port the host target listens on for peer frames.
    pub peer_port: u16,
    /// Bounded wait for the radio subsystem before link bring-up.
    pub radio_settle_delay_ms: u64,
    #[serde(default)]
    pub partial_update_policy: PartialUpdatePolicy,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            freshness_window_ms: 30_000,
            max_ingest_body_bytes: 256,
            http_port: 8080,
            peer_port: 3232,
            radio_settle_delay_ms: 1_000,
            partial_update_policy: PartialUpdatePolicy::default(),
        }
    }
}

impl StationConfig {
    pub fn sanitize(&mut self) {
        if self.freshness_window_ms == 0 {
            self.freshness_window_ms = 30_000;
        }
        self.max_ingest_body_bytes = self.max_ingest_body_bytes.clamp(1, 4_096);
        if self.http_port == 0 {
            self.http_port = 8080;
        }
        if self.peer_port == 0 {
            self.peer_port = 3232;
        }
    }
}
