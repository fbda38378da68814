//! Statistics and bandwidth accounting (§4.4): ping history / route stats, packet loss, jitter,
//! out-of-order counting, and the per-path bandwidth limiter.
pub mod bandwidth;
pub mod jitter;
pub mod out_of_order;
pub mod packet_loss;
pub mod ping_history;

/// Everything tracked for one direction of one session: folded into the per-endpoint stats
/// report sent to the server/backend every second (§4.8).
pub struct PathStats {
    pub ping_history: ping_history::PingHistory,
    pub packet_loss: packet_loss::PacketLossTracker,
    pub out_of_order: out_of_order::OutOfOrderTracker,
    pub jitter: jitter::JitterTracker,
    pub bandwidth: bandwidth::BandwidthLimiter,
}

impl PathStats {
    pub fn new() -> PathStats {
        PathStats {
            ping_history: ping_history::PingHistory::new(),
            packet_loss: packet_loss::PacketLossTracker::new(),
            out_of_order: out_of_order::OutOfOrderTracker::new(),
            jitter: jitter::JitterTracker::new(),
            bandwidth: bandwidth::BandwidthLimiter::new(),
        }
    }
}

impl Default for PathStats {
    fn default() -> Self {
        Self::new()
    }
}
