//! Inbound packet-loss tracker for a payload stream (§4.4), grounded on
//! `next_packet_loss_tracker.h`.
const HISTORY: u64 = 1024;
const SAFETY: u64 = 30;
const EMPTY_SLOT: u64 = u64::MAX;

pub struct PacketLossTracker {
    last_packet_processed: u64,
    most_recent_packet_received: u64,
    received: [u64; HISTORY as usize],
}

impl PacketLossTracker {
    pub fn new() -> PacketLossTracker {
        PacketLossTracker {
            last_packet_processed: 0,
            most_recent_packet_received: 0,
            received: [EMPTY_SLOT; HISTORY as usize],
        }
    }

    pub fn packet_received(&mut self, sequence: u64) {
        let sequence = sequence + 1;
        let index = (sequence % HISTORY) as usize;
        self.received[index] = sequence;
        self.most_recent_packet_received = sequence;
    }

    /// Slides the processed cursor forward and returns the number of sequences found missing.
    pub fn update(&mut self) -> u64 {
        let mut lost = 0u64;
        let start = self.last_packet_processed + 1;
        let finish = self.most_recent_packet_received.saturating_sub(SAFETY);

        if finish > start && finish - start > HISTORY {
            self.last_packet_processed = self.most_recent_packet_received;
            return 0;
        }

        let mut sequence = start;
        while sequence <= finish {
            let index = (sequence % HISTORY) as usize;
            if self.received[index] != sequence {
                lost += 1;
            }
            sequence += 1;
        }
        self.last_packet_processed = finish;
        lost
    }
}

impl Default for PacketLossTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_loss_when_all_received_in_order() {
        let mut tracker = PacketLossTracker::new();
        for seq in 0..100u64 {
            tracker.packet_received(seq);
        }
        // most_recent - safety(30) bounds `finish`, leaving a trailing window unprocessed.
        assert_eq!(tracker.update(), 0);
    }

    #[test]
    fn missing_sequence_is_counted() {
        let mut tracker = PacketLossTracker::new();
        for seq in 0..100u64 {
            if seq != 50 {
                tracker.packet_received(seq);
            }
        }
        assert_eq!(tracker.update(), 1);
    }

    #[test]
    fn huge_gap_does_not_scan_the_whole_u64_range() {
        let mut tracker = PacketLossTracker::new();
        tracker.packet_received(10_000_000);
        // finish - start > HISTORY: tracker just fast-forwards instead of scanning.
        assert_eq!(tracker.update(), 0);
    }
}
