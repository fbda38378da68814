//! Ping history and the route-stats computed from it (§4.4): RTT, jitter, and packet loss over a
//! `[t0, t1]` window.
const HISTORY_SIZE: usize = 1024;
const SAFETY_SECONDS: f64 = 1.0;

#[derive(Clone, Copy)]
struct Entry {
    sequence: u64,
    send_time: f64,
    recv_time: f64,
}

const PENDING: f64 = -1.0;

pub struct PingHistory {
    entries: [Entry; HISTORY_SIZE],
    next_index: usize,
    next_sequence: u64,
}

impl PingHistory {
    pub fn new() -> PingHistory {
        PingHistory {
            entries: [Entry {
                sequence: 0,
                send_time: 0.0,
                recv_time: PENDING,
            }; HISTORY_SIZE],
            next_index: 0,
            next_sequence: 0,
        }
    }

    /// Records a ping send and returns its sequence number.
    pub fn ping_sent(&mut self, send_time: f64) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let index = self.next_index;
        self.next_index = (self.next_index + 1) % HISTORY_SIZE;
        self.entries[index] = Entry {
            sequence,
            send_time,
            recv_time: PENDING,
        };
        sequence
    }

    /// Patches the matching entry with a pong receive time, if it is still in the history.
    pub fn pong_received(&mut self, sequence: u64, recv_time: f64) {
        for entry in self.entries.iter_mut() {
            if entry.sequence == sequence && entry.recv_time == PENDING {
                entry.recv_time = recv_time;
                return;
            }
        }
    }

    /// Computes `(rtt_ms, jitter_ms, packet_loss_percent)` over the window `[t0, t1]` (§4.4).
    pub fn route_stats(&self, t0: f64, t1: f64) -> RouteStats {
        let mut rtt_sum = 0.0;
        let mut rtt_count = 0u64;

        let mut jitter_sum = 0.0;
        let mut jitter_count = 0u64;
        let mut previous_delta: Option<f64> = None;

        let mut sent = 0u64;
        let mut pongs = 0u64;

        let mut in_window: Vec<&Entry> = self
            .entries
            .iter()
            .filter(|e| e.send_time >= t0 && e.send_time <= t1)
            .collect();
        in_window.sort_by(|a, b| a.send_time.partial_cmp(&b.send_time).unwrap());

        let mut previous_recv: Option<f64> = None;
        for entry in &in_window {
            let within_safety_of_end = entry.send_time > t1 - SAFETY_SECONDS;
            if !within_safety_of_end {
                sent += 1;
            }

            if entry.recv_time != PENDING {
                let rtt = entry.recv_time - entry.send_time;
                rtt_sum += rtt;
                rtt_count += 1;
                if !within_safety_of_end {
                    pongs += 1;
                }

                if let Some(prev_recv) = previous_recv {
                    let delta = entry.recv_time - prev_recv;
                    if let Some(prev_delta) = previous_delta {
                        jitter_sum += (delta - prev_delta).abs();
                        jitter_count += 1;
                    }
                    previous_delta = Some(delta);
                }
                previous_recv = Some(entry.recv_time);
            }
        }

        let packet_loss_percent = if sent > 0 {
            100.0 * (sent.saturating_sub(pongs)) as f64 / sent as f64
        } else {
            0.0
        };

        RouteStats {
            rtt: if rtt_count > 0 { rtt_sum / rtt_count as f64 } else { 0.0 },
            jitter: if jitter_count > 0 {
                jitter_sum / jitter_count as f64
            } else {
                0.0
            },
            packet_loss_percent,
        }
    }
}

impl Default for PingHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteStats {
    pub rtt: f64,
    pub jitter: f64,
    pub packet_loss_percent: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtt_is_mean_of_recv_minus_send() {
        let mut history = PingHistory::new();
        let s1 = history.ping_sent(0.0);
        let s2 = history.ping_sent(1.0);
        history.pong_received(s1, 0.1);
        history.pong_received(s2, 1.3);

        let stats = history.route_stats(0.0, 10.0);
        assert!((stats.rtt - 0.2).abs() < 1e-9);
    }

    #[test]
    fn unanswered_ping_counts_as_loss() {
        let mut history = PingHistory::new();
        history.ping_sent(0.0);
        let stats = history.route_stats(0.0, 10.0);
        assert_eq!(stats.packet_loss_percent, 100.0);
    }

    #[test]
    fn recently_sent_ping_excluded_from_loss_by_safety_window() {
        let mut history = PingHistory::new();
        history.ping_sent(9.5);
        // t1 = 10.0, safety = 1.0 second: a ping sent at 9.5 is within the safety window.
        let stats = history.route_stats(0.0, 10.0);
        assert_eq!(stats.packet_loss_percent, 0.0);
    }

    #[test]
    fn pong_outside_window_is_ignored() {
        let mut history = PingHistory::new();
        let s1 = history.ping_sent(100.0);
        history.pong_received(s1, 100.1);
        let stats = history.route_stats(0.0, 10.0);
        assert_eq!(stats.rtt, 0.0);
    }
}
