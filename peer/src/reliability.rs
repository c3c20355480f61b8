//! At-least-once delivery and effectively-once processing over UDP.
//!
//! Outbound: every non-ACK message gets the next sequence number and an
//! outbound record (encoded bytes, destination, retry state). Records are
//! cleared by a matching ACK and retransmitted on a constant interval until
//! the retry cap, at which point the destination is reported unreachable.
//!
//! Inbound: a bounded per-endpoint window of recently seen sequence numbers
//! suppresses duplicate processing. Duplicates are still re-ACKed by the
//! caller before being dropped.
//!
//! Ordering is NOT enforced: a retransmitted older sequence may be handed
//! up after a newer one. Upper layers tolerate reorder at message
//! granularity.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A message awaiting acknowledgment.
#[derive(Debug, Clone)]
pub struct OutboundRecord {
    pub bytes: Vec<u8>,
    pub dest: SocketAddr,
    pub first_sent: Instant,
    pub retries: u32,
    pub next_retry: Instant,
}

/// Bytes to put back on the wire this tick.
#[derive(Debug, Clone)]
pub struct Retransmit {
    pub seq: u64,
    pub bytes: Vec<u8>,
    pub dest: SocketAddr,
}

/// A record that exhausted its retries.
#[derive(Debug, Clone, Copy)]
pub struct Expired {
    pub seq: u64,
    pub dest: SocketAddr,
}

/// What one reliability tick decided.
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub retransmits: Vec<Retransmit>,
    pub expired: Vec<Expired>,
}

/// Recently seen inbound sequence numbers for one remote endpoint, bounded
/// FIFO eviction.
#[derive(Debug)]
struct DedupWindow {
    seen: HashSet<u64>,
    order: VecDeque<u64>,
    cap: usize,
}

impl DedupWindow {
    fn new(cap: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(cap),
            order: VecDeque::with_capacity(cap),
            cap,
        }
    }

    fn contains(&self, seq: u64) -> bool {
        self.seen.contains(&seq)
    }

    fn insert(&mut self, seq: u64) {
        if !self.seen.insert(seq) {
            return;
        }
        self.order.push_back(seq);
        while self.order.len() > self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
    }
}

/// The reliability layer. Single-threaded; owned by the peer event loop.
pub struct ReliabilityLayer {
    next_sequence: u64,
    outbound: HashMap<u64, OutboundRecord>,
    inbound: HashMap<SocketAddr, DedupWindow>,
    retry_interval: Duration,
    max_retries: u32,
    dedup_window: usize,
}

impl ReliabilityLayer {
    pub fn new(retry_interval: Duration, max_retries: u32, dedup_window: usize) -> Self {
        Self {
            next_sequence: 0,
            outbound: HashMap::new(),
            inbound: HashMap::new(),
            retry_interval,
            max_retries,
            dedup_window,
        }
    }

    /// Strictly increasing; the first assigned sequence is 1.
    pub fn next_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    /// Track an already-transmitted non-ACK message for retransmission.
    /// ACKs are never registered (they are not themselves acknowledged).
    pub fn register(&mut self, seq: u64, bytes: Vec<u8>, dest: SocketAddr, now: Instant) {
        self.outbound.insert(
            seq,
            OutboundRecord {
                bytes,
                dest,
                first_sent: now,
                retries: 0,
                next_retry: now + self.retry_interval,
            },
        );
    }

    /// Clear the outbound record for an acknowledged sequence. Returns true
    /// when a record was actually pending (duplicate ACKs return false).
    pub fn ack(&mut self, seq: u64) -> bool {
        self.outbound.remove(&seq).is_some()
    }

    /// Has this `(source, sequence)` already been processed?
    pub fn is_duplicate(&self, source: SocketAddr, seq: u64) -> bool {
        self.inbound
            .get(&source)
            .map(|w| w.contains(seq))
            .unwrap_or(false)
    }

    /// Record an inbound `(source, sequence)` as processed.
    pub fn mark_seen(&mut self, source: SocketAddr, seq: u64) {
        self.inbound
            .entry(source)
            .or_insert_with(|| DedupWindow::new(self.dedup_window))
            .insert(seq);
    }

    /// Drive retransmission. Records past their deadline are re-sent with
    /// the same sequence number; records past the retry cap are expired and
    /// dropped.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        let due: Vec<u64> = self
            .outbound
            .iter()
            .filter(|(_, r)| r.next_retry <= now)
            .map(|(&seq, _)| seq)
            .collect();

        for seq in due {
            let record = match self.outbound.get_mut(&seq) {
                Some(r) => r,
                None => continue,
            };
            if record.retries >= self.max_retries {
                let expired = Expired {
                    seq,
                    dest: record.dest,
                };
                self.outbound.remove(&seq);
                log::warn!(
                    "giving up on seq={} to {} after {} attempts",
                    expired.seq,
                    expired.dest,
                    self.max_retries + 1
                );
                outcome.expired.push(expired);
            } else {
                record.retries += 1;
                record.next_retry = now + self.retry_interval;
                log::debug!(
                    "retransmitting seq={} to {} (retry {})",
                    seq,
                    record.dest,
                    record.retries
                );
                outcome.retransmits.push(Retransmit {
                    seq,
                    bytes: record.bytes.clone(),
                    dest: record.dest,
                });
            }
        }

        outcome
    }

    pub fn pending_count(&self) -> usize {
        self.outbound.len()
    }

    pub fn has_pending_to(&self, dest: SocketAddr) -> bool {
        self.outbound.values().any(|r| r.dest == dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn layer() -> ReliabilityLayer {
        ReliabilityLayer::new(Duration::from_millis(500), 3, 1024)
    }

    #[test]
    fn test_sequences_are_strictly_increasing() {
        let mut r = layer();
        let first = r.next_sequence();
        let second = r.next_sequence();
        assert_eq!(first, 1);
        assert!(second > first);
    }

    #[test]
    fn test_ack_clears_record() {
        let mut r = layer();
        let now = Instant::now();
        r.register(1, b"hello".to_vec(), addr(9001), now);
        assert_eq!(r.pending_count(), 1);
        assert!(r.ack(1));
        assert_eq!(r.pending_count(), 0);
        // A duplicate ACK is a no-op.
        assert!(!r.ack(1));
    }

    #[test]
    fn test_no_retransmit_before_deadline() {
        let mut r = layer();
        let now = Instant::now();
        r.register(1, b"x".to_vec(), addr(9001), now);
        let out = r.tick(now + Duration::from_millis(100));
        assert!(out.retransmits.is_empty());
        assert!(out.expired.is_empty());
    }

    #[test]
    fn test_retransmits_keep_sequence_and_bytes() {
        let mut r = layer();
        let now = Instant::now();
        r.register(7, b"payload".to_vec(), addr(9001), now);

        let out = r.tick(now + Duration::from_millis(500));
        assert_eq!(out.retransmits.len(), 1);
        assert_eq!(out.retransmits[0].seq, 7);
        assert_eq!(out.retransmits[0].bytes, b"payload");
        assert_eq!(out.retransmits[0].dest, addr(9001));
    }

    #[test]
    fn test_retry_cap_expires_record() {
        let mut r = layer();
        let mut now = Instant::now();
        r.register(1, b"x".to_vec(), addr(9001), now);

        // Three retries fire, then the fourth deadline expires the record.
        for _ in 0..3 {
            now += Duration::from_millis(500);
            let out = r.tick(now);
            assert_eq!(out.retransmits.len(), 1);
            assert!(out.expired.is_empty());
        }
        now += Duration::from_millis(500);
        let out = r.tick(now);
        assert!(out.retransmits.is_empty());
        assert_eq!(out.expired.len(), 1);
        assert_eq!(out.expired[0].dest, addr(9001));
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn test_duplicate_detection_is_per_endpoint() {
        let mut r = layer();
        r.mark_seen(addr(9001), 5);
        assert!(r.is_duplicate(addr(9001), 5));
        assert!(!r.is_duplicate(addr(9002), 5));
        assert!(!r.is_duplicate(addr(9001), 6));
    }

    #[test]
    fn test_dedup_window_eviction() {
        let mut r = ReliabilityLayer::new(Duration::from_millis(500), 3, 4);
        for seq in 1..=4 {
            r.mark_seen(addr(9001), seq);
        }
        assert!(r.is_duplicate(addr(9001), 1));
        // Pushing past the cap evicts the oldest entries first.
        r.mark_seen(addr(9001), 5);
        assert!(!r.is_duplicate(addr(9001), 1));
        assert!(r.is_duplicate(addr(9001), 5));
        assert!(r.is_duplicate(addr(9001), 2));
    }

    #[test]
    fn test_has_pending_to() {
        let mut r = layer();
        let now = Instant::now();
        assert!(!r.has_pending_to(addr(9001)));
        r.register(1, b"x".to_vec(), addr(9001), now);
        assert!(r.has_pending_to(addr(9001)));
        assert!(!r.has_pending_to(addr(9002)));
    }
}
