use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use super::protocol::{MAX_FRAGMENT_SIZE, MAX_PAYLOAD_SIZE, sequence_greater_than};

/// Frames further ahead than this are dropped by the receiver and left to
/// the sender's resend.
const REORDER_WINDOW: u32 = 1024;
/// Unacknowledged frames allowed on the wire per channel.
const SEND_WINDOW: usize = 256;

/// Position of a frame within the payload it was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    pub index: u16,
    pub count: u16,
}

impl Fragment {
    pub const WHOLE: Self = Self { index: 0, count: 1 };

    fn is_last(&self) -> bool {
        self.index + 1 == self.count
    }
}

/// A reliable frame ready to go on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueFrame {
    pub sequence: u32,
    pub fragment: Fragment,
    pub payload: Vec<u8>,
    pub is_resend: bool,
}

#[derive(Debug, Clone)]
struct PendingFrame {
    sequence: u32,
    fragment: Fragment,
    payload: Vec<u8>,
    first_sent: Option<Instant>,
    last_sent: Option<Instant>,
    resends: u32,
}

/// Sending half of a reliable-ordered channel: cuts payloads into numbered
/// fragments and keeps them until the peer's cumulative ack covers them.
#[derive(Debug, Default)]
pub struct ReliableSender {
    next_sequence: u32,
    pending: VecDeque<PendingFrame>,
}

impl ReliableSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a payload and returns the sequence of its first fragment.
    /// Callers bound the payload to `MAX_PAYLOAD_SIZE`, which keeps the
    /// fragment count within `u16`.
    pub fn push(&mut self, payload: Vec<u8>) -> u32 {
        let first = self.next_sequence;

        if payload.len() <= MAX_FRAGMENT_SIZE {
            self.enqueue(Fragment::WHOLE, payload);
            return first;
        }

        let count = payload.len().div_ceil(MAX_FRAGMENT_SIZE) as u16;
        for (index, chunk) in payload.chunks(MAX_FRAGMENT_SIZE).enumerate() {
            let fragment = Fragment {
                index: index as u16,
                count,
            };
            self.enqueue(fragment, chunk.to_vec());
        }

        first
    }

    fn enqueue(&mut self, fragment: Fragment, payload: Vec<u8>) {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        self.pending.push_back(PendingFrame {
            sequence,
            fragment,
            payload,
            first_sent: None,
            last_sent: None,
            resends: 0,
        });
    }

    /// Frames that were never sent, or whose last transmission is older
    /// than `resend_interval`. Marks them as sent at `now`.
    pub fn due(&mut self, now: Instant, resend_interval: Duration) -> Vec<DueFrame> {
        let mut frames = Vec::new();

        for pending in self.pending.iter_mut().take(SEND_WINDOW) {
            let is_resend = match pending.last_sent {
                None => false,
                Some(sent) if now.duration_since(sent) >= resend_interval => true,
                Some(_) => continue,
            };

            if is_resend {
                pending.resends += 1;
            } else {
                pending.first_sent = Some(now);
            }
            pending.last_sent = Some(now);
            frames.push(DueFrame {
                sequence: pending.sequence,
                fragment: pending.fragment,
                payload: pending.payload.clone(),
                is_resend,
            });
        }

        frames
    }

    /// Drops every frame before `next_expected`. Returns a round-trip sample
    /// when the newest acknowledged frame was transmitted exactly once.
    pub fn acknowledge(&mut self, next_expected: u32, now: Instant) -> Option<Duration> {
        let mut rtt_sample = None;

        while let Some(front) = self.pending.front() {
            if !sequence_greater_than(next_expected, front.sequence) {
                break;
            }
            if let Some(frame) = self.pending.pop_front() {
                rtt_sample = match (frame.resends, frame.first_sent) {
                    (0, Some(sent)) => Some(now.duration_since(sent)),
                    _ => None,
                };
            }
        }

        rtt_sample
    }

    /// Frames, not payloads, awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Receiving half: buffers out-of-order frames, releases them strictly in
/// sequence, and joins fragments back into whole payloads, each exactly once.
#[derive(Debug, Default)]
pub struct ReliableReceiver {
    next_expected: u32,
    buffered: HashMap<u32, (Fragment, Vec<u8>)>,
    partial: Vec<u8>,
    partial_next: u16,
}

impl ReliableReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receive(&mut self, sequence: u32, fragment: Fragment, payload: Vec<u8>) -> Vec<Vec<u8>> {
        if sequence != self.next_expected {
            let stale = sequence_greater_than(self.next_expected, sequence);
            let too_far = sequence.wrapping_sub(self.next_expected) >= REORDER_WINDOW;
            if !stale && !too_far {
                self.buffered.entry(sequence).or_insert((fragment, payload));
            }
            return Vec::new();
        }

        let mut delivered = Vec::new();
        self.release(fragment, payload, &mut delivered);

        while let Some((fragment, payload)) = self.buffered.remove(&self.next_expected) {
            self.release(fragment, payload, &mut delivered);
        }

        delivered
    }

    fn release(&mut self, fragment: Fragment, payload: Vec<u8>, delivered: &mut Vec<Vec<u8>>) {
        self.next_expected = self.next_expected.wrapping_add(1);

        if fragment.index >= fragment.count || fragment.index != self.partial_next {
            log::warn!(
                "Fragment {}/{} out of place (expected {}), discarding partial payload",
                fragment.index,
                fragment.count,
                self.partial_next
            );
            self.partial.clear();
            self.partial_next = 0;
            if fragment.index != 0 || fragment.count == 0 {
                return;
            }
        }

        if fragment.count == 1 {
            delivered.push(payload);
            return;
        }

        self.partial.extend_from_slice(&payload);
        if self.partial.len() > MAX_PAYLOAD_SIZE {
            log::warn!("Reassembled payload exceeds {} bytes, discarding", MAX_PAYLOAD_SIZE);
            self.partial = Vec::new();
            self.partial_next = 0;
            return;
        }
        if fragment.is_last() {
            delivered.push(std::mem::take(&mut self.partial));
            self.partial_next = 0;
        } else {
            self.partial_next += 1;
        }
    }

    /// Cumulative ack value: every sequence before this has been received.
    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    pub fn buffered(&self) -> usize {
        self.buffered.len()
    }
}
