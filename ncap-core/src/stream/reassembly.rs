//! TCP sequence-space reassembly for one stream direction.
//!
//! Segments go in, contiguous [`Fragment`]s come out. Retransmissions are
//! dropped, partially overlapping segments are trimmed, out-of-order
//! segments are buffered until the gap closes. All sequence arithmetic is
//! wrapping.
//!
//! One deliberate exception: in mid-stream captures (no SYN seen), a
//! segment older than the inferred start is delivered out of band instead
//! of being dropped; the reader's merge pass puts it in place.

use std::collections::BTreeMap;

/// A contiguous run of stream bytes with the timestamp of the segment that
/// completed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub seq: u32,
    pub timestamp: i64,
    pub data: Vec<u8>,
}

/// Reassembly state for one direction of a TCP stream.
#[derive(Debug, Default)]
pub struct StreamBuffer {
    expected_seq: u32,
    initial_seq: Option<u32>,
    /// Whether initial_seq came from a SYN (definitive) vs the first data
    /// segment (inferred).
    initial_seq_from_syn: bool,
    pending: BTreeMap<u32, Fragment>,
    fin_received: bool,
    pub segment_count: u32,
    pub retransmit_count: u32,
    pub out_of_order_count: u32,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial sequence number from a SYN. The SYN consumes one
    /// sequence number.
    pub fn set_initial_seq(&mut self, seq: u32) {
        self.initial_seq = Some(seq);
        self.initial_seq_from_syn = true;
        self.expected_seq = seq.wrapping_add(1);
    }

    pub fn mark_fin(&mut self) {
        self.fin_received = true;
    }

    /// FIN seen and no gaps outstanding.
    pub fn is_complete(&self) -> bool {
        self.fin_received && self.pending.is_empty()
    }

    /// Add one segment; returns the fragments that became deliverable.
    pub fn add_segment(&mut self, seq: u32, data: &[u8], timestamp: i64) -> Vec<Fragment> {
        if data.is_empty() {
            return Vec::new();
        }
        self.segment_count += 1;

        let initial = match self.initial_seq {
            Some(initial) => initial,
            None => {
                self.initial_seq = Some(seq);
                self.expected_seq = seq;
                seq
            }
        };

        if seq_lt(seq, self.expected_seq) {
            // Mid-stream capture and a segment from before our inferred
            // start: deliver out of band, the merge pass will order it.
            if !self.initial_seq_from_syn && seq_lt(seq, initial) {
                self.out_of_order_count += 1;
                return vec![Fragment {
                    seq,
                    timestamp,
                    data: data.to_vec(),
                }];
            }

            let seg_end = seq_add(seq, data.len());
            if seq_le(seg_end, self.expected_seq) {
                self.retransmit_count += 1;
                return Vec::new();
            }
            // Partial overlap: trim the retransmitted prefix.
            let overlap = self.expected_seq.wrapping_sub(seq) as usize;
            return self.deliver(self.expected_seq, &data[overlap..], timestamp);
        }

        if seq == self.expected_seq {
            return self.deliver(seq, data, timestamp);
        }

        // Future segment: buffer until the gap closes.
        self.out_of_order_count += 1;
        self.pending.insert(
            seq,
            Fragment {
                seq,
                timestamp,
                data: data.to_vec(),
            },
        );
        Vec::new()
    }

    fn deliver(&mut self, seq: u32, data: &[u8], timestamp: i64) -> Vec<Fragment> {
        let mut delivered = vec![Fragment {
            seq,
            timestamp,
            data: data.to_vec(),
        }];
        self.expected_seq = seq_add(seq, data.len());

        // Pending segments may now be in order.
        while let Some((&pending_seq, _)) = self.pending.first_key_value() {
            if pending_seq == self.expected_seq {
                let fragment = self
                    .pending
                    .remove(&pending_seq)
                    .expect("first key just observed");
                self.expected_seq = seq_add(fragment.seq, fragment.data.len());
                delivered.push(fragment);
            } else if seq_lt(pending_seq, self.expected_seq) {
                // Late retransmit that got buffered; drop it.
                self.pending.remove(&pending_seq);
                self.retransmit_count += 1;
            } else {
                break;
            }
        }
        delivered
    }

    /// Bytes currently buffered out of order.
    pub fn pending_bytes(&self) -> usize {
        self.pending.values().map(|f| f.data.len()).sum()
    }
}

// Wrapping sequence number comparison helpers.
fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

fn seq_le(a: u32, b: u32) -> bool {
    a == b || seq_lt(a, b)
}

fn seq_add(a: u32, n: usize) -> u32 {
    a.wrapping_add(n as u32)
}
