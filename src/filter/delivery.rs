//! Chunked body delivery under downstream backpressure.

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::debug;

use crate::cache::AdjustedByteRange;

/// Split body windows into chunks of at most `limit` bytes, preserving order.
///
/// A zero limit means "no limit".
pub fn plan_chunks(ranges: &[AdjustedByteRange], limit: u64) -> VecDeque<AdjustedByteRange> {
    let mut chunks = VecDeque::new();
    for range in ranges {
        if limit == 0 {
            chunks.push_back(*range);
            continue;
        }
        let mut first = range.first_byte_pos();
        loop {
            let last = first
                .saturating_add(limit - 1)
                .min(range.last_byte_pos());
            chunks.push_back(AdjustedByteRange::new(first, last));
            if last == range.last_byte_pos() {
                break;
            }
            first = last + 1;
        }
    }
    chunks
}

/// Non-negative count of outstanding high-watermark signals.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Watermarks {
    count: u32,
}

impl Watermarks {
    pub(crate) fn raise(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    /// Returns `true` when this call released the last outstanding watermark.
    pub(crate) fn lower(&mut self) -> bool {
        if self.count == 0 {
            debug!("low watermark without matching high watermark, ignoring");
            return false;
        }
        self.count -= 1;
        self.count == 0
    }

    pub(crate) fn is_blocked(&self) -> bool {
        self.count > 0
    }
}

/// Where delivered chunks go: a synthesized response or a replay after a 304.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryMode {
    Encode,
    Inject,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct OversizedChunk {
    pub(crate) expected: u64,
    pub(crate) received: u64,
}

/// Progress of one body delivery.
#[derive(Debug)]
pub(crate) struct BodyDelivery {
    pub(crate) mode: DeliveryMode,
    remaining: VecDeque<AdjustedByteRange>,
    /// A chunk fetched while downstream was backed up, with its end-of-stream flag.
    pub(crate) pending: Option<(Bytes, bool)>,
    /// Set when delivery stopped for backpressure and must be resumed by a low watermark.
    pub(crate) paused: bool,
}

impl BodyDelivery {
    pub(crate) fn new(mode: DeliveryMode, ranges: &[AdjustedByteRange], limit: u64) -> Self {
        Self {
            mode,
            remaining: plan_chunks(ranges, limit),
            pending: None,
            paused: false,
        }
    }

    pub(crate) fn next_range(&self) -> Option<AdjustedByteRange> {
        self.remaining.front().copied()
    }

    /// Account for `received` bytes of the front window. Returns whether the body is complete.
    pub(crate) fn accept(&mut self, received: u64) -> Result<bool, OversizedChunk> {
        let Some(front) = self.remaining.front_mut() else {
            return Err(OversizedChunk {
                expected: 0,
                received,
            });
        };
        let expected = front.length();
        if received < expected {
            front.trim_front(received);
        } else if received == expected {
            self.remaining.pop_front();
        } else {
            return Err(OversizedChunk { expected, received });
        }
        Ok(self.remaining.is_empty())
    }
}
