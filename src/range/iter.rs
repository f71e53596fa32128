//! Wrap-around iterator over a RangeSet
//!
//! The iterator may start anywhere in the set and wraps from the last range
//! back to the first. It remembers the IP and the range index at which it
//! began; only when it reaches that exact pair again does it report
//! exhaustion. Tracking the pair rather than the IP alone is what makes a
//! single-address pool terminate. Addresses equal to a range's gateway are
//! skipped.

use std::net::Ipv4Addr;

use super::{next_ip, RangeSet};

/// Iterator over every non-gateway address in a [`RangeSet`]
#[derive(Debug)]
pub struct RangeIter<'a> {
    set: &'a RangeSet,

    /// Index of the range currently being walked
    range_idx: usize,

    /// Current position; `None` marks the first call
    cur: Option<Ipv4Addr>,

    /// The IP and range index where iteration began
    start_ip: Option<Ipv4Addr>,
    start_range: usize,

    done: bool,
}

impl<'a> RangeIter<'a> {
    pub(super) fn new(set: &'a RangeSet) -> Self {
        Self {
            set,
            range_idx: 0,
            cur: None,
            start_ip: None,
            start_range: 0,
            done: false,
        }
    }
}

impl Iterator for RangeIter<'_> {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Ipv4Addr> {
        if self.done || self.set.is_empty() {
            return None;
        }

        loop {
            let r = &self.set.ranges()[self.range_idx];

            let Some(cur) = self.cur else {
                // First call: start at the first range's start, inclusive
                let first = r.start();
                self.cur = Some(first);
                self.start_ip = Some(first);
                self.start_range = self.range_idx;
                if Some(first) == r.gateway() {
                    continue;
                }
                return Some(first);
            };

            // Advance; range ends are inclusive, so hitting the end moves to
            // the next range, wrapping at the last
            let next = if cur == r.end() {
                self.range_idx = (self.range_idx + 1) % self.set.len();
                self.set.ranges()[self.range_idx].start()
            } else {
                next_ip(cur)
            };
            self.cur = Some(next);

            if self.range_idx == self.start_range && Some(next) == self.start_ip {
                self.done = true;
                return None;
            }

            if Some(next) == self.set.ranges()[self.range_idx].gateway() {
                continue;
            }
            return Some(next);
        }
    }
}
