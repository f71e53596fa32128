//! RangeSet: ordered collections of IPv4 ranges and the pool-text codec
//!
//! Pool text is a comma-delimited list of addresses and bracketed spans,
//! e.g. `10.0.1.[2-8],10.0.1.12`, always interpreted relative to a subnet.

use std::fmt;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use super::{Range, RangeIter};
use crate::error::RangeError;

/// An ordered sequence of [`Range`]s
///
/// After [`RangeSet::concat`] the set is in canonical form: sorted by start
/// address, non-overlapping, with adjacent intervals coalesced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    ranges: Vec<Range>,
}

impl RangeSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse pool text relative to `subnet` into a fresh set
    pub fn parse(s: &str, subnet: Ipv4Net) -> Result<Self, RangeError> {
        let mut rs = Self::new();
        rs.concat(s, subnet)?;
        Ok(rs)
    }

    /// Append pool text to the set and restore canonical form
    ///
    /// Each comma-separated token is either a singleton `A.B.C.D` or a span
    /// `A.B.C.[X-Y]`. Whitespace around tokens is trimmed. Empty or
    /// all-whitespace input leaves the set unchanged. Tokens whose start
    /// address is not inside `subnet` are dropped; malformed tokens are an
    /// error.
    pub fn concat(&mut self, s: &str, subnet: Ipv4Net) -> Result<(), RangeError> {
        if s.trim().is_empty() {
            return Ok(());
        }

        for token in s.split(',') {
            let token = token.trim();
            if let Some(stripped) = token.strip_suffix(']') {
                // eg: 10.0.1.[4-8]
                let (prefix, span) = stripped
                    .split_once('[')
                    .ok_or_else(|| RangeError::ParseToken(token.to_string()))?;
                let (lo, hi) = span
                    .split_once('-')
                    .ok_or_else(|| RangeError::ParseToken(token.to_string()))?;
                let start: Ipv4Addr = format!("{prefix}{lo}")
                    .parse()
                    .map_err(|_| RangeError::ParseToken(token.to_string()))?;
                if !subnet.contains(&start) {
                    continue;
                }
                let end: Ipv4Addr = format!("{prefix}{hi}")
                    .parse()
                    .map_err(|_| RangeError::ParseToken(token.to_string()))?;
                self.ranges.push(Range::new(start, end, subnet));
            } else {
                // eg: 10.0.1.9
                let ip: Ipv4Addr = token
                    .parse()
                    .map_err(|_| RangeError::ParseToken(token.to_string()))?;
                if !subnet.contains(&ip) {
                    continue;
                }
                self.ranges.push(Range::singleton(ip, subnet));
            }
        }

        self.normalize();
        Ok(())
    }

    /// Sort by (start, end) and merge overlapping or adjacent intervals
    ///
    /// Two intervals `[a,b]` and `[c,d]` with `c == succ(b)` are adjacent
    /// and must merge; the gap predicate is `c > succ(b)`.
    fn normalize(&mut self) {
        self.ranges
            .sort_by(|a, b| a.start().cmp(&b.start()).then(a.end().cmp(&b.end())));

        let mut merged: Vec<Range> = Vec::with_capacity(self.ranges.len());
        for r in self.ranges.drain(..) {
            if let Some(prev) = merged.last_mut() {
                // u64 arithmetic so an interval ending at the address-space
                // ceiling cannot overflow the successor computation
                if u64::from(u32::from(r.start())) <= u64::from(u32::from(prev.end())) + 1 {
                    if r.end() > prev.end() {
                        prev.extend_end(r.end());
                    }
                    continue;
                }
            }
            merged.push(r);
        }
        self.ranges = merged;
    }

    /// Validate the set as a whole
    ///
    /// Fails on an empty set, on any range violating its own invariants,
    /// and on any pair of intersecting ranges. Mixed address families are
    /// unrepresentable here: the algebra is IPv4-only.
    pub fn canonicalize(&self) -> Result<(), RangeError> {
        if self.ranges.is_empty() {
            return Err(RangeError::EmptySet);
        }
        for r in &self.ranges {
            r.canonicalize()?;
        }
        for (i, r1) in self.ranges.iter().enumerate() {
            for r2 in &self.ranges[i + 1..] {
                if r1.overlaps(r2) {
                    return Err(RangeError::Overlap(r1.to_string(), r2.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Inject `gateway` into every range of the set
    pub fn set_gateway(&mut self, gateway: Ipv4Addr) {
        for r in &mut self.ranges {
            r.set_gateway(gateway);
        }
    }

    /// Test whether any range contains `ip`
    #[must_use]
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.range_for(ip).is_some()
    }

    /// First range containing `ip`
    #[must_use]
    pub fn range_for(&self, ip: Ipv4Addr) -> Option<&Range> {
        self.ranges.iter().find(|r| r.contains(ip))
    }

    /// Test whether any range of `self` intersects any range of `other`
    #[must_use]
    pub fn overlaps(&self, other: &RangeSet) -> bool {
        self.ranges
            .iter()
            .any(|r| other.ranges.iter().any(|o| r.overlaps(o)))
    }

    /// Iterate every non-gateway address in the union
    #[must_use]
    pub fn iter(&self) -> RangeIter<'_> {
        RangeIter::new(self)
    }

    /// The ranges in canonical order
    #[must_use]
    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    /// Number of ranges in the set
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Whether the set holds no ranges
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{r}")?;
        }
        Ok(())
    }
}
