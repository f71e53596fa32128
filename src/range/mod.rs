//! IPv4 interval algebra
//!
//! A [`Range`] is a closed interval `[start, end]` of IPv4 addresses inside
//! one subnet, optionally carrying the gateway for that subnet. A
//! [`RangeSet`] is an ordered sequence of ranges with a canonical form
//! (sorted, non-overlapping, adjacent intervals coalesced) and the pool-text
//! codec used by the store. [`RangeIter`] walks every non-gateway address in
//! the union.
//!
//! Addresses compare as their 4-byte big-endian value; `Ipv4Addr`'s `Ord`
//! already does exactly that.

mod iter;
mod set;

use std::fmt;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

pub use iter::RangeIter;
pub use set::RangeSet;

use crate::error::RangeError;

/// Successor of an IPv4 address (increment with carry)
///
/// Must not be called on 255.255.255.255; every caller iterates strictly
/// below an interval end, which makes the addition safe.
pub(crate) fn next_ip(ip: Ipv4Addr) -> Ipv4Addr {
    debug_assert!(ip != Ipv4Addr::BROADCAST);
    Ipv4Addr::from(u32::from(ip) + 1)
}

/// A closed interval of IPv4 addresses within one subnet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    start: Ipv4Addr,
    end: Ipv4Addr,
    subnet: Ipv4Net,
    gateway: Option<Ipv4Addr>,
}

impl Range {
    /// Create a range covering `[start, end]` relative to `subnet`
    ///
    /// The endpoints are not validated here; [`Range::canonicalize`] checks
    /// the invariants.
    #[must_use]
    pub fn new(start: Ipv4Addr, end: Ipv4Addr, subnet: Ipv4Net) -> Self {
        Self {
            start,
            end,
            subnet,
            gateway: None,
        }
    }

    /// Create a single-address range
    #[must_use]
    pub fn singleton(ip: Ipv4Addr, subnet: Ipv4Net) -> Self {
        Self::new(ip, ip, subnet)
    }

    /// First address of the interval
    #[must_use]
    pub fn start(&self) -> Ipv4Addr {
        self.start
    }

    /// Last address of the interval (inclusive)
    #[must_use]
    pub fn end(&self) -> Ipv4Addr {
        self.end
    }

    /// The subnet both endpoints belong to
    #[must_use]
    pub fn subnet(&self) -> Ipv4Net {
        self.subnet
    }

    /// The gateway for this range's subnet, if one has been injected
    #[must_use]
    pub fn gateway(&self) -> Option<Ipv4Addr> {
        self.gateway
    }

    /// Set the gateway for this range
    pub fn set_gateway(&mut self, gateway: Ipv4Addr) {
        self.gateway = Some(gateway);
    }

    /// Validate the range invariants
    ///
    /// `start <= end`, both endpoints inside the subnet, and the gateway
    /// (when present) inside the subnet.
    pub fn canonicalize(&self) -> Result<(), RangeError> {
        if self.start > self.end {
            return Err(RangeError::EndpointsReversed {
                start: self.start,
                end: self.end,
            });
        }
        for ip in [self.start, self.end] {
            if !self.subnet.contains(&ip) {
                return Err(RangeError::OutOfSubnet {
                    ip,
                    subnet: self.subnet,
                });
            }
        }
        if let Some(gw) = self.gateway {
            if !self.subnet.contains(&gw) {
                return Err(RangeError::GatewayOutOfSubnet {
                    gateway: gw,
                    subnet: self.subnet,
                });
            }
        }
        Ok(())
    }

    /// Test whether `ip` lies within `[start, end]`
    #[must_use]
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.start <= ip && ip <= self.end
    }

    /// Test whether two intervals intersect
    #[must_use]
    pub fn overlaps(&self, other: &Range) -> bool {
        self.contains(other.start)
            || self.contains(other.end)
            || other.contains(self.start)
            || other.contains(self.end)
    }

    pub(crate) fn extend_end(&mut self, end: Ipv4Addr) {
        self.end = end;
    }
}

impl fmt::Display for Range {
    /// Render in pool-text syntax
    ///
    /// A singleton prints as `A.B.C.D`, a span within one /24 as
    /// `A.B.C.[X-Y]`. A merged range crossing a /24 boundary splits into
    /// comma-separated chunks so the output parses back to the same set.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = u32::from(self.end);
        let mut cur = u32::from(self.start);
        loop {
            let chunk_end = end.min(cur | 0xff);
            if cur == chunk_end {
                write!(f, "{}", Ipv4Addr::from(cur))?;
            } else {
                let [a, b, c, x] = cur.to_be_bytes();
                let y = chunk_end.to_be_bytes()[3];
                write!(f, "{a}.{b}.{c}.[{x}-{y}]")?;
            }
            if chunk_end == end {
                return Ok(());
            }
            cur = chunk_end + 1;
            write!(f, ",")?;
        }
    }
}
