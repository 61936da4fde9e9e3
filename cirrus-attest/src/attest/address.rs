//! Network-address proof.
//!
//! A login is accepted when any address associated with the request is one
//! the provider attests for the instance, or falls inside a prefix the
//! administrator trusts outright. Several request addresses are consulted
//! because proxies put their own address first; trusted prefixes cover NAT
//! setups where the observed address never shows up in the instance record.

use std::collections::HashSet;
use std::net::IpAddr;
use std::str::FromStr;

use crate::instance::Instance;

use super::error::AttestError;

/// Error parsing a CIDR prefix.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PrefixError {
    /// No `/len` suffix.
    #[error("missing prefix length in {0:?}")]
    MissingLength(String),

    /// The address part is not an IP address.
    #[error("invalid network address in {0:?}")]
    InvalidAddress(String),

    /// The length is not a number or exceeds the address width.
    #[error("invalid prefix length in {0:?}")]
    InvalidLength(String),
}

/// A parsed CIDR network, IPv4 or IPv6.
///
/// Host bits in the textual form are ignored: `192.168.1.7/24` is the
/// network `192.168.1.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrustedPrefix {
    network: IpAddr,
    len: u8,
}

impl TrustedPrefix {
    /// Parse `addr/len`.
    ///
    /// # Errors
    ///
    /// Returns [`PrefixError`] when the text is not valid CIDR notation.
    pub fn parse(text: &str) -> Result<Self, PrefixError> {
        let (addr, len) = text
            .trim()
            .split_once('/')
            .ok_or_else(|| PrefixError::MissingLength(text.to_string()))?;

        let addr: IpAddr = addr
            .parse()
            .map_err(|_| PrefixError::InvalidAddress(text.to_string()))?;

        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let len: u8 = len
            .parse()
            .ok()
            .filter(|len| *len <= max)
            .ok_or_else(|| PrefixError::InvalidLength(text.to_string()))?;

        // ::ffff:a.b.c.d/len with len >= 96 is an IPv4 network in disguise
        if let (IpAddr::V6(v6), true) = (addr, len >= 96) {
            if let Some(v4) = v6.to_ipv4_mapped() {
                let len = len - 96;
                return Ok(Self {
                    network: mask(IpAddr::V4(v4), len),
                    len,
                });
            }
        }

        Ok(Self {
            network: mask(addr, len),
            len,
        })
    }

    /// Network base address.
    #[must_use]
    pub fn network(&self) -> IpAddr {
        self.network
    }

    /// Prefix length in bits.
    #[must_use]
    pub fn prefix_len(&self) -> u8 {
        self.len
    }

    /// Whether `addr` lies inside this network.
    ///
    /// IPv4-mapped IPv6 addresses are tested in both forms. Otherwise,
    /// addresses of the other family never match.
    #[must_use]
    pub fn contains(&self, addr: IpAddr) -> bool {
        [addr, addr.to_canonical()]
            .into_iter()
            .any(|addr| match (self.network, addr) {
                (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => {
                    mask(addr, self.len) == self.network
                }
                _ => false,
            })
    }
}

impl FromStr for TrustedPrefix {
    type Err = PrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for TrustedPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.len)
    }
}

fn mask(addr: IpAddr, len: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let bits = u32::from(v4);
            let mask = u32::MAX.checked_shl(32 - u32::from(len)).unwrap_or(0);
            IpAddr::V4((bits & mask).into())
        }
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            let mask = u128::MAX.checked_shl(128 - u32::from(len)).unwrap_or(0);
            IpAddr::V6((bits & mask).into())
        }
    }
}

/// Comparable form of a textual address.
///
/// Parsed addresses compare by value, so `2001:DB8::1` equals `2001:db8::1`
/// and `::ffff:10.0.0.1` equals `10.0.0.1`. Anything unparsable compares
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum AddrKey {
    Ip(IpAddr),
    Text(String),
}

impl AddrKey {
    fn from_text(text: &str) -> Self {
        let text = text.trim();
        match text.parse::<IpAddr>() {
            Ok(ip) => Self::Ip(ip.to_canonical()),
            Err(_) => Self::Text(text.to_string()),
        }
    }
}

/// Check that at least one request address belongs to the instance.
///
/// `request_addrs` is ordered most-trusted first (direct peer, then forwarded
/// addresses) but every entry is considered. `trusted_prefixes` are CIDR
/// strings; an entry that does not parse is skipped, which can only narrow
/// what is accepted.
///
/// # Errors
///
/// Returns [`AttestError::AddressMismatch`] if nothing matches.
pub fn match_addresses<A, P>(
    instance: &Instance,
    request_addrs: &[A],
    trusted_prefixes: &[P],
) -> Result<(), AttestError>
where
    A: AsRef<str>,
    P: AsRef<str>,
{
    let trusted: HashSet<AddrKey> = instance
        .attested_addresses()
        .map(AddrKey::from_text)
        .collect();

    let prefixes: Vec<TrustedPrefix> = trusted_prefixes
        .iter()
        .filter_map(|prefix| TrustedPrefix::parse(prefix.as_ref()).ok())
        .collect();

    let matched = request_addrs.iter().any(|addr| {
        let key = AddrKey::from_text(addr.as_ref());
        if trusted.contains(&key) {
            return true;
        }
        match key {
            AddrKey::Ip(ip) => prefixes.iter().any(|prefix| prefix.contains(ip)),
            AddrKey::Text(_) => false,
        }
    });

    if matched {
        Ok(())
    } else {
        Err(AttestError::AddressMismatch)
    }
}
