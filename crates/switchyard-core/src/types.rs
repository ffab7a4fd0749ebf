//! Newtype wrappers for node, network, and link-layer identifiers.
//!
//! All three are carried as integers internally and rendered as fixed-width
//! lowercase hex (MACs as colon-separated octets). Their serde form is the
//! rendered string, so they can key JSON maps in `local.conf`.

use core::fmt;
use core::str::FromStr;

use crate::error::ParseError;

/// Implements `Serialize`/`Deserialize` through `Display`/`FromStr`.
macro_rules! string_serde {
    ($ty:ty) => {
        impl serde::Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                let s = <std::borrow::Cow<'de, str>>::deserialize(d)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

pub(crate) use string_serde;

/// A 40-bit node address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[must_use]
pub struct Address(u64);

impl Address {
    /// Largest representable address.
    pub const MAX: u64 = 0xff_ffff_ffff;

    /// Create an address, rejecting values wider than 40 bits.
    pub const fn new(value: u64) -> Result<Self, ParseError> {
        if value > Self::MAX {
            return Err(ParseError::AddressOutOfRange(value));
        }
        Ok(Self(value))
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Read an address from its 5-byte big-endian wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() != 5 {
            return Err(ParseError::InvalidLength {
                expected: 5,
                actual: bytes.len(),
            });
        }
        Ok(Self(
            bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
        ))
    }

    pub fn to_bytes(self) -> [u8; 5] {
        let b = self.0.to_be_bytes();
        [b[3], b[4], b[5], b[6], b[7]]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:010x}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:010x})", self.0)
    }
}

impl FromStr for Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v = u64::from_str_radix(s.trim(), 16).map_err(|_| ParseError::InvalidHex(s.into()))?;
        Self::new(v)
    }
}

string_serde!(Address);

/// A 64-bit virtual network identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[must_use]
pub struct NetworkId(pub u64);

impl NetworkId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The controller's address is the most significant 40 bits.
    pub fn controller(self) -> Address {
        Address(self.0 >> 24)
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetworkId({:016x})", self.0)
    }
}

impl FromStr for NetworkId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s.trim(), 16)
            .map(Self)
            .map_err(|_| ParseError::InvalidHex(s.into()))
    }
}

string_serde!(NetworkId);

/// A 48-bit Ethernet MAC address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[must_use]
pub struct Mac(u64);

impl Mac {
    pub const BROADCAST: Mac = Mac(0xffff_ffff_ffff);

    /// Create a MAC from the low 48 bits of `value`.
    pub const fn new(value: u64) -> Self {
        Self(value & 0xffff_ffff_ffff)
    }

    pub const fn from_octets(o: [u8; 6]) -> Self {
        Self(
            ((o[0] as u64) << 40)
                | ((o[1] as u64) << 32)
                | ((o[2] as u64) << 24)
                | ((o[3] as u64) << 16)
                | ((o[4] as u64) << 8)
                | (o[5] as u64),
        )
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let arr: [u8; 6] = bytes.try_into().map_err(|_| ParseError::InvalidLength {
            expected: 6,
            actual: bytes.len(),
        })?;
        Ok(Self::from_octets(arr))
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub fn octets(self) -> [u8; 6] {
        let b = self.0.to_be_bytes();
        [b[2], b[3], b[4], b[5], b[6], b[7]]
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.octets();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl fmt::Debug for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mac({self})")
    }
}

impl FromStr for Mac {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split(':');
        for octet in &mut octets {
            let part = parts.next().ok_or_else(|| ParseError::InvalidMac(s.into()))?;
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParseError::InvalidMac(s.into()))?;
        }
        if parts.next().is_some() {
            return Err(ParseError::InvalidMac(s.into()));
        }
        Ok(Self::from_octets(octets))
    }
}

string_serde!(Mac);
