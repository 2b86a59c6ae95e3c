#![warn(missing_docs)]

//! Identifiers of the chord ring.
//!
//! A [Did] is a point of the finite cyclic group `Z/2^m`, where `m` is the output width of
//! the configured [HashFunction] (160 bits for SHA-1, 256 bits for SHA-256). It is stored
//! as big-endian bytes, so comparing two dids of the same width byte by byte is the same as
//! comparing their integer values.
//!
//! There is no total order on a ring. Every "between" question is asked relative to two
//! anchor points and each call site picks its boundary convention explicitly:
//!
//! * [Did::in_range] tests the open interval `(a, b)`.
//! * [Did::in_range_right_incl] tests the half-open interval `(a, b]`.
//!
//! When both anchors are the same point the interval wraps the whole circle. This is what
//! lets a ring of one vnode, which is its own successor, still answer lookups and accept
//! newcomers.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use serde::Deserialize;
use serde::Serialize;
use sha1::Digest;
use sha1::Sha1;
use sha2::Sha256;

use crate::error::Error;
use crate::error::Result;

/// Did is an element of the finite ring `Z/2^m`, stored as `m / 8` big-endian bytes.
#[derive(Clone, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize, Hash)]
pub struct Did(Vec<u8>);

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Did({})", self)
    }
}

impl Did {
    /// Wrap raw big-endian bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Big-endian bytes of the did.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Width of the identifier space in bits.
    pub fn bits(&self) -> usize {
        self.0.len() * 8
    }

    /// Build a did of `width` bytes from an integer, reduced modulo `2^(8 * width)`.
    pub fn from_biguint(n: &BigUint, width: usize) -> Self {
        let modulus = BigUint::from(1u8) << (width * 8);
        let bytes = (n % modulus).to_bytes_be();
        let mut ret = vec![0u8; width - bytes.len()];
        ret.extend_from_slice(&bytes);
        Self(ret)
    }

    /// Test x <- (a, b)
    pub fn in_range(&self, a: &Did, b: &Did) -> bool {
        if a == b {
            return self != a;
        }
        if a > b {
            // the interval wraps through zero
            a < self || self < b
        } else {
            a < self && self < b
        }
    }

    /// Test x <- (a, b]
    pub fn in_range_right_incl(&self, a: &Did, b: &Did) -> bool {
        if a == b {
            return true;
        }
        if a > b {
            a < self || self <= b
        } else {
            a < self && self <= b
        }
    }

    /// Clockwise distance from `self` to `to`, i.e. `(to - self) mod 2^m`.
    pub fn distance(&self, to: &Did) -> BigUint {
        let modulus = BigUint::from(1u8) << self.bits();
        let from = BigUint::from(self);
        let to = BigUint::from(to);
        (to + &modulus - from) % modulus
    }
}

impl From<&Did> for BigUint {
    fn from(did: &Did) -> BigUint {
        BigUint::from_bytes_be(did.as_bytes())
    }
}

/// Small dids are handy in tests and examples. They use the default 160 bits width.
impl From<u32> for Did {
    fn from(id: u32) -> Did {
        Did::from_biguint(&BigUint::from(id), HashFunction::Sha1.bytes())
    }
}

impl FromStr for Did {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        Ok(Self(hex::decode(s)?))
    }
}

/// Ordering with a did reference
/// This trait defines necessary method for sorting based on did.
pub trait SortRing {
    /// Sort a impl SortRing clockwise, starting from given did.
    fn sort(&mut self, did: &Did);
}

impl SortRing for Vec<Did> {
    fn sort(&mut self, did: &Did) {
        self.sort_by_key(|a| did.distance(a));
    }
}

/// Hash function that places vnodes and keys on the ring.
/// Its output width decides the size of the identifier space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashFunction {
    /// SHA-1, 160 bits.
    #[default]
    Sha1,
    /// SHA-256, 256 bits.
    Sha256,
}

impl HashFunction {
    /// Output width in bytes.
    pub fn bytes(&self) -> usize {
        match self {
            HashFunction::Sha1 => 20,
            HashFunction::Sha256 => 32,
        }
    }

    /// Output width in bits.
    pub fn bits(&self) -> usize {
        self.bytes() * 8
    }

    /// Hash arbitrary data onto the ring.
    pub fn digest(&self, data: &[u8]) -> Did {
        match self {
            HashFunction::Sha1 => Did(Sha1::digest(data).to_vec()),
            HashFunction::Sha256 => Did(Sha256::digest(data).to_vec()),
        }
    }

    /// Position of the `idx`th vnode of a host: `hash(hostname || idx)`, idx in big-endian.
    pub fn vnode_id(&self, hostname: &str, idx: u16) -> Did {
        let mut data = hostname.as_bytes().to_vec();
        data.extend_from_slice(&idx.to_be_bytes());
        self.digest(&data)
    }
}

impl FromStr for HashFunction {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sha1" => Ok(HashFunction::Sha1),
            "sha256" => Ok(HashFunction::Sha256),
            x => Err(Error::InvalidConfig(format!("unknown hash function {x}"))),
        }
    }
}
