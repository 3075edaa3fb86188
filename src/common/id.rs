//! Kademlia node Id or a lookup target
use rand::{rngs::OsRng, RngCore};
use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::BitXor,
    str::FromStr,
};

use crate::{Error, Result};

/// The size of node IDs in bytes.
pub const ID_SIZE: usize = 48;
/// Number of bits in an Id, which is also the prefix length of the zero Id.
pub const NUM_BUCKETS: usize = ID_SIZE * 8;

#[derive(Clone, Copy, PartialEq, Ord, PartialOrd, Eq, Hash)]
/// Kademlia node Id, value key, or transaction id.
///
/// Ordering is lexicographic over the bytes and only used for tie breaking,
/// closeness is measured with [Id::xor].
pub struct Id(pub [u8; ID_SIZE]);

impl Id {
    /// The all zero Id, identity of [Id::xor].
    pub const ZERO: Id = Id([0; ID_SIZE]);

    /// Generate a random Id from the operating system's secure random source.
    pub fn random() -> Id {
        let mut bytes = [0; ID_SIZE];
        OsRng.fill_bytes(&mut bytes);

        Id(bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id> {
        let bytes = bytes.as_ref();
        let array: [u8; ID_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::InvalidIdSize(bytes.len()))?;

        Ok(Id(array))
    }

    /// Bytewise XOR of two Ids, the distance between them.
    pub fn xor(&self, other: &Id) -> Id {
        let mut bytes = [0; ID_SIZE];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }

        Id(bytes)
    }

    /// Number of leading zero bits.
    ///
    /// Applied to a distance this is the index of the bucket the other Id falls in.
    /// The zero Id returns [NUM_BUCKETS].
    pub fn prefix_len(&self) -> usize {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                return i * 8 + byte.leading_zeros() as usize;
            }
        }

        NUM_BUCKETS
    }

    /// Prefix length of the distance between this Id and another.
    pub fn distance_class(&self, other: &Id) -> usize {
        self.xor(other).prefix_len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Hex encoded Id.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 4 bytes in hex, for logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl BitXor for Id {
    type Output = Id;

    fn bitxor(self, rhs: Id) -> Id {
        self.xor(&rhs)
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Id> {
        Id::from_bytes(hex::decode(s)?)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.short())
    }
}
