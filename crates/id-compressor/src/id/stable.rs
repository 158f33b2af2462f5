//! Arithmetic between a session's base UUID and the stable ids derived from
//! it.
//!
//! A version 4 UUID fixes 6 of its 128 bits (the version nibble and the two
//! variant bits). The remaining 122 bits are treated as one unsigned integer
//! so that the Nth id of a session is simply `base + (N - 1)`, wrapping
//! modulo 2^122, with the fixed bits put back afterwards.
//!
//! ```text
//!  Bit Index:  127      80 79  76 75    64 63 62 61           0
//!              +----------+------+--------+-----+--------------+
//!  Field:      | upper 48 | ver  | mid 12 | var |   lower 62   |
//!              +----------+------+--------+-----+--------------+
//! ```

use core::{fmt, str::FromStr};
use uuid::Uuid;

use crate::{Error, Result};

const UPPER_SHIFT: u32 = 80;
const MIDDLE_SHIFT: u32 = 64;
const MIDDLE_MASK: u128 = 0xfff;
const LOWER_BITS: u32 = 62;
const LOWER_MASK: u128 = (1 << LOWER_BITS) - 1;

const VERSION_MASK: u128 = 0xf << 76;
const VERSION_BITS: u128 = 0x4 << 76;
const VARIANT_MASK: u128 = 0b11 << 62;
const VARIANT_BITS: u128 = 0b10 << 62;

/// Number of bits of a UUID that carry the numeric value.
pub const STABLE_ID_BITS: u32 = 122;
const NUMERIC_MASK: u128 = (1 << STABLE_ID_BITS) - 1;

/// Returns `true` if `uuid` has the version 4 nibble and the RFC 4122
/// variant bits set.
#[must_use]
pub const fn is_v4(uuid: u128) -> bool {
    uuid & VERSION_MASK == VERSION_BITS && uuid & VARIANT_MASK == VARIANT_BITS
}

/// Removes the fixed version and variant bits, packing the rest into a
/// 122-bit integer.
#[must_use]
pub const fn strip(uuid: u128) -> u128 {
    let upper = (uuid >> UPPER_SHIFT) << (UPPER_SHIFT - 6);
    let middle = ((uuid >> MIDDLE_SHIFT) & MIDDLE_MASK) << LOWER_BITS;
    upper | middle | (uuid & LOWER_MASK)
}

/// Inverse of [`strip`]: spreads a 122-bit integer back over a UUID and sets
/// the version 4 and RFC 4122 variant bits.
#[must_use]
pub const fn reinsert(numeric: u128) -> u128 {
    let numeric = numeric & NUMERIC_MASK;
    let upper = (numeric >> (UPPER_SHIFT - 6)) << UPPER_SHIFT;
    let middle = ((numeric >> LOWER_BITS) & MIDDLE_MASK) << MIDDLE_SHIFT;
    upper | middle | (numeric & LOWER_MASK) | VERSION_BITS | VARIANT_BITS
}

/// Returns the UUID `offset` positions after `base`.
#[must_use]
pub const fn offset(base: u128, offset: u128) -> u128 {
    reinsert(strip(base).wrapping_add(offset))
}

/// Returns how many positions `derived` lies after `base`, counting modulo
/// 2^122 so that ids which wrapped past the top of the space still resolve.
#[must_use]
pub const fn offset_from(base: u128, derived: u128) -> u128 {
    strip(derived).wrapping_sub(strip(base)) & NUMERIC_MASK
}

/// A session's identity: a version 4 UUID.
///
/// The session id doubles as the stable id of the first id the session
/// generates; every later id is derived from it by [`SessionId::stable_id`].
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "Uuid", into = "Uuid"))]
#[repr(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a new random session id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns the 122-bit numeric form of this session's base UUID.
    #[must_use]
    pub const fn numeric(&self) -> u128 {
        strip(self.0.as_u128())
    }

    /// Returns the stable id of this session's `gen_count`-th id.
    #[must_use]
    pub const fn stable_id(&self, gen_count: u64) -> StableId {
        debug_assert!(gen_count > 0);
        StableId(Uuid::from_u128(offset(self.0.as_u128(), gen_count as u128 - 1)))
    }

    /// Returns the generation count `stable` corresponds to in this
    /// session's id space, or `None` if it lies more than `u64::MAX` ids past
    /// the session's base (which includes every id before the base).
    #[must_use]
    pub fn gen_count_of(&self, stable: StableId) -> Option<u64> {
        u64::try_from(offset_from(self.0.as_u128(), stable.0.as_u128()))
            .ok()
            .and_then(|delta| delta.checked_add(1))
    }
}

impl TryFrom<Uuid> for SessionId {
    type Error = Error;

    fn try_from(uuid: Uuid) -> Result<Self> {
        if is_v4(uuid.as_u128()) {
            Ok(Self(uuid))
        } else {
            Err(Error::InvalidUuid(uuid.to_string()))
        }
    }
}

impl From<SessionId> for Uuid {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let uuid = Uuid::parse_str(s).map_err(|_| Error::InvalidUuid(s.to_owned()))?;
        Self::try_from(uuid)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0.hyphenated())
    }
}

/// The canonical, compressor-independent form of an id: a version 4 UUID.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "Uuid", into = "Uuid"))]
#[repr(transparent)]
pub struct StableId(Uuid);

impl StableId {
    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns the 122-bit numeric form of this id.
    #[must_use]
    pub const fn numeric(&self) -> u128 {
        strip(self.0.as_u128())
    }
}

impl From<SessionId> for StableId {
    fn from(id: SessionId) -> Self {
        Self(id.0)
    }
}

impl TryFrom<Uuid> for StableId {
    type Error = Error;

    fn try_from(uuid: Uuid) -> Result<Self> {
        if is_v4(uuid.as_u128()) {
            Ok(Self(uuid))
        } else {
            Err(Error::InvalidUuid(uuid.to_string()))
        }
    }
}

impl From<StableId> for Uuid {
    fn from(id: StableId) -> Self {
        id.0
    }
}

impl FromStr for StableId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let uuid = Uuid::parse_str(s).map_err(|_| Error::InvalidUuid(s.to_owned()))?;
        Self::try_from(uuid)
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl fmt::Debug for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StableId({})", self.0.hyphenated())
    }
}
