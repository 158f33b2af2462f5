use core::fmt;

/// A final id: a non-negative integer drawn from a cluster.
///
/// Final ids are globally meaningful within a network of compressors once
/// assigned, and the (session, gen count) they stand for never changes.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[repr(transparent)]
pub struct FinalId {
    id: u64,
}

impl FinalId {
    /// The first final id handed out in any network.
    pub const ZERO: Self = Self { id: 0 };

    /// The largest final id a cluster may reserve. Final ids share a signed
    /// representation with local ids, so they stop at `i64::MAX`.
    pub const MAX: Self = Self { id: i64::MAX as u64 };

    /// Creates a final id from its raw value.
    #[must_use]
    pub const fn from_raw(id: u64) -> Self {
        Self { id }
    }

    /// Returns the raw value of this id.
    #[must_use]
    pub const fn to_raw(self) -> u64 {
        self.id
    }

    /// Returns the id `delta` positions after this one.
    #[must_use]
    pub const fn offset(self, delta: u64) -> Self {
        Self { id: self.id + delta }
    }

    /// Returns the id `delta` positions after this one, or `None` past
    /// [`FinalId::MAX`].
    #[must_use]
    pub const fn checked_offset(self, delta: u64) -> Option<Self> {
        match self.id.checked_add(delta) {
            Some(id) if id <= Self::MAX.id => Some(Self { id }),
            _ => None,
        }
    }

    /// Returns how far this id lies after `base`.
    #[must_use]
    pub const fn delta_from(self, base: Self) -> u64 {
        debug_assert!(self.id >= base.id, "final id delta underflow");
        self.id - base.id
    }
}

impl fmt::Display for FinalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl fmt::Debug for FinalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FinalId({})", self.id)
    }
}

/// The largest gen count a session can finalize, since its local id must
/// still fit in an `i64`.
pub const MAX_GEN_COUNT: u64 = i64::MAX as u64;

/// Returns the local id value for the given 1-based generation count.
#[must_use]
pub(crate) const fn local_from_gen_count(gen_count: u64) -> i64 {
    debug_assert!(gen_count > 0);
    -(gen_count as i64)
}

/// Defines a signed compressed id type. Negative values are local ids (the
/// Nth generated id of a session is `-N`) and non-negative values are final
/// ids.
macro_rules! define_compressed_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "serde", serde(transparent))]
        #[repr(transparent)]
        pub struct $name {
            id: i64,
        }

        impl $name {
            /// Creates an id from its raw signed value.
            #[must_use]
            pub const fn from_raw(id: i64) -> Self {
                Self { id }
            }

            /// Returns the raw signed value of this id.
            #[must_use]
            pub const fn to_raw(self) -> i64 {
                self.id
            }

            /// Creates the local id for a 1-based generation count.
            #[must_use]
            pub const fn from_gen_count(gen_count: u64) -> Self {
                Self { id: local_from_gen_count(gen_count) }
            }

            /// Creates an id wrapping a final id. Cluster tables never hand
            /// out final ids above [`FinalId::MAX`].
            ///
            /// [`FinalId::MAX`]: $crate::FinalId::MAX
            #[must_use]
            pub const fn from_final(id: $crate::FinalId) -> Self {
                debug_assert!(id.to_raw() <= $crate::FinalId::MAX.to_raw());
                Self { id: id.to_raw() as i64 }
            }

            /// Returns `true` if this is a local (not yet finalized) id.
            #[must_use]
            pub const fn is_local(self) -> bool {
                self.id < 0
            }

            /// Returns `true` if this is a final id.
            #[must_use]
            pub const fn is_final(self) -> bool {
                self.id >= 0
            }

            /// Returns the final id, if this is one.
            #[must_use]
            pub const fn as_final(self) -> Option<$crate::FinalId> {
                if self.is_final() {
                    Some($crate::FinalId::from_raw(self.id as u64))
                } else {
                    None
                }
            }

            /// Returns the generation count of a local id.
            #[must_use]
            pub const fn gen_count(self) -> Option<u64> {
                if self.is_local() {
                    Some(self.id.unsigned_abs())
                } else {
                    None
                }
            }
        }

        impl From<$crate::FinalId> for $name {
            fn from(id: $crate::FinalId) -> Self {
                Self::from_final(id)
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.id)
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                if self.is_local() {
                    write!(f, "{}(local {})", stringify!($name), self.id)
                } else {
                    write!(f, "{}(final {})", stringify!($name), self.id)
                }
            }
        }
    };
}

define_compressed_id!(
    /// An id in *session space*: the form code running inside one session
    /// holds on to.
    ///
    /// Ids the session generated itself stay local here even after they are
    /// finalized, so a session-space id never changes once handed out. Ids
    /// from other sessions appear as final ids.
    SessionSpaceId
);

define_compressed_id!(
    /// An id in *op space*: the form placed on sequenced messages.
    ///
    /// This is a final id once one is assigned. Until then it is the
    /// originating session's local id, which only that session (or a
    /// receiver told which session sent it) can interpret.
    OpSpaceId
);
