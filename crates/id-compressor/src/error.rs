use crate::{FinalId, SessionId};

/// A result type defaulting to the crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors the compressor can report.
///
/// Every variant describes a violated caller precondition or a corrupt
/// snapshot. None of them are transient: the compressor performs no I/O, so
/// retrying the same call with the same input fails the same way. Ordering
/// errors in particular point at an upstream sequencing bug.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A creation range carried ids but declared a count of zero.
    #[error("creation range for session {session_id} has a count of zero")]
    EmptyCreationRange { session_id: SessionId },

    /// A creation range did not start right after the session's last
    /// finalized generation count. Duplicate finalization lands here too.
    #[error(
        "creation range for session {session_id} starts at gen count {actual}, expected {expected}"
    )]
    RangeOutOfOrder {
        session_id: SessionId,
        expected: u64,
        actual: u64,
    },

    /// A creation range attributed to the local session covers ids the
    /// session never generated.
    #[error("creation range ends at gen count {range_end} but only {local_gen_count} ids exist")]
    RangeExceedsLocalIds { range_end: u64, local_gen_count: u64 },

    /// A creation range reaches past [`MAX_GEN_COUNT`], or its count
    /// overflows.
    ///
    /// [`MAX_GEN_COUNT`]: crate::MAX_GEN_COUNT
    #[error("creation range for session {session_id} runs past the largest gen count")]
    GenCountOverflow { session_id: SessionId },

    /// A new cluster for the session would reserve final ids past
    /// [`FinalId::MAX`].
    #[error("no final ids left to reserve a cluster for session {session_id}")]
    FinalIdOverflow { session_id: SessionId },

    /// A creation range attributed to the local session lists different
    /// local id runs than the ones this compressor handed out.
    #[error("local id ranges of creation range for session {session_id} do not match generated ids")]
    LocalIdRangesMismatch { session_id: SessionId },

    /// The id is not known to this compressor.
    #[error("unknown id {0}")]
    UnknownId(i64),

    /// The stable id does not correspond to any id known to this compressor.
    #[error("unknown stable id {0}")]
    UnknownStableId(uuid::Uuid),

    /// No ids have ever been finalized for the session.
    #[error("no ids have been finalized for session {0}")]
    UnknownSession(SessionId),

    /// A requested cluster capacity was zero or above the supported maximum,
    /// whether set locally or carried by a creation range.
    #[error("invalid cluster capacity {capacity}, expected 1..={max}")]
    InvalidClusterCapacity { capacity: u64, max: u64 },

    /// Allocating ids for a session would overlap another session's stable
    /// id space.
    #[error("cluster allocation for session {session_id} at final id {base} collides with session {other}")]
    ClusterCollision {
        session_id: SessionId,
        other: SessionId,
        base: FinalId,
    },

    /// The compressor is already bound to a ghost session.
    #[error("compressor is already bound to ghost session {0}")]
    GhostSessionActive(SessionId),

    /// A snapshot without session state was deserialized without supplying a
    /// session id.
    #[error("snapshot has no session state and no session id was supplied")]
    MissingSessionId,

    /// The supplied session id conflicts with the snapshot: either the
    /// snapshot already carries a session, or the id already owns clusters.
    #[error("session id {0} conflicts with the snapshot")]
    SessionIdConflict(SessionId),

    /// A value was not a version 4, RFC 4122 variant UUID.
    #[error("{0:?} is not a version 4 UUID")]
    InvalidUuid(String),

    /// The snapshot is corrupt or was written by an incompatible version.
    #[error("invalid snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Reasons a serialized snapshot could not be decoded.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum SnapshotError {
    /// The buffer ended before the structure was complete.
    #[error("unexpected end of data")]
    UnexpectedEnd,

    /// The snapshot was written with an unknown format version.
    #[error("unsupported version {0}")]
    UnsupportedVersion(u32),

    /// Bytes remained after the structure was fully decoded.
    #[error("{0} trailing bytes")]
    TrailingBytes(usize),

    /// A cluster or the local state referenced a session that is not in the
    /// session table.
    #[error("session index {0} out of range")]
    InvalidSessionIndex(u32),

    /// A session uuid is not a version 4 UUID, or appears twice.
    #[error("invalid session table entry {0}")]
    InvalidSession(uuid::Uuid),

    /// A cluster is empty, overfull, not contiguous with its predecessor, or
    /// reaches past the largest final id or gen count.
    #[error("invalid cluster at position {0}")]
    InvalidCluster(usize),

    /// The local session state is inconsistent with the cluster table.
    #[error("invalid local session state")]
    InvalidLocalState,
}
