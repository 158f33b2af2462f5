//! Versioned binary snapshots of a compressor.
//!
//! All integers are big-endian. The layout is:
//!
//! ```text
//! u32 version (1)
//! u8  has local state (0 or 1)
//! u32 session count, then a u128 UUID per session
//! u32 cluster count, then per cluster:
//!     u32 session index, u64 base final id, u64 capacity, u64 count
//! if has local state:
//!     u32 local session index
//!     u64 local gen count
//!     u64 next range base gen count
//!     u64 requested cluster capacity
//!     u32 local id range count, then (u64 first gen count, u64 count) each
//! ```
//!
//! Clusters are listed in allocation order. A snapshot without local state
//! lists only sessions that own clusters.

mod codec;
#[cfg(test)]
mod tests;

use codec::{Reader, Writer};

use crate::{
    ClusterTable, DEFAULT_CLUSTER_CAPACITY, Error, FinalId, IdCluster, IdCompressor, Result,
    SessionId, SessionSpaceNormalizer, SnapshotError,
};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// An opaque, serialized [`IdCompressor`].
///
/// Produced by [`IdCompressor::serialize`] and consumed by
/// [`IdCompressor::deserialize`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct SerializedIdCompressor {
    bytes: Vec<u8>,
}

impl SerializedIdCompressor {
    /// Wraps bytes previously obtained from [`Self::as_bytes`] or
    /// [`Self::into_bytes`]. The bytes are only validated on deserialization.
    #[must_use]
    pub const fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Returns `true` if the snapshot carries the local session's state.
    #[must_use]
    pub fn has_session(&self) -> bool {
        self.bytes.get(4) == Some(&1)
    }
}

impl AsRef<[u8]> for SerializedIdCompressor {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

struct LocalState {
    session: usize,
    gen_count: u64,
    next_range_base_gen_count: u64,
    cluster_capacity: u64,
    local_id_ranges: Vec<(u64, u64)>,
}

impl IdCompressor {
    /// Serializes the compressor.
    ///
    /// With `with_session` the snapshot carries everything needed to resume
    /// this session: its id, its generated ids, which of them were handed
    /// out as local ids, and its pending creation range base. Without it the
    /// snapshot only holds the finalized state shared by every compressor in
    /// the network, suitable for bootstrapping a new session.
    #[must_use]
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self)))]
    pub fn serialize(&self, with_session: bool) -> SerializedIdCompressor {
        let table = self.cluster_table();

        // Snapshot index of every table session that is written out. Without
        // the local session, sessions are listed in order of their first
        // cluster so every replica writes identical bytes.
        let mut remap = vec![None; table.session_count()];
        let mut sessions = Vec::new();
        let order: Vec<usize> = if with_session {
            (0..table.session_count()).collect()
        } else {
            table.clusters().iter().map(IdCluster::session_index).collect()
        };
        for index in order {
            if remap[index].is_none() {
                remap[index] = Some(sessions.len());
                sessions.push(table.session_id(index));
            }
        }

        let mut writer = Writer::default();
        writer.put(SNAPSHOT_VERSION).put(u8::from(with_session));
        writer.put_len(sessions.len());
        for id in &sessions {
            writer.put(id.as_uuid().as_u128());
        }
        writer.put_len(table.clusters().len());
        for cluster in table.clusters() {
            writer
                .put_len(remap[cluster.session_index()].unwrap_or_default())
                .put(cluster.base_final_id().to_raw())
                .put(cluster.capacity())
                .put(cluster.count());
        }

        if with_session {
            let local = table
                .session_index(&self.local_session_id())
                .and_then(|index| remap[index])
                .unwrap_or_default();
            let ranges: Vec<(u64, u64)> = self.normalizer().ranges().collect();
            writer
                .put_len(local)
                .put(self.local_gen_count())
                .put(self.next_range_base_gen_count())
                .put(self.cluster_capacity())
                .put_len(ranges.len());
            for (first_gen_count, count) in ranges {
                writer.put(first_gen_count).put(count);
            }
        }

        SerializedIdCompressor {
            bytes: writer.finish(),
        }
    }

    /// Restores a compressor from a snapshot.
    ///
    /// A snapshot taken with the session resumes that session, in which case
    /// `session_id` must be `None`. A snapshot taken without one starts a
    /// fresh session with `session_id` on top of the shared state; the new
    /// session uses the default cluster capacity.
    ///
    /// # Errors
    ///
    /// - [`Error::Snapshot`] if the bytes are not a valid snapshot.
    /// - [`Error::SessionIdConflict`] if `session_id` is given for a
    ///   snapshot that carries its own session, or names a session that
    ///   already owns clusters in the snapshot.
    /// - [`Error::MissingSessionId`] if the snapshot carries no session and
    ///   `session_id` is `None`.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(serialized)))]
    pub fn deserialize(
        serialized: &SerializedIdCompressor,
        session_id: Option<SessionId>,
    ) -> Result<Self> {
        let (table, local) = decode(serialized.as_bytes())?;
        match (local, session_id) {
            (Some(_), Some(id)) => Err(Error::SessionIdConflict(id)),
            (Some(local), None) => {
                let local_session_id = table.session_id(local.session);
                Ok(Self::from_parts(
                    table,
                    local_session_id,
                    local.gen_count,
                    local.next_range_base_gen_count,
                    local.cluster_capacity,
                    local.local_id_ranges.into_iter().collect(),
                ))
            }
            (None, Some(id)) => {
                if table
                    .session_index(&id)
                    .is_some_and(|index| table.has_clusters(index))
                {
                    return Err(Error::SessionIdConflict(id));
                }
                Ok(Self::new_from_table(table, id))
            }
            (None, None) => Err(Error::MissingSessionId),
        }
    }

    fn new_from_table(table: ClusterTable, session_id: SessionId) -> Self {
        Self::from_parts(
            table,
            session_id,
            0,
            1,
            DEFAULT_CLUSTER_CAPACITY,
            SessionSpaceNormalizer::new(),
        )
    }
}

fn decode(bytes: &[u8]) -> core::result::Result<(ClusterTable, Option<LocalState>), SnapshotError> {
    let mut reader = Reader::new(bytes);
    let version: u32 = reader.take()?;
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }
    let has_local = match reader.take::<u8>()? {
        0 => false,
        1 => true,
        _ => return Err(SnapshotError::InvalidLocalState),
    };

    let session_count = reader.take_len()?;
    let mut sessions = Vec::new();
    for _ in 0..session_count {
        let uuid = uuid::Uuid::from_u128(reader.take()?);
        sessions.push(SessionId::try_from(uuid).map_err(|_| SnapshotError::InvalidSession(uuid))?);
    }

    let cluster_count = reader.take_len()?;
    let mut clusters = Vec::new();
    for _ in 0..cluster_count {
        let session: u32 = reader.take()?;
        let base = FinalId::from_raw(reader.take()?);
        let capacity: u64 = reader.take()?;
        let count: u64 = reader.take()?;
        clusters.push((session, base, capacity, count));
    }
    let table = ClusterTable::from_snapshot(sessions, clusters)?;

    let local = if has_local {
        Some(decode_local(&mut reader, &table)?)
    } else {
        None
    };
    reader.finish()?;
    Ok((table, local))
}

fn decode_local(
    reader: &mut Reader<'_>,
    table: &ClusterTable,
) -> core::result::Result<LocalState, SnapshotError> {
    let index: u32 = reader.take()?;
    let session = usize::try_from(index)
        .ok()
        .filter(|&session| session < table.session_count())
        .ok_or(SnapshotError::InvalidSessionIndex(index))?;
    let gen_count: u64 = reader.take()?;
    let next_range_base_gen_count: u64 = reader.take()?;
    let cluster_capacity: u64 = reader.take()?;

    let range_count = reader.take_len()?;
    let mut local_id_ranges = Vec::new();
    let mut floor = 1;
    for _ in 0..range_count {
        let first: u64 = reader.take()?;
        let count: u64 = reader.take()?;
        let end = first
            .checked_add(count)
            .ok_or(SnapshotError::InvalidLocalState)?;
        // Ranges are ascending, disjoint, non-empty and within the
        // generated ids.
        if count == 0 || first < floor || end - 1 > gen_count {
            return Err(SnapshotError::InvalidLocalState);
        }
        floor = end;
        local_id_ranges.push((first, count));
    }

    let finalized = table.last_finalized_gen_count(session);
    let valid = crate::config::validate_cluster_capacity(cluster_capacity).is_ok()
        && gen_count <= crate::MAX_GEN_COUNT
        && next_range_base_gen_count >= 1
        && next_range_base_gen_count <= gen_count + 1
        && finalized < next_range_base_gen_count;
    if !valid {
        return Err(SnapshotError::InvalidLocalState);
    }

    Ok(LocalState {
        session,
        gen_count,
        next_range_base_gen_count,
        cluster_capacity,
        local_id_ranges,
    })
}
