use std::collections::{BTreeMap, HashMap};

use crate::{
    CreationRangeIds, Error, FinalId, MAX_GEN_COUNT, Result, SessionId, SnapshotError,
    config::validate_cluster_capacity, id::stable,
};

/// A contiguous block of final ids reserved for one session.
///
/// The block covers final ids `[base_final_id, base_final_id + capacity)`
/// and is aligned with the owning session's gen counts
/// `[base_gen_count, base_gen_count + capacity)`. Only the first `count`
/// slots are in use; the rest are reserved for the session's future ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdCluster {
    session: usize,
    base_final_id: FinalId,
    base_gen_count: u64,
    capacity: u64,
    count: u64,
}

impl IdCluster {
    /// Index of the owning session in the table's session list.
    #[must_use]
    pub const fn session_index(&self) -> usize {
        self.session
    }

    /// First final id of the cluster.
    #[must_use]
    pub const fn base_final_id(&self) -> FinalId {
        self.base_final_id
    }

    /// Gen count aligned with the cluster's first final id.
    #[must_use]
    pub const fn base_gen_count(&self) -> u64 {
        self.base_gen_count
    }

    /// Number of final ids reserved by the cluster.
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of reserved final ids already assigned.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    const fn remaining(&self) -> u64 {
        self.capacity - self.count
    }

    /// One past the last final id reserved by the cluster.
    const fn final_limit(&self) -> FinalId {
        self.base_final_id.offset(self.capacity)
    }
}

#[derive(Clone, Debug)]
struct Session {
    id: SessionId,
    // Indices into `ClusterTable::clusters`, ascending.
    clusters: Vec<usize>,
}

/// How a finalized range was placed into the cluster table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Allocation {
    /// The range fit into the session's newest cluster.
    Extended {
        /// First final id assigned to the range.
        first_final_id: FinalId,
    },
    /// A new cluster was reserved for (part of) the range.
    NewCluster {
        /// First final id assigned to the range. Lies in the previous
        /// cluster if that cluster still had room.
        first_final_id: FinalId,
        /// Base of the newly reserved cluster.
        base_final_id: FinalId,
        /// Capacity of the newly reserved cluster.
        capacity: u64,
    },
}

impl Allocation {
    /// First final id assigned to the range.
    #[must_use]
    pub const fn first_final_id(&self) -> FinalId {
        match *self {
            Self::Extended { first_final_id } | Self::NewCluster { first_final_id, .. } => {
                first_final_id
            }
        }
    }
}

/// Every session known to a compressor and the clusters of final ids they
/// own.
///
/// Clusters are stored in allocation order, which is also ascending final id
/// order, so a final id resolves to its owner with a binary search. Each
/// session keeps the indices of its own clusters in gen count order for the
/// forward lookup. Sessions are additionally ordered by the numeric value of
/// their UUID so a stable id resolves to the session whose id space it lies
/// in.
#[derive(Clone, Debug, Default)]
pub struct ClusterTable {
    sessions: Vec<Session>,
    by_id: HashMap<SessionId, usize>,
    by_numeric: BTreeMap<u128, usize>,
    clusters: Vec<IdCluster>,
}

impl ClusterTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index of `session_id`, registering it if it is new.
    pub fn get_or_create_session(&mut self, session_id: SessionId) -> usize {
        if let Some(&index) = self.by_id.get(&session_id) {
            return index;
        }
        let index = self.sessions.len();
        self.sessions.push(Session {
            id: session_id,
            clusters: Vec::new(),
        });
        self.by_id.insert(session_id, index);
        self.by_numeric.insert(session_id.numeric(), index);
        index
    }

    /// Returns the index of `session_id`, if it is known.
    #[must_use]
    pub fn session_index(&self, session_id: &SessionId) -> Option<usize> {
        self.by_id.get(session_id).copied()
    }

    /// Returns the id of the session at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` was not handed out by this table.
    #[must_use]
    pub fn session_id(&self, index: usize) -> SessionId {
        self.sessions[index].id
    }

    /// Number of known sessions, including ones without clusters.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if the session at `index` owns at least one cluster.
    #[must_use]
    pub fn has_clusters(&self, index: usize) -> bool {
        !self.sessions[index].clusters.is_empty()
    }

    /// Every cluster in allocation order.
    #[must_use]
    pub fn clusters(&self) -> &[IdCluster] {
        &self.clusters
    }

    /// The first final id no cluster has reserved yet.
    #[must_use]
    pub fn next_free_final(&self) -> FinalId {
        self.clusters
            .last()
            .map_or(FinalId::ZERO, IdCluster::final_limit)
    }

    /// The highest gen count of the session at `index` that has a final id,
    /// or zero if none do.
    #[must_use]
    pub fn last_finalized_gen_count(&self, index: usize) -> u64 {
        self.newest_cluster(index)
            .map_or(0, |cluster| cluster.base_gen_count + cluster.count - 1)
    }

    fn newest_cluster(&self, index: usize) -> Option<&IdCluster> {
        self.sessions[index]
            .clusters
            .last()
            .map(|&cluster| &self.clusters[cluster])
    }

    /// Finalizes `ids` for `session_id`, registering the session if this is
    /// its first range.
    ///
    /// The range must start right after the session's last finalized gen
    /// count. If the session's newest cluster has room for the whole range
    /// the cluster absorbs it; otherwise the cluster is filled and a new one
    /// of `max(overflow, requested_cluster_size)` slots is reserved at the
    /// next free final id. Nothing is modified if an error is returned.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyCreationRange`] if the range has a count of zero.
    /// - [`Error::InvalidClusterCapacity`] if the requested cluster size is
    ///   zero or above [`MAX_CLUSTER_CAPACITY`].
    /// - [`Error::RangeOutOfOrder`] if the range does not continue the
    ///   session's finalized ids.
    /// - [`Error::GenCountOverflow`] if the range ends past
    ///   [`MAX_GEN_COUNT`].
    /// - [`Error::FinalIdOverflow`] if the new cluster would reserve final
    ///   ids past [`FinalId::MAX`].
    /// - [`Error::ClusterCollision`] if the new cluster would make the
    ///   session's stable ids overlap another session's.
    ///
    /// [`MAX_CLUSTER_CAPACITY`]: crate::MAX_CLUSTER_CAPACITY
    pub fn finalize(&mut self, session_id: SessionId, ids: &CreationRangeIds) -> Result<Allocation> {
        if ids.count == 0 {
            return Err(Error::EmptyCreationRange { session_id });
        }
        validate_cluster_capacity(ids.requested_cluster_size)?;
        let existing = self.session_index(&session_id);
        let expected = existing.map_or(0, |index| self.last_finalized_gen_count(index)) + 1;
        if ids.first_gen_count != expected {
            return Err(Error::RangeOutOfOrder {
                session_id,
                expected,
                actual: ids.first_gen_count,
            });
        }
        if ids.last_gen_count().is_none_or(|last| last > MAX_GEN_COUNT) {
            return Err(Error::GenCountOverflow { session_id });
        }

        let newest = existing.and_then(|index| self.sessions[index].clusters.last().copied());
        let remaining = newest.map_or(0, |cluster| self.clusters[cluster].remaining());
        let first_final_id = match newest {
            Some(cluster) if remaining > 0 => {
                let cluster = &self.clusters[cluster];
                cluster.base_final_id.offset(cluster.count)
            }
            _ => self.next_free_final(),
        };

        if let Some(cluster) = newest.filter(|_| remaining >= ids.count) {
            self.clusters[cluster].count += ids.count;
            return Ok(Allocation::Extended { first_final_id });
        }

        let overflow = ids.count - remaining;
        let capacity = overflow.max(ids.requested_cluster_size);
        let base_gen_count = expected + remaining;
        // Both terms are at most `MAX_GEN_COUNT`, so the sum fits.
        let last_reserved_gen_count = base_gen_count + (capacity - 1);
        if self
            .next_free_final()
            .checked_offset(capacity - 1)
            .is_none()
        {
            return Err(Error::FinalIdOverflow { session_id });
        }
        self.check_collision(session_id, last_reserved_gen_count)?;

        let index = self.get_or_create_session(session_id);
        if let Some(cluster) = newest {
            let cluster = &mut self.clusters[cluster];
            cluster.count = cluster.capacity;
        }
        let base_final_id = self.next_free_final();
        self.push_cluster(IdCluster {
            session: index,
            base_final_id,
            base_gen_count,
            capacity,
            count: overflow,
        });
        Ok(Allocation::NewCluster {
            first_final_id,
            base_final_id,
            capacity,
        })
    }

    fn push_cluster(&mut self, cluster: IdCluster) {
        self.sessions[cluster.session]
            .clusters
            .push(self.clusters.len());
        self.clusters.push(cluster);
    }

    /// Checks that reserving gen counts up to `last_gen_count` for
    /// `session_id` keeps its stable ids clear of every other session's.
    fn check_collision(&self, session_id: SessionId, last_gen_count: u64) -> Result<()> {
        let start = session_id.numeric();
        let end = start + u128::from(last_gen_count) - 1;
        let collision = |other: usize| {
            Err(Error::ClusterCollision {
                session_id,
                other: self.sessions[other].id,
                base: self.next_free_final(),
            })
        };

        // No other session may start inside our reserved stable ids.
        if let Some((&numeric, &other)) = self.by_numeric.range(start + 1..).next() {
            if numeric <= end {
                return collision(other);
            }
        }
        // Reserved ids past the top of the space wrap around to the bottom.
        let space = 1u128 << stable::STABLE_ID_BITS;
        if end >= space {
            if let Some((&numeric, &other)) = self.by_numeric.iter().next() {
                if numeric <= end - space && numeric != start {
                    return collision(other);
                }
            }
        }

        // The nearest preceding session with clusters may not reach us.
        for (&numeric, &other) in self.by_numeric.range(..start).rev() {
            let Some(reserved) = self.newest_cluster(other) else {
                continue;
            };
            let other_end =
                numeric + u128::from(reserved.base_gen_count + reserved.capacity - 1) - 1;
            if other_end >= start {
                return collision(other);
            }
            break;
        }
        Ok(())
    }

    /// Returns the final id of the session's `gen_count`-th id, if it has
    /// been finalized.
    #[must_use]
    pub fn final_for(&self, index: usize, gen_count: u64) -> Option<FinalId> {
        let clusters = &self.sessions[index].clusters;
        let position = clusters.partition_point(|&c| self.clusters[c].base_gen_count <= gen_count);
        let cluster = &self.clusters[*clusters.get(position.checked_sub(1)?)?];
        let delta = gen_count - cluster.base_gen_count;
        (delta < cluster.count).then(|| cluster.base_final_id.offset(delta))
    }

    /// Returns the cluster reserving `final_id`, whether or not the id has
    /// been assigned yet.
    #[must_use]
    pub fn cluster_for(&self, final_id: FinalId) -> Option<&IdCluster> {
        let position = self
            .clusters
            .partition_point(|cluster| cluster.base_final_id <= final_id);
        let cluster = self.clusters.get(position.checked_sub(1)?)?;
        (final_id < cluster.final_limit()).then_some(cluster)
    }

    /// Returns the owning session index and gen count of an assigned final
    /// id.
    #[must_use]
    pub fn owner_of(&self, final_id: FinalId) -> Option<(usize, u64)> {
        let cluster = self.cluster_for(final_id)?;
        let delta = final_id.delta_from(cluster.base_final_id);
        (delta < cluster.count).then(|| (cluster.session, cluster.base_gen_count + delta))
    }

    /// Returns the session whose stable id space `numeric` may fall into:
    /// the session with the nearest base at or below it, wrapping around to
    /// the highest base for ids below every session's base. Whether the id
    /// was actually generated or finalized is left to the caller.
    #[must_use]
    pub fn session_for_stable(&self, numeric: u128) -> Option<usize> {
        self.by_numeric
            .range(..=numeric)
            .next_back()
            .or_else(|| self.by_numeric.iter().next_back())
            .map(|(_, &index)| index)
    }

    /// Compares two tables by session identity rather than by index.
    ///
    /// Sessions without clusters are only compared if `include_empty` is
    /// set.
    #[must_use]
    pub fn equals(&self, other: &Self, include_empty: bool) -> bool {
        let known = |table: &Self| {
            let mut ids: Vec<SessionId> = table
                .sessions
                .iter()
                .filter(|session| include_empty || !session.clusters.is_empty())
                .map(|session| session.id)
                .collect();
            ids.sort_unstable();
            ids
        };
        if known(self) != known(other) || self.clusters.len() != other.clusters.len() {
            return false;
        }
        self.clusters.iter().zip(&other.clusters).all(|(a, b)| {
            self.sessions[a.session].id == other.sessions[b.session].id
                && a.base_final_id == b.base_final_id
                && a.base_gen_count == b.base_gen_count
                && a.capacity == b.capacity
                && a.count == b.count
        })
    }

    /// Rebuilds a table from a decoded snapshot.
    ///
    /// `clusters` lists `(session index, base final id, capacity, count)` in
    /// allocation order. Bases must be contiguous, every cluster but a
    /// session's newest must be full, and counts must be non-zero and within
    /// capacity. No cluster may reserve a final id past [`FinalId::MAX`] or
    /// assign a gen count past [`MAX_GEN_COUNT`].
    pub(crate) fn from_snapshot(
        sessions: Vec<SessionId>,
        clusters: Vec<(u32, FinalId, u64, u64)>,
    ) -> core::result::Result<Self, SnapshotError> {
        let mut table = Self::new();
        for id in sessions {
            if table.session_index(&id).is_some() {
                return Err(SnapshotError::InvalidSession(id.into()));
            }
            table.get_or_create_session(id);
        }

        for (position, (session, base_final_id, capacity, count)) in
            clusters.into_iter().enumerate()
        {
            let index = usize::try_from(session)
                .ok()
                .filter(|&index| index < table.sessions.len())
                .ok_or(SnapshotError::InvalidSessionIndex(session))?;
            let fits = base_final_id
                .checked_offset(capacity.saturating_sub(1))
                .is_some();
            if base_final_id != table.next_free_final() || !fits || count == 0 || count > capacity
            {
                return Err(SnapshotError::InvalidCluster(position));
            }
            let base_gen_count = match table.newest_cluster(index) {
                Some(previous) if previous.remaining() > 0 => {
                    return Err(SnapshotError::InvalidCluster(position));
                }
                Some(previous) => previous.base_gen_count + previous.capacity,
                None => 1,
            };
            if base_gen_count.checked_add(capacity).is_none()
                || base_gen_count + (count - 1) > MAX_GEN_COUNT
            {
                return Err(SnapshotError::InvalidCluster(position));
            }
            table.push_cluster(IdCluster {
                session: index,
                base_final_id,
                base_gen_count,
                capacity,
                count,
            });
        }
        Ok(table)
    }
}
