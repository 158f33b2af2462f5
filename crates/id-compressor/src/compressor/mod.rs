
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    ClusterTable, CompressorConfig, CreationRangeIds, Error, FinalId, IdCreationRange,
    OpSpaceId, Result, SessionId, SessionSpaceId, SessionSpaceNormalizer, StableId,
    config::validate_cluster_capacity,
};

/// Compresses the ids of one session and decompresses the ids of every
/// session it has heard from.
///
/// A compressor hands out local ids with [`generate_compressed_id`], batches
/// them into creation ranges with [`take_next_creation_range`], and turns
/// creation ranges delivered by the sequencer (its own and every other
/// session's) into final ids with [`finalize_creation_range`]. As long as
/// every compressor receives each session's ranges in the same order, all
/// of them assign identical final ids.
///
/// The compressor is synchronous and performs no locking or I/O; wrap it in
/// whatever synchronization the host needs.
///
/// [`generate_compressed_id`]: IdCompressor::generate_compressed_id
/// [`take_next_creation_range`]: IdCompressor::take_next_creation_range
/// [`finalize_creation_range`]: IdCompressor::finalize_creation_range
#[derive(Clone, Debug)]
pub struct IdCompressor {
    clusters: ClusterTable,
    local_session: usize,
    local_session_id: SessionId,
    local_gen_count: u64,
    next_range_base_gen_count: u64,
    cluster_capacity: u64,
    normalizer: SessionSpaceNormalizer,
    ghost_session: Option<SessionId>,
}

impl IdCompressor {
    /// Creates a compressor for `session_id` with the default config.
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        let mut clusters = ClusterTable::new();
        let local_session = clusters.get_or_create_session(session_id);
        Self {
            clusters,
            local_session,
            local_session_id: session_id,
            local_gen_count: 0,
            next_range_base_gen_count: 1,
            cluster_capacity: CompressorConfig::default().cluster_capacity,
            normalizer: SessionSpaceNormalizer::new(),
            ghost_session: None,
        }
    }

    /// Creates a compressor for `session_id` with an explicit config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidClusterCapacity`] if the config is invalid.
    pub fn with_config(session_id: SessionId, config: CompressorConfig) -> Result<Self> {
        config.validate()?;
        let mut compressor = Self::new(session_id);
        compressor.cluster_capacity = config.cluster_capacity;
        Ok(compressor)
    }

    /// Reassembles a compressor from decoded snapshot parts.
    pub(crate) fn from_parts(
        clusters: ClusterTable,
        local_session_id: SessionId,
        local_gen_count: u64,
        next_range_base_gen_count: u64,
        cluster_capacity: u64,
        normalizer: SessionSpaceNormalizer,
    ) -> Self {
        let mut clusters = clusters;
        let local_session = clusters.get_or_create_session(local_session_id);
        Self {
            clusters,
            local_session,
            local_session_id,
            local_gen_count,
            next_range_base_gen_count,
            cluster_capacity,
            normalizer,
            ghost_session: None,
        }
    }

    /// The session this compressor generates ids for.
    #[must_use]
    pub const fn local_session_id(&self) -> SessionId {
        self.local_session_id
    }

    /// Number of ids the local session has generated.
    #[must_use]
    pub const fn local_gen_count(&self) -> u64 {
        self.local_gen_count
    }

    /// Gen count the next creation range taken will start at.
    #[must_use]
    pub const fn next_range_base_gen_count(&self) -> u64 {
        self.next_range_base_gen_count
    }

    /// The cluster capacity requested in creation ranges taken from now on.
    #[must_use]
    pub const fn cluster_capacity(&self) -> u64 {
        self.cluster_capacity
    }

    /// Changes the cluster capacity requested by creation ranges taken from
    /// now on. Clusters that already exist keep their size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidClusterCapacity`] if `capacity` is zero or
    /// larger than [`MAX_CLUSTER_CAPACITY`].
    ///
    /// [`MAX_CLUSTER_CAPACITY`]: crate::MAX_CLUSTER_CAPACITY
    pub fn set_cluster_capacity(&mut self, capacity: u64) -> Result<()> {
        validate_cluster_capacity(capacity)?;
        self.cluster_capacity = capacity;
        Ok(())
    }

    /// The ghost session this compressor is bound to, if any.
    #[must_use]
    pub const fn ghost_session_id(&self) -> Option<SessionId> {
        self.ghost_session
    }

    /// Every known session and cluster.
    #[must_use]
    pub const fn cluster_table(&self) -> &ClusterTable {
        &self.clusters
    }

    /// The gen counts the local session handed out as local ids.
    #[must_use]
    pub const fn normalizer(&self) -> &SessionSpaceNormalizer {
        &self.normalizer
    }

    /// Number of clusters allocated across all sessions.
    #[must_use]
    pub fn cluster_count(&self) -> usize {
        self.clusters.clusters().len()
    }

    /// Number of known sessions, the local session included.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.clusters.session_count()
    }

    /// The first final id not yet reserved by any cluster.
    #[must_use]
    pub fn next_final_id(&self) -> FinalId {
        self.clusters.next_free_final()
    }

    /// Generates a new id in session space.
    ///
    /// Normally this is the next local id: `-1`, `-2`, `-3`, and so on. In a
    /// ghost session the id is finalized on the spot and a final id is
    /// returned instead.
    ///
    /// # Panics
    ///
    /// Panics in a ghost session if the ghost session's next cluster would
    /// overlap another session's stable ids. Use
    /// [`Self::try_generate_compressed_id`] to handle that case.
    pub fn generate_compressed_id(&mut self) -> SessionSpaceId {
        match self.try_generate_compressed_id() {
            Ok(id) => id,
            Err(e) => panic!("ghost session id generation failed: {e}"),
        }
    }

    /// A fallible version of [`Self::generate_compressed_id`].
    ///
    /// # Errors
    ///
    /// Only fails in a ghost session, with [`Error::ClusterCollision`].
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn try_generate_compressed_id(&mut self) -> Result<SessionSpaceId> {
        if let Some(ghost) = self.ghost_session {
            return self.generate_ghost_id(ghost);
        }
        self.local_gen_count += 1;
        self.normalizer.add_local_range(self.local_gen_count, 1);
        Ok(SessionSpaceId::from_gen_count(self.local_gen_count))
    }

    fn generate_ghost_id(&mut self, ghost: SessionId) -> Result<SessionSpaceId> {
        let last = self
            .clusters
            .session_index(&ghost)
            .map_or(0, |index| self.clusters.last_finalized_gen_count(index));
        let ids = CreationRangeIds {
            first_gen_count: last + 1,
            count: 1,
            requested_cluster_size: self.cluster_capacity,
            local_id_ranges: Vec::new(),
        };
        let allocation = self.clusters.finalize(ghost, &ids)?;
        Ok(SessionSpaceId::from_final(allocation.first_final_id()))
    }

    /// Binds this compressor to a ghost session for the rest of its life.
    ///
    /// From then on [`Self::generate_compressed_id`] no longer creates local
    /// ids. It mints the ghost session's next id and finalizes it
    /// immediately, exactly as a remote range attributed to the ghost
    /// session would be finalized. Every compressor that runs the same
    /// sequence of ghost generations with the same cluster capacity
    /// therefore assigns the same final ids without exchanging any ranges.
    ///
    /// # Errors
    ///
    /// - [`Error::GhostSessionActive`] if a ghost session is already bound.
    /// - [`Error::SessionIdConflict`] if `session_id` is the local session.
    pub fn start_ghost_session(&mut self, session_id: SessionId) -> Result<()> {
        if let Some(ghost) = self.ghost_session {
            return Err(Error::GhostSessionActive(ghost));
        }
        if session_id == self.local_session_id {
            return Err(Error::SessionIdConflict(session_id));
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(local = %self.local_session_id, ghost = %session_id, "started ghost session");
        self.ghost_session = Some(session_id);
        Ok(())
    }

    /// Returns a creation range covering every id generated since the last
    /// call, and marks those ids as taken.
    ///
    /// The range is empty if nothing was generated in between. Ranges must
    /// reach the sequencer in the order they are taken.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn take_next_creation_range(&mut self) -> IdCreationRange {
        let range = self.creation_range_from(self.next_range_base_gen_count);
        self.next_range_base_gen_count = self.local_gen_count + 1;
        range
    }

    /// Returns a creation range covering every generated id that is not yet
    /// finalized, without marking anything as taken.
    ///
    /// After resuming from a snapshot, this is the range to resend for ids
    /// whose ranges may have been lost in flight.
    #[must_use]
    pub fn take_unfinalized_creation_range(&self) -> IdCreationRange {
        let first_gen_count = self.clusters.last_finalized_gen_count(self.local_session) + 1;
        self.creation_range_from(first_gen_count)
    }

    fn creation_range_from(&self, first_gen_count: u64) -> IdCreationRange {
        if first_gen_count > self.local_gen_count {
            return IdCreationRange::empty(self.local_session_id);
        }
        IdCreationRange {
            session_id: self.local_session_id,
            ids: Some(CreationRangeIds {
                first_gen_count,
                count: self.local_gen_count - first_gen_count + 1,
                requested_cluster_size: self.cluster_capacity,
                local_id_ranges: self
                    .normalizer
                    .ranges_between(first_gen_count, self.local_gen_count),
            }),
        }
    }

    /// Assigns final ids to the ids in `range`.
    ///
    /// Must be called for every range the sequencer delivers, including the
    /// local session's own, in delivery order. Empty ranges are ignored.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyCreationRange`] if the range has ids but a count of
    ///   zero.
    /// - [`Error::RangeOutOfOrder`] if the range does not continue its
    ///   session's finalized ids (including finalizing a range twice).
    /// - [`Error::InvalidClusterCapacity`] if the range requests an
    ///   unsupported cluster size.
    /// - [`Error::RangeExceedsLocalIds`] if the range claims local ids this
    ///   compressor never generated.
    /// - [`Error::LocalIdRangesMismatch`] if a local range's local id runs
    ///   differ from the ids this compressor handed out.
    /// - [`Error::GenCountOverflow`] or [`Error::FinalIdOverflow`] if the
    ///   range would exhaust gen counts or final ids.
    /// - [`Error::ClusterCollision`] if the session's stable ids would
    ///   overlap another session's.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "trace", skip(self, range), fields(session = %range.session_id, count = range.count()))
    )]
    pub fn finalize_creation_range(&mut self, range: &IdCreationRange) -> Result<()> {
        let Some(ids) = &range.ids else {
            return Ok(());
        };
        let is_local = range.session_id == self.local_session_id;
        if is_local {
            // Malformed counts are reported by the cluster table.
            if let Some(range_end) = ids.last_gen_count() {
                self.check_local_range(ids, range_end)?;
            }
        }

        let allocation = self.clusters.finalize(range.session_id, ids)?;
        #[cfg(feature = "tracing")]
        if let crate::Allocation::NewCluster {
            base_final_id,
            capacity,
            ..
        } = allocation
        {
            tracing::debug!(
                session = %range.session_id,
                local = is_local,
                %base_final_id,
                capacity,
                "allocated cluster"
            );
        }
        #[cfg(not(feature = "tracing"))]
        let _ = allocation;
        Ok(())
    }

    fn check_local_range(&self, ids: &CreationRangeIds, range_end: u64) -> Result<()> {
        if range_end > self.local_gen_count {
            return Err(Error::RangeExceedsLocalIds {
                range_end,
                local_gen_count: self.local_gen_count,
            });
        }
        if ids.local_id_ranges != self.normalizer.ranges_between(ids.first_gen_count, range_end) {
            return Err(Error::LocalIdRangesMismatch {
                session_id: self.local_session_id,
            });
        }
        Ok(())
    }

    /// Converts a session-space id into the form to put on an outgoing op.
    ///
    /// Final ids pass through. A local id becomes its final id once its
    /// range has been finalized and stays local until then.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownId`] for a local id this session never
    /// generated.
    pub fn normalize_to_op_space(&self, id: SessionSpaceId) -> Result<OpSpaceId> {
        let Some(gen_count) = id.gen_count() else {
            return Ok(OpSpaceId::from_raw(id.to_raw()));
        };
        if !self.is_local_id(gen_count) {
            return Err(Error::UnknownId(id.to_raw()));
        }
        Ok(self
            .clusters
            .final_for(self.local_session, gen_count)
            .map_or(OpSpaceId::from_raw(id.to_raw()), OpSpaceId::from_final))
    }

    /// Converts an id received on an op from `origin_session_id` into
    /// session space.
    ///
    /// Final ids this session generated come back as the local ids it
    /// handed out, so every id round trips through op space unchanged.
    /// Local ids from other sessions resolve to their final ids.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownSession`] for a local id from a session that has
    ///   never had a range finalized here.
    /// - [`Error::UnknownId`] for any other id that cannot be resolved.
    pub fn normalize_to_session_space(
        &self,
        id: OpSpaceId,
        origin_session_id: SessionId,
    ) -> Result<SessionSpaceId> {
        if let Some(final_id) = id.as_final() {
            return match self.clusters.owner_of(final_id) {
                Some((session, gen_count))
                    if session == self.local_session && self.normalizer.contains(gen_count) =>
                {
                    Ok(SessionSpaceId::from_gen_count(gen_count))
                }
                Some(_) => Ok(SessionSpaceId::from_final(final_id)),
                None => Err(Error::UnknownId(id.to_raw())),
            };
        }

        let local = SessionSpaceId::from_raw(id.to_raw());
        let gen_count = local.gen_count().unwrap_or_default();
        if origin_session_id == self.local_session_id {
            return if self.is_local_id(gen_count) {
                Ok(local)
            } else {
                Err(Error::UnknownId(id.to_raw()))
            };
        }

        let session = self
            .clusters
            .session_index(&origin_session_id)
            .filter(|&index| self.clusters.has_clusters(index))
            .ok_or(Error::UnknownSession(origin_session_id))?;
        self.clusters
            .final_for(session, gen_count)
            .map(SessionSpaceId::from_final)
            .ok_or(Error::UnknownId(id.to_raw()))
    }

    /// Expands a session-space id into its stable id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownId`] if the id was never generated here or
    /// finalized here.
    pub fn decompress(&self, id: SessionSpaceId) -> Result<StableId> {
        self.try_decompress(id).ok_or(Error::UnknownId(id.to_raw()))
    }

    /// Like [`Self::decompress`], returning `None` for unknown ids.
    #[must_use]
    pub fn try_decompress(&self, id: SessionSpaceId) -> Option<StableId> {
        match (id.gen_count(), id.as_final()) {
            (Some(gen_count), _) => self
                .is_local_id(gen_count)
                .then(|| self.local_session_id.stable_id(gen_count)),
            (None, Some(final_id)) => {
                let (session, gen_count) = self.clusters.owner_of(final_id)?;
                Some(self.clusters.session_id(session).stable_id(gen_count))
            }
            (None, None) => None,
        }
    }

    /// Compresses a stable id back into session space.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStableId`] if the stable id does not belong
    /// to an id generated or finalized here.
    pub fn recompress(&self, stable: StableId) -> Result<SessionSpaceId> {
        self.try_recompress(stable)
            .ok_or(Error::UnknownStableId(*stable.as_uuid()))
    }

    /// Like [`Self::recompress`], returning `None` for unknown stable ids.
    #[must_use]
    pub fn try_recompress(&self, stable: StableId) -> Option<SessionSpaceId> {
        let session = self.clusters.session_for_stable(stable.numeric())?;
        let gen_count = self.clusters.session_id(session).gen_count_of(stable)?;
        if session == self.local_session && self.is_local_id(gen_count) {
            return Some(SessionSpaceId::from_gen_count(gen_count));
        }
        self.clusters
            .final_for(session, gen_count)
            .map(SessionSpaceId::from_final)
    }

    /// Deep comparison of two compressors.
    ///
    /// Compares every session with clusters and every cluster. With
    /// `with_session`, also compares the local session's identity, its
    /// generated ids, the next range base, the requested cluster capacity
    /// and sessions without clusters.
    #[must_use]
    pub fn equals(&self, other: &Self, with_session: bool) -> bool {
        if with_session
            && (self.local_session_id != other.local_session_id
                || self.local_gen_count != other.local_gen_count
                || self.next_range_base_gen_count != other.next_range_base_gen_count
                || self.cluster_capacity != other.cluster_capacity
                || self.normalizer != other.normalizer)
        {
            return false;
        }
        self.clusters.equals(&other.clusters, with_session)
    }

    fn is_local_id(&self, gen_count: u64) -> bool {
        gen_count > 0 && gen_count <= self.local_gen_count && self.normalizer.contains(gen_count)
    }
}
