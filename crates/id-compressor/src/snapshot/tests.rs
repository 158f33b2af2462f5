use crate::{
    CompressorConfig, DEFAULT_CLUSTER_CAPACITY, Error, IdCompressor, SerializedIdCompressor,
    SessionId, SnapshotError,
};

fn session(n: u8) -> SessionId {
    format!("88888888-8888-4888-b{n}88-888888888888")
        .parse()
        .unwrap()
}

/// Two sessions with interleaved clusters, some pending ids and a range
/// taken but not yet finalized on `a`.
fn populated() -> (IdCompressor, IdCompressor) {
    let config = CompressorConfig::with_cluster_capacity(3).unwrap();
    let mut a = IdCompressor::with_config(session(0), config).unwrap();
    let mut b = IdCompressor::with_config(session(1), config).unwrap();
    for _ in 0..4 {
        a.generate_compressed_id();
    }
    b.generate_compressed_id();
    let range_a = a.take_next_creation_range();
    let range_b = b.take_next_creation_range();
    for c in [&mut a, &mut b] {
        c.finalize_creation_range(&range_b).unwrap();
        c.finalize_creation_range(&range_a).unwrap();
    }
    a.generate_compressed_id();
    a.take_next_creation_range();
    a.generate_compressed_id();
    (a, b)
}

#[test]
fn round_trips_with_session() {
    let (a, _) = populated();
    let snapshot = a.serialize(true);
    assert!(snapshot.has_session());

    let resumed = IdCompressor::deserialize(&snapshot, None).unwrap();
    assert!(resumed.equals(&a, true));
    assert_eq!(resumed.local_session_id(), session(0));
    assert_eq!(resumed.local_gen_count(), 6);
    assert_eq!(resumed.next_range_base_gen_count(), 6);
    assert_eq!(resumed.cluster_capacity(), 3);
    assert_eq!(resumed.serialize(true), snapshot);

    let ids = resumed.take_unfinalized_creation_range().ids.unwrap();
    assert_eq!((ids.first_gen_count, ids.count), (5, 2));
}

#[test]
fn round_trips_without_session() {
    let (a, b) = populated();
    let snapshot = a.serialize(false);
    assert!(!snapshot.has_session());
    // Replicas that finalized the same ranges write the same bytes.
    assert_eq!(snapshot, b.serialize(false));

    let fresh = IdCompressor::deserialize(&snapshot, Some(session(2))).unwrap();
    assert!(fresh.equals(&a, false));
    assert_eq!(fresh.local_session_id(), session(2));
    assert_eq!(fresh.local_gen_count(), 0);
    assert_eq!(fresh.cluster_capacity(), DEFAULT_CLUSTER_CAPACITY);

    // The fresh session decompresses every finalized id like the others.
    for raw in 0..5 {
        let id = crate::SessionSpaceId::from_final(crate::FinalId::from_raw(raw));
        assert_eq!(fresh.decompress(id), a.decompress(id));
    }
}

#[test]
fn sessions_without_clusters_are_left_out_without_session() {
    let mut a = IdCompressor::new(session(0));
    let mut b = IdCompressor::new(session(1));
    b.generate_compressed_id();
    let range = b.take_next_creation_range();
    a.finalize_creation_range(&range).unwrap();

    let fresh = IdCompressor::deserialize(&a.serialize(false), Some(session(3))).unwrap();
    assert_eq!(fresh.cluster_table().session_count(), 2);
    assert_eq!(fresh.cluster_table().session_index(&session(0)), None);
}

#[test]
fn session_id_must_match_the_snapshot_kind() {
    let (a, _) = populated();
    assert_eq!(
        IdCompressor::deserialize(&a.serialize(true), Some(session(2))).unwrap_err(),
        Error::SessionIdConflict(session(2))
    );
    assert_eq!(
        IdCompressor::deserialize(&a.serialize(false), None).unwrap_err(),
        Error::MissingSessionId
    );
    assert_eq!(
        IdCompressor::deserialize(&a.serialize(false), Some(session(1))).unwrap_err(),
        Error::SessionIdConflict(session(1))
    );
}

#[test]
fn corrupt_snapshots_are_rejected() {
    let (a, _) = populated();
    let bytes = a.serialize(true).into_bytes();
    let decode = |bytes: Vec<u8>| {
        IdCompressor::deserialize(&SerializedIdCompressor::from_bytes(bytes), None).unwrap_err()
    };

    assert_eq!(
        decode(bytes[..bytes.len() - 1].to_vec()),
        Error::Snapshot(SnapshotError::UnexpectedEnd)
    );

    let mut trailing = bytes.clone();
    trailing.push(0);
    assert_eq!(
        decode(trailing),
        Error::Snapshot(SnapshotError::TrailingBytes(1))
    );

    let mut version = bytes.clone();
    version[3] = 9;
    assert_eq!(
        decode(version),
        Error::Snapshot(SnapshotError::UnsupportedVersion(9))
    );

    // First session uuid with a version 1 nibble.
    let mut not_v4 = bytes.clone();
    not_v4[9 + 6] = 0x18;
    assert!(matches!(
        decode(not_v4),
        Error::Snapshot(SnapshotError::InvalidSession(_))
    ));

    // First cluster's capacity reserving more final ids than exist.
    let mut capacity = bytes.clone();
    capacity[57..65].copy_from_slice(&u64::MAX.to_be_bytes());
    assert_eq!(
        decode(capacity),
        Error::Snapshot(SnapshotError::InvalidCluster(0))
    );

    assert_eq!(
        decode(Vec::new()),
        Error::Snapshot(SnapshotError::UnexpectedEnd)
    );
}

#[test]
fn local_state_is_validated() {
    let c = IdCompressor::new(session(0));
    let bytes = c.serialize(true).into_bytes();
    // version, flag, one session, no clusters, then local state.
    let local = 4 + 1 + 4 + 16 + 4;
    assert_eq!(bytes.len(), local + 4 + 8 + 8 + 8 + 4);

    let mut bad_index = bytes.clone();
    bad_index[local + 3] = 1;
    assert_eq!(
        IdCompressor::deserialize(&SerializedIdCompressor::from_bytes(bad_index), None)
            .unwrap_err(),
        Error::Snapshot(SnapshotError::InvalidSessionIndex(1))
    );

    // A gen count whose local id would not fit.
    let mut bad_gen_count = bytes.clone();
    bad_gen_count[local + 4..local + 12].copy_from_slice(&u64::MAX.to_be_bytes());
    assert_eq!(
        IdCompressor::deserialize(&SerializedIdCompressor::from_bytes(bad_gen_count), None)
            .unwrap_err(),
        Error::Snapshot(SnapshotError::InvalidLocalState)
    );

    // A next range base past every generated id.
    let mut bad_base = bytes;
    bad_base[local + 4 + 8 + 7] = 5;
    assert_eq!(
        IdCompressor::deserialize(&SerializedIdCompressor::from_bytes(bad_base), None)
            .unwrap_err(),
        Error::Snapshot(SnapshotError::InvalidLocalState)
    );
}

#[cfg(feature = "serde")]
#[test]
fn serializes_as_a_byte_array() {
    let c = IdCompressor::new(session(0));
    let snapshot = c.serialize(false);
    let json = serde_json::to_value(&snapshot).unwrap();
    assert!(json.is_array());
    let back: SerializedIdCompressor = serde_json::from_value(json).unwrap();
    assert_eq!(back, snapshot);
}
