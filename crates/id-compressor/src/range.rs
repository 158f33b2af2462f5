use crate::SessionId;

/// A batch of ids generated by one session and not yet finalized.
///
/// Creation ranges are the unit a session hands to the transport, which
/// carries them through the sequencer to every compressor in the network
/// (the originator included). Ranges from one session must reach every
/// compressor in the order the session took them.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct IdCreationRange {
    /// The session that generated the ids.
    pub session_id: SessionId,
    /// The ids in the range, or `None` if the session had nothing pending.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub ids: Option<CreationRangeIds>,
}

/// The ids described by a non-empty [`IdCreationRange`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct CreationRangeIds {
    /// Gen count of the first id in the range.
    pub first_gen_count: u64,
    /// Number of ids in the range.
    pub count: u64,
    /// The originating session's requested cluster capacity at the time the
    /// range was taken. Every finalizer uses it, so all compressors allocate
    /// identical clusters.
    pub requested_cluster_size: u64,
    /// `(first gen count, count)` runs inside the range that the session
    /// handed out as local ids.
    pub local_id_ranges: Vec<(u64, u64)>,
}

impl IdCreationRange {
    /// Creates a range with no ids.
    #[must_use]
    pub const fn empty(session_id: SessionId) -> Self {
        Self {
            session_id,
            ids: None,
        }
    }

    /// Returns `true` if the range carries no ids.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.ids.is_none()
    }

    /// Returns the number of ids in the range.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.ids.as_ref().map_or(0, |ids| ids.count)
    }
}

impl CreationRangeIds {
    /// Gen count of the last id in the range, or `None` if the range is
    /// empty or its end does not fit in a `u64`.
    #[must_use]
    pub const fn last_gen_count(&self) -> Option<u64> {
        match self.count.checked_sub(1) {
            Some(extra) => self.first_gen_count.checked_add(extra),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(first_gen_count: u64, count: u64) -> CreationRangeIds {
        CreationRangeIds {
            first_gen_count,
            count,
            requested_cluster_size: 1,
            local_id_ranges: Vec::new(),
        }
    }

    #[test]
    fn last_gen_count_is_checked() {
        assert_eq!(ids(4, 3).last_gen_count(), Some(6));
        assert_eq!(ids(4, 0).last_gen_count(), None);
        assert_eq!(ids(2, u64::MAX).last_gen_count(), None);
        assert_eq!(ids(1, u64::MAX).last_gen_count(), Some(u64::MAX));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serializes_as_plain_json() {
        let session_id: SessionId = "88888888-8888-4888-b088-888888888888".parse().unwrap();
        let range = IdCreationRange {
            session_id,
            ids: Some(CreationRangeIds {
                first_gen_count: 1,
                count: 3,
                requested_cluster_size: 5,
                local_id_ranges: vec![(1, 3)],
            }),
        };
        let json = serde_json::to_value(&range).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "sessionId": "88888888-8888-4888-b088-888888888888",
                "ids": {
                    "firstGenCount": 1,
                    "count": 3,
                    "requestedClusterSize": 5,
                    "localIdRanges": [[1, 3]],
                }
            })
        );
        let back: IdCreationRange = serde_json::from_value(json).unwrap();
        assert_eq!(back, range);

        let empty = serde_json::to_value(IdCreationRange::empty(session_id)).unwrap();
        assert_eq!(
            empty,
            serde_json::json!({ "sessionId": "88888888-8888-4888-b088-888888888888" })
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn rejects_non_v4_session_ids() {
        let json = serde_json::json!({ "sessionId": "88888888-8888-1888-b088-888888888888" });
        assert!(serde_json::from_value::<IdCreationRange>(json).is_err());
    }
}
