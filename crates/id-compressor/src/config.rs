use crate::{Error, Result};

/// Cluster capacity requested by a fresh compressor.
pub const DEFAULT_CLUSTER_CAPACITY: u64 = 512;

/// Largest cluster capacity a session may request.
pub const MAX_CLUSTER_CAPACITY: u64 = 1 << 20;

/// Tunables for an [`IdCompressor`].
///
/// [`IdCompressor`]: crate::IdCompressor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct CompressorConfig {
    /// Number of final ids reserved whenever a new cluster is allocated for
    /// the local session. Larger clusters mean fewer clusters (and a smaller
    /// snapshot) when a session generates many ids, at the cost of reserving
    /// final ids that may never be used.
    pub cluster_capacity: u64,
}

impl CompressorConfig {
    /// Creates a config with the given cluster capacity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidClusterCapacity`] if the capacity is zero or
    /// larger than [`MAX_CLUSTER_CAPACITY`].
    pub fn with_cluster_capacity(cluster_capacity: u64) -> Result<Self> {
        let config = Self { cluster_capacity };
        config.validate()?;
        Ok(config)
    }

    /// Checks that every field is within its supported range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidClusterCapacity`] if the capacity is zero or
    /// larger than [`MAX_CLUSTER_CAPACITY`].
    pub fn validate(&self) -> Result<()> {
        validate_cluster_capacity(self.cluster_capacity)
    }
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            cluster_capacity: DEFAULT_CLUSTER_CAPACITY,
        }
    }
}

pub(crate) fn validate_cluster_capacity(capacity: u64) -> Result<()> {
    if capacity == 0 || capacity > MAX_CLUSTER_CAPACITY {
        return Err(Error::InvalidClusterCapacity {
            capacity,
            max: MAX_CLUSTER_CAPACITY,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(CompressorConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_out_of_range_capacities() {
        assert!(CompressorConfig::with_cluster_capacity(0).is_err());
        assert!(CompressorConfig::with_cluster_capacity(MAX_CLUSTER_CAPACITY + 1).is_err());
        assert_eq!(
            CompressorConfig::with_cluster_capacity(MAX_CLUSTER_CAPACITY)
                .map(|c| c.cluster_capacity),
            Ok(MAX_CLUSTER_CAPACITY)
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: CompressorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CompressorConfig::default());
        let config: CompressorConfig =
            serde_json::from_str(r#"{"clusterCapacity": 8}"#).unwrap();
        assert_eq!(config.cluster_capacity, 8);
    }
}
