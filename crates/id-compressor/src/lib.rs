//! Distributed id compression.
//!
//! Every collaborating session mints ids locally (negative *local ids*) at
//! zero coordination cost. Batches of those ids travel through an external
//! sequencer as [`IdCreationRange`]s; once ordered, every replica finalizes
//! them into the same small, non-negative *final ids* drawn from per-session
//! clusters. Any id can also be expanded to a globally unique [`StableId`]
//! (a UUID derived from the owning session's id) and back.
//!
//! ```
//! use id_compressor::{IdCompressor, SessionId};
//!
//! let mut compressor = IdCompressor::new(SessionId::random());
//! let id = compressor.generate_compressed_id();
//! assert!(id.is_local());
//!
//! let range = compressor.take_next_creation_range();
//! compressor.finalize_creation_range(&range)?;
//!
//! let op_id = compressor.normalize_to_op_space(id)?;
//! assert!(op_id.is_final());
//! assert_eq!(
//!     compressor.normalize_to_session_space(op_id, compressor.local_session_id())?,
//!     id
//! );
//! # Ok::<(), id_compressor::Error>(())
//! ```
//!
//! ## Features
//!
//! - `serde`: `Serialize`/`Deserialize` for ids, creation ranges, configs
//!   and snapshots.
//! - `tracing`: spans on public operations and events on cluster allocation.

mod cluster;
mod compressor;
mod config;
mod error;
mod id;
mod normalizer;
mod range;
mod snapshot;

pub use crate::cluster::*;
pub use crate::compressor::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::id::*;
pub use crate::normalizer::*;
pub use crate::range::*;
pub use crate::snapshot::*;
