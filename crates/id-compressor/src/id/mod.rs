mod compressed;
pub mod stable;

pub use compressed::*;
pub use stable::{SessionId, StableId};
