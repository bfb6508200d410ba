pub mod association;
pub mod entity;
pub mod error;
pub mod tsid;

pub use association::AssignmentDiff;
pub use entity::{eq_ignore_case, normalize_key, Entity, EntityMeta};
pub use error::{AccessError, ErrorKind, Result};
pub use tsid::TsidGenerator;
