pub mod diff;
pub mod error;
pub mod field_mask;
pub mod field_value;
pub mod hlc;
pub mod ids;
pub mod overlap;
pub mod permissions;
pub mod record;

pub use diff::{FieldDiff, compute_diff};
pub use error::CoreError;
pub use field_mask::FieldMask;
pub use field_value::FieldValue;
pub use hlc::{Hlc, HlcClock};
pub use ids::*;
pub use overlap::is_overlap;
pub use record::*;
