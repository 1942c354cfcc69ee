//! Conflict detection between local project sources and retrieved org state.

pub mod correlator;
pub mod detector;
pub mod view;

pub use correlator::{correlate_results, CorrelatedComponent};
pub use detector::TimestampConflictDetector;
pub use view::{ConflictTree, DisplayRow};
