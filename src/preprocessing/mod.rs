//! Data preprocessing module
//!
//! Turns a loaded [`RecordTable`](crate::table::RecordTable) into the finite
//! numeric [`FeatureMatrix`] the detector is fitted on.

pub mod feature_selection;

pub use feature_selection::{FeatureMatrix, FeatureSelector};
