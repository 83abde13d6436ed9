//! Model persistence
//!
//! Fitted detectors are stored as pretty-printed JSON wrapped in a
//! [`ModelMetadata`] envelope so a saved file records what it was trained
//! on and with which parameters.

mod model_store;

pub use model_store::{JsonModelStore, ModelMetadata, ModelSink, StoredModel, DEFAULT_MODEL_FILE};
