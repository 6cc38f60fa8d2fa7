//! Inference engine implementations for LocalCoder.
//!
//! All engines implement the `localcoder_core::InferenceEngine` trait.
//! The factory selects the correct engine based on configuration.

pub mod factory;
pub mod llama_server;
#[cfg(feature = "local")]
pub mod local;
pub mod presets;

pub use factory::build_from_config;
pub use llama_server::LlamaServerEngine;
#[cfg(feature = "local")]
pub use local::LocalEngine;
pub use presets::{ModelPreset, PRESETS, resolve_preset};
