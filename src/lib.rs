//! # stem-separator-core
//!
//! Splits a mixed recording into instrument stems. Long recordings are
//! processed in overlapping hops on an isolated compute context; a hop that
//! fails, stalls or comes back silent is recomputed by a deterministic DSP
//! separator, so a call only fails on invalid input or cancellation.

pub mod core {
    pub mod audio;
    pub mod chunker;
    pub mod dispatch;
    pub mod dsp;
    #[cfg(feature = "onnx")]
    pub mod engine;
    pub mod fallback;
    pub mod protocol;
    pub mod splitter;
}

pub mod model {
    pub mod model_manager;
    pub mod registry;
    pub mod stem_model;
}

pub mod io {
    pub mod crypto;
    pub mod net;
    pub mod paths;
    pub mod progress;
}

pub mod config;
pub mod error;
mod types;

pub use crate::{
    config::EngineConfig,
    core::{
        audio::{read_audio, resample, write_audio},
        fallback::{FallbackSeparator, ShapingProfile},
        splitter::{split_file, SeparationEngine, SplitOptions, SplitResult},
    },
    error::{Result, StemError},
    io::progress::{ProgressPhase, SeparationProgress, SubscriptionId},
    model::{
        model_manager::{ensure_model, ManifestLoader, ModelHandle, ModelLoader},
        registry::{available_models, model_info, ModelInfo, Quality, Speed},
        stem_model::{ChunkInput, StemModel},
    },
    types::{
        AudioData, AudioRecording, ModelArtifact, ModelManifest, SeparatedStems,
        SeparationOptions, StemKind, StemMetadata,
    },
};
