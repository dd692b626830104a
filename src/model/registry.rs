use crate::{
    core::fallback::ShapingProfile,
    error::{Result, StemError},
    types::StemKind,
};
use serde::Serialize;

pub const DEFAULT_MODEL: &str = "htdemucs";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Good,
    High,
    Best,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speed {
    Fast,
    Medium,
    Slow,
}

/// Catalog entry. Pure data.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ModelInfo {
    pub name: &'static str,
    pub display_name: &'static str,
    pub stems: &'static [StemKind],
    pub quality: Quality,
    pub speed: Speed,
    /// Manifest location relative to the configured model base URL.
    pub manifest: &'static str,
    /// Cosmetic pass the fallback applies when standing in for this model.
    pub shaping: ShapingProfile,
}

impl ModelInfo {
    pub fn stem_count(&self) -> usize {
        self.stems.len()
    }

    /// Manifest URL under `base_url`.
    pub fn manifest_url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.manifest)
    }
}

const FOUR_STEMS: &[StemKind] = &[
    StemKind::Vocals,
    StemKind::Drums,
    StemKind::Bass,
    StemKind::Other,
];

const SIX_STEMS: &[StemKind] = &StemKind::ALL;

static MODELS: [ModelInfo; 4] = [
    ModelInfo {
        name: "htdemucs",
        display_name: "HT Demucs",
        stems: FOUR_STEMS,
        quality: Quality::High,
        speed: Speed::Medium,
        manifest: "htdemucs/manifest.json",
        shaping: ShapingProfile::Smooth,
    },
    ModelInfo {
        name: "htdemucs_6s",
        display_name: "HT Demucs 6-Stem",
        stems: SIX_STEMS,
        quality: Quality::High,
        speed: Speed::Slow,
        manifest: "htdemucs_6s/manifest.json",
        shaping: ShapingProfile::Smooth,
    },
    ModelInfo {
        name: "mdx_extra",
        display_name: "MDX Extra",
        stems: FOUR_STEMS,
        quality: Quality::Best,
        speed: Speed::Slow,
        manifest: "mdx_extra/manifest.json",
        shaping: ShapingProfile::TransientEmphasis,
    },
    ModelInfo {
        name: "mdx_extra_q",
        display_name: "MDX Extra (Quantized)",
        stems: FOUR_STEMS,
        quality: Quality::Good,
        speed: Speed::Fast,
        manifest: "mdx_extra_q/manifest.json",
        shaping: ShapingProfile::TransientEmphasis,
    },
];

pub fn available_models() -> &'static [ModelInfo] {
    &MODELS
}

/// Look up a model; an empty name means the default model.
pub fn model_info(name: &str) -> Option<&'static ModelInfo> {
    let target = if name.is_empty() { DEFAULT_MODEL } else { name };
    MODELS.iter().find(|m| m.name == target)
}

pub fn resolve_manifest_url(model_name: &str, base_url: &str) -> Result<String> {
    model_info(model_name)
        .map(|m| m.manifest_url(base_url))
        .ok_or_else(|| StemError::Registry(format!("Model `{model_name}` not found in registry")))
}
