use crate::error::{Result, StemError};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

/// Interleaved audio as it comes out of (and goes into) a file.
#[derive(Clone, Debug)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// A decoded, fixed-rate, planar multi-channel recording.
///
/// Every channel holds the same number of samples. The engine only ever
/// borrows a recording; the caller keeps ownership.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioRecording {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioRecording {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if channels.is_empty() {
            return Err(StemError::InvalidInput("recording has no channels".into()));
        }
        if sample_rate == 0 {
            return Err(StemError::InvalidInput("sample rate must be positive".into()));
        }
        let len = channels[0].len();
        if channels.iter().any(|c| c.len() != len) {
            return Err(StemError::InvalidInput(
                "all channels must have the same length".into(),
            ));
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    pub fn from_mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        Self::new(vec![samples], sample_rate)
    }

    pub fn from_interleaved(samples: &[f32], channels: u16, sample_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(StemError::InvalidInput("recording has no channels".into()));
        }
        Self::new(crate::core::dsp::deinterleave(samples, channels), sample_rate)
    }

    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }

    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }

    /// Absolute peak across all channels.
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .map(|c| crate::core::dsp::peak(c))
            .fold(0.0, f32::max)
    }

    /// Copy of the recording with every sample multiplied by `gain`.
    pub fn scaled(&self, gain: f32) -> Self {
        Self {
            channels: self
                .channels
                .iter()
                .map(|c| c.iter().map(|s| s * gain).collect())
                .collect(),
            sample_rate: self.sample_rate,
        }
    }
}

impl TryFrom<&AudioData> for AudioRecording {
    type Error = StemError;

    fn try_from(audio: &AudioData) -> Result<Self> {
        Self::from_interleaved(&audio.samples, audio.channels, audio.sample_rate)
    }
}

/// Output stem, in the fixed order shared by every backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemKind {
    Vocals,
    Drums,
    Bass,
    Other,
    Guitar,
    Piano,
    /// Everything but the isolated stem in two-stem mode.
    Accompaniment,
}

impl StemKind {
    /// Model stems by index: 0=vocals, 1=drums, 2=bass, 3=other, 4=guitar, 5=piano.
    pub const ALL: [StemKind; 6] = [
        StemKind::Vocals,
        StemKind::Drums,
        StemKind::Bass,
        StemKind::Other,
        StemKind::Guitar,
        StemKind::Piano,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StemKind::Vocals => "vocals",
            StemKind::Drums => "drums",
            StemKind::Bass => "bass",
            StemKind::Other => "other",
            StemKind::Guitar => "guitar",
            StemKind::Piano => "piano",
            StemKind::Accompaniment => "accompaniment",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Stem layout for a backend producing `count` stems (4 or 6).
    pub fn layout(count: usize) -> &'static [StemKind] {
        &Self::ALL[..count.min(Self::ALL.len())]
    }
}

impl fmt::Display for StemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StemKind {
    type Err = StemError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .chain([StemKind::Accompaniment])
            .find(|k| k.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| StemError::InvalidInput(format!("unknown stem `{s}`")))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparationOptions {
    pub model_name: String,
    /// Apply one global peak-normalisation gain before separating.
    pub normalize: bool,
    /// Hop length in samples at the recording's rate. `None` means ten
    /// seconds, shortened to the model's window when it has one.
    pub chunk_length: Option<usize>,
    /// Fraction of each hop shared with its neighbour, in `[0, 1)`.
    pub overlap: f32,
    pub manifest_url_override: Option<String>,
    /// Keep only this stem and fold the rest into
    /// [`StemKind::Accompaniment`].
    pub two_stems: Option<StemKind>,
}

impl Default for SeparationOptions {
    fn default() -> Self {
        Self {
            model_name: crate::model::registry::DEFAULT_MODEL.into(),
            normalize: false,
            chunk_length: None,
            overlap: 0.25,
            manifest_url_override: None,
            two_stems: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StemMetadata {
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub model_name: String,
    pub elapsed: Duration,
    pub hop_count: usize,
}

/// Named, finished stem buffers. Each buffer has the recording's length.
/// Model stems come in canonical order; two-stem output is the kept stem
/// then [`StemKind::Accompaniment`].
#[derive(Clone, Debug)]
pub struct SeparatedStems {
    stems: Vec<(StemKind, Vec<f32>)>,
    metadata: StemMetadata,
}

impl SeparatedStems {
    pub(crate) fn new(stems: Vec<(StemKind, Vec<f32>)>, metadata: StemMetadata) -> Self {
        Self { stems, metadata }
    }

    pub fn get(&self, kind: StemKind) -> Option<&[f32]> {
        self.stems
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, s)| s.as_slice())
    }

    pub fn vocals(&self) -> Option<&[f32]> {
        self.get(StemKind::Vocals)
    }

    pub fn drums(&self) -> Option<&[f32]> {
        self.get(StemKind::Drums)
    }

    pub fn bass(&self) -> Option<&[f32]> {
        self.get(StemKind::Bass)
    }

    pub fn other(&self) -> Option<&[f32]> {
        self.get(StemKind::Other)
    }

    pub fn guitar(&self) -> Option<&[f32]> {
        self.get(StemKind::Guitar)
    }

    pub fn piano(&self) -> Option<&[f32]> {
        self.get(StemKind::Piano)
    }

    pub fn accompaniment(&self) -> Option<&[f32]> {
        self.get(StemKind::Accompaniment)
    }

    /// Stems in output order.
    pub fn iter(&self) -> impl Iterator<Item = (StemKind, &[f32])> {
        self.stems.iter().map(|(k, s)| (*k, s.as_slice()))
    }

    pub fn kinds(&self) -> Vec<StemKind> {
        self.stems.iter().map(|(k, _)| *k).collect()
    }

    /// Number of stems.
    pub fn len(&self) -> usize {
        self.stems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }

    pub fn metadata(&self) -> &StemMetadata {
        &self.metadata
    }

    pub fn into_buffers(self) -> Vec<(StemKind, Vec<f32>)> {
        self.stems
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub file: String,
    pub url: String,
    pub sha256: String,
    #[serde(default)]
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub name: String,
    pub version: String,
    pub backend: String,
    pub sample_rate: u32,
    pub window: usize,
    pub hop: usize,
    pub stems: Vec<String>,
    #[serde(default)]
    pub input_layout: String,
    #[serde(default)]
    pub output_layout: String,
    #[serde(default)]
    pub artifacts: Vec<ModelArtifact>,
}

impl ModelManifest {
    pub fn resolve_primary_artifact(&self) -> std::result::Result<&ModelArtifact, String> {
        self.artifacts
            .first()
            .ok_or_else(|| format!("manifest `{}` lists no artifacts", self.name))
    }
}
