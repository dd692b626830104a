//! Deterministic, model-free stem separation.
//!
//! Used whenever the compute backend is missing, fails, times out or
//! returns silence for a hop. The split is a cascade of one-pole filters
//! plus a transient detector; quality is secondary to never returning an
//! empty or broken stem.

use crate::core::dsp::{mix_to_mono, OnePole};
use serde::{Deserialize, Serialize};

// Band edges for the three-way split.
pub const BASS_CUTOFF_HZ: f32 = 250.0;
pub const VOCAL_CUTOFF_HZ: f32 = 4_000.0;
pub const AIR_CUTOFF_HZ: f32 = 10_000.0;

// Transient detector: per-sample envelope release and |Δx| → [0, 1] gain.
pub const TRANSIENT_RELEASE: f32 = 0.9;
pub const TRANSIENT_SENSITIVITY: f32 = 20.0;

/// Share of the high band given to drums when no transient is present.
pub const DRUM_HIGH_WEIGHT: f32 = 0.6;
/// Share of the air band added to drums between transients.
pub const AIR_DRUM_WEIGHT: f32 = 0.5;

// Crosstalk cancellation. These were tuned by ear and have no derivation;
// treat them as knobs, not invariants.
/// Fraction of the drum estimate removed from the vocal band.
pub const VOCAL_DRUM_BLEED: f32 = 0.1;
pub const GUITAR_CUTOFF_HZ: f32 = 1_500.0;
/// Fraction of the low-passed vocal residue moved into guitar.
pub const GUITAR_SHARE: f32 = 0.5;
pub const PIANO_CUTOFF_HZ: f32 = 2_000.0;
/// Fraction of the low-passed "other" residue moved into piano.
pub const PIANO_SHARE: f32 = 0.5;

/// Audio run through the filters before a hop so it starts from settled
/// state. Covers the slowest filter (250 Hz) many times over.
pub const LEAD_IN_SECONDS: f32 = 0.02;

// Cosmetic shaping.
pub const SMOOTHING_CUTOFF_HZ: f32 = 12_000.0;
pub const TRANSIENT_EMPHASIS: f32 = 0.25;

/// Cosmetic post-pass matched to the backend family a model belongs to.
/// Runs after the core split and never alters it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapingProfile {
    #[default]
    None,
    /// Hybrid transformer models: soften the tonal stems.
    Smooth,
    /// MDX models: sharpen drum attacks.
    TransientEmphasis,
}

type ShapingFn = fn(&mut [Vec<f32>], u32);

const SHAPING_TABLE: [(ShapingProfile, ShapingFn); 3] = [
    (ShapingProfile::None, shape_none),
    (ShapingProfile::Smooth, shape_smooth),
    (ShapingProfile::TransientEmphasis, shape_transient_emphasis),
];

impl ShapingProfile {
    pub const ALL: [ShapingProfile; 3] = [
        ShapingProfile::None,
        ShapingProfile::Smooth,
        ShapingProfile::TransientEmphasis,
    ];

    fn strategy(self) -> ShapingFn {
        SHAPING_TABLE[self as usize].1
    }

    /// Apply this profile to stems laid out in canonical order.
    pub fn apply(self, stems: &mut [Vec<f32>], sample_rate: u32) {
        (self.strategy())(stems, sample_rate)
    }
}

fn shape_none(_stems: &mut [Vec<f32>], _sample_rate: u32) {}

fn shape_smooth(stems: &mut [Vec<f32>], sample_rate: u32) {
    // vocals, other, guitar, piano
    for idx in [0usize, 3, 4, 5] {
        if let Some(stem) = stems.get_mut(idx) {
            let mut lp = OnePole::new(SMOOTHING_CUTOFF_HZ, sample_rate);
            for s in stem.iter_mut() {
                *s = lp.process(*s);
            }
        }
    }
}

fn shape_transient_emphasis(stems: &mut [Vec<f32>], _sample_rate: u32) {
    if let Some(drums) = stems.get_mut(1) {
        let mut prev = 0.0f32;
        for s in drums.iter_mut() {
            let x = *s;
            *s = x + TRANSIENT_EMPHASIS * (x - prev);
            prev = x;
        }
    }
}

/// Heuristic separator for one hop (or a whole recording).
#[derive(Clone, Copy, Debug)]
pub struct FallbackSeparator {
    sample_rate: u32,
    profile: ShapingProfile,
}

impl FallbackSeparator {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            profile: ShapingProfile::None,
        }
    }

    pub fn with_profile(mut self, profile: ShapingProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Samples of preceding audio [`separate_continuing`](Self::separate_continuing) wants.
    pub fn lead_in_len(&self) -> usize {
        (LEAD_IN_SECONDS * self.sample_rate as f32).round() as usize
    }

    /// Split multi-channel samples into `stem_count` mono stems
    /// (at most six), each as long as the input.
    pub fn separate(&self, channels: &[Vec<f32>], stem_count: usize) -> Vec<Vec<f32>> {
        let mono = mix_to_mono(channels);
        let mut stems = split_bands(&mono, self.sample_rate, stem_count > 4);
        stems.truncate(stem_count);

        self.profile.apply(&mut stems, self.sample_rate);

        for stem in stems.iter_mut() {
            for s in stem.iter_mut() {
                *s = s.clamp(-1.0, 1.0);
            }
        }
        stems
    }

    /// Like [`separate`](Self::separate), but the filters first run over
    /// `lead_in`, the audio right before `channels`. Only the samples of
    /// `channels` are returned, so consecutive hops join without a step.
    pub fn separate_continuing(
        &self,
        lead_in: &[Vec<f32>],
        channels: &[Vec<f32>],
        stem_count: usize,
    ) -> Vec<Vec<f32>> {
        let skip = lead_in.first().map_or(0, Vec::len);
        if skip == 0 {
            return self.separate(channels, stem_count);
        }
        let joined: Vec<Vec<f32>> = lead_in
            .iter()
            .zip(channels)
            .map(|(head, body)| [head.as_slice(), body.as_slice()].concat())
            .collect();
        let mut stems = self.separate(&joined, stem_count);
        for stem in stems.iter_mut() {
            stem.drain(..skip);
        }
        stems
    }
}

/// Core split. Returns `[vocals, drums, bass, other]`, plus
/// `[guitar, piano]` when `six_stems` is set. Stems sum to `mono`.
fn split_bands(mono: &[f32], sample_rate: u32, six_stems: bool) -> Vec<Vec<f32>> {
    let n = mono.len();
    let mut vocals = vec![0.0f32; n];
    let mut drums = vec![0.0f32; n];
    let mut bass = vec![0.0f32; n];
    let mut other = vec![0.0f32; n];

    let mut low_lp = OnePole::new(BASS_CUTOFF_HZ, sample_rate);
    let mut vocal_lp = OnePole::new(VOCAL_CUTOFF_HZ, sample_rate);
    let mut air_lp = OnePole::new(AIR_CUTOFF_HZ, sample_rate);

    let mut prev = 0.0f32;
    let mut envelope = 0.0f32;

    for (i, &x) in mono.iter().enumerate() {
        let low_state = low_lp.process(x);
        let vocal_state = vocal_lp.process(x);
        let air_state = air_lp.process(x);

        let low = low_state;
        let mid = vocal_state - low_state;
        let high = x - vocal_state;
        let air = x - air_state;

        envelope = (x - prev).abs().max(envelope * TRANSIENT_RELEASE);
        prev = x;
        let transient = (envelope * TRANSIENT_SENSITIVITY).min(1.0);

        let drum_gain = DRUM_HIGH_WEIGHT + (1.0 - DRUM_HIGH_WEIGHT) * transient;
        let d = high * drum_gain + air * AIR_DRUM_WEIGHT * (1.0 - transient);
        let v = mid - VOCAL_DRUM_BLEED * d;

        bass[i] = low;
        drums[i] = d;
        vocals[i] = v;
        other[i] = x - low - d - v;
    }

    if !six_stems {
        return vec![vocals, drums, bass, other];
    }

    let mut guitar = vec![0.0f32; n];
    let mut piano = vec![0.0f32; n];
    let mut guitar_lp = OnePole::new(GUITAR_CUTOFF_HZ, sample_rate);
    let mut piano_lp = OnePole::new(PIANO_CUTOFF_HZ, sample_rate);

    for i in 0..n {
        let g = guitar_lp.process(vocals[i]) * GUITAR_SHARE;
        vocals[i] -= g;
        guitar[i] = g;

        let p = piano_lp.process(other[i]) * PIANO_SHARE;
        other[i] -= p;
        piano[i] = p;
    }

    vec![vocals, drums, bass, other, guitar, piano]
}
