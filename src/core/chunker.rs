//! Overlap-add hop processing.
//!
//! With chunk length `L` and overlap fraction `f`, hops start every
//! `L·(1-f)` samples. The hop at position `pos` covers
//! `[max(0, pos - overlap), min(total, pos + L))`; the part before `pos`
//! is linearly crossfaded with what the previous hop wrote, the rest
//! replaces it. Hops run strictly one after another, so accumulator writes
//! need no synchronisation and the result is independent of backend latency.

use crate::{
    core::{
        dispatch::{CancelWatch, DispatchChannel},
        dsp::peak,
        fallback::FallbackSeparator,
    },
    error::{Result, StemError},
    io::progress::{ProgressHub, ProgressPhase, SeparationProgress},
    types::AudioRecording,
};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

// The processing phase owns this slice of the progress bar.
pub const PROCESSING_START_PERCENT: f32 = 30.0;
pub const PROCESSING_END_PERCENT: f32 = 80.0;

/// Below this peak a hop's input counts as silence.
const AUDIBLE_INPUT_PEAK: f32 = 1e-4;
/// Below this peak a stem returned by the backend counts as silence.
const SILENT_STEM_PEAK: f32 = 1e-6;

/// One hop's region of the recording, copied out per channel.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub start: usize,
    pub len: usize,
    pub channels: Vec<Vec<f32>>,
}

impl Chunk {
    pub fn copy_from(recording: &AudioRecording, start: usize, end: usize) -> Self {
        Self {
            start,
            len: end - start,
            channels: recording
                .channels()
                .iter()
                .map(|c| c[start..end].to_vec())
                .collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Hop {
    pub index: usize,
    /// Nominal hop start; samples before it are the crossfade region.
    pub position: usize,
    pub start: usize,
    pub end: usize,
}

impl Hop {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    pub total: usize,
    pub chunk_length: usize,
    pub overlap_samples: usize,
    pub stride: usize,
}

impl ChunkPlan {
    pub fn new(total: usize, chunk_length: usize, overlap: f32) -> Result<Self> {
        if chunk_length == 0 {
            return Err(StemError::InvalidInput("chunk length must be positive".into()));
        }
        if !overlap.is_finite() || !(0.0..1.0).contains(&overlap) {
            return Err(StemError::InvalidInput(format!(
                "overlap must be in [0, 1), got {overlap}"
            )));
        }
        let overlap_samples = (chunk_length as f64 * overlap as f64).floor() as usize;
        let stride = chunk_length.saturating_sub(overlap_samples).max(1);
        Ok(Self {
            total,
            chunk_length,
            overlap_samples,
            stride,
        })
    }

    pub fn hop_count(&self) -> usize {
        self.total.div_ceil(self.stride)
    }

    /// Hops in processing order; positions strictly increase and the
    /// regions cover `[0, total)`.
    pub fn hops(&self) -> impl Iterator<Item = Hop> + '_ {
        (0..self.hop_count()).map(move |index| {
            let position = index * self.stride;
            Hop {
                index,
                position,
                start: position.saturating_sub(self.overlap_samples),
                end: (position + self.chunk_length).min(self.total),
            }
        })
    }
}

/// Per-stem output buffer, as long as the recording.
#[derive(Debug, Clone)]
pub struct StemAccumulator {
    samples: Vec<f32>,
}

impl StemAccumulator {
    pub fn new(len: usize) -> Self {
        Self {
            samples: vec![0.0; len],
        }
    }

    /// Write one hop's output. Samples before `hop.position` fade from the
    /// previous hop's output to this one; the rest is copied.
    pub fn write_hop(&mut self, hop: &Hop, overlap_samples: usize, data: &[f32]) {
        let fade_origin = hop.position as f64 - overlap_samples as f64;
        for (i, &value) in data.iter().take(hop.len()).enumerate() {
            let idx = hop.start + i;
            if idx < hop.position && overlap_samples > 0 {
                let frac = ((idx as f64 - fade_origin) / overlap_samples as f64) as f32;
                self.samples[idx] = self.samples[idx] * (1.0 - frac) + value * frac;
            } else {
                self.samples[idx] = value;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.samples
    }
}

/// Where hops are computed.
#[derive(Clone, Copy)]
pub enum HopRoute<'a> {
    Dispatch {
        channel: &'a DispatchChannel,
        model_name: &'a str,
    },
    /// No usable backend; `reason` is logged for every hop.
    FallbackOnly { reason: &'a str },
}

pub struct ChunkProcessor<'a> {
    recording: &'a AudioRecording,
    plan: ChunkPlan,
    stem_count: usize,
    fallback: FallbackSeparator,
    route: HopRoute<'a>,
    cancel: Option<CancelWatch<'a>>,
    progress: Option<&'a ProgressHub>,
}

impl<'a> ChunkProcessor<'a> {
    pub fn new(
        recording: &'a AudioRecording,
        plan: ChunkPlan,
        stem_count: usize,
        fallback: FallbackSeparator,
        route: HopRoute<'a>,
    ) -> Self {
        Self {
            recording,
            plan,
            stem_count,
            fallback,
            route,
            cancel: None,
            progress: None,
        }
    }

    /// Abort with [`StemError::Cancelled`] at the next hop boundary once `watch` trips.
    pub fn with_cancel_watch(mut self, watch: CancelWatch<'a>) -> Self {
        self.cancel = Some(watch);
        self
    }

    pub fn with_progress(mut self, hub: &'a ProgressHub) -> Self {
        self.progress = Some(hub);
        self
    }

    pub async fn run(self) -> Result<Vec<StemAccumulator>> {
        let mut accumulators: Vec<StemAccumulator> = (0..self.stem_count)
            .map(|_| StemAccumulator::new(self.recording.len()))
            .collect();
        let hop_count = self.plan.hop_count();
        let started = Instant::now();

        for hop in self.plan.hops() {
            self.check_cancelled()?;

            let chunk = Chunk::copy_from(self.recording, hop.start, hop.end);
            let stems = self.process_hop(&hop, &chunk).await?;

            // A cancel that landed while this hop was computing still counts.
            self.check_cancelled()?;

            for (acc, stem) in accumulators.iter_mut().zip(&stems) {
                acc.write_hop(&hop, self.plan.overlap_samples, stem);
            }
            self.report(&hop, hop_count, started);
        }

        Ok(accumulators)
    }

    async fn process_hop(&self, hop: &Hop, chunk: &Chunk) -> Result<Vec<Vec<f32>>> {
        let reason = match self.route {
            HopRoute::FallbackOnly { reason } => reason.to_string(),
            HopRoute::Dispatch {
                channel,
                model_name,
            } => {
                let outcome = channel
                    .submit(
                        chunk,
                        self.stem_count,
                        self.recording.sample_rate(),
                        model_name,
                    )
                    .await
                    .and_then(|stems| check_audible(hop, chunk, stems));
                match outcome {
                    Ok(stems) => {
                        debug!(hop = hop.index, "hop separated by backend");
                        return Ok(stems);
                    }
                    Err(e) if e.is_cancellation() => return Err(e),
                    Err(e) => e.to_string(),
                }
            }
        };

        warn!(
            hop = hop.index,
            start = hop.start,
            len = hop.len(),
            fallback_reason = %reason,
            "hop degraded to fallback separator"
        );
        let lead_in_start = hop.start.saturating_sub(self.fallback.lead_in_len());
        let lead_in = Chunk::copy_from(self.recording, lead_in_start, hop.start);
        Ok(self
            .fallback
            .separate_continuing(&lead_in.channels, &chunk.channels, self.stem_count))
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(watch) => watch.check(),
            None => Ok(()),
        }
    }

    fn report(&self, hop: &Hop, hop_count: usize, started: Instant) {
        let Some(hub) = self.progress else {
            return;
        };
        let done = hop.index + 1;
        let span = PROCESSING_END_PERCENT - PROCESSING_START_PERCENT;
        let percent = PROCESSING_START_PERCENT + span * done as f32 / hop_count.max(1) as f32;

        let per_hop = started.elapsed().as_secs_f64() / done as f64;
        let eta = Duration::from_secs_f64(per_hop * (hop_count - done) as f64);

        hub.emit(
            &SeparationProgress::new(
                ProgressPhase::Processing,
                percent,
                format!("Separated chunk {done}/{hop_count}"),
            )
            .with_eta(eta),
        );
    }
}

/// Audible input must not come back as all-silent stems.
fn check_audible(hop: &Hop, chunk: &Chunk, stems: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
    let input_audible = chunk.channels.iter().any(|c| peak(c) > AUDIBLE_INPUT_PEAK);
    if input_audible && stems.iter().all(|s| peak(s) < SILENT_STEM_PEAK) {
        return Err(StemError::SilentOutput { hop: hop.index });
    }
    Ok(stems)
}
