#![allow(dead_code)]

use std::{
    f32::consts::PI,
    fmt,
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use stem_separator_core::{
    core::dsp::mix_to_mono, AudioRecording, ChunkInput, ModelInfo, ModelLoader, Result,
    StemError, StemModel,
};
use tracing::{
    field::{Field, Visit},
    Event, Subscriber,
};
use tracing_subscriber::layer::{Context, Layer};

pub const SR: u32 = 44_100;

pub fn sine(freq: f32, amp: f32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| amp * (2.0 * PI * freq * i as f32 / SR as f32).sin())
        .collect()
}

pub fn stereo_sine(freq: f32, amp: f32, len: usize) -> AudioRecording {
    let ch = sine(freq, amp, len);
    AudioRecording::new(vec![ch.clone(), ch], SR).unwrap()
}

/// Vocals carry the mono mix, every other stem is zero.
pub struct Passthrough;

impl StemModel for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn separate(&self, input: ChunkInput<'_>) -> Result<Vec<Vec<f32>>> {
        let mut stems = vec![vec![0.0; input.len]; input.stem_count];
        stems[0] = mix_to_mono(input.channels);
        Ok(stems)
    }
}

/// Every stem is the constant `n`, where `n` counts calls from 1.
#[derive(Default)]
pub struct Counting {
    pub calls: AtomicUsize,
}

impl StemModel for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    fn separate(&self, input: ChunkInput<'_>) -> Result<Vec<Vec<f32>>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(vec![vec![n as f32; input.len]; input.stem_count])
    }
}

/// Passthrough, but the listed calls (0-based) sleep for `delay` first.
pub struct Stalling {
    pub calls: AtomicUsize,
    pub stall_on: Vec<usize>,
    pub delay: Duration,
}

impl Stalling {
    pub fn new(stall_on: Vec<usize>, delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            stall_on,
            delay,
        }
    }
}

impl StemModel for Stalling {
    fn name(&self) -> &str {
        "stalling"
    }

    fn separate(&self, input: ChunkInput<'_>) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stall_on.contains(&call) {
            thread::sleep(self.delay);
        }
        Passthrough.separate(input)
    }
}

pub enum Broken {
    Fails,
    Panics,
    Silent,
    WrongLength,
    WrongCount,
    NotFinite,
}

impl StemModel for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn separate(&self, input: ChunkInput<'_>) -> Result<Vec<Vec<f32>>> {
        match self {
            Broken::Fails => Err(StemError::ModelUnavailable("backend exploded".into())),
            Broken::Panics => panic!("backend panicked"),
            Broken::Silent => Ok(vec![vec![0.0; input.len]; input.stem_count]),
            Broken::WrongLength => Ok(vec![vec![0.1; input.len / 2]; input.stem_count]),
            Broken::WrongCount => Ok(vec![vec![0.1; input.len]; input.stem_count - 1]),
            Broken::NotFinite => Ok(vec![vec![f32::NAN; input.len]; input.stem_count]),
        }
    }
}

/// Hands out a fixed model, or fails when there is none.
pub struct FixedLoader {
    pub model: Option<Arc<dyn StemModel>>,
    pub loads: AtomicUsize,
}

impl FixedLoader {
    pub fn serving(model: Arc<dyn StemModel>) -> Arc<Self> {
        Arc::new(Self {
            model: Some(model),
            loads: AtomicUsize::new(0),
        })
    }

    pub fn offline() -> Arc<Self> {
        Arc::new(Self {
            model: None,
            loads: AtomicUsize::new(0),
        })
    }
}

impl ModelLoader for FixedLoader {
    fn load(
        &self,
        _info: &ModelInfo,
        _manifest_url_override: Option<&str>,
        _on_download: &dyn Fn(u64, u64),
    ) -> Result<Arc<dyn StemModel>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.model
            .clone()
            .ok_or_else(|| StemError::ModelUnavailable("offline".into()))
    }
}

/// Counts log events that carry a `fallback_reason` field.
#[derive(Clone, Default)]
pub struct FallbackCounter(pub Arc<AtomicUsize>);

impl FallbackCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

struct HasFallbackReason(bool);

impl Visit for HasFallbackReason {
    fn record_debug(&mut self, field: &Field, _value: &dyn fmt::Debug) {
        if field.name() == "fallback_reason" {
            self.0 = true;
        }
    }
}

impl<S: Subscriber> Layer<S> for FallbackCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = HasFallbackReason(false);
        event.record(&mut visitor);
        if visitor.0 {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Passthrough that declares a window and optionally a rate, and records
/// the longest hop and the rate it was handed.
pub struct Windowed {
    pub window: usize,
    pub rate: Option<u32>,
    pub longest: AtomicUsize,
    pub seen_rate: AtomicU32,
}

impl Windowed {
    pub fn new(window: usize, rate: Option<u32>) -> Self {
        Self {
            window,
            rate,
            longest: AtomicUsize::new(0),
            seen_rate: AtomicU32::new(0),
        }
    }
}

impl StemModel for Windowed {
    fn name(&self) -> &str {
        "windowed"
    }

    fn max_chunk_len(&self) -> Option<usize> {
        Some(self.window)
    }

    fn sample_rate(&self) -> Option<u32> {
        self.rate
    }

    fn separate(&self, input: ChunkInput<'_>) -> Result<Vec<Vec<f32>>> {
        self.longest.fetch_max(input.len, Ordering::SeqCst);
        self.seen_rate.store(input.sample_rate, Ordering::SeqCst);
        Passthrough.separate(input)
    }
}
