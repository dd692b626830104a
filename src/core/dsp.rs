use num_complex::Complex32;
use once_cell::sync::Lazy;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use std::{f32::consts::PI, sync::Arc};

struct FftCache {
    fft_forward: Arc<dyn Fft<f32>>,
    hann_window: Vec<f32>,
}

impl FftCache {
    fn plan(n_fft: usize) -> Self {
        let mut planner = FftPlanner::new();
        FftCache {
            fft_forward: planner.plan_fft_forward(n_fft),
            hann_window: compute_hann(n_fft),
        }
    }
}

// Demucs' size is planned once; anything else is planned per call.
static FFT_CACHE_4096: Lazy<FftCache> = Lazy::new(|| FftCache::plan(4096));

fn with_fft_cache<R>(n_fft: usize, f: impl FnOnce(&FftCache) -> R) -> R {
    if n_fft == 4096 {
        f(&FFT_CACHE_4096)
    } else {
        f(&FftCache::plan(n_fft))
    }
}

fn compute_hann(n_fft: usize) -> Vec<f32> {
    if n_fft <= 1 {
        return vec![1.0];
    }
    let denom = (n_fft - 1) as f32;
    (0..n_fft)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * (i as f32) / denom).cos())
        .collect()
}

/// Split interleaved samples into one buffer per channel.
/// A trailing partial frame is dropped.
pub fn deinterleave(interleaved: &[f32], channels: u16) -> Vec<Vec<f32>> {
    let ch = channels.max(1) as usize;
    let frames = interleaved.len() / ch;
    let mut out = vec![Vec::with_capacity(frames); ch];
    for frame in interleaved.chunks_exact(ch) {
        for (c, &s) in frame.iter().enumerate() {
            out[c].push(s);
        }
    }
    out
}

/// Average all channels into one buffer.
pub fn mix_to_mono(channels: &[Vec<f32>]) -> Vec<f32> {
    match channels {
        [] => Vec::new(),
        [only] => only.clone(),
        _ => {
            let len = channels.iter().map(Vec::len).min().unwrap_or(0);
            let scale = 1.0 / channels.len() as f32;
            (0..len)
                .map(|i| channels.iter().map(|c| c[i]).sum::<f32>() * scale)
                .collect()
        }
    }
}

pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
}

pub fn energy(samples: &[f32]) -> f64 {
    samples.iter().map(|&s| (s as f64) * (s as f64)).sum()
}

/// Smoothing coefficient of a one-pole low-pass: `1 - exp(-2π·fc/fs)`.
pub fn one_pole_alpha(cutoff_hz: f32, sample_rate: u32) -> f32 {
    1.0 - (-2.0 * PI * cutoff_hz / sample_rate.max(1) as f32).exp()
}

/// One-pole low-pass state, `y[i] = y[i-1] + α·(x[i] - y[i-1])`.
#[derive(Clone, Copy, Debug)]
pub struct OnePole {
    alpha: f32,
    state: f32,
}

impl OnePole {
    pub fn new(cutoff_hz: f32, sample_rate: u32) -> Self {
        Self {
            alpha: one_pole_alpha(cutoff_hz, sample_rate),
            state: 0.0,
        }
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        self.state += self.alpha * (x - self.state);
        self.state
    }
}

/// Compute complex-as-channels spectrogram for stereo with center padding.
/// Returns (buffer, F=2048, Frames=336) for T=343_980, n_fft=4096, hop=1024.
/// Layout is [1, 4, F, Frames] flattened => channels order: L.re, L.im, R.re, R.im.
pub fn stft_cac_stereo_centered(
    left: &[f32],
    right: &[f32],
    n_fft: usize,
    hop: usize,
) -> (Vec<f32>, usize, usize) {
    assert_eq!(left.len(), right.len());

    let t = left.len();
    let pad = n_fft / 2;

    let padded_len = pad + t + pad;
    let mut l_sig = vec![0.0f32; padded_len];
    let mut r_sig = vec![0.0f32; padded_len];

    l_sig[pad..pad + t].copy_from_slice(left);
    r_sig[pad..pad + t].copy_from_slice(right);

    let frames = 1 + (t / hop);
    let f_bins = n_fft / 2;

    let mut out = vec![0.0f32; 4 * f_bins * frames];

    with_fft_cache(n_fft, |cache| {
        let fft = &cache.fft_forward;
        let window = &cache.hann_window;

        let mut buf_l = vec![Complex32::zero(); n_fft];
        let mut buf_r = vec![Complex32::zero(); n_fft];

        for fr in 0..frames {
            let start = fr * hop;
            let li = &l_sig[start..start + n_fft];
            let ri = &r_sig[start..start + n_fft];

            for i in 0..n_fft {
                let w = window[i];
                buf_l[i] = Complex32::new(li[i] * w, 0.0);
                buf_r[i] = Complex32::new(ri[i] * w, 0.0);
            }

            fft.process(&mut buf_l);
            fft.process(&mut buf_r);

            for fi in 0..f_bins {
                let base_fr = fi * frames + fr;
                out[base_fr] = buf_l[fi].re;
                out[f_bins * frames + base_fr] = buf_l[fi].im;
                out[2 * f_bins * frames + base_fr] = buf_r[fi].re;
                out[3 * f_bins * frames + base_fr] = buf_r[fi].im;
            }
        }
    });

    (out, f_bins, frames)
}
