//! Hybrid Demucs on ONNX Runtime.
//!
//! The exported graph takes a fixed window of `DEMUCS_T` stereo samples
//! through two branches (waveform and complex-as-channels spectrogram) and
//! returns `[1, S, 2, T]` time-domain stems. Shorter hops are zero-padded.
//! The window and rate are advertised to the engine, which sizes and
//! resamples hops to fit them.

use crate::{
    core::dsp::stft_cac_stereo_centered,
    error::{Result, StemError},
    model::{
        model_manager::ModelHandle,
        stem_model::{ChunkInput, StemModel},
    },
    types::StemKind,
};

use anyhow::anyhow;
use ndarray::Array3;
use once_cell::sync::OnceCell;
use ort::{
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
    value::{Tensor, Value},
};
use std::{fmt::Display, sync::Mutex};
use tracing::info;

static ORT_INIT: OnceCell<()> = OnceCell::new();

pub const DEMUCS_T: usize = 343_980;
const DEMUCS_F: usize = 2048;
const DEMUCS_FRAMES: usize = 336;
const DEMUCS_NFFT: usize = 4096;
const DEMUCS_HOP: usize = 1024;

fn ort_err(e: impl Display) -> StemError {
    StemError::Anyhow(anyhow!("onnx runtime: {e}"))
}

pub struct OnnxModel {
    name: String,
    session: Mutex<Session>,
    /// `order[k]` is the model output index holding canonical stem `k`.
    order: Vec<usize>,
    window: usize,
    sample_rate: u32,
}

impl OnnxModel {
    pub fn load(h: &ModelHandle) -> Result<Self> {
        ORT_INIT.get_or_init(|| {
            let _ = ort::init().commit();
        });

        let session = SessionBuilder::new()
            .map_err(ort_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort_err)?
            .commit_from_file(&h.local_path)
            .map_err(ort_err)?;

        let order = canonical_order(&h.manifest.stems)?;
        let window = match h.manifest.window {
            0 => DEMUCS_T,
            w => w.min(DEMUCS_T),
        };
        if h.manifest.sample_rate == 0 {
            return Err(StemError::Manifest(format!(
                "manifest for `{}` has no sample rate",
                h.manifest.name
            )));
        }
        info!(
            model = %h.manifest.name,
            path = %h.local_path.display(),
            window,
            sample_rate = h.manifest.sample_rate,
            "onnx session ready"
        );

        Ok(Self {
            name: h.manifest.name.clone(),
            session: Mutex::new(session),
            order,
            window,
            sample_rate: h.manifest.sample_rate,
        })
    }

    fn run_window(&self, left: &[f32], right: &[f32]) -> Result<Array3<f32>> {
        let t = left.len();
        if t != DEMUCS_T || right.len() != t {
            return Err(anyhow!("Bad window length {} (expected {})", t, DEMUCS_T).into());
        }

        // Time branch [1,2,T], planar
        let mut planar = Vec::with_capacity(2 * t);
        planar.extend_from_slice(left);
        planar.extend_from_slice(right);
        let time_value: Value = Tensor::from_array((vec![1, 2, t], planar))
            .map_err(ort_err)?
            .into_dyn();

        // Spec branch [1,4,F,Frames] with center padding, Hann, 4096/1024
        let (spec_cac, f_bins, frames) =
            stft_cac_stereo_centered(left, right, DEMUCS_NFFT, DEMUCS_HOP);
        if f_bins != DEMUCS_F || frames != DEMUCS_FRAMES {
            return Err(anyhow!(
                "Spec dims mismatch: got F={},Frames={}, expected F={},Frames={}",
                f_bins,
                frames,
                DEMUCS_F,
                DEMUCS_FRAMES
            )
            .into());
        }
        let spec_value: Value = Tensor::from_array((vec![1, 4, f_bins, frames], spec_cac))
            .map_err(ort_err)?
            .into_dyn();

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("onnx session poisoned"))?;

        let in_time = session
            .inputs
            .iter()
            .find(|i| i.name == "input")
            .map(|i| i.name.clone())
            .ok_or_else(|| anyhow!("Model missing input 'input'"))?;

        let in_spec = session
            .inputs
            .iter()
            .find(|i| i.name == "x")
            .map(|i| i.name.clone())
            .ok_or_else(|| anyhow!("Model missing input 'x'"))?;

        let outputs = session
            .run(vec![(in_time, time_value), (in_spec, spec_value)])
            .map_err(ort_err)?;

        // Time-domain stems: "add_67", shape [1,S,2,T]
        let out_td = outputs
            .into_iter()
            .find_map(|(name, v)| if name == "add_67" { Some(v) } else { None })
            .ok_or_else(|| anyhow!("Model did not return 'add_67' output"))?;

        let (_shape, data) = out_td.try_extract_tensor::<f32>().map_err(ort_err)?;
        if data.len() % (2 * t) != 0 {
            return Err(anyhow!("Unexpected add_67 length {}", data.len()).into());
        }
        let stems = data.len() / (2 * t);
        Ok(Array3::from_shape_vec((stems, 2, t), data.to_vec()).map_err(|e| anyhow!(e))?)
    }
}

impl StemModel for OnnxModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_chunk_len(&self) -> Option<usize> {
        Some(self.window)
    }

    fn sample_rate(&self) -> Option<u32> {
        Some(self.sample_rate)
    }

    fn separate(&self, input: ChunkInput<'_>) -> Result<Vec<Vec<f32>>> {
        if input.len > self.window {
            return Err(StemError::InvalidInput(format!(
                "hop of {} samples exceeds the model window of {}",
                input.len, self.window
            )));
        }
        if input.sample_rate != self.sample_rate {
            return Err(StemError::InvalidInput(format!(
                "hop at {} Hz, model runs at {} Hz",
                input.sample_rate, self.sample_rate
            )));
        }
        if input.stem_count > self.order.len() {
            return Err(StemError::InvalidInput(format!(
                "model produces {} stems, {} requested",
                self.order.len(),
                input.stem_count
            )));
        }

        let (left, right) = stereo_window(input.channels, input.len, DEMUCS_T);
        let out = self.run_window(&left, &right)?;

        self.order[..input.stem_count]
            .iter()
            .map(|&src| -> Result<Vec<f32>> {
                if src >= out.shape()[0] {
                    return Err(anyhow!("model output is missing stem {src}").into());
                }
                Ok((0..input.len)
                    .map(|i| 0.5 * (out[(src, 0, i)] + out[(src, 1, i)]))
                    .collect())
            })
            .collect()
    }
}

/// Left/right buffers of `window` samples: mono is duplicated, channels
/// past the second are ignored, the tail is zero.
fn stereo_window(channels: &[Vec<f32>], len: usize, window: usize) -> (Vec<f32>, Vec<f32>) {
    let mut left = vec![0.0f32; window];
    let mut right = vec![0.0f32; window];
    let n = len.min(window);
    if let Some(l) = channels.first() {
        left[..n].copy_from_slice(&l[..n]);
    }
    match channels.get(1) {
        Some(r) => right[..n].copy_from_slice(&r[..n]),
        None => right[..n].copy_from_slice(&left[..n]),
    }
    (left, right)
}

/// Map the manifest's stem names onto the canonical stem order.
fn canonical_order(stems: &[String]) -> Result<Vec<usize>> {
    StemKind::layout(stems.len())
        .iter()
        .map(|kind| {
            stems
                .iter()
                .position(|s| s.eq_ignore_ascii_case(kind.name()))
                .ok_or_else(|| {
                    StemError::Manifest(format!("manifest has no `{}` stem", kind.name()))
                })
        })
        .collect()
}
