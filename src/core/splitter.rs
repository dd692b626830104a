use crate::{
    config::EngineConfig,
    core::{
        audio::{read_audio, resample, write_audio},
        chunker::{ChunkPlan, ChunkProcessor, HopRoute, StemAccumulator, PROCESSING_START_PERCENT},
        dispatch::DispatchChannel,
        dsp::mix_to_mono,
        fallback::FallbackSeparator,
    },
    error::{Result, StemError},
    io::progress::{ProgressHub, ProgressPhase, SeparationProgress, SubscriptionId},
    model::{
        model_manager::{ManifestLoader, ModelLoader},
        registry::{self, ModelInfo},
        stem_model::StemModel,
    },
    types::{AudioData, AudioRecording, SeparatedStems, SeparationOptions, StemKind, StemMetadata},
};

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use tracing::{debug, info, warn};

/// Chunk length used when the options leave it unset.
pub const DEFAULT_CHUNK_SECONDS: usize = 10;

/// Public entry point: owns the dispatch channel, the loaded models and the
/// progress observers. Calls share nothing else, so one engine can serve
/// several calls and is reusable right after a failure or cancellation.
pub struct SeparationEngine {
    config: EngineConfig,
    loader: Arc<dyn ModelLoader>,
    channel: DispatchChannel,
    progress: Arc<ProgressHub>,
}

impl SeparationEngine {
    pub fn new(config: EngineConfig) -> Self {
        let loader = Arc::new(ManifestLoader::new(config.clone()));
        Self::with_loader(config, loader)
    }

    pub fn with_loader(config: EngineConfig, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            channel: DispatchChannel::new(config.chunk_timeout),
            config,
            loader,
            progress: Arc::new(ProgressHub::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn on_progress(
        &self,
        observer: impl Fn(&SeparationProgress) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.progress.subscribe(observer)
    }

    pub fn remove_observer(&self, id: SubscriptionId) -> bool {
        self.progress.unsubscribe(id)
    }

    /// Fail every in-flight hop; calls running now fail with
    /// [`StemError::Cancelled`]. Safe with nothing in flight.
    pub fn cancel(&self) {
        info!(pending = self.channel.pending_count(), "cancelling separation");
        self.channel.cancel();
    }

    pub fn available_models() -> &'static [ModelInfo] {
        registry::available_models()
    }

    pub fn model_info(name: &str) -> Option<&'static ModelInfo> {
        registry::model_info(name)
    }

    pub async fn separate_stems(
        &self,
        recording: &AudioRecording,
        options: SeparationOptions,
    ) -> Result<SeparatedStems> {
        let started = Instant::now();
        let watch = self.channel.watch();

        let model = validate(recording, &options)?;
        let sample_rate = recording.sample_rate();
        // Reject bad hop parameters before any loading work.
        ChunkPlan::new(
            recording.len(),
            options
                .chunk_length
                .unwrap_or(DEFAULT_CHUNK_SECONDS * sample_rate as usize),
            options.overlap,
        )?;

        info!(
            model = model.name,
            samples = recording.len(),
            channels = recording.channel_count(),
            two_stems = ?options.two_stems,
            "separating recording"
        );

        // LOADING
        self.emit(ProgressPhase::Loading, 10.0, format!("Loading {}", model.display_name));
        let backend = match self.prepare_model(model, &options).await {
            Ok(backend) => Ok(backend),
            Err(e) => {
                warn!(model = model.name, error = %e, "model unavailable, every hop uses the fallback separator");
                Err(e.to_string())
            }
        };
        let loading_label = match backend {
            Ok(_) => "Model ready",
            Err(_) => "Using fallback separator",
        };
        self.emit(ProgressPhase::Loading, 25.0, loading_label);
        watch.check()?;

        // PREPARING
        let normalized: AudioRecording;
        let source = match normalization_gain(recording, &options, self.config.normalize_peak) {
            Some(gain) => {
                normalized = recording.scaled(gain);
                &normalized
            }
            None => recording,
        };

        let model_rate = backend
            .as_ref()
            .ok()
            .and_then(|b| b.sample_rate())
            .filter(|&rate| rate != sample_rate);
        let resampled: AudioRecording;
        let working = match model_rate {
            Some(rate) => {
                info!(from = sample_rate, to = rate, "resampling to the model's rate");
                resampled = resample(source, rate)?;
                &resampled
            }
            None => source,
        };
        let window = backend.as_ref().ok().and_then(|b| b.max_chunk_len());
        let chunk_length = hop_length(&options, sample_rate, working.sample_rate(), window);
        let plan = ChunkPlan::new(working.len(), chunk_length, options.overlap)?;
        debug!(chunk_length, hops = plan.hop_count(), "hop plan ready");

        // PROCESSING
        self.emit(ProgressPhase::Processing, PROCESSING_START_PERCENT, "Separating stems");
        let route = match &backend {
            Ok(_) => HopRoute::Dispatch {
                channel: &self.channel,
                model_name: model.name,
            },
            Err(reason) => HopRoute::FallbackOnly {
                reason: reason.as_str(),
            },
        };
        let fallback = FallbackSeparator::new(working.sample_rate()).with_profile(model.shaping);
        let accumulators = ChunkProcessor::new(working, plan, model.stem_count(), fallback, route)
            .with_cancel_watch(watch)
            .with_progress(&self.progress)
            .run()
            .await
            .inspect_err(|e| {
                if e.is_cancellation() {
                    info!(model = model.name, "separation cancelled");
                }
            })?;

        // ENCODING
        self.emit(ProgressPhase::Encoding, 85.0, "Assembling stems");
        let mut buffers: Vec<Vec<f32>> = accumulators
            .into_iter()
            .map(StemAccumulator::into_inner)
            .collect();
        if working.sample_rate() != sample_rate {
            buffers = restore_rate(buffers, working.sample_rate(), sample_rate, recording.len())?;
        }
        let stems = match options.two_stems {
            Some(kept) => fold_two_stems(buffers, kept, &mix_to_mono(source.channels())),
            None => StemKind::layout(buffers.len())
                .iter()
                .copied()
                .zip(buffers)
                .collect(),
        };
        let metadata = StemMetadata {
            duration_secs: recording.duration_secs(),
            sample_rate,
            model_name: model.name.to_string(),
            elapsed: started.elapsed(),
            hop_count: plan.hop_count(),
        };

        // COMPLETE
        self.emit(ProgressPhase::Complete, 100.0, "Done");
        info!(
            model = model.name,
            elapsed_ms = metadata.elapsed.as_millis() as u64,
            "separation complete"
        );
        Ok(SeparatedStems::new(stems, metadata))
    }

    /// Load `model` once per engine and install it in the compute context.
    async fn prepare_model(
        &self,
        model: &'static ModelInfo,
        options: &SeparationOptions,
    ) -> Result<Arc<dyn StemModel>> {
        if let Some(installed) = self.channel.model(model.name) {
            return Ok(installed);
        }

        let loader = self.loader.clone();
        let hub = self.progress.clone();
        let manifest_override = options.manifest_url_override.clone();

        let loaded = tokio::task::spawn_blocking(move || {
            let on_download = |done: u64, total: u64| {
                if total > 0 {
                    let percent = 10.0 + 15.0 * (done as f32 / total as f32).min(1.0);
                    hub.emit(&SeparationProgress::new(
                        ProgressPhase::Loading,
                        percent,
                        "Downloading model",
                    ));
                }
            };
            loader.load(model, manifest_override.as_deref(), &on_download)
        })
        .await
        .map_err(|e| StemError::ModelUnavailable(format!("model loader crashed: {e}")))??;

        self.channel.init_model(model.name, loaded.clone());
        Ok(loaded)
    }

    fn emit(&self, phase: ProgressPhase, percent: f32, label: impl Into<String>) {
        self.progress
            .emit(&SeparationProgress::new(phase, percent, label));
    }
}

impl Default for SeparationEngine {
    fn default() -> Self {
        Self::new(EngineConfig::from_env())
    }
}

fn validate(recording: &AudioRecording, options: &SeparationOptions) -> Result<&'static ModelInfo> {
    if recording.is_empty() {
        return Err(StemError::InvalidInput("recording is empty".into()));
    }
    let model = registry::model_info(&options.model_name).ok_or_else(|| {
        StemError::InvalidInput(format!("unknown model `{}`", options.model_name))
    })?;
    if let Some(kept) = options.two_stems {
        if !model.stems.contains(&kept) {
            return Err(StemError::InvalidInput(format!(
                "`{}` has no {kept} stem to keep",
                model.name
            )));
        }
    }
    Ok(model)
}

/// Hop length in samples at `working_rate`. With a `window`, a hop plus
/// the overlap in front of it never exceeds the window.
fn hop_length(
    options: &SeparationOptions,
    recording_rate: u32,
    working_rate: u32,
    window: Option<usize>,
) -> usize {
    let requested = match options.chunk_length {
        Some(len) => (len as u64 * working_rate as u64 / recording_rate as u64).max(1) as usize,
        None => DEFAULT_CHUNK_SECONDS * working_rate as usize,
    };
    let Some(window) = window.filter(|&w| w > 0) else {
        return requested;
    };

    let span = |len: usize| len + (len as f64 * options.overlap as f64).floor() as usize;
    let mut fit = ((window as f64 / (1.0 + options.overlap as f64)).floor() as usize).max(1);
    while span(fit + 1) <= window {
        fit += 1;
    }
    while fit > 1 && span(fit) > window {
        fit -= 1;
    }

    if requested <= fit {
        return requested;
    }
    if options.chunk_length.is_some() {
        warn!(requested, window, clamped = fit, "chunk length exceeds the model window, clamping");
    }
    fit
}

/// Bring stems computed at `from` back to the recording's rate and length.
fn restore_rate(stems: Vec<Vec<f32>>, from: u32, to: u32, len: usize) -> Result<Vec<Vec<f32>>> {
    let back = resample(&AudioRecording::new(stems, from)?, to)?;
    Ok(back
        .into_channels()
        .into_iter()
        .map(|mut stem| {
            stem.resize(len, 0.0);
            stem
        })
        .collect())
}

/// `kept` plus everything else, taken as the mix minus `kept` so the pair
/// always sums back to the mix.
fn fold_two_stems(
    mut buffers: Vec<Vec<f32>>,
    kept: StemKind,
    mix: &[f32],
) -> Vec<(StemKind, Vec<f32>)> {
    let target = std::mem::take(&mut buffers[kept.index()]);
    let rest = mix.iter().zip(&target).map(|(m, t)| m - t).collect();
    vec![(kept, target), (StemKind::Accompaniment, rest)]
}

/// Single gain bringing the recording's peak to `target`, if requested and possible.
fn normalization_gain(
    recording: &AudioRecording,
    options: &SeparationOptions,
    target: f32,
) -> Option<f32> {
    if !options.normalize {
        return None;
    }
    let peak = recording.peak();
    (peak > f32::EPSILON).then(|| target / peak)
}

/// File-level options for [`split_file`].
#[derive(Clone, Debug, Default)]
pub struct SplitOptions {
    pub output_dir: PathBuf,
    pub separation: SeparationOptions,
    /// Resample the decoded file to this rate before separating.
    pub sample_rate: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct SplitResult {
    pub stems: Vec<(StemKind, PathBuf)>,
    pub metadata: StemMetadata,
}

impl SplitResult {
    pub fn path(&self, kind: StemKind) -> Option<&Path> {
        self.stems
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, p)| p.as_path())
    }
}

/// Decode `input_path`, separate it and write one mono WAV per stem as
/// `<output_dir>/<file stem>_<stem>.wav`. In two-stem mode the second file
/// is `<file stem>_no_<kept stem>.wav`.
pub async fn split_file(
    engine: &SeparationEngine,
    input_path: &Path,
    opts: SplitOptions,
) -> Result<SplitResult> {
    let audio = read_audio(input_path)?;
    let mut recording = AudioRecording::try_from(&audio)?;
    if let Some(rate) = opts.sample_rate {
        recording = resample(&recording, rate)?;
    }
    let kept = opts.separation.two_stems;
    let separated = engine.separate_stems(&recording, opts.separation).await?;

    fs::create_dir_all(&opts.output_dir)?;
    let file_stem = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");

    let metadata = separated.metadata().clone();
    let mut stems = Vec::with_capacity(separated.len());
    for (kind, samples) in separated.into_buffers() {
        let label = match (kind, kept) {
            (StemKind::Accompaniment, Some(kept)) => format!("no_{kept}"),
            _ => kind.to_string(),
        };
        let path = opts.output_dir.join(format!("{file_stem}_{label}.wav"));
        write_audio(
            &path,
            &AudioData {
                samples,
                sample_rate: metadata.sample_rate,
                channels: 1,
            },
        )?;
        debug!(stem = %kind, path = %path.display(), "wrote stem");
        stems.push((kind, path));
    }

    Ok(SplitResult { stems, metadata })
}
