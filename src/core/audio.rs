use std::{fs::File, path::Path};

use anyhow::{Context, Result};
use hound::WavWriter;
use rubato::{
    InterpolationParameters, InterpolationType, Resampler, SincFixedIn, WindowFunction,
};
use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, errors::Error as DecodeError,
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, warn};

use crate::types::{AudioData, AudioRecording};

/// Decode any container/codec symphonia knows into interleaved f32.
pub fn read_audio<P: AsRef<Path>>(path: P) -> Result<AudioData> {
    let path: &Path = path.as_ref();

    let file: File =
        File::open(path).with_context(|| format!("Failed to open audio file: {:?}", path))?;

    let mss: MediaSourceStream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint: Hint = Hint::new();

    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;
    let track = format.default_track().context("No default track found")?;
    let track_id = track.id;

    let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate: u32 = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels: u16 = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    while let Ok(packet) = format.next_packet() {
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(DecodeError::DecodeError(e)) => {
                warn!(error = e, "skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        sample_rate = decoded.spec().rate;
        channels = decoded.spec().channels.count() as u16;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);

        samples.extend_from_slice(buffer.samples());
    }

    debug!(
        path = %path.display(),
        sample_rate,
        channels,
        samples = samples.len(),
        "read audio"
    );

    Ok(AudioData {
        samples,
        sample_rate,
        channels,
    })
}

/// 16-bit PCM WAV.
pub fn write_audio<P: AsRef<Path>>(path: P, audio: &AudioData) -> Result<()> {
    let spec = hound::WavSpec {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path.as_ref(), spec)
        .with_context(|| format!("Failed to create {:?}", path.as_ref()))?;
    for sample in &audio.samples {
        let s = (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        writer.write_sample(s)?;
    }

    writer.finalize()?;
    Ok(())
}

const SINC_LEN: usize = 256;

/// Band-limited sample-rate conversion of every channel. The output is
/// aligned with the input and `round(len · target / source)` frames long.
pub fn resample(recording: &AudioRecording, target_rate: u32) -> Result<AudioRecording> {
    if target_rate == 0 {
        anyhow::bail!("target sample rate must be positive");
    }
    if recording.sample_rate() == target_rate || recording.is_empty() {
        return Ok(recording.clone());
    }

    let ratio = target_rate as f64 / recording.sample_rate() as f64;
    let params = InterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: InterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    // Zero tail flushes the filter; its leading delay is cut off below.
    let padded: Vec<Vec<f32>> = recording
        .channels()
        .iter()
        .map(|c| {
            let mut v = Vec::with_capacity(c.len() + SINC_LEN);
            v.extend_from_slice(c);
            v.resize(c.len() + SINC_LEN, 0.0);
            v
        })
        .collect();
    let mut resampler = SincFixedIn::<f32>::new(
        ratio,
        1.0,
        params,
        recording.len() + SINC_LEN,
        recording.channel_count(),
    )?;
    let out = resampler.process(&padded, None)?;

    let delay = (SINC_LEN as f64 * ratio / 2.0).round() as usize;
    let frames = (recording.len() as f64 * ratio).round() as usize;
    let channels: Vec<Vec<f32>> = out
        .into_iter()
        .map(|c| {
            let mut v: Vec<f32> = c.into_iter().skip(delay).take(frames).collect();
            v.resize(frames, 0.0);
            v
        })
        .collect();

    debug!(
        from = recording.sample_rate(),
        to = target_rate,
        frames,
        "resampled"
    );
    Ok(AudioRecording::new(channels, target_rate)?)
}
