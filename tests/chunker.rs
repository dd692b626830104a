mod common;

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use common::{stereo_sine, Counting, Passthrough, SR};
use stem_separator_core::{
    core::{
        chunker::{ChunkPlan, ChunkProcessor, HopRoute},
        dispatch::DispatchChannel,
        dsp::mix_to_mono,
    },
    config::DEFAULT_CHUNK_TIMEOUT,
    io::progress::ProgressHub,
    FallbackSeparator, ProgressPhase, StemError,
};

#[test]
fn plan_covers_recording_with_increasing_starts() {
    for (total, chunk, overlap) in [
        (88_200, 44_100, 0.25),
        (100_000, 4_096, 0.5),
        (1_000, 4_096, 0.25),
        (10_000, 1_000, 0.0),
        (7, 3, 0.9),
    ] {
        let plan = ChunkPlan::new(total, chunk, overlap).unwrap();
        let hops: Vec<_> = plan.hops().collect();
        assert_eq!(hops.len(), plan.hop_count());

        assert_eq!(hops[0].start, 0);
        assert_eq!(hops.last().unwrap().end, total);
        for pair in hops.windows(2) {
            assert!(pair[1].position > pair[0].position);
            // no gap between consecutive hops
            assert!(pair[1].start <= pair[0].end);
        }
    }
}

#[test]
fn plan_for_two_seconds_at_one_second_hops() {
    let plan = ChunkPlan::new(88_200, 44_100, 0.25).unwrap();
    assert_eq!(plan.overlap_samples, 11_025);
    assert_eq!(plan.stride, 33_075);
    let hops: Vec<_> = plan.hops().map(|h| (h.start, h.position, h.end)).collect();
    assert_eq!(
        hops,
        vec![
            (0, 0, 44_100),
            (22_050, 33_075, 77_175),
            (55_125, 66_150, 88_200)
        ]
    );
}

#[test]
fn plan_rejects_bad_parameters() {
    assert!(matches!(
        ChunkPlan::new(100, 0, 0.25),
        Err(StemError::InvalidInput(_))
    ));
    for overlap in [1.0, 1.5, -0.1, f32::NAN] {
        assert!(matches!(
            ChunkPlan::new(100, 10, overlap),
            Err(StemError::InvalidInput(_))
        ));
    }
}

#[tokio::test]
async fn fallback_route_keeps_stem_length_for_any_layout() {
    let rec = stereo_sine(440.0, 0.5, 20_000);
    for (chunk, overlap) in [(20_000, 0.25), (4_096, 0.5), (3_000, 0.0), (50_000, 0.1), (1, 0.0)] {
        let plan = ChunkPlan::new(rec.len(), chunk, overlap).unwrap();
        let out = ChunkProcessor::new(
            &rec,
            plan,
            4,
            FallbackSeparator::new(SR),
            HopRoute::FallbackOnly { reason: "offline" },
        )
        .run()
        .await
        .unwrap();
        assert_eq!(out.len(), 4);
        for acc in &out {
            assert_eq!(acc.len(), rec.len(), "chunk={chunk} overlap={overlap}");
            assert!(acc.as_slice().iter().all(|s| s.is_finite()));
        }
    }
}

#[tokio::test]
async fn identity_backend_reconstructs_the_input() {
    let rec = stereo_sine(220.0, 0.4, 30_000);
    let channel = DispatchChannel::new(DEFAULT_CHUNK_TIMEOUT);
    channel.init_model("passthrough", Arc::new(Passthrough));
    let mono = mix_to_mono(rec.channels());

    for (chunk, overlap) in [(8_192, 0.25), (5_000, 0.5), (30_000, 0.0)] {
        let plan = ChunkPlan::new(rec.len(), chunk, overlap).unwrap();
        let out = ChunkProcessor::new(
            &rec,
            plan,
            4,
            FallbackSeparator::new(SR),
            HopRoute::Dispatch {
                channel: &channel,
                model_name: "passthrough",
            },
        )
        .run()
        .await
        .unwrap();

        for (&got, &want) in out[0].as_slice().iter().zip(&mono) {
            assert_abs_diff_eq!(got, want, epsilon = 1e-6);
        }
        assert!(out[1].as_slice().iter().all(|&s| s == 0.0));
    }
}

#[tokio::test]
async fn crossfade_ramps_between_neighbouring_hops() {
    let rec = stereo_sine(440.0, 0.5, 88_200);
    let channel = DispatchChannel::new(DEFAULT_CHUNK_TIMEOUT);
    channel.init_model("counting", Arc::new(Counting::default()));
    let plan = ChunkPlan::new(rec.len(), 44_100, 0.25).unwrap();

    let out = ChunkProcessor::new(
        &rec,
        plan,
        4,
        FallbackSeparator::new(SR),
        HopRoute::Dispatch {
            channel: &channel,
            model_name: "counting",
        },
    )
    .run()
    .await
    .unwrap();

    let v = out[0].as_slice();
    assert_eq!(v[0], 1.0);
    assert_eq!(v[22_049], 1.0);
    assert_abs_diff_eq!(v[27_562], 1.5, epsilon = 1e-3);
    assert_eq!(v[33_075], 2.0);
    assert_eq!(v[55_124], 2.0);
    assert_eq!(v[66_150], 3.0);
    assert_eq!(v[88_199], 3.0);

    let step = 1.0 / plan.overlap_samples as f32 + 1e-5;
    for pair in v.windows(2) {
        let d = pair[1] - pair[0];
        assert!((0.0..=step).contains(&d), "jump of {d}");
    }
}

#[tokio::test]
async fn processing_progress_reports_every_hop() {
    let rec = stereo_sine(440.0, 0.5, 10_000);
    let plan = ChunkPlan::new(rec.len(), 2_000, 0.0).unwrap();
    let hub = ProgressHub::new();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    hub.subscribe(move |p| sink.lock().unwrap().push(p.clone()));

    ChunkProcessor::new(
        &rec,
        plan,
        4,
        FallbackSeparator::new(SR),
        HopRoute::FallbackOnly { reason: "offline" },
    )
    .with_progress(&hub)
    .run()
    .await
    .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), plan.hop_count());
    assert!(seen.iter().all(|p| p.phase == ProgressPhase::Processing));
    assert!(seen.windows(2).all(|w| w[1].percent > w[0].percent));
    assert_abs_diff_eq!(seen.last().unwrap().percent, 80.0, epsilon = 1e-4);
    assert_eq!(seen.last().unwrap().eta, Some(std::time::Duration::ZERO));
}

#[tokio::test]
async fn cancelled_watch_stops_at_the_next_hop() {
    let rec = stereo_sine(440.0, 0.5, 10_000);
    let channel = DispatchChannel::new(DEFAULT_CHUNK_TIMEOUT);
    let watch = channel.watch();
    channel.cancel();

    let err = ChunkProcessor::new(
        &rec,
        ChunkPlan::new(rec.len(), 2_000, 0.0).unwrap(),
        4,
        FallbackSeparator::new(SR),
        HopRoute::FallbackOnly { reason: "offline" },
    )
    .with_cancel_watch(watch)
    .run()
    .await
    .unwrap_err();
    assert!(err.is_cancellation());
}
