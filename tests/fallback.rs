mod common;

use common::{sine, SR};
use stem_separator_core::{core::dsp::energy, FallbackSeparator, ShapingProfile};

fn mixture(len: usize) -> Vec<f32> {
    let low = sine(80.0, 0.2, len);
    let mid = sine(800.0, 0.2, len);
    let high = sine(6_000.0, 0.1, len);
    (0..len)
        .map(|i| low[i] + mid[i] + high[i] + if i % 2_205 == 0 { 0.3 } else { 0.0 })
        .collect()
}

#[test]
fn four_stems_conserve_the_mono_mix() {
    let x = mixture(SR as usize / 2);
    let stems = FallbackSeparator::new(SR).separate(&[x.clone()], 4);
    assert_eq!(stems.len(), 4);
    for i in 0..x.len() {
        let sum: f32 = stems.iter().map(|s| s[i]).sum();
        assert!((sum - x[i]).abs() < 1e-4, "sample {i}: {sum} vs {}", x[i]);
    }
}

#[test]
fn stereo_input_is_mixed_down_first() {
    let l = mixture(4_410);
    let r: Vec<f32> = l.iter().map(|s| -0.5 * s).collect();
    let mono: Vec<f32> = l.iter().zip(&r).map(|(a, b)| 0.5 * (a + b)).collect();

    let sep = FallbackSeparator::new(SR);
    assert_eq!(sep.separate(&[l, r], 4), sep.separate(&[mono], 4));
}

#[test]
fn output_is_deterministic() {
    let x = mixture(22_050);
    for profile in ShapingProfile::ALL {
        let sep = FallbackSeparator::new(SR).with_profile(profile);
        let a = sep.separate(&[x.clone()], 6);
        let b = sep.separate(&[x.clone()], 6);
        assert_eq!(a, b, "{profile:?} is not deterministic");
    }
}

#[test]
fn six_stems_split_guitar_out_of_vocals() {
    let x = mixture(SR as usize);
    let sep = FallbackSeparator::new(SR);
    let four = sep.separate(&[x.clone()], 4);
    let six = sep.separate(&[x.clone()], 6);

    assert_eq!(six.len(), 6);
    for stem in &six {
        assert_eq!(stem.len(), x.len());
    }
    // drums and bass come from the same core split
    assert_eq!(six[1], four[1]);
    assert_eq!(six[2], four[2]);

    let vocal_band = energy(&four[0]);
    let post_split = energy(&six[0]) + energy(&six[4]);
    assert!(
        post_split <= vocal_band * (1.0 + 1e-6),
        "vocals+guitar {post_split} exceeds vocal band {vocal_band}"
    );
    assert!(energy(&six[4]) > 0.0);
    assert!(energy(&six[5]) > 0.0);

    // the extra bands are moved out of vocals/other, not copied
    for i in 0..x.len() {
        let sum: f32 = six.iter().map(|s| s[i]).sum();
        assert!((sum - x[i]).abs() < 1e-4);
    }
}

#[test]
fn fewer_stems_truncate_canonical_order() {
    let x = mixture(4_410);
    let sep = FallbackSeparator::new(SR);
    let four = sep.separate(&[x.clone()], 4);
    let two = sep.separate(&[x], 2);
    assert_eq!(two, four[..2].to_vec());
}

#[test]
fn outputs_are_clamped() {
    let loud: Vec<f32> = (0..8_820)
        .map(|i| if (i / 50) % 2 == 0 { 8.0 } else { -8.0 })
        .collect();
    for profile in ShapingProfile::ALL {
        let stems = FallbackSeparator::new(SR)
            .with_profile(profile)
            .separate(&[loud.clone()], 6);
        for stem in &stems {
            assert!(stem.iter().all(|s| s.is_finite() && (-1.0..=1.0).contains(s)));
        }
    }
}

#[test]
fn empty_input_gives_empty_stems() {
    let stems = FallbackSeparator::new(SR).separate(&[Vec::new()], 4);
    assert_eq!(stems.len(), 4);
    assert!(stems.iter().all(Vec::is_empty));
}

#[test]
fn bass_follows_low_frequencies() {
    let low = sine(60.0, 0.5, SR as usize);
    let stems = FallbackSeparator::new(SR).separate(&[low.clone()], 4);
    let bass = energy(&stems[2]);
    assert!(bass > 0.5 * energy(&low), "bass carries {bass}");
    assert!(bass > energy(&stems[0]) && bass > energy(&stems[1]));
}

#[test]
fn shaping_never_changes_bass() {
    let x = mixture(8_820);
    let plain = FallbackSeparator::new(SR).separate(&[x.clone()], 4);
    for profile in ShapingProfile::ALL {
        let shaped = FallbackSeparator::new(SR)
            .with_profile(profile)
            .separate(&[x.clone()], 4);
        assert_eq!(shaped[2], plain[2], "{profile:?} touched bass");
    }
    let emphasized = FallbackSeparator::new(SR)
        .with_profile(ShapingProfile::TransientEmphasis)
        .separate(&[x], 4);
    assert_ne!(emphasized[1], plain[1]);
    assert_eq!(emphasized[0], plain[0]);
}

#[test]
fn lead_in_lets_a_hop_continue_a_single_pass() {
    let x = mixture(22_050);
    let split = 11_025;
    for profile in ShapingProfile::ALL {
        let sep = FallbackSeparator::new(SR).with_profile(profile);
        let whole = sep.separate(&[x.clone()], 6);

        let lead = sep.lead_in_len();
        assert_eq!(lead, 882);
        let tail = sep.separate_continuing(&[x[split - lead..split].to_vec()], &[x[split..].to_vec()], 6);

        for (w, t) in whole.iter().zip(&tail) {
            assert_eq!(t.len(), x.len() - split);
            for (i, (a, b)) in w[split..].iter().zip(t).enumerate() {
                assert!((a - b).abs() < 1e-4, "{profile:?} sample {}: {a} vs {b}", split + i);
            }
        }
    }
}

#[test]
fn empty_lead_in_is_a_plain_separation() {
    let x = mixture(4_410);
    let sep = FallbackSeparator::new(SR);
    assert_eq!(sep.separate_continuing(&[Vec::new()], &[x.clone()], 4), sep.separate(&[x], 4));
}
