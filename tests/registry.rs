use stem_separator_core::{
    available_models, model::registry::resolve_manifest_url, model_info, Quality, ShapingProfile,
    Speed, StemError, StemKind,
};

#[test]
fn catalog_lists_every_model_once() {
    let models = available_models();
    let mut names: Vec<_> = models.iter().map(|m| m.name).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), models.len());
    assert_eq!(
        names,
        vec!["htdemucs", "htdemucs_6s", "mdx_extra", "mdx_extra_q"]
    );
}

#[test]
fn stem_layouts_follow_canonical_order() {
    let four = model_info("htdemucs").unwrap();
    assert_eq!(
        four.stems,
        &[StemKind::Vocals, StemKind::Drums, StemKind::Bass, StemKind::Other]
    );
    let six = model_info("htdemucs_6s").unwrap();
    assert_eq!(six.stem_count(), 6);
    assert_eq!(six.stems[4], StemKind::Guitar);
    assert_eq!(six.stems[5], StemKind::Piano);
    for m in available_models() {
        assert_eq!(m.stems, StemKind::layout(m.stem_count()));
    }
}

#[test]
fn empty_name_means_default() {
    assert_eq!(model_info("").unwrap().name, "htdemucs");
    assert!(model_info("demucs_v9").is_none());
}

#[test]
fn speed_and_quality_are_ordered_data() {
    let q = model_info("mdx_extra_q").unwrap();
    let full = model_info("mdx_extra").unwrap();
    assert_eq!(q.speed, Speed::Fast);
    assert!(full.quality > q.quality);
    assert_eq!(full.quality, Quality::Best);
    assert_eq!(full.shaping, ShapingProfile::TransientEmphasis);
    assert_eq!(model_info("htdemucs").unwrap().shaping, ShapingProfile::Smooth);
}

#[test]
fn manifest_url_joins_base() {
    for base in ["https://example.com/models", "https://example.com/models/"] {
        assert_eq!(
            resolve_manifest_url("htdemucs_6s", base).unwrap(),
            "https://example.com/models/htdemucs_6s/manifest.json"
        );
    }
    assert!(matches!(
        resolve_manifest_url("nope", "https://example.com"),
        Err(StemError::Registry(_))
    ));
}

#[test]
fn catalog_serializes_for_listing() {
    let json = serde_json::to_value(model_info("htdemucs").unwrap()).unwrap();
    assert_eq!(json["quality"], "high");
    assert_eq!(json["stems"][0], "vocals");
    assert_eq!(json["shaping"], "smooth");
}
