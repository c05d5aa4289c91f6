//! Media policy, session table and capture panel validation.

use std::collections::HashSet;

use super::helpers::validate_range;
use crate::schema::PanelcastConfig;

pub(crate) fn validate_media(errors: &mut Vec<String>, config: &PanelcastConfig) {
    let media = &config.media;
    if media.codec_preferences.is_empty() {
        errors.push("media.codec_preferences must list at least one codec".into());
    }
    let mut seen = HashSet::new();
    for codec in &media.codec_preferences {
        if !seen.insert(*codec) {
            errors.push(format!("media.codec_preferences lists {codec} twice"));
        }
    }
    validate_range(
        errors,
        "media.target_bitrate_kbps",
        media.target_bitrate_kbps,
        250,
        100_000,
    );
    if media.max_bitrate_kbps < media.target_bitrate_kbps {
        errors.push(format!(
            "media.max_bitrate_kbps = {} is below media.target_bitrate_kbps = {}",
            media.max_bitrate_kbps, media.target_bitrate_kbps
        ));
    }
    validate_range(errors, "media.max_framerate", media.max_framerate, 1, 144);
}

pub(crate) fn validate_session(errors: &mut Vec<String>, config: &PanelcastConfig) {
    validate_range(
        errors,
        "session.early_candidate_limit",
        config.session.early_candidate_limit,
        0,
        1024,
    );
}

pub(crate) fn validate_capture(errors: &mut Vec<String>, config: &PanelcastConfig) {
    let mut seen = HashSet::new();
    for panel in &config.capture.default_panels {
        if panel.panel_id.is_empty() {
            errors.push("capture.default_panels entry has an empty panel_id".into());
        } else if !seen.insert(panel.panel_id.as_str()) {
            errors.push(format!(
                "capture.default_panels repeats panel_id {}",
                panel.panel_id
            ));
        }
        if panel.source_id.is_empty() {
            errors.push(format!(
                "capture.default_panels[{}] has an empty source_id",
                panel.panel_id
            ));
        }
    }
}
