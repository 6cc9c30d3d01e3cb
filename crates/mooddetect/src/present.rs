//! Text helpers for whatever renders session output.

use crate::mood::Mood;
use crate::types::TrackDescriptor;

pub const APP_NAME: &str = "MoodDetect";

/// `m:ss`, or `--:--` while the duration is unknown.
pub fn format_duration(seconds: Option<f64>) -> String {
    match seconds {
        Some(s) if s.is_finite() && s >= 0.0 => {
            let total = s.floor() as u64;
            format!("{}:{:02}", total / 60, total % 60)
        }
        _ => "--:--".to_string(),
    }
}

/// Backend title if there is one, else "<Mood> Music <n>" numbered from 1.
pub fn track_title(mood: &Mood, track: &TrackDescriptor) -> String {
    match &track.title {
        Some(title) => title.clone(),
        None => format!("{} Music {}", mood.display_name(), track.display_index + 1),
    }
}

pub fn share_text(mood: &Mood, track: &TrackDescriptor) -> String {
    let title = track_title(mood, track);
    match &track.audio_url {
        Some(url) => format!(
            "Check out this {} mood-based music from {}: {} - {}",
            mood, APP_NAME, title, url
        ),
        None => format!(
            "Check out this {} mood-based music from {}: {}",
            mood, APP_NAME, title
        ),
    }
}
