//! Sentiment letters returned to callers
//!
//! `B` (bad), `G` (good), `N` (neutral), `N/A` for anything unrecognised.

/// Letter for labels that could not be mapped
pub const NOT_AVAILABLE: &str = "N/A";

/// Letter for a single-model label, case-insensitive
pub fn sentiment_letter(label: &str) -> &'static str {
    match label.to_lowercase().as_str() {
        "negative" => "B",
        "positive" => "G",
        "neutral" => "N",
        _ => NOT_AVAILABLE,
    }
}

/// Ensemble replies already carry a letter; anything else is `N/A`
pub fn ensemble_letter(label: &str) -> &'static str {
    match label {
        "B" => "B",
        "G" => "G",
        "N" => "N",
        _ => NOT_AVAILABLE,
    }
}
