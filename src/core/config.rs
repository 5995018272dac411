//! Configuration for the merge pipeline.
//!
//! One immutable [`MergeConfig`] value is threaded through every component
//! call. Nothing in the crate reads process environment variables, so the
//! decision logic is directly unit-testable.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::MergeError;

/// One image-processing variant of a line's pixel region, used to generate
/// independent re-OCR attempts. Variants are tried in the priority order they
/// appear in [`MergeConfig::crop_variants`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropVariant {
    /// The raw crop, no preprocessing.
    Raw,
    /// Grayscale with auto-contrast.
    Auto,
    /// Binarized at threshold 180.
    Bw180,
    /// 2x upscaled, then grayscale with auto-contrast.
    Up2xAuto,
}

impl CropVariant {
    /// Stable wire name used in candidate source ids and audit rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            CropVariant::Raw => "raw",
            CropVariant::Auto => "auto",
            CropVariant::Bw180 => "bw180",
            CropVariant::Up2xAuto => "up2x_auto",
        }
    }
}

/// A page-segmentation mode passed to the line recognizer.
///
/// The numeric value is recognizer-specific and is treated as opaque here;
/// only its position in the configured list matters for priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentationMode(pub u8);

impl std::fmt::Display for SegmentationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "psm{}", self.0)
    }
}

/// How lines are selected for re-OCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateMode {
    /// Heuristic transliteration detector: mixed Tibetan+Latin lines, or Latin
    /// lines with Sanskrit-like diacritics or transliteration cues.
    #[default]
    Heuristic,
    /// Every line containing at least one Latin letter.
    AllLatin,
}

/// Page delimiter convention for merged text output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSeparator {
    /// Form feed between pages.
    #[default]
    FormFeed,
    /// An explicit literal marker block between pages.
    Marker,
}

impl PageSeparator {
    /// The literal separator text inserted between pages.
    pub fn as_str(&self) -> &'static str {
        match self {
            PageSeparator::FormFeed => "\u{0C}",
            PageSeparator::Marker => "\n\n<<<PAGE_BREAK>>>\n\n",
        }
    }
}

/// Immutable configuration for the two-pass merge.
///
/// Defaults mirror the values the pilot runs settled on: a general similarity
/// threshold of 0.85, relaxed to 0.78 when the only difference is diacritics,
/// and further relaxed to 0.73 when the candidate is supported by a matching
/// Tibetan anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Language set for the structural pass (Pass A), recognizer-specific.
    #[serde(default = "MergeConfig::default_lang_a")]
    pub lang_a: String,

    /// Language set for the diacritic pass (Pass B), recognizer-specific.
    #[serde(default = "MergeConfig::default_lang_b")]
    pub lang_b: String,

    /// General similarity threshold for candidate acceptance.
    #[serde(default = "MergeConfig::default_min_similarity")]
    pub min_similarity: f32,

    /// Relaxed threshold used only when baseline and candidate share the same
    /// diacritic-stripped skeleton.
    #[serde(default = "MergeConfig::default_min_similarity_diacritic_only")]
    pub min_similarity_diacritic_only: f32,

    /// Further-relaxed threshold used only when the candidate is supported by
    /// a matching Tibetan-script anchor.
    #[serde(default = "MergeConfig::default_min_similarity_tibetan_anchor")]
    pub min_similarity_tibetan_anchor: f32,

    /// Crop-image variants in priority order.
    #[serde(default = "MergeConfig::default_crop_variants")]
    pub crop_variants: Vec<CropVariant>,

    /// Ordered segmentation modes for line-level re-OCR.
    #[serde(default = "MergeConfig::default_seg_modes")]
    pub seg_modes: Vec<SegmentationMode>,

    /// Ordered segmentation modes for lines containing Tibetan script.
    /// Falls back to [`MergeConfig::seg_modes`] when empty.
    #[serde(default = "MergeConfig::default_seg_modes_tibetan")]
    pub seg_modes_tibetan: Vec<SegmentationMode>,

    /// Hard per-line timeout for one recognizer call. A timed-out
    /// variant/mode pair is abandoned, not an error.
    #[serde(default = "MergeConfig::default_line_timeout", with = "duration_secs")]
    pub line_timeout: Duration,

    /// How lines are selected for re-OCR.
    #[serde(default)]
    pub candidate_mode: CandidateMode,

    /// Page delimiter convention for merged output.
    #[serde(default)]
    pub page_separator: PageSeparator,

    /// Dehyphenate likely German/English line-wrap hyphens. Skips
    /// transliteration-heavy lines.
    #[serde(default)]
    pub dehyphenate_wrap: bool,

    /// Collect anomaly rows (digit runs, suspect symbols, Sanskrit-umlaut
    /// candidates) alongside the audit tables.
    #[serde(default)]
    pub anomaly_report: bool,
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            lang_a: Self::default_lang_a(),
            lang_b: Self::default_lang_b(),
            min_similarity: Self::default_min_similarity(),
            min_similarity_diacritic_only: Self::default_min_similarity_diacritic_only(),
            min_similarity_tibetan_anchor: Self::default_min_similarity_tibetan_anchor(),
            crop_variants: Self::default_crop_variants(),
            seg_modes: Self::default_seg_modes(),
            seg_modes_tibetan: Self::default_seg_modes_tibetan(),
            line_timeout: Self::default_line_timeout(),
            candidate_mode: CandidateMode::default(),
            page_separator: PageSeparator::default(),
            dehyphenate_wrap: false,
            anomaly_report: false,
        }
    }
}

impl MergeConfig {
    fn default_lang_a() -> String {
        "deu+bod".to_string()
    }

    fn default_lang_b() -> String {
        "deu+bod+san+script/Latin".to_string()
    }

    fn default_min_similarity() -> f32 {
        0.85
    }

    fn default_min_similarity_diacritic_only() -> f32 {
        0.78
    }

    fn default_min_similarity_tibetan_anchor() -> f32 {
        0.73
    }

    fn default_crop_variants() -> Vec<CropVariant> {
        vec![
            CropVariant::Raw,
            CropVariant::Auto,
            CropVariant::Bw180,
            CropVariant::Up2xAuto,
        ]
    }

    fn default_seg_modes() -> Vec<SegmentationMode> {
        vec![SegmentationMode(7), SegmentationMode(6)]
    }

    fn default_seg_modes_tibetan() -> Vec<SegmentationMode> {
        vec![SegmentationMode(7), SegmentationMode(13), SegmentationMode(6)]
    }

    fn default_line_timeout() -> Duration {
        Duration::from_secs(20)
    }

    /// Create a new MergeConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the three similarity thresholds (general, diacritic-only,
    /// Tibetan-anchor).
    pub fn with_thresholds(mut self, general: f32, diacritic_only: f32, anchor: f32) -> Self {
        self.min_similarity = general;
        self.min_similarity_diacritic_only = diacritic_only;
        self.min_similarity_tibetan_anchor = anchor;
        self
    }

    /// Set the crop-variant priority order.
    pub fn with_crop_variants(mut self, variants: Vec<CropVariant>) -> Self {
        self.crop_variants = variants;
        self
    }

    /// Set the segmentation-mode lists (general, Tibetan-script lines).
    pub fn with_seg_modes(
        mut self,
        general: Vec<SegmentationMode>,
        tibetan: Vec<SegmentationMode>,
    ) -> Self {
        self.seg_modes = general;
        self.seg_modes_tibetan = tibetan;
        self
    }

    /// Set the per-line recognizer timeout.
    pub fn with_line_timeout(mut self, timeout: Duration) -> Self {
        self.line_timeout = timeout;
        self
    }

    /// Set the candidate-selection mode.
    pub fn with_candidate_mode(mut self, mode: CandidateMode) -> Self {
        self.candidate_mode = mode;
        self
    }

    /// Set the page separator convention.
    pub fn with_page_separator(mut self, sep: PageSeparator) -> Self {
        self.page_separator = sep;
        self
    }

    /// Enable dehyphenation of wrapped words.
    pub fn with_dehyphenation(mut self, enabled: bool) -> Self {
        self.dehyphenate_wrap = enabled;
        self
    }

    /// Enable the anomaly report.
    pub fn with_anomaly_report(mut self, enabled: bool) -> Self {
        self.anomaly_report = enabled;
        self
    }

    /// The segmentation-mode list for a line, depending on whether it
    /// contains Tibetan script.
    pub fn seg_modes_for(&self, has_tibetan: bool) -> &[SegmentationMode] {
        if has_tibetan && !self.seg_modes_tibetan.is_empty() {
            &self.seg_modes_tibetan
        } else {
            &self.seg_modes
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any threshold is outside (0.0, 1.0], if the
    /// thresholds are not ordered general >= diacritic-only >= anchor, or if
    /// the crop-variant or segmentation-mode lists are empty.
    pub fn validate(&self) -> Result<(), MergeError> {
        for (name, v) in [
            ("min_similarity", self.min_similarity),
            (
                "min_similarity_diacritic_only",
                self.min_similarity_diacritic_only,
            ),
            (
                "min_similarity_tibetan_anchor",
                self.min_similarity_tibetan_anchor,
            ),
        ] {
            if !(v > 0.0 && v <= 1.0) {
                return Err(MergeError::invalid_field(
                    name,
                    "a value in (0.0, 1.0]",
                    format!("{v}"),
                ));
            }
        }
        if self.min_similarity < self.min_similarity_diacritic_only
            || self.min_similarity_diacritic_only < self.min_similarity_tibetan_anchor
        {
            return Err(MergeError::config_detailed(
                "similarity thresholds",
                "expected min_similarity >= diacritic_only >= tibetan_anchor",
            ));
        }
        if self.crop_variants.is_empty() {
            return Err(MergeError::invalid_field(
                "crop_variants",
                "at least one variant",
                "empty list",
            ));
        }
        if self.seg_modes.is_empty() {
            return Err(MergeError::invalid_field(
                "seg_modes",
                "at least one segmentation mode",
                "empty list",
            ));
        }
        if self.line_timeout.is_zero() {
            return Err(MergeError::invalid_field(
                "line_timeout",
                "a positive duration",
                "0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(MergeConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_unordered_thresholds() {
        let cfg = MergeConfig::new().with_thresholds(0.7, 0.78, 0.73);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_crop_variants() {
        let cfg = MergeConfig::new().with_crop_variants(vec![]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn seg_modes_switch_on_tibetan() {
        let cfg = MergeConfig::default();
        assert_eq!(cfg.seg_modes_for(false).len(), 2);
        assert_eq!(cfg.seg_modes_for(true).len(), 3);
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = MergeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: MergeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.min_similarity, cfg.min_similarity);
        assert_eq!(back.line_timeout, cfg.line_timeout);
        assert_eq!(back.crop_variants, cfg.crop_variants);
    }
}
