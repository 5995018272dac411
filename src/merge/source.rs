//! Candidate production: which lines get re-read, and which re-read wins.
//!
//! The structural pass supplies line geometry and baseline text; the
//! diacritic pass re-reads each selected line crop once per configured
//! crop-variant/segmentation-mode pair through a [`LineRecognizer`].
//! Timeouts and recognizer failures are candidate-production failures,
//! not errors; the line simply falls back to its baseline.

use std::time::Duration;

use crate::core::{CandidateMode, CropVariant, MergeConfig, MergeResult, SegmentationMode};
use crate::domain::{Candidate, CandidateSource, LineBox};
use crate::processors::similarity::{diacritic_gain, similarity};
use crate::processors::spans::has_sanskrit_label;
use crate::processors::text::{
    diacritic_count, has_devanagari, has_latin, has_tibetan, normalize_text, tibetan_anchor,
    token_has_translit_cues,
};

/// One line from the structural pass.
#[derive(Debug, Clone)]
pub struct LineInput {
    /// Bounding geometry on the page image.
    pub bbox: LineBox,
    /// Baseline text.
    pub text: String,
}

/// What one recognizer invocation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerOutcome {
    /// Recognized text (possibly empty).
    Text(String),
    /// The per-line timeout elapsed first.
    TimedOut,
    /// The recognizer ran and failed. One bad line crop must not abort a
    /// full-volume run, so this is not an error.
    Failed,
}

/// Re-reads one line crop under a given variant and segmentation mode.
///
/// Implementations wrap the external OCR engine; they must be callable
/// from multiple worker threads at once.
pub trait LineRecognizer {
    /// Recognizes `line` from the crop `variant` under segmentation `mode`,
    /// giving up after `timeout`.
    fn recognize(
        &self,
        line: &LineInput,
        variant: CropVariant,
        mode: SegmentationMode,
        timeout: Duration,
    ) -> MergeResult<RecognizerOutcome>;
}

/// Whether a baseline line is worth re-reading at all.
///
/// The heuristic mode targets transliteration regions: mixed Tibetan and
/// Latin script, Latin with IAST diacritics, transliteration-cued tokens,
/// or an explicit Sanskrit label. `AllLatin` re-reads every line with any
/// Latin letter.
pub fn is_candidate_line(text: &str, mode: CandidateMode) -> bool {
    if !has_latin(text) {
        return false;
    }
    match mode {
        CandidateMode::AllLatin => true,
        CandidateMode::Heuristic => {
            has_tibetan(text)
                || diacritic_count(text) > 0
                || has_sanskrit_label(text)
                || text.split_whitespace().any(token_has_translit_cues)
        }
    }
}

/// Scores a candidate against the normalized baseline.
fn build_candidate(source: CandidateSource, baseline: &str, text: String) -> Candidate {
    let sim = similarity(baseline, &text);
    let gain = diacritic_gain(baseline, &text);
    let a_anchor = tibetan_anchor(baseline);
    let anchor =
        (!a_anchor.is_empty() && a_anchor == tibetan_anchor(&text)).then_some(a_anchor);
    Candidate {
        source,
        text,
        similarity: sim,
        diacritic_gain: gain,
        anchor,
    }
}

/// Runs the recognizer over every variant/mode pair in priority order and
/// collects the non-empty results. Tibetan-bearing lines use the dedicated
/// segmentation-mode list.
pub fn harvest_candidates(
    line: &LineInput,
    config: &MergeConfig,
    recognizer: &dyn LineRecognizer,
) -> MergeResult<Vec<Candidate>> {
    let baseline = normalize_text(&line.text);
    let modes = config.seg_modes_for(has_tibetan(&baseline));
    let mut out = Vec::new();
    for &variant in &config.crop_variants {
        for &mode in modes {
            let outcome = recognizer.recognize(line, variant, mode, config.line_timeout)?;
            let text = match outcome {
                RecognizerOutcome::Text(t) => normalize_text(&t),
                RecognizerOutcome::TimedOut | RecognizerOutcome::Failed => continue,
            };
            if text.is_empty() {
                continue;
            }
            out.push(build_candidate(
                CandidateSource { variant, mode },
                &baseline,
                text,
            ));
        }
    }
    Ok(out)
}

/// Lexicographic preselection key; larger is better. Strict comparison
/// keeps the earlier candidate on ties, preserving priority order.
struct SelectionKey {
    script_ok: bool,
    tail_quality: (i32, i32, i32),
    diacritics: usize,
    similarity: f32,
    len_closeness: f32,
    len: usize,
}

impl SelectionKey {
    fn beats(&self, other: &SelectionKey) -> bool {
        (
            self.script_ok,
            self.tail_quality,
            self.diacritics,
        )
            .cmp(&(other.script_ok, other.tail_quality, other.diacritics))
            .then_with(|| self.similarity.total_cmp(&other.similarity))
            .then_with(|| self.len_closeness.total_cmp(&other.len_closeness))
            .then_with(|| self.len.cmp(&other.len))
            .is_gt()
    }
}

fn selection_key(baseline: &str, baseline_has_tibetan: bool, cand: &Candidate) -> SelectionKey {
    let text = &cand.text;
    let script_ok = !has_devanagari(text) && (!baseline_has_tibetan || has_tibetan(text));
    // Tibetan-headword lines prioritize cleaner romanization tails; other
    // lines only script safety, diacritics, and alignment.
    let tail_quality = if baseline_has_tibetan {
        crate::processors::text::roman_tail_quality(text)
    } else {
        (-1, -9999, -1)
    };
    let len_closeness = if baseline.is_empty() {
        -1.0
    } else {
        let ratio = text.chars().count() as f32 / baseline.chars().count() as f32;
        -(ratio - 1.0).abs()
    };
    SelectionKey {
        script_ok,
        tail_quality,
        diacritics: diacritic_count(text),
        similarity: cand.similarity,
        len_closeness,
        len: text.chars().count(),
    }
}

/// Preselects the best candidate for a line before the gate runs.
/// Returns the winning index, or `None` when the list is empty.
pub fn choose_best(baseline: &str, candidates: &[Candidate]) -> Option<usize> {
    let baseline = normalize_text(baseline);
    let has_tib = has_tibetan(&baseline);
    let mut best: Option<(usize, SelectionKey)> = None;
    for (i, cand) in candidates.iter().enumerate() {
        let key = selection_key(&baseline, has_tib, cand);
        match &best {
            Some((_, best_key)) if !key.beats(best_key) => {}
            _ => best = Some((i, key)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SegmentationMode;

    fn cand(text: &str, baseline: &str) -> Candidate {
        build_candidate(
            CandidateSource {
                variant: CropVariant::Raw,
                mode: SegmentationMode(7),
            },
            baseline,
            text.to_string(),
        )
    }

    #[test]
    fn heuristic_targets_transliteration_lines() {
        let m = CandidateMode::Heuristic;
        assert!(is_candidate_line("བཀྲ་ཤིས་ bkra śis", m));
        assert!(is_candidate_line("dṅos po yod", m));
        assert!(is_candidate_line("tshig gi don", m));
        // German prose carrying `ts`/`ch` clusters is still a candidate;
        // the gate sorts those out later.
        assert!(is_candidate_line("nur deutscher Satz", m));
        assert!(!is_candidate_line("nur reine Worte", m));
        assert!(!is_candidate_line("བོད་ཡིག་", m));
    }

    #[test]
    fn all_latin_mode_is_broad() {
        assert!(is_candidate_line("nur reine Worte", CandidateMode::AllLatin));
        assert!(!is_candidate_line("བོད་ཡིག་", CandidateMode::AllLatin));
    }

    #[test]
    fn script_mismatch_loses_selection() {
        let baseline = "བཀྲ་ཤིས་ bkra sis";
        let cands = vec![cand("bkra śis", baseline), cand("བཀྲ་ཤིས་ bkra śis", baseline)];
        // The first candidate dropped the Tibetan script; the second keeps it.
        assert_eq!(choose_best(baseline, &cands), Some(1));
    }

    #[test]
    fn richer_diacritics_win_on_latin_lines() {
        let baseline = "dnos po";
        let cands = vec![cand("dnos po", baseline), cand("dṅos po", baseline)];
        assert_eq!(choose_best(baseline, &cands), Some(1));
    }

    #[test]
    fn ties_keep_priority_order() {
        let baseline = "lta ba";
        let cands = vec![cand("lta ba", baseline), cand("lta ba", baseline)];
        assert_eq!(choose_best(baseline, &cands), Some(0));
    }

    #[test]
    fn empty_candidate_list_selects_nothing() {
        assert_eq!(choose_best("lta ba", &[]), None);
    }

    #[test]
    fn anchor_recorded_when_tibetan_matches() {
        let baseline = "བཀྲ་ཤིས་ bkra sis";
        let c = cand("བཀྲ་ཤིས་ bkra śis", baseline);
        assert_eq!(c.anchor.as_deref(), Some("བཀྲཤིས"));
        let c2 = cand("bkra śis", baseline);
        assert!(c2.anchor.is_none());
    }
}
