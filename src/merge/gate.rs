//! The similarity-and-gain gate.
//!
//! Every preselected candidate passes through [`gate_candidate`], which
//! either accepts it with an evidence-bearing reason or rejects it with a
//! diagnostic one. Rejections are the normal case; the dominant expected
//! reason is `no_diacritic_gain` (the candidate read fine but corrected
//! nothing), which is kept distinct from similarity failures so the audit
//! tables show which factor is limiting.

use crate::core::MergeConfig;
use crate::domain::{Candidate, ConfidenceTier, Reason};
use crate::processors::similarity::similarity;
use crate::processors::text::{
    diacritic_count, fold_confusables_for_compare, has_devanagari, has_latin, has_tibetan,
    is_extended_letter, merge_skeleton, normalize_text, suspect_count, tail_suspect_count,
    tibetan_anchor, tibetan_prefix_len, translit_tail_after_tibetan,
};

/// Outcome of gating one candidate against one baseline.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    /// Why the candidate was accepted or rejected.
    pub reason: Reason,
    /// The candidate's similarity against the baseline.
    pub similarity: f32,
    /// The replacement text when accepted. Differs from the candidate's own
    /// text only for the prefix-splice rescue.
    pub replacement: Option<String>,
}

/// Romanization-slot quality `(letters, -suspects, diacritics)`. Lines
/// without a Tibetan prefix are measured whole.
fn quality_score(s: &str) -> (i32, i32, i32) {
    let target = if has_tibetan(s) {
        translit_tail_after_tibetan(s).unwrap_or("")
    } else {
        s
    };
    let letters = target.chars().filter(|&c| is_extended_letter(c)).count() as i32;
    (
        letters,
        -(tail_suspect_count(target) as i32),
        diacritic_count(target) as i32,
    )
}

/// Obvious OCR junk pressure in the romanization slot (or the whole line
/// when there is no Tibetan prefix).
fn noise_score(s: &str) -> i32 {
    let target = if has_tibetan(s) {
        translit_tail_after_tibetan(s).unwrap_or("")
    } else {
        s
    };
    target
        .chars()
        .filter(|&c| c.is_ascii_digit() || matches!(c, ':' | '/' | '%' | '$'))
        .count() as i32
        + tail_suspect_count(target) as i32
}

/// The gate decision tree. Evidence classes relax the similarity bar in
/// order: general, diacritic-only, Tibetan-anchor.
pub fn should_replace(baseline: &str, cand: &Candidate, config: &MergeConfig) -> (Reason, f32) {
    let a = normalize_text(baseline);
    let b = normalize_text(&cand.text);
    if b.is_empty() {
        return (Reason::EmptyCandidate, 0.0);
    }
    if has_devanagari(&b) {
        return (Reason::UnexpectedDevanagari, 0.0);
    }
    if has_tibetan(&a) && !has_tibetan(&b) {
        return (Reason::LostTibetanScript, 0.0);
    }
    if !a.is_empty() {
        let ratio = b.chars().count() as f32 / a.chars().count() as f32;
        if !(0.5..=1.8).contains(&ratio) {
            return (Reason::LengthRatioOutOfRange, 0.0);
        }
    }

    let sim = cand.similarity;
    let (a_d, b_d) = (diacritic_count(&a), diacritic_count(&b));
    let text_anchor = tibetan_anchor(&a);
    let anchor_ok = cand.anchor.is_some()
        || (!text_anchor.is_empty() && text_anchor == tibetan_anchor(&b));

    if b_d > a_d {
        if sim >= config.min_similarity {
            return (Reason::DiacriticGain, sim);
        }
        if sim >= config.min_similarity_diacritic_only {
            if merge_skeleton(&a) == merge_skeleton(&b) {
                return (Reason::DiacriticOnlyGain, sim);
            }
            if anchor_ok {
                return (Reason::TibetanAnchorGain, sim);
            }
            return (Reason::SimilarityTooLow, sim);
        }
        if sim >= config.min_similarity_tibetan_anchor && anchor_ok {
            return (Reason::TibetanAnchorGain, sim);
        }
        return (Reason::SimilarityTooLow, sim);
    }

    // High-confidence confusable improvements carry no diacritic gain.
    if sim >= config.min_similarity.max(0.92)
        && suspect_count(&a) > suspect_count(&b)
        && fold_confusables_for_compare(&a) == fold_confusables_for_compare(&b)
    {
        return (Reason::ConfusableGain, sim);
    }

    // Anchored cleanup: same Tibetan source, measurably cleaner slot.
    if anchor_ok && sim >= config.min_similarity_tibetan_anchor {
        let (a_q, b_q) = (quality_score(&a), quality_score(&b));
        let (a_n, b_n) = (noise_score(&a), noise_score(&b));
        if b_q > a_q
            && ((b_q.1 - a_q.1 >= 1 || b_q.2 > a_q.2)
                || (a_n >= 2 && b_n < a_n && b_q.0 - a_q.0 >= 2 && b_q.1 >= a_q.1))
        {
            return (Reason::HeadwordTailCleanup, sim);
        }
        if b_n < a_n && b_q >= a_q {
            return (Reason::TibetanAnchorGain, sim);
        }
    }

    if sim >= config.min_similarity_diacritic_only
        && merge_skeleton(&a) == merge_skeleton(&b)
        && (a_d > 0 || b_d > 0)
    {
        return (Reason::DiacriticOnlyGain, sim);
    }

    (Reason::NoDiacriticGain, sim)
}

/// Prefix-splice rescue: when the candidate dropped the Tibetan script but
/// reads a cleaner romanization, keep the baseline's Tibetan prefix and
/// splice the candidate in as the tail.
pub fn maybe_splice_tibetan_prefix_with_b_tail(
    a_text: &str,
    b_text: &str,
    min_similarity_tibetan_anchor: f32,
) -> Option<String> {
    let a = normalize_text(a_text);
    let b = normalize_text(b_text);
    if a.is_empty() || b.is_empty() || has_tibetan(&b) || !has_latin(&b) {
        return None;
    }
    let plen = tibetan_prefix_len(&a)?;
    let prefix = &a[..plen];
    let a_tail = a[plen..].trim();
    if a_tail.is_empty() {
        return None;
    }
    let ratio = b.chars().count() as f32 / a_tail.chars().count() as f32;
    if !(0.55..=1.8).contains(&ratio) {
        return None;
    }
    let sim = similarity(&merge_skeleton(a_tail), &merge_skeleton(&b));
    if sim < min_similarity_tibetan_anchor {
        return None;
    }
    let suspects_drop = tail_suspect_count(a_tail) > tail_suspect_count(&b);
    let diacritics_gain = diacritic_count(&b) > diacritic_count(a_tail);
    if !(suspects_drop || diacritics_gain) {
        return None;
    }
    let joiner = if prefix.ends_with(' ') { "" } else { " " };
    Some(format!("{prefix}{joiner}{b}").trim_end().to_string())
}

/// Confidence tier of a line-level gate outcome. Acceptance already required
/// the threshold matching the candidate's evidence class, so accepted
/// decisions are `High`; token-level rewrites compute their tier from their
/// own evidence instead.
pub fn tier_for(reason: Reason) -> ConfidenceTier {
    if reason.is_accept() {
        ConfidenceTier::High
    } else {
        ConfidenceTier::Low
    }
}

/// Gates one candidate, applying the splice rescue when the plain decision
/// was `lost_tibetan_script`.
pub fn gate_candidate(baseline: &str, cand: &Candidate, config: &MergeConfig) -> GateOutcome {
    let (reason, sim) = should_replace(baseline, cand, config);
    if reason == Reason::LostTibetanScript {
        if let Some(spliced) = maybe_splice_tibetan_prefix_with_b_tail(
            baseline,
            &cand.text,
            config.min_similarity_tibetan_anchor,
        ) {
            return GateOutcome {
                reason: Reason::TibetanPrefixSplice,
                similarity: sim,
                replacement: Some(spliced),
            };
        }
    }
    let replacement = reason
        .is_accept()
        .then(|| normalize_text(&cand.text));
    GateOutcome {
        reason,
        similarity: sim,
        replacement,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CropVariant, SegmentationMode};
    use crate::domain::CandidateSource;
    use crate::processors::similarity;

    fn config() -> MergeConfig {
        MergeConfig::default()
    }

    fn cand(text: &str, baseline: &str) -> Candidate {
        let sim = similarity::similarity(&normalize_text(baseline), &normalize_text(text));
        cand_with(text, sim, None)
    }

    fn cand_with(text: &str, sim: f32, anchor: Option<&str>) -> Candidate {
        Candidate {
            source: CandidateSource {
                variant: CropVariant::Raw,
                mode: SegmentationMode(7),
            },
            text: text.to_string(),
            similarity: sim,
            diacritic_gain: false,
            anchor: anchor.map(str::to_string),
        }
    }

    #[test]
    fn empty_candidate_rejected() {
        let (reason, _) = should_replace("lta ba", &cand("", "lta ba"), &config());
        assert_eq!(reason, Reason::EmptyCandidate);
    }

    #[test]
    fn devanagari_leak_rejected() {
        let (reason, _) = should_replace("lta ba", &cand("lta ba धर्म", "lta ba"), &config());
        assert_eq!(reason, Reason::UnexpectedDevanagari);
    }

    #[test]
    fn lost_tibetan_rejected_without_rescue() {
        let baseline = "བཀྲ་ཤིས་ bkra sis pa yin no";
        let c = cand("bkra sis pa yin no", baseline);
        let (reason, _) = should_replace(baseline, &c, &config());
        assert_eq!(reason, Reason::LostTibetanScript);
        // The candidate neither adds diacritics nor drops suspects, so the
        // splice rescue declines too.
        let out = gate_candidate(baseline, &c, &config());
        assert_eq!(out.reason, Reason::LostTibetanScript);
        assert!(out.replacement.is_none());
    }

    #[test]
    fn splice_rescue_keeps_tibetan_prefix() {
        let baseline = "བཀྲ་ཤིས་ bkra sis pa yin no";
        let c = cand("bkra śis pa yin no", baseline);
        let out = gate_candidate(baseline, &c, &config());
        assert_eq!(out.reason, Reason::TibetanPrefixSplice);
        assert_eq!(
            out.replacement.as_deref(),
            Some("བཀྲ་ཤིས་ bkra śis pa yin no")
        );
    }

    #[test]
    fn length_ratio_window_enforced() {
        let (reason, _) = should_replace(
            "lta ba",
            &cand("lta ba daṅ bcas pa thams cad", "lta ba"),
            &config(),
        );
        assert_eq!(reason, Reason::LengthRatioOutOfRange);
    }

    #[test]
    fn diacritic_gain_at_general_threshold() {
        let baseline = "sems can thams cad la dnos po";
        let c = cand("sems can thams cad la dṅos po", baseline);
        let (reason, sim) = should_replace(baseline, &c, &config());
        assert_eq!(reason, Reason::DiacriticGain);
        assert!(sim >= 0.85);
    }

    #[test]
    fn diacritic_only_between_thresholds_needs_equal_skeleton() {
        let baseline = "dnos po";
        let c = cand_with("dṅos po", 0.80, None);
        let (reason, _) = should_replace(baseline, &c, &config());
        assert_eq!(reason, Reason::DiacriticOnlyGain);
        // Different words at the same similarity stay rejected.
        let c2 = cand_with("dṅul po", 0.80, None);
        let (reason2, _) = should_replace(baseline, &c2, &config());
        assert_eq!(reason2, Reason::SimilarityTooLow);
    }

    #[test]
    fn anchor_relaxes_threshold_with_diacritic_gain() {
        let baseline = "བཀྲ་ཤིས་ bkra sjis pa";
        let c = cand_with("བཀྲ་ཤིས་ bkra śis pa", 0.75, None);
        let (reason, _) = should_replace(baseline, &c, &config());
        assert_eq!(reason, Reason::TibetanAnchorGain);
    }

    #[test]
    fn scenario_anchored_cleanup() {
        // Baseline with trailing scan junk; the candidate reads the same
        // syllables cleanly and carries external anchor evidence.
        let baseline = "bde leg s'0";
        let c = cand_with("bde legs", 0.81, Some("བདེལེགས"));
        let (reason, sim) = should_replace(baseline, &c, &config());
        assert_eq!(reason, Reason::TibetanAnchorGain);
        assert!((sim - 0.81).abs() < f32::EPSILON);
    }

    #[test]
    fn scenario_case_only_variant_rejected() {
        let baseline = "bde Legs so";
        let c = cand_with("bde legs so", 1.0, None);
        let (reason, sim) = should_replace(baseline, &c, &config());
        assert_eq!(reason, Reason::NoDiacriticGain);
        assert!((sim - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn confusable_gain_at_near_identity() {
        let baseline = "sems can thams cad Ita";
        let c = cand("sems can thams cad lta", baseline);
        let (reason, sim) = should_replace(baseline, &c, &config());
        assert_eq!(reason, Reason::ConfusableGain);
        assert!(sim >= 0.92);
    }

    #[test]
    fn accepted_reasons_are_high_tier() {
        assert_eq!(tier_for(Reason::DiacriticGain), ConfidenceTier::High);
        assert_eq!(tier_for(Reason::TibetanPrefixSplice), ConfidenceTier::High);
        assert_eq!(tier_for(Reason::NoDiacriticGain), ConfidenceTier::Low);
    }
}
