//! The page-level merge pipeline.
//!
//! Two phases per page. Phase one runs per line, in parallel: candidate
//! selection, harvest, preselection, and the gate. Phase two runs over the
//! decided line texts in order, because block context looks at neighboring
//! lines: span classification, scope-gated normalization, the confusable
//! cleanup, and audit emission.

use std::collections::BTreeSet;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::core::{MergeConfig, MergeError, MergeResult};
use crate::domain::{
    Candidate, ConfidenceTier, Decision, LineBox, LineRecord, Page, Reason, TokenChange,
};
use crate::merge::audit::{collect_anomalies, AnomalyRow, LineAuditRow, PageSummaryRow};
use crate::merge::gate::{gate_candidate, tier_for};
use crate::merge::source::{
    choose_best, harvest_candidates, is_candidate_line, LineInput, LineRecognizer,
};
use crate::processors::confusables::cleanup_confusables;
use crate::processors::normalize::{builtin_pair_approved, normalize_line, TokenEdit};
use crate::processors::spans::{classify_block_context, split_spans};
use crate::processors::text::{is_extended_letter, line_is_translit_heavy, normalize_text};

/// Lines of surrounding context considered on each side when classifying a
/// line's block.
const CONTEXT_WINDOW: usize = 2;

/// Everything the pipeline produced for one page.
#[derive(Debug, Clone)]
pub struct PageResult {
    /// The line records, one per physical line.
    pub page: Page,
    /// The page text, after optional dehyphenation. Differs from
    /// [`Page::text`] only when wrapped lines were joined.
    pub text: String,
    /// Per-line audit rows, in line order.
    pub audit: Vec<LineAuditRow>,
    /// Token-level rewrites selected by the normalizer and the confusable
    /// cleanup.
    pub changes: Vec<TokenChange>,
    /// Anomaly rows, when the anomaly report is enabled.
    pub anomalies: Vec<AnomalyRow>,
    /// The page's summary row.
    pub summary: PageSummaryRow,
}

/// Outcome of phase one for a single line.
struct DecidedLine {
    baseline: String,
    bbox: LineBox,
    candidates: Vec<Candidate>,
    decision: Decision,
    b_source: String,
    text: String,
}

/// The two-pass merge pipeline. One immutable instance serves a whole run.
#[derive(Debug, Clone)]
pub struct MergePipeline {
    config: MergeConfig,
}

impl MergePipeline {
    /// Creates a pipeline after validating the configuration.
    pub fn new(config: MergeConfig) -> MergeResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The pipeline's configuration.
    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Phase one for one line: selection, harvest, preselection, gate.
    fn decide_line(
        &self,
        line: &LineInput,
        recognizer: &(dyn LineRecognizer + Sync),
    ) -> MergeResult<DecidedLine> {
        let baseline = normalize_text(&line.text);
        if !is_candidate_line(&baseline, self.config.candidate_mode) {
            return Ok(DecidedLine {
                text: baseline.clone(),
                baseline,
                bbox: line.bbox,
                candidates: Vec::new(),
                decision: Decision::reject(Reason::NonCandidate, 0.0),
                b_source: String::new(),
            });
        }
        let candidates = harvest_candidates(line, &self.config, recognizer)?;
        let Some(chosen) = choose_best(&baseline, &candidates) else {
            return Ok(DecidedLine {
                text: baseline.clone(),
                baseline,
                bbox: line.bbox,
                candidates,
                decision: Decision::reject(Reason::NoCandidate, 0.0),
                b_source: String::new(),
            });
        };
        let outcome = gate_candidate(&baseline, &candidates[chosen], &self.config);
        let mut b_source = candidates[chosen].source.to_string();
        let (text, decision) = match outcome.replacement {
            Some(replacement) => {
                if outcome.reason == Reason::TibetanPrefixSplice {
                    b_source.push_str("+splice");
                }
                debug!(
                    reason = outcome.reason.as_str(),
                    similarity = outcome.similarity,
                    source = %b_source,
                    "candidate accepted"
                );
                (
                    replacement,
                    Decision::accept(
                        outcome.reason,
                        chosen,
                        outcome.similarity,
                        tier_for(outcome.reason),
                    ),
                )
            }
            None => (
                baseline.clone(),
                Decision::reject(outcome.reason, outcome.similarity),
            ),
        };
        Ok(DecidedLine {
            baseline,
            bbox: line.bbox,
            candidates,
            decision,
            b_source,
            text,
        })
    }

    /// Processes one page end to end.
    ///
    /// # Arguments
    ///
    /// * `number` - 1-based page number.
    /// * `lines` - Structural-pass lines in reading order.
    /// * `recognizer` - The diacritic-pass line recognizer.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::MalformedGeometry`] when `lines` is empty, and
    /// propagates recognizer errors.
    pub fn process_page(
        &self,
        number: u32,
        lines: &[LineInput],
        recognizer: &(dyn LineRecognizer + Sync),
    ) -> MergeResult<PageResult> {
        if lines.is_empty() {
            return Err(MergeError::MalformedGeometry { page: number });
        }

        let decided: Vec<DecidedLine> = lines
            .par_iter()
            .map(|line| self.decide_line(line, recognizer))
            .collect::<MergeResult<Vec<_>>>()?;

        let decided_texts: Vec<String> = decided.iter().map(|d| d.text.clone()).collect();
        let mut records = Vec::with_capacity(decided.len());
        let mut audit = Vec::with_capacity(decided.len());
        let mut changes = Vec::new();
        let mut anomalies = Vec::new();
        let mut final_lines = Vec::with_capacity(decided.len());

        for (i, d) in decided.into_iter().enumerate() {
            let line_no = (i + 1) as u32;
            let block = classify_block_context(&decided_texts, i, CONTEXT_WINDOW);
            let spans = split_spans(&d.text, block);
            let rewrite = normalize_line(&d.text, &spans);
            let (final_text, confusable_edits) = cleanup_confusables(&rewrite.text);
            let final_text = normalize_text(&final_text);

            for placed in rewrite.edits {
                // Tibetan-script spans have no scope and are never edited.
                let Some(scope) = placed.scope else { continue };
                let tier = tier_for_edit(&placed.edit);
                changes.push(TokenChange {
                    page: number,
                    line: line_no,
                    span_type: placed.span_type,
                    scope,
                    block,
                    before: placed.edit.before,
                    after: placed.edit.after,
                    rule: placed.edit.rule,
                    tier,
                    anchor: placed.edit.anchor,
                });
            }
            // The cleanup ran on the normalized text, so its offsets are
            // located against a fresh span split of that text.
            let cleanup_spans = split_spans(&rewrite.text, block);
            for (offset, edit) in confusable_edits {
                let span = cleanup_spans
                    .iter()
                    .find(|s| s.start <= offset && offset < s.end);
                let Some(span) = span else { continue };
                let Some(scope) = span.scope else { continue };
                let tier = tier_for_edit(&edit);
                changes.push(TokenChange {
                    page: number,
                    line: line_no,
                    span_type: span.kind,
                    scope,
                    block,
                    before: edit.before,
                    after: edit.after,
                    rule: edit.rule,
                    tier,
                    anchor: edit.anchor,
                });
            }
            if self.config.anomaly_report {
                anomalies.extend(collect_anomalies(number, line_no, &final_text));
            }

            audit.push(LineAuditRow {
                page: number,
                line: line_no,
                candidate: u8::from(d.decision.reason != Reason::NonCandidate),
                replaced: u8::from(d.decision.accepted),
                reason: d.decision.reason.as_str().to_string(),
                b_source: d.b_source,
                similarity: format!("{:.4}", d.decision.similarity),
                before: d.baseline.clone(),
                after: final_text.clone(),
            });
            records.push(LineRecord {
                baseline: d.baseline,
                bbox: d.bbox,
                candidates: d.candidates,
                decision: d.decision,
                final_text: final_text.clone(),
            });
            final_lines.push(final_text);
        }

        if self.config.dehyphenate_wrap {
            final_lines = dehyphenate_wrapped_lines(&final_lines);
        }

        let page = Page {
            number,
            lines: records,
        };
        let summary = PageSummaryRow::for_page(&page);
        info!(
            page = number,
            lines = summary.lines_total,
            candidates = summary.lines_candidate,
            replaced = summary.lines_replaced,
            "page merged"
        );
        Ok(PageResult {
            page,
            text: final_lines.join("\n"),
            audit,
            changes,
            anomalies,
            summary,
        })
    }

    /// Joins page texts with the configured page separator.
    pub fn join_pages<S: AsRef<str>>(&self, pages: &[S]) -> String {
        pages
            .iter()
            .map(|p| p.as_ref())
            .collect::<Vec<_>>()
            .join(self.config.page_separator.as_str())
    }
}

/// Confidence tier of one applied token rewrite. Anchor evidence or a
/// built-in approved pair applies at `High`; anything else is held at
/// `Medium` for review.
fn tier_for_edit(edit: &TokenEdit) -> ConfidenceTier {
    if edit.anchor.is_some() || builtin_pair_approved(edit.rule, &edit.before, &edit.after) {
        ConfidenceTier::High
    } else {
        ConfidenceTier::Medium
    }
}

/// Which pass a page was taken from in a page-level selection merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassSource {
    /// The structural pass.
    A,
    /// The diacritic pass.
    B,
}

impl PassSource {
    /// Wire name used in the provenance log.
    pub fn as_str(&self) -> &'static str {
        match self {
            PassSource::A => "A",
            PassSource::B => "B",
        }
    }
}

/// Page-level selection merge: takes each page from the pass the reviewed
/// page list names, defaulting to the structural pass. Returns the merged
/// page texts and a per-page provenance log.
pub fn merge_pages_by_selection<S: AsRef<str>>(
    a_pages: &[S],
    b_pages: &[S],
    use_b: &BTreeSet<u32>,
) -> (Vec<String>, Vec<(u32, PassSource)>) {
    let n = a_pages.len().min(b_pages.len());
    let mut merged = Vec::with_capacity(n);
    let mut log = Vec::with_capacity(n);
    for i in 0..n {
        let page = (i + 1) as u32;
        let source = if use_b.contains(&page) {
            PassSource::B
        } else {
            PassSource::A
        };
        let text = match source {
            PassSource::A => a_pages[i].as_ref(),
            PassSource::B => b_pages[i].as_ref(),
        };
        merged.push(text.to_string());
        log.push((page, source));
    }
    (merged, log)
}

/// Whether a dehyphenation stem is usable: the letter run before the final
/// hyphen must contain an ASCII letter.
fn dehyph_stem(line: &str) -> Option<&str> {
    let stem = line.strip_suffix('-')?;
    let run: Vec<char> = stem
        .chars()
        .rev()
        .take_while(|&c| is_extended_letter(c))
        .collect();
    (!run.is_empty() && run.iter().any(char::is_ascii_alphabetic)).then_some(stem)
}

/// Joins lines ending in a wrap hyphen with a lowercase continuation on the
/// next line. Transliteration-heavy lines are left alone; a hyphen there is
/// usually lexical, not a wrap.
pub fn dehyphenate_wrapped_lines(lines: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        let cur = &lines[i];
        if i + 1 < lines.len() {
            let nxt = &lines[i + 1];
            if !cur.is_empty()
                && !nxt.is_empty()
                && !line_is_translit_heavy(cur)
                && !line_is_translit_heavy(nxt)
            {
                if let Some(stem) = dehyph_stem(cur.trim_end()) {
                    let cont = nxt.trim_start();
                    if cont
                        .chars()
                        .next()
                        .is_some_and(|c| matches!(c, 'a'..='z' | 'ä' | 'ö' | 'ü'))
                    {
                        out.push(format!("{stem}{cont}"));
                        i += 2;
                        continue;
                    }
                }
            }
        }
        out.push(cur.clone());
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::core::{CropVariant, SegmentationMode};
    use crate::domain::{RuleId, Scope, SpanType};
    use crate::merge::source::RecognizerOutcome;

    /// Replays fixed texts for the raw/psm7 pair; every other pair fails.
    struct MapRecognizer {
        replies: HashMap<String, String>,
    }

    impl MapRecognizer {
        fn new(pairs: &[(&str, &str)]) -> Self {
            Self {
                replies: pairs
                    .iter()
                    .map(|&(a, b)| (a.to_string(), b.to_string()))
                    .collect(),
            }
        }
    }

    impl LineRecognizer for MapRecognizer {
        fn recognize(
            &self,
            line: &LineInput,
            variant: CropVariant,
            mode: SegmentationMode,
            _timeout: Duration,
        ) -> MergeResult<RecognizerOutcome> {
            if variant == CropVariant::Raw && mode == SegmentationMode(7) {
                if let Some(text) = self.replies.get(&line.text) {
                    return Ok(RecognizerOutcome::Text(text.clone()));
                }
            }
            Ok(RecognizerOutcome::Failed)
        }
    }

    fn input(text: &str) -> LineInput {
        LineInput {
            bbox: LineBox::new(0, 0, 100, 20),
            text: text.to_string(),
        }
    }

    fn pipeline() -> MergePipeline {
        MergePipeline::new(MergeConfig::default()).unwrap()
    }

    #[test]
    fn empty_page_is_malformed_geometry() {
        let rec = MapRecognizer::new(&[]);
        let err = pipeline().process_page(4, &[], &rec).unwrap_err();
        assert!(matches!(err, MergeError::MalformedGeometry { page: 4 }));
    }

    #[test]
    fn non_candidate_lines_pass_through() {
        let rec = MapRecognizer::new(&[]);
        let result = pipeline()
            .process_page(1, &[input("nur reine Worte")], &rec)
            .unwrap();
        let row = &result.audit[0];
        assert_eq!(row.candidate, 0);
        assert_eq!(row.replaced, 0);
        assert_eq!(row.reason, "non_candidate");
        assert_eq!(result.page.lines[0].final_text, "nur reine Worte");
        assert_eq!(result.summary.lines_candidate, 0);
    }

    #[test]
    fn diacritic_gain_replaces_line() {
        let baseline = "sems can thams cad la dnos po";
        let rec = MapRecognizer::new(&[(baseline, "sems can thams cad la dṅos po")]);
        let result = pipeline().process_page(1, &[input(baseline)], &rec).unwrap();
        let row = &result.audit[0];
        assert_eq!(row.replaced, 1);
        assert_eq!(row.reason, "diacritic_gain");
        assert_eq!(row.b_source, "raw_psm7");
        assert_eq!(
            result.page.lines[0].final_text,
            "sems can thams cad la dṅos po"
        );
        assert_eq!(result.summary.replace_rate_candidates, "1.0000");
    }

    #[test]
    fn no_candidate_recorded_when_harvest_is_dry() {
        let rec = MapRecognizer::new(&[]);
        let result = pipeline()
            .process_page(1, &[input("dṅos po yod")], &rec)
            .unwrap();
        let row = &result.audit[0];
        assert_eq!(row.candidate, 1);
        assert_eq!(row.replaced, 0);
        assert_eq!(row.reason, "no_candidate");
    }

    #[test]
    fn normalization_runs_after_merge_and_records_changes() {
        let baseline = "ལྟ་བ་ Ita ba";
        let rec = MapRecognizer::new(&[]);
        let result = pipeline().process_page(2, &[input(baseline)], &rec).unwrap();
        assert_eq!(result.page.lines[0].final_text, "ལྟ་བ་ lta ba");
        let change = result
            .changes
            .iter()
            .find(|c| c.rule == RuleId::ConfusableWord)
            .expect("confusable change");
        assert_eq!(change.before, "Ita");
        assert_eq!(change.after, "lta");
        assert_eq!(change.page, 2);
        assert_eq!(change.line, 1);
        assert_eq!(change.tier, ConfidenceTier::High);
        assert_eq!(change.scope, Scope::Romanization);
    }

    #[test]
    fn cleanup_changes_carry_their_span_attribution() {
        // A Sanskrit-labeled line with no Tibetan prefix is a single Latin
        // span; the cleanup fix is attributed there, not to romanization.
        let rec = MapRecognizer::new(&[]);
        let result = pipeline()
            .process_page(1, &[input("Skt. Ita iti smṛti")], &rec)
            .unwrap();
        assert_eq!(result.page.lines[0].final_text, "Skt. lta iti smṛti");
        let change = result
            .changes
            .iter()
            .find(|c| c.before == "Ita")
            .expect("cleanup change");
        assert_eq!(change.span_type, SpanType::Latin);
        assert_eq!(change.scope, Scope::German);
        assert_eq!(change.tier, ConfidenceTier::High);
    }

    #[test]
    fn splice_rescue_tags_the_source() {
        let baseline = "བཀྲ་ཤིས་ bkra sis pa yin no";
        let rec = MapRecognizer::new(&[(baseline, "bkra śis pa yin no")]);
        let result = pipeline().process_page(1, &[input(baseline)], &rec).unwrap();
        let row = &result.audit[0];
        assert_eq!(row.reason, "tibetan_prefix_splice");
        assert_eq!(row.b_source, "raw_psm7+splice");
        assert_eq!(
            result.page.lines[0].final_text,
            "བཀྲ་ཤིས་ bkra śis pa yin no"
        );
    }

    #[test]
    fn dehyphenation_joins_wrapped_german_lines() {
        let lines = vec![
            "die Unterwei-".to_string(),
            "sung der Schüler".to_string(),
            "bkra śis daṅ-".to_string(),
            "ldan pa".to_string(),
        ];
        let out = dehyphenate_wrapped_lines(&lines);
        assert_eq!(out[0], "die Unterweisung der Schüler");
        // Transliteration lines keep their hyphen.
        assert_eq!(out[1], "bkra śis daṅ-");
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn page_selection_merge_logs_provenance() {
        let a = vec!["page one A".to_string(), "page two A".to_string()];
        let b = vec!["page one B".to_string(), "page two B".to_string()];
        let use_b = BTreeSet::from([2]);
        let (merged, log) = merge_pages_by_selection(&a, &b, &use_b);
        assert_eq!(merged, vec!["page one A", "page two B"]);
        assert_eq!(log, vec![(1, PassSource::A), (2, PassSource::B)]);
    }

    #[test]
    fn join_pages_uses_configured_separator() {
        let p = pipeline();
        assert_eq!(p.join_pages(&["a", "b"]), "a\u{0C}b");
    }
}
