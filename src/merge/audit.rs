//! Audit emission: per-line audit rows, per-page summaries, token-change
//! rows, anomaly rows, and the advisory reports.
//!
//! Every decision the pipeline makes lands in one of these tables, rejected
//! candidates included. The writers serialize over any [`std::io::Write`],
//! so tests can capture CSV output in memory.

use std::io;

use serde::Serialize;

use crate::core::MergeResult;
use crate::domain::{Page, Reason, TokenChange};
use crate::processors::spans::line_zones;
use crate::processors::text::{
    has_digit_run, has_repeated_digit, is_alnum_mixed, is_suspect_symbol, is_tibetan,
    token_looks_sanskritic, WORD_RE,
};

/// One row of the per-line audit table. Every physical line gets exactly one
/// row, whether or not it was a candidate.
#[derive(Debug, Clone, Serialize)]
pub struct LineAuditRow {
    /// Page number.
    pub page: u32,
    /// 1-based line number within the page.
    pub line: u32,
    /// 1 when the line was selected for re-OCR.
    pub candidate: u8,
    /// 1 when a candidate replaced the baseline.
    pub replaced: u8,
    /// Reason wire name from the gate decision.
    pub reason: String,
    /// Source id of the winning candidate (e.g. `raw_psm7`), with a
    /// `+splice` suffix for the prefix-splice rescue. Empty when no
    /// candidate was chosen.
    pub b_source: String,
    /// Similarity of the decided candidate, 4 decimal places.
    pub similarity: String,
    /// Baseline text before the merge.
    pub before: String,
    /// Final text after merge, normalization, and confusable cleanup.
    pub after: String,
}

/// One row of the per-page summary table.
#[derive(Debug, Clone, Serialize)]
pub struct PageSummaryRow {
    /// Page number.
    pub page: u32,
    /// Total physical lines on the page.
    pub lines_total: u32,
    /// Lines selected for re-OCR.
    pub lines_candidate: u32,
    /// Lines where a candidate replaced the baseline.
    pub lines_replaced: u32,
    /// Replacement rate over candidates, 4 decimal places, `0.0000` when the
    /// page had no candidates.
    pub replace_rate_candidates: String,
}

impl PageSummaryRow {
    /// Builds the summary row for one page from its line records.
    pub fn for_page(page: &Page) -> Self {
        let lines_total = page.lines.len() as u32;
        let lines_candidate = page
            .lines
            .iter()
            .filter(|l| l.decision.reason != Reason::NonCandidate)
            .count() as u32;
        let lines_replaced = page.lines.iter().filter(|l| l.decision.accepted).count() as u32;
        Self {
            page: page.number,
            lines_total,
            lines_candidate,
            lines_replaced,
            replace_rate_candidates: if lines_candidate > 0 {
                format!("{:.4}", lines_replaced as f64 / lines_candidate as f64)
            } else {
                "0.0000".to_string()
            },
        }
    }
}

/// Flat CSV form of a [`TokenChange`].
#[derive(Debug, Clone, Serialize)]
pub struct TokenChangeRow {
    /// Page number.
    pub page: u32,
    /// 1-based line number within the page.
    pub line: u32,
    /// Wire name of the originating span type.
    pub span_type: &'static str,
    /// Wire name of the rewrite's scope.
    pub scope: &'static str,
    /// Compact block-context summary, e.g. `tibetan+sanskrit`.
    pub block: String,
    /// Token surface before the rewrite.
    pub before: String,
    /// Token surface after the rewrite.
    pub after: String,
    /// Wire name of the rule that produced the change.
    pub rule: &'static str,
    /// Confidence tier wire name.
    pub tier: &'static str,
    /// Aligned Tibetan syllable, when the rule had anchor evidence.
    pub anchor: String,
}

impl From<&TokenChange> for TokenChangeRow {
    fn from(change: &TokenChange) -> Self {
        Self {
            page: change.page,
            line: change.line,
            span_type: change.span_type.as_str(),
            scope: change.scope.as_str(),
            block: change.block.summary(),
            before: change.before.clone(),
            after: change.after.clone(),
            rule: change.rule.as_str(),
            tier: change.tier.as_str(),
            anchor: change.anchor.clone().unwrap_or_default(),
        }
    }
}

/// One row of the anomaly table: a token the pipeline left alone but a human
/// should look at.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyRow {
    /// Page number.
    pub page: u32,
    /// 1-based line number within the page.
    pub line: u32,
    /// Anomaly kind, e.g. `digit_run` or `sanskrit_umlaut_candidate`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// The flagged token.
    pub token: String,
    /// The full line the token appears in.
    pub context: String,
    /// Comma-joined sorted zone labels of the line.
    pub zones: String,
}

/// Scans one final line for report-only anomalies. Nothing here changes the
/// text; the rows exist so the conservative rules stay conservative.
pub fn collect_anomalies(page: u32, line_no: u32, text: &str) -> Vec<AnomalyRow> {
    let mut rows = Vec::new();
    let zones = line_zones(text).labels();
    let mut push = |kind: &'static str, token: &str| {
        rows.push(AnomalyRow {
            page,
            line: line_no,
            kind,
            token: token.to_string(),
            context: text.to_string(),
            zones: zones.clone(),
        });
    };
    for m in WORD_RE.find_iter(text) {
        let tok = m.as_str();
        if tok.chars().any(|c| matches!(c, 'ä' | 'Ä' | 'ü' | 'Ü')) && token_looks_sanskritic(tok) {
            push("sanskrit_umlaut_candidate", tok);
        }
    }
    for tok in text.split_whitespace() {
        if has_digit_run(tok) {
            push("digit_run", tok);
        }
        if has_repeated_digit(tok) {
            push("repeated_digit", tok);
        }
        if is_alnum_mixed(tok) {
            push("alnum_mixed", tok);
        }
        if tok.chars().any(is_suspect_symbol) {
            push("suspect_symbol", tok);
        }
        if tok.contains('ù') || tok.contains('Ù') {
            push("u_grave_marker", tok);
        }
    }
    rows
}

/// Whether a codepoint falls in the phonetic-alphabet blocks the diacritic
/// pass sometimes leaks (IPA extensions, phonetic extensions, Latin
/// Extended-C).
pub fn is_flagged_phonetic(c: char) -> bool {
    matches!(
        c,
        '\u{0250}'..='\u{02AF}'
            | '\u{1D00}'..='\u{1D7F}'
            | '\u{1D80}'..='\u{1DBF}'
            | '\u{2C60}'..='\u{2C7F}'
    )
}

/// Advisory report on phonetic-block codepoints in a text. Report-only: the
/// scan never filters or rewrites anything.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlaggedCodepointReport {
    /// Total flagged codepoints.
    pub char_count: usize,
    /// Number of lines containing at least one flagged codepoint.
    pub line_hits: usize,
    /// Up to [`MAX_FLAGGED_SAMPLES`] affected lines, with 1-based numbers.
    pub samples: Vec<(usize, String)>,
}

/// Sample-line cap for [`scan_flagged_codepoints`].
pub const MAX_FLAGGED_SAMPLES: usize = 5;

/// Scans a text for phonetic-block codepoints.
pub fn scan_flagged_codepoints(text: &str) -> FlaggedCodepointReport {
    let mut report = FlaggedCodepointReport {
        char_count: text.chars().filter(|&c| is_flagged_phonetic(c)).count(),
        ..Default::default()
    };
    for (i, line) in text.lines().enumerate() {
        if line.chars().any(is_flagged_phonetic) {
            report.line_hits += 1;
            if report.samples.len() < MAX_FLAGGED_SAMPLES {
                report.samples.push((i + 1, line.to_string()));
            }
        }
    }
    report
}

/// One row of the pass-comparison table: structural metrics of the same page
/// under both passes, plus a conservative merge suggestion.
#[derive(Debug, Clone, Serialize)]
pub struct PassPageRow {
    /// 1-based page number.
    pub page: u32,
    /// Line count on the structural pass.
    pub a_lines: u32,
    /// Line count on the diacritic pass.
    pub b_lines: u32,
    /// B/A line ratio, 4 decimal places.
    pub line_ratio_b_over_a: String,
    /// Character count on the structural pass.
    pub a_chars: u32,
    /// Character count on the diacritic pass.
    pub b_chars: u32,
    /// B/A character ratio, 4 decimal places.
    pub char_ratio_b_over_a: String,
    /// Tibetan character count on the structural pass.
    pub a_tib: u32,
    /// Tibetan character count on the diacritic pass.
    pub b_tib: u32,
    /// B/A Tibetan ratio, 4 decimal places.
    pub tib_ratio_b_over_a: String,
    /// `use_A` or `candidate_use_B`.
    pub suggestion: &'static str,
}

/// Result of comparing two whole-volume passes page by page.
#[derive(Debug, Clone, Default)]
pub struct PassComparison {
    /// One metrics row per shared page.
    pub rows: Vec<PassPageRow>,
    /// Pages where the diacritic pass looks structurally usable.
    pub candidate_b_pages: Vec<u32>,
    /// Pages with large structural divergence, for manual review.
    pub review_pages: Vec<u32>,
}

fn page_counts(text: &str) -> (u32, u32, u32) {
    let lines = text.matches('\n').count() as u32 + u32::from(!text.is_empty());
    let chars = text.chars().count() as u32;
    let tib = text.chars().filter(|&c| is_tibetan(c)).count() as u32;
    (lines, chars, tib)
}

/// Compares two volume passes page by page and emits a conservative merge
/// suggestion per page: default to the structural pass unless the diacritic
/// pass has more Tibetan and similar layout density.
///
/// # Arguments
///
/// * `a_pages` - Page texts of the structural pass.
/// * `b_pages` - Page texts of the diacritic pass.
/// * `min_line_ratio` - Minimum B/A line ratio to allow B (pilot: 0.85).
/// * `min_tib_gain` - Minimum B/A Tibetan multiplier to allow B (pilot: 1.05).
pub fn compare_pass_pages<S: AsRef<str>>(
    a_pages: &[S],
    b_pages: &[S],
    min_line_ratio: f64,
    min_tib_gain: f64,
) -> PassComparison {
    let mut out = PassComparison::default();
    let n = a_pages.len().min(b_pages.len());
    for i in 0..n {
        let (a_lines, a_chars, a_tib) = page_counts(a_pages[i].as_ref());
        let (b_lines, b_chars, b_tib) = page_counts(b_pages[i].as_ref());
        let line_ratio = if a_lines > 0 {
            b_lines as f64 / a_lines as f64
        } else {
            1.0
        };
        let char_ratio = if a_chars > 0 {
            b_chars as f64 / a_chars as f64
        } else {
            1.0
        };
        let tib_ratio = if a_tib > 0 {
            b_tib as f64 / a_tib as f64
        } else if b_tib > 0 {
            2.0
        } else {
            1.0
        };
        let page = (i + 1) as u32;
        let suggestion = if line_ratio >= min_line_ratio && tib_ratio >= min_tib_gain {
            out.candidate_b_pages.push(page);
            "candidate_use_B"
        } else {
            "use_A"
        };
        if !(0.75..=1.25).contains(&line_ratio) {
            out.review_pages.push(page);
        }
        out.rows.push(PassPageRow {
            page,
            a_lines,
            b_lines,
            line_ratio_b_over_a: format!("{line_ratio:.4}"),
            a_chars,
            b_chars,
            char_ratio_b_over_a: format!("{char_ratio:.4}"),
            a_tib,
            b_tib,
            tib_ratio_b_over_a: format!("{tib_ratio:.4}"),
            suggestion,
        });
    }
    out
}

fn write_rows<W: io::Write, R: Serialize>(writer: W, rows: &[R]) -> MergeResult<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes the per-line audit table as CSV.
pub fn write_line_audit<W: io::Write>(writer: W, rows: &[LineAuditRow]) -> MergeResult<()> {
    write_rows(writer, rows)
}

/// Writes the per-page summary table as CSV.
pub fn write_page_summary<W: io::Write>(writer: W, rows: &[PageSummaryRow]) -> MergeResult<()> {
    write_rows(writer, rows)
}

/// Writes the token-change table as CSV.
pub fn write_token_changes<W: io::Write>(writer: W, changes: &[TokenChange]) -> MergeResult<()> {
    let rows: Vec<TokenChangeRow> = changes.iter().map(TokenChangeRow::from).collect();
    write_rows(writer, &rows)
}

/// Writes the anomaly table as CSV.
pub fn write_anomalies<W: io::Write>(writer: W, rows: &[AnomalyRow]) -> MergeResult<()> {
    write_rows(writer, rows)
}

/// Writes the pass-comparison table as CSV.
pub fn write_pass_comparison<W: io::Write>(writer: W, rows: &[PassPageRow]) -> MergeResult<()> {
    write_rows(writer, rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anomaly_scan_flags_digit_runs_and_symbols() {
        let rows = collect_anomalies(3, 7, "gźi 4000 £ abc123");
        let kinds: Vec<&str> = rows.iter().map(|r| r.kind).collect();
        assert!(kinds.contains(&"digit_run"));
        assert!(kinds.contains(&"repeated_digit"));
        assert!(kinds.contains(&"suspect_symbol"));
        assert!(kinds.contains(&"alnum_mixed"));
        assert!(rows.iter().all(|r| r.page == 3 && r.line == 7));
    }

    #[test]
    fn anomaly_scan_flags_sanskrit_umlaut_candidates() {
        let rows = collect_anomalies(1, 1, "die Lehre des Dharmakäya");
        assert!(rows
            .iter()
            .any(|r| r.kind == "sanskrit_umlaut_candidate" && r.token == "Dharmakäya"));
        // Plain German umlauts are not flagged.
        let rows = collect_anomalies(1, 2, "über die Lehre");
        assert!(rows.iter().all(|r| r.kind != "sanskrit_umlaut_candidate"));
    }

    #[test]
    fn flagged_codepoint_scan_counts_and_samples() {
        let report = scan_flagged_codepoints("lta ba\nze\u{0250}ro\nplain\n\u{1D00}x");
        assert_eq!(report.char_count, 2);
        assert_eq!(report.line_hits, 2);
        assert_eq!(report.samples.len(), 2);
        assert_eq!(report.samples[0].0, 2);
    }

    #[test]
    fn pass_comparison_suggests_b_on_tibetan_gain() {
        let a = vec!["abc def\nghi".to_string()];
        let b = vec!["abc def\nགཅིག་གཉིས".to_string()];
        let cmp = compare_pass_pages(&a, &b, 0.85, 1.05);
        assert_eq!(cmp.rows[0].suggestion, "candidate_use_B");
        assert_eq!(cmp.candidate_b_pages, vec![1]);
        assert!(cmp.review_pages.is_empty());
    }

    #[test]
    fn pass_comparison_reviews_structural_divergence() {
        let a = vec!["a\nb\nc\nd".to_string()];
        let b = vec!["a".to_string()];
        let cmp = compare_pass_pages(&a, &b, 0.85, 1.05);
        assert_eq!(cmp.rows[0].suggestion, "use_A");
        assert_eq!(cmp.review_pages, vec![1]);
    }

    #[test]
    fn csv_writer_emits_headers_and_rows() {
        let rows = vec![LineAuditRow {
            page: 1,
            line: 1,
            candidate: 1,
            replaced: 0,
            reason: "no_diacritic_gain".to_string(),
            b_source: "raw_psm7".to_string(),
            similarity: "0.9100".to_string(),
            before: "lta ba".to_string(),
            after: "lta ba".to_string(),
        }];
        let mut buf = Vec::new();
        write_line_audit(&mut buf, &rows).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("page,line,candidate,replaced,reason,b_source,"));
        assert!(text.contains("no_diacritic_gain"));
    }
}
