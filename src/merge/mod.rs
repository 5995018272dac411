//! The two-pass merge: candidate production, the similarity-and-gain gate,
//! the page pipeline, and audit emission.

pub mod audit;
pub mod gate;
pub mod pipeline;
pub mod source;

pub use audit::{
    collect_anomalies, compare_pass_pages, scan_flagged_codepoints, write_anomalies,
    write_line_audit, write_page_summary, write_pass_comparison, write_token_changes, AnomalyRow,
    FlaggedCodepointReport, LineAuditRow, PageSummaryRow, PassComparison, PassPageRow,
    TokenChangeRow,
};
pub use gate::{gate_candidate, maybe_splice_tibetan_prefix_with_b_tail, should_replace, GateOutcome};
pub use pipeline::{
    dehyphenate_wrapped_lines, merge_pages_by_selection, MergePipeline, PageResult, PassSource,
};
pub use source::{
    choose_best, harvest_candidates, is_candidate_line, LineInput, LineRecognizer,
    RecognizerOutcome,
};
