//! Geometry-anchored merge of two OCR passes over scanned dictionary pages
//! that mix Tibetan script, romanized Tibetan, and German prose.
//!
//! Pass A is the trusted page-level layout pass; pass B re-reads single
//! lines with segmentation modes tuned for transliteration. The merge
//! keeps A's line geometry and text, and replaces a line with a B
//! candidate only when the candidate survives the similarity-and-gain
//! gate. Merged lines then pass through scope-gated normalization and
//! confusable cleanup, with every change recorded in audit rows.
//!
//! # Main APIs
//!
//! - [`MergePipeline`](merge::MergePipeline) - Per-page two-pass merge over
//!   a [`LineRecognizer`](merge::LineRecognizer)
//! - [`MergeConfig`](core::MergeConfig) - Thresholds, candidate mode, and
//!   output options
//! - [`VariantAggregator`](variants::VariantAggregator) - Corpus-wide
//!   variant families and rewrite proposals
//! - [`ApprovedRewrites`](variants::ApprovedRewrites) - The reviewed
//!   rewrite table and its guarded application

pub mod core;
pub mod domain;
pub mod merge;
pub mod processors;
pub mod variants;

pub use crate::core::{MergeConfig, MergeError, MergeResult};
pub use crate::domain::{Candidate, Decision, LineRecord, Page, Reason, Scope, TokenChange};
pub use crate::merge::{LineInput, LineRecognizer, MergePipeline, PageResult, RecognizerOutcome};
