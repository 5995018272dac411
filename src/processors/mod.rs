//! Text-processing stages shared by the merge pipeline.
//!
//! The stages are pure functions over line text: character/token helpers
//! ([`text`]), similarity scoring ([`similarity`]), zone and span
//! classification ([`spans`]), scope-gated normalization ([`normalize`]),
//! and the final confusable cleanup ([`confusables`]).

pub mod confusables;
pub mod normalize;
pub mod similarity;
pub mod spans;
pub mod text;

pub use confusables::cleanup_confusables;
pub use normalize::{
    builtin_pair_approved, drop_roman_tail_noise, normalize_line, rewrite_span, LineEdit,
    LineRewrite, RuleSet, SpanRewrite, TokenEdit,
};
pub use similarity::{diacritic_gain, similarity};
pub use spans::{
    classify_block_context, in_ranges, is_bibliography_line, line_zones, sanskrit_marker_ranges,
    split_spans, LineZones,
};
