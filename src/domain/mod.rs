//! Data model of the two-pass merge.
//!
//! These types are produced once per physical line and consumed read-only by
//! every downstream component: span classification happens exactly once, and
//! the normalizer never re-derives scope on its own.

use serde::{Deserialize, Serialize};

use crate::core::config::{CropVariant, SegmentationMode};

/// Bounding geometry of one physical line, from the structural pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineBox {
    /// Left edge, pixels.
    pub x0: u32,
    /// Top edge, pixels.
    pub y0: u32,
    /// Right edge, pixels.
    pub x1: u32,
    /// Bottom edge, pixels.
    pub y1: u32,
}

impl LineBox {
    /// Creates a bounding box from corner coordinates.
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self { x0, y0, x1, y1 }
    }
}

/// Identifies which crop variant and segmentation mode produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSource {
    /// The crop-image variant.
    pub variant: CropVariant,
    /// The segmentation mode.
    pub mode: SegmentationMode,
}

impl std::fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.variant.as_str(), self.mode)
    }
}

/// One re-OCR result for a line, from one crop variant under one
/// segmentation mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Which variant/mode pair produced this text.
    pub source: CandidateSource,
    /// The raw candidate text (whitespace-normalized).
    pub text: String,
    /// Normalized similarity against the baseline, 1.0 = identical.
    pub similarity: f32,
    /// Whether the candidate carries more diacritics than the baseline.
    pub diacritic_gain: bool,
    /// Alignment evidence tying this candidate to the baseline's Tibetan
    /// source syllables, when their stripped anchors match.
    pub anchor: Option<String>,
}

/// Reason code attached to every gate decision. Stable snake_case wire names
/// appear in the audit tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// The line was not selected for re-OCR at all.
    NonCandidate,
    /// No variant/mode pair produced any text (timeouts or empty crops).
    NoCandidate,
    /// The chosen candidate text was empty.
    EmptyCandidate,
    /// The candidate leaked Devanagari into a Tibetan/Latin line.
    UnexpectedDevanagari,
    /// The candidate dropped the baseline's Tibetan script.
    LostTibetanScript,
    /// Candidate length diverged too far from the baseline.
    LengthRatioOutOfRange,
    /// Similarity below every applicable threshold.
    SimilarityTooLow,
    /// Similarity passed but the candidate adds no genuine correction. The
    /// dominant expected rejection; logged distinctly from similarity
    /// failures so the limiting factor stays auditable.
    NoDiacriticGain,
    /// Accepted: candidate adds diacritics at general-threshold similarity.
    DiacriticGain,
    /// Accepted: baseline and candidate share one diacritic-stripped
    /// skeleton and differ only in diacritics/confusables.
    DiacriticOnlyGain,
    /// Accepted: supported by a matching Tibetan-script anchor.
    TibetanAnchorGain,
    /// Accepted: candidate removes known OCR confusables at near-identity
    /// similarity.
    ConfusableGain,
    /// Accepted: same Tibetan anchor and a measurably cleaner romanization
    /// tail.
    HeadwordTailCleanup,
    /// Accepted: Tibetan prefix kept from the baseline, romanization tail
    /// spliced in from the candidate.
    TibetanPrefixSplice,
    /// A proposed corpus-wide rewrite had no matching approved entry.
    NotApproved,
}

impl Reason {
    /// Stable wire name used in audit rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::NonCandidate => "non_candidate",
            Reason::NoCandidate => "no_candidate",
            Reason::EmptyCandidate => "empty_candidate",
            Reason::UnexpectedDevanagari => "unexpected_devanagari",
            Reason::LostTibetanScript => "lost_tibetan_script",
            Reason::LengthRatioOutOfRange => "length_ratio_out_of_range",
            Reason::SimilarityTooLow => "similarity_too_low",
            Reason::NoDiacriticGain => "no_diacritic_gain",
            Reason::DiacriticGain => "diacritic_gain",
            Reason::DiacriticOnlyGain => "diacritic_only_gain",
            Reason::TibetanAnchorGain => "tibetan_anchor_gain",
            Reason::ConfusableGain => "confusable_gain",
            Reason::HeadwordTailCleanup => "headword_tail_cleanup",
            Reason::TibetanPrefixSplice => "tibetan_prefix_splice",
            Reason::NotApproved => "not_approved",
        }
    }

    /// Whether this reason accepts a replacement.
    pub fn is_accept(&self) -> bool {
        matches!(
            self,
            Reason::DiacriticGain
                | Reason::DiacriticOnlyGain
                | Reason::TibetanAnchorGain
                | Reason::ConfusableGain
                | Reason::HeadwordTailCleanup
                | Reason::TibetanPrefixSplice
        )
    }
}

/// Trust level of a token rewrite. Only `High` changes are applied
/// automatically outside manual review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    /// Anchor evidence present, or an exact approved-rewrite match.
    High,
    /// Conservative but unanchored; surfaced for review.
    Medium,
    /// Speculative; surfaced for review only.
    Low,
}

impl ConfidenceTier {
    /// Stable wire name used in audit rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::High => "high",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::Low => "low",
        }
    }
}

/// Final gate decision for a line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Whether a candidate replaced the baseline.
    pub accepted: bool,
    /// Why.
    pub reason: Reason,
    /// Index into the line's candidate list, when accepted.
    pub chosen: Option<usize>,
    /// Similarity of the chosen (or best rejected) candidate.
    pub similarity: f32,
    /// Confidence tier of the decision.
    pub tier: ConfidenceTier,
}

impl Decision {
    /// A rejection with the given reason and similarity.
    pub fn reject(reason: Reason, similarity: f32) -> Self {
        Self {
            accepted: false,
            reason,
            chosen: None,
            similarity,
            tier: ConfidenceTier::Low,
        }
    }

    /// An acceptance of candidate `chosen` with the given reason.
    pub fn accept(reason: Reason, chosen: usize, similarity: f32, tier: ConfidenceTier) -> Self {
        Self {
            accepted: true,
            reason,
            chosen: Some(chosen),
            similarity,
            tier,
        }
    }
}

/// One physical line: baseline text, geometry, candidates, decision, and the
/// final merged text. Exactly one record per line, in reading order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineRecord {
    /// Baseline text from the structural pass.
    pub baseline: String,
    /// Bounding geometry from the structural pass.
    pub bbox: LineBox,
    /// Re-OCR candidates in priority order.
    pub candidates: Vec<Candidate>,
    /// The gate's decision.
    pub decision: Decision,
    /// The final text after merge, normalization, and confusable cleanup.
    pub final_text: String,
}

/// An ordered sequence of line records for one page. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page number.
    pub number: u32,
    /// Lines in reading order (top to bottom).
    pub lines: Vec<LineRecord>,
}

impl Page {
    /// The page's text, one final line per physical line.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&line.final_text);
        }
        out
    }
}

/// Script/position type of a span. Fixed once classified; no rewrite changes
/// a span's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanType {
    /// Tibetan-script text (headwords, tsheg-separated syllables).
    TibetanScript,
    /// Romanized-Tibetan transliteration following a Tibetan headword.
    Romanization,
    /// Other Latin text (German prose, bibliography, names).
    Latin,
}

impl SpanType {
    /// Stable wire name used in audit rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanType::TibetanScript => "tibetan_script",
            SpanType::Romanization => "romanization",
            SpanType::Latin => "latin",
        }
    }
}

/// Linguistic rule-set domain a span or rewrite belongs to. Rewrites never
/// cross scopes, even when token skeletons coincide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Romanized-Tibetan transliteration.
    Romanization,
    /// Sanskrit terms and IAST transliteration.
    Sanskrit,
    /// German prose.
    German,
    /// Bibliographic names and citations.
    BibliographyName,
}

impl Scope {
    /// Stable wire name used in audit rows and the approval sheet.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Romanization => "romanization",
            Scope::Sanskrit => "sanskrit",
            Scope::German => "german",
            Scope::BibliographyName => "bibliography_name",
        }
    }
}

/// Block-level context of a line, derived from its surrounding lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContext {
    /// Tibetan script appears in the window.
    pub tibetan: bool,
    /// Romanization tails appear in the window.
    pub romanization: bool,
    /// Sanskrit markers or Sanskritic tokens appear in the window.
    pub sanskrit: bool,
    /// The window looks like a bibliography section.
    pub bibliography: bool,
    /// German prose dominates the window.
    pub german_dominant: bool,
}

impl BlockContext {
    /// Compact wire form for audit rows, e.g. `"tibetan+sanskrit"`.
    pub fn summary(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if self.tibetan {
            parts.push("tibetan");
        }
        if self.romanization {
            parts.push("romanization");
        }
        if self.sanskrit {
            parts.push("sanskrit");
        }
        if self.bibliography {
            parts.push("bibliography");
        }
        if self.german_dominant {
            parts.push("german");
        }
        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join("+")
        }
    }
}

/// A contiguous, typed substring of a line's final text. Spans are ordered,
/// non-overlapping, and partition the full line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    /// Script/position type. Fixed once classified.
    pub kind: SpanType,
    /// Rule-set scope the span belongs to. `None` for Tibetan script, which
    /// is never rewritten.
    pub scope: Option<Scope>,
    /// Surrounding block context.
    pub block: BlockContext,
    /// Byte offset of the span start in the line.
    pub start: usize,
    /// Byte offset one past the span end.
    pub end: usize,
}

/// Identifies the normalization rule that produced a token change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    /// `$` standing in for `ś`.
    DollarSAcute,
    /// Isolated `pa'` restored to `pa'i`.
    PaApostrophe,
    /// Mis-recognized `ñù` pair collapsed to `ṅ`.
    NTildeGravePair,
    /// Positional `ñ`/`ń` repaired to `ṅ` in syllable-final positions.
    NFinalDotted,
    /// `ä`/`ü` repaired to `ā`/`ū` in Sanskrit-evidence tokens.
    UmlautMacron,
    /// Cedilla/tilde confusions repaired to retroflex/long forms.
    CedillaRetroflex,
    /// Digit/symbol noise token dropped from a romanization span.
    NoiseTokenDrop,
    /// Stray currency/negation symbols removed.
    StraySymbolDrop,
    /// Dotless `ı` restored to `i`.
    DotlessI,
    /// Dotted n restored from the aligned Tibetan syllable containing NGA.
    NgFromTibetanPrefix,
    /// Fixed-order confusable word substitution (post-merge cleanup).
    ConfusableWord,
    /// An approved corpus-wide rewrite.
    ApprovedRewrite,
}

impl RuleId {
    /// Stable wire name used in audit rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::DollarSAcute => "dollar_s_acute",
            RuleId::PaApostrophe => "pa_apostrophe",
            RuleId::NTildeGravePair => "n_tilde_grave_pair",
            RuleId::NFinalDotted => "n_final_dotted",
            RuleId::UmlautMacron => "umlaut_macron",
            RuleId::CedillaRetroflex => "cedilla_retroflex",
            RuleId::NoiseTokenDrop => "noise_token_drop",
            RuleId::StraySymbolDrop => "stray_symbol_drop",
            RuleId::DotlessI => "dotless_i",
            RuleId::NgFromTibetanPrefix => "ng_from_tibetan_prefix",
            RuleId::ConfusableWord => "confusable_word",
            RuleId::ApprovedRewrite => "approved_rewrite",
        }
    }
}

/// One token-level rewrite, recorded for every selected non-identity change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenChange {
    /// Page number.
    pub page: u32,
    /// 1-based line number within the page.
    pub line: u32,
    /// Type of the span the change originated in.
    pub span_type: SpanType,
    /// Scope of the originating span; always equals the rewrite's scope.
    pub scope: Scope,
    /// Block context of the originating line.
    pub block: BlockContext,
    /// Token surface before the rewrite.
    pub before: String,
    /// Token surface after the rewrite.
    pub after: String,
    /// The rule that produced the change.
    pub rule: RuleId,
    /// Confidence tier gating automatic application.
    pub tier: ConfidenceTier,
    /// Anchor evidence: the aligned Tibetan syllable, when present.
    pub anchor: Option<String>,
}

/// Level at which an approved rewrite may be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyLevel {
    /// Whole-token replacement only.
    Token,
    /// Replacement anywhere inside a span of the declared scope.
    Span,
    /// Replacement anywhere inside a line whose spans include the scope.
    Line,
}

/// Pattern side of an approved rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewritePattern {
    /// Exact token/substring match.
    Literal(String),
    /// Regular-expression match (compiled at load time).
    Regex(String),
}

/// A human-approved, scope-bound rewrite. The only legal source of
/// corpus-wide, non-line-local rewrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedRewrite {
    /// Scope the rewrite is confined to.
    pub scope: Scope,
    /// What to match.
    pub pattern: RewritePattern,
    /// Replacement text.
    pub replacement: String,
    /// Application granularity.
    pub apply_level: ApplyLevel,
}

/// One member of a variant family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyMember {
    /// Surface form as seen in the corpus.
    pub surface: String,
    /// Occurrence count.
    pub count: u64,
    /// Present in the configured authority list.
    pub authority: bool,
    /// Script/diacritic validity (no suspect symbols or mixed noise).
    pub validity: bool,
}

/// Token surface forms sharing one normalized skeleton within one scope.
/// Families are never merged across scopes, even when skeletons coincide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantFamily {
    /// Scope partition.
    pub scope: Scope,
    /// The shared normalized skeleton.
    pub skeleton: String,
    /// Members ranked by frequency, authority, and validity.
    pub members: Vec<FamilyMember>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_wire_names_are_stable() {
        assert_eq!(Reason::NoDiacriticGain.as_str(), "no_diacritic_gain");
        assert_eq!(Reason::TibetanAnchorGain.as_str(), "tibetan_anchor_gain");
        assert_eq!(Reason::NoCandidate.as_str(), "no_candidate");
        assert_eq!(Reason::NotApproved.as_str(), "not_approved");
    }

    #[test]
    fn accept_reasons_are_accepting() {
        assert!(Reason::TibetanAnchorGain.is_accept());
        assert!(Reason::DiacriticGain.is_accept());
        assert!(!Reason::NoDiacriticGain.is_accept());
        assert!(!Reason::SimilarityTooLow.is_accept());
    }

    #[test]
    fn block_context_summary_is_compact() {
        let block = BlockContext {
            tibetan: true,
            sanskrit: true,
            ..Default::default()
        };
        assert_eq!(block.summary(), "tibetan+sanskrit");
        assert_eq!(BlockContext::default().summary(), "none");
    }

    #[test]
    fn candidate_source_display() {
        use crate::core::config::{CropVariant, SegmentationMode};
        let source = CandidateSource {
            variant: CropVariant::Up2xAuto,
            mode: SegmentationMode(7),
        };
        assert_eq!(source.to_string(), "up2x_auto_psm7");
    }
}
