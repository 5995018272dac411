//! Corpus-wide variant families and the approved-rewrite table.
//!
//! The aggregation side groups Latin token surfaces by `(scope, skeleton)`,
//! ranks the members, and emits conservative rewrite proposals with risk
//! tiers. Nothing here touches the text: a proposal becomes a corpus-wide
//! rewrite only through the human-reviewed approved table, and even an
//! approved pair is applied scope-gated with per-pair guardrails.

use std::collections::{HashMap, HashSet};
use std::io;

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use unicode_normalization::UnicodeNormalization;

use crate::core::{MergeError, MergeResult};
use crate::domain::{
    ApplyLevel, ApprovedRewrite, FamilyMember, Reason, RewritePattern, RuleId, Scope,
    VariantFamily,
};
use crate::processors::normalize::TokenEdit;
use crate::processors::spans::{in_ranges, is_bibliography_line, sanskrit_marker_ranges};
use crate::processors::text::{
    has_tibetan, is_iast_diacritic, normalize_text, strip_diacritic, WORD_RE,
};

/// Romanization cues without the `ch`/`ng` clusters: those are too common in
/// German to key scope on.
static ROMAN_CUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[āīūṛṝḷḹṅñṭḍṇśṣḥṃṁź'\u{2019}]|kh|tsh|ts|ph|th|dh|bh|rdz|dz")
        .expect("roman cue")
});

/// Cluster shapes that mark a lowercase token as plausibly transliteration.
static CLUSTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"kh|tsh|ts|ph|th|dh|bh|rdz|dz|ng|ny").expect("cluster"));

/// Lowercase transliteration shape.
static TRANSLIT_SHAPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zāīūṛṝḷḹṅñṭḍṇśṣḥṃṁź'\u{2019}\-]+$").expect("translit shape")
});

/// Capitalized name shape (possibly hyphen-doubled), German letters allowed.
static TITLE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-ZÄÖÜ][A-Za-zÄÖÜäöüß]+(?:-[A-ZÄÖÜ][A-Za-zÄÖÜäöüß]+)*$").expect("title name")
});

/// Simple surname shape used by the quality score.
static SURNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-ZÄÖÜ][a-zäöüß]+(?:-[A-ZÄÖÜ][a-zäöüß]+)?$").expect("surname")
});

/// Symbols and digits that make a surface form invalid as a family winner.
static SYMBOL_OR_DIGIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\d€£¬¥¢§¤@#%^&*_=/\\|~]").expect("symbol or digit"));

static IAST_COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[āīūṛṝḷḹṅñṭḍṇśṣḥṃṁź]").expect("iast"));

/// Known risky-pair guardrail patterns for `gan` -> `gaṅ`.
static GAN_BLOCK_PATTERNS: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r"(?i)\bna\s+gan\s+s[āa]n\b").expect("gan pattern"),
        Regex::new(r"(?i)\bca\s+gan\s+\(skt\.").expect("gan pattern"),
    ]
});

const GAN_BLOCK_HINTS: &[&str] = &["türk.-mong.", "turk.-mong.", "qayan"];

/// German function words that must stay German even right next to Tibetan.
const GERMAN_STOPWORDS: &[&str] = &[
    "der", "die", "das", "den", "dem", "des", "und", "oder", "ein", "eine", "einer", "einem",
    "ich", "du", "er", "sie", "wir", "ihr", "wie", "mit", "von", "für", "auf", "ist", "sind",
    "war", "hat", "haben", "nicht", "auch", "zu", "im", "in", "am", "an",
];

/// Folds the known single-character OCR confusions toward their intended
/// transliteration forms.
fn fold_confusable(c: char) -> char {
    match c {
        '$' => 'ś',
        'ı' => 'i',
        'I' => 'l',
        'ş' => 'ṣ',
        'Ş' => 'Ṣ',
        'ņ' => 'ṇ',
        'Ņ' => 'Ṇ',
        'ã' | 'ä' => 'ā',
        'Ã' | 'Ä' => 'Ā',
        'ù' | 'ñ' | 'ń' => 'ṅ',
        'ü' => 'ū',
        'Ü' => 'Ū',
        _ => c,
    }
}

/// The canonical skeleton of a token: NFC, confusables folded, diacritics
/// stripped, casefolded, apostrophes and hyphens removed. Two surfaces with
/// the same skeleton in the same scope form a variant family.
pub fn canon_key(tok: &str) -> String {
    let mut out = String::with_capacity(tok.len());
    for c in tok.nfc() {
        let c = fold_confusable(c);
        let c = strip_diacritic(c);
        let c = match c {
            'ö' => 'o',
            'Ö' => 'O',
            _ => c,
        };
        if matches!(c, '\'' | '\u{2019}' | '-') {
            continue;
        }
        out.extend(c.to_lowercase());
    }
    out
}

fn char_window(line: &str, start: usize, end: usize, radius: usize) -> &str {
    let mut ws = start;
    for _ in 0..radius {
        match line[..ws].chars().next_back() {
            Some(c) => ws -= c.len_utf8(),
            None => break,
        }
    }
    let mut we = end;
    for _ in 0..radius {
        match line[we..].chars().next() {
            Some(c) => we += c.len_utf8(),
            None => break,
        }
    }
    &line[ws..we]
}

fn has_german_letter(tok: &str) -> bool {
    tok.chars()
        .any(|c| matches!(c, 'ä' | 'ö' | 'ü' | 'Ä' | 'Ö' | 'Ü' | 'ß'))
}

/// Scope of one token occurrence, from line- and neighborhood-level
/// evidence. Bibliographic lines dominate; a Sanskrit marker range wins
/// next; then the Tibetan neighborhood, then name shape.
pub fn scope_for_token(line: &str, start: usize, end: usize) -> Scope {
    if is_bibliography_line(line) {
        return Scope::BibliographyName;
    }
    if in_ranges(start, &sanskrit_marker_ranges(line)) {
        return Scope::Sanskrit;
    }

    let tok = &line[start..end];
    let window = char_window(line, start, end, 24);
    let near_tibetan = has_tibetan(window);
    let tok_lower = tok.to_lowercase();

    if near_tibetan && GERMAN_STOPWORDS.contains(&tok_lower.as_str()) {
        return Scope::German;
    }
    if near_tibetan && (ROMAN_CUE_RE.is_match(tok) || tok.chars().any(is_iast_diacritic)) {
        return Scope::Romanization;
    }
    if near_tibetan
        && TRANSLIT_SHAPE_RE.is_match(&tok_lower)
        && (CLUSTER_RE.is_match(&tok_lower) || tok_lower.contains('\''))
    {
        return Scope::Romanization;
    }
    if TITLE_NAME_RE.is_match(tok) && !has_german_letter(tok) {
        return Scope::BibliographyName;
    }
    Scope::German
}

/// Heuristic quality of a surface form within its scope. Used only to rank
/// family members of equal frequency and to compute review deltas.
pub fn token_quality_score(tok: &str, scope: Scope) -> i32 {
    let mut score = 0;
    if SYMBOL_OR_DIGIT_RE.is_match(tok) {
        score -= 20;
    }
    if tok.contains('ı') {
        score -= 12;
    }
    if tok.contains('$') {
        score -= 15;
    }
    if tok.contains('ù') || tok.contains('¬') {
        score -= 12;
    }
    match scope {
        Scope::Romanization | Scope::Sanskrit => {
            score += 2 * IAST_COUNT_RE.find_iter(tok).count() as i32;
            if TRANSLIT_SHAPE_RE.is_match(&tok.to_lowercase()) {
                score += 6;
            }
            if has_german_letter(tok) {
                score -= 6;
            }
        }
        Scope::BibliographyName => {
            if SURNAME_RE.is_match(tok) {
                score += 5;
            }
            if IAST_COUNT_RE.is_match(tok) {
                score += 1;
            }
        }
        Scope::German => {
            if has_german_letter(tok) {
                score += 3;
            }
            if IAST_COUNT_RE.is_match(tok) {
                score -= 1;
            }
        }
    }
    score
}

/// Whether a proposed `src -> dst` rewrite is driven by the known OCR
/// confusions alone. Rejects anything needing more than two character edits
/// beyond confusable folding.
pub fn conservative_pair_allowed(src: &str, dst: &str, scope: Scope) -> bool {
    if src == dst || src.chars().count() < 3 || dst.chars().count() < 3 {
        return false;
    }
    if scope == Scope::BibliographyName && src.to_lowercase() == dst.to_lowercase() {
        return true;
    }
    let sa: Vec<char> = src.chars().map(fold_confusable).collect();
    let sb: Vec<char> = dst.chars().map(fold_confusable).collect();
    if sa == sb {
        return true;
    }
    if canon_key(src) != canon_key(dst) {
        return false;
    }
    let shared = sa.len().min(sb.len());
    let diffs = (0..shared).filter(|&i| sa[i] != sb[i]).count() + sa.len().abs_diff(sb.len());
    diffs <= 2
}

/// Review risk of a rewrite proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    /// Conservative pair with a dominant winner.
    Low,
    /// Conservative pair without winner dominance.
    Medium,
    /// Not explainable by known confusions alone.
    High,
}

impl RiskTier {
    /// Stable wire name used in the proposal sheet.
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        }
    }
}

/// One row of the rewrite-proposal sheet. Proposals never change text; they
/// exist to be reviewed into the approved table.
#[derive(Debug, Clone, Serialize)]
pub struct RewriteProposal {
    /// Scope partition the family lives in.
    pub scope: Scope,
    /// The shared canonical skeleton.
    pub skeleton: String,
    /// The losing surface form.
    pub from: String,
    /// The family's winning surface form.
    pub to: String,
    /// Occurrences of the losing form.
    pub from_count: u64,
    /// Occurrences of the winning form.
    pub to_count: u64,
    /// Winner share of the family total.
    pub winner_share: f64,
    /// Winner-minus-runner-up share of the family total.
    pub winner_gap: f64,
    /// `share + gap/2`, capped at 0.99.
    pub confidence: f64,
    /// Review risk tier.
    pub risk: RiskTier,
}

/// Thresholds for proposal generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalPolicy {
    /// Minimum family total before any proposal is made.
    pub min_group_total: u64,
    /// Minimum winner share of the family total.
    pub min_winner_share: f64,
    /// Minimum winner-minus-runner-up share.
    pub min_winner_gap: f64,
}

impl Default for ProposalPolicy {
    fn default() -> Self {
        Self {
            min_group_total: 5,
            min_winner_share: 0.72,
            min_winner_gap: 0.20,
        }
    }
}

/// Accumulates token surfaces into `(scope, skeleton)` families across any
/// number of merged texts.
#[derive(Debug, Clone, Default)]
pub struct VariantAggregator {
    authority: HashSet<String>,
    groups: HashMap<(Scope, String), HashMap<String, u64>>,
}

impl VariantAggregator {
    /// An empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the authority list: surfaces on it are flagged in family output.
    pub fn with_authority(mut self, surfaces: impl IntoIterator<Item = String>) -> Self {
        self.authority = surfaces.into_iter().collect();
        self
    }

    /// Adds every line of a merged text.
    pub fn add_text(&mut self, text: &str) {
        for line in text.lines() {
            self.add_line(line);
        }
    }

    /// Adds one line's tokens. Tokens and skeletons shorter than three
    /// characters are skipped; they group nothing reliably.
    pub fn add_line(&mut self, line: &str) {
        let line = normalize_text(line);
        if line.is_empty() {
            return;
        }
        for m in WORD_RE.find_iter(&line) {
            let tok = m.as_str();
            if tok.chars().count() < 3 {
                continue;
            }
            let key = canon_key(tok);
            if key.chars().count() < 3 {
                continue;
            }
            let scope = scope_for_token(&line, m.start(), m.end());
            *self
                .groups
                .entry((scope, key))
                .or_default()
                .entry(tok.to_string())
                .or_insert(0) += 1;
        }
    }

    /// Surfaces of one family ranked by count, then quality score.
    fn ranked(&self, scope: Scope, counts: &HashMap<String, u64>) -> Vec<(String, u64)> {
        counts
            .iter()
            .map(|(surface, &count)| (surface.clone(), count))
            .sorted_by(|a, b| {
                (b.1, token_quality_score(&b.0, scope))
                    .cmp(&(a.1, token_quality_score(&a.0, scope)))
            })
            .collect()
    }

    /// The variant families with at least `min_group_total` occurrences and
    /// at least two distinct surfaces, ordered by scope and skeleton.
    pub fn families(&self, min_group_total: u64) -> Vec<VariantFamily> {
        self.groups
            .iter()
            .filter(|(_, counts)| {
                counts.values().sum::<u64>() >= min_group_total && counts.len() >= 2
            })
            .sorted_by(|a, b| a.0.cmp(b.0))
            .map(|((scope, skeleton), counts)| VariantFamily {
                scope: *scope,
                skeleton: skeleton.clone(),
                members: self
                    .ranked(*scope, counts)
                    .into_iter()
                    .map(|(surface, count)| FamilyMember {
                        authority: self.authority.contains(&surface),
                        validity: !SYMBOL_OR_DIGIT_RE.is_match(&surface),
                        surface,
                        count,
                    })
                    .collect(),
            })
            .collect()
    }

    /// Rewrite proposals for every family the policy admits: each losing
    /// surface against the family winner, risk-tiered.
    pub fn propose_rewrites(&self, policy: &ProposalPolicy) -> Vec<RewriteProposal> {
        let mut out = Vec::new();
        for ((scope, skeleton), counts) in self.groups.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
            let total: u64 = counts.values().sum();
            if total < policy.min_group_total || counts.len() < 2 {
                continue;
            }
            let ranked = self.ranked(*scope, counts);
            let (winner, winner_count) = ranked[0].clone();
            let runner_up = ranked.get(1).map_or(0, |r| r.1);
            let share = winner_count as f64 / total as f64;
            let gap = (winner_count - runner_up) as f64 / total as f64;
            for (loser, loser_count) in ranked.into_iter().skip(1) {
                if loser == winner {
                    continue;
                }
                let conservative = conservative_pair_allowed(&loser, &winner, *scope);
                let risk = if conservative
                    && share >= policy.min_winner_share
                    && gap >= policy.min_winner_gap
                {
                    RiskTier::Low
                } else if conservative {
                    RiskTier::Medium
                } else {
                    RiskTier::High
                };
                out.push(RewriteProposal {
                    scope: *scope,
                    skeleton: skeleton.clone(),
                    from: loser,
                    to: winner.clone(),
                    from_count: loser_count,
                    to_count: winner_count,
                    winner_share: share,
                    winner_gap: gap,
                    confidence: (share + gap / 2.0).min(0.99),
                    risk,
                });
            }
        }
        out
    }
}

/// Writes the proposal sheet as TSV.
pub fn write_proposals<W: io::Write>(writer: W, rows: &[RewriteProposal]) -> MergeResult<()> {
    let mut wtr = csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// One row of the human-approval family sheet.
#[derive(Debug, Clone, Serialize)]
pub struct FamilySheetRow {
    /// Scope partition.
    pub scope: Scope,
    /// The shared canonical skeleton.
    pub skeleton: String,
    /// Surface form.
    pub member: String,
    /// Occurrence count.
    pub frequency: u64,
    /// 1 when the surface is on the authority list.
    pub authority_flag: u8,
    /// 1 when the surface carries no suspect symbols or digits.
    pub validity_flag: u8,
}

/// Writes the family approval sheet as TSV, one row per family member in
/// ranked order.
pub fn write_family_sheet<W: io::Write>(writer: W, families: &[VariantFamily]) -> MergeResult<()> {
    let mut wtr = csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer);
    for family in families {
        for member in &family.members {
            wtr.serialize(FamilySheetRow {
                scope: family.scope,
                skeleton: family.skeleton.clone(),
                member: member.surface.clone(),
                frequency: member.count,
                authority_flag: u8::from(member.authority),
                validity_flag: u8::from(member.validity),
            })?;
        }
    }
    wtr.flush()?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ApprovedRow {
    from_token: String,
    to_token: String,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    apply_level: Option<String>,
}

fn parse_scope(s: &str) -> MergeResult<Scope> {
    match s {
        "romanization" => Ok(Scope::Romanization),
        "sanskrit" => Ok(Scope::Sanskrit),
        "german" => Ok(Scope::German),
        "bibliography_name" => Ok(Scope::BibliographyName),
        other => Err(MergeError::InvalidInput {
            message: format!("unknown scope '{other}' in approved table"),
        }),
    }
}

fn parse_apply_level(s: &str) -> MergeResult<ApplyLevel> {
    match s {
        "token" => Ok(ApplyLevel::Token),
        "span" => Ok(ApplyLevel::Span),
        "line" => Ok(ApplyLevel::Line),
        other => Err(MergeError::InvalidInput {
            message: format!("unknown apply level '{other}' in approved table"),
        }),
    }
}

/// The loaded approved-rewrite table: the only legal source of corpus-wide
/// rewrites. Conflicting entries for one source token are fatal at load.
#[derive(Debug, Clone, Default)]
pub struct ApprovedRewrites {
    literals: HashMap<String, ApprovedRewrite>,
    regexes: Vec<(Regex, ApprovedRewrite)>,
}

impl ApprovedRewrites {
    /// An empty table. Applying it is a no-op.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the table from reviewed TSV: `from_token` and `to_token`
    /// columns required, `scope` (default `romanization`) and `apply_level`
    /// (default `token`) optional.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::RewriteConflict`] on two rows mapping one
    /// source token to different targets, and [`MergeError::Csv`] /
    /// [`MergeError::InvalidInput`] on malformed rows.
    pub fn load_tsv<R: io::Read>(reader: R) -> MergeResult<Self> {
        let mut rdr = csv::ReaderBuilder::new().delimiter(b'\t').from_reader(reader);
        let mut table = Self::new();
        for row in rdr.deserialize() {
            let row: ApprovedRow = row?;
            let from = row.from_token.trim().to_string();
            let to = row.to_token.trim().to_string();
            if from.is_empty() || to.is_empty() || from == to {
                continue;
            }
            if let Some(prev) = table.literals.get(&from) {
                if prev.replacement != to {
                    return Err(MergeError::RewriteConflict {
                        from_token: from,
                        to_a: prev.replacement.clone(),
                        to_b: to,
                    });
                }
                continue;
            }
            let scope = row.scope.as_deref().map_or(Ok(Scope::Romanization), parse_scope)?;
            let apply_level = row
                .apply_level
                .as_deref()
                .map_or(Ok(ApplyLevel::Token), parse_apply_level)?;
            table.literals.insert(
                from.clone(),
                ApprovedRewrite {
                    scope,
                    pattern: RewritePattern::Literal(from),
                    replacement: to,
                    apply_level,
                },
            );
        }
        Ok(table)
    }

    /// Adds one rewrite programmatically. Regex patterns apply at span or
    /// line level only.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::RewriteConflict`] for a literal already mapped
    /// to a different target, and [`MergeError::InvalidInput`] for an
    /// invalid regex pattern.
    pub fn insert(&mut self, rewrite: ApprovedRewrite) -> MergeResult<()> {
        match &rewrite.pattern {
            RewritePattern::Literal(from) => {
                if let Some(prev) = self.literals.get(from) {
                    if prev.replacement != rewrite.replacement {
                        return Err(MergeError::RewriteConflict {
                            from_token: from.clone(),
                            to_a: prev.replacement.clone(),
                            to_b: rewrite.replacement,
                        });
                    }
                    return Ok(());
                }
                self.literals.insert(from.clone(), rewrite);
            }
            RewritePattern::Regex(pattern) => {
                let re = Regex::new(pattern).map_err(|e| MergeError::InvalidInput {
                    message: format!("invalid approved-rewrite pattern '{pattern}': {e}"),
                })?;
                self.regexes.push((re, rewrite));
            }
        }
        Ok(())
    }

    /// Number of loaded pairs.
    pub fn len(&self) -> usize {
        self.literals.len() + self.regexes.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.literals.is_empty() && self.regexes.is_empty()
    }

    /// Whether an exact `from -> to` pair is approved.
    pub fn is_approved(&self, from: &str, to: &str) -> bool {
        self.literals
            .get(from)
            .is_some_and(|rw| rw.replacement == to)
    }

    /// Splits proposals into approved ones and rejections. Every rejection
    /// carries `not_approved`, never a silent drop.
    pub fn review_proposals<'a>(
        &self,
        proposals: &'a [RewriteProposal],
    ) -> (Vec<&'a RewriteProposal>, Vec<(&'a RewriteProposal, Reason)>) {
        let mut approved = Vec::new();
        let mut rejected = Vec::new();
        for p in proposals {
            if self.is_approved(&p.from, &p.to) {
                approved.push(p);
            } else {
                rejected.push((p, Reason::NotApproved));
            }
        }
        (approved, rejected)
    }

    /// Applies the table to one line and returns the rewritten line plus one
    /// [`TokenEdit`] per replacement.
    ///
    /// The gate is line-level: a rewrite fires only on lines where some token
    /// scopes to the rewrite's scope. The broken surface itself usually lost
    /// the cue that would scope it, so the gate cannot sit on the matched
    /// token.
    pub fn apply_line(&self, line: &str) -> (String, Vec<TokenEdit>) {
        let mut edits = Vec::new();
        let mut out = String::with_capacity(line.len());
        let mut pos = 0;
        for m in WORD_RE.find_iter(line) {
            out.push_str(&line[pos..m.start()]);
            pos = m.end();
            let tok = m.as_str();
            let rewritten = match self.literals.get(tok) {
                Some(rw)
                    if rw.apply_level == ApplyLevel::Token
                        && line_admits_scope(line, rw.scope)
                        && !skip_guarded_pair(line, tok, &rw.replacement, m.start(), m.end()) =>
                {
                    edits.push(TokenEdit {
                        before: tok.to_string(),
                        after: rw.replacement.clone(),
                        rule: RuleId::ApprovedRewrite,
                        anchor: None,
                    });
                    rw.replacement.clone()
                }
                _ => tok.to_string(),
            };
            out.push_str(&rewritten);
        }
        out.push_str(&line[pos..]);

        // Span- and line-level entries run after the token pass.
        for (from, rw) in self
            .literals
            .iter()
            .filter(|(_, rw)| rw.apply_level != ApplyLevel::Token)
            .sorted_by(|a, b| a.0.cmp(b.0))
        {
            out = apply_wide_literal(&out, from, rw, &mut edits);
        }
        for (re, rw) in &self.regexes {
            out = apply_wide_regex(&out, re, rw, &mut edits);
        }
        (out, edits)
    }
}

/// Whether a wide (span/line-level) rewrite may touch this line at all.
fn line_admits_scope(line: &str, scope: Scope) -> bool {
    WORD_RE
        .find_iter(line)
        .any(|m| scope_for_token(line, m.start(), m.end()) == scope)
}

fn apply_wide_literal(
    line: &str,
    from: &str,
    rw: &ApprovedRewrite,
    edits: &mut Vec<TokenEdit>,
) -> String {
    if !line.contains(from) || !line_admits_scope(line, rw.scope) {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len());
    let mut pos = 0;
    while let Some(found) = line[pos..].find(from) {
        let start = pos + found;
        let end = start + from.len();
        let in_scope = match rw.apply_level {
            // Span-level matches must sit inside a token of the scope.
            ApplyLevel::Span => WORD_RE
                .find_iter(line)
                .any(|m| m.start() <= start && end <= m.end()
                    && scope_for_token(line, m.start(), m.end()) == rw.scope),
            _ => true,
        };
        out.push_str(&line[pos..start]);
        if in_scope {
            edits.push(TokenEdit {
                before: from.to_string(),
                after: rw.replacement.clone(),
                rule: RuleId::ApprovedRewrite,
                anchor: None,
            });
            out.push_str(&rw.replacement);
        } else {
            out.push_str(from);
        }
        pos = end;
    }
    out.push_str(&line[pos..]);
    out
}

fn apply_wide_regex(
    line: &str,
    re: &Regex,
    rw: &ApprovedRewrite,
    edits: &mut Vec<TokenEdit>,
) -> String {
    if !line_admits_scope(line, rw.scope) {
        return line.to_string();
    }
    if !re.is_match(line) {
        return line.to_string();
    }
    // Span-level matches must sit inside a token of the scope, same as the
    // literal path.
    let in_scope = |start: usize, end: usize| match rw.apply_level {
        ApplyLevel::Span => WORD_RE
            .find_iter(line)
            .any(|m| m.start() <= start && end <= m.end()
                && scope_for_token(line, m.start(), m.end()) == rw.scope),
        _ => true,
    };
    let mut out = String::with_capacity(line.len());
    let mut pos = 0;
    for caps in re.captures_iter(line) {
        let Some(m) = caps.get(0) else { continue };
        out.push_str(&line[pos..m.start()]);
        if in_scope(m.start(), m.end()) {
            let mut replaced = String::new();
            caps.expand(&rw.replacement, &mut replaced);
            edits.push(TokenEdit {
                before: m.as_str().to_string(),
                after: replaced.clone(),
                rule: RuleId::ApprovedRewrite,
                anchor: None,
            });
            out.push_str(&replaced);
        } else {
            out.push_str(m.as_str());
        }
        pos = m.end();
    }
    out.push_str(&line[pos..]);
    out
}

/// Per-pair guardrails. The `gan -> gaṅ` pair is approved corpus-wide but
/// stays off Tibetan-sourced `gan`, Mongolian loans, Sanskrit references,
/// apostrophe boundaries, and wrap boundaries before `di`/`de`/`ti`.
fn skip_guarded_pair(line: &str, tok: &str, dst: &str, start: usize, end: usize) -> bool {
    if tok != "gan" || dst != "gaṅ" {
        return false;
    }
    if line.contains("གན") {
        return true;
    }
    let line_lower = line.to_lowercase();
    if GAN_BLOCK_HINTS.iter().any(|h| line_lower.contains(h)) {
        return true;
    }
    if GAN_BLOCK_PATTERNS.iter().any(|p| p.is_match(line)) {
        return true;
    }
    if line_lower.contains("skt.") && !has_tibetan(line) {
        return true;
    }
    let prev = line[..start].chars().next_back();
    let next = line[end..].chars().next();
    if matches!(prev, Some('\'' | '\u{2019}')) || matches!(next, Some('\'' | '\u{2019}')) {
        return true;
    }
    if let Some(m) = WORD_RE.find(&line[end..]) {
        let gap = &line[end..end + m.start()];
        let gap_is_boundary = gap.chars().all(|c| {
            c.is_whitespace()
                || matches!(
                    c,
                    '/' | '-' | '\u{2013}' | '\u{2014}' | '~' | '.' | ',' | ';' | ':' | '!'
                        | '?' | '"' | '\u{201c}' | '\u{201d}' | '(' | ')' | '[' | ']' | '{' | '}'
                )
        });
        if gap_is_boundary && gap.len() <= 48 {
            let nxt = m.as_str().to_lowercase();
            if matches!(nxt.as_str(), "di" | "de" | "ti") {
                warn!(token = tok, next = %nxt, "guarded pair skipped at wrap boundary");
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canon_key_folds_confusables_and_diacritics() {
        assert_eq!(canon_key("dṅos"), "dnos");
        assert_eq!(canon_key("Itar"), "ltar");
        assert_eq!(canon_key("$es-rab"), "sesrab");
        assert_eq!(canon_key("mñam"), "mnam");
        assert_eq!(canon_key("pa'i"), "pai");
        assert_eq!(canon_key("mñam"), canon_key("mṅam"));
    }

    #[test]
    fn scope_follows_line_evidence() {
        let line = "བཀྲ་ཤིས་ bkra śis dṅos po";
        let m = WORD_RE
            .find_iter(line)
            .find(|m| m.as_str() == "śis")
            .unwrap();
        assert_eq!(scope_for_token(line, m.start(), m.end()), Scope::Romanization);

        let bib = "Hrsg. Müller, Berlin 1901, pp. 44";
        let m = WORD_RE.find(bib).unwrap();
        assert_eq!(scope_for_token(bib, m.start(), m.end()), Scope::BibliographyName);

        let skt = "Skt. prajñāpāramitā heißt Weisheit";
        let m = WORD_RE
            .find_iter(skt)
            .find(|m| m.as_str().starts_with("praj"))
            .unwrap();
        assert_eq!(scope_for_token(skt, m.start(), m.end()), Scope::Sanskrit);
    }

    #[test]
    fn stopwords_near_tibetan_stay_german() {
        let line = "བཀྲ་ཤིས་ die bkra śis";
        let m = WORD_RE
            .find_iter(line)
            .find(|m| m.as_str() == "die")
            .unwrap();
        assert_eq!(scope_for_token(line, m.start(), m.end()), Scope::German);
    }

    #[test]
    fn families_group_within_one_scope() {
        let mut agg = VariantAggregator::new();
        for _ in 0..4 {
            agg.add_line("ཐམས་ thams cad");
        }
        for _ in 0..2 {
            agg.add_line("ཐམས་ thäms cad");
        }
        let families = agg.families(5);
        let fam = families
            .iter()
            .find(|f| f.skeleton == "thams")
            .expect("family for thams variants");
        assert_eq!(fam.scope, Scope::Romanization);
        assert_eq!(fam.members[0].surface, "thams");
        assert_eq!(fam.members[0].count, 4);
        assert_eq!(fam.members[1].surface, "thäms");
    }

    #[test]
    fn family_sheet_emits_one_row_per_member() {
        let mut agg = VariantAggregator::new();
        for _ in 0..4 {
            agg.add_line("ཐམས་ thams cad");
        }
        for _ in 0..2 {
            agg.add_line("ཐམས་ thäms cad");
        }
        let families = agg.families(5);
        let mut buf = Vec::new();
        write_family_sheet(&mut buf, &families).unwrap();
        let sheet = String::from_utf8(buf).unwrap();
        let header = sheet.lines().next().unwrap();
        assert_eq!(
            header,
            "scope\tskeleton\tmember\tfrequency\tauthority_flag\tvalidity_flag"
        );
        assert!(sheet.contains("romanization\tthams\tthams\t4\t0\t1"));
        assert!(sheet.contains("romanization\tthams\tthäms\t2\t0\t1"));
    }

    #[test]
    fn proposals_respect_thresholds_and_risk() {
        let mut agg = VariantAggregator::new();
        for _ in 0..8 {
            agg.add_line("མཁན་ mkhan po");
        }
        for _ in 0..2 {
            agg.add_line("མཁན་ mkhän po");
        }
        let proposals = agg.propose_rewrites(&ProposalPolicy::default());
        let p = proposals
            .iter()
            .find(|p| p.from == "mkhän")
            .expect("mkhän proposal");
        assert_eq!(p.to, "mkhan");
        assert_eq!(p.risk, RiskTier::Low);
        assert!(p.winner_share >= 0.72);
        assert!(p.confidence <= 0.99);
    }

    #[test]
    fn conservative_pair_rules() {
        assert!(conservative_pair_allowed("dnos", "dṅos", Scope::Romanization));
        assert!(conservative_pair_allowed("Itar", "ltar", Scope::Romanization));
        // Different skeletons are never conservative.
        assert!(!conservative_pair_allowed("dnos", "dpos", Scope::Romanization));
        // Too short to trust.
        assert!(!conservative_pair_allowed("na", "ṅa", Scope::Romanization));
        // Case-only differences are fine for names, and also pass the
        // positional-diff budget in other scopes.
        assert!(conservative_pair_allowed(
            "OBERMILLER",
            "Obermiller",
            Scope::BibliographyName
        ));
        assert!(conservative_pair_allowed(
            "obermiller",
            "Obermiller",
            Scope::Romanization
        ));
        // Three scattered case flips exceed the budget outside names.
        assert!(!conservative_pair_allowed(
            "oBeRmiller",
            "Obermiller",
            Scope::Romanization
        ));
    }

    #[test]
    fn approved_table_load_and_conflict() {
        let tsv = "from_token\tto_token\ngsal\tgsal ba\ndnos\tdṅos\n";
        let table = ApprovedRewrites::load_tsv(tsv.as_bytes()).unwrap();
        assert!(table.is_approved("dnos", "dṅos"));
        assert!(!table.is_approved("dnos", "dpos"));

        let conflicting = "from_token\tto_token\ndnos\tdṅos\ndnos\tdpos\n";
        let err = ApprovedRewrites::load_tsv(conflicting.as_bytes()).unwrap_err();
        assert!(matches!(err, MergeError::RewriteConflict { .. }));
    }

    #[test]
    fn apply_is_scope_gated() {
        let tsv = "from_token\tto_token\ndnos\tdṅos\n";
        let table = ApprovedRewrites::load_tsv(tsv.as_bytes()).unwrap();
        // In the romanization neighborhood the pair applies.
        let (out, edits) = table.apply_line("དངོས་ dnos po śes");
        assert_eq!(out, "དངོས་ dṅos po śes");
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].rule, RuleId::ApprovedRewrite);
        // Without Tibetan neighborhood the token scopes as German prose and
        // the romanization-scoped pair must not fire.
        let (out, edits) = table.apply_line("dnos allein im Satz");
        assert_eq!(out, "dnos allein im Satz");
        assert!(edits.is_empty());
    }

    #[test]
    fn span_level_regex_stays_inside_scoped_tokens() {
        let mut table = ApprovedRewrites::new();
        table
            .insert(ApprovedRewrite {
                scope: Scope::Romanization,
                pattern: RewritePattern::Regex(r"\bthab\b".to_string()),
                replacement: "thabs".to_string(),
                apply_level: ApplyLevel::Span,
            })
            .unwrap();
        // Two matches: one in the anchored transliteration, one in German
        // prose well away from the Tibetan. Only the first rewrites.
        let line = "ཐབས་ thab kyi sgo nas, die Methode hier heißt eben thab";
        let (out, edits) = table.apply_line(line);
        assert_eq!(
            out,
            "ཐབས་ thabs kyi sgo nas, die Methode hier heißt eben thab"
        );
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].before, "thab");
        assert_eq!(edits[0].after, "thabs");
    }

    #[test]
    fn gan_guardrails_hold() {
        let tsv = "from_token\tto_token\ngan\tgaṅ\n";
        let table = ApprovedRewrites::load_tsv(tsv.as_bytes()).unwrap();
        // Tibetan-sourced gan stays.
        let (out, _) = table.apply_line("གན་ gan dag");
        assert_eq!(out, "གན་ gan dag");
        // Mongolian loan context stays.
        let (out, _) = table.apply_line("བཀའ་ qayan gan śes");
        assert_eq!(out, "བཀའ་ qayan gan śes");
        // Wrap boundary before `di` stays.
        let (out, _) = table.apply_line("བཀའ་ gan di śes");
        assert_eq!(out, "བཀའ་ gan di śes");
        // The clean anchored case applies.
        let (out, edits) = table.apply_line("གང་ gan dag śes");
        assert_eq!(out, "གང་ gaṅ dag śes");
        assert_eq!(edits.len(), 1);
    }

    #[test]
    fn unapproved_proposals_are_rejected_with_reason() {
        let mut agg = VariantAggregator::new();
        for _ in 0..8 {
            agg.add_line("མཁན་ mkhan po");
        }
        for _ in 0..2 {
            agg.add_line("མཁན་ mkhän po");
        }
        let proposals = agg.propose_rewrites(&ProposalPolicy::default());
        assert!(!proposals.is_empty());
        let table = ApprovedRewrites::new();
        let (approved, rejected) = table.review_proposals(&proposals);
        assert!(approved.is_empty());
        assert!(rejected.iter().all(|(_, r)| *r == Reason::NotApproved));
        assert_eq!(rejected.len(), proposals.len());
    }
}
