//! Scope-gated normalization rule sets.
//!
//! Each span of a line is rewritten by at most one of four labeled rule
//! sets: `identity` (no change), `german_safe` (fixed safe substitutions
//! only), `sanskrit_strict` (diacritic repairs under Sanskrit evidence),
//! and `romanization_strict` (the full transliteration repair battery,
//! only available in the romanization slot after a Tibetan headword).
//! Eligible rule sets are scored independently per span and the highest
//! scorer wins; ties fall to the most conservative set. Every non-identity
//! token rewrite is reported as a [`TokenEdit`] so the pipeline can emit
//! an audit row for it.

use crate::domain::{RuleId, Scope, Span, SpanType};
use crate::processors::confusables::fix_capital_i;
use crate::processors::spans::{in_ranges, sanskrit_marker_ranges};
use crate::processors::text::{
    has_latin, is_extended_letter, is_roman_noise_token, normalize_text, tibetan_prefix_len,
    tibetan_syllables, token_has_translit_cues, token_is_translit_shaped, token_looks_sanskritic,
    WORD_RE,
};

/// Known whole-word OCR confusions in romanized Tibetan. Applied on word
/// boundaries, in order.
pub const POST_FIX_WORDS: &[(&str, &str)] = &[
    ("Ita", "lta"),
    ("Itar", "ltar"),
    ("Iha", "lha"),
    ("Idan", "ldan"),
    ("gyl", "gyi"),
];

/// A single token-level rewrite, before audit-row enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEdit {
    /// Token text before the rewrite.
    pub before: String,
    /// Token text after the rewrite. Empty when the token was dropped.
    pub after: String,
    /// The rule that produced the rewrite.
    pub rule: RuleId,
    /// Tibetan-script anchor evidence, where the rule is anchored.
    pub anchor: Option<String>,
}

/// The labeled rule sets, ordered from most to least conservative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSet {
    /// No change.
    Identity,
    /// Dotless-letter repair and stray-symbol removal only. Umlaut-to-macron
    /// conversion is forbidden here.
    GermanSafe,
    /// Sanskrit diacritic repairs, token-by-token and hyphen-segment-by-
    /// segment under per-token evidence.
    SanskritStrict,
    /// The full transliteration battery for the romanization slot.
    RomanizationStrict,
}

impl RuleSet {
    /// Stable wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleSet::Identity => "identity",
            RuleSet::GermanSafe => "german_safe",
            RuleSet::SanskritStrict => "sanskrit_strict",
            RuleSet::RomanizationStrict => "romanization_strict",
        }
    }
}

/// Outcome of one rule set applied to one span.
#[derive(Debug, Clone)]
pub struct SpanRewrite {
    /// Which rule set produced the text.
    pub rule_set: RuleSet,
    /// The rewritten span text.
    pub text: String,
    /// Token-level rewrites, in span order.
    pub edits: Vec<TokenEdit>,
}

/// A token edit tagged with the span it originated in, so the pipeline can
/// emit a fully attributed audit row for it.
#[derive(Debug, Clone)]
pub struct LineEdit {
    /// Type of the originating span.
    pub span_type: SpanType,
    /// Scope of the originating span.
    pub scope: Option<Scope>,
    /// The token-level rewrite.
    pub edit: TokenEdit,
}

/// Outcome of normalizing a whole line.
#[derive(Debug, Clone)]
pub struct LineRewrite {
    /// The reassembled, re-normalized line text.
    pub text: String,
    /// All token-level rewrites across spans, span-attributed.
    pub edits: Vec<LineEdit>,
}

fn is_stray_symbol(c: char) -> bool {
    matches!(c, '€' | '£' | '¬')
}

/// Syllable-final delimiter inside transliteration: punctuation, slash,
/// hyphen, tsheg, shad.
fn is_final_delim(c: char) -> bool {
    matches!(
        c,
        ',' | '.' | ';' | ':' | '!' | '?' | ')' | ']' | '}' | '"' | '\u{201c}' | '\u{201d}'
            | '\u{201e}' | '\'' | '\u{2019}' | '/' | '-' | '\u{0f0b}' | '\u{0f0d}'
    ) || c.is_whitespace()
}

pub(crate) fn word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Records a staged rewrite when it changed the token.
pub(crate) fn stage(cur: &mut String, next: String, rule: RuleId, edits: &mut Vec<TokenEdit>) {
    if next != *cur {
        edits.push(TokenEdit {
            before: cur.clone(),
            after: next.clone(),
            rule,
            anchor: None,
        });
        *cur = next;
    }
}

pub(crate) fn fix_dollar(tok: &str) -> String {
    tok.replace('$', "ś")
}

/// Isolated `pa'` (no adjacent letters) is the genitive `pa'i` with its `i`
/// lost to the scan.
fn fix_pa_apostrophe(tok: &str) -> String {
    let chars: Vec<char> = tok.chars().collect();
    let mut out = String::with_capacity(tok.len() + 2);
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == 'p'
            && (i == 0 || !is_extended_letter(chars[i - 1]))
            && chars.get(i + 1) == Some(&'a')
            && matches!(chars.get(i + 2), Some('\'') | Some('\u{2019}'))
            && chars.get(i + 3).is_none_or(|&n| !is_extended_letter(n))
        {
            out.push_str("pa'i");
            i += 3;
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// The `ñù` pair is a two-char misread of a single `ṅ`.
fn fix_n_tilde_grave(tok: &str) -> String {
    let chars: Vec<char> = tok.chars().collect();
    let mut out = String::with_capacity(tok.len());
    let mut i = 0;
    while i < chars.len() {
        if matches!(chars[i], 'ñ' | 'Ñ') && matches!(chars.get(i + 1), Some('ù') | Some('Ù')) {
            out.push('ṅ');
            i += 2;
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn replace_word_bounded(cur: &str, bad: &str, good: &str) -> String {
    let mut out = String::with_capacity(cur.len());
    let mut i = 0;
    while i < cur.len() {
        if cur[i..].starts_with(bad) {
            let prev_ok = cur[..i].chars().next_back().is_none_or(|c| !word_char(c));
            let after = i + bad.len();
            let next_ok = cur[after..].chars().next().is_none_or(|c| !word_char(c));
            if prev_ok && next_ok {
                out.push_str(good);
                i = after;
                continue;
            }
        }
        let c = cur[i..].chars().next().expect("char boundary");
        out.push(c);
        i += c.len_utf8();
    }
    out
}

pub(crate) fn fix_post_words(tok: &str) -> String {
    let mut cur = tok.to_string();
    for &(bad, good) in POST_FIX_WORDS {
        cur = replace_word_bounded(&cur, bad, good);
    }
    cur
}

/// Positional `ñ`/`ń` repair: both are misreads of `ṅ` in syllable-final
/// position (optionally before a final `s`), while a genuine `ñ` survives
/// before `i`/`e` vowels.
fn fix_n_finals(tok: &str) -> String {
    let chars: Vec<char> = tok.chars().collect();
    let final_at = |k: usize| k >= chars.len() || is_final_delim(chars[k]);
    let s_final_at =
        |k: usize| matches!(chars.get(k), Some('s') | Some('S')) && final_at(k + 1);
    let mut out = String::with_capacity(tok.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == 'ñ' {
            if matches!(
                chars.get(i + 1),
                Some('i') | Some('I') | Some('e') | Some('E') | Some('ī') | Some('Ī')
            ) {
                out.push(c);
                i += 1;
                continue;
            }
            if chars.get(i + 1) == Some(&'ń') && s_final_at(i + 2) {
                out.push('ṅ');
                i += 2;
                continue;
            }
            if s_final_at(i + 1) || final_at(i + 1) {
                out.push('ṅ');
                i += 1;
                continue;
            }
        }
        if c == 'ń' && (s_final_at(i + 1) || final_at(i + 1)) {
            out.push('ṅ');
            i += 1;
            continue;
        }
        out.push(c);
        i += 1;
    }
    out
}

fn fix_dieresis(tok: &str) -> String {
    tok.chars()
        .map(|c| match c {
            'ä' => 'ā',
            'Ä' => 'Ā',
            'ü' => 'ū',
            'Ü' => 'Ū',
            _ => c,
        })
        .collect()
}

fn fix_cedilla(tok: &str) -> String {
    tok.chars()
        .map(|c| match c {
            'ş' => 'ṣ',
            'Ş' => 'Ṣ',
            'ņ' => 'ṇ',
            'Ņ' => 'Ṇ',
            'ã' => 'ā',
            'Ã' => 'Ā',
            _ => c,
        })
        .collect()
}

/// Restores the dotted `ṅ` at the end of a romanization token when the
/// aligned Tibetan syllable demands it: final `n`/`ng`, optionally before a
/// trailing `s`.
fn enforce_ng(tok: &str) -> String {
    for (pat, rep) in [("ngs", "ṅs"), ("ng", "ṅ"), ("ns", "ṅs"), ("n", "ṅ")] {
        if let Some(head) = tok.strip_suffix(pat) {
            return format!("{head}{rep}");
        }
    }
    tok.to_string()
}

fn map_segments(tok: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut out = String::with_capacity(tok.len());
    for (i, seg) in tok.split('-').enumerate() {
        if i > 0 {
            out.push('-');
        }
        out.push_str(&f(seg));
    }
    out
}

/// Iterates whitespace and token runs of a span, applying `f` to tokens.
pub(crate) fn for_each_token(text: &str, out: &mut String, mut f: impl FnMut(&str, usize) -> String) {
    let mut rest = text;
    let mut tok_idx = 0;
    while !rest.is_empty() {
        let ws_len = rest.len() - rest.trim_start().len();
        out.push_str(&rest[..ws_len]);
        rest = &rest[ws_len..];
        if rest.is_empty() {
            break;
        }
        let tok_end = rest
            .char_indices()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        out.push_str(&f(&rest[..tok_end], tok_idx));
        tok_idx += 1;
        rest = &rest[tok_end..];
    }
}

fn identity_rewrite(text: &str) -> SpanRewrite {
    SpanRewrite {
        rule_set: RuleSet::Identity,
        text: text.to_string(),
        edits: Vec::new(),
    }
}

/// `german_safe`: dotless-`ı` repair and stray-symbol removal, nothing else.
fn german_safe(text: &str) -> SpanRewrite {
    let mut out = String::with_capacity(text.len());
    let mut edits = Vec::new();
    for c in text.chars() {
        if is_stray_symbol(c) {
            edits.push(TokenEdit {
                before: c.to_string(),
                after: String::new(),
                rule: RuleId::StraySymbolDrop,
                anchor: None,
            });
            continue;
        }
        if c == 'ı' {
            edits.push(TokenEdit {
                before: "ı".to_string(),
                after: "i".to_string(),
                rule: RuleId::DotlessI,
                anchor: None,
            });
            out.push('i');
            continue;
        }
        out.push(c);
    }
    SpanRewrite {
        rule_set: RuleSet::GermanSafe,
        text: out,
        edits,
    }
}

/// `sanskrit_strict`: umlaut-to-macron and cedilla/retroflex repairs, gated
/// per token (or per hyphen segment) on marker ranges and Sanskritic cues.
/// Bibliographic blocks suppress the cue-only path.
fn sanskrit_strict(span: &Span, text: &str, ranges: &[(usize, usize)]) -> SpanRewrite {
    let block = span.block;
    let mut edits = Vec::new();
    let mut stripped = String::with_capacity(text.len());
    for c in text.chars() {
        if is_stray_symbol(c) {
            edits.push(TokenEdit {
                before: c.to_string(),
                after: String::new(),
                rule: RuleId::StraySymbolDrop,
                anchor: None,
            });
        } else {
            stripped.push(c);
        }
    }

    let eligible = |seg: &str, in_marked: bool| {
        in_marked || (token_looks_sanskritic(seg) && (block.sanskrit || !block.bibliography))
    };

    let mut out = String::with_capacity(stripped.len());
    let mut pos = 0;
    for m in WORD_RE.find_iter(&stripped) {
        out.push_str(&stripped[pos..m.start()]);
        let in_marked = in_ranges(span.start + m.start(), ranges);
        let mut cur = m.as_str().to_string();
        let next = map_segments(&cur, |seg| {
            if eligible(seg, in_marked) {
                fix_dieresis(seg)
            } else {
                seg.to_string()
            }
        });
        stage(&mut cur, next, RuleId::UmlautMacron, &mut edits);
        let next = map_segments(&cur, |seg| {
            if eligible(seg, in_marked) {
                fix_cedilla(seg)
            } else {
                seg.to_string()
            }
        });
        stage(&mut cur, next, RuleId::CedillaRetroflex, &mut edits);
        out.push_str(&cur);
        pos = m.end();
    }
    out.push_str(&stripped[pos..]);

    SpanRewrite {
        rule_set: RuleSet::SanskritStrict,
        text: out,
        edits,
    }
}

/// `romanization_strict`: the full repair battery for the transliteration
/// slot, staged per token in fixed order, finishing with the Tibetan-prefix
/// `ṅ` alignment whose syllable is the anchor evidence.
fn romanization_strict(text: &str, syls: &[&str], sanskrit_block: bool) -> SpanRewrite {
    let mut edits = Vec::new();
    let mut out = String::with_capacity(text.len());
    for_each_token(text, &mut out, |tok, idx| {
        let mut cur = tok.to_string();
        let stray: String = cur.chars().filter(|&c| !is_stray_symbol(c)).collect();
        stage(&mut cur, stray, RuleId::StraySymbolDrop, &mut edits);
        let next = fix_dollar(&cur);
        stage(&mut cur, next, RuleId::DollarSAcute, &mut edits);
        let next = fix_pa_apostrophe(&cur);
        stage(&mut cur, next, RuleId::PaApostrophe, &mut edits);
        let next = fix_n_tilde_grave(&cur);
        stage(&mut cur, next, RuleId::NTildeGravePair, &mut edits);
        let next = fix_post_words(&cur);
        stage(&mut cur, next, RuleId::ConfusableWord, &mut edits);
        let next = fix_n_finals(&cur);
        stage(&mut cur, next, RuleId::NFinalDotted, &mut edits);
        let use_skt =
            sanskrit_block || token_has_translit_cues(&cur) || token_looks_sanskritic(&cur);
        if use_skt {
            let next = fix_dieresis(&cur);
            stage(&mut cur, next, RuleId::UmlautMacron, &mut edits);
            let next = fix_cedilla(&cur);
            stage(&mut cur, next, RuleId::CedillaRetroflex, &mut edits);
        }
        if let Some(syl) = syls.get(idx) {
            if syl.contains('\u{f44}') {
                let next = enforce_ng(&cur);
                if next != cur {
                    edits.push(TokenEdit {
                        before: cur.clone(),
                        after: next.clone(),
                        rule: RuleId::NgFromTibetanPrefix,
                        anchor: Some((*syl).to_string()),
                    });
                    cur = next;
                }
            }
        }
        cur
    });
    SpanRewrite {
        rule_set: RuleSet::RomanizationStrict,
        text: out,
        edits,
    }
}

/// The rule sets a span may use, most conservative first.
fn eligible_rule_sets(span: &Span, text: &str, ranges: &[(usize, usize)]) -> Vec<RuleSet> {
    let mut sets = vec![RuleSet::Identity];
    match span.kind {
        SpanType::TibetanScript => {}
        SpanType::Romanization => sets.push(RuleSet::RomanizationStrict),
        SpanType::Latin => {
            sets.push(RuleSet::GermanSafe);
            let marked = ranges
                .iter()
                .any(|&(st, en)| st < span.end && span.start < en);
            let cues = span.block.sanskrit
                || WORD_RE
                    .find_iter(text)
                    .any(|m| token_looks_sanskritic(m.as_str()));
            if marked || cues {
                sets.push(RuleSet::SanskritStrict);
            }
        }
    }
    sets
}

/// Rewrites one span under its best eligible rule set.
pub fn rewrite_span(
    span: &Span,
    line: &str,
    syls: &[&str],
    ranges: &[(usize, usize)],
) -> SpanRewrite {
    let text = &line[span.start..span.end];
    let mut best: Option<SpanRewrite> = None;
    for set in eligible_rule_sets(span, text, ranges) {
        let rw = match set {
            RuleSet::Identity => identity_rewrite(text),
            RuleSet::GermanSafe => german_safe(text),
            RuleSet::SanskritStrict => sanskrit_strict(span, text, ranges),
            RuleSet::RomanizationStrict => {
                romanization_strict(text, syls, span.block.sanskrit)
            }
        };
        // Strict comparison keeps the earlier, more conservative set on ties.
        if best.as_ref().is_none_or(|b| rw.edits.len() > b.edits.len()) {
            best = Some(rw);
        }
    }
    best.unwrap_or_else(|| identity_rewrite(text))
}

/// Drops digit/symbol noise tokens from the transliteration slot right after
/// the Tibetan prefix. Valid transliteration tokens pass through; the first
/// token that is neither ends the scan and the remainder is kept verbatim.
pub fn drop_roman_tail_noise(line: &str) -> (String, Vec<TokenEdit>) {
    let Some(plen) = tibetan_prefix_len(line) else {
        return (line.to_string(), Vec::new());
    };
    let prefix = &line[..plen];
    let tail = &line[plen..];
    if tail.trim().is_empty() {
        return (line.to_string(), Vec::new());
    }

    let mut edits = Vec::new();
    let mut out_tail = String::with_capacity(tail.len());
    let mut rest = tail;
    'scan: while !rest.is_empty() {
        let ws_len = rest.len() - rest.trim_start().len();
        out_tail.push_str(&rest[..ws_len]);
        rest = &rest[ws_len..];
        if rest.is_empty() {
            break;
        }
        let tok_end = rest
            .char_indices()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let tok = &rest[..tok_end];
        rest = &rest[tok_end..];
        if token_is_translit_shaped(tok) {
            out_tail.push_str(tok);
            continue;
        }
        if is_roman_noise_token(tok) {
            edits.push(TokenEdit {
                before: tok.to_string(),
                after: String::new(),
                rule: RuleId::NoiseTokenDrop,
                anchor: None,
            });
            continue;
        }
        out_tail.push_str(tok);
        out_tail.push_str(rest);
        break 'scan;
    }

    let out_tail = out_tail.trim();
    if out_tail.is_empty() {
        // A tail made entirely of noise is left alone; something else is
        // wrong with the line and dropping everything would hide it.
        return (line.to_string(), Vec::new());
    }
    let joiner = if prefix.ends_with(' ') { "" } else { " " };
    (
        format!("{prefix}{joiner}{out_tail}").trim_end().to_string(),
        edits,
    )
}

/// Whether a token pair is on the built-in approved table. The fixed
/// substitution battery doubles as that table: a pair is approved exactly
/// when the named rule maps `before` to `after`. Rules that act on a
/// Tibetan alignment are absent here; their edits carry the anchor instead.
pub fn builtin_pair_approved(rule: RuleId, before: &str, after: &str) -> bool {
    if before == after {
        return false;
    }
    match rule {
        RuleId::DollarSAcute => fix_dollar(before) == after,
        RuleId::PaApostrophe => fix_pa_apostrophe(before) == after,
        RuleId::NTildeGravePair => fix_n_tilde_grave(before) == after,
        RuleId::NFinalDotted => fix_n_finals(before) == after,
        RuleId::UmlautMacron => fix_dieresis(before) == after,
        RuleId::CedillaRetroflex => fix_cedilla(before) == after,
        RuleId::ConfusableWord => {
            fix_post_words(before) == after || fix_capital_i(before) == after
        }
        RuleId::DotlessI => before == "ı" && after == "i",
        RuleId::StraySymbolDrop => {
            after == before
                .chars()
                .filter(|&c| !is_stray_symbol(c))
                .collect::<String>()
        }
        RuleId::NoiseTokenDrop => after.is_empty() && is_roman_noise_token(before),
        RuleId::NgFromTibetanPrefix | RuleId::ApprovedRewrite => false,
    }
}

/// Normalizes a whole line: rewrites each span under its best rule set,
/// reassembles them in order, and clears transliteration-slot noise on
/// headword lines.
pub fn normalize_line(line: &str, spans: &[Span]) -> LineRewrite {
    if !has_latin(line) && !line.contains('$') {
        return LineRewrite {
            text: normalize_text(line),
            edits: Vec::new(),
        };
    }

    let ranges = sanskrit_marker_ranges(line);
    let prefix_len = tibetan_prefix_len(line);
    let syls: Vec<&str> = prefix_len
        .map(|p| tibetan_syllables(&line[..p]))
        .unwrap_or_default();

    let mut text = String::with_capacity(line.len());
    let mut edits = Vec::new();
    for span in spans {
        let rw = rewrite_span(span, line, &syls, &ranges);
        text.push_str(&rw.text);
        edits.extend(rw.edits.into_iter().map(|edit| LineEdit {
            span_type: span.kind,
            scope: span.scope,
            edit,
        }));
    }

    if prefix_len.is_some() {
        let (cleaned, noise_edits) = drop_roman_tail_noise(&text);
        text = cleaned;
        edits.extend(noise_edits.into_iter().map(|edit| LineEdit {
            span_type: SpanType::Romanization,
            scope: Some(Scope::Romanization),
            edit,
        }));
    }

    LineRewrite {
        text: normalize_text(&text),
        edits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BlockContext;
    use crate::processors::spans::split_spans;

    fn roman_ctx() -> BlockContext {
        BlockContext {
            tibetan: true,
            romanization: true,
            ..BlockContext::default()
        }
    }

    fn run(line: &str, block: BlockContext) -> LineRewrite {
        let spans = split_spans(line, block);
        normalize_line(line, &spans)
    }

    #[test]
    fn post_words_fixed_in_romanization() {
        let out = run("ལྟ་བ་ Ita ba", roman_ctx());
        assert_eq!(out.text, "ལྟ་བ་ lta ba");
        assert_eq!(out.edits.len(), 1);
        assert_eq!(out.edits[0].edit.rule, RuleId::ConfusableWord);
        assert_eq!(out.edits[0].edit.before, "Ita");
        assert_eq!(out.edits[0].edit.after, "lta");
        assert_eq!(out.edits[0].scope, Some(Scope::Romanization));
    }

    #[test]
    fn n_tilde_protected_before_front_vowels() {
        let out = run("ཉི་མ་ ñi ma", roman_ctx());
        assert_eq!(out.text, "ཉི་མ་ ñi ma");
        assert!(out.edits.is_empty());
    }

    #[test]
    fn n_tilde_converted_in_final_position() {
        let out = run("སོང་ soñ ba señs", roman_ctx());
        assert_eq!(out.text, "སོང་ soṅ ba seṅs");
    }

    #[test]
    fn ng_enforced_from_aligned_syllable() {
        let out = run("དབང་པོ་ dban po", roman_ctx());
        assert_eq!(out.text, "དབང་པོ་ dbaṅ po");
        let placed = out
            .edits
            .iter()
            .find(|e| e.edit.rule == RuleId::NgFromTibetanPrefix)
            .expect("ng edit");
        assert_eq!(placed.edit.before, "dban");
        assert_eq!(placed.edit.after, "dbaṅ");
        assert_eq!(placed.edit.anchor.as_deref(), Some("དབང"));
        assert_eq!(placed.span_type, SpanType::Romanization);
    }

    #[test]
    fn ng_not_enforced_without_nga() {
        let out = run("དབན་ dban po", roman_ctx());
        assert_eq!(out.text, "དབན་ dban po");
    }

    #[test]
    fn umlaut_macron_under_sanskrit_marker() {
        let block = BlockContext {
            sanskrit: true,
            ..BlockContext::default()
        };
        let out = run("Skt. mahäyäna sütra", block);
        assert_eq!(out.text, "Skt. mahāyāna sūtra");
        assert!(out.edits.iter().all(|e| e.edit.rule == RuleId::UmlautMacron));
    }

    #[test]
    fn german_prose_keeps_umlauts() {
        let block = BlockContext {
            german_dominant: true,
            ..BlockContext::default()
        };
        let out = run("über die Wüste", block);
        assert_eq!(out.text, "über die Wüste");
        assert!(out.edits.is_empty());
    }

    #[test]
    fn bibliography_block_suppresses_cue_only_repairs() {
        let block = BlockContext {
            bibliography: true,
            german_dominant: true,
            ..BlockContext::default()
        };
        // "Thömi" carries a translit cluster cue but sits in a citation.
        let out = run("Thömi, Berlin 1905, pp. 12", block);
        assert_eq!(out.text, "Thömi, Berlin 1905, pp. 12");
    }

    #[test]
    fn cedilla_repairs_under_evidence() {
        let block = BlockContext {
            sanskrit: true,
            ..BlockContext::default()
        };
        let out = run("Skt. kṛşṇa", block);
        assert_eq!(out.text, "Skt. kṛṣṇa");
        assert!(out
            .edits
            .iter()
            .any(|e| e.edit.rule == RuleId::CedillaRetroflex));
    }

    #[test]
    fn noise_tokens_dropped_after_prefix() {
        let out = run("བཀྲ་ཤིས་ bkra 300: śis", roman_ctx());
        assert_eq!(out.text, "བཀྲ་ཤིས་ bkra śis");
        let drop = out
            .edits
            .iter()
            .find(|e| e.edit.rule == RuleId::NoiseTokenDrop)
            .expect("noise drop edit");
        assert_eq!(drop.edit.before, "300:");
        assert!(drop.edit.after.is_empty());
    }

    #[test]
    fn all_noise_tail_left_alone() {
        let (text, edits) = drop_roman_tail_noise("བཀྲ་ 300:300");
        assert_eq!(text, "བཀྲ་ 300:300");
        assert!(edits.is_empty());
    }

    #[test]
    fn pa_apostrophe_restored() {
        let out = run("དཔའ་ dpa' bo pa' yin", roman_ctx());
        assert_eq!(out.text, "དཔའ་ dpa' bo pa'i yin");
    }

    #[test]
    fn tie_falls_to_conservative_set() {
        // A Latin span with a Sanskritic cue but nothing to repair: both
        // german_safe and sanskrit_strict score zero, identity wins.
        let block = BlockContext {
            sanskrit: true,
            ..BlockContext::default()
        };
        let spans = split_spans("dharma lehre", block);
        let rw = rewrite_span(&spans[0], "dharma lehre", &[], &[]);
        assert_eq!(rw.rule_set, RuleSet::Identity);
        assert!(rw.edits.is_empty());
    }

    #[test]
    fn stray_symbols_removed_in_german_scope() {
        let out = run("Wüste € und Steppe", BlockContext::default());
        assert_eq!(out.text, "Wüste und Steppe");
        assert_eq!(out.edits.len(), 1);
        assert_eq!(out.edits[0].edit.rule, RuleId::StraySymbolDrop);
    }

    #[test]
    fn builtin_table_covers_the_fixed_battery() {
        assert!(builtin_pair_approved(RuleId::ConfusableWord, "Ita", "lta"));
        assert!(builtin_pair_approved(RuleId::DollarSAcute, "$es", "śes"));
        assert!(builtin_pair_approved(RuleId::UmlautMacron, "dharmä", "dharmā"));
        assert!(builtin_pair_approved(RuleId::StraySymbolDrop, "€", ""));
        // Identity pairs and wrong targets are not approved.
        assert!(!builtin_pair_approved(RuleId::ConfusableWord, "Ita", "Ita"));
        assert!(!builtin_pair_approved(RuleId::DollarSAcute, "$es", "zes"));
        // Anchor-driven rules justify themselves through the anchor.
        assert!(!builtin_pair_approved(
            RuleId::NgFromTibetanPrefix,
            "dban",
            "dbaṅ"
        ));
    }
}
