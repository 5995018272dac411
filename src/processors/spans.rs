//! Line zone detection and span partitioning.
//!
//! Dictionary pages interleave three kinds of material on a single line:
//! a Tibetan-script headword, a romanized transliteration of it, and Latin
//! text (German glosses, Sanskrit equivalents, bibliographic citations).
//! This module classifies each line into zones, derives a block context
//! from the surrounding lines, and partitions the line into ordered,
//! non-overlapping byte-offset spans that later normalization stages key
//! their rule sets on.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{BlockContext, Scope, Span, SpanType};
use crate::processors::text::{
    has_latin, has_tibetan, normalize_text, tibetan_prefix_len, token_looks_sanskritic,
    translit_lead_len, translit_tail_after_tibetan, WORD_RE,
};

/// Citation markers typical of the bibliography sections. The original
/// page layout abbreviates editors, page ranges, and volumes this way.
static BIBLIO_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:ed\.?:|hrsg\.|pp\.|vol\.|nr\.|no\.|ibid\.|cf\.|trans\.|tr\.)")
        .expect("bibliography marker regex")
});

/// Four-digit years in the plausible publication range.
static YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:1[89]\d{2}|20\d{2})\b").expect("year regex"));

/// Explicit Sanskrit labels, e.g. `Skt.` or `sanskrit:`. The trailing
/// delimiter is validated separately since it must not be consumed.
static SKT_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:skt|skr|sanskrit)\.?").expect("sanskrit label regex"));

/// An equals sign introducing a transliteration equivalent (`= dharma`).
static EQUALS_TRANSLIT_HINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new("=\\s*[A-Za-z'\u{2019}\u{e4}\u{c4}\u{101}\u{12b}\u{16b}\u{1e5b}\u{1e5d}\u{1e37}\u{1e39}\u{1e45}\u{f1}\u{1e6d}\u{1e0d}\u{1e47}\u{15b}\u{1e63}\u{1e25}\u{1e43}\u{1e41}\u{17a}]{2,}")
        .expect("equals hint regex")
});

/// Zone labels a single line can carry. A line may sit in several zones
/// at once (a headword line is both `tibetan` and `romanization`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineZones {
    pub tibetan: bool,
    pub romanization: bool,
    pub sanskrit: bool,
    pub bibliography: bool,
    pub german_prose: bool,
}

impl LineZones {
    /// Comma-joined sorted zone labels for anomaly rows. Empty string when
    /// no zone applies.
    pub fn labels(&self) -> String {
        let mut out: Vec<&str> = Vec::new();
        if self.bibliography {
            out.push("bibliography");
        }
        if self.german_prose {
            out.push("german_prose");
        }
        if self.romanization {
            out.push("romanization");
        }
        if self.sanskrit {
            out.push("sanskrit");
        }
        if self.tibetan {
            out.push("tibetan");
        }
        out.join(",")
    }
}

/// Whether the line reads like a bibliographic citation: either a marker
/// together with a year, two or more years, or a marker with heavy
/// comma/semicolon punctuation.
pub fn is_bibliography_line(s: &str) -> bool {
    if s.is_empty() || !has_latin(s) {
        return false;
    }
    let marker_hits = BIBLIO_MARKER_RE.find_iter(s).count();
    let year_hits = YEAR_RE.find_iter(s).count();
    let sep_hits = s.chars().filter(|&c| c == ',' || c == ';').count();
    (marker_hits >= 1 && year_hits >= 1) || year_hits >= 2 || (marker_hits >= 1 && sep_hits >= 2)
}

/// Whether an explicit Sanskrit label occurs anywhere in the line. The
/// label must be followed by whitespace, end of line, or light
/// punctuation so that e.g. `skribent` does not count.
pub(crate) fn has_sanskrit_label(s: &str) -> bool {
    sanskrit_label_ends(s).next().is_some()
}

/// End offsets of every validated Sanskrit label in the line.
fn sanskrit_label_ends(s: &str) -> impl Iterator<Item = usize> + '_ {
    SKT_LABEL_RE.find_iter(s).filter_map(|m| {
        let ok = match s[m.end()..].chars().next() {
            None => true,
            Some(c) => c.is_whitespace() || matches!(c, ':' | ';' | ',' | ')' | ']' | '}'),
        };
        ok.then_some(m.end())
    })
}

/// Classifies a single normalized line into zones.
///
/// Romanization and Sanskrit zones suppress the `german_prose` label: a
/// line carrying transliteration is not counted as prose even when it
/// also holds Latin glosses.
pub fn line_zones(s: &str) -> LineZones {
    let mut zones = LineZones::default();
    if s.is_empty() {
        return zones;
    }
    let latin = has_latin(s);
    zones.tibetan = has_tibetan(s);
    zones.bibliography = is_bibliography_line(s);
    zones.romanization =
        zones.tibetan && translit_tail_after_tibetan(s).is_some_and(|t| !t.is_empty());
    if has_sanskrit_label(s) || EQUALS_TRANSLIT_HINT_RE.is_match(s) {
        zones.sanskrit = true;
    } else if latin && !zones.bibliography {
        zones.sanskrit = WORD_RE
            .find_iter(s)
            .any(|m| token_looks_sanskritic(m.as_str()));
    }
    zones.german_prose = latin && !zones.romanization && !zones.sanskrit;
    zones
}

/// Aggregates zone evidence over a window of neighboring lines
/// (`idx` plus/minus `window`) into a block context.
///
/// # Arguments
///
/// * `lines` - All line texts of the page, in order.
/// * `idx` - Index of the line being classified.
/// * `window` - Lines to inspect on each side.
pub fn classify_block_context<S: AsRef<str>>(lines: &[S], idx: usize, window: usize) -> BlockContext {
    let mut tibetan = 0usize;
    let mut romanization = 0usize;
    let mut sanskrit = 0usize;
    let mut bibliography = 0usize;
    let mut german_prose = 0usize;

    let start = idx.saturating_sub(window);
    let end = (idx + window + 1).min(lines.len());
    for line in &lines[start..end] {
        let zones = line_zones(&normalize_text(line.as_ref()));
        tibetan += zones.tibetan as usize;
        romanization += zones.romanization as usize;
        sanskrit += zones.sanskrit as usize;
        bibliography += zones.bibliography as usize;
        german_prose += zones.german_prose as usize;
    }

    let span = (end - start).max(1);
    // One citation line alone does not make a bibliography block unless
    // prose surrounds it and no Tibetan headwords are nearby.
    let bib = bibliography >= 2
        || (bibliography >= 1 && german_prose >= 1 && tibetan == 0);
    BlockContext {
        tibetan: tibetan >= 1,
        romanization: romanization >= 1,
        sanskrit: sanskrit >= 1,
        bibliography: bib,
        german_dominant: german_prose >= span / 2,
    }
}

/// Byte ranges of the line under explicit Sanskrit evidence: text after a
/// Sanskrit label up to the next closing punctuation, and single tokens
/// after an equals sign. Ranges are sorted and merged.
pub fn sanskrit_marker_ranges(s: &str) -> Vec<(usize, usize)> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    let end_marks = |c: char| matches!(c, ';' | ':' | ',' | '.' | '!' | '?' | ')' | ']' | '}' | '\u{bb}' | '\u{201c}' | '\u{201d}' | '"');

    for label_end in sanskrit_label_ends(s) {
        let mut i = label_end;
        for (idx, c) in s[label_end..].char_indices() {
            if !c.is_whitespace() {
                i = label_end + idx;
                break;
            }
            i = label_end + idx + c.len_utf8();
        }
        let mut j = i;
        for (idx, c) in s[i..].char_indices() {
            if end_marks(c) {
                break;
            }
            j = i + idx + c.len_utf8();
        }
        if i < j {
            ranges.push((i, j));
        }
    }

    let eq_end_marks = |c: char| matches!(c, ',' | ';' | ':' | '.' | ')' | ']' | '}' | '"' | '\u{201c}' | '\u{201d}');
    let mut pos = 0;
    while let Some(off) = s[pos..].find('=') {
        let after = pos + off + 1;
        let ws = s[after..]
            .char_indices()
            .find(|(_, c)| !c.is_whitespace())
            .map(|(i, _)| i);
        let Some(ws) = ws else { break };
        let tok_start = after + ws;
        let mut tok_end = tok_start;
        for (idx, c) in s[tok_start..].char_indices() {
            if c.is_whitespace() || eq_end_marks(c) {
                break;
            }
            tok_end = tok_start + idx + c.len_utf8();
        }
        if tok_start < tok_end {
            ranges.push((tok_start, tok_end));
        }
        pos = tok_end.max(after);
    }

    ranges.sort_unstable();
    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (st, en) in ranges {
        match merged.last_mut() {
            Some(last) if st <= last.1 => last.1 = last.1.max(en),
            _ => merged.push((st, en)),
        }
    }
    merged
}

/// Whether a byte position falls inside one of the ranges.
pub fn in_ranges(pos: usize, ranges: &[(usize, usize)]) -> bool {
    ranges.iter().any(|&(st, en)| st <= pos && pos < en)
}

/// Partitions a line into ordered, non-overlapping spans covering every
/// byte: an optional Tibetan-script prefix, an optional romanization
/// lead-token run, and a Latin remainder.
///
/// Ambiguous material defaults to a Latin span with the conservative
/// German scope (bibliographic context narrows it to citation names).
/// Tibetan script itself carries no scope since it is never rewritten.
pub fn split_spans(line: &str, block: BlockContext) -> Vec<Span> {
    let latin_scope = if block.bibliography {
        Scope::BibliographyName
    } else {
        Scope::German
    };
    let latin = |start: usize, end: usize| Span {
        kind: SpanType::Latin,
        scope: Some(latin_scope),
        block,
        start,
        end,
    };

    let Some(plen) = tibetan_prefix_len(line) else {
        if line.is_empty() {
            return Vec::new();
        }
        return vec![latin(0, line.len())];
    };

    let tibetan = Span {
        kind: SpanType::TibetanScript,
        scope: None,
        block,
        start: 0,
        end: plen,
    };
    if plen == line.len() {
        return vec![tibetan];
    }

    let tail = &line[plen..];
    let lead = translit_lead_len(tail);
    if lead == 0 {
        return vec![tibetan, latin(plen, line.len())];
    }

    let roman = Span {
        kind: SpanType::Romanization,
        scope: Some(Scope::Romanization),
        block,
        start: plen,
        end: plen + lead,
    };
    let mut spans = vec![tibetan, roman];
    if plen + lead < line.len() {
        spans.push(latin(plen + lead, line.len()));
    }
    spans
}
