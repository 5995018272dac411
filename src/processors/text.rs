//! Character- and token-level text utilities shared across the pipeline.
//!
//! Everything here is pure and line-local: script detection, Unicode
//! normalization, diacritic censuses, merge skeletons, and the token-shape
//! predicates the classifier and normalizer are built on.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Latin letters extended with the IAST diacritics and the German/OCR extras
/// seen in this corpus. Used to build token patterns.
const EXTENDED_LATIN: &str = "A-Za-z\u{0101}\u{0100}\u{012B}\u{012A}\u{016B}\u{016A}\
\u{1E5B}\u{1E5A}\u{1E5D}\u{1E5C}\u{1E37}\u{1E36}\u{1E39}\u{1E38}\u{1E45}\u{1E44}\
\u{00F1}\u{00D1}\u{1E6D}\u{1E6C}\u{1E0D}\u{1E0C}\u{1E47}\u{1E46}\u{015B}\u{015A}\
\u{1E63}\u{1E62}\u{1E25}\u{1E24}\u{1E43}\u{1E42}\u{1E41}\u{1E40}\u{017A}\u{0179}\
\u{00E4}\u{00C4}\u{00F6}\u{00D6}\u{00FC}\u{00DC}\u{00DF}\u{0131}\u{015F}\u{015E}\
\u{0146}\u{0145}\u{00E3}\u{00C3}";

/// A word: extended-Latin letter run, optionally hyphen-joined.
pub static WORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        "[{lat}]+(?:-[{lat}]+)*",
        lat = EXTENDED_LATIN
    ))
    .expect("word pattern")
});

/// Transliteration-shaped token: letters, IAST diacritics, apostrophes.
static TOKEN_TRANSLIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("^[{lat}'\u{2019}]+$", lat = EXTENDED_LATIN)).expect("translit pattern")
});

/// Any Latin-ish token including hyphens and apostrophes.
static TOKEN_ANY_LATIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("^[{lat}'\u{2019}-]+$", lat = EXTENDED_LATIN)).expect("latin pattern")
});

/// Aspirate/affricate clusters and apostrophes that cue transliteration.
static TRANSLIT_CLUSTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)kh|tsh|ts|ch|ph|th|dh|bh|rdz|dz|'|\u{2019}").expect("cluster"));

/// Sanskritic cluster shapes over the ASCII base form of a token.
static SANSKRIT_CLUSTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"bh|dh|gh|kh|ph|th|sh|tsh|dz|rdz").expect("skt cluster"));

/// Digit/punctuation-only noise token.
static ROMAN_NOISE_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9:/%.,;+\-]{2,}$").expect("noise token"));

/// Three-digit-or-longer runs.
static DIGIT_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{3,}").expect("digit run"));

/// Sanskrit-hint substrings checked against a token's ASCII base form.
const SANSKRIT_HINT_SUBSTRINGS: &[&str] = &[
    "sutra",
    "tantra",
    "karika",
    "vinaya",
    "abhidharma",
    "abhidhana",
    "nidana",
    "bhumika",
    "megha",
    "duta",
    "dharma",
    "prajna",
    "vajra",
    "yoga",
    "mantra",
];

/// Whether a char is in the Tibetan Unicode block.
pub fn is_tibetan(c: char) -> bool {
    ('\u{0F00}'..='\u{0FFF}').contains(&c)
}

/// Whether a char is in the Devanagari block.
pub fn is_devanagari(c: char) -> bool {
    ('\u{0900}'..='\u{097F}').contains(&c)
}

/// ASCII Latin letter.
pub fn is_ascii_latin(c: char) -> bool {
    c.is_ascii_alphabetic()
}

/// Tsheg, shad, and other Tibetan separators plus Tibetan digits —
/// the characters stripped when two Tibetan anchors are compared.
pub fn is_tibetan_separator(c: char) -> bool {
    matches!(c,
        '\u{0F0B}'..='\u{0F0F}'
        | '\u{0F11}'..='\u{0F14}'
        | '\u{0F20}'..='\u{0F29}')
}

/// An IAST diacritic letter (either case).
pub fn is_iast_diacritic(c: char) -> bool {
    matches!(
        c,
        'ā' | 'ī' | 'ū' | 'ṛ' | 'ṝ' | 'ḷ' | 'ḹ' | 'ṅ' | 'ñ' | 'ṭ' | 'ḍ' | 'ṇ' | 'ś' | 'ṣ' | 'ḥ'
            | 'ṃ' | 'ṁ' | 'ź' | 'Ā' | 'Ī' | 'Ū' | 'Ṛ' | 'Ṝ' | 'Ḷ' | 'Ḹ' | 'Ṅ' | 'Ñ' | 'Ṭ' | 'Ḍ'
            | 'Ṇ' | 'Ś' | 'Ṣ' | 'Ḥ' | 'Ṃ' | 'Ṁ' | 'Ź'
    )
}

/// A letter for word-boundary purposes: extended Latin incl. diacritics.
pub fn is_extended_letter(c: char) -> bool {
    c.is_ascii_alphabetic()
        || is_iast_diacritic(c)
        || matches!(
            c,
            'ä' | 'Ä' | 'ö' | 'Ö' | 'ü' | 'Ü' | 'ß' | 'ı' | 'ş' | 'Ş' | 'ņ' | 'Ņ' | 'ã' | 'Ã'
        )
}

/// Whether any char of `s` is Tibetan script.
pub fn has_tibetan(s: &str) -> bool {
    s.chars().any(is_tibetan)
}

/// Whether any char of `s` is Devanagari.
pub fn has_devanagari(s: &str) -> bool {
    s.chars().any(is_devanagari)
}

/// Whether any char of `s` is an ASCII Latin letter.
pub fn has_latin(s: &str) -> bool {
    s.chars().any(is_ascii_latin)
}

/// Counts IAST diacritic letters in `s`.
pub fn diacritic_count(s: &str) -> usize {
    s.chars().filter(|&c| is_iast_diacritic(c)).count()
}

fn fold_quote(c: char) -> char {
    match c {
        '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{00AB}' | '\u{00BB}' => '"',
        '\u{2019}' | '\u{2018}' | '\u{201A}' | '\u{201B}' => '\'',
        _ => c,
    }
}

/// Canonical line form: NFC, typographic quotes folded to ASCII, dotless `ı`
/// restored, form feeds and newlines flattened, whitespace squeezed.
///
/// This is the reversible identity-level cleanup every line receives before
/// any decision is made about it.
pub fn normalize_text(s: &str) -> String {
    let folded: String = s
        .nfc()
        .map(fold_quote)
        .map(|c| if c == 'ı' { 'i' } else { c })
        .map(|c| if c == '\u{0C}' || c == '\n' { ' ' } else { c })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Maps a diacritic letter to its base letter; other chars pass through.
/// Covers IAST, German umlauts, and the cedilla/tilde OCR confusions.
pub fn strip_diacritic(c: char) -> char {
    match c {
        'ä' | 'ā' | 'ã' => 'a',
        'Ä' | 'Ā' | 'Ã' => 'A',
        'ī' => 'i',
        'Ī' => 'I',
        'ū' => 'u',
        'Ū' => 'U',
        'ṛ' | 'ṝ' => 'r',
        'Ṛ' | 'Ṝ' => 'R',
        'ḷ' | 'ḹ' => 'l',
        'Ḷ' | 'Ḹ' => 'L',
        'ṅ' | 'ñ' | 'ṇ' | 'ņ' => 'n',
        'Ṅ' | 'Ñ' | 'Ṇ' | 'Ņ' => 'N',
        'ṭ' => 't',
        'Ṭ' => 'T',
        'ḍ' => 'd',
        'Ḍ' => 'D',
        'ś' | 'ṣ' | 'ş' => 's',
        'Ś' | 'Ṣ' | 'Ş' => 'S',
        'ź' => 'z',
        'Ź' => 'Z',
        'ḥ' => 'h',
        'Ḥ' => 'H',
        'ṃ' | 'ṁ' => 'm',
        'Ṃ' | 'Ṁ' => 'M',
        _ => c,
    }
}

/// Folds the stable OCR confusions used when two lines are compared:
/// `$` for `ś`, and word-initial `I` for `l` before another letter, and the
/// isolated `pa'` for `pa'i`.
pub fn fold_confusables_for_compare(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '$' {
            out.push('ś');
            i += 1;
            continue;
        }
        if c == 'I'
            && (i == 0 || !is_extended_letter(chars[i - 1]))
            && chars.get(i + 1).is_some_and(|&n| is_extended_letter(n))
        {
            out.push('l');
            i += 1;
            continue;
        }
        // Isolated pa' / pa’ -> pa'i
        if c == 'p'
            && (i == 0 || !is_extended_letter(chars[i - 1]))
            && chars.get(i + 1) == Some(&'a')
            && matches!(chars.get(i + 2), Some('\'') | Some('\u{2019}'))
            && chars.get(i + 3).is_none_or(|&n| !is_extended_letter(n))
        {
            out.push_str("pa'i");
            i += 3;
            continue;
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Counts suspect OCR artifacts: `$` and word-boundary `I` before a letter.
pub fn suspect_count(s: &str) -> usize {
    let chars: Vec<char> = s.chars().collect();
    let mut count = 0;
    for (i, &c) in chars.iter().enumerate() {
        if c == '$' {
            count += 1;
        } else if c == 'I'
            && (i == 0 || !is_extended_letter(chars[i - 1]))
            && chars.get(i + 1).is_some_and(|&n| is_extended_letter(n))
        {
            count += 1;
        }
    }
    count
}

/// Diacritic- and punctuation-stripped, casefolded skeleton of a line, used
/// to detect near-identical OCR variants that differ only in diacritics and
/// confusables.
pub fn merge_skeleton(s: &str) -> String {
    let folded = fold_confusables_for_compare(s);
    let stripped: String = folded
        .chars()
        .map(strip_diacritic)
        .map(|c| {
            if c.is_ascii_punctuation()
                || matches!(c, '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2018}' | '\u{2019}')
            {
                ' '
            } else {
                c
            }
        })
        .collect();
    normalize_text(&stripped).to_lowercase()
}

/// The line's Tibetan anchor: all Tibetan-block chars with tsheg, shad, and
/// Tibetan digits stripped. Empty when the line has no Tibetan script.
pub fn tibetan_anchor(s: &str) -> String {
    s.chars()
        .filter(|&c| is_tibetan(c) && !is_tibetan_separator(c))
        .collect()
}

/// Byte length of the line's Tibetan headword prefix: the leading run of
/// Tibetan chars, Tibetan separators/digits, and whitespace. `None` when the
/// line does not start with Tibetan script.
pub fn tibetan_prefix_len(s: &str) -> Option<usize> {
    let mut end = 0;
    let mut saw_tibetan = false;
    for (idx, c) in s.char_indices() {
        if is_tibetan(c) || c.is_whitespace() {
            saw_tibetan |= is_tibetan(c) && !is_tibetan_separator(c);
            end = idx + c.len_utf8();
        } else {
            break;
        }
    }
    (saw_tibetan && end > 0).then_some(end)
}

/// The text after the first Tibetan run in the line, or `None` when there is
/// no Tibetan script. The returned slice is not re-normalized.
pub fn translit_tail_after_tibetan(s: &str) -> Option<&str> {
    let start = s.char_indices().find(|(_, c)| is_tibetan(*c))?.0;
    let mut end = start;
    for (idx, c) in s[start..].char_indices() {
        if is_tibetan(c) || c.is_whitespace() {
            end = start + idx + c.len_utf8();
        } else {
            break;
        }
    }
    Some(s[end..].trim())
}

/// Splits a Tibetan prefix into syllables at tsheg/shad/digit/whitespace
/// boundaries.
pub fn tibetan_syllables(prefix: &str) -> Vec<&str> {
    prefix
        .split(|c: char| c.is_whitespace() || is_tibetan_separator(c))
        .filter(|part| !part.is_empty())
        .collect()
}

/// Whether the token consists only of transliteration-shaped characters
/// (letters, IAST diacritics, apostrophes).
pub fn token_is_translit_shaped(tok: &str) -> bool {
    !tok.is_empty() && TOKEN_TRANSLIT_RE.is_match(tok)
}

/// Whether the token is Latin-ish at all (letters, apostrophes, hyphens).
pub fn token_is_latin_shaped(tok: &str) -> bool {
    !tok.is_empty() && TOKEN_ANY_LATIN_RE.is_match(tok)
}

/// Whether the token carries transliteration cues: IAST diacritics or
/// aspirate/affricate clusters or apostrophes.
pub fn token_has_translit_cues(tok: &str) -> bool {
    !tok.is_empty() && (tok.chars().any(is_iast_diacritic) || TRANSLIT_CLUSTER_RE.is_match(tok))
}

/// ASCII base form of a token: diacritics stripped, lowercased, hyphens and
/// apostrophes removed.
pub fn token_to_ascii_base(tok: &str) -> String {
    normalize_text(tok)
        .chars()
        .map(strip_diacritic)
        .map(|c| match c {
            'ö' => 'o',
            'Ö' => 'O',
            _ => c,
        })
        .filter(|&c| c != '-' && c != '\'' && c != '\u{2019}')
        .collect::<String>()
        .to_lowercase()
}

/// Whether a token looks Sanskritic: IAST diacritics, cedilla/tilde
/// confusions, known Sanskrit substrings, or Sanskritic clusters in its
/// ASCII base form.
pub fn token_looks_sanskritic(tok: &str) -> bool {
    if tok.is_empty() || !token_is_latin_shaped(tok) {
        return false;
    }
    if tok.chars().any(is_iast_diacritic) {
        return true;
    }
    if tok.chars().any(|c| matches!(c, 'ş' | 'Ş' | 'ņ' | 'Ņ' | 'ã' | 'Ã')) {
        return true;
    }
    let base = token_to_ascii_base(tok);
    if base.is_empty() {
        return false;
    }
    SANSKRIT_HINT_SUBSTRINGS.iter().any(|h| base.contains(h))
        || SANSKRIT_CLUSTER_RE.is_match(&base)
}

/// A suspect currency/section symbol.
pub fn is_suspect_symbol(c: char) -> bool {
    matches!(c, '£' | '¥' | '¢' | '§' | '¤')
}

/// A character counted as suspect inside a romanization tail: Tibetan
/// digits plus currency/markup symbols.
fn is_roman_tail_suspect(c: char) -> bool {
    ('\u{0F20}'..='\u{0F33}').contains(&c)
        || is_suspect_symbol(c)
        || matches!(c, '@' | '#' | '%' | '^' | '&' | '*' | '_' | '=' | '/' | '\\' | '|' | '~')
}

/// Counts romanization-tail suspect characters in an arbitrary string.
pub fn tail_suspect_count(s: &str) -> usize {
    s.chars().filter(|&c| is_roman_tail_suspect(c)).count()
}

/// Quality of the romanization tail after a Tibetan headword:
/// `(letters, -suspects, diacritics)`, compared lexicographically.
pub fn roman_tail_quality(s: &str) -> (i32, i32, i32) {
    let Some(tail) = translit_tail_after_tibetan(s) else {
        return (0, 0, 0);
    };
    if tail.is_empty() {
        return (0, 0, 0);
    }
    let letters = tail.chars().filter(|&c| is_extended_letter(c)).count() as i32;
    let suspects = tail.chars().filter(|&c| is_roman_tail_suspect(c)).count() as i32;
    let diacritics = diacritic_count(tail) as i32;
    (letters, -suspects, diacritics)
}

/// Count of obvious OCR junk characters in the romanization tail only.
pub fn roman_tail_noise(s: &str) -> i32 {
    let Some(tail) = translit_tail_after_tibetan(s) else {
        return 0;
    };
    tail.chars()
        .filter(|&c| c.is_ascii_digit() || c == ':' || c == '/' || c == '%' || c == '$' || is_roman_tail_suspect(c))
        .count() as i32
}

/// Byte length of the leading run of transliteration-shaped tokens (and
/// their interleaved whitespace) at the start of a headword tail.
pub fn translit_lead_len(tail: &str) -> usize {
    let mut end = 0;
    let mut rest = tail;
    loop {
        let ws_len = rest.len() - rest.trim_start().len();
        let after_ws = &rest[ws_len..];
        if after_ws.is_empty() {
            break;
        }
        let tok_end = after_ws
            .char_indices()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, _)| i)
            .unwrap_or(after_ws.len());
        let tok = &after_ws[..tok_end];
        if !token_is_translit_shaped(tok) {
            break;
        }
        end += ws_len + tok_end;
        rest = &after_ws[tok_end..];
    }
    end
}

/// Three or more identical consecutive digits.
pub fn has_repeated_digit(tok: &str) -> bool {
    let mut run = 0;
    let mut prev = None;
    for c in tok.chars() {
        if c.is_ascii_digit() && Some(c) == prev {
            run += 1;
            if run >= 3 {
                return true;
            }
        } else if c.is_ascii_digit() {
            prev = Some(c);
            run = 1;
        } else {
            prev = None;
            run = 0;
        }
    }
    false
}

/// A three-digit-or-longer run anywhere in the token.
pub fn has_digit_run(tok: &str) -> bool {
    DIGIT_RUN_RE.is_match(tok)
}

/// Mixed letters-and-digits token (OCR artifact shape).
pub fn is_alnum_mixed(tok: &str) -> bool {
    let mut has_letter = false;
    let mut has_digit = false;
    for c in tok.chars() {
        if is_extended_letter(c) {
            has_letter = true;
        } else if c.is_ascii_digit() {
            has_digit = true;
        } else {
            return false;
        }
    }
    has_letter && has_digit
}

/// Whether a token in the romanization slot is digit/symbol noise rather
/// than transliteration.
pub fn is_roman_noise_token(tok: &str) -> bool {
    if tok.is_empty() || token_is_translit_shaped(tok) {
        return false;
    }
    let char_count = tok.chars().count();
    if char_count >= 3 {
        let letters = tok.chars().filter(|&c| is_extended_letter(c)).count();
        let non_letter_ratio = (char_count - letters) as f32 / char_count as f32;
        if non_letter_ratio > 0.40 {
            return true;
        }
    }
    if ROMAN_NOISE_TOKEN_RE.is_match(tok) {
        return true;
    }
    if has_repeated_digit(tok) {
        return true;
    }
    let has_digit = tok.chars().any(|c| c.is_ascii_digit());
    let has_odd_symbol = tok
        .chars()
        .any(|c| !is_extended_letter(c) && !c.is_ascii_digit() && !c.is_whitespace());
    if has_digit && has_odd_symbol {
        return true;
    }
    tok.chars().any(is_suspect_symbol) && !has_latin(tok)
}

/// Whether the line is transliteration-heavy: contains Tibetan script, or at
/// least half (and at least two) of its word tokens carry transliteration
/// cues.
pub fn line_is_translit_heavy(s: &str) -> bool {
    if has_tibetan(s) {
        return true;
    }
    let tokens: Vec<&str> = WORD_RE.find_iter(s).map(|m| m.as_str()).collect();
    if tokens.is_empty() {
        return false;
    }
    let cued = tokens.iter().filter(|t| token_has_translit_cues(t)).count();
    cued >= 2.max(tokens.len() / 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_quotes_and_whitespace() {
        assert_eq!(normalize_text("  a\u{201C}b\u{201D}   c\nd  "), "a\"b\" c d");
        assert_eq!(normalize_text("pa\u{2019}i"), "pa'i");
        assert_eq!(normalize_text("ınıtıal"), "initial");
    }

    #[test]
    fn skeleton_equates_diacritic_variants() {
        assert_eq!(merge_skeleton("bde legs"), merge_skeleton("bde legs"));
        assert_eq!(merge_skeleton("sarana"), merge_skeleton("śaraṇa"));
        assert_eq!(merge_skeleton("nag po"), merge_skeleton("ṅag po"));
        assert_ne!(merge_skeleton("bde legs"), merge_skeleton("bde leg"));
    }

    #[test]
    fn confusable_fold_handles_dollar_and_capital_i() {
        assert_eq!(fold_confusables_for_compare("$es"), "śes");
        assert_eq!(fold_confusables_for_compare("Ita"), "lta");
        assert_eq!(fold_confusables_for_compare("Ich"), "lch");
        // Not at a word boundary.
        assert_eq!(fold_confusables_for_compare("bIa"), "bIa");
        assert_eq!(fold_confusables_for_compare("pa' ba"), "pa'i ba");
    }

    #[test]
    fn anchor_strips_separators() {
        let with_tsheg = "\u{0F56}\u{0F51}\u{0F0B}\u{0F63}\u{0F7A}";
        let without = "\u{0F56}\u{0F51}\u{0F63}\u{0F7A}";
        assert_eq!(tibetan_anchor(with_tsheg), tibetan_anchor(without));
        assert_eq!(tibetan_anchor("no tibetan"), "");
    }

    #[test]
    fn prefix_and_tail_split() {
        let line = "\u{0F56}\u{0F51}\u{0F0B} bde legs";
        let len = tibetan_prefix_len(line).unwrap();
        assert!(line[..len].contains('\u{0F56}'));
        assert_eq!(line[len..].trim(), "bde legs");
        assert_eq!(translit_tail_after_tibetan(line), Some("bde legs"));
        assert_eq!(tibetan_prefix_len("bde legs"), None);
    }

    #[test]
    fn sanskritic_token_detection() {
        assert!(token_looks_sanskritic("dharmakāya"));
        assert!(token_looks_sanskritic("sūtra"));
        assert!(token_looks_sanskritic("abhidharma"));
        assert!(!token_looks_sanskritic("Haus"));
        assert!(!token_looks_sanskritic("und"));
    }

    #[test]
    fn noise_token_detection() {
        assert!(is_roman_noise_token("33:1/0"));
        assert!(is_roman_noise_token("111"));
        assert!(is_roman_noise_token("a1$"));
        assert!(!is_roman_noise_token("bde"));
        assert!(!is_roman_noise_token("pa'i"));
    }

    #[test]
    fn translit_lead_len_stops_at_noise() {
        let tail = "bde legs 33:1 rest";
        let len = translit_lead_len(tail);
        assert_eq!(&tail[..len], "bde legs");
    }

    #[test]
    fn translit_heavy_lines() {
        assert!(line_is_translit_heavy("ṅag gi dbaṅ phyug sṅags"));
        assert!(line_is_translit_heavy("tshig dang dharma"));
        assert!(!line_is_translit_heavy("Dieses Buch ist gut"));
    }
}
