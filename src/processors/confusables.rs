//! Post-merge confusable cleanup.
//!
//! A short, ordered list of exact literal substitutions for OCR confusions
//! that are stable enough to fix unconditionally: whole-word misreads of a
//! leading `l` as capital `I`, the `$` glyph standing in for `ś`, and any
//! remaining word-initial `I` before another letter. The pass runs once,
//! after merge and normalization; earlier rules may create the precondition
//! for later ones, but no rule re-triggers on its own output.

use crate::domain::RuleId;
use crate::processors::normalize::{fix_dollar, fix_post_words, stage, word_char, TokenEdit};
use crate::processors::text::is_extended_letter;

/// Word-initial capital `I` directly before another letter is a misread
/// `l` in this corpus; real capital `I` words do not occur.
pub(crate) fn fix_capital_i(tok: &str) -> String {
    let chars: Vec<char> = tok.chars().collect();
    let mut out = String::with_capacity(tok.len());
    for (i, &c) in chars.iter().enumerate() {
        if c == 'I'
            && (i == 0 || !word_char(chars[i - 1]))
            && chars.get(i + 1).is_some_and(|&n| is_extended_letter(n))
        {
            out.push('l');
            continue;
        }
        out.push(c);
    }
    out
}

/// Applies the fixed confusable list to a line, in order, in a single
/// pass. Returns the cleaned line and one edit per changed token per rule,
/// each paired with the token's byte offset in the input line so the
/// caller can attribute it to the span it fired in.
pub fn cleanup_confusables(line: &str) -> (String, Vec<(usize, TokenEdit)>) {
    let mut edits = Vec::new();
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    let mut base = 0;
    while !rest.is_empty() {
        let ws_len = rest.len() - rest.trim_start().len();
        out.push_str(&rest[..ws_len]);
        base += ws_len;
        rest = &rest[ws_len..];
        if rest.is_empty() {
            break;
        }
        let tok_end = rest
            .char_indices()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let mut cur = rest[..tok_end].to_string();
        let mut tok_edits = Vec::new();
        let next = fix_post_words(&cur);
        stage(&mut cur, next, RuleId::ConfusableWord, &mut tok_edits);
        let next = fix_dollar(&cur);
        stage(&mut cur, next, RuleId::DollarSAcute, &mut tok_edits);
        let next = fix_capital_i(&cur);
        stage(&mut cur, next, RuleId::ConfusableWord, &mut tok_edits);
        out.push_str(&cur);
        edits.extend(tok_edits.into_iter().map(|e| (base, e)));
        base += tok_end;
        rest = &rest[tok_end..];
    }
    (out, edits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_word_confusables() {
        let (out, edits) = cleanup_confusables("Ita ba daṅ Idan pa gyl");
        assert_eq!(out, "lta ba daṅ ldan pa gyi");
        assert_eq!(edits.len(), 3);
        assert!(edits.iter().all(|(_, e)| e.rule == RuleId::ConfusableWord));
    }

    #[test]
    fn dollar_for_s_acute() {
        let line = "rig pa $es rab kyi pha rol";
        let (out, edits) = cleanup_confusables(line);
        assert_eq!(out, "rig pa śes rab kyi pha rol");
        let (offset, edit) = &edits[0];
        assert_eq!(edit.rule, RuleId::DollarSAcute);
        assert_eq!(edit.before, "$es");
        assert_eq!(edit.after, "śes");
        // Offsets point at the token in the input line.
        assert_eq!(*offset, line.find("$es").unwrap());
    }

    #[test]
    fn generic_capital_i_before_letter() {
        let (out, _) = cleanup_confusables("Icags po ri");
        assert_eq!(out, "lcags po ri");
    }

    #[test]
    fn capital_i_kept_after_letter() {
        let (out, edits) = cleanup_confusables("MIt 1901");
        assert_eq!(out, "MIt 1901");
        assert!(edits.is_empty());
    }

    #[test]
    fn single_pass_does_not_retrigger() {
        // `Itar` becomes `ltar` via the word list; the capital-I rule then
        // finds nothing left to do.
        let (out, edits) = cleanup_confusables("Itar snaṅ");
        assert_eq!(out, "ltar snaṅ");
        assert_eq!(edits.len(), 1);
    }
}
