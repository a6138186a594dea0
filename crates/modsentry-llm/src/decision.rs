//! Decision extraction from free-text model answers.
//!
//! Models are asked to finish with `DECISION: REMOVE` or `DECISION: KEEP`,
//! but they do not always comply. The extractor tries progressively looser
//! readings, in order:
//!
//! 1. `DECISION: <word>` anywhere (removal words win over keep words)
//! 2. `DECISION <word>` without the colon
//! 3. a decision word at the very end of the answer
//! 4. a decision word on the last line
//! 5. whichever decision word occurs last in the whole answer
//! 6. modal phrases such as "should be removed" or "leave it"
//!
//! Matching is case-insensitive and accepts inflections (removed, deletion,
//! banned, kept, approved, ...).

use std::sync::LazyLock;

use modsentry_types::VerdictKind;
use regex::Regex;

/// The two answers a model can give.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Remove,
    Keep,
}

impl Decision {
    pub fn verdict(self) -> VerdictKind {
        match self {
            Decision::Remove => VerdictKind::Act,
            Decision::Keep => VerdictKind::NoAct,
        }
    }
}

const REMOVE_WORDS: &str =
    r"(?:REMOV(?:E|ED|ING|AL|ES)|DELET(?:E|ED|ING|ION)|BAN(?:NED|NING)?|BLOCK(?:ED|ING)?|ELIMINAT(?:E|ED|ING|ION))";
const KEEP_WORDS: &str = r"(?:KEEP(?:S|ING|ER)?|KEPT|RETAIN(?:ED|ING|S)?|ALLOW(?:ED|ING|S)?|APPROV(?:E|ED|ING|AL)|ACCEPT(?:ED|ING|S)?|PERMIT(?:TED|TING|S)?)";

const MODAL_REMOVE: &[&str] = &[
    r"(?:SHOULD|MUST|WILL|NEED TO|OUGHT TO)\s+(?:BE\s+)?(?:REMOV|DELET|BAN)",
    r"(?:BEEN|WAS|IS)\s+(?:REMOV|DELET|BAN)",
    r"(?:REMOV|DELET|BAN)\s+(?:IT|THIS|THAT)",
    r"\b(?:NEEDS?|REQUIRES?)\s+(?:REMOV|DELET)",
    r"\b(?:GET\s+RID\s+OF|TAKE\s+DOWN|PULL\s+DOWN)\b",
];

const MODAL_KEEP: &[&str] = &[
    r"(?:SHOULD|MUST|WILL|CAN|OUGHT TO)\s+(?:BE\s+)?(?:KEEP|RETAIN|ALLOW|STAY)",
    r"(?:BEEN|WAS|IS)\s+(?:KEEP|RETAIN|ALLOW)",
    r"(?:KEEP|RETAIN|ALLOW)\s+(?:IT|THIS|THAT)",
    r"\b(?:LET\s+IT\s+STAY|LEAVE\s+IT|CAN\s+STAY)\b",
    r"\b(?:NO\s+NEED\s+TO\s+REMOV|DOES\s+NOT\s+NEED\s+REMOV)",
];

/// One compiled reading: a removal pattern and a keep pattern.
struct Pair {
    remove: Regex,
    keep: Regex,
}

impl Pair {
    fn new(template: &str) -> Self {
        Self {
            remove: compile(&template.replace("{W}", REMOVE_WORDS)),
            keep: compile(&template.replace("{W}", KEEP_WORDS)),
        }
    }

    fn decide(&self, text: &str) -> Option<Decision> {
        if self.remove.is_match(text) {
            Some(Decision::Remove)
        } else if self.keep.is_match(text) {
            Some(Decision::Keep)
        } else {
            None
        }
    }
}

struct Patterns {
    formal_colon: Pair,
    formal_space: Pair,
    trailing: Pair,
    word: Pair,
    modal_remove: Vec<Regex>,
    modal_keep: Vec<Regex>,
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("decision patterns are static and valid")
}

static PATTERNS: LazyLock<Patterns> = LazyLock::new(|| Patterns {
    formal_colon: Pair::new(r"DECISION\s*:\s*{W}"),
    formal_space: Pair::new(r"DECISION\s+{W}"),
    trailing: Pair::new(r"\b{W}\s*$"),
    word: Pair::new(r"\b{W}\b"),
    modal_remove: MODAL_REMOVE.iter().map(|p| compile(p)).collect(),
    modal_keep: MODAL_KEEP.iter().map(|p| compile(p)).collect(),
});

/// Extract the model's decision, or `None` when no reading applies.
pub fn extract_decision(answer: &str) -> Option<Decision> {
    let text = answer.trim().to_uppercase();
    let p = &*PATTERNS;

    if let Some(d) = p.formal_colon.decide(&text) {
        return Some(d);
    }
    if let Some(d) = p.formal_space.decide(&text) {
        return Some(d);
    }
    if let Some(d) = p.trailing.decide(&text) {
        return Some(d);
    }

    let last_line = text.lines().last().unwrap_or("").trim();
    if let Some(d) = p.word.decide(last_line) {
        return Some(d);
    }

    let last_remove = p.word.remove.find_iter(&text).map(|m| m.start()).max();
    let last_keep = p.word.keep.find_iter(&text).map(|m| m.start()).max();
    match (last_remove, last_keep) {
        (Some(r), Some(k)) => {
            return Some(if r > k { Decision::Remove } else { Decision::Keep });
        }
        (Some(_), None) => return Some(Decision::Remove),
        (None, Some(_)) => return Some(Decision::Keep),
        (None, None) => {}
    }

    if p.modal_remove.iter().any(|re| re.is_match(&text)) {
        return Some(Decision::Remove);
    }
    if p.modal_keep.iter().any(|re| re.is_match(&text)) {
        return Some(Decision::Keep);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formal_decision_lines() {
        assert_eq!(
            extract_decision("Reasoning: spam link.\n\nDECISION: REMOVE"),
            Some(Decision::Remove)
        );
        assert_eq!(
            extract_decision("Reasoning: fine.\n\nDecision: keep"),
            Some(Decision::Keep)
        );
        assert_eq!(
            extract_decision("decision:removed because of insults"),
            Some(Decision::Remove)
        );
    }

    #[test]
    fn formal_removal_wins_over_keep_mentions() {
        let answer = "I considered whether to keep it.\nDECISION: REMOVE";
        assert_eq!(extract_decision(answer), Some(Decision::Remove));
    }

    #[test]
    fn decision_without_colon() {
        assert_eq!(
            extract_decision("Final DECISION KEEP"),
            Some(Decision::Keep)
        );
    }

    #[test]
    fn trailing_word() {
        assert_eq!(
            extract_decision("This is clearly harassment. Remove"),
            Some(Decision::Remove)
        );
        assert_eq!(
            extract_decision("Nothing wrong here, approved"),
            Some(Decision::Keep)
        );
    }

    #[test]
    fn last_occurrence_wins() {
        let answer = "At first glance one might remove this, but on reflection we keep it as is.\nThanks.";
        assert_eq!(extract_decision(answer), Some(Decision::Keep));
    }

    #[test]
    fn modal_phrases() {
        assert_eq!(
            extract_decision("We should get rid of this one."),
            Some(Decision::Remove)
        );
        assert_eq!(
            extract_decision("Just leave it, nothing to see."),
            Some(Decision::Keep)
        );
    }

    #[test]
    fn inflections_do_not_match_inside_other_words() {
        // "BANANA" must not count as "BAN".
        assert_eq!(extract_decision("I like bananas."), None);
    }

    #[test]
    fn nothing_found() {
        assert_eq!(extract_decision(""), None);
        assert_eq!(extract_decision("I am not sure what to say."), None);
    }

    #[test]
    fn maps_to_verdicts() {
        assert_eq!(Decision::Remove.verdict(), VerdictKind::Act);
        assert_eq!(Decision::Keep.verdict(), VerdictKind::NoAct);
    }
}
