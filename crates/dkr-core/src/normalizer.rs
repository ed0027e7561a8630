//! Term normalizer — rewrites known-wrong terminology in an answer
//!
//! Normalizations run once each, in declaration order, over the text left
//! by the previous one. There is no fixpoint iteration: a replacement that
//! contains its own pattern is applied exactly once.
//!
//! Patterns are literals. Case-insensitive patterns go through an escaped
//! `regex` so that non-ASCII letters fold correctly. `RuleSet::new`
//! compiles those once; `normalize` only reuses them.

use regex::{NoExpand, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::parser::ast::{Normalization, RuleSet};

/// A normalization whose pattern occurred in the text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedNormalization {
    pub pattern: String,
    pub replacement: String,
}

/// Apply every normalization of `rules` to `text`, in order
///
/// Returns the rewritten text and the normalizations that matched.
/// Text containing none of the patterns comes back unchanged with an
/// empty list.
pub fn normalize(rules: &RuleSet, text: &str) -> (String, Vec<AppliedNormalization>) {
    let mut current = text.to_string();
    let mut applied = Vec::new();

    let compiled = rules.normalization_patterns();
    for (normalization, re) in rules.normalizations().iter().zip(compiled) {
        if let Some(rewritten) = replace(normalization, re.as_ref(), &current) {
            current = rewritten;
            applied.push(AppliedNormalization {
                pattern: normalization.pattern.clone(),
                replacement: normalization.replacement.clone(),
            });
        }
    }

    (current, applied)
}

/// Replace every occurrence of one pattern; `None` if it does not occur
///
/// Compiles the pattern on each call. Use `normalize` for a whole rule set.
pub fn apply(normalization: &Normalization, text: &str) -> Option<String> {
    replace(normalization, compile(normalization).as_ref(), text)
}

/// Case-insensitive matcher for one normalization
///
/// `None` for case-sensitive or empty patterns, and for patterns the
/// regex engine rejects (logged and skipped).
pub(crate) fn compile(normalization: &Normalization) -> Option<Regex> {
    let pattern = normalization.pattern.as_str();
    if pattern.is_empty() || normalization.case_sensitive {
        return None;
    }

    match RegexBuilder::new(&regex::escape(pattern))
        .case_insensitive(true)
        .build()
    {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(pattern, error = %e, "skipping normalization that cannot be compiled");
            None
        }
    }
}

fn replace(normalization: &Normalization, re: Option<&Regex>, text: &str) -> Option<String> {
    let pattern = normalization.pattern.as_str();
    if pattern.is_empty() {
        return None;
    }

    if normalization.case_sensitive {
        return text
            .contains(pattern)
            .then(|| text.replace(pattern, &normalization.replacement));
    }

    let re = re?;
    if !re.is_match(text) {
        return None;
    }
    Some(
        re.replace_all(text, NoExpand(&normalization.replacement))
            .into_owned(),
    )
}
