//! Synonym-aware containment
//!
//! Every phrase check in the engine goes through `Matcher::contains`:
//! a phrase is found in a text if, case-insensitively, the phrase itself
//! or one of its synonym variants occurs as a substring.
//!
//! A variant is produced by taking a synonym group (canonical term plus
//! alternates) with a member occurring in the phrase and replacing that
//! member by each other member of the group. Groups compose: each group is
//! applied to every variant produced by the groups before it, so a phrase
//! touching two groups also matches text where both terms were swapped.
//! At most `MAX_VARIANTS` variants are produced per phrase.

use crate::parser::ast::RuleSet;

/// Upper bound on variants generated for one phrase
pub const MAX_VARIANTS: usize = 256;

/// Containment checks against a text, widened by a rule set's synonym table
#[derive(Debug, Clone, Copy)]
pub struct Matcher<'r> {
    groups: &'r [Vec<String>],
}

impl<'r> Matcher<'r> {
    pub fn new(rules: &'r RuleSet) -> Self {
        Matcher {
            groups: rules.synonym_groups(),
        }
    }

    /// Matcher with no synonyms: plain case-insensitive substring search
    pub fn literal() -> Self {
        Matcher { groups: &[] }
    }

    /// The phrase (lower-cased) followed by all its distinct variants
    pub fn variants(&self, phrase: &str) -> Vec<String> {
        let phrase = phrase.to_lowercase();
        let mut out = vec![phrase.clone()];

        for group in self.groups {
            let produced = out.len();
            for i in 0..produced {
                let base = out[i].clone();
                for member in group.iter().filter(|m| base.contains(m.as_str())) {
                    for other in group.iter().filter(|o| *o != member) {
                        if out.len() >= MAX_VARIANTS {
                            return out;
                        }
                        let variant = base.replace(member.as_str(), other);
                        if !out.contains(&variant) {
                            out.push(variant);
                        }
                    }
                }
            }
        }

        out
    }

    /// True if `phrase` or any of its variants occurs in `text`
    pub fn contains(&self, text: &str, phrase: &str) -> bool {
        if phrase.trim().is_empty() {
            return false;
        }
        let text = text.to_lowercase();
        self.variants(phrase)
            .iter()
            .any(|variant| text.contains(variant.as_str()))
    }

    /// True if at least one phrase is contained (OR-group)
    pub fn contains_any<S: AsRef<str>>(&self, text: &str, phrases: &[S]) -> bool {
        phrases.iter().any(|p| self.contains(text, p.as_ref()))
    }

    /// True if every phrase is contained (AND-set); vacuously true when empty
    pub fn contains_all<S: AsRef<str>>(&self, text: &str, phrases: &[S]) -> bool {
        phrases.iter().all(|p| self.contains(text, p.as_ref()))
    }

    /// True if no phrase is contained; vacuously true when empty
    pub fn contains_none<S: AsRef<str>>(&self, text: &str, phrases: &[S]) -> bool {
        !phrases.iter().any(|p| self.contains(text, p.as_ref()))
    }
}
