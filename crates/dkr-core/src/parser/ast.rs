//! Rule-set model — the parsed form of a `.rules` file
//!
//! Every node keeps the 1-based source line it was declared on so the
//! validator and the CLI can point back into the file.
//!
//! A `RuleSet` is immutable after construction: fields are private and only
//! exposed through shared accessors. Reloading a file builds a new set.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::normalizer;

/// Criticality level of a domain fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Criticality {
    Low,
    Medium,
    High,
}

impl Criticality {
    /// Parse a DSL criticality token (`BAIXO`, `MÉDIO`/`MEDIO`, `ALTO`)
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim_end_matches('.').to_uppercase().as_str() {
            "ALTO" => Some(Criticality::High),
            "MÉDIO" | "MEDIO" => Some(Criticality::Medium),
            "BAIXO" => Some(Criticality::Low),
            _ => None,
        }
    }

    pub fn as_token(&self) -> &'static str {
        match self {
            Criticality::High => "ALTO",
            Criticality::Medium => "MÉDIO",
            Criticality::Low => "BAIXO",
        }
    }
}

impl std::fmt::Display for Criticality {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_token())
    }
}

/// A declarative domain fact. Informational: the engine never reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub subject: String,
    pub criticality: Criticality,
    pub reason: String,
    pub action: String,
    pub line: usize,
}

/// A named question category with its trigger phrases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub name: String,
    /// Ordered, without duplicates
    pub triggers: Vec<String>,
    /// Advisory metadata for self-test tooling, not enforced by the engine
    pub expected_terms: Vec<String>,
    pub line: usize,
}

/// A literal term substitution applied to answers before rule evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub pattern: String,
    pub replacement: String,
    pub case_sensitive: bool,
    pub line: usize,
}

/// What a matching rule does with the answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum RuleAction {
    /// `ENTÃO corrigir para:` replace the answer with this text, verbatim
    Correct(String),
    /// `ENTÃO manter resposta` keep the normalized answer and stop
    Keep,
}

/// An ordered condition/action pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    /// 0-based declaration order; lower wins
    pub priority: usize,
    /// OR-group: the question must contain at least one
    pub question_conditions: Vec<String>,
    /// AND-set: the answer must contain every term
    pub answer_must_contain: Vec<String>,
    /// AND-set: the answer must contain none of the terms
    pub answer_must_not_contain: Vec<String>,
    pub action: RuleAction,
    pub line: usize,
}

impl ValidationRule {
    /// Replacement text, for correcting rules
    pub fn correction_text(&self) -> Option<&str> {
        match &self.action {
            RuleAction::Correct(text) => Some(text),
            RuleAction::Keep => None,
        }
    }
}

/// Raw material for a `RuleSet`, filled in by the parser
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSetParts {
    pub domain_name: String,
    pub facts: Vec<Fact>,
    pub intents: Vec<Intent>,
    /// intent name → expansion terms
    pub expansions: BTreeMap<String, Vec<String>>,
    pub normalizations: Vec<Normalization>,
    pub rules: Vec<ValidationRule>,
    /// canonical term → alternates
    pub synonyms: BTreeMap<String, Vec<String>>,
}

/// Immutable parsed representation of one rule file
#[derive(Debug, Clone, Serialize)]
pub struct RuleSet {
    source_id: String,
    content_hash: String,
    #[serde(flatten)]
    parts: RuleSetParts,
    /// Lower-cased synonym groups (canonical first), precomputed for matching
    #[serde(skip)]
    synonym_groups: Vec<Vec<String>>,
    /// Case-insensitive normalization matchers, index-aligned with `parts.normalizations`
    #[serde(skip)]
    normalization_patterns: Vec<Option<Regex>>,
}

impl RuleSet {
    pub fn new(
        source_id: impl Into<String>,
        content_hash: impl Into<String>,
        parts: RuleSetParts,
    ) -> Self {
        let synonym_groups = parts
            .synonyms
            .iter()
            .map(|(canonical, alternates)| {
                let mut group: Vec<String> = Vec::with_capacity(alternates.len() + 1);
                for term in std::iter::once(canonical).chain(alternates) {
                    let lowered = term.to_lowercase();
                    if !lowered.is_empty() && !group.contains(&lowered) {
                        group.push(lowered);
                    }
                }
                group
            })
            .filter(|group| group.len() > 1)
            .collect();

        let normalization_patterns = parts
            .normalizations
            .iter()
            .map(normalizer::compile)
            .collect();

        RuleSet {
            source_id: source_id.into(),
            content_hash: content_hash.into(),
            parts,
            synonym_groups,
            normalization_patterns,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn domain_name(&self) -> &str {
        &self.parts.domain_name
    }

    pub fn facts(&self) -> &[Fact] {
        &self.parts.facts
    }

    pub fn intents(&self) -> &[Intent] {
        &self.parts.intents
    }

    pub fn expansions(&self) -> &BTreeMap<String, Vec<String>> {
        &self.parts.expansions
    }

    pub fn normalizations(&self) -> &[Normalization] {
        &self.parts.normalizations
    }

    /// Validation rules in priority order
    pub fn rules(&self) -> &[ValidationRule] {
        &self.parts.rules
    }

    pub fn synonyms(&self) -> &BTreeMap<String, Vec<String>> {
        &self.parts.synonyms
    }

    pub(crate) fn synonym_groups(&self) -> &[Vec<String>] {
        &self.synonym_groups
    }

    pub(crate) fn normalization_patterns(&self) -> &[Option<Regex>] {
        &self.normalization_patterns
    }

    pub fn intent(&self, name: &str) -> Option<&Intent> {
        self.parts.intents.iter().find(|i| i.name == name)
    }

    pub fn expansion(&self, intent_name: &str) -> Option<&[String]> {
        self.parts.expansions.get(intent_name).map(Vec::as_slice)
    }

    pub fn facts_by_criticality(&self, level: Criticality) -> Vec<&Fact> {
        self.parts
            .facts
            .iter()
            .filter(|f| f.criticality == level)
            .collect()
    }

    pub fn summary(&self) -> RuleSetSummary {
        let mut facts_by_criticality = BTreeMap::new();
        for fact in &self.parts.facts {
            *facts_by_criticality
                .entry(fact.criticality.as_token().to_string())
                .or_insert(0) += 1;
        }
        RuleSetSummary {
            source_id: self.source_id.clone(),
            domain: self.parts.domain_name.clone(),
            content_hash: self.content_hash.clone(),
            total_facts: self.parts.facts.len(),
            facts_by_criticality,
            intents: self.parts.intents.iter().map(|i| i.name.clone()).collect(),
            rules: self.parts.rules.len(),
            normalizations: self.parts.normalizations.len(),
            synonyms: self.parts.synonyms.len(),
        }
    }
}

/// Overview of a rule set, used by `dkr info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSetSummary {
    pub source_id: String,
    pub domain: String,
    pub content_hash: String,
    pub total_facts: usize,
    pub facts_by_criticality: BTreeMap<String, usize>,
    pub intents: Vec<String>,
    pub rules: usize,
    pub normalizations: usize,
    pub synonyms: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(subject: &str, criticality: Criticality) -> Fact {
        Fact {
            subject: subject.into(),
            criticality,
            reason: String::new(),
            action: String::new(),
            line: 1,
        }
    }

    #[test]
    fn test_criticality_tokens() {
        assert_eq!(Criticality::from_token("ALTO"), Some(Criticality::High));
        assert_eq!(Criticality::from_token("médio"), Some(Criticality::Medium));
        assert_eq!(Criticality::from_token("MEDIO"), Some(Criticality::Medium));
        assert_eq!(Criticality::from_token("BAIXO."), Some(Criticality::Low));
        assert_eq!(Criticality::from_token("CRITICO"), None);
        assert_eq!(Criticality::Medium.to_string(), "MÉDIO");
    }

    #[test]
    fn test_synonym_groups_lowercased_and_deduplicated() {
        let mut parts = RuleSetParts::default();
        parts.synonyms.insert(
            "Crítica".into(),
            vec!["perigosa".into(), "PERIGOSA".into(), "arriscada".into()],
        );
        parts.synonyms.insert("solo".into(), vec!["".into()]);
        let set = RuleSet::new("x", "h", parts);
        assert_eq!(
            set.synonym_groups(),
            &[vec![
                "crítica".to_string(),
                "perigosa".to_string(),
                "arriscada".to_string()
            ]]
        );
    }

    #[test]
    fn test_summary_counts() {
        let parts = RuleSetParts {
            domain_name: "Licenças".into(),
            facts: vec![
                fact("AGPL-3.0", Criticality::High),
                fact("GPL-3.0", Criticality::High),
                fact("MIT", Criticality::Low),
            ],
            ..Default::default()
        };
        let set = RuleSet::new("lic", "abc", parts);
        let summary = set.summary();
        assert_eq!(summary.total_facts, 3);
        assert_eq!(summary.facts_by_criticality.get("ALTO"), Some(&2));
        assert_eq!(summary.facts_by_criticality.get("BAIXO"), Some(&1));
        assert_eq!(set.facts_by_criticality(Criticality::High).len(), 2);
        assert!(set.facts_by_criticality(Criticality::Medium).is_empty());
    }
}
