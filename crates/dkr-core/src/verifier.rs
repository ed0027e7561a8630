//! Structural validator — advisory well-formedness checks on a `RuleSet`
//!
//! The parser rejects syntax errors outright; this pass looks at what a
//! syntactically valid file says and flags content that is likely a
//! mistake. It accumulates every diagnostic instead of stopping at the
//! first one, and it never blocks a load: the store logs errors and
//! keeps serving the rule set.
//!
//! # Checks
//!
//! Errors:
//! 1. **Domain** — domain name present and non-empty
//! 2. **Intents** — every intent has at least one trigger
//! 3. **Rules** — every rule has at least one question condition
//! 4. **Facts** — no two facts share subject (case-insensitive) and criticality
//!
//! Warnings: no facts at all, facts covering only one end of the
//! criticality scale, one subject with conflicting criticalities, intents
//! without expansion, empty corrections, self-containing normalizations,
//! triggers shared by several intents, expansions for unknown intents.
//!
//! Diagnostics may carry a `suggestion` telling the author how to fix them.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::parser::ast::{Criticality, RuleAction, RuleSet};

// ── Report Types ──────────────────────────────────────────

/// Result of validating a rule set: counts plus accumulated diagnostics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub fact_count: usize,
    pub intent_count: usize,
    pub rule_count: usize,
    pub normalization_count: usize,
    pub synonym_count: usize,
    /// Messages of error-level diagnostics, in discovery order
    pub errors: Vec<String>,
    /// Messages of warning-level diagnostics, in discovery order
    pub warnings: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationReport {
    /// Returns true if no errors were found (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_diagnostics(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .collect()
    }

    pub fn warning_diagnostics(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .collect()
    }

    fn add_error(
        &mut self,
        kind: DiagnosticKind,
        message: String,
        line: Option<usize>,
        suggestion: Option<&str>,
    ) {
        self.errors.push(message.clone());
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            kind,
            message,
            line,
            suggestion: suggestion.map(str::to_string),
        });
    }

    fn add_warning(
        &mut self,
        kind: DiagnosticKind,
        message: String,
        line: Option<usize>,
        suggestion: Option<&str>,
    ) {
        self.warnings.push(message.clone());
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            kind,
            message,
            line,
            suggestion: suggestion.map(str::to_string),
        });
    }
}

/// A single validation diagnostic
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    pub line: Option<usize>,
    /// How to fix it, when there is an obvious fix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match self.line {
            Some(line) => write!(f, "{} [{}] at line {}: {}", prefix, self.kind, line, self.message)?,
            None => write!(f, "{} [{}]: {}", prefix, self.kind, self.message)?,
        }
        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n  help: {}", suggestion)?;
        }
        Ok(())
    }
}

/// Severity level for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Part of the rule set a diagnostic is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    Domain,
    Fact,
    Intent,
    Expansion,
    Normalization,
    Rule,
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DiagnosticKind::Domain => write!(f, "domain"),
            DiagnosticKind::Fact => write!(f, "fact"),
            DiagnosticKind::Intent => write!(f, "intent"),
            DiagnosticKind::Expansion => write!(f, "expansion"),
            DiagnosticKind::Normalization => write!(f, "normalization"),
            DiagnosticKind::Rule => write!(f, "rule"),
        }
    }
}

// ── Public API ────────────────────────────────────────────

/// Validate a rule set and return counts plus every diagnostic found
pub fn validate(rules: &RuleSet) -> ValidationReport {
    let mut report = ValidationReport {
        fact_count: rules.facts().len(),
        intent_count: rules.intents().len(),
        rule_count: rules.rules().len(),
        normalization_count: rules.normalizations().len(),
        synonym_count: rules.synonyms().len(),
        ..Default::default()
    };

    verify_domain(rules, &mut report);
    verify_facts(rules, &mut report);
    verify_intents(rules, &mut report);
    verify_expansions(rules, &mut report);
    verify_normalizations(rules, &mut report);
    verify_rules(rules, &mut report);

    report
}

// ── Checks ────────────────────────────────────────────────

fn verify_domain(rules: &RuleSet, report: &mut ValidationReport) {
    if rules.domain_name().trim().is_empty() {
        report.add_error(
            DiagnosticKind::Domain,
            "domain name is empty".to_string(),
            None,
            Some("start the file with 'DOMÍNIO: <name>'"),
        );
    }
}

fn verify_facts(rules: &RuleSet, report: &mut ValidationReport) {
    if rules.facts().is_empty() {
        report.add_warning(
            DiagnosticKind::Fact,
            "no facts declared".to_string(),
            None,
            Some("add facts under 'FATOS CONHECIDOS:'"),
        );
        return;
    }

    verify_coverage(rules, report);

    // lower-cased subject → criticalities seen so far
    let mut seen: BTreeMap<String, BTreeSet<Criticality>> = BTreeMap::new();

    for fact in rules.facts() {
        let key = fact.subject.to_lowercase();
        let levels = seen.entry(key).or_default();

        if levels.contains(&fact.criticality) {
            report.add_error(
                DiagnosticKind::Fact,
                format!(
                    "duplicate fact: '{}' already declared with criticality {}",
                    fact.subject, fact.criticality
                ),
                Some(fact.line),
                Some("remove the duplicate or merge the two facts"),
            );
        } else if !levels.is_empty() {
            let others: Vec<&str> = levels.iter().map(|c| c.as_token()).collect();
            report.add_warning(
                DiagnosticKind::Fact,
                format!(
                    "'{}' declared as {} but also as {}",
                    fact.subject,
                    fact.criticality,
                    others.join(", ")
                ),
                Some(fact.line),
                None,
            );
        }
        levels.insert(fact.criticality);
    }
}

/// Flags fact lists that only cover one end of the criticality scale
fn verify_coverage(rules: &RuleSet, report: &mut ValidationReport) {
    let levels: BTreeSet<Criticality> = rules.facts().iter().map(|f| f.criticality).collect();

    if levels.len() != 1 {
        return;
    }
    if levels.contains(&Criticality::High) {
        report.add_warning(
            DiagnosticKind::Fact,
            "all facts have criticality ALTO".to_string(),
            None,
            Some("add BAIXO facts so questions about safe choices have an answer"),
        );
    } else if levels.contains(&Criticality::Low) {
        report.add_warning(
            DiagnosticKind::Fact,
            "all facts have criticality BAIXO".to_string(),
            None,
            Some("add ALTO facts so questions about risks have an answer"),
        );
    }
}

fn verify_intents(rules: &RuleSet, report: &mut ValidationReport) {
    // lower-cased trigger → first intent using it
    let mut owners: BTreeMap<String, &str> = BTreeMap::new();

    for intent in rules.intents() {
        if intent.triggers.is_empty() {
            report.add_error(
                DiagnosticKind::Intent,
                format!("intent '{}' has no triggers", intent.name),
                Some(intent.line),
                Some("list trigger phrases as '  - \"phrase\"' under the intent"),
            );
        }

        if rules.expansion(&intent.name).is_none() {
            report.add_warning(
                DiagnosticKind::Intent,
                format!("intent '{}' has no query expansion", intent.name),
                Some(intent.line),
                Some("add expansion terms under 'EXPANSÃO DE BUSCA:' to improve retrieval"),
            );
        }

        for trigger in &intent.triggers {
            let key = trigger.to_lowercase();
            match owners.get(key.as_str()) {
                Some(owner) if *owner != intent.name => {
                    report.add_warning(
                        DiagnosticKind::Intent,
                        format!(
                            "trigger '{}' of intent '{}' is also used by '{}'",
                            trigger, intent.name, owner
                        ),
                        Some(intent.line),
                        None,
                    );
                }
                Some(_) => {}
                None => {
                    owners.insert(key, &intent.name);
                }
            }
        }
    }
}

fn verify_expansions(rules: &RuleSet, report: &mut ValidationReport) {
    for name in rules.expansions().keys() {
        if rules.intent(name).is_none() {
            report.add_warning(
                DiagnosticKind::Expansion,
                format!("expansion for unknown intent '{}'", name),
                None,
                Some("check the intent name for typos"),
            );
        }
    }
}

fn verify_normalizations(rules: &RuleSet, report: &mut ValidationReport) {
    for n in rules.normalizations() {
        let grows = if n.case_sensitive {
            n.replacement.contains(&n.pattern)
        } else {
            n.replacement
                .to_lowercase()
                .contains(&n.pattern.to_lowercase())
        };
        if grows {
            report.add_warning(
                DiagnosticKind::Normalization,
                format!(
                    "replacement '{}' contains its own pattern '{}'",
                    n.replacement, n.pattern
                ),
                Some(n.line),
                None,
            );
        }
    }
}

fn verify_rules(rules: &RuleSet, report: &mut ValidationReport) {
    for rule in rules.rules() {
        if rule.question_conditions.is_empty() {
            report.add_error(
                DiagnosticKind::Rule,
                format!("rule #{} has no question condition", rule.priority),
                Some(rule.line),
                Some("add 'QUANDO usuário pergunta \"...\"' before the answer conditions"),
            );
        }
        if let RuleAction::Correct(text) = &rule.action {
            if text.trim().is_empty() {
                report.add_warning(
                    DiagnosticKind::Rule,
                    format!("rule #{} has an empty correction", rule.priority),
                    Some(rule.line),
                    Some("write the corrected answer after 'ENTÃO corrigir para:'"),
                );
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::{Fact, Intent, RuleSetParts, ValidationRule};
    use crate::parser::parse;

    // ── Helper: parse and validate ────────────────────────

    fn validate_text(input: &str) -> ValidationReport {
        validate(&parse(input).unwrap())
    }

    fn fact(subject: &str, criticality: Criticality, line: usize) -> Fact {
        Fact {
            subject: subject.into(),
            criticality,
            reason: String::new(),
            action: String::new(),
            line,
        }
    }

    const CLEAN: &str = "DOMÍNIO: Licenças\nFATOS CONHECIDOS:\nA licença AGPL-3.0 tem criticidade ALTO.\nA licença MIT tem criticidade BAIXO.\nPADRÕES DE INTENÇÃO:\npermissiva:\n  - \"mais permissiva\"\nEXPANSÃO DE BUSCA:\nPara permissiva adicionar: \"MIT\"\nREGRAS DE VALIDAÇÃO:\nQUANDO usuário pergunta \"mais permissiva\"\nENTÃO corrigir para: MIT.\n";

    // ── Counts ────────────────────────────────────────────

    #[test]
    fn test_clean_rule_set_is_valid() {
        let report = validate_text(CLEAN);
        assert!(report.is_valid(), "errors: {:?}", report.errors);
        assert!(report.warnings.is_empty(), "warnings: {:?}", report.warnings);
        assert_eq!(report.fact_count, 2);
        assert_eq!(report.intent_count, 1);
        assert_eq!(report.rule_count, 1);
        assert_eq!(report.normalization_count, 0);
        assert_eq!(report.synonym_count, 0);
    }

    // ── Errors ────────────────────────────────────────────

    #[test]
    fn test_empty_domain_name() {
        let report = validate(&RuleSet::new("x", "h", RuleSetParts::default()));
        assert!(!report.is_valid());
        assert!(report.errors.iter().any(|e| e.contains("domain name")));
    }

    #[test]
    fn test_intent_without_triggers() {
        let report = validate_text("DOMÍNIO: X\nPADRÕES DE INTENÇÃO:\nvazio:\n");
        assert!(!report.is_valid());
        let errors = report.error_diagnostics();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, DiagnosticKind::Intent);
        assert_eq!(errors[0].line, Some(3));
    }

    #[test]
    fn test_rule_without_conditions() {
        let parts = RuleSetParts {
            domain_name: "X".into(),
            rules: vec![ValidationRule {
                priority: 0,
                question_conditions: vec![],
                answer_must_contain: vec![],
                answer_must_not_contain: vec![],
                action: RuleAction::Correct("y".into()),
                line: 4,
            }],
            ..Default::default()
        };
        let report = validate(&RuleSet::new("x", "h", parts));
        assert!(report.errors.iter().any(|e| e.contains("no question condition")));
    }

    #[test]
    fn test_duplicate_fact_same_criticality_case_insensitive() {
        let parts = RuleSetParts {
            domain_name: "X".into(),
            facts: vec![
                fact("AGPL-3.0", Criticality::High, 2),
                fact("agpl-3.0", Criticality::High, 5),
            ],
            ..Default::default()
        };
        let report = validate(&RuleSet::new("x", "h", parts));
        let errors = report.error_diagnostics();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, Some(5));
        assert!(errors[0].message.contains("duplicate fact"));
    }

    #[test]
    fn test_multiple_errors_accumulated() {
        let parts = RuleSetParts {
            domain_name: "  ".into(),
            intents: vec![Intent {
                name: "a".into(),
                triggers: vec![],
                expected_terms: vec![],
                line: 3,
            }],
            ..Default::default()
        };
        let report = validate(&RuleSet::new("x", "h", parts));
        assert_eq!(report.errors.len(), 2);
    }

    // ── Warnings ──────────────────────────────────────────

    #[test]
    fn test_conflicting_criticality_is_warning() {
        let report = validate_text(
            "DOMÍNIO: X\nFATOS CONHECIDOS:\nA GPL tem criticidade ALTO.\nA GPL tem criticidade MÉDIO.\n",
        );
        assert!(report.is_valid());
        assert_eq!(report.warning_diagnostics()[0].line, Some(4));
    }

    #[test]
    fn test_no_facts_warning() {
        let report = validate_text("DOMÍNIO: X\n");
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.contains("no facts")));
    }

    #[test]
    fn test_intent_without_expansion_warning() {
        let report = validate_text("DOMÍNIO: X\nPADRÕES DE INTENÇÃO:\na:\n  - \"x\"\n");
        assert!(report.warnings.iter().any(|w| w.contains("no query expansion")));
    }

    #[test]
    fn test_self_containing_normalization_warning() {
        let report = validate_text("DOMÍNIO: X\nNORMALIZAÇÕES:\n\"gpl\" corrigir para: \"GPL-3.0\"\n");
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.contains("own pattern")));

        let report = validate_text(
            "DOMÍNIO: X\nNORMALIZAÇÕES:\n\"gpl\" corrigir para: \"GPL-3.0\" [case-sensitive]\n",
        );
        assert!(!report.warnings.iter().any(|w| w.contains("own pattern")));
    }

    #[test]
    fn test_shared_trigger_warning() {
        let report = validate_text(
            "DOMÍNIO: X\nPADRÕES DE INTENÇÃO:\na:\n  - \"risco\"\nb:\n  - \"Risco\"\n",
        );
        assert!(report.warnings.iter().any(|w| w.contains("also used by 'a'")));
    }

    #[test]
    fn test_diagnostic_display() {
        let d = Diagnostic {
            severity: Severity::Error,
            kind: DiagnosticKind::Intent,
            message: "intent 'a' has no triggers".into(),
            line: Some(3),
            suggestion: None,
        };
        assert_eq!(
            d.to_string(),
            "error [intent] at line 3: intent 'a' has no triggers"
        );

        let d = Diagnostic {
            suggestion: Some("add a trigger".into()),
            ..d
        };
        assert_eq!(
            d.to_string(),
            "error [intent] at line 3: intent 'a' has no triggers\n  help: add a trigger"
        );
    }

    // ── Coverage / Suggestions ────────────────────────────

    #[test]
    fn test_only_high_facts_warns_about_coverage() {
        let report = validate_text(
            "DOMÍNIO: X\nFATOS CONHECIDOS:\nA AGPL tem criticidade ALTO.\nA SSPL tem criticidade ALTO.\n",
        );
        assert!(report.is_valid());
        let warning = report
            .warning_diagnostics()
            .into_iter()
            .find(|d| d.message.contains("criticality ALTO"))
            .expect("coverage warning");
        assert_eq!(warning.kind, DiagnosticKind::Fact);
        assert!(warning.suggestion.as_deref().unwrap().contains("BAIXO"));
    }

    #[test]
    fn test_only_low_facts_warns_about_coverage() {
        let report = validate_text("DOMÍNIO: X\nFATOS CONHECIDOS:\nO MIT tem criticidade BAIXO.\n");
        let warning = report
            .warning_diagnostics()
            .into_iter()
            .find(|d| d.message.contains("criticality BAIXO"))
            .expect("coverage warning");
        assert!(warning.suggestion.as_deref().unwrap().contains("ALTO"));
    }

    #[test]
    fn test_mixed_or_medium_facts_have_no_coverage_warning() {
        let report = validate_text(
            "DOMÍNIO: X\nFATOS CONHECIDOS:\nA AGPL tem criticidade ALTO.\nO MIT tem criticidade BAIXO.\n",
        );
        assert!(report.warnings.is_empty(), "warnings: {:?}", report.warnings);

        let report = validate_text("DOMÍNIO: X\nFATOS CONHECIDOS:\nA LGPL tem criticidade MÉDIO.\n");
        assert!(report.warnings.is_empty(), "warnings: {:?}", report.warnings);
    }

    #[test]
    fn test_errors_carry_suggestions() {
        let report = validate_text("DOMÍNIO: X\nPADRÕES DE INTENÇÃO:\nvazio:\n");
        let errors = report.error_diagnostics();
        assert!(errors[0].suggestion.is_some());
    }

    #[test]
    fn test_keep_rule_has_no_empty_correction_warning() {
        let report = validate_text(
            "DOMÍNIO: X\nREGRAS DE VALIDAÇÃO:\nQUANDO usuário pergunta \"a\"\nENTÃO manter resposta\n",
        );
        assert!(!report.warnings.iter().any(|w| w.contains("empty correction")));
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = validate_text(CLEAN);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["fact_count"], 2);
        assert!(json["errors"].as_array().unwrap().is_empty());

        let report = validate_text("DOMÍNIO: X\n");
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["diagnostics"][0]["suggestion"].is_string());
    }
}
