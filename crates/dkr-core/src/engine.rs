//! DKR engine — intent detection, query expansion and answer correction
//!
//! The engine holds no rule state. Every operation takes the `RuleSet`
//! it should run against, so one `Engine` can serve any number of rule
//! sets from any number of threads.
//!
//! # Pipeline
//!
//! `process(question, answer)` runs, in order:
//!
//! 1. Detect the question's intent
//! 2. Expand the question with the intent's search terms
//! 3. Normalize the answer's terminology
//! 4. Evaluate validation rules against question and normalized answer
//! 5. Apply the first matching rule: replace the answer with its
//!    correction, or keep the normalized answer as is
//!
//! None of these steps fail or perform I/O; the elapsed wall-clock time
//! of the whole call is recorded in the result.

use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::matcher::Matcher;
use crate::normalizer::{self, AppliedNormalization};
use crate::parser::ast::{Intent, RuleAction, RuleSet, ValidationRule};

// ── Confidence ────────────────────────────────────────────

/// Turns trigger match counts into a confidence in `[0, 1]`
pub trait ConfidenceStrategy: Send + Sync {
    fn score(&self, matched: usize, total: usize) -> f64;

    fn name(&self) -> &str {
        "custom"
    }
}

/// Fraction of an intent's triggers found in the question
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerFraction;

impl ConfidenceStrategy for TriggerFraction {
    fn score(&self, matched: usize, total: usize) -> f64 {
        if total == 0 {
            return 0.0;
        }
        matched as f64 / total as f64
    }

    fn name(&self) -> &str {
        "trigger-fraction"
    }
}

// ── Result Types ──────────────────────────────────────────

/// The intent chosen for a question
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedIntent {
    pub name: String,
    pub confidence: f64,
}

/// How well one intent matched a question
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentScore {
    pub name: String,
    pub matched_triggers: Vec<String>,
    pub total_triggers: usize,
    pub confidence: f64,
}

/// Per-intent breakdown of intent detection, used by `dkr explain`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentExplanation {
    pub question: String,
    /// One entry per intent, in declaration order
    pub scores: Vec<IntentScore>,
    pub detected: Option<DetectedIntent>,
    pub expansion_terms: Vec<String>,
    pub expanded_query: String,
}

/// Outcome of one `process` call, with its full diagnostic trace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessResult {
    pub final_answer: String,
    pub was_corrected: bool,
    /// Priority of the rule whose correction was applied
    pub matched_rule: Option<usize>,
    /// Priority of the `manter resposta` rule that ended evaluation
    pub kept_by_rule: Option<usize>,
    pub applied_normalizations: Vec<AppliedNormalization>,
    pub detected_intent: Option<DetectedIntent>,
    pub expanded_query: Option<String>,
    #[serde(rename = "elapsed_us", serialize_with = "serialize_micros")]
    pub elapsed: Duration,
    pub domain: String,
    pub normalized_answer: String,
    /// Rules inspected before the first match (or all of them)
    pub rules_evaluated: usize,
}

fn serialize_micros<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(elapsed.as_micros().min(u64::MAX as u128) as u64)
}

impl std::fmt::Display for ProcessResult {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "domain:          {}", self.domain)?;
        match &self.detected_intent {
            Some(intent) => writeln!(
                f,
                "intent:          {} ({:.0}%)",
                intent.name,
                intent.confidence * 100.0
            )?,
            None => writeln!(f, "intent:          -")?,
        }
        if let Some(query) = &self.expanded_query {
            writeln!(f, "expanded query:  {}", query)?;
        }
        if self.applied_normalizations.is_empty() {
            writeln!(f, "normalizations:  -")?;
        } else {
            let applied: Vec<String> = self
                .applied_normalizations
                .iter()
                .map(|n| format!("'{}' -> '{}'", n.pattern, n.replacement))
                .collect();
            writeln!(f, "normalizations:  {}", applied.join(", "))?;
        }
        match (self.matched_rule, self.kept_by_rule) {
            (Some(priority), _) => writeln!(
                f,
                "rule:            #{} (evaluated {})",
                priority, self.rules_evaluated
            )?,
            (None, Some(priority)) => writeln!(
                f,
                "rule:            #{} keeps answer (evaluated {})",
                priority, self.rules_evaluated
            )?,
            (None, None) => writeln!(f, "rule:            - (evaluated {})", self.rules_evaluated)?,
        }
        writeln!(f, "corrected:       {}", if self.was_corrected { "yes" } else { "no" })?;
        writeln!(f, "elapsed:         {:?}", self.elapsed)?;
        write!(f, "final answer:\n{}", self.final_answer)
    }
}

// ── Engine ────────────────────────────────────────────────

/// Stateless rule interpreter
pub struct Engine {
    strategy: Box<dyn ConfidenceStrategy>,
    /// Detected intents scoring below this are discarded
    min_confidence: f64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("strategy", &self.strategy.name())
            .field("min_confidence", &self.min_confidence)
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            strategy: Box::new(TriggerFraction),
            min_confidence: 0.0,
        }
    }

    pub fn with_strategy(strategy: Box<dyn ConfidenceStrategy>) -> Self {
        Engine {
            strategy,
            min_confidence: 0.0,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new().with_min_confidence(config.min_confidence)
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Pick the intent whose triggers best match the question
    ///
    /// Candidates need at least one matched trigger. Highest confidence
    /// wins; ties go to more matched triggers, then to declaration order.
    pub fn detect_intent(&self, rules: &RuleSet, question: &str) -> Option<DetectedIntent> {
        let scores = self.score_intents(rules, question);
        self.choose(&scores)
    }

    /// Question followed by the detected intent's expansion terms
    pub fn expand_query(&self, rules: &RuleSet, question: &str) -> String {
        let detected = self.detect_intent(rules, question);
        expansion_for(rules, question, detected.as_ref()).unwrap_or_else(|| question.to_string())
    }

    /// Apply the rule set's normalizations to an answer, once each, in order
    pub fn normalize(&self, rules: &RuleSet, answer: &str) -> (String, Vec<AppliedNormalization>) {
        normalizer::normalize(rules, answer)
    }

    /// First rule, by priority, satisfied by question and normalized answer
    pub fn evaluate_rules<'r>(
        &self,
        rules: &'r RuleSet,
        question: &str,
        normalized_answer: &str,
    ) -> Option<&'r ValidationRule> {
        let matcher = Matcher::new(rules);
        rules
            .rules()
            .iter()
            .find(|rule| rule_matches(&matcher, rule, question, normalized_answer))
    }

    /// Run the full pipeline on one question/answer pair
    pub fn process(&self, rules: &RuleSet, question: &str, answer: &str) -> ProcessResult {
        let start = Instant::now();
        let matcher = Matcher::new(rules);

        // 1. Detect intent
        let detected_intent = self.detect_intent(rules, question);

        // 2. Expand query
        let expanded_query = expansion_for(rules, question, detected_intent.as_ref());

        // 3. Normalize answer
        let (normalized_answer, applied_normalizations) = normalizer::normalize(rules, answer);

        // 4. Evaluate rules, short-circuiting on the first match
        let mut rules_evaluated = 0;
        let mut matched: Option<&ValidationRule> = None;
        for rule in rules.rules() {
            rules_evaluated += 1;
            if rule_matches(&matcher, rule, question, &normalized_answer) {
                matched = Some(rule);
                break;
            }
        }

        // 5. Apply the matched rule's action
        let mut matched_rule = None;
        let mut kept_by_rule = None;
        let final_answer = match matched.map(|rule| (rule, &rule.action)) {
            Some((rule, RuleAction::Correct(text))) => {
                info!(
                    domain = rules.domain_name(),
                    rule = rule.priority,
                    line = rule.line,
                    "answer corrected"
                );
                matched_rule = Some(rule.priority);
                text.clone()
            }
            Some((rule, RuleAction::Keep)) => {
                debug!(rule = rule.priority, line = rule.line, "answer kept by rule");
                kept_by_rule = Some(rule.priority);
                normalized_answer.clone()
            }
            None => normalized_answer.clone(),
        };

        let elapsed = start.elapsed();
        debug!(
            intent = detected_intent.as_ref().map(|i| i.name.as_str()),
            normalized = applied_normalizations.len(),
            corrected = matched_rule.is_some(),
            elapsed_us = elapsed.as_micros() as u64,
            "processed answer"
        );

        ProcessResult {
            final_answer,
            was_corrected: matched_rule.is_some(),
            matched_rule,
            kept_by_rule,
            applied_normalizations,
            detected_intent,
            expanded_query,
            elapsed,
            domain: rules.domain_name().to_string(),
            normalized_answer,
            rules_evaluated,
        }
    }

    /// Intent detection with every intent's score laid out
    pub fn explain(&self, rules: &RuleSet, question: &str) -> IntentExplanation {
        let scores = self.score_intents(rules, question);
        let detected = self.choose(&scores);
        let expansion_terms = detected
            .as_ref()
            .and_then(|d| rules.expansion(&d.name))
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        let expanded_query = expansion_for(rules, question, detected.as_ref())
            .unwrap_or_else(|| question.to_string());

        IntentExplanation {
            question: question.to_string(),
            scores,
            detected,
            expansion_terms,
            expanded_query,
        }
    }

    fn score_intents(&self, rules: &RuleSet, question: &str) -> Vec<IntentScore> {
        let matcher = Matcher::new(rules);
        rules
            .intents()
            .iter()
            .map(|intent| self.score_intent(&matcher, intent, question))
            .collect()
    }

    fn score_intent(&self, matcher: &Matcher, intent: &Intent, question: &str) -> IntentScore {
        let matched_triggers: Vec<String> = intent
            .triggers
            .iter()
            .filter(|t| matcher.contains(question, t))
            .cloned()
            .collect();
        let total = intent.triggers.len();
        let raw = self.strategy.score(matched_triggers.len(), total);
        let confidence = if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 1.0) };

        IntentScore {
            name: intent.name.clone(),
            matched_triggers,
            total_triggers: total,
            confidence,
        }
    }

    fn choose(&self, scores: &[IntentScore]) -> Option<DetectedIntent> {
        let mut best: Option<&IntentScore> = None;

        for score in scores {
            if score.matched_triggers.is_empty() || score.confidence < self.min_confidence {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => {
                    score.confidence > current.confidence
                        || (score.confidence == current.confidence
                            && score.matched_triggers.len() > current.matched_triggers.len())
                }
            };
            if better {
                best = Some(score);
            }
        }

        best.map(|s| DetectedIntent {
            name: s.name.clone(),
            confidence: s.confidence,
        })
    }
}

// ── Helpers ───────────────────────────────────────────────

/// Expanded question, if the detected intent has expansion terms
fn expansion_for(rules: &RuleSet, question: &str, detected: Option<&DetectedIntent>) -> Option<String> {
    let terms = rules.expansion(&detected?.name)?;
    if terms.is_empty() {
        return None;
    }
    Some(format!("{} {}", question, terms.join(" ")))
}

fn rule_matches(matcher: &Matcher, rule: &ValidationRule, question: &str, answer: &str) -> bool {
    matcher.contains_any(question, &rule.question_conditions)
        && matcher.contains_all(answer, &rule.answer_must_contain)
        && matcher.contains_none(answer, &rule.answer_must_not_contain)
}

// ── Tests ─────────────────────────────────────────────────
