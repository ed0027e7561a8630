//! DKR Parser — line lexer, rule-set model, and section parser
//!
//! Converts `.rules` text into an immutable `RuleSet`.
//! The first line must be `DOMÍNIO: <name>`; every other line belongs to
//! the section opened by the most recent header.
//!
//! # Guarantees
//! - Deterministic: same input always produces the same `RuleSet`
//! - Atomic: the first syntax violation aborts the whole parse
//! - Every error carries the 1-based line it was found on

pub mod ast;
pub mod tokenizer;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::ParseError;
use ast::{
    Criticality, Fact, Intent, Normalization, RuleAction, RuleSet, RuleSetParts, ValidationRule,
};
use tokenizer::{fold_key, SectionKind, SpannedToken, Token, Tokenizer};

/// Source id given to rule sets parsed without one
pub const INLINE_SOURCE: &str = "<inline>";

/// SHA-256 of the raw rule text, lower-case hex
pub fn content_hash(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Parse DKR text into a `RuleSet`
///
/// # Errors
/// Returns `ParseError` with the offending line for syntax violations.
///
/// # Example
/// ```ignore
/// let rules = parse("DOMÍNIO: Licenças\n")?;
/// ```
pub fn parse(raw: &str) -> Result<RuleSet, ParseError> {
    parse_source(INLINE_SOURCE, raw)
}

/// Parse DKR text, tagging the result with the id it was loaded from
pub fn parse_source(source_id: &str, raw: &str) -> Result<RuleSet, ParseError> {
    let tokens = Tokenizer::new(raw).tokenize()?;
    let parts = SectionParser::new(&tokens).run()?;
    let rules = RuleSet::new(source_id, content_hash(raw), parts);

    debug!(
        source = source_id,
        domain = rules.domain_name(),
        facts = rules.facts().len(),
        intents = rules.intents().len(),
        rules = rules.rules().len(),
        normalizations = rules.normalizations().len(),
        synonyms = rules.synonyms().len(),
        "parsed rule set"
    );

    Ok(rules)
}

// ── Section parser ────────────────────────────────────────

struct SectionParser<'t> {
    tokens: &'t [SpannedToken],
    pos: usize,
    parts: RuleSetParts,
    /// (intent name, line) of every expansion, checked once all intents are known
    expansion_refs: Vec<(String, usize)>,
}

impl<'t> SectionParser<'t> {
    fn new(tokens: &'t [SpannedToken]) -> Self {
        SectionParser {
            tokens,
            pos: 0,
            parts: RuleSetParts::default(),
            expansion_refs: Vec::new(),
        }
    }

    fn run(mut self) -> Result<RuleSetParts, ParseError> {
        self.parse_domain()?;

        while let Some(tok) = self.advance() {
            match &tok.token {
                Token::Header { kind, .. } => self.parse_section(*kind, tok.span.line)?,
                Token::Text(text) => {
                    return Err(ParseError::new(
                        tok.span.line,
                        format!("line outside of any section: '{}'", text),
                    ));
                }
                Token::Blank => {}
            }
        }

        self.check_expansion_refs()?;
        Ok(self.parts)
    }

    fn parse_section(&mut self, kind: SectionKind, line: usize) -> Result<(), ParseError> {
        match kind {
            SectionKind::Domain => Err(ParseError::new(line, "duplicate DOMÍNIO header")),
            SectionKind::Facts => self.parse_facts(),
            SectionKind::Intents => self.parse_intents(),
            SectionKind::Expansions => self.parse_expansions(),
            SectionKind::Normalizations => self.parse_normalizations(),
            SectionKind::Rules => self.parse_rules(),
            SectionKind::Synonyms => self.parse_synonyms(),
        }
    }

    fn skip_blanks(&mut self) {
        while matches!(self.tokens.get(self.pos), Some(tok) if tok.token == Token::Blank) {
            self.pos += 1;
        }
    }

    fn advance(&mut self) -> Option<&'t SpannedToken> {
        self.skip_blanks();
        let tokens: &'t [SpannedToken] = self.tokens;
        let tok = tokens.get(self.pos)?;
        self.pos += 1;
        Some(tok)
    }

    /// Next non-blank line of the current section; `None` at a header or
    /// end of input
    fn peek_line(&mut self) -> Option<(&'t SpannedToken, &'t str)> {
        self.skip_blanks();
        let tokens: &'t [SpannedToken] = self.tokens;
        let tok = tokens.get(self.pos)?;
        match &tok.token {
            Token::Text(text) => Some((tok, text.as_str())),
            Token::Header { .. } | Token::Blank => None,
        }
    }

    fn next_line(&mut self) -> Option<(&'t SpannedToken, &'t str)> {
        let next = self.peek_line()?;
        self.pos += 1;
        Some(next)
    }

    // ── DOMÍNIO ───────────────────────────────────────────

    fn parse_domain(&mut self) -> Result<(), ParseError> {
        let first = match self.advance() {
            Some(tok) => tok,
            None => return Err(ParseError::new(1, "missing DOMÍNIO header")),
        };

        match &first.token {
            Token::Header {
                kind: SectionKind::Domain,
                value,
            } => {
                if value.is_empty() {
                    return Err(ParseError::new(first.span.line, "empty domain name"));
                }
                self.parts.domain_name = value.clone();
                Ok(())
            }
            _ => Err(ParseError::new(
                first.span.line,
                "missing DOMÍNIO header: the first line must be 'DOMÍNIO: <name>'",
            )),
        }
    }

    // ── FATOS CONHECIDOS ──────────────────────────────────

    fn parse_facts(&mut self) -> Result<(), ParseError> {
        let mut has_fact = false;

        while let Some((tok, text)) = self.next_line() {
            let line = tok.span.line;

            if let Some((key, value)) = text.split_once(':') {
                let key = fold_key(key);
                if key == "MOTIVO" || key == "ACAO" {
                    let fact = match self.parts.facts.last_mut() {
                        Some(fact) if has_fact => fact,
                        _ => {
                            return Err(ParseError::new(
                                line,
                                format!("'{}' line without a preceding fact", text),
                            ));
                        }
                    };
                    if key == "MOTIVO" {
                        fact.reason = value.trim().to_string();
                    } else {
                        fact.action = value.trim().to_string();
                    }
                    continue;
                }
            }

            let fact = parse_fact_line(text, line)?;
            self.parts.facts.push(fact);
            has_fact = true;
        }

        Ok(())
    }

    // ── PADRÕES DE INTENÇÃO ───────────────────────────────

    fn parse_intents(&mut self) -> Result<(), ParseError> {
        let mut has_intent = false;

        while let Some((tok, text)) = self.next_line() {
            let line = tok.span.line;

            if let Some(rest) = text.strip_prefix('-').or_else(|| text.strip_prefix('•')) {
                let intent = match self.parts.intents.last_mut() {
                    Some(intent) if has_intent => intent,
                    _ => return Err(ParseError::new(line, "trigger outside of an intent")),
                };
                let mut phrases = quoted_strings(rest);
                if phrases.is_empty() && !rest.trim().is_empty() {
                    phrases.push(rest.trim().to_string());
                }
                for phrase in phrases {
                    let lowered = phrase.to_lowercase();
                    if !intent.triggers.iter().any(|t| t.to_lowercase() == lowered) {
                        intent.triggers.push(phrase);
                    }
                }
                continue;
            }

            if let Some((key, value)) = text.split_once(':') {
                if fold_key(key) == "RESPOSTA DEVE CONTER" {
                    let intent = match self.parts.intents.last_mut() {
                        Some(intent) if has_intent => intent,
                        _ => {
                            return Err(ParseError::new(
                                line,
                                "'Resposta deve conter' outside of an intent",
                            ));
                        }
                    };
                    intent.expected_terms.extend(term_list(value));
                    continue;
                }
            }

            let name = text.trim_end_matches(':').trim();
            if tok.span.is_indented() || !is_identifier(name) {
                return Err(ParseError::new(
                    line,
                    format!("unrecognized line in PADRÕES DE INTENÇÃO: '{}'", text),
                ));
            }
            if self.parts.intents.iter().any(|i| i.name == name) {
                return Err(ParseError::new(
                    line,
                    format!("duplicate intent '{}'", name),
                ));
            }

            self.parts.intents.push(Intent {
                name: name.to_string(),
                triggers: Vec::new(),
                expected_terms: Vec::new(),
                line,
            });
            has_intent = true;
        }

        Ok(())
    }

    // ── EXPANSÃO DE BUSCA ─────────────────────────────────

    fn parse_expansions(&mut self) -> Result<(), ParseError> {
        while let Some((tok, text)) = self.next_line() {
            let line = tok.span.line;

            let (intent, terms) = parse_expansion_line(text).ok_or_else(|| {
                ParseError::new(
                    line,
                    format!(
                        "expected 'Para <intenção> adicionar: \"termo\", ...', found '{}'",
                        text
                    ),
                )
            })?;
            if terms.is_empty() {
                return Err(ParseError::new(
                    line,
                    format!("expansion for '{}' has no terms", intent),
                ));
            }
            if self.parts.expansions.contains_key(&intent) {
                return Err(ParseError::new(
                    line,
                    format!("duplicate expansion for intent '{}'", intent),
                ));
            }

            self.expansion_refs.push((intent.clone(), line));
            self.parts.expansions.insert(intent, terms);
        }

        Ok(())
    }

    fn check_expansion_refs(&self) -> Result<(), ParseError> {
        for (name, line) in &self.expansion_refs {
            if !self.parts.intents.iter().any(|i| &i.name == name) {
                return Err(ParseError::new(
                    *line,
                    format!("expansion references unknown intent '{}'", name),
                ));
            }
        }
        Ok(())
    }

    // ── NORMALIZAÇÃO DE TERMOS ────────────────────────────

    fn parse_normalizations(&mut self) -> Result<(), ParseError> {
        while let Some((tok, text)) = self.next_line() {
            let line = tok.span.line;
            let malformed = || {
                ParseError::new(
                    line,
                    format!(
                        "expected '\"<termo>\" corrigir para: \"<termo>\"', found '{}'",
                        text
                    ),
                )
            };

            let (pattern, rest) = leading_quoted(text).ok_or_else(malformed)?;
            let rest = rest.trim_start();
            if !fold_key(rest).starts_with("CORRIGIR PARA:") {
                return Err(malformed());
            }
            let after = rest.split_once(':').map(|(_, r)| r).unwrap_or("");
            let (replacement, flag) = leading_quoted(after).ok_or_else(malformed)?;

            let case_sensitive = match fold_key(flag).as_str() {
                "" => false,
                "[CASE-SENSITIVE]" | "[MAIUSCULAS]" => true,
                other => {
                    return Err(ParseError::new(
                        line,
                        format!("unknown normalization option '{}'", other),
                    ));
                }
            };
            if pattern.is_empty() {
                return Err(ParseError::new(line, "empty normalization pattern"));
            }

            self.parts.normalizations.push(Normalization {
                pattern,
                replacement,
                case_sensitive,
                line,
            });
        }

        Ok(())
    }

    // ── REGRAS DE VALIDAÇÃO ───────────────────────────────

    fn parse_rules(&mut self) -> Result<(), ParseError> {
        while let Some((tok, text)) = self.next_line() {
            let line = tok.span.line;

            if first_word(text).as_deref() != Some("QUANDO") {
                return Err(ParseError::new(
                    line,
                    format!("expected 'QUANDO ...' to open a rule, found '{}'", text),
                ));
            }
            let question_conditions = quoted_strings(text);
            if question_conditions.is_empty() {
                return Err(ParseError::new(line, "rule with no conditions"));
            }

            let mut rule = ValidationRule {
                priority: self.parts.rules.len(),
                question_conditions,
                answer_must_contain: Vec::new(),
                answer_must_not_contain: Vec::new(),
                action: RuleAction::Keep,
                line,
            };
            self.parse_rule_clauses(&mut rule)?;
            self.parts.rules.push(rule);
        }

        Ok(())
    }

    /// Condition lines up to and including the `ENTÃO` block
    fn parse_rule_clauses(&mut self, rule: &mut ValidationRule) -> Result<(), ParseError> {
        while let Some((tok, text)) = self.peek_line() {
            let line = tok.span.line;
            let keyword = first_word(text);

            match keyword.as_deref() {
                Some("QUANDO") => break,
                Some("OU") => {
                    let phrases = required_phrases(text, line)?;
                    rule.question_conditions.extend(phrases);
                }
                Some("E") => {
                    let folded = fold_key(text);
                    let clause = folded.strip_prefix("E RESPOSTA ").ok_or_else(|| {
                        ParseError::new(line, format!("unrecognized condition '{}'", text))
                    })?;
                    let (negated, verb) = match clause.strip_prefix("NAO ") {
                        Some(verb) => (true, verb),
                        None => (false, clause),
                    };
                    if !(verb.starts_with("MENCIONA") || verb.starts_with("CONTEM")) {
                        return Err(ParseError::new(
                            line,
                            format!("expected 'menciona' or 'contém' in '{}'", text),
                        ));
                    }
                    let phrases = required_phrases(text, line)?;
                    if negated {
                        rule.answer_must_not_contain.extend(phrases);
                    } else {
                        rule.answer_must_contain.extend(phrases);
                    }
                }
                Some("ENTAO") => {
                    self.pos += 1;
                    let folded = fold_key(text);
                    if folded == "ENTAO MANTER RESPOSTA" || folded == "ENTAO MANTER RESPOSTA." {
                        rule.action = RuleAction::Keep;
                        return Ok(());
                    }
                    if !folded.starts_with("ENTAO CORRIGIR PARA:") {
                        return Err(ParseError::new(
                            line,
                            format!(
                                "expected 'ENTÃO corrigir para:' or 'ENTÃO manter resposta', found '{}'",
                                text
                            ),
                        ));
                    }
                    let inline = text.split_once(':').map(|(_, r)| r.trim()).unwrap_or("");
                    let correction = self.correction_block(inline);
                    if correction.is_empty() {
                        return Err(ParseError::new(
                            rule.line,
                            "unterminated correction block: empty correction text",
                        ));
                    }
                    rule.action = RuleAction::Correct(correction);
                    return Ok(());
                }
                _ => {
                    return Err(ParseError::new(
                        line,
                        format!("unexpected line in rule: '{}'", text),
                    ));
                }
            }
            self.pos += 1;
        }

        Err(ParseError::new(
            rule.line,
            "unterminated correction block: missing 'ENTÃO corrigir para:' or 'ENTÃO manter resposta'",
        ))
    }

    /// Indented lines after `ENTÃO`, with their common indentation removed.
    /// Blank lines inside the body are kept; leading and trailing ones are not.
    fn correction_block(&mut self, inline: &str) -> String {
        let tokens: &'t [SpannedToken] = self.tokens;
        let mut body: Vec<&'t str> = Vec::new();
        while let Some(tok) = tokens.get(self.pos) {
            match &tok.token {
                Token::Blank => body.push(""),
                Token::Text(text)
                    if tok.span.is_indented() && first_word(text).as_deref() != Some("QUANDO") =>
                {
                    body.push(tok.raw.as_str());
                }
                _ => break,
            }
            self.pos += 1;
        }

        let common = body
            .iter()
            .filter(|l| !l.is_empty())
            .map(|l| l.chars().take_while(|c| c.is_whitespace()).count())
            .min()
            .unwrap_or(0);

        let mut lines: Vec<String> = Vec::with_capacity(body.len() + 1);
        if !inline.is_empty() {
            lines.push(inline.to_string());
        }
        lines.extend(body.iter().map(|l| l.chars().skip(common).collect::<String>()));

        let start = lines.iter().position(|l| !l.is_empty()).unwrap_or(lines.len());
        let end = lines.iter().rposition(|l| !l.is_empty()).map_or(start, |i| i + 1);
        lines[start..end].join("\n")
    }

    // ── SINÔNIMOS ─────────────────────────────────────────

    fn parse_synonyms(&mut self) -> Result<(), ParseError> {
        while let Some((tok, text)) = self.next_line() {
            let line = tok.span.line;
            let malformed = || {
                ParseError::new(
                    line,
                    format!(
                        "expected '\"<termo>\" também pode ser: \"a\", \"b\"', found '{}'",
                        text
                    ),
                )
            };

            let (canonical, rest) = leading_quoted(text).ok_or_else(malformed)?;
            let rest = rest.trim_start();
            if !fold_key(rest).starts_with("TAMBEM PODE SER:") {
                return Err(malformed());
            }
            let alternates = term_list(rest.split_once(':').map(|(_, r)| r).unwrap_or(""));

            if canonical.trim().is_empty() {
                return Err(ParseError::new(line, "empty synonym term"));
            }
            if alternates.is_empty() {
                return Err(ParseError::new(
                    line,
                    format!("synonym '{}' has no alternates", canonical),
                ));
            }

            let entry = self
                .parts
                .synonyms
                .entry(canonical.trim().to_string())
                .or_default();
            for alternate in alternates {
                if !entry.contains(&alternate) {
                    entry.push(alternate);
                }
            }
        }

        Ok(())
    }
}

// ── Line helpers ──────────────────────────────────────────

/// `[A|O|A/O] [licença] <subject> tem criticidade <NÍVEL>[.]`
fn parse_fact_line(text: &str, line: usize) -> Result<Fact, ParseError> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let folded: Vec<String> = words.iter().map(|w| fold_key(w)).collect();

    let pos = folded
        .windows(2)
        .position(|w| w[0] == "TEM" && w[1] == "CRITICIDADE")
        .ok_or_else(|| {
            ParseError::new(
                line,
                format!("expected '<assunto> tem criticidade <NÍVEL>', found '{}'", text),
            )
        })?;

    let criticality = match &words[pos + 2..] {
        [token] => Criticality::from_token(token),
        _ => None,
    }
    .ok_or_else(|| {
        ParseError::new(
            line,
            format!("invalid criticality in '{}': expected ALTO, MÉDIO or BAIXO", text),
        )
    })?;

    let mut start = 0;
    if pos > 1 && matches!(folded[0].as_str(), "A" | "O" | "A/O") {
        start = 1;
    }
    if pos > start + 1 && folded[start] == "LICENCA" {
        start += 1;
    }
    let subject = words[start..pos].join(" ");
    if subject.is_empty() {
        return Err(ParseError::new(line, "fact without a subject"));
    }

    Ok(Fact {
        subject,
        criticality,
        reason: String::new(),
        action: String::new(),
        line,
    })
}

/// `Para <intent>[,] adicionar|buscar: <terms>`
fn parse_expansion_line(text: &str) -> Option<(String, Vec<String>)> {
    let (head, terms) = text.split_once(':')?;
    let words: Vec<&str> = head.split_whitespace().collect();
    match words.as_slice() {
        [para, name, verb]
            if fold_key(para) == "PARA"
                && matches!(fold_key(verb).as_str(), "ADICIONAR" | "BUSCAR") =>
        {
            let name = name.trim_matches(|c| c == ',' || c == '"' || c == '\'');
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), term_list(terms)))
        }
        _ => None,
    }
}

/// Accent-folded, upper-cased first word of a line
fn first_word(text: &str) -> Option<String> {
    text.split_whitespace().next().map(fold_key)
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

fn required_phrases(text: &str, line: usize) -> Result<Vec<String>, ParseError> {
    let phrases = quoted_strings(text);
    if phrases.is_empty() {
        return Err(ParseError::new(
            line,
            format!("condition without a quoted phrase: '{}'", text),
        ));
    }
    Ok(phrases)
}

/// Every non-empty `"..."` or `'...'` phrase on the line, in order
fn quoted_strings(text: &str) -> Vec<String> {
    let mut phrases = Vec::new();
    let mut open: Option<(char, usize)> = None;

    for (i, c) in text.char_indices() {
        match open {
            None if c == '"' || c == '\'' => open = Some((c, i + c.len_utf8())),
            Some((quote, start)) if c == quote => {
                let phrase = text[start..i].trim();
                if !phrase.is_empty() {
                    phrases.push(phrase.to_string());
                }
                open = None;
            }
            _ => {}
        }
    }

    phrases
}

/// A quoted string at the start of `text` (may be empty) and the remainder
fn leading_quoted(text: &str) -> Option<(String, &str)> {
    let text = text.trim_start();
    let quote = text.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let body = &text[quote.len_utf8()..];
    let end = body.find(quote)?;
    Some((body[..end].to_string(), &body[end + quote.len_utf8()..]))
}

/// Quoted phrases if any, otherwise a plain comma-separated list
fn term_list(text: &str) -> Vec<String> {
    let quoted = quoted_strings(text);
    if !quoted.is_empty() {
        return quoted;
    }
    text.split(',')
        .map(|t| t.trim().trim_end_matches('.').trim())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}
