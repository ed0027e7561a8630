//! DKR line lexer — classifies rule-file lines into tokens
//!
//! The DSL is line-oriented, so the lexer works one line at a time:
//! section headers become `Token::Header`, everything else becomes
//! `Token::Text` with its indentation recorded in the span.
//! `#` comments and visual separators (`─`, `━`, `═`) are discarded
//! wherever they appear. Blank lines become `Token::Blank`, which only
//! correction bodies care about. A leading byte-order mark is ignored.
//!
//! Guarantees:
//! - Deterministic: same input always produces same token stream
//! - Every token carries its 1-based source line

use crate::error::ParseError;

/// The closed set of sections a rule file may contain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Domain,
    Facts,
    Intents,
    Expansions,
    Normalizations,
    Rules,
    Synonyms,
}

impl SectionKind {
    /// Canonical header keyword, as written in rule files
    pub fn keyword(&self) -> &'static str {
        match self {
            SectionKind::Domain => "DOMÍNIO",
            SectionKind::Facts => "FATOS CONHECIDOS",
            SectionKind::Intents => "PADRÕES DE INTENÇÃO",
            SectionKind::Expansions => "EXPANSÃO DE BUSCA",
            SectionKind::Normalizations => "NORMALIZAÇÃO DE TERMOS",
            SectionKind::Rules => "REGRAS DE VALIDAÇÃO",
            SectionKind::Synonyms => "SINÔNIMOS",
        }
    }

    /// Match an accent-folded, upper-cased header key
    fn from_folded_key(key: &str) -> Option<Self> {
        match key {
            "DOMINIO" => Some(SectionKind::Domain),
            "FATOS CONHECIDOS" | "FATOS" => Some(SectionKind::Facts),
            "PADROES DE INTENCAO" => Some(SectionKind::Intents),
            "EXPANSAO DE BUSCA" => Some(SectionKind::Expansions),
            "NORMALIZACAO DE TERMOS" | "NORMALIZACOES" => Some(SectionKind::Normalizations),
            "REGRAS DE VALIDACAO" => Some(SectionKind::Rules),
            "SINONIMOS" => Some(SectionKind::Synonyms),
            _ => None,
        }
    }
}

impl std::fmt::Display for SectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Token types for DKR lines
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Section header; `value` is the inline text after the colon
    /// (only meaningful for `DOMÍNIO: <name>`)
    Header { kind: SectionKind, value: String },
    /// Any other significant line, trimmed
    Text(String),
    /// Empty or whitespace-only line
    Blank,
}

/// Position of a line in source text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// 1-based line number
    pub line: usize,
    /// Leading whitespace width in characters
    pub indent: usize,
}

impl Span {
    pub fn is_indented(&self) -> bool {
        self.indent > 0
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.line)
    }
}

/// Token with source position. `raw` keeps the untrimmed line so
/// correction bodies can preserve relative indentation.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
    pub raw: String,
}

/// Line lexer for DKR source text
pub struct Tokenizer<'a> {
    input: &'a str,
}

impl<'a> Tokenizer<'a> {
    pub fn new(text: &'a str) -> Self {
        Tokenizer { input: text }
    }

    /// Tokenize the entire input. Fails on the first unknown section header.
    pub fn tokenize(&self) -> Result<Vec<SpannedToken>, ParseError> {
        let mut tokens = Vec::new();

        let input = self.input.strip_prefix('\u{feff}').unwrap_or(self.input);

        for (index, raw) in input.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw.trim();

            if trimmed.is_empty() {
                tokens.push(SpannedToken {
                    token: Token::Blank,
                    span: Span { line, indent: 0 },
                    raw: String::new(),
                });
                continue;
            }
            if is_ignorable(trimmed) {
                continue;
            }

            let indent = raw.chars().take_while(|c| c.is_whitespace()).count();
            let span = Span { line, indent };

            let token = if indent == 0 {
                classify_top_level(trimmed, line)?
            } else {
                Token::Text(trimmed.to_string())
            };

            tokens.push(SpannedToken {
                token,
                span,
                raw: raw.trim_end().to_string(),
            });
        }

        Ok(tokens)
    }
}

// ── Line classification ────────────────────────────────

fn is_ignorable(trimmed: &str) -> bool {
    trimmed.starts_with('#')
        || trimmed.starts_with('─')
        || trimmed.starts_with('━')
        || trimmed.starts_with('═')
}

fn classify_top_level(trimmed: &str, line: usize) -> Result<Token, ParseError> {
    let (key, rest) = match trimmed.split_once(':') {
        Some((key, rest)) => (key.trim(), Some(rest.trim())),
        None => (trimmed, None),
    };
    let folded = fold_key(key);

    match (SectionKind::from_folded_key(&folded), rest) {
        (Some(SectionKind::Domain), Some(value)) => {
            return Ok(Token::Header {
                kind: SectionKind::Domain,
                value: value.to_string(),
            });
        }
        (Some(SectionKind::Domain), None) => {}
        (Some(kind), None) | (Some(kind), Some("")) => {
            return Ok(Token::Header {
                kind,
                value: String::new(),
            });
        }
        _ => {}
    }

    if rest == Some("") && looks_like_header(key) && !folded.starts_with("ENTAO ") {
        return Err(ParseError::new(
            line,
            format!("unknown section '{}'", key),
        ));
    }

    Ok(Token::Text(trimmed.to_string()))
}

/// Upper-case words only (accents allowed), e.g. `OUTRA SEÇÃO`
fn looks_like_header(key: &str) -> bool {
    key.chars().any(|c| c.is_alphabetic())
        && key
            .chars()
            .all(|c| c == ' ' || (c.is_alphabetic() && !c.is_lowercase()))
}

/// Upper-case, strip Portuguese accents and collapse inner whitespace
pub(crate) fn fold_key(key: &str) -> String {
    let folded: String = key
        .to_uppercase()
        .chars()
        .map(|c| match c {
            'Á' | 'À' | 'Â' | 'Ã' => 'A',
            'É' | 'Ê' => 'E',
            'Í' => 'I',
            'Ó' | 'Ô' | 'Õ' => 'O',
            'Ú' | 'Ü' => 'U',
            'Ç' => 'C',
            other => other,
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}
