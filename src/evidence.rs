//! Evidence and decision statements.
//!
//! Text form, one record per line, statements separated by `;`:
//!
//! ```text
//! obs Signal(@t) = 2; obs Door(@t) = false;
//! decide Move(@t) = -1;
//! ```
//!
//! `@t` inside a term is replaced by the current time step.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::value::OutcomeValue;

static STATEMENT_RE: OnceLock<Regex> = OnceLock::new();
static TIME_STEP_RE: OnceLock<Regex> = OnceLock::new();

fn statement_re() -> &'static Regex {
    STATEMENT_RE.get_or_init(|| {
        Regex::new(r"^(obs|decide)\s+([^=]+?)\s*=\s*(.+?)$").expect("statement regex is valid")
    })
}

fn time_step_re() -> &'static Regex {
    TIME_STEP_RE.get_or_init(|| Regex::new(r"@t\b").expect("time step regex is valid"))
}

/// Replaces every `@t` placeholder in `text` with `@<time_step>`.
#[must_use]
pub fn instantiate_time_step(text: &str, time_step: u64) -> String {
    time_step_re()
        .replace_all(text, format!("@{time_step}").as_str())
        .into_owned()
}

/// Whether a statement observes the world or records a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Observation,
    Decision,
}

impl StatementKind {
    const fn keyword(self) -> &'static str {
        match self {
            Self::Observation => "obs",
            Self::Decision => "decide",
        }
    }
}

/// `term = value`, where `term` names a model quantity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Statement {
    pub kind: StatementKind,
    pub term: String,
    pub value: OutcomeValue,
}

impl Statement {
    pub fn observation(term: impl Into<String>, value: impl Into<OutcomeValue>) -> Self {
        Self {
            kind: StatementKind::Observation,
            term: term.into(),
            value: value.into(),
        }
    }

    pub fn decision(term: impl Into<String>, value: impl Into<OutcomeValue>) -> Self {
        Self {
            kind: StatementKind::Decision,
            term: term.into(),
            value: value.into(),
        }
    }

    /// Parses one statement, without the trailing `;`.
    pub fn parse(text: &str, time_step: u64) -> Result<Self, ValidationError> {
        let text = text.trim();
        let caps = statement_re()
            .captures(text)
            .ok_or_else(|| ValidationError::MalformedStatement {
                statement: text.to_string(),
                reason: "expected '<obs|decide> <term> = <value>'".to_string(),
            })?;

        let kind = match &caps[1] {
            "obs" => StatementKind::Observation,
            _ => StatementKind::Decision,
        };
        let term = instantiate_time_step(caps[2].trim(), time_step);
        let value = OutcomeValue::parse_literal(&caps[3])?;

        Ok(Self { kind, term, value })
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            OutcomeValue::Symbol(s) => write!(f, "{} {} = \"{s}\"", self.kind.keyword(), self.term),
            value => write!(f, "{} {} = {value}", self.kind.keyword(), self.term),
        }
    }
}

/// A batch of statements applied to particles together.
///
/// An empty batch is valid: it advances time without observing anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    statements: Vec<Statement>,
}

impl Evidence {
    #[must_use]
    pub fn new(statements: Vec<Statement>) -> Self {
        Self { statements }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses a record line. Blank segments between `;` are ignored.
    pub fn parse_line(line: &str, time_step: u64) -> Result<Self, ValidationError> {
        let statements = line
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Statement::parse(s, time_step))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { statements })
    }

    /// Like [`Self::parse_line`], but every statement must be of `kind`.
    pub fn parse_line_of(line: &str, time_step: u64, kind: StatementKind) -> Result<Self, ValidationError> {
        let evidence = Self::parse_line(line, time_step)?;
        if let Some(stray) = evidence.statements.iter().find(|s| s.kind != kind) {
            return Err(ValidationError::MalformedStatement {
                statement: stray.to_string(),
                reason: format!("only '{}' statements are accepted here", kind.keyword()),
            });
        }
        Ok(evidence)
    }

    pub fn push(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    #[must_use]
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn observations(&self) -> impl Iterator<Item = &Statement> {
        self.statements
            .iter()
            .filter(|s| s.kind == StatementKind::Observation)
    }

    pub fn decisions(&self) -> impl Iterator<Item = &Statement> {
        self.statements
            .iter()
            .filter(|s| s.kind == StatementKind::Decision)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

impl fmt::Display for Evidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, statement) in self.statements.iter().enumerate() {
            if idx > 0 {
                write!(f, " ")?;
            }
            write!(f, "{statement};")?;
        }
        Ok(())
    }
}
