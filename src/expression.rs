//! `displayDependsOn` condition evaluation.
//!
//! A condition is a list of comparisons `<field> <op> <literal>` joined by
//! `&&` / `||`. The joins are folded strictly left to right without
//! precedence, so `a || b && c` means `(a || b) && c`. Schemas in the field
//! rely on that reading, so it is kept as is.
//!
//! Malformed conditions never hide a field: [`evaluate`] logs the problem and
//! answers `true`.

use thiserror::Error;

use crate::schema::{FieldDescriptor, FieldRef, Scope};
use crate::value::FieldValue;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("No comparison operator in {0:?}")]
    MissingOperator(String),

    #[error("Missing field name in {0:?}")]
    MissingField(String),

    #[error("Dangling {0} at end of condition")]
    DanglingJoin(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl CompareOp {
    // Two-character operators first so `>=` is not read as `>`.
    const TOKENS: [(&'static str, CompareOp); 6] = [
        ("==", CompareOp::Eq),
        ("!=", CompareOp::Ne),
        (">=", CompareOp::Ge),
        ("<=", CompareOp::Le),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
    ];

    fn is_relational(&self) -> bool {
        !matches!(self, Self::Eq | Self::Ne)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Join {
    And,
    Or,
}

/// Right-hand side of a comparison after coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw {
            "true" => return Self::Bool(true),
            "false" => return Self::Bool(false),
            _ => {}
        }
        if looks_like_int(raw) {
            if let Ok(n) = raw.parse() {
                return Self::Int(n);
            }
        }
        if looks_like_decimal(raw) {
            if let Ok(f) = raw.parse() {
                return Self::Float(f);
            }
        }
        Self::Str(strip_quotes(raw).to_string())
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            Self::Str(s) => s.trim().parse().ok(),
        }
    }
}

fn looks_like_int(raw: &str) -> bool {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn looks_like_decimal(raw: &str) -> bool {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    match digits.split_once('.') {
        Some((whole, frac)) => {
            !whole.is_empty()
                && !frac.is_empty()
                && whole.chars().all(|c| c.is_ascii_digit())
                && frac.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

fn strip_quotes(raw: &str) -> &str {
    for quote in ['\'', '"'] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return &raw[1..raw.len() - 1];
        }
    }
    raw
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub field: FieldRef,
    pub op: CompareOp,
    pub literal: Literal,
}

impl Comparison {
    fn parse(raw: &str) -> Result<Self, ExpressionError> {
        let (position, token, op) = find_operator(raw)
            .ok_or_else(|| ExpressionError::MissingOperator(raw.trim().to_string()))?;

        let field = raw[..position].trim();
        if field.is_empty() {
            return Err(ExpressionError::MissingField(raw.trim().to_string()));
        }

        Ok(Self {
            field: FieldRef::parse(field),
            op,
            literal: Literal::parse(&raw[position + token.len()..]),
        })
    }

    pub fn holds(&self, actual: Option<&FieldValue>) -> bool {
        if self.op.is_relational() {
            // A missing field compares as 0.
            let left = match actual {
                None | Some(FieldValue::Empty) => Some(0.0),
                Some(value) => value.as_f64(),
            };
            let (Some(left), Some(right)) = (left, self.literal.as_f64()) else {
                return false;
            };
            return match self.op {
                CompareOp::Gt => left > right,
                CompareOp::Lt => left < right,
                CompareOp::Ge => left >= right,
                CompareOp::Le => left <= right,
                CompareOp::Eq | CompareOp::Ne => unreachable!("equality handled below"),
            };
        }

        let equal = actual.is_some_and(|value| strictly_equal(value, &self.literal));
        match self.op {
            CompareOp::Eq => equal,
            _ => !equal,
        }
    }
}

/// Equality by kind: numbers numerically, text case-sensitively, bools with bools.
fn strictly_equal(value: &FieldValue, literal: &Literal) -> bool {
    match (value, literal) {
        (FieldValue::Text(s), Literal::Str(l)) => s == l,
        (FieldValue::Bool(b), Literal::Bool(l)) => b == l,
        (FieldValue::Int(_) | FieldValue::Float(_), Literal::Int(_) | Literal::Float(_)) => {
            value.as_f64() == literal.as_f64()
        }
        _ => false,
    }
}

/// Earliest operator occurrence, preferring two-character tokens at a tie.
fn find_operator(raw: &str) -> Option<(usize, &'static str, CompareOp)> {
    CompareOp::TOKENS
        .iter()
        .filter_map(|(token, op)| raw.find(token).map(|pos| (pos, *token, *op)))
        .min_by_key(|(pos, token, _)| (*pos, std::cmp::Reverse(token.len())))
}

/// A parsed condition ready to be evaluated repeatedly.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    comparisons: Vec<Comparison>,
    joins: Vec<Join>,
}

impl Condition {
    pub fn parse(raw: &str) -> Result<Self, ExpressionError> {
        let mut comparisons = Vec::new();
        let mut joins = Vec::new();
        let mut rest = raw.trim();

        if rest.is_empty() {
            return Ok(Self {
                comparisons,
                joins,
            });
        }

        loop {
            let next_join = [("&&", Join::And), ("||", Join::Or)]
                .into_iter()
                .filter_map(|(token, join)| rest.find(token).map(|pos| (pos, join)))
                .min_by_key(|(pos, _)| *pos);

            match next_join {
                Some((pos, join)) => {
                    comparisons.push(Comparison::parse(&rest[..pos])?);
                    joins.push(join);
                    rest = &rest[pos + 2..];
                    if rest.trim().is_empty() {
                        return Err(ExpressionError::DanglingJoin(match join {
                            Join::And => "&&",
                            Join::Or => "||",
                        }));
                    }
                }
                None => {
                    comparisons.push(Comparison::parse(rest)?);
                    break;
                }
            }
        }

        Ok(Self {
            comparisons,
            joins,
        })
    }

    pub fn comparisons(&self) -> &[Comparison] {
        &self.comparisons
    }

    /// Evaluate against a lookup. An empty condition is `true`.
    pub fn evaluate<F>(&self, lookup: F) -> bool
    where
        F: Fn(&FieldRef) -> Option<FieldValue>,
    {
        let mut results = self
            .comparisons
            .iter()
            .map(|comparison| comparison.holds(lookup(&comparison.field).as_ref()));

        let Some(first) = results.next() else {
            return true;
        };

        results
            .zip(self.joins.iter())
            .fold(first, |acc, (result, join)| match join {
                Join::And => acc && result,
                Join::Or => acc || result,
            })
    }
}

/// Parse and evaluate in one step, failing open on malformed input.
pub fn evaluate<F>(condition: &str, lookup: F) -> bool
where
    F: Fn(&FieldRef) -> Option<FieldValue>,
{
    match Condition::parse(condition) {
        Ok(parsed) => parsed.evaluate(lookup),
        Err(e) => {
            log::error!("Cannot evaluate condition {:?}: {}", condition, e);
            true
        }
    }
}

/// Whether `field` is shown in `scope`. Fields without a condition always are.
pub fn is_visible(field: &FieldDescriptor, scope: &Scope<'_>) -> bool {
    match field.display_depends_on.as_deref() {
        Some(condition) => evaluate(condition, |r| scope.resolve(r).cloned()),
        None => true,
    }
}
