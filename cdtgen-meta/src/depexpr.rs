//! RPM dependency expressions
//!
//! Simple requirements (`name [op evr]`) are leaves. Rich (boolean)
//! dependencies such as `(libA or (libB >= 2 with libC))` are parsed into a
//! tree of `And`/`Or`/`Not` nodes. Conditional operators are lowered to the
//! same three connectives:
//!
//! - `A with B`, `A and B` -> `And[A, B]`
//! - `A without B` -> `And[A, Not B]`
//! - `A if B` -> `Or[A, Not B]`, with `else C` -> `And[Or[A, Not B], Or[C, B]]`
//! - `A unless B` -> `Or[A, B]`, with `else C` -> `And[Or[A, B], Or[C, Not B]]`

use std::fmt;

use winnow::ascii::multispace0;
use winnow::combinator::{alt, cut_err, delimited, opt, preceded, repeat, terminated};
use winnow::error::StrContext;
use winnow::prelude::*;
use winnow::token::take_while;

use crate::evr::Evr;
use crate::{Error, Result};

/// Version comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Comparison {
    /// Parse the `flags` attribute of a repodata `rpm:entry`
    pub fn from_flags(flags: &str) -> Option<Self> {
        match flags {
            "EQ" => Some(Comparison::Eq),
            "LT" => Some(Comparison::Lt),
            "GT" => Some(Comparison::Gt),
            "LE" => Some(Comparison::Le),
            "GE" => Some(Comparison::Ge),
            _ => None,
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "=" | "==" => Some(Comparison::Eq),
            "<" => Some(Comparison::Lt),
            ">" => Some(Comparison::Gt),
            "<=" | "=<" => Some(Comparison::Le),
            ">=" | "=>" => Some(Comparison::Ge),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::Eq => "==",
            Comparison::Lt => "<",
            Comparison::Gt => ">",
            Comparison::Le => "<=",
            Comparison::Ge => ">=",
        }
    }

    pub fn is_lower_bound(&self) -> bool {
        matches!(self, Comparison::Gt | Comparison::Ge)
    }

    pub fn is_upper_bound(&self) -> bool {
        matches!(self, Comparison::Lt | Comparison::Le)
    }
}

/// Operator and version attached to a requirement
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constraint {
    pub op: Comparison,
    pub evr: Evr,
}

/// A single named requirement with an optional version constraint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requirement {
    pub name: String,
    pub constraint: Option<Constraint>,
    /// Set when `name` comes from a substitution rule rather than the distro
    pub substituted: bool,
}

impl Requirement {
    pub fn unversioned(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: None,
            substituted: false,
        }
    }

    pub fn versioned(name: impl Into<String>, op: Comparison, evr: Evr) -> Self {
        Self {
            name: name.into(),
            constraint: Some(Constraint { op, evr }),
            substituted: false,
        }
    }

    /// The same constraint on the substitution target `name`.
    pub fn substitute(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: self.constraint.clone(),
            substituted: true,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Some(c) => write!(f, "{} {}{}", self.name, c.op.symbol(), c.evr),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A requirement as declared by a package, possibly a boolean expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyExpression {
    Leaf(Requirement),
    And(Vec<DependencyExpression>),
    Or(Vec<DependencyExpression>),
    Not(Box<DependencyExpression>),
}

impl DependencyExpression {
    /// Build an expression from the attributes of a repodata `rpm:entry`.
    ///
    /// Rich dependencies carry the whole expression in `name` and no flags.
    pub fn from_entry(
        name: &str,
        flags: Option<&str>,
        epoch: Option<&str>,
        ver: Option<&str>,
        rel: Option<&str>,
    ) -> Result<Self> {
        if name.starts_with('(') {
            return Self::parse(name);
        }

        let requirement = match (flags.and_then(Comparison::from_flags), ver) {
            (Some(op), Some(ver)) => Requirement::versioned(name, op, Evr::from_attrs(epoch, ver, rel)?),
            _ => Requirement::unversioned(name),
        };
        Ok(DependencyExpression::Leaf(requirement))
    }

    /// Parse a textual dependency, either `name [op evr]` or a rich expression.
    pub fn parse(input: &str) -> Result<Self> {
        terminated(parse_operand, multispace0)
            .parse(input)
            .map_err(|e| Error::Parse(format!("invalid dependency '{input}': {e}")))
    }

    pub fn is_rich(&self) -> bool {
        !matches!(self, DependencyExpression::Leaf(_))
    }

    /// All leaves in the tree, in declaration order (including negated ones).
    pub fn leaves(&self) -> Vec<&Requirement> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Requirement>) {
        match self {
            DependencyExpression::Leaf(r) => out.push(r),
            DependencyExpression::And(children) | DependencyExpression::Or(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
            DependencyExpression::Not(inner) => inner.collect_leaves(out),
        }
    }
}

impl fmt::Display for DependencyExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, children: &[DependencyExpression], op: &str| {
            write!(f, "(")?;
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", op)?;
                }
                write!(f, "{}", child)?;
            }
            write!(f, ")")
        };
        match self {
            DependencyExpression::Leaf(r) => write!(f, "{}", r),
            DependencyExpression::And(children) => join(f, children, "and"),
            DependencyExpression::Or(children) => join(f, children, "or"),
            DependencyExpression::Not(inner) => write!(f, "(not {})", inner),
        }
    }
}

// Winnow parsers

const OPERATORS: [&str; 6] = ["and", "or", "with", "without", "if", "unless"];

/// Anything but whitespace and parentheses
fn is_name_char(c: char) -> bool {
    !c.is_whitespace() && c != '(' && c != ')'
}

/// Names may carry parenthesized parts, e.g. `libc.so.6()(64bit)` or
/// `perl(File::Temp)`.
fn parse_name<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    (
        take_while(1.., is_name_char),
        repeat::<_, _, (), _, _>(
            0..,
            alt((
                take_while(1.., is_name_char),
                delimited('(', take_while(0.., is_name_char), ')'),
            )),
        ),
    )
        .take()
        .parse_next(input)
}

fn parse_comparison(input: &mut &str) -> ModalResult<Comparison> {
    take_while(1.., ['<', '>', '='])
        .verify_map(Comparison::from_symbol)
        .context(StrContext::Label("comparison"))
        .parse_next(input)
}

fn parse_evr(input: &mut &str) -> ModalResult<Evr> {
    take_while(1.., |c: char| !c.is_whitespace() && c != ')')
        .verify_map(|s: &str| Evr::parse(s).ok())
        .context(StrContext::Label("version"))
        .parse_next(input)
}

fn parse_leaf(input: &mut &str) -> ModalResult<DependencyExpression> {
    let name = parse_name.parse_next(input)?;
    let constraint = opt(preceded(
        multispace0,
        (parse_comparison, preceded(multispace0, cut_err(parse_evr))),
    ))
    .parse_next(input)?;
    let requirement = match constraint {
        Some((op, evr)) => Requirement::versioned(name, op, evr),
        None => Requirement::unversioned(name),
    };
    Ok(DependencyExpression::Leaf(requirement))
}

fn parse_operator<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    take_while(1.., |c: char| c.is_ascii_alphabetic())
        .verify(|word: &str| OPERATORS.contains(&word))
        .context(StrContext::Label("operator"))
        .parse_next(input)
}

fn parse_operand(input: &mut &str) -> ModalResult<DependencyExpression> {
    preceded(multispace0, alt((parse_rich, parse_leaf))).parse_next(input)
}

/// Operands following the first one in `(a op b op c)`, all with the same `op`
fn parse_chain(input: &mut &str, op: &str) -> ModalResult<Vec<DependencyExpression>> {
    let second = cut_err(parse_operand).parse_next(input)?;
    let rest: Vec<DependencyExpression> = repeat(
        0..,
        preceded(
            (multispace0, parse_operator.verify(|word: &str| word == op)),
            cut_err(parse_operand),
        ),
    )
    .parse_next(input)?;
    let mut operands = vec![second];
    operands.extend(rest);
    Ok(operands)
}

fn parse_rich(input: &mut &str) -> ModalResult<DependencyExpression> {
    '('.parse_next(input)?;
    let first = cut_err(parse_operand).parse_next(input)?;
    multispace0.parse_next(input)?;
    if opt(')').parse_next(input)?.is_some() {
        return Ok(first);
    }

    let op = cut_err(parse_operator).parse_next(input)?;
    let expr = match op {
        "and" | "with" | "or" => {
            let mut operands = vec![first];
            operands.extend(parse_chain(input, op)?);
            if op == "or" {
                DependencyExpression::Or(operands)
            } else {
                DependencyExpression::And(operands)
            }
        }
        "without" => {
            let second = cut_err(parse_operand).parse_next(input)?;
            DependencyExpression::And(vec![first, DependencyExpression::Not(Box::new(second))])
        }
        _ => {
            let cond = cut_err(parse_operand).parse_next(input)?;
            let otherwise = opt(preceded((multispace0, "else"), cut_err(parse_operand))).parse_next(input)?;
            let negated = DependencyExpression::Not(Box::new(cond.clone()));
            let (when_first, when_else) = if op == "if" {
                (negated, cond)
            } else {
                (cond, negated)
            };
            let primary = DependencyExpression::Or(vec![first, when_first]);
            match otherwise {
                Some(alternative) => DependencyExpression::And(vec![
                    primary,
                    DependencyExpression::Or(vec![alternative, when_else]),
                ]),
                None => primary,
            }
        }
    };

    cut_err((multispace0, ')'))
        .context(StrContext::Label("closing ')'"))
        .parse_next(input)?;
    Ok(expr)
}
