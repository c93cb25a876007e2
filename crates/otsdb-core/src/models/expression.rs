//! Expression queries (`/api/query/exp`).
//!
//! Expressions are parsed into a small AST of identifiers, numbers and binary
//! operators. References between named expressions are inlined by rewriting
//! the tree, so `ex1` can never clobber part of `ex10`. The resolved trees are
//! serialized back to text with the minimum parentheses needed.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use super::data_point::Tags;
use crate::error::CoreError;

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Add | BinaryOp::Sub => 1,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 2,
        }
    }

    fn symbol(self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
            BinaryOp::Rem => '%',
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(BinaryOp::Add),
            '-' => Some(BinaryOp::Sub),
            '*' => Some(BinaryOp::Mul),
            '/' => Some(BinaryOp::Div),
            '%' => Some(BinaryOp::Rem),
            _ => None,
        }
    }
}

/// Expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Metric id or expression id
    Ident(String),
    Number(f64),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

const UNARY_PRECEDENCE: u8 = 3;
const ATOM_PRECEDENCE: u8 = 4;

impl Expr {
    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Ident(name.into())
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Parse an infix expression such as `4*ex1 + 3*(ex2 - f1)`.
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr(1)?;
        if let Some(tok) = parser.peek() {
            return Err(CoreError::validation(
                "expr",
                format!("unexpected {tok:?} in '{input}'"),
            ));
        }
        Ok(expr)
    }

    /// Every identifier referenced by the tree
    pub fn identifiers(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Ident(name) => {
                out.insert(name.clone());
            }
            Expr::Number(_) => {}
            Expr::Neg(inner) => inner.collect_identifiers(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_identifiers(out);
                rhs.collect_identifiers(out);
            }
        }
    }

    /// Replace each bound identifier with a copy of its tree. Unbound
    /// identifiers are kept; substituted trees are not rewritten again.
    pub fn substitute(&self, bindings: &HashMap<String, Expr>) -> Expr {
        match self {
            Expr::Ident(name) => bindings.get(name).cloned().unwrap_or_else(|| self.clone()),
            Expr::Number(_) => self.clone(),
            Expr::Neg(inner) => Expr::Neg(Box::new(inner.substitute(bindings))),
            Expr::Binary { op, lhs, rhs } => {
                Expr::binary(*op, lhs.substitute(bindings), rhs.substitute(bindings))
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Ident(_) | Expr::Number(_) => ATOM_PRECEDENCE,
            Expr::Neg(_) => UNARY_PRECEDENCE,
            Expr::Binary { op, .. } => op.precedence(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Ident(name) => write!(f, "{name}"),
            Expr::Number(n) => write!(f, "{n}"),
            Expr::Neg(inner) => {
                if inner.precedence() < ATOM_PRECEDENCE {
                    write!(f, "-({inner})")
                } else {
                    write!(f, "-{inner}")
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let prec = op.precedence();
                if lhs.precedence() < prec {
                    write!(f, "({lhs})")?;
                } else {
                    write!(f, "{lhs}")?;
                }
                write!(f, " {} ", op.symbol())?;
                // left-associative: an equal-precedence right child needs parens
                if rhs.precedence() <= prec {
                    write!(f, "({rhs})")
                } else {
                    write!(f, "{rhs}")
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Op(BinaryOp),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, CoreError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
        } else if let Some(op) = BinaryOp::from_char(c) {
            tokens.push(Token::Op(op));
            i += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = text.parse::<f64>().map_err(|_| {
                CoreError::validation("expr", format!("invalid number '{text}' in '{input}'"))
            })?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            return Err(CoreError::validation(
                "expr",
                format!("unexpected character '{c}' in '{input}'"),
            ));
        }
    }

    if tokens.is_empty() {
        return Err(CoreError::validation("expr", "expression is empty"));
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    /// Precedence climbing over left-associative operators.
    fn expr(&mut self, min_prec: u8) -> Result<Expr, CoreError> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if op.precedence() < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.expr(op.precedence() + 1)?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, CoreError> {
        if let Some(Token::Op(BinaryOp::Sub)) = self.peek() {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, CoreError> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(Expr::Ident(name)),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let inner = self.expr(1)?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(CoreError::validation("expr", "missing closing parenthesis")),
                }
            }
            Some(tok) => Err(CoreError::validation(
                "expr",
                format!("unexpected {tok:?}"),
            )),
            None => Err(CoreError::validation("expr", "unexpected end of expression")),
        }
    }
}

/// Named expressions in definition order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionSet {
    entries: Vec<(String, Expr)>,
}

impl ExpressionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and add an expression. Ids must be unique.
    pub fn insert(&mut self, id: impl Into<String>, expr: &str) -> Result<(), CoreError> {
        let id = id.into();
        if self.entries.iter().any(|(existing, _)| *existing == id) {
            return Err(CoreError::validation(
                "expressions",
                format!("duplicate expression id '{id}'"),
            ));
        }
        let parsed = Expr::parse(expr)?;
        self.entries.push((id, parsed));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Expr> {
        self.entries.iter().find(|(k, _)| k == id).map(|(_, e)| e)
    }

    /// Inline every reference to another expression so that only metric ids
    /// remain as leaves. Fails on unknown identifiers and reference cycles.
    pub fn resolve(&self, metric_ids: &HashSet<String>) -> Result<Vec<(String, Expr)>, CoreError> {
        let defs: HashMap<&str, &Expr> = self
            .entries
            .iter()
            .map(|(id, e)| (id.as_str(), e))
            .collect();

        if let Some(id) = defs.keys().find(|id| metric_ids.contains(**id)) {
            return Err(CoreError::validation(
                "expressions",
                format!("expression id '{id}' shadows a metric id"),
            ));
        }

        let mut resolved: HashMap<String, Expr> = HashMap::new();
        let mut visiting: Vec<String> = Vec::new();
        self.entries
            .iter()
            .map(|(id, _)| {
                resolve_one(id, &defs, metric_ids, &mut resolved, &mut visiting)
                    .map(|expr| (id.clone(), expr))
            })
            .collect()
    }
}

fn resolve_one(
    id: &str,
    defs: &HashMap<&str, &Expr>,
    metric_ids: &HashSet<String>,
    resolved: &mut HashMap<String, Expr>,
    visiting: &mut Vec<String>,
) -> Result<Expr, CoreError> {
    if let Some(done) = resolved.get(id) {
        return Ok(done.clone());
    }
    if visiting.iter().any(|v| v == id) {
        visiting.push(id.to_string());
        return Err(CoreError::validation(
            "expressions",
            format!("reference cycle: {}", visiting.join(" -> ")),
        ));
    }
    let expr = defs.get(id).copied().ok_or_else(|| {
        CoreError::Internal(format!("expression '{id}' missing from definitions"))
    })?;

    visiting.push(id.to_string());
    let mut bindings = HashMap::new();
    for ident in expr.identifiers() {
        if metric_ids.contains(&ident) {
            continue;
        }
        if defs.contains_key(ident.as_str()) {
            let inner = resolve_one(&ident, defs, metric_ids, resolved, visiting)?;
            bindings.insert(ident, inner);
        } else {
            return Err(CoreError::validation(
                "expressions",
                format!("'{id}' references unknown identifier '{ident}'"),
            ));
        }
    }
    visiting.pop();

    let out = expr.substitute(&bindings);
    resolved.insert(id.to_string(), out.clone());
    Ok(out)
}

/// A metric participating in an expression query
#[derive(Debug, Clone, PartialEq)]
pub struct ExpMetric {
    pub id: String,
    pub metric: String,
    /// Literal tag filters; become a `filters` entry referenced by this metric
    pub tags: Tags,
}

/// Builder for the `/api/query/exp` body
#[derive(Debug, Clone, PartialEq)]
pub struct ExpQuery {
    pub start: String,
    pub end: Option<String>,
    pub aggregator: String,
    /// Scalar substituted for missing values
    pub fill_value: f64,
    pub metrics: Vec<ExpMetric>,
    pub expressions: ExpressionSet,
}

impl Default for ExpQuery {
    fn default() -> Self {
        Self {
            start: "1d-ago".to_string(),
            end: None,
            aggregator: "sum".to_string(),
            fill_value: 0.0,
            metrics: Vec::new(),
            expressions: ExpressionSet::new(),
        }
    }
}

impl ExpQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start(mut self, start: impl Into<String>) -> Self {
        self.start = start.into();
        self
    }

    pub fn with_end(mut self, end: impl Into<String>) -> Self {
        self.end = Some(end.into());
        self
    }

    pub fn with_aggregator(mut self, aggregator: impl Into<String>) -> Self {
        self.aggregator = aggregator.into();
        self
    }

    pub fn with_fill_value(mut self, value: f64) -> Self {
        self.fill_value = value;
        self
    }

    pub fn metric(mut self, id: impl Into<String>, metric: impl Into<String>, tags: Tags) -> Self {
        self.metrics.push(ExpMetric {
            id: id.into(),
            metric: metric.into(),
            tags,
        });
        self
    }

    pub fn expression(mut self, id: impl Into<String>, expr: &str) -> Result<Self, CoreError> {
        self.expressions.insert(id, expr)?;
        Ok(self)
    }

    /// Validate and build the request body with all expression references inlined.
    pub fn to_body(&self) -> Result<serde_json::Value, CoreError> {
        if self.metrics.is_empty() {
            return Err(CoreError::validation("metrics", "at least one metric is required"));
        }
        if self.expressions.is_empty() {
            return Err(CoreError::validation(
                "expressions",
                "at least one expression is required",
            ));
        }

        let mut metric_ids = HashSet::new();
        for m in &self.metrics {
            if m.id.is_empty() || m.metric.is_empty() {
                return Err(CoreError::validation(
                    "metrics",
                    "every metric needs an id and a name",
                ));
            }
            if !metric_ids.insert(m.id.clone()) {
                return Err(CoreError::validation(
                    "metrics",
                    format!("duplicate metric id '{}'", m.id),
                ));
            }
        }

        let resolved = self.expressions.resolve(&metric_ids)?;

        let filters: Vec<FilterBody> = self
            .metrics
            .iter()
            .filter(|m| !m.tags.is_empty())
            .map(|m| FilterBody {
                id: filter_id(&m.id),
                tags: m
                    .tags
                    .iter()
                    .map(|(k, v)| TagFilterBody {
                        kind: "literal_or",
                        tagk: k.clone(),
                        filter: v.clone(),
                        group_by: false,
                    })
                    .collect(),
            })
            .collect();

        let body = ExpBody {
            time: TimeBody {
                start: &self.start,
                end: self.end.as_deref(),
                aggregator: &self.aggregator,
            },
            filters,
            metrics: self
                .metrics
                .iter()
                .map(|m| MetricBody {
                    id: &m.id,
                    metric: &m.metric,
                    filter: (!m.tags.is_empty()).then(|| filter_id(&m.id)),
                    fill_policy: FillPolicyBody {
                        policy: "scalar",
                        value: self.fill_value,
                    },
                })
                .collect(),
            expressions: resolved
                .iter()
                .map(|(id, expr)| ExpressionBody {
                    id: id.clone(),
                    expr: expr.to_string(),
                })
                .collect(),
        };

        Ok(serde_json::to_value(body)?)
    }
}

fn filter_id(metric_id: &str) -> String {
    format!("{metric_id}_filter")
}

#[derive(Serialize)]
struct ExpBody<'a> {
    time: TimeBody<'a>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    filters: Vec<FilterBody>,
    metrics: Vec<MetricBody<'a>>,
    expressions: Vec<ExpressionBody>,
}

#[derive(Serialize)]
struct TimeBody<'a> {
    start: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<&'a str>,
    aggregator: &'a str,
}

#[derive(Serialize)]
struct FilterBody {
    id: String,
    tags: Vec<TagFilterBody>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TagFilterBody {
    #[serde(rename = "type")]
    kind: &'static str,
    tagk: String,
    filter: String,
    group_by: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricBody<'a> {
    id: &'a str,
    metric: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
    fill_policy: FillPolicyBody,
}

#[derive(Serialize)]
struct FillPolicyBody {
    policy: &'static str,
    value: f64,
}

#[derive(Serialize)]
struct ExpressionBody {
    id: String,
    expr: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn ids(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_respects_precedence() {
        let expr = Expr::parse("4*ex1 + 3*ex2").unwrap();
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::Add,
                Expr::binary(BinaryOp::Mul, Expr::Number(4.0), Expr::ident("ex1")),
                Expr::binary(BinaryOp::Mul, Expr::Number(3.0), Expr::ident("ex2")),
            )
        );
        assert_eq!(expr.to_string(), "4 * ex1 + 3 * ex2");
    }

    #[test]
    fn display_keeps_needed_parentheses() {
        for (input, expected) in [
            ("(a + b) * 2", "(a + b) * 2"),
            ("a - (b - c)", "a - (b - c)"),
            ("(a - b) - c", "a - b - c"),
            ("a / (b * c)", "a / (b * c)"),
            ("-(a + b)", "-(a + b)"),
            ("-a * b", "-a * b"),
            ("((a))", "a"),
        ] {
            assert_eq!(Expr::parse(input).unwrap().to_string(), expected, "{input}");
        }
    }

    #[test]
    fn display_reparses_to_same_tree() {
        let expr = Expr::parse("ex5 - ex4 + ex3 * (ex2 - ex1) % 7").unwrap();
        assert_eq!(Expr::parse(&expr.to_string()).unwrap(), expr);
    }

    #[test]
    fn parse_errors() {
        assert!(Expr::parse("").is_err());
        assert!(Expr::parse("a +").is_err());
        assert!(Expr::parse("(a + b").is_err());
        assert!(Expr::parse("a b").is_err());
        assert!(Expr::parse("a $ b").is_err());
    }

    #[test]
    fn substitute_matches_whole_identifiers_only() {
        let expr = Expr::parse("ex1 + ex10").unwrap();
        let mut bindings = HashMap::new();
        bindings.insert("ex1".to_string(), Expr::parse("f1 + f2").unwrap());
        let out = expr.substitute(&bindings);
        assert_eq!(out.to_string(), "f1 + f2 + ex10");
    }

    #[test]
    fn resolve_inlines_nested_expressions() {
        let mut set = ExpressionSet::new();
        set.insert("ex1", "f1 + f2").unwrap();
        set.insert("ex2", "ex1 * 2").unwrap();
        set.insert("ex3", "2 * ex2").unwrap();
        set.insert("ex4", "4*ex1 + 3*ex2").unwrap();

        let resolved = set.resolve(&ids(&["f1", "f2"])).unwrap();
        let text: Vec<String> = resolved.iter().map(|(_, e)| e.to_string()).collect();
        assert_eq!(text[0], "f1 + f2");
        assert_eq!(text[1], "(f1 + f2) * 2");
        assert_eq!(text[2], "2 * ((f1 + f2) * 2)");
        assert_eq!(text[3], "4 * (f1 + f2) + 3 * ((f1 + f2) * 2)");
        for (_, expr) in &resolved {
            assert!(expr.identifiers().iter().all(|i| i == "f1" || i == "f2"));
        }
    }

    #[test]
    fn resolve_detects_cycles() {
        let mut set = ExpressionSet::new();
        set.insert("a1", "a2 + f1").unwrap();
        set.insert("a2", "a1 * 2").unwrap();
        let err = set.resolve(&ids(&["f1"])).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn resolve_rejects_unknown_identifier() {
        let mut set = ExpressionSet::new();
        set.insert("ex1", "f1 + f9").unwrap();
        assert_matches!(
            set.resolve(&ids(&["f1"])),
            Err(CoreError::Validation { message, .. }) if message.contains("f9")
        );
    }

    #[test]
    fn duplicate_expression_id_rejected() {
        let mut set = ExpressionSet::new();
        set.insert("ex1", "f1").unwrap();
        assert!(set.insert("ex1", "f2").is_err());
    }

    #[test]
    fn exp_query_body() {
        let mut tags = Tags::new();
        tags.insert("type".to_string(), "ts".to_string());
        let query = ExpQuery::new()
            .with_start("1h-ago")
            .with_fill_value(1.5)
            .metric("f1", "test.f1", tags)
            .metric("f2", "test.f2", Tags::new())
            .expression("ex1", "f1 + f2")
            .unwrap()
            .expression("ex2", "ex1 * 2")
            .unwrap();

        let body = query.to_body().unwrap();
        assert_eq!(body["time"]["start"], "1h-ago");
        assert_eq!(body["time"]["aggregator"], "sum");
        assert!(body["time"].get("end").is_none());
        assert_eq!(body["metrics"][0]["filter"], "f1_filter");
        assert!(body["metrics"][1].get("filter").is_none());
        assert_eq!(body["metrics"][0]["fillPolicy"]["policy"], "scalar");
        assert_eq!(body["metrics"][0]["fillPolicy"]["value"], 1.5);
        assert_eq!(body["filters"][0]["tags"][0]["tagk"], "type");
        assert_eq!(body["filters"][0]["tags"][0]["groupBy"], false);
        assert_eq!(body["expressions"][1]["expr"], "(f1 + f2) * 2");
    }

    #[test]
    fn exp_query_requires_metrics_and_expressions() {
        assert!(ExpQuery::new().to_body().is_err());
        let no_expr = ExpQuery::new().metric("f1", "m", Tags::new());
        assert!(no_expr.to_body().is_err());
        let dup = ExpQuery::new()
            .metric("f1", "m", Tags::new())
            .metric("f1", "n", Tags::new())
            .expression("e", "f1")
            .unwrap();
        assert!(dup.to_body().is_err());
    }
}
