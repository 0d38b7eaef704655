//! The boolean query expression AST and its normalization passes.

use crate::data::Data;
use crate::operator::RelOp;
use crate::schema::Type;
use std::fmt;

/// The left-hand side of a predicate: selects columns to test.
#[derive(Debug, Clone, PartialEq)]
pub enum Extractor {
    /// Matches columns by a well-known attribute, e.g. `time`.
    Attribute(String),
    /// Matches columns whose flattened name ends with the given suffix.
    Key(String),
    /// Matches columns whose type is congruent to the given type.
    Type(Type),
}

impl Extractor {
    /// Whether this extractor selects the given flattened column.
    pub fn matches(&self, name: &str, ty: &Type) -> bool {
        match self {
            Extractor::Attribute(attr) => {
                attr == "time" && matches!(ty.resolve().kind(), crate::TypeKind::Timestamp)
            }
            Extractor::Key(suffix) => {
                name == suffix
                    || name
                        .strip_suffix(suffix)
                        .is_some_and(|rest| rest.ends_with('.'))
            }
            Extractor::Type(t) => ty.congruent(t),
        }
    }
}

/// One side of a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A column selector.
    Extractor(Extractor),
    /// A literal value.
    Value(Data),
}

/// A relational comparison between two operands.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Left operand.
    pub lhs: Operand,
    /// The relational operator.
    pub op: RelOp,
    /// Right operand.
    pub rhs: Operand,
}

impl Predicate {
    /// Creates a predicate.
    pub fn new(lhs: Operand, op: RelOp, rhs: Operand) -> Self {
        Self { lhs, op, rhs }
    }

    /// The extractor-and-literal view of a normalized predicate.
    ///
    /// Returns `None` when the predicate is not in `extractor op value`
    /// form.
    pub fn as_lookup(&self) -> Option<(&Extractor, RelOp, &Data)> {
        match (&self.lhs, &self.rhs) {
            (Operand::Extractor(ex), Operand::Value(x)) => Some((ex, self.op, x)),
            _ => None,
        }
    }
}

/// A boolean expression over predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A leaf comparison.
    Predicate(Predicate),
    /// All children must hold.
    Conjunction(Vec<Expression>),
    /// At least one child must hold.
    Disjunction(Vec<Expression>),
    /// The child must not hold.
    Negation(Box<Expression>),
}

impl Expression {
    /// Convenience constructor for a predicate leaf.
    pub fn predicate(lhs: Operand, op: RelOp, rhs: Operand) -> Self {
        Self::Predicate(Predicate::new(lhs, op, rhs))
    }

    /// Normalizes the expression:
    ///
    /// 1. Negations are pushed into predicates (De Morgan) until no
    ///    negation wraps a compound.
    /// 2. Extractors move to the left of predicates, flipping operators.
    /// 3. Nested conjunctions/disjunctions are folded and duplicate
    ///    operands dropped.
    #[must_use]
    pub fn normalize(self) -> Expression {
        fold(hoist(push_negations(self, false)))
    }

    /// All predicate leaves, in syntactic order.
    pub fn predicates(&self) -> Vec<&Predicate> {
        let mut out = Vec::new();
        collect_predicates(self, &mut out);
        out
    }
}

fn collect_predicates<'a>(e: &'a Expression, out: &mut Vec<&'a Predicate>) {
    match e {
        Expression::Predicate(p) => out.push(p),
        Expression::Conjunction(xs) | Expression::Disjunction(xs) => {
            for x in xs {
                collect_predicates(x, out);
            }
        }
        Expression::Negation(x) => collect_predicates(x, out),
    }
}

fn push_negations(e: Expression, negated: bool) -> Expression {
    match e {
        Expression::Negation(inner) => push_negations(*inner, !negated),
        Expression::Conjunction(xs) => {
            let children = xs.into_iter().map(|x| push_negations(x, negated)).collect();
            if negated {
                Expression::Disjunction(children)
            } else {
                Expression::Conjunction(children)
            }
        }
        Expression::Disjunction(xs) => {
            let children = xs.into_iter().map(|x| push_negations(x, negated)).collect();
            if negated {
                Expression::Conjunction(children)
            } else {
                Expression::Disjunction(children)
            }
        }
        Expression::Predicate(mut p) => {
            if negated {
                p.op = p.op.negate();
            }
            Expression::Predicate(p)
        }
    }
}

fn hoist(e: Expression) -> Expression {
    match e {
        Expression::Predicate(p) => {
            let flipped = match (&p.lhs, &p.rhs) {
                (Operand::Value(_), Operand::Extractor(_)) => Predicate {
                    lhs: p.rhs.clone(),
                    op: p.op.flip(),
                    rhs: p.lhs.clone(),
                },
                _ => p,
            };
            Expression::Predicate(flipped)
        }
        Expression::Conjunction(xs) => {
            Expression::Conjunction(xs.into_iter().map(hoist).collect())
        }
        Expression::Disjunction(xs) => {
            Expression::Disjunction(xs.into_iter().map(hoist).collect())
        }
        Expression::Negation(x) => Expression::Negation(Box::new(hoist(*x))),
    }
}

fn fold(e: Expression) -> Expression {
    match e {
        Expression::Conjunction(xs) => fold_compound(xs, true),
        Expression::Disjunction(xs) => fold_compound(xs, false),
        Expression::Negation(x) => Expression::Negation(Box::new(fold(*x))),
        leaf => leaf,
    }
}

fn fold_compound(xs: Vec<Expression>, conjunction: bool) -> Expression {
    let mut children: Vec<Expression> = Vec::new();
    for x in xs {
        let x = fold(x);
        match x {
            Expression::Conjunction(inner) if conjunction => {
                for y in inner {
                    if !children.contains(&y) {
                        children.push(y);
                    }
                }
            }
            Expression::Disjunction(inner) if !conjunction => {
                for y in inner {
                    if !children.contains(&y) {
                        children.push(y);
                    }
                }
            }
            other => {
                if !children.contains(&other) {
                    children.push(other);
                }
            }
        }
    }
    if children.len() == 1 {
        return children.remove(0);
    }
    if conjunction {
        Expression::Conjunction(children)
    } else {
        Expression::Disjunction(children)
    }
}

impl fmt::Display for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extractor::Attribute(name) => write!(f, "&{name}"),
            Extractor::Key(key) => write!(f, "{key}"),
            Extractor::Type(t) => write!(f, ":{t}"),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Extractor(ex) => write!(f, "{ex}"),
            Operand::Value(x) => write!(f, "{x}"),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Predicate(p) => write!(f, "{p}"),
            Expression::Conjunction(xs) => write_compound(f, xs, " && "),
            Expression::Disjunction(xs) => write_compound(f, xs, " || "),
            Expression::Negation(x) => write!(f, "! ({x})"),
        }
    }
}

fn write_compound(f: &mut fmt::Formatter<'_>, xs: &[Expression], sep: &str) -> fmt::Result {
    for (i, x) in xs.iter().enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        match x {
            Expression::Predicate(_) => write!(f, "{x}")?,
            _ => write!(f, "({x})")?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_pred(key: &str, op: RelOp, x: Data) -> Expression {
        Expression::predicate(
            Operand::Extractor(Extractor::Key(key.into())),
            op,
            Operand::Value(x),
        )
    }

    #[test]
    fn key_extractor_matches_flat_suffix() {
        let ex = Extractor::Key("orig_h".into());
        assert!(ex.matches("id.orig_h", &Type::address()));
        assert!(ex.matches("orig_h", &Type::address()));
        assert!(!ex.matches("xorig_h", &Type::address()));
    }

    #[test]
    fn attribute_extractor_selects_timestamps() {
        let ex = Extractor::Attribute("time".into());
        assert!(ex.matches("ts", &Type::timestamp()));
        assert!(!ex.matches("ts", &Type::timespan()));
    }

    #[test]
    fn de_morgan_pushes_negations_into_predicates() {
        let e = Expression::Negation(Box::new(Expression::Conjunction(vec![
            key_pred("x", RelOp::Equal, Data::Count(1)),
            key_pred("y", RelOp::Less, Data::Count(2)),
        ])));
        let n = e.normalize();
        assert_eq!(
            n,
            Expression::Disjunction(vec![
                key_pred("x", RelOp::NotEqual, Data::Count(1)),
                key_pred("y", RelOp::GreaterEqual, Data::Count(2)),
            ])
        );
    }

    #[test]
    fn literals_move_right() {
        let e = Expression::predicate(
            Operand::Value(Data::Count(42)),
            RelOp::Less,
            Operand::Extractor(Extractor::Key("n".into())),
        );
        let n = e.normalize();
        assert_eq!(n, key_pred("n", RelOp::Greater, Data::Count(42)));
    }

    #[test]
    fn folding_flattens_and_dedups() {
        let p = key_pred("x", RelOp::Equal, Data::Count(1));
        let q = key_pred("y", RelOp::Equal, Data::Count(2));
        let e = Expression::Conjunction(vec![
            Expression::Conjunction(vec![p.clone(), q.clone()]),
            p.clone(),
        ]);
        assert_eq!(e.normalize(), Expression::Conjunction(vec![p, q]));
    }

    #[test]
    fn singleton_compounds_unwrap() {
        let p = key_pred("x", RelOp::Equal, Data::Count(1));
        let e = Expression::Disjunction(vec![p.clone(), p.clone()]);
        assert_eq!(e.normalize(), p);
    }

    #[test]
    fn double_negation_cancels() {
        let p = key_pred("x", RelOp::Ni, Data::String("foo".into()));
        let e = Expression::Negation(Box::new(Expression::Negation(Box::new(p.clone()))));
        assert_eq!(e.normalize(), p);
    }
}
