//! Syntax tree for read-only queries. Pure data.

use crate::model::Value;

/// `clause* RETURN ...`
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub clauses: Vec<Clause>,
    pub ret: Projection,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Match(MatchClause),
    Unwind { expr: Expr, alias: String },
    /// `WITH` projection; its `filter` is the trailing `WHERE`.
    With(Projection),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchClause {
    pub optional: bool,
    pub patterns: Vec<Pattern>,
    pub filter: Option<Expr>,
}

/// `(a)-[r]->(b)<-[s]-(c)`: a start node and the hops that follow it.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub start: NodePattern,
    pub hops: Vec<Hop>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hop {
    pub relationship: RelPattern,
    pub node: NodePattern,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodePattern {
    pub alias: Option<String>,
    pub labels: Vec<String>,
    pub properties: Vec<(String, Expr)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelPattern {
    pub alias: Option<String>,
    /// Any of these types; empty matches every type.
    pub types: Vec<String>,
    pub direction: Direction,
    pub properties: Vec<(String, Expr)>,
    /// `*min..max`; `None` is exactly one hop.
    pub length: Option<HopRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Either,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopRange {
    pub min: usize,
    pub max: Option<usize>,
}

/// Shared shape of `WITH` and `RETURN`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Projection {
    pub distinct: bool,
    /// `*`: carry every bound variable before the listed items.
    pub star: bool,
    pub items: Vec<ProjectionItem>,
    pub order_by: Vec<SortItem>,
    pub skip: Option<Expr>,
    pub limit: Option<Expr>,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionItem {
    pub expr: Expr,
    /// Alias, or the expression as written.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortItem {
    pub expr: Expr,
    pub text: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Parameter(String),
    Variable(String),
    Property { expr: Box<Expr>, key: String },
    Index { expr: Box<Expr>, index: Box<Expr> },
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Not(Box<Expr>),
    Negate(Box<Expr>),
    IsNull { expr: Box<Expr>, negated: bool },
    In { expr: Box<Expr>, list: Box<Expr> },
    HasLabels { expr: Box<Expr>, labels: Vec<String> },
    StringMatch { op: StringOp, left: Box<Expr>, right: Box<Expr> },
    /// `name(args)`; `name` is lower-cased, `star` marks `count(*)`.
    Call { name: String, distinct: bool, star: bool, args: Vec<Expr> },
    Case { operand: Option<Box<Expr>>, branches: Vec<(Expr, Expr)>, otherwise: Option<Box<Expr>> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    Xor,
    And,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOp {
    StartsWith,
    EndsWith,
    Contains,
}

pub const AGGREGATES: [&str; 6] = ["count", "collect", "sum", "avg", "min", "max"];

impl Expr {
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Expr::Call { name, .. } if AGGREGATES.contains(&name.as_str()))
    }

    /// True if an aggregate call appears anywhere in this expression.
    pub fn contains_aggregate(&self) -> bool {
        if self.is_aggregate() {
            return true;
        }
        match self {
            Expr::Literal(_) | Expr::Parameter(_) | Expr::Variable(_) => false,
            Expr::Property { expr, .. }
            | Expr::Not(expr)
            | Expr::Negate(expr)
            | Expr::IsNull { expr, .. }
            | Expr::HasLabels { expr, .. } => expr.contains_aggregate(),
            Expr::Index { expr, index } => expr.contains_aggregate() || index.contains_aggregate(),
            Expr::List(items) | Expr::Call { args: items, .. } => items.iter().any(Expr::contains_aggregate),
            Expr::Map(entries) => entries.iter().any(|(_, e)| e.contains_aggregate()),
            Expr::Binary { left, right, .. } | Expr::StringMatch { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expr::In { expr, list } => expr.contains_aggregate() || list.contains_aggregate(),
            Expr::Case { operand, branches, otherwise } => {
                operand.as_deref().is_some_and(Expr::contains_aggregate)
                    || branches.iter().any(|(w, t)| w.contains_aggregate() || t.contains_aggregate())
                    || otherwise.as_deref().is_some_and(Expr::contains_aggregate)
            }
        }
    }
}
