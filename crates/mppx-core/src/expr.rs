//! # Expression Types
//!
//! Scalar expression trees as the path planner sees them. The planner never evaluates
//! expressions; it only needs to answer structural questions about them:
//!
//! ## Type Questions
//! Every expression reports its `DataType`. The type decides whether the expression can
//! be used as a hash-distribution key (it needs a default distribution operator family)
//! and whether its equality operator is merge-joinable.
//!
//! ## Reference Questions
//! Which relations an expression reads (`relids`), whether it calls a volatile function,
//! and which aggregate calls it embeds (`collect_aggrefs`). Aggregates nested inside
//! window functions and placeholder variables are visible to the aggregate walk.
//!
//! ## Synthetic Expressions
//! `GroupingSetId` and `AggExprId` never come from user SQL. The planner injects them
//! into target lists: the first tags partial rows with the grouping set they belong
//! to, the second tags tuple-split rows with the DISTINCT shape they carry.

use crate::bitmapset::Relids;
use crate::target::{SortGroupClause, TargetEntry};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Hash-distribution operator family. Two types in the same family hash equal values
/// to the same segment, so an `int4` column and an `int8` column can be collocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpFamily {
    Integer,
    Float,
    Numeric,
    Text,
    Bool,
    Date,
    Xid,
}

/// Column and expression data types known to the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int4,
    Int8,
    Float8,
    Numeric,
    Text,
    Date,
    /// Transaction id: hashable but without a btree equality, so never merge-joinable.
    Xid,
    /// Geometric point: no hash or btree support at all.
    Point,
}

impl DataType {
    /// Default hash-distribution operator family, if the type has one.
    pub fn distribution_opfamily(&self) -> Option<OpFamily> {
        match self {
            DataType::Bool => Some(OpFamily::Bool),
            DataType::Int4 | DataType::Int8 => Some(OpFamily::Integer),
            DataType::Float8 => Some(OpFamily::Float),
            DataType::Numeric => Some(OpFamily::Numeric),
            DataType::Text => Some(OpFamily::Text),
            DataType::Date => Some(OpFamily::Date),
            DataType::Xid => Some(OpFamily::Xid),
            DataType::Point => None,
        }
    }

    /// Whether the type's equality operator belongs to a btree family.
    pub fn has_mergejoinable_eq(&self) -> bool {
        !matches!(self, DataType::Xid | DataType::Point)
    }

    /// Whether the type's equality operator can drive a hash table.
    pub fn has_hashable_eq(&self) -> bool {
        !matches!(self, DataType::Point)
    }

    /// Fixed byte width used for target width estimates.
    pub fn typical_width(&self) -> u32 {
        match self {
            DataType::Bool => 1,
            DataType::Int4 | DataType::Date | DataType::Xid => 4,
            DataType::Int8 | DataType::Float8 => 8,
            DataType::Point => 16,
            DataType::Numeric => 12,
            DataType::Text => 32,
        }
    }
}

/// Reference to a column of a base relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Range-table index of the owning relation.
    pub relid: usize,
    pub name: String,
    pub index: u32,
    pub data_type: DataType,
}

impl ColumnRef {
    pub fn new(relid: usize, name: impl Into<String>, index: u32, data_type: DataType) -> Self {
        Self {
            relid,
            name: name.into(),
            index,
            data_type,
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}.{}", self.relid, self.name)
    }
}

/// Scalar constant.
///
/// `Float64` is wrapped in `OrderedFloat` so expressions stay `Eq + Hash`; the
/// planner compares expressions structurally all the time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(OrderedFloat<f64>),
    Utf8(String),
    Date(i32),
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int32(a), Self::Int32(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => a == b,
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int32(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => v.hash(state),
            Self::Utf8(v) => v.hash(state),
            Self::Date(v) => v.hash(state),
        }
    }
}

impl ScalarValue {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Null | Self::Utf8(_) => DataType::Text,
            Self::Bool(_) => DataType::Bool,
            Self::Int32(_) => DataType::Int4,
            Self::Int64(_) => DataType::Int8,
            Self::Float64(_) => DataType::Float8,
            Self::Date(_) => DataType::Date,
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

/// `IS [NOT] TRUE / FALSE` tests.
///
/// `NOT IN` subqueries are rewritten into a left-anti-semi join whose join clause is
/// `(outer = inner) IS NOT FALSE`, which keeps NULL comparisons from matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoolTestType {
    IsTrue,
    IsNotTrue,
    IsFalse,
    IsNotFalse,
}

/// An aggregate function call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aggref {
    pub name: String,
    /// Aggregate arguments. DISTINCT and ORDER BY clauses point into this list by
    /// sort-group ref.
    pub args: Vec<TargetEntry>,
    /// Non-empty for `agg(DISTINCT ...)`.
    pub distinct: Vec<SortGroupClause>,
    pub order_by: Vec<SortGroupClause>,
    pub filter: Option<Box<Expr>>,
    /// DISTINCT shape id after tuple-split planning, 0 when unassigned.
    pub agg_expr_id: u32,
    pub result_type: DataType,
}

impl Aggref {
    /// Plain aggregate over the given argument expressions.
    pub fn new(name: impl Into<String>, args: Vec<Expr>, result_type: DataType) -> Self {
        let args = args
            .into_iter()
            .enumerate()
            .map(|(i, e)| TargetEntry::new(e, i as u32 + 1))
            .collect();
        Self {
            name: name.into(),
            args,
            distinct: Vec::new(),
            order_by: Vec::new(),
            filter: None,
            agg_expr_id: 0,
            result_type,
        }
    }

    /// `name(DISTINCT args...)`. Each argument gets its own sort-group ref.
    pub fn distinct(name: impl Into<String>, args: Vec<Expr>, result_type: DataType) -> Self {
        let mut agg = Self::new(name, args, result_type);
        for (i, tle) in agg.args.iter_mut().enumerate() {
            tle.ressortgroupref = i as u32 + 1;
        }
        agg.distinct = agg
            .args
            .iter()
            .map(|tle| SortGroupClause::for_expr(tle.ressortgroupref, &tle.expr))
            .collect();
        agg
    }

    pub fn with_filter(mut self, filter: Expr) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn is_distinct(&self) -> bool {
        !self.distinct.is_empty()
    }

    pub fn arg_exprs(&self) -> impl Iterator<Item = &Expr> {
        self.args.iter().map(|tle| &tle.expr)
    }
}

/// Scalar expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    Column(ColumnRef),
    Literal(ScalarValue),
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BooleanTest {
        test: BoolTestType,
        arg: Box<Expr>,
    },
    Function {
        name: String,
        args: Vec<Expr>,
        return_type: DataType,
        volatile: bool,
    },
    Aggref(Box<Aggref>),
    WindowFunc {
        name: String,
        args: Vec<Expr>,
        return_type: DataType,
    },
    /// Expression evaluated at a fixed join level and then passed upward.
    PlaceHolderVar {
        expr: Box<Expr>,
        phid: u32,
        eval_at: Relids,
    },
    GroupingSetId,
    AggExprId,
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    pub fn column(relid: usize, name: &str, index: u32, data_type: DataType) -> Expr {
        Expr::Column(ColumnRef::new(relid, name, index, data_type))
    }

    pub fn eq_op(left: Expr, right: Expr) -> Expr {
        Expr::BinaryOp {
            op: BinaryOp::Eq,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Expr::Column(c) => c.data_type,
            Expr::Literal(v) => v.data_type(),
            Expr::BinaryOp { op, left, .. } => {
                if op.is_comparison() {
                    DataType::Bool
                } else {
                    left.data_type()
                }
            }
            Expr::UnaryOp { op, operand } => match op {
                UnaryOp::Neg => operand.data_type(),
                _ => DataType::Bool,
            },
            Expr::BooleanTest { .. } | Expr::And(_) | Expr::Or(_) => DataType::Bool,
            Expr::Function { return_type, .. } | Expr::WindowFunc { return_type, .. } => *return_type,
            Expr::Aggref(agg) => agg.result_type,
            Expr::PlaceHolderVar { expr, .. } => expr.data_type(),
            Expr::GroupingSetId | Expr::AggExprId => DataType::Int4,
        }
    }

    /// Direct sub-expressions, not descending into aggregate arguments.
    fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Column(_) | Expr::Literal(_) | Expr::GroupingSetId | Expr::AggExprId => vec![],
            Expr::BinaryOp { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::UnaryOp { operand, .. } => vec![operand.as_ref()],
            Expr::BooleanTest { arg, .. } => vec![arg.as_ref()],
            Expr::Function { args, .. } | Expr::WindowFunc { args, .. } => args.iter().collect(),
            Expr::PlaceHolderVar { expr, .. } => vec![expr.as_ref()],
            Expr::And(exprs) | Expr::Or(exprs) => exprs.iter().collect(),
            Expr::Aggref(_) => vec![],
        }
    }

    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut cols = Vec::new();
        self.collect_columns(&mut cols);
        cols
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(c) => out.push(c),
            Expr::Aggref(agg) => {
                for arg in agg.arg_exprs() {
                    arg.collect_columns(out);
                }
                if let Some(filter) = &agg.filter {
                    filter.collect_columns(out);
                }
            }
            other => {
                for child in other.children() {
                    child.collect_columns(out);
                }
            }
        }
    }

    /// Relations referenced by this expression.
    pub fn relids(&self) -> Relids {
        let mut relids: Relids = self.columns().iter().map(|c| c.relid).collect();
        self.walk(&mut |e| {
            if let Expr::PlaceHolderVar { eval_at, .. } = e {
                relids = relids.union(eval_at);
            }
        });
        relids
    }

    pub fn contains_volatile_functions(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if let Expr::Function { volatile: true, .. } = e {
                found = true;
            }
        });
        found
    }

    /// Pre-order walk over every node, including aggregate arguments and filters.
    pub fn walk(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        if let Expr::Aggref(agg) = self {
            for arg in agg.arg_exprs() {
                arg.walk(f);
            }
            if let Some(filter) = &agg.filter {
                filter.walk(f);
            }
            return;
        }
        for child in self.children() {
            child.walk(f);
        }
    }

    /// Aggregate calls embedded in this expression. Window functions and placeholders
    /// are searched through; aggregate arguments are not.
    pub fn collect_aggrefs(&self) -> Vec<&Aggref> {
        let mut out = Vec::new();
        self.collect_aggrefs_into(&mut out);
        out
    }

    fn collect_aggrefs_into<'a>(&'a self, out: &mut Vec<&'a Aggref>) {
        if let Expr::Aggref(agg) = self {
            out.push(agg);
            return;
        }
        for child in self.children() {
            child.collect_aggrefs_into(out);
        }
    }

    /// Apply `f` to every aggregate call embedded in this expression.
    pub fn map_aggrefs(&mut self, f: &mut dyn FnMut(&mut Aggref)) {
        match self {
            Expr::Aggref(agg) => f(agg),
            Expr::BinaryOp { left, right, .. } => {
                left.map_aggrefs(f);
                right.map_aggrefs(f);
            }
            Expr::UnaryOp { operand: e, .. }
            | Expr::BooleanTest { arg: e, .. }
            | Expr::PlaceHolderVar { expr: e, .. } => e.map_aggrefs(f),
            Expr::Function { args, .. } | Expr::WindowFunc { args, .. } => {
                for a in args {
                    a.map_aggrefs(f);
                }
            }
            Expr::And(exprs) | Expr::Or(exprs) => {
                for e in exprs {
                    e.map_aggrefs(f);
                }
            }
            Expr::Column(_) | Expr::Literal(_) | Expr::GroupingSetId | Expr::AggExprId => {}
        }
    }

    /// Flatten AND-chains: (A AND (B AND C)) -> [A, B, C].
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::And(exprs) => exprs.iter().flat_map(|e| e.conjuncts()).collect(),
            other => vec![other],
        }
    }
}

/// Join types seen by the join path enumerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Full,
    Right,
    Semi,
    Anti,
    /// Left anti-semi join with `NOT IN` null semantics.
    LasjNotIn,
    /// Unique-ify the outer side, then inner join.
    UniqueOuter,
    /// Unique-ify the inner side, then inner join.
    UniqueInner,
    /// Semi join executed as an inner join followed by de-duplication of the outer rows.
    DedupSemi,
    /// As `DedupSemi` with the sides swapped.
    DedupSemiReverse,
}

impl JoinType {
    pub fn is_outer(self) -> bool {
        matches!(
            self,
            JoinType::Left | JoinType::Full | JoinType::Right | JoinType::Anti | JoinType::LasjNotIn
        )
    }
}
