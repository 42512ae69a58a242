use crate::{sql::Cmp, value::Value};

///
/// PathExpr
///
/// `alias` or `alias.attr` or `alias.group.attr`, with the byte offset
/// of the root for diagnostics.
///

#[derive(Clone, Debug, PartialEq)]
pub struct PathExpr {
    pub root: String,
    pub segments: Vec<String>,
    pub offset: usize,
}

impl PathExpr {
    /// Dotted path below the alias, or `None` for a bare alias.
    #[must_use]
    pub fn tail(&self) -> Option<String> {
        if self.segments.is_empty() {
            None
        } else {
            Some(self.segments.join("."))
        }
    }
}

///
/// ParamRef
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParamRef {
    Named(String),
    Positional(u32),
}

impl std::fmt::Display for ParamRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(name) => write!(f, ":{name}"),
            Self::Positional(index) => write!(f, "?{index}"),
        }
    }
}

///
/// ExprAst
///

#[derive(Clone, Debug, PartialEq)]
pub enum ExprAst {
    Literal(Value),
    Param(ParamRef),
    Path(PathExpr),
}

///
/// PredicateAst
///

#[derive(Clone, Debug, PartialEq)]
pub enum PredicateAst {
    Cmp {
        lhs: ExprAst,
        op: Cmp,
        rhs: ExprAst,
    },

    IsNull {
        path: PathExpr,
        negated: bool,
    },

    And(Box<PredicateAst>, Box<PredicateAst>),
    Or(Box<PredicateAst>, Box<PredicateAst>),
    Not(Box<PredicateAst>),
}

///
/// JoinAst
///
/// `join [fetch] <alias>.<assoc> [as] <alias2> [on <predicate>]`
///

#[derive(Clone, Debug, PartialEq)]
pub struct JoinAst {
    pub fetch: bool,
    pub path: PathExpr,
    pub alias: String,
    pub on: Option<PredicateAst>,
}

///
/// SelectAst
///

#[derive(Clone, Debug, PartialEq)]
pub struct SelectAst {
    pub projection: Vec<PathExpr>,
    pub entity: String,
    pub alias: String,
    pub joins: Vec<JoinAst>,
    pub predicate: Option<PredicateAst>,
}

///
/// UpdateAst
///

#[derive(Clone, Debug, PartialEq)]
pub struct UpdateAst {
    pub entity: String,
    pub alias: String,
    pub assignments: Vec<(PathExpr, ExprAst)>,
    pub predicate: Option<PredicateAst>,
}

///
/// DeleteAst
///

#[derive(Clone, Debug, PartialEq)]
pub struct DeleteAst {
    pub entity: String,
    pub alias: String,
    pub predicate: Option<PredicateAst>,
}

///
/// QueryAst
///

#[derive(Clone, Debug, PartialEq)]
pub enum QueryAst {
    Select(SelectAst),
    Update(UpdateAst),
    Delete(DeleteAst),
}
