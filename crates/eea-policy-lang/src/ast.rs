//! Abstract syntax tree for the predicate language.

use eea_core::comparator::Comparator;

/// One segment of a field-access/index path, e.g. `input.ingested[0]`.
#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    /// A dotted field name.
    Field(String),
    /// A bracketed index or key expression.
    Index(Box<Expr>),
}

/// A predicate-language expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal null/bool/int/float/string value.
    Literal(serde_json::Value),
    /// An array-construction expression.
    Array(Vec<Expr>),
    /// An object-construction expression.
    Object(Vec<(String, Expr)>),
    /// A field-access/index path rooted at an identifier, e.g.
    /// `input.ingested.default_branch`.
    Path(Vec<PathSegment>),
    /// A call into the data-source registry or policy library,
    /// e.g. `ds.github.prs(...)`, `jq.is_true(...)`.
    Call {
        /// The dotted function-name path, e.g. `["ds", "github", "prs"]`.
        path: Vec<String>,
        /// The call's argument expressions.
        args: Vec<Expr>,
    },
    /// A comparison between two expressions.
    Compare {
        /// The comparison operator.
        op: Comparator,
        /// The left-hand operand.
        left: Box<Expr>,
        /// The right-hand operand.
        right: Box<Expr>,
    },
    /// Logical AND (`&&`).
    And(Box<Expr>, Box<Expr>),
    /// Logical OR (`||`).
    Or(Box<Expr>, Box<Expr>),
    /// Logical negation (`!`).
    Not(Box<Expr>),
}

/// One statement inside a block body.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// A bare expression, evaluated as a guard condition.
    Expr(Expr),
    /// A `name := expr;` assignment.
    Assign(String, Expr),
}

/// One top-level item in a predicate program.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// A `name { ... }` block. Multiple blocks sharing a name OR together.
    NamedBlock {
        /// The block's name (e.g. `allow`, `skip`).
        name: String,
        /// The block's bare-expression guard conditions, all of which must
        /// be truthy for the block to hold.
        conditions: Vec<Expr>,
    },
    /// A top-level `name := expr;` assignment (e.g. `message := "..."`).
    Assignment {
        /// The assigned name.
        name: String,
        /// The assigned expression.
        expr: Expr,
    },
    /// A `violation { ... }` block, zero or more of which may appear.
    Violation {
        /// Guard conditions that must all be truthy for this violation to
        /// fire.
        conditions: Vec<Expr>,
        /// The violation's `msg := "..."` assignment, if present.
        msg: Option<Expr>,
        /// The violation's `output := ...` assignment, if present.
        output: Option<Expr>,
        /// The violation's `skip := ...` assignment, if present.
        skip: Option<Expr>,
    },
}

/// A fully parsed predicate program.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    /// The program's top-level items, in source order.
    pub items: Vec<Item>,
}
