use thiserror::Error;

use jinshape_support::{loader_error, quoted_list};

use crate::ast::{Expression, SourceSpan, Statement};
use crate::model::Structure;

pub type InferResult<T> = Result<T, InferError>;

/// Lexing or parsing failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}{message} at line {line}, column {column}", template_prefix(.template))]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub template: Option<String>,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
            template: None,
        }
    }

    pub fn in_template(mut self, name: &str) -> Self {
        self.template = Some(name.to_string());
        self
    }

    pub fn span(&self) -> SourceSpan {
        SourceSpan::single_point(self.line, self.column)
    }
}

fn template_prefix(template: &Option<String>) -> String {
    match template {
        Some(name) => format!("{name}: "),
        None => String::new(),
    }
}

/// The AST node an `InvalidExpression` points at.
#[derive(Debug, Clone)]
pub enum Node {
    Expression(Box<Expression>),
    Statement(Box<Statement>),
}

impl Node {
    pub fn span(&self) -> SourceSpan {
        match self {
            Node::Expression(expr) => expr.span,
            Node::Statement(stmt) => stmt.span(),
        }
    }

    pub fn line(&self) -> usize {
        self.span().line
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Node::Expression(expr) => expr.describe(),
            Node::Statement(stmt) => stmt.describe(),
        }
    }
}

#[derive(Debug, Error)]
pub enum InferError {
    /// Two usages of the same value cannot be unified.
    #[error("{}", describe_conflict(.first, .second))]
    MergeConflict {
        first: Box<Structure>,
        second: Box<Structure>,
    },
    /// An expression produces a shape its surroundings do not accept.
    #[error(
        "conflict on the line {}\ngot: AST node {} of structure {actual}\nexpected structure: {expected}",
        .actual_ast.line(),
        .actual_ast.describe()
    )]
    UnexpectedExpression {
        expected: Box<Structure>,
        actual_ast: Box<Expression>,
        actual: Box<Structure>,
    },
    /// A construct outside the supported subset.
    #[error("line {}: {message}", .node.line())]
    InvalidExpression { node: Node, message: String },
}

impl InferError {
    pub fn conflict(first: &Structure, second: &Structure) -> Self {
        InferError::MergeConflict {
            first: Box::new(first.clone()),
            second: Box::new(second.clone()),
        }
    }

    pub fn invalid_expression(expr: &Expression, message: impl Into<String>) -> Self {
        InferError::InvalidExpression {
            node: Node::Expression(Box::new(expr.clone())),
            message: message.into(),
        }
    }

    pub fn invalid_statement(stmt: &Statement, message: impl Into<String>) -> Self {
        InferError::InvalidExpression {
            node: Node::Statement(Box::new(stmt.clone())),
            message: message.into(),
        }
    }

    pub fn span(&self) -> Option<SourceSpan> {
        match self {
            InferError::MergeConflict { second, .. } => second
                .linenos
                .iter()
                .next()
                .map(|line| SourceSpan::single_point(*line, 1)),
            InferError::UnexpectedExpression { actual_ast, .. } => Some(actual_ast.span),
            InferError::InvalidExpression { node, .. } => Some(node.span()),
        }
    }
}

fn describe_conflict(first: &Structure, second: &Structure) -> String {
    format!(
        "{} (used as {} on lines {}) conflicts with {} (used as {} on lines: {})",
        describe_variable(first),
        first.kind_name(),
        describe_lines(first),
        describe_variable(second),
        second.kind_name(),
        describe_lines(second),
    )
}

fn describe_variable(structure: &Structure) -> String {
    match &structure.label {
        Some(label) => format!("variable \"{label}\""),
        None => "unnamed variable".to_string(),
    }
}

fn describe_lines(structure: &Structure) -> String {
    structure
        .linenos
        .iter()
        .map(|line| line.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{}", loader_error("load", .name, "template not found"))]
    NotFound { name: String },
    #[error("{}", loader_error("read", .name, .source))]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "{}",
        loader_error("load", .name, format!("cyclic template reference through {}", quoted_list(.chain)))
    )]
    Cycle { name: String, chain: Vec<String> },
}

/// Everything the driver can fail with.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Infer(#[from] InferError),
    #[error(transparent)]
    Load(#[from] LoadError),
}

impl Error {
    pub fn span(&self) -> Option<SourceSpan> {
        match self {
            Error::Syntax(err) => Some(err.span()),
            Error::Infer(err) => err.span(),
            Error::Load(_) => None,
        }
    }
}
