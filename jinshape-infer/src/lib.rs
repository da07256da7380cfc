mod ast;
mod config;
mod context;
mod diagnostics;
mod driver;
mod error;
mod lexer;
mod loader;
mod macros;
mod merge;
mod model;
mod parser;
mod source;
mod visitors;

pub use crate::ast::{
    AssignBlockStatement, AssignStatement, AssignTarget, AutoescapeStatement, BinaryExpression,
    BinaryOperator, BlockStatement, CallArguments, CallExpression, CompareExpression,
    CompareOperator, ConditionalExpression, DictEntry, Expression, ExpressionKind,
    ExtendsStatement, FilterBlockStatement, FilterCall, FilterExpression, ForStatement,
    GetattrExpression, GetitemExpression, Identifier, IfStatement, IncludeStatement,
    KeywordArgument, Literal, MacroParameter, MacroStatement, OutputStatement, SliceExpression,
    SourceSpan, Statement, Template, TestExpression, UnaryExpression, UnaryOperator,
    UnsupportedStatement, WithStatement,
};
pub use crate::config::{Config, IntegerIndexPolicy, UnknownPolicy, VariableIndexPolicy};
pub use crate::context::Context;
pub use crate::diagnostics::Diagnostic;
pub use crate::driver::{infer, infer_from_ast, infer_with_loader, parse, Inferrer};
pub use crate::error::{Error, InferError, InferResult, LoadError, Node, SyntaxError};
pub use crate::lexer::{Keyword, Lexer, Token, TokenKind};
pub use crate::loader::{FileSystemLoader, MemoryLoader, NullLoader, TemplateLoader};
pub use crate::macros::{Macro, MacroRegistry, Parameter};
pub use crate::merge::{disjoin_checks, merge, merge_into, merge_rtypes, merge_with, MetadataHook};
pub use crate::model::{ReturnKind, ScalarKind, Shape, Structure, TupleShape};
pub use crate::parser::{parse_source, Parser};
pub use crate::source::{SourceFile, SourceId};
pub use crate::visitors::{ExprVisitor, StmtVisitor};
