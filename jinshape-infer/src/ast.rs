use serde::Serialize;

use crate::lexer::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceSpan {
    pub line: usize,
    pub column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl SourceSpan {
    pub fn new(line: usize, column: usize, end_line: usize, end_column: usize) -> Self {
        Self {
            line,
            column,
            end_line,
            end_column,
        }
    }

    pub fn single_point(line: usize, column: usize) -> Self {
        Self::new(line, column, line, column)
    }

    pub fn from_token(token: &Token) -> Self {
        let len = token.lexeme.chars().count().max(1);
        Self::new(
            token.line,
            token.column,
            token.line,
            token.column + len.saturating_sub(1),
        )
    }

    pub fn union(a: &Self, b: &Self) -> Self {
        if a.line == 0 {
            return *b;
        }
        if b.line == 0 {
            return *a;
        }

        let (start_line, start_column) =
            if (a.line < b.line) || (a.line == b.line && a.column <= b.column) {
                (a.line, a.column)
            } else {
                (b.line, b.column)
            };

        let (end_line, end_column) = if (a.end_line > b.end_line)
            || (a.end_line == b.end_line && a.end_column >= b.end_column)
        {
            (a.end_line, a.end_column)
        } else {
            (b.end_line, b.end_column)
        };

        Self::new(start_line, start_column, end_line, end_column)
    }
}

impl Default for SourceSpan {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Template {
    pub name: String,
    pub body: Vec<Statement>,
}

impl Template {
    pub fn new(name: impl Into<String>, body: Vec<Statement>) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Statement {
    Output(OutputStatement),
    For(ForStatement),
    If(IfStatement),
    Assign(AssignStatement),
    AssignBlock(AssignBlockStatement),
    Macro(MacroStatement),
    Block(BlockStatement),
    Extends(ExtendsStatement),
    Include(IncludeStatement),
    With(WithStatement),
    Autoescape(AutoescapeStatement),
    FilterBlock(FilterBlockStatement),
    Unsupported(UnsupportedStatement),
}

impl Statement {
    pub fn span(&self) -> SourceSpan {
        match self {
            Statement::Output(stmt) => stmt.span,
            Statement::For(stmt) => stmt.span,
            Statement::If(stmt) => stmt.span,
            Statement::Assign(stmt) => stmt.span,
            Statement::AssignBlock(stmt) => stmt.span,
            Statement::Macro(stmt) => stmt.span,
            Statement::Block(stmt) => stmt.span,
            Statement::Extends(stmt) => stmt.span,
            Statement::Include(stmt) => stmt.span,
            Statement::With(stmt) => stmt.span,
            Statement::Autoescape(stmt) => stmt.span,
            Statement::FilterBlock(stmt) => stmt.span,
            Statement::Unsupported(stmt) => stmt.span,
        }
    }

    pub fn line(&self) -> usize {
        self.span().line
    }

    /// `true` when any expression inside this statement, nested bodies
    /// included, satisfies `predicate`.
    pub fn any_expression(&self, predicate: &dyn Fn(&Expression) -> bool) -> bool {
        let in_body = |body: &[Statement]| body.iter().any(|stmt| stmt.any_expression(predicate));
        let in_filters = |filters: &[FilterCall]| {
            filters.iter().any(|filter| {
                filter
                    .arguments
                    .expressions()
                    .any(|argument| argument.any_node(predicate))
            })
        };
        match self {
            Statement::Output(stmt) => stmt.nodes.iter().any(|node| node.any_node(predicate)),
            Statement::For(stmt) => {
                stmt.iter.any_node(predicate)
                    || stmt
                        .filter
                        .as_ref()
                        .is_some_and(|filter| filter.any_node(predicate))
                    || in_body(&stmt.body)
                    || in_body(&stmt.else_body)
            }
            Statement::If(stmt) => {
                stmt.test.any_node(predicate) || in_body(&stmt.body) || in_body(&stmt.else_body)
            }
            Statement::Assign(stmt) => stmt.value.any_node(predicate),
            Statement::AssignBlock(stmt) => in_body(&stmt.body) || in_filters(&stmt.filters),
            Statement::Macro(stmt) => {
                stmt.parameters.iter().any(|parameter| {
                    parameter
                        .default
                        .as_ref()
                        .is_some_and(|default| default.any_node(predicate))
                }) || in_body(&stmt.body)
            }
            Statement::Block(stmt) => in_body(&stmt.body),
            Statement::Extends(stmt) => stmt.template.any_node(predicate),
            Statement::Include(stmt) => stmt.template.any_node(predicate),
            Statement::With(stmt) => {
                stmt.bindings
                    .iter()
                    .any(|(_, value)| value.any_node(predicate))
                    || in_body(&stmt.body)
            }
            Statement::Autoescape(stmt) => stmt.value.any_node(predicate) || in_body(&stmt.body),
            Statement::FilterBlock(stmt) => in_filters(&stmt.filters) || in_body(&stmt.body),
            Statement::Unsupported(stmt) => in_body(&stmt.body),
        }
    }

    /// Node name used in diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            Statement::Output(_) => "Output",
            Statement::For(_) => "For",
            Statement::If(_) => "If",
            Statement::Assign(_) => "Assign",
            Statement::AssignBlock(_) => "AssignBlock",
            Statement::Macro(_) => "Macro",
            Statement::Block(_) => "Block",
            Statement::Extends(_) => "Extends",
            Statement::Include(_) => "Include",
            Statement::With(_) => "With",
            Statement::Autoescape(_) => "Autoescape",
            Statement::FilterBlock(_) => "FilterBlock",
            Statement::Unsupported(_) => "Unsupported",
        }
    }
}

/// Template data and `{{ ... }}` expressions printed one after another.
#[derive(Debug, Clone)]
pub struct OutputStatement {
    pub nodes: Vec<Expression>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct ForStatement {
    pub target: AssignTarget,
    pub iter: Expression,
    pub body: Vec<Statement>,
    pub else_body: Vec<Statement>,
    pub filter: Option<Expression>,
    pub recursive: bool,
    pub span: SourceSpan,
}

/// `elif` chains are represented as a nested `IfStatement` in `else_body`.
#[derive(Debug, Clone)]
pub struct IfStatement {
    pub test: Expression,
    pub body: Vec<Statement>,
    pub else_body: Vec<Statement>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct AssignStatement {
    pub target: AssignTarget,
    pub value: Expression,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct AssignBlockStatement {
    pub target: AssignTarget,
    pub body: Vec<Statement>,
    pub filters: Vec<FilterCall>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub enum AssignTarget {
    Name(Identifier),
    Tuple(Vec<AssignTarget>, SourceSpan),
    Attribute(Identifier, Identifier),
}

impl AssignTarget {
    pub fn span(&self) -> SourceSpan {
        match self {
            AssignTarget::Name(ident) => ident.span,
            AssignTarget::Tuple(_, span) => *span,
            AssignTarget::Attribute(object, attribute) => {
                SourceSpan::union(&object.span, &attribute.span)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Identifier {
    pub name: String,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct MacroStatement {
    pub name: String,
    pub parameters: Vec<MacroParameter>,
    pub body: Vec<Statement>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct MacroParameter {
    pub name: String,
    pub default: Option<Expression>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct BlockStatement {
    pub name: String,
    pub body: Vec<Statement>,
    pub scoped: bool,
    pub required: bool,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct ExtendsStatement {
    pub template: Expression,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct IncludeStatement {
    pub template: Expression,
    pub ignore_missing: bool,
    pub with_context: bool,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct WithStatement {
    pub bindings: Vec<(Identifier, Expression)>,
    pub body: Vec<Statement>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct AutoescapeStatement {
    pub value: Expression,
    pub body: Vec<Statement>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct FilterBlockStatement {
    pub filters: Vec<FilterCall>,
    pub body: Vec<Statement>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct FilterCall {
    pub name: String,
    pub arguments: CallArguments,
    pub span: SourceSpan,
}

/// A tag that parses but cannot be analysed, e.g. `call` or `import`.
#[derive(Debug, Clone)]
pub struct UnsupportedStatement {
    pub tag: String,
    pub body: Vec<Statement>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub span: SourceSpan,
    pub kind: ExpressionKind,
}

impl Expression {
    pub fn new(span: SourceSpan, kind: ExpressionKind) -> Self {
        Self { span, kind }
    }

    pub fn line(&self) -> usize {
        self.span.line
    }

    /// The variable name when the expression is a bare `Name`.
    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExpressionKind::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match &self.kind {
            ExpressionKind::Literal(literal) => Some(literal),
            _ => None,
        }
    }

    /// `true` when `predicate` holds for this expression or any nested one.
    pub fn any_node(&self, predicate: &dyn Fn(&Expression) -> bool) -> bool {
        if predicate(self) {
            return true;
        }
        let any_of = |items: &[Expression]| items.iter().any(|item| item.any_node(predicate));
        let any_argument = |arguments: &CallArguments| {
            arguments
                .expressions()
                .any(|argument| argument.any_node(predicate))
        };
        match &self.kind {
            ExpressionKind::Name(_)
            | ExpressionKind::Literal(_)
            | ExpressionKind::TemplateData(_) => false,
            ExpressionKind::Tuple(items)
            | ExpressionKind::List(items)
            | ExpressionKind::Concat(items) => any_of(items),
            ExpressionKind::Dict(entries) => entries
                .iter()
                .any(|entry| entry.key.any_node(predicate) || entry.value.any_node(predicate)),
            ExpressionKind::Getattr(getattr) => getattr.object.any_node(predicate),
            ExpressionKind::Getitem(getitem) => {
                getitem.object.any_node(predicate) || getitem.index.any_node(predicate)
            }
            ExpressionKind::Slice(slice) => [&slice.start, &slice.stop, &slice.step]
                .into_iter()
                .flatten()
                .any(|part| part.any_node(predicate)),
            ExpressionKind::Binary(binary) => {
                binary.left.any_node(predicate) || binary.right.any_node(predicate)
            }
            ExpressionKind::Unary(unary) => unary.operand.any_node(predicate),
            ExpressionKind::Compare(compare) => {
                compare.left.any_node(predicate)
                    || compare
                        .comparisons
                        .iter()
                        .any(|(_, operand)| operand.any_node(predicate))
            }
            ExpressionKind::Conditional(conditional) => {
                conditional.test.any_node(predicate)
                    || conditional.then_branch.any_node(predicate)
                    || conditional
                        .else_branch
                        .as_deref()
                        .is_some_and(|branch| branch.any_node(predicate))
            }
            ExpressionKind::Call(call) => {
                call.callee.any_node(predicate) || any_argument(&call.arguments)
            }
            ExpressionKind::Filter(filter) => {
                filter.node.any_node(predicate) || any_argument(&filter.arguments)
            }
            ExpressionKind::Test(test) => {
                test.node.any_node(predicate) || any_argument(&test.arguments)
            }
        }
    }

    pub fn describe(&self) -> &'static str {
        match &self.kind {
            ExpressionKind::Name(_) => "Name",
            ExpressionKind::Literal(_) => "Const",
            ExpressionKind::TemplateData(_) => "TemplateData",
            ExpressionKind::Tuple(_) => "Tuple",
            ExpressionKind::List(_) => "List",
            ExpressionKind::Dict(_) => "Dict",
            ExpressionKind::Getattr(_) => "Getattr",
            ExpressionKind::Getitem(_) => "Getitem",
            ExpressionKind::Slice(_) => "Slice",
            ExpressionKind::Binary(binary) => binary.operator.describe(),
            ExpressionKind::Unary(unary) => unary.operator.describe(),
            ExpressionKind::Compare(_) => "Compare",
            ExpressionKind::Concat(_) => "Concat",
            ExpressionKind::Conditional(_) => "CondExpr",
            ExpressionKind::Call(_) => "Call",
            ExpressionKind::Filter(_) => "Filter",
            ExpressionKind::Test(_) => "Test",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExpressionKind {
    Name(String),
    Literal(Literal),
    TemplateData(String),
    Tuple(Vec<Expression>),
    List(Vec<Expression>),
    Dict(Vec<DictEntry>),
    Getattr(GetattrExpression),
    Getitem(GetitemExpression),
    Slice(SliceExpression),
    Binary(BinaryExpression),
    Unary(UnaryExpression),
    Compare(CompareExpression),
    Concat(Vec<Expression>),
    Conditional(ConditionalExpression),
    Call(CallExpression),
    Filter(FilterExpression),
    Test(TestExpression),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Literal {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    None,
}

#[derive(Debug, Clone)]
pub struct DictEntry {
    pub key: Expression,
    pub value: Expression,
}

#[derive(Debug, Clone)]
pub struct GetattrExpression {
    pub object: Box<Expression>,
    pub attribute: String,
}

#[derive(Debug, Clone)]
pub struct GetitemExpression {
    pub object: Box<Expression>,
    pub index: Box<Expression>,
}

#[derive(Debug, Clone)]
pub struct SliceExpression {
    pub start: Option<Box<Expression>>,
    pub stop: Option<Box<Expression>>,
    pub step: Option<Box<Expression>>,
}

#[derive(Debug, Clone)]
pub struct BinaryExpression {
    pub operator: BinaryOperator,
    pub left: Box<Expression>,
    pub right: Box<Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    FloorDivide,
    Modulo,
    Power,
    And,
    Or,
}

impl BinaryOperator {
    pub fn describe(self) -> &'static str {
        match self {
            BinaryOperator::Add => "Add",
            BinaryOperator::Subtract => "Sub",
            BinaryOperator::Multiply => "Mul",
            BinaryOperator::Divide => "Div",
            BinaryOperator::FloorDivide => "FloorDiv",
            BinaryOperator::Modulo => "Mod",
            BinaryOperator::Power => "Pow",
            BinaryOperator::And => "And",
            BinaryOperator::Or => "Or",
        }
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }
}

#[derive(Debug, Clone)]
pub struct UnaryExpression {
    pub operator: UnaryOperator,
    pub operand: Box<Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negative,
    Positive,
    Not,
}

impl UnaryOperator {
    pub fn describe(self) -> &'static str {
        match self {
            UnaryOperator::Negative => "Neg",
            UnaryOperator::Positive => "Pos",
            UnaryOperator::Not => "Not",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompareExpression {
    pub left: Box<Expression>,
    pub comparisons: Vec<(CompareOperator, Expression)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOperator {
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    In,
    NotIn,
}

#[derive(Debug, Clone)]
pub struct ConditionalExpression {
    pub test: Box<Expression>,
    pub then_branch: Box<Expression>,
    pub else_branch: Option<Box<Expression>>,
}

#[derive(Debug, Clone, Default)]
pub struct CallArguments {
    pub positional: Vec<Expression>,
    pub keywords: Vec<KeywordArgument>,
    pub dyn_args: Option<Box<Expression>>,
    pub dyn_kwargs: Option<Box<Expression>>,
}

impl CallArguments {
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
            && self.keywords.is_empty()
            && self.dyn_args.is_none()
            && self.dyn_kwargs.is_none()
    }

    pub fn has_dynamic(&self) -> bool {
        self.dyn_args.is_some() || self.dyn_kwargs.is_some()
    }

    /// Every argument expression, positional ones first.
    pub fn expressions(&self) -> impl Iterator<Item = &Expression> {
        self.positional
            .iter()
            .chain(self.keywords.iter().map(|keyword| &keyword.value))
            .chain(self.dyn_args.as_deref())
            .chain(self.dyn_kwargs.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct KeywordArgument {
    pub name: String,
    pub value: Expression,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct CallExpression {
    pub callee: Box<Expression>,
    pub arguments: CallArguments,
}

#[derive(Debug, Clone)]
pub struct FilterExpression {
    pub node: Box<Expression>,
    pub name: String,
    pub arguments: CallArguments,
}

#[derive(Debug, Clone)]
pub struct TestExpression {
    pub node: Box<Expression>,
    pub name: String,
    pub arguments: CallArguments,
}
