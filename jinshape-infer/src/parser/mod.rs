use crate::ast::*;
use crate::error::SyntaxError;
use crate::lexer::{Keyword, Lexer, Token, TokenKind};
use crate::source::SourceFile;

type ParseResult<T> = Result<T, SyntaxError>;

#[derive(Copy, Clone, PartialEq, PartialOrd)]
enum Precedence {
    Lowest = 0,
    Or,
    And,
    Not,
    Compare,
    Sum,
    Concat,
    Product,
    Power,
    Unary,
}

impl Precedence {
    fn of(kind: &TokenKind) -> Option<Self> {
        match kind {
            TokenKind::Keyword(Keyword::Or) => Some(Precedence::Or),
            TokenKind::Keyword(Keyword::And) => Some(Precedence::And),
            TokenKind::DoubleEqual
            | TokenKind::BangEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Keyword(Keyword::In) => Some(Precedence::Compare),
            TokenKind::Plus | TokenKind::Minus => Some(Precedence::Sum),
            TokenKind::Tilde => Some(Precedence::Concat),
            TokenKind::Star | TokenKind::Slash | TokenKind::DoubleSlash | TokenKind::Percent => {
                Some(Precedence::Product)
            }
            TokenKind::DoubleStar => Some(Precedence::Power),
            _ => None,
        }
    }
}

pub struct Parser<'a> {
    source: &'a SourceFile,
    tokens: Vec<Token>,
    current: usize,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a SourceFile, tokens: Vec<Token>) -> Self {
        Self {
            source,
            tokens,
            current: 0,
        }
    }

    fn make_expression(span: SourceSpan, kind: ExpressionKind) -> Expression {
        Expression::new(span, kind)
    }

    fn union_spans(a: &SourceSpan, b: &SourceSpan) -> SourceSpan {
        SourceSpan::union(a, b)
    }

    fn error_at(token: &Token, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, token.line, token.column)
    }

    pub fn parse(&mut self) -> ParseResult<Template> {
        let (body, _) = self.parse_statements(&[])?;
        Ok(Template::new(self.source.name.clone(), body))
    }

    /// Parses statements until one of `end_tags` opens a block tag. The parser
    /// is left on the end tag's name so the caller can consume it.
    fn parse_statements(&mut self, end_tags: &[&str]) -> ParseResult<(Vec<Statement>, Option<String>)> {
        let mut body = Vec::new();
        let mut output = Vec::new();

        loop {
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::Eof => {
                    Self::flush_output(&mut body, &mut output);
                    if !end_tags.is_empty() {
                        let expected = end_tags
                            .iter()
                            .map(|tag| format!("'{tag}'"))
                            .collect::<Vec<_>>()
                            .join(" or ");
                        return Err(Self::error_at(
                            &token,
                            format!("unexpected end of template, expected {expected}"),
                        ));
                    }
                    return Ok((body, None));
                }
                TokenKind::Data(text) => {
                    self.advance();
                    output.push(Self::make_expression(
                        SourceSpan::from_token(&token),
                        ExpressionKind::TemplateData(text.clone()),
                    ));
                }
                TokenKind::VariableBegin => {
                    self.advance();
                    let expr = self.parse_tuple(true)?;
                    self.expect_token(TokenKind::VariableEnd, "expected '}}' after expression")?;
                    output.push(expr);
                }
                TokenKind::BlockBegin => {
                    self.advance();
                    let tag = self.peek().clone();
                    if let Some(name) = tag_name(&tag) {
                        if end_tags.contains(&name) {
                            Self::flush_output(&mut body, &mut output);
                            return Ok((body, Some(name.to_string())));
                        }
                    }
                    Self::flush_output(&mut body, &mut output);
                    body.push(self.parse_statement()?);
                }
                _ => {
                    return Err(Self::error_at(
                        &token,
                        format!("unexpected '{}'", token.lexeme),
                    ));
                }
            }
        }
    }

    fn flush_output(body: &mut Vec<Statement>, output: &mut Vec<Expression>) {
        if output.is_empty() {
            return;
        }
        let nodes = std::mem::take(output);
        let span = nodes
            .iter()
            .fold(SourceSpan::default(), |span, node| Self::union_spans(&span, &node.span));
        body.push(Statement::Output(OutputStatement { nodes, span }));
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        let tag = self.peek().clone();
        match tag_name(&tag) {
            Some("for") => self.parse_for(),
            Some("if") => self.parse_if(),
            Some("set") => self.parse_set(),
            Some("macro") => self.parse_macro(),
            Some("block") => self.parse_block(),
            Some("extends") => self.parse_extends(),
            Some("include") => self.parse_include(),
            Some("with") => self.parse_with(),
            Some("autoescape") => self.parse_autoescape(),
            Some("filter") => self.parse_filter_block(),
            Some("call") | Some("import") | Some("from") => self.parse_unsupported(),
            Some(other) => Err(Self::error_at(&tag, format!("unknown tag '{other}'"))),
            None => Err(Self::error_at(
                &tag,
                format!("expected a tag name, found '{}'", tag.lexeme),
            )),
        }
    }

    fn parse_for(&mut self) -> ParseResult<Statement> {
        let for_token = self.advance().clone();
        let target = self.parse_assign_target(false)?;
        self.expect_token(
            TokenKind::Keyword(Keyword::In),
            "expected 'in' after for-loop target",
        )?;
        let iter = self.parse_tuple(false)?;
        let filter = if self.check_keyword(Keyword::If) {
            self.advance();
            Some(self.parse_expression(false)?)
        } else {
            None
        };
        let recursive = self.skip_identifier("recursive");
        self.expect_block_end()?;

        let (body, end) = self.parse_statements(&["endfor", "else"])?;
        let else_body = if end.as_deref() == Some("else") {
            self.advance();
            self.expect_block_end()?;
            let (else_body, _) = self.parse_statements(&["endfor"])?;
            else_body
        } else {
            Vec::new()
        };
        self.advance(); // consume 'endfor'
        self.expect_block_end()?;

        Ok(Statement::For(ForStatement {
            target,
            iter,
            body,
            else_body,
            filter,
            recursive,
            span: SourceSpan::from_token(&for_token),
        }))
    }

    fn parse_if(&mut self) -> ParseResult<Statement> {
        let if_token = self.advance().clone();
        self.parse_if_chain(SourceSpan::from_token(&if_token))
            .map(Statement::If)
    }

    fn parse_if_chain(&mut self, span: SourceSpan) -> ParseResult<IfStatement> {
        let test = self.parse_expression(false)?;
        self.expect_block_end()?;

        let (body, end) = self.parse_statements(&["elif", "else", "endif"])?;
        let else_body = match end.as_deref() {
            Some("elif") => {
                let elif_token = self.advance().clone();
                let nested = self.parse_if_chain(SourceSpan::from_token(&elif_token))?;
                return Ok(IfStatement {
                    test,
                    body,
                    else_body: vec![Statement::If(nested)],
                    span,
                });
            }
            Some("else") => {
                self.advance();
                self.expect_block_end()?;
                let (else_body, _) = self.parse_statements(&["endif"])?;
                else_body
            }
            _ => Vec::new(),
        };
        self.advance(); // consume 'endif'
        self.expect_block_end()?;

        Ok(IfStatement {
            test,
            body,
            else_body,
            span,
        })
    }

    fn parse_set(&mut self) -> ParseResult<Statement> {
        let set_token = self.advance().clone();
        let span = SourceSpan::from_token(&set_token);
        let target = self.parse_assign_target(true)?;

        if matches!(self.peek_kind(), TokenKind::Equal) {
            self.advance();
            let value = self.parse_tuple(true)?;
            self.expect_block_end()?;
            return Ok(Statement::Assign(AssignStatement {
                target,
                value,
                span,
            }));
        }

        let filters = if matches!(self.peek_kind(), TokenKind::Pipe) {
            self.advance();
            self.parse_filter_chain()?
        } else {
            Vec::new()
        };
        self.expect_block_end()?;
        let (body, _) = self.parse_statements(&["endset"])?;
        self.advance(); // consume 'endset'
        self.expect_block_end()?;

        Ok(Statement::AssignBlock(AssignBlockStatement {
            target,
            body,
            filters,
            span,
        }))
    }

    fn parse_macro(&mut self) -> ParseResult<Statement> {
        let macro_token = self.advance().clone();
        let name = self.expect_identifier("expected macro name")?;
        self.expect_token(TokenKind::LParen, "expected '(' after macro name")?;

        let mut parameters: Vec<MacroParameter> = Vec::new();
        loop {
            if matches!(self.peek_kind(), TokenKind::RParen) {
                self.advance();
                break;
            }
            let param_token = self.peek().clone();
            let param = self.expect_identifier("expected macro parameter name")?;
            let default = if matches!(self.peek_kind(), TokenKind::Equal) {
                self.advance();
                Some(self.parse_expression(true)?)
            } else {
                None
            };
            if default.is_none() && parameters.iter().any(|p| p.default.is_some()) {
                return Err(Self::error_at(
                    &param_token,
                    "non-default argument follows default argument",
                ));
            }
            parameters.push(MacroParameter {
                name: param.name,
                default,
                span: param.span,
            });
            match self.peek_kind() {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RParen => {
                    self.advance();
                    break;
                }
                _ => {
                    let token = self.peek().clone();
                    return Err(Self::error_at(
                        &token,
                        format!("expected ',' or ')' in macro signature, found '{}'", token.lexeme),
                    ));
                }
            }
        }
        self.expect_block_end()?;

        let (body, _) = self.parse_statements(&["endmacro"])?;
        self.advance(); // consume 'endmacro'
        self.skip_identifier(&name.name);
        self.expect_block_end()?;

        Ok(Statement::Macro(MacroStatement {
            name: name.name,
            parameters,
            body,
            span: SourceSpan::from_token(&macro_token),
        }))
    }

    fn parse_block(&mut self) -> ParseResult<Statement> {
        let block_token = self.advance().clone();
        let name = self.expect_identifier("expected block name")?;
        let mut scoped = false;
        let mut required = false;
        loop {
            if self.skip_identifier("scoped") {
                scoped = true;
            } else if self.skip_identifier("required") {
                required = true;
            } else {
                break;
            }
        }
        self.expect_block_end()?;

        let (body, _) = self.parse_statements(&["endblock"])?;
        self.advance(); // consume 'endblock'
        self.skip_identifier(&name.name);
        self.expect_block_end()?;

        Ok(Statement::Block(BlockStatement {
            name: name.name,
            body,
            scoped,
            required,
            span: SourceSpan::from_token(&block_token),
        }))
    }

    fn parse_extends(&mut self) -> ParseResult<Statement> {
        let extends_token = self.advance().clone();
        let template = self.parse_expression(true)?;
        self.expect_block_end()?;
        Ok(Statement::Extends(ExtendsStatement {
            template,
            span: SourceSpan::from_token(&extends_token),
        }))
    }

    fn parse_include(&mut self) -> ParseResult<Statement> {
        let include_token = self.advance().clone();
        let template = self.parse_expression(true)?;

        let ignore_missing = self.check_identifier("ignore")
            && self.peek_lexeme_at(1) == Some("missing");
        if ignore_missing {
            self.advance();
            self.advance();
        }

        let mut with_context = true;
        if (self.check_identifier("with") || self.check_identifier("without"))
            && self.peek_lexeme_at(1) == Some("context")
        {
            with_context = self.check_identifier("with");
            self.advance();
            self.advance();
        }
        self.expect_block_end()?;

        Ok(Statement::Include(IncludeStatement {
            template,
            ignore_missing,
            with_context,
            span: SourceSpan::from_token(&include_token),
        }))
    }

    fn parse_with(&mut self) -> ParseResult<Statement> {
        let with_token = self.advance().clone();
        let mut bindings = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::BlockEnd) {
            if !bindings.is_empty() {
                self.expect_token(TokenKind::Comma, "expected ',' between with bindings")?;
            }
            let target = self.expect_identifier("expected name in with statement")?;
            self.expect_token(TokenKind::Equal, "expected '=' after with target")?;
            let value = self.parse_expression(true)?;
            bindings.push((target, value));
        }
        self.expect_block_end()?;

        let (body, _) = self.parse_statements(&["endwith"])?;
        self.advance(); // consume 'endwith'
        self.expect_block_end()?;

        Ok(Statement::With(WithStatement {
            bindings,
            body,
            span: SourceSpan::from_token(&with_token),
        }))
    }

    fn parse_autoescape(&mut self) -> ParseResult<Statement> {
        let autoescape_token = self.advance().clone();
        let value = self.parse_expression(true)?;
        self.expect_block_end()?;

        let (body, _) = self.parse_statements(&["endautoescape"])?;
        self.advance(); // consume 'endautoescape'
        self.expect_block_end()?;

        Ok(Statement::Autoescape(AutoescapeStatement {
            value,
            body,
            span: SourceSpan::from_token(&autoescape_token),
        }))
    }

    fn parse_filter_block(&mut self) -> ParseResult<Statement> {
        let filter_token = self.advance().clone();
        let filters = self.parse_filter_chain()?;
        self.expect_block_end()?;

        let (body, _) = self.parse_statements(&["endfilter"])?;
        self.advance(); // consume 'endfilter'
        self.expect_block_end()?;

        Ok(Statement::FilterBlock(FilterBlockStatement {
            filters,
            body,
            span: SourceSpan::from_token(&filter_token),
        }))
    }

    fn parse_unsupported(&mut self) -> ParseResult<Statement> {
        let tag_token = self.advance().clone();
        while !matches!(self.peek_kind(), TokenKind::BlockEnd) {
            if self.is_at_end() {
                return Err(Self::error_at(
                    &tag_token,
                    format!("unterminated '{}' tag", tag_token.lexeme),
                ));
            }
            self.advance();
        }
        self.expect_block_end()?;

        let body = if tag_token.lexeme == "call" {
            let (body, _) = self.parse_statements(&["endcall"])?;
            self.advance(); // consume 'endcall'
            self.expect_block_end()?;
            body
        } else {
            Vec::new()
        };

        Ok(Statement::Unsupported(UnsupportedStatement {
            tag: tag_token.lexeme.clone(),
            body,
            span: SourceSpan::from_token(&tag_token),
        }))
    }

    fn parse_filter_chain(&mut self) -> ParseResult<Vec<FilterCall>> {
        let mut filters = Vec::new();
        loop {
            let name_token = self.peek().clone();
            let name = self.parse_dotted_name()?;
            let arguments = if matches!(self.peek_kind(), TokenKind::LParen) {
                self.parse_call_arguments()?
            } else {
                CallArguments::default()
            };
            filters.push(FilterCall {
                name,
                arguments,
                span: SourceSpan::from_token(&name_token),
            });
            if matches!(self.peek_kind(), TokenKind::Pipe) {
                self.advance();
            } else {
                return Ok(filters);
            }
        }
    }

    fn parse_assign_target(&mut self, allow_attribute: bool) -> ParseResult<AssignTarget> {
        let first = self.parse_target_atom(allow_attribute)?;
        if !matches!(self.peek_kind(), TokenKind::Comma) {
            return Ok(first);
        }

        let mut span = first.span();
        let mut items = vec![first];
        while matches!(self.peek_kind(), TokenKind::Comma) {
            self.advance();
            if matches!(
                self.peek_kind(),
                TokenKind::Keyword(Keyword::In) | TokenKind::Equal | TokenKind::BlockEnd
            ) {
                break;
            }
            let item = self.parse_target_atom(allow_attribute)?;
            span = Self::union_spans(&span, &item.span());
            items.push(item);
        }
        Ok(AssignTarget::Tuple(items, span))
    }

    fn parse_target_atom(&mut self, allow_attribute: bool) -> ParseResult<AssignTarget> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::LParen => {
                self.advance();
                let mut items = Vec::new();
                let mut trailing_comma = false;
                while !matches!(self.peek_kind(), TokenKind::RParen) {
                    items.push(self.parse_target_atom(allow_attribute)?);
                    trailing_comma = matches!(self.peek_kind(), TokenKind::Comma);
                    if trailing_comma {
                        self.advance();
                    } else {
                        break;
                    }
                }
                let closing = self.peek().clone();
                self.expect_token(TokenKind::RParen, "expected ')' after assignment target")?;
                let span = Self::union_spans(
                    &SourceSpan::from_token(&token),
                    &SourceSpan::from_token(&closing),
                );
                if items.len() == 1 && !trailing_comma {
                    Ok(items.remove(0))
                } else {
                    Ok(AssignTarget::Tuple(items, span))
                }
            }
            TokenKind::Identifier => {
                let object = self.expect_identifier("expected assignment target")?;
                if allow_attribute && matches!(self.peek_kind(), TokenKind::Dot) {
                    self.advance();
                    let attribute = self.expect_identifier("expected attribute name after '.'")?;
                    return Ok(AssignTarget::Attribute(object, attribute));
                }
                Ok(AssignTarget::Name(object))
            }
            _ => Err(Self::error_at(
                &token,
                format!("expected assignment target, found '{}'", token.lexeme),
            )),
        }
    }

    /// Comma separated expressions; more than one yields an implicit tuple.
    fn parse_tuple(&mut self, with_condexpr: bool) -> ParseResult<Expression> {
        let first = self.parse_expression(with_condexpr)?;
        if !matches!(self.peek_kind(), TokenKind::Comma) {
            return Ok(first);
        }

        let mut span = first.span;
        let mut items = vec![first];
        while matches!(self.peek_kind(), TokenKind::Comma) {
            self.advance();
            if self.is_tuple_end() {
                break;
            }
            let item = self.parse_expression(with_condexpr)?;
            span = Self::union_spans(&span, &item.span);
            items.push(item);
        }
        Ok(Self::make_expression(span, ExpressionKind::Tuple(items)))
    }

    fn is_tuple_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::VariableEnd
                | TokenKind::BlockEnd
                | TokenKind::RParen
                | TokenKind::Eof
                | TokenKind::Keyword(Keyword::If)
                | TokenKind::Keyword(Keyword::In)
        )
    }

    fn parse_expression(&mut self, with_condexpr: bool) -> ParseResult<Expression> {
        let mut expr = self.parse_expression_prec(Precedence::Lowest, terminator_none)?;
        if !with_condexpr {
            return Ok(expr);
        }

        while self.check_keyword(Keyword::If) {
            self.advance();
            let test = self.parse_expression_prec(Precedence::Lowest, terminator_none)?;
            let else_branch = if self.check_keyword(Keyword::Else) {
                self.advance();
                Some(Box::new(self.parse_expression(true)?))
            } else {
                None
            };
            let mut span = Self::union_spans(&expr.span, &test.span);
            if let Some(else_branch) = &else_branch {
                span = Self::union_spans(&span, &else_branch.span);
            }
            expr = Self::make_expression(
                span,
                ExpressionKind::Conditional(ConditionalExpression {
                    test: Box::new(test),
                    then_branch: Box::new(expr),
                    else_branch,
                }),
            );
        }
        Ok(expr)
    }

    fn parse_expression_prec(
        &mut self,
        precedence: Precedence,
        terminator: fn(&TokenKind) -> bool,
    ) -> ParseResult<Expression> {
        let mut expr = self.parse_prefix_expression()?;

        loop {
            if self.is_at_end() || terminator(self.peek_kind()) {
                break;
            }

            match self.peek_kind() {
                TokenKind::LParen => {
                    expr = self.finish_call(expr)?;
                    continue;
                }
                TokenKind::LBracket => {
                    expr = self.finish_subscript(expr)?;
                    continue;
                }
                TokenKind::Dot => {
                    expr = self.finish_member(expr)?;
                    continue;
                }
                TokenKind::Pipe => {
                    expr = self.finish_filter(expr)?;
                    continue;
                }
                TokenKind::Keyword(Keyword::Is) => {
                    expr = self.finish_test(expr)?;
                    continue;
                }
                _ => {}
            }

            let next_precedence = if self.check_keyword(Keyword::Not)
                && self.peek_kind_at(1) == Some(TokenKind::Keyword(Keyword::In))
            {
                Precedence::Compare
            } else {
                match Precedence::of(self.peek_kind()) {
                    Some(p) => p,
                    None => break,
                }
            };

            if precedence >= next_precedence {
                break;
            }

            expr = self.parse_infix_expression(expr, next_precedence, terminator)?;
        }

        Ok(expr)
    }

    fn parse_prefix_expression(&mut self) -> ParseResult<Expression> {
        let token = self.peek().clone();
        let span = SourceSpan::from_token(&token);
        match &token.kind {
            TokenKind::Identifier => {
                self.advance();
                Ok(Self::make_expression(
                    span,
                    ExpressionKind::Name(token.lexeme.clone()),
                ))
            }
            TokenKind::StringLiteral(value) => {
                self.advance();
                let mut value = value.clone();
                let mut span = span;
                // Adjacent string literals are concatenated.
                while let TokenKind::StringLiteral(next) = self.peek_kind().clone() {
                    let next_token = self.advance().clone();
                    value.push_str(&next);
                    span = Self::union_spans(&span, &SourceSpan::from_token(&next_token));
                }
                Ok(Self::make_expression(
                    span,
                    ExpressionKind::Literal(Literal::String(value)),
                ))
            }
            TokenKind::IntegerLiteral(value) => {
                self.advance();
                Ok(Self::make_expression(
                    span,
                    ExpressionKind::Literal(Literal::Integer(*value)),
                ))
            }
            TokenKind::FloatLiteral(value) => {
                self.advance();
                Ok(Self::make_expression(
                    span,
                    ExpressionKind::Literal(Literal::Float(*value)),
                ))
            }
            TokenKind::BooleanLiteral(value) => {
                self.advance();
                Ok(Self::make_expression(
                    span,
                    ExpressionKind::Literal(Literal::Boolean(*value)),
                ))
            }
            TokenKind::NoneLiteral => {
                self.advance();
                Ok(Self::make_expression(
                    span,
                    ExpressionKind::Literal(Literal::None),
                ))
            }
            TokenKind::LParen => self.parse_parenthesized(),
            TokenKind::LBracket => self.parse_list_literal(),
            TokenKind::LBrace => self.parse_dict_literal(),
            TokenKind::Minus | TokenKind::Plus => {
                self.advance();
                let operator = if matches!(token.kind, TokenKind::Minus) {
                    UnaryOperator::Negative
                } else {
                    UnaryOperator::Positive
                };
                let operand =
                    self.parse_expression_prec(Precedence::Unary, terminator_filter_or_test)?;
                let span = Self::union_spans(&span, &operand.span);
                Ok(Self::make_expression(
                    span,
                    ExpressionKind::Unary(UnaryExpression {
                        operator,
                        operand: Box::new(operand),
                    }),
                ))
            }
            TokenKind::Keyword(Keyword::Not) => {
                self.advance();
                let operand = self.parse_expression_prec(Precedence::Not, terminator_none)?;
                let span = Self::union_spans(&span, &operand.span);
                Ok(Self::make_expression(
                    span,
                    ExpressionKind::Unary(UnaryExpression {
                        operator: UnaryOperator::Not,
                        operand: Box::new(operand),
                    }),
                ))
            }
            TokenKind::Eof => Err(Self::error_at(
                &token,
                "unexpected end of template, expected an expression",
            )),
            _ => Err(Self::error_at(
                &token,
                format!("expected an expression, found '{}'", token.lexeme),
            )),
        }
    }

    fn parse_parenthesized(&mut self) -> ParseResult<Expression> {
        let open_token = self.advance().clone();
        let open_span = SourceSpan::from_token(&open_token);

        if matches!(self.peek_kind(), TokenKind::RParen) {
            let closing = self.advance().clone();
            let span = Self::union_spans(&open_span, &SourceSpan::from_token(&closing));
            return Ok(Self::make_expression(span, ExpressionKind::Tuple(Vec::new())));
        }

        let first = self.parse_expression(true)?;
        if !matches!(self.peek_kind(), TokenKind::Comma) {
            self.expect_token(TokenKind::RParen, "expected ')' after expression")?;
            return Ok(first);
        }

        let mut items = vec![first];
        while matches!(self.peek_kind(), TokenKind::Comma) {
            self.advance();
            if matches!(self.peek_kind(), TokenKind::RParen) {
                break;
            }
            items.push(self.parse_expression(true)?);
        }
        let closing = self.peek().clone();
        self.expect_token(TokenKind::RParen, "expected ')' to close tuple")?;
        let span = Self::union_spans(&open_span, &SourceSpan::from_token(&closing));
        Ok(Self::make_expression(span, ExpressionKind::Tuple(items)))
    }

    fn parse_list_literal(&mut self) -> ParseResult<Expression> {
        let open_token = self.advance().clone();
        let mut items = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::RBracket) {
            items.push(self.parse_expression(true)?);
            if matches!(self.peek_kind(), TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        let closing = self.peek().clone();
        self.expect_token(TokenKind::RBracket, "expected ']' to close list literal")?;
        let span = Self::union_spans(
            &SourceSpan::from_token(&open_token),
            &SourceSpan::from_token(&closing),
        );
        Ok(Self::make_expression(span, ExpressionKind::List(items)))
    }

    fn parse_dict_literal(&mut self) -> ParseResult<Expression> {
        let open_token = self.advance().clone();
        let mut entries = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::RBrace) {
            let key = self.parse_expression(true)?;
            self.expect_token(TokenKind::Colon, "expected ':' after dictionary key")?;
            let value = self.parse_expression(true)?;
            entries.push(DictEntry { key, value });
            if matches!(self.peek_kind(), TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        let closing = self.peek().clone();
        self.expect_token(TokenKind::RBrace, "expected '}' to close dictionary literal")?;
        let span = Self::union_spans(
            &SourceSpan::from_token(&open_token),
            &SourceSpan::from_token(&closing),
        );
        Ok(Self::make_expression(span, ExpressionKind::Dict(entries)))
    }

    fn parse_infix_expression(
        &mut self,
        left: Expression,
        precedence: Precedence,
        terminator: fn(&TokenKind) -> bool,
    ) -> ParseResult<Expression> {
        let operator_token = self.peek().clone();

        if let Some(operator) = self.take_compare_operator() {
            let right = self.parse_expression_prec(precedence, terminator)?;
            let mut span = Self::union_spans(&left.span, &right.span);
            let mut comparisons = vec![(operator, right)];
            while let Some(operator) = self.take_compare_operator() {
                let right = self.parse_expression_prec(precedence, terminator)?;
                span = Self::union_spans(&span, &right.span);
                comparisons.push((operator, right));
            }
            return Ok(Self::make_expression(
                span,
                ExpressionKind::Compare(CompareExpression {
                    left: Box::new(left),
                    comparisons,
                }),
            ));
        }

        self.advance();
        if matches!(operator_token.kind, TokenKind::Tilde) {
            let mut span = left.span;
            let mut nodes = vec![left];
            loop {
                let node = self.parse_expression_prec(precedence, terminator)?;
                span = Self::union_spans(&span, &node.span);
                nodes.push(node);
                if matches!(self.peek_kind(), TokenKind::Tilde) {
                    self.advance();
                } else {
                    break;
                }
            }
            return Ok(Self::make_expression(span, ExpressionKind::Concat(nodes)));
        }

        let operator = binary_operator_from_token(&operator_token)?;
        let right = self.parse_expression_prec(precedence, terminator)?;
        let span = Self::union_spans(&left.span, &right.span);
        Ok(Self::make_expression(
            span,
            ExpressionKind::Binary(BinaryExpression {
                operator,
                left: Box::new(left),
                right: Box::new(right),
            }),
        ))
    }

    fn take_compare_operator(&mut self) -> Option<CompareOperator> {
        if self.check_keyword(Keyword::Not)
            && self.peek_kind_at(1) == Some(TokenKind::Keyword(Keyword::In))
        {
            self.advance();
            self.advance();
            return Some(CompareOperator::NotIn);
        }
        let operator = compare_operator_from_token(self.peek_kind())?;
        self.advance();
        Some(operator)
    }

    fn finish_call(&mut self, callee: Expression) -> ParseResult<Expression> {
        let arguments = self.parse_call_arguments()?;
        let closing = self.tokens[self.current - 1].clone();
        let span = Self::union_spans(&callee.span, &SourceSpan::from_token(&closing));
        Ok(Self::make_expression(
            span,
            ExpressionKind::Call(CallExpression {
                callee: Box::new(callee),
                arguments,
            }),
        ))
    }

    fn parse_call_arguments(&mut self) -> ParseResult<CallArguments> {
        self.expect_token(TokenKind::LParen, "expected '(' to start argument list")?;
        let mut arguments = CallArguments::default();

        loop {
            if matches!(self.peek_kind(), TokenKind::RParen) {
                self.advance();
                return Ok(arguments);
            }

            match self.peek_kind() {
                TokenKind::Star => {
                    self.advance();
                    arguments.dyn_args = Some(Box::new(self.parse_expression(true)?));
                }
                TokenKind::DoubleStar => {
                    self.advance();
                    arguments.dyn_kwargs = Some(Box::new(self.parse_expression(true)?));
                }
                TokenKind::Identifier
                    if self.peek_kind_at(1) == Some(TokenKind::Equal) =>
                {
                    let name_token = self.advance().clone();
                    self.advance(); // consume '='
                    let value = self.parse_expression(true)?;
                    arguments.keywords.push(KeywordArgument {
                        name: name_token.lexeme.clone(),
                        value,
                        span: SourceSpan::from_token(&name_token),
                    });
                }
                _ => {
                    if !arguments.keywords.is_empty() {
                        let token = self.peek().clone();
                        return Err(Self::error_at(
                            &token,
                            "positional argument follows keyword argument",
                        ));
                    }
                    let expression = self.parse_expression(true)?;
                    arguments.positional.push(expression);
                }
            }

            match self.peek_kind() {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RParen => {
                    self.advance();
                    return Ok(arguments);
                }
                _ => {
                    let token = self.peek().clone();
                    return Err(Self::error_at(
                        &token,
                        format!("expected ',' or ')' in argument list, found '{}'", token.lexeme),
                    ));
                }
            }
        }
    }

    fn finish_subscript(&mut self, object: Expression) -> ParseResult<Expression> {
        self.expect_token(TokenKind::LBracket, "expected '[' for subscript")?;
        let index = self.parse_subscript_index()?;
        let closing = self.peek().clone();
        self.expect_token(TokenKind::RBracket, "expected ']' after subscript")?;
        let span = Self::union_spans(&object.span, &SourceSpan::from_token(&closing));

        Ok(Self::make_expression(
            span,
            ExpressionKind::Getitem(GetitemExpression {
                object: Box::new(object),
                index: Box::new(index),
            }),
        ))
    }

    fn parse_subscript_index(&mut self) -> ParseResult<Expression> {
        let start_token = self.peek().clone();
        let start = if matches!(self.peek_kind(), TokenKind::Colon) {
            None
        } else {
            Some(self.parse_expression(true)?)
        };

        if !matches!(self.peek_kind(), TokenKind::Colon) {
            return start.ok_or_else(|| Self::error_at(&start_token, "expected subscript"));
        }
        self.advance(); // consume ':'

        let stop = if matches!(self.peek_kind(), TokenKind::RBracket | TokenKind::Colon) {
            None
        } else {
            Some(Box::new(self.parse_expression(true)?))
        };
        let step = if matches!(self.peek_kind(), TokenKind::Colon) {
            self.advance();
            if matches!(self.peek_kind(), TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expression(true)?))
            }
        } else {
            None
        };

        Ok(Self::make_expression(
            SourceSpan::from_token(&start_token),
            ExpressionKind::Slice(SliceExpression {
                start: start.map(Box::new),
                stop,
                step,
            }),
        ))
    }

    fn finish_member(&mut self, object: Expression) -> ParseResult<Expression> {
        self.expect_token(TokenKind::Dot, "expected '.' for attribute access")?;
        let name_token = self.peek().clone();
        let name_span = SourceSpan::from_token(&name_token);
        let span = Self::union_spans(&object.span, &name_span);

        match name_token.kind {
            TokenKind::IntegerLiteral(value) => {
                self.advance();
                let index = Self::make_expression(
                    name_span,
                    ExpressionKind::Literal(Literal::Integer(value)),
                );
                Ok(Self::make_expression(
                    span,
                    ExpressionKind::Getitem(GetitemExpression {
                        object: Box::new(object),
                        index: Box::new(index),
                    }),
                ))
            }
            TokenKind::Identifier
            | TokenKind::Keyword(_)
            | TokenKind::BooleanLiteral(_)
            | TokenKind::NoneLiteral => {
                self.advance();
                Ok(Self::make_expression(
                    span,
                    ExpressionKind::Getattr(GetattrExpression {
                        object: Box::new(object),
                        attribute: name_token.lexeme.clone(),
                    }),
                ))
            }
            _ => Err(Self::error_at(
                &name_token,
                format!("expected attribute name after '.', found '{}'", name_token.lexeme),
            )),
        }
    }

    fn finish_filter(&mut self, node: Expression) -> ParseResult<Expression> {
        self.expect_token(TokenKind::Pipe, "expected '|' before filter")?;
        let name = self.parse_dotted_name()?;
        let arguments = if matches!(self.peek_kind(), TokenKind::LParen) {
            self.parse_call_arguments()?
        } else {
            CallArguments::default()
        };
        let last = self.tokens[self.current - 1].clone();
        let span = Self::union_spans(&node.span, &SourceSpan::from_token(&last));

        Ok(Self::make_expression(
            span,
            ExpressionKind::Filter(FilterExpression {
                node: Box::new(node),
                name,
                arguments,
            }),
        ))
    }

    fn finish_test(&mut self, node: Expression) -> ParseResult<Expression> {
        self.expect_token(TokenKind::Keyword(Keyword::Is), "expected 'is' before test")?;
        let negated = self.check_keyword(Keyword::Not);
        if negated {
            self.advance();
        }

        let name_token = self.peek().clone();
        let name = match name_token.kind {
            TokenKind::Identifier => self.parse_dotted_name()?,
            TokenKind::NoneLiteral
            | TokenKind::BooleanLiteral(_)
            | TokenKind::Keyword(Keyword::In) => {
                self.advance();
                name_token.lexeme.to_lowercase()
            }
            _ => {
                return Err(Self::error_at(
                    &name_token,
                    format!("expected test name, found '{}'", name_token.lexeme),
                ));
            }
        };

        let arguments = if matches!(self.peek_kind(), TokenKind::LParen) {
            self.parse_call_arguments()?
        } else if self.starts_bare_test_argument() {
            let argument =
                self.parse_expression_prec(Precedence::Unary, terminator_filter_or_test)?;
            CallArguments {
                positional: vec![argument],
                ..CallArguments::default()
            }
        } else {
            CallArguments::default()
        };

        let last = self.tokens[self.current - 1].clone();
        let span = Self::union_spans(&node.span, &SourceSpan::from_token(&last));
        let test = Self::make_expression(
            span,
            ExpressionKind::Test(TestExpression {
                node: Box::new(node),
                name,
                arguments,
            }),
        );

        if negated {
            return Ok(Self::make_expression(
                span,
                ExpressionKind::Unary(UnaryExpression {
                    operator: UnaryOperator::Not,
                    operand: Box::new(test),
                }),
            ));
        }
        Ok(test)
    }

    fn starts_bare_test_argument(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Identifier
                | TokenKind::StringLiteral(_)
                | TokenKind::IntegerLiteral(_)
                | TokenKind::FloatLiteral(_)
                | TokenKind::BooleanLiteral(_)
                | TokenKind::NoneLiteral
                | TokenKind::LBracket
                | TokenKind::LBrace
        )
    }

    fn parse_dotted_name(&mut self) -> ParseResult<String> {
        let mut name = self.expect_identifier("expected a name")?.name;
        while matches!(self.peek_kind(), TokenKind::Dot)
            && self.peek_kind_at(1) == Some(TokenKind::Identifier)
        {
            self.advance();
            name.push('.');
            name.push_str(&self.advance().lexeme.clone());
        }
        Ok(name)
    }

    fn expect_identifier(&mut self, message: &str) -> ParseResult<Identifier> {
        let token = self.peek().clone();
        if matches!(token.kind, TokenKind::Identifier) {
            self.advance();
            Ok(Identifier {
                name: token.lexeme.clone(),
                span: SourceSpan::from_token(&token),
            })
        } else {
            Err(Self::error_at(
                &token,
                format!("{} (found '{}')", message, token.lexeme),
            ))
        }
    }

    fn expect_block_end(&mut self) -> ParseResult<()> {
        self.expect_token(TokenKind::BlockEnd, "expected end of statement block")
    }

    fn expect_token(&mut self, expected: TokenKind, message: &str) -> ParseResult<()> {
        if std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(&expected)
            && (!matches!(expected, TokenKind::Keyword(_)) || *self.peek_kind() == expected)
        {
            self.advance();
            Ok(())
        } else {
            let token = self.peek().clone();
            Err(Self::error_at(
                &token,
                format!("{} (found '{}')", message, token.lexeme),
            ))
        }
    }

    fn skip_identifier(&mut self, word: &str) -> bool {
        if self.check_identifier(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check_identifier(&self, word: &str) -> bool {
        matches!(self.peek_kind(), TokenKind::Identifier) && self.peek().lexeme == word
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek_kind(), TokenKind::Keyword(kw) if *kw == keyword)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.current].kind
    }

    fn peek_kind_at(&self, offset: usize) -> Option<TokenKind> {
        self.tokens
            .get(self.current + offset)
            .map(|token| token.kind.clone())
    }

    fn peek_lexeme_at(&self, offset: usize) -> Option<&str> {
        self.tokens
            .get(self.current + offset)
            .map(|token| token.lexeme.as_str())
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        &self.tokens[self.current - 1]
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }
}

/// Tag names are plain identifiers, except `if`/`else` which lex as keywords.
fn tag_name(token: &Token) -> Option<&str> {
    match token.kind {
        TokenKind::Identifier | TokenKind::Keyword(_) => Some(token.lexeme.as_str()),
        _ => None,
    }
}

fn terminator_none(_kind: &TokenKind) -> bool {
    false
}

fn terminator_filter_or_test(kind: &TokenKind) -> bool {
    matches!(kind, TokenKind::Pipe | TokenKind::Keyword(Keyword::Is))
}

fn compare_operator_from_token(kind: &TokenKind) -> Option<CompareOperator> {
    let operator = match kind {
        TokenKind::DoubleEqual => CompareOperator::Equal,
        TokenKind::BangEqual => CompareOperator::NotEqual,
        TokenKind::Greater => CompareOperator::Greater,
        TokenKind::GreaterEqual => CompareOperator::GreaterEqual,
        TokenKind::Less => CompareOperator::Less,
        TokenKind::LessEqual => CompareOperator::LessEqual,
        TokenKind::Keyword(Keyword::In) => CompareOperator::In,
        _ => return None,
    };
    Some(operator)
}

fn binary_operator_from_token(token: &Token) -> ParseResult<BinaryOperator> {
    let operator = match token.kind {
        TokenKind::Plus => BinaryOperator::Add,
        TokenKind::Minus => BinaryOperator::Subtract,
        TokenKind::Star => BinaryOperator::Multiply,
        TokenKind::Slash => BinaryOperator::Divide,
        TokenKind::DoubleSlash => BinaryOperator::FloorDivide,
        TokenKind::Percent => BinaryOperator::Modulo,
        TokenKind::DoubleStar => BinaryOperator::Power,
        TokenKind::Keyword(Keyword::And) => BinaryOperator::And,
        TokenKind::Keyword(Keyword::Or) => BinaryOperator::Or,
        _ => {
            return Err(SyntaxError::new(
                format!("unsupported binary operator '{}'", token.lexeme),
                token.line,
                token.column,
            ))
        }
    };
    Ok(operator)
}

/// Lexes and parses a whole template.
pub fn parse_source(source: &SourceFile) -> ParseResult<Template> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(source, tokens).parse()
}
