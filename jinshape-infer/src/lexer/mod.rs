use crate::error::SyntaxError;
use crate::source::SourceFile;

type LexResult<T> = Result<T, SyntaxError>;

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    fn new(kind: TokenKind, lexeme: String, line: usize, column: usize) -> Self {
        Self {
            kind,
            lexeme,
            line,
            column,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Data(String),
    VariableBegin,
    VariableEnd,
    BlockBegin,
    BlockEnd,
    Identifier,
    Keyword(Keyword),
    IntegerLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    BooleanLiteral(bool),
    NoneLiteral,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
    Pipe,
    Tilde,
    Equal,
    DoubleEqual,
    BangEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Eof,
}

/// Words that act as operators inside tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    And,
    Or,
    Not,
    In,
    Is,
    If,
    Else,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Variable,
    Block,
    Comment,
}

impl TagKind {
    fn closer(self) -> &'static str {
        match self {
            TagKind::Variable => "}}",
            TagKind::Block => "%}",
            TagKind::Comment => "#}",
        }
    }
}

pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
    line: usize,
    column: usize,
    strip_leading: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a SourceFile) -> Self {
        Self {
            input: &source.contents,
            position: 0,
            line: 1,
            column: 1,
            strip_leading: false,
        }
    }

    pub fn tokenize(&mut self) -> LexResult<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            let opener = self.find_tag_opener();
            let data_end = opener.map_or(self.input.len(), |(offset, _)| offset);
            let strip_trailing = opener
                .map(|(offset, _)| self.input[offset + 2..].starts_with('-'))
                .unwrap_or(false);
            self.push_data(&mut tokens, data_end, strip_trailing);

            match opener {
                None => break,
                Some((_, TagKind::Comment)) => self.skip_comment()?,
                Some((_, TagKind::Block)) if self.raw_block_end().is_some() => {
                    self.lex_raw(&mut tokens)?
                }
                Some((_, kind)) => self.lex_tag(kind, &mut tokens)?,
            }
        }

        tokens.push(Token::new(
            TokenKind::Eof,
            String::new(),
            self.line,
            self.column,
        ));

        Ok(tokens)
    }

    fn find_tag_opener(&self) -> Option<(usize, TagKind)> {
        let rest = &self.input[self.position..];
        let mut search = 0;
        while let Some(index) = rest[search..].find('{') {
            let at = search + index;
            let kind = match rest[at + 1..].chars().next() {
                Some('{') => TagKind::Variable,
                Some('%') => TagKind::Block,
                Some('#') => TagKind::Comment,
                _ => {
                    search = at + 1;
                    continue;
                }
            };
            return Some((self.position + at, kind));
        }
        None
    }

    fn push_data(&mut self, tokens: &mut Vec<Token>, end: usize, strip_trailing: bool) {
        let start = self.position;
        let start_line = self.line;
        let start_column = self.column;
        self.advance_to(end);

        let mut text = &self.input[start..end];
        if std::mem::take(&mut self.strip_leading) {
            text = text.trim_start();
        }
        if strip_trailing {
            text = text.trim_end();
        }
        if !text.is_empty() {
            tokens.push(Token::new(
                TokenKind::Data(text.to_string()),
                text.to_string(),
                start_line,
                start_column,
            ));
        }
    }

    fn skip_comment(&mut self) -> LexResult<()> {
        let start_line = self.line;
        let start_column = self.column;
        self.advance_to(self.position + 2);

        match self.input[self.position..].find(TagKind::Comment.closer()) {
            Some(offset) => {
                let closer = self.position + offset;
                if self.input[..closer].ends_with('-') {
                    self.strip_leading = true;
                }
                self.advance_to(closer + 2);
                Ok(())
            }
            None => Err(SyntaxError::new(
                "unterminated comment",
                start_line,
                start_column,
            )),
        }
    }

    fn lex_tag(&mut self, kind: TagKind, tokens: &mut Vec<Token>) -> LexResult<()> {
        let begin_line = self.line;
        let begin_column = self.column;
        let begin = self.position;
        self.advance_to(self.position + 2);
        if matches!(self.peek_char(), Some('-') | Some('+')) {
            self.advance_char();
        }
        let (begin_kind, end_kind) = match kind {
            TagKind::Variable => (TokenKind::VariableBegin, TokenKind::VariableEnd),
            _ => (TokenKind::BlockBegin, TokenKind::BlockEnd),
        };
        tokens.push(Token::new(
            begin_kind,
            self.slice(begin, self.position).to_string(),
            begin_line,
            begin_column,
        ));

        let closer = kind.closer();
        let mut depth = 0usize;
        loop {
            self.skip_whitespace();
            let Some(ch) = self.peek_char() else {
                return Err(SyntaxError::new(
                    format!("unexpected end of template, expected '{closer}'"),
                    begin_line,
                    begin_column,
                ));
            };

            if depth == 0 {
                let rest = &self.input[self.position..];
                let strip = rest.starts_with('-') && rest[1..].starts_with(closer);
                if strip || rest.starts_with(closer) {
                    let start_line = self.line;
                    let start_column = self.column;
                    let start = self.position;
                    let width = if strip { 3 } else { 2 };
                    self.advance_to(self.position + width);
                    self.strip_leading = strip;
                    tokens.push(Token::new(
                        end_kind,
                        self.slice(start, self.position).to_string(),
                        start_line,
                        start_column,
                    ));
                    return Ok(());
                }
            }

            let token = match ch {
                '"' | '\'' => self.lex_string(ch)?,
                '0'..='9' => self.lex_number()?,
                'a'..='z' | 'A'..='Z' | '_' => self.lex_identifier_or_keyword(),
                '(' | '[' | '{' => {
                    depth += 1;
                    let kind = match ch {
                        '(' => TokenKind::LParen,
                        '[' => TokenKind::LBracket,
                        _ => TokenKind::LBrace,
                    };
                    self.simple_token(kind)
                }
                ')' | ']' | '}' => {
                    depth = depth.saturating_sub(1);
                    let kind = match ch {
                        ')' => TokenKind::RParen,
                        ']' => TokenKind::RBracket,
                        _ => TokenKind::RBrace,
                    };
                    self.simple_token(kind)
                }
                ',' => self.simple_token(TokenKind::Comma),
                '.' => self.simple_token(TokenKind::Dot),
                ':' => self.simple_token(TokenKind::Colon),
                '|' => self.simple_token(TokenKind::Pipe),
                '~' => self.simple_token(TokenKind::Tilde),
                '+' => self.simple_token(TokenKind::Plus),
                '-' => self.simple_token(TokenKind::Minus),
                '%' => self.simple_token(TokenKind::Percent),
                '=' => self.lex_paired('=', TokenKind::Equal, TokenKind::DoubleEqual),
                '>' => self.lex_paired('=', TokenKind::Greater, TokenKind::GreaterEqual),
                '<' => self.lex_paired('=', TokenKind::Less, TokenKind::LessEqual),
                '*' => self.lex_paired('*', TokenKind::Star, TokenKind::DoubleStar),
                '/' => self.lex_paired('/', TokenKind::Slash, TokenKind::DoubleSlash),
                '!' if self.peek_next_char() == Some('=') => {
                    self.lex_paired('=', TokenKind::BangEqual, TokenKind::BangEqual)
                }
                other => {
                    return Err(SyntaxError::new(
                        format!("unexpected character '{other}'"),
                        self.line,
                        self.column,
                    ));
                }
            };
            tokens.push(token);
        }
    }

    /// Matches `{%[-+]? raw [-]?%}` at the current position and returns the
    /// offset just past it.
    fn raw_block_end(&self) -> Option<usize> {
        match_tag_word(self.input, self.position, "raw").map(|(end, _, _)| end)
    }

    fn lex_raw(&mut self, tokens: &mut Vec<Token>) -> LexResult<()> {
        let start_line = self.line;
        let start_column = self.column;
        let (open_end, _, strip_after_open) =
            match_tag_word(self.input, self.position, "raw").ok_or_else(|| {
                SyntaxError::new("malformed raw block", start_line, start_column)
            })?;
        self.advance_to(open_end);

        let content_start = self.position;
        let mut search = self.position;
        while let Some(offset) = self.input[search..].find("{%") {
            let at = search + offset;
            if let Some((close_end, strip_before_close, strip_after_close)) =
                match_tag_word(self.input, at, "endraw")
            {
                let content_line = self.line;
                let content_column = self.column;
                let mut text = &self.input[content_start..at];
                if strip_after_open {
                    text = text.trim_start();
                }
                if strip_before_close {
                    text = text.trim_end();
                }
                if !text.is_empty() {
                    tokens.push(Token::new(
                        TokenKind::Data(text.to_string()),
                        text.to_string(),
                        content_line,
                        content_column,
                    ));
                }
                self.advance_to(close_end);
                self.strip_leading = strip_after_close;
                return Ok(());
            }
            search = at + 2;
        }

        Err(SyntaxError::new(
            "missing end of raw directive",
            start_line,
            start_column,
        ))
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.advance_char();
            } else {
                break;
            }
        }
    }

    fn lex_string(&mut self, quote: char) -> LexResult<Token> {
        let start = self.position;
        let start_line = self.line;
        let start_column = self.column;
        self.advance_char(); // consume opening quote

        let mut value = String::new();
        while let Some(ch) = self.peek_char() {
            match ch {
                '\\' => {
                    self.advance_char();
                    let escaped = self.peek_char().ok_or_else(|| {
                        SyntaxError::new(
                            "unterminated escape sequence in string literal",
                            self.line,
                            self.column,
                        )
                    })?;
                    match escaped {
                        'n' => value.push('\n'),
                        'r' => value.push('\r'),
                        't' => value.push('\t'),
                        '\\' | '"' | '\'' => value.push(escaped),
                        other => {
                            value.push('\\');
                            value.push(other);
                        }
                    }
                    self.advance_char();
                }
                _ if ch == quote => {
                    self.advance_char(); // consume closing quote
                    let lexeme = self.slice(start, self.position);
                    return Ok(Token::new(
                        TokenKind::StringLiteral(value),
                        lexeme.to_string(),
                        start_line,
                        start_column,
                    ));
                }
                _ => {
                    value.push(ch);
                    self.advance_char();
                }
            }
        }

        Err(SyntaxError::new(
            "unterminated string literal",
            start_line,
            start_column,
        ))
    }

    fn lex_number(&mut self) -> LexResult<Token> {
        let start = self.position;
        let start_line = self.line;
        let start_column = self.column;
        let mut is_float = false;

        self.advance_char(); // consume first digit

        while let Some(ch) = self.peek_char() {
            match ch {
                '0'..='9' | '_' => {
                    self.advance_char();
                }
                '.' if !is_float
                    && matches!(self.peek_next_char(), Some(next) if next.is_ascii_digit()) =>
                {
                    is_float = true;
                    self.advance_char();
                }
                'e' | 'E'
                    if matches!(self.peek_next_char(), Some(next) if next.is_ascii_digit() || next == '+' || next == '-') =>
                {
                    is_float = true;
                    self.advance_char();
                    if matches!(self.peek_char(), Some('+') | Some('-')) {
                        self.advance_char();
                    }
                }
                _ => break,
            }
        }

        let lexeme = self.slice(start, self.position).to_string();
        let digits = lexeme.replace('_', "");
        let kind = if is_float {
            digits
                .parse::<f64>()
                .map(TokenKind::FloatLiteral)
                .map_err(|_| {
                    SyntaxError::new(
                        format!("failed to parse float literal '{lexeme}'"),
                        start_line,
                        start_column,
                    )
                })?
        } else {
            digits
                .parse::<i64>()
                .map(TokenKind::IntegerLiteral)
                .map_err(|_| {
                    SyntaxError::new(
                        format!("failed to parse integer literal '{lexeme}'"),
                        start_line,
                        start_column,
                    )
                })?
        };

        Ok(Token::new(kind, lexeme, start_line, start_column))
    }

    fn lex_identifier_or_keyword(&mut self) -> Token {
        let start = self.position;
        let start_line = self.line;
        let start_column = self.column;
        self.advance_char();

        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.advance_char();
            } else {
                break;
            }
        }

        let lexeme = self.slice(start, self.position).to_string();
        let kind = match lexeme.as_str() {
            "true" | "True" => TokenKind::BooleanLiteral(true),
            "false" | "False" => TokenKind::BooleanLiteral(false),
            "none" | "None" => TokenKind::NoneLiteral,
            other => match keyword_from_lexeme(other) {
                Some(keyword) => TokenKind::Keyword(keyword),
                None => TokenKind::Identifier,
            },
        };
        Token::new(kind, lexeme, start_line, start_column)
    }

    /// Lexes `single`, or `double` when the next character is `second`.
    fn lex_paired(&mut self, second: char, single: TokenKind, double: TokenKind) -> Token {
        let start_line = self.line;
        let start_column = self.column;
        let start = self.position;
        self.advance_char();

        let kind = if self.peek_char() == Some(second) {
            self.advance_char();
            double
        } else {
            single
        };
        Token::new(
            kind,
            self.slice(start, self.position).to_string(),
            start_line,
            start_column,
        )
    }

    fn simple_token(&mut self, kind: TokenKind) -> Token {
        let start_line = self.line;
        let start_column = self.column;
        let start = self.position;
        self.advance_char();
        Token::new(
            kind,
            self.slice(start, self.position).to_string(),
            start_line,
            start_column,
        )
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn peek_next_char(&self) -> Option<char> {
        let mut iter = self.input[self.position..].chars();
        iter.next()?;
        iter.next()
    }

    fn advance_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.position += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else if ch != '\r' {
            self.column += 1;
        }
        Some(ch)
    }

    fn advance_to(&mut self, end: usize) {
        while self.position < end && self.advance_char().is_some() {}
    }

    fn slice(&self, start: usize, end: usize) -> &str {
        &self.input[start..end]
    }
}

/// Matches `{%[-+]? <word> -?%}` starting at `at`. Returns the offset past the
/// closer and whether each side requested whitespace stripping.
fn match_tag_word(input: &str, at: usize, word: &str) -> Option<(usize, bool, bool)> {
    let rest = input.get(at..)?.strip_prefix("{%")?;
    let (strip_before, rest) = match rest.strip_prefix('-') {
        Some(stripped) => (true, stripped),
        None => (false, rest.strip_prefix('+').unwrap_or(rest)),
    };
    let rest = rest.trim_start().strip_prefix(word)?;
    if rest.starts_with(|ch: char| ch.is_ascii_alphanumeric() || ch == '_') {
        return None;
    }
    let rest = rest.trim_start();
    let (strip_after, rest) = match rest.strip_prefix('-') {
        Some(stripped) => (true, stripped),
        None => (false, rest),
    };
    let rest = rest.strip_prefix("%}")?;
    Some((input.len() - rest.len(), strip_before, strip_after))
}

fn keyword_from_lexeme(lexeme: &str) -> Option<Keyword> {
    match lexeme {
        "and" => Some(Keyword::And),
        "or" => Some(Keyword::Or),
        "not" => Some(Keyword::Not),
        "in" => Some(Keyword::In),
        "is" => Some(Keyword::Is),
        "if" => Some(Keyword::If),
        "else" => Some(Keyword::Else),
        _ => None,
    }
}
