//! The lexer: source text to token stream.

use crate::error::ParseError;
use core_types::SourcePosition;

/// Reserved words with meaning in ES5.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    /// `var`
    Var,
    /// `function`
    Function,
    /// `return`
    Return,
    /// `if`
    If,
    /// `else`
    Else,
    /// `while`
    While,
    /// `do`
    Do,
    /// `for`
    For,
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// `new`
    New,
    /// `this`
    This,
    /// `typeof`
    Typeof,
    /// `void`
    Void,
    /// `delete`
    Delete,
    /// `instanceof`
    Instanceof,
    /// `in`
    In,
    /// `try`
    Try,
    /// `catch`
    Catch,
    /// `finally`
    Finally,
    /// `throw`
    Throw,
    /// `with`
    With,
    /// `switch`
    Switch,
    /// `case`
    Case,
    /// `default`
    Default,
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
    /// `debugger`
    Debugger,
}

fn keyword_lookup(text: &str) -> Option<Keyword> {
    let keyword = match text {
        "var" => Keyword::Var,
        "function" => Keyword::Function,
        "return" => Keyword::Return,
        "if" => Keyword::If,
        "else" => Keyword::Else,
        "while" => Keyword::While,
        "do" => Keyword::Do,
        "for" => Keyword::For,
        "break" => Keyword::Break,
        "continue" => Keyword::Continue,
        "new" => Keyword::New,
        "this" => Keyword::This,
        "typeof" => Keyword::Typeof,
        "void" => Keyword::Void,
        "delete" => Keyword::Delete,
        "instanceof" => Keyword::Instanceof,
        "in" => Keyword::In,
        "try" => Keyword::Try,
        "catch" => Keyword::Catch,
        "finally" => Keyword::Finally,
        "throw" => Keyword::Throw,
        "with" => Keyword::With,
        "switch" => Keyword::Switch,
        "case" => Keyword::Case,
        "default" => Keyword::Default,
        "true" => Keyword::True,
        "false" => Keyword::False,
        "null" => Keyword::Null,
        "debugger" => Keyword::Debugger,
        _ => return None,
    };
    Some(keyword)
}

fn is_reserved_word(text: &str) -> bool {
    matches!(
        text,
        "class" | "const" | "enum" | "export" | "extends" | "import" | "super"
    )
}

/// Punctuators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Punct {
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Semicolon,
    Comma,
    Dot,
    Question,
    Colon,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    NotEq,
    EqEqEq,
    NotEqEq,
    AndAnd,
    OrOr,
    BitAnd,
    BitOr,
    BitXor,
    Not,
    BitNot,
    Shl,
    Shr,
    UShr,
    ShlAssign,
    ShrAssign,
    UShrAssign,
    AndAssign,
    OrAssign,
    XorAssign,
}

/// Token payload.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// An identifier name.
    Ident(String),
    /// A reserved word.
    Keyword(Keyword),
    /// A numeric literal.
    Number(f64),
    /// A string literal (escapes already decoded).
    Str(String),
    /// A punctuator.
    Punct(Punct),
    /// End of input.
    Eof,
}

/// One token with its source position and separator information.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The payload.
    pub kind: TokenKind,
    /// Position of the token's first character.
    pub position: SourcePosition,
    /// True when a line terminator separates this token from the
    /// previous one (drives automatic semicolon insertion).
    pub newline_before: bool,
}

/// The lexer.
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
}

impl Lexer {
    /// Creates a lexer over `source`.
    pub fn new(source: &str) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenizes a whole source text, appending an `Eof` token.
    pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn position(&self) -> SourcePosition {
        SourcePosition {
            line: self.line,
            column: self.column,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    /// Skips whitespace and comments; returns true when a line
    /// terminator was crossed.
    fn skip_separators(&mut self) -> Result<bool, ParseError> {
        let mut newline = false;
        loop {
            match self.peek() {
                Some(ch) if ch == '\n' || ch == '\r' || ch == '\u{2028}' || ch == '\u{2029}' => {
                    newline = true;
                    self.bump();
                }
                Some(ch) if ch.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(ch) = self.peek() {
                        if ch == '\n' || ch == '\u{2028}' || ch == '\u{2029}' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    let start = self.position();
                    self.bump();
                    self.bump();
                    let mut closed = false;
                    while let Some(ch) = self.bump() {
                        if ch == '\n' {
                            newline = true;
                        }
                        if ch == '*' && self.peek() == Some('/') {
                            self.bump();
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        return Err(ParseError::syntax("unterminated comment", start));
                    }
                }
                _ => return Ok(newline),
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        let newline_before = self.skip_separators()?;
        let position = self.position();

        let Some(ch) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                position,
                newline_before,
            });
        };

        let kind = if is_ident_start(ch) {
            self.scan_identifier(position)?
        } else if ch.is_ascii_digit() || (ch == '.' && matches!(self.peek_at(1), Some(d) if d.is_ascii_digit()))
        {
            self.scan_number(position)?
        } else if ch == '"' || ch == '\'' {
            self.scan_string(position)?
        } else {
            self.scan_punct(position)?
        };

        Ok(Token {
            kind,
            position,
            newline_before,
        })
    }

    fn scan_identifier(&mut self, position: SourcePosition) -> Result<TokenKind, ParseError> {
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            if is_ident_part(ch) {
                text.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        if is_reserved_word(&text) {
            return Err(ParseError::syntax(
                format!("'{}' is a reserved word", text),
                position,
            ));
        }
        Ok(match keyword_lookup(&text) {
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Ident(text),
        })
    }

    fn scan_number(&mut self, position: SourcePosition) -> Result<TokenKind, ParseError> {
        let mut text = String::new();

        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            self.bump();
            self.bump();
            while let Some(ch) = self.peek() {
                if ch.is_ascii_hexdigit() {
                    text.push(ch);
                    self.bump();
                } else {
                    break;
                }
            }
            if text.is_empty() {
                return Err(ParseError::syntax("missing hexadecimal digits", position));
            }
            let value = u64::from_str_radix(&text, 16)
                .map_err(|_| ParseError::syntax("hexadecimal literal overflow", position))?;
            return Ok(TokenKind::Number(value as f64));
        }

        if self.peek() == Some('0') && matches!(self.peek_at(1), Some(d) if d.is_ascii_digit()) {
            return Err(ParseError::syntax(
                "legacy octal literals are not supported",
                position,
            ));
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                text.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        if self.peek() == Some('.') {
            text.push('.');
            self.bump();
            while let Some(ch) = self.peek() {
                if ch.is_ascii_digit() {
                    text.push(ch);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            text.push('e');
            self.bump();
            if matches!(self.peek(), Some('+') | Some('-')) {
                text.push(self.bump().unwrap());
            }
            let mut digits = false;
            while let Some(ch) = self.peek() {
                if ch.is_ascii_digit() {
                    text.push(ch);
                    self.bump();
                    digits = true;
                } else {
                    break;
                }
            }
            if !digits {
                return Err(ParseError::syntax("missing exponent digits", position));
            }
        }

        if matches!(self.peek(), Some(ch) if is_ident_start(ch)) {
            return Err(ParseError::syntax(
                "identifier starts immediately after numeric literal",
                position,
            ));
        }

        let value: f64 = text
            .parse()
            .map_err(|_| ParseError::syntax("invalid numeric literal", position))?;
        Ok(TokenKind::Number(value))
    }

    fn scan_string(&mut self, position: SourcePosition) -> Result<TokenKind, ParseError> {
        let quote = self.bump().unwrap();
        let mut text = String::new();
        loop {
            let Some(ch) = self.bump() else {
                return Err(ParseError::syntax("unterminated string literal", position));
            };
            if ch == quote {
                return Ok(TokenKind::Str(text));
            }
            if ch == '\n' || ch == '\u{2028}' || ch == '\u{2029}' {
                return Err(ParseError::syntax("unterminated string literal", position));
            }
            if ch != '\\' {
                text.push(ch);
                continue;
            }
            let Some(escape) = self.bump() else {
                return Err(ParseError::syntax("unterminated string literal", position));
            };
            match escape {
                'b' => text.push('\u{0008}'),
                'f' => text.push('\u{000C}'),
                'n' => text.push('\n'),
                'r' => text.push('\r'),
                't' => text.push('\t'),
                'v' => text.push('\u{000B}'),
                '0' if !matches!(self.peek(), Some(d) if d.is_ascii_digit()) => {
                    text.push('\u{0000}')
                }
                'x' => {
                    let value = self.scan_hex_escape(2, position)?;
                    text.push(char::from_u32(value).unwrap_or('\u{FFFD}'));
                }
                'u' => {
                    let value = self.scan_hex_escape(4, position)?;
                    text.push(char::from_u32(value).unwrap_or('\u{FFFD}'));
                }
                '\n' => {} // line continuation
                '\r' => {
                    self.eat('\n');
                }
                other => text.push(other),
            }
        }
    }

    fn scan_hex_escape(&mut self, len: usize, position: SourcePosition) -> Result<u32, ParseError> {
        let mut value = 0u32;
        for _ in 0..len {
            let Some(ch) = self.bump() else {
                return Err(ParseError::syntax("invalid hexadecimal escape", position));
            };
            let digit = ch
                .to_digit(16)
                .ok_or_else(|| ParseError::syntax("invalid hexadecimal escape", position))?;
            value = value * 16 + digit;
        }
        Ok(value)
    }

    fn scan_punct(&mut self, position: SourcePosition) -> Result<TokenKind, ParseError> {
        let ch = self.bump().unwrap();
        let punct = match ch {
            '{' => Punct::LBrace,
            '}' => Punct::RBrace,
            '(' => Punct::LParen,
            ')' => Punct::RParen,
            '[' => Punct::LBracket,
            ']' => Punct::RBracket,
            ';' => Punct::Semicolon,
            ',' => Punct::Comma,
            '.' => Punct::Dot,
            '?' => Punct::Question,
            ':' => Punct::Colon,
            '~' => Punct::BitNot,
            '+' => {
                if self.eat('+') {
                    Punct::PlusPlus
                } else if self.eat('=') {
                    Punct::PlusAssign
                } else {
                    Punct::Plus
                }
            }
            '-' => {
                if self.eat('-') {
                    Punct::MinusMinus
                } else if self.eat('=') {
                    Punct::MinusAssign
                } else {
                    Punct::Minus
                }
            }
            '*' => {
                if self.eat('=') {
                    Punct::StarAssign
                } else {
                    Punct::Star
                }
            }
            '/' => {
                if self.eat('=') {
                    Punct::SlashAssign
                } else {
                    Punct::Slash
                }
            }
            '%' => {
                if self.eat('=') {
                    Punct::PercentAssign
                } else {
                    Punct::Percent
                }
            }
            '<' => {
                if self.eat('<') {
                    if self.eat('=') {
                        Punct::ShlAssign
                    } else {
                        Punct::Shl
                    }
                } else if self.eat('=') {
                    Punct::Le
                } else {
                    Punct::Lt
                }
            }
            '>' => {
                if self.eat('>') {
                    if self.eat('>') {
                        if self.eat('=') {
                            Punct::UShrAssign
                        } else {
                            Punct::UShr
                        }
                    } else if self.eat('=') {
                        Punct::ShrAssign
                    } else {
                        Punct::Shr
                    }
                } else if self.eat('=') {
                    Punct::Ge
                } else {
                    Punct::Gt
                }
            }
            '=' => {
                if self.eat('=') {
                    if self.eat('=') {
                        Punct::EqEqEq
                    } else {
                        Punct::EqEq
                    }
                } else {
                    Punct::Assign
                }
            }
            '!' => {
                if self.eat('=') {
                    if self.eat('=') {
                        Punct::NotEqEq
                    } else {
                        Punct::NotEq
                    }
                } else {
                    Punct::Not
                }
            }
            '&' => {
                if self.eat('&') {
                    Punct::AndAnd
                } else if self.eat('=') {
                    Punct::AndAssign
                } else {
                    Punct::BitAnd
                }
            }
            '|' => {
                if self.eat('|') {
                    Punct::OrOr
                } else if self.eat('=') {
                    Punct::OrAssign
                } else {
                    Punct::BitOr
                }
            }
            '^' => {
                if self.eat('=') {
                    Punct::XorAssign
                } else {
                    Punct::BitXor
                }
            }
            other => {
                return Err(ParseError::syntax(
                    format!("unexpected character '{}'", other),
                    position,
                ));
            }
        };
        Ok(TokenKind::Punct(punct))
    }
}

fn is_ident_start(ch: char) -> bool {
    ch == '$' || ch == '_' || ch.is_alphabetic()
}

fn is_ident_part(ch: char) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_keywords_and_identifiers() {
        let tokens = kinds("var answer = value;");
        assert_eq!(tokens[0], TokenKind::Keyword(Keyword::Var));
        assert_eq!(tokens[1], TokenKind::Ident("answer".to_string()));
        assert_eq!(tokens[2], TokenKind::Punct(Punct::Assign));
        assert_eq!(tokens[3], TokenKind::Ident("value".to_string()));
        assert_eq!(tokens[4], TokenKind::Punct(Punct::Semicolon));
        assert_eq!(tokens[5], TokenKind::Eof);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("42")[0], TokenKind::Number(42.0));
        assert_eq!(kinds("3.25")[0], TokenKind::Number(3.25));
        assert_eq!(kinds(".5")[0], TokenKind::Number(0.5));
        assert_eq!(kinds("1e3")[0], TokenKind::Number(1000.0));
        assert_eq!(kinds("2E-2")[0], TokenKind::Number(0.02));
        assert_eq!(kinds("0xFF")[0], TokenKind::Number(255.0));
    }

    #[test]
    fn test_number_errors() {
        assert!(Lexer::tokenize("0x").is_err());
        assert!(Lexer::tokenize("1e").is_err());
        assert!(Lexer::tokenize("077").is_err());
        assert!(Lexer::tokenize("3in").is_err());
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(kinds("'hi'")[0], TokenKind::Str("hi".to_string()));
        assert_eq!(
            kinds(r#""a\nb\t\\""#)[0],
            TokenKind::Str("a\nb\t\\".to_string())
        );
        assert_eq!(kinds(r#""\x41B""#)[0], TokenKind::Str("AB".to_string()));
        assert!(Lexer::tokenize("'open").is_err());
    }

    #[test]
    fn test_punctuators_longest_match() {
        let tokens = kinds("a >>>= b >>> c >> d >= e");
        assert_eq!(tokens[1], TokenKind::Punct(Punct::UShrAssign));
        assert_eq!(tokens[3], TokenKind::Punct(Punct::UShr));
        assert_eq!(tokens[5], TokenKind::Punct(Punct::Shr));
        assert_eq!(tokens[7], TokenKind::Punct(Punct::Ge));

        let tokens = kinds("a === b !== c == d != e");
        assert_eq!(tokens[1], TokenKind::Punct(Punct::EqEqEq));
        assert_eq!(tokens[3], TokenKind::Punct(Punct::NotEqEq));
        assert_eq!(tokens[5], TokenKind::Punct(Punct::EqEq));
        assert_eq!(tokens[7], TokenKind::Punct(Punct::NotEq));
    }

    #[test]
    fn test_comments_and_newline_flag() {
        let tokens = Lexer::tokenize("a // trailing\n b /* block\n */ c d").unwrap();
        assert!(!tokens[0].newline_before);
        assert!(tokens[1].newline_before, "after line comment");
        assert!(tokens[2].newline_before, "block comment spans a line");
        assert!(!tokens[3].newline_before);
        assert!(Lexer::tokenize("/* open").is_err());
    }

    #[test]
    fn test_positions() {
        let tokens = Lexer::tokenize("one\n  two").unwrap();
        assert_eq!(tokens[0].position, SourcePosition { line: 1, column: 1 });
        assert_eq!(tokens[1].position, SourcePosition { line: 2, column: 3 });
    }

    #[test]
    fn test_reserved_words_rejected() {
        assert!(Lexer::tokenize("class A {}").is_err());
        assert!(Lexer::tokenize("import x").is_err());
    }
}
