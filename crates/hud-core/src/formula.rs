//! Safe formula validation.
//!
//! Computed widget fields carry arithmetic formulas such as
//! `(kills + assists) / deaths`. This module checks that a formula is a
//! well-formed expression over `+ - * /`, parentheses, numeric literals and a
//! caller-supplied set of identifiers. It never evaluates anything.
//!
//! Checking runs in two stages:
//! - tokenization, which rejects any character outside the grammar;
//! - a single left-to-right pass with an "expecting operand" flag and a
//!   parenthesis depth counter.

use std::collections::HashSet;

use thiserror::Error;

/// Reasons a formula is rejected. Offsets are byte offsets into the input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    #[error("formula is empty")]
    Empty,

    #[error("disallowed character {ch:?} at offset {offset}")]
    DisallowedCharacter { ch: char, offset: usize },

    #[error("malformed number {literal:?} at offset {offset}")]
    MalformedNumber { literal: String, offset: usize },

    #[error("unknown identifier {name:?}")]
    UnknownIdentifier { name: String },

    #[error("function calls are not allowed ({name:?} is followed by '(')")]
    FunctionCall { name: String },

    #[error("two operators in a row at offset {offset}")]
    DoubleOperator { offset: usize },

    #[error("operator {op:?} at offset {offset} has no left operand")]
    UnexpectedOperator { op: char, offset: usize },

    #[error("empty parentheses at offset {offset}")]
    EmptyParentheses { offset: usize },

    #[error("unclosed '(' at offset {offset}")]
    UnclosedParenthesis { offset: usize },

    #[error("unmatched ')' at offset {offset}")]
    UnmatchedParenthesis { offset: usize },

    #[error("expression ends with an operator")]
    TrailingOperator,

    #[error("missing operator before offset {offset}")]
    MissingOperator { offset: usize },
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number,
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

/// Whether `s` is a valid identifier: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate `formula` against the identifiers in `allowed`.
pub fn validate_formula(formula: &str, allowed: &HashSet<String>) -> Result<(), FormulaError> {
    let tokens = tokenize(formula)?;
    check_grammar(&tokens, allowed)
}

fn tokenize(formula: &str) -> Result<Vec<Token>, FormulaError> {
    let bytes = formula.as_bytes();
    let mut tokens = Vec::new();
    let mut chars = formula.char_indices().peekable();

    while let Some(&(offset, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        if ch.is_ascii_digit() {
            let mut seen_dot = false;
            while let Some(&(i, c)) = chars.peek() {
                if c.is_ascii_digit() {
                    chars.next();
                } else if c == '.' && !seen_dot {
                    // A decimal point must be followed by at least one digit.
                    let next_is_digit = bytes.get(i + 1).is_some_and(u8::is_ascii_digit);
                    if !next_is_digit {
                        return Err(FormulaError::MalformedNumber {
                            literal: formula[offset..=i].to_string(),
                            offset,
                        });
                    }
                    seen_dot = true;
                    chars.next();
                } else if c == '.' {
                    return Err(FormulaError::MalformedNumber {
                        literal: formula[offset..=i].to_string(),
                        offset,
                    });
                } else {
                    break;
                }
            }
            tokens.push(Token {
                kind: TokenKind::Number,
                offset,
            });
            continue;
        }

        if ch.is_ascii_alphabetic() || ch == '_' {
            let mut end = offset;
            while let Some(&(i, c)) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    end = i + c.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token {
                kind: TokenKind::Ident(formula[offset..end].to_string()),
                offset,
            });
            continue;
        }

        let kind = match ch {
            '+' | '-' | '*' | '/' => TokenKind::Op(ch),
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            other => {
                return Err(FormulaError::DisallowedCharacter { ch: other, offset });
            }
        };
        tokens.push(Token { kind, offset });
        chars.next();
    }

    Ok(tokens)
}

fn check_grammar(tokens: &[Token], allowed: &HashSet<String>) -> Result<(), FormulaError> {
    if tokens.is_empty() {
        return Err(FormulaError::Empty);
    }

    let mut expect_operand = true;
    // Offsets of currently open parentheses.
    let mut open: Vec<usize> = Vec::new();
    let mut prev: Option<&TokenKind> = None;

    for (idx, token) in tokens.iter().enumerate() {
        let next = tokens.get(idx + 1).map(|t| &t.kind);

        match &token.kind {
            TokenKind::Number => {
                if !expect_operand {
                    return Err(FormulaError::MissingOperator {
                        offset: token.offset,
                    });
                }
                expect_operand = false;
            }
            TokenKind::Ident(name) => {
                if !expect_operand {
                    return Err(FormulaError::MissingOperator {
                        offset: token.offset,
                    });
                }
                if next == Some(&TokenKind::LParen) {
                    return Err(FormulaError::FunctionCall { name: name.clone() });
                }
                if !allowed.contains(name) {
                    return Err(FormulaError::UnknownIdentifier { name: name.clone() });
                }
                expect_operand = false;
            }
            TokenKind::Op(op) => {
                if expect_operand {
                    if matches!(prev, Some(TokenKind::Op(_))) {
                        return Err(FormulaError::DoubleOperator {
                            offset: token.offset,
                        });
                    }
                    if !matches!(op, '+' | '-') {
                        return Err(FormulaError::UnexpectedOperator {
                            op: *op,
                            offset: token.offset,
                        });
                    }
                    // Unary sign: still expecting the operand it applies to.
                } else {
                    expect_operand = true;
                }
            }
            TokenKind::LParen => {
                if !expect_operand {
                    return Err(FormulaError::MissingOperator {
                        offset: token.offset,
                    });
                }
                if next == Some(&TokenKind::RParen) {
                    return Err(FormulaError::EmptyParentheses {
                        offset: token.offset,
                    });
                }
                open.push(token.offset);
            }
            TokenKind::RParen => {
                if open.pop().is_none() {
                    return Err(FormulaError::UnmatchedParenthesis {
                        offset: token.offset,
                    });
                }
                if expect_operand {
                    return Err(FormulaError::TrailingOperator);
                }
            }
        }

        prev = Some(&token.kind);
    }

    if let Some(&offset) = open.first() {
        return Err(FormulaError::UnclosedParenthesis { offset });
    }
    if expect_operand {
        return Err(FormulaError::TrailingOperator);
    }

    Ok(())
}
