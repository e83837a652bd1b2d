//! Hand-written tokenizer for the expression grammar.
//!
//! Splits an expression (without its `${{ }}` wrapper) into identifiers,
//! dots, brackets, and bracket contents (integers and quoted strings).
//! Integer and string tokens are only legal inside brackets; the lexer
//! rejects everything the grammar has no place for.

use super::ExpressionError;

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Token {
    Ident(String),
    Dot,
    LBracket,
    RBracket,
    Int(i64),
    Str(String),
}

/// Tokenize an expression string.
pub(super) fn tokenize(expr: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut open_brackets = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '.' {
            if tokens.is_empty() {
                return Err(ExpressionError::syntax(
                    expr,
                    i,
                    "expression cannot start with a dot",
                ));
            }
            if matches!(tokens.last(), Some(Token::Dot)) {
                return Err(ExpressionError::syntax(
                    expr,
                    i,
                    "invalid double dot in expression",
                ));
            }
            tokens.push(Token::Dot);
            i += 1;
            continue;
        }

        if c == '[' {
            tokens.push(Token::LBracket);
            open_brackets += 1;
            i += 1;

            // Bracket content: a quoted string key or an integer index.
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            if i >= chars.len() {
                return Err(ExpressionError::syntax(
                    expr,
                    expr.len().saturating_sub(1),
                    "unclosed bracket in expression",
                ));
            }

            let c = chars[i];
            if c == '\'' || c == '"' {
                let quote = c;
                let start = i;
                i += 1;
                let mut content = String::new();
                while i < chars.len() && chars[i] != quote {
                    content.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(ExpressionError::syntax(
                        expr,
                        start,
                        "unterminated string in bracket notation",
                    ));
                }
                tokens.push(Token::Str(content));
                i += 1;
            } else if c.is_ascii_digit()
                || (c == '-' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit())
            {
                let start = i;
                if chars[i] == '-' {
                    i += 1;
                }
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text.parse::<i64>().map_err(|_| {
                    ExpressionError::syntax(expr, start, "integer index out of range")
                })?;
                tokens.push(Token::Int(value));
            } else {
                return Err(ExpressionError::syntax(
                    expr,
                    i,
                    "invalid content in bracket notation",
                ));
            }

            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            continue;
        }

        if c == ']' {
            if open_brackets == 0 {
                return Err(ExpressionError::syntax(expr, i, "unmatched closing bracket"));
            }
            open_brackets -= 1;
            tokens.push(Token::RBracket);
            i += 1;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        return Err(ExpressionError::syntax(
            expr,
            i,
            format!("invalid character '{c}' in expression"),
        ));
    }

    if matches!(tokens.last(), Some(Token::Dot)) {
        return Err(ExpressionError::syntax(
            expr,
            expr.len().saturating_sub(1),
            "expression cannot end with a dot",
        ));
    }
    if open_brackets > 0 {
        return Err(ExpressionError::syntax(
            expr,
            expr.len().saturating_sub(1),
            "unclosed bracket in expression",
        ));
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idents(tokens: &[Token]) -> Vec<String> {
        tokens
            .iter()
            .filter_map(|t| match t {
                Token::Ident(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn tokenizes_dotted_path() {
        let tokens = tokenize("inputs.name").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("inputs".to_string()),
                Token::Dot,
                Token::Ident("name".to_string()),
            ]
        );
    }

    #[test]
    fn tokenizes_negation_keyword_as_ident() {
        let tokens = tokenize("not inputs.dry_run").unwrap();
        assert_eq!(idents(&tokens), vec!["not", "inputs", "dry_run"]);
    }

    #[test]
    fn tokenizes_bracket_index() {
        let tokens = tokenize("item[0]").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("item".to_string()),
                Token::LBracket,
                Token::Int(0),
                Token::RBracket,
            ]
        );
    }

    #[test]
    fn tokenizes_negative_index_and_string_key() {
        let tokens = tokenize("item[-1]['key name']").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("item".to_string()),
                Token::LBracket,
                Token::Int(-1),
                Token::RBracket,
                Token::LBracket,
                Token::Str("key name".to_string()),
                Token::RBracket,
            ]
        );
    }

    #[test]
    fn rejects_leading_dot() {
        let err = tokenize(".name").unwrap_err();
        assert!(err.to_string().contains("cannot start with a dot"));
    }

    #[test]
    fn rejects_double_dot() {
        let err = tokenize("inputs..name").unwrap_err();
        assert!(err.to_string().contains("double dot"));
    }

    #[test]
    fn rejects_trailing_dot() {
        let err = tokenize("inputs.name.").unwrap_err();
        assert!(err.to_string().contains("cannot end with a dot"));
    }

    #[test]
    fn rejects_unterminated_string() {
        let err = tokenize("item['broken]").unwrap_err();
        assert!(err.to_string().contains("unterminated string"));
    }

    #[test]
    fn rejects_unclosed_bracket() {
        let err = tokenize("item[0").unwrap_err();
        assert!(err.to_string().contains("unclosed bracket"));
    }

    #[test]
    fn rejects_unmatched_closing_bracket() {
        let err = tokenize("item]").unwrap_err();
        assert!(err.to_string().contains("unmatched closing bracket"));
    }

    #[test]
    fn rejects_invalid_characters() {
        let err = tokenize("inputs.a + inputs.b").unwrap_err();
        assert!(err.to_string().contains("invalid character '+'"));
    }

    #[test]
    fn rejects_bare_number_in_bracket_position_only() {
        let err = tokenize("42").unwrap_err();
        assert!(err.to_string().contains("invalid character '4'"));
    }
}
