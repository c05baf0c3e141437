//! # Statement Lexer
//!
//! Splits statement text into literal text, quoted spans, `?` placeholders and `**`
//! column wildcards. Quoted spans are copied through untouched so a `?` inside a string
//! literal or quoted identifier is never treated as a placeholder.

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Text(&'a str),
    /// A `'...'`, `"..."` or `` `...` `` span including its delimiters.
    Quoted(&'a str),
    Placeholder,
    Wildcard,
}

/// Tokenises `query`, preserving the original order and text.
///
/// A doubled quote (`'it''s'`) lexes as two adjacent quoted spans. Backslash escapes are
/// not interpreted.
pub fn lex(query: &str) -> Result<Vec<Token<'_>>, Error> {
    let bytes = query.as_bytes();
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let (token, end) = match bytes[i] {
            b'?' => (Token::Placeholder, i + 1),
            b'*' if bytes.get(i + 1) == Some(&b'*') => (Token::Wildcard, i + 2),
            quote @ (b'\'' | b'"' | b'`') => {
                let close = bytes[i + 1..]
                    .iter()
                    .position(|&b| b == quote)
                    .ok_or(Error::UnterminatedQuote { quote: quote as char, position: i })?;
                let end = i + 1 + close + 1;
                (Token::Quoted(&query[i..end]), end)
            }
            _ => {
                i += 1;
                continue;
            }
        };

        if text_start < i {
            tokens.push(Token::Text(&query[text_start..i]));
        }
        tokens.push(token);
        i = end;
        text_start = end;
    }

    if text_start < bytes.len() {
        tokens.push(Token::Text(&query[text_start..]));
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use Token::*;

    #[test]
    fn splits_placeholders_and_wildcards() {
        let tokens = lex("SELECT ** FROM users WHERE id = ? AND age > ?").unwrap();
        assert_eq!(
            tokens,
            [
                Text("SELECT "),
                Wildcard,
                Text(" FROM users WHERE id = "),
                Placeholder,
                Text(" AND age > "),
                Placeholder,
            ]
        );
    }

    #[test]
    fn single_star_is_text() {
        assert_eq!(lex("SELECT * FROM t").unwrap(), [Text("SELECT * FROM t")]);
        assert_eq!(lex("SELECT COUNT(*) FROM t").unwrap(), [Text("SELECT COUNT(*) FROM t")]);
    }

    #[test]
    fn quoted_spans_are_opaque() {
        let tokens = lex(r#"SELECT '?', "a?b", `**` FROM t WHERE x = ?"#).unwrap();
        assert_eq!(
            tokens,
            [
                Text("SELECT "),
                Quoted("'?'"),
                Text(", "),
                Quoted(r#""a?b""#),
                Text(", "),
                Quoted("`**`"),
                Text(" FROM t WHERE x = "),
                Placeholder,
            ]
        );
    }

    #[test]
    fn doubled_quotes_lex_as_adjacent_spans() {
        let tokens = lex("SELECT 'it''s ?'").unwrap();
        assert_eq!(tokens, [Text("SELECT "), Quoted("'it'"), Quoted("'s ?'")]);
    }

    #[test]
    fn backslashes_are_not_escapes() {
        let tokens = lex(r"SELECT 'a\' = ?").unwrap();
        assert_eq!(tokens, [Text("SELECT "), Quoted(r"'a\'"), Text(" = "), Placeholder]);
    }

    #[test]
    fn unterminated_quote_fails() {
        let err = lex("SELECT 'oops ?").unwrap_err();
        assert!(matches!(err, Error::UnterminatedQuote { quote: '\'', position: 7 }), "{err:?}");
    }

    #[test]
    fn handles_multibyte_text() {
        let tokens = lex("SELECT 'héllo' AS ünïcode, ?").unwrap();
        assert_eq!(tokens, [Text("SELECT "), Quoted("'héllo'"), Text(" AS ünïcode, "), Placeholder]);
        assert!(lex("").unwrap().is_empty());
    }
}
