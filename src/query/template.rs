// Query templates.
//
// A template is the rendered text of the per-chunk SELECT, tokenized into
// literals and `%TAG%` placeholders. Templates are restartable: applying a
// chunk binding never consumes the template, so one template serves every
// chunk of the query.

use std::collections::HashSet;
use std::fmt;

/// One token of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    /// Placeholder tag including the delimiters, e.g. `%CC%`.
    Placeholder(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryTemplate {
    tokens: Vec<Token>,
}

impl QueryTemplate {
    /// Tokenize rendered SQL, splitting out `%TAG%` placeholders. A tag is
    /// a run of uppercase ASCII letters between two percent signs.
    pub fn from_sql(sql: &str) -> Self {
        let mut tokens = Vec::new();
        let mut lit = String::new();
        let bytes = sql.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'%' {
                // Look for the closing '%' of an uppercase tag.
                if let Some(end) = sql[i + 1..].find('%').map(|p| i + 1 + p) {
                    let inner = &sql[i + 1..end];
                    if !inner.is_empty() && inner.bytes().all(|b| b.is_ascii_uppercase()) {
                        if !lit.is_empty() {
                            tokens.push(Token::Literal(std::mem::take(&mut lit)));
                        }
                        tokens.push(Token::Placeholder(sql[i..=end].to_string()));
                        i = end + 1;
                        continue;
                    }
                }
            }
            let ch = sql[i..].chars().next().unwrap_or('\u{fffd}');
            lit.push(ch);
            i += ch.len_utf8();
        }
        if !lit.is_empty() {
            tokens.push(Token::Literal(lit));
        }
        QueryTemplate { tokens }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Distinct placeholder tags referenced by the template.
    pub fn placeholders(&self) -> HashSet<&str> {
        self.tokens
            .iter()
            .filter_map(|t| match t {
                Token::Placeholder(tag) => Some(tag.as_str()),
                Token::Literal(_) => None,
            })
            .collect()
    }

    pub fn has_placeholders(&self) -> bool {
        self.tokens
            .iter()
            .any(|t| matches!(t, Token::Placeholder(_)))
    }

    /// The template text with tags intact.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for t in &self.tokens {
            match t {
                Token::Literal(s) | Token::Placeholder(s) => out.push_str(s),
            }
        }
        out
    }
}

impl fmt::Display for QueryTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::global::{CHUNK_TAG, SUBCHUNK_TAG};

    #[test]
    fn tokenizes_tags() {
        let t = QueryTemplate::from_sql("SELECT * FROM Object_%CC% WHERE x > 5");
        assert_eq!(t.tokens().len(), 3);
        assert_eq!(t.placeholders().len(), 1);
        assert!(t.placeholders().contains(CHUNK_TAG));
        assert_eq!(t.text(), "SELECT * FROM Object_%CC% WHERE x > 5");
    }

    #[test]
    fn percent_literals_stay_literal() {
        let t = QueryTemplate::from_sql("SELECT * FROM T WHERE name LIKE 'a%b%'");
        assert!(!t.has_placeholders());
        assert_eq!(t.text(), "SELECT * FROM T WHERE name LIKE 'a%b%'");
    }

    #[test]
    fn multiple_tags() {
        let t = QueryTemplate::from_sql("SELECT * FROM Object_%CC%_%SS% AS o");
        let tags = t.placeholders();
        assert!(tags.contains(CHUNK_TAG));
        assert!(tags.contains(SUBCHUNK_TAG));
    }
}
