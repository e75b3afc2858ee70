//! Cache key derivation.
//!
//! A key is a pure function of (query document or persisted id, variables,
//! operation name). The document is canonicalised before hashing so that
//! formatting differences never split the cache.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::error::KeyUnavailable;

/// Prefix shared by every result-cache key; `purge_all` deletes by it.
pub const KEY_PREFIX: &str = "gql_cache_";

/// Opaque identifier of one cached response.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resolves persisted query ids to their documents.
pub trait DocumentLookup: Send + Sync {
    fn document(&self, query_id: &str) -> Option<String>;
}

impl DocumentLookup for HashMap<String, String> {
    fn document(&self, query_id: &str) -> Option<String> {
        self.get(query_id).cloned()
    }
}

/// Derives deterministic cache keys for GraphQL requests.
#[derive(Clone, Default)]
pub struct KeyBuilder {
    documents: Option<Arc<dyn DocumentLookup>>,
}

impl KeyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve persisted query ids through `documents` before keying.
    pub fn with_documents(documents: Arc<dyn DocumentLookup>) -> Self {
        Self {
            documents: Some(documents),
        }
    }

    /// Build the key for a request.
    ///
    /// A persisted id that resolves to a document is keyed by that document,
    /// so id-based and text-based requests for the same query share a key.
    /// An id that does not resolve falls back to the query text when one is
    /// present, and to the id itself otherwise.
    pub fn build_key(
        &self,
        query_id: Option<&str>,
        query: Option<&str>,
        variables: Option<&Value>,
        operation_name: Option<&str>,
    ) -> Result<CacheKey, KeyUnavailable> {
        let query_id = query_id.map(str::trim).filter(|id| !id.is_empty());
        let query = query.filter(|q| !q.trim().is_empty());

        let source = match (query_id, query) {
            (Some(id), query) => {
                let resolved = self.documents.as_ref().and_then(|docs| docs.document(id));
                match (resolved, query) {
                    (Some(document), _) => format!("doc:{}", canonical_query(&document)?),
                    (None, Some(text)) => format!("doc:{}", canonical_query(text)?),
                    (None, None) => format!("id:{id}"),
                }
            }
            (None, Some(text)) => format!("doc:{}", canonical_query(text)?),
            (None, None) => return Err(KeyUnavailable::MissingQuery),
        };

        let variables = canonical_variables(variables)?;
        let operation = operation_name.map(str::trim).unwrap_or_default();

        let material = serde_json::json!([source, variables, operation]).to_string();
        let mut hasher = Sha256::new();
        hasher.update(material.as_bytes());
        Ok(CacheKey(format!("{KEY_PREFIX}{}", hex::encode(hasher.finalize()))))
    }
}

/// Persisted query id of a document: SHA-256 of its canonical form.
pub fn document_id(query: &str) -> Result<String, KeyUnavailable> {
    let mut hasher = Sha256::new();
    hasher.update(canonical_query(query)?.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

// ============================================================================
// Canonical printing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Punctuator,
    Name,
    Number,
    String,
}

impl TokenKind {
    fn is_word(self) -> bool {
        matches!(self, TokenKind::Name | TokenKind::Number)
    }
}

/// Print a GraphQL document with all ignored tokens removed.
///
/// Whitespace, commas, the BOM and comments are dropped; a single space is
/// kept only between two names or numbers. String and block-string tokens are
/// kept verbatim. An anonymous `query { ... }` without variables or
/// directives prints as the `{ ... }` shorthand.
pub fn canonical_query(document: &str) -> Result<String, KeyUnavailable> {
    let tokens = lex(document)?;
    let mut out = String::with_capacity(document.len());
    let mut previous: Option<TokenKind> = None;
    let mut depth = 0usize;

    for (index, &(kind, text)) in tokens.iter().enumerate() {
        if depth == 0 && is_shorthand_query(&tokens, index) {
            continue;
        }
        if kind == TokenKind::Punctuator {
            match text {
                "{" => depth += 1,
                "}" => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
        if previous.is_some_and(TokenKind::is_word) && kind.is_word() {
            out.push(' ');
        }
        out.push_str(text);
        previous = Some(kind);
    }

    if out.is_empty() {
        return Err(KeyUnavailable::EmptyDocument);
    }
    Ok(out)
}

/// `query` opening a definition and followed directly by its selection set.
fn is_shorthand_query(tokens: &[(TokenKind, &str)], index: usize) -> bool {
    let opens_definition = index == 0 || tokens[index - 1] == (TokenKind::Punctuator, "}");
    opens_definition
        && tokens[index] == (TokenKind::Name, "query")
        && tokens.get(index + 1) == Some(&(TokenKind::Punctuator, "{"))
}

fn lex(source: &str) -> Result<Vec<(TokenKind, &str)>, KeyUnavailable> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let start = pos;
        match bytes[pos] {
            b' ' | b'\t' | b'\n' | b'\r' | b',' => pos += 1,
            b'#' => {
                while pos < bytes.len() && bytes[pos] != b'\n' && bytes[pos] != b'\r' {
                    pos += 1;
                }
            }
            b'!' | b'$' | b'&' | b'(' | b')' | b':' | b'=' | b'@' | b'[' | b']' | b'{' | b'|'
            | b'}' => {
                pos += 1;
                tokens.push((TokenKind::Punctuator, &source[start..pos]));
            }
            b'.' => {
                if !source[pos..].starts_with("...") {
                    return Err(KeyUnavailable::syntax(pos, "expected spread `...`"));
                }
                pos += 3;
                tokens.push((TokenKind::Punctuator, &source[start..pos]));
            }
            b'"' => {
                pos = if source[pos..].starts_with("\"\"\"") {
                    scan_block_string(source, pos)?
                } else {
                    scan_string(bytes, pos)?
                };
                tokens.push((TokenKind::String, &source[start..pos]));
            }
            b'-' | b'0'..=b'9' => {
                pos += 1;
                while pos < bytes.len() {
                    let c = bytes[pos];
                    let exponent_sign = (c == b'+' || c == b'-')
                        && matches!(bytes[pos - 1], b'e' | b'E');
                    if c.is_ascii_alphanumeric() || c == b'.' || exponent_sign {
                        pos += 1;
                    } else {
                        break;
                    }
                }
                tokens.push((TokenKind::Number, &source[start..pos]));
            }
            b'_' | b'a'..=b'z' | b'A'..=b'Z' => {
                while pos < bytes.len() && (bytes[pos] == b'_' || bytes[pos].is_ascii_alphanumeric())
                {
                    pos += 1;
                }
                tokens.push((TokenKind::Name, &source[start..pos]));
            }
            _ if source[pos..].starts_with('\u{FEFF}') => pos += '\u{FEFF}'.len_utf8(),
            _ => return Err(KeyUnavailable::syntax(pos, "unexpected character")),
        }
    }

    Ok(tokens)
}

/// Returns the byte offset just past the closing quote.
fn scan_string(bytes: &[u8], open: usize) -> Result<usize, KeyUnavailable> {
    let mut pos = open + 1;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 2,
            b'"' => return Ok(pos + 1),
            b'\n' | b'\r' => break,
            _ => pos += 1,
        }
    }
    Err(KeyUnavailable::syntax(open, "unterminated string"))
}

fn scan_block_string(source: &str, open: usize) -> Result<usize, KeyUnavailable> {
    let mut pos = open + 3;
    while pos < source.len() {
        let rest = &source[pos..];
        if rest.starts_with("\\\"\"\"") {
            pos += 4;
        } else if rest.starts_with("\"\"\"") {
            return Ok(pos + 3);
        } else {
            pos += rest.chars().next().map_or(1, char::len_utf8);
        }
    }
    Err(KeyUnavailable::syntax(open, "unterminated block string"))
}

/// Serialize variables with object keys sorted at every depth.
///
/// Absent, `null` and `{}` variables are equivalent.
pub fn canonical_variables(variables: Option<&Value>) -> Result<String, KeyUnavailable> {
    let value = match variables {
        None | Some(Value::Null) => return Ok("{}".to_string()),
        Some(Value::Object(map)) if map.is_empty() => return Ok("{}".to_string()),
        Some(value) => sorted(value),
    };
    serde_json::to_string(&value).map_err(|err| KeyUnavailable::Variables(err.to_string()))
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, sorted(v))).collect();
            Value::Object(
                ordered
                    .into_iter()
                    .map(|(k, v)| (k.clone(), v))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}
