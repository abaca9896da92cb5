//! Parsers for RFC 4512 subschema definitions (`attributeTypes` and
//! `objectClasses` values).
//!
//! Only the fields the synchronizer needs are extracted; unknown keywords
//! and extensions are skipped.

use std::collections::HashMap;

/// A parsed `attributeTypes` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeTypeDefinition {
    pub oid: String,
    pub names: Vec<String>,
    pub superior: Option<String>,
    /// Syntax OID with any `{length}` bound removed.
    pub syntax: Option<String>,
    pub single_value: bool,
}

impl AttributeTypeDefinition {
    /// The first declared name, or the OID when the type has no name.
    pub fn primary_name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or(&self.oid)
    }
}

/// A parsed `objectClasses` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectClassDefinition {
    pub oid: String,
    pub names: Vec<String>,
    pub superiors: Vec<String>,
    pub must: Vec<String>,
    pub may: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Open,
    Close,
    Dollar,
    Quoted(&'a str),
    Word(&'a str),
}

fn tokenize(definition: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let bytes = definition.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        match bytes[pos] {
            b'(' => {
                tokens.push(Token::Open);
                pos += 1;
            }
            b')' => {
                tokens.push(Token::Close);
                pos += 1;
            }
            b'$' => {
                tokens.push(Token::Dollar);
                pos += 1;
            }
            b'\'' => {
                let start = pos + 1;
                let end = definition[start..]
                    .find('\'')
                    .map(|i| start + i)
                    .unwrap_or(bytes.len());
                tokens.push(Token::Quoted(&definition[start..end]));
                pos = end + 1;
            }
            c if c.is_ascii_whitespace() => pos += 1,
            _ => {
                let start = pos;
                while pos < bytes.len()
                    && !bytes[pos].is_ascii_whitespace()
                    && !matches!(bytes[pos], b'(' | b')' | b'$' | b'\'')
                {
                    pos += 1;
                }
                tokens.push(Token::Word(&definition[start..pos]));
            }
        }
    }

    tokens
}

/// Keyword -> values of one definition, plus its numeric OID.
#[derive(Debug, Default)]
struct RawDefinition {
    oid: String,
    fields: HashMap<String, Vec<String>>,
}

impl RawDefinition {
    fn values(&self, keyword: &str) -> Vec<String> {
        self.fields.get(keyword).cloned().unwrap_or_default()
    }

    fn first(&self, keyword: &str) -> Option<String> {
        self.fields.get(keyword).and_then(|v| v.first().cloned())
    }

    fn flag(&self, keyword: &str) -> bool {
        self.fields.contains_key(keyword)
    }
}

const FLAG_KEYWORDS: &[&str] = &[
    "OBSOLETE",
    "SINGLE-VALUE",
    "COLLECTIVE",
    "NO-USER-MODIFICATION",
    "ABSTRACT",
    "STRUCTURAL",
    "AUXILIARY",
];

fn parse_raw(definition: &str) -> Option<RawDefinition> {
    let tokens = tokenize(definition);
    let mut iter = tokens.into_iter().peekable();

    if iter.next()? != Token::Open {
        return None;
    }
    let oid = match iter.next()? {
        Token::Word(w) => w.to_string(),
        _ => return None,
    };

    let mut raw = RawDefinition {
        oid,
        fields: HashMap::new(),
    };

    while let Some(token) = iter.next() {
        let keyword = match token {
            Token::Close => return Some(raw),
            Token::Word(w) => w.to_ascii_uppercase(),
            // Stray punctuation: tolerate and move on.
            _ => continue,
        };

        if FLAG_KEYWORDS.contains(&keyword.as_str()) {
            raw.fields.insert(keyword, Vec::new());
            continue;
        }

        let mut values = Vec::new();
        match iter.peek() {
            Some(Token::Open) => {
                iter.next();
                for inner in iter.by_ref() {
                    match inner {
                        Token::Close => break,
                        Token::Word(w) | Token::Quoted(w) => values.push(w.to_string()),
                        Token::Dollar | Token::Open => {}
                    }
                }
            }
            Some(Token::Word(w)) | Some(Token::Quoted(w)) => {
                values.push(w.to_string());
                iter.next();
            }
            _ => {}
        }
        raw.fields.insert(keyword, values);
    }

    // Missing closing parenthesis.
    None
}

/// Strip a `{length}` bound from a syntax OID.
pub fn normalize_syntax(syntax: &str) -> String {
    syntax
        .split('{')
        .next()
        .unwrap_or(syntax)
        .trim()
        .to_string()
}

/// Parse one `attributeTypes` value. Returns `None` for malformed input.
pub fn parse_attribute_type(definition: &str) -> Option<AttributeTypeDefinition> {
    let raw = parse_raw(definition)?;
    Some(AttributeTypeDefinition {
        names: raw.values("NAME"),
        superior: raw.first("SUP"),
        syntax: raw
            .first("SYNTAX")
            .map(|s| normalize_syntax(&s))
            .filter(|s| !s.is_empty()),
        single_value: raw.flag("SINGLE-VALUE"),
        oid: raw.oid,
    })
}

/// Parse one `objectClasses` value. Returns `None` for malformed input.
pub fn parse_object_class(definition: &str) -> Option<ObjectClassDefinition> {
    let raw = parse_raw(definition)?;
    Some(ObjectClassDefinition {
        names: raw.values("NAME"),
        superiors: raw.values("SUP"),
        must: raw.values("MUST"),
        may: raw.values("MAY"),
        oid: raw.oid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attribute_type_with_syntax() {
        let def = "( 2.5.4.3 NAME ( 'cn' 'commonName' ) DESC 'RFC4519: common name(s)' \
                   SUP name SYNTAX 1.3.6.1.4.1.1466.115.121.1.15{32768} )";
        let attr = parse_attribute_type(def).unwrap();
        assert_eq!(attr.oid, "2.5.4.3");
        assert_eq!(attr.names, vec!["cn", "commonName"]);
        assert_eq!(attr.superior.as_deref(), Some("name"));
        assert_eq!(
            attr.syntax.as_deref(),
            Some("1.3.6.1.4.1.1466.115.121.1.15")
        );
        assert!(!attr.single_value);
        assert_eq!(attr.primary_name(), "cn");
    }

    #[test]
    fn test_parse_attribute_type_flags() {
        let def = "( 2.5.18.1 NAME 'createTimestamp' EQUALITY generalizedTimeMatch \
                   SYNTAX 1.3.6.1.4.1.1466.115.121.1.24 SINGLE-VALUE NO-USER-MODIFICATION \
                   USAGE directoryOperation )";
        let attr = parse_attribute_type(def).unwrap();
        assert_eq!(attr.names, vec!["createTimestamp"]);
        assert!(attr.single_value);
        assert!(attr.superior.is_none());
    }

    #[test]
    fn test_parse_attribute_type_without_syntax() {
        let def = "( 2.5.4.4 NAME ( 'sn' 'surname' ) SUP name )";
        let attr = parse_attribute_type(def).unwrap();
        assert!(attr.syntax.is_none());
        assert_eq!(attr.superior.as_deref(), Some("name"));
    }

    #[test]
    fn test_parse_object_class() {
        let def = "( 2.5.6.6 NAME 'person' DESC 'RFC2256: a person' SUP top STRUCTURAL \
                   MUST ( sn $ cn ) MAY ( userPassword $ telephoneNumber $ seeAlso $ description ) )";
        let oc = parse_object_class(def).unwrap();
        assert_eq!(oc.names, vec!["person"]);
        assert_eq!(oc.superiors, vec!["top"]);
        assert_eq!(oc.must, vec!["sn", "cn"]);
        assert_eq!(oc.may.len(), 4);
    }

    #[test]
    fn test_parse_object_class_single_must() {
        let def = "( 2.5.6.0 NAME 'top' ABSTRACT MUST objectClass )";
        let oc = parse_object_class(def).unwrap();
        assert_eq!(oc.must, vec!["objectClass"]);
        assert!(oc.may.is_empty());
        assert!(oc.superiors.is_empty());
    }

    #[test]
    fn test_extensions_are_skipped() {
        let def = "( 1.3.6.1.4.1.42.2.27.8.1.17 NAME 'pwdAccountLockedTime' \
                   SYNTAX 1.3.6.1.4.1.1466.115.121.1.24 X-ORIGIN ( 'draft' 'local' ) SINGLE-VALUE )";
        let attr = parse_attribute_type(def).unwrap();
        assert!(attr.single_value);
        assert_eq!(
            attr.syntax.as_deref(),
            Some("1.3.6.1.4.1.1466.115.121.1.24")
        );
    }

    #[test]
    fn test_malformed_definitions() {
        assert!(parse_attribute_type("").is_none());
        assert!(parse_attribute_type("NAME 'cn'").is_none());
        assert!(parse_attribute_type("( 2.5.4.3 NAME 'cn'").is_none());
    }
}
