// GraphQL schema scanning
//
// Only root operation types are read; field definitions are hashed as text.

use crate::domain::{ApiType, Operation};
use sha2::{Digest, Sha256};

const ROOT_TYPES: [(&str, &str); 3] = [
    ("Query", "query"),
    ("Mutation", "mutation"),
    ("Subscription", "subscription"),
];

/// A field of a root operation type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootField {
    /// `query`, `mutation` or `subscription`
    pub kind: &'static str,
    pub name: String,
    /// Definition text with whitespace collapsed
    pub definition: String,
}

/// Drop comments and string literals (descriptions)
fn strip_noise(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        if rest.starts_with("\"\"\"") {
            rest = match rest[3..].find("\"\"\"") {
                Some(end) => &rest[3 + end + 3..],
                None => "",
            };
        } else if c == '"' {
            rest = match rest[1..].find(|ch: char| ch == '"' || ch == '\n') {
                Some(end) => &rest[1 + end + 1..],
                None => "",
            };
        } else if c == '#' {
            rest = match rest.find('\n') {
                Some(end) => &rest[end..],
                None => "",
            };
        } else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }
    out
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Bodies of every `type <name> {...}` and `extend type <name> {...}` block
fn type_bodies<'a>(text: &'a str, name: &str) -> Vec<&'a str> {
    let mut bodies = Vec::new();
    let mut offset = 0;
    while let Some(found) = text[offset..].find("type") {
        let start = offset + found;
        offset = start + 4;
        let before_ok = text[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !is_ident_char(c));
        let after = text[offset..].trim_start();
        let name_ok = after.starts_with(name)
            && after[name.len()..]
                .chars()
                .next()
                .map_or(true, |c| !is_ident_char(c));
        if !before_ok || !name_ok {
            continue;
        }
        let Some(open) = text[offset..].find('{') else {
            break;
        };
        let body_start = offset + open + 1;
        let mut depth = 1;
        let mut end = None;
        for (i, c) in text[body_start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(body_start + i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(end) = end else {
            break;
        };
        bodies.push(&text[body_start..end]);
        offset = end + 1;
    }
    bodies
}

/// Split a type body into field definitions (newline or comma at depth 0)
fn field_definitions(body: &str) -> Vec<String> {
    let mut defs = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    for c in body.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            _ => {}
        }
        if depth == 0 && (c == '\n' || c == ',') {
            defs.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    defs.push(current);
    defs.into_iter()
        .map(|d| d.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|d| !d.is_empty())
        .collect()
}

pub fn root_fields(schema: &str) -> Vec<RootField> {
    let cleaned = strip_noise(schema);
    let mut fields = Vec::new();
    for (type_name, kind) in ROOT_TYPES {
        for body in type_bodies(&cleaned, type_name) {
            for definition in field_definitions(body) {
                let name: String = definition.chars().take_while(|c| is_ident_char(*c)).collect();
                if name.is_empty() {
                    continue;
                }
                fields.push(RootField {
                    kind,
                    name,
                    definition,
                });
            }
        }
    }
    fields
}

pub fn extract_operations(schema: &str, document_slug: &str) -> Vec<Operation> {
    root_fields(schema)
        .into_iter()
        .map(|field| {
            let mut hasher = Sha256::new();
            hasher.update(field.definition.as_bytes());
            Operation {
                operation_id: format!("{}-{}", field.kind, field.name),
                api_type: ApiType::Graphql,
                document_slug: document_slug.to_string(),
                method: field.kind.to_string(),
                path: field.name,
                title: None,
                hash: hex::encode(hasher.finalize()),
            }
        })
        .collect()
}
