//! search_path rendering and readback checks.

/// Run-time parameter carrying the namespace
pub const SEARCH_PATH: &str = "search_path";

/// Quote an identifier the way Postgres expects (`"` doubled inside).
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// search_path value routing unqualified names to `schema`, falling back to
/// `public` for shared objects such as extensions.
pub fn search_path_for(schema: &str) -> String {
    if schema == "public" {
        quote_ident(schema)
    } else {
        format!("{}, public", quote_ident(schema))
    }
}

/// Does the search_path `readback` name `schema`?
///
/// Quoted entries compare exactly; unquoted entries are case-folded the
/// way the server folds unquoted identifiers.
pub fn search_path_contains(readback: &str, schema: &str) -> bool {
    split_entries(readback).iter().any(|entry| match entry {
        Entry::Quoted(name) => name == schema,
        Entry::Bare(name) => name.to_lowercase() == schema,
    })
}

#[derive(Debug, PartialEq, Eq)]
enum Entry {
    Quoted(String),
    Bare(String),
}

fn split_entries(readback: &str) -> Vec<Entry> {
    let mut entries = Vec::new();
    let mut chars = readback.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',') {
            chars.next();
        }
        let Some(&first) = chars.peek() else { break };

        if first == '"' {
            chars.next();
            let mut name = String::new();
            while let Some(c) = chars.next() {
                if c == '"' {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        name.push('"');
                    } else {
                        break;
                    }
                } else {
                    name.push(c);
                }
            }
            entries.push(Entry::Quoted(name));
        } else {
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                name.push(c);
                chars.next();
            }
            entries.push(Entry::Bare(name.trim().to_string()));
        }
    }

    entries
}
