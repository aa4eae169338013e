//! Line parser for the PJSIP configuration dialect
//!
//! Parsing is permissive: lines that are neither comments, section headers
//! nor `key=value` pairs under an open section are skipped, never rejected.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::section::{SectionBody, SectionKey};

static SECTION_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[([^\]]+)\](?:\(([^)]+)\))?").expect("section header pattern is valid")
});

/// A header whose `(name, template)` key had already been seen and was
/// stored under a suffixed name instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateSection {
    /// 1-based line number of the colliding header
    pub line: usize,
    pub original: SectionKey,
    pub renamed: SectionKey,
}

/// Result of parsing a whole file
#[derive(Debug, Default)]
pub struct ParsedConfig {
    pub sections: HashMap<SectionKey, SectionBody>,
    /// Comment lines immediately preceding each section header
    pub comments: HashMap<SectionKey, Vec<String>>,
    /// Comment lines after the last section header
    pub trailing_comments: Vec<String>,
    pub order: Vec<SectionKey>,
    pub duplicates: Vec<DuplicateSection>,
}

fn is_comment(line: &str) -> bool {
    line.starts_with(';') || line.starts_with('#')
}

/// Parse file content into sections, comments and document order
pub fn parse(content: &str) -> ParsedConfig {
    let mut parsed = ParsedConfig::default();
    let mut current: Option<SectionKey> = None;
    let mut pending_comments: Vec<String> = Vec::new();
    let mut duplicate_counter: HashMap<String, usize> = HashMap::new();

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim_end();

        if line.trim().is_empty() {
            continue;
        }

        if is_comment(line) {
            pending_comments.push(line.to_string());
            continue;
        }

        if let Some(caps) = SECTION_HEADER.captures(line) {
            let name = caps[1].to_string();
            let template = caps.get(2).map(|m| m.as_str());
            let mut key = SectionKey::new(name.clone(), template);

            if parsed.sections.contains_key(&key) {
                let original = key.clone();
                let counter = duplicate_counter.entry(name.clone()).or_insert(1);
                loop {
                    *counter += 1;
                    key = SectionKey::new(format!("{}_{}", name, counter), template);
                    if !parsed.sections.contains_key(&key) {
                        break;
                    }
                }
                parsed.duplicates.push(DuplicateSection {
                    line: index + 1,
                    original,
                    renamed: key.clone(),
                });
            }

            if !parsed.order.contains(&key) {
                parsed.order.push(key.clone());
            }
            parsed.sections.entry(key.clone()).or_default();

            if !pending_comments.is_empty() {
                parsed
                    .comments
                    .insert(key.clone(), std::mem::take(&mut pending_comments));
            }

            current = Some(key);
            continue;
        }

        if let Some(section) = current.as_ref() {
            if let Some((key, value)) = line.split_once('=') {
                if let Some(body) = parsed.sections.get_mut(section) {
                    body.set(key.trim(), value.trim());
                }
            }
        }
    }

    parsed.trailing_comments = pending_comments;
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO_A: &str = "[6001](endpoint-tpl)
context=internal
allow=ulaw,alaw

[6001-auth]
username=6001
password=secret

[6001](aor-tpl)
max_contacts=2
";

    #[test]
    fn test_parse_endpoint_triple() {
        let parsed = parse(SCENARIO_A);

        assert_eq!(
            parsed.order,
            vec![
                SectionKey::templated("6001", "endpoint-tpl"),
                SectionKey::plain("6001-auth"),
                SectionKey::templated("6001", "aor-tpl"),
            ]
        );
        assert_eq!(parsed.sections.len(), 3);

        let endpoint = &parsed.sections[&SectionKey::templated("6001", "endpoint-tpl")];
        assert_eq!(endpoint.get("context"), Some("internal"));
        assert_eq!(endpoint.get("allow"), Some("ulaw,alaw"));

        let aor = &parsed.sections[&SectionKey::templated("6001", "aor-tpl")];
        assert_eq!(aor.get("max_contacts"), Some("2"));
        assert!(parsed.duplicates.is_empty());
    }

    #[test]
    fn test_duplicate_plain_headers_are_suffixed() {
        let parsed = parse("[6001]\ntype=endpoint\n\n[6001]\ntype=aor\n\n[6001]\ntype=auth\n");

        assert_eq!(
            parsed.order,
            vec![
                SectionKey::plain("6001"),
                SectionKey::plain("6001_2"),
                SectionKey::plain("6001_3"),
            ]
        );
        assert_eq!(parsed.sections[&SectionKey::plain("6001_2")].get("type"), Some("aor"));
        assert_eq!(parsed.duplicates.len(), 2);
        assert_eq!(parsed.duplicates[0].line, 4);
        assert_eq!(parsed.duplicates[0].original, SectionKey::plain("6001"));
        assert_eq!(parsed.duplicates[0].renamed, SectionKey::plain("6001_2"));
    }

    #[test]
    fn test_suffix_skips_existing_names() {
        let parsed = parse("[6001]\n[6001_2]\n[6001]\n");
        assert_eq!(
            parsed.order,
            vec![
                SectionKey::plain("6001"),
                SectionKey::plain("6001_2"),
                SectionKey::plain("6001_3"),
            ]
        );
    }

    #[test]
    fn test_comments_attach_to_next_section() {
        let content = "; global settings\n# owned by ops\n[global]\ntype=global\n\n; first phone\n\n[6001](endpoint-tpl)\ncontext=internal\n; dangling\n";
        let parsed = parse(content);

        assert_eq!(
            parsed.comments[&SectionKey::plain("global")],
            vec!["; global settings".to_string(), "# owned by ops".to_string()]
        );
        assert_eq!(
            parsed.comments[&SectionKey::templated("6001", "endpoint-tpl")],
            vec!["; first phone".to_string()]
        );
        assert_eq!(parsed.trailing_comments, vec!["; dangling".to_string()]);
    }

    #[test]
    fn test_blank_lines_are_discarded() {
        let parsed = parse("\n\n   \n[a]\n\nkey=value\n\n\n");
        assert!(parsed.comments.is_empty());
        assert!(parsed.trailing_comments.is_empty());
        assert_eq!(parsed.sections[&SectionKey::plain("a")].get("key"), Some("value"));
    }

    #[test]
    fn test_key_value_before_any_section_is_dropped() {
        let parsed = parse("orphan=1\n[a]\nkey=value\n");
        assert_eq!(parsed.sections.len(), 1);
        assert!(parsed.sections[&SectionKey::plain("a")].get("orphan").is_none());
    }

    #[test]
    fn test_malformed_header_falls_through() {
        let parsed = parse("[a]\n[broken=yes\n[also broken\nkey = spaced value \n");
        let body = &parsed.sections[&SectionKey::plain("a")];

        assert_eq!(parsed.order.len(), 1);
        assert_eq!(body.get("[broken"), Some("yes"));
        assert_eq!(body.get("key"), Some("spaced value"));
        assert_eq!(body.len(), 2);
    }

    #[test]
    fn test_last_assignment_wins() {
        let parsed = parse("[a]\nallow=ulaw\nallow=opus\nvalue=a=b\n");
        let body = &parsed.sections[&SectionKey::plain("a")];
        assert_eq!(body.get("allow"), Some("opus"));
        assert_eq!(body.get("value"), Some("a=b"));
        assert_eq!(body.len(), 2);
    }

    #[test]
    fn test_crlf_line_endings() {
        let parsed = parse("[6001-auth]\r\nusername=6001\r\n");
        assert_eq!(
            parsed.sections[&SectionKey::plain("6001-auth")].get("username"),
            Some("6001")
        );
    }

    #[test]
    fn test_template_definition_header() {
        let parsed = parse("[endpoint-tpl](!)\ntype=endpoint\n");
        assert_eq!(parsed.order, vec![SectionKey::templated("endpoint-tpl", "!")]);
    }
}
