//! Section keys and bodies of the PJSIP configuration model

use std::fmt;

/// Template suffix carried by endpoint sections (`[6001](endpoint-tpl)`)
pub const ENDPOINT_TEMPLATE: &str = "endpoint-tpl";

/// Template suffix carried by address-of-record sections (`[6001](aor-tpl)`)
pub const AOR_TEMPLATE: &str = "aor-tpl";

/// Identifies one bracketed block of the file.
///
/// Two sections with the same `name` but a different `template` are
/// distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionKey {
    pub name: String,
    pub template: Option<String>,
}

impl SectionKey {
    pub fn new(name: impl Into<String>, template: Option<&str>) -> Self {
        Self {
            name: name.into(),
            template: template.map(str::to_string),
        }
    }

    /// Key without a template suffix
    pub fn plain(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }

    pub fn templated(name: impl Into<String>, template: &str) -> Self {
        Self::new(name, Some(template))
    }

    /// Template definitions are marked `(!)` or `(!,parent)` in Asterisk
    pub fn is_template_definition(&self) -> bool {
        self.template
            .as_deref()
            .map(|t| t.trim_start().starts_with('!'))
            .unwrap_or(false)
    }

    /// Header line as written to disk
    pub fn header(&self) -> String {
        match &self.template {
            Some(template) => format!("[{}]({})", self.name, template),
            None => format!("[{}]", self.name),
        }
    }
}

impl fmt::Display for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.header())
    }
}

/// Ordered `key=value` pairs of a single section.
///
/// Insertion order is the on-disk order; setting an existing key replaces
/// its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionBody {
    entries: Vec<(String, String)>,
}

impl SectionBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Line breaks are dropped so every entry renders as one line
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let mut key = key.into();
        let mut value = value.into();
        key.retain(|c| c != '\r' && c != '\n');
        value.retain(|c| c != '\r' && c != '\n');
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SectionBody {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut body = SectionBody::new();
        for (k, v) in iter {
            body.set(k, v);
        }
        body
    }
}

/// Endpoint ids are restricted to ASCII letters, digits, `_` and `-`
pub fn is_valid_endpoint_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// The three canonical sections making up one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointKeys {
    pub endpoint: SectionKey,
    pub auth: SectionKey,
    pub aor: SectionKey,
}

impl EndpointKeys {
    pub fn for_id(id: &str) -> Self {
        Self {
            endpoint: SectionKey::templated(id, ENDPOINT_TEMPLATE),
            auth: SectionKey::plain(Self::auth_name(id)),
            aor: SectionKey::templated(id, AOR_TEMPLATE),
        }
    }

    /// Name of the auth section referenced by `auth`/`outbound_auth`
    pub fn auth_name(id: &str) -> String {
        format!("{}-auth", id)
    }

    /// Keys in their fixed file sequence: endpoint, auth, aor
    pub fn all(&self) -> [&SectionKey; 3] {
        [&self.endpoint, &self.auth, &self.aor]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_rendering() {
        assert_eq!(SectionKey::plain("6001-auth").header(), "[6001-auth]");
        assert_eq!(
            SectionKey::templated("6001", ENDPOINT_TEMPLATE).header(),
            "[6001](endpoint-tpl)"
        );
    }

    #[test]
    fn test_template_definition_detection() {
        assert!(SectionKey::templated("endpoint-tpl", "!").is_template_definition());
        assert!(SectionKey::templated("aor-tpl", "!,base").is_template_definition());
        assert!(!SectionKey::templated("6001", AOR_TEMPLATE).is_template_definition());
        assert!(!SectionKey::plain("global").is_template_definition());
    }

    #[test]
    fn test_body_set_replaces_in_place() {
        let mut body: SectionBody = [("type", "aor"), ("max_contacts", "1")].into_iter().collect();
        body.set("type", "auth");
        body.set("qualify_frequency", "60");

        let keys: Vec<&str> = body.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["type", "max_contacts", "qualify_frequency"]);
        assert_eq!(body.get("type"), Some("auth"));

        assert_eq!(body.remove("max_contacts"), Some("1".to_string()));
        assert_eq!(body.len(), 2);
        assert!(body.remove("missing").is_none());
    }

    #[test]
    fn test_body_set_drops_line_breaks() {
        let mut body = SectionBody::new();
        body.set("password", "pw123456\n[6666](endpoint-tpl)\r\ncontext=evil");
        assert_eq!(body.get("password"), Some("pw123456[6666](endpoint-tpl)context=evil"));
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn test_endpoint_keys() {
        let keys = EndpointKeys::for_id("6001");
        assert_eq!(keys.endpoint, SectionKey::templated("6001", "endpoint-tpl"));
        assert_eq!(keys.auth, SectionKey::plain("6001-auth"));
        assert_eq!(keys.aor, SectionKey::templated("6001", "aor-tpl"));
    }

    #[test]
    fn test_endpoint_id_charset() {
        assert!(is_valid_endpoint_id("6001"));
        assert!(is_valid_endpoint_id("front_desk-2"));
        assert!(!is_valid_endpoint_id(""));
        assert!(!is_valid_endpoint_id("60 01"));
        assert!(!is_valid_endpoint_id("6001]"));
    }
}
