use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Loosely typed option overrides as received over HTTP
pub type FieldMap = serde_json::Map<String, Value>;

/// Organizational groups whose fields all live in the endpoint section
pub const ENDPOINT_GROUPS: [&str; 7] = [
    "transport_network",
    "audio_media",
    "rtp",
    "recording",
    "call",
    "presence",
    "voicemail",
];

/// Convert a JSON payload value to the string form stored in the file.
///
/// `null` and objects mean "not provided". Booleans become `yes`/`no`
/// and arrays are joined with commas (`["ulaw","alaw"]` -> `ulaw,alaw`).
pub fn option_value(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Object(_) => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Bool(b) => Some(if *b { "yes" } else { "no" }.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(option_value)
                .filter(|v| !v.is_empty())
                .collect::<Vec<_>>()
                .join(","),
        ),
    }
}

/// Accessors shared by the create and update payloads
pub trait EndpointPayload {
    fn auth(&self) -> Option<&FieldMap>;
    fn aor(&self) -> Option<&FieldMap>;
    /// Named groups flattened into the endpoint section
    fn endpoint_groups(&self) -> Vec<(&'static str, &FieldMap)>;
    /// Top-level scalar fields
    fn fields(&self) -> &FieldMap;

    /// All endpoint-section overrides; flat fields win over grouped ones
    fn endpoint_overrides(&self) -> FieldMap {
        let mut merged = FieldMap::new();
        for (_, group) in self.endpoint_groups() {
            for (name, value) in group {
                merged.insert(name.clone(), value.clone());
            }
        }
        for (name, value) in self.fields() {
            merged.insert(name.clone(), value.clone());
        }
        merged
    }
}

macro_rules! endpoint_payload {
    ($name:ident) => {
        impl EndpointPayload for $name {
            fn auth(&self) -> Option<&FieldMap> {
                self.auth.as_ref()
            }

            fn aor(&self) -> Option<&FieldMap> {
                self.aor.as_ref()
            }

            fn endpoint_groups(&self) -> Vec<(&'static str, &FieldMap)> {
                [
                    ("transport_network", &self.transport_network),
                    ("audio_media", &self.audio_media),
                    ("rtp", &self.rtp),
                    ("recording", &self.recording),
                    ("call", &self.call),
                    ("presence", &self.presence),
                    ("voicemail", &self.voicemail),
                ]
                .into_iter()
                .filter_map(|(name, group)| group.as_ref().map(|g| (name, g)))
                .collect()
            }

            fn fields(&self) -> &FieldMap {
                &self.fields
            }
        }
    };
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointCreate {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aor: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_network: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_media: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtp: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voicemail: Option<FieldMap>,
    /// Flat endpoint option overrides
    #[serde(flatten)]
    pub fields: FieldMap,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointUpdate {
    /// Rename the endpoint addressed by the request path to this id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aor: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_network: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_media: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtp: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voicemail: Option<FieldMap>,
    #[serde(flatten)]
    pub fields: FieldMap,
}

endpoint_payload!(EndpointCreate);
endpoint_payload!(EndpointUpdate);

/// Schema-complete view of one endpoint: every declared option carries
/// either its stored value or the schema default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointView {
    pub id: String,
    pub endpoint: BTreeMap<String, String>,
    pub auth: BTreeMap<String, String>,
    pub aor: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Asterisk-side existence probe result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointValidation {
    pub endpoint_id: String,
    pub exists: bool,
    pub available: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_option_value_conversion() {
        assert_eq!(option_value(&json!("internal")), Some("internal".to_string()));
        assert_eq!(option_value(&json!(3)), Some("3".to_string()));
        assert_eq!(option_value(&json!(true)), Some("yes".to_string()));
        assert_eq!(option_value(&json!(false)), Some("no".to_string()));
        assert_eq!(option_value(&json!(["ulaw", "alaw"])), Some("ulaw,alaw".to_string()));
        assert_eq!(option_value(&json!(null)), None);
        assert_eq!(option_value(&json!({"a": 1})), None);
    }

    #[test]
    fn test_create_payload_splits_groups_and_flat_fields() {
        let payload: EndpointCreate = serde_json::from_value(json!({
            "id": "6002",
            "context": "sales",
            "auth": {"username": "6002", "password": "pw12345"},
            "aor": {"max_contacts": 3},
            "audio_media": {"allow": "opus", "dtmf_mode": "info"}
        }))
        .unwrap();

        assert_eq!(payload.id, "6002");
        assert_eq!(payload.fields.len(), 1);
        assert_eq!(payload.fields["context"], json!("sales"));
        assert_eq!(payload.auth().unwrap()["password"], json!("pw12345"));
        assert_eq!(payload.endpoint_groups().len(), 1);

        let merged = payload.endpoint_overrides();
        assert_eq!(merged["allow"], json!("opus"));
        assert_eq!(merged["context"], json!("sales"));
    }

    #[test]
    fn test_flat_fields_override_groups() {
        let payload: EndpointUpdate = serde_json::from_value(json!({
            "new_id": "6003",
            "allow": "ulaw",
            "audio_media": {"allow": "opus"}
        }))
        .unwrap();

        assert_eq!(payload.new_id.as_deref(), Some("6003"));
        assert_eq!(payload.endpoint_overrides()["allow"], json!("ulaw"));
        assert!(!payload.fields.contains_key("new_id"));
    }
}
