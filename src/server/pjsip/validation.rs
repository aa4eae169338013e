//! Payload validation before endpoints reach the store
//!
//! Errors block the operation, warnings are informational only.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::models::{option_value, EndpointCreate, EndpointPayload, EndpointUpdate, FieldMap, ValidationResult};

use super::schema::{OptionSchema, SectionKind};
use super::section::is_valid_endpoint_id;

const MAX_ID_LEN: usize = 50;

const MIN_PASSWORD_LEN: usize = 8;

/// Codecs accepted without a warning
const KNOWN_CODECS: &[&str] = &[
    "all", "ulaw", "alaw", "g722", "g729", "gsm", "opus", "ilbc", "speex", "g726", "slin", "h264",
    "vp8",
];

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("validation pattern is valid")
}

static TOKEN: LazyLock<Regex> = LazyLock::new(|| pattern(r"^[a-zA-Z0-9_-]+$"));
static CALLERID: LazyLock<Regex> = LazyLock::new(|| pattern(r#"^[\w <>@."+-]{1,100}$"#));
static LANGUAGE: LazyLock<Regex> = LazyLock::new(|| pattern(r"^[a-z]{2}(_[A-Z]{2})?$"));
static DOMAIN: LazyLock<Regex> = LazyLock::new(|| pattern(r"^[a-zA-Z0-9.-]+$"));
static CODEC_LIST: LazyLock<Regex> = LazyLock::new(|| pattern(r"^[a-z0-9_,]+$"));
static FEATURE: LazyLock<Regex> = LazyLock::new(|| pattern(r"^[a-zA-Z0-9_]+$"));
static GROUP_LIST: LazyLock<Regex> = LazyLock::new(|| pattern(r"^[0-9,-]*$"));
static MAILBOXES: LazyLock<Regex> = LazyLock::new(|| pattern(r"^[\w@,.-]*$"));
static EXTENSION: LazyLock<Regex> = LazyLock::new(|| pattern(r"^[\w*#]*$"));
static USERNAME: LazyLock<Regex> = LazyLock::new(|| pattern(r"^[a-zA-Z0-9_@.-]{1,50}$"));

enum Rule {
    Bool,
    Integer { min: i64, max: i64 },
    OneOf(&'static [&'static str]),
    Pattern(&'static LazyLock<Regex>),
    MaxLen(usize),
}

/// (group, field, rule); the empty group means a flat endpoint field
static FIELD_RULES: &[(&str, &str, Rule)] = &[
    ("", "context", Rule::Pattern(&TOKEN)),
    ("", "callerid", Rule::Pattern(&CALLERID)),
    ("", "accountcode", Rule::MaxLen(80)),
    ("", "language", Rule::Pattern(&LANGUAGE)),
    ("transport_network", "transport", Rule::Pattern(&TOKEN)),
    ("transport_network", "force_rport", Rule::Bool),
    ("transport_network", "rewrite_contact", Rule::Bool),
    ("transport_network", "rtp_symmetric", Rule::Bool),
    ("transport_network", "from_domain", Rule::Pattern(&DOMAIN)),
    ("audio_media", "disallow", Rule::Pattern(&CODEC_LIST)),
    ("audio_media", "direct_media", Rule::Bool),
    ("audio_media", "dtmf_mode", Rule::OneOf(&["rfc4733", "inband", "info", "auto", "auto_info", "none"])),
    ("rtp", "media_encryption", Rule::OneOf(&["no", "sdes", "dtls"])),
    ("rtp", "ice_support", Rule::Bool),
    ("rtp", "use_avpf", Rule::Bool),
    ("rtp", "rtp_timeout", Rule::Integer { min: 0, max: 3600 }),
    ("recording", "record_on_feature", Rule::Pattern(&FEATURE)),
    ("recording", "record_off_feature", Rule::Pattern(&FEATURE)),
    ("call", "call_group", Rule::Pattern(&GROUP_LIST)),
    ("call", "pickup_group", Rule::Pattern(&GROUP_LIST)),
    ("call", "device_state_busy_at", Rule::Integer { min: 0, max: 100 }),
    ("call", "trust_id_inbound", Rule::Bool),
    ("call", "send_pai", Rule::Bool),
    ("presence", "allow_subscribe", Rule::Bool),
    ("presence", "subscribe_context", Rule::Pattern(&TOKEN)),
    ("voicemail", "mailboxes", Rule::Pattern(&MAILBOXES)),
    ("voicemail", "voicemail_extension", Rule::Pattern(&EXTENSION)),
    ("auth", "auth_type", Rule::OneOf(&["userpass", "md5"])),
    ("auth", "username", Rule::Pattern(&USERNAME)),
    ("auth", "password", Rule::MaxLen(128)),
    ("aor", "max_contacts", Rule::Integer { min: 1, max: 10 }),
    ("aor", "remove_existing", Rule::Bool),
    ("aor", "qualify_frequency", Rule::Integer { min: 0, max: 86400 }),
    ("aor", "default_expiration", Rule::Integer { min: 60, max: 86400 }),
    ("aor", "minimum_expiration", Rule::Integer { min: 1, max: 86400 }),
    ("aor", "maximum_expiration", Rule::Integer { min: 60, max: 86400 }),
];

const BOOL_WORDS: &[&str] = &["yes", "no", "true", "false", "on", "off", "1", "0"];

/// Validate a create payload.
///
/// `exists` surfaces an already-present endpoint as a warning; the add
/// itself rejects duplicates independently.
pub fn validate_create(request: &EndpointCreate, schema: &OptionSchema, exists: bool) -> ValidationResult {
    let mut result = ValidationResult::default();
    let id = request.id.trim();

    if id.is_empty() {
        result.errors.push("id is required".to_string());
    } else {
        if id.len() > MAX_ID_LEN {
            result
                .errors
                .push(format!("id must be at most {} characters", MAX_ID_LEN));
        }
        if !is_valid_endpoint_id(id) {
            result
                .errors
                .push("id may only contain letters, digits, '_' and '-'".to_string());
        }
    }

    if exists {
        result.warnings.push(format!("Endpoint {} already exists", id));
    }

    let auth = request.auth();
    match auth.and_then(|a| a.get("username")).and_then(option_value) {
        Some(username) if !username.is_empty() => {}
        _ => result.errors.push("auth.username is required".to_string()),
    }
    match auth.and_then(|a| a.get("password")).and_then(option_value) {
        Some(password) if password.chars().count() >= MIN_PASSWORD_LEN => {}
        Some(password) if !password.is_empty() => result
            .errors
            .push(format!("auth.password must be at least {} characters", MIN_PASSWORD_LEN)),
        _ => result.errors.push("auth.password is required".to_string()),
    }
    if request
        .aor()
        .and_then(|a| a.get("max_contacts"))
        .and_then(option_value)
        .filter(|v| !v.is_empty())
        .is_none()
    {
        result.errors.push("aor.max_contacts is required".to_string());
    }

    check_payload(request, schema, &mut result);
    if request.fields.contains_key("outbound_auth") {
        result
            .warnings
            .push("outbound_auth is managed automatically and will be ignored".to_string());
    }

    result.valid = result.errors.is_empty();
    result
}

/// Validate the field values of an update payload
pub fn validate_update(request: &EndpointUpdate, schema: &OptionSchema) -> ValidationResult {
    let mut result = ValidationResult::default();

    if let Some(new_id) = request.new_id.as_deref().map(str::trim) {
        if new_id.len() > MAX_ID_LEN || !is_valid_endpoint_id(new_id) {
            result.errors.push(format!("new_id {:?} is not a valid endpoint id", new_id));
        }
    }

    // A password can be replaced, never removed
    match request.auth().and_then(|a| a.get("password")).and_then(option_value) {
        Some(password) if password.is_empty() => {
            result.errors.push("auth.password cannot be removed".to_string());
        }
        Some(password) if password.chars().count() < MIN_PASSWORD_LEN => result
            .errors
            .push(format!("auth.password must be at least {} characters", MIN_PASSWORD_LEN)),
        _ => {}
    }

    check_payload(request, schema, &mut result);
    for field in ["auth", "outbound_auth", "aors"] {
        if request.fields.contains_key(field) {
            result
                .warnings
                .push(format!("{} is managed automatically and will be ignored", field));
        }
    }

    result.valid = result.errors.is_empty();
    result
}

fn check_payload(payload: &impl EndpointPayload, schema: &OptionSchema, result: &mut ValidationResult) {
    if let Some(auth) = payload.auth() {
        check_group("auth", auth, SectionKind::Auth, schema, result);
    }
    if let Some(aor) = payload.aor() {
        check_group("aor", aor, SectionKind::Aor, schema, result);
    }
    for (group, fields) in payload.endpoint_groups() {
        check_group(group, fields, SectionKind::Endpoint, schema, result);
    }
    check_group("", payload.fields(), SectionKind::Endpoint, schema, result);
}

fn check_group(group: &str, fields: &FieldMap, kind: SectionKind, schema: &OptionSchema, result: &mut ValidationResult) {
    for (name, value) in fields {
        let path = if group.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", group, name)
        };

        if name == "id" && group.is_empty() {
            continue;
        }

        if value.is_object() {
            result.errors.push(format!("{} must be a scalar value", path));
            continue;
        }

        if !is_safe_option_name(name) {
            result.errors.push(format!("{:?} is not a valid option name", path));
            continue;
        }

        if !schema.contains(kind, name) {
            result
                .warnings
                .push(format!("Unknown option {} will be ignored", path));
        }

        let Some(text) = option_value(value) else {
            continue;
        };

        if text.chars().any(char::is_control) {
            result.errors.push(format!("{} must not contain control characters", path));
            continue;
        }

        if name == "allow" {
            check_codecs(&path, &text, result);
        }

        if let Some(rule) = rule_for(group, name) {
            if let Some(message) = check_rule(rule, value, &text) {
                result.errors.push(format!("{} {}", path, message));
            }
        }
    }
}

/// A name that renders as a plain `key=value` line
fn is_safe_option_name(name: &str) -> bool {
    !name.trim().is_empty()
        && !name.starts_with([';', '#'])
        && !name.contains(['=', '[', ']'])
        && !name.chars().any(char::is_control)
}

/// Rules are looked up by group first, then by flat field name so a field
/// keeps its constraint whether it is sent grouped or flat.
fn rule_for(group: &str, name: &str) -> Option<&'static Rule> {
    FIELD_RULES
        .iter()
        .find(|(g, f, _)| *g == group && *f == name)
        .or_else(|| {
            if matches!(group, "auth" | "aor") {
                return None;
            }
            FIELD_RULES
                .iter()
                .find(|(g, f, _)| *f == name && !matches!(*g, "auth" | "aor"))
        })
        .map(|(_, _, rule)| rule)
}

fn check_rule(rule: &Rule, value: &Value, text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }

    match rule {
        Rule::Bool => {
            let ok = value.is_boolean() || BOOL_WORDS.contains(&text.to_ascii_lowercase().as_str());
            (!ok).then(|| "must be a boolean (yes/no)".to_string())
        }
        Rule::Integer { min, max } => match text.parse::<i64>() {
            Ok(n) if n >= *min && n <= *max => None,
            Ok(_) => Some(format!("must be between {} and {}", min, max)),
            Err(_) => Some("must be an integer".to_string()),
        },
        Rule::OneOf(allowed) => (!allowed.contains(&text.to_ascii_lowercase().as_str()))
            .then(|| format!("must be one of: {}", allowed.join(", "))),
        Rule::Pattern(re) => (!re.is_match(text)).then(|| "has an invalid format".to_string()),
        Rule::MaxLen(max) => {
            (text.chars().count() > *max).then(|| format!("must be at most {} characters", max))
        }
    }
}

/// Malformed codec names are errors; well-formed but unknown ones only warn
fn check_codecs(path: &str, list: &str, result: &mut ValidationResult) {
    for codec in list.split(',').map(str::trim) {
        let name = codec.strip_prefix('!').unwrap_or(codec).to_ascii_lowercase();
        let well_formed = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !well_formed {
            result.errors.push(format!("{} contains invalid codec {:?}", path, codec));
        } else if !KNOWN_CODECS.contains(&name.as_str()) {
            result
                .warnings
                .push(format!("{} codec {} is not in the supported list", path, name));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> OptionSchema {
        OptionSchema::bundled().unwrap()
    }

    fn create(value: serde_json::Value) -> EndpointCreate {
        serde_json::from_value(value).unwrap()
    }

    fn minimal() -> serde_json::Value {
        json!({
            "id": "6002",
            "auth": {"username": "6002", "password": "pw12345678"},
            "aor": {"max_contacts": 3}
        })
    }

    #[test]
    fn test_minimal_payload_is_valid() {
        let result = validate_create(&create(minimal()), &schema(), false);
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_required_fields() {
        let result = validate_create(&create(json!({"id": ""})), &schema(), false);
        assert!(!result.valid);
        assert!(result.errors.contains(&"id is required".to_string()));
        assert!(result.errors.contains(&"auth.username is required".to_string()));
        assert!(result.errors.contains(&"auth.password is required".to_string()));
        assert!(result.errors.contains(&"aor.max_contacts is required".to_string()));
    }

    #[test]
    fn test_id_charset_and_length() {
        let mut payload = minimal();
        payload["id"] = json!("bad id!");
        let result = validate_create(&create(payload), &schema(), false);
        assert!(!result.valid);

        let mut payload = minimal();
        payload["id"] = json!("x".repeat(51));
        let result = validate_create(&create(payload), &schema(), false);
        assert!(result.errors.iter().any(|e| e.contains("at most 50")));
    }

    #[test]
    fn test_short_password() {
        let mut payload = minimal();
        payload["auth"]["password"] = json!("short");
        let result = validate_create(&create(payload), &schema(), false);
        assert!(result
            .errors
            .contains(&"auth.password must be at least 8 characters".to_string()));
    }

    #[test]
    fn test_max_contacts_bounds() {
        let mut payload = minimal();
        payload["aor"]["max_contacts"] = json!(11);
        let result = validate_create(&create(payload), &schema(), false);
        assert!(result
            .errors
            .contains(&"aor.max_contacts must be between 1 and 10".to_string()));

        let mut payload = minimal();
        payload["aor"]["max_contacts"] = json!("many");
        let result = validate_create(&create(payload), &schema(), false);
        assert!(result.errors.contains(&"aor.max_contacts must be an integer".to_string()));
    }

    #[test]
    fn test_existing_endpoint_is_a_warning() {
        let result = validate_create(&create(minimal()), &schema(), true);
        assert!(result.valid);
        assert_eq!(result.warnings, vec!["Endpoint 6002 already exists".to_string()]);
    }

    #[test]
    fn test_group_rules() {
        let mut payload = minimal();
        payload["audio_media"] = json!({"dtmf_mode": "beeps", "direct_media": "maybe"});
        payload["rtp"] = json!({"rtp_timeout": 7200});
        payload["transport_network"] = json!({"force_rport": true});
        let result = validate_create(&create(payload), &schema(), false);

        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.starts_with("audio_media.dtmf_mode must be one of")));
        assert!(result.errors.iter().any(|e| e.starts_with("audio_media.direct_media must be a boolean")));
        assert!(result.errors.iter().any(|e| e == "rtp.rtp_timeout must be between 0 and 3600"));
        assert_eq!(result.errors.len(), 3);
    }

    #[test]
    fn test_flat_field_uses_group_rule() {
        let mut payload = minimal();
        payload["dtmf_mode"] = json!("beeps");
        let result = validate_create(&create(payload), &schema(), false);
        assert!(result.errors.iter().any(|e| e.starts_with("dtmf_mode must be one of")));
    }

    #[test]
    fn test_codec_whitelist() {
        let mut payload = minimal();
        payload["audio_media"] = json!({"allow": ["ulaw", "amr"]});
        let result = validate_create(&create(payload), &schema(), false);
        assert!(result.valid);
        assert!(result.warnings.iter().any(|w| w.contains("amr")));

        let mut payload = minimal();
        payload["audio_media"] = json!({"allow": "ulaw,,g7 29"});
        let result = validate_create(&create(payload), &schema(), false);
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn test_unknown_option_warns() {
        let mut payload = minimal();
        payload["colour"] = json!("blue");
        let result = validate_create(&create(payload), &schema(), false);
        assert!(result.valid);
        assert!(result.warnings.contains(&"Unknown option colour will be ignored".to_string()));
    }

    #[test]
    fn test_nested_object_is_an_error() {
        let mut payload = minimal();
        payload["call"] = json!({"call_group": {"a": 1}});
        let result = validate_create(&create(payload), &schema(), false);
        assert!(result.errors.contains(&"call.call_group must be a scalar value".to_string()));
    }

    #[test]
    fn test_line_breaks_in_values_are_rejected() {
        let mut payload = minimal();
        payload["auth"]["password"] = json!("pw123456\n[6666](endpoint-tpl)\ncontext=evil");
        payload["callerid"] = json!("Front Desk\r\n<6002>");
        let result = validate_create(&create(payload), &schema(), false);

        assert!(!result.valid);
        assert!(result
            .errors
            .contains(&"auth.password must not contain control characters".to_string()));
        assert!(result
            .errors
            .contains(&"callerid must not contain control characters".to_string()));
    }

    #[test]
    fn test_unsafe_option_names_are_rejected() {
        let mut payload = minimal();
        payload["[x]y"] = json!("1");
        payload["call"] = json!({"; note": "1", "a=b": "2"});
        let result = validate_create(&create(payload), &schema(), false);

        assert!(!result.valid);
        assert_eq!(result.errors.len(), 3, "{:?}", result.errors);
        assert!(result.errors.contains(&"\"[x]y\" is not a valid option name".to_string()));
    }

    #[test]
    fn test_update_password_rules() {
        let short: EndpointUpdate = serde_json::from_value(json!({"auth": {"password": "x"}})).unwrap();
        let result = validate_update(&short, &schema());
        assert!(!result.valid);
        assert_eq!(result.errors, vec!["auth.password must be at least 8 characters".to_string()]);

        let removed: EndpointUpdate = serde_json::from_value(json!({"auth": {"password": ""}})).unwrap();
        let result = validate_update(&removed, &schema());
        assert_eq!(result.errors, vec!["auth.password cannot be removed".to_string()]);

        let untouched: EndpointUpdate =
            serde_json::from_value(json!({"auth": {"password": null, "realm": "office"}})).unwrap();
        assert!(validate_update(&untouched, &schema()).valid);

        let replaced: EndpointUpdate =
            serde_json::from_value(json!({"auth": {"password": "longenough"}})).unwrap();
        assert!(validate_update(&replaced, &schema()).valid);
    }

    #[test]
    fn test_update_validation() {
        let update: EndpointUpdate = serde_json::from_value(json!({
            "new_id": "bad id",
            "aor": {"max_contacts": 0},
            "aors": "elsewhere"
        }))
        .unwrap();
        let result = validate_update(&update, &schema());

        assert!(!result.valid);
        assert_eq!(result.errors.len(), 2);
        assert!(result.warnings.iter().any(|w| w.starts_with("aors is managed")));
    }
}
