//! In-memory model of one PJSIP configuration file

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::models::{option_value, EndpointCreate, EndpointPayload, EndpointUpdate, EndpointView, FieldMap};
use crate::server::backup::BackupService;

use super::parser::{self, DuplicateSection};
use super::schema::{OptionDef, OptionSchema, SectionKind};
use super::section::{
    is_valid_endpoint_id, EndpointKeys, SectionBody, SectionKey, AOR_TEMPLATE, ENDPOINT_TEMPLATE,
};
use super::{ConfigError, EndpointError};

/// Endpoint fields rewritten on rename when they hold the old id
const SELF_REFERENCE_FIELDS: [&str; 2] = ["accountcode", "from_user"];

/// Cross-reference fields maintained by the store, never by callers
const STRUCTURAL_FIELDS: [&str; 3] = ["auth", "outbound_auth", "aors"];

/// Which canonical sections of an endpoint are present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSections {
    pub keys: EndpointKeys,
    pub endpoint: bool,
    pub auth: bool,
    pub aor: bool,
}

impl EndpointSections {
    /// An endpoint exists when its endpoint section does
    pub fn exists(&self) -> bool {
        self.endpoint
    }

    pub fn present(&self) -> Vec<&SectionKey> {
        let mut keys = Vec::new();
        if self.endpoint {
            keys.push(&self.keys.endpoint);
        }
        if self.auth {
            keys.push(&self.keys.auth);
        }
        if self.aor {
            keys.push(&self.keys.aor);
        }
        keys
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    schema: Arc<OptionSchema>,
    sections: HashMap<SectionKey, SectionBody>,
    comments: HashMap<SectionKey, Vec<String>>,
    trailing_comments: Vec<String>,
    order: Vec<SectionKey>,
    duplicates: Vec<DuplicateSection>,
}

impl ConfigStore {
    /// Read and parse `path`. A missing file yields an empty store.
    pub async fn load(path: impl AsRef<Path>, schema: Arc<OptionSchema>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Config file {:?} does not exist", path);
                String::new()
            }
            Err(e) => {
                tracing::error!("Failed to read config {:?}: {}", path, e);
                return Err(e.into());
            }
        };

        Ok(Self::from_content(path, schema, &content))
    }

    pub fn from_content(path: impl Into<PathBuf>, schema: Arc<OptionSchema>, content: &str) -> Self {
        let parsed = parser::parse(content);

        for duplicate in &parsed.duplicates {
            tracing::warn!(
                line = duplicate.line,
                original = %duplicate.original,
                renamed = %duplicate.renamed,
                "Duplicate section renamed"
            );
        }
        tracing::debug!(sections = parsed.sections.len(), "Parsed PJSIP configuration");

        Self {
            path: path.into(),
            schema,
            sections: parsed.sections,
            comments: parsed.comments,
            trailing_comments: parsed.trailing_comments,
            order: parsed.order,
            duplicates: parsed.duplicates,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn section(&self, key: &SectionKey) -> Option<&SectionBody> {
        self.sections.get(key)
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn order(&self) -> &[SectionKey] {
        &self.order
    }

    pub fn comments(&self, key: &SectionKey) -> Option<&[String]> {
        self.comments.get(key).map(Vec::as_slice)
    }

    pub fn trailing_comments(&self) -> &[String] {
        &self.trailing_comments
    }

    /// Sections renamed while parsing because their key was already taken
    pub fn duplicates(&self) -> &[DuplicateSection] {
        &self.duplicates
    }

    // ============== Lookup ==============

    pub fn resolve_endpoint(&self, id: &str) -> EndpointSections {
        let keys = EndpointKeys::for_id(id);
        EndpointSections {
            endpoint: self.sections.contains_key(&keys.endpoint),
            auth: self.sections.contains_key(&keys.auth),
            aor: self.sections.contains_key(&keys.aor),
            keys,
        }
    }

    pub fn endpoint_exists(&self, id: &str) -> bool {
        self.resolve_endpoint(id).exists()
    }

    /// Schema-complete views of every endpoint, in file order
    pub fn list_endpoints(&self) -> Vec<EndpointView> {
        self.document_keys()
            .into_iter()
            .filter_map(|key| {
                let body = self.sections.get(key)?;
                is_endpoint_section(key, body).then(|| self.endpoint_view(key, body))
            })
            .collect()
    }

    pub fn get_endpoint(&self, id: &str) -> Option<EndpointView> {
        self.list_endpoints().into_iter().find(|view| view.id == id)
    }

    fn endpoint_view(&self, key: &SectionKey, body: &SectionBody) -> EndpointView {
        let id = key.name.as_str();
        let canonical = EndpointKeys::for_id(id);

        let auth = self
            .sections
            .get(&canonical.auth)
            .or_else(|| body.get("auth").and_then(|name| self.sections.get(&SectionKey::plain(name))));

        let aor = self.sections.get(&canonical.aor).or_else(|| {
            body.get("aors").and_then(|name| {
                self.sections
                    .get(&SectionKey::templated(name, AOR_TEMPLATE))
                    .or_else(|| self.sections.get(&SectionKey::plain(name)))
            })
        });

        EndpointView {
            id: id.to_string(),
            endpoint: self.complete(SectionKind::Endpoint, Some(body)),
            auth: self.complete(SectionKind::Auth, auth),
            aor: self.complete(SectionKind::Aor, aor),
        }
    }

    fn complete(&self, kind: SectionKind, body: Option<&SectionBody>) -> BTreeMap<String, String> {
        self.schema
            .options(kind)
            .iter()
            .filter_map(|option| {
                let value = body
                    .and_then(|b| b.get(&option.name))
                    .filter(|v| !v.is_empty())
                    .or_else(|| option.default_value())?;
                Some((option.name.clone(), value.to_string()))
            })
            .collect()
    }

    // ============== Mutation ==============

    /// Insert the endpoint, auth and AOR sections for a new endpoint.
    ///
    /// Does not write to disk; call [`ConfigStore::save`] afterwards.
    pub fn add_endpoint(&mut self, request: &EndpointCreate) -> Result<(), EndpointError> {
        let id = request.id.trim();
        check_id(id)?;

        let keys = EndpointKeys::for_id(id);
        if self.sections.contains_key(&keys.endpoint) {
            tracing::warn!("Endpoint {} already exists", id);
            return Err(EndpointError::AlreadyExists(id.to_string()));
        }

        let bodies = build_endpoint_bodies(&self.schema, id, request);
        for (key, body) in keys.all().into_iter().zip(bodies) {
            self.sections.insert(key.clone(), body);
            if !self.order.contains(key) {
                self.order.push(key.clone());
            }
        }

        tracing::info!("Added endpoint {}", id);
        Ok(())
    }

    /// Move an endpoint triple to a new id, keeping file positions and
    /// cross-references intact.
    pub fn rename_endpoint(&mut self, old_id: &str, new_id: &str) -> Result<(), EndpointError> {
        let old = EndpointKeys::for_id(old_id);
        if !self.sections.contains_key(&old.endpoint) {
            tracing::warn!("Endpoint {} does not exist", old_id);
            return Err(EndpointError::NotFound(old_id.to_string()));
        }
        check_id(new_id)?;
        if old_id == new_id {
            return Ok(());
        }

        let new = EndpointKeys::for_id(new_id);
        for (from, to) in old.all().into_iter().zip(new.all()) {
            let Some(body) = self.sections.remove(from) else {
                continue;
            };

            if self.sections.insert(to.clone(), body).is_some() {
                tracing::warn!("Rename of {} overwrote existing section {}", from, to);
                self.order.retain(|key| key != to);
                self.comments.remove(to);
            }
            if let Some(comments) = self.comments.remove(from) {
                self.comments.insert(to.clone(), comments);
            }
            for key in self.order.iter_mut() {
                if *key == *from {
                    *key = to.clone();
                }
            }
        }

        let auth_name = new.auth.name.clone();
        if let Some(endpoint) = self.sections.get_mut(&new.endpoint) {
            endpoint.set("auth", auth_name.clone());
            endpoint.set("outbound_auth", auth_name);
            endpoint.set("aors", new_id);
            for field in SELF_REFERENCE_FIELDS {
                if endpoint.get(field) == Some(old_id) {
                    endpoint.set(field, new_id);
                }
            }
        }
        if let Some(auth) = self.sections.get_mut(&new.auth) {
            if auth.get("username") == Some(old_id) {
                auth.set("username", new_id);
            }
        }

        tracing::info!("Renamed endpoint {} to {}", old_id, new_id);
        Ok(())
    }

    /// Apply a rename (when `previous_id` differs from `id`) followed by
    /// field updates, in memory only.
    pub fn apply_update(
        &mut self,
        id: &str,
        previous_id: Option<&str>,
        update: &EndpointUpdate,
    ) -> Result<(), EndpointError> {
        // Self-reference fields that held the old id before a rename
        let mut stale_fields: Option<HashSet<&'static str>> = None;

        if let Some(old_id) = previous_id.filter(|old| *old != id) {
            let stale: HashSet<&'static str> = self
                .sections
                .get(&EndpointKeys::for_id(old_id).endpoint)
                .map(|body| {
                    SELF_REFERENCE_FIELDS
                        .into_iter()
                        .filter(|field| body.get(field) == Some(old_id))
                        .collect()
                })
                .unwrap_or_default();
            self.rename_endpoint(old_id, id)?;
            stale_fields = Some(stale);
        }

        let keys = EndpointKeys::for_id(id);
        if !self.sections.contains_key(&keys.endpoint) {
            tracing::warn!("Endpoint {} does not exist", id);
            return Err(EndpointError::NotFound(id.to_string()));
        }

        let schema = Arc::clone(&self.schema);

        if let Some(auth) = update.auth() {
            let body = self.ensure_section(&keys.auth, &keys.endpoint, "auth");
            merge_fields(body, auth, &schema, SectionKind::Auth, &[]);
        }

        if let Some(aor) = update.aor() {
            let anchor = if self.sections.contains_key(&keys.auth) {
                keys.auth.clone()
            } else {
                keys.endpoint.clone()
            };
            let body = self.ensure_section(&keys.aor, &anchor, "aor");
            merge_fields(body, aor, &schema, SectionKind::Aor, &[]);
        }

        let Some(endpoint) = self.sections.get_mut(&keys.endpoint) else {
            return Err(EndpointError::NotFound(id.to_string()));
        };

        for (_, group) in update.endpoint_groups() {
            merge_fields(endpoint, group, &schema, SectionKind::Endpoint, &STRUCTURAL_FIELDS);
        }

        for (name, value) in update.fields() {
            if name == "id" || STRUCTURAL_FIELDS.contains(&name.as_str()) {
                tracing::debug!("Ignoring managed field {} on endpoint {}", name, id);
                continue;
            }
            if !schema.contains(SectionKind::Endpoint, name) {
                tracing::debug!("Ignoring unknown option {} on endpoint {}", name, id);
                continue;
            }

            let value = match &stale_fields {
                Some(stale) if stale.contains(name.as_str()) => Some(id.to_string()),
                _ => option_value(value),
            };
            apply_value(endpoint, name, value);
        }

        tracing::info!("Updated endpoint {}", id);
        Ok(())
    }

    /// Apply an update and persist it, backing up under the new id.
    ///
    /// A failed save fails the whole update even though the in-memory
    /// model was already changed.
    pub async fn update_endpoint(
        &mut self,
        id: &str,
        previous_id: Option<&str>,
        update: &EndpointUpdate,
        backups: &BackupService,
    ) -> Result<(), EndpointError> {
        self.apply_update(id, previous_id, update)?;
        self.save(backups, &format!("pjsip_{}", id)).await?;
        Ok(())
    }

    /// Remove every canonical section of an endpoint.
    ///
    /// Does not write to disk; call [`ConfigStore::save`] afterwards.
    pub fn delete_endpoint(&mut self, id: &str) -> Result<(), EndpointError> {
        let resolved = self.resolve_endpoint(id);
        let present: Vec<SectionKey> = resolved.present().into_iter().cloned().collect();

        if present.is_empty() {
            tracing::warn!("Endpoint {} not found", id);
            return Err(EndpointError::NotFound(id.to_string()));
        }

        for key in &present {
            self.sections.remove(key);
            self.comments.remove(key);
            self.order.retain(|k| k != key);
        }

        tracing::info!("Deleted endpoint {} ({} sections)", id, present.len());
        Ok(())
    }

    /// Return the body at `key`, creating it with a `type` marker right
    /// after `anchor` in document order when missing.
    fn ensure_section(&mut self, key: &SectionKey, anchor: &SectionKey, kind: &str) -> &mut SectionBody {
        if !self.sections.contains_key(key) {
            let mut body = SectionBody::new();
            body.set("type", kind);
            self.sections.insert(key.clone(), body);

            if !self.order.contains(key) {
                match self.order.iter().position(|k| k == anchor) {
                    Some(index) => self.order.insert(index + 1, key.clone()),
                    None => self.order.push(key.clone()),
                }
            }
            tracing::debug!("Created missing section {}", key);
        }

        self.sections.entry(key.clone()).or_default()
    }

    // ============== Serialization ==============

    /// Keys in document order followed by any section missing from it
    fn document_keys(&self) -> Vec<&SectionKey> {
        let mut seen = HashSet::new();
        let mut keys: Vec<&SectionKey> = self
            .order
            .iter()
            .filter(|key| self.sections.contains_key(*key) && seen.insert(*key))
            .collect();

        let mut stray: Vec<&SectionKey> = self
            .sections
            .keys()
            .filter(|key| !seen.contains(key))
            .collect();
        stray.sort();
        keys.extend(stray);
        keys
    }

    /// Render the model back to the on-disk dialect
    pub fn render(&self) -> String {
        let mut lines = Vec::new();

        for key in self.document_keys() {
            if let Some(body) = self.sections.get(key) {
                push_section(&mut lines, key, body, self.comments(key));
            }
        }
        lines.extend(self.trailing_comments.iter().cloned());

        lines.join("\n")
    }

    /// Back up the current file under `label`, then replace it with the
    /// rendered model.
    pub async fn save(&self, backups: &BackupService, label: &str) -> Result<(), ConfigError> {
        backups.create_backup(&self.path, label).await?;

        write_atomic(&self.path, self.render().as_bytes())
            .await
            .map_err(|e| {
                tracing::error!("Failed to save configuration {:?}: {}", self.path, e);
                e
            })?;

        tracing::info!("Configuration saved to {:?}", self.path);
        Ok(())
    }
}

/// Append a new endpoint triple to the end of the file without parsing it.
///
/// Existence is a plain substring check for `[id]`, so any header that
/// contains it (including `[id](tpl)`) blocks the add.
pub async fn append_endpoint(
    path: &Path,
    schema: &OptionSchema,
    backups: &BackupService,
    request: &EndpointCreate,
) -> Result<(), EndpointError> {
    let id = request.id.trim();
    check_id(id)?;

    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(ConfigError::from(e).into()),
    };

    if content.contains(&format!("[{}]", id)) {
        tracing::warn!("Endpoint {} already present in {:?}", id, path);
        return Err(EndpointError::AlreadyExists(id.to_string()));
    }

    backups
        .create_backup(path, &format!("pjsip_add_{}", id))
        .await
        .map_err(ConfigError::from)?;

    let keys = EndpointKeys::for_id(id);
    let bodies = build_endpoint_bodies(schema, id, request);

    let mut lines = Vec::new();
    for (key, body) in keys.all().into_iter().zip(&bodies) {
        push_section(&mut lines, key, body, None);
    }

    let mut block = String::new();
    if !content.is_empty() && !content.ends_with('\n') {
        block.push('\n');
    }
    block.push_str(&lines.join("\n"));

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(ConfigError::from)?;
    file.write_all(block.as_bytes()).await.map_err(ConfigError::from)?;
    file.sync_all().await.map_err(ConfigError::from)?;

    tracing::info!("Appended endpoint {} to {:?}", id, path);
    Ok(())
}

fn check_id(id: &str) -> Result<(), EndpointError> {
    if is_valid_endpoint_id(id) {
        Ok(())
    } else {
        Err(EndpointError::InvalidId(id.to_string()))
    }
}

fn is_endpoint_section(key: &SectionKey, body: &SectionBody) -> bool {
    !key.is_template_definition()
        && (key.template.as_deref() == Some(ENDPOINT_TEMPLATE) || body.get("type") == Some("endpoint"))
}

/// Build a section body by walking the option table in declared order.
///
/// `resolve` receives the option and the caller-provided value (already
/// stripped of null/empty) and returns the value to write. Empty results
/// are omitted.
fn build_body(
    schema: &OptionSchema,
    kind: SectionKind,
    overrides: Option<&FieldMap>,
    mut resolve: impl FnMut(&OptionDef, Option<String>) -> Option<String>,
) -> SectionBody {
    let mut body = SectionBody::new();
    for option in schema.options(kind) {
        let provided = overrides
            .and_then(|o| o.get(&option.name))
            .and_then(option_value)
            .filter(|v| !v.is_empty());
        if let Some(value) = resolve(option, provided).filter(|v| !v.is_empty()) {
            body.set(option.name.as_str(), value);
        }
    }
    body
}

fn with_default(option: &OptionDef, provided: Option<String>) -> Option<String> {
    provided.or_else(|| option.default_value().map(str::to_string))
}

/// Endpoint, auth and AOR bodies for a new endpoint
fn build_endpoint_bodies(schema: &OptionSchema, id: &str, request: &EndpointCreate) -> [SectionBody; 3] {
    let auth_name = EndpointKeys::auth_name(id);
    let overrides = request.endpoint_overrides();

    let mut endpoint = build_body(schema, SectionKind::Endpoint, Some(&overrides), |option, provided| {
        match option.name.as_str() {
            "auth" | "outbound_auth" => Some(auth_name.clone()),
            "aors" => provided.or_else(|| Some(id.to_string())),
            _ => with_default(option, provided),
        }
    });
    endpoint.set("auth", auth_name.clone());
    endpoint.set("outbound_auth", auth_name);
    if !endpoint.contains_key("aors") {
        endpoint.set("aors", id);
    }

    let auth = build_body(schema, SectionKind::Auth, request.auth(), with_default);
    let aor = build_body(schema, SectionKind::Aor, request.aor(), with_default);

    [endpoint, auth, aor]
}

/// `null` leaves a key untouched, an empty string removes it
fn apply_value(body: &mut SectionBody, name: &str, value: Option<String>) {
    match value {
        None => {}
        Some(value) if value.is_empty() => {
            body.remove(name);
        }
        Some(value) => body.set(name, value),
    }
}

/// Merge caller fields into `body`, ignoring anything the option table
/// does not list for `kind`
fn merge_fields(body: &mut SectionBody, fields: &FieldMap, schema: &OptionSchema, kind: SectionKind, skip: &[&str]) {
    for (name, value) in fields {
        if skip.contains(&name.as_str()) {
            continue;
        }
        if !schema.contains(kind, name) {
            tracing::debug!("Ignoring unknown {:?} option {}", kind, name);
            continue;
        }
        apply_value(body, name, option_value(value));
    }
}

fn push_section(lines: &mut Vec<String>, key: &SectionKey, body: &SectionBody, comments: Option<&[String]>) {
    if let Some(comments) = comments {
        lines.extend(comments.iter().cloned());
    }
    lines.push(key.header());
    for (k, v) in body.iter() {
        lines.push(format!("{}={}", k, v));
    }
    lines.push(String::new());
}

/// Write through a sibling temp file and rename it into place.
///
/// The replacement keeps the mode and, where permitted, the owner of the
/// file it replaces.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), ConfigError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("pjsip.conf");
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let existing = match fs::metadata(path).await {
        Ok(metadata) => Some(metadata),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    let result = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        if let Some(metadata) = &existing {
            copy_ownership(&temp_path, metadata).await?;
        }
        fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    Ok(())
}

async fn copy_ownership(target: &Path, source: &std::fs::Metadata) -> std::io::Result<()> {
    fs::set_permissions(target, source.permissions()).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;

        // Changing the owner needs privileges the service may not have
        if let Err(e) = std::os::unix::fs::chown(target, Some(source.uid()), Some(source.gid())) {
            tracing::debug!("Could not copy owner onto {:?}: {}", target, e);
        }
    }

    Ok(())
}
