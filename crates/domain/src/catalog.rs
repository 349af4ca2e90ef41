//! Message-catalog definitions.
//!
//! A catalog describes one message bundle: its metadata, the languages it
//! supports, and a tree of default messages. The tree is flattened into
//! dotted keys at build time:
//!
//! * data entries keep their name verbatim (`playerNotFound` →
//!   `playerNotFound`);
//! * provider entries use the accessor rule: strip a leading `get`, split
//!   camel-case runs, lowercase, join with `.`
//!   (`getSuccessTeleportedTo` → `success.teleported.to`);
//! * sections prefix their children (`errors` + `notFound` →
//!   `errors.notFound`).
//!
//! Building is pure: no user code runs, and the owned tree makes cyclic
//! definitions unrepresentable. Duplicate flattened keys and empty
//! derived keys are rejected.

use std::collections::BTreeMap;

use bson::{Bson, Document};

use crate::bundle::{BundleMeta, Target};
use crate::error::{Error, Result};
use crate::settings::Settings;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message values
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A stored message: a single string or an ordered list of strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageValue {
    Text(String),
    List(Vec<String>),
}

impl MessageValue {
    /// Interpret a persisted BSON value as a message. Anything that is not
    /// a string or an array of strings is not a message.
    pub fn from_bson(value: &Bson) -> Option<Self> {
        match value {
            Bson::String(s) => Some(MessageValue::Text(s.clone())),
            Bson::Array(items) => {
                let mut lines = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Bson::String(s) => lines.push(s.clone()),
                        _ => return None,
                    }
                }
                Some(MessageValue::List(lines))
            }
            _ => None,
        }
    }

    pub fn to_bson(&self) -> Bson {
        match self {
            MessageValue::Text(s) => Bson::String(s.clone()),
            MessageValue::List(lines) => {
                Bson::Array(lines.iter().cloned().map(Bson::String).collect())
            }
        }
    }

    /// Collapse to a single string; list values join with newlines.
    pub fn into_text(self) -> String {
        match self {
            MessageValue::Text(s) => s,
            MessageValue::List(lines) => lines.join("\n"),
        }
    }

    /// Collapse to a list; a scalar wraps into a singleton.
    pub fn into_lines(self) -> Vec<String> {
        match self {
            MessageValue::Text(s) => vec![s],
            MessageValue::List(lines) => lines,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Key derivation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Derive the dotted key for an accessor-style name.
///
/// `getSuccessTeleportedTo` → `success.teleported.to`. A new segment
/// starts at every uppercase character; the optional `get` prefix is
/// dropped.
pub fn accessor_key(accessor: &str) -> Result<String> {
    let trimmed = accessor.strip_prefix("get").unwrap_or(accessor);
    let mut segments: Vec<String> = Vec::new();
    for ch in trimmed.chars() {
        if ch.is_uppercase() || segments.is_empty() {
            segments.push(String::new());
        }
        let last = segments.last_mut().expect("segment pushed above");
        last.extend(ch.to_lowercase());
    }
    let key = segments
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(".");
    if key.is_empty() {
        return Err(Error::Schema(format!(
            "accessor `{accessor}` derives an empty message key"
        )));
    }
    Ok(key)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalog tree & builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
enum Node {
    Leaf(MessageValue),
    Section(Vec<(String, Node)>),
}

/// Builder for the entries of one catalog section.
#[derive(Debug, Default)]
pub struct SectionBuilder {
    entries: Vec<(String, Node)>,
    problems: Vec<String>,
}

impl SectionBuilder {
    /// A data entry; the name becomes the key segment verbatim.
    pub fn text(mut self, name: impl Into<String>, default: impl Into<String>) -> Self {
        self.entries
            .push((name.into(), Node::Leaf(MessageValue::Text(default.into()))));
        self
    }

    /// A list-valued data entry.
    pub fn list<I, S>(mut self, name: impl Into<String>, defaults: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines = defaults.into_iter().map(Into::into).collect();
        self.entries
            .push((name.into(), Node::Leaf(MessageValue::List(lines))));
        self
    }

    /// A provider entry; the accessor name goes through [`accessor_key`].
    pub fn provider(mut self, accessor: &str, default: impl Into<String>) -> Self {
        match accessor_key(accessor) {
            Ok(key) => self
                .entries
                .push((key, Node::Leaf(MessageValue::Text(default.into())))),
            Err(e) => self.problems.push(e.to_string()),
        }
        self
    }

    /// A list-valued provider entry.
    pub fn provider_list<I, S>(mut self, accessor: &str, defaults: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = defaults.into_iter().map(Into::into).collect();
        match accessor_key(accessor) {
            Ok(key) => self.entries.push((key, Node::Leaf(MessageValue::List(lines)))),
            Err(e) => self.problems.push(e.to_string()),
        }
        self
    }

    /// A nested section; children are prefixed with `name.`.
    pub fn section(
        mut self,
        name: impl Into<String>,
        build: impl FnOnce(SectionBuilder) -> SectionBuilder,
    ) -> Self {
        let child = build(SectionBuilder::default());
        self.problems.extend(child.problems);
        self.entries.push((name.into(), Node::Section(child.entries)));
        self
    }
}

/// Builder for a full catalog definition.
#[derive(Debug)]
pub struct CatalogBuilder {
    meta: BundleMeta,
    languages: Vec<String>,
    root: SectionBuilder,
}

impl CatalogBuilder {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            meta: BundleMeta::new(document_id),
            languages: Vec::new(),
            root: SectionBuilder::default(),
        }
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.meta.database = Some(database.into());
        self
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.meta.collection = Some(collection.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.languages.push(language.into());
        self
    }

    pub fn languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages.extend(languages.into_iter().map(Into::into));
        self
    }

    pub fn text(mut self, name: impl Into<String>, default: impl Into<String>) -> Self {
        self.root = self.root.text(name, default);
        self
    }

    pub fn list<I, S>(mut self, name: impl Into<String>, defaults: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.root = self.root.list(name, defaults);
        self
    }

    pub fn provider(mut self, accessor: &str, default: impl Into<String>) -> Self {
        self.root = self.root.provider(accessor, default);
        self
    }

    pub fn provider_list<I, S>(mut self, accessor: &str, defaults: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.root = self.root.provider_list(accessor, defaults);
        self
    }

    pub fn section(
        mut self,
        name: impl Into<String>,
        build: impl FnOnce(SectionBuilder) -> SectionBuilder,
    ) -> Self {
        self.root = self.root.section(name, build);
        self
    }

    /// Validate and flatten into a [`CatalogDef`].
    pub fn build(self) -> Result<CatalogDef> {
        self.meta.validate()?;
        if !self.root.problems.is_empty() {
            return Err(Error::Schema(self.root.problems.join("; ")));
        }
        if self.languages.is_empty() {
            return Err(Error::Schema(format!(
                "catalog `{}` declares no supported language",
                self.meta.document_id
            )));
        }
        let mut languages = Vec::new();
        for lang in self.languages {
            if lang.trim().is_empty() {
                return Err(Error::Schema(format!(
                    "catalog `{}` declares a blank language code",
                    self.meta.document_id
                )));
            }
            if !languages.contains(&lang) {
                languages.push(lang);
            }
        }

        let mut defaults = BTreeMap::new();
        flatten("", &self.root.entries, &mut defaults).map_err(|key| {
            Error::Schema(format!(
                "catalog `{}` flattens to duplicate key `{key}`",
                self.meta.document_id
            ))
        })?;

        Ok(CatalogDef {
            meta: self.meta,
            languages,
            defaults,
        })
    }
}

fn flatten(
    prefix: &str,
    entries: &[(String, Node)],
    out: &mut BTreeMap<String, MessageValue>,
) -> std::result::Result<(), String> {
    for (name, node) in entries {
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        match node {
            Node::Leaf(value) => {
                if out.insert(key.clone(), value.clone()).is_some() {
                    return Err(key);
                }
            }
            Node::Section(children) => flatten(&key, children, out)?,
        }
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalog definition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The validated, flattened definition of one message bundle.
#[derive(Debug, Clone)]
pub struct CatalogDef {
    meta: BundleMeta,
    languages: Vec<String>,
    defaults: BTreeMap<String, MessageValue>,
}

impl CatalogDef {
    pub fn meta(&self) -> &BundleMeta {
        &self.meta
    }

    pub fn document_id(&self) -> &str {
        &self.meta.document_id
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    pub fn supports(&self, language: &str) -> bool {
        self.languages.iter().any(|l| l == language)
    }

    /// The flat `key → default` map.
    pub fn flat_defaults(&self) -> &BTreeMap<String, MessageValue> {
        &self.defaults
    }

    /// The default map as a BSON document, ready for merging.
    pub fn defaults_document(&self) -> Document {
        let mut doc = Document::new();
        for (key, value) in &self.defaults {
            doc.insert(key.clone(), value.to_bson());
        }
        doc
    }

    /// Identity of one language document: `"<documentId>:<language>"`.
    pub fn language_doc_id(&self, language: &str) -> String {
        language_doc_id(&self.meta.document_id, language)
    }

    pub fn resolve(&self, settings: &Settings) -> Target {
        self.meta.resolve(settings, &settings.messages_collection)
    }
}

/// Compound id scheme shared by every process pointed at the database.
pub fn language_doc_id(document_id: &str, language: &str) -> String {
    format!("{document_id}:{language}")
}
