//! # Record Import
//!
//! Bulk import of self-describing records. A record tagged with `LABEL` is a
//! node of the registered type with that primary label; a record tagged with
//! `RELATIONSHIP_TYPE` is a relationship between existing nodes.
//!
//! Accepted document shapes:
//!
//! - a single record
//! - a list of documents
//! - node-link data: `{"nodes": [...], "edges": [...]}`
//!
//! A node record may carry `RELATIONSHIPS_OUT`, a list of outgoing
//! relationships whose source is the node itself. Each entry names
//! `RELATIONSHIP_TYPE` and `TARGET_LABEL`, plus `TARGETS` (target key
//! values), `TARGET_NODES` (node records to merge and link to), or both.
//!
//! Every record is validated before anything is written. Nodes merge before
//! relationships so that nested targets exist when they are linked.
//!
//! Files are read by [`Session::import_json`], [`Session::import_yaml`] and
//! [`Session::import_md`]; a markdown file contributes its front matter as
//! the record and its body as the property named by `BODY_PROPERTY`.

use std::fs;
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use serde::Deserialize;
use serde_json::Value as Json;
use walkdir::WalkDir;

use crate::filter::{FilterOp, Predicate};
use crate::ingest::{endpoint_field, endpoint_key, EndpointOverrides, Record};
use crate::registry::Registry;
use crate::schema::FieldSpec;
use crate::session::Session;
use crate::{Error, Result};

pub const LABEL: &str = "LABEL";
pub const RELATIONSHIP_TYPE: &str = "RELATIONSHIP_TYPE";
pub const RELATIONSHIPS_OUT: &str = "RELATIONSHIPS_OUT";
pub const SOURCE_LABEL: &str = "SOURCE_LABEL";
pub const TARGET_LABEL: &str = "TARGET_LABEL";
pub const TARGET_PROPERTY: &str = "TARGET_PROPERTY";
pub const TARGET_NODES: &str = "TARGET_NODES";
pub const TARGETS: &str = "TARGETS";
pub const BODY_PROPERTY: &str = "BODY_PROPERTY";

const RELATIONSHIP_CONTROL_KEYS: [&str; 6] =
    [SOURCE_LABEL, TARGET_LABEL, TARGET_PROPERTY, RELATIONSHIP_TYPE, TARGET_NODES, TARGETS];

// ============================================================================
// Options and results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    /// Validate every record, write nothing.
    pub validate_only: bool,
    /// Count each relationship's endpoints before merging it.
    pub check_unmatched: bool,
    /// With `check_unmatched`, fail instead of skipping a relationship whose
    /// endpoint matches no node, or warning when it matches several.
    pub error_on_unmatched: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self { validate_only: false, check_unmatched: true, error_on_unmatched: false }
    }
}

impl ImportOptions {
    pub fn validate_only() -> Self {
        Self { validate_only: true, ..Self::default() }
    }
}

/// What an import did. In validate-only mode the counts are of validated
/// records; otherwise of nodes and relationships merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub nodes: usize,
    pub relationships: usize,
    /// One message per endpoint that matched no node, or more than one.
    pub unmatched: Vec<String>,
}

impl ImportSummary {
    fn absorb(&mut self, other: ImportSummary) {
        self.nodes += other.nodes;
        self.relationships += other.relationships;
        self.unmatched.extend(other.unmatched);
    }
}

/// File import settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileImport {
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Files per [`Session::import_records`] call; `None` imports all files
    /// in one batch.
    pub batch_size: Option<usize>,
    pub options: ImportOptions,
}

impl Default for FileImport {
    fn default() -> Self {
        Self { recursive: true, batch_size: None, options: ImportOptions::default() }
    }
}

// ============================================================================
// Preparation
// ============================================================================

#[derive(Debug)]
struct NodeRecord {
    label: String,
    record: Record,
}

#[derive(Debug)]
struct RelationshipRecord {
    group: RelationshipGroup,
    record: Record,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RelationshipGroup {
    rel_type: String,
    source_label: String,
    target_label: String,
    target_property: Option<String>,
}

impl RelationshipGroup {
    fn endpoints(&self) -> EndpointOverrides {
        EndpointOverrides {
            source_label: Some(self.source_label.clone()),
            source_property: None,
            target_label: Some(self.target_label.clone()),
            target_property: self.target_property.clone(),
        }
    }
}

/// Flattened, validated records.
#[derive(Debug, Default)]
struct Prepared {
    nodes: Vec<NodeRecord>,
    relationships: Vec<RelationshipRecord>,
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidRecord { reason: reason.into() }
}

fn text<'a>(record: &'a Record, key: &str) -> Result<&'a str> {
    match record.get(key) {
        Some(Json::String(s)) => Ok(s),
        Some(other) => Err(invalid(format!("{key} must be a string, got {other}"))),
        None => Err(invalid(format!("missing {key}"))),
    }
}

fn optional_text(record: &Record, key: &str) -> Result<Option<String>> {
    match record.get(key) {
        None | Some(Json::Null) => Ok(None),
        Some(_) => text(record, key).map(|s| Some(s.to_owned())),
    }
}

fn list<'a>(value: &'a Json, key: &str) -> Result<&'a [Json]> {
    value.as_array().map(Vec::as_slice).ok_or_else(|| invalid(format!("{key} must be a list")))
}

fn object<'a>(value: &'a Json, what: &str) -> Result<&'a Record> {
    value.as_object().ok_or_else(|| invalid(format!("{what} must be an object, got {value}")))
}

impl Prepared {
    fn document(&mut self, registry: &Registry, document: &Json) -> Result<()> {
        match document {
            Json::Array(items) => items.iter().try_for_each(|item| self.document(registry, item)),
            Json::Object(map) if map.contains_key("nodes") || map.contains_key("edges") => {
                for key in ["nodes", "edges"] {
                    if let Some(items) = map.get(key) {
                        for item in list(items, key)? {
                            self.record(registry, object(item, key)?)?;
                        }
                    }
                }
                Ok(())
            }
            Json::Object(map) => self.record(registry, map),
            other => Err(invalid(format!("expected a record or a list of records, got {other}"))),
        }
    }

    fn record(&mut self, registry: &Registry, map: &Record) -> Result<()> {
        if map.contains_key(LABEL) {
            self.node(registry, map, None).map(drop)
        } else if map.contains_key(RELATIONSHIP_TYPE) {
            self.relationship(registry, map.clone())
        } else {
            Err(invalid(format!("record has neither {LABEL} nor {RELATIONSHIP_TYPE}")))
        }
    }

    /// Validate a node record and queue it with its outgoing relationships.
    /// `label` overrides a missing `LABEL`. Returns the node's key.
    fn node(&mut self, registry: &Registry, map: &Record, label: Option<&str>) -> Result<Json> {
        let mut record = map.clone();
        let label = match record.remove(LABEL) {
            Some(Json::String(s)) => s,
            Some(other) => return Err(invalid(format!("{LABEL} must be a string, got {other}"))),
            None => label.map(str::to_owned).ok_or_else(|| invalid(format!("missing {LABEL}")))?,
        };
        let outgoing = record.remove(RELATIONSHIPS_OUT);
        let binding = registry
            .node_binding(&label)
            .ok_or_else(|| invalid(format!("no node type is registered for label {label}")))?;
        let key = binding.record_key(&record)?.to_json();
        self.nodes.push(NodeRecord { label: label.clone(), record });

        if let Some(outgoing) = outgoing {
            for entry in list(&outgoing, RELATIONSHIPS_OUT)? {
                self.outgoing(registry, object(entry, RELATIONSHIPS_OUT)?, &label, &key)?;
            }
        }
        Ok(key)
    }

    fn outgoing(&mut self, registry: &Registry, entry: &Record, source_label: &str, source_key: &Json) -> Result<()> {
        let target_label = text(entry, TARGET_LABEL)?.to_owned();
        let mut targets = Vec::new();
        if let Some(nodes) = entry.get(TARGET_NODES) {
            for node in list(nodes, TARGET_NODES)? {
                targets.push(self.node(registry, object(node, TARGET_NODES)?, Some(&target_label))?);
            }
        }
        if let Some(keys) = entry.get(TARGETS) {
            targets.extend(list(keys, TARGETS)?.iter().cloned());
        }

        let mut base = entry.clone();
        base.remove(TARGET_NODES);
        base.remove(TARGETS);
        base.insert(SOURCE_LABEL.into(), Json::String(source_label.to_owned()));
        base.insert("source".into(), source_key.clone());
        for target in targets {
            let mut record = base.clone();
            record.insert("target".into(), target);
            self.relationship(registry, record)?;
        }
        Ok(())
    }

    fn relationship(&mut self, registry: &Registry, mut record: Record) -> Result<()> {
        let group = RelationshipGroup {
            rel_type: text(&record, RELATIONSHIP_TYPE)?.to_owned(),
            source_label: text(&record, SOURCE_LABEL)?.to_owned(),
            target_label: text(&record, TARGET_LABEL)?.to_owned(),
            target_property: optional_text(&record, TARGET_PROPERTY)?,
        };
        for key in RELATIONSHIP_CONTROL_KEYS {
            record.remove(key);
        }
        let binding = registry
            .relationship_binding(&group.rel_type)
            .ok_or_else(|| invalid(format!("no relationship type is registered for {}", group.rel_type)))?;
        binding.check_record(registry, &record, &group.endpoints())?;
        self.relationships.push(RelationshipRecord { group, record });
        Ok(())
    }
}

/// Group by key, keeping groups and their members in first-seen order.
fn grouped<K: Clone + Eq + std::hash::Hash>(items: impl IntoIterator<Item = (K, Record)>) -> Vec<(K, Vec<Record>)> {
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, Vec<Record>)> = Vec::new();
    for (key, record) in items {
        let i = *index.entry(key.clone()).or_insert_with(|| {
            groups.push((key, Vec::new()));
            groups.len() - 1
        });
        groups[i].1.push(record);
    }
    groups
}

// ============================================================================
// Import
// ============================================================================

impl Session {
    /// Validate then merge self-describing records. Any invalid record
    /// rejects the whole import before anything is written.
    pub fn import_records(&self, documents: &[Json], options: &ImportOptions) -> Result<ImportSummary> {
        let registry = self.shared_registry();
        let mut prepared = Prepared::default();
        for document in documents {
            prepared.document(&registry, document)?;
        }
        if options.validate_only {
            tracing::info!(
                nodes = prepared.nodes.len(),
                relationships = prepared.relationships.len(),
                "validated import records"
            );
            return Ok(ImportSummary {
                nodes: prepared.nodes.len(),
                relationships: prepared.relationships.len(),
                unmatched: Vec::new(),
            });
        }

        let mut summary = ImportSummary::default();
        for (label, records) in grouped(prepared.nodes.into_iter().map(|n| (n.label, n.record))) {
            let binding = registry
                .node_binding(&label)
                .ok_or_else(|| invalid(format!("no node type is registered for label {label}")))?;
            summary.nodes += binding.merge_records(self, &records)?;
        }

        for (group, records) in grouped(prepared.relationships.into_iter().map(|r| (r.group, r.record))) {
            let binding = registry
                .relationship_binding(&group.rel_type)
                .ok_or_else(|| invalid(format!("no relationship type is registered for {}", group.rel_type)))?;
            let records = if options.check_unmatched {
                self.matched_records(&registry, &group, records, options, &mut summary.unmatched)?
            } else {
                records
            };
            summary.relationships += binding.merge_records(self, &records, &group.endpoints())?;
        }
        tracing::info!(nodes = summary.nodes, relationships = summary.relationships, "imported records");
        Ok(summary)
    }

    /// Drop records with an endpoint that matches no node. Endpoints that
    /// match several nodes are reported and kept.
    fn matched_records(
        &self,
        registry: &Registry,
        group: &RelationshipGroup,
        records: Vec<Record>,
        options: &ImportOptions,
        unmatched: &mut Vec<String>,
    ) -> Result<Vec<Record>> {
        let lookup = |label: &str, override_property: Option<&str>| -> Result<(String, Option<FieldSpec>)> {
            let schema = registry
                .node_schema(label)
                .ok_or_else(|| invalid(format!("no node type is registered for label {label}")))?;
            let property = override_property.unwrap_or(schema.primary_key()).to_owned();
            let field = endpoint_field(schema, &property).cloned();
            Ok((property, field))
        };
        let source = (group.source_label.as_str(), lookup(&group.source_label, None)?);
        let target = (group.target_label.as_str(), lookup(&group.target_label, group.target_property.as_deref())?);

        let mut kept = Vec::with_capacity(records.len());
        'records: for record in records {
            for (column, (label, (property, field))) in [("source", &source), ("target", &target)] {
                let value = endpoint_key(&record, column, field.as_ref())?;
                let predicate = Predicate { property: property.clone(), op: FilterOp::Exact, value: value.clone() };
                let matches = self.engine().count_nodes(label, std::slice::from_ref(&predicate))?;
                if matches == 1 {
                    continue;
                }
                let message = format!("{}: {matches} {column} nodes match {label}.{property} = {value}", group.rel_type);
                if options.error_on_unmatched {
                    return Err(match matches {
                        0 => Error::EntityNotFound {
                            label: (*label).to_owned(),
                            key: property.clone(),
                            value: value.to_string(),
                        },
                        _ => invalid(message),
                    });
                }
                tracing::warn!(%message, "unmatched relationship endpoint");
                unmatched.push(message);
                if matches == 0 {
                    continue 'records;
                }
            }
            kept.push(record);
        }
        Ok(kept)
    }

    /// Import `.json` files: each file holds one document.
    pub fn import_json(&self, path: impl AsRef<Path>, import: &FileImport) -> Result<ImportSummary> {
        let files = collect_files(path.as_ref(), &["json"], import.recursive)?;
        self.import_files(&files, import, read_json)
    }

    /// Import `.yaml` / `.yml` files: each document of a multi-document
    /// stream is a document.
    pub fn import_yaml(&self, path: impl AsRef<Path>, import: &FileImport) -> Result<ImportSummary> {
        let files = collect_files(path.as_ref(), &["yaml", "yml"], import.recursive)?;
        self.import_files(&files, import, read_yaml)
    }

    /// Import `.md` files with YAML front matter. The front matter must name
    /// `BODY_PROPERTY`, which receives the trimmed body text.
    pub fn import_md(&self, path: impl AsRef<Path>, import: &FileImport) -> Result<ImportSummary> {
        let files = collect_files(path.as_ref(), &["md"], import.recursive)?;
        self.import_files(&files, import, read_markdown)
    }

    fn import_files(
        &self,
        files: &[PathBuf],
        import: &FileImport,
        read: fn(&Path) -> Result<Vec<Json>>,
    ) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        if files.is_empty() {
            tracing::warn!("no files to import");
            return Ok(summary);
        }
        let batch_size = import.batch_size.unwrap_or(files.len()).max(1);
        for batch in files.chunks(batch_size) {
            let mut documents = Vec::new();
            for file in batch {
                tracing::debug!(path = %file.display(), "reading import file");
                documents.extend(read(file)?);
            }
            summary.absorb(self.import_records(&documents, &import.options)?);
        }
        Ok(summary)
    }
}

// ============================================================================
// Files
// ============================================================================

/// A single file is taken as is; a directory is walked for files with one
/// of `extensions`, in path order.
fn collect_files(path: &Path, extensions: &[&str], recursive: bool) -> Result<Vec<PathBuf>> {
    if fs::metadata(path)?.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut walker = WalkDir::new(path).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }
    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let matches = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)));
        if entry.file_type().is_file() && matches {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn read_json(path: &Path) -> Result<Vec<Json>> {
    Ok(vec![serde_json::from_slice(&fs::read(path)?)?])
}

fn read_yaml(path: &Path) -> Result<Vec<Json>> {
    parse_yaml_documents(&fs::read_to_string(path)?)
}

fn parse_yaml_documents(text: &str) -> Result<Vec<Json>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = Json::deserialize(document)?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

fn read_markdown(path: &Path) -> Result<Vec<Json>> {
    let text = fs::read_to_string(path)?;
    parse_markdown(&text).map_err(|e| match e {
        Error::InvalidRecord { reason } => invalid(format!("{}: {reason}", path.display())),
        other => other,
    })
}

/// Front matter between the leading `---` fences becomes the record.
fn parse_markdown(text: &str) -> Result<Vec<Json>> {
    let mut parts = text.trim_start().splitn(3, "---");
    let (Some(""), Some(front), Some(body)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid("markdown file has no front matter"));
    };
    let mut record: Record = match serde_yaml::from_str::<Json>(front)? {
        Json::Object(map) => map,
        other => return Err(invalid(format!("front matter must be a mapping, got {other}"))),
    };
    let property = match record.remove(BODY_PROPERTY) {
        Some(Json::String(p)) => p,
        Some(other) => return Err(invalid(format!("{BODY_PROPERTY} must be a string, got {other}"))),
        None => return Err(invalid(format!("front matter has no {BODY_PROPERTY}"))),
    };
    record.insert(property, Json::String(body.trim().to_owned()));
    Ok(vec![Json::Object(record)])
}
