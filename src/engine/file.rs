//! Embedded engine: the memory engine persisted to disk.
//!
//! State lives in a JSON snapshot at `<path>` and a JSON-lines commit
//! journal at `<path>.journal`. Each successful write appends one
//! [`Commit`] line, so a write costs what it changed, not the size of the
//! graph. Opening replays the journal over the snapshot.
//!
//! The journal is folded into a fresh snapshot on open, on close, and once
//! it outgrows the snapshot (never below [`COMPACT_FLOOR`]). A snapshot is
//! written to `<path>.tmp` and renamed over `<path>` before the journal is
//! truncated; commits carry final state, so replaying a journal the
//! snapshot already contains is harmless. A torn last journal line (a
//! crash mid-append) is dropped with a warning.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::memory::{Commit, CommitLog, MemoryEngine, Snapshot};
use super::{EdgeRecord, EngineCapabilities, EngineKind, GraphEngine};
use crate::filter::{Page, Predicate};
use crate::model::{Node, PropertyMap, Value};
use crate::reconcile::{NodeCreateRow, NodeMergeRow, NodeTarget, RelationshipMergeRow, RelationshipTarget};
use crate::result::RawResult;
use crate::{Error, Result};

/// Journal size below which no compaction happens.
pub const COMPACT_FLOOR: u64 = 1 << 20;

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn unreachable_file(path: &Path, e: std::io::Error) -> Error {
    Error::EngineConnection(format!("cannot open {}: {e}", path.display()))
}

// ============================================================================
// Journal
// ============================================================================

#[derive(Debug)]
struct JournalState {
    file: File,
    bytes: u64,
    snapshot_bytes: u64,
}

#[derive(Debug)]
struct Journal {
    snapshot_path: PathBuf,
    journal_path: PathBuf,
    state: Mutex<JournalState>,
}

impl Journal {
    fn open(snapshot_path: &Path, snapshot_bytes: u64) -> Result<Self> {
        let journal_path = sibling(snapshot_path, ".journal");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)
            .map_err(|e| unreachable_file(&journal_path, e))?;
        let bytes = file.metadata()?.len();
        Ok(Self {
            snapshot_path: snapshot_path.to_path_buf(),
            journal_path,
            state: Mutex::new(JournalState { file, bytes, snapshot_bytes }),
        })
    }

    /// Commits recorded at `path`; a torn final line is skipped.
    fn replay(path: &Path) -> Result<Vec<Commit>> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(unreachable_file(path, e)),
        };
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut commits = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            match serde_json::from_str(line) {
                Ok(commit) => commits.push(commit),
                Err(e) if i + 1 == lines.len() => {
                    tracing::warn!(path = %path.display(), error = %e, "dropping torn journal entry");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(commits)
    }

    fn is_empty(&self) -> bool {
        self.state.lock().bytes == 0
    }

    fn due(&self) -> bool {
        let state = self.state.lock();
        state.bytes > state.snapshot_bytes.max(COMPACT_FLOOR)
    }

    /// Replace the snapshot with `snapshot` and empty the journal.
    fn compact(&self, snapshot: Snapshot) -> Result<()> {
        let bytes = serde_json::to_vec(&snapshot)?;
        let mut state = self.state.lock();
        let tmp = sibling(&self.snapshot_path, ".tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.snapshot_path)?;
        state.file.set_len(0)?;
        state.bytes = 0;
        state.snapshot_bytes = bytes.len() as u64;
        tracing::debug!(path = %self.snapshot_path.display(), nodes = snapshot.nodes.len(), "compacted graph journal");
        Ok(())
    }
}

impl CommitLog for Journal {
    fn append(&self, commit: &Commit) -> Result<()> {
        let mut line = serde_json::to_vec(commit)?;
        line.push(b'\n');
        let mut state = self.state.lock();
        state.file.write_all(&line)?;
        state.file.flush()?;
        state.bytes += line.len() as u64;
        tracing::trace!(path = %self.journal_path.display(), changes = commit.changes.len(), "journalled commit");
        Ok(())
    }
}

// ============================================================================
// FileEngine
// ============================================================================

#[derive(Debug)]
pub struct FileEngine {
    path: PathBuf,
    inner: MemoryEngine,
    journal: Arc<Journal>,
}

impl FileEngine {
    /// Open the graph at `path`, starting empty if nothing is there yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (snapshot, snapshot_bytes) = match fs::read(&path) {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
                tracing::info!(path = %path.display(), nodes = snapshot.nodes.len(), "loaded graph snapshot");
                (Some(snapshot), bytes.len() as u64)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => (None, 0),
            Err(e) => return Err(unreachable_file(&path, e)),
        };
        let commits = Journal::replay(&sibling(&path, ".journal"))?;
        if !commits.is_empty() {
            tracing::info!(path = %path.display(), commits = commits.len(), "replaying graph journal");
        }
        let journal = Arc::new(Journal::open(&path, snapshot_bytes)?);
        let fresh = snapshot.is_none();
        let inner = MemoryEngine::with_log(snapshot.unwrap_or_default(), commits, journal.clone());
        let engine = Self { path, inner, journal };
        if fresh || !engine.journal.is_empty() {
            engine.compact()?;
        }
        Ok(engine)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal.journal_path
    }

    /// Fold the journal into a new snapshot.
    pub fn compact(&self) -> Result<()> {
        self.inner.with_snapshot(|snapshot| self.journal.compact(snapshot))
    }

    fn write<T>(&self, out: Result<T>) -> Result<T> {
        let out = out?;
        if self.journal.due() {
            self.compact()?;
        }
        Ok(out)
    }
}

impl GraphEngine for FileEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::File
    }

    fn capabilities(&self) -> EngineCapabilities {
        self.inner.capabilities()
    }

    fn verify_connection(&self) -> Result<()> {
        let dir = self.path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
        if dir.is_dir() {
            Ok(())
        } else {
            Err(Error::EngineConnection(format!("directory {} does not exist", dir.display())))
        }
    }

    fn close(&self) -> Result<()> {
        self.compact()
    }

    fn execute(&self, statement: &str, params: PropertyMap) -> Result<RawResult> {
        self.inner.execute(statement, params)
    }

    fn create_nodes(&self, target: &NodeTarget, rows: &[NodeCreateRow]) -> Result<Vec<Node>> {
        self.write(self.inner.create_nodes(target, rows))
    }

    fn merge_nodes(&self, target: &NodeTarget, rows: &[NodeMergeRow]) -> Result<Vec<Node>> {
        self.write(self.inner.merge_nodes(target, rows))
    }

    fn match_node(&self, label: &str, key: &str, value: &Value) -> Result<Option<Node>> {
        self.inner.match_node(label, key, value)
    }

    fn match_nodes(&self, label: &str, predicates: &[Predicate], page: &Page) -> Result<Vec<Node>> {
        self.inner.match_nodes(label, predicates, page)
    }

    fn count_nodes(&self, label: &str, predicates: &[Predicate]) -> Result<u64> {
        self.inner.count_nodes(label, predicates)
    }

    fn delete_nodes(&self, label: &str, key: &str, values: &[Value]) -> Result<u64> {
        self.write(self.inner.delete_nodes(label, key, values))
    }

    fn merge_relationships(&self, target: &RelationshipTarget, rows: &[RelationshipMergeRow]) -> Result<Vec<EdgeRecord>> {
        self.write(self.inner.merge_relationships(target, rows))
    }

    fn match_relationships(&self, rel_type: &str, page: &Page) -> Result<Vec<EdgeRecord>> {
        self.inner.match_relationships(rel_type, page)
    }

    fn apply_constraint(&self, label: &str, property: &str) -> Result<()> {
        self.write(self.inner.apply_constraint(label, property))
    }

    fn drop_constraint(&self, label: &str, property: &str) -> Result<()> {
        self.write(self.inner.drop_constraint(label, property))
    }

    fn constraints(&self) -> Result<Vec<(String, String)>> {
        self.inner.constraints()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props;

    fn person() -> NodeTarget {
        NodeTarget { primary_label: "Person".into(), labels: vec!["Person".into()], key: "name".into() }
    }

    fn merge(engine: &FileEngine, name: &str) {
        let row = NodeMergeRow { key: Value::from(name), ..Default::default() };
        engine.merge_nodes(&person(), &[row]).unwrap();
    }

    fn len(path: &Path) -> u64 {
        fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }

    #[test]
    fn test_reopen_replays_journal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let snapshot_len;
        {
            let engine = FileEngine::open(&path).unwrap();
            engine.verify_connection().unwrap();
            snapshot_len = len(&path);
            merge(&engine, "ada");
            engine.apply_constraint("Person", "name").unwrap();
            // Writes go to the journal; the snapshot is left alone.
            assert!(len(engine.journal_path()) > 0);
            assert_eq!(len(&path), snapshot_len);
        }
        let reopened = FileEngine::open(&path).unwrap();
        assert!(reopened.match_node("Person", "name", &Value::from("ada")).unwrap().is_some());
        assert_eq!(reopened.constraints().unwrap(), vec![("Person".to_string(), "name".to_string())]);
        assert_eq!(len(reopened.journal_path()), 0);
    }

    #[test]
    fn test_close_folds_journal_into_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let engine = FileEngine::open(&path).unwrap();
        merge(&engine, "ada");
        engine.close().unwrap();
        assert_eq!(len(engine.journal_path()), 0);
        let snapshot: Snapshot = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(snapshot.nodes.len(), 1);
    }

    #[test]
    fn test_failed_write_leaves_files_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let engine = FileEngine::open(&path).unwrap();
        let row = NodeCreateRow { key: Value::from("ada"), properties: PropertyMap::new() };
        engine.create_nodes(&person(), &[row.clone()]).unwrap();
        let before = (fs::read(&path).unwrap(), fs::read(engine.journal_path()).unwrap());
        assert!(engine.create_nodes(&person(), &[row]).is_err());
        assert_eq!((fs::read(&path).unwrap(), fs::read(engine.journal_path()).unwrap()), before);
    }

    #[test]
    fn test_torn_journal_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        {
            let engine = FileEngine::open(&path).unwrap();
            merge(&engine, "ada");
            let mut file = OpenOptions::new().append(true).open(engine.journal_path()).unwrap();
            file.write_all(br#"{"changes":[{"kind":"node","id":2,"#).unwrap();
        }
        let reopened = FileEngine::open(&path).unwrap();
        assert!(reopened.match_node("Person", "name", &Value::from("ada")).unwrap().is_some());
        // Compaction on open cleared the torn bytes, so new writes replay cleanly.
        merge(&reopened, "grace");
        drop(reopened);
        assert_eq!(FileEngine::open(&path).unwrap().inner.node_count(), 2);
    }

    #[test]
    fn test_corrupt_journal_entry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let journal = sibling(&path, ".journal");
        let good = serde_json::to_string(&Commit::default()).unwrap();
        fs::write(&journal, format!("garbage\n{good}\n")).unwrap();
        assert!(matches!(FileEngine::open(&path), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_journal_compacts_once_it_outgrows_the_floor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let engine = FileEngine::open(&path).unwrap();
        let blob = "x".repeat(64 * 1024);
        for i in 0..20 {
            let row = NodeMergeRow { key: Value::from("ada"), always_set: props! { "blob" => blob.clone(), "n" => i }, ..Default::default() };
            engine.merge_nodes(&person(), &[row]).unwrap();
        }
        assert!(len(engine.journal_path()) <= COMPACT_FLOOR);
        drop(engine);
        let reopened = FileEngine::open(&path).unwrap();
        let ada = reopened.match_node("Person", "name", &Value::from("ada")).unwrap().unwrap();
        assert_eq!(ada.get("n"), Some(&Value::Int(19)));
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        fs::write(&path, b"not json").unwrap();
        assert!(matches!(FileEngine::open(&path), Err(Error::Serialization(_))));
    }
}
