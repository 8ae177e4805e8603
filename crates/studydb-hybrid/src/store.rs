//! Session storage backends.
//!
//! A session's chunk sequence, semantic index and lexical index are saved and
//! replaced as one unit. Readers always see one complete version.
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use studydb_core::error::{Error, Result};
use studydb_core::types::Chunk;
use studydb_text::LexicalIndex;
use studydb_vector::SemanticIndex;

/// Describes one stored session version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub session_id: String,
    /// Monotonic per session, assigned by the store on save.
    pub version: u64,
    pub chunk_count: usize,
    pub dim: usize,
    /// `Embedder::id` of the model that produced the semantic index.
    pub embedder: String,
    pub created_at: DateTime<Utc>,
}

/// The triple that must always be rebuilt and swapped together.
#[derive(Debug, Clone)]
pub struct SessionArtifacts {
    pub manifest: SessionManifest,
    pub chunks: Vec<Chunk>,
    pub semantic: SemanticIndex,
    pub lexical: LexicalIndex,
}

impl SessionArtifacts {
    pub fn new(session_id: &str, embedder: &str, chunks: Vec<Chunk>, semantic: SemanticIndex, lexical: LexicalIndex) -> Self {
        let manifest = SessionManifest {
            session_id: session_id.to_string(),
            version: 0,
            chunk_count: chunks.len(),
            dim: semantic.dim(),
            embedder: embedder.to_string(),
            created_at: Utc::now(),
        };
        Self { manifest, chunks, semantic, lexical }
    }

    /// All three structures cover exactly positions `0..chunk_count`.
    pub fn validate(&self) -> Result<()> {
        let session = &self.manifest.session_id;
        let n = self.manifest.chunk_count;
        if n == 0 {
            return Err(Error::BuildFailure(format!("session {session} has no chunks")));
        }
        if self.chunks.len() != n || self.semantic.len() != n || self.lexical.len() != n {
            return Err(Error::BuildFailure(format!(
                "session {session} is inconsistent: manifest {n}, chunks {}, semantic {}, lexical {}",
                self.chunks.len(),
                self.semantic.len(),
                self.lexical.len()
            )));
        }
        if let Some(chunk) = self.chunks.iter().enumerate().find_map(|(i, c)| (c.position != i).then_some(c)) {
            return Err(Error::BuildFailure(format!("session {session} has chunk at position {} out of order", chunk.position)));
        }
        if self.semantic.dim() != self.manifest.dim {
            return Err(Error::BuildFailure(format!(
                "session {session} semantic index has dimension {}, manifest says {}",
                self.semantic.dim(),
                self.manifest.dim
            )));
        }
        self.semantic.validate()?;
        self.lexical.validate()
    }
}

/// Pluggable persistence for session indexes.
pub trait SessionStore: Send + Sync {
    /// Replace whatever the session held with `artifacts`; returns the stored manifest.
    fn save(&self, artifacts: SessionArtifacts) -> Result<SessionManifest>;
    /// `SessionNotFound` when absent, `BuildFailure` when unreadable.
    fn load(&self, session_id: &str) -> Result<Arc<SessionArtifacts>>;
    fn manifest(&self, session_id: &str) -> Result<SessionManifest>;
    /// Idempotent.
    fn delete(&self, session_id: &str) -> Result<()>;
    fn list(&self) -> Result<Vec<SessionManifest>>;
}

/// In-process backend. Each save swaps in a new `Arc`, so a reader holding a
/// loaded snapshot keeps it intact.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Arc<SessionArtifacts>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> Error {
    Error::Io(io::Error::new(io::ErrorKind::Other, "session map lock poisoned"))
}

impl SessionStore for MemorySessionStore {
    fn save(&self, mut artifacts: SessionArtifacts) -> Result<SessionManifest> {
        artifacts.validate()?;
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        let session_id = artifacts.manifest.session_id.clone();
        artifacts.manifest.version = sessions.get(&session_id).map_or(1, |prev| prev.manifest.version + 1);
        let manifest = artifacts.manifest.clone();
        sessions.insert(session_id, Arc::new(artifacts));
        Ok(manifest)
    }

    fn load(&self, session_id: &str) -> Result<Arc<SessionArtifacts>> {
        let sessions = self.sessions.read().map_err(|_| poisoned())?;
        sessions.get(session_id).cloned().ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    fn manifest(&self, session_id: &str) -> Result<SessionManifest> {
        Ok(self.load(session_id)?.manifest.clone())
    }

    fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions.write().map_err(|_| poisoned())?.remove(session_id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<SessionManifest>> {
        let sessions = self.sessions.read().map_err(|_| poisoned())?;
        let mut out: Vec<SessionManifest> = sessions.values().map(|a| a.manifest.clone()).collect();
        out.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(out)
    }
}

const CURRENT: &str = "CURRENT";
const MANIFEST: &str = "manifest.json";
const CHUNKS: &str = "chunks.json";
const SEMANTIC: &str = "semantic.json";
const LEXICAL: &str = "lexical.json";
const STAGING_PREFIX: &str = ".staging-";

/// blake3 hex digest of each artifact file, checked on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ArtifactDigests {
    chunks: String,
    semantic: String,
    lexical: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredManifest {
    #[serde(flatten)]
    manifest: SessionManifest,
    digests: ArtifactDigests,
}

/// Filesystem backend.
///
/// ```text
/// <root>/<blake3(session_id)>/CURRENT        name of the live version dir
/// <root>/<blake3(session_id)>/v<N>/manifest.json
/// <root>/<blake3(session_id)>/v<N>/chunks.json
/// <root>/<blake3(session_id)>/v<N>/semantic.json
/// <root>/<blake3(session_id)>/v<N>/lexical.json
/// ```
///
/// A save writes a staging dir, renames it to `v<N>` and then replaces
/// `CURRENT` by rename. A reader resolves `CURRENT` once and reads only that
/// version. Assumes one writer per session.
pub struct FsSessionStore {
    root: PathBuf,
}

impl FsSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Session ids are opaque; the directory name is their digest.
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(blake3::hash(session_id.as_bytes()).to_hex().as_str())
    }

    fn next_version(dir: &Path) -> Result<u64> {
        let mut highest = 0u64;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(v) = entry.file_name().to_str().and_then(parse_version) {
                highest = highest.max(v);
            }
        }
        Ok(highest + 1)
    }

    /// Resolve `CURRENT` to the live version directory.
    fn current_dir(&self, session_id: &str) -> Result<PathBuf> {
        let dir = self.session_dir(session_id);
        let name = match fs::read_to_string(dir.join(CURRENT)) {
            Ok(name) => name,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::SessionNotFound(session_id.to_string())),
            Err(e) => return Err(e.into()),
        };
        let name = name.trim();
        if parse_version(name).is_none() {
            return Err(corrupt(session_id, format!("CURRENT names {name:?}")));
        }
        Ok(dir.join(name))
    }

    fn load_version(&self, session_id: &str, version_dir: &Path) -> Result<SessionArtifacts> {
        let stored = self.read_manifest(session_id, version_dir)?;
        let chunks: Vec<Chunk> = read_json(session_id, &version_dir.join(CHUNKS), &stored.digests.chunks)?;
        let semantic: SemanticIndex = read_json(session_id, &version_dir.join(SEMANTIC), &stored.digests.semantic)?;
        let lexical: LexicalIndex = read_json(session_id, &version_dir.join(LEXICAL), &stored.digests.lexical)?;
        let artifacts = SessionArtifacts { manifest: stored.manifest, chunks, semantic, lexical };
        artifacts.validate()?;
        Ok(artifacts)
    }

    fn read_manifest(&self, session_id: &str, version_dir: &Path) -> Result<StoredManifest> {
        let bytes = match fs::read(version_dir.join(MANIFEST)) {
            Ok(bytes) => bytes,
            // CURRENT exists, so the session was indexed; a missing version is damage.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let detail = if version_dir.is_dir() {
                    format!("{MANIFEST} is missing")
                } else {
                    format!("CURRENT names missing version {}", version_dir.display())
                };
                return Err(corrupt(session_id, detail));
            }
            Err(e) => return Err(e.into()),
        };
        let stored: StoredManifest =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(session_id, format!("{MANIFEST}: {e}")))?;
        if stored.manifest.session_id != session_id {
            return Err(corrupt(session_id, format!("{MANIFEST} belongs to {:?}", stored.manifest.session_id)));
        }
        Ok(stored)
    }
}

impl SessionStore for FsSessionStore {
    fn save(&self, mut artifacts: SessionArtifacts) -> Result<SessionManifest> {
        artifacts.validate()?;
        let session_id = artifacts.manifest.session_id.clone();
        let dir = self.session_dir(&session_id);
        fs::create_dir_all(&dir)?;

        let version = Self::next_version(&dir)?;
        artifacts.manifest.version = version;

        let staging = tempfile::Builder::new().prefix(STAGING_PREFIX).tempdir_in(&dir)?;
        let digests = ArtifactDigests {
            chunks: write_json(&staging.path().join(CHUNKS), &artifacts.chunks)?,
            semantic: write_json(&staging.path().join(SEMANTIC), &artifacts.semantic)?,
            lexical: write_json(&staging.path().join(LEXICAL), &artifacts.lexical)?,
        };
        let stored = StoredManifest { manifest: artifacts.manifest.clone(), digests };
        write_json(&staging.path().join(MANIFEST), &stored)?;

        let version_name = format!("v{version}");
        fs::rename(staging.path(), dir.join(&version_name))?;
        // The staging guard now points at a moved path; dropping it is a no-op.
        drop(staging);

        let mut pointer = tempfile::NamedTempFile::new_in(&dir)?;
        pointer.write_all(version_name.as_bytes())?;
        pointer.as_file().sync_all()?;
        pointer.persist(dir.join(CURRENT)).map_err(|e| e.error)?;

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let stale = (parse_version(name).is_some() && name != version_name) || name.starts_with(STAGING_PREFIX);
            if stale {
                if let Err(e) = fs::remove_dir_all(entry.path()) {
                    tracing::warn!(session = %session_id, dir = name, error = %e, "failed to remove stale version");
                }
            }
        }

        tracing::info!(session = %session_id, version, chunks = artifacts.manifest.chunk_count, "saved session index");
        Ok(artifacts.manifest)
    }

    fn load(&self, session_id: &str) -> Result<Arc<SessionArtifacts>> {
        let mut version_dir = self.current_dir(session_id)?;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.load_version(session_id, &version_dir) {
                Ok(artifacts) => return Ok(Arc::new(artifacts)),
                Err(e) => {
                    // A concurrent save may have retired the version we pinned.
                    let current = self.current_dir(session_id)?;
                    if current == version_dir || attempts >= 3 {
                        return Err(e);
                    }
                    tracing::debug!(session = %session_id, "session version changed during load, retrying");
                    version_dir = current;
                }
            }
        }
    }

    fn manifest(&self, session_id: &str) -> Result<SessionManifest> {
        let version_dir = self.current_dir(session_id)?;
        match self.read_manifest(session_id, &version_dir) {
            Ok(stored) => Ok(stored.manifest),
            Err(e) => {
                // Deleted or replaced while reading: report what is there now.
                let current = self.current_dir(session_id)?;
                if current == version_dir {
                    return Err(e);
                }
                Ok(self.read_manifest(session_id, &current)?.manifest)
            }
        }
    }

    fn delete(&self, session_id: &str) -> Result<()> {
        match fs::remove_dir_all(self.session_dir(session_id)) {
            Ok(()) => {
                tracing::info!(session = %session_id, "deleted session index");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<SessionManifest>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir = entry.path();
            let manifest = fs::read_to_string(dir.join(CURRENT))
                .ok()
                .filter(|name| parse_version(name.trim()).is_some())
                .and_then(|name| fs::read(dir.join(name.trim()).join(MANIFEST)).ok())
                .and_then(|bytes| serde_json::from_slice::<StoredManifest>(&bytes).ok());
            match manifest {
                Some(stored) => out.push(stored.manifest),
                // The directory name is a digest, so the session id cannot be recovered.
                None => tracing::warn!(dir = %dir.display(), "skipping corrupt session directory; re-index it to list it again"),
            }
        }
        out.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(out)
    }
}

fn parse_version(name: &str) -> Option<u64> {
    name.strip_prefix('v')?.parse().ok()
}

fn corrupt(session_id: &str, detail: String) -> Error {
    Error::BuildFailure(format!("stored index for session {session_id} is corrupt ({detail}); re-index the session"))
}

/// Serialize, write and fsync; returns the blake3 hex digest of the bytes.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| Error::BuildFailure(format!("failed to serialize {}: {e}", path.display())))?;
    let mut file = fs::File::create(path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

fn read_json<T: DeserializeOwned>(session_id: &str, path: &Path, digest: &str) -> Result<T> {
    let name = path.file_name().map_or_else(String::new, |n| n.to_string_lossy().to_string());
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(corrupt(session_id, format!("{name} is missing"))),
        Err(e) => return Err(e.into()),
    };
    if blake3::hash(&bytes).to_hex().as_str() != digest {
        return Err(corrupt(session_id, format!("{name} digest mismatch")));
    }
    serde_json::from_slice(&bytes).map_err(|e| corrupt(session_id, format!("{name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use studydb_core::config::Bm25Settings;
    use studydb_text::tokenize_all;

    fn artifacts(session_id: &str, texts: &[&str]) -> SessionArtifacts {
        let mut semantic = SemanticIndex::new(2);
        let vectors: Vec<Vec<f32>> = (0..texts.len()).map(|i| vec![i as f32, 1.0]).collect();
        semantic.build(&vectors).unwrap();
        let mut lexical = LexicalIndex::new(Bm25Settings::default());
        lexical.build(&tokenize_all(texts)).unwrap();
        SessionArtifacts::new(session_id, "test-embedder", Chunk::sequence(texts.iter().copied()), semantic, lexical)
    }

    #[test]
    fn fs_round_trip_and_versioning() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(tmp.path()).unwrap();
        let first = store.save(artifacts("session/1", &["a b", "c"])).unwrap();
        assert_eq!(first.version, 1);
        let second = store.save(artifacts("session/1", &["x", "y", "z"])).unwrap();
        assert_eq!(second.version, 2);

        let loaded = store.load("session/1").unwrap();
        assert_eq!(loaded.manifest, second);
        assert_eq!(loaded.chunks.len(), 3);

        let dir = store.session_dir("session/1");
        assert!(!dir.join("v1").exists(), "superseded version is removed");
        assert_eq!(fs::read_to_string(dir.join(CURRENT)).unwrap(), "v2");
    }

    #[test]
    fn fs_missing_session_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(tmp.path()).unwrap();
        assert!(matches!(store.load("nobody"), Err(Error::SessionNotFound(_))));
        assert!(matches!(store.manifest("nobody"), Err(Error::SessionNotFound(_))));
        store.delete("nobody").unwrap();
    }

    #[test]
    fn fs_tampered_artifact_is_build_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(tmp.path()).unwrap();
        store.save(artifacts("s", &["one", "two"])).unwrap();
        let chunks_path = store.session_dir("s").join("v1").join(CHUNKS);
        fs::write(&chunks_path, br#"[{"position":0,"text":"one"}]"#).unwrap();
        let err = store.load("s").unwrap_err();
        assert!(matches!(err, Error::BuildFailure(_)), "{err}");
        assert!(err.requires_rebuild());
    }

    #[test]
    fn fs_garbage_pointer_is_build_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(tmp.path()).unwrap();
        store.save(artifacts("s", &["one"])).unwrap();
        fs::write(store.session_dir("s").join(CURRENT), "../../etc").unwrap();
        assert!(matches!(store.load("s"), Err(Error::BuildFailure(_))));
    }

    #[test]
    fn fs_missing_manifest_is_build_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(tmp.path()).unwrap();
        store.save(artifacts("s", &["one"])).unwrap();
        fs::remove_file(store.session_dir("s").join("v1").join(MANIFEST)).unwrap();
        let err = store.load("s").unwrap_err();
        assert!(matches!(err, Error::BuildFailure(_)), "{err}");
        assert!(matches!(store.manifest("s"), Err(Error::BuildFailure(_))));
    }

    #[test]
    fn fs_pointer_to_missing_version_is_build_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(tmp.path()).unwrap();
        store.save(artifacts("s", &["one"])).unwrap();
        store.save(artifacts("ok", &["two"])).unwrap();
        fs::write(store.session_dir("s").join(CURRENT), "v7").unwrap();
        let err = store.load("s").unwrap_err();
        assert!(matches!(err, Error::BuildFailure(_)), "{err}");
        assert!(err.requires_rebuild());

        let listed: Vec<String> = store.list().unwrap().into_iter().map(|m| m.session_id).collect();
        assert_eq!(listed, vec!["ok".to_string()]);

        // Removing the pointer turns it back into a plain unknown session.
        fs::remove_file(store.session_dir("s").join(CURRENT)).unwrap();
        assert!(matches!(store.load("s"), Err(Error::SessionNotFound(_))));
    }

    #[test]
    fn fs_list_ignores_pointer_outside_session_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(tmp.path()).unwrap();
        store.save(artifacts("a", &["one"])).unwrap();
        store.save(artifacts("b", &["two"])).unwrap();
        // Point "b" at the sibling session's version directory.
        let sibling = store.session_dir("a").join("v1");
        fs::write(store.session_dir("b").join(CURRENT), format!("../{}", sibling.strip_prefix(tmp.path()).unwrap().display())).unwrap();
        let listed: Vec<String> = store.list().unwrap().into_iter().map(|m| m.session_id).collect();
        assert_eq!(listed, vec!["a".to_string()]);
    }

    #[test]
    fn fs_save_sweeps_leftover_staging_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(tmp.path()).unwrap();
        store.save(artifacts("s", &["one"])).unwrap();
        let leftover = store.session_dir("s").join(format!("{STAGING_PREFIX}crashed"));
        fs::create_dir(&leftover).unwrap();
        fs::write(leftover.join(CHUNKS), b"[]").unwrap();

        store.save(artifacts("s", &["two"])).unwrap();
        assert!(!leftover.exists());
        let mut names: Vec<String> = fs::read_dir(store.session_dir("s"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec![CURRENT.to_string(), "v2".to_string()]);
    }

    #[test]
    fn fs_list_reports_every_session() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(tmp.path()).unwrap();
        store.save(artifacts("b", &["one"])).unwrap();
        store.save(artifacts("a", &["one", "two"])).unwrap();
        let listed: Vec<(String, usize)> = store.list().unwrap().into_iter().map(|m| (m.session_id, m.chunk_count)).collect();
        assert_eq!(listed, vec![("a".to_string(), 2), ("b".to_string(), 1)]);
    }

    #[test]
    fn memory_snapshot_survives_replacement() {
        let store = MemorySessionStore::new();
        store.save(artifacts("s", &["old one", "old two"])).unwrap();
        let pinned = store.load("s").unwrap();
        let replaced = store.save(artifacts("s", &["new"])).unwrap();
        assert_eq!(replaced.version, 2);
        assert_eq!(pinned.chunks.len(), 2, "reader keeps the version it loaded");
        assert_eq!(store.load("s").unwrap().chunks.len(), 1);
        store.delete("s").unwrap();
        store.delete("s").unwrap();
        assert!(matches!(store.load("s"), Err(Error::SessionNotFound(_))));
    }

    #[test]
    fn inconsistent_triple_is_rejected_on_save() {
        let mut bad = artifacts("s", &["one", "two"]);
        bad.chunks.pop();
        let store = MemorySessionStore::new();
        assert!(matches!(store.save(bad), Err(Error::BuildFailure(_))));
    }
}
