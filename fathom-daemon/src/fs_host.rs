//! Filesystem-backed asset host.
//!
//! Every `<content_dir>/**/*.<source_extension>` file is an asset whose
//! identity is its content-relative path under the content prefix:
//! `Content/UI/WBP_Menu.uasset` → `/Game/UI/WBP_Menu`. Kinds come from the
//! naming convention; files with no recognised prefix are indexed for the
//! reference graph but never audited.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use fathom_core::{AssetIdentity, AssetKind, AuditConfig, AuditSection, AuditSnapshot, Candidate};
use fathom_detector::detect_kind;
use fathom_sync::{HostAdapter, HostError, KindFilter};

use crate::asset_graph::{AssetGraph, IndexedAsset, SearchHit, SearchQuery};
use crate::paths::content_root;

// ---------------------------------------------------------------------------
// Identity ↔ path mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLayout {
    root: PathBuf,
    prefix: String,
    extension: String,
}

impl ContentLayout {
    pub fn new(root: impl Into<PathBuf>, prefix: &str, extension: &str) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.to_string(),
            extension: extension.to_string(),
        }
    }

    pub fn from_config(project: &Path, config: &AuditConfig) -> Self {
        Self::new(
            content_root(project, &config.content_dir),
            &config.content_prefix,
            &config.source_extension,
        )
    }

    /// Same mapping over a different spelling of the root, e.g. its
    /// canonical form as reported by the watcher.
    pub fn rooted_at(&self, root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..self.clone()
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_artifact(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false)
    }

    /// Identity of the artifact at `path`; `None` outside the root or for
    /// other file types.
    pub fn identity_for(&self, path: &Path) -> Option<AssetIdentity> {
        if !self.is_artifact(path) {
            return None;
        }
        let rel = path.strip_prefix(&self.root).ok()?.with_extension("");
        let segments = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?;
        if segments.is_empty() {
            return None;
        }
        Some(AssetIdentity(format!("{}{}", self.prefix, segments.join("/"))))
    }

    pub fn source_path(&self, identity: &AssetIdentity) -> Option<PathBuf> {
        let rel = identity.relative_to(&self.prefix)?;
        let mut path = self.root.clone();
        let mut segments = rel.split('/').filter(|s| !s.is_empty()).peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_some() {
                path.push(segment);
            } else {
                path.push(format!("{segment}.{}", self.extension));
            }
        }
        Some(path)
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// A loaded artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsAsset {
    pub identity: AssetIdentity,
    pub kind: AssetKind,
    pub source_path: PathBuf,
    pub size: u64,
    pub references: Vec<AssetIdentity>,
}

/// Index state shared by every clone of a host.
#[derive(Debug, Default)]
struct IndexState {
    graph: AssetGraph,
    /// Edits applied while a scan walks the tree, replayed over its result so
    /// a save seen mid-scan survives the swap.
    journal: Option<Vec<(AssetIdentity, Option<IndexedAsset>)>>,
}

/// Cloning shares the index, so the daemon can update it while the audit
/// subsystem owns its own handle.
#[derive(Debug, Clone)]
pub struct FsHost {
    layout: ContentLayout,
    state: Arc<RwLock<IndexState>>,
    loading: Arc<AtomicBool>,
}

impl FsHost {
    pub fn new(layout: ContentLayout) -> Self {
        Self {
            layout,
            state: Arc::new(RwLock::new(IndexState::default())),
            loading: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(project: &Path, config: &AuditConfig) -> Self {
        Self::new(ContentLayout::from_config(project, config))
    }

    pub fn layout(&self) -> &ContentLayout {
        &self.layout
    }

    /// Report the index as loading until the next [`scan`](Self::scan) ends.
    /// Edits from here on are kept across that scan.
    pub fn begin_scan(&self) {
        self.loading.store(true, Ordering::Release);
        self.open_journal();
    }

    /// Rebuild the index from disk. Returns the number of assets with an
    /// audited kind.
    pub fn scan(&self) -> Result<usize, HostError> {
        let _loading = LoadingFlag::raise(&self.loading);
        self.open_journal();
        match self.walk() {
            Ok(graph) => Ok(self.install(graph)),
            Err(err) => {
                self.write_state().journal = None;
                Err(err)
            }
        }
    }

    /// Re-read one artifact into the index. `None` when it has no audited
    /// kind or is no longer on disk; a vanished artifact is forgotten.
    pub fn upsert(&self, identity: &AssetIdentity) -> Option<AssetKind> {
        let path = self.layout.source_path(identity)?;
        match self.read_asset(identity, &path) {
            Ok(asset) => {
                let kind = asset.kind;
                self.apply(identity, Some(asset));
                kind
            }
            Err(err) => {
                tracing::debug!(identity = %identity, error = %err, "artifact unreadable, forgetting");
                self.forget(identity);
                None
            }
        }
    }

    pub fn forget(&self, identity: &AssetIdentity) -> bool {
        self.apply(identity, None).is_some()
    }

    pub fn kind_of(&self, identity: &AssetIdentity) -> Option<AssetKind> {
        self.read_state().graph.kind_of(identity)
    }

    /// Indexed artifact, audited kind or not.
    pub fn asset(&self, identity: &AssetIdentity) -> Option<IndexedAsset> {
        self.read_state().graph.get(identity).cloned()
    }

    /// Packages `identity` names; `None` when it is not indexed.
    pub fn dependencies(&self, identity: &AssetIdentity) -> Option<Vec<AssetIdentity>> {
        self.read_state()
            .graph
            .dependencies(identity)
            .map(<[AssetIdentity]>::to_vec)
    }

    /// Indexed assets naming `identity`, sorted.
    pub fn referencers(&self, identity: &AssetIdentity) -> Vec<AssetIdentity> {
        self.read_state().graph.referencers(identity)
    }

    pub fn search(&self, query: &SearchQuery) -> Vec<SearchHit> {
        self.read_state().graph.search(query)
    }

    /// Assets with an audited kind.
    pub fn len(&self) -> usize {
        self.read_state().graph.audited_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_state(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_journal(&self) {
        self.write_state().journal.get_or_insert_with(Vec::new);
    }

    fn apply(&self, identity: &AssetIdentity, edit: Option<IndexedAsset>) -> Option<IndexedAsset> {
        let mut state = self.write_state();
        if let Some(journal) = state.journal.as_mut() {
            journal.push((identity.clone(), edit.clone()));
        }
        match edit {
            Some(asset) => state.graph.insert(identity.clone(), asset),
            None => state.graph.remove(identity),
        }
    }

    fn walk(&self) -> Result<AssetGraph, HostError> {
        let mut graph = AssetGraph::default();
        for path in collect_artifacts(&self.layout)? {
            let Some(identity) = self.layout.identity_for(&path) else {
                continue;
            };
            match self.read_asset(&identity, &path) {
                Ok(asset) => {
                    graph.insert(identity, asset);
                }
                Err(err) => tracing::debug!(error = %err, "skipping artifact that vanished mid-scan"),
            }
        }
        Ok(graph)
    }

    /// Swap in a freshly walked graph with the journal replayed over it.
    fn install(&self, mut graph: AssetGraph) -> usize {
        let mut state = self.write_state();
        for (identity, edit) in state.journal.take().unwrap_or_default() {
            match edit {
                Some(asset) => graph.insert(identity, asset),
                None => graph.remove(&identity),
            };
        }
        state.graph = graph;
        state.graph.audited_len()
    }

    fn read_asset(&self, identity: &AssetIdentity, path: &Path) -> Result<IndexedAsset, HostError> {
        let bytes = fs::read(path).map_err(|source| match source.kind() {
            ErrorKind::NotFound => HostError::NotFound {
                identity: identity.to_string(),
            },
            _ => HostError::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;
        Ok(IndexedAsset {
            kind: detect_kind(identity).ok(),
            size: bytes.len() as u64,
            dependencies: extract_references(&bytes, self.layout.prefix(), identity),
        })
    }
}

impl HostAdapter for FsHost {
    type Handle = FsAsset;

    fn enumerate_candidates(&self, filter: &KindFilter) -> Vec<Candidate> {
        self.read_state()
            .graph
            .audited()
            .filter(|(identity, kind)| filter.accepts(identity, *kind))
            .map(|(identity, kind)| Candidate {
                identity: identity.clone(),
                kind,
            })
            .collect()
    }

    fn is_store_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    fn load(&self, identity: &AssetIdentity, kind: AssetKind) -> Result<FsAsset, HostError> {
        let not_found = || HostError::NotFound {
            identity: identity.to_string(),
        };
        let source_path = self.layout.source_path(identity).ok_or_else(not_found)?;
        let bytes = match fs::read(&source_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(source) => {
                return Err(HostError::Io {
                    path: source_path,
                    source,
                })
            }
        };
        Ok(FsAsset {
            identity: identity.clone(),
            kind,
            size: bytes.len() as u64,
            references: extract_references(&bytes, self.layout.prefix(), identity),
            source_path,
        })
    }

    fn resolve_source_path(&self, identity: &AssetIdentity) -> Option<PathBuf> {
        self.layout
            .source_path(identity)
            .filter(|path| path.is_file())
    }

    fn gather(&self, asset: &FsAsset) -> AuditSnapshot {
        let file = asset
            .source_path
            .strip_prefix(self.layout.root())
            .unwrap_or(&asset.source_path)
            .display()
            .to_string();
        let summary = AuditSection::new("Summary")
            .line(format!("Package: {}", asset.identity))
            .line(format!("File: {file}"))
            .line(format!("Size: {} bytes", asset.size));
        let mut references = AuditSection::new("References");
        references.lines = asset.references.iter().map(|r| r.to_string()).collect();

        AuditSnapshot::new(
            asset.identity.clone(),
            asset.kind,
            Some(asset.source_path.clone()),
        )
        .with_section(summary)
        .with_section(references)
    }
}

/// Holds the loading flag up for the lifetime of a scan, including one that
/// errors or panics.
struct LoadingFlag<'a>(&'a AtomicBool);

impl<'a> LoadingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for LoadingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Every artifact under the layout root, sorted. A missing root is empty.
fn collect_artifacts(layout: &ContentLayout) -> Result<Vec<PathBuf>, HostError> {
    let mut dirs = vec![layout.root().to_path_buf()];
    let mut files = Vec::new();
    let mut cursor = 0;
    while cursor < dirs.len() {
        let current = dirs[cursor].clone();
        cursor += 1;
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(source) => {
                return Err(HostError::Io {
                    path: current,
                    source,
                })
            }
        };
        for entry in entries {
            let entry = entry.map_err(|source| HostError::Io {
                path: current.clone(),
                source,
            })?;
            let path = entry.path();
            let ty = entry.file_type().map_err(|source| HostError::Io {
                path: path.clone(),
                source,
            })?;
            if ty.is_dir() {
                dirs.push(path);
            } else if ty.is_file() && layout.is_artifact(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Package names under `prefix` embedded in `bytes`, without object suffixes,
/// deduplicated and sorted. `own` is left out.
pub fn extract_references(bytes: &[u8], prefix: &str, own: &AssetIdentity) -> Vec<AssetIdentity> {
    let needle = prefix.as_bytes();
    let mut found = BTreeSet::new();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut pos = 0;
    while let Some(offset) = bytes[pos..].windows(needle.len()).position(|w| w == needle) {
        let start = pos + offset;
        let mut end = start + needle.len();
        while end < bytes.len() && is_package_byte(bytes[end]) {
            end += 1;
        }
        let raw = &bytes[start..end];
        let package = raw.split(|b| *b == b'.').next().unwrap_or(raw);
        let package = trim_trailing_slashes(package);
        if package.len() > needle.len() {
            if let Ok(name) = std::str::from_utf8(package) {
                let identity = AssetIdentity::from(name);
                if &identity != own {
                    found.insert(identity);
                }
            }
        }
        pos = end.max(start + 1);
    }
    found.into_iter().collect()
}

fn is_package_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'/' | b'-' | b'.')
}

fn trim_trailing_slashes(mut bytes: &[u8]) -> &[u8] {
    while let [rest @ .., b'/'] = bytes {
        bytes = rest;
    }
    bytes
}
