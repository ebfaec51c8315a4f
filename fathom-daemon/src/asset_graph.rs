//! In-memory reference graph over the content tree.
//!
//! Every artifact under the content root is a node, audited kind or not.
//! Forward edges are the package names embedded in its bytes; the reverse
//! index is kept in step on every insert and remove so referencer lookups
//! never walk the whole graph.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use fathom_core::{AssetIdentity, AssetKind};

/// Result cap applied when a search names none, or names zero.
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

/// One indexed artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedAsset {
    /// `None` for artifacts without an audited naming prefix.
    pub kind: Option<AssetKind>,
    pub size: u64,
    /// Sorted, deduplicated, never containing the asset itself.
    pub dependencies: Vec<AssetIdentity>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetGraph {
    assets: BTreeMap<AssetIdentity, IndexedAsset>,
    referencers: BTreeMap<AssetIdentity, BTreeSet<AssetIdentity>>,
}

impl AssetGraph {
    /// Add or replace `identity`, relinking its outgoing edges.
    pub fn insert(&mut self, identity: AssetIdentity, asset: IndexedAsset) -> Option<IndexedAsset> {
        let previous = self.remove(&identity);
        for dependency in &asset.dependencies {
            self.referencers
                .entry(dependency.clone())
                .or_default()
                .insert(identity.clone());
        }
        self.assets.insert(identity, asset);
        previous
    }

    /// Drop `identity` and its outgoing edges. Edges pointing at it from other
    /// assets stay: those assets still name it.
    pub fn remove(&mut self, identity: &AssetIdentity) -> Option<IndexedAsset> {
        let removed = self.assets.remove(identity)?;
        for dependency in &removed.dependencies {
            if let Some(sources) = self.referencers.get_mut(dependency) {
                sources.remove(identity);
                if sources.is_empty() {
                    self.referencers.remove(dependency);
                }
            }
        }
        Some(removed)
    }

    pub fn get(&self, identity: &AssetIdentity) -> Option<&IndexedAsset> {
        self.assets.get(identity)
    }

    pub fn contains(&self, identity: &AssetIdentity) -> bool {
        self.assets.contains_key(identity)
    }

    pub fn kind_of(&self, identity: &AssetIdentity) -> Option<AssetKind> {
        self.assets.get(identity).and_then(|asset| asset.kind)
    }

    /// Assets with an audited kind, in identity order.
    pub fn audited(&self) -> impl Iterator<Item = (&AssetIdentity, AssetKind)> + '_ {
        self.assets
            .iter()
            .filter_map(|(identity, asset)| asset.kind.map(|kind| (identity, kind)))
    }

    pub fn audited_len(&self) -> usize {
        self.audited().count()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn dependencies(&self, identity: &AssetIdentity) -> Option<&[AssetIdentity]> {
        self.assets
            .get(identity)
            .map(|asset| asset.dependencies.as_slice())
    }

    /// Assets naming `identity`, sorted. Empty for unreferenced packages.
    pub fn referencers(&self, identity: &AssetIdentity) -> Vec<AssetIdentity> {
        self.referencers
            .get(identity)
            .map(|sources| sources.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Score every asset against `query`, best first, capped at its limit.
    pub fn search(&self, query: &SearchQuery) -> Vec<SearchHit> {
        let tokens: Vec<String> = query
            .terms
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        let prefix = query.path_prefix.as_deref().filter(|p| !p.is_empty());

        let mut hits: Vec<SearchHit> = self
            .assets
            .iter()
            .filter(|(identity, _)| prefix.map_or(true, |p| identity.as_str().starts_with(p)))
            .filter(|(_, asset)| query.kind.map_or(true, |kind| asset.kind == Some(kind)))
            .filter_map(|(identity, asset)| {
                let score = score_tokens(identity, &tokens)?;
                Some(SearchHit {
                    package: identity.clone(),
                    name: identity.short_name().to_string(),
                    kind: asset.kind,
                    score,
                })
            })
            .collect();

        // Stable: equal scores stay in identity order.
        hits.sort_by(|a, b| b.score.cmp(&a.score));
        hits.truncate(query.effective_limit());
        hits
    }
}

/// Lowest per-token score, or `None` if any token misses. No tokens is
/// browse mode and scores zero.
fn score_tokens(identity: &AssetIdentity, tokens: &[String]) -> Option<u8> {
    let name = identity.short_name().to_lowercase();
    let package = identity.as_str().to_lowercase();
    let mut lowest = None;
    for token in tokens {
        let score = if name == *token {
            3
        } else if name.starts_with(token.as_str()) {
            2
        } else if name.contains(token.as_str()) {
            1
        } else if package.contains(token.as_str()) {
            0
        } else {
            return None;
        };
        lowest = Some(lowest.map_or(score, |current: u8| current.min(score)));
    }
    Some(lowest.unwrap_or(0))
}

/// Name search over the graph. At least one of `terms`, `kind` or
/// `path_prefix` must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub terms: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<AssetKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn terms(terms: impl Into<String>) -> Self {
        Self {
            terms: terms.into(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.trim().is_empty()
            && self.kind.is_none()
            && self.path_prefix.as_deref().map_or(true, str::is_empty)
    }

    pub fn effective_limit(&self) -> usize {
        match self.limit {
            Some(0) | None => DEFAULT_SEARCH_LIMIT,
            Some(limit) => limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub package: AssetIdentity,
    pub name: String,
    pub kind: Option<AssetKind>,
    /// 3 exact name, 2 name prefix, 1 name substring, 0 path only.
    pub score: u8,
}
