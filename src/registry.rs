//! Target identity and the registry of monitored streams.
//!
//! A [`TargetKey`] names one (target, region) stream. Keys are built from the
//! configuration exactly once; their display form is write-only.

use crate::config::TargetSpec;

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Region label used for streams probed from this host.
pub const LOCAL_REGION: &str = "local";

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("no targets to monitor")]
    NoTargets,
}

/// Unique identity of one monitored (target, region) stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TargetKey {
    target_name: String,
    region: String,
    is_local: bool,
}

impl TargetKey {
    pub fn new(target_name: impl Into<String>, region: impl Into<String>, is_local: bool) -> Self {
        Self {
            target_name: target_name.into(),
            region: region.into(),
            is_local,
        }
    }

    pub fn local(target_name: impl Into<String>) -> Self {
        Self::new(target_name, LOCAL_REGION, true)
    }

    pub fn regional(target_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self::new(target_name, region, false)
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local {
            write!(f, "{}", self.target_name)
        } else {
            write!(f, "{} → {}", self.target_name, self.region)
        }
    }
}

/// A key together with the spec it was expanded from.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub key: TargetKey,
    pub spec: TargetSpec,
}

/// Immutable enumeration of every monitored stream, in configuration order.
#[derive(Debug, Clone)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
    target_names: Vec<String>,
}

impl Registry {
    /// Expand targets into one key per (target, region) pair.
    ///
    /// A target uses its own region list, else `global_regions`, else a single
    /// local stream. Targets sharing a name get an ordinal suffix so that no
    /// two keys collide.
    pub fn build(targets: &[TargetSpec], global_regions: &[String]) -> Result<Self, RegistryError> {
        if targets.is_empty() {
            return Err(RegistryError::NoTargets);
        }

        let unique_names = assign_unique_names(targets);
        let mut entries = Vec::new();

        for (spec, name) in targets.iter().zip(&unique_names) {
            let regions: &[String] = if !spec.regions.is_empty() {
                &spec.regions
            } else {
                global_regions
            };

            if regions.is_empty() {
                entries.push(RegistryEntry {
                    key: TargetKey::local(name.clone()),
                    spec: spec.clone(),
                });
                continue;
            }

            let mut seen = HashSet::new();
            for region in regions {
                if !seen.insert(region.as_str()) {
                    continue;
                }
                entries.push(RegistryEntry {
                    key: TargetKey::regional(name.clone(), region.clone()),
                    spec: spec.clone(),
                });
            }
        }

        tracing::debug!(
            "Registry: {} targets expanded to {} streams",
            unique_names.len(),
            entries.len()
        );

        Ok(Self {
            entries,
            target_names: unique_names,
        })
    }

    pub fn all_keys(&self) -> Vec<TargetKey> {
        self.entries.iter().map(|e| e.key.clone()).collect()
    }

    pub fn keys_for_target(&self, target_name: &str) -> Vec<TargetKey> {
        self.entries
            .iter()
            .filter(|e| e.key.target_name() == target_name)
            .map(|e| e.key.clone())
            .collect()
    }

    /// True when at least one target fans out into more than one stream.
    pub fn has_multiple_keys_per_target(&self) -> bool {
        self.target_names
            .iter()
            .any(|name| self.entries.iter().filter(|e| e.key.target_name() == name).count() > 1)
    }

    /// True when any stream runs in a named region.
    pub fn has_regions(&self) -> bool {
        self.entries.iter().any(|e| !e.key.is_local())
    }

    pub fn spec_for(&self, key: &TargetKey) -> Option<&TargetSpec> {
        self.entries.iter().find(|e| &e.key == key).map(|e| &e.spec)
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    /// Unique target names in configuration order.
    pub fn target_names(&self) -> &[String] {
        &self.target_names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Give every target a unique name, suffixing `#n` onto repeated names.
fn assign_unique_names(targets: &[TargetSpec]) -> Vec<String> {
    let mut taken: HashSet<String> = targets.iter().map(|t| t.name.clone()).collect();
    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    for t in targets {
        *occurrences.entry(t.name.as_str()).or_default() += 1;
    }

    let mut ordinals: HashMap<&str, usize> = HashMap::new();
    let mut names = Vec::with_capacity(targets.len());

    for t in targets {
        if occurrences[t.name.as_str()] == 1 {
            names.push(t.name.clone());
            continue;
        }

        let ordinal = ordinals.entry(t.name.as_str()).or_insert(0);
        let name = loop {
            *ordinal += 1;
            let candidate = format!("{}#{}", t.name, ordinal);
            // A literal target may already be called "api#2".
            if taken.insert(candidate.clone()) {
                break candidate;
            }
        };
        names.push(name);
    }

    names
}
