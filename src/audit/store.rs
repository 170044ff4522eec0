//! Score-ordered sets backing the event cache.
//!
//! The event manager only needs sorted-set semantics: add a unique member
//! with a score, read members back ordered by `(score, member)`, and drop
//! members scored below a cutoff. [`MemoryBackend`] provides that in process;
//! an external store would implement [`SortedSetBackend`] the same way.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("event store unavailable: {0}")]
    Unavailable(String),
    #[error("event store IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("event store snapshot is corrupt: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error(transparent)]
    Event(#[from] crate::audit::event::EventError),
}

pub trait SortedSetBackend: Send + Sync {
    /// Cheap liveness probe.
    fn ping(&self) -> Result<(), StoreError>;

    /// Insert `member`, or move it to `score` if already present.
    fn zadd(&self, namespace: &str, member: String, score: i64) -> Result<(), StoreError>;

    /// Every member in ascending score order.
    fn zrange(&self, namespace: &str) -> Result<Vec<String>, StoreError>;

    /// Remove members scored strictly below `min_score`. Returns how many went.
    fn prune_before(&self, namespace: &str, min_score: i64) -> Result<usize, StoreError>;

    /// Flush to durable storage, if the backend has any.
    fn persist(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: String, score: i64) {
        if let Some(previous) = self.scores.insert(member.clone(), score) {
            self.ordered.remove(&(previous, member.clone()));
        }
        self.ordered.insert((score, member));
    }

    fn members(&self) -> Vec<String> {
        self.ordered.iter().map(|(_, member)| member.clone()).collect()
    }

    fn prune_before(&mut self, min_score: i64) -> usize {
        let keep = self.ordered.split_off(&(min_score, String::new()));
        let removed = std::mem::replace(&mut self.ordered, keep);
        for (_, member) in &removed {
            self.scores.remove(member);
        }
        removed.len()
    }

    fn len(&self) -> usize {
        self.ordered.len()
    }
}

/// On-disk snapshot layout.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    namespaces: HashMap<String, Vec<ScoredMember>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ScoredMember {
    score: i64,
    member: String,
}

/// A thread-safe, in-process sorted-set store.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    sets: Arc<DashMap<String, SortedSet>>,
    persistence_path: Option<PathBuf>,
}

impl MemoryBackend {
    /// Create a new empty store.
    pub fn new(persistence_path: Option<PathBuf>) -> Self {
        Self {
            sets: Arc::new(DashMap::new()),
            persistence_path,
        }
    }

    /// Load from file if it exists; later saves go to the same path.
    pub fn load_from_file(path: &Path) -> Result<Self, StoreError> {
        let backend = Self::new(Some(path.to_path_buf()));
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let snapshot: Snapshot = serde_json::from_reader(reader)?;
            let mut total = 0;
            for (namespace, members) in snapshot.namespaces {
                let mut set = SortedSet::default();
                for scored in members {
                    set.insert(scored.member, scored.score);
                }
                total += set.len();
                backend.sets.insert(namespace, set);
            }
            tracing::info!(path = %path.display(), events = total, "Loaded audit events from snapshot");
        }
        Ok(backend)
    }

    /// Save to file.
    pub fn save_to_file(&self) -> Result<(), StoreError> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };

        let namespaces = self
            .sets
            .iter()
            .map(|entry| {
                let members = entry
                    .value()
                    .ordered
                    .iter()
                    .map(|(score, member)| ScoredMember {
                        score: *score,
                        member: member.clone(),
                    })
                    .collect();
                (entry.key().clone(), members)
            })
            .collect();
        let snapshot = Snapshot { namespaces };

        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &snapshot)?;
        tracing::info!(path = %path.display(), "Saved audit events snapshot");
        Ok(())
    }

    /// Number of members in a namespace.
    pub fn count(&self, namespace: &str) -> usize {
        self.sets.get(namespace).map(|set| set.len()).unwrap_or(0)
    }
}

impl SortedSetBackend for MemoryBackend {
    fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn zadd(&self, namespace: &str, member: String, score: i64) -> Result<(), StoreError> {
        self.sets.entry(namespace.to_string()).or_default().insert(member, score);
        Ok(())
    }

    fn zrange(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.sets.get(namespace).map(|set| set.members()).unwrap_or_default())
    }

    fn prune_before(&self, namespace: &str, min_score: i64) -> Result<usize, StoreError> {
        Ok(self
            .sets
            .get_mut(namespace)
            .map(|mut set| set.prune_before(min_score))
            .unwrap_or(0))
    }

    fn persist(&self) -> Result<(), StoreError> {
        self.save_to_file()
    }
}
