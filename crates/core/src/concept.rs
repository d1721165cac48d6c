//! Concept Store
//!
//! Holds the static teaching content every persona draws from. The store is
//! loaded once from a JSON array at startup and never mutated afterwards.

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// A single unit of teachable content, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConceptRecord {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub sample_question: String,
}

/// Ordered, read-only collection of concept records.
///
/// Ids are not required to be unique. Lookups return the first record whose
/// id matches, in file order.
#[derive(Debug, Clone, Default)]
pub struct ConceptStore {
    concepts: Vec<ConceptRecord>,
}

impl ConceptStore {
    pub fn new(concepts: Vec<ConceptRecord>) -> Self {
        Self { concepts }
    }

    /// Loads the store from a JSON file containing an array of concepts.
    ///
    /// A missing file yields an empty store and a warning. A file that exists
    /// but cannot be read or parsed is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Content file not found. Starting with no concepts.");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read content file: {}", path.display()))?;
        let concepts: Vec<ConceptRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse content file: {}", path.display()))?;

        info!(count = concepts.len(), path = %path.display(), "Loaded concepts");
        Ok(Self { concepts })
    }

    /// Finds the first concept whose id equals the lowercased, trimmed input.
    pub fn find(&self, concept_id: &str) -> Option<&ConceptRecord> {
        let wanted = normalize_id(concept_id);
        self.concepts.iter().find(|c| c.id == wanted)
    }

    pub fn all(&self) -> &[ConceptRecord] {
        &self.concepts
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    /// Ids in file order, as an English list joined with `conjunction`
    /// (e.g. "variables, loops, and arrays").
    pub fn id_list(&self, conjunction: &str) -> String {
        let ids: Vec<&str> = self.concepts.iter().map(|c| c.id.as_str()).collect();
        match ids.as_slice() {
            [] => String::new(),
            [only] => only.to_string(),
            [first, second] => format!("{first} {conjunction} {second}"),
            [init @ .., last] => format!("{}, {conjunction} {last}", init.join(", ")),
        }
    }

    /// Titles in file order, one per line, for prompt context.
    pub fn title_lines(&self) -> String {
        self.concepts
            .iter()
            .map(|c| format!("- {} (id: {})", c.title, c.id))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn normalize_id(concept_id: &str) -> String {
    concept_id.trim().to_lowercase()
}
