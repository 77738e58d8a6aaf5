//! Offline knowledge catalog used when no generation backend can answer.

use anyhow::{Context, Result};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::models::GENERAL_SUBJECT;
use crate::topics::{ExclusionSet, extract_topic};

const BUILTIN_KNOWLEDGE_BASE: &str = include_str!("../data/knowledge_base.json");

/// Phase labels containing this marker use the primary bucket.
pub const PRIMARY_MARKER: &str = "小学";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseBucket {
    Primary,
    Advanced,
}

impl PhaseBucket {
    pub fn classify(phase: &str) -> Self {
        if phase.contains(PRIMARY_MARKER) {
            PhaseBucket::Primary
        } else {
            PhaseBucket::Advanced
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct KnowledgeBase {
    #[serde(default)]
    primary: HashMap<String, Vec<String>>,
    #[serde(default)]
    advanced: HashMap<String, Vec<String>>,
}

impl KnowledgeBase {
    fn bucket(&self, bucket: PhaseBucket) -> &HashMap<String, Vec<String>> {
        match bucket {
            PhaseBucket::Primary => &self.primary,
            PhaseBucket::Advanced => &self.advanced,
        }
    }
}

/// Static (phase, subject) keyed candidate cards.
#[derive(Debug, Clone)]
pub struct FallbackCatalog {
    data: Arc<KnowledgeBase>,
}

impl FallbackCatalog {
    /// Catalog compiled into the binary.
    pub fn builtin() -> Self {
        Self::from_json_str(BUILTIN_KNOWLEDGE_BASE).unwrap_or_else(|e| {
            error!(error = %e, "Built-in knowledge base is malformed, using empty catalog");
            Self {
                data: Arc::new(KnowledgeBase::default()),
            }
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let data: KnowledgeBase =
            serde_json::from_str(json).context("Failed to parse knowledge base JSON")?;
        Ok(Self { data: Arc::new(data) })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read knowledge base at {}", path.display()))?;
        Self::from_json_str(&json)
    }

    /// Load from `path` when given, otherwise (or on failure) the built-in data.
    pub fn load(path: Option<&Path>) -> Self {
        match path {
            Some(path) => match Self::from_path(path) {
                Ok(catalog) => {
                    info!(path = %path.display(), "Loaded knowledge base");
                    catalog
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Could not load knowledge base, using built-in catalog"
                    );
                    Self::builtin()
                }
            },
            None => Self::builtin(),
        }
    }

    /// Candidates for a subject: the subject itself, then the phase's general
    /// bucket, then a generated placeholder. Never empty.
    pub fn candidates(&self, subject: &str, phase: &str) -> Vec<String> {
        let bucket = self.data.bucket(PhaseBucket::classify(phase));
        let non_empty = |key: &str| {
            bucket
                .get(key)
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|c| !c.trim().is_empty())
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .filter(|entries| !entries.is_empty())
        };

        non_empty(subject)
            .or_else(|| non_empty(GENERAL_SUBJECT))
            .unwrap_or_else(|| vec![placeholder(subject)])
    }

    /// Candidates whose topic is not excluded. When every candidate is
    /// excluded the unfiltered list is returned instead.
    pub fn filtered_candidates(
        &self,
        subject: &str,
        phase: &str,
        exclusions: &ExclusionSet,
    ) -> Vec<String> {
        let candidates = self.candidates(subject, phase);
        if exclusions.is_empty() {
            return candidates;
        }

        let filtered: Vec<String> = candidates
            .iter()
            .filter(|c| !exclusions.is_duplicate(&extract_topic(c)))
            .cloned()
            .collect();

        if filtered.is_empty() {
            debug!(
                subject = %subject,
                candidate_count = candidates.len(),
                "All catalog candidates excluded, ignoring exclusions"
            );
            candidates
        } else {
            filtered
        }
    }

    pub fn pick(&self, subject: &str, phase: &str, exclusions: &ExclusionSet) -> String {
        self.pick_with(subject, phase, exclusions, &mut rand::thread_rng())
    }

    /// Uniform pick from the filtered candidates using `rng`.
    pub fn pick_with<R: Rng + ?Sized>(
        &self,
        subject: &str,
        phase: &str,
        exclusions: &ExclusionSet,
        rng: &mut R,
    ) -> String {
        let candidates = self.filtered_candidates(subject, phase, exclusions);
        candidates
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| placeholder(subject))
    }
}

impl Default for FallbackCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn placeholder(subject: &str) -> String {
    format!("探索发现：{}充满了奥秘，保持好奇心！", subject)
}
