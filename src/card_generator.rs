//! Daily card generation with duplicate avoidance.
//!
//! A configured backend is asked for a card up to `max_attempts` times. Each
//! answer's topic is checked against the exclusion set; duplicates are
//! retried, and the last attempt is kept even if it still collides. Backend
//! failures are never retried: the offline catalog answers instead.

use chrono::NaiveDate;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::FallbackCatalog;
use crate::diagnostics::{AttemptEvent, AttemptRecord, GenerationLog};
use crate::llm_providers::{CompletionBackend, CompletionRequest, GenerationBackend};
use crate::log_generation;
use crate::topics::{ExclusionSet, extract_topic};

const CARD_SYSTEM_PROMPT: &str = "You are a creative and expert tutor. Output high-quality educational knowledge cards. \
Format: 'Concept Name：Explanation'. Mathematical formulas MUST be standard LaTeX wrapped in single $ signs. \
Be concise but insightful.";

pub const EXPLAIN_UNAVAILABLE: &str = "智能助手暂不可用，请配置 API Key。";
pub const EXPLAIN_FAILED: &str = "抱歉，生成详解时遇到问题，请稍后再试。";

/// Tunables for generation. The source of truth for defaults is `Default`.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationPolicy {
    pub max_attempts: u32,
    pub prompt_exclusion_cap: usize,
    pub card_timeout: Duration,
    pub explain_timeout: Duration,
    pub card_temperature: f32,
    pub explain_temperature: f32,
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            prompt_exclusion_cap: 20,
            card_timeout: Duration::from_secs(30),
            explain_timeout: Duration::from_secs(60),
            card_temperature: 0.8,
            explain_temperature: 0.7,
        }
    }
}

/// Learner context for one card.
#[derive(Debug, Clone, Copy)]
pub struct CardRequest<'a> {
    pub subject: &'a str,
    pub grade: &'a str,
    pub phase: &'a str,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    NoBackend,
    BackendError(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::NoBackend => write!(f, "no generation backend configured"),
            FallbackReason::BackendError(e) => write!(f, "backend error: {}", e),
        }
    }
}

/// How a card was produced.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// The backend produced a non-duplicate topic.
    Accepted { content: String, attempts: u32 },
    /// Every attempt was a duplicate; `content` is the final attempt.
    Exhausted { content: String, attempts: u32 },
    /// Catalog content was used.
    Fallback { content: String, reason: FallbackReason },
}

impl GenerationOutcome {
    pub fn content(&self) -> &str {
        match self {
            GenerationOutcome::Accepted { content, .. }
            | GenerationOutcome::Exhausted { content, .. }
            | GenerationOutcome::Fallback { content, .. } => content,
        }
    }

    pub fn into_content(self) -> String {
        match self {
            GenerationOutcome::Accepted { content, .. }
            | GenerationOutcome::Exhausted { content, .. }
            | GenerationOutcome::Fallback { content, .. } => content,
        }
    }

    /// Backend calls made; zero when the catalog answered without one.
    pub fn attempts(&self) -> u32 {
        match self {
            GenerationOutcome::Accepted { attempts, .. } | GenerationOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
            GenerationOutcome::Fallback { reason: FallbackReason::NoBackend, .. } => 0,
            GenerationOutcome::Fallback { reason: FallbackReason::BackendError(_), .. } => 1,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, GenerationOutcome::Fallback { .. })
    }
}

#[derive(Clone)]
pub struct CardGenerator {
    backend: GenerationBackend,
    catalog: FallbackCatalog,
    policy: GenerationPolicy,
    log: GenerationLog,
}

impl CardGenerator {
    pub fn new(
        backend: GenerationBackend,
        catalog: FallbackCatalog,
        policy: GenerationPolicy,
        log: GenerationLog,
    ) -> Self {
        Self {
            backend,
            catalog,
            policy,
            log,
        }
    }

    /// Catalog-only generator with default policy and no diagnostic file.
    pub fn offline() -> Self {
        Self::new(
            GenerationBackend::Absent,
            FallbackCatalog::builtin(),
            GenerationPolicy::default(),
            GenerationLog::disabled(),
        )
    }

    pub fn backend(&self) -> &GenerationBackend {
        &self.backend
    }

    pub fn policy(&self) -> &GenerationPolicy {
        &self.policy
    }

    /// Produce one card. Never fails: every error path ends in the catalog.
    pub async fn generate(&self, request: &CardRequest<'_>, exclusions: &ExclusionSet) -> GenerationOutcome {
        let backend = match &self.backend {
            GenerationBackend::Configured(backend) => Arc::clone(backend),
            GenerationBackend::Absent => {
                return self.fallback(request, exclusions, FallbackReason::NoBackend).await;
            }
        };

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let completion = self.card_completion(request, exclusions);

            let content = match backend.complete(&completion).await {
                Ok(content) => content,
                Err(e) => {
                    self.log
                        .record(
                            AttemptRecord::new(request.subject, AttemptEvent::BackendError)
                                .with_attempt(attempt)
                                .with_detail(e.to_string()),
                        )
                        .await;
                    return self
                        .fallback(request, exclusions, FallbackReason::BackendError(e.to_string()))
                        .await;
                }
            };

            let topic = extract_topic(&content);
            if !exclusions.is_duplicate(&topic) {
                log_generation!(accepted, subject = request.subject, attempt = attempt, topic = topic);
                self.record_attempt(request.subject, AttemptEvent::Accepted, attempt, &topic)
                    .await;
                return GenerationOutcome::Accepted {
                    content,
                    attempts: attempt,
                };
            }

            if attempt >= max_attempts {
                log_generation!(exhausted, subject = request.subject, attempt = attempt, topic = topic);
                self.record_attempt(request.subject, AttemptEvent::Exhausted, attempt, &topic)
                    .await;
                return GenerationOutcome::Exhausted {
                    content,
                    attempts: attempt,
                };
            }

            log_generation!(retry, subject = request.subject, attempt = attempt, topic = topic);
            self.record_attempt(request.subject, AttemptEvent::DuplicateRetry, attempt, &topic)
                .await;
        }
    }

    /// Detailed explanation of a card. Failures become user-facing messages.
    pub async fn explain(&self, content: &str, subject: &str, grade: &str, phase: &str) -> String {
        let backend = match &self.backend {
            GenerationBackend::Configured(backend) => Arc::clone(backend),
            GenerationBackend::Absent => return EXPLAIN_UNAVAILABLE.to_string(),
        };

        let completion = CompletionRequest {
            system_prompt: format!(
                "You are an expert {subject} tutor for {phase} {grade} students. \
                 Your goal is to explain {subject} concepts clearly and accurately."
            ),
            user_prompt: format!(
                "Please explain the following {subject} concept in detail.\n\n\
                 Concept: '{content}'\n\n\
                 Requirements:\n\
                 1. Explain ONLY this concept.\n\
                 2. Use clear, encouraging language suitable for {grade}.\n\
                 3. Include examples/formulas if applicable.\n\
                 4. Output in Markdown."
            ),
            timeout: self.policy.explain_timeout,
            temperature: self.policy.explain_temperature,
        };

        match backend.complete(&completion).await {
            Ok(explanation) => explanation,
            Err(e) => {
                tracing::warn!(subject = %subject, error = %e, "Explanation request failed");
                EXPLAIN_FAILED.to_string()
            }
        }
    }

    fn card_completion(&self, request: &CardRequest<'_>, exclusions: &ExclusionSet) -> CompletionRequest {
        let recent = exclusions.most_recent(self.policy.prompt_exclusion_cap);
        let avoid = if recent.is_empty() {
            String::new()
        } else {
            format!(
                " These topics were covered recently and MUST NOT be repeated, not even as a variant: {}.",
                recent.join("、")
            )
        };

        let entropy: u64 = rand::random();
        CompletionRequest {
            system_prompt: CARD_SYSTEM_PROMPT.to_string(),
            user_prompt: format!(
                "Today is {date}. Generate a UNIQUE, interesting, and slightly challenging educational card \
                 for a {phase} {grade} student studying {subject}.{avoid} Language: Chinese. Max 60 words. \
                 Aim for 'lesser-known' facts or clear explanations of core concepts. \
                 Format strictly: 'Concept Name：Content'. Pick a random sub-topic. (Entropy: {entropy})",
                date = request.date.format("%Y-%m-%d"),
                phase = request.phase,
                grade = request.grade,
                subject = request.subject,
            ),
            timeout: self.policy.card_timeout,
            temperature: self.policy.card_temperature,
        }
    }

    async fn fallback(
        &self,
        request: &CardRequest<'_>,
        exclusions: &ExclusionSet,
        reason: FallbackReason,
    ) -> GenerationOutcome {
        log_generation!(fallback, subject = request.subject, reason = reason);
        let content = self.catalog.pick(request.subject, request.phase, exclusions);
        self.log
            .record(
                AttemptRecord::new(request.subject, AttemptEvent::Fallback)
                    .with_topic(&extract_topic(&content))
                    .with_detail(reason.to_string()),
            )
            .await;
        GenerationOutcome::Fallback { content, reason }
    }

    async fn record_attempt(&self, subject: &str, event: AttemptEvent, attempt: u32, topic: &str) {
        self.log
            .record(
                AttemptRecord::new(subject, event)
                    .with_attempt(attempt)
                    .with_topic(topic),
            )
            .await;
    }
}
