use anyhow::Result;
use chrono::NaiveDate;
use std::time::Instant;
use uuid::Uuid;

use crate::card_generator::{CardGenerator, CardRequest};
use crate::database::Database;
use crate::errors::CardError;
use crate::models::*;
use crate::topics::{ExclusionSet, extract_topic};
use crate::{log_service_start, log_service_success, log_service_warn};

/// Default number of past entries whose topics seed the exclusion set.
pub const DEFAULT_HISTORY_WINDOW: u32 = 15;

#[derive(Clone)]
pub struct CardService {
    db: Database,
    generator: CardGenerator,
    history_window: u32,
}

impl CardService {
    pub fn new(db: Database, generator: CardGenerator, history_window: u32) -> Self {
        Self {
            db,
            generator,
            history_window,
        }
    }

    pub fn generator(&self) -> &CardGenerator {
        &self.generator
    }

    // Learner profiles
    pub async fn create_user(&self, request: CreateUserRequest) -> Result<User, CardError> {
        if request.name.trim().is_empty() {
            return Err(CardError::Validation("User name is required".to_string()));
        }
        if self.db.get_user_by_name(&request.name).await?.is_some() {
            return Err(CardError::DuplicateUser(request.name.trim().to_string()));
        }
        Ok(self.db.create_user(&request).await?)
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<User, CardError> {
        self.db
            .get_user(user_id)
            .await?
            .ok_or(CardError::UserNotFound(user_id))
    }

    pub async fn list_users(&self) -> Result<Vec<User>, CardError> {
        Ok(self.db.list_users().await?)
    }

    // Daily cards

    /// One card per subscribed subject for `date`, in subscription order.
    /// Existing cards are reused unless `force_refresh` is set.
    pub async fn generate_cards(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        force_refresh: bool,
    ) -> Result<Vec<DailyCard>, CardError> {
        let started = Instant::now();
        let user = self.get_user(user_id).await?;
        let subjects = user.subjects_to_cover();
        log_service_start!("card_service", "generate_cards", user_id = user_id, subject_count = subjects.len());

        if user.subjects.is_empty() {
            log_service_warn!("card_service", "generate_cards", "no subscribed subjects, using general subject");
        }

        let mut exclusions = self.history(user_id).await?;
        let mut cards = Vec::with_capacity(subjects.len());
        for subject in &subjects {
            let (card, updated) = self
                .resolve_subject(&user, date, subject, force_refresh, exclusions)
                .await?;
            exclusions = updated;
            cards.push(card);
        }

        log_service_success!(
            "card_service",
            "generate_cards",
            card_count = cards.len(),
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(cards)
    }

    /// Replace the card for one subscribed subject on `date`.
    pub async fn regenerate_card(
        &self,
        user_id: Uuid,
        subject: &str,
        date: NaiveDate,
    ) -> Result<DailyCard, CardError> {
        let started = Instant::now();
        let user = self.get_user(user_id).await?;
        let subject = subject.trim();
        if !user.subjects_to_cover().iter().any(|s| s == subject) {
            return Err(CardError::SubjectNotSubscribed {
                user_id,
                subject: subject.to_string(),
            });
        }
        log_service_start!("card_service", "regenerate_card", user_id = user_id);

        let exclusions = self.history(user_id).await?;
        let (card, _) = self.resolve_subject(&user, date, subject, true, exclusions).await?;

        log_service_success!(
            "card_service",
            "regenerate_card",
            card_count = 1,
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(card)
    }

    pub async fn explain_card(&self, request: &ExplainRequest) -> String {
        self.generator
            .explain(&request.content, &request.subject, &request.grade, &request.phase)
            .await
    }

    // Goals
    pub async fn active_goal(&self, user_id: Uuid) -> Result<Option<Goal>, CardError> {
        self.get_user(user_id).await?;
        Ok(self.db.active_goal(user_id).await?)
    }

    pub async fn set_goal(&self, user_id: Uuid, request: SetGoalRequest) -> Result<Goal, CardError> {
        self.get_user(user_id).await?;
        log_service_start!("card_service", "set_goal", user_id = user_id);
        if request.description.trim().is_empty() {
            return Err(CardError::Validation("Goal description is required".to_string()));
        }
        let goal = self
            .db
            .set_goal(user_id, &request.description, &request.target_date)
            .await?;
        log_service_success!("card_service", "set_goal", "goal stored");
        Ok(goal)
    }

    async fn history(&self, user_id: Uuid) -> Result<ExclusionSet> {
        let recent = self.db.recent_entries(user_id, self.history_window).await?;
        Ok(ExclusionSet::from_history(recent.iter().map(|entry| entry.content.as_str())))
    }

    /// Cache-or-generate for one subject. Returns the card and the exclusion
    /// set extended with any newly generated topic.
    async fn resolve_subject(
        &self,
        user: &User,
        date: NaiveDate,
        subject: &str,
        force_refresh: bool,
        exclusions: ExclusionSet,
    ) -> Result<(DailyCard, ExclusionSet)> {
        let existing = self.db.find_entry(user.id, date, subject).await?;

        if let Some(entry) = existing {
            if !force_refresh {
                tracing::debug!(user_id = %user.id, subject = %subject, "Card cache hit");
                return Ok((DailyCard::from(entry), exclusions));
            }
            self.db.delete_entry(entry.id).await?;
        }

        let request = CardRequest {
            subject,
            grade: &user.grade,
            phase: &user.phase,
            date,
        };
        let outcome = self.generator.generate(&request, &exclusions).await;
        tracing::debug!(
            user_id = %user.id,
            subject = %subject,
            attempts = outcome.attempts(),
            fallback = outcome.is_fallback(),
            "Card generated"
        );

        let content = outcome.into_content();
        let entry = self.db.insert_entry(user.id, date, subject, &content).await?;
        let exclusions = exclusions.with_topic(extract_topic(&content));
        Ok((DailyCard::from(entry), exclusions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FallbackCatalog;
    use crate::card_generator::GenerationPolicy;
    use crate::diagnostics::GenerationLog;
    use crate::llm_providers::GenerationBackend;

    async fn create_test_service(catalog: FallbackCatalog) -> CardService {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let generator = CardGenerator::new(
            GenerationBackend::Absent,
            catalog,
            GenerationPolicy::default(),
            GenerationLog::disabled(),
        );
        CardService::new(db, generator, DEFAULT_HISTORY_WINDOW)
    }

    async fn create_user(service: &CardService, subjects: &[&str]) -> User {
        service
            .create_user(CreateUserRequest {
                name: format!("学生{}", Uuid::new_v4()),
                phase: "初中".to_string(),
                grade: "初二".to_string(),
                subjects: subjects.iter().map(|s| s.to_string()).collect(),
            })
            .await
            .unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let service = create_test_service(FallbackCatalog::builtin()).await;
        let result = service.generate_cards(Uuid::new_v4(), today(), false).await;
        assert!(matches!(result, Err(CardError::UserNotFound(_))));

        let result = service.regenerate_card(Uuid::new_v4(), "数学", today()).await;
        assert!(matches!(result, Err(CardError::UserNotFound(_))));
    }

    #[tokio::test]
    async fn test_one_card_per_subject_in_order() {
        let service = create_test_service(FallbackCatalog::builtin()).await;
        let user = create_user(&service, &["物理", "数学", "化学"]).await;

        let cards = service.generate_cards(user.id, today(), false).await.unwrap();
        let subjects: Vec<&str> = cards.iter().map(|c| c.subject.as_str()).collect();
        assert_eq!(subjects, vec!["物理", "数学", "化学"]);
        assert!(cards.iter().all(|c| !c.content.is_empty() && c.date == today()));
        assert_eq!(cards[0].title, "每日物理");
    }

    #[tokio::test]
    async fn test_no_subjects_generates_general_card() {
        let service = create_test_service(FallbackCatalog::builtin()).await;
        let user = create_user(&service, &[]).await;

        let cards = service.generate_cards(user.id, today(), false).await.unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].subject, GENERAL_SUBJECT);
    }

    #[tokio::test]
    async fn test_second_call_is_cache_hit() {
        let service = create_test_service(FallbackCatalog::builtin()).await;
        let user = create_user(&service, &["数学", "物理"]).await;

        let first = service.generate_cards(user.id, today(), false).await.unwrap();
        let second = service.generate_cards(user.id, today(), false).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_force_refresh_replaces_entries() {
        let service = create_test_service(FallbackCatalog::builtin()).await;
        let user = create_user(&service, &["数学"]).await;

        let first = service.generate_cards(user.id, today(), false).await.unwrap();
        let refreshed = service.generate_cards(user.id, today(), true).await.unwrap();
        assert_ne!(first[0].id, refreshed[0].id);

        // Only the replacement remains for the triple.
        let stored = service.db.find_entry(user.id, today(), "数学").await.unwrap().unwrap();
        assert_eq!(stored.id, refreshed[0].id);
        let all = service.db.recent_entries(user.id, 10).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_regenerate_replaces_row_and_avoids_old_topic() {
        let catalog = FallbackCatalog::from_json_str(
            r#"{"advanced": {"数学": ["勾股定理：a²+b²=c²", "圆周率：π"]}}"#,
        )
        .unwrap();
        let service = create_test_service(catalog).await;
        let user = create_user(&service, &["数学"]).await;

        let original = service.generate_cards(user.id, today(), false).await.unwrap().remove(0);
        let first = service.regenerate_card(user.id, "数学", today()).await.unwrap();
        let second = service.regenerate_card(user.id, "数学", today()).await.unwrap();

        assert_ne!(original.id, first.id);
        assert_ne!(first.id, second.id);
        assert_ne!(original.content, first.content);
        assert_ne!(first.content, second.content);
        assert_eq!(service.db.recent_entries(user.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_regenerate_unsubscribed_subject_is_not_found() {
        let service = create_test_service(FallbackCatalog::builtin()).await;
        let user = create_user(&service, &["数学"]).await;

        let result = service.regenerate_card(user.id, "化学", today()).await;
        assert!(matches!(result, Err(CardError::SubjectNotSubscribed { .. })));
    }

    #[tokio::test]
    async fn test_later_subjects_avoid_earlier_topics_in_same_call() {
        let catalog = FallbackCatalog::from_json_str(
            r#"{"advanced": {
                "甲": ["X：第一", "Y：第二", "Z：第三"],
                "乙": ["X：第一", "Y：第二", "Z：第三"]
            }}"#,
        )
        .unwrap();
        let service = create_test_service(catalog).await;
        let user = create_user(&service, &["甲", "乙"]).await;

        // History already covers X.
        service
            .db
            .insert_entry(user.id, today().pred_opt().unwrap(), "甲", "X：第一")
            .await
            .unwrap();

        for day in 0..5 {
            let date = today() + chrono::Duration::days(day * 2);
            let cards = service.generate_cards(user.id, date, false).await.unwrap();
            let first = extract_topic(&cards[0].content);
            let second = extract_topic(&cards[1].content);
            assert_ne!(first, second, "second subject repeated the first subject's topic");

            // Reset history to the single X entry for the next round.
            for card in &cards {
                service.db.delete_entry(card.id).await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_duplicate_user_and_missing_name() {
        let service = create_test_service(FallbackCatalog::builtin()).await;
        let request = CreateUserRequest {
            name: "小明".to_string(),
            phase: "小学".to_string(),
            grade: "三年级".to_string(),
            subjects: vec!["数学".to_string()],
        };
        service.create_user(request.clone()).await.unwrap();

        let duplicate = service.create_user(request.clone()).await;
        assert!(matches!(duplicate, Err(CardError::DuplicateUser(_))));

        let blank = service
            .create_user(CreateUserRequest {
                name: "  ".to_string(),
                ..request
            })
            .await;
        assert!(matches!(blank, Err(CardError::Validation(_))));
    }

    #[tokio::test]
    async fn test_goals() {
        let service = create_test_service(FallbackCatalog::builtin()).await;
        let user = create_user(&service, &["数学"]).await;

        assert!(service.active_goal(user.id).await.unwrap().is_none());
        let goal = service
            .set_goal(
                user.id,
                SetGoalRequest {
                    description: "每天阅读 30 分钟".to_string(),
                    target_date: "2025-12-31".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(service.active_goal(user.id).await.unwrap(), Some(goal));

        let missing = service.active_goal(Uuid::new_v4()).await;
        assert!(matches!(missing, Err(CardError::UserNotFound(_))));
    }

    #[tokio::test]
    async fn test_explain_without_backend_is_graceful() {
        let service = create_test_service(FallbackCatalog::builtin()).await;
        let explanation = service
            .explain_card(&ExplainRequest {
                content: "勾股定理：a²+b²=c²".to_string(),
                subject: "数学".to_string(),
                grade: "初二".to_string(),
                phase: "初中".to_string(),
            })
            .await;
        assert!(!explanation.is_empty());
    }
}
