use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Subject used when a learner has no subscribed subjects.
pub const GENERAL_SUBJECT: &str = "通用";

/// A learner profile. Subjects keep their subscription order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub phase: String, // e.g. 小学, 初中, 高中
    pub grade: String,
    pub subjects: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Subjects a daily generation covers, in subscription order.
    pub fn subjects_to_cover(&self) -> Vec<String> {
        let subjects: Vec<String> = self
            .subjects
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if subjects.is_empty() {
            vec![GENERAL_SUBJECT.to_string()]
        } else {
            subjects
        }
    }
}

/// One generated card, at most one per (user, date, subject).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub subject: String,
    pub content: String, // raw "Concept：Explanation" text
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Goal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub description: String,
    pub target_date: String, // free-form, stored as given
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Card shape returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyCard {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub subject: String,
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub card_type: String,
}

impl From<CalendarEntry> for DailyCard {
    fn from(entry: CalendarEntry) -> Self {
        Self {
            id: entry.id,
            title: format!("每日{}", entry.subject),
            content: entry.content,
            subject: entry.subject,
            date: entry.date,
            card_type: "educational".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub phase: String,
    pub grade: String,
    #[serde(default)]
    pub subjects: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetGoalRequest {
    pub description: String,
    pub target_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainRequest {
    pub content: String,
    pub subject: String,
    #[serde(default = "default_context")]
    pub grade: String,
    #[serde(default = "default_context")]
    pub phase: String,
}

fn default_context() -> String {
    GENERAL_SUBJECT.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainResponse {
    pub explanation: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_subjects(subjects: &[&str]) -> User {
        User {
            id: Uuid::new_v4(),
            name: "小明".to_string(),
            phase: "小学".to_string(),
            grade: "三年级".to_string(),
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_subjects_fall_back_to_general() {
        let user = user_with_subjects(&[]);
        assert_eq!(user.subjects_to_cover(), vec![GENERAL_SUBJECT.to_string()]);

        let user = user_with_subjects(&["", "  "]);
        assert_eq!(user.subjects_to_cover(), vec![GENERAL_SUBJECT.to_string()]);
    }

    #[test]
    fn test_subjects_keep_subscription_order() {
        let user = user_with_subjects(&["语文", "数学", "英语"]);
        assert_eq!(user.subjects_to_cover(), vec!["语文", "数学", "英语"]);
    }

    #[test]
    fn test_daily_card_from_entry() {
        let entry = CalendarEntry {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            subject: "数学".to_string(),
            content: "圆周率：圆的周长与直径之比".to_string(),
            created_at: Utc::now(),
        };

        let card = DailyCard::from(entry.clone());
        assert_eq!(card.id, entry.id);
        assert_eq!(card.title, "每日数学");
        assert_eq!(card.card_type, "educational");

        let json = serde_json::to_value(&card).unwrap();
        assert_eq!(json["type"], "educational");
        assert_eq!(json["date"], "2025-03-14");
    }

    #[test]
    fn test_explain_request_defaults() {
        let request: ExplainRequest =
            serde_json::from_str(r#"{"content":"勾股定理：a²+b²=c²","subject":"数学"}"#).unwrap();
        assert_eq!(request.grade, GENERAL_SUBJECT);
        assert_eq!(request.phase, GENERAL_SUBJECT);
    }
}
