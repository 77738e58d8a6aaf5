use crate::api::ApiResponse;
use axum::{http::StatusCode, response::Json};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Failures of the card and profile services. Generation itself never fails;
/// these are precondition and storage errors.
#[derive(Debug, thiserror::Error)]
pub enum CardError {
    #[error("User '{0}' not found")]
    UserNotFound(Uuid),

    #[error("Subject '{subject}' is not subscribed by user '{user_id}'")]
    SubjectNotSubscribed { user_id: Uuid, subject: String },

    #[error("User name '{0}' already exists")]
    DuplicateUser(String),

    #[error("{0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

/// Centralized error types for consistent API error handling
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Resource already exists: {0}")]
    DuplicateResource(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] anyhow::Error),
}

impl From<CardError> for ApiError {
    fn from(err: CardError) -> Self {
        match err {
            CardError::UserNotFound(_) | CardError::SubjectNotSubscribed { .. } => {
                ApiError::NotFound(err.to_string())
            }
            CardError::DuplicateUser(_) => ApiError::DuplicateResource(err.to_string()),
            CardError::Validation(message) => ApiError::ValidationError(message),
            CardError::Database(e) => classify_database_error(&e),
        }
    }
}

/// Error context for structured logging
#[derive(Debug)]
pub struct ErrorContext {
    pub operation: String,
    pub resource_id: Option<String>,
    pub resource_type: String,
    pub user_friendly_message: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: &str, resource_type: &str) -> Self {
        Self {
            operation: operation.to_string(),
            resource_id: None,
            resource_type: resource_type.to_string(),
            user_friendly_message: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn with_user_message(mut self, message: &str) -> Self {
        self.user_friendly_message = Some(message.to_string());
        self
    }
}

impl ApiError {
    /// Convert API error to HTTP response with consistent structure and logging
    pub fn to_response_with_context(self, context: ErrorContext) -> (StatusCode, Json<ApiResponse<()>>) {
        match &self {
            ApiError::NotFound(_) => {
                info!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Resource not found"
                );
                (
                    StatusCode::NOT_FOUND,
                    Json(ApiResponse::error(
                        context
                            .user_friendly_message
                            .unwrap_or_else(|| format!("{} not found", context.resource_type)),
                    )),
                )
            }
            ApiError::ValidationError(_) | ApiError::BadRequest(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Invalid request"
                );
                (StatusCode::BAD_REQUEST, Json(ApiResponse::error(self.to_string())))
            }
            ApiError::DuplicateResource(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Duplicate resource"
                );
                (StatusCode::CONFLICT, Json(ApiResponse::error(self.to_string())))
            }
            ApiError::DatabaseError(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Database error"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiResponse::error(
                        "Database operation failed. Please try again.".to_string(),
                    )),
                )
            }
        }
    }
}

/// Map storage failures that carry a recognizable constraint message.
pub fn classify_database_error(error: &anyhow::Error) -> ApiError {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("unique constraint") {
        ApiError::DuplicateResource("Resource already exists".to_string())
    } else if error_str.contains("foreign key constraint") {
        ApiError::NotFound("Referenced resource not found".to_string())
    } else {
        ApiError::DatabaseError(anyhow::anyhow!("{}", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context_creation() {
        let context = ErrorContext::new("generate_cards", "user")
            .with_id("123")
            .with_user_message("Custom message");

        assert_eq!(context.operation, "generate_cards");
        assert_eq!(context.resource_type, "user");
        assert_eq!(context.resource_id, Some("123".to_string()));
        assert_eq!(context.user_friendly_message, Some("Custom message".to_string()));
    }

    #[test]
    fn test_card_error_mapping() {
        let id = Uuid::new_v4();
        assert!(matches!(ApiError::from(CardError::UserNotFound(id)), ApiError::NotFound(_)));
        assert!(matches!(
            ApiError::from(CardError::SubjectNotSubscribed {
                user_id: id,
                subject: "化学".to_string()
            }),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from(CardError::DuplicateUser("小明".to_string())),
            ApiError::DuplicateResource(_)
        ));
        assert!(matches!(
            ApiError::from(CardError::Validation("name is required".to_string())),
            ApiError::ValidationError(_)
        ));
        assert!(matches!(
            ApiError::from(CardError::Database(anyhow::anyhow!("disk I/O error"))),
            ApiError::DatabaseError(_)
        ));
    }

    #[test]
    fn test_error_classification() {
        let duplicate = anyhow::anyhow!("UNIQUE constraint failed: users.name");
        assert!(matches!(classify_database_error(&duplicate), ApiError::DuplicateResource(_)));

        let missing = anyhow::anyhow!("FOREIGN KEY constraint failed");
        assert!(matches!(classify_database_error(&missing), ApiError::NotFound(_)));

        let other = anyhow::anyhow!("database is locked");
        assert!(matches!(classify_database_error(&other), ApiError::DatabaseError(_)));
    }

    #[test]
    fn test_api_error_responses() {
        let context = ErrorContext::new("generate_cards", "user").with_id("123");
        let (status, _) = ApiError::NotFound("User not found".to_string()).to_response_with_context(context);
        assert_eq!(status, StatusCode::NOT_FOUND);

        let context = ErrorContext::new("generate_cards", "calendar_entry");
        let (status, _) = ApiError::BadRequest("bad date".to_string()).to_response_with_context(context);
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let context = ErrorContext::new("create_user", "user");
        let (status, _) =
            ApiError::DuplicateResource("exists".to_string()).to_response_with_context(context);
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
