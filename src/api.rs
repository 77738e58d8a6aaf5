use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    card_service::CardService,
    errors::{ApiError, ErrorContext},
    models::*,
};

// Import logging macros
use crate::{log_api_error, log_api_start, log_api_success, log_api_warn};

#[derive(Clone)]
pub struct AppState {
    pub card_service: CardService,
}

#[derive(Deserialize)]
pub struct GenerateCardsQuery {
    pub user_id: Uuid,
    pub current_date: String,
    #[serde(default)]
    pub ignore_cache: bool,
}

#[derive(Deserialize)]
pub struct RegenerateCardQuery {
    pub user_id: Uuid,
    pub subject: String,
    pub current_date: String,
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<()>>)>;

/// Dates travel as `YYYY-MM-DD`.
pub fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("Invalid date '{}', expected YYYY-MM-DD", raw)))
}

// User endpoints
pub async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> ApiResult<User> {
    log_api_start!("create_user");
    let name = request.name.clone();

    match state.card_service.create_user(request).await {
        Ok(user) => {
            log_api_success!("create_user", user_id = user.id, "user created");
            Ok(Json(ApiResponse::success(user)))
        }
        Err(e) => {
            let context = ErrorContext::new("create_user", "user").with_id(&name);
            Err(ApiError::from(e).to_response_with_context(context))
        }
    }
}

pub async fn list_users(State(state): State<AppState>) -> ApiResult<Vec<User>> {
    log_api_start!("list_users");

    match state.card_service.list_users().await {
        Ok(users) => {
            log_api_success!("list_users", format!("{} users", users.len()));
            Ok(Json(ApiResponse::success(users)))
        }
        Err(e) => {
            let context = ErrorContext::new("list_users", "user");
            Err(ApiError::from(e).to_response_with_context(context))
        }
    }
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<User> {
    log_api_start!("get_user", user_id = id);

    match state.card_service.get_user(id).await {
        Ok(user) => Ok(Json(ApiResponse::success(user))),
        Err(e) => {
            let context = ErrorContext::new("get_user", "user").with_id(&id.to_string());
            Err(ApiError::from(e).to_response_with_context(context))
        }
    }
}

// Card endpoints
pub async fn generate_cards(
    State(state): State<AppState>,
    Query(query): Query<GenerateCardsQuery>,
) -> ApiResult<Vec<DailyCard>> {
    log_api_start!("generate_cards", user_id = query.user_id);
    let context = || ErrorContext::new("generate_cards", "user").with_id(&query.user_id.to_string());

    let date = match parse_date(&query.current_date) {
        Ok(date) => date,
        Err(e) => {
            log_api_warn!("generate_cards", user_id = query.user_id, "malformed date");
            return Err(e.to_response_with_context(context()));
        }
    };

    match state
        .card_service
        .generate_cards(query.user_id, date, query.ignore_cache)
        .await
    {
        Ok(cards) => {
            log_api_success!(
                "generate_cards",
                user_id = query.user_id,
                count = cards.len(),
                "daily cards ready"
            );
            Ok(Json(ApiResponse::success(cards)))
        }
        Err(e) => {
            log_api_error!("generate_cards", user_id = query.user_id, error = e, "card generation failed");
            Err(ApiError::from(e).to_response_with_context(context()))
        }
    }
}

pub async fn regenerate_card(
    State(state): State<AppState>,
    Query(query): Query<RegenerateCardQuery>,
) -> ApiResult<DailyCard> {
    log_api_start!("regenerate_card", user_id = query.user_id);
    let context = || {
        ErrorContext::new("regenerate_card", "calendar_entry")
            .with_id(&format!("{}/{}", query.user_id, query.subject))
    };

    let date = match parse_date(&query.current_date) {
        Ok(date) => date,
        Err(e) => {
            log_api_warn!("regenerate_card", user_id = query.user_id, "malformed date");
            return Err(e.to_response_with_context(context()));
        }
    };

    match state
        .card_service
        .regenerate_card(query.user_id, &query.subject, date)
        .await
    {
        Ok(card) => {
            log_api_success!("regenerate_card", user_id = query.user_id, "card replaced");
            Ok(Json(ApiResponse::success(card)))
        }
        Err(e) => {
            log_api_error!("regenerate_card", user_id = query.user_id, error = e, "card regeneration failed");
            Err(ApiError::from(e).to_response_with_context(context()))
        }
    }
}

/// Always answers 200; backend trouble is reported inside the explanation text.
pub async fn explain_card(
    State(state): State<AppState>,
    Json(request): Json<ExplainRequest>,
) -> Json<ApiResponse<ExplainResponse>> {
    log_api_start!("explain_card");
    let explanation = state.card_service.explain_card(&request).await;
    Json(ApiResponse::success(ExplainResponse { explanation }))
}

// Goal endpoints
pub async fn get_goal(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Option<Goal>> {
    log_api_start!("get_goal", user_id = user_id);

    match state.card_service.active_goal(user_id).await {
        Ok(goal) => Ok(Json(ApiResponse::success(goal))),
        Err(e) => {
            let context = ErrorContext::new("get_goal", "user").with_id(&user_id.to_string());
            Err(ApiError::from(e).to_response_with_context(context))
        }
    }
}

pub async fn set_goal(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<SetGoalRequest>,
) -> ApiResult<Goal> {
    log_api_start!("set_goal", user_id = user_id);

    match state.card_service.set_goal(user_id, request).await {
        Ok(goal) => {
            log_api_success!("set_goal", user_id = user_id, "goal updated");
            Ok(Json(ApiResponse::success(goal)))
        }
        Err(e) => {
            let context = ErrorContext::new("set_goal", "goal").with_id(&user_id.to_string());
            Err(ApiError::from(e).to_response_with_context(context))
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // User routes
        .route("/api/users", post(create_user).get(list_users))
        .route("/api/users/:id", get(get_user))
        .route("/api/users/:id/goal", get(get_goal).post(set_goal))

        // Card routes
        .route("/api/generate-cards", post(generate_cards))
        .route("/api/regenerate-card", post(regenerate_card))
        .route("/api/explain-card", post(explain_card))

        .with_state(state)
}
