// Macros file - tracing macros are imported within the macro definitions

/// Standardized logging macros so every layer reports the same field names
/// (`user_id`, `subject`, `entry_id`, `attempt`) for the same concepts.

// ============================================================================
// API Operation Logging Macros
// ============================================================================

/// Log the start of an API operation with consistent fields
#[macro_export]
macro_rules! log_api_start {
    ($operation:expr, user_id = $user_id:expr) => {
        tracing::debug!(
            operation = $operation,
            user_id = %$user_id,
            "API operation started"
        );
    };
    ($operation:expr) => {
        tracing::debug!(
            operation = $operation,
            "API operation started"
        );
    };
}

/// Log successful completion of an API operation
#[macro_export]
macro_rules! log_api_success {
    ($operation:expr, user_id = $user_id:expr, count = $count:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            user_id = %$user_id,
            count = $count,
            "API operation completed: {}", $msg
        );
    };
    ($operation:expr, user_id = $user_id:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            user_id = %$user_id,
            "API operation completed: {}", $msg
        );
    };
    ($operation:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            "API operation completed: {}", $msg
        );
    };
}

/// Log API operation errors with consistent structure
#[macro_export]
macro_rules! log_api_error {
    ($operation:expr, user_id = $user_id:expr, error = $error:expr, $msg:expr) => {
        tracing::error!(
            operation = $operation,
            user_id = %$user_id,
            error = %$error,
            "API operation failed: {}", $msg
        );
    };
    ($operation:expr, error = $error:expr, $msg:expr) => {
        tracing::error!(
            operation = $operation,
            error = %$error,
            "API operation failed: {}", $msg
        );
    };
}

/// Log API warnings with context
#[macro_export]
macro_rules! log_api_warn {
    ($operation:expr, user_id = $user_id:expr, $msg:expr) => {
        tracing::warn!(
            operation = $operation,
            user_id = %$user_id,
            "API operation warning: {}", $msg
        );
    };
    ($operation:expr, $msg:expr) => {
        tracing::warn!(
            operation = $operation,
            "API operation warning: {}", $msg
        );
    };
}

// ============================================================================
// Service Layer Logging Macros
// ============================================================================

/// Log service operation start with context
#[macro_export]
macro_rules! log_service_start {
    ($service:expr, $operation:expr, user_id = $user_id:expr, subject_count = $count:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            user_id = %$user_id,
            subject_count = $count,
            "Service operation started"
        );
    };
    ($service:expr, $operation:expr, user_id = $user_id:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            user_id = %$user_id,
            "Service operation started"
        );
    };
}

/// Log service operation success
#[macro_export]
macro_rules! log_service_success {
    ($service:expr, $operation:expr, card_count = $count:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            card_count = $count,
            duration_ms = $duration,
            "Service operation completed successfully"
        );
    };
    ($service:expr, $operation:expr, $msg:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            "Service operation completed: {}", $msg
        );
    };
}

/// Log service warnings
#[macro_export]
macro_rules! log_service_warn {
    ($service:expr, $operation:expr, $msg:expr) => {
        tracing::warn!(
            service = $service,
            operation = $operation,
            "Service warning: {}",
            $msg
        );
    };
}

// ============================================================================
// Database Operation Logging Macros
// ============================================================================

/// Log database operation performance and results
#[macro_export]
macro_rules! log_db_operation {
    (debug, $operation:expr, entry_id = $entry_id:expr) => {
        tracing::debug!(
            component = "database",
            operation = $operation,
            entry_id = %$entry_id,
            "Database operation completed"
        );
    };
    (debug, $operation:expr, count = $count:expr) => {
        tracing::debug!(
            component = "database",
            operation = $operation,
            result_count = $count,
            "Database operation completed"
        );
    };
    (info, $operation:expr, $msg:expr) => {
        tracing::info!(
            component = "database",
            operation = $operation,
            "Database operation: {}", $msg
        );
    };
}

// ============================================================================
// LLM / Generation Logging Macros
// ============================================================================

/// Log backend calls with provider context
#[macro_export]
macro_rules! log_llm_operation {
    (start, $operation:expr, provider = $provider:expr, model = $model:expr) => {
        tracing::info!(
            component = "llm_provider",
            operation = $operation,
            provider = %$provider,
            model = %$model,
            "LLM operation started"
        );
    };
    (success, $operation:expr, provider = $provider:expr, response_length = $len:expr) => {
        tracing::info!(
            component = "llm_provider",
            operation = $operation,
            provider = %$provider,
            response_length = $len,
            "LLM operation completed successfully"
        );
    };
    (error, $operation:expr, provider = $provider:expr, error = $error:expr) => {
        tracing::error!(
            component = "llm_provider",
            operation = $operation,
            provider = %$provider,
            error = %$error,
            "LLM operation failed"
        );
    };
}

/// Log one card generation attempt outcome
#[macro_export]
macro_rules! log_generation {
    (retry, subject = $subject:expr, attempt = $attempt:expr, topic = $topic:expr) => {
        tracing::info!(
            component = "card_generator",
            subject = %$subject,
            attempt = $attempt,
            topic = %$topic,
            "Duplicate topic generated, retrying"
        );
    };
    (accepted, subject = $subject:expr, attempt = $attempt:expr, topic = $topic:expr) => {
        tracing::info!(
            component = "card_generator",
            subject = %$subject,
            attempt = $attempt,
            topic = %$topic,
            "Generated card accepted"
        );
    };
    (exhausted, subject = $subject:expr, attempt = $attempt:expr, topic = $topic:expr) => {
        tracing::warn!(
            component = "card_generator",
            subject = %$subject,
            attempt = $attempt,
            topic = %$topic,
            "Retry budget exhausted, keeping last generated card"
        );
    };
    (fallback, subject = $subject:expr, reason = $reason:expr) => {
        tracing::warn!(
            component = "card_generator",
            subject = %$subject,
            reason = %$reason,
            "Falling back to offline catalog"
        );
    };
}

// ============================================================================
// System Event Logging Macros
// ============================================================================

/// Log system startup and configuration events
#[macro_export]
macro_rules! log_system_event {
    (startup, component = $component:expr, $msg:expr) => {
        tracing::info!(
            event_type = "startup",
            component = $component,
            "System event: {}",
            $msg
        );
    };
    (config, $msg:expr) => {
        tracing::info!(event_type = "configuration", "System event: {}", $msg);
    };
}

// ============================================================================
// Validation Logging Macros
// ============================================================================

/// Log validation results consistently
#[macro_export]
macro_rules! log_validation {
    (success, $component:expr, $msg:expr) => {
        tracing::debug!(
            event_type = "validation",
            component = $component,
            result = "success",
            "Validation completed: {}", $msg
        );
    };
    (failure, $component:expr, error = $error:expr) => {
        tracing::warn!(
            event_type = "validation",
            component = $component,
            result = "failure",
            error = %$error,
            "Validation failed"
        );
    };
}
