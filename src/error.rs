use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

/// Failure taxonomy shared by every outbound step of the pipeline.
///
/// `Transport` and `Schema` move a fallback chain to its next tier, `QualityRejection`
/// short-circuits ingestion, and the rest are reported in the event log.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("credentials rejected by {0}")]
    Auth(String),
    #[error("schema problem: {0}")]
    Schema(String),
    #[error("invalid payload: {0}")]
    Validation(String),
    #[error("transcript rejected: {reason}")]
    QualityRejection {
        reason: &'static str,
        pattern: Option<String>,
    },
}

impl AppError {
    /// Whether the caller should try the next tier of a fallback chain.
    pub fn falls_through(&self) -> bool {
        matches!(self, AppError::Transport(_) | AppError::Schema(_))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(reqwest::StatusCode::UNAUTHORIZED) | Some(reqwest::StatusCode::FORBIDDEN) => {
                let host = e.url().and_then(|u| u.host_str()).unwrap_or("provider");
                AppError::Auth(host.to_string())
            }
            Some(status) if status.is_client_error() => AppError::Validation(e.to_string()),
            _ if e.is_decode() => AppError::Validation(e.to_string()),
            _ => AppError::Transport(e.to_string()),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(db) => AppError::Schema(db.to_string()),
            sqlx::Error::ColumnNotFound(col) => AppError::Schema(format!("missing column {col}")),
            sqlx::Error::ColumnDecode { index, source } => {
                AppError::Schema(format!("column {index}: {source}"))
            }
            other => AppError::Transport(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Transport(_) => StatusCode::BAD_GATEWAY,
            AppError::Auth(_) => StatusCode::FORBIDDEN,
            AppError::Schema(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::QualityRejection { .. } => StatusCode::OK,
        };
        error!(error = %self, status = %status, "action failed");
        status.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_and_schema_fall_through() {
        assert!(AppError::Transport("timeout".into()).falls_through());
        assert!(AppError::Schema("no column".into()).falls_through());
        assert!(!AppError::Auth("crm".into()).falls_through());
        assert!(!AppError::Validation("bad json".into()).falls_through());
        assert!(!AppError::QualityRejection {
            reason: "too_short",
            pattern: None
        }
        .falls_through());
    }

    #[test]
    fn action_errors_map_to_statuses() {
        let resp = AppError::Validation("missing sid".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = AppError::Transport("502 from provider".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
