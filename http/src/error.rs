use axum::{
    http::StatusCode,
    response::{
        IntoResponse,
        Response,
    },
};
use simplemdm_exporter_gatherer::RegistryError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Encoding the metrics failed: {0}")]
    Encode(#[from] RegistryError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!(error = %self, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
