//! Request body extractor accepting either JSON or form-encoded bodies.
//!
//! The browser UI posts `application/x-www-form-urlencoded` for the analysis
//! endpoints and JSON for the push endpoints; scripted clients usually send
//! JSON everywhere.

use axum::extract::{Form, FromRequest, Json, Request};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;

use super::api::ApiError;

pub struct JsonOrForm<T>(pub T);

impl<S, T> FromRequest<S> for JsonOrForm<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if is_json {
            Json::<T>::from_request(req, state)
                .await
                .map(|Json(value)| JsonOrForm(value))
                .map_err(|e| malformed(e.body_text()))
        } else {
            Form::<T>::from_request(req, state)
                .await
                .map(|Form(value)| JsonOrForm(value))
                .map_err(|e| malformed(e.body_text()))
        }
    }
}

fn malformed(details: String) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "Malformed request body").with_details(details)
}
