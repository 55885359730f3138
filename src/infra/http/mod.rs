mod admin;
mod middleware;

pub use admin::{AdminState, InvalidateRequest, InvalidateResponse, build_admin_router};
pub use middleware::{RequestContext, log_responses, set_request_context};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::cache::StoreError;
use crate::error::ErrorReport;

fn store_health_response(result: Result<(), StoreError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::store_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
