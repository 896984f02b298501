//! HTTP endpoints of the facilitator.
//!
//! `POST /verify` and `POST /settle` take a [`SettlementRequest`] and answer
//! with a [`SettlementResult`]. A rejected payment is still a `200`: the
//! request was well-formed and processed, the payment just failed its
//! checks, and the body says why. Only routing-level problems (unknown or
//! unconfigured network) are `400`s. The `GET` variants of `/verify` and
//! `/settle` serve endpoint descriptions for discoverability.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use crate::facilitator::Facilitator;
use crate::orchestrator::AdapterRegistry;
use crate::types::SettlementRequest;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn routes() -> Router<Arc<AdapterRegistry>> {
    Router::new()
        .route("/verify", get(get_verify_info).post(post_verify))
        .route("/settle", get(get_settle_info).post(post_settle))
        .route("/supported", get(get_supported))
}

/// `GET /verify`: machine-readable description of the `/verify` endpoint.
#[instrument(skip_all)]
async fn get_verify_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/verify",
        "description": "POST to verify a pre-signed payment against expected terms",
        "body": {
            "network": "CAIP-2 identifier or alias",
            "signedTransaction": "base64",
            "expectedRecipient": "optional",
            "expectedAmount": "optional decimal integer string",
            "expectedAsset": "optional",
        }
    }))
}

/// `GET /settle`: machine-readable description of the `/settle` endpoint.
#[instrument(skip_all)]
async fn get_settle_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/settle",
        "description": "POST to verify, submit, and confirm a pre-signed payment",
        "body": {
            "network": "CAIP-2 identifier or alias",
            "signedTransaction": "base64",
            "expectedRecipient": "optional",
            "expectedAmount": "optional decimal integer string",
            "expectedAsset": "optional",
        }
    }))
}

/// `GET /supported`: the networks this facilitator can settle on.
#[instrument(skip_all)]
async fn get_supported(State(registry): State<Arc<AdapterRegistry>>) -> impl IntoResponse {
    Json(json!({ "networks": registry.supported() }))
}

/// `POST /verify`: run the read-only pipeline against the payload.
#[instrument(skip_all, fields(network = %body.network))]
async fn post_verify(
    State(registry): State<Arc<AdapterRegistry>>,
    Json(body): Json<SettlementRequest>,
) -> impl IntoResponse {
    match registry.verify(&body).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(error) => {
            tracing::warn!(%error, network = %body.network, "verification not routable");
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: error.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// `POST /settle`: run the full pipeline, submitting on success.
#[instrument(skip_all, fields(network = %body.network))]
async fn post_settle(
    State(registry): State<Arc<AdapterRegistry>>,
    Json(body): Json<SettlementRequest>,
) -> impl IntoResponse {
    match registry.settle(&body).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(error) => {
            tracing::warn!(%error, network = %body.network, "settlement not routable");
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: error.to_string(),
                }),
            )
                .into_response()
        }
    }
}
