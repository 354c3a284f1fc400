//! Thin `/api/v1` surface over the market managers.
//!
//! Handlers authenticate the agent, apply the rate presets, call one
//! manager method, and wrap the outcome in the standard envelope.

use crate::api_sse;
use crate::auth;
use crate::node::SaltdigNode;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Duration;
use saltdig_common::RatePreset;
use saltdig_market::{MarketError, NewListing, OfferResponse};
use saltdig_types::{Agent, Currency, ListingId, ListingMode, OfferId};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

pub fn router(node: Arc<SaltdigNode>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/agents", post(register_agent))
        .route("/api/v1/listings", post(create_listing))
        .route("/api/v1/listings/:id", get(get_listing))
        .route("/api/v1/listings/:id/offers", post(create_offer))
        .route("/api/v1/offers/:id/respond", post(respond_to_offer))
        .route("/api/v1/market/:id/events", get(api_sse::market_events))
        .route("/api/v1/internal/reconcile", post(run_reconcile))
        .with_state(node)
}

pub struct ApiError(MarketError);

impl From<MarketError> for ApiError {
    fn from(e: MarketError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            MarketError::NotFound(_) => StatusCode::NOT_FOUND,
            MarketError::Forbidden(_) => StatusCode::FORBIDDEN,
            MarketError::InvalidState(_) | MarketError::Conflict(_) => StatusCode::CONFLICT,
            MarketError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            MarketError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            MarketError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            MarketError::EscrowRpc(_) => StatusCode::BAD_GATEWAY,
            MarketError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "success": false, "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

fn ok(data: Value) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

async fn authenticate(node: &SaltdigNode, headers: &HeaderMap) -> Result<Agent, ApiError> {
    let key = auth::api_key_from_headers(headers)
        .ok_or_else(|| MarketError::Forbidden("missing API key".into()))?;
    Ok(node.agents.authenticate(&key).await?)
}

fn check_rate(node: &SaltdigNode, key: String, preset: RatePreset) -> Result<(), ApiError> {
    let decision = node.rate_limiter.check_preset(&key, preset);
    if decision.allowed {
        Ok(())
    } else {
        Err(MarketError::RateLimited {
            retry_after: decision.retry_after,
        }
        .into())
    }
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct RegisterBody {
    display_name: String,
}

async fn register_agent(
    State(node): State<Arc<SaltdigNode>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(body): Json<RegisterBody>,
) -> Result<Json<Value>, ApiError> {
    check_rate(
        &node,
        format!("register:{}", peer.ip()),
        RatePreset::Register,
    )?;
    let agent = node.agents.register(body.display_name).await?;
    Ok(ok(json!({
        "id": agent.id,
        "display_name": agent.display_name,
        "api_key": agent.api_key,
    })))
}

#[derive(Deserialize)]
struct CreateListingBody {
    title: String,
    #[serde(default)]
    description: String,
    currency: Currency,
    price: String,
    #[serde(default)]
    category: String,
    mode: ListingMode,
    #[serde(default)]
    delivery_time: Option<String>,
}

async fn create_listing(
    State(node): State<Arc<SaltdigNode>>,
    headers: HeaderMap,
    Json(body): Json<CreateListingBody>,
) -> Result<Json<Value>, ApiError> {
    let agent = authenticate(&node, &headers).await?;
    check_rate(
        &node,
        format!("general:{}", agent.id),
        RatePreset::General,
    )?;

    let listing = node
        .listings
        .create_listing(NewListing {
            poster: agent.id,
            title: body.title,
            description: body.description,
            currency: body.currency,
            price: body.price,
            category: body.category,
            mode: body.mode,
            delivery_time: body.delivery_time,
        })
        .await?;
    Ok(ok(serde_json::to_value(listing).unwrap_or_default()))
}

async fn get_listing(
    State(node): State<Arc<SaltdigNode>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let listing = node
        .listings
        .get_listing(&ListingId::from_string(id))
        .await?;
    Ok(ok(serde_json::to_value(listing).unwrap_or_default()))
}

#[derive(Deserialize)]
struct CreateOfferBody {
    text: String,
    price: String,
}

async fn create_offer(
    State(node): State<Arc<SaltdigNode>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<CreateOfferBody>,
) -> Result<Json<Value>, ApiError> {
    let agent = authenticate(&node, &headers).await?;
    check_rate(&node, format!("offer:{}", agent.id), RatePreset::Offer)?;

    let offer = node
        .listings
        .create_offer(
            &ListingId::from_string(id),
            &agent.id,
            body.text,
            body.price,
        )
        .await?;
    Ok(ok(serde_json::to_value(offer).unwrap_or_default()))
}

#[derive(Deserialize)]
struct RespondBody {
    action: String,
    #[serde(default)]
    price: Option<String>,
}

async fn respond_to_offer(
    State(node): State<Arc<SaltdigNode>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<RespondBody>,
) -> Result<Json<Value>, ApiError> {
    let agent = authenticate(&node, &headers).await?;

    let response = match body.action.as_str() {
        "accept" => OfferResponse::Accept,
        "reject" => OfferResponse::Reject,
        "counter" => OfferResponse::Counter {
            price: body.price.ok_or_else(|| {
                MarketError::InvalidArgument("counter requires a price".into())
            })?,
        },
        other => {
            return Err(
                MarketError::InvalidArgument(format!("unknown action {other:?}")).into(),
            )
        }
    };

    let offer = node
        .listings
        .respond_to_offer(&OfferId::from_string(id), &agent.id, response)
        .await?;
    Ok(ok(serde_json::to_value(offer).unwrap_or_default()))
}

async fn run_reconcile(
    State(node): State<Arc<SaltdigNode>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    if !auth::cron_authorized(&headers, node.secrets.cron_secret.as_deref()) {
        return Err(MarketError::Forbidden("invalid cron secret".into()).into());
    }

    let report = node.reconciler.run_once().await?;
    Ok(ok(json!({
        "scanned": report.scanned,
        "released": report.released,
        "corrected": report.corrected,
        "skipped": report.skipped,
        "failures": report
            .failures
            .iter()
            .map(|f| json!({
                "record_id": f.record_id,
                "listing_id": f.listing_id,
                "error": f.error,
            }))
            .collect::<Vec<_>>(),
    })))
}

/// Periodic sweep of expired rate-limit buckets.
pub fn spawn_rate_limit_sweeper(node: Arc<SaltdigNode>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            ticker.tick().await;
            node.rate_limiter.sweep(Duration::hours(2));
        }
    });
}
