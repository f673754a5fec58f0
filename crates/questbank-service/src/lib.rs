#![deny(unsafe_code)]

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use questbank_core::{
    ApprovalOutcome, CoreError, DistributionSummary, DomainEvent, Engagement, EngagementRecipient,
    EngineConfig, Enrollment, LedgerPage, LedgerStorageConfig, NotificationSink, PlatformBalance,
    Principal, Quest, QuestBankEngine, QuestDraft, Role, Submission, Wallet, WalletOwner,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

/// Header carrying the calling principal's user id. The engine resolves the
/// role behind it on every request; the service never caches roles.
pub const ACTOR_HEADER: &str = "x-actor-id";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bootstrap_admin: String,
    pub initial_platform_coins: u64,
    pub ledger_storage: LedgerStorageConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let defaults = EngineConfig::default();
        Self {
            bootstrap_admin: defaults.bootstrap_admin,
            initial_platform_coins: defaults.initial_platform_coins,
            ledger_storage: defaults.ledger_storage,
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub engine: Arc<QuestBankEngine>,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let engine = QuestBankEngine::bootstrap(EngineConfig {
            bootstrap_admin: config.bootstrap_admin,
            initial_platform_coins: config.initial_platform_coins,
            ledger_storage: config.ledger_storage,
            ..EngineConfig::default()
        })
        .await
        .map_err(ServiceError::Core)?;

        let engine = Arc::new(engine);
        spawn_notifier(&engine, Arc::new(TracingNotifier));
        Ok(Self { engine })
    }
}

/// Forward post-commit domain events to a sink on a background task.
///
/// The task is detached: a slow or failing sink can lag behind and drop
/// events, but it can never slow down or roll back an operation.
pub fn spawn_notifier(
    engine: &Arc<QuestBankEngine>,
    sink: Arc<dyn NotificationSink>,
) -> tokio::task::JoinHandle<()> {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => sink.notify(&event).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "notification sink lagged behind event stream");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Default sink: structured log line per domain event.
pub struct TracingNotifier;

#[async_trait::async_trait]
impl NotificationSink for TracingNotifier {
    async fn notify(&self, event: &DomainEvent) {
        match event {
            DomainEvent::QuestApproved {
                quest_id,
                approver,
                reward_coins,
            } => info!(%quest_id, %approver, reward_coins, "quest approved"),
            DomainEvent::QuestRejected { quest_id, reason } => {
                info!(%quest_id, %reason, "quest rejected")
            }
            DomainEvent::SeatReserved { quest_id, user_id } => {
                info!(%quest_id, %user_id, "seat reserved")
            }
            DomainEvent::SeatCancelled { quest_id, user_id } => {
                info!(%quest_id, %user_id, "seat cancelled")
            }
            DomainEvent::SubmissionGraded {
                quest_id,
                user_id,
                accepted,
                amount_credited,
            } => info!(%quest_id, %user_id, accepted, amount_credited, "submission graded"),
            DomainEvent::EngagementFunded {
                engagement_id,
                amount,
            } => info!(%engagement_id, amount, "engagement funded"),
            DomainEvent::EngagementDistributed {
                engagement_id,
                recipient_count,
                total_amount,
            } => info!(%engagement_id, recipient_count, total_amount, "engagement distributed"),
        }
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/principals", post(register_principal))
        .route("/v1/wallets", post(provision_wallet))
        .route("/v1/wallets/me", get(my_wallet))
        .route("/v1/wallets/me/ledger", get(my_ledger))
        .route("/v1/orgs/:org_id/grants", post(grant_to_org))
        .route("/v1/platform/balance", get(platform_balance))
        .route("/v1/quests", post(create_quest))
        .route("/v1/quests/:quest_id", get(get_quest))
        .route("/v1/quests/:quest_id/submit", post(submit_quest))
        .route("/v1/quests/:quest_id/revise", post(revise_quest))
        .route("/v1/quests/:quest_id/approve", post(approve_quest))
        .route("/v1/quests/:quest_id/reject", post(reject_quest))
        .route("/v1/quests/:quest_id/active", put(set_quest_active))
        .route(
            "/v1/quests/:quest_id/reservations",
            post(reserve_seat).delete(cancel_seat),
        )
        .route("/v1/quests/:quest_id/answers", post(submit_answer))
        .route("/v1/engagements", post(create_engagement))
        .route("/v1/engagements/:engagement_id", get(get_engagement))
        .route("/v1/engagements/:engagement_id/fund", post(fund_engagement))
        .route(
            "/v1/engagements/:engagement_id/recipients/:user_id",
            put(upsert_recipient).delete(remove_recipient),
        )
        .route(
            "/v1/engagements/:engagement_id/distribute",
            post(distribute_engagement),
        )
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("core engine error: {0}")]
    Core(#[from] CoreError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http {
        status: StatusCode,
        code: &'static str,
        message: String,
    },
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ApiError {
    fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::UNAUTHORIZED,
            code: "UNAUTHENTICATED",
            message: message.into(),
        }
    }
}

fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::InvalidState(_) | CoreError::AlreadyExists(_) => StatusCode::CONFLICT,
        CoreError::InsufficientFunds(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        CoreError::Storage(_) | CoreError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Http {
                status,
                code,
                message,
            } => (status, code, message),
            ApiError::Core(err) => (status_for(&err), err.code(), err.to_string()),
        };
        (
            status,
            Json(serde_json::json!({ "code": code, "message": message })),
        )
            .into_response()
    }
}

/// Extract the calling principal's user id from the request headers.
fn actor(headers: &HeaderMap) -> Result<String, ApiError> {
    let value = headers
        .get(ACTOR_HEADER)
        .ok_or_else(|| ApiError::unauthenticated(format!("missing {ACTOR_HEADER} header")))?;
    let value = value
        .to_str()
        .map_err(|_| ApiError::unauthenticated(format!("invalid {ACTOR_HEADER} header")))?;
    if value.trim().is_empty() {
        return Err(ApiError::unauthenticated(format!(
            "empty {ACTOR_HEADER} header"
        )));
    }
    Ok(value.to_string())
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    ledger_backend: &'static str,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "questbank-service",
        ledger_backend: state.engine.ledger_backend(),
    })
}

#[derive(Debug, Clone, Deserialize)]
struct RegisterPrincipalRequest {
    user_id: String,
    role: Role,
    org_id: Option<String>,
}

async fn register_principal(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(request): Json<RegisterPrincipalRequest>,
) -> Result<Json<Principal>, ApiError> {
    let actor = actor(&headers)?;
    let principal = state
        .engine
        .register_principal(&actor, &request.user_id, request.role, request.org_id)
        .await?;
    Ok(Json(principal))
}

#[derive(Debug, Clone, Deserialize)]
struct ProvisionWalletRequest {
    owner: WalletOwner,
    owner_id: String,
}

async fn provision_wallet(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(request): Json<ProvisionWalletRequest>,
) -> Result<Json<Wallet>, ApiError> {
    let actor = actor(&headers)?;
    let wallet = state
        .engine
        .provision_wallet(&actor, request.owner, &request.owner_id)
        .await?;
    Ok(Json(wallet))
}

async fn my_wallet(
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<Json<Wallet>, ApiError> {
    let actor = actor(&headers)?;
    Ok(Json(state.engine.my_wallet(&actor).await?))
}

#[derive(Debug, Clone, Deserialize)]
struct LedgerQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn my_ledger(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<LedgerPage>, ApiError> {
    let actor = actor(&headers)?;
    let page = state
        .engine
        .my_ledger(
            &actor,
            query.limit.unwrap_or(100),
            query.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(page))
}

#[derive(Debug, Clone, Deserialize)]
struct GrantRequest {
    amount: u64,
}

async fn grant_to_org(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(org_id): Path<String>,
    Json(request): Json<GrantRequest>,
) -> Result<Json<Wallet>, ApiError> {
    let actor = actor(&headers)?;
    let wallet = state
        .engine
        .grant_to_org(&actor, &org_id, request.amount)
        .await?;
    Ok(Json(wallet))
}

async fn platform_balance(
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<Json<PlatformBalance>, ApiError> {
    let actor = actor(&headers)?;
    Ok(Json(state.engine.platform_balance(&actor).await?))
}

async fn create_quest(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(draft): Json<QuestDraft>,
) -> Result<Json<Quest>, ApiError> {
    let actor = actor(&headers)?;
    Ok(Json(state.engine.create_quest(&actor, draft).await?))
}

async fn get_quest(
    State(state): State<ServiceState>,
    Path(quest_id): Path<String>,
) -> Result<Json<Quest>, ApiError> {
    Ok(Json(state.engine.get_quest(&quest_id).await?))
}

async fn submit_quest(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(quest_id): Path<String>,
) -> Result<Json<Quest>, ApiError> {
    let actor = actor(&headers)?;
    Ok(Json(state.engine.submit_quest(&actor, &quest_id).await?))
}

async fn revise_quest(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(quest_id): Path<String>,
    Json(draft): Json<QuestDraft>,
) -> Result<Json<Quest>, ApiError> {
    let actor = actor(&headers)?;
    Ok(Json(
        state.engine.revise_quest(&actor, &quest_id, draft).await?,
    ))
}

async fn approve_quest(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(quest_id): Path<String>,
) -> Result<Json<ApprovalOutcome>, ApiError> {
    let actor = actor(&headers)?;
    Ok(Json(state.engine.approve_quest(&actor, &quest_id).await?))
}

#[derive(Debug, Clone, Deserialize)]
struct RejectRequest {
    reason: String,
}

async fn reject_quest(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(quest_id): Path<String>,
    Json(request): Json<RejectRequest>,
) -> Result<Json<Quest>, ApiError> {
    let actor = actor(&headers)?;
    Ok(Json(
        state
            .engine
            .reject_quest(&actor, &quest_id, &request.reason)
            .await?,
    ))
}

#[derive(Debug, Clone, Deserialize)]
struct SetActiveRequest {
    active: bool,
}

async fn set_quest_active(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(quest_id): Path<String>,
    Json(request): Json<SetActiveRequest>,
) -> Result<Json<Quest>, ApiError> {
    let actor = actor(&headers)?;
    Ok(Json(
        state
            .engine
            .set_quest_active(&actor, &quest_id, request.active)
            .await?,
    ))
}

async fn reserve_seat(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(quest_id): Path<String>,
) -> Result<(StatusCode, Json<Enrollment>), ApiError> {
    let actor = actor(&headers)?;
    let enrollment = state.engine.reserve_seat(&actor, &quest_id).await?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

async fn cancel_seat(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(quest_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let actor = actor(&headers)?;
    state.engine.cancel_seat(&actor, &quest_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Clone, Deserialize)]
struct AnswerRequest {
    choice: u32,
}

async fn submit_answer(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(quest_id): Path<String>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<Submission>, ApiError> {
    let actor = actor(&headers)?;
    Ok(Json(
        state
            .engine
            .submit_answer(&actor, &quest_id, request.choice)
            .await?,
    ))
}

#[derive(Debug, Clone, Deserialize)]
struct CreateEngagementRequest {
    name: String,
}

async fn create_engagement(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(request): Json<CreateEngagementRequest>,
) -> Result<(StatusCode, Json<Engagement>), ApiError> {
    let actor = actor(&headers)?;
    let engagement = state.engine.create_engagement(&actor, &request.name).await?;
    Ok((StatusCode::CREATED, Json(engagement)))
}

async fn get_engagement(
    State(state): State<ServiceState>,
    Path(engagement_id): Path<String>,
) -> Result<Json<Engagement>, ApiError> {
    Ok(Json(state.engine.get_engagement(&engagement_id).await?))
}

#[derive(Debug, Clone, Deserialize)]
struct FundRequest {
    amount: u64,
    reason: Option<String>,
}

async fn fund_engagement(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(engagement_id): Path<String>,
    Json(request): Json<FundRequest>,
) -> Result<Json<Engagement>, ApiError> {
    let actor = actor(&headers)?;
    Ok(Json(
        state
            .engine
            .fund_engagement(
                &actor,
                &engagement_id,
                request.amount,
                request.reason.as_deref(),
            )
            .await?,
    ))
}

#[derive(Debug, Clone, Deserialize)]
struct RecipientRequest {
    planned_amount: u64,
}

async fn upsert_recipient(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path((engagement_id, user_id)): Path<(String, String)>,
    Json(request): Json<RecipientRequest>,
) -> Result<Json<EngagementRecipient>, ApiError> {
    let actor = actor(&headers)?;
    Ok(Json(
        state
            .engine
            .upsert_recipient(&actor, &engagement_id, &user_id, request.planned_amount)
            .await?,
    ))
}

async fn remove_recipient(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path((engagement_id, user_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let actor = actor(&headers)?;
    state
        .engine
        .remove_recipient(&actor, &engagement_id, &user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn distribute_engagement(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(engagement_id): Path<String>,
) -> Result<Json<DistributionSummary>, ApiError> {
    let actor = actor(&headers)?;
    Ok(Json(
        state
            .engine
            .distribute_engagement(&actor, &engagement_id)
            .await?,
    ))
}
