//! policy_gate_server: sample application behind the policy gate.
//!
//! Reads config from env vars (a `.env` file is honoured):
//! - `DATABASE_URL`: Postgres connection string (required)
//! - `POLICY_GATE_BIND_ADDR`: listen address (default: 0.0.0.0:4200)
//! - `POLICY_GATE_*`: gate options, see `GateConfig::from_env`
//!
//! Identity comes from `x-gate-user` / `x-gate-groups`, so run it behind an
//! authenticating proxy only.

use std::sync::Arc;

use axum::{middleware, response::Json, routing::get, Extension, Router};
use policy_consent::{
    api::{self, header_identity, AppState},
    ApplicabilityResolver, ConfirmationService, GateConfig, GateDecisionEngine, GateUser,
    HookRegistry, PgStores, PolicyStore, TokenIssuer,
};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,policy_consent=debug".into()),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let bind_addr =
        std::env::var("POLICY_GATE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:4200".into());

    let config = GateConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await?;
    tracing::info!("Connected to database");

    let stores = PgStores::new(pool);
    let policies: Arc<dyn PolicyStore> = Arc::new(stores.policies);
    let ledger = Arc::new(stores.confirmations);

    // Deployments register their own hooks here and name them in config.
    let hooks = HookRegistry::new()
        .register_start_hook("skip_api", |ctx| Some(!ctx.path.starts_with("/api/")))
        .register_second_confirmation_hook("always", |_, _| Some(true));

    let engine = GateDecisionEngine::new(
        config.clone(),
        &hooks,
        Arc::clone(&policies),
        ledger.clone(),
    )?;
    let service = ConfirmationService::new(
        Arc::clone(&policies),
        ledger,
        TokenIssuer::from_config(Arc::new(stores.tokens), &config)?,
        ApplicabilityResolver::new(config.default_policy),
    )
    .require_token(config.require_token);

    let state = AppState {
        engine: Arc::new(engine),
        service: Arc::new(service),
        policies,
    };
    let snapshot = state.engine.snapshot();

    let app = Router::new()
        .route("/", get(home))
        .route("/account", get(home));
    let app = api::protect(app, state)
        .route(
            "/health",
            get(move || {
                let snapshot = snapshot.clone();
                async move { Json(json!({ "status": "ok", "gate": snapshot })) }
            }),
        )
        .layer(middleware::from_fn(header_identity))
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("policy_gate_server listening on {bind_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn home(user: Option<Extension<GateUser>>) -> Json<Value> {
    Json(json!({
        "user": user.map(|Extension(u)| u.user_id),
        "message": "all required policies confirmed",
    }))
}
