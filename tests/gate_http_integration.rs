//! HTTP-level integration tests for the policy gate.
//!
//! Drives a protected router end to end: identity headers, the gating
//! middleware, the confirmation endpoints and the read API. Runs against
//! `MemoryStore`; the Postgres variant at the bottom is `#[ignore]`d.
//!
//! Run the Postgres test with:
//!   DATABASE_URL="postgresql:///policy_gate" cargo test --features database --test gate_http_integration -- --ignored

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    middleware,
    response::Response,
    routing::get,
    Router,
};
use http_body_util::BodyExt;
use policy_consent::{
    api::{self, header_identity, interceptor::encode_next, AppState},
    ApplicabilityResolver, ConfirmationService, GateConfig, GateDecisionEngine, GateError,
    HookRegistry, MemoryStore, PolicyStore, PolicyVersion, TokenIssuer, TokenStore,
};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

const PAGE: &str = "/terms/and/conditions";

// ── Test app builder ───────────────────────────────────────────

fn build_app(
    config: GateConfig,
    hooks: &HookRegistry,
    policies: Arc<dyn PolicyStore>,
    store: Arc<MemoryStore>,
) -> Router {
    let engine =
        GateDecisionEngine::new(config.clone(), hooks, Arc::clone(&policies), store.clone())
            .expect("engine config");
    let service = ConfirmationService::new(
        Arc::clone(&policies),
        store.clone(),
        TokenIssuer::from_config(store, &config).expect("token config"),
        ApplicabilityResolver::new(config.default_policy),
    )
    .require_token(config.require_token);
    let state = AppState {
        engine: Arc::new(engine),
        service: Arc::new(service),
        policies,
    };

    let app = Router::new()
        .route("/", get(|| async { "home" }))
        .route("/dashboard", get(|| async { "dashboard" }))
        .route("/static/app.css", get(|| async { "body {}" }));
    api::protect(app, state).layer(middleware::from_fn(header_identity))
}

async fn app_with(
    config: GateConfig,
    hooks: &HookRegistry,
    policies: &[PolicyVersion],
) -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    for p in policies {
        store.insert_policy(p).await.expect("seed policy");
    }
    let app = build_app(config, hooks, store.clone(), store.clone());
    (app, store)
}

fn request(method: &str, uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-gate-user", user);
    }
    builder.body(Body::empty()).unwrap()
}

fn json_post(uri: &str, user: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-gate-user", user)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> Response {
    app.clone().oneshot(req).await.unwrap()
}

fn location(resp: &Response) -> String {
    resp.headers()
        .get(header::LOCATION)
        .expect("redirect without Location")
        .to_str()
        .unwrap()
        .to_string()
}

async fn body_json(resp: Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn terms() -> PolicyVersion {
    PolicyVersion::new("Terms of Service", "Be nice.").activated()
}

// ── Gating ─────────────────────────────────────────────────────

#[tokio::test]
async fn anonymous_requests_pass_through() {
    let (app, _) = app_with(GateConfig::default(), &HookRegistry::new(), &[terms()]).await;
    let resp = send(&app, request("GET", "/dashboard", None)).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn no_active_policies_allows_everything() {
    let (app, _) = app_with(GateConfig::default(), &HookRegistry::new(), &[]).await;
    let resp = send(&app, request("GET", "/dashboard", Some("alice"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn unconfirmed_policy_redirects_to_confirm_page() {
    let policy = terms();
    let (app, _) = app_with(GateConfig::default(), &HookRegistry::new(), &[policy.clone()]).await;

    let resp = send(&app, request("GET", "/dashboard", Some("alice"))).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&resp),
        format!("{PAGE}/confirm/{}/{}", policy.id, encode_next("/dashboard"))
    );
}

#[tokio::test]
async fn confirming_resumes_original_destination() {
    let policy = terms();
    let (app, store) = app_with(GateConfig::default(), &HookRegistry::new(), &[policy.clone()]).await;

    let resp = send(&app, request("GET", "/dashboard", Some("alice"))).await;
    let confirm_url = location(&resp);

    // The confirm page itself is never gated.
    let view = send(&app, request("GET", &confirm_url, Some("alice"))).await;
    assert_eq!(view.status(), StatusCode::OK);
    let view = body_json(view).await;
    assert_eq!(view["policy"]["id"], policy.id.to_string());
    assert_eq!(view["next"], "/dashboard");

    let resp = send(&app, request("POST", &confirm_url, Some("alice"))).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/dashboard");

    let resp = send(&app, request("GET", "/dashboard", Some("alice"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(store.confirmation_count().await, 1);

    // Another user is still gated.
    let resp = send(&app, request("GET", "/dashboard", Some("bob"))).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn repeated_confirm_posts_keep_one_row() {
    let policy = terms();
    let (app, store) = app_with(GateConfig::default(), &HookRegistry::new(), &[policy.clone()]).await;
    let url = format!("{PAGE}/confirm/{}/{}", policy.id, encode_next("/"));
    for _ in 0..3 {
        let resp = send(&app, request("POST", &url, Some("alice"))).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    }
    assert_eq!(store.confirmation_count().await, 1);
}

#[tokio::test]
async fn new_policy_version_requires_fresh_confirmation() {
    let v1 = terms();
    let (app, store) = app_with(GateConfig::default(), &HookRegistry::new(), &[v1.clone()]).await;
    let url = format!("{PAGE}/confirm/{}/{}", v1.id, encode_next("/"));
    send(&app, request("POST", &url, Some("alice"))).await;
    assert_eq!(send(&app, request("GET", "/", Some("alice"))).await.status(), StatusCode::OK);

    let v2 = PolicyVersion::new("Terms of Service", "Be nicer.")
        .with_version(2)
        .activated();
    store.insert_policy(&v2).await.unwrap();
    store.set_active(&[v1.id], false).await.unwrap();

    let resp = send(&app, request("GET", "/", Some("alice"))).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert!(location(&resp).starts_with(&format!("{PAGE}/confirm/{}/", v2.id)));
}

#[tokio::test]
async fn ignored_urls_are_not_gated() {
    let config = GateConfig::default().with_ignore_urls(["/static/"]);
    let (app, _) = app_with(config, &HookRegistry::new(), &[terms()]).await;

    let resp = send(&app, request("GET", "/static/app.css", Some("alice"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = send(&app, request("GET", "/dashboard", Some("alice"))).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn disabled_gate_passes_everything() {
    let config = GateConfig {
        enabled: false,
        ..GateConfig::default()
    };
    let (app, _) = app_with(config, &HookRegistry::new(), &[terms()]).await;
    let resp = send(&app, request("GET", "/dashboard", Some("alice"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn start_hook_can_veto_gating() {
    let hooks = HookRegistry::new().register_start_hook("skip_root", |ctx| Some(ctx.path != "/"));
    let config = GateConfig {
        start_hook: Some("skip_root".into()),
        ..GateConfig::default()
    };
    let (app, _) = app_with(config, &hooks, &[terms()]).await;
    assert_eq!(send(&app, request("GET", "/", Some("alice"))).await.status(), StatusCode::OK);
    assert_eq!(
        send(&app, request("GET", "/dashboard", Some("alice"))).await.status(),
        StatusCode::SEE_OTHER
    );
}

#[tokio::test]
async fn group_policy_only_gates_members() {
    let staff_rules = PolicyVersion::new("Staff rules", "").for_group("staff").activated();
    let (app, _) = app_with(GateConfig::default(), &HookRegistry::new(), &[staff_rules]).await;

    let resp = send(&app, request("GET", "/dashboard", Some("alice"))).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = Request::builder()
        .uri("/dashboard")
        .header("x-gate-user", "carol")
        .header("x-gate-groups", "staff")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, req).await.status(), StatusCode::SEE_OTHER);
}

// ── Second confirmation ───────────────────────────────────────

fn second_confirmation_config() -> (GateConfig, HookRegistry) {
    let hooks = HookRegistry::new().register_second_confirmation_hook("always", |_, _| Some(true));
    let config = GateConfig {
        second_confirmation_hook: Some("always".into()),
        ..GateConfig::default()
    };
    (config, hooks)
}

async fn confirm_first(app: &Router, policy: &PolicyVersion, user: &str) -> String {
    let url = format!("{PAGE}/confirm/{}/{}", policy.id, encode_next("/dashboard"));
    send(app, request("POST", &url, Some(user))).await;
    let resp = send(app, request("GET", "/dashboard", Some(user))).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    location(&resp)
}

#[tokio::test]
async fn second_confirmation_flow_with_token() {
    let (config, hooks) = second_confirmation_config();
    let policy = terms();
    let (app, _) = app_with(config, &hooks, &[policy.clone()]).await;

    let second_url = confirm_first(&app, &policy, "alice").await;
    assert!(second_url.starts_with(&format!("{PAGE}/second-confirm/")));

    let view = send(&app, request("GET", &second_url, Some("alice"))).await;
    assert_eq!(view.status(), StatusCode::OK);
    let view = body_json(view).await;
    assert_eq!(view["policy_id"], policy.id.to_string());
    let token = view["token"].as_str().unwrap().to_string();
    assert_eq!(token.len(), 32);

    let resp = send(&app, json_post(&second_url, "alice", serde_json::json!({ "token": token }))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let confirmation = body_json(resp).await;
    assert!(!confirmation["second_confirmed_at"].is_null());

    let resp = send(&app, request("GET", "/dashboard", Some("alice"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn repeated_second_confirm_views_share_one_token() {
    let (config, hooks) = second_confirmation_config();
    let policy = terms();
    let (app, store) = app_with(config, &hooks, &[policy.clone()]).await;

    let second_url = confirm_first(&app, &policy, "alice").await;
    let mut tokens = Vec::new();
    for _ in 0..3 {
        let view = send(&app, request("GET", &second_url, Some("alice"))).await;
        assert_eq!(view.status(), StatusCode::OK);
        tokens.push(body_json(view).await["token"].as_str().unwrap().to_string());
    }
    tokens.dedup();
    assert_eq!(tokens.len(), 1);

    let confirmation_id: Uuid = second_url.rsplit('/').next().unwrap().parse().unwrap();
    assert_eq!(store.tokens_for(confirmation_id).await.unwrap().len(), 1);

    // Redeemed once, then gone.
    let body = serde_json::json!({ "token": tokens[0] });
    let resp = send(&app, json_post(&second_url, "alice", body)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(store.tokens_for(confirmation_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn wrong_token_is_rejected() {
    let (config, hooks) = second_confirmation_config();
    let policy = terms();
    let (app, _) = app_with(config, &hooks, &[policy.clone()]).await;

    let second_url = confirm_first(&app, &policy, "alice").await;
    send(&app, request("GET", &second_url, Some("alice"))).await;

    let resp = send(
        &app,
        json_post(&second_url, "alice", serde_json::json!({ "token": "not-the-token-not-the-token-0000" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Still pending.
    let resp = send(&app, request("GET", "/dashboard", Some("alice"))).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn required_token_must_be_presented() {
    let (config, hooks) = second_confirmation_config();
    let config = GateConfig {
        require_token: true,
        ..config
    };
    let policy = terms();
    let (app, _) = app_with(config, &hooks, &[policy.clone()]).await;

    let second_url = confirm_first(&app, &policy, "alice").await;
    let resp = send(&app, json_post(&second_url, "alice", serde_json::json!({}))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn confirmation_of_another_user_is_forbidden() {
    let (config, hooks) = second_confirmation_config();
    let policy = terms();
    let (app, _) = app_with(config, &hooks, &[policy.clone()]).await;

    let second_url = confirm_first(&app, &policy, "alice").await;
    let resp = send(&app, request("GET", &second_url, Some("mallory"))).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

// ── Read API ───────────────────────────────────────────────────

#[tokio::test]
async fn policy_api_requires_identity() {
    let (app, _) = app_with(GateConfig::default(), &HookRegistry::new(), &[terms()]).await;
    let resp = send(&app, request("GET", "/api/policies", None)).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn policy_api_lists_only_active_policies() {
    let active = terms();
    let draft = PolicyVersion::new("Draft", "not yet");
    let (app, _) = app_with(GateConfig::default(), &HookRegistry::new(), &[active.clone(), draft.clone()]).await;

    // Reachable before any confirmation.
    let resp = send(&app, request("GET", "/api/policies", Some("alice"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let list = body_json(resp).await;
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], active.id.to_string());

    let resp = send(&app, request("GET", &format!("/api/policies/{}", draft.id), Some("alice"))).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = send(&app, request("GET", &format!("/api/policies/{}", active.id), Some("alice"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

// ── Fail closed ────────────────────────────────────────────────

struct UnavailablePolicies;

#[async_trait]
impl PolicyStore for UnavailablePolicies {
    async fn list_active_policies(&self) -> policy_consent::Result<Vec<PolicyVersion>> {
        Err(GateError::LedgerUnavailable(anyhow::anyhow!("connection refused")))
    }

    async fn get_policy(&self, _id: Uuid) -> policy_consent::Result<Option<PolicyVersion>> {
        Err(GateError::LedgerUnavailable(anyhow::anyhow!("connection refused")))
    }

    async fn insert_policy(&self, _policy: &PolicyVersion) -> policy_consent::Result<()> {
        Err(GateError::LedgerUnavailable(anyhow::anyhow!("connection refused")))
    }

    async fn set_active(&self, _ids: &[Uuid], _active: bool) -> policy_consent::Result<u64> {
        Err(GateError::LedgerUnavailable(anyhow::anyhow!("connection refused")))
    }
}

#[tokio::test]
async fn storage_failure_refuses_gated_requests() {
    let store = Arc::new(MemoryStore::new());
    let app = build_app(
        GateConfig::default(),
        &HookRegistry::new(),
        Arc::new(UnavailablePolicies),
        store,
    );

    let resp = send(&app, request("GET", "/dashboard", Some("alice"))).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(resp).await;
    assert!(!body["error"].as_str().unwrap().contains("connection refused"));

    // Anonymous traffic never reaches the store.
    let resp = send(&app, request("GET", "/dashboard", None)).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send(&app, request("GET", "/api/policies", Some("alice"))).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// ── Postgres ───────────────────────────────────────────────────

#[cfg(feature = "database")]
#[tokio::test]
#[ignore]
async fn postgres_confirm_flow() {
    use policy_consent::PgStores;
    use sqlx::postgres::PgPoolOptions;

    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("failed to connect to test database");
    let stores = PgStores::new(pool);

    let policy = terms();
    stores.policies.insert_policy(&policy).await.unwrap();
    let policies: Arc<dyn PolicyStore> = Arc::new(stores.policies);
    let ledger = Arc::new(stores.confirmations);
    let config = GateConfig::default();
    let engine =
        GateDecisionEngine::new(config.clone(), &HookRegistry::new(), Arc::clone(&policies), ledger.clone())
            .unwrap();
    let service = ConfirmationService::new(
        Arc::clone(&policies),
        ledger,
        TokenIssuer::from_config(Arc::new(stores.tokens), &config).unwrap(),
        ApplicabilityResolver::default(),
    );
    let state = AppState {
        engine: Arc::new(engine),
        service: Arc::new(service),
        policies: Arc::clone(&policies),
    };
    let app = api::protect(Router::new().route("/", get(|| async { "home" })), state)
        .layer(middleware::from_fn(header_identity));

    let user = format!("it-{}", Uuid::new_v4());
    let resp = send(&app, request("GET", "/", Some(&user))).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    send(&app, request("POST", &location(&resp), Some(&user))).await;
    let resp = send(&app, request("GET", "/", Some(&user))).await;
    assert_eq!(resp.status(), StatusCode::OK);

    policies.set_active(&[policy.id], false).await.unwrap();
}
