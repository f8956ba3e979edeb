use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::json;

use brokerage_api::app::{
    self,
    services::{AppServices, InMemoryStores},
};
use brokerage_auth::{AccountRecord, AccountStatus, ActorClaims, PermissionTemplate, Role, TemplateStore};
use brokerage_core::{TemplateId, UserId};
use brokerage_infra::AppConfig;

const JWT_SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    stores: InMemoryStores,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod over in-memory stores, bound to an ephemeral port.
        let config = AppConfig::in_memory(JWT_SECRET);
        let (services, stores) = AppServices::in_memory(&config);
        let app = app::build_app(Arc::new(services), &config);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });

        Self {
            base_url,
            stores,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn add_account(&self, role: Role, configure: impl FnOnce(&mut AccountRecord)) -> AccountRecord {
        let user_id = UserId::new();
        let mut account = AccountRecord {
            user_id,
            email: format!("{}@example.com", user_id),
            role,
            branch_code: Some("NYC".to_string()),
            status: AccountStatus::Active,
            last_password_change: None,
            force_password_change: false,
        };
        configure(&mut account);
        self.stores.accounts.upsert(account.clone());
        account
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(account: &AccountRecord) -> String {
    let now = Utc::now();
    let claims = ActorClaims {
        sub: account.user_id,
        role: account.role.clone(),
        branch_code: account.branch_code.clone(),
        iat: (now - ChronoDuration::minutes(1)).timestamp(),
        exp: (now + ChronoDuration::minutes(10)).timestamp(),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

async fn audit_entries_eventually(
    client: &reqwest::Client,
    srv: &TestServer,
    token: &str,
    action: &str,
    entity_id: &str,
) -> serde_json::Value {
    // Audit writes happen on a background task; poll until the entry lands.
    for _ in 0..50 {
        let res = client
            .get(srv.url("/admin/audit-log"))
            .query(&[("action", action), ("entity_id", entity_id)])
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let body: serde_json::Value = res.json().await.unwrap();
        if body["total"].as_u64().unwrap_or(0) > 0 {
            return body;
        }

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    panic!("no {action} audit entry within timeout");
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;

    let res = reqwest::get(srv.url("/health")).await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let res = reqwest::Client::new()
        .get(srv.url("/me/permissions"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_authenticated");
}

#[tokio::test]
async fn agent_sees_role_permissions_but_not_admin_routes() {
    let srv = TestServer::spawn().await;
    let agent = srv.add_account(Role::AGENT, |_| {});
    let token = mint_jwt(&agent);
    let client = reqwest::Client::new();

    let res = client
        .get(srv.url("/me/permissions"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["role"], "agent");
    assert!(body["all_permissions"]
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p == "customers:read:own"));

    let res = client
        .get(srv.url("/admin/audit-log"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "insufficient_permissions");
    assert_eq!(body["required"], json!(["audit:read"]));
}

#[tokio::test]
async fn grant_and_revoke_are_effective_and_audited() {
    let srv = TestServer::spawn().await;
    let admin = srv.add_account(Role::ADMIN, |_| {});
    let agent = srv.add_account(Role::AGENT, |_| {});
    let admin_token = mint_jwt(&admin);
    let agent_token = mint_jwt(&agent);
    let client = reqwest::Client::new();
    let grants_url = srv.url(&format!("/admin/users/{}/permissions", agent.user_id));

    let res = client
        .post(&grants_url)
        .bearer_auth(&admin_token)
        .json(&json!({ "permission": "reports:export" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["action"], "created");

    // Same pair again updates the existing row.
    let res = client
        .post(&grants_url)
        .bearer_auth(&admin_token)
        .json(&json!({ "permission": "reports:export" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(srv.stores.grants.len(), 1);

    let res = client
        .get(srv.url("/me/permissions"))
        .bearer_auth(&agent_token)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body["custom_permissions"]
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p == "reports:export"));

    let audit = audit_entries_eventually(
        &client,
        &srv,
        &admin_token,
        "CRITICAL_GRANT_PERMISSION",
        &agent.user_id.to_string(),
    )
    .await;
    let entry = &audit["entries"][0];
    assert_eq!(entry["actor_id"], admin.user_id.to_string());
    assert_eq!(entry["entity_id"], agent.user_id.to_string());
    assert_eq!(entry["metadata"]["severity"], "HIGH");

    let res = client
        .delete(format!("{}/reports:export", grants_url))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(srv.url("/me/permissions"))
        .bearer_auth(&agent_token)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["custom_permissions"], json!([]));

    let res = client
        .delete(format!("{}/files:delete", grants_url))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_grants_are_rejected() {
    let srv = TestServer::spawn().await;
    let admin = srv.add_account(Role::ADMIN, |_| {});
    let agent = srv.add_account(Role::AGENT, |_| {});
    let token = mint_jwt(&admin);
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url(&format!("/admin/users/{}/permissions", agent.user_id)))
        .bearer_auth(&token)
        .json(&json!({ "permission": "reports::" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(srv.url(&format!("/admin/users/{}/permissions", UserId::new())))
        .bearer_auth(&token)
        .json(&json!({ "permission": "reports:export" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(srv.stores.grants.is_empty());
}

#[tokio::test]
async fn malformed_grant_requests_are_still_audited() {
    let srv = TestServer::spawn().await;
    let admin = srv.add_account(Role::ADMIN, |_| {});
    let agent = srv.add_account(Role::AGENT, |_| {});
    let token = mint_jwt(&admin);
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/admin/users/not-a-uuid/permissions"))
        .bearer_auth(&token)
        .json(&json!({ "permission": "reports:export" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_id");

    let audit = audit_entries_eventually(&client, &srv, &token, "CRITICAL_GRANT_PERMISSION", "not-a-uuid").await;
    assert_eq!(audit["total"], 1);
    let entry = &audit["entries"][0];
    assert_eq!(entry["metadata"]["status_code"], 400);
    assert_eq!(entry["metadata"]["success"], false);
    assert_eq!(entry["metadata"]["request_data"]["permission"], "reports:export");

    // A body that is not JSON is rejected inside the audited handler too.
    let res = client
        .post(srv.url(&format!("/admin/users/{}/permissions", agent.user_id)))
        .bearer_auth(&token)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let audit = audit_entries_eventually(
        &client,
        &srv,
        &token,
        "CRITICAL_GRANT_PERMISSION",
        &agent.user_id.to_string(),
    )
    .await;
    assert_eq!(audit["total"], 1);
    let entry = &audit["entries"][0];
    assert_eq!(entry["metadata"]["status_code"], 400);
    assert_eq!(entry["metadata"]["request_data"], serde_json::Value::Null);
    assert!(srv.stores.grants.is_empty());
}

#[tokio::test]
async fn template_grants_each_permission() {
    let srv = TestServer::spawn().await;
    let admin = srv.add_account(Role::ADMIN, |_| {});
    let manager = srv.add_account(Role::MANAGER, |_| {});
    let template_id = TemplateId::new();
    srv.stores
        .templates
        .save(PermissionTemplate {
            id: template_id,
            name: "Reporting".to_string(),
            description: None,
            permissions: vec!["reports:export".into(), "reports:schedule".into()],
            is_active: true,
        })
        .await
        .unwrap();

    let res = reqwest::Client::new()
        .post(srv.url(&format!(
            "/admin/users/{}/permission-templates/{}",
            manager.user_id, template_id
        )))
        .bearer_auth(mint_jwt(&admin))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["permissions_granted"], 2);
    assert_eq!(body["total_permissions"], 2);
    assert_eq!(body["failures"], json!([]));
}

#[tokio::test]
async fn explain_reports_the_deciding_rule() {
    let srv = TestServer::spawn().await;
    let director = srv.add_account(Role::DIRECTOR, |_| {});
    let agent = srv.add_account(Role::AGENT, |_| {});

    let res = reqwest::Client::new()
        .post(srv.url(&format!("/admin/users/{}/permissions/explain", agent.user_id)))
        .bearer_auth(mint_jwt(&director))
        .json(&json!({ "permission": "customers:read:own", "owner_id": UserId::new() }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["granted"], false);
}

#[tokio::test]
async fn session_state_is_checked_on_every_request() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let changed = srv.add_account(Role::AGENT, |a| a.last_password_change = Some(Utc::now()));
    let res = client
        .get(srv.url("/me/permissions"))
        .bearer_auth(mint_jwt(&changed))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "password_changed");

    let suspended = srv.add_account(Role::AGENT, |a| a.status = AccountStatus::Suspended);
    let res = client
        .get(srv.url("/me/permissions"))
        .bearer_auth(mint_jwt(&suspended))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let forced = srv.add_account(Role::AGENT, |a| a.force_password_change = true);
    let token = mint_jwt(&forced);
    let res = client
        .get(srv.url("/me/permissions"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "password_change_required");

    // The change-password path gets past the session guard (and 404s here,
    // since this service does not serve it).
    let res = client
        .get(srv.url("/auth/change-password"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn repeated_failures_block_until_unlocked() {
    let srv = TestServer::spawn().await;
    let admin = srv.add_account(Role::ADMIN, |_| {});
    let target = srv.add_account(Role::AGENT, |_| {});
    let client = reqwest::Client::new();

    for _ in 0..5 {
        let res = client
            .get(srv.url("/me/permissions"))
            .bearer_auth("not-a-jwt")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    let res = client
        .get(srv.url("/me/permissions"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: i64 = res.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!(retry_after > 0);

    // The block is per (ip, actor): an authenticated admin is unaffected.
    let admin_token = mint_jwt(&admin);
    let res = client
        .post(srv.url("/admin/security/unlock"))
        .bearer_auth(&admin_token)
        .json(&json!({ "ip": "127.0.0.1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(srv.url("/me/permissions"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // Unlocking a named user records that user's state before the action.
    let res = client
        .post(srv.url("/admin/security/unlock"))
        .bearer_auth(&admin_token)
        .json(&json!({ "ip": "127.0.0.1", "user_id": target.user_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let audit = audit_entries_eventually(
        &client,
        &srv,
        &admin_token,
        "CRITICAL_UNLOCK",
        &target.user_id.to_string(),
    )
    .await;
    let entry = &audit["entries"][0];
    assert_eq!(entry["entity_type"], "user");
    assert_eq!(entry["metadata"]["status_code"], 200);
    assert_eq!(entry["before_state"]["email"], target.email);
}
