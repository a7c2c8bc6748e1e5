//! E2E tests for permission-based access rules

mod common;

use common::{TestServer, location, test_config};
use kinde_axum::api::AccessResponse;
use kinde_axum::config::AccessRuleConfig;

async fn server_with_admin_rule() -> TestServer {
    let mut config = test_config();
    config.access.rules.push(AccessRuleConfig {
        route: "/admin/**".to_string(),
        permissions: vec!["admin".to_string()],
        redirect_url: "/denied".to_string(),
    });
    TestServer::with_config(config).await
}

async fn check(server: &TestServer, route: &str, cookie: Option<&str>) -> reqwest::Response {
    let mut request = server
        .client
        .post(server.url("/api/access"))
        .json(&serde_json::json!({ "route": route }));
    if let Some(cookie) = cookie {
        request = request.header("cookie", cookie);
    }
    request.send().await.unwrap()
}

#[tokio::test]
async fn test_user_without_permission_is_redirected() {
    let server = server_with_admin_rule().await;
    let cookie = server.sign_in("user").await;

    let response = server.get("/admin/panel", Some(&cookie)).await;

    assert_eq!(response.status(), 303);
    assert_eq!(location(&response), "/denied");
}

#[tokio::test]
async fn test_json_client_without_permission_is_forbidden() {
    let server = server_with_admin_rule().await;
    let cookie = server.sign_in("user").await;

    let response = server
        .client
        .get(server.url("/admin/panel"))
        .header("cookie", &cookie)
        .header("accept", "application/json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);
    assert!(response.headers().get("location").is_none());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Access denied");
}

#[tokio::test]
async fn test_user_with_permission_is_served() {
    let server = server_with_admin_rule().await;
    let cookie = server.sign_in("admin,user").await;

    let response = server.get("/admin/panel", Some(&cookie)).await;

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "admin panel");
}

#[tokio::test]
async fn test_signed_out_user_is_sent_to_login() {
    let server = server_with_admin_rule().await;

    let response = server.get("/admin/panel", None).await;

    assert_eq!(response.status(), 303);
    assert_eq!(
        location(&response),
        "/api/login?post_login_redirect_url=%2Fadmin%2Fpanel"
    );
}

#[tokio::test]
async fn test_access_endpoint_reports_decisions() {
    let server = server_with_admin_rule().await;
    let user = server.sign_in("user").await;
    let admin = server.sign_in("admin").await;

    let denied: AccessResponse = check(&server, "/admin/panel", Some(&user))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(
        denied,
        AccessResponse {
            allowed: false,
            redirect_url: Some("/denied".to_string()),
        }
    );

    let allowed: AccessResponse = check(&server, "/admin/panel", Some(&admin))
        .await
        .json()
        .await
        .unwrap();
    assert!(allowed.allowed);
    assert!(allowed.redirect_url.is_none());

    let open: AccessResponse = check(&server, "/about", None).await.json().await.unwrap();
    assert!(open.allowed);
}

#[tokio::test]
async fn test_access_endpoint_rejects_relative_route() {
    let server = server_with_admin_rule().await;

    let response = check(&server, "admin", None).await;

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_access_endpoint_absent_without_rules() {
    let server = TestServer::new().await;

    let response = check(&server, "/admin/panel", None).await;

    assert_eq!(response.status(), 404);
}
