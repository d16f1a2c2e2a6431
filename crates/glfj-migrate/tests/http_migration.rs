//! Users-only runs against mocked GitLab and Forgejo HTTP APIs.

use std::sync::Arc;

use glfj_migrate::{
    EntityKind, ForgejoClient, GitLabClient, MigrationConfig, MigrationDriver, MigrationOptions,
    Outcome, RetryPolicy,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_versions(gitlab: &MockServer, forgejo: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v4/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"version": "16.11.0"})))
        .mount(gitlab)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"version": "9.0.3"})))
        .mount(forgejo)
        .await;
}

async fn mock_gitlab_users(gitlab: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v4/users"))
        .and(header("PRIVATE-TOKEN", "glpat-test"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Next-Page", "")
                .set_body_json(json!([
                    {"id": 1, "username": "alice", "name": "Alice", "state": "active", "email": "alice@example.com"},
                    {"id": 2, "username": "bob", "name": "Bob", "state": "active"}
                ])),
        )
        .mount(gitlab)
        .await;
}

fn driver(gitlab: &MockServer, forgejo: &MockServer) -> MigrationDriver {
    let config = MigrationConfig::new(gitlab.uri(), "glpat-test", forgejo.uri(), "fj-test");
    let source = Arc::new(GitLabClient::new(&config.source_url, config.source_token.clone()).unwrap());
    let target =
        Arc::new(ForgejoClient::new(&config.target_url, config.target_token.clone()).unwrap());
    let options = MigrationOptions::none()
        .with_kind(EntityKind::User, true)
        .with_retry(RetryPolicy {
            jitter: false,
            ..RetryPolicy::new(2, std::time::Duration::from_millis(10))
        });

    MigrationDriver::new(source, target, config, options)
}

#[tokio::test]
async fn test_users_created_or_matched() {
    let gitlab = MockServer::start().await;
    let forgejo = MockServer::start().await;
    mock_versions(&gitlab, &forgejo).await;
    mock_gitlab_users(&gitlab).await;

    Mock::given(method("GET"))
        .and(path("/api/v1/users/alice"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
        .mount(&forgejo)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/users/bob"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7, "login": "bob"})))
        .mount(&forgejo)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/admin/users"))
        .and(header("Authorization", "token fj-test"))
        .and(body_partial_json(json!({
            "username": "alice",
            "email": "alice@example.com",
            "must_change_password": true,
            "send_notify": false
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 8, "login": "alice"})))
        .expect(1)
        .mount(&forgejo)
        .await;

    let report = driver(&gitlab, &forgejo)
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.exit_code(), 0);
    assert_eq!(
        report.record(EntityKind::User, "alice").unwrap().outcome,
        Outcome::Created
    );
    assert_eq!(
        report.record(EntityKind::User, "bob").unwrap().outcome,
        Outcome::AlreadyExists
    );
    assert_eq!(report.mappings.len(), 2);
}

#[tokio::test]
async fn test_rate_limited_create_is_retried() {
    let gitlab = MockServer::start().await;
    let forgejo = MockServer::start().await;
    mock_versions(&gitlab, &forgejo).await;
    mock_gitlab_users(&gitlab).await;

    Mock::given(method("GET"))
        .and(path("/api/v1/users/alice"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&forgejo)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/users/bob"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&forgejo)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/admin/users"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&forgejo)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/admin/users"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 8, "login": "alice"})))
        .up_to_n_times(1)
        .mount(&forgejo)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/admin/users"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"message": "email invalid"})))
        .mount(&forgejo)
        .await;

    let report = driver(&gitlab, &forgejo)
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        report.record(EntityKind::User, "alice").unwrap().outcome,
        Outcome::Created
    );
    assert!(matches!(
        report.record(EntityKind::User, "bob").unwrap().outcome,
        Outcome::Failed { .. }
    ));
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_unreachable_target_fails_run() {
    let gitlab = MockServer::start().await;
    let forgejo = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"version": "16.11.0"})))
        .mount(&gitlab)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/version"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&forgejo)
        .await;

    let err = driver(&gitlab, &forgejo)
        .run(CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("Permission denied"));
}
