//! Authentication integration tests.
//!
//! Drives the real router over HTTP with tokens signed by fixture keys and a
//! mocked key source. Identities live in memory, and the endpoints used here
//! never reach Postgres.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use anyhow::Result;
use report_service::models::{NewPrincipal, Role};
use report_service::repositories::IdentityStore;
use report_test_utils::{
    lazy_pool, InMemoryIdentityStore, MockKeySource, TestKey, TestReportServer, TestTokenBuilder,
};
use serde_json::{json, Value};
use std::sync::Arc;

const AVATAR_PRESIGN: &str = "/user/profile/presign";

async fn spawn(
    keys: &MockKeySource,
    identities: Arc<InMemoryIdentityStore>,
    overrides: &[(&str, &str)],
) -> Result<TestReportServer> {
    let identities: Arc<dyn IdentityStore> = identities;
    TestReportServer::spawn_with(lazy_pool(), &keys.url(), overrides, Some(identities)).await
}

async fn presign_avatar(server: &TestReportServer, token: Option<&str>) -> reqwest::Response {
    let mut request = reqwest::Client::new()
        .post(format!("{}{AVATAR_PRESIGN}", server.url()))
        .json(&json!({ "content_type": "image/png" }));
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    request.send().await.expect("request completes")
}

#[tokio::test]
async fn test_missing_authorization_is_401_with_challenge() -> Result<()> {
    let keys = MockKeySource::with_keys(&[TestKey::Rsa1]).await;
    let identities = Arc::new(InMemoryIdentityStore::new());
    let server = spawn(&keys, identities.clone(), &[]).await?;

    let response = presign_avatar(&server, None).await;

    assert_eq!(response.status(), 401);
    assert!(response.headers().contains_key("www-authenticate"));
    let body: Value = response.json().await?;
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "auth_required");
    assert!(identities.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn test_valid_token_provisions_principal_on_first_request() -> Result<()> {
    let keys = MockKeySource::with_keys(&[TestKey::Rsa1]).await;
    let identities = Arc::new(InMemoryIdentityStore::new());
    let server = spawn(&keys, identities.clone(), &[]).await?;
    let token = TestTokenBuilder::new()
        .for_user("uid-first-login")
        .with_email("first@example.edu")
        .sign();

    let response = presign_avatar(&server, Some(&token)).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;

    let principals = identities.principals().await;
    assert_eq!(principals.len(), 1);
    let principal = &principals[0];
    assert_eq!(principal.external_id, "uid-first-login");
    assert_eq!(principal.email.as_deref(), Some("first@example.edu"));
    assert_eq!(principal.role, Role::User);

    let key = body["key"].as_str().unwrap();
    assert!(key.starts_with(&format!("user/{}/avatar_", principal.custom_id)));
    assert!(key.ends_with(".png"));
    assert_eq!(body["put"]["method"], "PUT");
    assert_eq!(body["public_url"], format!("https://cdn.test/{key}"));

    // A second request reuses the same principal.
    let response = presign_avatar(&server, Some(&token)).await;
    assert_eq!(response.status(), 200);
    assert_eq!(identities.len().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_scheme_is_case_insensitive() -> Result<()> {
    let keys = MockKeySource::with_keys(&[TestKey::Rsa1]).await;
    let server = spawn(&keys, Arc::new(InMemoryIdentityStore::new()), &[]).await?;
    let token = TestTokenBuilder::new().sign();

    let response = reqwest::Client::new()
        .post(format!("{}{AVATAR_PRESIGN}", server.url()))
        .header("Authorization", format!("bearer   {token}"))
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    Ok(())
}

#[tokio::test]
async fn test_expiry_respects_leeway() -> Result<()> {
    let keys = MockKeySource::with_keys(&[TestKey::Rsa1]).await;
    let server = spawn(&keys, Arc::new(InMemoryIdentityStore::new()), &[]).await?;

    let within = TestTokenBuilder::new().expires_in(-30).sign();
    assert_eq!(presign_avatar(&server, Some(&within)).await.status(), 200);

    let beyond = TestTokenBuilder::new().expires_in(-120).sign();
    let response = presign_avatar(&server, Some(&beyond)).await;
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await?;
    assert_eq!(body["error"], "token_expired");
    Ok(())
}

#[tokio::test]
async fn test_claim_mismatches_are_invalid_token() -> Result<()> {
    let keys = MockKeySource::with_keys(&[TestKey::Rsa1]).await;
    let identities = Arc::new(InMemoryIdentityStore::new());
    let server = spawn(&keys, identities.clone(), &[]).await?;

    let tokens = [
        TestTokenBuilder::new().with_audience("other-project").sign(),
        TestTokenBuilder::new()
            .with_issuer("https://securetoken.google.com/other-project")
            .sign(),
        TestTokenBuilder::new().for_user("").sign(),
        TestTokenBuilder::new()
            .not_before(chrono::Utc::now().timestamp() + 600)
            .sign(),
        "not-a-jwt".to_string(),
    ];

    for token in tokens {
        let response = presign_avatar(&server, Some(&token)).await;
        assert_eq!(response.status(), 401);
        let body: Value = response.json().await?;
        assert_eq!(body["error"], "invalid_token");
    }
    assert!(identities.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn test_ed25519_keys_verify() -> Result<()> {
    let keys = MockKeySource::with_keys(&[TestKey::Rsa1, TestKey::Ed25519 { seed: 9 }]).await;
    let server = spawn(&keys, Arc::new(InMemoryIdentityStore::new()), &[]).await?;

    let token = TestTokenBuilder::new()
        .signed_with(TestKey::Ed25519 { seed: 9 })
        .sign();

    assert_eq!(presign_avatar(&server, Some(&token)).await.status(), 200);
    Ok(())
}

#[tokio::test]
async fn test_unknown_kid_triggers_one_refresh_then_rejects() -> Result<()> {
    let keys = MockKeySource::with_keys(&[TestKey::Rsa1]).await;
    let server = spawn(&keys, Arc::new(InMemoryIdentityStore::new()), &[]).await?;

    let token = TestTokenBuilder::new().with_kid("retired-key").sign();
    let response = presign_avatar(&server, Some(&token)).await;

    assert_eq!(response.status(), 401);
    let body: Value = response.json().await?;
    assert_eq!(body["error"], "invalid_token");
    // Initial load plus exactly one forced refresh.
    assert_eq!(keys.request_count().await, 2);
    Ok(())
}

#[tokio::test]
async fn test_rotated_key_is_picked_up_by_refresh() -> Result<()> {
    let keys = MockKeySource::with_keys(&[TestKey::Rsa1]).await;
    let server = spawn(&keys, Arc::new(InMemoryIdentityStore::new()), &[]).await?;

    let old = TestTokenBuilder::new().sign();
    assert_eq!(presign_avatar(&server, Some(&old)).await.status(), 200);

    keys.reset().await;
    keys.publish_expecting(&[TestKey::Rsa1, TestKey::Rsa2], 1).await;

    let rotated = TestTokenBuilder::new().signed_with(TestKey::Rsa2).sign();
    assert_eq!(presign_avatar(&server, Some(&rotated)).await.status(), 200);

    // The refreshed set now serves both keys without another fetch.
    assert_eq!(presign_avatar(&server, Some(&old)).await.status(), 200);
    Ok(())
}

#[tokio::test]
async fn test_key_source_down_without_cache_is_500() -> Result<()> {
    let keys = MockKeySource::start().await;
    keys.fail_with(503).await;
    let server = spawn(&keys, Arc::new(InMemoryIdentityStore::new()), &[]).await?;

    let response = presign_avatar(&server, Some(&TestTokenBuilder::new().sign())).await;

    assert_eq!(response.status(), 500);
    let body: Value = response.json().await?;
    assert_eq!(body["error"], "server_error");
    Ok(())
}

#[tokio::test]
async fn test_disabled_account_is_403() -> Result<()> {
    let keys = MockKeySource::with_keys(&[TestKey::Rsa1]).await;
    let identities = Arc::new(InMemoryIdentityStore::new());
    identities
        .seed(NewPrincipal {
            external_id: "uid-banned".to_string(),
            custom_id: "U00000000BB".to_string(),
            email: None,
            role: Role::User,
        })
        .await;
    identities.deactivate("uid-banned").await;
    let server = spawn(&keys, identities.clone(), &[]).await?;

    let token = TestTokenBuilder::new().for_user("uid-banned").sign();
    let response = presign_avatar(&server, Some(&token)).await;

    assert_eq!(response.status(), 403);
    let body: Value = response.json().await?;
    assert_eq!(body["error"], "account_disabled");
    assert_eq!(identities.len().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_admin_allow_list_sets_role_at_creation() -> Result<()> {
    let keys = MockKeySource::with_keys(&[TestKey::Rsa1]).await;
    let identities = Arc::new(InMemoryIdentityStore::new());
    let server = spawn(
        &keys,
        identities.clone(),
        &[("ADMIN_EMAILS", "Dean@Example.edu, registrar@example.edu")],
    )
    .await?;

    let admin = TestTokenBuilder::new()
        .for_user("uid-dean")
        .with_email("dean@example.EDU")
        .sign();
    let user = TestTokenBuilder::new()
        .for_user("uid-student")
        .with_email("student@example.edu")
        .sign();
    assert_eq!(presign_avatar(&server, Some(&admin)).await.status(), 200);
    assert_eq!(presign_avatar(&server, Some(&user)).await.status(), 200);

    let principals = identities.principals().await;
    let role_of = |uid: &str| {
        principals
            .iter()
            .find(|p| p.external_id == uid)
            .map(|p| p.role)
    };
    assert_eq!(role_of("uid-dean"), Some(Role::Admin));
    assert_eq!(role_of("uid-student"), Some(Role::User));
    Ok(())
}

#[tokio::test]
async fn test_upload_presign_reports_per_file_outcomes() -> Result<()> {
    let keys = MockKeySource::with_keys(&[TestKey::Rsa1]).await;
    let server = spawn(&keys, Arc::new(InMemoryIdentityStore::new()), &[]).await?;

    let response = reqwest::Client::new()
        .post(format!("{}/upload/presign", server.url()))
        .bearer_auth(TestTokenBuilder::new().sign())
        .json(&json!({
            "type": "found",
            "files": [
                { "name": "front.jpg", "type": "image/jpeg" },
                { "name": "receipt.pdf", "type": "application/pdf" }
            ]
        }))
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 2);
    assert!(files[0]["file_key"]
        .as_str()
        .unwrap()
        .starts_with("found-item-photos/"));
    assert_eq!(files[1]["error"], "invalid_file_type");

    let presigned = server.objects().presigned().await;
    assert_eq!(presigned.len(), 1);
    assert_eq!(presigned[0].1, "image/jpeg");
    Ok(())
}
