//! End-to-end report and profile flows against Postgres.
//!
//! Each test gets a fresh database from `#[sqlx::test]` with the service
//! migrations applied.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use anyhow::Result;
use report_service::models::{NewReport, ReportKind};
use report_service::repositories::{ReportsRepository, StoreError};
use report_test_utils::{MockKeySource, TestKey, TestReportServer, TestTokenBuilder};
use reqwest::{Client, Method, Response};
use serde_json::{json, Value};
use sqlx::PgPool;

struct Harness {
    server: TestReportServer,
    client: Client,
    _keys: MockKeySource,
}

impl Harness {
    async fn start(pool: PgPool, overrides: &[(&str, &str)]) -> Result<Self> {
        let keys = MockKeySource::with_keys(&[TestKey::Rsa1]).await;
        let server =
            TestReportServer::spawn_with(pool, &keys.url(), overrides, None).await?;
        Ok(Self {
            server,
            client: Client::new(),
            _keys: keys,
        })
    }

    async fn call(&self, method: Method, path: &str, uid: &str, body: Option<Value>) -> Response {
        let token = TestTokenBuilder::new()
            .for_user(uid)
            .with_email(&format!("{uid}@example.edu"))
            .sign();
        let mut request = self
            .client
            .request(method, format!("{}{path}", self.server.url()))
            .bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        request.send().await.expect("request completes")
    }

    async fn json(&self, method: Method, path: &str, uid: &str, body: Option<Value>) -> (u16, Value) {
        let response = self.call(method, path, uid, body).await;
        let status = response.status().as_u16();
        let text = response.text().await.unwrap();
        let value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap()
        };
        (status, value)
    }

    /// Sign in `uid` and return its public id.
    async fn custom_id(&self, uid: &str) -> String {
        let (status, body) = self.json(Method::POST, "/auth/signin", uid, None).await;
        assert_eq!(status, 200, "{body}");
        body["user"]["custom_id"].as_str().unwrap().to_string()
    }

    async fn create_lost(&self, uid: &str, body: Value) -> Value {
        let (status, body) = self
            .json(Method::POST, "/report-lost-item", uid, Some(body))
            .await;
        assert_eq!(status, 201, "{body}");
        body["lost"].clone()
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_health_with_database(pool: PgPool) -> Result<()> {
    let harness = Harness::start(pool, &[]).await?;

    let body: Value = reqwest::get(format!("{}/health", harness.server.url()))
        .await?
        .json()
        .await?;

    assert_eq!(body["ok"], true);
    assert_eq!(body["service"], "traceq-backend");
    assert_eq!(body["db"]["connected"], true);
    assert_eq!(body["db"]["ping"], true);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_signup_then_me(pool: PgPool) -> Result<()> {
    let harness = Harness::start(pool, &[]).await?;

    let (status, body) = harness
        .json(
            Method::POST,
            "/auth/signup",
            "uid-ada",
            Some(json!({
                "fullName": " Ada Lovelace ",
                "phone": "555-0100",
                "department": "Mathematics",
                "email": "spoofed@example.com"
            })),
        )
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["ok"], true);
    assert_eq!(body["user"]["full_name"], "Ada Lovelace");
    assert_eq!(body["user"]["email"], "uid-ada@example.edu");
    assert_eq!(body["user"]["role"], "user");

    let (status, me) = harness.json(Method::GET, "/me", "uid-ada", None).await;
    assert_eq!(status, 200);
    assert_eq!(me["user"]["custom_id"], body["user"]["custom_id"]);
    assert_eq!(me["user"]["department"], "Mathematics");
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_update_profile_photo_must_be_own_avatar(pool: PgPool) -> Result<()> {
    let harness = Harness::start(pool, &[]).await?;
    let custom_id = harness.custom_id("uid-grace").await;

    let (status, presign) = harness
        .json(
            Method::POST,
            "/user/profile/presign",
            "uid-grace",
            Some(json!({ "content_type": "image/webp" })),
        )
        .await;
    assert_eq!(status, 200);
    let key = presign["key"].as_str().unwrap().to_string();

    let (status, body) = harness
        .json(
            Method::POST,
            "/user/update-profile",
            "uid-grace",
            Some(json!({ "full_name": "Grace Hopper", "photo_key": key })),
        )
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["user"]["photo"], key);
    assert_eq!(body["user"]["photo_url"], format!("https://cdn.test/{key}"));

    let (status, body) = harness
        .json(
            Method::POST,
            "/user/update-profile",
            "uid-grace",
            Some(json!({ "photo_key": "user/U0000000000/avatar_x.png" })),
        )
        .await;
    assert_eq!(status, 403);
    assert_eq!(body["error"], "photo_key_not_owned");
    assert!(key.starts_with(&format!("user/{custom_id}/")));
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_create_list_and_get_report(pool: PgPool) -> Result<()> {
    let harness = Harness::start(pool, &[]).await?;
    let owner = harness.custom_id("uid-owner").await;

    let created = harness
        .create_lost(
            "uid-owner",
            json!({
                "item_type": "wallet",
                "title": "Brown leather wallet",
                "location": "Main Library",
                "lost_date": "2025-09-14",
                "lost_time": "09:30",
                "photos": ["lost-item-photos/a1.jpg", "lost-item-photos/b2.png"]
            }),
        )
        .await;
    let custom_id = created["custom_id"].as_str().unwrap().to_string();
    assert!(custom_id.starts_with('L'));
    assert_eq!(created["photos_added"], 2);

    let (status, list) = harness
        .json(Method::GET, "/lost-items?item_type=wallet", "uid-other", None)
        .await;
    assert_eq!(status, 200);
    assert_eq!(list["count"], 1);
    let item = &list["items"][0];
    assert_eq!(item["custom_id"], custom_id.as_str());
    assert_eq!(item["date"], "2025-09-14");
    assert_eq!(item["time"], "09:30:00");
    assert_eq!(item["reporter"]["custom_id"], owner.as_str());
    assert_eq!(item["photos"].as_array().unwrap().len(), 2);
    assert!(item["photos"][0]["url"]
        .as_str()
        .unwrap()
        .starts_with("https://cdn.test/lost-item-photos/"));

    let (_, empty) = harness
        .json(Method::GET, "/lost-items?q=umbrella", "uid-other", None)
        .await;
    assert_eq!(empty["count"], 0);

    let (_, found) = harness.json(Method::GET, "/found-items", "uid-other", None).await;
    assert_eq!(found["count"], 0);

    let (status, by_custom_id) = harness
        .json(Method::GET, &format!("/lost-items/{custom_id}"), "uid-other", None)
        .await;
    assert_eq!(status, 200);
    let id = by_custom_id["item"]["id"].as_i64().unwrap();

    let (status, by_id) = harness
        .json(Method::GET, &format!("/lost-items/{id}"), "uid-other", None)
        .await;
    assert_eq!(status, 200);
    assert_eq!(by_id["item"]["custom_id"], custom_id.as_str());

    // A lost report is not visible as a found report.
    let (status, body) = harness
        .json(Method::GET, &format!("/found-items/{custom_id}"), "uid-other", None)
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "not_found");
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_create_report_validation(pool: PgPool) -> Result<()> {
    let harness = Harness::start(pool, &[]).await?;

    let cases = [
        json!({ "title": "No type" }),
        json!({ "item_type": "phone", "title": "x", "lost_date": "14/09/2025" }),
        json!({ "item_type": "phone", "title": "x", "photos": ["found-item-photos/a.jpg"] }),
        json!({ "item_type": "phone", "title": "x", "photos": ["lost-item-photos/../secret"] }),
    ];
    for body in cases {
        let (status, response) = harness
            .json(Method::POST, "/report-lost-item", "uid-v", Some(body))
            .await;
        assert_eq!(status, 422, "{response}");
        assert_eq!(response["ok"], false);
    }
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_verification_secret_is_hashed(pool: PgPool) -> Result<()> {
    let harness = Harness::start(pool.clone(), &[]).await?;

    let created = harness
        .create_lost(
            "uid-secret",
            json!({
                "item_type": "phone",
                "title": "Black phone",
                "secret_hint": "lock screen picture",
                "verification_secret": "a red kite"
            }),
        )
        .await;

    let (hash,): (Option<String>,) =
        sqlx::query_as("SELECT secret_hash FROM reports WHERE custom_id = $1")
            .bind(created["custom_id"].as_str().unwrap())
            .fetch_one(&pool)
            .await?;
    let hash = hash.unwrap();
    assert!(hash.starts_with("$2"));
    assert!(bcrypt::verify("a red kite", &hash)?);

    let (_, item) = harness
        .json(
            Method::GET,
            &format!("/lost-items/{}", created["custom_id"].as_str().unwrap()),
            "uid-secret",
            None,
        )
        .await;
    assert!(!item.to_string().contains("$2"));
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_delete_report_requires_owner_or_admin(pool: PgPool) -> Result<()> {
    let harness = Harness::start(pool, &[("ADMIN_EMAILS", "uid-admin@example.edu")]).await?;

    let first = harness
        .create_lost(
            "uid-owner",
            json!({ "item_type": "keys", "title": "Keys", "photos": ["lost-item-photos/k.jpg"] }),
        )
        .await;
    let second = harness
        .create_lost("uid-owner", json!({ "item_type": "bag", "title": "Bag" }))
        .await;
    let first_path = format!("/lost-items/{}", first["custom_id"].as_str().unwrap());
    let second_path = format!("/lost-items/{}", second["custom_id"].as_str().unwrap());

    let (status, body) = harness.json(Method::DELETE, &first_path, "uid-stranger", None).await;
    assert_eq!(status, 403);
    assert_eq!(body["error"], "forbidden");

    let response = harness.call(Method::DELETE, &first_path, "uid-owner", None).await;
    assert_eq!(response.status(), 204);
    assert_eq!(
        harness.server.objects().deleted().await,
        vec!["lost-item-photos/k.jpg".to_string()]
    );

    let (status, _) = harness.json(Method::GET, &first_path, "uid-owner", None).await;
    assert_eq!(status, 404);

    let response = harness.call(Method::DELETE, &second_path, "uid-admin", None).await;
    assert_eq!(response.status(), 204);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_reports_by_user(pool: PgPool) -> Result<()> {
    let harness = Harness::start(pool, &[]).await?;
    let owner = harness.custom_id("uid-owner").await;
    harness
        .create_lost("uid-owner", json!({ "item_type": "bottle", "title": "Steel bottle" }))
        .await;

    let (status, body) = harness
        .json(Method::GET, &format!("/users/{owner}/lost-items"), "uid-viewer", None)
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    let (_, body) = harness
        .json(Method::GET, &format!("/users/{owner}/found-items"), "uid-viewer", None)
        .await;
    assert_eq!(body["items"], json!([]));

    let (status, body) = harness
        .json(Method::GET, "/users/UFFFFFFFFFF/lost-items", "uid-viewer", None)
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["items"], json!([]));
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_upload_confirm_and_delete(pool: PgPool) -> Result<()> {
    let harness = Harness::start(pool, &[]).await?;
    let created = harness
        .create_lost("uid-owner", json!({ "item_type": "laptop", "title": "Grey laptop" }))
        .await;
    let custom_id = created["custom_id"].as_str().unwrap();

    let confirm = json!({
        "report_type": "lost",
        "report_custom_id": custom_id,
        "files": [{ "file_key": "lost-item-photos/lid.jpg", "original_name": "lid.jpg" }]
    });

    let (status, body) = harness
        .json(Method::POST, "/upload/confirm", "uid-stranger", Some(confirm.clone()))
        .await;
    assert_eq!(status, 403);
    assert_eq!(body["error"], "access_denied");

    let (status, body) = harness
        .json(Method::POST, "/upload/confirm", "uid-owner", Some(confirm))
        .await;
    assert_eq!(status, 200, "{body}");
    let saved = &body["saved_files"][0];
    assert_eq!(saved["file_key"], "lost-item-photos/lid.jpg");
    assert_eq!(saved["original_name"], "lid.jpg");
    let photo_id = saved["id"].as_i64().unwrap();

    let delete = json!({ "report_type": "lost", "photo_id": photo_id });
    let (status, _) = harness
        .json(Method::DELETE, "/upload/delete", "uid-stranger", Some(delete.clone()))
        .await;
    assert_eq!(status, 403);

    let (status, body) = harness
        .json(Method::DELETE, "/upload/delete", "uid-owner", Some(delete))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "deleted");
    assert_eq!(
        harness.server.objects().deleted().await,
        vec!["lost-item-photos/lid.jpg".to_string()]
    );

    let (_, item) = harness
        .json(Method::GET, &format!("/lost-items/{custom_id}"), "uid-owner", None)
        .await;
    assert_eq!(item["item"]["photos"], json!([]));
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_upload_confirm_caps_photos_per_report(pool: PgPool) -> Result<()> {
    let harness = Harness::start(pool, &[]).await?;
    let created = harness
        .create_lost("uid-owner", json!({ "item_type": "bag", "title": "Red backpack" }))
        .await;
    let custom_id = created["custom_id"].as_str().unwrap();

    let confirm = |range: std::ops::Range<usize>| {
        let files: Vec<Value> = range
            .map(|i| {
                json!({
                    "file_key": format!("lost-item-photos/bag-{i}.jpg"),
                    "original_name": format!("bag {i}.jpg"),
                })
            })
            .collect();
        json!({ "report_type": "lost", "report_custom_id": custom_id, "files": files })
    };

    let (status, body) = harness
        .json(Method::POST, "/upload/confirm", "uid-owner", Some(confirm(0..6)))
        .await;
    assert_eq!(status, 200, "{body}");
    for saved in body["saved_files"].as_array().unwrap() {
        let key = saved["file_key"].as_str().unwrap();
        let index = key
            .trim_start_matches("lost-item-photos/bag-")
            .trim_end_matches(".jpg");
        assert_eq!(saved["original_name"], format!("bag {index}.jpg"));
    }

    // Six stored; five more would make eleven.
    let (status, body) = harness
        .json(Method::POST, "/upload/confirm", "uid-owner", Some(confirm(6..11)))
        .await;
    assert_eq!(status, 422);
    assert_eq!(body["error"], "too_many_photos");

    let (status, body) = harness
        .json(Method::POST, "/upload/confirm", "uid-owner", Some(confirm(6..10)))
        .await;
    assert_eq!(status, 200, "{body}");

    let (_, item) = harness
        .json(Method::GET, &format!("/lost-items/{custom_id}"), "uid-owner", None)
        .await;
    assert_eq!(item["item"]["photos"].as_array().unwrap().len(), 10);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_duplicate_report_id_is_reported_as_duplicate(pool: PgPool) -> Result<()> {
    let (user_id,): (i64,) = sqlx::query_as(
        "INSERT INTO user_data (firebase_uid, custom_id, role) VALUES ('uid', 'U0000000001', 'user') RETURNING id",
    )
    .fetch_one(&pool)
    .await?;

    let report = NewReport {
        kind: ReportKind::Found,
        user_id,
        custom_id: "F2509000001".to_string(),
        item_type: "umbrella".to_string(),
        item_model: None,
        title: "Blue umbrella".to_string(),
        description: None,
        location: None,
        location_details: None,
        event_date: None,
        event_time: None,
        secret_hint: None,
        secret_hash: None,
    };

    ReportsRepository::create(&pool, &report).await?;
    let err = ReportsRepository::create(&pool, &report).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate));
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_concurrent_first_requests_create_one_row(pool: PgPool) -> Result<()> {
    let harness = Harness::start(pool.clone(), &[]).await?;

    let requests = (0..8).map(|_| harness.call(Method::GET, "/me", "uid-burst", None));
    for response in futures::future::join_all(requests).await {
        assert_eq!(response.status(), 200);
    }

    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM user_data WHERE firebase_uid = 'uid-burst'")
            .fetch_one(&pool)
            .await?;
    assert_eq!(count, 1);
    Ok(())
}
