use std::net::SocketAddr;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{Value, json};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use surveydata::config::{Config, RegistrationMode};
use surveydata::state::SharedState;

/// A running test server instance with a dedicated test database.
pub struct TestApp {
    pub addr: SocketAddr,
    pub pool: PgPool,
    pub state: SharedState,
    pub client: Client,
    pub db_name: String,
}

/// Credentials of a registered test user.
pub struct TestUser {
    pub username: String,
    pub api_token: String,
    pub access_token: String,
}

impl TestUser {
    /// DRF-style header value.
    pub fn token_header(&self) -> String {
        format!("Token {}", self.api_token)
    }
}

/// Questions of the transportation survey used throughout the tests.
pub fn transportation_fields() -> Value {
    json!([
        {"name": "transport/available_transportation_types_to_referral_facility", "type": "select_multiple"},
        {"name": "transport/loop_over_transport_types_frequency/ambulance/frequency_to_referral_facility", "type": "select_one"},
        {"name": "location", "type": "geopoint"},
    ])
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn register(&self, username: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url("/api/v1/auth/register"))
            .json(&json!({
                "username": username,
                "email": format!("{username}@example.com"),
                "password": "password123",
            }))
            .send()
            .await
            .expect("register request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    /// Register the first user ("bob" in most tests).
    pub async fn bootstrap(&self, username: &str) -> TestUser {
        let (body, status) = self.register(username).await;
        assert_eq!(status, StatusCode::OK, "register failed: {body}");
        TestUser {
            username: username.to_string(),
            api_token: body["api_token"].as_str().unwrap().to_string(),
            access_token: body["access_token"].as_str().unwrap().to_string(),
        }
    }

    /// Publish a form, return its JSON.
    pub async fn publish(&self, user: &TestUser, id_string: &str, fields: Value) -> Value {
        let (body, status) = self
            .post_auth(
                "/api/v1/forms",
                user,
                &json!({ "id_string": id_string, "title": id_string, "fields": fields }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "publish failed: {body}");
        body
    }

    /// Publish the transportation form and post four submissions to it.
    pub async fn transportation_with_submissions(&self, user: &TestUser) -> i64 {
        let form = self
            .publish(user, "transportation_2011_07_25", transportation_fields())
            .await;
        let formid = form["formid"].as_i64().unwrap();

        let answers = [
            json!({"transport": {"available_transportation_types_to_referral_facility": "none"}}),
            json!({"transport": {"available_transportation_types_to_referral_facility": "ambulance"},
                   "location": "-1.2625 36.7924 0 0"}),
            json!({"transport": {"available_transportation_types_to_referral_facility": "ambulance bicycle"}}),
            json!({"transport": {"available_transportation_types_to_referral_facility": "taxi other"}}),
        ];
        for answer in &answers {
            let (body, status) = self.submit_json(&user.username, formid, answer).await;
            assert_eq!(status, StatusCode::CREATED, "submit failed: {body}");
        }
        formid
    }

    /// Anonymous JSON submission.
    pub async fn submit_json(&self, owner: &str, formid: i64, data: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url(&format!("/api/v1/submissions/{owner}/{formid}")))
            .json(data)
            .send()
            .await
            .expect("submit json failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    async fn send(&self, req: RequestBuilder) -> (Value, StatusCode) {
        let resp = req.send().await.expect("request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    /// Anonymous GET.
    pub async fn get_anon(&self, path: &str) -> (Value, StatusCode) {
        self.send(self.client.get(self.url(path))).await
    }

    /// GET authenticated with the user's API token.
    pub async fn get_auth(&self, path: &str, user: &TestUser) -> (Value, StatusCode) {
        self.send(
            self.client
                .get(self.url(path))
                .header("authorization", user.token_header()),
        )
        .await
    }

    pub async fn post_auth(&self, path: &str, user: &TestUser, body: &Value) -> (Value, StatusCode) {
        self.send(
            self.client
                .post(self.url(path))
                .header("authorization", user.token_header())
                .json(body),
        )
        .await
    }

    /// POST an urlencoded body, the way HTML forms send `tags=hello`.
    pub async fn post_form_auth(
        &self,
        path: &str,
        user: &TestUser,
        data: &[(&str, &str)],
    ) -> (Value, StatusCode) {
        self.send(
            self.client
                .post(self.url(path))
                .header("authorization", user.token_header())
                .form(data),
        )
        .await
    }

    pub async fn patch_auth(&self, path: &str, user: &TestUser, body: &Value) -> (Value, StatusCode) {
        self.send(
            self.client
                .patch(self.url(path))
                .header("authorization", user.token_header())
                .json(body),
        )
        .await
    }

    pub async fn delete_auth(&self, path: &str, user: &TestUser) -> (Value, StatusCode) {
        self.send(
            self.client
                .delete(self.url(path))
                .header("authorization", user.token_header()),
        )
        .await
    }

    /// Tags of every live submission of a form, straight from the database.
    pub async fn submission_tags(&self, formid: i64) -> Vec<Vec<String>> {
        sqlx::query_scalar::<_, Vec<String>>(
            "SELECT tags FROM instances WHERE xform_id = $1 ORDER BY id",
        )
        .bind(formid)
        .fetch_all(&self.pool)
        .await
        .expect("tag lookup failed")
    }
}

fn admin_url(base_url: &str) -> String {
    base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/postgres"))
        .unwrap_or_else(|| base_url.to_string())
}

/// Spawn a test app with a fresh temporary database.
pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

/// Like [`spawn_app`], with the test config adjusted by `configure`.
pub async fn spawn_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let _ = dotenvy::dotenv();

    let base_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let db_name = format!("surveydata_test_{}", Uuid::now_v7().simple());

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&admin_url(&base_url))
        .await
        .expect("Failed to connect to postgres for test DB creation");

    sqlx::query(&format!("CREATE DATABASE \"{db_name}\""))
        .execute(&admin_pool)
        .await
        .expect("Failed to create test database");

    admin_pool.close().await;

    let test_url = base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/{db_name}"))
        .unwrap_or_else(|| base_url.clone());

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&test_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations on test database");

    let mut config = Config {
        database_url: test_url,
        jwt_secret: "test-jwt-secret-that-is-long-enough".to_string(),
        host: "127.0.0.1".parse().unwrap(),
        port: 0, // unused, we bind to random port
        base_url: "http://testserver".to_string(),
        registration: RegistrationMode::Open,
        max_body_size: 1_048_576,
        trusted_proxies: vec![],
        submission_rate_limit: 1000,
        submission_rate_window_secs: 60,
        log_level: "warn".to_string(),
    };

    configure(&mut config);

    let (app, state) = surveydata::build_app(pool.clone(), config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("Server failed");
    });

    let client = Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    TestApp {
        addr,
        pool,
        state,
        client,
        db_name,
    }
}

/// Drop the test database after tests complete.
pub async fn cleanup(app: TestApp) {
    let db_name = app.db_name.clone();
    app.pool.close().await;

    let base_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&admin_url(&base_url))
        .await
        .expect("Failed to connect for cleanup");

    let _ = sqlx::query(&format!("DROP DATABASE IF EXISTS \"{db_name}\" WITH (FORCE)"))
        .execute(&admin_pool)
        .await;

    admin_pool.close().await;
}
