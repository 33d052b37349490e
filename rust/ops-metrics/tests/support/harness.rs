use anyhow::Context;
use axum::{
    body::{self, Body},
    http::{self, Request, StatusCode},
    Router,
};
use ops_metrics::{config::AppConfig, server::Server};
use serde::Serialize;
use serde_json::Value;
use std::{env, future::Future, sync::Once};
use tower::ServiceExt;

#[allow(dead_code)]
pub const API_KEY: &str = "test-api-key";

/// Address that refuses connections, for exercising failure paths.
pub const UNREACHABLE_URL: &str = "http://127.0.0.1:1";

const DEFAULT_TEST_DATABASE: &str = "ops_metrics_test";

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

/// Router wired to a backend that is never reachable.
#[allow(dead_code)]
pub async fn offline_router(api_key: Option<&str>) -> Router {
    init_tracing();
    let mut config = AppConfig::embedded(UNREACHABLE_URL.to_string(), "analytics".to_string());
    config.api_key = api_key.map(str::to_string);
    Server::new(config)
        .await
        .expect("server should build without a reachable backend")
        .router()
}

/// Runs a test against a router backed by a freshly seeded ClickHouse database.
#[allow(dead_code)]
pub async fn with_clickhouse_harness<F, Fut>(test: F)
where
    F: FnOnce(TestHarness) -> Fut,
    Fut: Future<Output = ()>,
{
    init_tracing();

    let Ok(url) = env::var("OPS_METRICS_TEST_CLICKHOUSE_URL") else {
        eprintln!(
            "[ops-metrics-test] skipping ClickHouse harness: OPS_METRICS_TEST_CLICKHOUSE_URL is not set"
        );
        return;
    };
    let database = env::var("OPS_METRICS_TEST_CLICKHOUSE_DATABASE")
        .unwrap_or_else(|_| DEFAULT_TEST_DATABASE.to_string());

    seed_fixture_database(&url, &database)
        .await
        .expect("failed to seed ClickHouse fixture");

    let mut config = AppConfig::embedded(url, database);
    config.api_key = Some(API_KEY.to_string());
    if let Ok(user) = env::var("OPS_METRICS_TEST_CLICKHOUSE_USER") {
        config.clickhouse.user = user;
    }
    if let Ok(password) = env::var("OPS_METRICS_TEST_CLICKHOUSE_PASSWORD") {
        config.clickhouse.password = password;
    }

    let server = Server::new(config)
        .await
        .expect("failed to boot server for ClickHouse harness");

    test(TestHarness {
        router: server.router(),
        api_key: API_KEY.to_string(),
    })
    .await;
}

pub struct TestHarness {
    router: Router,
    api_key: String,
}

#[allow(dead_code)]
impl TestHarness {
    pub async fn post<T: Serialize>(&self, path: &str, payload: &T) -> http::Response<Body> {
        let body = serde_json::to_vec(payload).expect("request payload should serialize");
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(http::header::CONTENT_TYPE, "application/json")
            .header("x-api-key", &self.api_key)
            .body(Body::from(body))
            .expect("failed to build harness request");
        self.send(request).await
    }

    pub async fn get(&self, path: &str) -> http::Response<Body> {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .header("x-api-key", &self.api_key)
            .body(Body::empty())
            .expect("failed to build harness request");
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> http::Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should handle harness request")
    }
}

pub async fn read_json(response: http::Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("response body should be readable");
    let value =
        serde_json::from_slice::<Value>(&bytes).expect("response body should be valid JSON");
    (status, value)
}

async fn seed_fixture_database(url: &str, database: &str) -> anyhow::Result<()> {
    let mut admin = clickhouse::Client::default().with_url(url);
    if let Ok(user) = env::var("OPS_METRICS_TEST_CLICKHOUSE_USER") {
        admin = admin.with_user(user);
    }
    if let Ok(password) = env::var("OPS_METRICS_TEST_CLICKHOUSE_PASSWORD") {
        admin = admin.with_password(password);
    }

    admin
        .query(&format!("DROP DATABASE IF EXISTS {database}"))
        .execute()
        .await
        .context("failed to drop fixture database")?;
    admin
        .query(&format!("CREATE DATABASE {database}"))
        .execute()
        .await
        .context("failed to create fixture database")?;

    let client = admin.with_database(database);
    for statement in FIXTURE_STATEMENTS {
        client
            .query(statement)
            .execute()
            .await
            .with_context(|| format!("fixture statement failed: {statement}"))?;
    }
    Ok(())
}

const FIXTURE_STATEMENTS: &[&str] = &[
    "CREATE TABLE ride_funnel_hourly (
        date DateTime,
        city String,
        state String,
        merchant_id String,
        flow_type String,
        trip_tag String,
        user_os_type String,
        user_sdk_version String,
        user_bundle_version String,
        user_app_version String,
        dynamic_pricing_logic_version String,
        pooling_logic_version String,
        service_tier String,
        searches UInt64,
        search_tries UInt64,
        quotes UInt64,
        bookings UInt64,
        completed_rides UInt64,
        user_cancelled UInt64,
        driver_cancelled UInt64,
        earnings Float64
    ) ENGINE = MergeTree ORDER BY date",
    "INSERT INTO ride_funnel_hourly VALUES
        ('2024-01-01 10:00:00', 'Bangalore', 'Karnataka', 'm-1', 'ONE_WAY', 'airport', 'ANDROID', '1.0', '1.0', '2.1', 'v1', 'v1', 'All', 100, 120, 0, 0, 0, 0, 0, 0),
        ('2024-01-01 10:00:00', 'Bangalore', 'Karnataka', 'm-1', 'ONE_WAY', 'airport', 'ANDROID', '1.0', '1.0', '2.1', 'v1', 'v1', 'Auto', 60, 70, 50, 40, 30, 5, 5, 3000),
        ('2024-01-01 11:00:00', 'Bangalore', 'Karnataka', 'm-1', 'ONE_WAY', 'city', 'IOS', '1.0', '1.0', '2.1', 'v1', 'v1', 'Sedan', 40, 50, 30, 20, 10, 5, 5, 2500),
        ('2024-01-02 09:00:00', 'Chennai', 'Tamil Nadu', 'm-2', 'RENTAL', 'city', 'ANDROID', '1.0', '1.0', '2.2', 'v2', 'v1', 'All', 50, 55, 0, 0, 0, 0, 0, 0),
        ('2024-01-02 09:00:00', 'Chennai', 'Tamil Nadu', 'm-2', 'RENTAL', 'city', 'ANDROID', '1.0', '1.0', '2.2', 'v2', 'v1', 'Bike Taxi', 50, 55, 40, 30, 25, 3, 2, 1000)",
    "CREATE TABLE master_conversion_hourly (
        date DateTime,
        city String,
        state String,
        merchant_id String,
        flow_type String,
        trip_tag String,
        user_os_type String,
        user_sdk_version String,
        user_bundle_version String,
        user_app_version String,
        dynamic_pricing_logic_version String,
        pooling_logic_version String,
        service_tier String,
        searches UInt64,
        quotes UInt64,
        quote_acceptances UInt64,
        bookings UInt64,
        driver_assigned UInt64,
        rides_started UInt64,
        completed_rides UInt64
    ) ENGINE = MergeTree ORDER BY date",
    "INSERT INTO master_conversion_hourly VALUES
        ('2024-01-01 10:00:00', 'Bangalore', 'Karnataka', 'm-1', 'ONE_WAY', 'airport', 'ANDROID', '1.0', '1.0', '2.1', 'v1', 'v1', 'Auto', 100, 80, 60, 50, 45, 42, 40),
        ('2024-01-02 09:00:00', 'Chennai', 'Tamil Nadu', 'm-2', 'RENTAL', 'city', 'ANDROID', '1.0', '1.0', '2.2', 'v2', 'v1', 'Bike Taxi', 50, 40, 30, 25, 20, 18, 15)",
    "CREATE TABLE ride_cancellations_hourly (
        date Date,
        local_time DateTime,
        city String,
        state String,
        merchant_id String,
        flow_type String,
        trip_tag String,
        user_os_type String,
        user_sdk_version String,
        user_bundle_version String,
        user_app_version String,
        dynamic_pricing_logic_version String,
        pooling_logic_version String,
        service_tier String,
        total_bookings UInt64,
        user_cancelled UInt64,
        driver_cancelled UInt64,
        bookings_cancelled UInt64,
        reason_code Nullable(String),
        pickup_dist_left_bucket Nullable(String),
        time_to_cancel_bkt Nullable(String)
    ) ENGINE = MergeTree ORDER BY local_time",
    r#"INSERT INTO ride_cancellations_hourly VALUES
        ('2024-01-01', '2024-01-01 10:15:00', 'Kolkata', 'West Bengal', 'm-3', 'ONE_WAY', 'city', 'ANDROID', '1.0', '1.0', '2.1', 'v1', 'v1', 'Sedan', 10, 2, 1, 3, '{"DRIVER_FAR": 2, "CHANGED_MIND": 1}', '{"0-1km": 3}', '{"0-2min": 3}'),
        ('2024-01-01', '2024-01-01 10:45:00', 'Kolkata', 'West Bengal', 'm-3', 'ONE_WAY', 'city', 'IOS', '1.0', '1.0', '2.1', 'v1', 'v1', 'Auto', 5, 1, 1, 2, '{"DRIVER_FAR": 2}', NULL, '{"2-5min": 2}'),
        ('2024-01-01', '2024-01-01 11:05:00', 'Kolkata', 'West Bengal', 'm-3', 'ONE_WAY', 'city', 'ANDROID', '1.0', '1.0', '2.1', 'v1', 'v1', 'Auto', 4, 1, 0, 1, '{"CHANGED_MIND": 1}', '{"1-3km": 1}', NULL)"#,
    "CREATE TABLE city_registry (
        city_id String,
        city_name String
    ) ENGINE = MergeTree ORDER BY city_id",
    "INSERT INTO city_registry VALUES ('std:080', 'Bangalore'), ('std:044', 'Chennai')",
];
