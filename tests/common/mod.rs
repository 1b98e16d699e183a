//! Common test utilities
//!
//! An in-process fake of the BNC API (and of the pydolarve monitor) bound to
//! an ephemeral port, plus an application router wired to it with in-memory
//! stores. Database tests get their pool from [`setup_test_db`].

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{FixedOffset, TimeZone, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tokio::sync::OnceCell;

use bnc_billing::api::{self, AppState};
use bnc_billing::billing::MemoryBillingStore;
use bnc_billing::bnc::crypto;
use bnc_billing::bnc::{
    BankClient, BankGateway, LogOnIssuer, MemoryWorkingKeyRepository, PydolarveProvider, RateCache,
    SessionKeyStore,
};
use bnc_billing::cache::ManualClock;
use bnc_billing::handlers::PaymentAllocator;
use bnc_billing::BncConfig;

pub const CLIENT_GUID: &str = "4A074C46-DD4E-4E54-8010-B80A6A8758F4";
pub const CLIENT_ID: &str = "J000000001";
pub const MASTER_KEY: &str = "master-key-for-tests";
pub const WORKING_KEY: &str = "working-key-issued-today";
pub const ACCOUNT: &str = "01910001482101010049";

/// What the fake bank answers, adjustable per test
#[derive(Default)]
pub struct FakeBankState {
    pub logons: AtomicUsize,
    pub reject_logon: AtomicBool,
    pub movement_exists: AtomicBool,
    pub movement_amount: Mutex<Option<f64>>,
    pub bcv_rate: Mutex<Option<f64>>,
    /// Raw pydolarve body; `None` answers 503
    pub primary_body: Mutex<Option<String>>,
    /// Decrypted bodies received, by endpoint
    pub received: Mutex<Vec<(String, Value)>>,
}

impl FakeBankState {
    pub fn set_primary_rate(&self, price: f64) {
        let body = json!({
            "monitors": {
                "usd": { "price": price, "last_update": "10/06/2025, 09:00 AM" }
            }
        });
        *self.primary_body.lock().unwrap() = Some(body.to_string());
    }

    pub fn set_primary_body(&self, body: Option<&str>) {
        *self.primary_body.lock().unwrap() = body.map(str::to_string);
    }

    pub fn set_bcv_rate(&self, rate: Option<f64>) {
        *self.bcv_rate.lock().unwrap() = rate;
    }

    pub fn set_movement(&self, exists: bool, amount: Option<f64>) {
        self.movement_exists.store(exists, Ordering::SeqCst);
        *self.movement_amount.lock().unwrap() = amount;
    }

    pub fn logon_count(&self) -> usize {
        self.logons.load(Ordering::SeqCst)
    }

    pub fn received_for(&self, endpoint: &str) -> Vec<Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| e == endpoint)
            .map(|(_, body)| body.clone())
            .collect()
    }
}

/// A running fake bank
pub struct FakeBank {
    pub base_url: String,
    pub primary_url: String,
    pub state: Arc<FakeBankState>,
}

impl FakeBank {
    pub async fn start() -> Self {
        let state = Arc::new(FakeBankState::default());

        let app = Router::new()
            .route("/api/*endpoint", post(bank_endpoint))
            .route("/pydolarve", get(pydolarve))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}/api/", addr),
            primary_url: format!("http://{}/pydolarve", addr),
            state,
        }
    }
}

fn ko(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "status": "KO", "message": message }))).into_response()
}

fn ok_encrypted(status: StatusCode, body: &Value, key: &str) -> Response {
    let value = crypto::encrypt(body, key).unwrap();
    (status, Json(json!({ "status": "OK", "message": "", "value": value }))).into_response()
}

/// Decrypt the envelope `Value` and check its `Validation` hash
fn open_envelope(envelope: &Value, key: &str) -> Option<Value> {
    let ciphertext = envelope["Value"].as_str()?;
    let plaintext = crypto::decrypt_text(ciphertext, key).ok()?;
    let validation = hex::encode(Sha256::digest(plaintext.as_bytes()));
    if envelope["Validation"].as_str()? != validation {
        return None;
    }
    if envelope["ClientGUID"].as_str()? != CLIENT_GUID {
        return None;
    }
    serde_json::from_str(&plaintext).ok()
}

async fn bank_endpoint(
    State(state): State<Arc<FakeBankState>>,
    Path(endpoint): Path<String>,
    Json(envelope): Json<Value>,
) -> Response {
    if endpoint == "Services/BCVRates" {
        if envelope["ClientGUID"].as_str() != Some(CLIENT_GUID) {
            return ko(StatusCode::UNAUTHORIZED, "unknown client");
        }
        return match *state.bcv_rate.lock().unwrap() {
            Some(rate) => Json(json!({
                "status": "OK",
                "message": "",
                "value": { "PriceRateBCV": rate, "dtRate": "2025-06-10" }
            }))
            .into_response(),
            None => ko(StatusCode::INTERNAL_SERVER_ERROR, "rates unavailable"),
        };
    }

    if endpoint == "Auth/LogOn" {
        if state.reject_logon.load(Ordering::SeqCst) {
            return ko(StatusCode::UNAUTHORIZED, "invalid credentials");
        }
        let Some(body) = open_envelope(&envelope, MASTER_KEY) else {
            return ko(StatusCode::BAD_REQUEST, "cannot decrypt");
        };
        if body["ClientGUID"] != CLIENT_GUID {
            return ko(StatusCode::BAD_REQUEST, "guid mismatch");
        }
        state.logons.fetch_add(1, Ordering::SeqCst);
        return ok_encrypted(StatusCode::OK, &json!({ "WorkingKey": WORKING_KEY }), MASTER_KEY);
    }

    let Some(body) = open_envelope(&envelope, WORKING_KEY) else {
        return ko(StatusCode::CONFLICT, "working key expired");
    };
    state
        .received
        .lock()
        .unwrap()
        .push((endpoint.clone(), body.clone()));

    match endpoint.as_str() {
        "Position/History" => ok_encrypted(
            StatusCode::OK,
            &json!([
                { "ReferenceA": "000123", "Amount": 4000.0, "Type": "CR" },
                { "ReferenceA": "000124", "Amount": 150.25, "Type": "DB" }
            ]),
            WORKING_KEY,
        ),
        "Position/Validate" => {
            let exists = state.movement_exists.load(Ordering::SeqCst);
            let amount = *state.movement_amount.lock().unwrap();
            ok_encrypted(
                StatusCode::ACCEPTED,
                &json!({ "MovementExists": exists, "Amount": amount, "Reference": body["Reference"] }),
                WORKING_KEY,
            )
        }
        "Services/Banks" => ok_encrypted(
            StatusCode::OK,
            &json!([
                { "Name": "Banco Nacional de Crédito", "Code": "0191", "Services": "TRF,P2P" },
                { "Name": "Banco de Venezuela", "Code": "0102", "Services": "P2P" }
            ]),
            WORKING_KEY,
        ),
        _ => ko(StatusCode::NOT_FOUND, "unknown endpoint"),
    }
}

async fn pydolarve(State(state): State<Arc<FakeBankState>>) -> Response {
    match state.primary_body.lock().unwrap().clone() {
        Some(body) => (StatusCode::OK, [("content-type", "application/json")], body).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

/// Application wired to a fake bank
pub struct TestApp {
    pub router: Router,
    pub bank: FakeBank,
    pub store: MemoryBillingStore,
    pub keys: Arc<MemoryWorkingKeyRepository>,
    pub clock: Arc<ManualClock>,
    pub rates: Arc<RateCache>,
}

pub async fn spawn_app() -> TestApp {
    let bank = FakeBank::start().await;
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 10, 14, 0, 0).unwrap()));
    let offset = FixedOffset::west_opt(4 * 3600).unwrap();

    let config = BncConfig::new(&bank.base_url, CLIENT_GUID, CLIENT_ID, MASTER_KEY)
        .with_account_number(ACCOUNT);
    let client = BankClient::new(config, clock.clone(), offset);
    let keys = Arc::new(MemoryWorkingKeyRepository::new());
    let key_store = Arc::new(SessionKeyStore::new(
        keys.clone(),
        Arc::new(LogOnIssuer::new(client.clone())),
        clock.clone(),
        offset,
    ));
    let gateway = Arc::new(BankGateway::new(client, key_store));
    let rates = Arc::new(RateCache::new(
        Arc::new(PydolarveProvider::new(&bank.primary_url)),
        gateway.clone(),
        clock.clone(),
        std::time::Duration::from_secs(600),
    ));

    let store = MemoryBillingStore::new();
    let allocator = PaymentAllocator::new(Arc::new(store.clone()));

    let router = api::create_router().with_state(AppState::new(rates.clone(), gateway, allocator));

    TestApp {
        router,
        bank,
        store,
        keys,
        clock,
        rates,
    }
}

/// Read a response body as JSON
pub async fn json_body(response: Response) -> Value {
    use http_body_util::BodyExt;
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// =========================================================================
// PostgreSQL
// =========================================================================

static SCHEMA: OnceCell<()> = OnceCell::const_new();

/// Connect to `DATABASE_URL` and apply the schema once per test binary.
///
/// Returns `None` when no database is configured. Tests share the database,
/// so each one works on users and key names of its own.
pub async fn setup_test_db() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping database test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(12)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    SCHEMA
        .get_or_init(|| async {
            pool.execute(include_str!("../../migrations/0001_init.sql"))
                .await
                .expect("Failed to apply schema");
        })
        .await;

    Some(pool)
}

/// Insert a user with the given credit and return its id
pub async fn seed_user(pool: &PgPool, credit_balance: rust_decimal::Decimal) -> i64 {
    sqlx::query_scalar(
        r#"
        INSERT INTO users (name, email, credit_balance)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind("Test User")
    .bind(format!("{}@billing.test", uuid::Uuid::new_v4()))
    .bind(credit_balance)
    .fetch_one(pool)
    .await
    .expect("Failed to seed user")
}

/// Insert a pending invoice for `period` and return its id
pub async fn seed_invoice(
    pool: &PgPool,
    user_id: i64,
    period: chrono::NaiveDate,
    amount_due: rust_decimal::Decimal,
) -> i64 {
    sqlx::query_scalar(
        r#"
        INSERT INTO invoices (user_id, period, amount_due)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(period)
    .bind(amount_due)
    .fetch_one(pool)
    .await
    .expect("Failed to seed invoice")
}
