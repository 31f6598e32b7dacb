// Copyright 2026 Chequeflow Contributors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end pipeline tests: observed response → extractor → persistence →
//! reconciliation, with a real HTTP server standing in for the upstream.

use chequeflow::cheque::{Cheque, SOURCE_COSTVISER, SOURCE_PLATFORMA_OFD};
use chequeflow::events::NetBus;
use chequeflow::extract::{feed, table};
use chequeflow::intercept::http::HttpTransport;
use chequeflow::intercept::{
    self, ContentTypeToken, InterceptConfig, SurfaceRegistry, TransportKind, TransportRequest,
};
use chequeflow::reconcile::reconcile;
use chequeflow::relay::{spawn_feed_listener, spawn_table_listener, ChannelMessage, Persister, SaveMeta};
use chequeflow::store::ChequeRepo;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// the observer guard is process-wide; tests that install it must not overlap
fn observer_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

const TABLE_PAGE: &str = r#"<html><body>
<table class="table-cheques_search"><tbody>
  <tr id="terminal_cheque_62920551_id" href="/web/auth/cheques/62920551">
    <td><i title="Принят"></i></td>
    <td><i title="Оплата картой"></i></td>
    <td>Приход</td>
    <td>27.10.2025&nbsp;16:30</td>
    <td><span class="js__trim_long_text">Табачный Дом Льва Толстого 19</span></td>
    <td>56</td>
    <td>206</td>
    <td>1&nbsp;234,56 ₽</td>
    <td><i title="Передан"></i></td>
  </tr>
</tbody></table>
</body></html>"#;

fn feed_body() -> String {
    serde_json::json!({
        "items": [{
            "actions": { "read": true, "edit": false, "destroy": false },
            "id": 99101,
            "code": "A-0042",
            "check_type": "sale",
            "created_at": "2025-10-27T16:30:05.000+10:00",
            "num": 62920551i64,
            "quantity": 3.0,
            "discount": 0.0,
            "total": 1234.56,
            "error": null,
            "comment": null,
            "shift": 206,
            "fields": {
                "KKT": {
                    "fn": "7382440700036332",
                    "inn": "2724163243",
                    "num": 42,
                    "sno": "usn_income",
                    "date": "2025-10-27T16:30:00.000+10:00",
                    "flag": "fiscal",
                    "total": 1234.56,
                    "kkt_rn": "Табачный Дом Льва Толстого 19",
                    "Сумма НДС": "0.00"
                }
            },
            "change": 0.0,
            "total_payments": 1234.56,
            "payment_source": "electron",
            "employee_ids": [7],
            "turn_id": 1,
            "cashbox_id": 2,
            "cashier_id": 3,
            "device_id": 4,
            "department_id": 5,
            "card_id": null,
            "check_id": null,
            "card": null,
            "cashier": { "id": 3, "name": "Иванова" },
            "vat_amount": 0.0
        }]
    })
    .to_string()
}

#[tokio::test]
async fn observed_table_response_lands_in_the_scoped_collection() {
    let _guard = observer_lock();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/web/auth/cheques"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(TABLE_PAGE, "text/html"))
        .mount(&server)
        .await;

    let registry = Arc::new(SurfaceRegistry::new());
    registry.install(Arc::new(HttpTransport::new().unwrap()));

    let bus = Arc::new(NetBus::new(16));
    let bus_clone = Arc::clone(&bus);
    let handle = intercept::start(
        Arc::clone(&registry),
        InterceptConfig {
            content_types: vec![ContentTypeToken::Html, ContentTypeToken::Json],
            ..Default::default()
        },
        Arc::new(move |event| bus_clone.emit(event)),
    )
    .unwrap();

    let repo = Arc::new(ChequeRepo::in_memory().unwrap());
    let (tx, rx) = mpsc::channel(16);
    let listener = spawn_table_listener(&bus, tx);
    let persister = tokio::spawn(Persister::new(Arc::clone(&repo)).run(rx));

    registry
        .get(TransportKind::Fetch)
        .unwrap()
        .send(TransportRequest::get(format!(
            "{}/web/auth/cheques",
            server.uri()
        )))
        .await
        .unwrap();

    // the listener and persister run async; give them a moment
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let active = repo.get_active().unwrap().expect("scoped collection");
    assert_eq!(active.name, format!("Receipts [{}]", repo.scope()));
    let rows = repo.list_rows(&active.id, None, 0).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].cheque.id, "62920551");
    assert_eq!(rows[0].cheque.amount, "1 234,56 ₽");
    assert_eq!(rows[0].source, SOURCE_PLATFORMA_OFD);

    handle.teardown();
    listener.abort();
    persister.abort();
}

#[tokio::test]
async fn binary_content_type_is_observed_without_a_body() {
    let _guard = observer_lock();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blob"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(vec![0u8; 64], "application/octet-stream"),
        )
        .mount(&server)
        .await;

    let registry = Arc::new(SurfaceRegistry::new());
    registry.install(Arc::new(HttpTransport::new().unwrap()));

    let seen: Arc<Mutex<Vec<chequeflow::intercept::NetworkEvent>>> =
        Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handle = intercept::start(
        Arc::clone(&registry),
        InterceptConfig {
            content_types: vec![ContentTypeToken::Json],
            ..Default::default()
        },
        Arc::new(move |event| sink.lock().unwrap().push(event)),
    )
    .unwrap();

    registry
        .get(TransportKind::Fetch)
        .unwrap()
        .send(TransportRequest::get(format!("{}/blob", server.uri())))
        .await
        .unwrap();

    let events = seen.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, Some(200));
    assert!(events[0].body.is_none());
    drop(events);

    handle.teardown();
}

#[tokio::test]
async fn feed_and_table_rows_reconcile_inside_one_collection() {
    let repo = Arc::new(ChequeRepo::in_memory().unwrap());
    let persister = Persister::new(Arc::clone(&repo));

    // the table page and the feed describe the same transaction
    let table_rows = table::parse_cheques(TABLE_PAGE);
    assert_eq!(table_rows.len(), 1);
    persister
        .handle(&ChannelMessage::SaveCheques {
            rows: table_rows,
            meta: SaveMeta {
                source: SOURCE_PLATFORMA_OFD.to_string(),
            },
        })
        .unwrap();

    let parsed = feed::parse_feed_str(&feed_body()).recognized().unwrap();
    let feed_rows = feed::map_feed(&parsed);
    assert_eq!(feed_rows[0].date, "27.10.2025 16:30");
    persister
        .handle(&ChannelMessage::SaveCheques {
            rows: feed_rows,
            meta: SaveMeta {
                source: SOURCE_COSTVISER.to_string(),
            },
        })
        .unwrap();

    let active = repo.get_active().unwrap().unwrap();
    let rows = repo.list_rows(&active.id, None, 0).unwrap();
    assert_eq!(rows.len(), 2);

    let (left, right): (Vec<Cheque>, Vec<Cheque>) = rows
        .into_iter()
        .map(|r| r.cheque)
        .partition(|c| c.source != SOURCE_COSTVISER);
    let result = reconcile(&left, &right);
    assert!(result.is_balanced(), "unmatched: {:?} / {:?}", result.unmatched_left, result.unmatched_right);
    assert_eq!(result.left.card_total, 1234.56);
    assert_eq!(result.right.card_total, 1234.56);
}

#[tokio::test]
async fn feed_listener_rejects_payload_with_missing_nested_field() {
    let bus = NetBus::new(16);
    let (tx, mut rx) = mpsc::channel(16);
    let listener = spawn_feed_listener(&bus, tx);

    let mut broken: serde_json::Value = serde_json::from_str(&feed_body()).unwrap();
    broken["items"][0]["fields"]["KKT"]
        .as_object_mut()
        .unwrap()
        .remove("date");

    bus.emit(chequeflow::intercept::NetworkEvent {
        kind: TransportKind::Fetch,
        method: "GET".to_string(),
        url: Some("https://example.test/checks".to_string()),
        status: Some(200),
        time_ms: Some(1.0),
        body: Some(broken.to_string()),
        content_type: Some("application/json".to_string()),
    });
    drop(bus);

    listener.await.unwrap();
    assert!(rx.recv().await.is_none());
}

#[test]
fn repeated_capture_keeps_both_rows() {
    let repo = ChequeRepo::in_memory().unwrap();
    let collection = repo.ensure_scoped("Receipts").unwrap();

    let first = table::parse_cheques(TABLE_PAGE);
    repo.add_rows(&collection.id, &first, SOURCE_PLATFORMA_OFD)
        .unwrap();

    // the same page captured again, amount corrected upstream; rows are never
    // rewritten after insert, so both captures stay on record
    let updated_page = TABLE_PAGE.replace("1&nbsp;234,56 ₽", "1&nbsp;300,00 ₽");
    let second = table::parse_cheques(&updated_page);
    repo.add_rows(&collection.id, &second, SOURCE_PLATFORMA_OFD)
        .unwrap();

    let rows = repo.list_rows(&collection.id, None, 0).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].key, rows[1].key);
    assert_ne!(rows[0].batch, rows[1].batch);
    assert_eq!(rows[0].cheque.amount, "1 234,56 ₽");
    assert_eq!(rows[1].cheque.amount, "1 300,00 ₽");
}

#[test]
fn rows_survive_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cheques.db");

    {
        let repo = ChequeRepo::open(&db).unwrap();
        let collection = repo.ensure_scoped("Receipts").unwrap();
        repo.add_rows(
            &collection.id,
            &table::parse_cheques(TABLE_PAGE),
            SOURCE_PLATFORMA_OFD,
        )
        .unwrap();
    }

    let repo = ChequeRepo::open(&db).unwrap();
    let active = repo.get_active().unwrap().expect("pointer persisted");
    assert_eq!(repo.count_rows(&active.id).unwrap(), 1);
}

#[test]
fn deleting_the_active_collection_clears_everything() {
    let repo = ChequeRepo::in_memory().unwrap();
    let collection = repo.ensure_scoped("Receipts").unwrap();
    repo.add_rows(
        &collection.id,
        &table::parse_cheques(TABLE_PAGE),
        SOURCE_PLATFORMA_OFD,
    )
    .unwrap();

    repo.delete(&collection.id).unwrap();

    assert!(repo.get(&collection.id).unwrap().is_none());
    assert_eq!(repo.count_rows(&collection.id).unwrap(), 0);
    assert!(repo.get_active().unwrap().is_none());
    assert!(repo.list().unwrap().is_empty());
}
