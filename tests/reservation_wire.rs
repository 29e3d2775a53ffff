use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, stream};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_postgres::{AsyncMessage, Client, Config, NoTls, Notification, SimpleQueryMessage};
use ulid::Ulid;

use roomhold::config::TenantSettings;
use roomhold::engine::ManualPayouts;
use roomhold::tenant::TenantManager;
use roomhold::wire;

const PASSWORD: &str = "roomhold";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    start_server_with(TenantSettings::default()).await
}

async fn start_server_with(settings: TenantSettings) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("roomhold_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, settings, Arc::new(ManualPayouts)));

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let tm = tm.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, PASSWORD.to_string(), None).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr, user: &str) -> (Client, mpsc::UnboundedReceiver<Notification>) {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("campus")
        .user(user)
        .password(PASSWORD);

    let (client, mut connection) = config.connect(NoTls).await.unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let stream = stream::poll_fn(move |cx| connection.poll_message(cx));
        futures::pin_mut!(stream);
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(AsyncMessage::Notification(n)) => {
                    let _ = tx.send(n);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    (client, rx)
}

async fn recv_notification(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Option<Notification> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .ok()
        .flatten()
}

/// Data rows of a simple query as column lookups.
async fn rows(client: &Client, sql: &str) -> Vec<tokio_postgres::SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn sqlstate(err: &tokio_postgres::Error) -> String {
    err.as_db_error()
        .map(|db| db.code().code().to_string())
        .unwrap_or_default()
}

struct Listing {
    building: Ulid,
    apartment: Ulid,
    bed_a: Ulid,
    bed_b: Ulid,
}

async fn create_listing(owner: &Client) -> Listing {
    let l = Listing {
        building: Ulid::new(),
        apartment: Ulid::new(),
        bed_a: Ulid::new(),
        bed_b: Ulid::new(),
    };
    let (bedroom_a, bedroom_b) = (Ulid::new(), Ulid::new());
    owner
        .batch_execute(&format!(
            "INSERT INTO units (id, kind, owner_id, name) VALUES ('{}', 'building', 'landlord', 'North Hall');
             INSERT INTO units (id, kind, parent_id, price_cents) VALUES ('{}', 'apartment', '{}', 120000);
             INSERT INTO units (id, kind, parent_id) VALUES ('{bedroom_a}', 'bedroom', '{}');
             INSERT INTO units (id, kind, parent_id) VALUES ('{bedroom_b}', 'bedroom', '{}');
             INSERT INTO units (id, kind, parent_id, capacity, price_cents) VALUES ('{}', 'bed', '{bedroom_a}', 1, 30000);
             INSERT INTO units (id, kind, parent_id, capacity, price_cents) VALUES ('{}', 'bed', '{bedroom_b}', 1, 30000);",
            l.building, l.apartment, l.building, l.apartment, l.apartment, l.bed_a, l.bed_b
        ))
        .await
        .unwrap();
    l
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn units_roll_up_over_the_wire() {
    let addr = start_test_server().await;
    let (owner, _rx) = connect(addr, "landlord").await;
    let l = create_listing(&owner).await;

    let units = rows(&owner, &format!("SELECT * FROM units WHERE id = '{}'", l.apartment)).await;
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].get("kind"), Some("apartment"));
    assert_eq!(units[0].get("capacity"), Some("2"));

    let children = rows(&owner, &format!("SELECT * FROM units WHERE parent_id = '{}'", l.apartment)).await;
    assert_eq!(children.len(), 2);

    let summary = rows(&owner, &format!("SELECT * FROM summaries WHERE unit_id = '{}'", l.building)).await;
    assert_eq!(summary[0].get("leaf_units"), Some("2"));
    assert_eq!(summary[0].get("available"), Some("2"));
}

#[tokio::test]
async fn hold_pay_and_payout() {
    let addr = start_test_server().await;
    let (owner, _rx) = connect(addr, "landlord").await;
    let (student, _rx2) = connect(addr, "ana").await;
    let l = create_listing(&owner).await;

    let hold = Ulid::new();
    let inserted = student
        .execute(
            "INSERT INTO holds (id, unit_id, hold_minutes) VALUES ($1, $2, $3)",
            &[&hold.to_string(), &l.apartment.to_string(), &"30".to_string()],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let mine = rows(&student, "SELECT * FROM holds").await;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].get("status"), Some("pending_payment"));
    assert_eq!(mine[0].get("covered_units"), Some("2"));
    assert_eq!(mine[0].get("amount_cents"), Some("120000"));

    let conflict = rows(&owner, &format!("SELECT * FROM conflicts WHERE unit_id = '{}'", l.bed_a)).await;
    assert_eq!(conflict[0].get("has_conflict"), Some("t"));
    assert_eq!(conflict[0].get("hold_id"), Some(hold.to_string().as_str()));

    student
        .batch_execute(&format!(
            "UPDATE holds SET status = 'pending' WHERE id = '{hold}';
             UPDATE holds SET status = 'paid', payment_reference = 'pi_123' WHERE id = '{hold}'"
        ))
        .await
        .unwrap();

    let availability = rows(&owner, &format!("SELECT * FROM availability WHERE unit_id = '{}'", l.apartment)).await;
    assert_eq!(availability[0].get("occupied"), Some("2"));
    assert_eq!(availability[0].get("is_full"), Some("t"));

    let payouts = rows(&owner, &format!("SELECT * FROM payouts WHERE hold_id = '{hold}'")).await;
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].get("owner_id"), Some("landlord"));
    assert_eq!(payouts[0].get("amount_cents"), Some("120000"));

    owner
        .batch_execute(&format!("UPDATE holds SET checked_out = true WHERE id = '{hold}'"))
        .await
        .unwrap();
    let after = rows(&owner, &format!("SELECT * FROM availability WHERE unit_id = '{}'", l.apartment)).await;
    assert_eq!(after[0].get("occupied"), Some("0"));
}

#[tokio::test]
async fn only_the_payment_service_marks_holds_paid() {
    let addr = start_server_with(TenantSettings {
        payment_user: Some("payments".into()),
        ..TenantSettings::default()
    })
    .await;
    let (owner, _rx) = connect(addr, "landlord").await;
    let (student, _rx_s) = connect(addr, "ana").await;
    let (payments, _rx_p) = connect(addr, "payments").await;
    let l = create_listing(&owner).await;

    let hold = Ulid::new();
    student
        .batch_execute(&format!(
            "INSERT INTO holds (id, unit_id) VALUES ('{hold}', '{}')",
            l.bed_a
        ))
        .await
        .unwrap();

    let pay = format!("UPDATE holds SET status = 'paid', payment_reference = 'ref$1' WHERE id = '{hold}'");
    let err = student.batch_execute(&pay).await.unwrap_err();
    assert_eq!(sqlstate(&err), "42501");

    payments
        .execute(
            "UPDATE holds SET status = 'paid', payment_reference = $2 WHERE id = $1",
            &[&hold.to_string(), &"ref$1".to_string()],
        )
        .await
        .unwrap();
    let paid = rows(&owner, &format!("SELECT * FROM holds WHERE id = '{hold}'")).await;
    assert_eq!(paid[0].get("status"), Some("paid"));
    assert_eq!(paid[0].get("payment_reference"), Some("ref$1"));
}

#[tokio::test]
async fn second_hold_is_refused_with_friendly_message() {
    let addr = start_test_server().await;
    let (owner, _rx) = connect(addr, "landlord").await;
    let (ana, _rx_a) = connect(addr, "ana").await;
    let (ben, _rx_b) = connect(addr, "ben").await;
    let l = create_listing(&owner).await;

    ana.batch_execute(&format!(
        "INSERT INTO holds (id, unit_id) VALUES ('{}', '{}')",
        Ulid::new(),
        l.bed_a
    ))
    .await
    .unwrap();

    let err = ben
        .batch_execute(&format!(
            "INSERT INTO holds (id, unit_id) VALUES ('{}', '{}')",
            Ulid::new(),
            l.apartment
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "55P03");
    let message = err.as_db_error().unwrap().message().to_string();
    assert!(message.contains("someone else is currently reserving this"), "{message}");

    // The other bed is still free.
    ben.batch_execute(&format!(
        "INSERT INTO holds (id, unit_id) VALUES ('{}', '{}')",
        Ulid::new(),
        l.bed_b
    ))
    .await
    .unwrap();
}

#[tokio::test]
async fn errors_carry_sqlstate() {
    let addr = start_test_server().await;
    let (owner, _rx) = connect(addr, "landlord").await;
    let (ana, _rx_a) = connect(addr, "ana").await;
    let (ben, _rx_b) = connect(addr, "ben").await;
    let l = create_listing(&owner).await;

    let hold = Ulid::new();
    ana.batch_execute(&format!(
        "INSERT INTO holds (id, unit_id) VALUES ('{hold}', '{}')",
        l.bed_a
    ))
    .await
    .unwrap();

    let not_yours = ben
        .batch_execute(&format!("UPDATE holds SET status = 'cancelled' WHERE id = '{hold}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&not_yours), "42501");

    let missing = ana
        .batch_execute(&format!(
            "UPDATE holds SET status = 'cancelled' WHERE id = '{}'",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&missing), "02000");

    let bad_table = ana.batch_execute("SELECT * FROM tenants").await.unwrap_err();
    assert_eq!(sqlstate(&bad_table), "42601");

    let bad_parent = owner
        .batch_execute(&format!(
            "INSERT INTO units (id, kind, parent_id) VALUES ('{}', 'bed', '{}')",
            Ulid::new(),
            l.apartment
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&bad_parent), "P0001");

    ana.batch_execute(&format!("UPDATE holds SET status = 'cancelled' WHERE id = '{hold}'"))
        .await
        .unwrap();
}

#[tokio::test]
async fn listen_on_building_sees_bed_holds() {
    let addr = start_test_server().await;
    let (owner, mut owner_rx) = connect(addr, "landlord").await;
    let (ana, _rx) = connect(addr, "ana").await;
    let l = create_listing(&owner).await;

    owner
        .batch_execute(&format!("LISTEN unit_{}", l.building))
        .await
        .unwrap();

    let hold = Ulid::new();
    ana.batch_execute(&format!(
        "INSERT INTO holds (id, unit_id) VALUES ('{hold}', '{}')",
        l.bed_b
    ))
    .await
    .unwrap();

    // Notifications are delivered with the listener's next statement.
    rows(&owner, &format!("SELECT * FROM conflicts WHERE unit_id = '{}'", l.building)).await;
    let n = recv_notification(&mut owner_rx).await.expect("no notification");
    assert_eq!(n.channel(), format!("unit_{}", l.building));

    let payload: serde_json::Value = serde_json::from_str(n.payload()).unwrap();
    let placed = &payload["HoldPlaced"]["hold"];
    assert_eq!(placed["id"], hold.to_string());
    assert_eq!(placed["user_id"], "ana");
    assert_eq!(placed["status"], "PendingPayment");

    owner
        .batch_execute(&format!("UNLISTEN unit_{}", l.building))
        .await
        .unwrap();
    ana.batch_execute(&format!("UPDATE holds SET status = 'cancelled' WHERE id = '{hold}'"))
        .await
        .unwrap();
    rows(&owner, &format!("SELECT * FROM conflicts WHERE unit_id = '{}'", l.building)).await;
    assert!(recv_notification(&mut owner_rx).await.is_none());
}

#[tokio::test]
async fn listen_rejects_bad_channel() {
    let addr = start_test_server().await;
    let (client, _rx) = connect(addr, "ana").await;
    let err = client
        .batch_execute("LISTEN room_nope")
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "42000");
}
