//! PostgreSQL sessions driven through the facade against scripted server bytes.

use dbwire::prelude::*;
use dbwire::{ConnectionState, PgConnection, Pool};
use dbwire_core::ScriptedTransport;

fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&((payload.len() + 4) as i32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn auth(code: i32, extra: &[u8]) -> Vec<u8> {
    let mut payload = code.to_be_bytes().to_vec();
    payload.extend_from_slice(extra);
    frame(b'R', &payload)
}

fn ready() -> Vec<u8> {
    frame(b'Z', b"I")
}

fn startup_tail() -> Vec<u8> {
    let mut out = auth(0, &[]);
    out.extend(frame(b'S', b"server_version\x0016.2\x00"));
    out.extend(ready());
    out
}

fn row_description(fields: &[(&str, u32)]) -> Vec<u8> {
    let mut payload = (fields.len() as i16).to_be_bytes().to_vec();
    for (name, type_oid) in fields {
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(&16_385i32.to_be_bytes());
        payload.extend_from_slice(&1i16.to_be_bytes());
        payload.extend_from_slice(&type_oid.to_be_bytes());
        payload.extend_from_slice(&(-1i16).to_be_bytes());
        payload.extend_from_slice(&(-1i32).to_be_bytes());
        payload.extend_from_slice(&0i16.to_be_bytes());
    }
    frame(b'T', &payload)
}

fn data_row(cells: &[Option<&str>]) -> Vec<u8> {
    let mut payload = (cells.len() as i16).to_be_bytes().to_vec();
    for cell in cells {
        match cell {
            Some(text) => {
                payload.extend_from_slice(&(text.len() as i32).to_be_bytes());
                payload.extend_from_slice(text.as_bytes());
            }
            None => payload.extend_from_slice(&(-1i32).to_be_bytes()),
        }
    }
    frame(b'D', &payload)
}

fn command_complete(tag: &str) -> Vec<u8> {
    let mut payload = tag.as_bytes().to_vec();
    payload.push(0);
    frame(b'C', &payload)
}

fn select_one(n: i32) -> Vec<u8> {
    let mut out = row_description(&[("n", 23)]);
    out.extend(data_row(&[Some(&n.to_string())]));
    out.extend(command_complete("SELECT 1"));
    out.extend(ready());
    out
}

fn trusted() -> ScriptedTransport {
    ScriptedTransport::new().reply(startup_tail())
}

fn config() -> ConnectionConfig {
    ConnectionConfig::new(ConnectionType::Postgresql, "db.local", "app", "user")
}

/// Body of a frontend message after its tag and length.
fn body(message: &[u8]) -> &[u8] {
    &message[5..]
}

#[tokio::test]
async fn scram_sha_256_login_then_select() {
    let mut users = row_description(&[("id", 23), ("name", 25), ("email", 25)]);
    users.extend(data_row(&[Some("1"), Some("Ada"), None]));
    users.extend(command_complete("SELECT 1"));
    users.extend(ready());

    let transport = ScriptedTransport::new()
        .reply(auth(10, b"SCRAM-SHA-256\0\0"))
        .reply(auth(
            11,
            b"r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096",
        ))
        .reply(auth(12, b"v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4="))
        .reply(startup_tail())
        .reply(users);
    let log = transport.sent_log();

    let pg = PgConnection::with_transport(config().password("pencil"), transport)
        .with_client_nonce("rOprNGfwEbeRWgbNEkqO");
    let mut conn = AnyConnection::from(pg);
    conn.connect().await.unwrap();
    assert_eq!(conn.state(), &ConnectionState::Connected);
    assert_eq!(
        conn.as_postgres().unwrap().server_parameter("server_version"),
        Some("16.2")
    );

    let sent = log.messages();
    assert_eq!(
        body(&sent[2]),
        b"c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
    );

    let result = conn.query("SELECT id, name, email FROM users").await.unwrap();
    assert_eq!(result.column_names(), vec!["id", "name", "email"]);
    assert_eq!(result.columns[0].type_name, "integer");
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0].get_by_name("name"), Some(&Value::from("Ada")));
    assert_eq!(result.rows[0].get(2).unwrap().to_string(), "null");

    conn.disconnect().await.unwrap();
    assert_eq!(conn.state(), &ConnectionState::Disconnected);
    assert_eq!(log.messages().last().unwrap()[0], b'X');
}

#[tokio::test]
async fn server_error_surfaces_with_sqlstate() {
    let mut error = Vec::new();
    for (code, value) in [
        (b'S', "ERROR"),
        (b'C', "42P01"),
        (b'M', "relation \"missing\" does not exist"),
    ] {
        error.push(code);
        error.extend_from_slice(value.as_bytes());
        error.push(0);
    }
    error.push(0);
    let mut reply = frame(b'E', &error);
    reply.extend(ready());

    let transport = trusted().reply(reply).reply(select_one(1));
    let mut conn = AnyConnection::with_transport(config(), transport);
    conn.connect().await.unwrap();

    let err = conn.query("SELECT * FROM missing").await.unwrap_err();
    assert_eq!(err.sqlstate(), Some("42P01"));
    assert!(err.to_string().contains("relation \"missing\" does not exist"), "{err}");
    assert!(conn.is_connected());

    let result = conn.query("SELECT 1").await.unwrap();
    assert_eq!(result.rows[0].get(0), Some(&Value::from("1")));
}

#[tokio::test]
async fn shared_connection_serves_callers_in_order() {
    let transport = (1..=4).fold(trusted(), |t, n| t.reply(select_one(n)));
    let log = transport.sent_log();
    let mut conn = AnyConnection::with_transport(config(), transport);
    conn.connect().await.unwrap();
    let shared = SharedConnection::new(conn);

    let gate = shared.lock().await;
    let mut tasks = Vec::new();
    for n in 1..=4 {
        let handle = shared.clone();
        tasks.push(tokio::spawn(async move {
            handle.query(&format!("SELECT {n}")).await
        }));
        while shared.queue_len() < n {
            tokio::task::yield_now().await;
        }
    }
    drop(gate);

    for (n, task) in (1..=4).zip(tasks) {
        let result = task.await.unwrap().unwrap();
        assert_eq!(result.rows[0].get(0), Some(&Value::from(n.to_string())));
    }

    let queries: Vec<Vec<u8>> = log.messages()[1..].iter().map(|m| body(m).to_vec()).collect();
    assert_eq!(
        queries,
        vec![
            b"SELECT 1\0".to_vec(),
            b"SELECT 2\0".to_vec(),
            b"SELECT 3\0".to_vec(),
            b"SELECT 4\0".to_vec(),
        ]
    );
}

#[tokio::test]
async fn pooled_connection_is_reused() {
    let pool: Pool<AnyConnection<ScriptedTransport>> = Pool::new(PoolConfig::new(2)).unwrap();
    let target = config();

    let mut first = pool
        .acquire(&target, |config| async move {
            let transport = trusted().reply(select_one(1)).reply(select_one(2));
            let mut conn = AnyConnection::with_transport(config, transport);
            conn.connect().await?;
            Ok::<_, Error>(conn)
        })
        .await
        .unwrap();
    assert_eq!(first.query("SELECT 1").await.unwrap().row_count, 1);
    pool.release(first).await;

    let mut second = pool
        .acquire(&target, |_| async {
            Err::<AnyConnection<ScriptedTransport>, _>(Error::config("idle connection not reused"))
        })
        .await
        .unwrap();
    let result = second.query("SELECT 2").await.unwrap();
    assert_eq!(result.rows[0].get(0), Some(&Value::from("2")));

    let stats = pool.stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.in_use, 1);
    pool.release(second).await;
    pool.destroy_all().await;
}
