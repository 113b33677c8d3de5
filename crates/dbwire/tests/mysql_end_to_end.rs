//! MySQL and MariaDB sessions driven through the facade against scripted server bytes.

use dbwire::prelude::*;
use dbwire::protocol::mysql::auth::mysql_native_password;
use dbwire::protocol::mysql::protocol::{PacketWriter, build_packets, capabilities};
use dbwire::{ConnectionState, QueryErrorKind};
use dbwire_core::{ScriptedTransport, SentLog};

const SCRAMBLE: &[u8] = b"abcdefghijklmnopqrst";
const SERVER_CAPS: u32 = capabilities::DEFAULT_CLIENT_FLAGS | capabilities::CLIENT_CONNECT_WITH_DB;

fn packet(seq: u8, payload: &[u8]) -> Vec<u8> {
    build_packets(payload, seq).0
}

fn greeting(version: &str) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(10);
    w.write_null_string(version);
    w.write_u32_le(7);
    w.write_bytes(&SCRAMBLE[..8]);
    w.write_u8(0);
    w.write_u16_le((SERVER_CAPS & 0xFFFF) as u16);
    w.write_u8(45);
    w.write_u16_le(2);
    w.write_u16_le((SERVER_CAPS >> 16) as u16);
    w.write_u8(21);
    w.write_zeros(10);
    w.write_bytes(&SCRAMBLE[8..]);
    w.write_u8(0);
    w.write_null_string("mysql_native_password");
    packet(0, w.as_bytes())
}

fn ok(seq: u8) -> Vec<u8> {
    packet(seq, &[0x00, 0, 0, 2, 0, 0, 0])
}

fn column(name: &str, column_type: u8) -> Vec<u8> {
    let mut w = PacketWriter::new();
    for part in ["def", "shop", "users", "users", name, name] {
        w.write_lenenc_string(part);
    }
    w.write_lenenc_int(0x0c);
    w.write_u16_le(45);
    w.write_u32_le(255);
    w.write_u8(column_type);
    w.write_u16_le(0);
    w.write_u8(0);
    w.write_zeros(2);
    w.into_bytes()
}

fn text_row(cells: &[Option<&str>]) -> Vec<u8> {
    let mut w = PacketWriter::new();
    for cell in cells {
        match cell {
            Some(text) => w.write_lenenc_string(text),
            None => w.write_u8(0xFB),
        }
    }
    w.into_bytes()
}

fn users() -> Vec<u8> {
    let payloads = vec![
        vec![3],
        column("id", 0x03),
        column("name", 0xFD),
        column("email", 0xFD),
        text_row(&[Some("1"), Some("Ada"), None]),
        text_row(&[Some("2"), Some("Grace"), Some("grace@example.com")]),
        vec![0xFE, 0, 0, 2, 0, 0, 0],
    ];
    payloads
        .iter()
        .enumerate()
        .flat_map(|(i, payload)| packet(i as u8 + 1, payload))
        .collect()
}

fn config(kind: ConnectionType) -> ConnectionConfig {
    ConnectionConfig::new(kind, "db.local", "shop", "alice").password("secret")
}

/// Greeting plus a successful login, followed by `replies`.
fn session(
    kind: ConnectionType,
    version: &str,
    replies: Vec<Vec<u8>>,
) -> (AnyConnection<ScriptedTransport>, SentLog) {
    let transport = replies
        .into_iter()
        .fold(ScriptedTransport::new().reply(greeting(version)).reply(ok(2)), |t, r| t.reply(r));
    let log = transport.sent_log();
    (AnyConnection::with_transport(config(kind), transport), log)
}

#[tokio::test]
async fn native_password_login() {
    let (mut conn, log) = session(ConnectionType::Mysql, "8.0.36", Vec::new());
    conn.connect().await.unwrap();
    assert_eq!(conn.state(), &ConnectionState::Connected);

    let server = conn.as_mysql().unwrap().server_info().unwrap();
    assert_eq!(server.version, "8.0.36");
    assert_eq!(server.connection_id, 7);

    let login = &log.messages()[0];
    let expected = mysql_native_password("secret", SCRAMBLE);
    assert!(login.windows(expected.len()).any(|w| w == expected.as_slice()));
    assert!(login.ends_with(b"shop\0mysql_native_password\0"));
}

#[tokio::test]
async fn mariadb_uses_the_mysql_driver() {
    let (mut conn, _) = session(ConnectionType::Mariadb, "5.5.5-10.11.6-MariaDB", Vec::new());
    conn.connect().await.unwrap();
    assert!(conn.as_mysql().is_some());
    assert_eq!(
        conn.as_mysql().unwrap().server_info().unwrap().version,
        "5.5.5-10.11.6-MariaDB"
    );
}

#[tokio::test]
async fn select_two_rows_three_columns() {
    let (mut conn, log) = session(ConnectionType::Mysql, "8.0.36", vec![users()]);
    conn.connect().await.unwrap();

    let result = conn.query("SELECT id, name, email FROM users").await.unwrap();
    assert_eq!(&log.messages()[1][4..], b"\x03SELECT id, name, email FROM users");
    assert_eq!(result.command, "SELECT");
    assert_eq!(result.column_names(), vec!["id", "name", "email"]);
    assert_eq!(result.columns[0].type_name, "INT");
    assert_eq!(result.row_count, 2);
    assert_eq!(result.rows[0].get_by_name("email"), Some(&Value::Null));
    assert_eq!(result.rows[0].get(2).unwrap().to_string(), "null");
    assert_eq!(
        result.rows[1].get_by_name("email"),
        Some(&Value::from("grace@example.com"))
    );
}

#[tokio::test]
async fn duplicate_key_is_a_query_error() {
    let mut err = vec![0xFF];
    err.extend_from_slice(&1062u16.to_le_bytes());
    err.extend_from_slice(b"#23000Duplicate entry 'ada' for key 'users.name'");

    let (mut conn, _) = session(ConnectionType::Mysql, "8.0.36", vec![packet(1, &err)]);
    conn.connect().await.unwrap();

    let sql = "INSERT INTO users (name) VALUES ('ada')";
    match conn.query(sql).await.unwrap_err() {
        Error::Query(q) => {
            assert_eq!(q.kind, QueryErrorKind::Constraint);
            assert_eq!(q.code, Some(1062));
            assert_eq!(q.sqlstate.as_deref(), Some("23000"));
            assert_eq!(q.sql.as_deref(), Some(sql));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(conn.is_connected());
}
