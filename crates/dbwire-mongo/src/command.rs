//! Command documents in, tabular results out.

use dbwire_bson::{BsonDocument, BsonValue, document_from_json};
use dbwire_core::error::{QueryError, QueryErrorKind};
use dbwire_core::{ColumnInfo, Error, QueryResult, Result, Value};

/// Reply fields that carry no query data.
const BOOKKEEPING: [&str; 3] = ["ok", "$clusterTime", "operationTime"];

/// Column name used when a result array holds scalars (e.g. `distinct`).
const SCALAR_COLUMN: &str = "value";

/// Parse JSON command text, targeting `database` unless it names its own `$db`.
///
/// Malformed input is reported as a query error so the connection stays
/// usable.
pub fn prepare(text: &str, database: &str) -> Result<BsonDocument> {
    let json: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| invalid_command(format!("invalid command JSON: {e}")))?;
    let mut command = document_from_json(&json).map_err(|e| invalid_command(e.to_string()))?;
    if command.is_empty() {
        return Err(invalid_command("empty command document"));
    }
    if !command.contains_key("$db") {
        command.insert("$db", database);
    }
    Ok(command)
}

fn invalid_command(message: impl Into<String>) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Syntax,
        sql: None,
        sqlstate: None,
        code: None,
        message: message.into(),
        detail: None,
        hint: None,
    })
}

/// Whether `ok` is 1 (servers send it as a double).
pub fn is_ok(reply: &BsonDocument) -> bool {
    reply
        .get("ok")
        .and_then(BsonValue::as_f64)
        .is_some_and(|ok| ok == 1.0)
}

/// `ok: 0` replies and write errors become server-reported errors.
pub fn check_reply(reply: &BsonDocument) -> Result<()> {
    if !is_ok(reply) {
        return Err(server_error(reply));
    }
    if let Some(first) = reply
        .get_array("writeErrors")
        .and_then(|errors| errors.first())
        .and_then(BsonValue::as_document)
    {
        return Err(server_error(first));
    }
    Ok(())
}

fn server_error(doc: &BsonDocument) -> Error {
    let code = doc.get("code").and_then(BsonValue::as_i64);
    let kind = match code {
        Some(11000 | 11001) => QueryErrorKind::Constraint,
        Some(13 | 18) => QueryErrorKind::Permission,
        Some(26) => QueryErrorKind::NotFound,
        Some(9) => QueryErrorKind::Syntax,
        _ => QueryErrorKind::Database,
    };
    Error::Query(QueryError {
        kind,
        sql: None,
        sqlstate: None,
        code,
        message: doc
            .get_str("errmsg")
            .unwrap_or("command failed")
            .to_string(),
        detail: doc.get_str("codeName").map(str::to_string),
        hint: None,
    })
}

/// Documents a reply carries, by priority: `cursor.firstBatch`, `values`,
/// `databases`, else the reply itself without bookkeeping fields.
pub fn reply_documents(reply: &BsonDocument) -> Vec<BsonDocument> {
    let batch = reply
        .get_document("cursor")
        .and_then(|cursor| cursor.get_array("firstBatch"))
        .or_else(|| reply.get_array("values"))
        .or_else(|| reply.get_array("databases"));

    match batch {
        Some(items) => items.iter().map(as_row_document).collect(),
        None => vec![
            reply
                .iter()
                .filter(|(key, _)| !BOOKKEEPING.contains(key))
                .map(|(key, value)| (key, value.clone()))
                .collect(),
        ],
    }
}

fn as_row_document(item: &BsonValue) -> BsonDocument {
    match item {
        BsonValue::Document(doc) => doc.clone(),
        other => BsonDocument::new().with(SCALAR_COLUMN, other.clone()),
    }
}

/// Union of keys in first-seen order, each typed by the first document that
/// has it.
pub fn infer_columns(documents: &[BsonDocument]) -> Vec<ColumnInfo> {
    let mut columns: Vec<ColumnInfo> = Vec::new();
    for doc in documents {
        for (key, value) in doc.iter() {
            if !columns.iter().any(|c| c.name == key) {
                columns.push(ColumnInfo::new(key, value.type_name()));
            }
        }
    }
    columns
}

/// Tabulate documents; keys a document lacks become `Null`.
pub fn to_query_result(documents: &[BsonDocument], command: &str) -> QueryResult {
    let columns = infer_columns(documents);
    let rows = documents
        .iter()
        .map(|doc| {
            columns
                .iter()
                .map(|column| doc.get(&column.name).map_or(Value::Null, BsonValue::to_value))
                .collect()
        })
        .collect();
    QueryResult::from_rows(columns, rows, command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbwire_bson::ObjectId;

    #[test]
    fn test_prepare_keeps_order_and_adds_db() {
        let cmd = prepare(r#"{"find": "users", "filter": {"age": {"$gt": 30}}, "limit": 1}"#, "shop")
            .unwrap();
        assert_eq!(cmd.keys().collect::<Vec<_>>(), vec!["find", "filter", "limit", "$db"]);
        assert_eq!(cmd.get_str("$db"), Some("shop"));

        let cmd = prepare(r#"{"ping": 1, "$db": "admin"}"#, "shop").unwrap();
        assert_eq!(cmd.get_str("$db"), Some("admin"));
    }

    #[test]
    fn test_prepare_rejects_bad_input_as_query_error() {
        for text in ["{not json", "[1, 2]", "{}"] {
            let err = prepare(text, "shop").unwrap_err();
            assert!(matches!(err, Error::Query(_)), "{text}: {err}");
        }
    }

    #[test]
    fn test_check_reply() {
        assert!(check_reply(&BsonDocument::new().with("ok", 1.0)).is_ok());

        let failed = BsonDocument::new()
            .with("ok", 0.0)
            .with("errmsg", "no such command: 'fnd'")
            .with("code", 59)
            .with("codeName", "CommandNotFound");
        match check_reply(&failed).unwrap_err() {
            Error::Query(q) => {
                assert_eq!(q.code, Some(59));
                assert_eq!(q.message, "no such command: 'fnd'");
                assert_eq!(q.detail.as_deref(), Some("CommandNotFound"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let duplicate = BsonDocument::new().with("ok", 1.0).with("n", 0).with(
            "writeErrors",
            vec![BsonValue::Document(
                BsonDocument::new()
                    .with("index", 0)
                    .with("code", 11000)
                    .with("errmsg", "E11000 duplicate key error"),
            )],
        );
        match check_reply(&duplicate).unwrap_err() {
            Error::Query(q) => assert_eq!(q.kind, QueryErrorKind::Constraint),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_reply_documents_priority() {
        let cursor = BsonDocument::new().with(
            "cursor",
            BsonDocument::new()
                .with("firstBatch", vec![BsonValue::Document(BsonDocument::new().with("a", 1))])
                .with("id", 0)
                .with("ns", "shop.users"),
        );
        assert_eq!(reply_documents(&cursor), vec![BsonDocument::new().with("a", 1)]);

        let distinct = BsonDocument::new()
            .with("values", vec![BsonValue::from("x"), BsonValue::from("y")])
            .with("ok", 1.0);
        let docs = reply_documents(&distinct);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].get_str("value"), Some("y"));

        let count = BsonDocument::new()
            .with("n", 4)
            .with("ok", 1.0)
            .with("operationTime", BsonValue::Int64(1));
        assert_eq!(reply_documents(&count), vec![BsonDocument::new().with("n", 4)]);
    }

    #[test]
    fn test_columns_are_key_union() {
        let id = ObjectId::parse_str("65a1b2c3d4e5f60718293a4b").unwrap();
        let docs = vec![
            BsonDocument::new().with("_id", id).with("name", "Ada"),
            BsonDocument::new()
                .with("name", BsonValue::Null)
                .with("age", 36)
                .with("tags", vec![BsonValue::from("x")]),
        ];
        let result = to_query_result(&docs, "find");

        let columns: Vec<_> = result
            .columns
            .iter()
            .map(|c| (c.name.as_str(), c.type_name.as_str()))
            .collect();
        assert_eq!(
            columns,
            vec![("_id", "objectId"), ("name", "string"), ("age", "int"), ("tags", "array")]
        );
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[0].get_by_name("age"), Some(&Value::Null));
        assert_eq!(
            result.rows[0].get_by_name("_id"),
            Some(&Value::ObjectId("65a1b2c3d4e5f60718293a4b".into()))
        );
        assert_eq!(result.rows[1].get_by_name("name"), Some(&Value::Null));
        assert_eq!(result.command, "find");
    }
}
