//! Catalog commands behind `list_databases`, `list_tables` and `describe_table`.

use dbwire_bson::{BsonDocument, BsonValue};
use dbwire_core::{ColumnDetail, TableInfo};

use crate::command::infer_columns;

/// Documents sampled to describe a collection.
pub const SAMPLE_SIZE: i32 = 100;

pub fn list_databases() -> BsonDocument {
    BsonDocument::new()
        .with("listDatabases", 1)
        .with("nameOnly", true)
        .with("$db", "admin")
}

pub fn list_collections(database: &str) -> BsonDocument {
    BsonDocument::new()
        .with("listCollections", 1)
        .with("nameOnly", true)
        .with("$db", database)
}

pub fn sample(database: &str, collection: &str) -> BsonDocument {
    BsonDocument::new()
        .with("find", collection)
        .with("limit", SAMPLE_SIZE)
        .with("$db", database)
}

pub fn database_names(documents: &[BsonDocument]) -> Vec<String> {
    documents
        .iter()
        .filter_map(|doc| doc.get_str("name"))
        .map(str::to_string)
        .collect()
}

pub fn collections(database: &str, documents: &[BsonDocument]) -> Vec<TableInfo> {
    documents
        .iter()
        .filter_map(|doc| {
            Some(TableInfo {
                schema: database.to_string(),
                name: doc.get_str("name")?.to_string(),
                kind: doc.get_str("type").unwrap_or("collection").to_string(),
            })
        })
        .collect()
}

/// Fields seen across the sample. A field is nullable when some sampled
/// document lacks it or holds `null`.
pub fn describe(documents: &[BsonDocument]) -> Vec<ColumnDetail> {
    infer_columns(documents)
        .into_iter()
        .map(|column| {
            let nullable = documents.iter().any(|doc| {
                matches!(doc.get(&column.name), None | Some(BsonValue::Null))
            });
            ColumnDetail {
                name: column.name,
                type_name: column.type_name,
                nullable,
                default_value: None,
            }
        })
        .collect()
}
