//! Catalog SQL issued by the `list_*` and `describe_table` wrappers.

use dbwire_core::quote_literal;

pub const LIST_DATABASES: &str = "SHOW DATABASES";

/// MySQL string literal; backslashes are escapes unless
/// `NO_BACKSLASH_ESCAPES` is set, so they are doubled too.
pub fn literal(value: &str) -> String {
    quote_literal(&value.replace('\\', "\\\\"))
}

/// Tables of `schema`, or of the session's current database.
pub fn list_tables(schema: Option<&str>) -> String {
    let schema = schema.map_or_else(|| "DATABASE()".to_string(), literal);
    format!(
        "SELECT table_schema, table_name, table_type FROM information_schema.tables \
         WHERE table_schema = {schema} ORDER BY table_name"
    )
}

pub fn describe_table(schema: &str, table: &str) -> String {
    format!(
        "SELECT column_name, column_type, is_nullable, column_default \
         FROM information_schema.columns \
         WHERE table_schema = {} AND table_name = {} ORDER BY ordinal_position",
        literal(schema),
        literal(table)
    )
}
