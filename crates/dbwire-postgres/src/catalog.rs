//! Catalog SQL issued by the `list_*` and `describe_table` wrappers.

use dbwire_core::quote_literal;

pub const DEFAULT_SCHEMA: &str = "public";

pub const LIST_DATABASES: &str =
    "SELECT datname FROM pg_database WHERE datistemplate = false ORDER BY datname";

pub fn list_tables(schema: &str) -> String {
    format!(
        "SELECT table_schema, table_name, table_type FROM information_schema.tables \
         WHERE table_schema = {} ORDER BY table_name",
        quote_literal(schema)
    )
}

pub fn describe_table(schema: &str, table: &str) -> String {
    format!(
        "SELECT column_name, data_type, is_nullable, column_default \
         FROM information_schema.columns \
         WHERE table_schema = {} AND table_name = {} ORDER BY ordinal_position",
        quote_literal(schema),
        quote_literal(table)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals_are_quoted() {
        let sql = describe_table("public", "o'brien");
        assert!(sql.contains("table_name = 'o''brien'"));
        assert!(sql.ends_with("ORDER BY ordinal_position"));
        assert!(list_tables("app").contains("table_schema = 'app'"));
    }
}
