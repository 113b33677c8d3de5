//! Display names for PostgreSQL type OIDs.

use std::borrow::Cow;

pub const BOOL: u32 = 16;
pub const BYTEA: u32 = 17;
pub const CHAR: u32 = 18;
pub const NAME: u32 = 19;
pub const INT8: u32 = 20;
pub const INT2: u32 = 21;
pub const INT4: u32 = 23;
pub const TEXT: u32 = 25;
pub const OID: u32 = 26;
pub const JSON: u32 = 114;
pub const XML: u32 = 142;
pub const CIDR: u32 = 650;
pub const FLOAT4: u32 = 700;
pub const FLOAT8: u32 = 701;
pub const UNKNOWN: u32 = 705;
pub const MONEY: u32 = 790;
pub const MACADDR: u32 = 829;
pub const INET: u32 = 869;
pub const BOOL_ARRAY: u32 = 1000;
pub const INT2_ARRAY: u32 = 1005;
pub const INT4_ARRAY: u32 = 1007;
pub const TEXT_ARRAY: u32 = 1009;
pub const VARCHAR_ARRAY: u32 = 1015;
pub const INT8_ARRAY: u32 = 1016;
pub const FLOAT8_ARRAY: u32 = 1022;
pub const BPCHAR: u32 = 1042;
pub const VARCHAR: u32 = 1043;
pub const DATE: u32 = 1082;
pub const TIME: u32 = 1083;
pub const TIMESTAMP: u32 = 1114;
pub const TIMESTAMPTZ: u32 = 1184;
pub const INTERVAL: u32 = 1186;
pub const TIMETZ: u32 = 1266;
pub const BIT: u32 = 1560;
pub const VARBIT: u32 = 1562;
pub const NUMERIC: u32 = 1700;
pub const VOID: u32 = 2278;
pub const UUID: u32 = 2950;
pub const UUID_ARRAY: u32 = 2951;
pub const JSONB: u32 = 3802;
pub const JSONB_ARRAY: u32 = 3807;

/// SQL-facing name of a built-in type OID.
pub const fn known_type_name(type_oid: u32) -> Option<&'static str> {
    Some(match type_oid {
        BOOL => "boolean",
        BYTEA => "bytea",
        CHAR => "char",
        NAME => "name",
        INT8 => "bigint",
        INT2 => "smallint",
        INT4 => "integer",
        TEXT => "text",
        OID => "oid",
        JSON => "json",
        XML => "xml",
        CIDR => "cidr",
        FLOAT4 => "real",
        FLOAT8 => "double precision",
        UNKNOWN => "unknown",
        MONEY => "money",
        MACADDR => "macaddr",
        INET => "inet",
        BOOL_ARRAY => "boolean[]",
        INT2_ARRAY => "smallint[]",
        INT4_ARRAY => "integer[]",
        TEXT_ARRAY => "text[]",
        VARCHAR_ARRAY => "varchar[]",
        INT8_ARRAY => "bigint[]",
        FLOAT8_ARRAY => "double precision[]",
        BPCHAR => "character",
        VARCHAR => "varchar",
        DATE => "date",
        TIME => "time",
        TIMESTAMP => "timestamp",
        TIMESTAMPTZ => "timestamptz",
        INTERVAL => "interval",
        TIMETZ => "timetz",
        BIT => "bit",
        VARBIT => "varbit",
        NUMERIC => "numeric",
        VOID => "void",
        UUID => "uuid",
        UUID_ARRAY => "uuid[]",
        JSONB => "jsonb",
        JSONB_ARRAY => "jsonb[]",
        _ => return None,
    })
}

/// Display name for any OID; unknown ones render as `oid:<n>`.
pub fn type_name(type_oid: u32) -> Cow<'static, str> {
    match known_type_name(type_oid) {
        Some(name) => Cow::Borrowed(name),
        None => Cow::Owned(format!("oid:{type_oid}")),
    }
}
