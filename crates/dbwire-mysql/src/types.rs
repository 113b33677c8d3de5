//! MySQL field types as reported in column definitions.

use dbwire_core::ColumnInfo;
use dbwire_core::{Error, Result};

use crate::protocol::{PacketReader, charset};

/// MySQL field type codes (`MYSQL_TYPE_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    NewDate = 0x0E,
    VarChar = 0x0F,
    Bit = 0x10,
    Timestamp2 = 0x11,
    DateTime2 = 0x12,
    Time2 = 0x13,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    VarString = 0xFD,
    String = 0xFE,
    Geometry = 0xFF,
}

impl FieldType {
    /// Unknown codes are treated as strings.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A => FieldType::Date,
            0x0B => FieldType::Time,
            0x0C => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0E => FieldType::NewDate,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0x11 => FieldType::Timestamp2,
            0x12 => FieldType::DateTime2,
            0x13 => FieldType::Time2,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFF => FieldType::Geometry,
            _ => FieldType::String,
        }
    }

    pub const fn is_blob(self) -> bool {
        matches!(
            self,
            FieldType::TinyBlob | FieldType::MediumBlob | FieldType::LongBlob | FieldType::Blob
        )
    }

    /// SQL-facing type name.
    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Decimal | FieldType::NewDecimal => "DECIMAL",
            FieldType::Tiny => "TINYINT",
            FieldType::Short => "SMALLINT",
            FieldType::Long => "INT",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
            FieldType::Null => "NULL",
            FieldType::Timestamp | FieldType::Timestamp2 => "TIMESTAMP",
            FieldType::LongLong => "BIGINT",
            FieldType::Int24 => "MEDIUMINT",
            FieldType::Date | FieldType::NewDate => "DATE",
            FieldType::Time | FieldType::Time2 => "TIME",
            FieldType::DateTime | FieldType::DateTime2 => "DATETIME",
            FieldType::Year => "YEAR",
            FieldType::VarChar | FieldType::VarString => "VARCHAR",
            FieldType::Bit => "BIT",
            FieldType::Json => "JSON",
            FieldType::Enum => "ENUM",
            FieldType::Set => "SET",
            FieldType::TinyBlob => "TINYBLOB",
            FieldType::MediumBlob => "MEDIUMBLOB",
            FieldType::LongBlob => "LONGBLOB",
            FieldType::Blob => "BLOB",
            FieldType::String => "CHAR",
            FieldType::Geometry => "GEOMETRY",
        }
    }

    /// Type name taking the column charset into account: the server reports
    /// TEXT columns as blobs with a non-binary charset.
    pub const fn display_name(self, charset_id: u16) -> &'static str {
        if charset_id == charset::BINARY || !self.is_blob() {
            return self.name();
        }
        match self {
            FieldType::TinyBlob => "TINYTEXT",
            FieldType::MediumBlob => "MEDIUMTEXT",
            FieldType::LongBlob => "LONGTEXT",
            _ => "TEXT",
        }
    }
}

/// Column definition (`ColumnDefinition41`) from a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub charset: u16,
    pub column_length: u32,
    pub column_type: FieldType,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDef {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let missing = |field: &str| Error::protocol(format!("column definition missing {field}"));

        let _catalog = reader.read_lenenc_string().ok_or_else(|| missing("catalog"))?;
        let schema = reader.read_lenenc_string().ok_or_else(|| missing("schema"))?;
        let table = reader.read_lenenc_string().ok_or_else(|| missing("table"))?;
        let _org_table = reader.read_lenenc_string().ok_or_else(|| missing("org_table"))?;
        let name = reader.read_lenenc_string().ok_or_else(|| missing("name"))?;
        let _org_name = reader.read_lenenc_string().ok_or_else(|| missing("org_name"))?;
        let _fixed_len = reader.read_lenenc_int();

        let charset = reader.read_u16_le().ok_or_else(|| missing("charset"))?;
        let column_length = reader.read_u32_le().ok_or_else(|| missing("column length"))?;
        let column_type = FieldType::from_u8(reader.read_u8().ok_or_else(|| missing("type"))?);
        let flags = reader.read_u16_le().ok_or_else(|| missing("flags"))?;
        let decimals = reader.read_u8().ok_or_else(|| missing("decimals"))?;

        Ok(Self {
            schema,
            table,
            name,
            charset,
            column_length,
            column_type,
            flags,
            decimals,
        })
    }

    pub fn to_column_info(&self) -> ColumnInfo {
        ColumnInfo::new(self.name.clone(), self.column_type.display_name(self.charset))
    }
}

#[cfg(test)]
pub(crate) fn column_definition(name: &str, column_type: u8, charset_id: u16) -> Vec<u8> {
    use crate::protocol::PacketWriter;

    let mut w = PacketWriter::new();
    w.write_lenenc_string("def");
    w.write_lenenc_string("app");
    w.write_lenenc_string("users");
    w.write_lenenc_string("users");
    w.write_lenenc_string(name);
    w.write_lenenc_string(name);
    w.write_lenenc_int(0x0c);
    w.write_u16_le(charset_id);
    w.write_u32_le(255);
    w.write_u8(column_type);
    w.write_u16_le(0);
    w.write_u8(0);
    w.write_zeros(2);
    w.into_bytes()
}
