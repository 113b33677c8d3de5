//! PostgreSQL wire protocol v3 messages.
//!
//! Backend frames are `{type: u8}{length: i32 BE, includes itself}{payload}`.
//! The startup packet and SSLRequest have no type byte.

pub mod reader;
pub mod writer;

pub use reader::MessageReader;
pub use writer::MessageWriter;

use dbwire_core::{Error, Result};

/// Protocol version 3.0 (`196608`).
pub const PROTOCOL_VERSION: i32 = 196_608;

/// Magic version number of an SSLRequest.
pub const SSL_REQUEST_CODE: i32 = 80_877_103;

/// Largest frame accepted from the server.
pub const MAX_FRAME_LEN: usize = 1 << 30;

/// Frontend message type bytes.
pub mod frontend_type {
    pub const PASSWORD: u8 = b'p';
    pub const QUERY: u8 = b'Q';
    pub const TERMINATE: u8 = b'X';
}

/// Backend message type bytes.
pub mod backend_type {
    pub const AUTHENTICATION: u8 = b'R';
    pub const BACKEND_KEY_DATA: u8 = b'K';
    pub const COMMAND_COMPLETE: u8 = b'C';
    pub const DATA_ROW: u8 = b'D';
    pub const EMPTY_QUERY: u8 = b'I';
    pub const ERROR_RESPONSE: u8 = b'E';
    pub const NOTICE_RESPONSE: u8 = b'N';
    pub const PARAMETER_STATUS: u8 = b'S';
    pub const READY_FOR_QUERY: u8 = b'Z';
    pub const ROW_DESCRIPTION: u8 = b'T';
}

/// Messages the client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage {
    Startup {
        version: i32,
        params: Vec<(String, String)>,
    },
    SSLRequest,
    PasswordMessage(String),
    SASLInitialResponse {
        mechanism: String,
        data: Vec<u8>,
    },
    SASLResponse(Vec<u8>),
    Query(String),
    Terminate,
}

/// One length-delimited backend frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u8,
    pub payload: Vec<u8>,
}

/// Authentication request codes carried by an `'R'` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRequest {
    /// 0
    Ok,
    /// 3
    CleartextPassword,
    /// 5, with the 4-byte salt
    Md5Password([u8; 4]),
    /// 10, with the offered mechanisms
    Sasl(Vec<String>),
    /// 11, server-first message
    SaslContinue(Vec<u8>),
    /// 12, server-final message
    SaslFinal(Vec<u8>),
    /// Any other code (Kerberos, GSS, SSPI, ...)
    Unsupported(i32),
}

/// Field description from a RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: u32,
    pub column_id: i16,
    pub type_oid: u32,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: i16,
}

/// Tagged fields of an ErrorResponse or NoticeResponse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// `S`
    pub severity: String,
    /// `C`
    pub code: String,
    /// `M`
    pub message: String,
    /// `D`
    pub detail: Option<String>,
    /// `H`
    pub hint: Option<String>,
}

impl ErrorFields {
    pub fn into_error(self) -> Error {
        let kind = dbwire_core::error::QueryErrorKind::from_sqlstate(&self.code);
        Error::Query(dbwire_core::error::QueryError {
            kind,
            sql: None,
            sqlstate: (!self.code.is_empty()).then_some(self.code),
            code: None,
            message: self.message,
            detail: self.detail,
            hint: self.hint,
        })
    }
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    Authentication(AuthRequest),
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: i32, secret_key: i32 },
    ReadyForQuery(u8),
    RowDescription(Vec<FieldDescription>),
    /// Column values in text format; `None` is SQL NULL
    DataRow(Vec<Option<Vec<u8>>>),
    CommandComplete(String),
    EmptyQueryResponse,
    ErrorResponse(ErrorFields),
    NoticeResponse(ErrorFields),
    /// A frame this client does not interpret
    Other(u8),
}

impl BackendMessage {
    /// Interpret one frame.
    pub fn parse(frame: &Frame) -> Result<Self> {
        let mut p = Payload::new(&frame.payload);
        let msg = match frame.tag {
            backend_type::AUTHENTICATION => BackendMessage::Authentication(parse_auth(&mut p)?),
            backend_type::PARAMETER_STATUS => BackendMessage::ParameterStatus {
                name: p.cstr()?,
                value: p.cstr()?,
            },
            backend_type::BACKEND_KEY_DATA => BackendMessage::BackendKeyData {
                process_id: p.i32()?,
                secret_key: p.i32()?,
            },
            backend_type::READY_FOR_QUERY => BackendMessage::ReadyForQuery(p.u8()?),
            backend_type::ROW_DESCRIPTION => {
                let count = p.i16()?;
                let mut fields = Vec::with_capacity(count.max(0) as usize);
                for _ in 0..count {
                    fields.push(FieldDescription {
                        name: p.cstr()?,
                        table_oid: p.u32()?,
                        column_id: p.i16()?,
                        type_oid: p.u32()?,
                        type_size: p.i16()?,
                        type_modifier: p.i32()?,
                        format: p.i16()?,
                    });
                }
                BackendMessage::RowDescription(fields)
            }
            backend_type::DATA_ROW => {
                let count = p.i16()?;
                let mut values = Vec::with_capacity(count.max(0) as usize);
                for _ in 0..count {
                    let len = p.i32()?;
                    if len < 0 {
                        values.push(None);
                    } else {
                        values.push(Some(p.bytes(len as usize)?.to_vec()));
                    }
                }
                BackendMessage::DataRow(values)
            }
            backend_type::COMMAND_COMPLETE => BackendMessage::CommandComplete(p.cstr()?),
            backend_type::EMPTY_QUERY => BackendMessage::EmptyQueryResponse,
            backend_type::ERROR_RESPONSE => BackendMessage::ErrorResponse(parse_fields(&mut p)?),
            backend_type::NOTICE_RESPONSE => BackendMessage::NoticeResponse(parse_fields(&mut p)?),
            other => BackendMessage::Other(other),
        };
        Ok(msg)
    }
}

fn parse_auth(p: &mut Payload<'_>) -> Result<AuthRequest> {
    let code = p.i32()?;
    Ok(match code {
        0 => AuthRequest::Ok,
        3 => AuthRequest::CleartextPassword,
        5 => {
            let salt = p.bytes(4)?;
            AuthRequest::Md5Password([salt[0], salt[1], salt[2], salt[3]])
        }
        10 => {
            let mut mechanisms = Vec::new();
            loop {
                let name = p.cstr()?;
                if name.is_empty() {
                    break;
                }
                mechanisms.push(name);
            }
            AuthRequest::Sasl(mechanisms)
        }
        11 => AuthRequest::SaslContinue(p.rest().to_vec()),
        12 => AuthRequest::SaslFinal(p.rest().to_vec()),
        other => AuthRequest::Unsupported(other),
    })
}

fn parse_fields(p: &mut Payload<'_>) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    loop {
        let key = p.u8()?;
        if key == 0 {
            break;
        }
        let value = p.cstr()?;
        match key {
            b'S' => fields.severity = value,
            b'C' => fields.code = value,
            b'M' => fields.message = value,
            b'D' => fields.detail = Some(value),
            b'H' => fields.hint = Some(value),
            // Localised severity, position, where, file, line, routine, ...
            _ => {}
        }
    }
    Ok(fields)
}

/// Cursor over a frame payload. Running off the end is a protocol error.
struct Payload<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Payload<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| Error::protocol("truncated PostgreSQL message"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn i16(&mut self) -> Result<i16> {
        let b = self.bytes(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Result<i32> {
        let b = self.bytes(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn cstr(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::protocol("unterminated string in PostgreSQL message"))?;
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8, payload: &[u8]) -> Frame {
        Frame {
            tag,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_parse_auth_requests() {
        let md5 = BackendMessage::parse(&frame(b'R', &[0, 0, 0, 5, 1, 2, 3, 4])).unwrap();
        assert_eq!(
            md5,
            BackendMessage::Authentication(AuthRequest::Md5Password([1, 2, 3, 4]))
        );

        let sasl = BackendMessage::parse(&frame(
            b'R',
            b"\x00\x00\x00\x0aSCRAM-SHA-256-PLUS\x00SCRAM-SHA-256\x00\x00",
        ))
        .unwrap();
        assert_eq!(
            sasl,
            BackendMessage::Authentication(AuthRequest::Sasl(vec![
                "SCRAM-SHA-256-PLUS".into(),
                "SCRAM-SHA-256".into()
            ]))
        );

        let gss = BackendMessage::parse(&frame(b'R', &[0, 0, 0, 7])).unwrap();
        assert_eq!(gss, BackendMessage::Authentication(AuthRequest::Unsupported(7)));
    }

    #[test]
    fn test_parse_data_row_with_null() {
        let mut payload = vec![0, 2];
        payload.extend_from_slice(&2i32.to_be_bytes());
        payload.extend_from_slice(b"42");
        payload.extend_from_slice(&(-1i32).to_be_bytes());
        let msg = BackendMessage::parse(&frame(b'D', &payload)).unwrap();
        assert_eq!(msg, BackendMessage::DataRow(vec![Some(b"42".to_vec()), None]));
    }

    #[test]
    fn test_parse_error_fields() {
        let payload = b"SERROR\0VERROR\0C42P01\0Mrelation \"nope\" does not exist\0P15\0\0";
        let BackendMessage::ErrorResponse(fields) =
            BackendMessage::parse(&frame(b'E', payload)).unwrap()
        else {
            panic!("expected ErrorResponse");
        };
        assert_eq!(fields.severity, "ERROR");
        assert_eq!(fields.code, "42P01");
        assert_eq!(fields.message, "relation \"nope\" does not exist");

        let err = fields.into_error();
        assert_eq!(err.sqlstate(), Some("42P01"));
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_truncated_payload_is_protocol_error() {
        let err = BackendMessage::parse(&frame(b'K', &[0, 0, 0, 1])).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_unknown_tag_is_other() {
        let msg = BackendMessage::parse(&frame(b'A', b"whatever")).unwrap();
        assert_eq!(msg, BackendMessage::Other(b'A'));
    }
}
