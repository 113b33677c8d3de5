//! PostgreSQL message encoder.
//!
//! All multi-byte integers are big-endian; every length field counts itself.

use super::{FrontendMessage, SSL_REQUEST_CODE, frontend_type};

/// Buffer for writing frontend messages.
#[derive(Debug, Clone)]
pub struct MessageWriter {
    buf: Vec<u8>,
}

impl Default for MessageWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
        }
    }

    /// Encode `msg`, replacing whatever the buffer held.
    pub fn write(&mut self, msg: &FrontendMessage) -> &[u8] {
        self.buf.clear();

        match msg {
            FrontendMessage::Startup { version, params } => self.write_startup(*version, params),
            FrontendMessage::SSLRequest => self.write_ssl_request(),
            FrontendMessage::PasswordMessage(password) => {
                self.write_string_message(frontend_type::PASSWORD, password);
            }
            FrontendMessage::SASLInitialResponse { mechanism, data } => {
                self.write_sasl_initial(mechanism, data);
            }
            FrontendMessage::SASLResponse(data) => self.write_sasl_response(data),
            FrontendMessage::Query(sql) => self.write_string_message(frontend_type::QUERY, sql),
            FrontendMessage::Terminate => {
                self.buf.push(frontend_type::TERMINATE);
                self.buf.extend_from_slice(&4_i32.to_be_bytes());
            }
        }

        &self.buf
    }

    /// Startup packet: no type byte, then version and `key\0value\0` pairs.
    fn write_startup(&mut self, version: i32, params: &[(String, String)]) {
        let mut body_len = 4;
        for (key, value) in params {
            body_len += key.len() + 1 + value.len() + 1;
        }
        body_len += 1;

        self.buf
            .extend_from_slice(&((body_len + 4) as i32).to_be_bytes());
        self.buf.extend_from_slice(&version.to_be_bytes());
        for (key, value) in params {
            self.buf.extend_from_slice(key.as_bytes());
            self.buf.push(0);
            self.buf.extend_from_slice(value.as_bytes());
            self.buf.push(0);
        }
        self.buf.push(0);
    }

    fn write_ssl_request(&mut self) {
        self.buf.extend_from_slice(&8_i32.to_be_bytes());
        self.buf.extend_from_slice(&SSL_REQUEST_CODE.to_be_bytes());
    }

    fn write_sasl_initial(&mut self, mechanism: &str, data: &[u8]) {
        self.buf.push(frontend_type::PASSWORD);

        let body_len = mechanism.len() + 1 + 4 + data.len();
        self.buf
            .extend_from_slice(&((body_len + 4) as i32).to_be_bytes());
        self.buf.extend_from_slice(mechanism.as_bytes());
        self.buf.push(0);

        // -1 means "no initial response"
        if data.is_empty() {
            self.buf.extend_from_slice(&(-1_i32).to_be_bytes());
        } else {
            self.buf
                .extend_from_slice(&(data.len() as i32).to_be_bytes());
            self.buf.extend_from_slice(data);
        }
    }

    fn write_sasl_response(&mut self, data: &[u8]) {
        self.buf.push(frontend_type::PASSWORD);
        self.buf
            .extend_from_slice(&((data.len() + 4) as i32).to_be_bytes());
        self.buf.extend_from_slice(data);
    }

    /// Type byte, length, NUL-terminated string.
    fn write_string_message(&mut self, type_byte: u8, s: &str) {
        self.buf.push(type_byte);
        self.buf
            .extend_from_slice(&((s.len() + 5) as i32).to_be_bytes());
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PROTOCOL_VERSION;

    #[test]
    fn test_startup_message() {
        let mut writer = MessageWriter::new();
        let data = writer
            .write(&FrontendMessage::Startup {
                version: PROTOCOL_VERSION,
                params: vec![
                    ("user".to_string(), "postgres".to_string()),
                    ("database".to_string(), "test".to_string()),
                ],
            })
            .to_vec();

        let len = i32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        assert_eq!(len, data.len());
        assert_eq!(&data[4..8], &196_608_i32.to_be_bytes());
        assert_eq!(&data[8..], b"user\0postgres\0database\0test\0\0");
    }

    #[test]
    fn test_query_message() {
        let mut writer = MessageWriter::new();
        let data = writer.write(&FrontendMessage::Query("SELECT 1".to_string()));

        assert_eq!(data[0], b'Q');
        let len = i32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize;
        assert_eq!(len, 4 + 8 + 1);
        assert_eq!(data[len], 0);
    }

    #[test]
    fn test_terminate_and_ssl_request() {
        let mut writer = MessageWriter::new();
        assert_eq!(writer.write(&FrontendMessage::Terminate), &[b'X', 0, 0, 0, 4]);
        assert_eq!(
            writer.write(&FrontendMessage::SSLRequest),
            &[0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f]
        );
    }

    #[test]
    fn test_sasl_initial_response() {
        let mut writer = MessageWriter::new();
        let data = writer.write(&FrontendMessage::SASLInitialResponse {
            mechanism: "SCRAM-SHA-256".to_string(),
            data: b"n,,n=user,r=abc".to_vec(),
        });

        assert_eq!(data[0], b'p');
        let len = i32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize;
        assert_eq!(len + 1, data.len());
        assert_eq!(&data[5..19], b"SCRAM-SHA-256\0");
        assert_eq!(&data[19..23], &15_i32.to_be_bytes());
        assert_eq!(&data[23..], b"n,,n=user,r=abc");
    }
}
