//! Connection-phase packets: the server greeting, the client's
//! `HandshakeResponse41` and `SSLRequest`, and auth-switch requests.

use dbwire_core::{Error, Result};

use crate::auth::plugins;
use crate::protocol::{CLIENT_MAX_PACKET, PacketReader, PacketWriter, capabilities, charset};

/// Parsed `HandshakeV10` greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// Both auth-plugin-data parts joined, trailing NUL removed
    pub scramble: Vec<u8>,
    pub capabilities: u32,
    pub charset: u8,
    pub status_flags: u16,
    pub auth_plugin: String,
}

impl Handshake {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let missing = |field: &str| Error::protocol(format!("handshake missing {field}"));

        let protocol_version = reader.read_u8().ok_or_else(|| missing("protocol version"))?;
        if protocol_version != 10 {
            return Err(Error::protocol(format!(
                "unsupported handshake protocol version {protocol_version}"
            )));
        }
        let server_version = reader
            .read_null_string()
            .ok_or_else(|| missing("server version"))?;
        let connection_id = reader
            .read_u32_le()
            .ok_or_else(|| missing("connection id"))?;
        let auth_data_1 = reader.read_bytes(8).ok_or_else(|| missing("auth data"))?;
        reader.skip(1);

        let caps_lower = reader
            .read_u16_le()
            .ok_or_else(|| missing("capability flags"))?;
        let charset = reader.read_u8().unwrap_or(charset::UTF8MB4_GENERAL_CI);
        let status_flags = reader.read_u16_le().unwrap_or(0);
        let caps_upper = reader.read_u16_le().unwrap_or(0);
        let capabilities = u32::from(caps_lower) | (u32::from(caps_upper) << 16);

        let auth_data_len = usize::from(reader.read_u8().unwrap_or(0));
        reader.skip(10);

        let mut scramble = auth_data_1.to_vec();
        if capabilities & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            let len2 = auth_data_len
                .saturating_sub(8)
                .max(13)
                .min(reader.remaining());
            let part2 = reader.read_bytes(len2).unwrap_or_default();
            scramble.extend_from_slice(part2.strip_suffix(&[0]).unwrap_or(part2));
        }

        let auth_plugin = if capabilities & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            reader.read_null_string().unwrap_or_default()
        } else {
            plugins::MYSQL_NATIVE_PASSWORD.to_string()
        };

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            scramble,
            capabilities,
            charset,
            status_flags,
            auth_plugin,
        })
    }

    pub fn supports(&self, flag: u32) -> bool {
        self.capabilities & flag != 0
    }
}

/// The `HandshakeResponse41` packet payload.
#[derive(Debug, Clone)]
pub struct HandshakeResponse<'a> {
    pub capabilities: u32,
    pub username: &'a str,
    pub auth_response: &'a [u8],
    pub database: Option<&'a str>,
    pub auth_plugin: &'a str,
}

impl HandshakeResponse<'_> {
    /// Fails when the auth response does not fit its one-byte length prefix.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let auth_len = u8::try_from(self.auth_response.len()).map_err(|_| {
            Error::auth(format!(
                "{} response of {} bytes exceeds the 255-byte handshake limit",
                self.auth_plugin,
                self.auth_response.len()
            ))
        })?;

        let mut writer = PacketWriter::new();
        write_login_prefix(&mut writer, self.capabilities);

        writer.write_null_string(self.username);
        writer.write_u8(auth_len);
        writer.write_bytes(self.auth_response);

        if self.capabilities & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
            writer.write_null_string(self.database.unwrap_or_default());
        }
        if self.capabilities & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            writer.write_null_string(self.auth_plugin);
        }
        Ok(writer.into_bytes())
    }
}

/// The 32-byte `SSLRequest` payload: the login prefix with `CLIENT_SSL` set.
pub fn ssl_request(capabilities: u32) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(32);
    write_login_prefix(&mut writer, capabilities | capabilities::CLIENT_SSL);
    writer.into_bytes()
}

/// Capability flags, max packet size, character set, 23 reserved bytes.
fn write_login_prefix(writer: &mut PacketWriter, capabilities: u32) {
    writer.write_u32_le(capabilities);
    writer.write_u32_le(CLIENT_MAX_PACKET);
    writer.write_u8(charset::UTF8MB4_GENERAL_CI);
    writer.write_zeros(23);
}

/// `AuthSwitchRequest`: `0xFE`, plugin name, new scramble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSwitch {
    pub plugin: String,
    pub scramble: Vec<u8>,
}

impl AuthSwitch {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        reader.skip(1);
        if reader.is_empty() {
            return Err(Error::protocol("auth switch request without plugin name"));
        }
        let plugin = reader.read_null_string().unwrap_or_default();
        let data = reader.read_rest();
        Ok(Self {
            plugin,
            scramble: data.strip_suffix(&[0]).unwrap_or(data).to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greeting(plugin: &str, caps: u32) -> Vec<u8> {
        let mut w = PacketWriter::new();
        w.write_u8(10);
        w.write_null_string("8.0.36");
        w.write_u32_le(42);
        w.write_bytes(b"abcdefgh");
        w.write_u8(0);
        w.write_u16_le((caps & 0xFFFF) as u16);
        w.write_u8(255);
        w.write_u16_le(2);
        w.write_u16_le((caps >> 16) as u16);
        w.write_u8(21);
        w.write_zeros(10);
        w.write_bytes(b"ijklmnopqrst\0");
        w.write_null_string(plugin);
        w.into_bytes()
    }

    const SERVER_CAPS: u32 = capabilities::DEFAULT_CLIENT_FLAGS
        | capabilities::CLIENT_CONNECT_WITH_DB
        | capabilities::CLIENT_SSL;

    #[test]
    fn test_parse_greeting() {
        let handshake = Handshake::parse(&greeting("caching_sha2_password", SERVER_CAPS)).unwrap();
        assert_eq!(handshake.server_version, "8.0.36");
        assert_eq!(handshake.connection_id, 42);
        assert_eq!(handshake.scramble, b"abcdefghijklmnopqrst");
        assert_eq!(handshake.capabilities, SERVER_CAPS);
        assert_eq!(handshake.status_flags, 2);
        assert_eq!(handshake.auth_plugin, "caching_sha2_password");
        assert!(handshake.supports(capabilities::CLIENT_SSL));
    }

    #[test]
    fn test_parse_greeting_rejects_old_protocol() {
        let mut payload = greeting("mysql_native_password", SERVER_CAPS);
        payload[0] = 9;
        assert!(Handshake::parse(&payload).is_err());
        assert!(Handshake::parse(&[10, b'8', 0]).is_err());
    }

    #[test]
    fn test_handshake_response_layout() {
        let response = HandshakeResponse {
            capabilities: capabilities::DEFAULT_CLIENT_FLAGS | capabilities::CLIENT_CONNECT_WITH_DB,
            username: "root",
            auth_response: &[0xAA, 0xBB],
            database: Some("app"),
            auth_plugin: "mysql_native_password",
        }
        .encode()
        .unwrap();

        assert_eq!(
            &response[..4],
            &(capabilities::DEFAULT_CLIENT_FLAGS | capabilities::CLIENT_CONNECT_WITH_DB)
                .to_le_bytes()
        );
        assert_eq!(&response[4..8], &CLIENT_MAX_PACKET.to_le_bytes());
        assert_eq!(response[8], charset::UTF8MB4_GENERAL_CI);
        assert!(response[9..32].iter().all(|&b| b == 0));
        assert_eq!(
            &response[32..],
            b"root\0\x02\xAA\xBBapp\0mysql_native_password\0"
        );
    }

    #[test]
    fn test_handshake_response_rejects_oversized_auth_data() {
        let long = vec![b'x'; 300];
        let response = HandshakeResponse {
            capabilities: capabilities::DEFAULT_CLIENT_FLAGS,
            username: "root",
            auth_response: &long,
            database: None,
            auth_plugin: "mysql_clear_password",
        };
        let err = response.encode().unwrap_err();
        assert!(err.is_auth_error(), "{err}");
        assert!(err.to_string().contains("300 bytes"), "{err}");

        let fits = HandshakeResponse {
            auth_response: &long[..255],
            ..response
        };
        let bytes = fits.encode().unwrap();
        assert_eq!(bytes[32 + "root\0".len()], 255);
    }

    #[test]
    fn test_ssl_request() {
        let request = ssl_request(capabilities::DEFAULT_CLIENT_FLAGS);
        assert_eq!(request.len(), 32);
        let flags = u32::from_le_bytes([request[0], request[1], request[2], request[3]]);
        assert_ne!(flags & capabilities::CLIENT_SSL, 0);
    }

    #[test]
    fn test_auth_switch() {
        let mut payload = vec![0xFE];
        payload.extend_from_slice(b"mysql_native_password\0");
        payload.extend_from_slice(b"01234567890123456789\0");
        let switch = AuthSwitch::parse(&payload).unwrap();
        assert_eq!(switch.plugin, "mysql_native_password");
        assert_eq!(switch.scramble, b"01234567890123456789");

        assert!(AuthSwitch::parse(&[0xFE]).is_err());
    }
}
