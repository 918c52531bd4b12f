//! Transport client: address parsing, connection handshake and frame reading.

use std::fmt;
use std::io::{self, BufReader};
use std::net::{Ipv6Addr, Shutdown, TcpStream, ToSocketAddrs};

use radio_proto::{
    Capabilities, FrameKind, Obfuscated, PlayRequest, RawFrame, TrackHeader, decode_json,
    decode_playlist_list, decode_track_start, encode_json, read_frame, read_prelude, write_frame,
    write_prelude,
};
use radio_types::{DEFAULT_PORT, EncoderKind, Settings};

use crate::config::EngineConfig;
use crate::error::TransportError;

const SCHEMES: [&str; 2] = ["lonelyradio", "tcp"];

/// A parsed `[scheme://]host[:port]` server address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn parse(input: &str) -> Result<Self, TransportError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(TransportError::invalid(input, "empty address"));
        }

        let rest = match raw.split_once("://") {
            Some((scheme, rest)) => {
                if !SCHEMES.iter().any(|s| s.eq_ignore_ascii_case(scheme)) {
                    return Err(TransportError::invalid(
                        input,
                        format!("unsupported scheme {scheme:?}"),
                    ));
                }
                rest
            }
            None => raw,
        };
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        if rest.contains('/') {
            return Err(TransportError::invalid(input, "paths are not supported"));
        }

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| TransportError::invalid(input, "unterminated IPv6 literal"))?;
            if host.parse::<Ipv6Addr>().is_err() {
                return Err(TransportError::invalid(input, "bad IPv6 literal"));
            }
            let port = match tail {
                "" => None,
                t => Some(t.strip_prefix(':').ok_or_else(|| {
                    TransportError::invalid(input, "unexpected text after IPv6 literal")
                })?),
            };
            (host, port)
        } else if rest.matches(':').count() > 1 {
            // Bare IPv6 literal; a port requires brackets.
            if rest.parse::<Ipv6Addr>().is_err() {
                return Err(TransportError::invalid(input, "bad IPv6 literal"));
            }
            (rest, None)
        } else {
            match rest.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(TransportError::invalid(input, "missing host"));
        }
        if !host.contains(':')
            && !host
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
        {
            return Err(TransportError::invalid(input, "invalid host name"));
        }

        let port = match port {
            None => DEFAULT_PORT,
            Some(p) => match p.parse::<u16>() {
                Ok(port) if port != 0 => port,
                _ => return Err(TransportError::invalid(input, format!("invalid port {p:?}"))),
            },
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// One server → client message.
#[derive(Debug)]
pub enum ServerMessage {
    TrackStart { header: TrackHeader, cover: Vec<u8> },
    Fragment(Vec<u8>),
    /// A frame kind this client does not understand; already drained.
    Unknown(u8),
}

/// An open, handshaken connection.
pub struct Connection {
    address: ServerAddress,
    stream: TcpStream,
    reader: Obfuscated<BufReader<TcpStream>>,
    writer: Obfuscated<TcpStream>,
    capabilities: Capabilities,
}

impl Connection {
    /// Connect, exchange preludes and read the server's capabilities.
    pub fn open(address: &ServerAddress, config: &EngineConfig) -> Result<Self, TransportError> {
        let stream = connect(address, config)?;
        Self::handshake(address, stream, config)
    }

    /// Exchange preludes over an already connected socket and read the server's
    /// capabilities. Shutting down a clone of `stream` aborts a stalled handshake.
    pub fn handshake(
        address: &ServerAddress,
        stream: TcpStream,
        config: &EngineConfig,
    ) -> Result<Self, TransportError> {
        let dropped = |e: io::Error| TransportError::dropped(format!("handshake: {e}"));

        stream.set_nodelay(true).map_err(dropped)?;
        stream
            .set_read_timeout(Some(config.handshake_timeout()))
            .map_err(dropped)?;
        stream
            .set_write_timeout(Some(config.handshake_timeout()))
            .map_err(dropped)?;

        write_prelude(&stream).map_err(dropped)?;
        let mut raw_reader = BufReader::new(stream.try_clone().map_err(dropped)?);
        read_prelude(&mut raw_reader).map_err(dropped)?;

        let key = config.key_bytes();
        let mut reader = Obfuscated::new(raw_reader, key.clone());
        let writer = Obfuscated::new(stream.try_clone().map_err(dropped)?, key);

        let frame = read_frame(&mut reader).map_err(dropped)?;
        let capabilities: Capabilities = match frame.kind() {
            Some(FrameKind::Capabilities) => decode_json(&frame.payload).map_err(dropped)?,
            Some(FrameKind::Error) => return Err(server_error(&frame)),
            _ => {
                return Err(TransportError::dropped(format!(
                    "expected capabilities, got frame kind {:#04x}",
                    frame.kind
                )));
            }
        };
        tracing::debug!(server = %address, encoders = ?capabilities.encoders, "handshake complete");

        Ok(Self {
            address: address.clone(),
            stream,
            reader,
            writer,
            capabilities,
        })
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Ask the server to start streaming. Returns the settings actually in effect.
    ///
    /// Falls back to PCM16 when the server does not offer the requested encoder.
    pub fn request_play(
        &mut self,
        settings: Settings,
        playlist: Option<&str>,
    ) -> Result<Settings, TransportError> {
        let mut effective = settings;
        if !self.capabilities.supports(settings.encoder) {
            tracing::warn!(
                requested = settings.encoder.label(),
                server = %self.address,
                "encoder not offered by server, falling back to pcm16"
            );
            effective.encoder = EncoderKind::Pcm16;
        }

        let payload = encode_json(&PlayRequest::new(effective, playlist)).map_err(TransportError::dropped)?;
        write_frame(&mut self.writer, FrameKind::PlayRequest, &payload)
            .map_err(TransportError::dropped)?;

        // Radio streams may idle between tracks; stop() shuts the socket down instead.
        self.stream
            .set_read_timeout(None)
            .map_err(TransportError::dropped)?;
        Ok(effective)
    }

    /// One-shot playlist query. Returns the raw lines sent by the server.
    pub fn request_playlists(&mut self) -> Result<Vec<String>, TransportError> {
        write_frame(&mut self.writer, FrameKind::ListPlaylists, &[])
            .map_err(TransportError::dropped)?;
        loop {
            let frame = read_frame(&mut self.reader).map_err(TransportError::dropped)?;
            match frame.kind() {
                Some(FrameKind::PlaylistList) => return Ok(decode_playlist_list(&frame.payload)),
                Some(FrameKind::Error) => return Err(server_error(&frame)),
                _ => tracing::debug!(kind = frame.kind, "ignoring frame while listing playlists"),
            }
        }
    }

    /// Block for the next streaming message.
    pub fn next_message(&mut self) -> Result<ServerMessage, TransportError> {
        let frame = read_frame(&mut self.reader).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => TransportError::dropped("server closed the connection"),
            _ => TransportError::dropped(e),
        })?;
        match frame.kind() {
            Some(FrameKind::TrackStart) => {
                let (header, cover) =
                    decode_track_start(&frame.payload).map_err(TransportError::dropped)?;
                Ok(ServerMessage::TrackStart { header, cover })
            }
            Some(FrameKind::Fragment) => Ok(ServerMessage::Fragment(frame.payload)),
            Some(FrameKind::Error) => Err(server_error(&frame)),
            _ => Ok(ServerMessage::Unknown(frame.kind)),
        }
    }

    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

fn server_error(frame: &RawFrame) -> TransportError {
    TransportError::dropped(format!(
        "server error: {}",
        String::from_utf8_lossy(&frame.payload)
    ))
}

/// Open a TCP connection, trying every resolved address in turn.
pub fn connect(address: &ServerAddress, config: &EngineConfig) -> Result<TcpStream, TransportError> {
    let unreachable = |source: io::Error| TransportError::Unreachable {
        address: address.to_string(),
        source,
    };
    let addrs: Vec<_> = (address.host.as_str(), address.port)
        .to_socket_addrs()
        .map_err(unreachable)?
        .collect();

    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses");
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, config.connect_timeout()) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!(%addr, error = %e, "connect attempt failed");
                last_err = e;
            }
        }
    }
    Err(unreachable(last_err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn parse(s: &str) -> ServerAddress {
        ServerAddress::parse(s).unwrap()
    }

    #[test]
    fn parse_defaults_port() {
        assert_eq!(
            parse("radio.example.org"),
            ServerAddress {
                host: "radio.example.org".into(),
                port: DEFAULT_PORT
            }
        );
    }

    #[test]
    fn parse_accepts_scheme_and_port() {
        let addr = parse("lonelyradio://127.0.0.1:6000/");
        assert_eq!(addr.host, "127.0.0.1");
        assert_eq!(addr.port, 6000);
        assert_eq!(parse("TCP://host").port, DEFAULT_PORT);
    }

    #[test]
    fn parse_handles_ipv6() {
        let addr = parse("[::1]:7000");
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.port, 7000);
        assert_eq!(addr.to_string(), "[::1]:7000");
        assert_eq!(parse("::1").port, DEFAULT_PORT);
        assert_eq!(parse("[fe80::1]").host, "fe80::1");
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in [
            "",
            "   ",
            "http://host",
            "host:0",
            "host:99999",
            "host:abc",
            ":5894",
            "host/path",
            "[::1",
            "[nothost]:1",
            "bad host",
        ] {
            assert!(
                matches!(
                    ServerAddress::parse(bad),
                    Err(TransportError::InvalidAddress { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn connect_refused_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let addr = ServerAddress {
            host: "127.0.0.1".into(),
            port,
        };
        let err = Connection::open(&addr, &EngineConfig::default()).err().unwrap();
        assert!(matches!(err, TransportError::Unreachable { .. }));
    }

    #[test]
    fn bad_server_prelude_drops_session() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            use std::io::Write;
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(b"HTTP/1.1 400\r\n").unwrap();
        });

        let addr = ServerAddress {
            host: "127.0.0.1".into(),
            port,
        };
        let err = Connection::open(&addr, &EngineConfig::default()).err().unwrap();
        assert!(matches!(err, TransportError::Dropped(_)));
        server.join().unwrap();
    }

    #[test]
    fn shutdown_aborts_stalled_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = ServerAddress {
            host: "127.0.0.1".into(),
            port: listener.local_addr().unwrap().port(),
        };
        let silent = thread::spawn(move || listener.accept().unwrap().0);

        let stream = connect(&addr, &EngineConfig::default()).unwrap();
        let handle = stream.try_clone().unwrap();
        let started = std::time::Instant::now();
        let client = thread::spawn(move || {
            Connection::handshake(&addr, stream, &EngineConfig::default()).err()
        });
        thread::sleep(std::time::Duration::from_millis(100));
        handle.shutdown(Shutdown::Both).unwrap();

        let err = client.join().unwrap().unwrap();
        assert!(matches!(err, TransportError::Dropped(_)));
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        drop(silent.join().unwrap());
    }

    #[test]
    fn falls_back_to_pcm16_when_encoder_missing() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (sock, _) = listener.accept().unwrap();
            let mut r = BufReader::new(sock.try_clone().unwrap());
            read_prelude(&mut r).unwrap();
            write_prelude(&sock).unwrap();
            let caps = encode_json(&Capabilities::new(&[EncoderKind::Pcm16])).unwrap();
            write_frame(&sock, FrameKind::Capabilities, &caps).unwrap();

            let frame = read_frame(&mut r).unwrap();
            assert_eq!(frame.kind(), Some(FrameKind::PlayRequest));
            let req: PlayRequest = decode_json(&frame.payload).unwrap();
            req
        });

        let addr = ServerAddress {
            host: "127.0.0.1".into(),
            port,
        };
        let mut conn = Connection::open(&addr, &EngineConfig::default()).unwrap();
        let settings = Settings {
            encoder: EncoderKind::Sea,
            ..Settings::default()
        };
        let effective = conn.request_play(settings, Some("Jazz")).unwrap();
        assert_eq!(effective.encoder, EncoderKind::Pcm16);

        let req = server.join().unwrap();
        assert_eq!(req.encoder, EncoderKind::Pcm16.code());
        assert_eq!(req.playlist.as_deref(), Some("Jazz"));
    }
}
