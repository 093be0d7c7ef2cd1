//! Dialing: plain TCP or TLS over a non-blocking std socket.
//!
//! The [`Dialer`] seam lets tests substitute in-memory streams. The real
//! [`TcpDialer`] performs a blocking connect bounded by the dial timeout,
//! then switches the socket to non-blocking mode before handing it out.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket as RawSocket, Type};
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{
    CryptoProvider, aws_lc_rs, verify_tls12_signature, verify_tls13_signature,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{
    ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme,
    StreamOwned,
};
use tracing::{debug, warn};

use crate::error::TransportError;

/// Where and how to dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
    /// Wrap the stream in TLS.
    pub secure: bool,
    /// Check the server certificate against the native roots.
    pub verify_cert: bool,
    /// Local address to bind before connecting.
    pub bind: Option<String>,
}

impl Endpoint {
    pub fn plain(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            secure: false,
            verify_cert: true,
            bind: None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)?;
        if self.secure {
            f.write_str(" (tls)")?;
        }
        Ok(())
    }
}

/// A connected, non-blocking byte stream.
pub trait Stream: Read + Write {}

impl<T: Read + Write> Stream for T {}

/// Opens streams to endpoints.
pub trait Dialer {
    fn dial(&mut self, endpoint: &Endpoint, timeout: Duration)
    -> Result<Box<dyn Stream>, TransportError>;
}

/// Real TCP/TLS dialer.
#[derive(Debug, Default)]
pub struct TcpDialer {
    verified: Option<Arc<ClientConfig>>,
    unverified: Option<Arc<ClientConfig>>,
}

impl TcpDialer {
    pub fn new() -> Self {
        Self::default()
    }

    fn connect_tcp(endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream, TransportError> {
        let address = format!("{}:{}", endpoint.address, endpoint.port);
        let target: SocketAddr = (endpoint.address.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|_| TransportError::Resolve(address.clone()))?
            .next()
            .ok_or_else(|| TransportError::Resolve(address.clone()))?;

        let socket = RawSocket::new(Domain::for_address(target), Type::STREAM, Some(Protocol::TCP))
            .map_err(|source| TransportError::Dial {
                address: address.clone(),
                source,
            })?;

        if let Some(bind) = &endpoint.bind {
            let ip: IpAddr = bind
                .parse()
                .map_err(|_| TransportError::Bind(bind.clone()))?;
            socket
                .bind(&SockAddr::from(SocketAddr::new(ip, 0)))
                .map_err(|_| TransportError::Bind(bind.clone()))?;
        }

        socket
            .connect_timeout(&SockAddr::from(target), timeout)
            .map_err(|source| match source.kind() {
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::DialTimeout {
                    address: address.clone(),
                },
                _ => TransportError::Dial {
                    address: address.clone(),
                    source,
                },
            })?;

        let setup = |e: io::Error| TransportError::Dial {
            address: address.clone(),
            source: e,
        };
        socket.set_nodelay(true).map_err(setup)?;
        socket.set_keepalive(true).map_err(setup)?;
        socket.set_nonblocking(true).map_err(setup)?;

        Ok(socket.into())
    }

    fn tls_config(&mut self, verify: bool) -> Result<Arc<ClientConfig>, TransportError> {
        let slot = if verify {
            &mut self.verified
        } else {
            &mut self.unverified
        };
        if let Some(config) = slot.as_ref() {
            return Ok(config.clone());
        }

        let provider = CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(aws_lc_rs::default_provider()));
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        let config = if verify {
            let mut roots = RootCertStore::empty();
            let native = rustls_native_certs::load_native_certs();
            for cert in native.certs {
                if let Err(e) = roots.add(cert) {
                    warn!(error = %e, "failed to add root certificate");
                }
            }
            for e in &native.errors {
                warn!(error = %e, "error loading native certificates");
            }
            builder.with_root_certificates(roots).with_no_client_auth()
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
                .with_no_client_auth()
        };

        let config = Arc::new(config);
        *slot = Some(config.clone());
        Ok(config)
    }
}

impl Dialer for TcpDialer {
    fn dial(
        &mut self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Box<dyn Stream>, TransportError> {
        let tcp = Self::connect_tcp(endpoint, timeout)?;
        if !endpoint.secure {
            debug!(%endpoint, "tcp connected");
            return Ok(Box::new(tcp));
        }

        let config = self.tls_config(endpoint.verify_cert)?;
        let server_name = ServerName::try_from(endpoint.address.clone())
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        let conn = ClientConnection::new(config, server_name)
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        debug!(%endpoint, verify = endpoint.verify_cert, "tls session started");
        // The handshake completes lazily on the first non-blocking reads and writes.
        Ok(Box::new(StreamOwned::new(conn, tcp)))
    }
}

/// Certificate verifier for networks with self-signed certificates.
/// Signatures are still checked; the chain of trust is not.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory streams for unit tests.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Shared view of one mock stream.
    #[derive(Debug, Default)]
    pub struct Wire {
        /// Bytes the peer will deliver on the next reads.
        pub inbound: VecDeque<u8>,
        /// Everything written by the socket.
        pub outbound: Vec<u8>,
        /// Next read returns EOF once `inbound` is drained.
        pub eof: bool,
        /// Writes fail with this kind.
        pub write_error: Option<io::ErrorKind>,
        /// Cap on bytes accepted per write call.
        pub write_limit: Option<usize>,
    }

    impl Wire {
        pub fn push_line(&mut self, line: &str) {
            self.inbound.extend(line.as_bytes());
            self.inbound.extend(b"\r\n");
        }

        /// Complete lines written so far, without terminators.
        pub fn sent_lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.outbound)
                .split("\r\n")
                .filter(|l| !l.is_empty())
                .map(str::to_owned)
                .collect()
        }

        pub fn take_sent(&mut self) -> Vec<String> {
            let lines = self.sent_lines();
            self.outbound.clear();
            lines
        }
    }

    pub struct MockStream(pub Arc<Mutex<Wire>>);

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut wire = self.0.lock();
            if wire.inbound.is_empty() {
                return if wire.eof {
                    Ok(0)
                } else {
                    Err(io::ErrorKind::WouldBlock.into())
                };
            }
            let n = buf.len().min(wire.inbound.len());
            for (slot, byte) in buf.iter_mut().zip(wire.inbound.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut wire = self.0.lock();
            if let Some(kind) = wire.write_error {
                return Err(kind.into());
            }
            let n = wire.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
            if n == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            wire.outbound.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Dialer whose outcomes are scripted per attempt.
    #[derive(Debug, Default, Clone)]
    pub struct MockDialer {
        pub state: Arc<Mutex<DialScript>>,
    }

    #[derive(Debug, Default)]
    pub struct DialScript {
        /// Fail every dial when set.
        pub refuse: bool,
        /// Endpoints dialed, in order.
        pub dials: Vec<Endpoint>,
        /// Wire of every stream handed out.
        pub wires: Vec<Arc<Mutex<Wire>>>,
    }

    impl MockDialer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn refusing() -> Self {
            let dialer = Self::default();
            dialer.state.lock().refuse = true;
            dialer
        }

        pub fn dial_count(&self) -> usize {
            self.state.lock().dials.len()
        }

        /// Wire of the most recent successful dial.
        pub fn wire(&self) -> Arc<Mutex<Wire>> {
            self.state
                .lock()
                .wires
                .last()
                .cloned()
                .expect("no successful dial yet")
        }
    }

    impl Dialer for MockDialer {
        fn dial(
            &mut self,
            endpoint: &Endpoint,
            _timeout: Duration,
        ) -> Result<Box<dyn Stream>, TransportError> {
            let mut state = self.state.lock();
            state.dials.push(endpoint.clone());
            if state.refuse {
                return Err(TransportError::Dial {
                    address: endpoint.to_string(),
                    source: io::ErrorKind::ConnectionRefused.into(),
                });
            }
            let wire = Arc::new(Mutex::new(Wire::default()));
            state.wires.push(wire.clone());
            Ok(Box::new(MockStream(wire)))
        }
    }
}
