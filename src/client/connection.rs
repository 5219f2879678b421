//! Connection management for the upstream client
//!
//! Handles TCP/TLS connection establishment, socket tuning, and greeting
//! validation. Upstream news feeds are commonly plain port 119, so the
//! transport is an enum over plain and TLS streams.

use crate::config::ServerConfig;
use crate::error::{Result, SpoolError};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{debug, warn};

use super::UpstreamClient;
use crate::response::codes;

/// TCP connection timeout in seconds
const TCP_CONNECT_TIMEOUT_SECS: u64 = 120;

/// TLS handshake timeout in seconds
const TLS_HANDSHAKE_TIMEOUT_SECS: u64 = 60;

/// BufReader capacity for article downloads (256KB)
const BUFREADER_CAPACITY: usize = 256 * 1024;

/// Receive buffer sized for streams of text articles (1MB)
const RECV_BUFFER_SIZE: usize = 1024 * 1024;

/// Send buffer sized for pipelined command bursts (256KB)
const SEND_BUFFER_SIZE: usize = 256 * 1024;

/// Plain or TLS upstream stream
pub enum Transport {
    /// Unencrypted TCP (standard port 119)
    Plain(BufReader<TcpStream>),
    /// TLS (standard port 563)
    Tls(BufReader<TlsStream<TcpStream>>),
}

impl Transport {
    pub(super) async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Transport::Plain(s) => s.get_mut().write_all(buf).await,
            Transport::Tls(s) => s.get_mut().write_all(buf).await,
        }
    }

    pub(super) async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Transport::Plain(s) => s.get_mut().flush().await,
            Transport::Tls(s) => s.get_mut().flush().await,
        }
    }

    pub(super) async fn read_until(
        &mut self,
        byte: u8,
        buf: &mut Vec<u8>,
    ) -> std::io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read_until(byte, buf).await,
            Transport::Tls(s) => s.read_until(byte, buf).await,
        }
    }
}

/// Dangerous certificate verifier that accepts all certificates
///
/// **Security Warning:** This verifier disables all certificate validation,
/// making connections vulnerable to man-in-the-middle attacks. Only use this
/// for testing or with servers you trust on a secure network.
#[derive(Debug)]
pub(super) struct DangerousAcceptAnyCertificate;

impl ServerCertVerifier for DangerousAcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

impl UpstreamClient {
    /// Connect to an upstream NNTP server
    ///
    /// Establishes the connection (plain or TLS per the config) and reads
    /// the greeting. Does not authenticate - call
    /// [`authenticate`](Self::authenticate) after connecting.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - [`SpoolError::Io`] - TCP connection fails (DNS resolution, network unreachable, etc.)
    /// - [`SpoolError::Tls`] - TLS handshake fails (invalid certificate, protocol error)
    /// - [`SpoolError::Timeout`] - Connection or handshake times out
    /// - [`SpoolError::Protocol`] - Server rejects the connection
    pub async fn connect(config: Arc<ServerConfig>) -> Result<Self> {
        debug!("Connecting to upstream {}:{}", config.host, config.port);

        let addr = format!("{}:{}", config.host, config.port);

        use std::net::ToSocketAddrs;
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| {
                SpoolError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Failed to resolve address: {}", e),
                ))
            })?
            .next()
            .ok_or_else(|| {
                SpoolError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "No address resolved",
                ))
            })?;

        // Create socket using socket2 for buffer configuration
        use socket2::{Domain, Protocol, Socket, Type};
        let domain = if socket_addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket =
            Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(SpoolError::Io)?;

        // Set TCP_NODELAY for low-latency request/response pattern
        socket.set_nodelay(true).map_err(SpoolError::Io)?;

        if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_SIZE) {
            warn!(
                "Failed to set receive buffer size to {} bytes: {}",
                RECV_BUFFER_SIZE, e
            );
        }

        if let Err(e) = socket.set_send_buffer_size(SEND_BUFFER_SIZE) {
            warn!(
                "Failed to set send buffer size to {} bytes: {}",
                SEND_BUFFER_SIZE, e
            );
        }

        // The OS may round the send buffer; the actual size bounds how many
        // pipelined commands can be in flight without a blocking write
        let send_buffer = socket.send_buffer_size().unwrap_or(SEND_BUFFER_SIZE);
        debug!("TCP send buffer: {} bytes", send_buffer);

        // socket2::Socket::connect() is blocking, so run it in a blocking task.
        // Connect BEFORE setting non-blocking mode.
        let socket_addr_for_connect = socket_addr;
        let tcp_stream = timeout(
            Duration::from_secs(TCP_CONNECT_TIMEOUT_SECS),
            tokio::task::spawn_blocking(move || -> std::io::Result<std::net::TcpStream> {
                socket.connect(&socket_addr_for_connect.into())?;
                socket.set_nonblocking(true)?;
                Ok(socket.into())
            }),
        )
        .await
        .map_err(|_| SpoolError::Timeout)?
        .map_err(|e| SpoolError::Io(std::io::Error::other(format!("Task join error: {}", e))))?
        .map_err(SpoolError::Io)?;

        let tcp_stream = TcpStream::from_std(tcp_stream).map_err(SpoolError::Io)?;

        let stream = if config.tls {
            // Install default crypto provider if not already installed
            use tokio_rustls::rustls::crypto::{CryptoProvider, ring};
            let _ = CryptoProvider::install_default(ring::default_provider());

            let tls_config = if config.allow_insecure_tls {
                warn!(
                    "TLS certificate validation disabled - connection vulnerable to MITM attacks"
                );
                ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(DangerousAcceptAnyCertificate))
                    .with_no_client_auth()
            } else {
                let mut root_store = RootCertStore::empty();
                root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

                ClientConfig::builder()
                    .with_root_certificates(root_store)
                    .with_no_client_auth()
            };

            let connector = TlsConnector::from(Arc::new(tls_config));
            let server_name = ServerName::try_from(config.host.as_str())
                .map_err(|e| SpoolError::Tls(format!("Invalid domain: {}", e)))?
                .to_owned();

            let tls_stream = timeout(
                Duration::from_secs(TLS_HANDSHAKE_TIMEOUT_SECS),
                connector.connect(server_name, tcp_stream),
            )
            .await
            .map_err(|_| SpoolError::Timeout)?
            .map_err(|e| SpoolError::Tls(format!("TLS handshake failed: {}", e)))?;

            Transport::Tls(BufReader::with_capacity(BUFREADER_CAPACITY, tls_stream))
        } else {
            Transport::Plain(BufReader::with_capacity(BUFREADER_CAPACITY, tcp_stream))
        };

        let mut client = Self {
            stream,
            config,
            current_group: None,
            posting_allowed: false,
            send_buffer,
            is_broken: false,
        };

        // Read server greeting
        let greeting = client.read_response().await?;
        debug!("Server greeting: {} {}", greeting.code, greeting.message);

        if !greeting.is_success() {
            return Err(SpoolError::Protocol {
                code: greeting.code,
                message: greeting.message,
            });
        }

        client.posting_allowed = greeting.code == codes::READY_POSTING_ALLOWED;

        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Socket buffer size constants match documented values
    #[test]
    fn test_buffer_size_constants() {
        assert_eq!(RECV_BUFFER_SIZE, 1_048_576, "Receive buffer should be 1MB");
        assert_eq!(SEND_BUFFER_SIZE, 262_144, "Send buffer should be 256KB");
    }

    #[test]
    fn test_bufreader_capacity() {
        assert_eq!(
            BUFREADER_CAPACITY,
            256 * 1024,
            "BufReader capacity should be 256KB for article downloads"
        );
    }

    #[test]
    fn test_timeout_constants() {
        assert_eq!(TCP_CONNECT_TIMEOUT_SECS, 120);
        assert_eq!(TLS_HANDSHAKE_TIMEOUT_SECS, 60);
    }

    /// DangerousAcceptAnyCertificate accepts any server certificate
    #[test]
    fn test_dangerous_cert_verifier_accepts_any_cert() {
        let verifier = DangerousAcceptAnyCertificate;
        let fake_cert = CertificateDer::from(vec![0u8; 32]);
        let fake_server_name = ServerName::try_from("test.example.com").unwrap();
        let now = UnixTime::now();

        let result = verifier.verify_server_cert(&fake_cert, &[], &fake_server_name, &[], now);

        assert!(
            result.is_ok(),
            "DangerousAcceptAnyCertificate should accept any certificate"
        );
    }

    #[test]
    fn test_dangerous_cert_verifier_supported_schemes() {
        let verifier = DangerousAcceptAnyCertificate;
        let schemes = verifier.supported_verify_schemes();

        assert!(schemes.len() >= 11);
        assert!(schemes.contains(&SignatureScheme::RSA_PKCS1_SHA256));
        assert!(schemes.contains(&SignatureScheme::ED25519));
    }

    #[test]
    fn test_socket_domain_detection() {
        use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

        let ipv4_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 119);
        let ipv6_addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 1)), 119);

        assert!(ipv4_addr.is_ipv4());
        assert!(ipv6_addr.is_ipv6());
    }
}
