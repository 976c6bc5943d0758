//! TCP+TLS transport: a blocking duplex stream shared between the reader
//! and sender threads behind a mutex, plus the pluggable server
//! certificate verification policy.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme, StreamOwned};

use crate::errors::Error;
use crate::thread_util::CancelToken;

/// Default port for the relay's TCP listener.
pub const DEFAULT_PORT: u16 = 5557;

const CONNECT_DEADLINE: Duration = Duration::from_secs(10);
const CONNECT_POLL: Duration = Duration::from_millis(200);
const READ_POLL: Duration = Duration::from_millis(500);

/// How the client validates the server's TLS certificate. The original
/// shipped only anonymous credentials with no verification; this is the
/// flagged stub resolved into an explicit, pluggable policy.
#[derive(Clone, Debug)]
pub enum TlsVerification {
    /// Validate against the platform/webpki trust store (the default).
    Platform,
    /// Accept only a single DER-encoded certificate, bypassing chain
    /// validation entirely.
    Pinned(Vec<u8>),
    /// Accept any certificate. Logs a warning on every connect; for use
    /// against relays with no PKI (e.g. local development).
    InsecureAnonymous,
}

#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

#[derive(Debug)]
struct PinnedCert(Vec<u8>);

impl ServerCertVerifier for PinnedCert {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.0.as_slice() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General("server certificate does not match the pinned certificate".into()))
        }
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        AcceptAnyCert.supported_verify_schemes()
    }
}

fn client_config(verification: &TlsVerification) -> Result<ClientConfig, Error> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let builder = ClientConfig::builder();
    let config = match verification {
        TlsVerification::Platform => {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        TlsVerification::Pinned(der) => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(PinnedCert(der.clone())))
            .with_no_client_auth(),
        TlsVerification::InsecureAnonymous => {
            tracing::warn!("connecting with TlsVerification::InsecureAnonymous: the server certificate is not checked");
            builder.dangerous().with_custom_certificate_verifier(Arc::new(AcceptAnyCert)).with_no_client_auth()
        }
    };
    Ok(config)
}

/// One established TCP+TLS duplex connection, behind a mutex so the
/// reader thread (reads) and sender thread (writes) can share it without
/// either blocking the other for longer than a single I/O call.
pub struct Connection {
    stream: Mutex<StreamOwned<ClientConnection, TcpStream>>,
}

impl Connection {
    /// Resolves `host`, connects with a soft deadline honoring
    /// cancellation, then performs a blocking TLS handshake.
    pub fn connect(host: &str, port: u16, verification: &TlsVerification, cancel: &CancelToken) -> Result<Self, Error> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(Error::Io)?
            .next()
            .ok_or_else(|| Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses for host")))?;

        let deadline = Instant::now() + CONNECT_DEADLINE;
        let tcp = loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match TcpStream::connect(addr) {
                Ok(stream) => break stream,
                Err(e) if Instant::now() >= deadline => return Err(Error::Io(e)),
                Err(_) => std::thread::sleep(CONNECT_POLL),
            }
        };
        tcp.set_nodelay(true).map_err(Error::Io)?;

        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|_| Error::Tls(format!("invalid server name: {host}")))?;
        let config = client_config(verification)?;
        let mut conn = ClientConnection::new(Arc::new(config), server_name).map_err(|e| Error::Tls(e.to_string()))?;

        let mut tcp = tcp;
        while conn.is_handshaking() {
            match conn.complete_io(&mut tcp) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }

        let stream = StreamOwned::new(conn, tcp);
        Ok(Connection { stream: Mutex::new(stream) })
    }

    /// Writes one already-serialized frame, fully, before releasing the
    /// lock.
    pub fn write_frame(&self, bytes: &[u8]) -> Result<(), Error> {
        use std::io::Write;
        let mut guard = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        guard.write_all(bytes).map_err(Error::Io)?;
        guard.flush().map_err(Error::Io)
    }

    /// Polls the raw socket for readable data for up to `READ_POLL`; if
    /// none arrived, returns `Ok(None)` without touching TLS state. Once
    /// bytes are pending, switches to a generous bounded timeout and
    /// reads exactly one framed packet, so a read timeout never occurs
    /// mid-frame (which would otherwise desynchronize the stream).
    pub fn read_packet(&self) -> Result<Option<shroud_proto::Packet>, Error> {
        let mut guard = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        guard.sock.set_read_timeout(Some(READ_POLL)).map_err(Error::Io)?;
        let mut probe = [0u8; 1];
        match guard.sock.peek(&mut probe) {
            Ok(0) => return Err(Error::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed"))),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        }
        guard.sock.set_read_timeout(Some(Duration::from_secs(30))).map_err(Error::Io)?;
        let packet = shroud_proto::Packet::read_from(&mut *guard)?;
        Ok(Some(packet))
    }
}
