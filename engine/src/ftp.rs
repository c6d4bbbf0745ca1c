//! FTP implementation of the session traits, on top of `suppaftp`.

use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode};
use tracing::{debug, warn};

use crate::error::{ConnectError, SessionError};
use crate::listing::parse_mlsd_lines;
use crate::model::{Credentials, RemoteEntry};
use crate::session::{ChunkCallback, Connector, RemoteSession};

/// Connect and control-channel timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

const CHUNK_SIZE: usize = 8192;

/// Opens one authenticated, passive-mode FTP session.
pub fn connect(credentials: &Credentials) -> Result<FtpSession, ConnectError> {
    connect_with_timeout(credentials, CONNECT_TIMEOUT)
}

/// Like `connect`, with `timeout` bounding the TCP connect, the greeting and
/// every later control-channel read.
pub fn connect_with_timeout(credentials: &Credentials, timeout: Duration) -> Result<FtpSession, ConnectError> {
    let (host, port) = credentials.host_and_port();
    let addr = resolve(&host, port)?;
    debug!(%host, port, "connecting");

    let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| io_connect_error(&host, e))?;
    // Must be in place before the greeting is read
    if let Err(e) = tcp.set_read_timeout(Some(timeout)) {
        warn!(%host, "could not set control channel read timeout: {}", e);
    }
    if let Err(e) = tcp.set_write_timeout(Some(timeout)) {
        warn!(%host, "could not set control channel write timeout: {}", e);
    }

    let mut stream = FtpStream::connect_with_stream(tcp).map_err(|e| match e {
        FtpError::ConnectionError(io) => io_connect_error(&host, io),
        other => ConnectError::Protocol {
            host: host.clone(),
            reason: other.to_string(),
        },
    })?;

    stream.login(&credentials.user, &credentials.password).map_err(|e| match e {
        FtpError::ConnectionError(io) => io_connect_error(&host, io),
        other => ConnectError::AuthFailed {
            user: credentials.user.clone(),
            reason: other.to_string(),
        },
    })?;

    stream.set_mode(Mode::Passive);
    stream
        .transfer_type(FileType::Binary)
        .map_err(|e| ConnectError::Protocol {
            host: host.clone(),
            reason: e.to_string(),
        })?;

    debug!(%host, user = %credentials.user, "logged in");
    Ok(FtpSession { stream, open: true })
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, ConnectError> {
    let unreachable = |reason: String| ConnectError::NetworkUnreachable {
        host: host.to_string(),
        reason,
    };
    (host, port)
        .to_socket_addrs()
        .map_err(|e| unreachable(e.to_string()))?
        .next()
        .ok_or_else(|| unreachable("host did not resolve to any address".to_string()))
}

fn io_connect_error(host: &str, err: io::Error) -> ConnectError {
    if matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
        ConnectError::Timeout { host: host.to_string() }
    } else {
        ConnectError::NetworkUnreachable {
            host: host.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Hand every chunk of `reader` to `on_chunk` until end of data.
fn copy_chunks(reader: &mut dyn Read, on_chunk: &mut ChunkCallback<'_>) -> Result<u64, SessionError> {
    let mut buf = [0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SessionError::Protocol(format!("data connection failed: {}", e))),
        };
        on_chunk(&buf[..n]).map_err(SessionError::Local)?;
        total += n as u64;
    }
}

/// An open FTP control connection. Sends `QUIT` when closed or dropped.
pub struct FtpSession {
    stream: FtpStream,
    open: bool,
}

impl RemoteSession for FtpSession {
    fn change_dir(&mut self, path: &str) -> Result<(), SessionError> {
        self.stream
            .cwd(path)
            .map_err(|e| SessionError::Protocol(e.to_string()))
    }

    fn list_entries(&mut self) -> Result<Vec<RemoteEntry>, SessionError> {
        let lines = self
            .stream
            .mlsd(None)
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        Ok(parse_mlsd_lines(lines))
    }

    fn retrieve(&mut self, path: &str, on_chunk: &mut ChunkCallback<'_>) -> Result<u64, SessionError> {
        let mut data = self
            .stream
            .retr_as_stream(path)
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        let copied = copy_chunks(&mut data, on_chunk);

        // Consume the closing reply on every path.
        let finalized = self.stream.finalize_retr_stream(data);
        match copied {
            Ok(total) => finalized
                .map(|_| total)
                .map_err(|e| SessionError::Protocol(e.to_string())),
            Err(e) => {
                if let Err(reply) = finalized {
                    debug!(path, "transfer closed with: {}", reply);
                }
                Err(e)
            }
        }
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            if let Err(e) = self.stream.quit() {
                debug!("QUIT failed: {}", e);
            }
        }
    }
}

impl Drop for FtpSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connector that opens a fresh FTP session per call.
pub struct FtpConnector {
    credentials: Credentials,
    timeout: Duration,
}

impl FtpConnector {
    pub fn new(credentials: Credentials) -> Self {
        FtpConnector {
            credentials,
            timeout: CONNECT_TIMEOUT,
        }
    }
}

impl Connector for FtpConnector {
    fn connect(&self) -> Result<Box<dyn RemoteSession>, ConnectError> {
        let session = connect_with_timeout(&self.credentials, self.timeout)?;
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntryKind, Manifest, TransferUnit};
    use crate::transfer::TransferCoordinator;
    use std::collections::BTreeMap;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Instant;

    /// Minimal single-directory-per-path FTP server speaking just enough of
    /// the protocol for `FtpSession`.
    struct FakeServer {
        port: u16,
        commands: Arc<Mutex<Vec<String>>>,
    }

    impl FakeServer {
        fn start(files: &[(&str, &[u8])]) -> FakeServer {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind control listener");
            let port = listener.local_addr().expect("local addr").port();
            let files: Arc<BTreeMap<String, Vec<u8>>> =
                Arc::new(files.iter().map(|(p, d)| (p.to_string(), d.to_vec())).collect());
            let commands = Arc::new(Mutex::new(Vec::new()));

            let log = Arc::clone(&commands);
            thread::spawn(move || {
                for control in listener.incoming().flatten() {
                    let files = Arc::clone(&files);
                    let log = Arc::clone(&log);
                    thread::spawn(move || {
                        let _ = serve(control, &files, &log);
                    });
                }
            });
            FakeServer { port, commands }
        }

        fn credentials(&self) -> Credentials {
            Credentials::new(format!("127.0.0.1:{}", self.port), "backup", "secret")
        }

        fn commands(&self) -> Vec<String> {
            self.commands.lock().expect("command log").clone()
        }
    }

    fn serve(control: TcpStream, files: &BTreeMap<String, Vec<u8>>, log: &Mutex<Vec<String>>) -> io::Result<()> {
        let mut reader = BufReader::new(control.try_clone()?);
        let mut out = control;
        // Kept until the next PASV so a client connecting late never sees a refusal
        let mut data: Option<TcpListener> = None;
        let mut cwd = "/".to_string();

        out.write_all(b"220 fake server ready\r\n")?;
        loop {
            let mut raw = String::new();
            if reader.read_line(&mut raw)? == 0 {
                return Ok(());
            }
            let line = raw.trim_end().to_string();
            let (cmd, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            log.lock().expect("command log").push(line.clone());

            match cmd.to_ascii_uppercase().as_str() {
                "USER" => out.write_all(b"331 password required\r\n")?,
                "PASS" => out.write_all(b"230 logged in\r\n")?,
                "TYPE" => out.write_all(b"200 type set\r\n")?,
                "CWD" => {
                    let prefix = format!("{}/", arg.trim_end_matches('/'));
                    if files.keys().any(|p| p.starts_with(&prefix)) {
                        cwd = arg.to_string();
                        out.write_all(b"250 directory changed\r\n")?;
                    } else {
                        out.write_all(b"550 no such directory\r\n")?;
                    }
                }
                "PASV" => {
                    let listener = TcpListener::bind("127.0.0.1:0")?;
                    let port = listener.local_addr()?.port();
                    data = Some(listener);
                    let reply = format!("227 Entering Passive Mode (127,0,0,1,{},{})\r\n", port >> 8, port & 0xff);
                    out.write_all(reply.as_bytes())?;
                }
                "MLSD" => {
                    let prefix = format!("{}/", cwd.trim_end_matches('/'));
                    let mut listing = "type=cdir; .\r\n".to_string();
                    for (path, contents) in files {
                        if let Some(name) = path.strip_prefix(&prefix).filter(|n| !n.contains('/')) {
                            listing.push_str(&format!("type=file;size={}; {}\r\n", contents.len(), name));
                        }
                    }
                    send_data(&mut out, data.take(), listing.as_bytes())?;
                }
                "RETR" => match files.get(arg) {
                    Some(contents) => send_data(&mut out, data.take(), contents)?,
                    None => out.write_all(b"550 no such file\r\n")?,
                },
                "QUIT" => {
                    out.write_all(b"221 bye\r\n")?;
                    return Ok(());
                }
                _ => out.write_all(b"502 not implemented\r\n")?,
            }
        }
    }

    fn send_data(out: &mut TcpStream, listener: Option<TcpListener>, payload: &[u8]) -> io::Result<()> {
        let listener = match listener {
            Some(listener) => listener,
            None => return out.write_all(b"425 use PASV first\r\n"),
        };
        out.write_all(b"150 opening data connection\r\n")?;
        let (mut conn, _) = listener.accept()?;
        // The client may hang up early; the closing reply is sent regardless
        let _ = conn.write_all(payload);
        drop(conn);
        out.write_all(b"226 transfer complete\r\n")
    }

    fn fetch(session: &mut FtpSession, path: &str) -> Result<Vec<u8>, SessionError> {
        let mut received = Vec::new();
        session.retrieve(path, &mut |chunk: &[u8]| -> io::Result<()> {
            received.extend_from_slice(chunk);
            Ok(())
        })?;
        Ok(received)
    }

    #[test]
    fn test_login_listing_and_download() {
        let server = FakeServer::start(&[("/docs/a.txt", b"alpha"), ("/docs/b.txt", b"bravo!")]);
        let mut session = connect_with_timeout(&server.credentials(), Duration::from_secs(5)).expect("connect");

        session.change_dir("/docs").expect("cwd");
        let entries = session.list_entries().expect("mlsd");
        let files: Vec<_> = entries.iter().filter(|e| e.kind == EntryKind::File).collect();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].name, "b.txt");
        assert_eq!(files[1].size, 6);

        assert_eq!(fetch(&mut session, "/docs/a.txt").expect("retr"), b"alpha");
        assert!(server.commands().iter().any(|c| c == "TYPE I"));
    }

    #[test]
    fn test_failed_download_does_not_poison_next_one() {
        let big = vec![9u8; 3000];
        let server = FakeServer::start(&[("/docs/big.bin", &big), ("/docs/ok.txt", b"still fine")]);
        let mut session = connect_with_timeout(&server.credentials(), Duration::from_secs(5)).expect("connect");

        let local_failure = session.retrieve("/docs/big.bin", &mut |_chunk: &[u8]| -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "No space left on device"))
        });
        assert!(matches!(local_failure, Err(SessionError::Local(_))));

        assert_eq!(fetch(&mut session, "/docs/ok.txt").expect("next retr"), b"still fine");
        assert!(matches!(fetch(&mut session, "/docs/missing"), Err(SessionError::Protocol(_))));
        assert_eq!(fetch(&mut session, "/docs/ok.txt").expect("retr after 550"), b"still fine");
    }

    #[test]
    fn test_worker_keeps_going_after_failed_unit() {
        let server = FakeServer::start(&[("/docs/ok0", b"zero"), ("/docs/ok1", b"one"), ("/docs/ok2", b"two")]);
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let manifest = Manifest::from(
            ["/docs/missing", "/docs/ok0", "/docs/ok1", "/docs/ok2"]
                .iter()
                .map(|p| TransferUnit::new(*p, temp_dir.path().join(&p[1..]), 4))
                .collect::<Vec<_>>(),
        );
        let connector = FtpConnector::new(server.credentials());

        let report = TransferCoordinator::new(&connector, 1).run(manifest).expect("run");

        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.done_count(), 3);
        assert_eq!(std::fs::read(temp_dir.path().join("docs/ok2")).expect("read"), b"two");
    }

    #[test]
    fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        thread::spawn(move || {
            // Accept and never greet
            if let Ok((conn, _)) = listener.accept() {
                thread::sleep(Duration::from_secs(5));
                drop(conn);
            }
        });

        let started = Instant::now();
        let credentials = Credentials::new(format!("127.0.0.1:{}", port), "backup", "secret");
        let result = connect_with_timeout(&credentials, Duration::from_millis(300));

        assert!(matches!(result, Err(ConnectError::Timeout { .. })), "got {:?}", result.err());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_quit_sent_on_drop() {
        let server = FakeServer::start(&[("/docs/a.txt", b"alpha")]);
        let session = connect_with_timeout(&server.credentials(), Duration::from_secs(5)).expect("connect");
        drop(session);

        assert_eq!(server.commands().last().map(String::as_str), Some("QUIT"));
    }

    #[test]
    fn test_refused_connection_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        drop(listener);

        let credentials = Credentials::new(format!("127.0.0.1:{}", port), "backup", "secret");
        let result = connect_with_timeout(&credentials, Duration::from_secs(2));
        assert!(matches!(result, Err(ConnectError::NetworkUnreachable { .. })));
    }
}
