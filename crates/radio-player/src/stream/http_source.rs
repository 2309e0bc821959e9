//! Live HTTP stream reader.
//!
//! A live radio stream has no length and cannot be ranged, so the body is read
//! front to back by a background thread and handed over in chunks through a
//! bounded channel. The decoder side sees a plain non-seekable `Read`.
//!
//! Socket waits go through [`ReadGuard`], which slices each wait so a cancel
//! or a silent server ends the reader thread instead of parking it forever.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use symphonia::core::io::MediaSource;
use ureq::Agent;
use ureq::unversioned::resolver::DefaultResolver;
use ureq::unversioned::transport::{
    Buffers, ConnectionDetails, Connector, DefaultConnector, NextTimeout, Transport,
};

const CHUNK_BYTES: usize = 16 * 1024;
const CHANNEL_CHUNKS: usize = 32;
const POLL: Duration = Duration::from_millis(100);
/// Longest single socket wait before cancel and idle are rechecked.
const WAIT_SLICE: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct LiveHttpConfig {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Time allowed for response headers after connecting.
    pub response_timeout: Duration,
    /// Longest a body read may wait for bytes before the stream is dropped.
    pub idle_timeout: Duration,
}

impl Default for LiveHttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(20),
        }
    }
}

pub struct LiveHttpSource {
    chunk: Vec<u8>,
    pos: usize,
    rx: Receiver<Vec<u8>>,
    cancel: Arc<AtomicBool>,
    content_type: Option<String>,
    _reader: JoinHandle<()>,
}

impl LiveHttpSource {
    /// Open `url` and start pulling its body. Fails on connect errors and
    /// non-success statuses.
    pub fn connect(url: &str, config: &LiveHttpConfig, cancel: Arc<AtomicBool>) -> Result<Self> {
        let agent_config = Agent::config_builder()
            .timeout_connect(Some(config.connect_timeout))
            .timeout_recv_response(Some(config.response_timeout))
            .build();
        let guard = ReadGuard {
            cancel: cancel.clone(),
            idle_timeout: config.idle_timeout,
        };
        let agent = Agent::with_parts(
            agent_config,
            DefaultConnector::new().chain(guard),
            DefaultResolver::default(),
        );
        let resp = agent
            .get(url)
            .header("Icy-MetaData", "0")
            .call()
            .with_context(|| format!("connect {url}"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("stream responded {status}"));
        }
        let content_type = resp
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_ascii_lowercase());
        tracing::debug!(url, content_type = content_type.as_deref().unwrap_or(""), "stream connected");

        let (tx, rx) = bounded::<Vec<u8>>(CHANNEL_CHUNKS);
        let (_, body) = resp.into_parts();
        let mut body = body.into_reader();
        let cancel_reader = cancel.clone();
        let reader = thread::spawn(move || {
            let mut buf = vec![0u8; CHUNK_BYTES];
            while !cancel_reader.load(Ordering::Relaxed) {
                match body.read(&mut buf) {
                    Ok(0) => {
                        tracing::debug!("stream body ended");
                        break;
                    }
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("stream read failed: {e}");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            chunk: Vec::new(),
            pos: 0,
            rx,
            cancel,
            content_type,
            _reader: reader,
        })
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// Connector stage that wraps every transport in a [`GuardedTransport`].
#[derive(Debug)]
struct ReadGuard {
    cancel: Arc<AtomicBool>,
    idle_timeout: Duration,
}

impl Connector<Box<dyn Transport>> for ReadGuard {
    type Out = GuardedTransport;

    fn connect(
        &self,
        _details: &ConnectionDetails,
        chained: Option<Box<dyn Transport>>,
    ) -> Result<Option<Self::Out>, ureq::Error> {
        Ok(chained.map(|inner| GuardedTransport {
            inner,
            cancel: self.cancel.clone(),
            idle_timeout: self.idle_timeout,
        }))
    }
}

/// Transport whose input waits end on cancel or after `idle_timeout` without
/// bytes, whatever timeout ureq asked for.
#[derive(Debug)]
struct GuardedTransport {
    inner: Box<dyn Transport>,
    cancel: Arc<AtomicBool>,
    idle_timeout: Duration,
}

impl Transport for GuardedTransport {
    fn buffers(&mut self) -> &mut dyn Buffers {
        self.inner.buffers()
    }

    fn transmit_output(&mut self, amount: usize, timeout: NextTimeout) -> Result<(), ureq::Error> {
        self.inner.transmit_output(amount, timeout)
    }

    fn await_input(&mut self, timeout: NextTimeout) -> Result<bool, ureq::Error> {
        let started = Instant::now();
        let deadline = if timeout.after.is_not_happening() {
            None
        } else {
            started.checked_add(*timeout.after)
        };
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(ureq::Error::Io(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "stream cancelled",
                )));
            }
            let now = Instant::now();
            let mut slice = WAIT_SLICE;
            if let Some(deadline) = deadline {
                if now >= deadline {
                    return Err(ureq::Error::Timeout(timeout.reason));
                }
                slice = slice.min(deadline - now);
            }
            let idle = now.duration_since(started);
            if idle >= self.idle_timeout {
                return Err(ureq::Error::Timeout(ureq::Timeout::RecvBody));
            }
            slice = slice.min(self.idle_timeout - idle);

            let next = NextTimeout {
                after: slice.into(),
                reason: timeout.reason,
            };
            match self.inner.await_input(next) {
                Err(ureq::Error::Timeout(_)) => continue,
                other => return other,
            }
        }
    }

    fn is_open(&mut self) -> bool {
        self.inner.is_open()
    }

    fn is_tls(&self) -> bool {
        self.inner.is_tls()
    }
}

impl Read for LiveHttpSource {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.chunk.len() {
            if self.cancelled() {
                return Ok(0);
            }
            match self.rx.recv_timeout(POLL) {
                Ok(next) => {
                    self.chunk = next;
                    self.pos = 0;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = out.len().min(self.chunk.len() - self.pos);
        out[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Seek for LiveHttpSource {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "live stream is not seekable",
        ))
    }
}

impl MediaSource for LiveHttpSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Container/codec extension hint from a `Content-Type` header, falling back
/// to the URL path.
pub fn extension_hint(content_type: Option<&str>, url: &str) -> Option<String> {
    let from_type = content_type.and_then(|ct| {
        let mime = ct.split(';').next().unwrap_or(ct).trim();
        match mime {
            "audio/mpeg" | "audio/mp3" => Some("mp3"),
            "audio/aac" | "audio/aacp" | "audio/x-aac" => Some("aac"),
            "audio/mp4" | "audio/x-m4a" => Some("m4a"),
            "audio/ogg" | "application/ogg" | "audio/vorbis" => Some("ogg"),
            "audio/flac" | "audio/x-flac" => Some("flac"),
            "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav"),
            _ => None,
        }
    });
    if let Some(ext) = from_type {
        return Some(ext.to_string());
    }

    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    fn source_from_chunks(chunks: Vec<Vec<u8>>) -> (LiveHttpSource, Arc<AtomicBool>) {
        let (tx, rx) = bounded(chunks.len().max(1));
        for c in chunks {
            tx.send(c).unwrap();
        }
        drop(tx);
        let cancel = Arc::new(AtomicBool::new(false));
        let source = LiveHttpSource {
            chunk: Vec::new(),
            pos: 0,
            rx,
            cancel: cancel.clone(),
            content_type: None,
            _reader: thread::spawn(|| {}),
        };
        (source, cancel)
    }

    #[test]
    fn read_spans_chunks_then_ends() {
        let (mut src, _) = source_from_chunks(vec![b"abc".to_vec(), b"de".to_vec()]);
        let mut all = Vec::new();
        src.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"abcde");
    }

    #[test]
    fn cancel_ends_reads() {
        let (mut src, cancel) = source_from_chunks(vec![b"abc".to_vec()]);
        cancel.store(true, Ordering::Relaxed);
        let mut buf = [0u8; 8];
        assert_eq!(src.read(&mut buf).unwrap(), 0);
    }

    /// Serves response headers and a few body bytes, then holds the socket
    /// open without sending anything else.
    fn silent_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut req = Vec::new();
            let mut buf = [0u8; 512];
            while !req.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = sock.read(&mut buf).unwrap();
                if n == 0 {
                    return;
                }
                req.extend_from_slice(&buf[..n]);
            }
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\n\r\nabcd")
                .unwrap();
            sock.flush().unwrap();
            thread::sleep(Duration::from_secs(30));
        });
        format!("http://{addr}/live")
    }

    fn wait_finished(src: &LiveHttpSource, within: Duration) -> bool {
        let until = Instant::now() + within;
        while Instant::now() < until {
            if src._reader.is_finished() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        src._reader.is_finished()
    }

    #[test]
    fn cancel_stops_reader_blocked_on_silent_socket() {
        let url = silent_server();
        let cancel = Arc::new(AtomicBool::new(false));
        let mut src = LiveHttpSource::connect(&url, &LiveHttpConfig::default(), cancel.clone())
            .unwrap();
        assert_eq!(src.content_type(), Some("audio/mpeg"));

        let mut buf = [0u8; 4];
        let n = src.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &b"abcd"[..n]);
        thread::sleep(Duration::from_millis(300));
        assert!(!src._reader.is_finished());

        cancel.store(true, Ordering::Relaxed);
        assert!(wait_finished(&src, Duration::from_secs(3)));
    }

    #[test]
    fn idle_body_ends_stream() {
        let url = silent_server();
        let config = LiveHttpConfig {
            idle_timeout: Duration::from_millis(500),
            ..LiveHttpConfig::default()
        };
        let mut src =
            LiveHttpSource::connect(&url, &config, Arc::new(AtomicBool::new(false))).unwrap();

        let mut all = Vec::new();
        src.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"abcd");
        assert!(wait_finished(&src, Duration::from_secs(1)));
    }

    #[test]
    fn seek_is_refused() {
        let (mut src, _) = source_from_chunks(vec![]);
        assert!(src.seek(SeekFrom::Start(0)).is_err());
        assert!(!src.is_seekable());
        assert_eq!(src.byte_len(), None);
    }

    #[test]
    fn extension_hint_prefers_content_type() {
        assert_eq!(
            extension_hint(Some("audio/mpeg; charset=x"), "http://h/live.aac"),
            Some("mp3".to_string())
        );
        assert_eq!(
            extension_hint(Some("audio/aacp"), "http://h/live"),
            Some("aac".to_string())
        );
    }

    #[test]
    fn extension_hint_falls_back_to_url() {
        assert_eq!(
            extension_hint(None, "http://h/radio/Live.OGG?_ts=1"),
            Some("ogg".to_string())
        );
        assert_eq!(extension_hint(Some("text/html"), "http://h/live"), None);
        assert_eq!(extension_hint(None, "http://h/.hidden"), None);
    }
}
