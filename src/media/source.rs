use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT_RANGES, RANGE};
use symphonia::core::io::MediaSource;
use tracing::{debug, warn};

use crate::media::error::MediaError;
use crate::media::notification::TimeRange;

const CHUNK_SIZE: usize = 16 * 1024;

/// How far ahead of the download cursor a read may land before the
/// download is restarted at the read position instead of waited for.
const RESTART_SLACK: u64 = 256 * 1024;

const READ_WAIT: Duration = Duration::from_millis(200);

/// Upper bound on the buffer reserved up front from `Content-Length`. Past
/// this the buffer grows as bytes arrive.
const PREALLOCATE_LIMIT: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaLocation {
    File(PathBuf),
    Url(String),
}

impl MediaLocation {
    pub fn parse(arg: &str) -> Self {
        if arg.starts_with("http://") || arg.starts_with("https://") {
            MediaLocation::Url(arg.to_string())
        } else {
            MediaLocation::File(PathBuf::from(arg))
        }
    }

    /// File extension used as a format hint. Query strings and fragments are
    /// ignored for URLs.
    pub fn extension(&self) -> Option<String> {
        match self {
            MediaLocation::File(path) => path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase),
            MediaLocation::Url(url) => {
                let path = url.split(['?', '#']).next().unwrap_or(url);
                let last = path.rsplit('/').next()?;
                let (_, ext) = last.rsplit_once('.')?;
                (!ext.is_empty()).then(|| ext.to_lowercase())
            }
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            MediaLocation::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            MediaLocation::Url(url) => {
                let path = url.split(['?', '#']).next().unwrap_or(url);
                match path.trim_end_matches('/').rsplit('/').next() {
                    Some(last) if !last.is_empty() && !last.contains(':') => last.to_string(),
                    _ => url.clone(),
                }
            }
        }
    }
}

impl fmt::Display for MediaLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaLocation::File(path) => write!(f, "{}", path.display()),
            MediaLocation::Url(url) => f.write_str(url),
        }
    }
}

/// Sorted, disjoint and non-adjacent byte spans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    spans: Vec<Range<u64>>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, range: Range<u64>) {
        if range.start >= range.end {
            return;
        }

        let mut merged = range;
        let mut kept = Vec::with_capacity(self.spans.len() + 1);
        let mut placed = false;

        for span in self.spans.drain(..) {
            if span.end < merged.start {
                kept.push(span);
            } else if span.start > merged.end {
                if !placed {
                    kept.push(merged.clone());
                    placed = true;
                }
                kept.push(span);
            } else {
                merged = merged.start.min(span.start)..merged.end.max(span.end);
            }
        }
        if !placed {
            kept.push(merged);
        }

        self.spans = kept;
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.span_end(offset).is_some()
    }

    /// End of the span holding `offset`, if any.
    pub fn span_end(&self, offset: u64) -> Option<u64> {
        self.spans
            .iter()
            .find(|s| s.start <= offset && offset < s.end)
            .map(|s| s.end)
    }

    /// First missing byte at or after `from`, bounded by `len`.
    pub fn first_gap_from(&self, from: u64, len: u64) -> Option<u64> {
        let mut offset = from;
        for span in &self.spans {
            if span.end <= offset {
                continue;
            }
            if span.start > offset {
                break;
            }
            offset = span.end;
        }
        (offset < len).then_some(offset)
    }

    pub fn spans(&self) -> &[Range<u64>] {
        &self.spans
    }
}

struct DownloadState {
    data: Vec<u8>,
    spans: RangeSet,
    len: Option<u64>,
    cursor: u64,
    restart_at: Option<u64>,
    /// Cleared once the server answers a range request with the whole file.
    ranges: bool,
    error: Option<MediaError>,
    finished: bool,
    cancelled: bool,
}

impl DownloadState {
    fn new(len: Option<u64>, ranges: bool) -> Self {
        let reserve = len.map_or(0, |l| l.min(PREALLOCATE_LIMIT as u64) as usize);
        Self {
            data: Vec::with_capacity(reserve),
            spans: RangeSet::new(),
            len,
            cursor: 0,
            restart_at: None,
            ranges,
            error: None,
            finished: false,
            cancelled: false,
        }
    }

    /// Copy `bytes` to `start`, clipped to the known length. Returns the end
    /// of the stored span.
    fn store(&mut self, start: u64, bytes: &[u8]) -> u64 {
        let n = match self.len {
            Some(len) => bytes.len().min(len.saturating_sub(start) as usize),
            None => bytes.len(),
        };
        let from = start as usize;
        if self.data.len() < from + n {
            self.data.resize(from + n, 0);
        }
        self.data[from..from + n].copy_from_slice(&bytes[..n]);
        let end = start + n as u64;
        self.spans.insert(start..end);
        end
    }
}

struct Shared {
    state: Mutex<DownloadState>,
    cond: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DownloadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A remote audio file read while it downloads. Reads block until the bytes
/// they need have arrived.
pub struct HttpSource {
    shared: Arc<Shared>,
    pos: u64,
}

impl HttpSource {
    pub fn open(client: &Client, url: &str) -> Result<Self, MediaError> {
        let response = client
            .get(url)
            .send()
            .and_then(Response::error_for_status)
            .map_err(|e| MediaError::Open {
                location: url.to_string(),
                reason: e.to_string(),
            })?;

        let len = response.content_length();
        let ranges = response
            .headers()
            .get(ACCEPT_RANGES)
            .is_none_or(|v| v.as_bytes() != b"none");
        debug!(url = %url, ?len, ranges, "starting download");

        let shared = Arc::new(Shared {
            state: Mutex::new(DownloadState::new(len, ranges)),
            cond: Condvar::new(),
        });

        let worker = shared.clone();
        let client = client.clone();
        let url = url.to_string();
        thread::spawn(move || download(worker, client, url, response));

        Ok(Self { shared, pos: 0 })
    }

    pub fn progress(&self) -> DownloadProgress {
        DownloadProgress {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for HttpSource {
    fn drop(&mut self) {
        self.shared.lock().cancelled = true;
        self.shared.cond.notify_all();
    }
}

impl Read for HttpSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.shared.lock();
        loop {
            if let Some(len) = state.len {
                if self.pos >= len {
                    return Ok(0);
                }
            }

            if let Some(end) = state.spans.span_end(self.pos) {
                let start = self.pos as usize;
                let n = buf.len().min((end - self.pos) as usize);
                buf[..n].copy_from_slice(&state.data[start..start + n]);
                self.pos += n as u64;
                return Ok(n);
            }

            if let Some(ref err) = state.error {
                return Err(io::Error::other(err.clone()));
            }
            if state.finished {
                return Ok(0);
            }

            let behind = self.pos < state.cursor;
            let far_ahead = self.pos > state.cursor + RESTART_SLACK;
            if state.ranges && state.len.is_some() && (behind || far_ahead) {
                state.restart_at = Some(self.pos);
            }

            state = self
                .shared
                .cond
                .wait_timeout(state, READ_WAIT)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Seek for HttpSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.shared.lock().len;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => len.and_then(|l| l.checked_add_signed(delta)),
        };

        match target {
            Some(offset) => {
                self.pos = offset;
                Ok(offset)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek outside of the media",
            )),
        }
    }
}

impl MediaSource for HttpSource {
    fn is_seekable(&self) -> bool {
        self.shared.lock().len.is_some()
    }

    fn byte_len(&self) -> Option<u64> {
        self.shared.lock().len
    }
}

/// Read-only view of a download's progress, shared with the engine thread.
#[derive(Clone)]
pub struct DownloadProgress {
    shared: Arc<Shared>,
}

impl DownloadProgress {
    /// Downloaded spans as fractions of the file length.
    pub fn fractions(&self) -> Vec<(f64, f64)> {
        let state = self.shared.lock();
        match state.len {
            Some(len) if len > 0 => state
                .spans
                .spans()
                .iter()
                .map(|s| (s.start as f64 / len as f64, s.end as f64 / len as f64))
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn download(shared: Arc<Shared>, client: Client, url: String, first: Response) {
    let mut response = first;
    let mut cursor = 0u64;
    let mut chunk = vec![0u8; CHUNK_SIZE];

    loop {
        let read = response.read(&mut chunk);

        let mut state = shared.lock();
        if state.cancelled {
            debug!(url = %url, "download cancelled");
            return;
        }

        let mut restart = None;
        match read {
            Ok(0) => {
                let next = match state.len {
                    Some(len) if state.ranges => state.spans.first_gap_from(0, len),
                    _ => None,
                };
                match next {
                    Some(gap) => restart = Some(gap),
                    None => {
                        state.finished = true;
                        shared.cond.notify_all();
                        debug!(url = %url, "download finished");
                        return;
                    }
                }
            }
            Ok(n) => {
                cursor = state.store(cursor, &chunk[..n]);
                state.cursor = cursor;
                shared.cond.notify_all();

                if let Some(target) = state.restart_at.take() {
                    if state.ranges && !state.spans.contains(target) {
                        restart = Some(target);
                    }
                }
                if restart.is_none() && state.ranges {
                    if let Some(len) = state.len {
                        if state.spans.span_end(cursor).is_some() || cursor >= len {
                            restart = state.spans.first_gap_from(cursor, len).or_else(|| {
                                state.spans.first_gap_from(0, len)
                            });
                            if restart.is_none() {
                                state.finished = true;
                                shared.cond.notify_all();
                                debug!(url = %url, "download finished");
                                return;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                warn!(url = %url, error = %e, "download failed");
                state.error = Some(MediaError::Download(e.to_string()));
                shared.cond.notify_all();
                return;
            }
        }
        drop(state);

        if let Some(offset) = restart {
            debug!(url = %url, offset, "restarting download");
            match request_from(&client, &url, offset) {
                Ok((resp, start)) => {
                    response = resp;
                    cursor = start;
                    let mut state = shared.lock();
                    state.cursor = start;
                    if start != offset {
                        // The whole file is coming again; read it straight through.
                        debug!(url = %url, "server ignores ranges");
                        state.ranges = false;
                        state.restart_at = None;
                    }
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "range request failed");
                    shared.lock().error = Some(MediaError::Download(e.to_string()));
                    shared.cond.notify_all();
                    return;
                }
            }
        }
    }
}

/// Request the body from `offset`. Servers that ignore the range send the
/// whole file, in which case the body starts at 0.
fn request_from(client: &Client, url: &str, offset: u64) -> reqwest::Result<(Response, u64)> {
    let response = client
        .get(url)
        .header(RANGE, format!("bytes={}-", offset))
        .send()?
        .error_for_status()?;

    let start = if response.status() == StatusCode::PARTIAL_CONTENT {
        offset
    } else {
        0
    };
    Ok((response, start))
}

/// How much of an opened source is already local.
#[derive(Clone)]
pub enum Buffering {
    Complete,
    Progressive(DownloadProgress),
}

impl Buffering {
    /// Buffered spans in seconds for a media of `duration` seconds.
    pub fn time_ranges(&self, duration: f64) -> Vec<TimeRange> {
        if !duration.is_finite() || duration <= 0.0 {
            return Vec::new();
        }
        match self {
            Buffering::Complete => vec![TimeRange::new(0.0, duration)],
            Buffering::Progressive(progress) => progress
                .fractions()
                .into_iter()
                .map(|(start, end)| TimeRange::new(start * duration, end * duration))
                .collect(),
        }
    }
}

pub fn open_location(
    client: &Client,
    location: &MediaLocation,
) -> Result<(Box<dyn MediaSource>, Buffering), MediaError> {
    match location {
        MediaLocation::File(path) => {
            let file = open_file(path)?;
            Ok((Box::new(file), Buffering::Complete))
        }
        MediaLocation::Url(url) => {
            let source = HttpSource::open(client, url)?;
            let progress = source.progress();
            Ok((Box::new(source), Buffering::Progressive(progress)))
        }
    }
}

fn open_file(path: &Path) -> Result<File, MediaError> {
    File::open(path).map_err(|e| MediaError::Open {
        location: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::mpsc;
    use std::time::Instant;

    use super::*;

    #[derive(Clone, Copy)]
    enum Serve {
        /// Honour `Range` with 206 replies.
        Ranges,
        /// Ignore `Range` and always send the whole file.
        WholeFile,
        /// Advertise the whole file but hang up after this many bytes.
        Truncated(usize),
    }

    struct TestServer {
        url: String,
        offsets: Arc<Mutex<Vec<Option<u64>>>>,
    }

    impl TestServer {
        fn start(body: Vec<u8>, serve: Serve, pace: Duration) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let url = format!("http://{}/track.ogg", listener.local_addr().unwrap());
            let body = Arc::new(body);
            let offsets = Arc::new(Mutex::new(Vec::new()));
            let log = offsets.clone();
            thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(stream) = stream else { break };
                    let body = body.clone();
                    let log = log.clone();
                    thread::spawn(move || respond(stream, &body, serve, pace, &log));
                }
            });
            Self { url, offsets }
        }

        /// The `Range` offset of every request received, in order.
        fn offsets(&self) -> Vec<Option<u64>> {
            self.offsets.lock().unwrap().clone()
        }
    }

    fn respond(
        mut stream: TcpStream,
        body: &[u8],
        serve: Serve,
        pace: Duration,
        log: &Mutex<Vec<Option<u64>>>,
    ) {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut offset = None;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap_or(0) == 0 {
                return;
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("range") {
                    offset = value
                        .trim()
                        .strip_prefix("bytes=")
                        .and_then(|v| v.trim_end_matches('-').parse().ok());
                }
            }
        }
        log.lock().unwrap().push(offset);

        let (head, start, stop) = match (serve, offset) {
            (Serve::Ranges, Some(o)) => {
                let o = o as usize;
                let head = format!(
                    "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\n",
                    body.len() - o,
                    o,
                    body.len() - 1,
                    body.len()
                );
                (head, o, body.len())
            }
            (Serve::Truncated(n), _) => (
                format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n", body.len()),
                0,
                n,
            ),
            _ => (
                format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n", body.len()),
                0,
                body.len(),
            ),
        };
        let head = format!("{head}Connection: close\r\n\r\n");
        if stream.write_all(head.as_bytes()).is_err() {
            return;
        }
        for chunk in body[start..stop].chunks(CHUNK_SIZE) {
            if stream.write_all(chunk).is_err() {
                return;
            }
            thread::sleep(pace);
        }
    }

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Seek and read on another thread so a stuck download fails the test
    /// instead of hanging it.
    fn read_at(
        mut source: HttpSource,
        offset: u64,
        len: usize,
    ) -> (HttpSource, io::Result<Vec<u8>>) {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = vec![0; len];
            let result = source
                .seek(SeekFrom::Start(offset))
                .and_then(|_| source.read_exact(&mut buf))
                .map(|_| buf);
            let _ = tx.send((source, result));
        });
        rx.recv_timeout(Duration::from_secs(10))
            .expect("read did not complete")
    }

    #[test]
    fn parses_locations() {
        assert_eq!(
            MediaLocation::parse("https://goblin.example/media/a.ogg"),
            MediaLocation::Url("https://goblin.example/media/a.ogg".to_string())
        );
        assert_eq!(
            MediaLocation::parse("music/a.flac"),
            MediaLocation::File(PathBuf::from("music/a.flac"))
        );
    }

    #[test]
    fn extension_ignores_query_strings() {
        let url = MediaLocation::parse("https://goblin.example/a/track.OGG?x=1#t");
        assert_eq!(url.extension().as_deref(), Some("ogg"));
        assert_eq!(url.display_name(), "track.OGG");

        let bare = MediaLocation::parse("https://goblin.example/");
        assert_eq!(bare.extension(), None);
        assert_eq!(bare.display_name(), "goblin.example");
    }

    #[test]
    fn inserts_merge_overlapping_and_adjacent_spans() {
        let mut set = RangeSet::new();
        set.insert(10..20);
        set.insert(30..40);
        assert_eq!(set.spans(), &[10..20, 30..40]);

        set.insert(20..25);
        assert_eq!(set.spans(), &[10..25, 30..40]);

        set.insert(0..5);
        set.insert(24..31);
        assert_eq!(set.spans(), &[0..5, 10..40]);

        set.insert(7..7);
        assert_eq!(set.spans(), &[0..5, 10..40]);
    }

    #[test]
    fn finds_span_ends_and_gaps() {
        let mut set = RangeSet::new();
        set.insert(0..100);
        set.insert(200..300);

        assert_eq!(set.span_end(50), Some(100));
        assert_eq!(set.span_end(100), None);
        assert!(set.contains(299));
        assert!(!set.contains(300));

        assert_eq!(set.first_gap_from(0, 400), Some(100));
        assert_eq!(set.first_gap_from(150, 400), Some(150));
        assert_eq!(set.first_gap_from(250, 400), Some(300));
        assert_eq!(set.first_gap_from(250, 300), None);
    }

    #[test]
    fn complete_files_buffer_the_whole_duration() {
        let ranges = Buffering::Complete.time_ranges(90.0);
        assert_eq!(ranges, vec![TimeRange::new(0.0, 90.0)]);
        assert!(Buffering::Complete.time_ranges(f64::NAN).is_empty());
    }

    #[test]
    fn progressive_buffering_scales_spans_by_duration() {
        let mut state = DownloadState::new(Some(1000), true);
        state.spans.insert(0..250);
        state.spans.insert(500..1000);
        let progress = DownloadProgress {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                cond: Condvar::new(),
            }),
        };

        let ranges = Buffering::Progressive(progress).time_ranges(60.0);
        assert_eq!(
            ranges,
            vec![TimeRange::new(0.0, 15.0), TimeRange::new(30.0, 60.0)]
        );
    }

    #[test]
    fn buffer_grows_as_bytes_arrive() {
        let mut state = DownloadState::new(Some(1 << 40), true);
        assert!(state.data.capacity() <= PREALLOCATE_LIMIT);

        assert_eq!(state.store(0, &[1, 2, 3]), 3);
        assert_eq!(state.store(10, &[7, 8]), 12);
        assert_eq!(state.data.len(), 12);
        assert_eq!(&state.data[10..12], &[7, 8]);
        assert_eq!(state.spans.spans(), &[0..3, 10..12]);

        let mut short = DownloadState::new(Some(5), true);
        assert_eq!(short.store(3, &[1, 2, 3, 4]), 5);
        assert_eq!(short.data.len(), 5);
    }

    #[test]
    fn far_reads_restart_with_a_range_request() {
        let data = body(1 << 20);
        let server = TestServer::start(data.clone(), Serve::Ranges, Duration::from_millis(10));
        let client = Client::new();
        let source = HttpSource::open(&client, &server.url).unwrap();

        let (source, read) = read_at(source, 800_000, 16);
        assert_eq!(read.unwrap(), &data[800_000..800_016]);
        assert!(server.offsets().contains(&Some(800_000)));

        let spans = source.shared.lock().spans.spans().to_vec();
        assert!(spans.len() >= 2, "expected disjoint spans, got {spans:?}");
        assert_eq!(spans[0].start, 0);
        assert!(spans.iter().any(|s| s.start == 800_000));

        // The gap behind the first span is filled in afterwards.
        let (_, whole) = read_at(source, 0, data.len());
        assert_eq!(whole.unwrap(), data);
    }

    #[test]
    fn servers_without_ranges_are_read_straight_through() {
        let data = body(1 << 20);
        let server = TestServer::start(data.clone(), Serve::WholeFile, Duration::from_millis(2));
        let client = Client::new();
        let source = HttpSource::open(&client, &server.url).unwrap();

        let (source, read) = read_at(source, 900_000, 16);
        assert_eq!(read.unwrap(), &data[900_000..900_016]);
        assert!(
            server.offsets().len() <= 2,
            "requests issued: {:?}",
            server.offsets()
        );

        let (_, head) = read_at(source, 0, 64);
        assert_eq!(head.unwrap(), &data[..64]);
    }

    #[test]
    fn interrupted_downloads_surface_as_read_errors() {
        let data = body(100_000);
        let server = TestServer::start(data.clone(), Serve::Truncated(20_000), Duration::ZERO);
        let client = Client::new();
        let source = HttpSource::open(&client, &server.url).unwrap();

        let (_, read) = read_at(source, 50_000, 16);
        let err = read.unwrap_err();
        let inner = err.into_inner().expect("error carries its cause");
        assert!(matches!(
            inner.downcast_ref::<MediaError>(),
            Some(MediaError::Download(_))
        ));
    }

    #[test]
    fn dropping_the_source_stops_the_download() {
        let server = TestServer::start(body(1 << 20), Serve::Ranges, Duration::from_millis(20));
        let client = Client::new();
        let source = HttpSource::open(&client, &server.url).unwrap();
        let progress = source.progress();
        thread::sleep(Duration::from_millis(50));

        drop(source);
        let deadline = Instant::now() + Duration::from_secs(5);
        while Arc::strong_count(&progress.shared) > 1 {
            assert!(Instant::now() < deadline, "download thread kept running");
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!progress.shared.lock().finished);
    }
}
