//! Binance Vision provider against a local HTTP stub.
//!
//! The stub answers one request per connection from a routing closure and
//! records each request's path and `Range` header, so the tests can check
//! status handling and resume behavior without network access.

use klinevault_core::{
    ArchiveProvider, ArchiveTask, BinanceVision, FetchOutcome, Granularity, Period, ProviderError,
};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

const ARCHIVE: &[u8] = b"full-archive-bytes";
const ARCHIVE_PATH: &str = "/data/spot/monthly/klines/BTCUSDT/1m/BTCUSDT-1m-2021-07.zip";

struct Request {
    path: String,
    range: Option<String>,
}

type Log = Arc<Mutex<Vec<(String, Option<String>)>>>;

/// Serve `route` on an ephemeral port. Returns the base URL and the request log.
fn serve<F>(route: F) -> (String, Log)
where
    F: Fn(&Request) -> (u16, Vec<u8>) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&log);

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            if let Some(request) = read_request(&stream) {
                seen.lock()
                    .unwrap()
                    .push((request.path.clone(), request.range.clone()));
                let (status, body) = route(&request);
                write_response(&stream, status, &body);
            }
            let _ = stream.shutdown(Shutdown::Both);
        }
    });
    (base, log)
}

fn read_request(stream: &TcpStream) -> Option<Request> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    let path = line.split_whitespace().nth(1)?.to_string();

    let mut range = None;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).ok()? == 0 || header.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                range = Some(value.trim().to_string());
            }
        }
    }
    Some(Request { path, range })
}

fn write_response(mut stream: &TcpStream, status: u16, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {status} Stub\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
    let _ = stream.flush();
}

fn checksum_body(bytes: &[u8]) -> Vec<u8> {
    format!(
        "{}  BTCUSDT-1m-2021-07.zip\n",
        hex::encode(Sha256::digest(bytes))
    )
    .into_bytes()
}

fn task() -> ArchiveTask {
    ArchiveTask::new(
        "BTC",
        "USDT",
        Granularity::OneMinute,
        Period::new(2021, 7).unwrap(),
    )
}

fn part_of(dest: &Path) -> PathBuf {
    PathBuf::from(format!("{}.part", dest.display()))
}

fn provider(base: &str, verify: bool) -> BinanceVision {
    BinanceVision::with_endpoints(base, base, verify).unwrap()
}

#[test]
fn missing_archive_is_not_found() {
    let (base, _) = serve(|_| (404, b"Not Found".to_vec()));
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("BTCUSDT-1m-2021-07.zip");

    let outcome = provider(&base, true).fetch_archive(&task(), &dest).unwrap();
    assert_eq!(outcome, FetchOutcome::NotFound);
    assert!(!dest.exists());
    assert!(!part_of(&dest).exists());
}

#[test]
fn fresh_download_is_verified_and_moved_into_place() {
    let (base, log) = serve(|req| {
        if req.path.ends_with(".CHECKSUM") {
            (200, checksum_body(ARCHIVE))
        } else {
            (200, ARCHIVE.to_vec())
        }
    });
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("BTCUSDT-1m-2021-07.zip");

    let outcome = provider(&base, true).fetch_archive(&task(), &dest).unwrap();
    assert_eq!(
        outcome,
        FetchOutcome::Downloaded {
            path: dest.clone(),
            resumed: false
        }
    );
    assert_eq!(fs::read(&dest).unwrap(), ARCHIVE);
    assert!(!part_of(&dest).exists());

    let log = log.lock().unwrap();
    assert_eq!(log[0], (ARCHIVE_PATH.to_string(), None));
    assert_eq!(log[1].0, format!("{ARCHIVE_PATH}.CHECKSUM"));
}

#[test]
fn partial_content_is_appended_to_the_part_file() {
    let (base, log) = serve(|req| match req.range.as_deref() {
        Some("bytes=5-") => (206, ARCHIVE[5..].to_vec()),
        _ => (200, ARCHIVE.to_vec()),
    });
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("BTCUSDT-1m-2021-07.zip");
    fs::write(part_of(&dest), &ARCHIVE[..5]).unwrap();

    let outcome = provider(&base, false).fetch_archive(&task(), &dest).unwrap();
    assert_eq!(
        outcome,
        FetchOutcome::Downloaded {
            path: dest.clone(),
            resumed: true
        }
    );
    assert_eq!(fs::read(&dest).unwrap(), ARCHIVE);
    assert_eq!(log.lock().unwrap()[0].1.as_deref(), Some("bytes=5-"));
}

#[test]
fn full_response_to_a_range_request_restarts_the_part_file() {
    let (base, _) = serve(|_| (200, ARCHIVE.to_vec()));
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("BTCUSDT-1m-2021-07.zip");
    fs::write(part_of(&dest), b"stale").unwrap();

    let outcome = provider(&base, false).fetch_archive(&task(), &dest).unwrap();
    assert_eq!(
        outcome,
        FetchOutcome::Downloaded {
            path: dest.clone(),
            resumed: false
        }
    );
    assert_eq!(fs::read(&dest).unwrap(), ARCHIVE);
}

#[test]
fn range_not_satisfiable_finishes_a_complete_part_file() {
    let (base, _) = serve(|req| {
        if req.path.ends_with(".CHECKSUM") {
            (200, checksum_body(ARCHIVE))
        } else {
            (416, Vec::new())
        }
    });
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("BTCUSDT-1m-2021-07.zip");
    fs::write(part_of(&dest), ARCHIVE).unwrap();

    let outcome = provider(&base, true).fetch_archive(&task(), &dest).unwrap();
    assert_eq!(
        outcome,
        FetchOutcome::Downloaded {
            path: dest.clone(),
            resumed: true
        }
    );
    assert_eq!(fs::read(&dest).unwrap(), ARCHIVE);
    assert!(!part_of(&dest).exists());
}

#[test]
fn checksum_mismatch_discards_the_part_file() {
    let (base, _) = serve(|req| {
        if req.path.ends_with(".CHECKSUM") {
            (200, checksum_body(b"something else"))
        } else {
            (200, ARCHIVE.to_vec())
        }
    });
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("BTCUSDT-1m-2021-07.zip");

    let err = provider(&base, true)
        .fetch_archive(&task(), &dest)
        .unwrap_err();
    assert!(matches!(err, ProviderError::ChecksumMismatch { .. }));
    assert!(!dest.exists());
    assert!(!part_of(&dest).exists());
}

#[test]
fn server_error_is_unexpected_status() {
    let (base, _) = serve(|_| (500, b"oops".to_vec()));
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("BTCUSDT-1m-2021-07.zip");

    let err = provider(&base, false)
        .fetch_archive(&task(), &dest)
        .unwrap_err();
    assert!(matches!(
        err,
        ProviderError::UnexpectedStatus { status: 500, .. }
    ));
    assert!(!dest.exists());
}

#[test]
fn validate_pair_distinguishes_rejection_from_failure() {
    let (base, _) = serve(|req| {
        if req.path.ends_with("symbol=BTCUSDT") {
            (200, br#"{"symbols":[]}"#.to_vec())
        } else if req.path.ends_with("symbol=NOPEUSDT") {
            (400, br#"{"code":-1121,"msg":"Invalid symbol."}"#.to_vec())
        } else {
            (429, b"slow down".to_vec())
        }
    });
    let p = provider(&base, false);

    assert!(p.validate_pair("BTC", "USDT").unwrap());
    assert!(!p.validate_pair("NOPE", "USDT").unwrap());
    assert!(matches!(
        p.validate_pair("ETH", "USDT"),
        Err(ProviderError::UnexpectedStatus { status: 429, .. })
    ));
}
