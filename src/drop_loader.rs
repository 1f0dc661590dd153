// Drag-and-drop decoding
// Dropped files are decoded on a worker thread; the newest drop wins

use crate::error::{LoadError, LoadResult};
use crate::image_loader::{self, ImageData};
use log::debug;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// MIME type accepted from drag sources
pub const URI_LIST_MIME: &str = "text/uri-list";

/// What a drag source handed over
pub enum DropPayload {
    /// A single URI, e.g. `file:///home/me/cat.png`
    Uri(String),
    /// A `text/uri-list` stream, read on the worker
    UriList(Box<dyn Read + Send>),
}

/// Result of one decode task, delivered back to the UI thread
#[derive(Debug)]
pub struct DecodeOutcome {
    pub id: u64,
    pub path: Option<PathBuf>,
    pub result: LoadResult<ImageData>,
}

/// Handle to the in-flight task
#[derive(Debug)]
struct DecodeTask {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

/// Serialises drops: each submission cancels the previous one, and only the
/// most recently submitted task's outcome is accepted.
#[derive(Debug, Default)]
pub struct DropQueue {
    /// Id of the newest submission; bumped by `cancel` so nothing older is accepted
    latest: u64,
    current: Option<DecodeTask>,
}

impl DropQueue {
    /// Start decoding `payload` on a worker thread. `deliver` runs on that
    /// thread and must forward the outcome to the UI thread.
    pub fn submit<F>(&mut self, payload: DropPayload, deliver: F) -> u64
    where
        F: FnOnce(DecodeOutcome) + Send + 'static,
    {
        self.cancel();

        self.latest += 1;
        let id = self.latest;
        let cancelled = Arc::new(AtomicBool::new(false));
        self.current = Some(DecodeTask {
            id,
            cancelled: Arc::clone(&cancelled),
        });

        thread::spawn(move || {
            let (path, result) = run_decode(payload, &cancelled);
            if cancelled.load(Ordering::SeqCst) {
                debug!("Drop {} cancelled, discarding result", id);
                return;
            }
            deliver(DecodeOutcome { id, path, result });
        });

        id
    }

    /// Cancel the in-flight task, if any
    pub fn cancel(&mut self) {
        if let Some(task) = self.current.take() {
            task.cancelled.store(true, Ordering::SeqCst);
            self.latest += 1;
            debug!("Cancelled drop {}", task.id);
        }
    }

    /// Whether an outcome is from the newest submission. Clears the in-flight
    /// handle when it is.
    pub fn accept(&mut self, outcome: &DecodeOutcome) -> bool {
        let newest = outcome.id == self.latest;
        if newest {
            self.current = None;
        }
        newest
    }

    pub fn in_flight(&self) -> bool {
        self.current.is_some()
    }
}

fn run_decode(payload: DropPayload, cancelled: &AtomicBool) -> (Option<PathBuf>, LoadResult<ImageData>) {
    let path = match resolve_payload(payload) {
        Ok(path) => path,
        Err(e) => return (None, Err(e)),
    };
    if cancelled.load(Ordering::SeqCst) {
        return (Some(path), Err(LoadError::Cancelled));
    }
    let result = image_loader::load_path(&path);
    (Some(path), result)
}

fn resolve_payload(payload: DropPayload) -> LoadResult<PathBuf> {
    match payload {
        DropPayload::Uri(uri) => file_uri_to_path(&uri),
        DropPayload::UriList(mut reader) => {
            let mut text = String::new();
            reader.read_to_string(&mut text).map_err(|source| LoadError::Io {
                path: PathBuf::from(URI_LIST_MIME),
                source,
            })?;
            let uri = first_uri(&text).ok_or(LoadError::NoUri)?;
            file_uri_to_path(uri)
        }
    }
}

/// First entry of a `text/uri-list`, skipping comments and blank lines
pub fn first_uri(list: &str) -> Option<&str> {
    list.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Convert a local `file:` URI into a path, decoding percent-escapes
pub fn file_uri_to_path(uri: &str) -> LoadResult<PathBuf> {
    let not_file = || LoadError::NotAFileUri(uri.to_string());

    let rest = uri.strip_prefix("file://").ok_or_else(not_file)?;
    // Authority is either empty or localhost
    let path = if rest.starts_with('/') {
        rest
    } else {
        rest.strip_prefix("localhost").filter(|p| p.starts_with('/')).ok_or_else(not_file)?
    };

    let bytes = percent_decode(path).ok_or_else(not_file)?;
    let decoded = String::from_utf8(bytes).map_err(|_| not_file())?;
    Ok(PathBuf::from(decoded))
}

fn percent_decode(input: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len());
    let mut bytes = input.bytes();
    while let Some(b) = bytes.next() {
        if b == b'%' {
            let hi = (bytes.next()? as char).to_digit(16)?;
            let lo = (bytes.next()? as char).to_digit(16)?;
            out.push((hi * 16 + lo) as u8);
        } else {
            out.push(b);
        }
    }
    Some(out)
}
