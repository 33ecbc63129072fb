//! FileHandler - appends every flush to a JSON-lines file

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use contracts::{AutoflushError, FlushContext, FlushHandler};
use serde::Serialize;
use tracing::{debug, error, instrument};

const DEFAULT_FILE_NAME: &str = "flushes.jsonl";

/// Configuration for FileHandler
#[derive(Debug, Clone)]
pub struct FileHandlerConfig {
    /// Output file
    pub path: PathBuf,
}

impl FileHandlerConfig {
    /// Create config from params map
    ///
    /// `path` names the file directly; otherwise `base_path` (default `./output`)
    /// gets a `flushes.jsonl` file.
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let path = match params.get("path") {
            Some(path) => PathBuf::from(path),
            None => params
                .get("base_path")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./output"))
                .join(DEFAULT_FILE_NAME),
        };
        Self { path }
    }
}

/// One line of output
#[derive(Serialize)]
struct FlushRecord<'a, T> {
    flushed_at: String,
    labels: &'a BTreeMap<String, String>,
    count: usize,
    items: &'a [T],
}

/// Handler that appends each flush as one JSON line
pub struct FileHandler {
    name: String,
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileHandler {
    /// Open (or create) the output file for appending
    pub fn new(name: impl Into<String>, config: FileHandlerConfig) -> std::io::Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)?;

        Ok(Self {
            name: name.into(),
            path: config.path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> std::io::Result<Self> {
        Self::new(name, FileHandlerConfig::from_params(params))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn append<T: Serialize>(&self, ctx: &FlushContext, items: &[T]) -> std::io::Result<()> {
        let record = FlushRecord {
            flushed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            labels: ctx.labels(),
            count: items.len(),
            items,
        };
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_writer(&mut *writer, &record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

impl<T: Serialize + Send> FlushHandler<T> for FileHandler {
    #[instrument(
        name = "file_handler_handle",
        skip(self, ctx, items),
        fields(handler = %self.name, items = items.len())
    )]
    async fn handle(&self, ctx: FlushContext, items: Vec<T>) -> Result<(), AutoflushError> {
        self.append(&ctx, &items).map_err(|e| {
            error!(handler = %self.name, path = %self.path.display(), error = %e, "Write failed");
            AutoflushError::handler_source(format!("file handler '{}' write failed", self.name), e)
        })?;
        debug!(handler = %self.name, items = items.len(), "Flush written");
        Ok(())
    }
}
