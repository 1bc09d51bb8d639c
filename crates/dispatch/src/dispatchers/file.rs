//! FileDispatcher - appends dispatches to a JSON-lines file

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use contracts::{Dispatch, DispatchCompletion, Dispatcher};
use parking_lot::Mutex;
use tracing::{debug, error, instrument};

use crate::error::DispatchError;

/// Configuration for FileDispatcher
#[derive(Debug, Clone)]
pub struct FileDispatcherConfig {
    /// Output directory; the file is `<base_path>/<id>.jsonl`
    pub base_path: PathBuf,
}

impl FileDispatcherConfig {
    /// Read `path` from a dispatcher params map
    pub fn from_params(id: &str, params: &BTreeMap<String, String>) -> Result<Self, DispatchError> {
        let base_path = params
            .get("path")
            .map(PathBuf::from)
            .ok_or_else(|| DispatchError::dispatcher_creation(id, "missing 'path' parameter"))?;
        Ok(Self { base_path })
    }
}

/// Dispatcher writing one JSON line per dispatch
///
/// Writes run on the blocking pool; a batch is acknowledged only once it is
/// fully written. A failed write leaves the batch queued.
pub struct FileDispatcher {
    id: String,
    dispatch_limit: usize,
    file_path: PathBuf,
    /// Serializes appends from overlapping batches
    write_lock: Arc<Mutex<()>>,
}

impl FileDispatcher {
    pub fn new(
        id: impl Into<String>,
        dispatch_limit: usize,
        config: FileDispatcherConfig,
    ) -> Result<Self, DispatchError> {
        let id = id.into();
        fs::create_dir_all(&config.base_path)?;
        let file_path = config.base_path.join(format!("{id}.jsonl"));

        Ok(Self {
            id,
            dispatch_limit: dispatch_limit.max(1),
            file_path,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

fn append_lines(path: &Path, dispatches: &[Dispatch]) -> std::io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    for dispatch in dispatches {
        serde_json::to_writer(&mut writer, dispatch)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

impl Dispatcher for FileDispatcher {
    fn id(&self) -> &str {
        &self.id
    }

    fn dispatch_limit(&self) -> usize {
        self.dispatch_limit
    }

    #[instrument(
        name = "file_dispatcher_dispatch",
        skip(self, dispatches, completion),
        fields(dispatcher = %self.id, count = dispatches.len())
    )]
    fn dispatch(&self, dispatches: Vec<Dispatch>, completion: DispatchCompletion) {
        let id = self.id.clone();
        let path = self.file_path.clone();
        let write_lock = Arc::clone(&self.write_lock);

        let write = move || {
            let result = {
                let _guard = write_lock.lock();
                append_lines(&path, &dispatches)
            };
            match result {
                Ok(()) => {
                    debug!(dispatcher = %id, count = dispatches.len(), "Dispatches written");
                    completion.complete(dispatches);
                }
                Err(e) => {
                    error!(
                        dispatcher = %id,
                        path = %path.display(),
                        error = %e,
                        "Write failed"
                    );
                }
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(write);
            }
            Err(_) => write(),
        }
    }
}
