//! Sorted run storage.
//!
//! A run is a sorted sequence of records written once to a temporary file and later
//! read back once, sequentially. Records are serialized using MessagePack
//! (see https://msgpack.org/).

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Run storage error.
#[derive(Debug)]
pub enum RunError {
    /// Common I/O error.
    IO(io::Error),
    /// Record serialization error.
    SerializationError(rmp_serde::encode::Error),
    /// Record deserialization error.
    DeserializationError(rmp_serde::decode::Error),
}

impl Error for RunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            RunError::IO(err) => err,
            RunError::SerializationError(err) => err,
            RunError::DeserializationError(err) => err,
        })
    }
}

impl Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            RunError::IO(err) => write!(f, "run I/O operation failed: {}", err),
            RunError::SerializationError(err) => write!(f, "run serialization error: {}", err),
            RunError::DeserializationError(err) => write!(f, "run deserialization error: {}", err),
        }
    }
}

impl From<io::Error> for RunError {
    fn from(err: io::Error) -> Self {
        RunError::IO(err)
    }
}

/// Opaque run identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    id: u64,
    path: PathBuf,
    records: u64,
    bytes: u64,
}

impl RunHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of records written to the run.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Serialized run size in bytes. Zero until the run is finished.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Run store. Owns a temporary directory holding all the runs of a single sorting pass.
/// The directory and whatever is left in it are removed when the store is dropped.
pub struct RunStore {
    dir: tempfile::TempDir,
    rw_buf_size: Option<usize>,
    next_id: u64,
}

impl RunStore {
    /// Creates a new run store.
    ///
    /// # Arguments
    /// * `tmp_path` - Directory the store directory is created in. If the parameter is [`None`]
    ///   default OS temporary directory will be used.
    /// * `rw_buf_size` - Run file read/write buffer size.
    pub fn new(tmp_path: Option<&Path>, rw_buf_size: Option<usize>) -> io::Result<Self> {
        let dir = if let Some(tmp_path) = tmp_path {
            tempfile::tempdir_in(tmp_path)
        } else {
            tempfile::tempdir()
        }?;

        log::info!("using {} as a run directory", dir.path().display());

        return Ok(RunStore {
            dir,
            rw_buf_size,
            next_id: 0,
        });
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Allocates a new empty run and returns its writer.
    pub fn create<T>(&mut self) -> Result<RunWriter<T>, RunError>
    where
        T: serde::ser::Serialize,
    {
        let id = self.next_id;
        self.next_id += 1;

        let path = self.dir.path().join(format!("run-{:06}.bin", id));
        let file = fs::OpenOptions::new().write(true).create_new(true).open(&path)?;

        let writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
            None => io::BufWriter::new(file),
        };

        return Ok(RunWriter {
            handle: RunHandle {
                id,
                path,
                records: 0,
                bytes: 0,
            },
            writer,
            item_type: PhantomData,
        });
    }

    /// Opens a finished run for sequential reading.
    pub fn open<T>(&self, handle: &RunHandle) -> Result<RunReader<T>, RunError>
    where
        T: serde::de::DeserializeOwned,
    {
        let file = fs::File::open(&handle.path)?;
        let reader = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        return Ok(RunReader {
            reader: reader.take(handle.bytes),
            failed: false,
            item_type: PhantomData,
        });
    }

    /// Deletes run data. Deleting an already deleted or unfinished run is not an error.
    pub fn delete(&self, handle: &RunHandle) -> Result<(), RunError> {
        match fs::remove_file(&handle.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(RunError::IO(err)),
        }
    }
}

/// Run writer. Consumed by [`RunWriter::finish`], so a run can't be modified after that.
pub struct RunWriter<T> {
    handle: RunHandle,
    writer: io::BufWriter<fs::File>,

    item_type: PhantomData<T>,
}

impl<T> RunWriter<T>
where
    T: serde::ser::Serialize,
{
    /// Returns the handle of the run being written.
    pub fn handle(&self) -> &RunHandle {
        &self.handle
    }

    /// Appends a record to the run.
    pub fn append(&mut self, item: &T) -> Result<(), RunError> {
        rmp_serde::encode::write(&mut self.writer, item).map_err(RunError::SerializationError)?;
        self.handle.records += 1;

        return Ok(());
    }

    /// Appends all the records to the run.
    pub fn extend(&mut self, items: impl IntoIterator<Item = T>) -> Result<(), RunError> {
        for item in items.into_iter() {
            self.append(&item)?;
        }

        return Ok(());
    }

    /// Flushes the run and finalizes it for reading.
    pub fn finish(mut self) -> Result<RunHandle, RunError> {
        self.writer.flush()?;
        self.handle.bytes = self.writer.get_ref().metadata()?.len();

        return Ok(self.handle);
    }
}

/// Sequential run reader.
pub struct RunReader<T> {
    reader: io::Take<io::BufReader<fs::File>>,
    failed: bool,

    item_type: PhantomData<T>,
}

impl<T> Iterator for RunReader<T>
where
    T: serde::de::DeserializeOwned,
{
    type Item = Result<T, RunError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.limit() == 0 {
            None
        } else {
            match rmp_serde::decode::from_read(&mut self.reader) {
                Ok(result) => Some(Ok(result)),
                Err(err) => {
                    self.failed = true;
                    Some(Err(RunError::DeserializationError(err)))
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use rstest::*;

    use super::{RunError, RunReader, RunStore};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec![0])]
    #[case(vec![i32::MIN, -1, 0, 1, 200, 70_000, i32::MAX])]
    fn test_run_write_read(tmp_dir: tempfile::TempDir, #[case] saved: Vec<i32>) {
        let mut store = RunStore::new(Some(tmp_dir.path()), None).unwrap();

        let mut writer = store.create().unwrap();
        writer.extend(saved.clone()).unwrap();
        let handle = writer.finish().unwrap();
        assert_eq!(handle.records(), saved.len() as u64);

        let reader: RunReader<i32> = store.open(&handle).unwrap();
        let restored: Result<Vec<i32>, RunError> = reader.collect();
        assert_eq!(restored.unwrap(), saved);
    }

    #[rstest]
    fn test_run_small_buffer(tmp_dir: tempfile::TempDir) {
        let saved = Vec::from_iter(-500..500);
        let mut store = RunStore::new(Some(tmp_dir.path()), Some(16)).unwrap();

        let mut writer = store.create().unwrap();
        for item in saved.iter() {
            writer.append(item).unwrap();
        }
        let handle = writer.finish().unwrap();

        let restored: Result<Vec<i32>, RunError> = store.open(&handle).unwrap().collect();
        assert_eq!(restored.unwrap(), saved);
    }

    #[rstest]
    fn test_run_delete(tmp_dir: tempfile::TempDir) {
        let mut store = RunStore::new(Some(tmp_dir.path()), None).unwrap();

        let mut writer = store.create().unwrap();
        writer.extend(vec![1, 2, 3]).unwrap();
        let handle = writer.finish().unwrap();
        assert!(handle.path().exists());

        store.delete(&handle).unwrap();
        assert!(!handle.path().exists());
        // deletion is idempotent
        store.delete(&handle).unwrap();

        assert_eq!(fs::read_dir(store.path()).unwrap().count(), 0);
    }

    #[rstest]
    fn test_run_delete_unfinished(tmp_dir: tempfile::TempDir) {
        let mut store = RunStore::new(Some(tmp_dir.path()), None).unwrap();

        let mut writer = store.create::<i32>().unwrap();
        writer.append(&7).unwrap();
        let handle = writer.handle().clone();
        drop(writer);

        store.delete(&handle).unwrap();
        store.delete(&handle).unwrap();
        assert_eq!(fs::read_dir(store.path()).unwrap().count(), 0);
    }

    #[rstest]
    fn test_run_ids_unique(tmp_dir: tempfile::TempDir) {
        let mut store = RunStore::new(Some(tmp_dir.path()), None).unwrap();

        let first = store.create::<i32>().unwrap().finish().unwrap();
        let second = store.create::<i32>().unwrap().finish().unwrap();

        assert_ne!(first.id(), second.id());
        assert_ne!(first.path(), second.path());
    }

    #[rstest]
    fn test_store_directory_removed(tmp_dir: tempfile::TempDir) {
        let mut store = RunStore::new(Some(tmp_dir.path()), None).unwrap();
        store.create::<i32>().unwrap().finish().unwrap();
        drop(store);

        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }
}
