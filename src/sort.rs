//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::budget::{BudgetError, MemoryBudget};
use crate::buffer::LimitedBuffer;
use crate::merger::BinaryHeapMerger;
use crate::mergesort::MergeSorter;
use crate::run::{RunError, RunHandle, RunReader, RunStore};

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Memory budget or block size is invalid.
    InvalidBudget(BudgetError),
    /// Temporary directory creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Run storage error.
    Storage(RunError),
    /// Input data stream error.
    InputError(Box<dyn Error + Send + Sync>),
    /// Output data stream error.
    OutputError(io::Error),
    /// Sorting was cancelled.
    Cancelled,
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::InvalidBudget(err) => Some(err),
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::Storage(err) => Some(err),
            SortError::InputError(err) => Some(err.as_ref()),
            SortError::OutputError(err) => Some(err),
            SortError::Cancelled => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::InvalidBudget(err) => write!(f, "invalid memory budget: {}", err),
            SortError::TempDir(err) => write!(f, "temporary directory not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::Storage(err) => write!(f, "run storage failure: {}", err),
            SortError::InputError(err) => write!(f, "input data stream error: {}", err),
            SortError::OutputError(err) => write!(f, "output data stream error: {}", err),
            SortError::Cancelled => write!(f, "sorting cancelled"),
        }
    }
}

impl From<RunError> for SortError {
    fn from(err: RunError) -> Self {
        SortError::Storage(err)
    }
}

/// Sorting statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortStats {
    /// Number of runs created.
    pub runs: usize,
    /// Number of records read from the input.
    pub records: u64,
}

/// Block size limit source.
#[derive(Debug, Clone, Copy)]
enum BlockLimit {
    Budget(MemoryBudget),
    Records(usize),
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
pub struct ExternalSorterBuilder<T> {
    /// Number of threads to be used to sort blocks.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Block size limit.
    block_limit: Option<BlockLimit>,
    /// External cancellation flag.
    cancel_flag: Option<Arc<AtomicBool>>,

    /// Input item type.
    item_type: PhantomData<T>,
}

impl<T> ExternalSorterBuilder<T>
where
    T: Ord + Copy + Send + serde::ser::Serialize + serde::de::DeserializeOwned,
{
    /// Creates an instance of a builder. A block limit has to be set
    /// with [`ExternalSorterBuilder::with_memory_budget`] or [`ExternalSorterBuilder::with_block_size`].
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    /// Budget errors are reported here, before any file is created.
    pub fn build(self) -> Result<ExternalSorter<T>, SortError> {
        let block_size = match self.block_limit {
            Some(BlockLimit::Budget(budget)) => budget.block_size(),
            Some(BlockLimit::Records(0)) => Err(BudgetError::ZeroBlockSize),
            Some(BlockLimit::Records(block_size)) => Ok(block_size),
            None => Err(BudgetError::Unset),
        }
        .map_err(SortError::InvalidBudget)?;

        ExternalSorter::new(
            block_size,
            self.threads_number,
            self.tmp_dir.as_deref(),
            self.rw_buf_size,
            self.cancel_flag,
        )
    }

    /// Sets memory budget the block size is planned from.
    pub fn with_memory_budget(mut self, budget: MemoryBudget) -> ExternalSorterBuilder<T> {
        self.block_limit = Some(BlockLimit::Budget(budget));
        return self;
    }

    /// Sets block size (maximum number of records sorted in memory at once) explicitly.
    pub fn with_block_size(mut self, block_size: usize) -> ExternalSorterBuilder<T> {
        self.block_limit = Some(BlockLimit::Records(block_size));
        return self;
    }

    /// Sets number of threads to be used to sort blocks.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder<T> {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<T> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets run read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<T> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets a flag that cancels sorting once raised.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> ExternalSorterBuilder<T> {
        self.cancel_flag = Some(flag);
        return self;
    }
}

impl<T> Default for ExternalSorterBuilder<T> {
    fn default() -> Self {
        ExternalSorterBuilder {
            threads_number: None,
            tmp_dir: None,
            rw_buf_size: None,
            block_limit: None,
            cancel_flag: None,
            item_type: PhantomData,
        }
    }
}

/// External sorter.
pub struct ExternalSorter<T> {
    /// Sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Maximum number of records sorted in memory at once.
    block_size: usize,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// External cancellation flag.
    cancel_flag: Option<Arc<AtomicBool>>,

    /// Input item type.
    item_type: PhantomData<T>,
}

impl<T> ExternalSorter<T>
where
    T: Ord + Copy + Send + serde::ser::Serialize + serde::de::DeserializeOwned,
{
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `block_size` - Maximum number of records sorted in memory at once, must be positive.
    /// * `threads_number` - Number of threads to be used to sort blocks. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `tmp_path` - Directory to be used to store temporary data. If paramater is [`None`] default OS temporary
    ///   directory will be used.
    /// * `rw_buf_size` - Run file read/write buffer size.
    /// * `cancel_flag` - Flag cancelling the sorting once raised.
    pub fn new(
        block_size: usize,
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        rw_buf_size: Option<usize>,
        cancel_flag: Option<Arc<AtomicBool>>,
    ) -> Result<Self, SortError> {
        if block_size == 0 {
            return Err(SortError::InvalidBudget(BudgetError::ZeroBlockSize));
        }
        log::info!("block size: {} records", block_size);

        return Ok(ExternalSorter {
            block_size,
            rw_buf_size,
            cancel_flag,
            tmp_dir: tmp_path.map(Into::into),
            thread_pool: Self::init_thread_pool(threads_number)?,
            item_type: PhantomData,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Sorts data from the input.
    /// Returns an iterator that can be used to get sorted data stream.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    pub fn sort<I, E>(&self, input: I) -> Result<RunMerger<T>, SortError>
    where
        I: IntoIterator<Item = Result<T, E>>,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        self.partition(input)?.merge()
    }

    /// Splits the input into blocks, sorts each of them and saves them as runs.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    pub fn partition<I, E>(&self, input: I) -> Result<RunList<T>, SortError>
    where
        I: IntoIterator<Item = Result<T, E>>,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let store = RunStore::new(self.tmp_dir.as_deref(), self.rw_buf_size).map_err(SortError::TempDir)?;
        // runs are deleted on drop, so every early return below cleans up
        let mut runs = RunSet::new(store);

        let mut block = LimitedBuffer::with_capacity(self.block_size);
        let mut sorter = MergeSorter::with_capacity(block.capacity());
        let mut records: u64 = 0;

        for item in input.into_iter() {
            check_cancelled(&self.cancel_flag)?;

            match item {
                Ok(item) => block.push(item),
                Err(err) => return Err(SortError::InputError(err.into())),
            }
            records += 1;

            if block.is_full() {
                self.create_run(&mut block, &mut sorter, &mut runs)?;
            }
        }

        if !block.is_empty() {
            self.create_run(&mut block, &mut sorter, &mut runs)?;
        }

        let stats = SortStats {
            runs: runs.handles.len(),
            records,
        };
        log::info!("external sort preparation done (runs: {}, records: {})", stats.runs, stats.records);

        return Ok(RunList {
            runs,
            stats,
            cancel_flag: self.cancel_flag.clone(),
            item_type: PhantomData,
        });
    }

    fn create_run(
        &self,
        block: &mut LimitedBuffer<T>,
        sorter: &mut MergeSorter<T>,
        runs: &mut RunSet,
    ) -> Result<(), SortError> {
        log::debug!("sorting block data ({} records) ...", block.len());
        self.thread_pool.install(|| {
            sorter.sort(block.as_mut_slice());
        });

        log::debug!("saving run data");
        let mut writer = runs.store.create::<T>()?;
        let unfinished = writer.handle().clone();

        let result = writer.extend(block.iter().copied()).and_then(|()| writer.finish());
        block.clear();

        match result {
            Ok(handle) => {
                log::debug!("run {} saved ({} records)", handle.id(), handle.records());
                runs.handles.push(handle);
                Ok(())
            }
            Err(err) => {
                runs.discard(&unfinished);
                Err(SortError::Storage(err))
            }
        }
    }
}

fn check_cancelled(flag: &Option<Arc<AtomicBool>>) -> Result<(), SortError> {
    match flag {
        Some(flag) if flag.load(Ordering::Relaxed) => Err(SortError::Cancelled),
        _ => Ok(()),
    }
}

/// Run store together with the runs it holds. All the runs are deleted on drop.
struct RunSet {
    store: RunStore,
    handles: Vec<RunHandle>,
}

impl RunSet {
    fn new(store: RunStore) -> Self {
        RunSet {
            store,
            handles: Vec::new(),
        }
    }

    fn discard(&self, handle: &RunHandle) {
        if let Err(err) = self.store.delete(handle) {
            log::warn!("run {} deletion failed: {}", handle.id(), err);
        }
    }

    fn cleanup(&mut self) {
        if !self.handles.is_empty() {
            log::debug!("deleting {} runs", self.handles.len());
        }
        for handle in std::mem::take(&mut self.handles) {
            self.discard(&handle);
        }
    }
}

impl Drop for RunSet {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Sorted runs produced by [`ExternalSorter::partition`].
/// The runs are deleted when the list is dropped unless they are passed to the merger.
pub struct RunList<T> {
    runs: RunSet,
    stats: SortStats,
    cancel_flag: Option<Arc<AtomicBool>>,

    item_type: PhantomData<T>,
}

impl<T> RunList<T>
where
    T: Ord + serde::de::DeserializeOwned,
{
    /// Returns run handles in the order the runs were created.
    pub fn runs(&self) -> &[RunHandle] {
        &self.runs.handles
    }

    pub fn stats(&self) -> SortStats {
        self.stats
    }

    /// Returns the directory the runs are stored in.
    pub fn path(&self) -> &Path {
        self.runs.store.path()
    }

    /// Opens a single run for reading.
    pub fn open(&self, handle: &RunHandle) -> Result<RunReader<T>, SortError> {
        Ok(self.runs.store.open(handle)?)
    }

    /// Opens all the runs and returns an iterator merging them into a single sorted stream.
    pub fn merge(self) -> Result<RunMerger<T>, SortError> {
        let runs = self.runs;

        let mut readers = Vec::with_capacity(runs.handles.len());
        for handle in runs.handles.iter() {
            // running out of file descriptors shows up here as an I/O error
            readers.push(runs.store.open(handle)?);
        }
        log::info!("merging {} runs", readers.len());

        return Ok(RunMerger {
            merger: BinaryHeapMerger::new(readers),
            runs,
            stats: self.stats,
            cancel_flag: self.cancel_flag,
            emitted: 0,
            finished: false,
        });
    }
}

/// Merged sorted stream of runs.
///
/// Holds one open reader and one buffered record per run. Once the stream is exhausted,
/// fails or is dropped all the readers are closed and all the runs are deleted.
/// Nothing is yielded after an error.
pub struct RunMerger<T>
where
    T: Ord + serde::de::DeserializeOwned,
{
    merger: BinaryHeapMerger<T, RunError, RunReader<T>>,
    runs: RunSet,
    stats: SortStats,
    cancel_flag: Option<Arc<AtomicBool>>,
    emitted: u64,
    finished: bool,
}

impl<T> RunMerger<T>
where
    T: Ord + serde::de::DeserializeOwned,
{
    pub fn stats(&self) -> SortStats {
        self.stats
    }

    /// Number of records yielded so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Returns the directory the runs are stored in.
    pub fn path(&self) -> &Path {
        self.runs.store.path()
    }

    fn finish(&mut self) {
        self.finished = true;
        // readers are closed before their files are removed
        self.merger.close();
        self.runs.cleanup();
    }
}

impl<T> Iterator for RunMerger<T>
where
    T: Ord + serde::de::DeserializeOwned,
{
    type Item = Result<T, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Err(err) = check_cancelled(&self.cancel_flag) {
            self.finish();
            return Some(Err(err));
        }

        match self.merger.next() {
            Some(Ok(item)) => {
                self.emitted += 1;
                Some(Ok(item))
            }
            Some(Err(err)) => {
                self.finish();
                Some(Err(SortError::Storage(err)))
            }
            None => {
                log::info!("external sort merge done (records: {})", self.emitted);
                self.finish();
                None
            }
        }
    }
}

impl<T> Drop for RunMerger<T>
where
    T: Ord + serde::de::DeserializeOwned,
{
    fn drop(&mut self) {
        self.merger.close();
    }
}
