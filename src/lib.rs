//! `ext-int-sort` is a bounded memory external sort for integer streams.
//!
//! Input that is larger than the memory available to the process is sorted in two phases. The partition phase
//! reads the input in blocks sized from a memory budget, sorts every block in memory and spills it to a temporary
//! run file. The merge phase streams all runs back at once and yields a single ascending sequence, keeping only
//! one record per run in memory. Runs are removed as soon as the merged stream no longer needs them.
//!
//! # Overview
//!
//! * **Memory budget planning:**
//!   the number of records sorted in memory at once (block size) is derived from a memory budget in bytes,
//!   a per-record size estimate and a safety margin (see [`MemoryBudget`]).
//! * **Deterministic block sort:**
//!   each block is sorted in place by a stable top-down merge sort reusing a single auxiliary buffer;
//!   halves of large blocks are sorted in parallel.
//! * **Streaming merge:**
//!   sorted runs are merged by a binary heap holding one record per run, so merge memory does not depend
//!   on the amount of data. Equal records are emitted in the order they were read from the runs.
//! * **Cleanup:**
//!   runs live in a temporary directory and are deleted once the merge completes, fails, is cancelled or
//!   dropped.
//!
//! # Example
//!
//! ```no_run
//! use std::fs;
//! use std::io;
//! use std::path;
//!
//! use ext_int_sort::{write_records, ExternalSorter, ExternalSorterBuilder, MemoryBudget, ParsePolicy, RecordLines};
//!
//! fn main() {
//!     let input_reader = io::BufReader::new(fs::File::open("input.txt").unwrap());
//!     let mut output_writer = io::BufWriter::new(fs::File::create("output.txt").unwrap());
//!
//!     let sorter: ExternalSorter<i32> = ExternalSorterBuilder::new()
//!         .with_tmp_dir(path::Path::new("./"))
//!         .with_memory_budget(MemoryBudget::new(64 * 1024 * 1024, 12, 0.75))
//!         .build()
//!         .unwrap();
//!
//!     let sorted = sorter.sort(RecordLines::new(input_reader, ParsePolicy::Skip)).unwrap();
//!     write_records(&mut output_writer, sorted).unwrap();
//! }
//! ```

pub mod budget;
pub mod buffer;
pub mod lines;
pub mod merger;
pub mod mergesort;
pub mod run;
pub mod sort;

/// Record type sorted by the command line tool.
pub type Record = i32;

pub use budget::{plan, BudgetError, MemoryBudget, DEFAULT_SAFETY_MARGIN};
pub use buffer::LimitedBuffer;
pub use lines::{write_records, ParsePolicy, RecordLines};
pub use merger::BinaryHeapMerger;
pub use mergesort::MergeSorter;
pub use run::{RunError, RunHandle, RunReader, RunStore, RunWriter};
pub use sort::{ExternalSorter, ExternalSorterBuilder, RunList, RunMerger, SortError, SortStats};
