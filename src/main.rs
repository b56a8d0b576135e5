use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;
use std::process;
use std::time::Instant;

use bytesize::{ByteSize, MIB};
use clap::ArgEnum;
use env_logger;
use log;
use rand::Rng;

use ext_int_sort::{
    write_records, ExternalSorter, ExternalSorterBuilder, MemoryBudget, ParsePolicy, Record, RecordLines,
    DEFAULT_SAFETY_MARGIN,
};

/// Widest `i32` text ("-2147483648") plus a line feed.
const DEFAULT_RECORD_SIZE: u64 = 12;
/// Average generated record size: ten digits plus a line feed.
const GENERATED_RECORD_SIZE: u64 = 11;
/// Memory limit used when the environment doesn't report one.
const FALLBACK_MEMORY_LIMIT: u64 = 512 * MIB;
/// cgroup limits above this are treated as "no limit".
const UNLIMITED_THRESHOLD: u64 = 1 << 60;

const CGROUP_LIMIT_PATHS: [&str; 2] = [
    "/sys/fs/cgroup/memory/memory.limit_in_bytes",
    "/sys/fs/cgroup/memory.max",
];

fn main() {
    let arg_parser = build_arg_parser().get_matches();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    match arg_parser.subcommand() {
        Some(("sort", args)) => sort(args),
        Some(("generate", args)) => generate(args),
        _ => unreachable!("subcommand is required"),
    }
}

fn sort(args: &clap::ArgMatches) {
    let memory: Option<ByteSize> = args
        .value_of("memory")
        .map(|memory| memory.parse::<ByteSize>().expect("value is pre-validated"));
    let safety_margin: f64 = args
        .is_present("safety_margin")
        .then(|| args.value_of_t_or_exit("safety_margin"))
        .unwrap_or(DEFAULT_SAFETY_MARGIN);
    let record_size: u64 = args
        .is_present("record_size")
        .then(|| args.value_of_t_or_exit("record_size"))
        .unwrap_or(DEFAULT_RECORD_SIZE);
    let threads: Option<usize> = args.is_present("threads").then(|| args.value_of_t_or_exit("threads"));
    let tmp_dir: Option<&str> = args.value_of("tmp_dir");
    let policy = if args.is_present("strict") { ParsePolicy::Strict } else { ParsePolicy::Skip };

    let memory_limit = match memory {
        Some(memory) => memory.as_u64(),
        None => detect_memory_limit().unwrap_or_else(|| {
            log::info!("memory limit is not set, using {}", ByteSize(FALLBACK_MEMORY_LIMIT));
            FALLBACK_MEMORY_LIMIT
        }),
    };
    log::info!(
        "memory limit: {}, safe memory limit: {}",
        ByteSize(memory_limit),
        ByteSize((memory_limit as f64 * safety_margin) as u64)
    );

    let input = args.value_of("input").expect("value is required");
    let input_stream = match fs::File::open(input) {
        Ok(file) => io::BufReader::new(file),
        Err(err) => {
            log::error!("input file opening error: {}", err);
            process::exit(1);
        }
    };

    let output = args.value_of("output").expect("value is required");
    let mut output_stream = match fs::File::create(output) {
        Ok(file) => io::BufWriter::new(file),
        Err(err) => {
            log::error!("output file creation error: {}", err);
            process::exit(1);
        }
    };

    let mut sorter_builder =
        ExternalSorterBuilder::new().with_memory_budget(MemoryBudget::new(memory_limit, record_size, safety_margin));
    if let Some(threads) = threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }
    if let Some(tmp_dir) = tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(Path::new(tmp_dir));
    }

    let sorter: ExternalSorter<Record> = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    let mut input = RecordLines::new(input_stream, policy);

    let timer = Instant::now();

    let runs = match sorter.partition(&mut input) {
        Ok(runs) => runs,
        Err(err) => {
            log::error!("data sorting error: {}", err);
            process::exit(1);
        }
    };
    let stats = runs.stats();
    log::info!(
        "runs created: {}, records: {}, skipped lines: {}",
        stats.runs,
        stats.records,
        input.skipped()
    );

    let sorted_stream = match runs.merge() {
        Ok(sorted_stream) => sorted_stream,
        Err(err) => {
            log::error!("runs merging error: {}", err);
            process::exit(1);
        }
    };

    match write_records(&mut output_stream, sorted_stream) {
        Ok(written) => log::info!("sorting finished ({} records, elapsed: {:?})", written, timer.elapsed()),
        Err(err) => {
            log::error!("sorting stream error: {}", err);
            process::exit(1);
        }
    }
}

fn generate(args: &clap::ArgMatches) {
    let output = args.value_of("output").expect("value is required");
    let size = args
        .value_of("size")
        .expect("value has default")
        .parse::<ByteSize>()
        .expect("value is pre-validated");

    let mut output_stream = match fs::File::create(output) {
        Ok(file) => io::BufWriter::new(file),
        Err(err) => {
            log::error!("output file creation error: {}", err);
            process::exit(1);
        }
    };

    let count = size.as_u64() / GENERATED_RECORD_SIZE;
    let mut rng = rand::thread_rng();
    for _ in 0..count {
        if let Err(err) = writeln!(output_stream, "{}", rng.gen::<Record>()) {
            log::error!("data saving error: {}", err);
            process::exit(1);
        }
    }

    if let Err(err) = output_stream.flush() {
        log::error!("data flushing error: {}", err);
        process::exit(1);
    }
    log::info!("file {} created ({} records)", output, count);
}

#[derive(Copy, Clone, Debug, PartialEq, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn validate_size(value: &str) -> Result<(), String> {
    match value.parse::<ByteSize>() {
        Ok(_) => Ok(()),
        Err(err) => Err(format!("size format incorrect: {}", err)),
    }
}

fn build_arg_parser() -> clap::App<'static> {
    clap::App::new("ext-int-sort")
        .about("bounded memory external integer sorter")
        .setting(clap::AppSettings::SubcommandRequiredElseHelp)
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .subcommand(
            clap::App::new("sort")
                .about("sorts a file of newline-delimited integers")
                .arg(
                    clap::Arg::new("input")
                        .short('i')
                        .long("input")
                        .help("file to be sorted")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("result file")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("memory")
                        .short('m')
                        .long("memory")
                        .help("memory budget (e.g. 256MiB), detected from cgroup limits if omitted")
                        .takes_value(true)
                        .validator(validate_size),
                )
                .arg(
                    clap::Arg::new("safety_margin")
                        .long("safety-margin")
                        .help("fraction of the memory budget used for records")
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("record_size")
                        .long("record-size")
                        .help("estimated size of a single record in bytes")
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("threads")
                        .short('t')
                        .long("threads")
                        .help("number of threads to use for parallel sorting")
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("tmp_dir")
                        .short('d')
                        .long("tmp-dir")
                        .help("directory to be used to store temporary data")
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("strict")
                        .long("strict")
                        .help("fail on malformed lines instead of skipping them"),
                ),
        )
        .subcommand(
            clap::App::new("generate")
                .about("generates a file of random integers")
                .arg(
                    clap::Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("result file")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("size")
                        .short('s')
                        .long("size")
                        .help("approximate file size (e.g. 1GiB)")
                        .takes_value(true)
                        .default_value("1GiB")
                        .validator(validate_size),
                ),
        )
}

fn detect_memory_limit() -> Option<u64> {
    CGROUP_LIMIT_PATHS
        .iter()
        .find_map(|path| read_cgroup_limit(Path::new(path)))
}

fn read_cgroup_limit(path: &Path) -> Option<u64> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            log::debug!("cgroup memory limit not read from {}: {}", path.display(), err);
            return None;
        }
    };

    // cgroup v2 reports "max", cgroup v1 a huge number when there is no limit
    match content.trim().parse::<u64>() {
        Ok(limit) if limit > 0 && limit < UNLIMITED_THRESHOLD => {
            log::debug!("cgroup memory limit from {}: {}", path.display(), limit);
            Some(limit)
        }
        _ => None,
    }
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::{build_arg_parser, LogLevel};

    #[rstest]
    #[case(vec!["ext-int-sort", "sort", "-i", "in.txt", "-o", "out.txt"], LogLevel::Info)]
    #[case(vec!["ext-int-sort", "-l", "debug", "sort", "-i", "in.txt", "-o", "out.txt", "-m", "64MiB"], LogLevel::Debug)]
    fn test_sort_args(#[case] argv: Vec<&str>, #[case] expected_level: LogLevel) {
        let matches = build_arg_parser().try_get_matches_from(argv).unwrap();
        let log_level: LogLevel = matches.value_of_t_or_exit("log_level");
        assert_eq!(log_level, expected_level);

        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "sort");
        assert_eq!(args.value_of("input"), Some("in.txt"));
        assert_eq!(args.value_of("output"), Some("out.txt"));
        assert!(!args.is_present("strict"));
    }

    #[rstest]
    #[case(vec!["ext-int-sort"])]
    #[case(vec!["ext-int-sort", "sort", "-o", "out.txt"])]
    #[case(vec!["ext-int-sort", "sort", "-i", "in.txt", "-o", "out.txt", "-m", "lots"])]
    #[case(vec!["ext-int-sort", "-l", "loud", "generate", "-o", "out.txt"])]
    #[case(vec!["ext-int-sort", "generate", "-o", "out.txt", "-s", "huge"])]
    fn test_invalid_args(#[case] argv: Vec<&str>) {
        assert!(build_arg_parser().try_get_matches_from(argv).is_err());
    }

    #[test]
    fn test_generate_default_size() {
        let matches = build_arg_parser()
            .try_get_matches_from(vec!["ext-int-sort", "generate", "-o", "out.txt"])
            .unwrap();

        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "generate");
        assert_eq!(args.value_of("size"), Some("1GiB"));
    }
}
