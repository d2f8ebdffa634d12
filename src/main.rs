use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use ringjoin::{CsvSink, JoinConfig, JoinEngine, Result, Strategy, csvio, logging};

#[derive(Parser)]
#[clap(name = "ringjoin")]
struct Arguments {
    /// Probe side relation. Every tuple appears in the output at least once.
    #[clap(long = "left-file", alias = "R-file")]
    left_file: PathBuf,

    /// Build side relation.
    #[clap(long = "right-file", alias = "S-file")]
    right_file: PathBuf,

    /// Number of workers, defaults to the number of CPUs.
    #[clap(long, alias = "concurrency-count", env = "RINGJOIN_WORKERS")]
    workers: Option<usize>,

    #[clap(long, default_value = "output.csv")]
    output_file: PathBuf,

    /// `ring` (pipeline) or `colocated` (redistribution).
    #[clap(long, default_value = "ring")]
    strategy: Strategy,

    /// Seconds a ring worker waits on a neighbour before the join fails.
    #[clap(long, default_value_t = 60)]
    handoff_timeout_secs: u64,

    #[clap(long, default_value = "warn", env = "RINGJOIN_LOG")]
    log_level: tracing::Level,
}

fn main() {
    let args = Arguments::parse();
    if let Err(e) = logging::init(args.log_level) {
        eprintln!("ERROR: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(args) {
        eprintln!("ERROR: {e}");
        std::process::exit(1);
    }
}

fn run(args: Arguments) -> Result<()> {
    let start = Instant::now();

    let left = csvio::read_relation(&args.left_file)?;
    let right = csvio::read_relation(&args.right_file)?;

    let mut config = JoinConfig::default()
        .with_strategy(args.strategy)
        .with_handoff_timeout(Duration::from_secs(args.handoff_timeout_secs));
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    let engine = JoinEngine::new(config);

    let sink = CsvSink::new(BufWriter::new(File::create(&args.output_file)?));
    let summary = engine.stream(&left, &right, &sink)?;
    sink.into_inner()?;

    println!(
        "wrote {} rows ({} matched, {} padded) to {}",
        summary.total_rows(),
        summary.matched_rows,
        summary.padded_rows,
        args.output_file.display()
    );
    println!("elapsed: {:.3}s", start.elapsed().as_secs_f64());
    Ok(())
}
