//! onlinepf command-line runner
//!
//! Runs the random-walk model over an evidence stream read from a file or
//! stdin and writes values, results and diagnostics to stdout/stderr or
//! to files.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use onlinepf::sink::create_file;
use onlinepf::{
    LineEvidenceSource, PfResult, RandomWalkModel, Runner, RunnerConfig, StreamError, WriterSink,
};

/// Command-line options
#[derive(Default)]
struct Args {
    config: Option<PathBuf>,
    particles: Option<usize>,
    seed: Option<u64>,
    max_time_step: Option<u64>,
    queries: Vec<String>,
    /// `None` or `-` reads stdin
    evidence: Option<PathBuf>,
    decisions: Option<PathBuf>,
    value_out: Option<PathBuf>,
    results_out: Option<PathBuf>,
    diag_out: Option<PathBuf>,
    verbose: bool,
}

fn print_help() {
    println!("onlinepf - partitioned online particle filter");
    println!();
    println!("USAGE:");
    println!("    onlinepf [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <FILE>         JSON runner configuration");
    println!("    -n, --particles <N>         Number of particles [default: 1000]");
    println!("    -s, --seed <SEED>           RNG seed [default: from entropy]");
    println!("    -m, --max-timestep <T>      Stop after writing time step T");
    println!("    -q, --query <QUERY>         Query template, may repeat (e.g. 'Position(@t)')");
    println!("    -e, --evidence <FILE|->     Evidence stream [default: stdin]");
    println!("    -d, --decisions <FILE>      Decision stream, one line per partition");
    println!("        --value-out <FILE>      Primary value channel [default: stdout]");
    println!("        --results-out <FILE>    Results channel [default: stdout]");
    println!("        --diag-out <FILE>       Diagnostics channel [default: stderr]");
    println!("    -v, --verbose               Debug logging");
    println!("    -h, --help                  Print help information");
}

fn value_of(args: &[String], i: usize, flag: &str) -> String {
    if i + 1 < args.len() {
        args[i + 1].clone()
    } else {
        eprintln!("error: {flag} requires a value");
        std::process::exit(1);
    }
}

fn parse_number<T: std::str::FromStr>(raw: &str, flag: &str) -> T {
    raw.parse().unwrap_or_else(|_| {
        eprintln!("error: invalid value for {flag}: {raw}");
        std::process::exit(1);
    })
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args::default();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--config" | "-c" => parsed.config = Some(PathBuf::from(value_of(&args, i, flag))),
            "--particles" | "-n" => parsed.particles = Some(parse_number(&value_of(&args, i, flag), flag)),
            "--seed" | "-s" => parsed.seed = Some(parse_number(&value_of(&args, i, flag), flag)),
            "--max-timestep" | "-m" => parsed.max_time_step = Some(parse_number(&value_of(&args, i, flag), flag)),
            "--query" | "-q" => parsed.queries.push(value_of(&args, i, flag)),
            "--evidence" | "-e" => parsed.evidence = Some(PathBuf::from(value_of(&args, i, flag))),
            "--decisions" | "-d" => parsed.decisions = Some(PathBuf::from(value_of(&args, i, flag))),
            "--value-out" => parsed.value_out = Some(PathBuf::from(value_of(&args, i, flag))),
            "--results-out" => parsed.results_out = Some(PathBuf::from(value_of(&args, i, flag))),
            "--diag-out" => parsed.diag_out = Some(PathBuf::from(value_of(&args, i, flag))),
            "--verbose" | "-v" => {
                parsed.verbose = true;
                i += 1;
                continue;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
        i += 2;
    }

    parsed
}

fn runner_config(args: &Args) -> PfResult<RunnerConfig> {
    let mut config = match &args.config {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig::default(),
    };
    if let Some(n) = args.particles {
        config.filter.num_particles = n;
    }
    if args.seed.is_some() {
        config.filter.seed = args.seed;
    }
    if args.max_time_step.is_some() {
        config.max_time_step = args.max_time_step;
    }
    config.query_templates.extend(args.queries.iter().cloned());
    config.validate()?;
    Ok(config)
}

fn open_reader(path: &Path) -> PfResult<Box<dyn BufRead + Send>> {
    let file = File::open(path).map_err(|source| StreamError::Open {
        path: path.display().to_string(),
        source,
    })?;
    Ok(Box::new(BufReader::new(file)))
}

fn evidence_source(args: &Args) -> PfResult<LineEvidenceSource> {
    let observations: Box<dyn BufRead + Send> = match &args.evidence {
        Some(path) if path.as_os_str() != "-" => open_reader(path)?,
        _ => Box::new(BufReader::new(io::stdin())),
    };
    let mut source = LineEvidenceSource::from_reader(observations);
    if let Some(path) = &args.decisions {
        source = source.with_decision_reader(open_reader(path)?);
    }
    Ok(source)
}

fn output_sink(args: &Args) -> PfResult<WriterSink> {
    let value: Box<dyn Write + Send> = match &args.value_out {
        Some(path) => create_file(path)?,
        None => Box::new(io::stdout()),
    };
    let results: Box<dyn Write + Send> = match &args.results_out {
        Some(path) => create_file(path)?,
        None => Box::new(io::stdout()),
    };
    let diagnostics: Box<dyn Write + Send> = match &args.diag_out {
        Some(path) => create_file(path)?,
        None => Box::new(io::stderr()),
    };
    Ok(WriterSink::new(value, results, diagnostics))
}

fn run(args: &Args) -> PfResult<()> {
    let config = runner_config(args)?;
    let source = evidence_source(args)?;
    let sink = output_sink(args)?;

    let mut runner = Runner::new(Arc::new(RandomWalkModel::default()), config, source, sink)?;
    let summary = runner.run()?;
    info!(
        summary = %serde_json::to_string(&summary).unwrap_or_default(),
        "onlinepf finished"
    );
    Ok(())
}

fn main() {
    let args = parse_args();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    if let Err(e) = run(&args) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
