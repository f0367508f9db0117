//! mdbox CLI
//!
//! Inspect, generate and update saved box trees, and combine interval sets.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]

use clap::{Parser, Subcommand, ValueEnum};
use mdbox_core::{
    BoxController, BoxTree, Dimension, IntervalSet, MdEvent, MdFullEvent, MdLeanEvent,
};
use mdbox_io::{
    load_from_path, read_header, save_to_path, BoxIndex, FileGroup, Hdf5File, LoadOptions,
    SaveOptions, SaveReport,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file error: {0}")]
    MdboxIo(#[from] mdbox_io::Error),

    #[error("core error: {0}")]
    Core(#[from] mdbox_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),
}

/// Interval set operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Op {
    /// Filter/splitter combination (`+`)
    Plus,
    /// Pairwise intersection
    And,
    /// Sorted, merged union
    Or,
    /// Complement over the whole time range (single input)
    Not,
}

/// Box-tree files and time-interval sets.
#[derive(Parser)]
#[command(name = "mdbox")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a summary of a saved box tree
    Info {
        /// Input HDF5 file
        input: PathBuf,
    },

    /// Build a tree of synthetic lean events, split it and save it
    Generate {
        /// Output HDF5 file
        output: PathBuf,

        /// Number of dimensions (1-4)
        #[arg(long, default_value = "3")]
        dims: usize,

        /// Number of events
        #[arg(long, default_value = "100000")]
        events: usize,

        /// Event count above which a box is split
        #[arg(long, default_value = "1000")]
        split_threshold: usize,

        /// Maximum split depth
        #[arg(long, default_value = "5")]
        max_depth: usize,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Refresh cached statistics of a saved tree and rewrite its box index in place
    Update {
        /// HDF5 file written by `generate` or another save
        input: PathBuf,
    },

    /// Combine JSON interval sets and print the result as JSON
    Combine {
        /// One (for `not`) or two JSON files of `{"start","stop","index"}` intervals
        #[arg(required = true, num_args = 1..=2)]
        inputs: Vec<PathBuf>,

        /// Operator to apply
        #[arg(long, value_enum)]
        op: Op,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Info { input } => info(&input),
        Commands::Generate {
            output,
            dims,
            events,
            split_threshold,
            max_depth,
            seed,
        } => {
            let start = Instant::now();
            let params = GenerateParams {
                events,
                split_threshold,
                max_depth,
                seed,
            };
            let report = match dims {
                1 => generate::<1>(&output, &params)?,
                2 => generate::<2>(&output, &params)?,
                3 => generate::<3>(&output, &params)?,
                4 => generate::<4>(&output, &params)?,
                other => {
                    return Err(CliError::Usage(format!(
                        "--dims must be between 1 and 4, got {other}"
                    )))
                }
            };
            println!(
                "Wrote {} events in {} boxes to {} ({:.2}s)",
                report.events_written,
                report.boxes_visited,
                output.display(),
                start.elapsed().as_secs_f64()
            );
            Ok(())
        }
        Commands::Update { input } => {
            let report = update(&input)?;
            println!(
                "Updated {} boxes ({} new events) in {}",
                report.boxes_visited,
                report.events_written,
                input.display()
            );
            Ok(())
        }
        Commands::Combine { inputs, op } => {
            let sets = inputs
                .iter()
                .map(|path| read_interval_set(path))
                .collect::<Result<Vec<_>>>()?;
            let result = combine(&sets, op)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}

fn info(input: &Path) -> Result<()> {
    let mut file = Hdf5File::open(input)?;
    let header = read_header(&mut file)?;
    file.open_group("data")?;
    let index = BoxIndex::read(&mut file, header.dimensions.len())?;
    let (empty, leaves, grids) = index.type_counts();

    println!("File: {}", input.display());
    if !header.title.is_empty() {
        println!("Title: {}", header.title);
    }
    println!("Event type: {}", header.event_type);
    println!("Dimensions: {}", header.dimensions.len());
    for dimension in &header.dimensions {
        println!(
            "  {} [{}]: {} .. {} ({} bins)",
            dimension.name, dimension.units, dimension.min, dimension.max, dimension.n_bins
        );
    }
    println!(
        "Boxes: {} slots, {} grid, {} leaf, {} empty",
        index.max_boxes(),
        grids,
        leaves,
        empty
    );
    println!("Events: {}", index.total_events());
    if let Some(root) = (0..index.max_boxes()).find(|&id| index.depth(id) == Some(0)) {
        let (signal, error_squared) = index.statistics(root);
        println!("Signal: {signal} (error squared {error_squared})");
    }
    Ok(())
}

struct GenerateParams {
    events: usize,
    split_threshold: usize,
    max_depth: usize,
    seed: u64,
}

fn generate<const ND: usize>(output: &Path, params: &GenerateParams) -> Result<SaveReport> {
    let dimensions = (0..ND)
        .map(|d| Dimension::new(&format!("dim{d}"), "arb", -1.0, 1.0, 100))
        .collect::<mdbox_core::Result<Vec<_>>>()?;
    let controller = BoxController::new(ND)
        .with_split_threshold(params.split_threshold)
        .with_max_depth(params.max_depth);
    let mut tree: BoxTree<MdLeanEvent<ND>> = BoxTree::new(dimensions, controller)?;
    tree.set_title(format!("synthetic {ND}D events"));

    let mut rng = StdRng::seed_from_u64(params.seed);
    let events = (0..params.events).map(|_| {
        let center: [f32; ND] = std::array::from_fn(|_| rng.gen_range(-1.0f32..1.0));
        let signal = rng.gen_range(0.5f32..1.5);
        MdLeanEvent::new(signal, signal, center)
    });
    let added = tree.add_events(events)?;
    let splits = tree.split_all_if_needed()?;
    tree.refresh_cache();
    log::info!(
        "generated {added} events, {splits} splits, {} boxes",
        tree.len()
    );

    Ok(save_to_path(&mut tree, output, &SaveOptions::new())?)
}

fn update(input: &Path) -> Result<SaveReport> {
    let header = {
        let mut file = Hdf5File::open(input)?;
        read_header(&mut file)?
    };
    match (header.event_type.as_str(), header.dimensions.len()) {
        ("MDLeanEvent", 1) => update_as::<MdLeanEvent<1>>(input),
        ("MDLeanEvent", 2) => update_as::<MdLeanEvent<2>>(input),
        ("MDLeanEvent", 3) => update_as::<MdLeanEvent<3>>(input),
        ("MDLeanEvent", 4) => update_as::<MdLeanEvent<4>>(input),
        ("MDEvent", 1) => update_as::<MdFullEvent<1>>(input),
        ("MDEvent", 2) => update_as::<MdFullEvent<2>>(input),
        ("MDEvent", 3) => update_as::<MdFullEvent<3>>(input),
        ("MDEvent", 4) => update_as::<MdFullEvent<4>>(input),
        (event_type, nd) => Err(CliError::Usage(format!(
            "unsupported tree: {nd}D {event_type}"
        ))),
    }
}

fn update_as<E: MdEvent>(input: &Path) -> Result<SaveReport> {
    let mut tree: BoxTree<E> = load_from_path(input, &LoadOptions::new().with_file_backed(true))?;
    tree.refresh_cache();
    Ok(save_to_path(&mut tree, input, &SaveOptions::update())?)
}

fn read_interval_set(path: &Path) -> Result<IntervalSet> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn combine(sets: &[IntervalSet], op: Op) -> Result<IntervalSet> {
    match (op, sets) {
        (Op::Not, [set]) => Ok(!set),
        (Op::Not, _) => Err(CliError::Usage("`not` takes exactly one input".to_string())),
        (Op::Plus, [a, b]) => Ok(a.combine(b)?),
        (Op::And, [a, b]) => Ok(a & b),
        (Op::Or, [a, b]) => Ok(a | b),
        (op, _) => Err(CliError::Usage(format!(
            "`{op:?}` takes exactly two inputs"
        ))),
    }
}
