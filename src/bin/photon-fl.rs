//! PhotonDB free-list tool
//!
//! Inspect free-list limits, run a synthetic allocation workload, and try
//! out the priority heap from the command line.
//!
//! # Examples
//!
//! ```bash
//! # Effective limits (defaults, then file, then PHOTON_FL__* env)
//! photon-fl --config limits.toml limits
//!
//! # Allocation workload, statistics as JSON
//! photon-fl simulate --rounds 10000 --max-elements 32
//!
//! # Extraction order of a max heap
//! photon-fl heap --max 5 1 9 3 7
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use photon_freelist::freelist::{ArrayFreeList, BlockFreeList, FactoryFreeList, RegularFreeList};
use photon_freelist::{
    Allocation, FreeListLimits, FreeListManager, HeapKind, HeapObject, HeapPosition,
    PriorityHeap,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Free-list allocator and priority heap tooling
#[derive(Parser, Debug)]
#[command(name = "photon-fl")]
#[command(version = photon_freelist::VERSION)]
#[command(about = "PhotonDB free-list allocator tooling", long_about = None)]
#[command(author = "Anton Feldmann <anton.feldmann@gmail.com>")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML file with free-list limits
    #[arg(long, global = true, env = "PHOTON_FL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn", env = "RUST_LOG")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the effective limits as TOML
    Limits,

    /// Run a deterministic allocation workload and print statistics
    Simulate(SimulateArgs),

    /// Insert priorities into a heap and print the extraction order
    Heap(HeapArgs),
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Allocation rounds
    #[arg(long, default_value_t = 1000)]
    rounds: usize,

    /// Largest array element count
    #[arg(long, default_value_t = 16)]
    max_elements: usize,

    /// Workload seed
    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,
}

#[derive(Args, Debug)]
struct HeapArgs {
    /// Largest priority first
    #[arg(long)]
    max: bool,

    /// Priorities to insert
    #[arg(required = true, allow_negative_numbers = true)]
    priorities: Vec<i64>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli);

    let limits = FreeListLimits::load(cli.config.as_deref())
        .context("Failed to load free-list limits")?;

    match cli.command {
        Commands::Limits => {
            print!("{}", limits.to_toml_string()?);
        }
        Commands::Simulate(args) => simulate_command(limits, args)?,
        Commands::Heap(args) => heap_command(args)?,
    }
    Ok(())
}

fn setup_logging(cli: &Cli) {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::WARN);
    let filter = EnvFilter::from_default_env().add_directive(log_level.into());

    // Logs go to stderr; stdout carries the command output
    if cli.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(!cli.no_color),
            )
            .with(filter)
            .init();
    }
}

/// Small deterministic generator for the workload
struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next() % bound.max(1) as u64) as usize
    }
}

const PAGE_SIZES: [usize; 4] = [64, 256, 1024, 4096];
const LIVE_PER_LIST: usize = 32;

/// Blocks the workload is holding
#[derive(Default)]
struct Held {
    nodes: Vec<Allocation<RegularFreeList>>,
    keys: Vec<Allocation<ArrayFreeList>>,
    pages: Vec<Allocation<BlockFreeList>>,
    runs: Vec<Allocation<BlockFreeList>>,
    objects: Vec<Allocation<FactoryFreeList>>,
}

fn take<T>(held: &mut Vec<T>, rng: &mut XorShift) -> Option<T> {
    if held.len() < LIVE_PER_LIST {
        return None;
    }
    let index = rng.below(held.len());
    Some(held.swap_remove(index))
}

fn simulate_command(limits: FreeListLimits, args: SimulateArgs) -> anyhow::Result<()> {
    info!(rounds = args.rounds, max_elements = args.max_elements, "Starting workload");
    let mut fl = FreeListManager::with_limits(limits);
    let mut rng = XorShift::new(args.seed);

    let nodes = fl.declare_regular("nodes", 48)?;
    let keys = fl.declare_array("keys", 16, 8, args.max_elements)?;
    let pages = fl.declare_block("pages")?;
    let runs = fl.declare_sequence("offsets", 8)?;
    let factory = fl.factory_create(24)?;
    let mut held = Held::default();

    for _ in 0..args.rounds {
        let node = fl.regular_calloc(nodes)?;
        held.nodes.push(node);

        let mut key = fl.array_alloc(keys, rng.below(args.max_elements + 1))?;
        if rng.below(4) == 0 {
            fl.array_realloc(&mut key, rng.below(args.max_elements + 1))?;
        }
        held.keys.push(key);

        let page = fl.block_alloc(pages, PAGE_SIZES[rng.below(PAGE_SIZES.len())])?;
        held.pages.push(page);

        let mut run = fl.seq_alloc(&runs, 1 + rng.below(8))?;
        if rng.below(4) == 0 {
            fl.seq_realloc(&runs, &mut run, 1 + rng.below(8))?;
        }
        held.runs.push(run);

        let object = fl.factory_alloc(factory)?;
        held.objects.push(object);

        if let Some(a) = take(&mut held.nodes, &mut rng) {
            fl.regular_free(a)?;
        }
        if let Some(a) = take(&mut held.keys, &mut rng) {
            fl.array_free(a)?;
        }
        if let Some(a) = take(&mut held.pages, &mut rng) {
            fl.block_free(a)?;
        }
        if let Some(a) = take(&mut held.runs, &mut rng) {
            fl.seq_free(&runs, a)?;
        }
        if let Some(a) = take(&mut held.objects, &mut rng) {
            fl.factory_free(a)?;
        }
    }

    println!("{}", serde_json::to_string_pretty(&fl.stats())?);

    for a in held.nodes.drain(..) {
        fl.regular_free(a)?;
    }
    for a in held.keys.drain(..) {
        fl.array_free(a)?;
    }
    for a in held.pages.drain(..) {
        fl.block_free(a)?;
    }
    for a in held.runs.drain(..) {
        fl.seq_free(&runs, a)?;
    }
    for a in held.objects.drain(..) {
        fl.factory_free(a)?;
    }
    fl.factory_destroy(factory)?;

    let retained = fl.terminate_all()?;
    if retained > 0 {
        warn!(retained, "Lists retained at teardown");
    }
    println!("retained lists after teardown: {}", retained);
    Ok(())
}

/// Heap entry remembering which argument it came from
struct Item {
    argument: usize,
    position: HeapPosition,
}

impl HeapObject for Item {
    fn heap_position(&self) -> usize {
        self.position.heap_position()
    }

    fn set_heap_position(&self, position: usize) {
        self.position.set_heap_position(position)
    }
}

fn heap_command(args: HeapArgs) -> anyhow::Result<()> {
    let kind = if args.max { HeapKind::Max } else { HeapKind::Min };
    let mut heap = PriorityHeap::new(kind)?;

    for (argument, &priority) in args.priorities.iter().enumerate() {
        heap.insert(
            priority,
            Item {
                argument,
                position: HeapPosition::new(),
            },
        )?;
    }
    heap.check_invariants()?;

    while !heap.is_empty() {
        let (priority, item) = heap.extract()?;
        println!("{}\t(argument {})", priority, item.argument + 1);
    }
    heap.close();
    Ok(())
}
