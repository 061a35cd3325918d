use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use graph_forge::core::{CoreError, KmerModel, KmerWord};
use graph_forge::count::{configure, run_counting, CountOptions, CountResult, PartitionMode};
use graph_forge::dispatch::CancellationToken;
use graph_forge::graph::simplify::{simplify, SimplifyConfig};
use graph_forge::graph::{build::build_unitigs, state};
use graph_forge::membership::{build_membership, BloomKind, DebloomKind, MembershipConfig};
use graph_forge::util::ProgressBar;
use graph_forge::{Bank, Storage};

#[derive(Parser)]
#[command(
    name = "graph-forge",
    version,
    about = "K-mer counting and de Bruijn graph construction"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count canonical k-mers and write the solid-kmer store
    Count(CommonArgs),
    /// Count, build the membership container and the unitig graph
    Build(BuildArgs),
    /// Inspect a previously written storage tree
    Info(InfoArgs),
}

#[derive(Args)]
struct CommonArgs {
    /// Input bank: FASTA/FASTQ (possibly .gz) or an album file
    input: PathBuf,

    #[arg(short = 'k', long = "kmer-size", default_value_t = 31)]
    kmer_size: usize,

    /// Minimal abundance for a k-mer to be solid
    #[arg(long = "abundance-min", default_value_t = 2)]
    abundance_min: u32,

    /// Worker threads (0 = all cores)
    #[arg(long = "nb-cores", default_value_t = 0)]
    nb_cores: usize,

    /// Memory budget in MB (0 = default)
    #[arg(long = "max-memory", default_value_t = 0)]
    max_memory: u64,

    /// Disk budget in MB (0 = auto from bank size)
    #[arg(long = "max-disk", default_value_t = 0)]
    max_disk: u64,

    /// Output prefix; the storage tree lands in <out>.gforge
    #[arg(long = "out", default_value = "graph")]
    out: String,

    /// Verbosity 0..3
    #[arg(long = "verbose", default_value_t = 1)]
    verbose: u8,

    /// Force hash-mode partition counting
    #[arg(long = "hash-mode")]
    hash_mode: bool,

    /// Estimate the distinct-kmer ratio before planning partitions
    #[arg(long = "estimate-distinct")]
    estimate_distinct: bool,

    /// Storage backend
    #[arg(long = "storage-type", default_value = "file")]
    storage_type: String,
}

#[derive(Args)]
struct InfoArgs {
    /// Output prefix used by a previous count/build run
    #[arg(long = "out", default_value = "graph")]
    out: String,

    /// Number of histogram rows to print
    #[arg(long = "histo-max", default_value_t = 20)]
    histo_max: usize,
}

#[derive(Args)]
struct BuildArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Bloom filter layout
    #[arg(long = "bloom", default_value = "cache")]
    bloom: String,

    /// Critical false-positive representation
    #[arg(long = "debloom", default_value = "cascading")]
    debloom: String,

    /// Skip tip/bulge/EC simplification
    #[arg(long = "no-simplify")]
    no_simplify: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Info(args) = &cli.command {
        init_logging(1);
        return run_info(args);
    }

    let common = match &cli.command {
        Commands::Count(args) => args,
        Commands::Build(args) => &args.common,
        Commands::Info(_) => unreachable!(),
    };
    init_logging(common.verbose);
    validate_common(common)?;

    // one width dispatch at startup; everything downstream is monomorphic
    match &cli.command {
        Commands::Count(args) => {
            if args.kmer_size <= 32 {
                run_count::<u64>(args)?;
            } else {
                run_count::<u128>(args)?;
            }
        }
        Commands::Build(args) => {
            if args.common.kmer_size <= 32 {
                run_build::<u64>(args)?;
            } else {
                run_build::<u128>(args)?;
            }
        }
        Commands::Info(_) => unreachable!(),
    }
    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    if !tracing::dispatcher::has_been_set() {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(level))
            .with_writer(std::io::stderr)
            .init();
    }
}

fn validate_common(args: &CommonArgs) -> Result<()> {
    if args.kmer_size > 64 {
        return Err(anyhow!(CoreError::Config(format!(
            "kmer size {} not supported (maximum 64)",
            args.kmer_size
        ))));
    }
    if args.storage_type != "file" {
        return Err(anyhow!(CoreError::Config(format!(
            "storage type '{}' not supported (only 'file')",
            args.storage_type
        ))));
    }
    Ok(())
}

fn count_options(args: &CommonArgs) -> CountOptions {
    CountOptions {
        kmer_size: args.kmer_size,
        abundance_min: args.abundance_min,
        max_memory_mb: args.max_memory,
        max_disk_mb: args.max_disk,
        nb_cores: args.nb_cores,
        partition_mode: if args.hash_mode {
            PartitionMode::Hash
        } else {
            PartitionMode::Auto
        },
        estimate_distinct: args.estimate_distinct,
        ..Default::default()
    }
}

fn run_count<W: KmerWord>(args: &CommonArgs) -> Result<(Storage, CountResult)> {
    let bank = Bank::open(&args.input)?;
    let options = count_options(args);
    let config = configure::<W>(&options, &bank)?;

    let storage = Storage::create(format!("{}.gforge", args.out))?;
    let tmp_dir = PathBuf::from(format!("{}.gforge.tmp", args.out));
    std::fs::create_dir_all(&tmp_dir)
        .map_err(|e| CoreError::io(format!("create {}", tmp_dir.display()), e))?;

    let progress = if args.verbose >= 1 {
        ProgressBar::new(config.estimate.total_bp * 2, "counting kmers")
    } else {
        ProgressBar::silent()
    };

    let outcome = run_counting::<W>(
        &bank,
        &storage,
        &config,
        &tmp_dir,
        &CancellationToken::new(),
        &progress,
    );
    let _ = std::fs::remove_dir_all(&tmp_dir);
    let result = outcome?;

    println!("📊 kmer counting summary");
    println!("  kmer size        {}", config.kmer_size);
    println!("  passes           {}", config.nb_passes);
    println!("  partitions       {}", config.nb_partitions);
    println!("  distinct kmers   {}", result.nb_distinct);
    println!("  solid kmers      {}", result.nb_solid);
    println!("  auto cutoff      {}", result.cutoff);
    Ok((storage, result))
}

fn run_info(args: &InfoArgs) -> Result<()> {
    let storage = Storage::open(format!("{}.gforge", args.out))?;
    let dsk = storage.group("dsk")?;

    println!("storage {}", storage.root().display());
    let kmer_size: Option<usize> = dsk
        .property("kmer_size")?
        .and_then(|value| value.parse().ok());
    if let Some(k) = kmer_size {
        println!("  kmer size        {k}");
    }
    let cutoff = dsk.collection::<i64>("cutoff");
    if cutoff.exists() {
        println!("  auto cutoff      {}", cutoff.read_all()?[0]);
        println!(
            "  solids at cutoff {}",
            dsk.collection::<i64>("nbsolidsforcutoff").read_all()?[0]
        );
    }
    let solid_exists = dsk.collection::<graph_forge::KmerCount<u64>>("solid").exists();
    if let (Some(k), true) = (kmer_size, solid_exists) {
        // the record layout depends on the kmer width chosen at count time
        let nb_solid = if k <= 32 {
            dsk.collection::<graph_forge::KmerCount<u64>>("solid").nb_items()?
        } else {
            dsk.collection::<graph_forge::KmerCount<u128>>("solid").nb_items()?
        };
        println!("  solid records    {nb_solid}");
    }

    let histogram = dsk.collection::<graph_forge::count::HistogramEntry>("histogram");
    if histogram.exists() {
        println!("  histogram (first {} rows)", args.histo_max);
        for entry in histogram.read_all()?.iter().take(args.histo_max) {
            println!("    {:>6}  {}", entry.count, entry.multiplicity);
        }
    }

    let dbgh5 = storage.root().join("dbgh5");
    if dbgh5.is_dir() {
        let graph = graph_forge::UnitigGraph::load(&storage)?;
        println!("  unitigs          {}", graph.nb_unitigs());
        println!("  graph state      {:#x}", graph.state());
    }
    Ok(())
}

fn run_build<W: KmerWord>(args: &BuildArgs) -> Result<()> {
    let (storage, count) = run_count::<W>(&args.common)?;

    let model: KmerModel<W> = KmerModel::new(args.common.kmer_size);
    let solid: Vec<graph_forge::KmerCount<W>> = storage
        .group("dsk")?
        .collection("solid")
        .read_all()?;

    let membership_config = MembershipConfig {
        bloom_kind: args
            .bloom
            .parse::<BloomKind>()
            .map_err(CoreError::Config)?,
        debloom_kind: args
            .debloom
            .parse::<DebloomKind>()
            .map_err(CoreError::Config)?,
        ..Default::default()
    };
    let membership = build_membership(&model, &solid, &membership_config);
    let missing = solid
        .iter()
        .filter(|record| !membership.contains(record.kmer))
        .count();
    if missing > 0 {
        return Err(anyhow!(CoreError::Corruption(format!(
            "membership container lost {missing} solid kmers"
        ))));
    }
    info!(
        "membership container verified over {} solid kmers",
        solid.len()
    );

    let mut graph = build_unitigs(&model, &solid)?;
    graph.set_state(
        state::INIT_DONE
            | state::CONFIGURATION_DONE
            | state::SORTING_COUNT_DONE
            | state::BCALM2_DONE,
    );

    if !args.no_simplify {
        let stats = simplify(&mut graph, &SimplifyConfig::new());
        if stats.tips_removed + stats.bulges_removed + stats.ecs_removed > 0 {
            graph = graph.compact()?;
        }
    }
    graph.save(&storage)?;

    println!("🧬 graph construction summary");
    println!("  solid kmers      {}", count.nb_solid);
    println!("  unitigs          {}", graph.nb_live_unitigs());
    println!("  storage          {}", storage.root().display());
    Ok(())
}
