use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use spatialize::decimate::decimate;
use spatialize::io::{self, ConfigDocument, ExportReport, SimulationSummary, SpatializationExport};
use spatialize::{Anchor, EngineKind, ForceSimulation, Pipeline};

/// Force layout and spatialization of character/post graphs.
#[derive(Parser)]
#[command(name = "spatialize")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lay out anchors, then place leaves with the configured passes
    Layout {
        /// Anchor records (.json)
        #[arg(short, long)]
        anchors: PathBuf,

        /// Leaf records (.json)
        #[arg(short, long)]
        leaves: PathBuf,

        /// Edge records (.json); without edges the simulation is skipped
        #[arg(short, long)]
        edges: Option<PathBuf>,

        /// Pass and simulation configuration (.json, .yaml, .yml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Simulation ticks to run before the passes
        #[arg(short, long, default_value = "300")]
        ticks: usize,

        /// Force engine: auto, sequential, tiled, gpu
        #[arg(long, default_value = "auto")]
        engine: EngineKind,

        /// Keep at most this many leaves per anchor (overrides the config)
        #[arg(long)]
        max_leaves_per_anchor: Option<usize>,

        /// Keep this fraction (0-1) of the leaves (overrides the config)
        #[arg(long)]
        keep_fraction: Option<f32>,

        /// Export file (.json)
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Run only the force simulation and export the anchors
    Simulate {
        /// Anchor records (.json)
        #[arg(short, long)]
        anchors: PathBuf,

        /// Edge records (.json)
        #[arg(short, long)]
        edges: PathBuf,

        /// Simulation configuration (.json, .yaml, .yml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Simulation ticks
        #[arg(short, long, default_value = "300")]
        ticks: usize,

        /// Force engine: auto, sequential, tiled, gpu
        #[arg(long, default_value = "auto")]
        engine: EngineKind,

        /// Export file (.json)
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ConfigDocument> {
    match path {
        Some(path) => {
            ConfigDocument::load(path).with_context(|| format!("failed to read config {}", path.display()))
        }
        None => Ok(ConfigDocument::default()),
    }
}

fn simulate_anchors(
    anchors: &[Anchor],
    edges_path: &Path,
    config: &ConfigDocument,
    ticks: usize,
    engine: EngineKind,
) -> anyhow::Result<(Vec<Anchor>, SimulationSummary)> {
    let edges = io::load_edges(edges_path, &config.simulation)
        .with_context(|| format!("failed to read edges {}", edges_path.display()))?;
    let mut sim = ForceSimulation::new(anchors, &edges, config.simulation.clone(), engine)?;
    sim.run(ticks);

    let summary = SimulationSummary {
        engine: sim.engine_name().to_string(),
        ticks: sim.ticks(),
        sanitized: sim.sanitized_total(),
        build: sim.build_report(),
    };
    let anchors = sim.anchors();
    sim.dispose();
    Ok((anchors, summary))
}

/// Input files and options of the `layout` command
struct LayoutArgs<'a> {
    anchors: &'a Path,
    leaves: &'a Path,
    edges: Option<&'a Path>,
    config: Option<&'a Path>,
    ticks: usize,
    engine: EngineKind,
    max_leaves_per_anchor: Option<usize>,
    keep_fraction: Option<f32>,
    output: &'a Path,
}

fn layout(args: LayoutArgs<'_>) -> anyhow::Result<()> {
    let LayoutArgs {
        anchors,
        leaves,
        edges,
        config,
        ticks,
        engine,
        max_leaves_per_anchor,
        keep_fraction,
        output,
    } = args;

    let mut config = load_config(config)?;
    if max_leaves_per_anchor.is_some() {
        config.decimation.max_leaves_per_anchor = max_leaves_per_anchor;
    }
    if keep_fraction.is_some() {
        config.decimation.keep_fraction = keep_fraction;
    }

    let anchors = io::load_anchors(anchors).with_context(|| format!("failed to read anchors {}", anchors.display()))?;
    let leaves = io::load_leaves(leaves).with_context(|| format!("failed to read leaves {}", leaves.display()))?;
    let (leaves, decimation) = if config.decimation.is_active() {
        let (leaves, report) = decimate(leaves, &config.decimation);
        (leaves, Some(report))
    } else {
        (leaves, None)
    };

    let (anchors, simulation) = match edges {
        Some(edges) => {
            let (anchors, summary) = simulate_anchors(&anchors, edges, &config, ticks, engine)?;
            (anchors, Some(summary))
        }
        None => (anchors, None),
    };

    let result = Pipeline::new().run(&leaves, &anchors, &config.passes);
    let export = SpatializationExport::new(
        &anchors,
        &result.leaves,
        ExportReport {
            pipeline: result.report,
            simulation,
            decimation,
        },
    );
    export.write(output).with_context(|| format!("failed to write {}", output.display()))?;

    println!(
        "Placed {} leaves around {} anchors in {}",
        export.leaves.len(),
        export.anchors.len(),
        output.display()
    );
    Ok(())
}

fn simulate(
    anchors: &Path,
    edges: &Path,
    config: Option<&Path>,
    ticks: usize,
    engine: EngineKind,
    output: &Path,
) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let anchors = io::load_anchors(anchors).with_context(|| format!("failed to read anchors {}", anchors.display()))?;
    let (anchors, summary) = simulate_anchors(&anchors, edges, &config, ticks, engine)?;

    let export = SpatializationExport::new(
        &anchors,
        &[],
        ExportReport {
            simulation: Some(summary),
            ..ExportReport::default()
        },
    );
    export.write(output).with_context(|| format!("failed to write {}", output.display()))?;

    println!("Simulated {} anchors for {ticks} ticks into {}", anchors.len(), output.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("spatialize=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Layout {
            anchors,
            leaves,
            edges,
            config,
            ticks,
            engine,
            max_leaves_per_anchor,
            keep_fraction,
            output,
        } => layout(LayoutArgs {
            anchors: &anchors,
            leaves: &leaves,
            edges: edges.as_deref(),
            config: config.as_deref(),
            ticks,
            engine,
            max_leaves_per_anchor,
            keep_fraction,
            output: &output,
        }),
        Commands::Simulate {
            anchors,
            edges,
            config,
            ticks,
            engine,
            output,
        } => simulate(&anchors, &edges, config.as_deref(), ticks, engine, &output),
    }
}
