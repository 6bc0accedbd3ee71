use anyhow::Context;
use clap::Parser;
use mapple::{
    EXIT_USAGE, IndexerConfig, NullSink, ReduceSourcePolicy, ResultSink, WriterSink, config,
};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mapple")]
#[command(about = "Run a design document's map functions over every active partition of a store")]
struct Cli {
    /// Directory holding the partition files and the master file
    store_dir: PathBuf,

    /// Id of the design document, e.g. `_design/beers`
    design_doc_id: String,

    /// Accepted for compatibility; nothing is written there
    output_dir: Option<PathBuf>,

    /// Store file extension
    #[arg(long, default_value = config::DEFAULT_EXTENSION)]
    extension: String,

    /// Base name of the master file
    #[arg(long, default_value = config::DEFAULT_MASTER_BASE)]
    master: String,

    /// Report the map source in place of a view's reduce source
    #[arg(long)]
    legacy_reduce_source: bool,

    /// Do not print emitted pairs
    #[arg(long)]
    quiet: bool,
}

impl Cli {
    fn into_config(self) -> IndexerConfig {
        let policy = if self.legacy_reduce_source {
            ReduceSourcePolicy::MirrorMap
        } else {
            ReduceSourcePolicy::Reduce
        };

        let mut config = IndexerConfig::new(&self.store_dir, &self.design_doc_id)
            .extension(&self.extension)
            .master_base(&self.master)
            .reduce_policy(policy);
        if let Some(dir) = &self.output_dir {
            config = config.output_dir(dir);
        }
        config
    }
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("failed to install log subscriber")
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(EXIT_USAGE);
        }
        Err(e) => {
            // --help and --version
            let _ = e.print();
            return;
        }
    };

    if let Err(e) = init_tracing() {
        eprintln!("{:#}", e);
        std::process::exit(EXIT_USAGE);
    }

    let quiet = cli.quiet;
    let mut sink: Box<dyn ResultSink> = if quiet {
        Box::new(NullSink)
    } else {
        Box::new(WriterSink::new(std::io::stderr()))
    };

    match mapple::index(cli.into_config(), sink.as_mut()) {
        Ok(summary) => info!(
            partitions = summary.partitions,
            documents = summary.documents,
            emitted = summary.emitted,
            "done"
        ),
        Err(e) => {
            error!(error = %e, "indexing failed");
            std::process::exit(e.exit_code());
        }
    }
}
