//! `ti`: command-line front end for the test intelligence engine.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;

use ti_engine::callgraph::Callgraph;
use ti_engine::config::TiServiceConfig;
use ti_engine::db::schema::initialize_database;
use ti_engine::observability::init_logging;
use ti_engine::types::{GetVgReq, MergePartialCgRequest, Scope, SelectTestsReq, VcsInfo};
use ti_engine::{TiError, TiService};

/// Test intelligence: call-graph ingestion, branch merge, and test selection.
#[derive(Parser)]
#[command(name = "ti", version, about)]
#[command(propagate_version = true)]
struct Cli {
    /// Service config file (YAML)
    #[arg(long, short = 'c', global = true, default_value = "ti.yaml")]
    config: PathBuf,

    /// Override the store path from the config
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store and its schema
    Init,

    /// Upload a partial callgraph produced by a CI run
    Upload(UploadArgs),

    /// Merge a commit's partial callgraph into its target branch
    Merge(RequestArgs),

    /// Select the tests a change set must run
    Select(SelectArgs),

    /// Build the impact graph around a class
    Vis(RequestArgs),
}

#[derive(Args)]
struct UploadArgs {
    #[arg(long)]
    account: String,
    #[arg(long, default_value = "")]
    org: String,
    #[arg(long, default_value = "")]
    project: String,
    #[arg(long)]
    repo: String,
    /// Branch the CI run built
    #[arg(long)]
    branch: String,
    #[arg(long)]
    commit: String,
    /// Branch the change will land on
    #[arg(long)]
    target: String,
    /// Callgraph dump files
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// Visualization dump files
    #[arg(long = "vis")]
    vis_files: Vec<PathBuf>,
}

#[derive(Args)]
struct RequestArgs {
    /// JSON request body
    request: PathBuf,
}

#[derive(Args)]
struct SelectArgs {
    /// JSON request body
    request: PathBuf,
    #[arg(long)]
    account: String,
    /// Also run tests that call reflection (defaults to the config value)
    #[arg(long)]
    reflection: Option<bool>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(kind = ?err.kind(), "{err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), TiError> {
    let mut config = TiServiceConfig::load(Some(cli.config.as_path()))?;
    if let Some(db) = cli.db {
        config.store.path = db;
    }
    init_logging(&config.logging.filter);

    if let Commands::Init = cli.command {
        initialize_database(&config.store.path)?;
        tracing::info!(path = %config.store.path, "store initialized");
        return Ok(());
    }

    let service = TiService::open(config)?;
    match cli.command {
        Commands::Init => Ok(()),
        Commands::Upload(args) => {
            let cg = Callgraph::from_files(&args.files, &args.vis_files)?;
            tracing::info!(
                nodes = cg.nodes.len(),
                relations = cg.relations.len(),
                vis = cg.vis_relations.len(),
                "parsed callgraph"
            );
            let resp = service
                .upload_partial_cg(
                    cg,
                    VcsInfo::new(args.repo, args.branch, args.commit),
                    Scope::new(args.account, args.org, args.project),
                    args.target,
                )
                .await?;
            print_json(&resp)
        }
        Commands::Merge(args) => {
            let req: MergePartialCgRequest = read_request(&args.request)?;
            service.merge_partial_cg(req).await?;
            println!("merged");
            Ok(())
        }
        Commands::Select(args) => {
            let req: SelectTestsReq = read_request(&args.request)?;
            let resp = service
                .select_tests(req, args.account, args.reflection)
                .await?;
            print_json(&resp)
        }
        Commands::Vis(args) => {
            let req: GetVgReq = read_request(&args.request)?;
            let resp = service.get_vg(req).await?;
            print_json(&resp)
        }
    }
}

fn read_request<T: DeserializeOwned>(path: &Path) -> Result<T, TiError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        TiError::InvalidInput(format!("cannot read request {}: {e}", path.display()))
    })?;
    serde_json::from_str(&contents)
        .map_err(|e| TiError::InvalidInput(format!("invalid request {}: {e}", path.display())))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), TiError> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}
