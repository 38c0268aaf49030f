use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use canto_sync::app::{App, ProgressSinkKind, StatusResult};
use canto_sync::catalog::HttpCatalogClient;
use canto_sync::config::ConfigLoader;
use canto_sync::download::{CancelToken, DownloadOptions, DownloadReport};
use canto_sync::error::CantoError;
use canto_sync::library::ReconcileReport;
use canto_sync::output::{JsonOutput, OutputMode};
use canto_sync::purge::{DeleteReport, PruneReport};
use canto_sync::store::Store;
use canto_sync::tui::Tui;

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

#[derive(Parser)]
#[command(name = "canto")]
#[command(about = "Mirror catalog recordings locally and keep the library index reconciled")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Dataset root (overrides `dataset_root` from the config file)
    #[arg(long, global = true)]
    root: Option<String>,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch and cache every metadata page for a filter")]
    Metadata(FilterArgs),
    #[command(about = "Fetch metadata, then download every recording it lists")]
    Download(FilterArgs),
    #[command(about = "Delete categories holding fewer than MIN recordings")]
    Purge(PurgeArgs),
    #[command(about = "Rebuild metadata/library.json from the audio folders")]
    Reindex,
    #[command(about = "Delete recordings whose indexed tags match every term")]
    Delete(DeleteArgs),
    #[command(about = "Show categories, cached queries and interrupted downloads")]
    Status,
}

#[derive(Args)]
struct FilterArgs {
    /// Terms such as `en:Robin` or `cnt:"United States"`
    #[arg(required = true)]
    terms: Vec<String>,
}

#[derive(Args)]
struct PurgeArgs {
    min: usize,
}

#[derive(Args)]
struct DeleteArgs {
    #[arg(long)]
    yes: bool,

    #[arg(required = true)]
    terms: Vec<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<CantoError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CantoError) -> u8 {
    match error {
        CantoError::Cancelled => 130,
        CantoError::Consistency(_) => 4,
        error if error.is_transport() => 3,
        error if error.is_user_input() => 2,
        CantoError::ConfigRead(_) | CantoError::ConfigParse(_) => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let mut config = ConfigLoader::resolve(cli.config.as_deref()).map_err(miette::Report::new)?;
    if let Some(root) = cli.root {
        config.dataset_root = root.into();
    }
    let client = HttpCatalogClient::new(&config).map_err(miette::Report::new)?;
    let options = DownloadOptions {
        extension: config.asset_extension.clone(),
        parallelism: config.parallel_downloads,
        cancel: CancelToken::new(),
    };
    let app = App::new(Store::new(config.dataset_root.clone()), client, options);

    match cli.command {
        Commands::Metadata(args) => run_metadata(app, args, output_mode),
        Commands::Download(args) => run_download(app, args, output_mode),
        Commands::Purge(args) => run_purge(app, args, output_mode),
        Commands::Reindex => run_reindex(app, output_mode),
        Commands::Delete(args) => run_delete(app, args, output_mode),
        Commands::Status => run_status(app, output_mode),
    }
}

fn run_metadata(
    app: App<HttpCatalogClient>,
    args: FilterArgs,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.fetch_metadata(&args.terms, &JsonOutput).map_err(miette::Report::new)?;
            JsonOutput::print_metadata(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Metadata);
            let result = tui.run(move |sink| app.fetch_metadata(&args.terms, sink))?;
            println!(
                "{CYAN}metadata for {}: {} recordings on {} pages{RESET}",
                result.filter, result.recordings, result.pages
            );
            println!("{GREEN}cached in {}{RESET}", result.path);
            Ok(())
        }
    }
}

fn run_download(
    app: App<HttpCatalogClient>,
    args: FilterArgs,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.download(&args.terms, &JsonOutput).map_err(miette::Report::new)?;
            JsonOutput::print_download(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Download).with_cancel(app.cancel_token());
            let result = tui.run(move |sink| app.download(&args.terms, sink))?;
            print_download_summary(&result);
            Ok(())
        }
    }
}

fn run_purge(
    app: App<HttpCatalogClient>,
    args: PurgeArgs,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.purge(args.min, &JsonOutput).map_err(miette::Report::new)?;
            JsonOutput::print_prune(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Purge);
            let result = tui.run(move |sink| app.purge(args.min, sink))?;
            print_prune_summary(&result);
            Ok(())
        }
    }
}

fn run_reindex(app: App<HttpCatalogClient>, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.reindex(&JsonOutput).map_err(miette::Report::new)?;
            JsonOutput::print_reindex(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Reindex);
            let result = tui.run(move |sink| app.reindex(sink))?;
            print_reindex_summary(&result);
            Ok(())
        }
    }
}

fn run_delete(
    app: App<HttpCatalogClient>,
    args: DeleteArgs,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => {
            if !args.yes {
                return Err(miette::Report::msg(
                    "delete needs --yes when running non-interactively",
                ));
            }
            let result = app.delete(&args.terms, &JsonOutput).map_err(miette::Report::new)?;
            JsonOutput::print_delete(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Delete);
            if !args.yes {
                let question = format!(
                    "Delete every recording matching {}?",
                    args.terms.join(" ")
                );
                if !tui.confirm(&question)? {
                    println!("{YELLOW}nothing deleted{RESET}");
                    return Ok(());
                }
            }
            let result = tui.run(move |sink| app.delete(&args.terms, sink))?;
            print_delete_summary(&result);
            Ok(())
        }
    }
}

fn run_status(app: App<HttpCatalogClient>, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.status(&JsonOutput).map_err(miette::Report::new)?;
            JsonOutput::print_status(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let result = app.status(&JsonOutput).map_err(miette::Report::new)?;
            print_status(&result);
            Ok(())
        }
    }
}

fn print_download_summary(result: &DownloadReport) {
    println!("{CYAN}download summary for {}{RESET}", result.filter);
    println!("{GREEN}fetched: {}{RESET}", result.fetched);
    println!("{GREEN}re-fetched after interruption: {}{RESET}", result.redownloaded);
    println!("{YELLOW}already present: {}{RESET}", result.skipped);
    if result.failed.is_empty() {
        println!("{GREEN}failed: 0{RESET}");
    } else {
        println!(
            "{RED}failed: {} (retried on the next run){RESET}",
            result.failed.len()
        );
        for failure in &result.failed {
            println!("{RED}  {} {}: {}{RESET}", failure.id, failure.url, failure.error);
        }
    }
}

fn print_prune_summary(result: &PruneReport) {
    println!(
        "{CYAN}categories below {} recordings: {}{RESET}",
        result.threshold,
        result.removed.len()
    );
    for category in &result.removed {
        println!("{YELLOW}  removed {} ({}){RESET}", category.name, category.assets);
    }
    println!("{GREEN}kept: {}{RESET}", result.kept);
}

fn print_reindex_summary(result: &ReconcileReport) {
    println!("{CYAN}library index: {}{RESET}", result.index_path);
    println!("{GREEN}recordings on disk: {}{RESET}", result.assets);
    println!("{GREEN}matched from cached pages: {}{RESET}", result.from_cache);
    println!("{YELLOW}looked up individually: {}{RESET}", result.looked_up);
    if !result.unresolved.is_empty() {
        let ids: Vec<String> = result.unresolved.iter().map(ToString::to_string).collect();
        println!("{RED}unknown to the catalog: {}{RESET}", ids.join(", "));
    }
}

fn print_delete_summary(result: &DeleteReport) {
    println!("{CYAN}{} recordings matched{RESET}", result.matched);
    println!("{GREEN}{} files deleted{RESET}", result.deleted);
    for category in &result.pruned {
        println!("{YELLOW}  removed empty category {}{RESET}", category.name);
    }
}

fn print_status(result: &StatusResult) {
    println!("{CYAN}dataset {}{RESET}", result.root);
    println!(
        "{GREEN}{} recordings in {} categories{RESET}",
        result.assets,
        result.categories.len()
    );
    for category in &result.categories {
        println!("  {:<32} {:>6}", category.name, category.assets);
    }
    match result.indexed {
        Some(count) => println!("{GREEN}library index: {count} tracks{RESET}"),
        None => println!("{YELLOW}library index: not built (run `canto reindex`){RESET}"),
    }
    println!("{CYAN}cached queries: {}{RESET}", result.queries.len());
    for query in &result.interrupted {
        let ids: Vec<String> = query.in_flight.iter().map(ToString::to_string).collect();
        println!(
            "{RED}  {} interrupted, pending: {}{RESET}",
            query.cache_key,
            ids.join(", ")
        );
    }
}
