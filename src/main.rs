use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tagcache::{config, facade, query};

#[derive(Parser)]
#[command(name = "tagcache", about = "Workspace-scoped content and symbol index for C/C++ trees")]
struct Cli {
    /// Workspace root to index.
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Internal: re-exec this binary as the worker-host child process.
    /// Never invoke directly; `thread_pool::spawn` does this for you.
    #[arg(long, hide = true)]
    worker_host: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Build (or rebuild) the index and exit.
    Index,
    /// Run a one-shot query against the index, then exit.
    Search {
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Build the index and keep watching the workspace for changes.
    Watch,
}

/// Always writes to stderr: stdout is the worker host's IPC channel when
/// `--worker-host` is set, and must never carry anything but response lines.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    if cli.worker_host {
        return tagcache::worker_host::run().await;
    }

    let exe = std::env::current_exe()?;
    let workspace = cli.workspace.canonicalize().unwrap_or(cli.workspace.clone());
    let config = config::load_config(&workspace);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}").unwrap());
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    spinner.set_message("building index...");

    facade::initialize(workspace.clone(), config, exe).await?;
    spinner.finish_with_message("index ready");

    let Some(cache_manager) = facade::cache_manager() else {
        anyhow::bail!("facade failed to initialize");
    };

    match cli.command.unwrap_or(Command::Index) {
        Command::Index => {
            let paths = cache_manager.get_all_paths().await;
            println!("indexed {} file(s)", paths.len());
        }
        Command::Search { query: raw, limit } => {
            let patterns = query::parse_query_as_and(&raw);
            let literals: Vec<Vec<String>> = raw
                .split_whitespace()
                .map(query::extract_literals)
                .collect();
            let outputs = cache_manager.search(patterns, literals).await?;
            let mut hits = 0;
            for output in outputs {
                for m in output.matches {
                    println!("{}:{}: {}", output.file_path, m.line, m.text);
                    hits += 1;
                    if hits >= limit {
                        break;
                    }
                }
                if hits >= limit {
                    break;
                }
            }
        }
        Command::Watch => {
            println!("watching {} for changes, press ctrl-c to stop", workspace.display());
            tokio::signal::ctrl_c().await?;
        }
    }

    facade::dispose().await;
    Ok(())
}
