//! A thin command-line front end over `classic_btree`. No engineering of
//! its own: open the tree, perform one operation, print the result.

use classic_btree::element::Element;
use classic_btree::{builder, Tree};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "btcli", version = VERSION, about = "Classic B-Tree index inspector.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an empty tree file.
    Create {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = 32)]
        order: i32,
    },
    /// Insert a key/data pair.
    Insert {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = 32)]
        order: i32,
        #[arg(long)]
        key: i32,
        #[arg(long)]
        data: i32,
    },
    /// Search for a key.
    Search {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = 32)]
        order: i32,
        #[arg(long)]
        key: i32,
    },
    /// Delete a key.
    Delete {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = 32)]
        order: i32,
        #[arg(long)]
        key: i32,
    },
    /// Run a full structural audit and print the report.
    Audit {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = 32)]
        order: i32,
    },
    /// Rewrite the file with no zombies and a contiguous id space.
    Compact {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = 32)]
        order: i32,
    },
    /// Bulk-build a tree from a sorted "key data" line-oriented file.
    Build {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = 32)]
        order: i32,
        #[arg(long, default_value_t = 0.8)]
        fill: f64,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run(Cli::parse().command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> classic_btree::Result<()> {
    match command {
        Command::Create { path, order } => {
            let mut tree = Tree::open(&path, order)?;
            tree.close()?;
            println!("created {} (order {})", path.display(), order);
        }
        Command::Insert { path, order, key, data } => {
            let mut tree = Tree::open(&path, order)?;
            tree.insert(key, data)?;
            tree.close()?;
            println!("inserted ({}, {})", key, data);
        }
        Command::Search { path, order, key } => {
            let mut tree = Tree::open(&path, order)?;
            match tree.try_search(key)? {
                Some(e) => println!("found ({}, {})", e.key, e.data),
                None => println!("not found"),
            }
            tree.close()?;
        }
        Command::Delete { path, order, key } => {
            let mut tree = Tree::open(&path, order)?;
            tree.delete(key, 0)?;
            tree.close()?;
            println!("deleted {} (if present)", key);
        }
        Command::Audit { path, order } => {
            let mut tree = Tree::open(&path, order)?;
            let report = tree.perform_full_audit()?;
            println!(
                "height={} reachable_nodes={} total_keys={} average_density={:.3} ghost_count={} zombie_count={}",
                report.height,
                report.reachable_nodes,
                report.total_keys,
                report.average_density,
                report.ghost_count,
                report.zombie_count
            );
            tree.close()?;
        }
        Command::Compact { path, order } => {
            let mut tree = Tree::open(&path, order)?;
            tree.compact()?;
            tree.close()?;
            println!("compacted {}", path.display());
        }
        Command::Build { path, input, order, fill } => {
            let text = fs::read_to_string(&input)?;
            let mut elements = Vec::new();
            for line in text.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let mut parts = line.split_whitespace();
                let key: i32 = parts
                    .next()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| classic_btree::BtreeError::invalid_argument(format!("bad line: {}", line)))?;
                let data: i32 = parts
                    .next()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| classic_btree::BtreeError::invalid_argument(format!("bad line: {}", line)))?;
                elements.push(Element::new(key, data));
            }
            let mut tree = builder::build_from_sorted(&elements, &path, order, fill)?;
            tree.close()?;
            println!("built {} from {} elements", path.display(), elements.len());
        }
    }
    Ok(())
}
