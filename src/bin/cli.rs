//! Admin tool for slotree record files.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use slotree::{
    Direction, NaturalOrder, Result, RowSchema, StoreError, Table, TableOptions, Tree,
};

#[derive(Parser)]
#[command(name = "slotree", version, about = "Inspect and edit slotree record files")]
struct Cli {
    /// Log filter, e.g. "info" or "slotree=debug".
    #[arg(long, env = "SLOTREE_LOG", default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an empty two-column table file.
    Create {
        file: PathBuf,
        /// Key column width in bytes.
        #[arg(long, default_value_t = 16)]
        key_width: usize,
        /// Value column width in bytes.
        #[arg(long, default_value_t = 64)]
        value_width: usize,
    },
    /// Store one row (key and value as text, zero-padded).
    Put {
        file: PathBuf,
        key: String,
        value: String,
    },
    /// Look up a key.
    Get { file: PathBuf, key: String },
    /// Remove a key.
    Remove { file: PathBuf, key: String },
    /// List rows in key order.
    List {
        file: PathBuf,
        /// Largest key first.
        #[arg(long)]
        descending: bool,
        /// Start at this key (or its nearest neighbor).
        #[arg(long)]
        start: Option<String>,
        /// Stop after this many rows.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show file and cache statistics.
    Stat { file: PathBuf },
    /// Walk the free chain and report (and repair) damage.
    FreeChain {
        file: PathBuf,
        /// Abort the walk after this many milliseconds.
        #[arg(long)]
        budget_ms: Option<u64>,
    },
    /// Scan all slots independent of the index, listing every
    /// reachable row.
    Scan { file: PathBuf },
    /// Hex-dump raw slots.
    Dump {
        file: PathBuf,
        /// Dump at most this many slots.
        #[arg(long, default_value_t = 16)]
        limit: usize,
    },
}

fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log))
        .with_writer(std::io::stderr)
        .init();
    if let Err(e) = run(cli.command) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Create {
            file,
            key_width,
            value_width,
        } => {
            let schema = RowSchema::new(vec![key_width, value_width], Arc::new(NaturalOrder))?;
            let table = Table::open(&file, schema, TableOptions::default())?;
            table.close()?;
            println!("created {} ({key_width}+{value_width} byte rows)", file.display());
            Ok(())
        }
        Command::Put { file, key, value } => {
            let table = open_table(&file)?;
            let row = pack_row(&table.schema(), &key, &value)?;
            let old = table.put(&row)?;
            match old {
                Some(_) => println!("replaced {key}"),
                None => println!("stored {key}"),
            }
            table.close()
        }
        Command::Get { file, key } => {
            let table = open_table(&file)?;
            let widths = table.schema().widths().to_vec();
            match table.get(key.as_bytes())? {
                Some(row) => println!("{}", format_columns(&widths, &row)),
                None => println!("not found"),
            }
            Ok(())
        }
        Command::Remove { file, key } => {
            let table = open_table(&file)?;
            match table.remove(key.as_bytes())? {
                Some(_) => println!("removed {key}"),
                None => println!("not found"),
            }
            table.close()
        }
        Command::List {
            file,
            descending,
            start,
            limit,
        } => {
            let table = open_table(&file)?;
            let direction = if descending {
                Direction::Descending
            } else {
                Direction::Ascending
            };
            let widths = table.schema().widths().to_vec();
            let rows = table.rows(direction, false, start.as_deref().map(str::as_bytes))?;
            let mut count = 0usize;
            for row in rows.take(limit.unwrap_or(usize::MAX)) {
                println!("{}", format_columns(&widths, &row));
                count += 1;
            }
            eprintln!("{count} rows");
            Ok(())
        }
        Command::Stat { file } => {
            let mut tree = open_tree(&file)?;
            let height = tree.height()?;
            let store = tree.store();
            println!("file:        {}", file.display());
            println!("columns:     {:?}", store.schema().widths());
            println!("record size: {} bytes", store.geometry().record_size());
            println!("file length: {} bytes", store.file_len());
            println!("used slots:  {}", store.used_count());
            println!("free slots:  {}", store.free_count());
            println!("all slots:   {}", store.all_count());
            println!("height:      {height}");
            if let Some(stats) = store.cache_stats() {
                println!(
                    "cache:       {} entries, {} bytes, {} hits / {} misses",
                    stats.entries, stats.bytes, stats.hits, stats.misses
                );
            }
            Ok(())
        }
        Command::FreeChain { file, budget_ms } => {
            let tree = open_tree(&file)?;
            let report = tree
                .store()
                .free_chain(budget_ms.map(Duration::from_millis))?;
            for handle in &report.handles {
                println!("{handle}");
            }
            if report.truncated {
                eprintln!(
                    "chain was damaged and has been truncated after {} slots",
                    report.handles.len()
                );
            } else {
                eprintln!("{} free slots, chain intact", report.handles.len());
            }
            Ok(())
        }
        Command::Scan { file } => {
            let mut tree = open_tree(&file)?;
            let rows = tree.store_mut().content_rows(None)?;
            let widths = tree.store().schema().widths().to_vec();
            for (handle, row) in &rows {
                println!("{handle}\t{}", format_columns(&widths, row));
            }
            eprintln!("{} rows", rows.len());
            Ok(())
        }
        Command::Dump { file, limit } => {
            let tree = open_tree(&file)?;
            let store = tree.store();
            let count = (store.all_count() as usize).min(limit);
            for index in 0..count {
                let slot = store.dump_slot(index as i32)?;
                println!("{index:6}  {}", hex::encode(&slot));
            }
            Ok(())
        }
    }
}

fn open_table(file: &PathBuf) -> Result<Table> {
    Table::open_existing(file, Arc::new(NaturalOrder), TableOptions::default())
}

fn open_tree(file: &PathBuf) -> Result<Tree> {
    Tree::open_existing(file, Arc::new(NaturalOrder), None)
}

fn pack_row(schema: &RowSchema, key: &str, value: &str) -> Result<Vec<u8>> {
    // Text put only makes sense for the two-column layout the create
    // command produces.
    if schema.columns() != 2 {
        return Err(StoreError::SchemaMismatch(format!(
            "put needs a 2-column table, this file has {}",
            schema.columns()
        )));
    }
    schema.pack(&[key.as_bytes(), value.as_bytes()])
}

fn format_columns(widths: &[usize], row: &[u8]) -> String {
    let mut parts = Vec::with_capacity(widths.len());
    let mut at = 0usize;
    for width in widths {
        let column = &row[at..at + width];
        let trimmed = column
            .iter()
            .rposition(|b| *b != 0)
            .map_or(&column[..0], |end| &column[..=end]);
        parts.push(String::from_utf8_lossy(trimmed).into_owned());
        at += width;
    }
    parts.join("\t")
}
