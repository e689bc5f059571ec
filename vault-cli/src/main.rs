//! Vault CLI - scan, tag, search and export a local image vault

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vault_core::{
    BulkResult, CancelToken, ExportOptions, MissingFilter, QuerySpec, ScanOptions, SortKey,
    SortOrder, Vault, VaultError,
};

#[derive(Parser)]
#[command(name = "vault")]
#[command(about = "Index, tag, search and export a local image vault", long_about = None)]
struct Cli {
    /// Vault root (defaults to the current directory)
    #[arg(long, global = true, env = "VAULT_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .vault/ with config.toml and an empty index
    Init,

    /// Reconcile the index with the files on disk
    Scan {
        /// Tag new entries with their folder names
        #[arg(long)]
        auto_tag: bool,
    },

    /// Search entries by filename and tags
    Search {
        #[command(flatten)]
        filter: SearchArgs,
    },

    /// Add or remove tags on entries
    Tag {
        /// Entry IDs
        #[arg(required = true)]
        ids: Vec<String>,

        #[arg(long = "add")]
        add: Vec<String>,

        #[arg(long = "remove")]
        remove: Vec<String>,
    },

    /// Soft-delete entries (marks them missing; files are kept)
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Copy entries' files into a directory
    Export {
        /// Entry IDs (omit with --all-matching)
        ids: Vec<String>,

        /// Destination directory
        #[arg(long)]
        to: String,

        /// Recreate folder structure under the destination
        #[arg(long)]
        preserve_structure: bool,

        /// Export every entry matching the search flags
        #[arg(long)]
        all_matching: bool,

        #[command(flatten)]
        filter: SearchArgs,
    },

    /// Remove entries from the index (all missing entries when no IDs given)
    Purge { ids: Vec<String> },

    /// List tags with entry counts, or rename and delete them
    Tags {
        #[command(subcommand)]
        action: Option<TagsAction>,
    },

    /// Show vault stats
    Status,
}

#[derive(Subcommand)]
enum TagsAction {
    /// Rename a tag on every entry (merges into an existing tag)
    Rename { from: String, to: String },

    /// Remove a tag from every entry
    Delete { tag: String },
}

#[derive(Args)]
struct SearchArgs {
    /// Case-insensitive filename substring
    #[arg(long)]
    name: Option<String>,

    /// Required tag (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Excluded tag (repeatable)
    #[arg(long = "exclude")]
    exclude: Vec<String>,

    #[arg(long, value_parser = ["exclude", "include", "only"], default_value = "exclude")]
    missing: String,

    #[arg(long, value_parser = ["path", "modified", "size", "name"], default_value = "path")]
    sort: String,

    /// Sort descending
    #[arg(long)]
    desc: bool,

    #[arg(long, default_value_t = 0)]
    offset: usize,

    #[arg(long)]
    limit: Option<usize>,
}

impl SearchArgs {
    fn to_spec(&self) -> QuerySpec {
        let missing = match self.missing.as_str() {
            "include" => MissingFilter::Include,
            "only" => MissingFilter::Only,
            _ => MissingFilter::Exclude,
        };
        let sort = match self.sort.as_str() {
            "modified" => SortKey::Modified,
            "size" => SortKey::Size,
            "name" => SortKey::Name,
            _ => SortKey::Path,
        };
        let order = if self.desc {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        };

        QuerySpec {
            filename: self.name.clone(),
            include: self.tags.clone(),
            exclude: self.exclude.clone(),
            missing,
            sort,
            order,
            offset: self.offset,
            limit: self.limit,
            generation: None,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli.root.unwrap_or_else(|| PathBuf::from("."));
    let json = cli.json;

    let result = match cli.command {
        Commands::Init => cmd_init(&root, json),
        Commands::Scan { auto_tag } => cmd_scan(&root, auto_tag, json),
        Commands::Search { filter } => cmd_search(&root, &filter, json),
        Commands::Tag { ids, add, remove } => cmd_tag(&root, &ids, &add, &remove, json),
        Commands::Delete { ids } => cmd_delete(&root, &ids, json),
        Commands::Export {
            ids,
            to,
            preserve_structure,
            all_matching,
            filter,
        } => cmd_export(
            &root,
            ids,
            &to,
            preserve_structure,
            all_matching.then_some(&filter),
            json,
        ),
        Commands::Purge { ids } => cmd_purge(&root, &ids, json),
        Commands::Tags { action: None } => cmd_tags(&root, json),
        Commands::Tags {
            action: Some(TagsAction::Rename { from, to }),
        } => cmd_rename_tag(&root, &from, &to, json),
        Commands::Tags {
            action: Some(TagsAction::Delete { tag }),
        } => cmd_delete_tag(&root, &tag, json),
        Commands::Status => cmd_status(&root, json),
    };

    if let Err(e) = result {
        if json {
            let error_json = serde_json::json!({
                "code": e.kind().as_str(),
                "message": e.to_string(),
                "hint": "",
            });
            eprintln!("{}", error_json);
        } else {
            eprintln!("{}: {}", "Error".red(), e);
        }
        std::process::exit(1);
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> vault_core::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_init(root: &std::path::Path, json: bool) -> vault_core::Result<()> {
    Vault::init(root)?;
    if json {
        print_json(&serde_json::json!({ "created": ".vault/config.toml" }))
    } else {
        println!("{} .vault/config.toml", "Created".green());
        Ok(())
    }
}

fn cmd_scan(root: &std::path::Path, auto_tag: bool, json: bool) -> vault_core::Result<()> {
    let vault = Vault::open(root)?;
    let options = ScanOptions {
        auto_tag: auto_tag.then_some(true),
    };
    let report = vault.scan(&options, &CancelToken::new())?;

    if json {
        return print_json(&report);
    }
    println!(
        "{}: {} added, {} updated, {} restored, {} unchanged, {} marked missing ({}ms)",
        "Scanned".green(),
        report.added,
        report.updated,
        report.restored,
        report.unchanged,
        report.marked_missing,
        report.duration_ms
    );
    for issue in &report.errors {
        println!("  {} {}: {}", "!".yellow(), issue.path, issue.reason);
    }
    if !report.complete {
        println!("{}", "Scan did not complete".yellow());
    }
    Ok(())
}

fn cmd_search(root: &std::path::Path, filter: &SearchArgs, json: bool) -> vault_core::Result<()> {
    let vault = Vault::open(root)?;
    let result = vault.search(&filter.to_spec())?;

    if json {
        return print_json(&result);
    }
    for entry in &result.entries {
        let tags = entry.tags.iter().cloned().collect::<Vec<_>>().join(", ");
        let path = if entry.missing {
            entry.relative_path.dimmed().to_string()
        } else {
            entry.relative_path.clone()
        };
        if tags.is_empty() {
            println!("{}  {}", entry.id.as_str().cyan(), path);
        } else {
            println!("{}  {}  [{}]", entry.id.as_str().cyan(), path, tags.green());
        }
    }
    println!(
        "{}: {}-{} of {}{}",
        "Showing".blue(),
        if result.entries.is_empty() {
            result.offset
        } else {
            result.offset + 1
        },
        result.offset + result.entries.len(),
        result.total,
        if result.has_more { " (more)" } else { "" }
    );
    Ok(())
}

fn print_bulk(result: &BulkResult, json: bool) -> vault_core::Result<()> {
    if json {
        return print_json(result);
    }
    println!(
        "{}: {} of {} succeeded",
        result.operation.as_str().green(),
        result.succeeded.len(),
        result.requested
    );
    for exported in &result.exported {
        println!("  {} -> {}", exported.source, exported.destination.display());
    }
    for failure in &result.failed {
        println!(
            "  {} {} ({}): {}",
            "x".red(),
            failure.id,
            failure.kind.as_str(),
            failure.reason
        );
    }
    if !result.complete {
        println!("{}", "Operation did not complete".yellow());
    }
    Ok(())
}

fn cmd_tag(
    root: &std::path::Path,
    ids: &[String],
    add: &[String],
    remove: &[String],
    json: bool,
) -> vault_core::Result<()> {
    let vault = Vault::open(root)?;
    let result = vault.bulk_tag(ids, add, remove)?;
    print_bulk(&result, json)
}

fn cmd_delete(root: &std::path::Path, ids: &[String], json: bool) -> vault_core::Result<()> {
    let vault = Vault::open(root)?;
    let result = vault.bulk_delete(ids)?;
    print_bulk(&result, json)
}

/// IDs of every entry matching `spec`, walking all pages
fn matching_ids(vault: &Vault, mut spec: QuerySpec) -> vault_core::Result<Vec<String>> {
    spec.offset = 0;
    spec.limit = Some(vault.config().query.max_page_size);
    let mut ids = Vec::new();
    loop {
        let page = vault.search(&spec)?;
        ids.extend(page.entries.iter().map(|e| e.id.to_string()));
        if !page.has_more {
            return Ok(ids);
        }
        spec.offset += page.entries.len();
        spec.generation = Some(page.generation);
    }
}

fn cmd_export(
    root: &std::path::Path,
    ids: Vec<String>,
    to: &str,
    preserve_structure: bool,
    all_matching: Option<&SearchArgs>,
    json: bool,
) -> vault_core::Result<()> {
    let vault = Vault::open(root)?;
    let ids = match all_matching {
        Some(filter) if ids.is_empty() => matching_ids(&vault, filter.to_spec())?,
        Some(_) => {
            return Err(VaultError::InvalidSpec(
                "pass either entry IDs or --all-matching, not both".to_string(),
            ))
        }
        None if ids.is_empty() => {
            return Err(VaultError::InvalidSpec(
                "no entry IDs given (use --all-matching to export a search)".to_string(),
            ))
        }
        None => ids,
    };

    let options = ExportOptions { preserve_structure };
    let result = vault.bulk_export(&ids, to, &options, &CancelToken::new())?;
    print_bulk(&result, json)
}

fn cmd_purge(root: &std::path::Path, ids: &[String], json: bool) -> vault_core::Result<()> {
    let vault = Vault::open(root)?;
    let result = if ids.is_empty() {
        vault.purge_missing()?
    } else {
        vault.purge_entries(ids)?
    };
    print_bulk(&result, json)
}

fn cmd_tags(root: &std::path::Path, json: bool) -> vault_core::Result<()> {
    let vault = Vault::open(root)?;
    let tags = vault.tag_counts()?;

    if json {
        return print_json(&tags);
    }
    for tc in &tags {
        println!("{:>6}  {}", tc.count, tc.tag.green());
    }
    println!("{}: {}", "Tags".blue(), tags.len());
    Ok(())
}

fn cmd_rename_tag(
    root: &std::path::Path,
    from: &str,
    to: &str,
    json: bool,
) -> vault_core::Result<()> {
    let vault = Vault::open(root)?;
    let result = vault.rename_tag(from, to)?;
    print_bulk(&result, json)
}

fn cmd_delete_tag(root: &std::path::Path, tag: &str, json: bool) -> vault_core::Result<()> {
    let vault = Vault::open(root)?;
    let result = vault.delete_tag(tag)?;
    print_bulk(&result, json)
}

fn cmd_status(root: &std::path::Path, json: bool) -> vault_core::Result<()> {
    let vault = Vault::open(root)?;
    let status = vault.status()?;

    if json {
        return print_json(&status);
    }
    println!("{}: {}", "Root".blue(), status.root);
    println!(
        "{}: .vault/index.db ({:.1} MB)",
        "Index".blue(),
        status.store_size_bytes as f64 / 1_000_000.0
    );
    println!(
        "{}: {} ({} missing)",
        "Entries".blue(),
        status.entries,
        status.missing
    );
    println!("{}: {}", "Tags".blue(), status.tags);
    println!("{}: {}", "Generation".blue(), status.generation);
    if let Some(last) = status.last_scan {
        println!("{}: {}", "Last scan".blue(), last);
    }
    Ok(())
}
