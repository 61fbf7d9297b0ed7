use anyhow::{anyhow, Error, Result};
use clap::{Parser, Subcommand};
use log::info;
use oxigraph::io::RdfFormat;
use oxigraph::model::Term;
use quadlog::options::rdf_format_from_name;
use quadlog::{
    Config, ExportRequest, ImportRequest, JobHandle, JobInfo, PersistenceMode, QuadLog,
    QueryRequest, QueryResult, SnapshotRequest, TransactionUpdate,
};
use std::env::current_dir;
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "quadlog")]
#[command(about = "Versioned quad store manager")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Verbose mode - sets the RUST_LOG level to info, defaults to warning level
    #[clap(long, short, action, default_value = "false", global = true)]
    verbose: bool,
    /// Debug mode - sets the RUST_LOG level to debug, defaults to warning level
    #[clap(long, action, default_value = "false", global = true)]
    debug: bool,
    /// Root directory holding the stores. Defaults to $QUADLOG_DIR, then the current directory
    #[clap(long, short, global = true)]
    root: Option<PathBuf>,
    /// Temporary (non-persistent) mode - stores only live for the duration of the command
    #[clap(long, short, action, global = true)]
    temporary: bool,
    /// Do not compress generation files
    #[clap(long, action, default_value = "false", global = true)]
    no_compress: bool,
    /// Do not fsync files before publishing them
    #[clap(long, action, default_value = "false", global = true)]
    no_sync: bool,
    /// Output JSON instead of text
    #[clap(long, action, default_value = "false", global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Initialise a quadlog root directory
    Init,
    /// Prints the version of the quadlog binary
    Version,
    /// Prints the configuration in effect
    Config,
    /// Create a new, empty store
    Create {
        /// Name of the store
        store: String,
    },
    /// Delete a store and all of its data
    Delete {
        /// Name of the store
        store: String,
    },
    /// Report whether a store exists
    Exists {
        /// Name of the store
        store: String,
    },
    /// List all stores
    List,
    /// Summarise a store: current commit, size and history
    Info {
        /// Name of the store
        store: String,
    },
    /// Run a transaction: check preconditions, delete matching quads, insert new ones
    Transact {
        /// Name of the store
        store: String,
        /// File with N-Quads patterns that must each match ('-' for stdin)
        #[clap(long, short = 'p')]
        preconditions: Option<PathBuf>,
        /// File with N-Quads patterns selecting quads to delete ('-' for stdin)
        #[clap(long, short = 'd')]
        delete: Option<PathBuf>,
        /// File with N-Quads data to insert ('-' for stdin)
        #[clap(long, short = 'i')]
        insert: Option<PathBuf>,
        /// Graph IRI for statements that do not name a graph
        #[clap(long, short = 'g')]
        default_graph: Option<String>,
        /// Label recorded with the job
        #[clap(long, short = 'l')]
        label: Option<String>,
    },
    /// Import an RDF file into a store as a new commit
    Import {
        /// Name of the store
        store: String,
        /// File to import; relative paths are resolved against the current directory
        file: PathBuf,
        /// Serialization format: one of [nquads, ntriples, turtle, trig, rdfxml, n3] (default: from extension)
        #[clap(long, short = 'f')]
        format: Option<String>,
        /// Graph IRI for triples of the file
        #[clap(long, short = 'g')]
        default_graph: Option<String>,
    },
    /// Export the current commit of a store to a file
    Export {
        /// Name of the store
        store: String,
        /// Destination file; relative paths are resolved against the current directory
        file: PathBuf,
        /// Serialization format (default: from extension, else nquads)
        #[clap(long, short = 'f')]
        format: Option<String>,
        /// Export only this graph
        #[clap(long, short = 'g')]
        graph: Option<String>,
    },
    /// Compact the history of a store into a single generation
    Consolidate {
        /// Name of the store
        store: String,
    },
    /// Create a new store from a commit of an existing store
    Snapshot {
        /// Name of the source store
        store: String,
        /// Name of the store to create
        target: String,
        /// Persistence mode: one of [append-only, rewrite]
        #[clap(long, short = 'm', default_value = "append-only")]
        mode: String,
        /// Commit to copy, defaults to the current commit
        #[clap(long, short = 'c')]
        commit: Option<u64>,
    },
    /// Show statistics of a store
    Stats {
        /// Name of the store
        store: String,
        /// Recompute statistics before showing them
        #[clap(long, short = 'u', action)]
        update: bool,
    },
    /// List commit points, most recent first
    Commits {
        /// Name of the store
        store: String,
        #[clap(long, default_value = "0")]
        skip: usize,
        #[clap(long, default_value = "20")]
        take: usize,
    },
    /// List jobs, most recently submitted first
    Jobs {
        /// Name of the store
        store: String,
        #[clap(long, default_value = "0")]
        skip: usize,
        #[clap(long, default_value = "20")]
        take: usize,
    },
    /// Run a SPARQL query against a store
    Query {
        /// Name of the store
        store: String,
        /// The query text, or @FILE to read it from a file
        query: String,
        /// Graph IRIs forming the default graph of the query
        #[clap(long, short = 'g')]
        default_graph: Vec<String>,
        /// Query this commit instead of the current one
        #[clap(long, short = 'c')]
        commit: Option<u64>,
    },
}

pub fn run() -> Result<()> {
    quadlog::init_logging();
    let cmd = Cli::parse();
    execute(cmd)
}

pub fn run_from_args<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    quadlog::init_logging();
    let cmd = Cli::try_parse_from(args).map_err(Error::from)?;
    execute(cmd)
}

fn parse_format(name: Option<&str>) -> Result<Option<RdfFormat>> {
    name.map(|n| rdf_format_from_name(n).ok_or_else(|| anyhow!("Unknown RDF format '{}'", n)))
        .transpose()
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(std::fs::read_to_string(path)?)
    }
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(current_dir()?.join(path))
    }
}

fn term_to_string(term: &Option<Term>) -> String {
    term.as_ref().map(|t| t.to_string()).unwrap_or_default()
}

fn job_json(info: &JobInfo) -> serde_json::Value {
    serde_json::json!({
        "JobId": info.job_id,
        "Label": info.label,
        "JobType": info.kind.to_string(),
        "JobCompletedOk": info.job_completed_ok(),
        "JobCompletedWithErrors": info.job_completed_with_errors(),
        "StatusMessage": info.status_message,
        "ExceptionInfo": info.exception_info,
        "CommitId": info.commit_id,
        "Created": info.created_at.to_rfc3339(),
    })
}

/// Waits for the job and reports its result; a failed job is an error.
fn finish_job(handle: JobHandle, json: bool) -> Result<()> {
    let info = handle.wait();
    if json {
        println!("{}", serde_json::to_string_pretty(&job_json(&info))?);
    } else if info.job_completed_ok() {
        println!(
            "Job {} ({}) completed: {}",
            info.job_id,
            info.kind,
            info.status_message.as_deref().unwrap_or("")
        );
    }
    if info.job_completed_with_errors() {
        return Err(anyhow!(
            "Job {} ({}) failed: {}",
            info.job_id,
            info.kind,
            info.exception_info
                .map(|e| e.to_string())
                .or(info.status_message)
                .unwrap_or_default()
        ));
    }
    Ok(())
}

fn execute(cmd: Cli) -> Result<()> {
    // The RUST_LOG env var is set by `init_logging` if QUADLOG_LOG is present.
    // CLI flags for verbosity take precedence. If nothing is set, we default to "warn".
    if cmd.debug {
        std::env::set_var("RUST_LOG", "debug");
    } else if cmd.verbose {
        std::env::set_var("RUST_LOG", "info");
    } else if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    let _ = env_logger::try_init();

    if let Commands::Version = cmd.command {
        println!("quadlog {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let root = match cmd.root.clone() {
        Some(root) => absolute(root)?,
        None => match std::env::var("QUADLOG_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => current_dir()?,
        },
    };
    let config = Config::builder()
        .root(root)
        .temporary(cmd.temporary)
        .compress(!cmd.no_compress)
        .sync_writes(!cmd.no_sync)
        .build()?;
    if cmd.verbose || cmd.debug {
        config.print();
    }
    if let Commands::Config = cmd.command {
        config.print();
        return Ok(());
    }

    let db = QuadLog::open(config)?;
    info!("Opened quadlog at {}", db.config().root.display());
    let json = cmd.json;

    match cmd.command {
        Commands::Init => {
            println!(
                "Initialised quadlog at {} ({} stores)",
                db.config().root.display(),
                db.list_stores().len()
            );
        }
        Commands::Create { store } => {
            db.create_store(&store)?;
            println!("Created store '{}'", store);
        }
        Commands::Delete { store } => {
            db.delete_store(&store)?;
            println!("Deleted store '{}'", store);
        }
        Commands::Exists { store } => {
            let exists = db.does_store_exist(&store)?;
            if json {
                println!("{}", serde_json::json!({ "store": store, "exists": exists }));
            } else {
                println!("{}", exists);
            }
        }
        Commands::List => {
            let stores = db.list_stores();
            if json {
                println!("{}", serde_json::to_string_pretty(&stores)?);
            } else {
                for store in stores {
                    println!("{}", store);
                }
            }
        }
        Commands::Info { store } => {
            let info = db.store_info(&store)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("Store: {}", info.name);
                println!("  Created: {}", info.created_at.to_rfc3339());
                println!("  Current commit: {}", info.commit_id);
                println!("  Quads: {}", info.quad_count);
                println!("  Commit points: {}", info.commit_points);
                match info.size_on_disk {
                    Some(bytes) => println!("  Size on disk: {} bytes", bytes),
                    None => println!("  Size on disk: (in memory)"),
                }
            }
        }
        Commands::Transact {
            store,
            preconditions,
            delete,
            insert,
            default_graph,
            label,
        } => {
            let mut builder = TransactionUpdate::builder();
            if let Some(path) = preconditions {
                builder.existence_preconditions(read_input(&path)?);
            }
            if let Some(path) = delete {
                builder.delete_patterns(read_input(&path)?);
            }
            if let Some(path) = insert {
                builder.insert_data(read_input(&path)?);
            }
            if let Some(graph) = default_graph {
                builder.default_graph_uri(graph);
            }
            let update = builder.build()?;
            if update.is_empty() {
                return Err(anyhow!(
                    "Nothing to do: pass --preconditions, --delete or --insert"
                ));
            }
            let handle = db.execute_transaction(&store, update, label.as_deref())?;
            finish_job(handle, json)?;
        }
        Commands::Import {
            store,
            file,
            format,
            default_graph,
        } => {
            let mut request = ImportRequest::file(absolute(file)?);
            request.format = parse_format(format.as_deref())?;
            request.default_graph_uri = default_graph;
            let handle = db.start_import(&store, request, None)?;
            finish_job(handle, json)?;
        }
        Commands::Export {
            store,
            file,
            format,
            graph,
        } => {
            let mut request = ExportRequest::new(absolute(file)?);
            request.format = parse_format(format.as_deref())?;
            request.graph_uri = graph;
            let handle = db.start_export(&store, request, None)?;
            finish_job(handle, json)?;
        }
        Commands::Consolidate { store } => {
            let handle = db.consolidate_store(&store, None)?;
            finish_job(handle, json)?;
        }
        Commands::Snapshot {
            store,
            target,
            mode,
            commit,
        } => {
            let mode: PersistenceMode = mode.parse()?;
            let mut request = SnapshotRequest::new(target, mode);
            request.source_commit = commit;
            let handle = db.create_snapshot(&store, request, None)?;
            finish_job(handle, json)?;
        }
        Commands::Stats { store, update } => {
            if update {
                let handle = db.update_statistics(&store, None)?;
                let info = handle.wait();
                if info.job_completed_with_errors() {
                    return Err(anyhow!(
                        "Statistics update failed: {}",
                        info.status_message.unwrap_or_default()
                    ));
                }
            }
            match db.get_statistics(&store)? {
                Some(stats) if json => println!("{}", serde_json::to_string_pretty(&stats)?),
                Some(stats) => {
                    println!("Statistics for commit {}", stats.commit_id);
                    println!("  Computed: {}", stats.computed_at.to_rfc3339());
                    println!("  Total quads: {}", stats.total_triple_count);
                    for (predicate, count) in &stats.predicate_triple_counts {
                        println!("  {} {}", count, predicate);
                    }
                }
                None if json => println!("null"),
                None => println!(
                    "No statistics for the current commit. Use `quadlog stats --update {}`.",
                    store
                ),
            }
        }
        Commands::Commits { store, skip, take } => {
            let points = db.get_commit_points(&store, skip, take)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&points)?);
            } else {
                for point in points {
                    println!(
                        "{}\t{}\t{} quads{}",
                        point.commit_id,
                        point.timestamp.to_rfc3339(),
                        point.quad_count,
                        if point.is_base { "\t(base)" } else { "" }
                    );
                }
            }
        }
        Commands::Jobs { store, skip, take } => {
            let jobs = db.get_jobs(&store, skip, take)?;
            if json {
                let values: Vec<serde_json::Value> = jobs.iter().map(job_json).collect();
                println!("{}", serde_json::to_string_pretty(&values)?);
            } else {
                for job in jobs {
                    println!(
                        "{}\t{}\t{}\t{}{}",
                        job.job_id,
                        job.kind,
                        job.status,
                        job.created_at.to_rfc3339(),
                        job.label.map(|l| format!("\t{}", l)).unwrap_or_default()
                    );
                }
            }
        }
        Commands::Query {
            store,
            query,
            default_graph,
            commit,
        } => {
            let text = match query.strip_prefix('@') {
                Some(path) => std::fs::read_to_string(path)?,
                None => query,
            };
            let mut request = QueryRequest::new(text);
            request.default_graph_uris = default_graph;
            request.commit_id = commit;
            let outcome = db.execute_query(&store, &request)?;
            match outcome.result {
                QueryResult::Solutions { variables, rows } => {
                    if json {
                        let rows: Vec<serde_json::Value> = rows
                            .iter()
                            .map(|row| {
                                let map: serde_json::Map<String, serde_json::Value> = variables
                                    .iter()
                                    .zip(row)
                                    .filter_map(|(v, t)| {
                                        t.as_ref().map(|t| {
                                            (v.as_str().to_string(), t.to_string().into())
                                        })
                                    })
                                    .collect();
                                serde_json::Value::Object(map)
                            })
                            .collect();
                        println!("{}", serde_json::to_string_pretty(&rows)?);
                    } else {
                        let header: Vec<String> =
                            variables.iter().map(|v| v.to_string()).collect();
                        println!("{}", header.join("\t"));
                        for row in &rows {
                            let cells: Vec<String> = row.iter().map(term_to_string).collect();
                            println!("{}", cells.join("\t"));
                        }
                    }
                }
                QueryResult::Boolean(value) => println!("{}", value),
                QueryResult::Graph(triples) => {
                    for triple in triples {
                        println!("{} .", triple);
                    }
                }
            }
        }
        Commands::Version | Commands::Config => {}
    }
    Ok(())
}
