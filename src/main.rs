//! # Chat document ingestion CLI (`chatdoc`)
//!
//! The `chatdoc` binary initializes the database, cracks documents into
//! overlapping chunks, manages the documents attached to chat threads, and
//! starts the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! chatdoc --config ./config/chatdoc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chatdoc init` | Create the SQLite database and run schema migrations |
//! | `chatdoc crack <path>` | Extract and chunk a file, print the result |
//! | `chatdoc upload <path> --thread <id> --user <email>` | Crack, record, and store chunks |
//! | `chatdoc documents add\|list\|delete` | Manage a thread's document records |
//! | `chatdoc serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! chatdoc init
//! chatdoc crack ./report.pdf --print
//! chatdoc upload ./report.pdf --thread t-42 --user alice@example.com
//! chatdoc documents list --thread t-42
//! chatdoc serve
//! ```
//!
//! Results are printed to stdout in the tagged `{"status": ...}` shape. Logs
//! go to stderr and are filtered with `RUST_LOG`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use chat_ingest::cache::NoopRevalidate;
use chat_ingest::config::{self, Config};
use chat_ingest::error::IngestError;
use chat_ingest::extract::guess_content_type;
use chat_ingest::ingest::Pipeline;
use chat_ingest::models::{ActionResponse, CrackedDocument, Payload, UploadForm, UploadedFile};
use chat_ingest::store::{hash_user_id, DocumentStore, SqliteDocumentStore};
use chat_ingest::{db, migrate, server};

/// Chat document ingestion: upload, extract, chunk, and record documents
/// attached to chat threads.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means defaults plus environment overrides.
#[derive(Parser)]
#[command(
    name = "chatdoc",
    about = "Chat document ingestion: extract, chunk, and record uploaded documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chatdoc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `chat_documents` and
    /// `chunks` tables. Safe to run repeatedly.
    Init,

    /// Extract and chunk a file without recording it.
    Crack {
        /// File to crack.
        path: PathBuf,

        /// Media type of the file. Guessed from the extension if omitted.
        #[arg(long)]
        content_type: Option<String>,

        /// Print chunk text instead of the JSON result.
        #[arg(long)]
        print: bool,
    },

    /// Crack a file, record it on a thread, and store its chunks.
    Upload {
        /// File to upload.
        path: PathBuf,

        /// Chat thread the document belongs to.
        #[arg(long)]
        thread: String,

        /// Email of the uploading user (stored hashed).
        #[arg(long)]
        user: String,

        /// Media type of the file. Guessed from the extension if omitted.
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Manage the document records of a chat thread.
    Documents {
        #[command(subcommand)]
        action: DocumentsAction,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum DocumentsAction {
    /// Record a named document on a thread.
    Add {
        #[arg(long)]
        thread: String,
        #[arg(long)]
        user: String,
        name: String,
    },
    /// List the active documents of a thread, oldest first.
    List {
        #[arg(long)]
        thread: String,
    },
    /// Soft-delete a document record.
    Delete {
        #[arg(long)]
        thread: String,
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config_or_env(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Crack {
            path,
            content_type,
            print,
        } => {
            let pool = db::connect(&cfg).await?;
            let pipeline = Pipeline::from_config(&cfg, pool)?;
            let form = load_form(&path, content_type, pipeline.max_upload_size())?;
            let result = pipeline.crack_document(form).await;

            match result {
                Ok(chunks) if print => print_chunks(&chunks),
                result => finish(result.map(|chunks| CrackedDocument { chunks }))?,
            }
        }
        Commands::Upload {
            path,
            thread,
            user,
            content_type,
        } => {
            let (pipeline, store) = open(&cfg).await?;
            let form = load_form(&path, content_type, pipeline.max_upload_size())?;
            let result = pipeline
                .upload_document(&store, &thread, &user, form)
                .await;
            finish(result.map(|response| Payload { response }))?;
        }
        Commands::Documents { action } => {
            let (_, store) = open(&cfg).await?;
            match action {
                DocumentsAction::Add { thread, user, name } => {
                    let result = store.create(&thread, &hash_user_id(&user), &name).await;
                    finish(result.map(|response| Payload { response }))?;
                }
                DocumentsAction::List { thread } => {
                    let result = store.list_by_thread(&thread).await;
                    finish(result.map(|response| Payload { response }))?;
                }
                DocumentsAction::Delete { thread, id } => {
                    let result = store.soft_delete(&thread, &id).await;
                    finish(result.map(|response| Payload { response }))?;
                }
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn open(cfg: &Config) -> Result<(Pipeline, SqliteDocumentStore)> {
    let pool = db::connect(cfg).await?;
    let store = SqliteDocumentStore::new(pool.clone(), Arc::new(NoopRevalidate));
    let pipeline = Pipeline::from_config(cfg, pool)?;
    Ok((pipeline, store))
}

/// Read a file into an upload form.
///
/// A file at or above `max_size` is not read; the form carries only its
/// size so the upload gate rejects it.
fn load_form(path: &Path, content_type: Option<String>, max_size: u64) -> Result<UploadForm> {
    let size = std::fs::metadata(path)
        .with_context(|| format!("Failed to read {}", path.display()))?
        .len();
    let bytes = if size >= max_size {
        Vec::new()
    } else {
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?
    };
    let content_type = content_type.unwrap_or_else(|| guess_content_type(path).to_string());

    let mut file = UploadedFile::new(bytes, content_type);
    file.size = size;
    if let Some(name) = path.file_name() {
        file = file.with_file_name(name.to_string_lossy());
    }
    Ok(UploadForm::with_file(file))
}

/// Print the tagged result to stdout; an `ERROR` result also fails the command.
fn finish<T: Serialize>(result: Result<T, IngestError>) -> Result<()> {
    let failure = result.as_ref().err().cloned();
    let response = ActionResponse::from(result);
    println!("{}", serde_json::to_string_pretty(&response)?);

    if let Some(err) = failure {
        bail!("{} ({})", err, err.code());
    }
    Ok(())
}

fn print_chunks(chunks: &[String]) {
    println!("{} chunk(s)", chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        println!("--- chunk {} ({} chars) ---", i, chunk.chars().count());
        println!("{}", chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_file_is_sized_but_not_read() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("huge.pdf");
        std::fs::File::create(&path).unwrap().set_len(5000).unwrap();

        let form = load_form(&path, None, 1000).unwrap();
        let file = form.file.unwrap();
        assert_eq!(file.size, 5000);
        assert!(file.bytes.is_empty());
        assert_eq!(file.content_type, "application/pdf");
    }

    #[test]
    fn small_file_is_read_whole() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();

        let form = load_form(&path, None, 1000).unwrap();
        let file = form.file.unwrap();
        assert_eq!(file.size, 5);
        assert_eq!(file.bytes, b"hello");
        assert_eq!(file.file_name.as_deref(), Some("notes.txt"));
    }
}
