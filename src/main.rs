use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use quill::model::DEFAULT_VECTOR_DIM;
use quill::parser::{self, Command};
use quill::{Database, DbConfig, DocumentIndex, Error};

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "Interactive shell for quill document logs", long_about = None)]
struct Args {
    /// Database name
    #[clap(long, default_value = "default")]
    db: String,

    /// Database directory (defaults to ~/quill/<db>.quill)
    #[clap(long, env = "QUILL_PATH")]
    path: Option<PathBuf>,

    /// Document to open (defaults to today's log)
    #[clap(long)]
    doc: Option<String>,

    /// Dimension of the hashing embedder
    #[clap(long, default_value_t = DEFAULT_VECTOR_DIM)]
    dim: usize,

    /// Skip fsync after writes
    #[clap(long)]
    relaxed: bool,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,quill=info"));
    tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .with_level(true)
    .with_writer(io::stderr)
    .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[\u{2717}] {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> quill::Result<()> {
    let config = DbConfig {
        root: args.path,
        strict_durability: !args.relaxed,
        vector_dim: args.dim,
    };
    let db = Database::open(&args.db, config)?;
    let mut doc = db.document(args.doc.as_deref())?;

    print_banner(&db, &doc);

    let stdin = io::stdin();
    let mut buffer = String::new();

    loop {
        print!("quill:{}> ", doc.name());
        io::stdout().flush()?;
        buffer.clear();

        if stdin.read_line(&mut buffer)? == 0 { break; }
        if buffer.trim().is_empty() { continue; }

        match parser::parse_command(&buffer) {
            Ok(Command::Exit) => break,
            Ok(cmd) => {
                if let Err(e) = execute_command(&db, &mut doc, cmd) {
                    println!("[\u{26a0}\u{fe0f} Error] {}", e);
                }
            }
            Err(e) => {
                println!("[\u{2717} Syntax Error] {}", e);
                if buffer.to_uppercase().starts_with("SEARCH") {
                    println!("    \u{2139}\u{fe0f}  Hint: Try 'SEARCH \"query\" LIMIT 5 BY cosine'");
                } else if buffer.contains('{') {
                    println!("    \u{2139}\u{fe0f}  Hint: Metadata is written as pairs: META env=\"prod\", build=42");
                }
            }
        }
    }

    doc.close()
}

fn print_banner(db: &Database, doc: &DocumentIndex) {
    println!("\n==================================================");
    println!("   quill {} - document log shell", env!("CARGO_PKG_VERSION"));
    println!("==================================================");
    println!("Database: {} ({})", db.name(), db.path().display());
    println!("Document: {} ({} entries)", doc.name(), doc.registry().doc_reg.entry);
    println!("Type 'HELP' for supported commands or 'EXIT' to quit.\n");
}

fn print_help() {
    println!("\n--- Available Commands ---");
    println!("1. PUSH:    PUSH \"data\" [KEY k] [DESC \"text\"] [META k=v, ...] [TYPE t] [NOEMBED]");
    println!("2. PULL:    PULL [FROM payload|vector|index] [UID id, ...] [KEY k] [TIME 14:05] [DATE 01-02-2024] [WHERE k=v, ...]");
    println!("3. SEARCH:  SEARCH \"query\" [LIMIT 10] [BY dot|euclidean|cosine] [KEY k] [TIME t] [DATE d] [WHERE k=v] [EMBEDDINGS]");
    println!("4. USE:     USE <document>");
    println!("5. DOCS:    List documents");
    println!("6. INFO:    Database and document details");
    println!("7. ORPHANS: Index entries without a payload");
    println!("8. EXIT:    Quit\n");
}

fn execute_command(db: &Database, doc: &mut DocumentIndex, cmd: Command) -> quill::Result<()> {
    match cmd {
        Command::Help => print_help(),
        Command::Push { data, options } => {
            let uid = doc.push(data, options)?;
            println!("[\u{2713}] {}", uid);
        }
        Command::Pull { source, filter } => {
            let records = doc.pull(&filter, source)?;
            print_json(&records)?;
            println!("({} records from {})", records.len(), source);
        }
        Command::Search { query, options } => print_json(&doc.search(query, &options)?)?,
        Command::Use { doc: name } => {
            let next = db.document(Some(&name))?;
            std::mem::replace(doc, next).close()?;
        }
        Command::Docs => print_json(&db.documents()?)?,
        Command::Info => print_json(&serde_json::json!({
            "db": db.info(),
            "doc": doc.info(),
        }))?,
        Command::Orphans => print_json(&doc.orphans()?)?,
        Command::Exit => {}
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> quill::Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| Error::Serialization(e.to_string()))?;
    println!("{}", text);
    Ok(())
}
