//! Purpose: `castite` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Commands emit stable stdout formats (JSON by command).
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

use castite::api::{
    Config, DecoderCache, DirArtifacts, Error, ErrorKind, ResolutionMode, SchemaFile,
    TypeDescriptor, to_exit_code,
};

#[derive(Parser)]
#[command(
    name = "castite",
    version,
    about = "Per-type JSON decoder specialization cache"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the specialization plan for a type
    Plan {
        #[arg(long, value_hint = ValueHint::FilePath, help = "Schema document (JSON)")]
        schema: PathBuf,
        #[arg(value_name = "TYPE", help = "Type expression, e.g. `map[str,demo.Node]`")]
        type_expr: String,
    },
    /// Export specialization artifacts for ahead-of-time loading
    Export {
        #[arg(long, value_hint = ValueHint::FilePath, help = "Schema document (JSON)")]
        schema: PathBuf,
        #[arg(long, value_hint = ValueHint::DirPath, help = "Artifact output directory")]
        out: PathBuf,
        #[arg(value_name = "TYPE", required = true, help = "Root type expressions")]
        types: Vec<String>,
    },
    /// Decode input through the resolved decoder for a type
    Decode {
        #[arg(long, value_hint = ValueHint::FilePath, help = "Schema document (JSON)")]
        schema: PathBuf,
        #[arg(long = "type", value_name = "TYPE", help = "Target type expression")]
        type_expr: String,
        #[arg(
            long,
            value_hint = ValueHint::DirPath,
            help = "Artifact directory consulted per the configured mode"
        )]
        artifacts: Option<PathBuf>,
        #[arg(value_name = "FILE", help = "Input file; stdin when omitted")]
        input: Option<PathBuf>,
    },
    /// Generate shell completions
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(err) = run(cli.command) {
        eprintln!("{}", error_json(&err));
        std::process::exit(to_exit_code(err.kind()));
    }
}

fn run(command: Command) -> Result<(), Error> {
    match command {
        Command::Plan { schema, type_expr } => {
            let cache = load_cache(&schema, None)?;
            let descriptor = TypeDescriptor::parse(&type_expr)?;
            let plan = cache.plan_for(&descriptor)?;
            println!("{}", plan.render_json());
            Ok(())
        }
        Command::Export { schema, out, types } => {
            let cache = load_cache(&schema, None)?;
            let descriptors = types
                .iter()
                .map(|expr| TypeDescriptor::parse(expr))
                .collect::<Result<Vec<_>, Error>>()?;
            let store = DirArtifacts::new(&out);
            let exported = cache.export(&descriptors, &store)?;
            println!(
                "{}",
                json!({"exported": exported, "out": out.display().to_string()})
            );
            Ok(())
        }
        Command::Decode {
            schema,
            type_expr,
            artifacts,
            input,
        } => {
            let cache = load_cache(&schema, artifacts.as_deref())?;
            let descriptor = TypeDescriptor::parse(&type_expr)?;
            let payload = read_input(input.as_deref())?;
            let value = cache.decode_slice(&descriptor, &payload)?;
            println!("{value}");
            Ok(())
        }
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "castite", &mut io::stdout());
            Ok(())
        }
    }
}

fn load_cache(schema_path: &Path, artifacts: Option<&Path>) -> Result<DecoderCache, Error> {
    let raw = fs::read_to_string(schema_path).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read schema document")
            .with_path(schema_path)
            .with_source(err)
    })?;
    let schema = SchemaFile::from_json(&raw)?;
    let config: Config = schema.config.clone();
    let preload = config.mode() == ResolutionMode::AheadOfTime;
    let mut cache = DecoderCache::new(config, schema.registry());
    if let Some(dir) = artifacts {
        cache = cache.with_artifacts(DirArtifacts::new(dir));
        if preload {
            cache.preload_artifacts()?;
        }
    }
    Ok(cache)
}

fn read_input(path: Option<&Path>) -> Result<Vec<u8>, Error> {
    match path {
        Some(path) => fs::read(path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read input")
                .with_path(path)
                .with_source(err)
        }),
        None => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read stdin")
                    .with_source(err)
            })?;
            Ok(buf)
        }
    }
}

fn error_message(err: &Error) -> String {
    match err.message() {
        Some(message) => message.to_string(),
        None => err.to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        causes.push(cause.to_string());
        source = cause.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(type_expr) = err.type_expr() {
        inner.insert("type".to_string(), json!(type_expr));
    }
    if let Some(key) = err.key() {
        inner.insert("key".to_string(), json!(key));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    if let Some(plan) = err.plan() {
        inner.insert("plan".to_string(), json!(plan));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .try_init();
}
