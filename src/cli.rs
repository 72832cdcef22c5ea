//! CLI: type file → (schema | definitions | decode)
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use rayon::prelude::*;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use json_shape::path_de::TypeFile;
use json_shape::{Conversions, Dialect, Direction, RefPolicy, Registry, SchemaOptions, TypeDescriptor};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// generate JSON schemas and codecs from a type file, and decode documents with them
#[derive(Parser, Debug)]
#[command(name = "json-shape", version, about)]
pub struct CommandLineInterface {
    /// more logging on stderr (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// print the JSON schema of one named type
    Schema(SchemaOut),
    /// print the shared definitions of several roots (e.g. OpenAPI components)
    Definitions(DefinitionsOut),
    /// decode JSON documents against one named type and report every violation
    Decode(DecodeIn),
}

#[derive(Args, Debug, Clone)]
struct TypeSettings {
    /// type file: `{"settings": {...}, "types": {...}}`
    #[arg(long, short)]
    types: PathBuf,
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// treat input as newline-delimited JSON (NDJSON)
    #[arg(long, default_value_t = false)]
    ndjson: bool,

    /// JSON Pointer to select a subnode in each document (e.g. /data/items/0/payload)
    #[arg(long)]
    json_pointer: Option<String>,

    /// One or more inputs. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(clap::Parser, Debug)]
struct SchemaOut {
    #[command(flatten)]
    type_settings: TypeSettings,

    /// type name in the type file
    #[arg(long, short)]
    root: String,

    /// overrides the type file's dialect (2019-09, draft-07, openapi-3.0)
    #[arg(long)]
    dialect: Option<Dialect>,

    /// when named types become references (repeated, always)
    #[arg(long)]
    ref_policy: Option<RefPolicy>,

    /// describe the serialized form instead of the accepted input
    #[arg(long)]
    serialization: bool,

    /// omit the `$schema` URI
    #[arg(long)]
    no_schema_uri: bool,

    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(clap::Parser, Debug)]
struct DefinitionsOut {
    #[command(flatten)]
    type_settings: TypeSettings,

    /// roots described as accepted input
    #[arg(long, num_args = 1..)]
    deserialization: Vec<String>,

    /// roots described as produced output
    #[arg(long, num_args = 1..)]
    serialization: Vec<String>,

    #[arg(long)]
    dialect: Option<Dialect>,

    #[arg(long)]
    ref_policy: Option<RefPolicy>,

    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(clap::Parser, Debug)]
struct DecodeIn {
    #[command(flatten)]
    type_settings: TypeSettings,

    #[command(flatten)]
    input_settings: InputSettings,

    /// type name in the type file
    #[arg(long, short)]
    root: String,

    /// print each decoded document re-encoded
    #[arg(long)]
    echo: bool,
}

/// A loaded input document and where it came from.
struct Document {
    label: String,
    value: Value,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl TypeSettings {
    fn load(&self) -> Result<Registry> {
        let file = TypeFile::open(&self.types)?;
        let registry = file.into_registry().with_context(|| format!("loading {}", self.types.display()))?;
        Ok(registry)
    }
}

/// A name from the type file, as a descriptor.
fn root_of(registry: &Registry, name: &str) -> Result<TypeDescriptor> {
    registry.alias(name).with_context(|| format!("unknown root type '{name}'"))?;
    Ok(TypeDescriptor::alias(name))
}

impl InputSettings {
    fn load(&self) -> Result<Vec<Document>> {
        let source_paths = resolve_file_path_patterns(&self.input)?;
        let mut out = Vec::new();
        for source_path in source_paths {
            let source_path_str = source_path.to_string_lossy().to_string();
            let source = std::fs::read_to_string(&source_path)
                .with_context(|| format!("failed to read source file {source_path_str}"))?;
            if self.ndjson {
                for (i, line) in source.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
                    let label = format!("{source_path_str}:{}", i + 1);
                    let value = serde_json::from_str::<Value>(line)
                        .with_context(|| format!("failed to parse JSON ({label})"))?;
                    out.push(self.select(label, value)?);
                }
            } else {
                let value = serde_json::from_str::<Value>(&source)
                    .with_context(|| format!("failed to parse JSON source file ({source_path_str})"))?;
                out.push(self.select(source_path_str, value)?);
            }
        }
        tracing::debug!(documents = out.len(), "loaded inputs");
        Ok(out)
    }

    fn select(&self, label: String, value: Value) -> Result<Document> {
        match self.json_pointer.as_deref() {
            None => Ok(Document { label, value }),
            Some(pointer) => match value.pointer(pointer) {
                Some(node) => Ok(Document { label, value: node.clone() }),
                None => bail!("JSON pointer {pointer} selects nothing in {label}"),
            },
        }
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn init_tracing(&self) {
        let filter = match self.verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        };
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
    }

    pub fn run(&self) -> Result<ExitCode> {
        match &self.cmd {
            Command::Schema(target) => {
                let registry = target.type_settings.load()?;
                let root = root_of(&registry, &target.root)?;
                let mut options = SchemaOptions::default();
                if let Some(dialect) = target.dialect {
                    options = options.dialect(dialect);
                }
                if let Some(policy) = target.ref_policy {
                    options = options.ref_policy(policy);
                }
                if target.no_schema_uri {
                    options = options.without_schema();
                }
                let direction =
                    if target.serialization { Direction::Serialization } else { Direction::Deserialization };
                let schema = registry.schema(&root, direction, &options)?;
                write_output(target.out.as_ref(), &serde_json::to_string_pretty(&schema)?)?;
                Ok(ExitCode::SUCCESS)
            }
            Command::Definitions(target) => {
                let registry = target.type_settings.load()?;
                let de = target.deserialization.iter().map(|n| root_of(&registry, n)).collect::<Result<Vec<_>>>()?;
                let ser = target.serialization.iter().map(|n| root_of(&registry, n)).collect::<Result<Vec<_>>>()?;
                let mut options = SchemaOptions::default();
                if let Some(dialect) = target.dialect {
                    options = options.dialect(dialect);
                }
                if let Some(policy) = target.ref_policy {
                    options = options.ref_policy(policy);
                }
                let definitions = registry.definitions_schema(&de, &ser, &options)?;
                write_output(target.out.as_ref(), &serde_json::to_string_pretty(&Value::Object(definitions))?)?;
                Ok(ExitCode::SUCCESS)
            }
            Command::Decode(target) => {
                let registry = target.type_settings.load()?;
                let root = root_of(&registry, &target.root)?;
                let deserializer = registry.deserializer(&root, &Conversions::new())?;
                let serializer =
                    if target.echo { Some(registry.serializer(&root, &Conversions::new())?) } else { None };
                let documents = target.input_settings.load()?;
                let reports = documents
                    .par_iter()
                    .map(|doc| {
                        let decoded = deserializer.decode(&doc.value);
                        let echoed = match (&decoded, &serializer) {
                            (Ok(data), Some(serializer)) => Some(serializer.encode(data)),
                            _ => None,
                        };
                        (doc, decoded, echoed)
                    })
                    .collect::<Vec<_>>();
                let mut failed = 0usize;
                for (doc, decoded, echoed) in &reports {
                    match decoded {
                        Ok(_) => {
                            eprintln!("{} {}", "ok".green().bold(), doc.label);
                        }
                        Err(error) => {
                            failed += 1;
                            eprintln!("{} {}", "invalid".red().bold(), doc.label);
                            for record in error.flat() {
                                println!("{}", serde_json::to_string(&record)?);
                            }
                        }
                    }
                    match echoed {
                        Some(Ok(value)) => println!("{}", serde_json::to_string(value)?),
                        Some(Err(error)) => {
                            failed += 1;
                            eprintln!("{} {}: {error}", "unencodable".yellow().bold(), doc.label);
                        }
                        None => {}
                    }
                }
                let summary = format!("{} documents, {} failed", reports.len(), failed);
                if failed == 0 {
                    eprintln!("{}", summary.green());
                    Ok(ExitCode::SUCCESS)
                } else {
                    eprintln!("{}", summary.red());
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn write_output(out: Option<&PathBuf>, contents: &str) -> Result<()> {
    match out {
        Some(out) => {
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(out, contents).with_context(|| format!("failed to write {}", out.display()))
        }
        None => {
            println!("{contents}");
            Ok(())
        }
    }
}

fn resolve_file_path_patterns<I>(patterns: I) -> Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        // Minimal glob detection for the `glob` crate syntax.
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::<PathBuf>::new();

    for raw in patterns {
        let pattern = raw.as_ref();

        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern)? {
                out.push(entry?);
                matched_any = true;
            }
            if !matched_any {
                bail!("glob pattern matched no files: {pattern}");
            }
        } else {
            out.push(PathBuf::from(pattern));
        }
    }

    Ok(out)
}
