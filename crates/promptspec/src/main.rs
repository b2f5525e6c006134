//! Compile a prompt spec and print the result.
//!
//! Semantic directives are sent to an OpenRouter model (key in the
//! `OPENROUTER_KEY` environment variable) unless `--offline` is given.
//!
//! # Examples
//!
//! ```sh
//! # Compile with variables
//! promptspec tutor.promptspec.md --var audience=beginners --var short=yes
//!
//! # Full JSON output, no network
//! promptspec tutor.promptspec.md --offline --format json -o out.json
//!
//! # Pipe a spec in
//! cat draft.md | promptspec --stdin --vars-file vars.json
//!
//! # Inputs a spec expects, without compiling it
//! promptspec tutor.promptspec.md --scan
//! ```

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::Parser;
use promptspec::config::{DEFAULT_MAX_PASSES, OutputFormat};
use promptspec::events::LoggingHandler;
use promptspec::files::FsReader;
use promptspec::semantic::echo::EchoOracle;
use promptspec::semantic::llm::LlmOracle;
use promptspec::{
    Bindings, CompileConfig, CompileOutput, Compiler, SemanticOracle, json_schema_for, logging,
    scan,
};
use tracing::debug;

/// Compile a directive-annotated prompt spec.
#[derive(Parser)]
#[command(name = "promptspec", version)]
struct Cli {
    /// Spec file to compile
    file: Option<PathBuf>,

    /// Read the spec from stdin
    #[arg(long)]
    stdin: bool,

    // ── Variables ──────────────────────────────────────────────
    /// Bind a variable (repeatable); `true/yes/1` and `false/no/0` are booleans
    #[arg(long = "var", value_name = "KEY=VALUE")]
    vars: Vec<String>,

    /// JSON object of variable bindings (overridden by --var)
    #[arg(long)]
    vars_file: Option<PathBuf>,

    // ── Output ─────────────────────────────────────────────────
    /// Write the output here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
    format: OutputFormat,

    /// Print the spec's inputs and metadata as JSON without compiling
    #[arg(long)]
    scan: bool,

    /// Print the JSON Schema of the compile output and exit
    #[arg(long)]
    schema: bool,

    // ── Oracle ─────────────────────────────────────────────────
    /// Use the deterministic offline oracle instead of a model
    #[arg(long)]
    offline: bool,

    /// Model for semantic directives
    #[arg(long, default_value = promptspec::DEFAULT_MODEL)]
    model: String,

    /// Fixpoint pass cap
    #[arg(long, default_value_t = DEFAULT_MAX_PASSES)]
    max_passes: u32,

    /// More logging on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

// ── Helpers ────────────────────────────────────────────────────────

fn read_stdin_content() -> Result<String, String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .map_err(|e| format!("failed to read stdin: {e}"))?;
    Ok(buf)
}

fn read_source(cli: &Cli) -> Result<String, String> {
    match (&cli.file, cli.stdin) {
        (Some(_), true) => Err("give a FILE or --stdin, not both".to_string()),
        (Some(path), false) => std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read '{}': {e}", path.display())),
        (None, true) => read_stdin_content(),
        (None, false) => Err("provide a FILE or --stdin".to_string()),
    }
}

/// Bindings from `--vars-file`, then `--var` flags (last one wins).
fn load_bindings(cli: &Cli) -> Result<Bindings, String> {
    let mut bindings = Bindings::new();
    if let Some(path) = &cli.vars_file {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read vars file '{}': {e}", path.display()))?;
        let json: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| format!("failed to parse vars file '{}': {e}", path.display()))?;
        bindings.extend_from_json(&json)?;
    }
    for item in &cli.vars {
        let (key, value) = Bindings::parse_assignment(item)
            .ok_or_else(|| format!("invalid --var '{item}', expected KEY=VALUE"))?;
        bindings.insert(key, value);
    }
    Ok(bindings)
}

fn build_oracle(cli: &Cli) -> Result<Arc<dyn SemanticOracle>, String> {
    if cli.offline {
        return Ok(Arc::new(EchoOracle::new()));
    }
    let oracle = LlmOracle::from_env()
        .map_err(|e| format!("{e} (use --offline to compile without a model)"))?
        .with_model(&cli.model);
    Ok(Arc::new(oracle))
}

fn render(output: &CompileOutput, format: OutputFormat) -> Result<String, String> {
    match format {
        OutputFormat::Markdown => Ok(output.to_markdown()),
        OutputFormat::Json => output
            .to_json()
            .map_err(|e| format!("failed to serialize output: {e}")),
    }
}

fn emit(text: &str, path: Option<&Path>) -> Result<(), String> {
    match path {
        Some(path) => std::fs::write(path, text)
            .map_err(|e| format!("failed to write '{}': {e}", path.display())),
        None => {
            print!("{text}");
            Ok(())
        }
    }
}

fn print_diagnostics(output: &CompileOutput) {
    for e in &output.diagnostics.errors {
        eprintln!("error: {e}");
    }
    for w in &output.diagnostics.warnings {
        eprintln!("warning: {w}");
    }
    for s in &output.diagnostics.suggestions {
        eprintln!("suggestion: {s}");
    }
}

// ── Main ───────────────────────────────────────────────────────────

async fn run(cli: &Cli) -> Result<bool, String> {
    if cli.schema {
        let schema = serde_json::to_string_pretty(&json_schema_for::<CompileOutput>())
            .map_err(|e| e.to_string())?;
        emit(&format!("{schema}\n"), cli.output.as_deref())?;
        return Ok(true);
    }

    let source = read_source(cli)?;
    if cli.scan {
        let meta = serde_json::to_string_pretty(&scan::scan(&source))
            .map_err(|e| e.to_string())?;
        emit(&format!("{meta}\n"), cli.output.as_deref())?;
        return Ok(true);
    }

    let bindings = load_bindings(cli)?;
    let base_dir = cli
        .file
        .as_deref()
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    debug!("base directory {}", base_dir.display());

    let config = CompileConfig::default()
        .with_max_passes(cli.max_passes)
        .with_base_dir(&base_dir);
    let mut compiler = Compiler::new(build_oracle(cli)?, FsReader::new(&base_dir))
        .with_event_handler(LoggingHandler)
        .with_config(config);
    if let Some(name) = cli.file.as_deref().and_then(Path::file_name) {
        compiler = compiler.with_source_path(name);
    }

    let output = compiler.compile(&source, &bindings).await;
    if cli.format == OutputFormat::Markdown {
        print_diagnostics(&output);
    }
    emit(&render(&output, cli.format)?, cli.output.as_deref())?;
    Ok(!output.has_errors())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = logging::init(cli.verbose) {
        eprintln!("Warning: logging disabled: {e}");
    }

    match run(&cli).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(2);
        }
    }
}
