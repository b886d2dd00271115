use clap::Parser;
use std::path::PathBuf;
use std::process::exit;

use strc::pass::PassId;
use strc::pipeline::{self, CompilationState, CompileOptions};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitStage {
    /// Resolved program, one statement per line
    Tree,
    /// Domain, rate and size of every stream member
    Domains,
    /// Machine-readable resolution report
    Json,
    /// Diagnostics only
    Diagnostics,
}

#[derive(Parser, Debug)]
#[command(
    name = "strc",
    version,
    about = "Stream resolver — injects libraries, infers sizes, domains and rates, and inserts domain connectors"
)]
struct Cli {
    /// Program source file
    source: PathBuf,

    /// Library source, importable under its file stem (repeatable)
    #[arg(short, long = "library")]
    library: Vec<PathBuf>,

    /// Framework source (repeatable)
    #[arg(short, long = "framework")]
    framework: Vec<PathBuf>,

    /// Domain connector table (JSON)
    #[arg(long)]
    connectors: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Tree)]
    emit: EmitStage,

    /// Print passes and timing
    #[arg(long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("strc=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_domains(state: &CompilationState) {
    for stream in pipeline::stream_reports(&state.tree) {
        println!("line {}:", stream.line);
        for member in stream.members {
            let domain = member.domain.as_deref().unwrap_or("-");
            let rate = member
                .rate
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:<32} domain={:<20} rate={:<10} out={} in={}",
                member.text, domain, rate, member.outputs, member.inputs
            );
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let options = CompileOptions {
        libraries: cli.library.clone(),
        frameworks: cli.framework.clone(),
        connectors: cli.connectors.clone(),
    };

    // ── Load libraries, frameworks and connectors ──
    let setup = pipeline::load_registry(&options)
        .map_err(pipeline::SetupError::from)
        .and_then(|registry| Ok((registry, pipeline::load_connectors(&options)?)));
    let (registry, connectors) = match setup {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("strc: error: {}", e);
            exit(2);
        }
    };

    // ── Read and resolve source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("strc: error: {}: {}", cli.source.display(), e);
            exit(2);
        }
    };

    let terminal = match cli.emit {
        EmitStage::Tree | EmitStage::Domains => PassId::Connect,
        EmitStage::Json | EmitStage::Diagnostics => PassId::Validate,
    };
    let state = match pipeline::compile(&source, registry, connectors, terminal) {
        Ok(state) => state,
        Err(pipeline::CompileError::Syntax(errors)) => {
            for err in &errors {
                eprintln!("strc: parse error: {}", err);
            }
            exit(1);
        }
        Err(e) => {
            eprintln!("strc: error: {}", e);
            exit(2);
        }
    };

    if cli.verbose {
        for record in &state.passes {
            eprintln!(
                "strc: {:?} ({} changes, {:.1}ms)",
                record.pass,
                record.changes,
                record.elapsed.as_secs_f64() * 1000.0
            );
        }
    }

    match cli.emit {
        EmitStage::Tree => println!("{}", state.tree.dump()),
        EmitStage::Domains => print_domains(&state),
        EmitStage::Json => match serde_json::to_string_pretty(&state.report()) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("strc: error: {}", e);
                exit(2);
            }
        },
        EmitStage::Diagnostics => {}
    }

    for diag in &state.diagnostics {
        eprintln!("strc: {}", diag);
    }
    if state.has_error {
        exit(1);
    }
}
