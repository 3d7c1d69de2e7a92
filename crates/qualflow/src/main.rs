use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use qualflow_core::wpi::InferenceStorage;
use qualflow_core::{Checker, CheckerOptions, Diagnostic, DiagnosticKind, HirModule};
use qualflow_testing::{compare_reported, DiagnosticReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "qualflow", version, about = "Pluggable type-qualifier checkers")]
struct Cli {
    /// Log analysis progress
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a compilation unit given as a JSON tree
    Check(CheckArgs),
}

#[derive(Args)]
struct CheckArgs {
    /// Unit to check
    unit: PathBuf,
    /// Type system to run (repeatable); defaults to the configured set
    #[arg(long = "checker", value_name = "NAME")]
    checkers: Vec<String>,
    /// TOML options file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Run inference and write the summary into this directory
    #[arg(long, value_name = "DIR")]
    wpi_out: Option<PathBuf>,
    /// Seed declarations from a summary written by an earlier run
    #[arg(long, value_name = "DIR")]
    wpi_in: Option<PathBuf>,
    /// Compare against expected diagnostics instead of printing them
    #[arg(long, value_name = "FILE")]
    expected: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", "error:".red().bold(), err);
            2
        }
    };
    std::process::exit(exit_code);
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Check(args) => check(args),
    }
}

fn check(args: CheckArgs) -> Result<i32> {
    let options = load_options(&args)?;
    let module = read_unit(&args.unit)?;
    let stem = unit_stem(&module, &args.unit);

    let seed = match &args.wpi_in {
        Some(dir) => InferenceStorage::read_json(dir, &stem)
            .with_context(|| format!("reading inference summary from {}", dir.display()))?,
        None => None,
    };
    let wpi_out = args.wpi_out.clone().or_else(|| options.wpi_dir.clone());
    debug!(checkers = ?options.checkers, seeded = seed.is_some(), "starting check");

    let checker = Checker::new(options).context("configuring checkers")?.with_inference_seed(seed);
    let report = checker
        .check(&module)
        .with_context(|| format!("checking {}", args.unit.display()))?;

    if let (Some(dir), Some(summary)) = (&wpi_out, &report.inference) {
        let path = summary
            .write_json(dir, &stem)
            .with_context(|| format!("writing inference summary to {}", dir.display()))?;
        info!(path = %path.display(), changed = summary.changed(), "inference summary written");
    }

    if let Some(expected) = &args.expected {
        let reader = DiagnosticReader::new()?;
        let expected = reader
            .read_out_file(expected)
            .with_context(|| format!("reading expectations from {}", expected.display()))?;
        let result = compare_reported(expected, &report.diagnostics);
        println!("{}", result.summary().trim_end());
        return Ok(i32::from(result.failed()));
    }

    for d in &report.diagnostics {
        print_diagnostic(d);
    }
    Ok(i32::from(report.has_errors()))
}

fn load_options(args: &CheckArgs) -> Result<CheckerOptions> {
    let mut options = match &args.config {
        Some(path) => CheckerOptions::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => CheckerOptions::default(),
    };
    if !args.checkers.is_empty() {
        options = options.with_checkers(args.checkers.iter().map(String::as_str));
    }
    if args.wpi_out.is_some() {
        options = options.with_inference(true);
    }
    Ok(options)
}

fn read_unit(path: &Path) -> Result<HirModule> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let module: HirModule =
        serde_json::from_str(&text).with_context(|| format!("parsing {} as a unit tree", path.display()))?;
    if module.classes.is_empty() {
        bail!("{} declares no classes", path.display());
    }
    Ok(module)
}

/// Summaries are named after the unit's source file, falling back to the JSON file name
fn unit_stem(module: &HirModule, path: &Path) -> String {
    Path::new(&module.file)
        .file_stem()
        .or_else(|| path.file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unit".to_string())
}

fn print_diagnostic(d: &Diagnostic) {
    let kind = match d.kind {
        DiagnosticKind::Error => "error".red().bold(),
        DiagnosticKind::Warning => "warning".yellow().bold(),
        DiagnosticKind::Other => "note".normal(),
    };
    println!("{}:{}: {}: ({}) {}", d.file, d.line, kind, d.key, d.message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stem_prefers_source_file() {
        let module = HirModule {
            file: "src/Logger.java".into(),
            classes: vec![],
        };
        assert_eq!(unit_stem(&module, Path::new("out/unit.json")), "Logger");
        let anonymous = HirModule {
            file: String::new(),
            classes: vec![],
        };
        assert_eq!(unit_stem(&anonymous, Path::new("out/unit.json")), "unit");
    }

    #[test]
    fn test_flags_override_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = dir.path().join("qualflow.toml");
        std::fs::write(&config, "checkers = [\"determinism\"]\nwarn_partial_loops = false\n").unwrap();
        let args = CheckArgs {
            unit: dir.path().join("unit.json"),
            checkers: vec!["format".into()],
            config: Some(config),
            wpi_out: Some(dir.path().to_path_buf()),
            wpi_in: None,
            expected: None,
        };
        let options = load_options(&args).unwrap();
        assert_eq!(options.checkers, vec!["format"]);
        assert!(!options.warn_partial_loops);
        assert!(options.infer);
    }

    #[test]
    fn test_unit_without_classes_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::write(&path, r#"{"file": "Empty.java", "classes": []}"#).unwrap();
        let err = read_unit(&path).unwrap_err();
        assert!(err.to_string().contains("declares no classes"), "{err}");
    }
}
