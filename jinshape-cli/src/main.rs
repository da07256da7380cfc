mod schema;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use clap::{ArgAction, Parser, ValueEnum};
use jinshape_infer::{
    Config, Diagnostic, FileSystemLoader, Inferrer, IntegerIndexPolicy, Structure,
    TemplateLoader, VariableIndexPolicy,
};
use jinshape_support::{cli_error, cli_target_error, config_error};
use tracing::{debug, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    /// The inferred structure with every metadata flag.
    Json,
    /// A JSON-Schema (draft 4) document.
    Schema,
    /// Indented dump of the structure tree.
    Debug,
}

#[derive(Parser)]
#[command(
    name = "jinshape",
    version,
    about = "Infer the structure of the context a Jinja template expects.",
    long_about = "Walk a Jinja template without rendering it and report the variables it \
                  reads, the shape each one must have, and which ones are optional."
)]
struct Cli {
    /// Path to the template to analyse.
    template: PathBuf,

    /// YAML or JSON file with inference options. Flags override its values.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// What `xs[2]` makes `xs`: `list`, `dictionary` or `tuple`.
    #[arg(long, value_name = "POLICY")]
    integer_index: Option<IntegerIndexPolicy>,

    /// What `xs[i]` makes `xs`: `list` or `dictionary`.
    #[arg(long, value_name = "POLICY")]
    variable_index: Option<VariableIndexPolicy>,

    /// Type `if` and ternary conditions as booleans.
    #[arg(long, action = ArgAction::SetTrue)]
    boolean_conditions: bool,

    /// Directory that holds the template directory.
    #[arg(long, value_name = "DIR")]
    package_name: Option<String>,

    /// Directory, relative to the package, that include and extends read from.
    #[arg(long, value_name = "DIR")]
    template_dir: Option<String>,

    /// Report variables the template assigns itself.
    #[arg(long)]
    keep_constants: bool,

    /// Log more (`-v` debug, `-vv` trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    run(&cli)
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config = resolve_config(cli)?;
    let template_path = cli.template.display().to_string();
    let contents = fs::read_to_string(&cli.template)
        .map_err(|err| anyhow!(cli_target_error("read", &template_path, err)))?;

    let loader = FileSystemLoader::from_config(&config);
    debug!(root = %loader.root().display(), "resolving templates");

    let structure = match Inferrer::new(&config)
        .with_loader(&loader)
        .keep_constants(cli.keep_constants)
        .infer_source(&contents)
    {
        Ok(structure) => structure,
        Err(err) => {
            eprintln!("Diagnostics:");
            print_diagnostic(
                &cli.template,
                &contents,
                &loader,
                &Diagnostic::from_error(&err),
            );
            bail!(cli_target_error(
                "infer",
                &template_path,
                "the template could not be analysed"
            ));
        }
    };

    println!("{}", render(&structure, cli.format)?);
    Ok(())
}

fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => Config::default(),
    };
    if let Some(policy) = cli.integer_index {
        config.integer_index_policy = policy;
    }
    if let Some(policy) = cli.variable_index {
        config.variable_index_policy = policy;
    }
    if cli.boolean_conditions {
        config.boolean_conditions = true;
    }
    if let Some(package_name) = &cli.package_name {
        config.package_name = package_name.clone();
    }
    if let Some(template_dir) = &cli.template_dir {
        config.template_directory = template_dir.clone();
    }
    debug!(?config, "resolved configuration");
    Ok(config)
}

fn read_config(path: &Path) -> Result<Config> {
    let display_path = path.display().to_string();
    let contents = fs::read_to_string(path)
        .map_err(|err| anyhow!(config_error("read", &display_path, err)))?;

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    let config = match extension {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .map_err(|err| anyhow!(config_error("parse", &display_path, err)))?,
        "json" => serde_json::from_str(&contents)
            .map_err(|err| anyhow!(config_error("parse", &display_path, err)))?,
        other => bail!(config_error(
            "parse",
            &display_path,
            format!("unsupported config format '{other}', expected yaml or json")
        )),
    };
    Ok(config)
}

fn render(structure: &Structure, format: Format) -> Result<String> {
    let rendered = match format {
        Format::Json => serde_json::to_string_pretty(structure),
        Format::Schema => serde_json::to_string_pretty(&schema::encode(structure)),
        Format::Debug => return Ok(structure.debug_repr()),
    };
    rendered.map_err(|err| anyhow!(cli_error("encode", err)))
}

/// Prints the message, then the offending line with a caret underline when
/// the failure has a position. Failures inside included templates are shown
/// against that template's source.
fn print_diagnostic(
    path: &Path,
    contents: &str,
    loader: &dyn TemplateLoader,
    diagnostic: &Diagnostic,
) {
    eprintln!("  - error: {}", diagnostic.message);
    let Some(span) = diagnostic.span else {
        return;
    };

    let (display_path, source) = match &diagnostic.template {
        Some(name) => (name.clone(), loader.load(name).ok()),
        None => (path.display().to_string(), Some(contents.to_string())),
    };
    eprintln!("     --> {}:{}:{}", display_path, span.line, span.column);

    let Some(source) = source else {
        return;
    };
    let Some(raw_line) = source.lines().nth(span.line.saturating_sub(1)) else {
        return;
    };
    let display_line = raw_line.replace('\t', "    ");
    eprintln!("      {}", display_line);

    let mut caret_line = String::from("      ");
    for ch in raw_line.chars().take(span.column.saturating_sub(1)) {
        match ch {
            '\t' => caret_line.push_str("    "),
            _ => caret_line.push(' '),
        }
    }

    let highlight_len = if span.end_line == span.line {
        span.end_column
            .saturating_sub(span.column)
            .saturating_add(1)
    } else {
        display_line
            .chars()
            .count()
            .saturating_sub(span.column.saturating_sub(1))
    };
    caret_line.push_str(&"^".repeat(highlight_len.max(1)));
    eprintln!("{}", caret_line);
}
