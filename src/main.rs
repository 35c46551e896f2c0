//! Prism Router - Main Entry Point
//!
//! Plans queries against a vschema and prints the resulting plan, either for
//! a single `--query` or interactively.

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::process;
use tracing::Level;

use prism_router::{
    parse_sql, BindVars, ExplainFormat, PlannedQuery, PlannerConfig, QueryPlanner, Statement,
    VSchema, Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Indented operator tree
    Text,
    /// Plan description as JSON
    Json,
    /// SQL sent to every destination
    Queries,
}

#[derive(Parser)]
#[command(name = "prism-router")]
#[command(about = "Split-aware query planner for sharded SQL")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Partitioning schema (JSON)
    #[arg(short = 's', long)]
    vschema: PathBuf,

    /// Planner configuration (JSON); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQL query to plan; starts an interactive session when omitted
    #[arg(short, long)]
    query: Option<String>,

    /// Bind variable as NAME=VALUE; may be repeated
    #[arg(short, long = "bind", value_name = "NAME=VALUE")]
    bind: Vec<String>,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// More logging; repeat for more detail
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

struct Session {
    vschema: VSchema,
    config: PlannerConfig,
    bind_vars: BindVars,
    format: OutputFormat,
}

impl Session {
    fn plan(&self, sql: &str) -> anyhow::Result<String> {
        let statement = parse_sql(sql)?;
        let planner = QueryPlanner::new(&self.vschema, self.config.clone());
        let planned = planner.plan_statement(&statement, &self.bind_vars)?;
        // an EXPLAIN picks its own format
        let format = match statement {
            Statement::Explain {
                format: ExplainFormat::Json,
                ..
            } => OutputFormat::Json,
            Statement::Explain { .. } => OutputFormat::Text,
            Statement::Query(_) => self.format,
        };
        render(&planned, format)
    }
}

fn render(planned: &PlannedQuery, format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Text => planned.explain(ExplainFormat::Text)?,
        OutputFormat::Json => planned.explain(ExplainFormat::Json)?,
        OutputFormat::Queries => {
            let mut out = String::new();
            for query in planned.destination_queries()? {
                out.push_str(&format!("{}: {}\n", query.shard, query.sql));
            }
            out
        }
    })
}

/// `name=value`; integers and `null` are typed, anything else is a string
fn parse_bind(arg: &str) -> anyhow::Result<(String, Value)> {
    let (name, raw) = match arg.split_once('=') {
        Some((name, raw)) if !name.trim().is_empty() => (name.trim(), raw.trim()),
        _ => bail!("bind variable '{}' is not NAME=VALUE", arg),
    };
    let value = if raw.eq_ignore_ascii_case("null") {
        Value::Null
    } else if let Ok(i) = raw.parse::<i64>() {
        Value::Integer(i)
    } else if let Ok(d) = raw.parse::<f64>() {
        Value::double(d)
    } else {
        Value::varchar(raw.trim_matches('\''))
    };
    Ok((name.trim_start_matches(':').to_string(), value))
}

fn run_interactive_mode(session: &mut Session) -> anyhow::Result<()> {
    println!("Prism Router v{}", env!("CARGO_PKG_VERSION"));
    println!("Enter '.help' for usage hints.");
    println!("Enter SQL statements terminated with a semicolon (;)");
    println!();

    let mut rl = DefaultEditor::new()?;
    let history_file = dirs::home_dir()
        .map(|mut path| {
            path.push(".prism_router_history");
            path
        })
        .unwrap_or_else(|| PathBuf::from(".prism_router_history"));
    let _ = rl.load_history(&history_file);

    let mut sql_buffer = String::new();
    loop {
        let prompt = if sql_buffer.is_empty() {
            "router> "
        } else {
            "     -> "
        };

        match rl.readline(prompt) {
            Ok(line) => {
                let trimmed = line.trim();

                if sql_buffer.is_empty() && trimmed.starts_with('.') {
                    let _ = rl.add_history_entry(trimmed);
                    match handle_special_command(trimmed, session) {
                        Ok(true) => break,
                        Ok(false) => {}
                        Err(e) => eprintln!("Error: {:#}", e),
                    }
                    continue;
                }
                if trimmed.is_empty() {
                    continue;
                }

                if !sql_buffer.is_empty() {
                    sql_buffer.push(' ');
                }
                sql_buffer.push_str(trimmed);

                if trimmed.ends_with(';') {
                    let _ = rl.add_history_entry(&sql_buffer);
                    let sql = sql_buffer.trim_end_matches(';');
                    match session.plan(sql) {
                        Ok(output) => print!("{}", output),
                        Err(e) => eprintln!("Error: {:#}", e),
                    }
                    sql_buffer.clear();
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                sql_buffer.clear();
            }
            Err(ReadlineError::Eof) => {
                println!("exit");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_file);
    Ok(())
}

/// Returns true when the session should end
fn handle_special_command(command: &str, session: &mut Session) -> anyhow::Result<bool> {
    let parts: Vec<&str> = command.split_whitespace().collect();
    let cmd = parts.first().copied().unwrap_or("");

    match cmd {
        ".exit" | ".quit" => return Ok(true),
        ".help" => print_help(),
        ".tables" => {
            for keyspace in session.vschema.keyspaces() {
                for (name, table) in &keyspace.tables {
                    let split = table
                        .split
                        .as_ref()
                        .map(|s| format!(" split={}x{}", s.columns.join(","), s.table_count))
                        .unwrap_or_default();
                    println!("{}.{}{}", keyspace.name, name, split);
                }
            }
        }
        ".format" => match parts.get(1) {
            Some(name) => {
                session.format = OutputFormat::from_str(name, true)
                    .map_err(|e| anyhow::anyhow!(e))
                    .context("use text, json or queries")?;
            }
            None => println!("Current format: {:?}", session.format),
        },
        ".bind" => match parts.get(1) {
            Some(arg) => {
                let (name, value) = parse_bind(arg)?;
                session.bind_vars.insert(name, value);
            }
            None => {
                let mut names: Vec<_> = session.bind_vars.iter().collect();
                names.sort_by(|a, b| a.0.cmp(b.0));
                for (name, value) in names {
                    println!(":{} = {}", name, value);
                }
            }
        },
        ".unbind" => {
            session.bind_vars.clear();
        }
        _ => {
            println!("Unknown command: {}", cmd);
            println!("Type '.help' for list of available commands.");
        }
    }
    Ok(false)
}

fn print_help() {
    println!(
        r#"
.help                    Show this help message
.quit                    Exit this program
.exit                    Exit this program
.tables                  List tables of the vschema
.format FORMAT           Set output format (text, json, queries)
.bind NAME=VALUE         Set a bind variable; without argument, list them
.unbind                  Clear all bind variables

SQL Statements:
  Type SELECT statements terminated with a semicolon (;)
  EXPLAIN [FORMAT=JSON] SELECT ... picks the output format itself
"#
    );
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    init_logging(cli.verbose);

    let vschema = VSchema::from_file(&cli.vschema)
        .with_context(|| format!("loading vschema {}", cli.vschema.display()))?;
    let config = match &cli.config {
        Some(path) => PlannerConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PlannerConfig::default(),
    };
    let mut bind_vars = BindVars::new();
    for arg in &cli.bind {
        let (name, value) = parse_bind(arg)?;
        bind_vars.insert(name, value);
    }

    let mut session = Session {
        vschema,
        config,
        bind_vars,
        format: cli.format,
    };
    match &cli.query {
        Some(query) => {
            print!("{}", session.plan(query)?);
            Ok(())
        }
        None => run_interactive_mode(&mut session),
    }
}

fn main() {
    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
