//! Purpose: `anytable` CLI entry point: inspect, stream, write, and copy tables.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Row streams are JSON Lines on stdout; summaries are single JSON values.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: All table access goes through `api::open_table` and its sessions.
#![allow(clippy::result_large_err)]
use std::io::{self, BufRead, IsTerminal, Write};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use anytable::api::{
    Error, ErrorKind, Reader, Record, Row, TableHandle, Writer, open_table, registered_kinds,
    to_exit_code,
};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint(clap_error_hint(&err)),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    command_dispatch::dispatch_command(cli.command, color_mode)
        .map_err(add_not_found_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "anytable",
    version,
    about = "Read and write tabular data through one interface, whatever the format",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"A table is named by a spec: a bare location (`breeds.tab`), JSON
(`{"kind":"delimited","location":"breeds.tab"}`), or a keyword map
(`{:kind fixed-width :location "breeds.txt" :widths [12 5 6]}`).
"#,
    after_help = r#"EXAMPLES
  $ anytable headers breeds.tab
  $ anytable cat breeds.tab --records
  $ anytable copy breeds.tab '{:kind fixed-width :location "breeds.txt" :widths [12 5 6]}'
  $ echo '["Beagle","Hound","Medium"]' | anytable write '{:kind delimited :location "b.tab" :headers ["breed" "category" "size"]}'

LEARN MORE
  $ anytable <command> --help"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics; JSON output is never colored, only indented on a TTY or with `always`: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }

    /// JSON stays plain text; color only decides whether it is indented.
    fn pretty_json(self, is_tty: bool) -> bool {
        is_tty || self.use_color(is_tty)
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Print the canonical form of a table spec",
        after_help = r#"EXAMPLES
  $ anytable spec breeds.tab
  $ anytable spec '{:type fixed-width :location "breeds.txt" :widths [12 5 6]}'"#
    )]
    Spec {
        #[arg(help = "Table spec: location, JSON object, or keyword map")]
        spec: String,
    },
    #[command(
        about = "Print the effective header list",
        long_about = r#"Print the effective header list as a JSON array.

Declared headers win; otherwise the table is opened for reading and the
backend is asked to infer them (e.g. a delimited header row)."#
    )]
    Headers {
        #[arg(help = "Table spec: location, JSON object, or keyword map")]
        spec: String,
    },
    #[command(
        about = "Stream rows as JSON Lines",
        after_help = r#"EXAMPLES
  $ anytable cat breeds.tab
  $ anytable cat breeds.tab --records --limit 2"#
    )]
    Cat {
        #[arg(help = "Table spec: location, JSON object, or keyword map")]
        spec: String,
        #[arg(long, help = "Emit header-keyed objects instead of arrays")]
        records: bool,
        #[arg(long, value_name = "N", help = "Stop after N rows")]
        limit: Option<usize>,
    },
    #[command(
        about = "Write JSON Lines from stdin into a table (truncates)",
        long_about = r#"Read JSON Lines from stdin and write them to the table.

Each line is a JSON array (a row) or, with --records, a JSON object keyed by
header. Existing content is replaced. Blank lines are skipped."#
    )]
    Write {
        #[arg(help = "Table spec: location, JSON object, or keyword map")]
        spec: String,
        #[arg(long, help = "Expect JSON objects keyed by header")]
        records: bool,
    },
    #[command(
        about = "Copy every row from one table into another",
        long_about = r#"Copy every row from FROM into TO, converting between formats.

When TO declares no headers it adopts the headers of FROM."#
    )]
    Copy {
        #[arg(help = "Source table spec")]
        from: String,
        #[arg(help = "Destination table spec (truncated)")]
        to: String,
        #[arg(long, help = "Copy by header name instead of by position")]
        records: bool,
    },
    #[command(about = "Remove a table's underlying storage")]
    Delete {
        #[arg(help = "Table spec: location, JSON object, or keyword map")]
        spec: String,
    },
    #[command(about = "List registered table formats")]
    Formats,
    #[command(
        about = "Generate shell completions",
        long_about = r#"Generate shell completion scripts.

Prints a completion script for the given shell to stdout."#,
        after_help = r#"EXAMPLES
  $ anytable completion bash > ~/.local/share/bash-completion/completions/anytable
  $ anytable completion zsh > ~/.zfunc/_anytable"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

fn open_spec(spec: &str) -> Result<TableHandle, Error> {
    open_table(spec)
}

/// Effective headers without consuming any data rows.
fn effective_headers(table: &TableHandle) -> Result<Vec<String>, Error> {
    if !table.headers().is_empty() {
        return Ok(table.headers().to_vec());
    }
    let reader = table.open_reader()?;
    let headers = reader.headers().to_vec();
    reader.close()?;
    Ok(headers)
}

fn add_not_found_hint(err: Error) -> Error {
    if err.kind() == ErrorKind::NotFound && err.hint().is_none() {
        return err.with_hint("Check the table location, or create it with `anytable write`.");
    }
    err
}

fn output_error(err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write output")
        .with_source(err)
}

fn emit_line<W: Write>(out: &mut W, value: &Value) -> Result<(), Error> {
    serde_json::to_writer(&mut *out, value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("json encode failed")
            .with_source(err)
    })?;
    out.write_all(b"\n").map_err(output_error)
}

fn stream_rows<W: Write>(
    reader: &Reader,
    out: &mut W,
    records: bool,
    limit: Option<usize>,
) -> Result<usize, Error> {
    let limit = limit.unwrap_or(usize::MAX);
    let mut count = 0;
    if records {
        for record in reader.records().take(limit) {
            emit_line(out, &json!(record?))?;
            count += 1;
        }
    } else {
        for row in reader.rows().take(limit) {
            emit_line(out, &json!(row?))?;
            count += 1;
        }
    }
    out.flush().map_err(output_error)?;
    Ok(count)
}

/// Text form of one JSON cell; `null` is the empty value.
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn parse_input_line(line: &str, index: u64, records: bool) -> Result<InputRow, Error> {
    let value: Value = serde_json::from_str(line).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid json on stdin")
            .with_row(index)
            .with_source(err)
    })?;
    match (value, records) {
        (Value::Array(items), false) => Ok(InputRow::Row(items.iter().map(cell_text).collect())),
        (Value::Object(map), true) => Ok(InputRow::Record(
            map.iter().map(|(key, value)| (key.clone(), cell_text(value))).collect(),
        )),
        (_, false) => Err(Error::new(ErrorKind::Usage)
            .with_message("expected a JSON array per line")
            .with_hint("Pass --records to write JSON objects keyed by header.")
            .with_row(index)),
        (_, true) => Err(Error::new(ErrorKind::Usage)
            .with_message("expected a JSON object per line")
            .with_row(index)),
    }
}

#[derive(Debug)]
enum InputRow {
    Row(Row),
    Record(Record),
}

fn write_input<R: BufRead>(input: R, writer: &mut Writer, records: bool) -> Result<u64, Error> {
    let mut written = 0;
    for (index, line) in input.lines().enumerate() {
        let line = line.map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read stdin")
                .with_source(err)
        })?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_input_line(&line, index as u64, records)? {
            InputRow::Row(row) => writer.write_row(row.as_slice())?,
            InputRow::Record(record) => writer.write_record(&record)?,
        };
        written += 1;
    }
    Ok(written)
}

fn copy_table(from: &TableHandle, to: &TableHandle, records: bool) -> Result<u64, Error> {
    let reader = from.open_reader()?;
    let target = if to.headers().is_empty() && !reader.headers().is_empty() {
        open_table(to.spec().clone().with_headers(reader.headers().iter().cloned()))?
    } else {
        to.clone()
    };
    let mut writer = target.open_writer()?;
    let mut copied = 0;
    if records {
        for record in reader.records() {
            writer.write_record(&record?)?;
            copied += 1;
        }
    } else {
        for row in reader.rows() {
            writer.write_row(row?.as_slice())?;
            copied += 1;
        }
    }
    writer.close()?;
    reader.close()?;
    Ok(copied)
}

fn emit_json(value: Value, color_mode: ColorMode) {
    let is_tty = io::stdout().is_terminal();
    let json = if color_mode.pretty_json(is_tty) {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error",
        ErrorKind::Usage => "usage error",
        ErrorKind::InvalidSpec => "invalid table spec",
        ErrorKind::UnknownFormat => "unknown table format",
        ErrorKind::NotFound => "not found",
        ErrorKind::Permission => "permission denied",
        ErrorKind::Unsupported => "operation not supported",
        ErrorKind::SchemaMismatch => "row does not match the table layout",
        ErrorKind::MissingHeaders => "table has no headers",
        ErrorKind::Closed => "session is closed",
        ErrorKind::Busy => "table is busy",
        ErrorKind::Io => "i/o error",
    }
    .to_string()
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
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
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(row) = err.row() {
        inner.insert("row".to_string(), json!(row));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }
    if let Some(row) = err.row() {
        lines.push(format!(
            "{} {row}",
            colorize_label("row:", use_color, AnsiColor::Yellow)
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);
    let Some(usage) = usage else {
        return "Try `anytable --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "anytable") else {
        return "Try `anytable --help`.".to_string();
    };
    let parts: Vec<&str> = tokens
        .iter()
        .skip(pos + 1)
        .take_while(|token| {
            !token.starts_with('-') && !token.starts_with('<') && !token.starts_with('[')
        })
        .copied()
        .collect();
    if parts.is_empty() {
        return "Try `anytable --help`.".to_string();
    }
    format!("Try `anytable {} --help`.", parts.join(" "))
}
