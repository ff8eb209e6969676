//! Purpose: Hold top-level CLI command dispatch for `anytable`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every session opened here is closed explicitly before returning.
//! Invariants: Helpers in `main.rs` remain the source of command business logic.

use super::*;

pub(super) fn dispatch_command(command: Command, color_mode: ColorMode) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "anytable", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Formats => {
            emit_json(json!({ "formats": registered_kinds()? }), color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Spec { spec } => {
            let table = open_spec(&spec)?;
            emit_json(table.spec().to_json(), color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Headers { spec } => {
            let table = open_spec(&spec)?;
            emit_json(json!(effective_headers(&table)?), color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Cat {
            spec,
            records,
            limit,
        } => {
            let table = open_spec(&spec)?;
            let reader = table.open_reader()?;
            let stdout = io::stdout();
            let mut out = io::BufWriter::new(stdout.lock());
            let streamed = stream_rows(&reader, &mut out, records, limit);
            let closed = reader.close();
            let count = streamed?;
            closed?;
            tracing::debug!(rows = count, "cat finished");
            Ok(RunOutcome::ok())
        }
        Command::Write { spec, records } => {
            let table = open_spec(&spec)?;
            let mut writer = table.open_writer()?;
            let written = write_input(io::stdin().lock(), &mut writer, records);
            let closed = writer.close();
            let written = written?;
            closed?;
            emit_json(
                json!({ "written": written, "location": table.spec().location() }),
                color_mode,
            );
            Ok(RunOutcome::ok())
        }
        Command::Copy { from, to, records } => {
            let source = open_spec(&from)?;
            let target = open_spec(&to)?;
            let copied = copy_table(&source, &target, records)?;
            emit_json(
                json!({
                    "copied": copied,
                    "from": source.spec().location(),
                    "to": target.spec().location(),
                }),
                color_mode,
            );
            Ok(RunOutcome::ok())
        }
        Command::Delete { spec } => {
            let table = open_spec(&spec)?;
            table.delete()?;
            emit_json(json!({ "deleted": table.spec().location() }), color_mode);
            Ok(RunOutcome::ok())
        }
    }
}
