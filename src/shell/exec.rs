//! Pipe Executor
//!
//! Runs a parsed pipeline: stages execute strictly in order, each stage's
//! captured stdout becomes the next stage's stdin, stderr always reaches
//! the terminal, and only the last stage's stdout does — unless an output
//! redirect consumes it. State updates merge cumulatively and are handed
//! back for the PTY to apply after the pipeline returns.

use thiserror::Error;

use super::commands::{
    CancelToken, CommandContext, CommandRegistry, EXIT_INTERRUPT, EXIT_NOT_FOUND,
};
use super::parse::{Pipeline, RedirectKind};
use super::{ShellState, StateUpdates, apply_state_updates};
use crate::path::resolve;
use crate::vfs::{FsError, WriteOptions};
use crate::vfs::mount::MountManager;

/// Failures of the executor itself, as opposed to command exit codes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// The pipeline parsed to zero commands (e.g. a bare redirect)
    #[error("no command to execute")]
    EmptyPipeline,
}

/// Result of running one pipeline
#[derive(Debug, Clone, Default)]
pub struct PipelineOutcome {
    pub exit_code: i32,
    /// Cumulative state changes from all stages
    pub state_updates: StateUpdates,
    /// Output destined for the terminal (last stage, no redirect)
    pub stdout: String,
    /// Stderr from every stage, in order
    pub stderr: String,
}

/// Execute a parsed pipeline against the mounted filesystems.
///
/// Stage exit codes propagate Bash-style with `pipefail` off: the last
/// command's code wins. An unknown command yields 127 for its stage; a
/// cancelled pipeline yields 130.
pub async fn execute_pipeline(
    pipeline: &Pipeline,
    registry: &CommandRegistry,
    mounts: &MountManager,
    state: &ShellState,
    cancel: &CancelToken,
    cols: u16,
    rows: u16,
) -> Result<PipelineOutcome, ExecError> {
    if pipeline.commands.is_empty() {
        return Err(ExecError::EmptyPipeline);
    }

    let mut stderr = String::new();
    let mut current_input: Option<String> = None;

    if let Some(file) = &pipeline.input_redirect {
        let path = resolve(&state.cwd, file);
        match mounts.read_to_string(&path).await {
            Ok(text) => current_input = Some(text),
            Err(e) => {
                stderr.push_str(&format!("{file}: {e}\n"));
                return Ok(PipelineOutcome { exit_code: 1, stderr, ..Default::default() });
            }
        }
    }

    let mut working_state = state.clone();
    let mut merged = StateUpdates::default();
    let mut last_exit = 0;

    for command in &pipeline.commands {
        if cancel.is_cancelled() {
            last_exit = EXIT_INTERRUPT;
            break;
        }

        let Some(handler) = registry.find(&command.command) else {
            stderr.push_str(&format!("{}: command not found\n", command.command));
            last_exit = EXIT_NOT_FOUND;
            current_input = Some(String::new());
            continue;
        };

        let ctx = CommandContext::new(
            mounts,
            &working_state,
            current_input.take(),
            cols,
            rows,
            cancel.clone(),
        )
        .with_registry(registry);

        let result = handler.execute(&command.args, &ctx).await;
        let (stage_out, stage_err) = ctx.into_output();
        stderr.push_str(&stage_err);

        if let Some(updates) = result.state_updates {
            working_state = apply_state_updates(&working_state, &updates);
            merged = merged.merge(updates);
        }
        last_exit = result.exit_code;
        current_input = Some(stage_out);
    }

    if cancel.is_cancelled() {
        last_exit = EXIT_INTERRUPT;
    }

    let final_output = current_input.unwrap_or_default();
    let mut stdout = String::new();

    match &pipeline.output_redirect {
        Some(redirect) if !final_output.is_empty() => {
            let path = resolve(&working_state.cwd, &redirect.file);
            let contents = match redirect.kind {
                RedirectKind::Overwrite => Ok(final_output),
                RedirectKind::Append => match mounts.read_to_string(&path).await {
                    Ok(existing) => Ok(format!("{existing}{final_output}")),
                    Err(FsError::NotFound) => Ok(final_output),
                    Err(e) => Err(e),
                },
            };
            let written = match contents {
                Ok(contents) => {
                    mounts.write_file(&path, contents.as_bytes(), &WriteOptions::default()).await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                stderr.push_str(&format!("{}: {e}\n", redirect.file));
                last_exit = 1;
            }
        }
        Some(_) => {}
        None => stdout = final_output,
    }

    Ok(PipelineOutcome { exit_code: last_exit, state_updates: merged, stdout, stderr })
}
