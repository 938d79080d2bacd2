//! Filesystem Commands
//!
//! Built-ins that operate on the mounted filesystems: ls, cat, mkdir, rm,
//! cp, mv, touch. Every path argument passes the security gate before any
//! backend access; rejections surface as `Permission denied`.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use super::{Command, CommandContext, CommandResult, EXIT_INTERRUPT, checked_path, report_error};
use crate::clock::format_timestamp;
use crate::path::basename;
use crate::security::validate_path;
use crate::vfs::mount::MountManager;
use crate::vfs::{FileStat, FsError, MkdirOptions, WriteOptions};

const COLOR_DIR: &str = "\x1b[1;34m";
const COLOR_RESET: &str = "\x1b[0m";

fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" { format!("/{name}") } else { format!("{parent}/{name}") }
}

/// Split leading flag arguments (`-abc` with every letter in `allowed`)
/// from the rest. Anything else is treated as an ordinary argument.
fn split_flags<'a>(args: &'a [String], allowed: &str) -> (Vec<char>, Vec<&'a String>) {
    let mut flags = Vec::new();
    let mut rest = Vec::new();
    for arg in args {
        let Some(letters) = arg.strip_prefix('-') else {
            rest.push(arg);
            continue;
        };
        if !letters.is_empty() && letters.chars().all(|c| allowed.contains(c)) {
            flags.extend(letters.chars());
        } else {
            rest.push(arg);
        }
    }
    (flags, rest)
}

// ============================================================================
// Ls Command
// ============================================================================

/// Ls command - list directory contents
pub struct LsCommand;

/// Decode advisory mode bits into `drwxr-xr-x` form
fn mode_string(stat: &FileStat) -> String {
    let mut out = String::with_capacity(10);
    out.push(if stat.is_dir { 'd' } else { '-' });
    for i in (0..9).rev() {
        let set = stat.mode & (1 << i) != 0;
        let symbol = match i % 3 {
            2 => 'r',
            1 => 'w',
            _ => 'x',
        };
        out.push(if set { symbol } else { '-' });
    }
    out
}

fn display_name(name: &str, is_dir: bool) -> String {
    if is_dir { format!("{COLOR_DIR}{name}{COLOR_RESET}") } else { String::from(name) }
}

fn long_line(stat: &FileStat, name: &str) -> String {
    format!(
        "{} {:<8} {} {}\n",
        mode_string(stat),
        stat.size,
        format_timestamp(stat.mtime),
        display_name(name, stat.is_dir)
    )
}

impl LsCommand {
    async fn list_target(
        &self,
        ctx: &CommandContext<'_>,
        arg: &str,
        path: &str,
        all: bool,
        long: bool,
    ) -> i32 {
        let stat = match ctx.mounts.stat(path).await {
            Ok(stat) => stat,
            Err(e) => {
                report_error(ctx, "ls", arg, &e.to_string());
                return 1;
            }
        };

        if stat.is_file {
            if long {
                ctx.stdout(&long_line(&stat, arg));
            } else {
                ctx.stdout(&format!("{arg}\n"));
            }
            return 0;
        }

        let mut entries = match ctx.mounts.readdir_with_types(path).await {
            Ok(entries) => entries,
            Err(e) => {
                report_error(ctx, "ls", arg, &e.to_string());
                return 1;
            }
        };
        if !all {
            entries.retain(|e| !e.name.starts_with('.'));
        }
        // Directories first, then alphabetical.
        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));

        for entry in entries {
            if long {
                match ctx.mounts.stat(&child_path(path, &entry.name)).await {
                    Ok(child) => ctx.stdout(&long_line(&child, &entry.name)),
                    Err(e) => {
                        report_error(ctx, "ls", &entry.name, &e.to_string());
                        return 1;
                    }
                }
            } else {
                ctx.stdout(&format!("{}\n", display_name(&entry.name, entry.is_dir)));
            }
        }
        0
    }
}

#[async_trait(?Send)]
impl Command for LsCommand {
    fn name(&self) -> &'static str {
        "ls"
    }
    fn description(&self) -> &'static str {
        "List directory contents"
    }
    fn usage(&self) -> &'static str {
        "ls [-a] [-l] [path...]"
    }

    async fn execute(&self, args: &[String], ctx: &CommandContext<'_>) -> CommandResult {
        let (flags, targets) = split_flags(args, "al");
        let all = flags.contains(&'a');
        let long = flags.contains(&'l');

        let fallback = String::from(".");
        let targets: Vec<&String> = if targets.is_empty() { vec![&fallback] } else { targets };
        let show_headers = targets.len() > 1;

        let mut exit_code = 0;
        for arg in targets {
            let Some(path) = checked_path(ctx, "ls", arg) else {
                exit_code = 1;
                continue;
            };
            if show_headers {
                ctx.stdout(&format!("{arg}:\n"));
            }
            let code = self.list_target(ctx, arg, &path, all, long).await;
            if code != 0 {
                exit_code = code;
            }
        }
        CommandResult::exit(exit_code)
    }
}

/// Static instance
pub static LS_CMD: LsCommand = LsCommand;

// ============================================================================
// Cat Command
// ============================================================================

/// Cat command - print file contents
pub struct CatCommand;

#[async_trait(?Send)]
impl Command for CatCommand {
    fn name(&self) -> &'static str {
        "cat"
    }
    fn description(&self) -> &'static str {
        "Print file contents"
    }
    fn usage(&self) -> &'static str {
        "cat [file...]"
    }

    async fn execute(&self, args: &[String], ctx: &CommandContext<'_>) -> CommandResult {
        // With no arguments inside a pipe, pass stdin through.
        if args.is_empty() {
            if let Some(stdin) = &ctx.stdin {
                ctx.stdout(stdin);
            }
            return CommandResult::success();
        }

        let mut failed = false;
        for arg in args {
            if ctx.cancel.is_cancelled() {
                return CommandResult::failure(EXIT_INTERRUPT);
            }
            let Some(path) = checked_path(ctx, "cat", arg) else {
                failed = true;
                continue;
            };
            match ctx.mounts.stat(&path).await {
                Ok(stat) if stat.is_dir => {
                    report_error(ctx, "cat", arg, "Is a directory");
                    failed = true;
                }
                Ok(_) => match ctx.mounts.read_file(&path).await {
                    Ok(bytes) => {
                        let text = String::from_utf8_lossy(&bytes);
                        ctx.stdout(&text);
                        if !text.is_empty() && !text.ends_with('\n') {
                            ctx.stdout("\n");
                        }
                    }
                    Err(e) => {
                        report_error(ctx, "cat", arg, &e.to_string());
                        failed = true;
                    }
                },
                Err(e) => {
                    report_error(ctx, "cat", arg, &e.to_string());
                    failed = true;
                }
            }
        }
        if failed { CommandResult::failure(1) } else { CommandResult::success() }
    }
}

/// Static instance
pub static CAT_CMD: CatCommand = CatCommand;

// ============================================================================
// Mkdir Command
// ============================================================================

/// Mkdir command - create directories
pub struct MkdirCommand;

#[async_trait(?Send)]
impl Command for MkdirCommand {
    fn name(&self) -> &'static str {
        "mkdir"
    }
    fn description(&self) -> &'static str {
        "Create directories"
    }
    fn usage(&self) -> &'static str {
        "mkdir [-p] <dir...>"
    }

    async fn execute(&self, args: &[String], ctx: &CommandContext<'_>) -> CommandResult {
        let (flags, dirs) = split_flags(args, "p");
        let recursive = flags.contains(&'p');
        if dirs.is_empty() {
            ctx.stderr("mkdir: missing operand\n");
            return CommandResult::failure(1);
        }

        let mut exit_code = 0;
        for arg in dirs {
            let Some(path) = checked_path(ctx, "mkdir", arg) else {
                exit_code = 1;
                continue;
            };
            if !recursive && ctx.mounts.exists(&path).await.unwrap_or(false) {
                report_error(ctx, "mkdir", arg, "File exists");
                exit_code = 1;
                continue;
            }
            let opts = MkdirOptions { recursive, ..Default::default() };
            if let Err(e) = ctx.mounts.mkdir(&path, &opts).await {
                report_error(ctx, "mkdir", arg, &e.to_string());
                exit_code = 1;
            }
        }
        CommandResult::exit(exit_code)
    }
}

/// Static instance
pub static MKDIR_CMD: MkdirCommand = MkdirCommand;

// ============================================================================
// Rm Command
// ============================================================================

/// Rm command - remove files and directories
pub struct RmCommand;

#[async_trait(?Send)]
impl Command for RmCommand {
    fn name(&self) -> &'static str {
        "rm"
    }
    fn description(&self) -> &'static str {
        "Remove files and directories"
    }
    fn usage(&self) -> &'static str {
        "rm [-rf] <path...>"
    }

    async fn execute(&self, args: &[String], ctx: &CommandContext<'_>) -> CommandResult {
        let (flags, paths) = split_flags(args, "rRf");
        let recursive = flags.contains(&'r') || flags.contains(&'R');
        let force = flags.contains(&'f');
        if paths.is_empty() {
            if force {
                return CommandResult::success();
            }
            ctx.stderr("rm: missing operand\n");
            return CommandResult::failure(1);
        }

        let mut exit_code = 0;
        for arg in paths {
            if ctx.cancel.is_cancelled() {
                return CommandResult::failure(EXIT_INTERRUPT);
            }
            if validate_path(arg, "/").is_err() {
                if !force {
                    report_error(ctx, "rm", arg, "Permission denied");
                    exit_code = 1;
                }
                continue;
            }
            let path = crate::path::resolve(&ctx.state.cwd, arg);

            let stat = match ctx.mounts.stat(&path).await {
                Ok(stat) => stat,
                Err(e) => {
                    if !force {
                        report_error(ctx, "rm", arg, &e.to_string());
                        exit_code = 1;
                    }
                    continue;
                }
            };

            let result = if stat.is_dir {
                if !recursive {
                    report_error(ctx, "rm", arg, "Is a directory");
                    exit_code = 1;
                    continue;
                }
                ctx.mounts.rmdir(&path, true).await
            } else {
                ctx.mounts.unlink(&path).await
            };
            if let Err(e) = result {
                if !force {
                    report_error(ctx, "rm", arg, &e.to_string());
                    exit_code = 1;
                }
            }
        }
        CommandResult::exit(exit_code)
    }
}

/// Static instance
pub static RM_CMD: RmCommand = RmCommand;

// ============================================================================
// Cp Command
// ============================================================================

/// Cp command - copy files and directories
pub struct CpCommand;

/// Recursively copy a directory through the mount manager, so the copy
/// works across mounts as well as within one.
fn copy_dir_recursive<'a>(
    mounts: &'a MountManager,
    src: &'a str,
    dest: &'a str,
) -> Pin<Box<dyn Future<Output = Result<(), FsError>> + 'a>> {
    Box::pin(async move {
        mounts.mkdir(dest, &MkdirOptions { recursive: true, ..Default::default() }).await?;
        for entry in mounts.readdir_with_types(src).await? {
            let src_child = child_path(src, &entry.name);
            let dest_child = child_path(dest, &entry.name);
            if entry.is_dir {
                copy_dir_recursive(mounts, &src_child, &dest_child).await?;
            } else {
                mounts.copy_file(&src_child, &dest_child).await?;
            }
        }
        Ok(())
    })
}

/// Resolve the final target: copying into an existing directory appends the
/// source's basename.
async fn destination_for(mounts: &MountManager, src: &str, dest: &str) -> String {
    match mounts.stat(dest).await {
        Ok(stat) if stat.is_dir => child_path(dest, &basename(src)),
        _ => String::from(dest),
    }
}

#[async_trait(?Send)]
impl Command for CpCommand {
    fn name(&self) -> &'static str {
        "cp"
    }
    fn description(&self) -> &'static str {
        "Copy files and directories"
    }
    fn usage(&self) -> &'static str {
        "cp [-r] <source...> <dest>"
    }

    async fn execute(&self, args: &[String], ctx: &CommandContext<'_>) -> CommandResult {
        let (flags, paths) = split_flags(args, "rR");
        let recursive = flags.contains(&'r') || flags.contains(&'R');
        if paths.len() < 2 {
            ctx.stderr("cp: missing file operand\n");
            return CommandResult::failure(1);
        }

        let (dest_arg, sources) = match paths.split_last() {
            Some((dest, sources)) => (*dest, sources),
            None => return CommandResult::failure(1),
        };
        let Some(dest) = checked_path(ctx, "cp", dest_arg) else {
            return CommandResult::failure(1);
        };

        if sources.len() > 1 && !ctx.mounts.stat(&dest).await.map(|s| s.is_dir).unwrap_or(false) {
            ctx.stderr(&format!("cp: target '{dest_arg}' is not a directory\n"));
            return CommandResult::failure(1);
        }

        let mut exit_code = 0;
        for arg in sources {
            if ctx.cancel.is_cancelled() {
                return CommandResult::failure(EXIT_INTERRUPT);
            }
            let Some(src) = checked_path(ctx, "cp", arg) else {
                exit_code = 1;
                continue;
            };
            let stat = match ctx.mounts.stat(&src).await {
                Ok(stat) => stat,
                Err(e) => {
                    report_error(ctx, "cp", arg, &e.to_string());
                    exit_code = 1;
                    continue;
                }
            };

            let target = destination_for(ctx.mounts, &src, &dest).await;
            let result = if stat.is_dir {
                if !recursive {
                    ctx.stderr(&format!("cp: -r not specified; omitting directory '{arg}'\n"));
                    exit_code = 1;
                    continue;
                }
                copy_dir_recursive(ctx.mounts, &src, &target).await
            } else {
                ctx.mounts.copy_file(&src, &target).await
            };
            if let Err(e) = result {
                report_error(ctx, "cp", arg, &e.to_string());
                exit_code = 1;
            }
        }
        CommandResult::exit(exit_code)
    }
}

/// Static instance
pub static CP_CMD: CpCommand = CpCommand;

// ============================================================================
// Mv Command
// ============================================================================

/// Mv command - move or rename files and directories
pub struct MvCommand;

#[async_trait(?Send)]
impl Command for MvCommand {
    fn name(&self) -> &'static str {
        "mv"
    }
    fn description(&self) -> &'static str {
        "Move or rename files and directories"
    }
    fn usage(&self) -> &'static str {
        "mv <source...> <dest>"
    }

    async fn execute(&self, args: &[String], ctx: &CommandContext<'_>) -> CommandResult {
        if args.len() < 2 {
            ctx.stderr("mv: missing file operand\n");
            return CommandResult::failure(1);
        }
        let (dest_arg, sources) = match args.split_last() {
            Some((dest, sources)) => (dest, sources),
            None => return CommandResult::failure(1),
        };
        let Some(dest) = checked_path(ctx, "mv", dest_arg) else {
            return CommandResult::failure(1);
        };

        if sources.len() > 1 && !ctx.mounts.stat(&dest).await.map(|s| s.is_dir).unwrap_or(false) {
            ctx.stderr(&format!("mv: target '{dest_arg}' is not a directory\n"));
            return CommandResult::failure(1);
        }

        let mut exit_code = 0;
        for arg in sources {
            if ctx.cancel.is_cancelled() {
                return CommandResult::failure(EXIT_INTERRUPT);
            }
            let Some(src) = checked_path(ctx, "mv", arg) else {
                exit_code = 1;
                continue;
            };
            let target = destination_for(ctx.mounts, &src, &dest).await;
            if let Err(e) = ctx.mounts.rename(&src, &target).await {
                report_error(ctx, "mv", arg, &e.to_string());
                exit_code = 1;
            }
        }
        CommandResult::exit(exit_code)
    }
}

/// Static instance
pub static MV_CMD: MvCommand = MvCommand;

// ============================================================================
// Touch Command
// ============================================================================

/// Touch command - create files or refresh their timestamps
pub struct TouchCommand;

#[async_trait(?Send)]
impl Command for TouchCommand {
    fn name(&self) -> &'static str {
        "touch"
    }
    fn description(&self) -> &'static str {
        "Create empty files or refresh timestamps"
    }
    fn usage(&self) -> &'static str {
        "touch <file...>"
    }

    async fn execute(&self, args: &[String], ctx: &CommandContext<'_>) -> CommandResult {
        if args.is_empty() {
            ctx.stderr("touch: missing file operand\n");
            return CommandResult::failure(1);
        }

        let mut exit_code = 0;
        for arg in args {
            let Some(path) = checked_path(ctx, "touch", arg) else {
                exit_code = 1;
                continue;
            };
            let result = match ctx.mounts.stat(&path).await {
                Ok(stat) if stat.is_dir => Ok(()),
                Ok(stat) => {
                    // Read-then-write round-trip refreshes mtime/atime while
                    // keeping contents and creation times.
                    match ctx.mounts.read_file(&path).await {
                        Ok(data) => {
                            let opts = WriteOptions { create_parents: false, mode: Some(stat.mode) };
                            ctx.mounts.write_file(&path, &data, &opts).await
                        }
                        Err(e) => Err(e),
                    }
                }
                Err(FsError::NotFound) => {
                    ctx.mounts.write_file(&path, b"", &WriteOptions::default()).await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                report_error(ctx, "touch", arg, &e.to_string());
                exit_code = 1;
            }
        }
        CommandResult::exit(exit_code)
    }
}

/// Static instance
pub static TOUCH_CMD: TouchCommand = TouchCommand;

// ============================================================================
// Find Command
// ============================================================================

/// Find command - list files and directories recursively
pub struct FindCommand;

#[async_trait(?Send)]
impl Command for FindCommand {
    fn name(&self) -> &'static str {
        "find"
    }
    fn description(&self) -> &'static str {
        "List files and directories recursively"
    }
    fn usage(&self) -> &'static str {
        "find [path]"
    }

    async fn execute(&self, args: &[String], ctx: &CommandContext<'_>) -> CommandResult {
        let arg = args.first().map(|s| s.as_str()).unwrap_or(".");
        let Some(path) = checked_path(ctx, "find", arg) else {
            return CommandResult::failure(1);
        };

        let mut iter = match ctx.mounts.walk(&path).await {
            Ok(iter) => iter,
            Err(e) => {
                report_error(ctx, "find", arg, &e.to_string());
                return CommandResult::failure(1);
            }
        };

        ctx.stdout(&format!("{path}\n"));
        while let Some(item) = iter.next().await {
            if ctx.cancel.is_cancelled() {
                return CommandResult::failure(EXIT_INTERRUPT);
            }
            match item {
                Ok(entry) => ctx.stdout(&format!("{}\n", entry.path)),
                Err(e) => {
                    report_error(ctx, "find", arg, &e.to_string());
                    return CommandResult::failure(1);
                }
            }
        }
        CommandResult::success()
    }
}

/// Static instance
pub static FIND_CMD: FindCommand = FindCommand;

// ============================================================================
// Mount Command
// ============================================================================

/// Mount command - show mounted filesystems
pub struct MountCommand;

#[async_trait(?Send)]
impl Command for MountCommand {
    fn name(&self) -> &'static str {
        "mount"
    }
    fn description(&self) -> &'static str {
        "Show mounted filesystems"
    }

    async fn execute(&self, _args: &[String], ctx: &CommandContext<'_>) -> CommandResult {
        for info in ctx.mounts.mounts() {
            let ro = if info.readonly { " (ro)" } else { "" };
            ctx.stdout(&format!(
                "{} on {} type {}{ro}\n",
                info.backend_name, info.path, info.backend_name
            ));
        }
        CommandResult::success()
    }
}

/// Static instance
pub static MOUNT_CMD: MountCommand = MountCommand;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::commands::CancelToken;
    use crate::shell::{ShellState, StateOverrides, create_shell_state};
    use crate::vfs::memory::MemoryBackend;
    use futures::executor::block_on;

    fn fixture() -> (MountManager, ShellState) {
        let mounts = MountManager::new();
        block_on(mounts.mount("/", Box::new(MemoryBackend::new()), false)).unwrap();
        let opts = MkdirOptions { recursive: true, ..Default::default() };
        block_on(mounts.mkdir("/home", &opts)).unwrap();
        (mounts, create_shell_state(StateOverrides::default()))
    }

    fn ctx<'a>(mounts: &'a MountManager, state: &'a ShellState) -> CommandContext<'a> {
        CommandContext::new(mounts, state, None, 80, 24, CancelToken::new())
    }

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| String::from(*s)).collect()
    }

    #[test]
    fn test_mode_string() {
        let mut stat = FileStat::new_file(0, 0o644, 0);
        assert_eq!(mode_string(&stat), "-rw-r--r--");
        stat.mode = 0o755;
        assert_eq!(mode_string(&stat), "-rwxr-xr-x");
        let dir = FileStat::new_dir(0o777, 0);
        assert_eq!(mode_string(&dir), "drwxrwxrwx");
    }

    #[test]
    fn test_ls_sorts_dirs_first_hides_dotfiles() {
        let (mounts, state) = fixture();
        block_on(async {
            let w = WriteOptions { create_parents: true, ..Default::default() };
            mounts.write_file("/home/b.txt", b"1", &w).await.unwrap();
            mounts.write_file("/home/.hidden", b"1", &w).await.unwrap();
            mounts.mkdir("/home/adir", &MkdirOptions::default()).await.unwrap();

            let context = ctx(&mounts, &state);
            let result = LS_CMD.execute(&[], &context).await;
            assert_eq!(result.exit_code, 0);
            let (out, _) = context.into_output();
            let lines: Vec<&str> = out.lines().collect();
            assert_eq!(lines.len(), 2);
            assert!(lines[0].contains("adir"));
            assert!(lines[1].contains("b.txt"));

            // -a reveals the dotfile.
            let context = ctx(&mounts, &state);
            LS_CMD.execute(&strings(&["-a"]), &context).await;
            let (out, _) = context.into_output();
            assert!(out.contains(".hidden"));
        });
    }

    #[test]
    fn test_ls_long_format() {
        let (mounts, state) = fixture();
        block_on(async {
            mounts
                .write_file("/home/f.txt", b"12345", &WriteOptions::default())
                .await
                .unwrap();
            let context = ctx(&mounts, &state);
            LS_CMD.execute(&strings(&["-l"]), &context).await;
            let (out, _) = context.into_output();
            assert!(out.starts_with("-rw-r--r-- 5        "), "got {out:?}");
        });
    }

    #[test]
    fn test_ls_combined_flags_and_headers() {
        let (mounts, state) = fixture();
        block_on(async {
            let w = WriteOptions { create_parents: true, ..Default::default() };
            mounts.write_file("/a/x", b"1", &w).await.unwrap();
            mounts.write_file("/b/y", b"1", &w).await.unwrap();

            let context = ctx(&mounts, &state);
            let result = LS_CMD.execute(&strings(&["-la", "/a", "/b"]), &context).await;
            assert_eq!(result.exit_code, 0);
            let (out, _) = context.into_output();
            assert!(out.contains("/a:\n"));
            assert!(out.contains("/b:\n"));
        });
    }

    #[test]
    fn test_ls_security_rejection() {
        let (mounts, state) = fixture();
        block_on(async {
            let context = ctx(&mounts, &state);
            let result = LS_CMD.execute(&strings(&["../../etc"]), &context).await;
            assert_eq!(result.exit_code, 1);
            let (_, err) = context.into_output();
            assert_eq!(err, "ls: ../../etc: Permission denied\n");
        });
    }

    #[test]
    fn test_cat_appends_missing_newline() {
        let (mounts, state) = fixture();
        block_on(async {
            mounts
                .write_file("/home/n.txt", b"no newline", &WriteOptions::default())
                .await
                .unwrap();
            let context = ctx(&mounts, &state);
            let result = CAT_CMD.execute(&strings(&["n.txt"]), &context).await;
            assert_eq!(result.exit_code, 0);
            let (out, _) = context.into_output();
            assert_eq!(out, "no newline\n");
        });
    }

    #[test]
    fn test_cat_rejects_directory_but_continues() {
        let (mounts, state) = fixture();
        block_on(async {
            mounts.mkdir("/home/d", &MkdirOptions::default()).await.unwrap();
            mounts
                .write_file("/home/ok.txt", b"fine\n", &WriteOptions::default())
                .await
                .unwrap();
            let context = ctx(&mounts, &state);
            let result = CAT_CMD.execute(&strings(&["d", "ok.txt"]), &context).await;
            assert_eq!(result.exit_code, 1);
            let (out, err) = context.into_output();
            assert_eq!(out, "fine\n");
            assert_eq!(err, "cat: d: Is a directory\n");
        });
    }

    #[test]
    fn test_cat_stdin_passthrough() {
        let (mounts, state) = fixture();
        block_on(async {
            let context =
                CommandContext::new(&mounts, &state, Some(String::from("piped")), 80, 24, CancelToken::new());
            CAT_CMD.execute(&[], &context).await;
            let (out, _) = context.into_output();
            assert_eq!(out, "piped");
        });
    }

    #[test]
    fn test_mkdir_plain_and_existing() {
        let (mounts, state) = fixture();
        block_on(async {
            let context = ctx(&mounts, &state);
            let result = MKDIR_CMD.execute(&strings(&["newdir"]), &context).await;
            assert_eq!(result.exit_code, 0);
            assert!(mounts.stat("/home/newdir").await.unwrap().is_dir);

            let context = ctx(&mounts, &state);
            let result = MKDIR_CMD.execute(&strings(&["newdir"]), &context).await;
            assert_eq!(result.exit_code, 1);
            let (_, err) = context.into_output();
            assert_eq!(err, "mkdir: newdir: File exists\n");
        });
    }

    #[test]
    fn test_mkdir_p_creates_chain() {
        let (mounts, state) = fixture();
        block_on(async {
            let context = ctx(&mounts, &state);
            let result = MKDIR_CMD.execute(&strings(&["-p", "/deep/a/b"]), &context).await;
            assert_eq!(result.exit_code, 0);
            assert!(mounts.stat("/deep/a/b").await.unwrap().is_dir);

            // Missing parent without -p fails.
            let context = ctx(&mounts, &state);
            let result = MKDIR_CMD.execute(&strings(&["/nope/child"]), &context).await;
            assert_eq!(result.exit_code, 1);
        });
    }

    #[test]
    fn test_rm_file_and_flags() {
        let (mounts, state) = fixture();
        block_on(async {
            let w = WriteOptions { create_parents: true, ..Default::default() };
            mounts.write_file("/home/f", b"x", &w).await.unwrap();
            mounts.write_file("/home/d/inner", b"x", &w).await.unwrap();

            let context = ctx(&mounts, &state);
            assert_eq!(RM_CMD.execute(&strings(&["f"]), &context).await.exit_code, 0);
            assert!(!mounts.exists("/home/f").await.unwrap());

            // Directory without -r fails.
            let context = ctx(&mounts, &state);
            let result = RM_CMD.execute(&strings(&["d"]), &context).await;
            assert_eq!(result.exit_code, 1);
            let (_, err) = context.into_output();
            assert_eq!(err, "rm: d: Is a directory\n");

            // -r removes it.
            let context = ctx(&mounts, &state);
            assert_eq!(RM_CMD.execute(&strings(&["-r", "d"]), &context).await.exit_code, 0);
            assert!(!mounts.exists("/home/d").await.unwrap());
        });
    }

    #[test]
    fn test_rm_force_suppresses_missing() {
        let (mounts, state) = fixture();
        block_on(async {
            let context = ctx(&mounts, &state);
            let result = RM_CMD.execute(&strings(&["-f", "ghost"]), &context).await;
            assert_eq!(result.exit_code, 0);
            let (_, err) = context.into_output();
            assert!(err.is_empty());

            let context = ctx(&mounts, &state);
            let result = RM_CMD.execute(&strings(&["ghost"]), &context).await;
            assert_eq!(result.exit_code, 1);
        });
    }

    #[test]
    fn test_cp_file_and_into_directory() {
        let (mounts, state) = fixture();
        block_on(async {
            mounts.write_file("/home/a.txt", b"data", &WriteOptions::default()).await.unwrap();
            mounts.mkdir("/home/dir", &MkdirOptions::default()).await.unwrap();

            let context = ctx(&mounts, &state);
            assert_eq!(CP_CMD.execute(&strings(&["a.txt", "b.txt"]), &context).await.exit_code, 0);
            assert_eq!(mounts.read_file("/home/b.txt").await.unwrap(), b"data");

            let context = ctx(&mounts, &state);
            assert_eq!(CP_CMD.execute(&strings(&["a.txt", "dir"]), &context).await.exit_code, 0);
            assert_eq!(mounts.read_file("/home/dir/a.txt").await.unwrap(), b"data");
        });
    }

    #[test]
    fn test_cp_directory_requires_r() {
        let (mounts, state) = fixture();
        block_on(async {
            let w = WriteOptions { create_parents: true, ..Default::default() };
            mounts.write_file("/home/tree/deep/f", b"x", &w).await.unwrap();

            let context = ctx(&mounts, &state);
            let result = CP_CMD.execute(&strings(&["tree", "copy"]), &context).await;
            assert_eq!(result.exit_code, 1);
            let (_, err) = context.into_output();
            assert_eq!(err, "cp: -r not specified; omitting directory 'tree'\n");

            let context = ctx(&mounts, &state);
            assert_eq!(CP_CMD.execute(&strings(&["-r", "tree", "copy"]), &context).await.exit_code, 0);
            assert_eq!(mounts.read_file("/home/copy/deep/f").await.unwrap(), b"x");
        });
    }

    #[test]
    fn test_cp_multiple_sources_need_dir_target() {
        let (mounts, state) = fixture();
        block_on(async {
            let w = WriteOptions::default();
            mounts.write_file("/home/1", b"1", &w).await.unwrap();
            mounts.write_file("/home/2", b"2", &w).await.unwrap();

            let context = ctx(&mounts, &state);
            let result = CP_CMD.execute(&strings(&["1", "2", "nope"]), &context).await;
            assert_eq!(result.exit_code, 1);
            let (_, err) = context.into_output();
            assert_eq!(err, "cp: target 'nope' is not a directory\n");

            mounts.mkdir("/home/into", &MkdirOptions::default()).await.unwrap();
            let context = ctx(&mounts, &state);
            assert_eq!(CP_CMD.execute(&strings(&["1", "2", "into"]), &context).await.exit_code, 0);
            assert_eq!(mounts.read_file("/home/into/1").await.unwrap(), b"1");
            assert_eq!(mounts.read_file("/home/into/2").await.unwrap(), b"2");
        });
    }

    #[test]
    fn test_mv_renames() {
        let (mounts, state) = fixture();
        block_on(async {
            mounts.write_file("/home/old", b"x", &WriteOptions::default()).await.unwrap();
            let context = ctx(&mounts, &state);
            assert_eq!(MV_CMD.execute(&strings(&["old", "new"]), &context).await.exit_code, 0);
            assert!(!mounts.exists("/home/old").await.unwrap());
            assert_eq!(mounts.read_file("/home/new").await.unwrap(), b"x");
        });
    }

    #[test]
    fn test_mv_into_directory() {
        let (mounts, state) = fixture();
        block_on(async {
            mounts.write_file("/home/f", b"x", &WriteOptions::default()).await.unwrap();
            mounts.mkdir("/home/d", &MkdirOptions::default()).await.unwrap();
            let context = ctx(&mounts, &state);
            assert_eq!(MV_CMD.execute(&strings(&["f", "d"]), &context).await.exit_code, 0);
            assert_eq!(mounts.read_file("/home/d/f").await.unwrap(), b"x");
        });
    }

    #[test]
    fn test_touch_creates_and_refreshes() {
        let (mounts, state) = fixture();
        block_on(async {
            let context = ctx(&mounts, &state);
            assert_eq!(TOUCH_CMD.execute(&strings(&["fresh"]), &context).await.exit_code, 0);
            let stat = mounts.stat("/home/fresh").await.unwrap();
            assert!(stat.is_file);
            assert_eq!(stat.size, 0);

            mounts.write_file("/home/fresh", b"keep", &WriteOptions::default()).await.unwrap();
            let context = ctx(&mounts, &state);
            assert_eq!(TOUCH_CMD.execute(&strings(&["fresh"]), &context).await.exit_code, 0);
            // Contents survive the timestamp round-trip.
            assert_eq!(mounts.read_file("/home/fresh").await.unwrap(), b"keep");
        });
    }

    #[test]
    fn test_find_lists_recursively() {
        let (mounts, state) = fixture();
        block_on(async {
            let w = WriteOptions { create_parents: true, ..Default::default() };
            mounts.write_file("/home/a/one.txt", b"1", &w).await.unwrap();
            mounts.write_file("/home/two.txt", b"2", &w).await.unwrap();

            let context = ctx(&mounts, &state);
            let result = FIND_CMD.execute(&strings(&["."]), &context).await;
            assert_eq!(result.exit_code, 0);
            let (out, _) = context.into_output();
            assert_eq!(out, "/home\n/home/a\n/home/a/one.txt\n/home/two.txt\n");
        });
    }

    #[test]
    fn test_mount_lists_mounts() {
        let (mounts, state) = fixture();
        block_on(async {
            mounts
                .mount("/ro", Box::new(MemoryBackend::new()), true)
                .await
                .unwrap();
            let context = ctx(&mounts, &state);
            MOUNT_CMD.execute(&[], &context).await;
            let (out, _) = context.into_output();
            assert!(out.contains("memfs on / type memfs\n"));
            assert!(out.contains("memfs on /ro type memfs (ro)\n"));
        });
    }

    #[test]
    fn test_touch_missing_parent_fails() {
        let (mounts, state) = fixture();
        block_on(async {
            let context = ctx(&mounts, &state);
            let result = TOUCH_CMD.execute(&strings(&["/no/such/dir/f"]), &context).await;
            assert_eq!(result.exit_code, 1);
            let (_, err) = context.into_output();
            assert_eq!(err, "touch: /no/such/dir/f: No such file or directory\n");
        });
    }
}
