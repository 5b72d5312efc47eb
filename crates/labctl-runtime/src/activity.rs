//! Activity and user input from the terminal.
//!
//! In a terminal there are no pointer or scroll events; every line typed on
//! stdin counts as key activity, and a few words map to lifecycle commands.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};

use labctl_core::types::ActivityKind;

use crate::lifecycle::LifecycleHandle;

/// Meaning of one console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleInput {
    /// Plain activity, no command.
    Activity(ActivityKind),
    KeepActive,
    FocusMode,
    OpenView,
    CloseView,
    End,
    Status,
    Quit,
}

pub fn parse_console_line(line: &str) -> ConsoleInput {
    match line.trim().to_ascii_lowercase().as_str() {
        "active" | "a" => ConsoleInput::KeepActive,
        "focus" | "f" => ConsoleInput::FocusMode,
        "view" | "open" => ConsoleInput::OpenView,
        "close" => ConsoleInput::CloseView,
        "end" | "terminate" => ConsoleInput::End,
        "status" | "s" => ConsoleInput::Status,
        "quit" | "q" | "exit" => ConsoleInput::Quit,
        "hide" => ConsoleInput::Activity(ActivityKind::VisibilityLost),
        "show" => ConsoleInput::Activity(ActivityKind::VisibilityRegained),
        _ => ConsoleInput::Activity(ActivityKind::KeyDown),
    }
}

/// Where user input comes from. The lifecycle never reads input itself.
#[async_trait]
pub trait ActivitySource: Send {
    /// Next input; `None` once the source is exhausted.
    async fn next_input(&mut self) -> Option<ConsoleInput>;
}

/// Line-oriented source over any async reader (stdin in the CLI).
pub struct ConsoleSource<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> ConsoleSource<R> {
    pub fn new(input: R) -> Self {
        Self {
            lines: BufReader::new(input).lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ActivitySource for ConsoleSource<R> {
    async fn next_input(&mut self) -> Option<ConsoleInput> {
        match self.lines.next_line().await {
            Ok(Some(line)) => Some(parse_console_line(&line)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("console read failed: {e}");
                None
            }
        }
    }
}

/// Forward inputs from `source` to the lifecycle until it ends or `quit`.
///
/// Every command except visibility changes is also recorded as key activity.
pub async fn forward_activity<S: ActivitySource>(mut source: S, handle: LifecycleHandle) {
    while let Some(input) = source.next_input().await {
        if !matches!(input, ConsoleInput::Activity(_)) {
            let _ = handle.activity(ActivityKind::KeyDown).await;
        }
        let sent = match input {
            ConsoleInput::Activity(kind) => handle.activity(kind).await,
            ConsoleInput::KeepActive => handle.keep_active().await,
            ConsoleInput::FocusMode => handle.enable_focus_mode().await,
            ConsoleInput::OpenView => handle.open_split_view().await,
            ConsoleInput::CloseView => handle.close_split_view().await,
            ConsoleInput::End => handle.terminate().await,
            ConsoleInput::Status => match handle.status().await {
                Some(report) => {
                    eprintln!("{}", crate::render::render_status(&report));
                    true
                }
                None => false,
            },
            ConsoleInput::Quit => {
                handle.shutdown().await;
                break;
            }
        };
        if !sent {
            break;
        }
    }
}
