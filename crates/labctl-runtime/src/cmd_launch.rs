//! `labctl launch` and `labctl resume`: drive one session in the foreground.

use tokio::sync::broadcast::error::RecvError;

use labctl_core::error::ErrorKind;
use labctl_core::machine::{LifecycleEvent, Phase};
use labctl_runtime::activity::{ConsoleSource, forward_activity};
use labctl_runtime::config::LabConfig;
use labctl_runtime::context::build_deps;
use labctl_runtime::lifecycle::SessionLifecycle;
use labctl_runtime::render::render_event;

use crate::cli::FollowOpts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Launch,
    Resume,
}

/// Exit code when the user detaches with Ctrl-C.
const EXIT_DETACHED: i32 = 130;

pub async fn cmd_follow(
    config: LabConfig,
    mode: Mode,
    opts: &FollowOpts,
    json: bool,
) -> anyhow::Result<i32> {
    config.validate()?;
    if config.student_id.trim().is_empty() {
        anyhow::bail!("student id is required (--student-id or LABCTL_STUDENT_ID)");
    }

    let deps = build_deps(&config)?;
    let (handle, mut task) = SessionLifecycle::spawn(config, deps);
    let mut events = handle.subscribe();

    match mode {
        Mode::Launch => {
            handle.launch().await;
        }
        Mode::Resume => match handle.restore().await {
            Some(Phase::Idle) | None => {
                eprintln!("no active session");
                handle.shutdown().await;
                return Ok(1);
            }
            Some(phase) => tracing::info!("resumed session in phase {phase:?}"),
        },
    }

    if !opts.no_input {
        tokio::spawn(forward_activity(
            ConsoleSource::new(tokio::io::stdin()),
            handle.clone(),
        ));
    }

    let mut task_done = false;
    let code = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event, json);
                    match &event {
                        LifecycleEvent::Ready { .. } if opts.open_view => {
                            handle.open_split_view().await;
                        }
                        LifecycleEvent::Terminated { .. } => break 0,
                        LifecycleEvent::Error { kind, .. } if *kind != ErrorKind::TerminateFailed => {
                            break 1;
                        }
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(n)) => tracing::warn!("skipped {n} events"),
                Err(RecvError::Closed) => break 0,
            },
            res = &mut task, if !task_done => {
                task_done = true;
                match res {
                    Ok(()) => break 0,
                    Err(e) => {
                        tracing::error!("lifecycle task failed: {e}");
                        break 1;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("detached; the session stays up until it idles out or expires");
                break EXIT_DETACHED;
            }
        }
    };

    handle.shutdown().await;
    if !task_done {
        let _ = task.await;
    }
    Ok(code)
}

fn print_event(event: &LifecycleEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!("failed to encode event: {e}"),
        }
    } else {
        println!("{}", render_event(event));
    }
}
