//! labctl: launch, follow, and end virtual lab sessions from a terminal.

use clap::Parser;

use labctl_runtime::config::LabConfig;

mod cli;
mod cmd_launch;
mod cmd_status;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("LABCTL_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let mut config = LabConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    let exit_code = match &args.command {
        cli::Command::Launch(opts) => {
            cmd_launch::cmd_follow(config, cmd_launch::Mode::Launch, &opts.follow, args.json)
                .await?
        }
        cli::Command::Resume(opts) => {
            cmd_launch::cmd_follow(config, cmd_launch::Mode::Resume, opts, args.json).await?
        }
        cli::Command::Status { session_id } => {
            cmd_status::cmd_status(&config, session_id, args.json).await?;
            0
        }
        cli::Command::Terminate { session_id, yes } => {
            cmd_status::cmd_terminate(&config, session_id, *yes).await?
        }
        cli::Command::View => {
            cmd_status::cmd_view(&config, args.json)?;
            0
        }
    };

    // Exit explicitly: a pending blocking stdin read would otherwise hold
    // the runtime open.
    std::process::exit(exit_code)
}
