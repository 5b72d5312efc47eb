//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use labctl_runtime::config::LabConfig;

#[derive(Parser)]
#[command(name = "labctl", about = "Virtual lab session launcher", version)]
pub struct Cli {
    /// Config file (TOML)
    #[arg(long, short = 'c', global = true, env = "LABCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Split-view state file (default: $XDG_RUNTIME_DIR/labctl/view.json)
    #[arg(long, global = true, env = "LABCTL_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Print events and status as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(flatten)]
    pub connect: ConnectOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Launch a new session and keep it alive (reads commands from stdin)
    Launch(LaunchOpts),
    /// Reattach to the student's existing session
    Resume(FollowOpts),
    /// Show the remote status of a session
    Status { session_id: String },
    /// End a session
    Terminate {
        session_id: String,
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Show the saved split-view state
    View,
}

#[derive(clap::Args, Default)]
pub struct ConnectOpts {
    /// Token endpoint returning {success, token, api_url}
    #[arg(long, global = true, env = "LABCTL_TOKEN_URL")]
    pub token_url: Option<String>,

    /// Pre-issued API token (requires --api-url)
    #[arg(long, global = true, env = "LABCTL_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Orchestrator base URL
    #[arg(long, global = true, env = "LABCTL_API_URL")]
    pub api_url: Option<String>,

    /// Usage endpoint checked before each launch
    #[arg(long, global = true, env = "LABCTL_USAGE_URL")]
    pub usage_url: Option<String>,

    #[arg(long, global = true, env = "LABCTL_STUDENT_ID")]
    pub student_id: Option<String>,

    #[arg(long, global = true)]
    pub student_name: Option<String>,
}

#[derive(clap::Args)]
pub struct LaunchOpts {
    #[command(flatten)]
    pub follow: FollowOpts,

    /// Keep the session until the server confirms expiry
    #[arg(long)]
    pub strict_expiry: bool,

    /// Status poll interval in milliseconds
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,
}

#[derive(clap::Args, Default)]
pub struct FollowOpts {
    /// Persist the split view once the session is ready
    #[arg(long)]
    pub open_view: bool,

    /// Do not read commands from stdin
    #[arg(long)]
    pub no_input: bool,
}

impl Cli {
    /// Fold flags and env overrides into `config`.
    pub fn apply(&self, config: &mut LabConfig) {
        if let Some(path) = &self.state_file {
            config.state_file = Some(path.clone());
        }
        let c = &self.connect;
        if let Some(v) = &c.token_url {
            config.token_url = Some(v.clone());
        }
        if let Some(v) = &c.token {
            config.token = Some(v.clone());
        }
        if let Some(v) = &c.api_url {
            config.api_url = Some(v.clone());
        }
        if let Some(v) = &c.usage_url {
            config.usage_url = Some(v.clone());
        }
        if let Some(v) = &c.student_id {
            config.student_id = v.clone();
        }
        if let Some(v) = &c.student_name {
            config.student_name = Some(v.clone());
        }
        if let Command::Launch(opts) = &self.command {
            if opts.strict_expiry {
                config.strict_expiry = true;
            }
            if let Some(ms) = opts.poll_interval_ms {
                config.poll_interval_ms = ms;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "labctl",
            "--student-id",
            "42",
            "--api-url",
            "http://localhost:9000",
            "--usage-url",
            "http://localhost:9000/usage",
            "launch",
            "--strict-expiry",
            "--poll-interval-ms",
            "500",
        ]);
        let mut config = LabConfig {
            student_id: "from-file".into(),
            ..LabConfig::default()
        };
        cli.apply(&mut config);
        assert_eq!(config.student_id, "42");
        assert_eq!(config.api_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(
            config.usage_url.as_deref(),
            Some("http://localhost:9000/usage")
        );
        assert!(config.strict_expiry);
        assert_eq!(config.poll_interval_ms, 500);
    }

    #[test]
    fn terminate_takes_session_id() {
        let cli = Cli::parse_from(["labctl", "terminate", "s-1", "-y"]);
        match cli.command {
            Command::Terminate { session_id, yes } => {
                assert_eq!(session_id, "s-1");
                assert!(yes);
            }
            _ => panic!("expected terminate"),
        }
    }
}
