//! Command line arguments.

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pulseboard")]
#[command(about = "Follow Pulseboard dashboard events from the terminal", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Sign in and log realtime events until interrupted
    Watch(WatchArgs),
}

#[derive(Args, Clone)]
pub struct WatchArgs {
    /// Bearer token issued by the dashboard backend
    #[arg(short, long, env = "PULSEBOARD_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Id of the signed-in user, for per-user channels
    #[arg(short, long)]
    pub user: Option<String>,

    /// Broadcast notifications (default when nothing else is selected)
    #[arg(long)]
    pub notifications: bool,

    /// Transaction status changes of `--user`
    #[arg(long, requires = "user")]
    pub transactions: bool,

    /// Table reloads for a resource, e.g. `users` (repeatable)
    #[arg(long = "reload", value_name = "RESOURCE", action = clap::ArgAction::Append)]
    pub reloads: Vec<String>,

    /// Updates to one record, e.g. `tiktok-accounts:17` (repeatable)
    #[arg(long = "account", value_name = "RESOURCE:ID", value_parser = parse_account, action = clap::ArgAction::Append)]
    pub accounts: Vec<(String, String)>,

    /// Backend base URL; when set the token is checked against it first
    #[arg(long, env = "PULSEBOARD_API_URL")]
    pub api_url: Option<String>,

    /// Endpoint used for the token check
    #[arg(long, default_value = "/api/user")]
    pub profile_path: String,
}

impl WatchArgs {
    pub fn wants_broadcast_notifications(&self) -> bool {
        self.notifications
            || (self.user.is_none()
                && !self.transactions
                && self.reloads.is_empty()
                && self.accounts.is_empty())
    }
}

fn parse_account(value: &str) -> Result<(String, String), String> {
    match value.split_once(':') {
        Some((resource, id)) if !resource.is_empty() && !id.is_empty() => {
            Ok((resource.to_string(), id.to_string()))
        }
        _ => Err(format!("expected RESOURCE:ID, got {value:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watch(args: &[&str]) -> WatchArgs {
        let cli = Cli::try_parse_from(
            ["pulseboard", "watch", "--token", "tok-123"]
                .iter()
                .chain(args),
        )
        .unwrap();
        match cli.command {
            Command::Watch(args) => args,
        }
    }

    #[test]
    fn defaults_to_broadcast_notifications() {
        assert!(watch(&[]).wants_broadcast_notifications());
        assert!(!watch(&["--reload", "users"]).wants_broadcast_notifications());
    }

    #[test]
    fn parses_repeated_accounts() {
        let args = watch(&["--account", "tiktok-accounts:17", "--account", "devices:3"]);
        assert_eq!(
            args.accounts,
            vec![
                ("tiktok-accounts".to_string(), "17".to_string()),
                ("devices".to_string(), "3".to_string())
            ]
        );
    }

    #[test]
    fn transactions_need_a_user() {
        assert!(Cli::try_parse_from(["pulseboard", "watch", "--token", "t", "--transactions"]).is_err());
    }
}
