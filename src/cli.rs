use clap::Parser;

/// Sync new mail, classify job-application updates and label them.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Add a new account via OAuth onboarding, then exit.
    #[arg(long)]
    pub add_account: bool,

    /// Only sync this account (repeatable). Defaults to every registered account.
    #[arg(long = "account", value_name = "EMAIL")]
    pub accounts: Vec<String>,

    /// Sync accounts concurrently instead of one after another.
    #[arg(long)]
    pub parallel: bool,
}
