//! Merkato CLI - Database migrations and access tokens.
//!
//! # Usage
//!
//! ```bash
//! # Run cart service database migrations
//! merkato-cli migrate
//!
//! # Issue an access token for a user
//! merkato-cli token issue --user-id 42 --ttl-days 30
//!
//! # Revoke an access token
//! merkato-cli token revoke --token <TOKEN>
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `token issue` - Create a bearer token for a user
//! - `token revoke` - Delete a bearer token

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "merkato-cli")]
#[command(author, version, about = "Merkato CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage access tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Issue a new access token
    Issue {
        /// User the token authenticates
        #[arg(short, long)]
        user_id: i32,

        /// Days until the token expires (default: never)
        #[arg(short, long)]
        ttl_days: Option<i64>,
    },
    /// Revoke an access token
    Revoke {
        /// The token to revoke
        #[arg(short, long)]
        token: String,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Token { action } => match action {
            TokenAction::Issue { user_id, ttl_days } => {
                let token = commands::token::issue(user_id, ttl_days).await?;
                // The token is shown once; only its digest is stored
                #[allow(clippy::print_stdout)]
                {
                    println!("{token}");
                }
            }
            TokenAction::Revoke { token } => commands::token::revoke(&token).await?,
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_token_issue() {
        let cli = Cli::try_parse_from(["merkato-cli", "token", "issue", "--user-id", "42", "--ttl-days", "7"])
            .expect("valid arguments");
        match cli.command {
            Commands::Token {
                action: TokenAction::Issue { user_id, ttl_days },
            } => {
                assert_eq!(user_id, 42);
                assert_eq!(ttl_days, Some(7));
            }
            _ => panic!("expected token issue"),
        }
    }

    #[test]
    fn test_parse_migrate() {
        let cli = Cli::try_parse_from(["merkato-cli", "migrate"]).expect("valid arguments");
        assert!(matches!(cli.command, Commands::Migrate));
    }
}
