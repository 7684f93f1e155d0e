use std::error::Error;

use clap::{Args, Parser, Subcommand};
use engine::{Engine, EngineError, NewUser};
use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};

mod prompt;

#[derive(Parser, Debug)]
#[command(name = "waffle_admin")]
#[command(about = "Operator utilities for Waffle accounts")]
struct Cli {
    /// Database connection string (also read from `DATABASE_URL`).
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:./waffle.db?mode=rwc")]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    User(UserArgs),
    Token(TokenArgs),
    Session(SessionArgs),
}

#[derive(Args, Debug)]
struct UserArgs {
    #[command(subcommand)]
    command: UserCommand,
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Create a user; the password is prompted for.
    Create(UserCreateArgs),
    /// Replace a user's password; the new one is prompted for.
    SetPassword(UsernameArg),
}

#[derive(Args, Debug)]
struct UserCreateArgs {
    #[arg(long)]
    username: String,
    #[arg(long, default_value = "")]
    email: String,
    #[arg(long, default_value = "")]
    first_name: String,
    #[arg(long, default_value = "")]
    last_name: String,
}

#[derive(Args, Debug)]
struct UsernameArg {
    #[arg(long)]
    username: String,
}

#[derive(Args, Debug)]
struct TokenArgs {
    #[command(subcommand)]
    command: TokenCommand,
}

#[derive(Subcommand, Debug)]
enum TokenCommand {
    /// Issue a new API token, invalidating the old one.
    Regenerate(UsernameArg),
}

#[derive(Args, Debug)]
struct SessionArgs {
    #[command(subcommand)]
    command: SessionCommand,
}

#[derive(Subcommand, Debug)]
enum SessionCommand {
    /// Delete every expired login session.
    ClearExpired,
}

async fn connect_db(database_url: &str) -> Result<DatabaseConnection, Box<dyn Error + Send + Sync>> {
    let db = Database::connect(database_url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

/// Report the account errors an operator can act on and exit non-zero.
fn exit_on_account_error(err: EngineError) -> Box<dyn Error + Send + Sync> {
    match err {
        EngineError::DuplicateUsername | EngineError::Validation(_) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
        EngineError::KeyNotFound(username) => {
            eprintln!("user not found: {username}");
            std::process::exit(1);
        }
        other => other.into(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();

    let db = connect_db(&cli.database_url).await?;
    let engine = Engine::builder().database(db).build().await?;

    match cli.command {
        Command::User(UserArgs {
            command: UserCommand::Create(args),
        }) => {
            let password = prompt::new_password()?;
            let (profile, token) = engine
                .register(NewUser {
                    username: args.username,
                    password,
                    email: args.email,
                    first_name: args.first_name,
                    last_name: args.last_name,
                })
                .await
                .map_err(exit_on_account_error)?;
            println!(
                "created user: {} (id {}, token {token})",
                profile.user.username, profile.user.id
            );
        }
        Command::User(UserArgs {
            command: UserCommand::SetPassword(args),
        }) => {
            let password = prompt::new_password()?;
            engine
                .set_password(&args.username, &password)
                .await
                .map_err(exit_on_account_error)?;
            println!("password updated: {}", args.username);
        }
        Command::Token(TokenArgs {
            command: TokenCommand::Regenerate(args),
        }) => {
            let token = engine
                .regenerate_token(&args.username)
                .await
                .map_err(exit_on_account_error)?;
            println!("new token for {}: {token}", args.username);
        }
        Command::Session(SessionArgs {
            command: SessionCommand::ClearExpired,
        }) => {
            let purged = engine.clear_expired_sessions().await?;
            println!("cleared {purged} expired session(s)");
        }
    }

    Ok(())
}
