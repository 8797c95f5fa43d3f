use clap::Parser;
use piggy_promise::args::{Args, BudgetAction, Command};
use piggy_promise::{commands, Config, Mode, Result};
use std::process::ExitCode;
use tracing::{debug, error, trace};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = args.common().log_level();
    init_logger(log_level);
    debug!("Log level set to {}", log_level.to_string().to_lowercase());

    match main_inner(args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting with error: {e}");
            ExitCode::FAILURE
        }
    }
}

pub async fn main_inner(args: Args) -> Result<()> {
    trace!("{args:?}");
    let home = args.common().piggy_home().path();

    // This allows for testing the program without reaching Firebase. When PIGGY_IN_TEST_MODE is
    // set and non-zero in length, then the mode will be Mode::Local, otherwise Mode::Firebase.
    let mode = Mode::from_env();

    // Route to appropriate command handler
    let _: () = match args.command() {
        Command::Init(init_args) => {
            commands::init(home, init_args.database_url(), init_args.api_key())
                .await?
                .print()
        }

        Command::Register(credentials) => {
            let config = Config::load(home).await?;
            commands::register(&config, mode, credentials.email(), credentials.password())
                .await?
                .print()
        }

        Command::Login(credentials) => {
            let config = Config::load(home).await?;
            commands::login(&config, mode, credentials.email(), credentials.password())
                .await?
                .print()
        }

        Command::Logout => commands::logout(&Config::load(home).await?, mode)
            .await?
            .print(),

        Command::Whoami => commands::whoami(&Config::load(home).await?, mode)
            .await?
            .print(),

        Command::Add(add_args) => {
            let config = Config::load(home).await?;
            commands::add(
                &config,
                mode,
                add_args.amount(),
                add_args.category(),
                add_args.memo(),
            )
            .await?
            .print()
        }

        Command::Delete(delete_args) => {
            let config = Config::load(home).await?;
            commands::delete(&config, mode, delete_args.id())
                .await?
                .print()
        }

        Command::List(list_args) => {
            let config = Config::load(home).await?;
            commands::list(&config, mode, list_args.limit())
                .await?
                .print()
        }

        Command::Budget(budget_args) => {
            let mut config = Config::load(home).await?;
            match budget_args.action() {
                None => commands::budget(&config).await?.print(),
                Some(BudgetAction::Set { value }) => {
                    commands::budget_set(&mut config, value).await?.print()
                }
            }
        }

        Command::Report => commands::report(&Config::load(home).await?, mode)
            .await?
            .print(),

        Command::Categories => commands::categories(&Config::load(home).await?, mode)
            .await?
            .print(),

        Command::Watch => commands::watch(&Config::load(home).await?, mode)
            .await?
            .print(),
    };
    Ok(())
}

/// Initializes the tracing subscriber.
pub fn init_logger(level: LevelFilter) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => {
            // RUST_LOG exists; use it.
            EnvFilter::from_default_env()
        }
        None => {
            // RUST_LOG does not exist; use default log level for the library and binary only.
            EnvFilter::new(format!(
                "{}={},{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                level,
                env!("CARGO_BIN_NAME"),
                level
            ))
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
