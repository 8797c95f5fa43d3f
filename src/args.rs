//! These structs provide the CLI interface for the piggy CLI.

use clap::{Parser, Subcommand};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

/// piggy: Keep track of what you spend against a weekly budget.
///
/// Expenses are stored per user in a Firebase Realtime Database, so the same data shows up on
/// every device you sign in from. Start with `piggy init`, then `piggy register` or `piggy login`.
///
/// Set PIGGY_IN_TEST_MODE to anything non-empty to use local files instead of Firebase.
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the data directory and the configuration file.
    ///
    /// You need the URL of your Firebase Realtime Database and the Web API key of the Firebase
    /// project, both of which are shown in the Firebase console under project settings.
    Init(InitArgs),
    /// Create an account and sign in with it.
    Register(CredentialArgs),
    /// Sign in with an existing account.
    Login(CredentialArgs),
    /// Sign out and forget the saved session.
    Logout,
    /// Show who is signed in.
    Whoami,
    /// Record an expense, dated today.
    Add(AddArgs),
    /// Delete one expense by its id.
    Delete(DeleteArgs),
    /// List expenses, most recent first.
    List(ListArgs),
    /// Show or change the weekly budget.
    Budget(BudgetArgs),
    /// Show this week's and this month's spending against the budget.
    Report,
    /// Show spending per category and the suggested categories.
    Categories,
    /// Print the expense list every time it changes, until interrupted.
    Watch,
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The directory where piggy configuration and session data is held. Defaults to ~/piggy
    #[arg(long, env = "PIGGY_HOME", default_value_t = default_piggy_home())]
    piggy_home: DisplayPath,
}

impl Common {
    pub fn new(log_level: LevelFilter, piggy_home: PathBuf) -> Self {
        Self {
            log_level,
            piggy_home: piggy_home.into(),
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn piggy_home(&self) -> &DisplayPath {
        &self.piggy_home
    }
}

/// (Not shown): Args for the `piggy init` command.
#[derive(Debug, Parser, Clone)]
pub struct InitArgs {
    /// The URL of your Firebase Realtime Database, e.g.
    /// https://my-project-default-rtdb.firebaseio.com
    #[arg(long)]
    database_url: String,

    /// The Web API key of your Firebase project.
    #[arg(long, env = "PIGGY_API_KEY")]
    api_key: String,
}

impl InitArgs {
    pub fn new(database_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

/// (Not shown): Args for the `piggy register` and `piggy login` commands.
#[derive(Debug, Parser, Clone)]
pub struct CredentialArgs {
    #[arg(long)]
    email: String,

    /// Your password. It can also be given through PIGGY_PASSWORD to keep it out of your shell
    /// history.
    #[arg(long, env = "PIGGY_PASSWORD", hide_env_values = true)]
    password: String,
}

impl CredentialArgs {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

/// (Not shown): Args for the `piggy add` command.
#[derive(Debug, Parser, Clone)]
pub struct AddArgs {
    /// How much was spent, e.g. 12.50
    #[arg(long, allow_hyphen_values = true)]
    amount: String,

    /// Free-form, e.g. Grocery, Dining, Auto, Entertainment, Taba_Uni or Other.
    #[arg(long)]
    category: Option<String>,

    /// A short note.
    #[arg(long)]
    memo: Option<String>,
}

impl AddArgs {
    pub fn new(amount: impl Into<String>, category: Option<String>, memo: Option<String>) -> Self {
        Self {
            amount: amount.into(),
            category,
            memo,
        }
    }

    pub fn amount(&self) -> &str {
        &self.amount
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn memo(&self) -> Option<&str> {
        self.memo.as_deref()
    }
}

/// (Not shown): Args for the `piggy delete` command.
#[derive(Debug, Parser, Clone)]
pub struct DeleteArgs {
    /// The id of the expense, as shown by `piggy list`.
    id: String,
}

impl DeleteArgs {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// (Not shown): Args for the `piggy list` command.
#[derive(Debug, Parser, Clone)]
pub struct ListArgs {
    /// Show at most this many expenses.
    #[arg(long)]
    limit: Option<usize>,
}

impl ListArgs {
    pub fn new(limit: Option<usize>) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

/// (Not shown): Args for the `piggy budget` command.
#[derive(Debug, Parser, Clone)]
pub struct BudgetArgs {
    #[command(subcommand)]
    action: Option<BudgetAction>,
}

impl BudgetArgs {
    pub fn new(action: Option<BudgetAction>) -> Self {
        Self { action }
    }

    pub fn action(&self) -> Option<&BudgetAction> {
        self.action.as_ref()
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum BudgetAction {
    /// Set the weekly budget. The monthly budget is always four times this.
    Set {
        /// A number greater than 0.
        #[arg(allow_hyphen_values = true)]
        value: String,
    },
}

fn default_piggy_home() -> DisplayPath {
    DisplayPath(match dirs::home_dir() {
        Some(home) => home.join("piggy"),
        None => {
            error!(
                "There was an error when trying to get your home directory. You can get around \
                this by providing --piggy-home or PIGGY_HOME instead of relying on the default \
                piggy home directory. If you continue using the program right now, you may have \
                problems!",
            );
            PathBuf::from("piggy")
        }
    })
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DisplayPath(PathBuf);

impl From<PathBuf> for DisplayPath {
    fn from(value: PathBuf) -> Self {
        DisplayPath(value)
    }
}

impl Deref for DisplayPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DisplayPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Display for DisplayPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl FromStr for DisplayPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl DisplayPath {
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}
