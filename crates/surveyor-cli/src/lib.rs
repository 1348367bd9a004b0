//! Surveyor CLI: command-line access to engine configuration and inbox waits
//!
//! ## Usage
//!
//! ```bash
//! surveyor config show --format json         # Effective configuration
//! surveyor config validate surveyor.yaml     # Check a file and print budgets
//! surveyor mail query --subject "Welcome"    # Render a provider query
//! surveyor mail wait --recipient a@b.test --subject "Welcome" --link
//! ```

#![warn(missing_docs)]

mod commands;
mod config;
mod error;
pub mod handlers;

pub use commands::{
    Cli, ColorArg, Commands, ConfigCommand, ConfigShowArgs, ConfigValidateArgs, MailCommand,
    MailQueryArgs, OutputFormat, QueryFields,
};
#[cfg(feature = "gmail")]
pub use commands::MailWaitArgs;
pub use config::{CliConfig, ColorChoice, Verbosity};
pub use error::{CliError, CliResult};
