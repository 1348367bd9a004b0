//! CLI command definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Surveyor: question-driven form filling and eventual-consistency polling
#[derive(Parser, Debug)]
#[command(name = "surveyor")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect and validate engine configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Build inbox queries and wait for email
    #[command(subcommand)]
    Mail(MailCommand),
}

/// `config` subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration (defaults merged with a file)
    Show(ConfigShowArgs),

    /// Validate a configuration file
    Validate(ConfigValidateArgs),
}

/// Arguments for `config show`
#[derive(Parser, Debug)]
pub struct ConfigShowArgs {
    /// Configuration file to load instead of the defaults
    #[arg(short, long, env = "SURVEYOR_CONFIG")]
    pub file: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "yaml")]
    pub format: OutputFormat,
}

/// Arguments for `config validate`
#[derive(Parser, Debug)]
pub struct ConfigValidateArgs {
    /// Configuration file to check
    pub file: PathBuf,
}

/// `mail` subcommands
#[derive(Subcommand, Debug)]
pub enum MailCommand {
    /// Render a provider search query from its parts
    Query(MailQueryArgs),

    /// Wait for a matching message in a Gmail inbox
    #[cfg(feature = "gmail")]
    Wait(MailWaitArgs),
}

/// Query fields shared by `mail` subcommands
#[derive(Parser, Debug, Clone, Default)]
pub struct QueryFields {
    /// Subject substring
    #[arg(long)]
    pub subject: Option<String>,

    /// Sender substring
    #[arg(long)]
    pub from: Option<String>,

    /// Recipient address
    #[arg(long)]
    pub to: Option<String>,

    /// Parse a full query string instead of individual fields
    #[arg(long, conflicts_with_all = ["subject", "from", "to", "terms"])]
    pub raw: Option<String>,

    /// Free-text terms
    pub terms: Vec<String>,
}

/// Arguments for `mail query`
#[derive(Parser, Debug)]
pub struct MailQueryArgs {
    /// Query fields
    #[command(flatten)]
    pub fields: QueryFields,

    /// Print the structured query as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `mail wait`
#[cfg(feature = "gmail")]
#[derive(Parser, Debug)]
pub struct MailWaitArgs {
    /// Mailbox to search
    #[arg(long)]
    pub recipient: String,

    /// Query fields
    #[command(flatten)]
    pub fields: QueryFields,

    /// OAuth access token
    #[arg(long, env = "SURVEYOR_GMAIL_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Configuration file supplying the inbox budget
    #[arg(short, long, env = "SURVEYOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print the first link of the HTML body instead of the message id
    #[arg(long)]
    pub link: bool,

    /// Succeed only if no message arrives within the budget
    #[arg(long, conflicts_with = "link")]
    pub absent: bool,
}

/// Structured output format
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// YAML
    #[default]
    Yaml,
    /// JSON
    Json,
}

/// Color argument
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_show() {
        let cli = Cli::parse_from(["surveyor", "config", "show", "--format", "json"]);
        match cli.command {
            Commands::Config(ConfigCommand::Show(args)) => {
                assert_eq!(args.format, OutputFormat::Json);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_mail_query_with_terms() {
        let cli = Cli::parse_from([
            "surveyor", "-vv", "mail", "query", "--subject", "Welcome", "urgent",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Mail(MailCommand::Query(args)) => {
                assert_eq!(args.fields.subject.as_deref(), Some("Welcome"));
                assert_eq!(args.fields.terms, vec!["urgent"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_raw_conflicts_with_fields() {
        let result = Cli::try_parse_from([
            "surveyor", "mail", "query", "--raw", "subject:x", "--subject", "y",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_command_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
