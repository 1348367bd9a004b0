//! Command handlers
//!
//! Each handler returns the text destined for stdout so it can be checked
//! without spawning the binary; status lines go to stderr.

use crate::commands::{ConfigShowArgs, ConfigValidateArgs, MailQueryArgs, OutputFormat, QueryFields};
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use console::{style, Term};
use std::path::Path;
use std::time::Duration;
use surveyor::{EngineConfig, MailQuery};

// ============================================================================
// Status output
// ============================================================================

/// Status line writer honoring quiet mode
#[derive(Debug)]
pub struct Status {
    term: Term,
    quiet: bool,
}

impl Status {
    /// Writer for the given settings
    #[must_use]
    pub fn new(config: &CliConfig) -> Self {
        Self {
            term: Term::stderr(),
            quiet: config.verbosity.is_quiet(),
        }
    }

    /// Print a success line
    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }
        // Status lines are best effort; a closed stderr must not fail the command.
        self.term
            .write_line(&format!("{} {message}", style("✓").green().bold()))
            .ok();
    }
}

// ============================================================================
// config
// ============================================================================

/// Load a file, or the defaults when no file is given
///
/// # Errors
///
/// Read, parse or validation failure.
pub fn load_config(file: Option<&Path>) -> CliResult<EngineConfig> {
    match file {
        Some(path) => Ok(EngineConfig::from_file(path)?),
        None => Ok(EngineConfig::default()),
    }
}

/// `config show`
///
/// # Errors
///
/// Load or serialization failure.
pub fn run_config_show(args: &ConfigShowArgs) -> CliResult<String> {
    let config = load_config(args.file.as_deref())?;
    match args.format {
        OutputFormat::Yaml => Ok(config.to_yaml()?),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&config)?),
    }
}

/// `config validate`: one budget line per policy
///
/// # Errors
///
/// The first problem found in the file.
pub fn run_config_validate(args: &ConfigValidateArgs) -> CliResult<String> {
    let config = EngineConfig::from_file(&args.file)?;
    let lines: Vec<String> = config
        .policies()
        .iter()
        .map(|(name, policy)| {
            format!(
                "{name:<17} {:>3} x {:>6}  (worst case {})",
                policy.max_attempts,
                format_duration(policy.interval),
                format_duration(policy.worst_case()),
            )
        })
        .collect();
    Ok(lines.join("\n"))
}

fn format_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

// ============================================================================
// mail
// ============================================================================

/// Build a query from flags or a raw string
///
/// # Errors
///
/// Malformed raw query, or no criteria at all.
pub fn build_query(fields: &QueryFields) -> CliResult<MailQuery> {
    let query = match &fields.raw {
        Some(raw) => MailQuery::parse(raw)?,
        None => {
            let mut query = MailQuery::new();
            query.subject.clone_from(&fields.subject);
            query.from.clone_from(&fields.from);
            query.to.clone_from(&fields.to);
            query.terms.clone_from(&fields.terms);
            query
        }
    };
    if query == MailQuery::default() {
        return Err(CliError::invalid_argument(
            "query needs at least one of --subject, --from, --to, --raw or a term",
        ));
    }
    Ok(query)
}

/// `mail query`
///
/// # Errors
///
/// See [`build_query`].
pub fn run_mail_query(args: &MailQueryArgs) -> CliResult<String> {
    let query = build_query(&args.fields)?;
    if args.json {
        Ok(serde_json::to_string_pretty(&query)?)
    } else {
        Ok(query.render())
    }
}

/// `mail wait` against Gmail
///
/// # Errors
///
/// Exhausted budget, rejected credentials, or (with `--absent`) a message
/// that did arrive.
#[cfg(feature = "gmail")]
pub async fn run_mail_wait(
    args: &crate::commands::MailWaitArgs,
    config: &EngineConfig,
    status: &Status,
) -> CliResult<String> {
    use indicatif::{ProgressBar, ProgressStyle};
    use surveyor::{first_link, BodyFormat, GmailInbox, InboxWaiter};

    let query = build_query(&args.fields)?;
    let inbox = GmailInbox::new(args.token.clone());
    let waiter = InboxWaiter::new(&inbox, config.inbox);

    let spinner = if status.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("waiting for `{}` in {}", query.render(), args.recipient));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let result = if args.absent {
        waiter
            .assert_absent(&args.recipient, &query)
            .await
            .map(|()| String::new())
    } else if args.link {
        waiter
            .fetch_first_body(&args.recipient, &query, BodyFormat::Html)
            .await
            .and_then(|(id, body)| {
                first_link(&body).ok_or_else(|| {
                    surveyor::SurveyorError::inbox(format!("message {id} has no link"))
                })
            })
    } else {
        waiter
            .wait_for_message(&args.recipient, &query)
            .await
            .map(|id| id.to_string())
    };
    spinner.finish_and_clear();

    let output = result?;
    if args.absent {
        status.success(&format!("no message for {} within budget", args.recipient));
    }
    Ok(output)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    mod config_tests {
        use super::*;

        #[test]
        fn test_show_defaults_as_yaml() {
            let args = ConfigShowArgs {
                file: None,
                format: OutputFormat::Yaml,
            };
            let yaml = run_config_show(&args).unwrap();
            assert!(yaml.contains("inbox:"));
            assert!(yaml.contains("interval_ms: 10000"));
        }

        #[test]
        fn test_show_json_roundtrips() {
            let args = ConfigShowArgs {
                file: None,
                format: OutputFormat::Json,
            };
            let json = run_config_show(&args).unwrap();
            let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, EngineConfig::default());
        }

        #[test]
        fn test_validate_reports_budgets() {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "refresh: in_place").unwrap();
            let out = run_config_validate(&ConfigValidateArgs {
                file: file.path().to_path_buf(),
            })
            .unwrap();
            assert_eq!(out.lines().count(), 8);
            assert!(out.contains("inbox"));
            assert!(out.contains("worst case 400s"));
        }

        #[test]
        fn test_validate_survives_huge_budget() {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(
                file,
                "inbox:\n  max_attempts: 100000\n  interval_ms: 18446744073709551615\n  per_attempt_timeout_ms: 1000"
            )
            .unwrap();
            let out = run_config_validate(&ConfigValidateArgs {
                file: file.path().to_path_buf(),
            })
            .unwrap();
            assert!(out.lines().any(|l| l.starts_with("inbox") && l.contains("100000")));
        }

        #[test]
        fn test_validate_names_bad_key() {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(
                file,
                "review:\n  max_attempts: 0\n  interval_ms: 100\n  per_attempt_timeout_ms: 100"
            )
            .unwrap();
            let err = run_config_validate(&ConfigValidateArgs {
                file: file.path().to_path_buf(),
            })
            .unwrap_err();
            assert!(err.to_string().contains("review"));
        }

        #[test]
        fn test_format_duration() {
            assert_eq!(format_duration(Duration::from_secs(3)), "3s");
            assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        }
    }

    mod status_tests {
        use super::*;
        use crate::config::Verbosity;

        #[test]
        fn test_status_respects_quiet() {
            let quiet = Status::new(&CliConfig::new().with_verbosity(Verbosity::Quiet));
            assert!(quiet.quiet);
            quiet.success("hidden");

            let normal = Status::new(&CliConfig::new());
            assert!(!normal.quiet);
            normal.success("written to stderr");
        }
    }

    mod mail_tests {
        use super::*;

        #[test]
        fn test_query_from_fields() {
            let fields = QueryFields {
                subject: Some("Welcome aboard".into()),
                to: Some("owner@acme.test".into()),
                ..QueryFields::default()
            };
            let out = run_mail_query(&MailQueryArgs {
                fields,
                json: false,
            })
            .unwrap();
            assert_eq!(out, r#"subject:"Welcome aboard" to:owner@acme.test"#);
        }

        #[test]
        fn test_query_from_raw_as_json() {
            let fields = QueryFields {
                raw: Some("from:billing invoice".into()),
                ..QueryFields::default()
            };
            let out = run_mail_query(&MailQueryArgs { fields, json: true }).unwrap();
            let query: MailQuery = serde_json::from_str(&out).unwrap();
            assert_eq!(query.from.as_deref(), Some("billing"));
            assert_eq!(query.terms, vec!["invoice"]);
        }

        #[test]
        fn test_empty_query_rejected() {
            let err = build_query(&QueryFields::default()).unwrap_err();
            assert!(matches!(err, CliError::InvalidArgument { .. }));
        }

        #[test]
        fn test_unterminated_raw_query_rejected() {
            let fields = QueryFields {
                raw: Some(r#"subject:"open"#.into()),
                ..QueryFields::default()
            };
            assert!(build_query(&fields).is_err());
        }
    }
}
