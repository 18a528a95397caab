//! Error handling and display for the CLI.

use colored::Colorize;
use roster_reconcile::{ProviderError, RunError};
use thiserror::Error;

/// Exit code for any fatal error.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code when rows were recorded but the cursors were not saved.
pub const EXIT_NEEDS_RECONCILIATION: i32 = 3;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Missing API token. Set {0} in the environment.")]
    MissingToken(&'static str),
}

/// Exit code for a failed command.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<RunError>() {
        Some(run_err) if run_err.needs_operator() => EXIT_NEEDS_RECONCILIATION,
        _ => EXIT_FAILURE,
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    if let Some(run_err) = err.downcast_ref::<RunError>() {
        match run_err {
            RunError::RotationPersist { intended, .. } => {
                eprintln!(
                    "\n{}",
                    "The ledger already holds these rows. Re-running will not advance the \
                     rotation; set the cursors by hand:"
                        .yellow()
                );
                for (category, cursor) in intended.iter() {
                    eprintln!("  roster state set {:?} {}", category, cursor);
                }
            }
            RunError::Sources {
                source: ProviderError::Unavailable(_),
                ..
            }
            | RunError::Provider {
                source: ProviderError::Unavailable(_),
                ..
            } => {
                eprintln!(
                    "\n{}",
                    "Hint: Check the LMS token and base URL. Nothing was recorded.".yellow()
                );
            }
            RunError::LedgerAppend { .. } => {
                eprintln!(
                    "\n{}",
                    "Hint: Nothing was recorded and rotation state is unchanged. It is safe to \
                     re-run."
                        .yellow()
                );
            }
            _ => {}
        }
        return;
    }

    if let Some(CliError::MissingToken(_)) = err.downcast_ref::<CliError>() {
        eprintln!(
            "\n{}",
            "Hint: Tokens are read from the environment, never from the config file.".yellow()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_reconcile::{LedgerError, RotationState, RotationStoreError};

    #[test]
    fn test_exit_code_distinguishes_persist_failure() {
        let persist: anyhow::Error = RunError::RotationPersist {
            rows_appended: 2,
            intended: RotationState::new(),
            source: RotationStoreError::Io(std::io::Error::other("disk full")),
        }
        .into();
        let append: anyhow::Error = RunError::LedgerAppend {
            rows: 2,
            source: LedgerError::Unavailable("quota".to_string()),
        }
        .into();

        assert_eq!(exit_code(&persist), EXIT_NEEDS_RECONCILIATION);
        assert_eq!(exit_code(&append), EXIT_FAILURE);
        assert_eq!(exit_code(&anyhow::anyhow!("boom")), EXIT_FAILURE);
    }
}
