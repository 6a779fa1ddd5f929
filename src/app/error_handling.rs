//! Fatal error reporting for the binary

use crate::error::Error;
use tracing::error;

/// Print `error` and exit
///
/// Configuration problems exit with 2 and everything else with 1. With
/// `verbose >= 1` the full cause chain is printed as well.
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    error!("Fatal error: {}", error);
    eprintln!("Error: {error}");

    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }

    std::process::exit(exit_code_for(&error))
}

fn exit_code_for(error: &anyhow::Error) -> i32 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<Error>())
        .map_or(1, Error::exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_config_errors_exit_with_two() {
        let err = anyhow::Error::new(Error::config("parallelism must be at least 1"));
        assert_eq!(exit_code_for(&err), 2);

        let wrapped = Err::<(), _>(Error::config("bad"))
            .context("loading settings")
            .unwrap_err();
        assert_eq!(exit_code_for(&wrapped), 2);
    }

    #[test]
    fn test_other_errors_exit_with_one() {
        assert_eq!(exit_code_for(&anyhow::anyhow!("stdout closed")), 1);
    }
}
