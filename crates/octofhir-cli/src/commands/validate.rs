use anyhow::{Context, Result, bail};
use octofhir_bundle::RequestBundle;
use octofhir_bundle::validation::{BasicValidator, validate_bundle};

use crate::cli::{OutputFormat, ValidateArgs};
use crate::input::read_json;
use crate::output::{print_response, print_success};

/// Runs bundle and entry validation only. Entries that pass are left
/// without a status in the printed response.
pub fn run(args: &ValidateArgs, format: OutputFormat) -> Result<()> {
    let value = read_json(args.file.as_deref())?;
    let bundle: RequestBundle =
        serde_json::from_value(value).context("Input is not a request Bundle")?;

    match validate_bundle(&bundle, &BasicValidator, true) {
        Ok(validated) => {
            print_response(&validated.response, format)?;
            if validated.error_count > 0 {
                bail!(
                    "{} of {} entries are invalid",
                    validated.error_count,
                    validated.response.len()
                );
            }
            print_success(&format!(
                "{} bundle with {} entries is valid",
                validated.kind.as_str(),
                validated.response.len()
            ));
            Ok(())
        }
        Err(failure) => {
            print_response(&failure.response, format)?;
            bail!("Bundle is invalid: {}", failure.error)
        }
    }
}
