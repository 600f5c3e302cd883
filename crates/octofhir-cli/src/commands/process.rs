use std::sync::Arc;

use anyhow::{Context, Result, bail};
use octofhir_bundle::{BundleConfig, BundleProcessor, ProcessOptions};
use octofhir_db_memory::InMemoryStorage;
use octofhir_storage::FhirStorage;
use tracing::info;

use crate::cli::{OutputFormat, ProcessArgs};
use crate::input::{read_json, seed_resources};
use crate::output::{print_response, print_success, print_value, print_warning};

pub async fn run(args: &ProcessArgs, config: BundleConfig, format: OutputFormat) -> Result<()> {
    let storage = InMemoryStorage::new().with_transactions(!args.no_transactions);
    for path in &args.seed {
        let resources = seed_resources(read_json(Some(path))?)
            .with_context(|| format!("Invalid seed file: {}", path.display()))?;
        for resource in &resources {
            storage
                .create(resource)
                .await
                .with_context(|| format!("Failed to seed resource from {}", path.display()))?;
        }
        info!(file = %path.display(), resources = resources.len(), "Seeded storage");
    }

    let bundle = read_json(args.file.as_deref())?;
    let processor = BundleProcessor::new(Arc::new(storage), config);
    let options = ProcessOptions {
        prefer_return: args.prefer,
    };

    match processor.process_value(&bundle, &options).await {
        Ok(response) => {
            print_response(&response, format)?;
            let failed = response.error_count();
            let summary = format!("Processed {} entries, {failed} failed", response.len());
            if failed == 0 {
                print_success(&summary);
            } else {
                print_warning(&summary);
            }
            Ok(())
        }
        Err(failure) => {
            print_response(&failure.response, format)?;
            print_value(&failure.to_operation_outcome().to_value(), format)?;
            bail!(
                "Bundle failed with status {}: {}",
                failure.status(),
                failure.error
            )
        }
    }
}
