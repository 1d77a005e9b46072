use std::error::Error;
use std::path::Path;

use rapid_core::{Catalog, IngestOutcome, IngestSummary, RapidService, SkipReason};
use rapid_storage::RapidStorage;
use tracing::info;

use crate::OutputFormat;

/// Ingest an NDJSON file, one event per line. Blank lines are ignored and
/// lines that are not valid JSON are counted as skipped.
pub(crate) async fn cmd_ingest<S: RapidStorage>(
    service: &RapidService<S, Catalog>,
    file: &Path,
    output: OutputFormat,
    quiet: bool,
) -> Result<(), Box<dyn Error>> {
    let content = std::fs::read_to_string(file)
        .map_err(|e| format!("error reading file '{}': {}", file.display(), e))?;

    let mut summary = IngestSummary::default();
    let mut line_numbers = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let outcome = match serde_json::from_str::<serde_json::Value>(line) {
            Ok(raw) => service.ingest(&raw).await,
            Err(e) => IngestOutcome::Skipped(SkipReason::MalformedJson {
                detail: e.to_string(),
            }),
        };
        summary.push(outcome);
        line_numbers.push(index + 1);
    }
    info!(
        file = %file.display(),
        recorded = summary.recorded,
        skipped = summary.skipped,
        "ingested event file"
    );

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string(&summary.to_json())?),
        OutputFormat::Text => {
            println!("recorded: {}", summary.recorded);
            println!("skipped:  {}", summary.skipped);
            if !quiet {
                for (line, outcome) in line_numbers.iter().zip(&summary.outcomes) {
                    if let IngestOutcome::Skipped(reason) = outcome {
                        println!("  line {line}: {} ({reason})", reason.code());
                    }
                }
            }
        }
    }
    Ok(())
}
