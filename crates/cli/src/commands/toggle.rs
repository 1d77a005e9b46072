use std::error::Error;

use rapid_core::{Catalog, ProblemId, RapidService};
use rapid_storage::RapidStorage;

use super::{operator, parse_scope};
use crate::OutputFormat;

pub(crate) async fn cmd_toggle<S: RapidStorage>(
    service: &RapidService<S, Catalog>,
    problem: &str,
    context: &str,
    output: OutputFormat,
) -> Result<(), Box<dyn Error>> {
    let (problem, context) = parse_scope(problem, context)?;
    let toggled = service.toggle_open(operator(), &problem, &context).await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string(&toggled)?),
        OutputFormat::Text => {
            let state = if toggled.is_open { "open" } else { "closed" };
            println!("{problem} in {context}: {state}");
        }
    }
    Ok(())
}

pub(crate) async fn cmd_toggle_enabled<S: RapidStorage>(
    service: &RapidService<S, Catalog>,
    problem: &str,
    output: OutputFormat,
) -> Result<(), Box<dyn Error>> {
    let problem = ProblemId::parse(problem)?;
    let toggled = service.toggle_enabled(operator(), &problem).await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string(&toggled)?),
        OutputFormat::Text => {
            let state = if toggled.is_enabled { "enabled" } else { "disabled" };
            println!("{problem}: {state}");
        }
    }
    Ok(())
}
