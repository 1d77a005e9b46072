use std::error::Error;

use rapid_core::{Catalog, RapidService};
use rapid_storage::RapidStorage;

use super::{operator, parse_scope};
use crate::OutputFormat;

pub(crate) async fn cmd_status<S: RapidStorage>(
    service: &RapidService<S, Catalog>,
    problem: &str,
    context: &str,
    output: OutputFormat,
) -> Result<(), Box<dyn Error>> {
    let (problem, context) = parse_scope(problem, context)?;
    let status = service.status(operator(), &problem, &context).await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string(&status)?),
        OutputFormat::Text => {
            println!("problem: {problem}");
            println!("context: {context}");
            println!("open:    {}", yes_no(status.is_open));
            println!("enabled: {}", yes_no(status.is_enabled));
        }
    }
    Ok(())
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
