use std::error::Error;
use std::fmt::Write as _;

use rapid_core::{Catalog, RapidService, ResponsesPayload};
use rapid_storage::RapidStorage;

use super::{operator, parse_scope};
use crate::OutputFormat;

pub(crate) async fn cmd_responses<S: RapidStorage>(
    service: &RapidService<S, Catalog>,
    problem: &str,
    context: &str,
    output: OutputFormat,
) -> Result<(), Box<dyn Error>> {
    let (problem, context) = parse_scope(problem, context)?;
    let payload = service.responses(operator(), &problem, &context).await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&payload)?),
        OutputFormat::Text => print!("{}", render_text(&payload)),
    }
    Ok(())
}

/// One row per choice, one column per run (newest first).
fn render_text(payload: &ResponsesPayload) -> String {
    let mut out = String::new();
    let state = if payload.is_open { "open" } else { "closed" };
    let _ = writeln!(out, "status: {state}, {} run(s)", payload.runs.len());
    if payload.runs.is_empty() {
        return out;
    }

    let label_width = payload
        .choices
        .iter()
        .map(|c| c.answer_id.len() + c.answer_text.len() + 3)
        .max()
        .unwrap_or(0)
        .max("choice".len());

    let _ = write!(out, "{:<label_width$}", "choice");
    for run in &payload.runs {
        let marker = if run.open { "*" } else { "" };
        let _ = write!(out, "  {:>8}", format!("#{}{marker}", run.id));
    }
    out.push('\n');

    for choice in &payload.choices {
        let label = format!("{} ({})", choice.answer_id, choice.answer_text);
        let _ = write!(out, "{label:<label_width$}");
        for run in &payload.runs {
            let count = payload
                .counts
                .get(&choice.answer_id)
                .and_then(|per_run| per_run.get(&run.id.to_string()))
                .copied()
                .unwrap_or(0);
            let _ = write!(out, "  {count:>8}");
        }
        out.push('\n');
    }
    out
}
