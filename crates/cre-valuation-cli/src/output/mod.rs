pub mod csv_out;
pub mod json;
pub mod minimal;
pub mod table;

use crate::OutputFormat;
use serde_json::{Map, Value};

/// Dispatch output to the appropriate formatter.
pub fn format_output(format: &OutputFormat, value: &Value) {
    match format {
        OutputFormat::Json => json::print_json(value),
        OutputFormat::Table => table::print_table(value),
        OutputFormat::Csv => csv_out::print_csv(value),
        OutputFormat::Minimal => minimal::print_minimal(value),
    }
}

/// Rows `{value, irr, dscr_minimum}` when `obj` is a sensitivity factor.
pub(crate) fn sensitivity_rows(obj: &Map<String, Value>) -> Option<Vec<Value>> {
    let values = obj.get("values")?.as_array()?;
    let irr = obj.get("impact_on_irr")?.as_array()?;
    let dscr = obj.get("impact_on_dscr")?.as_array()?;
    Some(
        values
            .iter()
            .zip(irr)
            .zip(dscr)
            .map(|((v, i), d)| {
                serde_json::json!({
                    "value": v,
                    "irr": i,
                    "dscr_minimum": d,
                })
            })
            .collect(),
    )
}
