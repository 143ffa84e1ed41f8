use serde_json::Value;

/// Headline fields, in priority order.
const PRIORITY_KEYS: [&str; 6] = [
    "irr",
    "unlevered_irr",
    "equity_multiple",
    "dscr_minimum",
    "periodic_payment",
    "status",
];

/// Print just the headline value from the output.
///
/// KPI blocks (`kpis` on an analysis, `results` on a stored run) are
/// searched before the top level. Falls back to the first field.
pub fn print_minimal(value: &Value) {
    let result_obj = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    if let Value::Object(map) = result_obj {
        let nested = ["kpis", "results"]
            .iter()
            .filter_map(|k| map.get(*k).and_then(Value::as_object));
        for scope in nested.chain(std::iter::once(map)) {
            for key in PRIORITY_KEYS {
                if let Some(val) = scope.get(key).filter(|v| !v.is_null()) {
                    println!("{}", format_minimal(val));
                    return;
                }
            }
        }

        if let Some((key, val)) = map.iter().next() {
            println!("{}: {}", key, format_minimal(val));
            return;
        }
    }

    println!("{}", format_minimal(result_obj));
}

fn format_minimal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
