use serde_json::Value;

use crate::cli::OutputFormat;
use crate::error::CliError;

/// Render a JSON document to stdout in the requested format.
pub fn render(value: &Value, format: OutputFormat, pretty: bool) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let text = if pretty {
                serde_json::to_string_pretty(value)?
            } else {
                serde_json::to_string(value)?
            };
            println!("{text}");
        }
        OutputFormat::Table => print_table(value),
    }
    Ok(())
}

fn print_table(value: &Value) {
    match value {
        Value::Array(rows) if rows.iter().all(Value::is_object) && !rows.is_empty() => {
            let columns = collect_columns(rows);
            let widths = column_widths(rows, &columns);

            print_row(&columns, &widths);
            let total: usize = widths.iter().map(|w| w + 3).sum();
            println!("{}", "-".repeat(total.saturating_sub(1)));

            for row in rows {
                let cells: Vec<String> = columns
                    .iter()
                    .map(|column| cell_text(row.get(column.as_str())))
                    .collect();
                print_row(&cells, &widths);
            }
        }
        Value::Object(map) => {
            let width = map.keys().map(String::len).max().unwrap_or(0);
            for (key, entry) in map {
                println!("{key:width$}  {}", cell_text(Some(entry)));
            }
        }
        other => println!("{other}"),
    }
}

fn collect_columns(rows: &[Value]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        if let Value::Object(map) = row {
            for key in map.keys() {
                if !columns.iter().any(|existing| existing == key) {
                    columns.push(key.clone());
                }
            }
        }
    }
    columns
}

fn column_widths(rows: &[Value], columns: &[String]) -> Vec<usize> {
    columns
        .iter()
        .map(|column| {
            let data_width = rows
                .iter()
                .map(|row| cell_text(row.get(column.as_str())).len())
                .max()
                .unwrap_or(0);
            data_width.max(column.len())
        })
        .collect()
}

fn print_row(cells: &[impl AsRef<str>], widths: &[usize]) {
    let line: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:width$}", cell.as_ref()))
        .collect();
    println!("{}", line.join(" | "));
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::from("-"),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}
