//! Deterministic recomputation of the takeoff table.
//!
//! Nothing here can fail: bad numbers become 0.0 and every mode maps each
//! row to exactly one result.

use serde_json::Value;
use tracing::debug;

use crate::model::{sanitise_height, CalcMode, ReplyRow, RowInput, TakeoffRow, TakeoffTable};

/// Recompute a table from plain row inputs
pub fn recompute(rows: &[RowInput], mode: CalcMode) -> TakeoffTable {
    build_table(rows.iter().map(|row| (row.clone(), None)), mode)
}

/// Recompute a table from rows read back from the model, keeping what it reported
pub fn recompute_reply(rows: &[ReplyRow], mode: CalcMode) -> TakeoffTable {
    build_table(
        rows.iter().map(|row| (row.input.clone(), row.reported_result)),
        mode,
    )
}

/// Result for a single row under `mode`
pub fn row_result(mode: CalcMode, dim1: f64, dim2: f64) -> f64 {
    let dim1 = finite_or_zero(dim1);
    let dim2 = finite_or_zero(dim2);

    let result = match mode {
        CalcMode::Area => dim1 * dim2,
        CalcMode::Perimeter => dim1,
        CalcMode::WallArea { height } => dim1 * sanitise_height(height),
    };

    // Products of huge inputs can still overflow
    finite_or_zero(result)
}

/// Human-readable formula for a row, e.g. `12.00 x 3.50`
pub fn row_formula(mode: CalcMode, dim1: f64, dim2: f64) -> String {
    let dim1 = finite_or_zero(dim1);
    match mode {
        CalcMode::Area => format!("{:.2} x {:.2}", dim1, finite_or_zero(dim2)),
        CalcMode::Perimeter => format!("{:.2}", dim1),
        CalcMode::WallArea { height } => format!("{:.2} x {:.2}", dim1, sanitise_height(height)),
    }
}

fn build_table<I>(rows: I, mode: CalcMode) -> TakeoffTable
where
    I: IntoIterator<Item = (RowInput, Option<f64>)>,
{
    let unit = mode.unit();

    let rows: Vec<TakeoffRow> = rows
        .into_iter()
        .map(|(input, reported_result)| {
            let dim1 = finite_or_zero(input.dim1);
            let dim2 = finite_or_zero(input.dim2);
            TakeoffRow {
                label: input.label,
                description: input.description,
                dim1,
                dim2,
                formula: row_formula(mode, dim1, dim2),
                result: row_result(mode, dim1, dim2),
                unit,
                reported_result,
            }
        })
        .collect();

    let total = finite_or_zero(rows.iter().map(|r| r.result).sum());

    debug!("Recomputed {} rows in {} mode, total {:.2}", rows.len(), mode.label(), total);

    TakeoffTable {
        mode,
        rows,
        total,
        unit,
    }
}

impl TakeoffTable {
    /// Empty table for a mode
    pub fn empty(mode: CalcMode) -> Self {
        recompute(&[], mode)
    }

    /// Re-derive every row under a different mode, keeping labels and dimensions
    pub fn recompute_with(&self, mode: CalcMode) -> TakeoffTable {
        build_table(
            self.rows
                .iter()
                .map(|row| (row.to_input(), row.reported_result)),
            mode,
        )
    }

    /// Replace the rows with user edits and recompute.
    ///
    /// An edit with an empty description keeps the description of the row at
    /// the same position. The model's reported figure stays attached by position.
    pub fn apply_edits(&self, edits: Vec<RowInput>) -> TakeoffTable {
        let rows = edits.into_iter().enumerate().map(|(i, mut edit)| {
            let previous = self.rows.get(i);
            if edit.description.is_empty() {
                if let Some(prev) = previous {
                    edit.description = prev.description.clone();
                }
            }
            (edit, previous.and_then(|p| p.reported_result))
        });

        build_table(rows, self.mode)
    }
}

/// Coerce an arbitrary JSON value into a finite number, 0.0 when that is impossible
pub fn coerce_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => finite_or_zero(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => parse_lenient(s),
        _ => 0.0,
    }
}

/// Parse a number typed by a person or a model: `"12.5"`, `" 1,200 "`, `"36 m2"`.
///
/// A single comma followed by one or two digits (`"1,5"`, `"12,75"`) is a
/// decimal comma; any other comma groups thousands.
pub fn parse_lenient(text: &str) -> f64 {
    let mut s = text.trim();
    for suffix in ["m²", "m2", "M2", "m", "M"] {
        if let Some(stripped) = s.strip_suffix(suffix) {
            s = stripped.trim_end();
            break;
        }
    }

    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    let cleaned = if is_decimal_comma(&compact) {
        compact.replace(',', ".")
    } else {
        compact.replace(',', "")
    };
    cleaned.parse::<f64>().map(finite_or_zero).unwrap_or(0.0)
}

fn is_decimal_comma(s: &str) -> bool {
    match s.split_once(',') {
        Some((_, frac)) => {
            !s.contains('.')
                && (1..=2).contains(&frac.len())
                && frac.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Two decimals with thousands separators, e.g. `1,234.50`
pub fn format_total(value: f64) -> String {
    let formatted = format!("{:.2}", finite_or_zero(value));
    let (sign, digits) = match formatted.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", formatted.as_str()),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    // "-0.00" reads oddly in a total
    if sign == "-" && grouped.chars().all(|c| c == '0' || c == ',') && frac_part == "00" {
        return format!("{}.{}", grouped, frac_part);
    }

    format!("{}{}.{}", sign, grouped, frac_part)
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
