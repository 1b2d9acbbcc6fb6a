//! Text and CSV renderings of normalized chain rows.

use anyhow::Result;
use std::fmt::Write as _;
use std::io::Write;

use crate::chain::{SideField, StrikeRow};

/// Compact column set shown on screen; CSV carries everything.
pub const BOARD_COLUMNS: [&str; 11] = [
    "C OI", "C IV", "C Δ", "C BID", "C LTP", "STRIKE", "P LTP", "P ASK", "P Δ", "P IV", "P OI",
];

pub const NO_DATA: &str = "No data: the chain snapshot has no strikes.";

pub fn board_cells(row: &StrikeRow) -> [String; 11] {
    [
        cell(row.call_value(SideField::Oi)),
        cell(row.call_value(SideField::Iv)),
        cell(row.call_value(SideField::Delta)),
        cell(row.call_value(SideField::Bid)),
        cell(row.call_value(SideField::Ltp)),
        cell(row.strike),
        cell(row.put_value(SideField::Ltp)),
        cell(row.put_value(SideField::Ask)),
        cell(row.put_value(SideField::Delta)),
        cell(row.put_value(SideField::Iv)),
        cell(row.put_value(SideField::Oi)),
    ]
}

/// Integers print bare, fractions with up to four places, missing as `-`.
pub fn cell(value: Option<f64>) -> String {
    match value {
        None => "-".to_string(),
        Some(v) if v.fract() == 0.0 && v.abs() < 1e15 => format!("{v:.0}"),
        Some(v) => {
            let text = format!("{v:.4}");
            text.trim_end_matches('0').trim_end_matches('.').to_string()
        }
    }
}

/// Fixed-width table for terminals, with the straddle column appended when present.
pub fn render_text(rows: &[StrikeRow]) -> String {
    if rows.is_empty() {
        return NO_DATA.to_string();
    }

    let straddle = rows.iter().any(|r| r.straddle_price.is_some());
    let mut out = String::new();

    for name in BOARD_COLUMNS {
        let _ = write!(out, "{name:>10}");
    }
    if straddle {
        let _ = write!(out, "{:>10}", "STRADDLE");
    }
    out.push('\n');

    for row in rows {
        for value in board_cells(row) {
            let _ = write!(out, "{value:>10}");
        }
        if straddle {
            let _ = write!(out, "{:>10}", cell(row.straddle_price));
        }
        out.push('\n');
    }

    out
}

/// Every column present in the row set, in output order.
pub fn csv_headers(rows: &[StrikeRow]) -> Vec<String> {
    let mut headers = vec![
        "strike".to_string(),
        "underlying".to_string(),
        "timestamp".to_string(),
    ];
    if rows.iter().any(|r| r.call.is_some()) {
        headers.extend(SideField::ALL.iter().map(|f| format!("call_{}", f.name())));
    }
    if rows.iter().any(|r| r.put.is_some()) {
        headers.extend(SideField::ALL.iter().map(|f| format!("put_{}", f.name())));
    }
    if rows.iter().any(|r| r.straddle_price.is_some()) {
        headers.push("straddle_price".to_string());
    }

    headers
}

pub fn write_csv<W: Write>(rows: &[StrikeRow], writer: W) -> Result<()> {
    let headers = csv_headers(rows);
    let has_call = headers.iter().any(|h| h.starts_with("call_"));
    let has_put = headers.iter().any(|h| h.starts_with("put_"));
    let has_straddle = headers.last().is_some_and(|h| h == "straddle_price");

    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(&headers)?;

    for row in rows {
        let mut record = vec![
            number(row.strike),
            row.underlying.clone().unwrap_or_default(),
            row.timestamp.clone().unwrap_or_default(),
        ];
        if has_call {
            record.extend(SideField::ALL.iter().map(|f| number(row.call_value(*f))));
        }
        if has_put {
            record.extend(SideField::ALL.iter().map(|f| number(row.put_value(*f))));
        }
        if has_straddle {
            record.push(number(row.straddle_price));
        }
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

fn number(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
