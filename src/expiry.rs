use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde_json::Value;
use tracing::debug;

use crate::fields::{self, EXPIRY};

// Numeric dates read month-first, falling back to day-first when the month is out of range.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m-%d-%Y",
    "%d-%m-%Y",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y/%m/%d",
    "%d-%b-%Y",
    "%d %b %Y",
    "%b %d, %Y",
    "%b %d, '%y",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Picks the soonest expiry on or after today from a contracts response.
pub fn choose_nearest_expiry(contracts: &Value) -> Option<NaiveDate> {
    nearest_expiry_on(contracts, Local::now().date_naive())
}

pub fn nearest_expiry_on(contracts: &Value, today: NaiveDate) -> Option<NaiveDate> {
    let Some(data) = contracts.get("data").and_then(Value::as_array) else {
        debug!("contracts payload has no data list");
        return None;
    };

    data.iter()
        .filter_map(expiry_text)
        .filter_map(parse_date)
        .filter(|date| *date >= today)
        .min()
}

fn expiry_text(item: &Value) -> Option<&str> {
    match item {
        Value::String(s) => Some(s.as_str()),
        Value::Object(obj) => fields::lookup(obj, EXPIRY).and_then(Value::as_str),
        _ => None,
    }
}

/// Permissive date parsing across the formats brokers tend to emit.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(date) = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
    {
        return Some(date);
    }

    if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
        return Some(datetime.date_naive());
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|datetime| datetime.date())
}
