//! Field-name aliases seen across Upstox payload versions.
//!
//! Every logical field is an ordered list of candidate keys; the first key that holds
//! a value wins. Null, `""`, `[]` and `{}` count as no value, but `0` and `false` do not.

use serde_json::{Map, Value};

pub const EXPIRY: &[&str] = &["expiry_date", "expiry", "expiryDate", "date"];

pub const STRIKE: &[&str] = &["strike_price", "strike", "strikePrice"];
pub const UNDERLYING: &[&str] = &["underlying", "instrument_key"];
pub const TIMESTAMP: &[&str] = &["updated_at", "last_updated", "timestamp"];
pub const CALL: &[&str] = &["call_options", "CE", "call"];
pub const PUT: &[&str] = &["put_options", "PE", "put"];

pub const MARKET_DATA: &[&str] = &["market_data", "marketData"];
pub const GREEKS: &[&str] = &["option_greeks", "greeks"];

pub const LTP: &[&str] = &["ltp", "last_price", "lastTradedPrice"];
pub const BID: &[&str] = &["bid", "best_bid"];
pub const ASK: &[&str] = &["ask", "best_ask"];
pub const OI: &[&str] = &["oi", "open_interest"];
pub const VOLUME: &[&str] = &["volume", "traded_volume"];
pub const IV: &[&str] = &["iv", "implied_volatility"];
pub const DELTA: &[&str] = &["delta"];
pub const GAMMA: &[&str] = &["gamma"];
pub const THETA: &[&str] = &["theta"];
pub const VEGA: &[&str] = &["vega"];
pub const POP: &[&str] = &["pop"];

/// First candidate key in `obj` holding a non-empty value.
pub fn lookup<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find(|value| !is_empty(value))
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Like [`lookup`] but only yields the value when it is itself an object.
pub fn lookup_object<'a>(
    obj: &'a Map<String, Value>,
    keys: &[&str],
) -> Option<&'a Map<String, Value>> {
    lookup(obj, keys).and_then(Value::as_object)
}

/// Lenient numeric coercion: numbers and numeric strings, anything else is missing.
pub fn to_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    number.filter(|n| n.is_finite())
}

/// Text fields keep strings as-is and stringify scalars.
pub fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
