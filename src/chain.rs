//! Flattens the per-strike option chain payload into one row per strike.

use serde_json::{Map, Value};
use std::cmp::Ordering;
use tracing::debug;

use crate::fields::{self, CALL, GREEKS, MARKET_DATA, PUT, STRIKE, TIMESTAMP, UNDERLYING};

/// Where a side metric lives inside a `call_options` / `put_options` object.
#[derive(Debug, Clone, Copy)]
enum Source {
    MarketData,
    Greeks,
    /// Greeks first, then the side object itself.
    GreeksThenSide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideField {
    Ltp,
    Bid,
    Ask,
    Oi,
    Volume,
    Iv,
    Delta,
    Gamma,
    Theta,
    Vega,
    Pop,
}

impl SideField {
    pub const ALL: [SideField; 11] = [
        SideField::Ltp,
        SideField::Bid,
        SideField::Ask,
        SideField::Oi,
        SideField::Volume,
        SideField::Iv,
        SideField::Delta,
        SideField::Gamma,
        SideField::Theta,
        SideField::Vega,
        SideField::Pop,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SideField::Ltp => "ltp",
            SideField::Bid => "bid",
            SideField::Ask => "ask",
            SideField::Oi => "oi",
            SideField::Volume => "volume",
            SideField::Iv => "iv",
            SideField::Delta => "delta",
            SideField::Gamma => "gamma",
            SideField::Theta => "theta",
            SideField::Vega => "vega",
            SideField::Pop => "pop",
        }
    }

    fn aliases(self) -> (Source, &'static [&'static str]) {
        match self {
            SideField::Ltp => (Source::MarketData, fields::LTP),
            SideField::Bid => (Source::MarketData, fields::BID),
            SideField::Ask => (Source::MarketData, fields::ASK),
            SideField::Oi => (Source::MarketData, fields::OI),
            SideField::Volume => (Source::MarketData, fields::VOLUME),
            SideField::Iv => (Source::Greeks, fields::IV),
            SideField::Delta => (Source::Greeks, fields::DELTA),
            SideField::Gamma => (Source::Greeks, fields::GAMMA),
            SideField::Theta => (Source::Greeks, fields::THETA),
            SideField::Vega => (Source::Greeks, fields::VEGA),
            SideField::Pop => (Source::GreeksThenSide, fields::POP),
        }
    }
}

/// Market data and greeks for one side (call or put) of a strike.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SideQuote {
    pub ltp: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub oi: Option<f64>,
    pub volume: Option<f64>,
    pub iv: Option<f64>,
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub pop: Option<f64>,
}

impl SideQuote {
    pub fn get(&self, field: SideField) -> Option<f64> {
        match field {
            SideField::Ltp => self.ltp,
            SideField::Bid => self.bid,
            SideField::Ask => self.ask,
            SideField::Oi => self.oi,
            SideField::Volume => self.volume,
            SideField::Iv => self.iv,
            SideField::Delta => self.delta,
            SideField::Gamma => self.gamma,
            SideField::Theta => self.theta,
            SideField::Vega => self.vega,
            SideField::Pop => self.pop,
        }
    }

    fn slot(&mut self, field: SideField) -> &mut Option<f64> {
        match field {
            SideField::Ltp => &mut self.ltp,
            SideField::Bid => &mut self.bid,
            SideField::Ask => &mut self.ask,
            SideField::Oi => &mut self.oi,
            SideField::Volume => &mut self.volume,
            SideField::Iv => &mut self.iv,
            SideField::Delta => &mut self.delta,
            SideField::Gamma => &mut self.gamma,
            SideField::Theta => &mut self.theta,
            SideField::Vega => &mut self.vega,
            SideField::Pop => &mut self.pop,
        }
    }

    fn from_object(side: &Map<String, Value>) -> Self {
        let empty = Map::new();
        let market_data = fields::lookup_object(side, MARKET_DATA).unwrap_or(&empty);
        let greeks = fields::lookup_object(side, GREEKS).unwrap_or(&empty);

        let mut quote = SideQuote::default();
        for field in SideField::ALL {
            let (source, keys) = field.aliases();
            let raw = match source {
                Source::MarketData => fields::lookup(market_data, keys),
                Source::Greeks => fields::lookup(greeks, keys),
                Source::GreeksThenSide => {
                    fields::lookup(greeks, keys).or_else(|| fields::lookup(side, keys))
                }
            };
            *quote.slot(field) = raw.and_then(fields::to_number);
        }

        quote
    }
}

/// One strike of the chain with call and put side by side.
///
/// A side is `None` when the payload carried something other than an object for it,
/// in which case that row contributes no columns for the side.
#[derive(Debug, Clone, PartialEq)]
pub struct StrikeRow {
    pub strike: Option<f64>,
    pub underlying: Option<String>,
    pub timestamp: Option<String>,
    pub call: Option<SideQuote>,
    pub put: Option<SideQuote>,
    pub straddle_price: Option<f64>,
}

impl StrikeRow {
    fn from_item(item: &Map<String, Value>) -> Self {
        Self {
            strike: fields::lookup(item, STRIKE).and_then(fields::to_number),
            underlying: fields::lookup(item, UNDERLYING).and_then(fields::to_text),
            timestamp: fields::lookup(item, TIMESTAMP).and_then(fields::to_text),
            call: side(item, CALL),
            put: side(item, PUT),
            straddle_price: None,
        }
    }

    pub fn call_value(&self, field: SideField) -> Option<f64> {
        self.call.as_ref().and_then(|q| q.get(field))
    }

    pub fn put_value(&self, field: SideField) -> Option<f64> {
        self.put.as_ref().and_then(|q| q.get(field))
    }
}

fn side(item: &Map<String, Value>, keys: &[&str]) -> Option<SideQuote> {
    match fields::lookup(item, keys) {
        None => Some(SideQuote::default()),
        Some(Value::Object(obj)) => Some(SideQuote::from_object(obj)),
        Some(_) => None,
    }
}

/// Flattens a raw chain payload (optionally wrapped in a stored `snapshot` envelope)
/// into rows ordered by ascending strike. Strikes that cannot be read sort last.
pub fn to_rows(chain: &Value) -> Vec<StrikeRow> {
    let chain = match chain.get("snapshot") {
        Some(inner @ Value::Object(_)) => inner,
        _ => chain,
    };

    let Some(data) = chain.get("data").and_then(Value::as_array) else {
        debug!("chain payload has no data list");
        return Vec::new();
    };

    let mut rows: Vec<StrikeRow> = data
        .iter()
        .filter_map(Value::as_object)
        .map(StrikeRow::from_item)
        .collect();

    if has_columns(&rows) {
        for row in rows.iter_mut() {
            let call = row.call_value(SideField::Ltp).unwrap_or(0.0);
            let put = row.put_value(SideField::Ltp).unwrap_or(0.0);
            row.straddle_price = Some(call + put);
        }
    }

    rows.sort_by(|a, b| cmp_strike(a.strike, b.strike));
    rows
}

/// Straddles only exist when both a call and a put column made it into the set.
fn has_columns(rows: &[StrikeRow]) -> bool {
    rows.iter().any(|r| r.call.is_some()) && rows.iter().any(|r| r.put.is_some())
}

fn cmp_strike(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
