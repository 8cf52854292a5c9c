//! Search Response Codec
//!
//! Decodes the search endpoint's response body.
//!
//! # Wire Format
//!
//! The endpoint answers with an almost-JSON object whose top-level key is
//! unquoted:
//!
//! ```text
//! {T:{"Columns":[{"tradeQuantity":"1MM+","securityID":"C765371",
//!    "price":101.25,"tradeDate":"05/29/2019","timeOfExecution":"10:02:11"}],
//!    "Rows":1}}
//! ```
//!
//! An expired session gets `{}` instead, with a success status.

use std::io::Read;

use flate2::read::{GzDecoder, ZlibDecoder};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

use crate::application::ports::FetchError;
use crate::domain::trade::{FetchOutcome, TradeRecord};

const BARE_MARKER: &[u8] = b"T:";
const QUOTED_MARKER: &[u8] = b"\"T\":";

// Every field accepts `null` as well as a missing key.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "T", default, deserialize_with = "null_as_default")]
    trades: TradeBlock,
}

#[derive(Debug, Default, Deserialize)]
struct TradeBlock {
    #[serde(rename = "Columns", default, deserialize_with = "null_as_default")]
    columns: Vec<WireTrade>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireTrade {
    #[serde(rename = "tradeQuantity", deserialize_with = "null_as_default")]
    trade_quantity: String,
    #[serde(
        rename = "securityID",
        alias = "securityId",
        deserialize_with = "null_as_default"
    )]
    security_id: String,
    #[serde(deserialize_with = "price_or_zero")]
    price: Decimal,
    #[serde(rename = "tradeDate", deserialize_with = "null_as_default")]
    trade_date: String,
    #[serde(rename = "timeOfExecution", deserialize_with = "null_as_default")]
    time_of_execution: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

fn price_or_zero<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    rust_decimal::serde::float_option::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl From<WireTrade> for TradeRecord {
    fn from(wire: WireTrade) -> Self {
        Self {
            quantity: wire.trade_quantity,
            instrument_id: wire.security_id,
            price: wire.price,
            trade_date: wire.trade_date,
            execution_time: wire.time_of_execution,
        }
    }
}

/// Undo the body's content encoding.
///
/// `gzip` is gunzipped, `deflate` is zlib-inflated, anything else (including
/// no encoding) is returned as is.
///
/// # Errors
///
/// Returns `FetchError::DecodeError` if the compressed stream is corrupt.
pub fn decode_response(encoding: Option<&str>, body: &[u8]) -> Result<Vec<u8>, FetchError> {
    let encoding = encoding.map(|e| e.trim().to_ascii_lowercase());
    let mut out = Vec::new();
    let result = match encoding.as_deref() {
        Some("gzip" | "x-gzip") => GzDecoder::new(body).read_to_end(&mut out),
        Some("deflate") => ZlibDecoder::new(body).read_to_end(&mut out),
        _ => return Ok(body.to_vec()),
    };
    result.map_err(|e| FetchError::DecodeError(e.to_string()))?;
    Ok(out)
}

/// Quote the first bare `T:` key so the body becomes valid JSON.
///
/// Only the first occurrence is touched.
#[must_use]
pub fn repair_payload(body: &[u8]) -> Vec<u8> {
    let Some(pos) = find(body, BARE_MARKER) else {
        return body.to_vec();
    };

    let mut repaired = Vec::with_capacity(body.len() + 2);
    repaired.extend_from_slice(&body[..pos]);
    repaired.extend_from_slice(QUOTED_MARKER);
    repaired.extend_from_slice(&body[pos + BARE_MARKER.len()..]);
    repaired
}

/// Parse a decoded search body.
///
/// A body with no trade block means the session has expired.
///
/// # Errors
///
/// Returns `FetchError::MalformedPayload` if the repaired body is not the
/// expected JSON shape.
pub fn parse_trades(body: &[u8]) -> Result<FetchOutcome, FetchError> {
    let repaired = repair_payload(body);
    let response: SearchResponse = serde_json::from_slice(&repaired)
        .map_err(|e| FetchError::MalformedPayload(e.to_string()))?;

    if find(&repaired, QUOTED_MARKER).is_none() {
        return Ok(FetchOutcome::Unauthenticated);
    }

    Ok(FetchOutcome::Trades(
        response
            .trades
            .columns
            .into_iter()
            .map(TradeRecord::from)
            .collect(),
    ))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
