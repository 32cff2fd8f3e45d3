//! Coinbase candle transform
//!
//! `GET /products/{product_id}/candles?granularity=N` returns bare arrays
//! `[time, low, high, open, close, volume]` with no product attached. The
//! transform moves minute candles into `candle_minutes` and stores each
//! candle as an object carrying its product id, keyed by `(product_id, time)`.

use bytes::Bytes;
use reqwest::Url;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::transform::{EncodingError, PayloadTransform, ResolvedPayload};

/// Candle record as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Product the candle belongs to, e.g. `BTC-USD`
    pub product_id: String,
    /// Bucket start (Unix seconds)
    pub time: i64,
    /// Lowest price
    pub low: Decimal,
    /// Highest price
    pub high: Decimal,
    /// Opening price
    pub open: Decimal,
    /// Closing price
    pub close: Decimal,
    /// Traded volume
    pub volume: Decimal,
}

/// Fields identifying one candle across fetches
pub const CANDLE_KEY: [&str; 2] = ["product_id", "time"];

/// Table name for a candle granularity in seconds. Only minute candles get
/// their own table.
pub fn granularity_table(granularity: Option<&str>) -> &'static str {
    match granularity {
        Some("60") => "candle_minutes",
        _ => "candles",
    }
}

/// Path segment following `products`
pub fn product_id(url: &Url) -> Option<String> {
    let mut segments = url.path_segments()?;
    segments.find(|segment| *segment == "products")?;
    segments
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Built-in transform for Coinbase candles
#[derive(Debug, Clone, Copy, Default)]
pub struct CoinbaseCandles;

impl CoinbaseCandles {
    fn parse_decimal(value: &Value, field: &str, table: &str) -> Result<Decimal, EncodingError> {
        let parsed = match value {
            Value::String(s) => Decimal::from_str(s).ok(),
            Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            _ => None,
        };
        parsed.ok_or_else(|| EncodingError::Decode {
            table: table.to_string(),
            reason: format!("invalid {field}: {value}"),
        })
    }

    fn parse_time(value: &Value, table: &str) -> Result<i64, EncodingError> {
        let parsed = match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| EncodingError::Decode {
            table: table.to_string(),
            reason: format!("invalid time: {value}"),
        })
    }

    /// Parse one candle in array or object form.
    pub fn parse_candle(
        value: &Value,
        product_id: &str,
        table: &str,
    ) -> Result<Candle, EncodingError> {
        let fields: [&Value; 6] = match value {
            Value::Array(arr) if arr.len() == 6 => {
                [&arr[0], &arr[1], &arr[2], &arr[3], &arr[4], &arr[5]]
            }
            Value::Array(arr) => {
                return Err(EncodingError::Decode {
                    table: table.to_string(),
                    reason: format!("expected 6 elements in candle, got {}", arr.len()),
                })
            }
            Value::Object(obj) => {
                let mut fields = [&Value::Null; 6];
                for (slot, name) in fields
                    .iter_mut()
                    .zip(["time", "low", "high", "open", "close", "volume"])
                {
                    *slot = obj.get(name).ok_or_else(|| EncodingError::Decode {
                        table: table.to_string(),
                        reason: format!("missing {name}"),
                    })?;
                }
                fields
            }
            other => {
                return Err(EncodingError::Decode {
                    table: table.to_string(),
                    reason: format!("candle is not an array or object: {other}"),
                })
            }
        };

        Ok(Candle {
            product_id: product_id.to_string(),
            time: Self::parse_time(fields[0], table)?,
            low: Self::parse_decimal(fields[1], "low", table)?,
            high: Self::parse_decimal(fields[2], "high", table)?,
            open: Self::parse_decimal(fields[3], "open", table)?,
            close: Self::parse_decimal(fields[4], "close", table)?,
            volume: Self::parse_decimal(fields[5], "volume", table)?,
        })
    }
}

impl PayloadTransform for CoinbaseCandles {
    fn transform(
        &self,
        url: &Url,
        table: &str,
        payload: &Bytes,
    ) -> Result<ResolvedPayload, EncodingError> {
        let product_id = product_id(url).ok_or_else(|| EncodingError::MissingPathSegment {
            url: url.to_string(),
            segment: "products/{product_id}",
        })?;

        let granularity = url
            .query_pairs()
            .find(|(key, _)| key == "granularity")
            .map(|(_, value)| value.into_owned());
        let target = granularity_table(granularity.as_deref());

        let decoded: Value = serde_json::from_slice(payload).map_err(|e| EncodingError::Decode {
            table: table.to_string(),
            reason: e.to_string(),
        })?;
        let rows = decoded.as_array().ok_or_else(|| EncodingError::Decode {
            table: table.to_string(),
            reason: "candles payload is not an array".to_string(),
        })?;

        let candles = rows
            .iter()
            .map(|row| Self::parse_candle(row, &product_id, table))
            .collect::<Result<Vec<_>, _>>()?;

        let encoded = serde_json::to_vec(&candles).map_err(|e| EncodingError::Encode {
            table: target.to_string(),
            reason: e.to_string(),
        })?;

        Ok(ResolvedPayload {
            table: target.to_string(),
            payload: Bytes::from(encoded),
            key: CANDLE_KEY.iter().map(|field| field.to_string()).collect(),
        })
    }
}
