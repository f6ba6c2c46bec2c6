//! JSON payload carried inside each length-delimited frame.

use chrono::NaiveDateTime;
use goldmine_core::{FillTime, NewFill, Price, Quantity, Side};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Exact layout of the `execution-time` field, always read as UTC.
pub const EXECUTION_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const EXECUTION_TIME_LEN: usize = 23;

/// Reasons a single frame could not become a [`NewFill`].
///
/// Every variant is recoverable: the message is dropped and the connection
/// keeps reading.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid message size: 0")]
    Empty,
    #[error("malformed trade payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid 'operation' field: [{0}]")]
    InvalidOperation(String),
    #[error("invalid 'execution-time' field: [{0}]")]
    InvalidExecutionTime(String),
    #[error("quantity must be non-zero")]
    ZeroQuantity,
    #[error("quantity magnitude out of range: {0}")]
    QuantityOutOfRange(Quantity),
    #[error("price must be positive and finite, got {0}")]
    InvalidPrice(f64),
    #[error("volume must be non-negative and finite, got {0}")]
    InvalidVolume(f64),
}

/// Top-level object of every message: `{"trade": {...}}`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TradeEnvelope {
    pub trade: TradeMessage,
}

/// A client-reported execution as it appears on the wire.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TradeMessage {
    pub account: String,
    pub security: String,
    pub price: Price,
    pub quantity: Quantity,
    #[serde(default)]
    pub volume: Price,
    #[serde(default)]
    pub volume_currency: String,
    /// `"buy"` or `"sell"`.
    pub operation: String,
    pub execution_time: String,
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub signal_id: String,
    #[serde(default)]
    pub order_comment: String,
}

impl TradeMessage {
    /// Validate the message and convert it into a signed fill.
    pub fn into_new_fill(self) -> Result<NewFill, DecodeError> {
        let side = parse_operation(&self.operation)?;
        let executed_at = parse_execution_time(&self.execution_time)?;
        if self.quantity == 0 {
            return Err(DecodeError::ZeroQuantity);
        }
        let quantity = side
            .signed(self.quantity)
            .ok_or(DecodeError::QuantityOutOfRange(self.quantity))?;
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(DecodeError::InvalidPrice(self.price));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(DecodeError::InvalidVolume(self.volume));
        }
        Ok(NewFill {
            account: self.account,
            security: self.security,
            strategy: self.strategy,
            signal_id: self.signal_id,
            comment: self.order_comment,
            price: self.price,
            quantity,
            volume: self.volume,
            volume_currency: self.volume_currency,
            executed_at,
        })
    }

    /// Wire form of a fill; the sign of its quantity picks the operation.
    #[must_use]
    pub fn from_new_fill(fill: &NewFill) -> Self {
        let operation = match Side::from_quantity(fill.quantity) {
            Some(Side::Sell) => "sell",
            _ => "buy",
        };
        Self {
            account: fill.account.clone(),
            security: fill.security.clone(),
            price: fill.price,
            quantity: fill.quantity.abs(),
            volume: fill.volume,
            volume_currency: fill.volume_currency.clone(),
            operation: operation.to_string(),
            execution_time: format_execution_time(fill.executed_at),
            strategy: fill.strategy.clone(),
            signal_id: fill.signal_id.clone(),
            order_comment: fill.comment.clone(),
        }
    }
}

/// Decode one frame payload into a fill ready for the queue.
pub fn decode_fill(payload: &[u8]) -> Result<NewFill, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::Empty);
    }
    let envelope: TradeEnvelope = serde_json::from_slice(payload)?;
    envelope.trade.into_new_fill()
}

/// Serialize a message into a frame payload.
pub fn encode_message(message: &TradeMessage) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&TradeEnvelope {
        trade: message.clone(),
    })
}

fn parse_operation(value: &str) -> Result<Side, DecodeError> {
    match value {
        "buy" => Ok(Side::Buy),
        "sell" => Ok(Side::Sell),
        other => Err(DecodeError::InvalidOperation(other.to_string())),
    }
}

/// Parse `YYYY-MM-DD HH:MM:SS.mmm` as a UTC instant.
pub fn parse_execution_time(value: &str) -> Result<FillTime, DecodeError> {
    let invalid = || DecodeError::InvalidExecutionTime(value.to_string());
    if value.len() != EXECUTION_TIME_LEN || value.as_bytes().get(19) != Some(&b'.') {
        return Err(invalid());
    }
    let naive =
        NaiveDateTime::parse_from_str(value, EXECUTION_TIME_FORMAT).map_err(|_| invalid())?;
    Ok(FillTime::from_datetime(naive.and_utc()))
}

/// Render a timestamp in the wire layout, truncated to milliseconds.
#[must_use]
pub fn format_execution_time(time: FillTime) -> String {
    match time.to_datetime() {
        Ok(ts) => ts.format(EXECUTION_TIME_FORMAT).to_string(),
        Err(_) => time.to_string(),
    }
}
