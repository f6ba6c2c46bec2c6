//! Fundamental data types shared across the entire workspace.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Store-assigned identifier of a persisted fill.
pub type FillId = i64;
/// Alias for per-unit prices and notional amounts.
pub type Price = f64;
/// Signed fill quantity: positive buys, negative sells.
pub type Quantity = i64;

/// Rendering used for every human-facing timestamp.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Errors raised while building core values.
#[derive(Debug, Error, PartialEq)]
pub enum CoreError {
    /// Microseconds must stay below one second.
    #[error("microseconds out of range: {0}")]
    MicrosOutOfRange(u32),
    /// The timestamp cannot be represented as a calendar instant.
    #[error("timestamp out of range: {0}s")]
    TimestampOutOfRange(i64),
}

/// The side of an execution.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy the security.
    Buy,
    /// Sell the security.
    Sell,
}

impl Side {
    /// Convert to the sign applied to quantities.
    #[must_use]
    pub fn as_i8(self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }

    /// Apply this side's sign to the magnitude of `quantity`.
    ///
    /// `None` when the magnitude is not representable (`Quantity::MIN`).
    #[must_use]
    pub fn signed(self, quantity: Quantity) -> Option<Quantity> {
        quantity
            .checked_abs()
            .map(|magnitude| magnitude * Quantity::from(self.as_i8()))
    }

    /// Side implied by a signed quantity; `None` for zero.
    #[must_use]
    pub fn from_quantity(quantity: Quantity) -> Option<Self> {
        match quantity {
            q if q > 0 => Some(Self::Buy),
            q if q < 0 => Some(Self::Sell),
            _ => None,
        }
    }
}

/// Direction of a round-trip position, fixed by its opening fill.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }
}

impl From<Side> for Direction {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => Self::Long,
            Side::Sell => Self::Short,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "long" => Ok(Self::Long),
            "short" => Ok(Self::Short),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

/// Execution instant stored as whole seconds plus microseconds.
///
/// Field order gives the derived `Ord` the `(seconds, micros)` ordering used
/// throughout netting.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct FillTime {
    pub seconds: i64,
    pub micros: u32,
}

impl FillTime {
    /// Build a timestamp, rejecting microsecond values of a second or more.
    pub fn new(seconds: i64, micros: u32) -> Result<Self, CoreError> {
        if micros >= 1_000_000 {
            return Err(CoreError::MicrosOutOfRange(micros));
        }
        Ok(Self { seconds, micros })
    }

    /// Truncates sub-microsecond precision.
    #[must_use]
    pub fn from_datetime(value: DateTime<Utc>) -> Self {
        Self {
            seconds: value.timestamp(),
            micros: value.timestamp_subsec_micros().min(999_999),
        }
    }

    pub fn to_datetime(self) -> Result<DateTime<Utc>, CoreError> {
        Utc.timestamp_opt(self.seconds, self.micros * 1_000)
            .single()
            .ok_or(CoreError::TimestampOutOfRange(self.seconds))
    }
}

impl fmt::Display for FillTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Ok(ts) => write!(f, "{}", ts.format(TIME_FORMAT)),
            Err(_) => write!(f, "{}.{:06}", self.seconds, self.micros),
        }
    }
}

/// Execution report accepted from a client, before the store assigns an id.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct NewFill {
    pub account: String,
    pub security: String,
    pub strategy: String,
    pub signal_id: String,
    pub comment: String,
    pub price: Price,
    pub quantity: Quantity,
    pub volume: Price,
    pub volume_currency: String,
    pub executed_at: FillTime,
}

impl NewFill {
    /// Attach the store-assigned identifier; new fills always start unbalanced.
    #[must_use]
    pub fn into_fill(self, id: FillId) -> Fill {
        Fill {
            id,
            account: self.account,
            security: self.security,
            strategy: self.strategy,
            signal_id: self.signal_id,
            comment: self.comment,
            price: self.price,
            quantity: self.quantity,
            volume: self.volume,
            volume_currency: self.volume_currency,
            executed_at: self.executed_at,
            balanced: false,
        }
    }
}

/// A persisted execution.
///
/// Everything except `balanced` is immutable; `balanced` only ever moves from
/// `false` to `true` when the fill is retired into a [`ClosedPosition`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Fill {
    pub id: FillId,
    pub account: String,
    pub security: String,
    pub strategy: String,
    pub signal_id: String,
    pub comment: String,
    pub price: Price,
    pub quantity: Quantity,
    pub volume: Price,
    pub volume_currency: String,
    pub executed_at: FillTime,
    pub balanced: bool,
}

impl Fill {
    #[must_use]
    pub fn side(&self) -> Option<Side> {
        Side::from_quantity(self.quantity)
    }

    /// Netting bucket this fill belongs to.
    #[must_use]
    pub fn position_key(&self) -> PositionKey {
        PositionKey {
            account: self.account.clone(),
            security: self.security.clone(),
            strategy: self.strategy.clone(),
        }
    }
}

/// Identifies one netting bucket.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct PositionKey {
    pub account: String,
    pub security: String,
    pub strategy: String,
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.account, self.security, self.strategy)
    }
}

/// Realized round trip produced once a bucket nets back to zero.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ClosedPosition {
    pub account: String,
    pub security: String,
    pub strategy: String,
    pub direction: Direction,
    pub entry_time: FillTime,
    pub exit_time: FillTime,
    pub profit: Price,
    pub profit_currency: String,
    pub fill_ids: Vec<FillId>,
}

impl ClosedPosition {
    #[must_use]
    pub fn is_win(&self) -> bool {
        self.profit > 0.0
    }

    #[must_use]
    pub fn is_loss(&self) -> bool {
        self.profit < 0.0
    }
}

/// Optional account/strategy restriction applied to closed position queries.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PositionFilter {
    pub account: Option<String>,
    pub strategy: Option<String>,
}

impl PositionFilter {
    #[must_use]
    pub fn matches(&self, position: &ClosedPosition) -> bool {
        self.account
            .as_deref()
            .map_or(true, |account| account == position.account)
            && self
                .strategy
                .as_deref()
                .map_or(true, |strategy| strategy == position.strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_sign_is_applied_to_magnitude() {
        assert_eq!(Side::Buy.signed(-7), Some(7));
        assert_eq!(Side::Sell.signed(7), Some(-7));
        assert_eq!(Side::Sell.signed(-7), Some(-7));
        assert_eq!(Side::Sell.signed(Quantity::MAX), Some(-Quantity::MAX));
        assert_eq!(Side::Buy.signed(Quantity::MIN), None);
        assert_eq!(Side::Sell.signed(Quantity::MIN), None);
        assert_eq!(Side::from_quantity(0), None);
        assert_eq!(Side::from_quantity(-3), Some(Side::Sell));
    }

    #[test]
    fn fill_time_orders_by_seconds_then_micros() {
        let early = FillTime::new(100, 999_999).unwrap();
        let late = FillTime::new(101, 0).unwrap();
        assert!(early < late);
        assert!(FillTime::new(100, 1).unwrap() > FillTime::new(100, 0).unwrap());
        assert_eq!(
            FillTime::new(1, 1_000_000),
            Err(CoreError::MicrosOutOfRange(1_000_000))
        );
    }

    #[test]
    fn fill_time_round_trips_through_datetime() {
        let ts = FillTime::new(946_728_000, 333_000).unwrap();
        let dt = ts.to_datetime().unwrap();
        assert_eq!(FillTime::from_datetime(dt), ts);
        assert_eq!(ts.to_string(), "2000-01-01 12:00:00.333");
    }

    #[test]
    fn direction_serializes_lowercase() {
        let encoded = serde_json::to_string(&Direction::Short).unwrap();
        assert_eq!(encoded, "\"short\"");
        assert_eq!("long".parse::<Direction>(), Ok(Direction::Long));
        assert_eq!(Direction::from(Side::Buy), Direction::Long);
    }
}
