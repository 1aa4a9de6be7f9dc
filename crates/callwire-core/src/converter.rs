//! Reconciles generically decoded values with the concrete type a caller expects.
//!
//! Formatters decode payloads into a value tree, which does not always have
//! the exact shape the target type deserializes from: an enum may arrive as
//! an ordinal, a 64-bit parameter as a float, a duration as `"00:00:05"`.
//! [`ValueConverter::try_convert`] tries, in order:
//!
//! 1. identity (the tree already deserializes as the target)
//! 2. kind-driven coercion: enum name/ordinal, numeric widening and narrowing,
//!    string parsing of UUIDs, durations and timestamps, element-wise for
//!    sequences and options
//! 3. structural re-decode of text holding an encoded tree
//! 4. a full round trip through the configured formatter
//!
//! Conversion never fails loudly: it reports `None` and the caller decides
//! which fault to raise.

use crate::error::{CallwireError, Result};
use crate::format::Formatter;
use crate::message::{RemoteType, TypeTag, ValueKind};
use chrono::{DateTime, Utc};
use serde_json::{Number, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Converter bound to one formatter.
#[derive(Clone)]
pub struct ValueConverter {
    formatter: Arc<dyn Formatter>,
}

impl std::fmt::Debug for ValueConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueConverter")
            .field("formatter", &self.formatter.name())
            .finish()
    }
}

impl ValueConverter {
    pub fn new(formatter: Arc<dyn Formatter>) -> Self {
        Self { formatter }
    }

    pub fn formatter(&self) -> &Arc<dyn Formatter> {
        &self.formatter
    }

    /// Convert `value` to the canonical tree of `target`, or `None`.
    pub fn try_convert(&self, value: Value, target: &TypeTag) -> Option<Value> {
        if let Ok(converted) = target.normalize(value.clone()) {
            return Some(converted);
        }

        if let Some(converted) = coerce_and_normalize(value.clone(), target) {
            return Some(converted);
        }

        if let Value::String(text) = &value {
            if let Ok(tree) = serde_json::from_str::<Value>(text) {
                if let Some(converted) = normalize_or_coerce(tree, target) {
                    return Some(converted);
                }
            }
        }

        let round_trip = self
            .formatter
            .serialize_value(&value)
            .and_then(|bytes| self.formatter.deserialize_value(&bytes));
        if let Ok(tree) = round_trip {
            if let Some(converted) = normalize_or_coerce(tree, target) {
                return Some(converted);
            }
        }

        debug!("No conversion of {} to {}", value, target.name());
        None
    }

    /// Convert `value` into `T`.
    pub fn convert_to<T: RemoteType>(&self, value: Value) -> Result<T> {
        let tag = T::type_tag();
        let converted = self
            .try_convert(value, &tag)
            .ok_or_else(|| CallwireError::Conversion {
                target: tag.name().to_string(),
                message: "value has an incompatible shape".to_string(),
            })?;
        Ok(serde_json::from_value(converted)?)
    }

    /// Decode one argument payload and convert it to `target`.
    pub fn decode_argument(&self, payload: &[u8], target: &TypeTag) -> Result<Value> {
        let tree = self.formatter.deserialize_value(payload)?;
        self.try_convert(tree, target)
            .ok_or_else(|| CallwireError::Conversion {
                target: target.name().to_string(),
                message: "argument has an incompatible shape".to_string(),
            })
    }

    /// Decode a full argument list into `A`.
    pub fn decode_arguments<A: FromArguments>(&self, payloads: &[Vec<u8>]) -> Result<A> {
        let tags = A::parameter_tags();
        if tags.len() != payloads.len() {
            return Err(CallwireError::protocol(format!(
                "expected {} arguments, got {}",
                tags.len(),
                payloads.len()
            )));
        }
        let values = payloads
            .iter()
            .zip(tags.iter())
            .map(|(payload, tag)| self.decode_argument(payload, tag))
            .collect::<Result<Vec<_>>>()?;
        A::from_values(values)
    }
}

fn normalize_or_coerce(value: Value, target: &TypeTag) -> Option<Value> {
    target
        .normalize(value.clone())
        .ok()
        .or_else(|| coerce_and_normalize(value, target))
}

fn coerce_and_normalize(value: Value, target: &TypeTag) -> Option<Value> {
    let coerced = coerce(value, target.kind())?;
    target.normalize(coerced).ok()
}

fn coerce(value: Value, kind: &ValueKind) -> Option<Value> {
    match kind {
        ValueKind::Unit => value.is_null().then_some(Value::Null),
        ValueKind::Bool => match value {
            Value::Bool(b) => Some(Value::Bool(b)),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Some(Value::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Some(Value::Bool(false)),
            Value::Number(n) => match n.as_u64() {
                Some(0) => Some(Value::Bool(false)),
                Some(1) => Some(Value::Bool(true)),
                _ => None,
            },
            _ => None,
        },
        ValueKind::Integer { signed, bits } => {
            let wide = match &value {
                Value::Number(n) => integer_of(n)?,
                Value::String(s) => s.trim().parse::<i128>().ok()?,
                _ => return None,
            };
            let (min, max) = integer_range(*signed, *bits);
            if wide < min || wide > max {
                return None;
            }
            if *signed {
                Some(Value::Number(Number::from(i64::try_from(wide).ok()?)))
            } else {
                Some(Value::Number(Number::from(u64::try_from(wide).ok()?)))
            }
        }
        ValueKind::Float => {
            let float = match &value {
                Value::Number(n) => n.as_f64()?,
                Value::String(s) => s.trim().parse::<f64>().ok()?,
                _ => return None,
            };
            Number::from_f64(float).map(Value::Number)
        }
        ValueKind::Text => match value {
            Value::String(s) => Some(Value::String(s)),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        ValueKind::Guid => match value {
            Value::String(s) => Uuid::parse_str(s.trim())
                .ok()
                .map(|id| Value::String(id.to_string())),
            _ => None,
        },
        ValueKind::Duration => {
            let duration = match &value {
                Value::String(s) => parse_duration(s)?,
                Value::Number(n) => Duration::try_from_secs_f64(n.as_f64()?).ok()?,
                _ => return None,
            };
            serde_json::to_value(duration).ok()
        }
        ValueKind::Timestamp => {
            let timestamp: DateTime<Utc> = match &value {
                Value::String(s) => {
                    DateTime::parse_from_rfc3339(s.trim()).ok()?.with_timezone(&Utc)
                }
                Value::Number(n) => DateTime::from_timestamp(n.as_i64()?, 0)?,
                _ => return None,
            };
            serde_json::to_value(timestamp).ok()
        }
        ValueKind::Enum(variants) => match &value {
            Value::String(s) => variants
                .iter()
                .find(|variant| variant.eq_ignore_ascii_case(s.trim()))
                .map(|variant| Value::String(variant.to_string())),
            Value::Number(n) => {
                let ordinal = usize::try_from(n.as_u64()?).ok()?;
                variants
                    .get(ordinal)
                    .map(|variant| Value::String(variant.to_string()))
            }
            _ => None,
        },
        ValueKind::Sequence(element) => match value {
            Value::Array(items) => Some(Value::Array(
                items
                    .into_iter()
                    .map(|item| coerce(item.clone(), element).unwrap_or(item))
                    .collect(),
            )),
            _ => None,
        },
        ValueKind::Optional(inner) => match value {
            Value::Null => Some(Value::Null),
            other => coerce(other, inner),
        },
        ValueKind::Structured => None,
    }
}

fn integer_of(n: &Number) -> Option<i128> {
    if let Some(i) = n.as_i64() {
        return Some(i128::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Some(i128::from(u));
    }
    let f = n.as_f64()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1.8e19 {
        Some(f as i128)
    } else {
        None
    }
}

fn integer_range(signed: bool, bits: u8) -> (i128, i128) {
    let bits = u32::from(bits.clamp(8, 64));
    if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    }
}

/// Parse `hh:mm:ss[.fraction]`, `d.hh:mm:ss[.fraction]`, or `<number><ms|s|m|h>`.
fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();

    for (suffix, scale) in [("ms", 0.001), ("s", 1.0), ("m", 60.0), ("h", 3600.0)] {
        if let Some(number) = text.strip_suffix(suffix) {
            let amount: f64 = number.trim().parse().ok()?;
            return Duration::try_from_secs_f64(amount * scale).ok();
        }
    }

    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let (days, hours) = match parts[0].split_once('.') {
        Some((days, hours)) => (days.parse::<u64>().ok()?, hours.parse::<u64>().ok()?),
        None => (0, parts[0].parse::<u64>().ok()?),
    };
    let minutes: u64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;
    if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return None;
    }

    let whole = days
        .checked_mul(86_400)?
        .checked_add(hours.checked_mul(3_600)?)?
        .checked_add(minutes * 60)?;
    Duration::from_secs(whole).checked_add(Duration::try_from_secs_f64(seconds).ok()?)
}

/// A typed argument list that can be rebuilt from converted values.
pub trait FromArguments: Sized + Send + 'static {
    fn parameter_tags() -> Vec<TypeTag>;

    /// Build from values already converted to [`parameter_tags`](Self::parameter_tags).
    fn from_values(values: Vec<Value>) -> Result<Self>;
}

macro_rules! impl_from_arguments {
    ($($arg:ident),*) => {
        impl<$($arg: RemoteType,)*> FromArguments for ($($arg,)*) {
            fn parameter_tags() -> Vec<TypeTag> {
                vec![$($arg::type_tag()),*]
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn from_values(values: Vec<Value>) -> Result<Self> {
                let mut values = values.into_iter();
                $(
                    let $arg: $arg = serde_json::from_value(
                        values
                            .next()
                            .ok_or_else(|| CallwireError::protocol("missing argument"))?,
                    )?;
                )*
                Ok(($($arg,)*))
            }
        }
    };
}

impl_from_arguments!();
impl_from_arguments!(A1);
impl_from_arguments!(A1, A2);
impl_from_arguments!(A1, A2, A3);
impl_from_arguments!(A1, A2, A3, A4);
impl_from_arguments!(A1, A2, A3, A4, A5);
impl_from_arguments!(A1, A2, A3, A4, A5, A6);
