// ── Value transforms ──
//
// Catalog-driven post-processing between the classified device value and
// what the store holds. The store treats the output as opaque.

use crate::catalog::EntityDescriptor;
use crate::value::Value;

/// Readings at or below this are the device's "no sensor" marker.
pub const DEFAULT_SENTINEL_THRESHOLD: f64 = -80.0;

/// Turns a classified value into the value the store keeps.
///
/// Returning `None` means "no reading": the store keeps its last good
/// sample.
pub trait ValueTransform: Send + Sync {
    fn transform(&self, descriptor: Option<&EntityDescriptor>, value: Value) -> Option<Value>;
}

/// Applies sentinel detection, value maps, rounding, and percent clamping
/// from the entity's catalog entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CatalogTransform {
    pub sentinel_threshold: f64,
}

impl Default for CatalogTransform {
    fn default() -> Self {
        Self {
            sentinel_threshold: DEFAULT_SENTINEL_THRESHOLD,
        }
    }
}

impl CatalogTransform {
    pub fn new(sentinel_threshold: f64) -> Self {
        Self { sentinel_threshold }
    }

    /// Whether `value` is a sentinel reading for this descriptor.
    pub fn is_sentinel(&self, descriptor: &EntityDescriptor, value: &Value) -> bool {
        descriptor.is_temperature()
            && value
                .as_f64()
                .is_some_and(|v| v <= self.sentinel_threshold)
    }
}

impl ValueTransform for CatalogTransform {
    fn transform(&self, descriptor: Option<&EntityDescriptor>, value: Value) -> Option<Value> {
        let Some(descriptor) = descriptor else {
            return Some(value);
        };

        if !descriptor.value_map.is_empty() {
            let key = value
                .as_index()
                .map_or_else(|| value.to_string(), |i| i.to_string());
            return Some(match descriptor.value_map.get(&key) {
                Some(label) => Value::Text(label.clone()),
                None => value,
            });
        }

        // "0"/"1" classify as booleans but are plain numbers on a measured register.
        let value = match value {
            Value::Bool(b) if is_numeric(descriptor) => Value::Int(i64::from(b)),
            other => other,
        };

        if self.is_sentinel(descriptor, &value) {
            return None;
        }

        let mut value = match (descriptor.precision, value.as_f64()) {
            (Some(0), Some(v)) => round_to_int(v),
            (Some(digits), Some(v)) => Value::Float(round(v, digits)),
            (None, _) | (_, None) => value,
        };

        if descriptor.is_percentage() {
            value = clamp_percent(value);
        }

        Some(value)
    }
}

fn is_numeric(descriptor: &EntityDescriptor) -> bool {
    descriptor.unit.is_some() || descriptor.precision.is_some()
}

fn round(v: f64, digits: u8) -> f64 {
    let factor = 10f64.powi(i32::from(digits));
    (v * factor).round() / factor
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn round_to_int(v: f64) -> Value {
    let r = v.round();
    if r.is_finite() && r.abs() < 9.0e15 {
        Value::Int(r as i64)
    } else {
        Value::Float(r)
    }
}

fn clamp_percent(value: Value) -> Value {
    match value {
        Value::Int(i) => Value::Int(i.clamp(0, 100)),
        Value::Float(f) => Value::Float(f.clamp(0.0, 100.0)),
        other => other,
    }
}
