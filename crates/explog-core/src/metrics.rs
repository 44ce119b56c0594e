//! Scalar metric records.
//!
//! [`RunLogger::log_metrics`](crate::RunLogger::log_metrics) accepts any
//! serializable object, and `serde_json` turns NaN and infinities into `null`
//! there. [`Metrics`] records go through
//! [`RunLogger::log_scalars`](crate::RunLogger::log_scalars), which refuses
//! non-finite values instead of storing them as `null`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ExplogError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

/// One metric record, keyed by metric name.
pub type Metrics = BTreeMap<String, MetricValue>;

macro_rules! metric_value_from {
    ($variant:ident: $($ty:ty),+) => {
        $(impl From<$ty> for MetricValue {
            fn from(v: $ty) -> Self {
                MetricValue::$variant(v.into())
            }
        })+
    };
}

metric_value_from!(Int: i64, i32, u32);
metric_value_from!(Float: f64, f32);
metric_value_from!(Bool: bool);
metric_value_from!(Text: String, &str);

/// Reject records JSON cannot represent faithfully.
pub fn check_finite(metrics: &Metrics) -> Result<()> {
    for (name, value) in metrics {
        if let MetricValue::Float(v) = value {
            if !v.is_finite() {
                return Err(ExplogError::InvalidMetrics(format!("non-finite value {v} for {name}")));
            }
        }
    }
    Ok(())
}
