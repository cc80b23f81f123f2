//! Running per-group aggregation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::key_fragment;
use crate::context::ProcessorContext;
use crate::core::StreamItem;
use crate::errors::ProcessorError;
use crate::processors::{Processor, ProcessorOutput};

/// Group key used when no `groupBy` field is configured.
pub const DEFAULT_GROUP: &str = "all";

/// Aggregation operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationOp {
    /// Number of items seen.
    Count,
    /// Sum of numeric values; stays integral while every input is.
    Sum,
    /// Exact mean from a hidden sum/count pair.
    Avg,
    /// Smallest numeric value.
    Min,
    /// Largest numeric value.
    Max,
    /// First observed value.
    First,
    /// Most recent value.
    Last,
    /// Every observed value, in arrival order.
    Collect,
}

impl AggregationOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::First => "first",
            Self::Last => "last",
            Self::Collect => "collect",
        }
    }
}

/// One configured aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    /// Payload field to read. Ignored by `count`.
    #[serde(default)]
    pub field: Option<String>,
    /// The operator.
    pub operation: AggregationOp,
    /// Output name; defaults to `{operation}_{field}`.
    #[serde(default)]
    pub alias: Option<String>,
}

impl Aggregation {
    /// Creates an aggregation over `field`.
    #[must_use]
    pub fn new(operation: AggregationOp, field: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            operation,
            alias: None,
        }
    }

    /// Sets the alias.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Output name of this aggregation.
    #[must_use]
    pub fn output_name(&self) -> String {
        match (&self.alias, &self.field) {
            (Some(alias), _) => alias.clone(),
            (None, Some(field)) => format!("{}_{field}", self.operation.as_str()),
            (None, None) => self.operation.as_str().to_string(),
        }
    }
}

/// Running state for one `(group, alias)` pair.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Accumulator {
    #[serde(default)]
    value: Value,
    #[serde(default)]
    sum: f64,
    #[serde(default)]
    count: u64,
}

impl Accumulator {
    /// Folds one input in. An input that would push `sum` or `avg` past the
    /// finite range is rejected and leaves the accumulator unchanged.
    fn apply(&mut self, op: AggregationOp, input: Option<&Value>) -> Result<(), Overflow> {
        let number = input.filter(|v| v.is_number());
        match op {
            AggregationOp::Count => {
                self.count += 1;
                self.value = json!(self.count);
            }
            AggregationOp::Sum => {
                if let Some(n) = number {
                    let base = if self.value.is_null() { json!(0) } else { self.value.clone() };
                    self.value = add_numbers(&base, n).ok_or(Overflow)?;
                } else if self.value.is_null() {
                    self.value = json!(0);
                }
            }
            AggregationOp::Avg => {
                if let Some(n) = number.and_then(Value::as_f64) {
                    let sum = self.sum + n;
                    if !sum.is_finite() {
                        return Err(Overflow);
                    }
                    self.sum = sum;
                    self.count += 1;
                }
                if self.count > 0 {
                    #[allow(clippy::cast_precision_loss)]
                    let mean = self.sum / self.count as f64;
                    self.value = json!(mean);
                }
            }
            AggregationOp::Min | AggregationOp::Max => {
                if let Some(n) = number {
                    let replace = match (self.value.as_f64(), n.as_f64()) {
                        (None, _) => true,
                        (Some(current), Some(candidate)) if op == AggregationOp::Min => {
                            candidate < current
                        }
                        (Some(current), Some(candidate)) => candidate > current,
                        (Some(_), None) => false,
                    };
                    if replace {
                        self.value = n.clone();
                    }
                }
            }
            AggregationOp::First => {
                if self.count == 0 {
                    self.value = input.cloned().unwrap_or(Value::Null);
                }
                self.count += 1;
            }
            AggregationOp::Last => {
                self.value = input.cloned().unwrap_or(Value::Null);
            }
            AggregationOp::Collect => {
                let entry = input.cloned().unwrap_or(Value::Null);
                match &mut self.value {
                    Value::Array(values) => values.push(entry),
                    other => *other = Value::Array(vec![entry]),
                }
            }
        }
        Ok(())
    }
}

/// A running result left the finite range.
#[derive(Debug, Clone, Copy)]
struct Overflow;

/// Adds two JSON numbers, keeping integer precision when both are integers.
///
/// Returns `None` if the float sum is not finite.
fn add_numbers(a: &Value, b: &Value) -> Option<Value> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(total) = x.checked_add(y) {
            return Some(json!(total));
        }
    }
    let total = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
    serde_json::Number::from_f64(total).map(Value::Number)
}

/// Reads the configured aggregations from stage params.
///
/// Accepts either an `aggregations` array or a single inline
/// `operation`/`field`/`alias` triple.
fn aggregations(ctx: &ProcessorContext) -> Result<Vec<Aggregation>, ProcessorError> {
    if let Some(list) = ctx.param("aggregations") {
        let parsed: Vec<Aggregation> = serde_json::from_value(list)
            .map_err(|e| ProcessorError::invalid_param("aggregations", e.to_string()))?;
        if parsed.is_empty() {
            return Err(ProcessorError::invalid_param("aggregations", "must not be empty"));
        }
        return Ok(parsed);
    }
    let Some(operation) = ctx.param("operation") else {
        return Err(ProcessorError::invalid_param(
            "aggregations",
            "expected an aggregations list or an operation",
        ));
    };
    let operation: AggregationOp = serde_json::from_value(operation)
        .map_err(|e| ProcessorError::invalid_param("operation", e.to_string()))?;
    Ok(vec![Aggregation {
        field: ctx.param_str("field"),
        operation,
        alias: ctx.param_str("alias"),
    }])
}

/// Maintains a running aggregate per group and emits it for every item.
///
/// State lives under `agg:{stage}:{group}:{alias}` in the pipeline store.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateProcessor;

#[async_trait]
impl Processor for AggregateProcessor {
    fn name(&self) -> &str {
        "aggregate"
    }

    async fn process(
        &self,
        item: StreamItem,
        ctx: &ProcessorContext,
    ) -> Result<ProcessorOutput, ProcessorError> {
        let specs = aggregations(ctx)?;
        let group = match ctx.param_str("groupBy") {
            Some(field) => item.field(&field).map_or_else(|| "null".to_string(), key_fragment),
            None => DEFAULT_GROUP.to_string(),
        };

        let mut result = serde_json::Map::new();
        result.insert("group".to_string(), json!(group));
        for spec in &specs {
            let alias = spec.output_name();
            let key = format!("agg:{}:{group}:{alias}", ctx.stage_id());
            let input = spec.field.as_deref().and_then(|f| item.field(f));
            let value = ctx.state().update_typed::<Accumulator, _, _>(&key, |acc| {
                acc.apply(spec.operation, input).map(|()| acc.value.clone())
            })?;
            let value = value.map_err(|Overflow| ProcessorError::NumericOverflow(alias.clone()))?;
            result.insert(alias, value);
        }

        Ok(ProcessorOutput::One(item.with_payload(Value::Object(result))))
    }
}
