//! The seam between the evaluation loop and a concrete model family.

use crate::data::BatchCursor;
use crate::error::EvalResult;
use crate::hooks::SessionHook;
use crate::session::EvalSession;
use crate::tensor::ParameterSet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Named scalar metrics produced by one step.
///
/// Serialized as a JSON object. JSON has no NaN or infinity, so those are
/// written as the strings `"NaN"`, `"inf"` and `"-inf"`; a `null` read back
/// is taken as NaN.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    values: BTreeMap<String, f64>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum MetricValue {
    Number(f64),
    Special(String),
}

impl MetricValue {
    fn encode(value: f64) -> Self {
        if value.is_finite() {
            Self::Number(value)
        } else if value.is_nan() {
            Self::Special("NaN".to_string())
        } else if value > 0.0 {
            Self::Special("inf".to_string())
        } else {
            Self::Special("-inf".to_string())
        }
    }

    fn decode(self) -> Result<f64, String> {
        match self {
            Self::Number(v) => Ok(v),
            Self::Special(s) => match s.as_str() {
                "NaN" | "nan" => Ok(f64::NAN),
                "inf" | "+inf" | "Infinity" => Ok(f64::INFINITY),
                "-inf" | "-Infinity" => Ok(f64::NEG_INFINITY),
                other => Err(format!("invalid metric value '{other}'")),
            },
        }
    }
}

impl Serialize for Summary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.values.iter().map(|(k, v)| (k, MetricValue::encode(*v))))
    }
}

impl<'de> Deserialize<'de> for Summary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Option<MetricValue>>::deserialize(deserializer)?;
        let mut values = BTreeMap::new();
        for (name, value) in raw {
            let value = match value {
                Some(v) => v.decode().map_err(serde::de::Error::custom)?,
                None => f64::NAN,
            };
            values.insert(name, value);
        }
        Ok(Self { values })
    }
}

impl Summary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    #[must_use]
    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<BTreeMap<String, f64>> for Summary {
    fn from(values: BTreeMap<String, f64>) -> Self {
        Self { values }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Summary(Summary),
    /// The data cursor ran out. Expected; ends the pass normally.
    Exhausted,
}

/// One materialised evaluation graph: its variables plus whatever state it
/// needs to consume batches (cursor, streaming metric accumulators).
pub trait EvalGraph: Send {
    fn variables(&self) -> &ParameterSet;

    fn variables_mut(&mut self) -> &mut ParameterSet;

    fn run_step(&mut self) -> EvalResult<StepOutcome>;
}

/// Builds a fresh graph for every evaluation pass.
pub trait GraphBuilder: Send + Sync {
    fn name(&self) -> &str;

    /// `data` is `None` when the loop was configured without a dataset.
    fn create_graph(&self, data: Option<BatchCursor>, batch_size: usize) -> EvalResult<Box<dyn EvalGraph>>;

    /// Extra hooks for the pass; called after the graph exists and before
    /// the checkpoint is restored.
    fn create_hooks(&self, _graph: &dyn EvalGraph) -> Vec<Box<dyn SessionHook>> {
        Vec::new()
    }

    fn step(&self, session: &mut EvalSession) -> EvalResult<StepOutcome> {
        session.run_step()
    }
}
