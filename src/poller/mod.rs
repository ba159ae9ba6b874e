//! Poller plugins and the per-worker state they operate on
//!
//! An attribute carries an ordered chain of poller stages. Every stage is
//! run by a [`PollerPlugin`] looked up in the [`PluginRegistry`]; the
//! plugin submits requests to the [`Engine`] and eventually reports one
//! value through [`PollerContext::poller_callback`]. The boolean returned
//! by [`PollerPlugin::poll`] decides whether the chain continues.

pub mod buffer;
pub mod context;
pub mod plugins;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::RequestEngine;
use crate::{Attribute, AttributeId};

pub use buffer::PollerBuffer;
pub use context::PollerContext;

/// Request engine as used by the poller plugins
pub type Engine = RequestEngine<PollerContext>;

/// Value produced by one poller stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PollValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Tuple(Vec<PollValue>),
}

impl PollValue {
    /// `("invalid", reason)`, the value of a misconfigured stage
    pub fn invalid(reason: impl Into<String>) -> Self {
        PollValue::Tuple(vec![
            PollValue::Text("invalid".to_string()),
            PollValue::Text(reason.into()),
        ])
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PollValue::Null)
    }
}

impl fmt::Display for PollValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollValue::Null => write!(f, "null"),
            PollValue::Int(v) => write!(f, "{v}"),
            PollValue::Float(v) => write!(f, "{v}"),
            PollValue::Text(v) => write!(f, "{v}"),
            PollValue::Tuple(values) => {
                write!(f, "(")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<i64> for PollValue {
    fn from(value: i64) -> Self {
        PollValue::Int(value)
    }
}

impl From<f64> for PollValue {
    fn from(value: f64) -> Self {
        PollValue::Float(value)
    }
}

impl From<&str> for PollValue {
    fn from(value: &str) -> Self {
        PollValue::Text(value.to_string())
    }
}

impl From<String> for PollValue {
    fn from(value: String) -> Self {
        PollValue::Text(value)
    }
}

impl<T: Into<PollValue>> From<Option<T>> for PollValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(PollValue::Null, Into::into)
    }
}

/// Value of one stage inside a [`MetricResult`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageValue {
    pub poller: String,
    pub value: PollValue,
}

/// Outcome of one attribute's poller chain in one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub attribute_id: AttributeId,
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub values: Vec<StageValue>,
}

impl MetricResult {
    /// Value reported by the named poller, if it ran
    pub fn value_of(&self, poller: &str) -> Option<&PollValue> {
        self.values
            .iter()
            .find(|stage| stage.poller == poller)
            .map(|stage| &stage.value)
    }
}

/// One stage invocation handed to a plugin
#[derive(Debug, Clone)]
pub struct PollJob {
    pub attribute: Arc<Attribute>,
    pub params: String,
    pub cycle: u64,
    pub stage: usize,
}

/// A poller stage implementation
///
/// `poll` must call [`PollerContext::poller_callback`] exactly once for
/// the job, either synchronously or from a request continuation. The
/// return value is the continue/stop flag of the chain.
pub trait PollerPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn poll(&self, job: PollJob, engine: &mut Engine, ctx: &mut PollerContext) -> bool;
}

/// Plugins by name
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: HashMap<&'static str, Arc<dyn PollerPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in plugin
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(plugins::tcp::TcpStatus);
        registry.register(plugins::tcp::TcpContent);
        registry.register(plugins::tcp::SnmpTcpEstablished);
        registry.register(plugins::cisco_saagent::CiscoSaAgent);
        registry.register(plugins::snmp::SnmpValuePoller);
        registry
    }

    pub fn register(&mut self, plugin: impl PollerPlugin + 'static) {
        self.plugins.insert(plugin.name(), Arc::new(plugin));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PollerPlugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.plugins.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}
