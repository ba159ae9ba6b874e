//! Per-worker poll cycle state
//!
//! [`PollerContext`] is the `C` of the worker's [`Engine`]: every request
//! continuation gets it mutably. It tracks each attribute's stage chain
//! for the current cycle, owns the [`PollerBuffer`] and collects finished
//! [`MetricResult`]s until the worker ships them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, trace, warn};

use crate::{Attribute, AttributeId};

use super::{
    Engine, MetricResult, PluginRegistry, PollJob, PollValue, PollerBuffer, StageValue,
};

#[derive(Debug)]
struct ChainState {
    attribute: Arc<Attribute>,
    cycle: u64,
    stage: usize,
    values: Vec<StageValue>,
    /// Flag returned by the running stage's `poll`; `None` while it runs
    flag: Option<bool>,
    callback_received: bool,
}

#[derive(Debug)]
pub struct PollerContext {
    pub buffer: PollerBuffer,
    registry: Arc<PluginRegistry>,
    chains: HashMap<AttributeId, ChainState>,
    outbox: Vec<MetricResult>,
    cycle: u64,
}

impl PollerContext {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            buffer: PollerBuffer::new(),
            registry,
            chains: HashMap::new(),
            outbox: vec![],
            cycle: 0,
        }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Attributes whose chain has not finished yet
    pub fn in_progress(&self) -> usize {
        self.chains.len()
    }

    /// Start a new poll cycle over `attributes`
    ///
    /// Chains left over from the previous cycle are expired first.
    pub fn start_cycle(&mut self, engine: &mut Engine, attributes: &[Arc<Attribute>]) -> u64 {
        self.expire_unfinished();
        self.cycle += 1;
        debug!(cycle = self.cycle, attributes = attributes.len(), "starting poll cycle");

        for attribute in attributes {
            if attribute.pollers.is_empty() {
                trace!(attribute = attribute.id, "no pollers configured");
                continue;
            }

            self.chains.insert(
                attribute.id,
                ChainState {
                    attribute: attribute.clone(),
                    cycle: self.cycle,
                    stage: 0,
                    values: vec![],
                    flag: None,
                    callback_received: false,
                },
            );
            self.run_stage(engine, attribute.id);
        }

        self.cycle
    }

    /// Report the value of a stage
    ///
    /// Values for a stage that already reported, or for an earlier cycle,
    /// are dropped.
    pub fn poller_callback(&mut self, engine: &mut Engine, job: &PollJob, value: PollValue) {
        let attribute_id = job.attribute.id;
        let Some(chain) = self.chains.get_mut(&attribute_id) else {
            debug!(attribute = attribute_id, cycle = job.cycle, "callback for finished chain ignored");
            return;
        };
        if chain.cycle != job.cycle || chain.stage != job.stage || chain.callback_received {
            debug!(attribute = attribute_id, cycle = job.cycle, stage = job.stage, "stale callback ignored");
            return;
        }

        let poller = chain.attribute.pollers[chain.stage].plugin.clone();
        trace!(attribute = attribute_id, %poller, %value, "stage finished");
        chain.values.push(StageValue { poller, value });
        chain.callback_received = true;

        // still inside the plugin's poll, run_stage picks it up from here
        if let Some(flag) = chain.flag {
            self.advance(engine, attribute_id, flag);
        }
    }

    /// Hand out every finished result
    pub fn drain_results(&mut self) -> Vec<MetricResult> {
        std::mem::take(&mut self.outbox)
    }

    /// Drop all chains that did not finish, clearing their buffers
    pub fn expire_unfinished(&mut self) -> usize {
        let expired = self.chains.len();
        for (attribute_id, chain) in self.chains.drain() {
            warn!(
                attribute = attribute_id,
                cycle = chain.cycle,
                stage = chain.stage,
                "no result this cycle"
            );
            self.buffer.finalize(attribute_id);
        }
        expired
    }

    fn run_stage(&mut self, engine: &mut Engine, attribute_id: AttributeId) {
        let Some(chain) = self.chains.get_mut(&attribute_id) else {
            return;
        };
        let Some(stage) = chain.attribute.pollers.get(chain.stage).cloned() else {
            self.finish(attribute_id);
            return;
        };

        chain.flag = None;
        chain.callback_received = false;

        let job = PollJob {
            attribute: chain.attribute.clone(),
            params: stage.params,
            cycle: chain.cycle,
            stage: chain.stage,
        };

        let plugin = self.registry.get(&stage.plugin);
        let flag = match plugin {
            Some(plugin) => plugin.poll(job.clone(), engine, self),
            None => {
                warn!(attribute = attribute_id, plugin = %stage.plugin, "unknown poller plugin");
                let reason = format!("unknown poller {}", stage.plugin);
                self.poller_callback(engine, &job, PollValue::invalid(reason));
                false
            }
        };

        let Some(chain) = self.chains.get_mut(&attribute_id) else {
            return;
        };
        if chain.cycle != job.cycle || chain.stage != job.stage {
            return;
        }
        chain.flag = Some(flag);

        if chain.callback_received {
            self.advance(engine, attribute_id, flag);
        }
    }

    fn advance(&mut self, engine: &mut Engine, attribute_id: AttributeId, proceed: bool) {
        let Some(chain) = self.chains.get_mut(&attribute_id) else {
            return;
        };

        if proceed && chain.stage + 1 < chain.attribute.pollers.len() {
            chain.stage += 1;
            self.run_stage(engine, attribute_id);
        } else {
            self.finish(attribute_id);
        }
    }

    fn finish(&mut self, attribute_id: AttributeId) {
        let Some(chain) = self.chains.remove(&attribute_id) else {
            return;
        };
        self.buffer.finalize(attribute_id);

        debug!(
            attribute = attribute_id,
            cycle = chain.cycle,
            stages = chain.values.len(),
            "attribute polled"
        );
        self.outbox.push(MetricResult {
            attribute_id,
            cycle: chain.cycle,
            timestamp: Utc::now(),
            values: chain.values,
        });
    }
}
