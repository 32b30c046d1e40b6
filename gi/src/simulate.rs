//! In-memory requirer/provider round trip
//!
//! Drives both sides over [`MemoryRelation`]s with explicit replication
//! between them, including a replayed notification and a re-request, and
//! records the readiness seen after each step.

use serde::Serialize;
use tracing::debug;
use unitstore::MemoryStore;

use crate::channel::{ChannelEvent, MemoryRelation, Relation};
use crate::config::Config;
use crate::error::IntegrationError;
use crate::identity::StaticMetadata;
use crate::provider::Provider;
use crate::request::InstanceLabels;
use crate::requirer::{Readiness, Requirer};

const PROVIDER_UNIT: &str = "gcp-integrator/0";

/// Outcome of one simulation step
#[derive(Debug, Clone, Serialize)]
pub struct SimulationStep {
    pub description: String,
    pub readiness: Readiness,
    /// Requests the provider surfaced during this step
    pub pending: usize,
}

struct Simulation {
    requirer: Requirer<StaticMetadata, MemoryStore>,
    provider: Provider<MemoryStore>,
    requirer_rel: MemoryRelation,
    provider_rel: MemoryRelation,
    requirer_unit: String,
    steps: Vec<SimulationStep>,
}

impl Simulation {
    fn record(&mut self, description: &str, pending: usize) {
        let readiness = self.requirer.evaluate(Some(&self.requirer_rel));
        debug!(%description, ?readiness, pending, "Simulation::record: called");
        self.steps.push(SimulationStep {
            description: description.to_string(),
            readiness,
            pending,
        });
    }

    /// Replicate requirer -> provider, fulfil everything pending, replicate back
    fn provider_round(&mut self) -> Result<usize, IntegrationError> {
        let event = self
            .provider_rel
            .replicate(&self.requirer_unit, self.requirer_rel.local())
            .unwrap_or(ChannelEvent::Changed(self.requirer_unit.clone()));
        let pending = self.provider.handle(&mut self.provider_rel, &event)?;
        for request in &pending {
            self.provider.mark_completed(&mut self.provider_rel, request)?;
        }
        self.requirer_rel.replicate(PROVIDER_UNIT, self.provider_rel.local());
        Ok(pending.len())
    }
}

/// Run the scripted round trip for a requirer on `instance` in `zone`
pub async fn run_simulation(config: &Config, instance: &str, zone: &str) -> Result<Vec<SimulationStep>, IntegrationError> {
    let mut sim = Simulation {
        requirer: Requirer::from_config(config, StaticMetadata::new(instance, zone), MemoryStore::new()),
        provider: Provider::new(config.endpoint.clone(), MemoryStore::new()),
        requirer_rel: MemoryRelation::new(),
        provider_rel: MemoryRelation::new(),
        requirer_unit: format!("{}/0", config.charm),
        steps: Vec::new(),
    };

    let readiness = sim.requirer.evaluate::<MemoryRelation>(None);
    sim.steps.push(SimulationStep {
        description: "no relation".to_string(),
        readiness,
        pending: 0,
    });

    let joined = sim.requirer_rel.join(PROVIDER_UNIT);
    sim.provider_rel.join(sim.requirer_unit.clone());
    sim.requirer.handle(Some(&mut sim.requirer_rel), &joined).await?;
    sim.record("joined, instance info published", 0);

    let mut labels = InstanceLabels::new();
    labels.insert("simulated".to_string(), Some("true".to_string()));
    labels.insert("owner".to_string(), None);
    sim.requirer.tag_instance(&mut sim.requirer_rel, labels);
    sim.requirer.enable_instance_inspection(&mut sim.requirer_rel);
    sim.requirer.enable_dns_management(&mut sim.requirer_rel);
    sim.record("labels and capabilities requested", 0);

    let pending = sim.provider_round()?;
    sim.record("provider fulfilled request", pending);

    let pending = sim.provider_round()?;
    sim.record("notification replayed", pending);

    sim.requirer
        .enable_object_storage_access(&mut sim.requirer_rel, Some(vec!["simulated-bucket/*".to_string()]));
    sim.record("object storage access requested", 0);

    let pending = sim.provider_round()?;
    sim.record("provider fulfilled re-request", pending);

    let readiness = sim.requirer.evaluate_event(Some(&sim.requirer_rel), &ChannelEvent::Broken);
    sim.steps.push(SimulationStep {
        description: "relation broken".to_string(),
        readiness,
        pending: 0,
    });

    Ok(sim.steps)
}
