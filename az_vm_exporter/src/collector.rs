//! The scrape collector.
//!
//! On every scrape [`VmCollector`] lists the virtual machines of one resource
//! group, reads each machine's power state and returns a single `az_vm_info`
//! gauge family. Nothing is retained between scrapes. Any failed call fails
//! the whole collection: a partial family would be indistinguishable from
//! VMs having disappeared.
//!
//! ## Metrics
//!
//! `az_vm_exporter_scrapes_total`: Total collections attempted
//! `az_vm_exporter_scrape_errors_total`: Total collections that failed
//! `az_vm_exporter_scrape_duration_seconds`: Duration of the last collection
//! `az_vm_exporter_vms`: VMs seen by the last successful collection
//!

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use azure_compute::{ComputeApi, PowerStateError, client};
use metrics::{counter, gauge};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{family::Family, gauge::Gauge},
    registry::Registry,
};
use tracing::{debug, info, warn};

/// Name of the collected gauge family.
pub const VM_INFO: &str = "az_vm_info";
// The encoder terminates help text with a period.
const VM_INFO_HELP: &str = "Node information for node counts etc";

/// Label set of [`VM_INFO`], encoded in field order.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct VmInfoLabels {
    /// VM name
    pub vm_name: String,
    /// Hardware profile size
    pub vm_sku: String,
    /// Azure region
    pub vm_location: String,
    /// Display power state
    pub vm_power_state: String,
}

/// Errors produced by [`Collector`] implementations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The virtual machine listing failed.
    #[error("failed to list virtual machines in {resource_group}: {source}")]
    List {
        /// The resource group being listed
        resource_group: String,
        /// Underlying client error
        #[source]
        source: client::Error,
    },
    /// The instance view of one VM could not be fetched.
    #[error("failed to fetch instance view of {vm}: {source}")]
    InstanceView {
        /// The VM name
        vm: String,
        /// Underlying client error
        #[source]
        source: client::Error,
    },
    /// The instance view of one VM carried no usable power state.
    #[error("no power state for {vm}: {source}")]
    PowerState {
        /// The VM name
        vm: String,
        /// Why the power state could not be read
        #[source]
        source: PowerStateError,
    },
}

#[async_trait]
/// A component that, given no arguments, produces a finite set of labeled
/// samples.
pub trait Collector: Send + Sync {
    /// Collect the current metrics into a fresh [`Registry`].
    ///
    /// # Errors
    ///
    /// Returns an error if collection failed; no partial result is produced.
    async fn collect(&self) -> Result<Registry, Error>;
}

/// Point-in-time view of one virtual machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmSnapshot {
    /// VM name
    pub name: String,
    /// Hardware profile size, empty when the provider reported none
    pub sku: String,
    /// Azure region
    pub location: String,
    /// Display power state, e.g. `VM running`
    pub power_state: String,
    /// Unix timestamp, in seconds, at which the power state was read
    pub observed_at: u64,
}

impl VmSnapshot {
    /// The [`VM_INFO`] label set of this VM.
    #[must_use]
    pub fn labels(&self) -> VmInfoLabels {
        VmInfoLabels {
            vm_name: self.name.clone(),
            vm_sku: self.sku.clone(),
            vm_location: self.location.clone(),
            vm_power_state: self.power_state.clone(),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Collects `az_vm_info` for one resource group.
#[derive(Debug)]
pub struct VmCollector<A> {
    api: A,
    resource_group: String,
}

impl<A> VmCollector<A>
where
    A: ComputeApi,
{
    /// Create a new [`VmCollector`]
    #[must_use]
    pub fn new(api: A, resource_group: impl Into<String>) -> Self {
        Self {
            api,
            resource_group: resource_group.into(),
        }
    }

    /// Read a [`VmSnapshot`] for every VM in the resource group, in listing
    /// order.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing, any instance view lookup, or any
    /// power state extraction fails.
    pub async fn snapshots(&self) -> Result<Vec<VmSnapshot>, Error> {
        info!("Pulling VM metrics from Azure");
        let vms = self
            .api
            .list_virtual_machines(&self.resource_group)
            .await
            .map_err(|source| Error::List {
                resource_group: self.resource_group.clone(),
                source,
            })?;

        if vms.is_empty() {
            warn!(
                "No VMs found in resource group {rg}. Did you specify the correct resource group?",
                rg = self.resource_group
            );
        }
        info!(
            "Found {n} VMs in resource group {rg}",
            n = vms.len(),
            rg = self.resource_group
        );

        let mut snapshots = Vec::with_capacity(vms.len());
        for vm in vms {
            debug!("gathering power state for {name}", name = vm.name);
            let view = self
                .api
                .instance_view(&self.resource_group, &vm.name)
                .await
                .map_err(|source| Error::InstanceView {
                    vm: vm.name.clone(),
                    source,
                })?;
            let power_state = view
                .power_state()
                .map_err(|source| Error::PowerState {
                    vm: vm.name.clone(),
                    source,
                })?
                .to_string();

            let sku = if let Some(size) = vm.vm_size() {
                size.to_string()
            } else {
                warn!("VM {name} reported no hardware profile size", name = vm.name);
                String::new()
            };

            snapshots.push(VmSnapshot {
                name: vm.name,
                sku,
                location: vm.location,
                power_state,
                observed_at: unix_now(),
            });
        }
        Ok(snapshots)
    }
}

#[async_trait]
impl<A> Collector for VmCollector<A>
where
    A: ComputeApi,
{
    #[allow(clippy::cast_precision_loss)]
    async fn collect(&self) -> Result<Registry, Error> {
        counter!("az_vm_exporter_scrapes_total").increment(1);
        let start = Instant::now();
        let res = self.snapshots().await;
        gauge!("az_vm_exporter_scrape_duration_seconds").set(start.elapsed().as_secs_f64());

        let snapshots = match res {
            Ok(s) => s,
            Err(err) => {
                counter!("az_vm_exporter_scrape_errors_total").increment(1);
                return Err(err);
            }
        };
        gauge!("az_vm_exporter_vms").set(snapshots.len() as f64);

        let mut registry = Registry::default();
        let family = Family::<VmInfoLabels, Gauge>::default();
        registry.register(VM_INFO, VM_INFO_HELP, family.clone());
        for snapshot in &snapshots {
            let observed_at = i64::try_from(snapshot.observed_at).unwrap_or(i64::MAX);
            family.get_or_create(&snapshot.labels()).set(observed_at);
        }
        Ok(registry)
    }
}
