//! Wire models for the subset of Azure Resource Manager responses the
//! exporter consumes.
//!
//! Every field is defaulted so that the provider adding, dropping or nulling
//! properties never fails deserialization of the parts we do not read.

use serde::Deserialize;

/// Prefix of the instance-view status code carrying the power state, e.g.
/// `PowerState/running`.
pub const POWER_STATE_PREFIX: &str = "PowerState/";

/// Generic ARM list page, a `value` array with an optional `nextLink`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArmList<T> {
    /// Items on this page
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    /// Absolute URL of the next page, absent on the last page
    #[serde(default)]
    pub next_link: Option<String>,
}

/// A virtual machine as returned by the listing call.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachine {
    /// Fully qualified ARM resource id
    #[serde(default)]
    pub id: String,
    /// VM name, unique within its resource group
    #[serde(default)]
    pub name: String,
    /// Azure region, e.g. `eastus`
    #[serde(default)]
    pub location: String,
    /// Resource properties
    #[serde(default)]
    pub properties: VirtualMachineProperties,
}

impl VirtualMachine {
    /// The hardware profile size (the VM SKU), if the provider reported one.
    #[must_use]
    pub fn vm_size(&self) -> Option<&str> {
        self.properties
            .hardware_profile
            .as_ref()
            .and_then(|hp| hp.vm_size.as_deref())
    }
}

/// Properties of a [`VirtualMachine`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineProperties {
    /// Hardware profile
    #[serde(default)]
    pub hardware_profile: Option<HardwareProfile>,
    /// Provisioning state of the resource itself
    #[serde(default)]
    pub provisioning_state: Option<String>,
}

/// Hardware profile of a [`VirtualMachine`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HardwareProfile {
    /// Size name, e.g. `Standard_B2s`
    #[serde(default)]
    pub vm_size: Option<String>,
}

/// Runtime status of a virtual machine.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceView {
    /// Status entries. By provider convention the provisioning status comes
    /// first and the power status second, but only the code prefix is
    /// relied upon.
    #[serde(default)]
    pub statuses: Vec<InstanceViewStatus>,
}

/// One entry of [`InstanceView::statuses`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceViewStatus {
    /// Machine readable code, e.g. `PowerState/running`
    #[serde(default)]
    pub code: String,
    /// Severity level, e.g. `Info`
    #[serde(default)]
    pub level: Option<String>,
    /// Human readable status, e.g. `VM running`
    #[serde(default)]
    pub display_status: Option<String>,
    /// Detailed message
    #[serde(default)]
    pub message: Option<String>,
    /// Time of the status transition, RFC 3339
    #[serde(default)]
    pub time: Option<String>,
}

/// Errors produced by [`InstanceView::power_state`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PowerStateError {
    /// The instance view carried fewer than the provisioning and power
    /// entries.
    #[error("instance view has {found} status entries, expected at least 2")]
    Incomplete {
        /// Number of entries actually present
        found: usize,
    },
    /// No entry has a `PowerState/` code.
    #[error("instance view has no PowerState status entry")]
    Missing,
    /// The power entry has no display status.
    #[error("power status entry {code} has no display status")]
    NoDisplayStatus {
        /// The code of the offending entry
        code: String,
    },
}

impl InstanceView {
    /// Human readable power state, e.g. `VM running`.
    ///
    /// The power entry is found by its `PowerState/` code prefix, not by its
    /// position in the list.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than two status entries are present, if no
    /// entry carries a power state code or if that entry lacks a display
    /// status.
    pub fn power_state(&self) -> Result<&str, PowerStateError> {
        if self.statuses.len() < 2 {
            return Err(PowerStateError::Incomplete {
                found: self.statuses.len(),
            });
        }
        let status = self
            .statuses
            .iter()
            .find(|s| s.code.starts_with(POWER_STATE_PREFIX))
            .ok_or(PowerStateError::Missing)?;
        status
            .display_status
            .as_deref()
            .ok_or_else(|| PowerStateError::NoDisplayStatus {
                code: status.code.clone(),
            })
    }
}

/// ARM error envelope, `{"error": {"code": .., "message": ..}}`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CloudError {
    /// Error detail
    #[serde(default)]
    pub error: CloudErrorBody,
}

/// Body of a [`CloudError`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CloudErrorBody {
    /// Machine readable code, e.g. `ResourceGroupNotFound`
    #[serde(default)]
    pub code: String,
    /// Human readable message
    #[serde(default)]
    pub message: String,
}

/// Successful OAuth2 token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub(crate) access_token: String,
    #[serde(default)]
    pub(crate) expires_in: Option<u64>,
}

/// Failed OAuth2 token endpoint response.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct TokenErrorResponse {
    #[serde(default)]
    pub(crate) error: String,
    #[serde(default)]
    pub(crate) error_description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: &str, display: Option<&str>) -> InstanceViewStatus {
        InstanceViewStatus {
            code: code.to_string(),
            display_status: display.map(str::to_string),
            ..InstanceViewStatus::default()
        }
    }

    #[test]
    fn virtual_machine_deserializes_listing_entry() {
        let contents = r#"{
            "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm-a",
            "name": "vm-a",
            "location": "eastus",
            "tags": {"team": "infra"},
            "properties": {
                "vmId": "0f9e",
                "hardwareProfile": {"vmSize": "Standard_B2s"},
                "provisioningState": "Succeeded"
            }
        }"#;
        let vm: VirtualMachine = serde_json::from_str(contents).expect("valid vm json");
        assert_eq!(vm.name, "vm-a");
        assert_eq!(vm.location, "eastus");
        assert_eq!(vm.vm_size(), Some("Standard_B2s"));
    }

    #[test]
    fn virtual_machine_without_hardware_profile_has_no_size() {
        let vm: VirtualMachine =
            serde_json::from_str(r#"{"name": "bare"}"#).expect("valid vm json");
        assert_eq!(vm.vm_size(), None);
    }

    #[test]
    fn arm_list_without_next_link_is_last_page() {
        let page: ArmList<VirtualMachine> =
            serde_json::from_str(r#"{"value": [{"name": "a"}, {"name": "b"}]}"#)
                .expect("valid list json");
        assert_eq!(page.value.len(), 2);
        assert!(page.next_link.is_none());
    }

    #[test]
    fn power_state_from_conventional_instance_view() {
        let contents = r#"{
            "statuses": [
                {"code": "ProvisioningState/succeeded", "level": "Info", "displayStatus": "Provisioning succeeded"},
                {"code": "PowerState/running", "level": "Info", "displayStatus": "VM running"}
            ]
        }"#;
        let view: InstanceView = serde_json::from_str(contents).expect("valid view json");
        assert_eq!(view.power_state(), Ok("VM running"));
    }

    #[test]
    fn power_state_is_found_regardless_of_position() {
        let view = InstanceView {
            statuses: vec![
                status("PowerState/deallocated", Some("VM deallocated")),
                status("ProvisioningState/succeeded", Some("Provisioning succeeded")),
            ],
        };
        assert_eq!(view.power_state(), Ok("VM deallocated"));
    }

    #[test]
    fn power_state_rejects_short_status_list() {
        let view = InstanceView {
            statuses: vec![status("PowerState/running", Some("VM running"))],
        };
        assert_eq!(
            view.power_state(),
            Err(PowerStateError::Incomplete { found: 1 })
        );
        assert_eq!(
            InstanceView::default().power_state(),
            Err(PowerStateError::Incomplete { found: 0 })
        );
    }

    #[test]
    fn power_state_rejects_missing_power_entry() {
        let view = InstanceView {
            statuses: vec![
                status("ProvisioningState/succeeded", Some("Provisioning succeeded")),
                status("OSState/generalized", Some("VM generalized")),
            ],
        };
        assert_eq!(view.power_state(), Err(PowerStateError::Missing));
    }

    #[test]
    fn power_state_rejects_entry_without_display_status() {
        let view = InstanceView {
            statuses: vec![
                status("ProvisioningState/succeeded", None),
                status("PowerState/stopped", None),
            ],
        };
        assert_eq!(
            view.power_state(),
            Err(PowerStateError::NoDisplayStatus {
                code: "PowerState/stopped".to_string()
            })
        );
    }

    #[test]
    fn cloud_error_deserializes_arm_envelope() {
        let contents = r#"{"error": {"code": "ResourceGroupNotFound", "message": "Resource group 'rg' could not be found."}}"#;
        let err: CloudError = serde_json::from_str(contents).expect("valid error json");
        assert_eq!(err.error.code, "ResourceGroupNotFound");
    }
}
