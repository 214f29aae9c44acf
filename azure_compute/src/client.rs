//! Azure Resource Manager client for the compute provider.
//!
//! Only the two calls the exporter needs are implemented: listing the
//! virtual machines of a resource group and reading one machine's instance
//! view. Neither call retries; a failure is reported to the caller as-is.

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::{
    credential::{self, TokenCredential},
    models::{ArmList, CloudError, InstanceView, VirtualMachine},
};

/// Public cloud Resource Manager endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";

/// `Microsoft.Compute` API version used for every request.
pub const COMPUTE_API_VERSION: &str = "2024-03-01";

/// Errors produced by [`ComputeClient`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A bearer token could not be obtained.
    #[error("could not authenticate: {0}")]
    Credential(#[from] credential::Error),
    /// The request could not be sent or its response not read.
    #[error("request to {url} failed: {source}")]
    Http {
        /// The request URL
        url: String,
        /// Underlying transport error
        #[source]
        source: reqwest::Error,
    },
    /// Resource Manager answered with a non-success status.
    #[error("{url} returned {status}: {code}: {message}")]
    Status {
        /// The request URL
        url: String,
        /// HTTP status code
        status: u16,
        /// ARM error code, empty if the body carried none
        code: String,
        /// ARM error message, or the raw body
        message: String,
    },
    /// The response body did not match the expected model.
    #[error("response from {url} could not be decoded: {source}")]
    Decode {
        /// The request URL
        url: String,
        /// Underlying decode error
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
/// The compute management operations the exporter depends on.
pub trait ComputeApi: Send + Sync {
    /// List every virtual machine in `resource_group`, in provider order.
    ///
    /// # Errors
    ///
    /// Returns an error if any page of the listing cannot be fetched.
    async fn list_virtual_machines(&self, resource_group: &str)
    -> Result<Vec<VirtualMachine>, Error>;

    /// Fetch the instance view of `vm_name` in `resource_group`.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance view cannot be fetched.
    async fn instance_view(&self, resource_group: &str, vm_name: &str)
    -> Result<InstanceView, Error>;
}

/// Compute management client bound to one subscription.
pub struct ComputeClient<C> {
    credential: C,
    subscription_id: String,
    endpoint: String,
    scope: String,
    http: reqwest::Client,
}

impl<C> fmt::Debug for ComputeClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeClient")
            .field("subscription_id", &self.subscription_id)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

fn scope_for(endpoint: &str) -> String {
    format!("{endpoint}/.default")
}

impl<C> ComputeClient<C>
where
    C: TokenCredential,
{
    /// Create a new [`ComputeClient`] for `subscription_id`. No network call
    /// is made.
    #[must_use]
    pub fn new(credential: C, subscription_id: impl Into<String>) -> Self {
        Self {
            credential,
            subscription_id: subscription_id.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            scope: scope_for(DEFAULT_ENDPOINT),
            http: reqwest::Client::new(),
        }
    }

    /// Use a different Resource Manager endpoint, for sovereign clouds.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self.scope = scope_for(&self.endpoint);
        self
    }

    /// Share an existing HTTP client, typically one with a request timeout.
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    fn resource_group_url(&self, resource_group: &str, suffix: &str) -> String {
        format!(
            "{endpoint}/subscriptions/{sub}/resourceGroups/{resource_group}/providers/Microsoft.Compute/virtualMachines{suffix}?api-version={COMPUTE_API_VERSION}",
            endpoint = self.endpoint,
            sub = self.subscription_id,
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, Error> {
        let token = self.credential.get_token(&self.scope).await?;
        trace!("GET {url}");
        let resp = self
            .http
            .get(url)
            .bearer_auth(&token.token)
            .send()
            .await
            .map_err(|source| Error::Http {
                url: url.to_string(),
                source,
            })?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(|source| Error::Http {
            url: url.to_string(),
            source,
        })?;

        if !status.is_success() {
            let (code, message) = match serde_json::from_slice::<CloudError>(&body) {
                Ok(err) if !err.error.code.is_empty() => (err.error.code, err.error.message),
                _ => (String::new(), String::from_utf8_lossy(&body).into_owned()),
            };
            return Err(Error::Status {
                url: url.to_string(),
                status: status.as_u16(),
                code,
                message,
            });
        }

        serde_json::from_slice(&body).map_err(|source| Error::Decode {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl<C> ComputeApi for ComputeClient<C>
where
    C: TokenCredential,
{
    async fn list_virtual_machines(
        &self,
        resource_group: &str,
    ) -> Result<Vec<VirtualMachine>, Error> {
        let mut url = self.resource_group_url(resource_group, "");
        let mut vms = Vec::new();
        loop {
            let page: ArmList<VirtualMachine> = self.get_json(&url).await?;
            debug!("listed {n} VMs from {url}", n = page.value.len());
            vms.extend(page.value);
            match page.next_link {
                Some(next) if !next.is_empty() => url = next,
                _ => break,
            }
        }
        Ok(vms)
    }

    async fn instance_view(
        &self,
        resource_group: &str,
        vm_name: &str,
    ) -> Result<InstanceView, Error> {
        let url = self.resource_group_url(resource_group, &format!("/{vm_name}/instanceView"));
        self.get_json(&url).await
    }
}
