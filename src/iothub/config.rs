//! Client configuration.
//!
//! A [`ClientConfig`] borrows its strings, so it can be built in code or parsed
//! straight out of a JSON document with [`ClientConfig::from_json`]:
//!
//! ```rust
//! use iothub_mqtt::iothub::ClientConfig;
//!
//! let json = r#"{
//!     "device_id": "thermostat-7",
//!     "device_key": "c2VjcmV0LWtleQ==",
//!     "iot_hub_name": "contoso",
//!     "iot_hub_suffix": "azure-devices.net"
//! }"#;
//! let config = ClientConfig::from_json(json).unwrap();
//! assert_eq!(config.host().unwrap().as_str(), "contoso.azure-devices.net");
//! assert_eq!(config.retry_policy.max_retries, 2);
//! ```

use super::error::{Error, IotHubResult};
use base64ct::{Base64, Encoding};
use core::fmt::Write as _;
use heapless::String;
use serde::Deserialize;

/// Longest accepted device id.
pub const MAX_DEVICE_ID_LEN: usize = 128;
/// Longest accepted host name.
pub const MAX_HOST_LEN: usize = 256;
/// Longest accepted device key, after base64 decoding.
pub const MAX_KEY_LEN: usize = 64;
/// Longest accepted externally supplied SAS token.
pub const MAX_TOKEN_LEN: usize = 512;

/// How unacknowledged messages are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Seconds to wait for a PUBACK before publishing again.
    pub resend_interval_secs: u32,
    /// Number of re-publishes before a message is failed with a timeout.
    pub max_retries: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            resend_interval_secs: 60,
            max_retries: 2,
        }
    }
}

/// Everything the transport needs to know at creation.
///
/// Exactly one identity must be given: `device_key`, `device_sas_token`, or
/// `use_x509`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig<'a> {
    /// Device identifier registered with the hub.
    #[serde(borrow)]
    pub device_id: &'a str,
    /// Base64 symmetric key from which SAS tokens are derived.
    #[serde(borrow, default)]
    pub device_key: Option<&'a str>,
    /// A ready-made SAS token, renewed by the application.
    #[serde(borrow, default)]
    pub device_sas_token: Option<&'a str>,
    /// Authenticate with a client certificate set through the option surface.
    #[serde(default)]
    pub use_x509: bool,
    /// Hub name, the first label of the hub host name.
    #[serde(borrow)]
    pub iot_hub_name: &'a str,
    /// Hub domain suffix.
    #[serde(borrow)]
    pub iot_hub_suffix: &'a str,
    /// Connect through this gateway instead of the hub host.
    #[serde(borrow, default)]
    pub protocol_gateway_host_name: Option<&'a str>,
    /// Resend behaviour for unacknowledged messages.
    #[serde(default)]
    pub retry_policy: RetryPolicy,
}

impl<'a> ClientConfig<'a> {
    /// A configuration authenticated by a device key.
    pub fn with_device_key(
        device_id: &'a str,
        device_key: &'a str,
        iot_hub_name: &'a str,
        iot_hub_suffix: &'a str,
    ) -> Self {
        Self {
            device_id,
            device_key: Some(device_key),
            device_sas_token: None,
            use_x509: false,
            iot_hub_name,
            iot_hub_suffix,
            protocol_gateway_host_name: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &'a str) -> IotHubResult<Self> {
        let (config, _) = serde_json_core::from_str::<ClientConfig>(json).map_err(|e| {
            log::error!("configuration is not valid JSON: {:?}", e);
            Error::InvalidConfig
        })?;
        Ok(config)
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> IotHubResult<()> {
        if self.device_id.is_empty() || self.device_id.len() > MAX_DEVICE_ID_LEN {
            log::error!("device id must be 1..={} bytes", MAX_DEVICE_ID_LEN);
            return Err(Error::InvalidConfig);
        }
        if self.device_key.is_some() && self.device_sas_token.is_some() {
            log::error!("device key and SAS token are mutually exclusive");
            return Err(Error::InvalidConfig);
        }
        if matches!(self.device_key, Some("")) || matches!(self.device_sas_token, Some("")) {
            log::error!("device key or SAS token is empty");
            return Err(Error::InvalidConfig);
        }
        let identities = self.device_key.is_some() as u8
            + self.device_sas_token.is_some() as u8
            + self.use_x509 as u8;
        if identities != 1 {
            log::error!("exactly one of device key, SAS token or x509 is required");
            return Err(Error::InvalidConfig);
        }
        if self.iot_hub_name.is_empty() || self.iot_hub_suffix.is_empty() {
            log::error!("hub name and suffix are required");
            return Err(Error::InvalidConfig);
        }
        if matches!(self.protocol_gateway_host_name, Some("")) {
            log::error!("gateway host name is empty");
            return Err(Error::InvalidConfig);
        }
        if let Some(token) = self.device_sas_token {
            if token.len() > MAX_TOKEN_LEN {
                log::error!("SAS token longer than {} bytes", MAX_TOKEN_LEN);
                return Err(Error::InvalidConfig);
            }
        }
        if let Some(key) = self.device_key {
            decode_key(key)?;
        }
        if self.retry_policy.resend_interval_secs == 0 {
            log::error!("resend interval must be positive");
            return Err(Error::InvalidConfig);
        }
        self.host()?;
        self.hub_host()?;
        Ok(())
    }

    /// `{iot_hub_name}.{iot_hub_suffix}`
    pub fn hub_host(&self) -> IotHubResult<String<MAX_HOST_LEN>> {
        let mut host = String::new();
        write!(host, "{}.{}", self.iot_hub_name, self.iot_hub_suffix)
            .map_err(|_| Error::InvalidConfig)?;
        Ok(host)
    }

    /// The host to open connections to: the gateway when set, else the hub.
    pub fn host(&self) -> IotHubResult<String<MAX_HOST_LEN>> {
        match self.protocol_gateway_host_name {
            Some(gateway) => String::try_from(gateway).map_err(|_| Error::InvalidConfig),
            None => self.hub_host(),
        }
    }
}

/// Identity presented by [`Transport::register`](super::Transport::register).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig<'a> {
    /// Device identifier.
    pub device_id: &'a str,
    /// Device key, when the transport authenticates with one.
    pub device_key: Option<&'a str>,
    /// SAS token, when the transport authenticates with one.
    pub device_sas_token: Option<&'a str>,
}

/// Decode a base64 device key.
pub(crate) fn decode_key(key: &str) -> IotHubResult<heapless::Vec<u8, MAX_KEY_LEN>> {
    let mut buf = [0u8; MAX_KEY_LEN];
    let decoded = Base64::decode(key, &mut buf).map_err(|_| {
        log::error!("device key is not valid base64");
        Error::InvalidConfig
    })?;
    heapless::Vec::from_slice(decoded).map_err(|_| Error::InvalidConfig)
}
