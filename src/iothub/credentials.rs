//! Device credentials: SAS tokens and x509.
//!
//! A device authenticates in one of three ways, fixed at creation:
//!
//! - **Device key**: a fresh shared access signature is signed with the key
//!   before every CONNECT. Tokens live for an hour; a connection that has been
//!   up for 80% of that is recycled so the next CONNECT carries a new token.
//! - **SAS token**: the application hands over a ready-made token and is
//!   responsible for renewing it.
//! - **x509**: no password at all; the TLS layer presents a client certificate.

use super::config::{ClientConfig, MAX_DEVICE_ID_LEN, MAX_HOST_LEN, MAX_TOKEN_LEN, decode_key};
use super::error::{Error, IotHubResult};
use super::time::{Clock, elapsed_ms};
use super::topic::url_encode_into;
use base64ct::{Base64, Encoding};
use core::fmt::Write as _;
use hmac::{Hmac, Mac};
use heapless::{String, Vec};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Lifetime of a key-derived token, in seconds.
pub const SAS_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Share of the token lifetime after which the connection is recycled, in percent.
const SAS_REFRESH_PERCENT: u64 = 80;

/// Longest device key accepted, in base64 characters.
pub const MAX_KEY_TEXT_LEN: usize = 88;

/// Capacity of a generated or supplied SAS token.
pub const SAS_TOKEN_LEN: usize = MAX_TOKEN_LEN;

/// Capacity of the resource URI a token is scoped to.
const RESOURCE_URI_LEN: usize = MAX_HOST_LEN + MAX_DEVICE_ID_LEN + 9;

/// A SAS token.
pub type SasToken = String<SAS_TOKEN_LEN>;

/// How the device proves its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Tokens are derived from a symmetric key.
    DeviceKey {
        /// The key as configured, base64.
        text: String<MAX_KEY_TEXT_LEN>,
        /// The decoded key bytes.
        key: Vec<u8, { super::config::MAX_KEY_LEN }>,
    },
    /// A token supplied by the application.
    SasToken(SasToken),
    /// A client certificate configured on the secure transport.
    X509,
}

/// Produces the CONNECT password and decides when a key-derived token is due.
#[derive(Debug, Clone)]
pub struct CredentialProvider {
    credential: Credential,
    /// `{hub}.{suffix}/devices/{device_id}`
    resource_uri: String<RESOURCE_URI_LEN>,
    token: SasToken,
}

impl CredentialProvider {
    /// Build the provider for a validated configuration.
    pub fn new(config: &ClientConfig) -> IotHubResult<Self> {
        let credential = if let Some(text) = config.device_key {
            Credential::DeviceKey {
                text: String::try_from(text).map_err(|_| Error::InvalidConfig)?,
                key: decode_key(text)?,
            }
        } else if let Some(token) = config.device_sas_token {
            Credential::SasToken(String::try_from(token).map_err(|_| Error::InvalidConfig)?)
        } else if config.use_x509 {
            Credential::X509
        } else {
            return Err(Error::InvalidConfig);
        };

        let mut resource_uri = String::new();
        write!(
            resource_uri,
            "{}/devices/{}",
            config.hub_host()?,
            config.device_id
        )
        .map_err(|_| Error::InvalidConfig)?;

        Ok(Self {
            credential,
            resource_uri,
            token: SasToken::new(),
        })
    }

    /// The configured credential.
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Whether the device authenticates with a client certificate.
    pub fn is_x509(&self) -> bool {
        self.credential == Credential::X509
    }

    /// Whether tokens are derived from a device key.
    pub fn is_key_derived(&self) -> bool {
        matches!(self.credential, Credential::DeviceKey { .. })
    }

    /// The password for the next CONNECT.
    ///
    /// Signs a fresh token for a device key, hands back the supplied token
    /// otherwise, and yields `None` for x509.
    pub fn password<K: Clock>(&mut self, clock: &K) -> IotHubResult<Option<&str>> {
        match &self.credential {
            Credential::X509 => Ok(None),
            Credential::SasToken(token) => Ok(Some(token.as_str())),
            Credential::DeviceKey { key, .. } => {
                let Some(now) = clock.unix_time() else {
                    log::error!("cannot sign a SAS token without wall-clock time");
                    return Err(Error::ClockUnavailable);
                };
                let expiry = now + SAS_TOKEN_LIFETIME_SECS;
                self.token = generate_sas_token(key, &self.resource_uri, expiry)?;
                log::debug!("signed SAS token expiring at {}", expiry);
                Ok(Some(self.token.as_str()))
            }
        }
    }

    /// Whether a connection made at `connected_at_ms` should be recycled for a new token.
    pub fn renewal_due(&self, connected_at_ms: u64, now_ms: u64) -> bool {
        self.is_key_derived()
            && elapsed_ms(connected_at_ms, now_ms) / 1000
                > SAS_TOKEN_LIFETIME_SECS * SAS_REFRESH_PERCENT / 100
    }

    /// Whether `device_key` is the key this provider signs with.
    pub fn matches_key(&self, device_key: &str) -> bool {
        match &self.credential {
            Credential::DeviceKey { text, .. } => text == device_key,
            _ => false,
        }
    }
}

/// Sign a shared access signature for `resource_uri`.
///
/// ```text
/// SharedAccessSignature sr={uri}&sig={signature}&se={expiry}
/// ```
///
/// The signature is the base64 HMAC-SHA256 of the URL-encoded URI and the
/// expiry joined by a newline; URI and signature are URL-encoded in the token.
pub fn generate_sas_token(key: &[u8], resource_uri: &str, expiry: u64) -> IotHubResult<SasToken> {
    let mut encoded_uri: String<{ RESOURCE_URI_LEN * 3 }> = String::new();
    url_encode_into(&mut encoded_uri, resource_uri).map_err(|_| Error::Credential)?;

    let mut expiry_text: String<20> = String::new();
    write!(expiry_text, "{}", expiry).map_err(|_| Error::Credential)?;

    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| Error::Credential)?;
    mac.update(encoded_uri.as_bytes());
    mac.update(b"\n");
    mac.update(expiry_text.as_bytes());
    let signature = mac.finalize().into_bytes();

    let mut b64 = [0u8; 64];
    let signature = Base64::encode(&signature, &mut b64).map_err(|_| Error::Credential)?;

    let mut token = SasToken::new();
    token
        .push_str("SharedAccessSignature sr=")
        .map_err(|_| Error::Credential)?;
    token
        .push_str(&encoded_uri)
        .map_err(|_| Error::Credential)?;
    token.push_str("&sig=").map_err(|_| Error::Credential)?;
    url_encode_into(&mut token, signature).map_err(|_| Error::Credential)?;
    write!(token, "&se={}", expiry).map_err(|_| Error::Credential)?;
    Ok(token)
}
