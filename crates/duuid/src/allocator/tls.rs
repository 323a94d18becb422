use core::fmt;
use std::path::Path;

use crate::allocator::{BackendError, IdentityInfo, params};

const PEM_MARKER: &str = "-----BEGIN ";

/// PEM-encoded material: a certificate chain or a private key.
///
/// `Debug` prints the size only.
#[derive(Clone, PartialEq, Eq)]
pub struct Pem(Vec<u8>);

impl Pem {
    /// # Errors
    ///
    /// Returns [`BackendError::Tls`] if `bytes` carries no PEM block.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, BackendError> {
        let bytes = bytes.into();
        if !bytes.windows(PEM_MARKER.len()).any(|w| w == PEM_MARKER.as_bytes()) {
            return Err(BackendError::Tls {
                reason: "no PEM block found".to_owned(),
            });
        }
        Ok(Self(bytes))
    }

    /// # Errors
    ///
    /// Returns [`BackendError::Tls`] if the file cannot be read or is not PEM.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| BackendError::Tls {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_bytes(bytes).map_err(|_| BackendError::Tls {
            reason: format!("{} is not PEM encoded", path.display()),
        })
    }

    /// Parameter values are either inline PEM or a path to a PEM file.
    fn from_param(value: &str) -> Result<Self, BackendError> {
        if value.trim_start().starts_with(PEM_MARKER) {
            Self::from_bytes(value)
        } else {
            Self::load(value.trim())
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Pem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pem({} bytes)", self.0.len())
    }
}

/// Certificate and key presented for mutual TLS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientIdentity {
    pub cert: Pem,
    pub key: Pem,
}

/// Transport security derived from the configured endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TlsPolicy {
    /// Every endpoint is plain-text.
    Disabled,
    /// Secure endpoints verified against the configured CA.
    Verified {
        ca: Pem,
        identity: Option<ClientIdentity>,
    },
    /// Secure endpoints with no trust material: the server certificate is
    /// accepted without verification. Encrypted but unauthenticated.
    AcceptAnyCertificate { identity: Option<ClientIdentity> },
}

impl TlsPolicy {
    /// Chooses a policy for `endpoints` from the trust material in `info`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Settings`] if secure and plain-text endpoints
    /// are mixed or only half of a client identity is given, and
    /// [`BackendError::Tls`] if PEM material cannot be loaded.
    pub fn resolve(endpoints: &[String], info: &IdentityInfo) -> Result<Self, BackendError> {
        let secure = endpoints.iter().filter(|e| is_secure_endpoint(e)).count();
        if secure == 0 {
            return Ok(Self::Disabled);
        }
        if secure != endpoints.len() {
            return Err(BackendError::Settings {
                reason: "endpoints mix https and plain-text schemes".to_owned(),
            });
        }

        let identity = match (info.param(params::CLIENT_CERT), info.param(params::CLIENT_KEY)) {
            (Some(cert), Some(key)) => Some(ClientIdentity {
                cert: Pem::from_param(cert)?,
                key: Pem::from_param(key)?,
            }),
            (None, None) => None,
            _ => {
                return Err(BackendError::Settings {
                    reason: format!(
                        "`{}` and `{}` must be set together",
                        params::CLIENT_CERT,
                        params::CLIENT_KEY
                    ),
                });
            }
        };

        match info.param(params::CA_CERT) {
            Some(ca) => Ok(Self::Verified {
                ca: Pem::from_param(ca)?,
                identity,
            }),
            None => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    node_name = info.node_name(),
                    "https endpoints without a CA certificate; server certificates will not be verified"
                );
                Ok(Self::AcceptAnyCertificate { identity })
            }
        }
    }

    pub const fn is_encrypted(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// False only for [`TlsPolicy::AcceptAnyCertificate`].
    pub const fn is_verified(&self) -> bool {
        !matches!(self, Self::AcceptAnyCertificate { .. })
    }
}

pub fn is_secure_endpoint(endpoint: &str) -> bool {
    endpoint
        .trim()
        .get(..8)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https://"))
}
