//! Identity issuing for cluster registration.
//!
//! A freshly registered cluster receives a signed registration token that the
//! agent installer embeds in its manifest link. The token only proves which
//! cluster it was issued for; the access key handshake does the rest.

mod token;

pub use token::{RegistrationClaims, RegistrationTokenIssuer};

use control_common::error::Result;

/// Issues and validates registration tokens
pub trait TokenIssuer: Send + Sync {
    /// Issue a token bound to `cluster_id`
    fn issue_registration_token(&self, cluster_id: &str) -> Result<String>;

    /// Check signature and expiry, returning the bound cluster
    fn validate_registration_token(&self, token: &str) -> Result<RegistrationClaims>;
}
