//! Session credential minting
//!
//! Channel names and transport tokens are opaque to everything in this
//! crate. They are minted exactly once per session from a random nonce
//! plus an HMAC over the channel/session pair, so a token can never be
//! replayed against a different channel.

use crate::domain::call::session::SessionCredentials;
use crate::domain::shared::value_objects::SessionId;
use crate::domain::transport::CredentialIssuer;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub struct HmacCredentialIssuer {
    secret: Vec<u8>,
}

impl HmacCredentialIssuer {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            secret: secret.to_vec(),
        }
    }
}

impl CredentialIssuer for HmacCredentialIssuer {
    fn issue(&self, session_id: SessionId) -> SessionCredentials {
        let nonce: [u8; 16] = rand::random();
        let channel_name = format!("wellness-{}", hex::encode(&nonce[..8]));
        let transport_participant_id = format!("p-{}", hex::encode(&nonce[8..]));

        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take a key of any size");
        mac.update(channel_name.as_bytes());
        mac.update(session_id.as_uuid().as_bytes());
        let signature = mac.finalize().into_bytes();

        SessionCredentials {
            channel_name,
            transport_token: URL_SAFE_NO_PAD.encode(signature),
            transport_participant_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_are_unique_per_session() {
        let issuer = HmacCredentialIssuer::new(b"secret");

        let first = issuer.issue(SessionId::new());
        let second = issuer.issue(SessionId::new());

        assert_ne!(first.channel_name, second.channel_name);
        assert_ne!(first.transport_token, second.transport_token);
        assert_ne!(
            first.transport_participant_id,
            second.transport_participant_id
        );
    }

    #[test]
    fn test_token_is_url_safe() {
        let issuer = HmacCredentialIssuer::new(b"secret");
        let credentials = issuer.issue(SessionId::new());
        assert!(!credentials.transport_token.contains('+'));
        assert!(!credentials.transport_token.contains('/'));
        assert!(!credentials.transport_token.contains('='));
    }
}
