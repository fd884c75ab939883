//! russh client handler
//!
//! Target hosts are freshly provisioned test environments whose host keys
//! are never known in advance, so every server key is accepted and logged.

use russh::client;
use russh::keys::{HashAlg, PublicKey};
use tracing::info;

pub(crate) struct AcceptAnyHostKey {
    pub(crate) host: String,
}

impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        info!(
            "[ssh-session] Accepting host key for {}: {}",
            self.host,
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }
}
