//! Agent registry: API-key identities, reputation, and wallet binding
//! with signer keys sealed at rest.

use crate::error::{MarketError, Result};
use chrono::Utc;
use rand::RngCore;
use saltdig_escrow::{Address, KeyCipher, Signer};
use saltdig_store::Store;
use saltdig_types::{Agent, AgentId, AgentPatch};
use std::sync::Arc;
use tracing::info;

pub struct AgentRegistry {
    store: Arc<dyn Store>,
    cipher: Arc<dyn KeyCipher>,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn Store>, cipher: Arc<dyn KeyCipher>) -> Self {
        Self { store, cipher }
    }

    /// Create an agent with a fresh opaque API key.
    pub async fn register(&self, display_name: String) -> Result<Agent> {
        if display_name.trim().is_empty() {
            return Err(MarketError::InvalidArgument(
                "display name is required".into(),
            ));
        }

        let mut key_bytes = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut key_bytes);

        let agent = Agent {
            id: AgentId::generate(),
            display_name,
            api_key: format!("sk_{}", hex::encode(key_bytes)),
            reputation: 0,
            evm_address: None,
            encrypted_signer_key: None,
            created_at: Utc::now(),
        };
        self.store.insert_agent(agent.clone()).await?;
        info!(agent_id = %agent.id, "Agent registered");
        Ok(agent)
    }

    pub async fn get(&self, id: &AgentId) -> Result<Agent> {
        self.store
            .get_agent(id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("agent {id}")))
    }

    /// Bearer-token lookup for the HTTP boundary.
    pub async fn authenticate(&self, api_key: &str) -> Result<Agent> {
        self.store
            .find_agent_by_api_key(api_key)
            .await?
            .ok_or_else(|| MarketError::Forbidden("unknown API key".into()))
    }

    /// Bind an EVM wallet, sealing the signing key at rest.
    pub async fn bind_wallet(
        &self,
        id: &AgentId,
        evm_address: String,
        signer_key: &[u8],
    ) -> Result<Agent> {
        Address::from_hex(&evm_address)
            .map_err(|e| MarketError::InvalidArgument(e.to_string()))?;
        let sealed = self
            .cipher
            .encrypt(signer_key)
            .map_err(|e| MarketError::Internal(e.to_string()))?;

        let updated = self
            .store
            .update_agent(
                id,
                AgentPatch {
                    evm_address: Some(evm_address),
                    encrypted_signer_key: Some(sealed),
                    ..Default::default()
                },
            )
            .await?;
        info!(agent_id = %id, "Wallet bound and signer key sealed");
        Ok(updated)
    }

    /// Unseal the agent's signer for a chain write. Fails for agents
    /// without a bound wallet.
    pub async fn signer_for(&self, id: &AgentId) -> Result<Signer> {
        let agent = self.get(id).await?;
        let address = agent
            .evm_address
            .as_deref()
            .ok_or_else(|| MarketError::InvalidState(format!("agent {id} has no wallet")))?;
        let sealed = agent
            .encrypted_signer_key
            .as_deref()
            .ok_or_else(|| MarketError::InvalidState(format!("agent {id} has no signer key")))?;

        let address =
            Address::from_hex(address).map_err(|e| MarketError::Internal(e.to_string()))?;
        let secret = self
            .cipher
            .decrypt(sealed)
            .map_err(|e| MarketError::Internal(e.to_string()))?;
        Ok(Signer::new(address, secret.to_vec()))
    }

    /// Reputation bump on accepted work.
    pub async fn add_reputation(&self, id: &AgentId, delta: i64) -> Result<Agent> {
        Ok(self
            .store
            .update_agent(
                id,
                AgentPatch {
                    reputation_delta: Some(delta),
                    ..Default::default()
                },
            )
            .await?)
    }
}
