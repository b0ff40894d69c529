//! Wire format of the relayer API.

use {
    crate::encryption::{EncryptedInput, EncryptionResponse},
    alloy::primitives::{Address, B256, Bytes},
    serde::{Deserialize, Serialize},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyUrlResponse {
    pub response: KeyMaterial,
}

/// Where the service publishes the public key and parameters ciphertexts are
/// built for. Only checked for presence.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMaterial {
    pub fhe_key_info: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputProofRequest {
    pub contract_address: Address,
    pub user_address: Address,
    pub contract_chain_id: u64,
    pub values: Vec<EncryptedValue>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum EncryptedValue {
    U8(u8),
}

impl InputProofRequest {
    pub fn new(input: EncryptedInput, chain_id: u64) -> Self {
        Self {
            contract_address: input.contract,
            user_address: input.user,
            contract_chain_id: chain_id,
            values: input.values.into_iter().map(EncryptedValue::U8).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputProofResponse {
    pub response: InputProof,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputProof {
    #[serde(default)]
    pub handles: Vec<B256>,
    pub input_proof: Option<Bytes>,
}

impl From<InputProofResponse> for EncryptionResponse {
    fn from(value: InputProofResponse) -> Self {
        Self {
            handles: value.response.handles,
            input_proof: value.response.input_proof,
        }
    }
}
