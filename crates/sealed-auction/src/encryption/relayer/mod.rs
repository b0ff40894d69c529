//! HTTP client for the encryption relayer.
//!
//! The relayer performs the actual homomorphic encryption. It publishes its
//! key material under `v1/keyurl` and turns plaintext inputs into ciphertext
//! handles plus an input proof under `v1/input-proof`.

use {
    super::{EncryptedInput, EncryptionResponse, EncryptionService, ServiceError},
    reqwest::{Client, Url},
    serde::de::DeserializeOwned,
    std::time::Duration,
};

mod dto;

#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the relayer. Encryption is unavailable without one.
    pub url: Option<Url>,
    /// Accept plain `http` URLs. Only meant for local test setups.
    pub allow_insecure: bool,
    /// Timeout of individual HTTP requests.
    pub request_timeout: Duration,
    /// Chain the encrypted inputs are bound to.
    pub chain_id: u64,
}

pub struct Relayer {
    client: Client,
    config: Config,
}

impl Relayer {
    pub fn new(client: Client, config: Config) -> Self {
        Self { client, config }
    }

    /// The base URL if it may be used.
    fn base_url(&self) -> Result<&Url, ServiceError> {
        let url = self
            .config
            .url
            .as_ref()
            .ok_or_else(|| ServiceError::Unavailable("no relayer url configured".to_string()))?;
        if url.scheme() != "https" && !self.config.allow_insecure {
            return Err(ServiceError::Unavailable(format!(
                "relayer url {url} is not a secure https url"
            )));
        }
        Ok(url)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ServiceError> {
        self.base_url()?
            .join(path)
            .map_err(|err| ServiceError::Unavailable(format!("invalid relayer url: {err}")))
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, String> {
        let status = response.status();
        let body = response.text().await.map_err(|err| err.to_string())?;
        tracing::trace!(%status, %body, "relayer response");
        if !status.is_success() {
            return Err(format!("relayer responded with {status}: {body}"));
        }
        serde_json::from_str(&body).map_err(|err| format!("Bad JSON in relayer response: {err}"))
    }
}

#[async_trait::async_trait]
impl EncryptionService for Relayer {
    async fn initialize(&self) -> Result<(), ServiceError> {
        let url = self.endpoint("v1/keyurl")?;
        tracing::debug!(%url, "fetching relayer key material");
        let response = self
            .client
            .get(url)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|err| ServiceError::Handshake(err.to_string()))?;
        let keys: dto::KeyUrlResponse = Self::parse(response)
            .await
            .map_err(ServiceError::Handshake)?;
        if keys.response.fhe_key_info.is_empty() {
            return Err(ServiceError::Handshake(
                "relayer published no key material".to_string(),
            ));
        }
        Ok(())
    }

    async fn encrypt(&self, input: EncryptedInput) -> Result<EncryptionResponse, ServiceError> {
        let url = self.endpoint("v1/input-proof")?;
        let request = dto::InputProofRequest::new(input, self.config.chain_id);
        let response = self
            .client
            .post(url)
            .timeout(self.config.request_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|err| ServiceError::Request(err.to_string()))?;
        let proof: dto::InputProofResponse = Self::parse(response)
            .await
            .map_err(ServiceError::Request)?;
        Ok(proof.into())
    }
}
