//! HTTP client for a Vault-compatible transit secrets engine.

use std::time::Duration;

use async_trait::async_trait;
use error_stack::{Report, ResultExt};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::error::SignerError;

use super::{RemoteKeyInfo, TransitEngine, TransitSignRequest};

const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";

/// Envelope every Vault API response is wrapped in.
#[derive(Debug, Deserialize)]
struct VaultResponse<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SignData {
    signature: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VaultTransit {
    client: Client,
    address: Url,
    token: Option<String>,
}

impl VaultTransit {
    /// Creates a client for the engine at `address`.
    ///
    /// Without a token the client relies on a local agent to authenticate requests.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Configuration`] if the address is not a valid URL or the
    /// HTTP client cannot be built.
    pub fn new(
        address: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, Report<SignerError>> {
        let mut address = Url::parse(address).change_context(SignerError::Configuration {
            message: format!("Invalid transit address: {}", address),
        })?;
        if !address.path().ends_with('/') {
            let path = format!("{}/", address.path());
            address.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .change_context(SignerError::Configuration {
                message: "Failed to build transit HTTP client".into(),
            })?;

        Ok(Self {
            client,
            address,
            token,
        })
    }

    fn endpoint(&self, mount: &str, action: &str, key: &str) -> Result<Url, Report<SignerError>> {
        let path = format!("v1/{}/{}/{}", mount.trim_matches('/'), action, key);
        self.address
            .join(&path)
            .change_context(SignerError::Configuration {
                message: format!("Invalid transit path: {}", path),
            })
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.header(VAULT_TOKEN_HEADER, token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        what: &str,
    ) -> Result<T, Report<SignerError>> {
        let request_failed = SignerError::backend(format!("transit {what} request failed"));
        let response = builder.send().await.change_context(request_failed)?;

        let status = response.status();
        let read_failed = SignerError::backend(format!("failed to read transit {what} response"));
        let body = response.text().await.change_context(read_failed)?;

        if !status.is_success() {
            let message = format!("transit {what} returned {status}: {body}");
            return Err(Report::new(SignerError::backend(message)));
        }

        let invalid = SignerError::backend(format!("invalid transit {what} response"));
        let parsed: VaultResponse<T> = serde_json::from_str(&body).change_context(invalid)?;

        let missing = format!("transit {what} response has no data");
        parsed
            .data
            .ok_or_else(|| Report::new(SignerError::backend(missing)))
    }
}

#[async_trait]
impl TransitEngine for VaultTransit {
    async fn read_key(&self, mount: &str, key: &str) -> Result<RemoteKeyInfo, Report<SignerError>> {
        let url = self.endpoint(mount, "keys", key)?;
        log::debug!("transit: reading key info from {}", url);
        self.send(self.request(Method::GET, url), "key read").await
    }

    async fn sign(
        &self,
        mount: &str,
        key: &str,
        request: &TransitSignRequest,
    ) -> Result<String, Report<SignerError>> {
        let url = self.endpoint(mount, "sign", key)?;
        let data: SignData = self
            .send(self.request(Method::POST, url).json(request), "sign")
            .await?;

        data.signature.ok_or_else(|| {
            Report::new(SignerError::MalformedRemoteSignature {
                message: "no signature returned from vault".into(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(address: &str) -> VaultTransit {
        VaultTransit::new(address, None, Duration::from_secs(5)).expect("should build client")
    }

    fn endpoint(vault: &VaultTransit, mount: &str, action: &str) -> String {
        let url = vault.endpoint(mount, action, "oidc").expect("url");
        url.to_string()
    }

    fn sign_request() -> TransitSignRequest {
        TransitSignRequest {
            input: "ZGlnZXN0".into(),
            prehashed: true,
            hash_algorithm: Some("sha2-256".into()),
            signature_algorithm: None,
            marshaling_algorithm: "jws".into(),
            key_version: 2,
        }
    }

    #[test]
    fn test_endpoint_building() {
        let vault = client("http://127.0.0.1:8200");
        assert_eq!(
            endpoint(&vault, "transit", "keys"),
            "http://127.0.0.1:8200/v1/transit/keys/oidc"
        );
        assert_eq!(
            endpoint(&vault, "/transit/", "sign"),
            "http://127.0.0.1:8200/v1/transit/sign/oidc"
        );
    }

    #[test]
    fn test_endpoint_keeps_address_path_prefix() {
        let vault = client("https://vault.example.com/proxy");
        assert_eq!(
            endpoint(&vault, "transit", "sign"),
            "https://vault.example.com/proxy/v1/transit/sign/oidc"
        );
    }

    #[test]
    fn test_invalid_address_is_configuration_error() {
        let err = VaultTransit::new("not a url", None, Duration::from_secs(1))
            .expect_err("should reject address");
        assert!(matches!(
            err.current_context(),
            SignerError::Configuration { .. }
        ));
    }

    #[test]
    fn test_sign_response_shape() {
        let body = r#"{"request_id":"x","data":{"signature":"vault:v1:c2lnbmF0dXJl"}}"#;
        let parsed: VaultResponse<SignData> = serde_json::from_str(body).expect("should parse");
        assert_eq!(
            parsed.data.and_then(|d| d.signature).as_deref(),
            Some("vault:v1:c2lnbmF0dXJl")
        );

        let body = r#"{"data":{}}"#;
        let parsed: VaultResponse<SignData> = serde_json::from_str(body).expect("should parse");
        assert!(parsed.data.and_then(|d| d.signature).is_none());
    }

    #[tokio::test]
    async fn test_read_key_sends_token() {
        let server = MockServer::start().await;
        let body = json!({
            "data": {
                "type": "ecdsa-p256",
                "keys": {
                    "1": {"creation_time": "2024-01-01T00:00:00Z", "public_key": "pem-1"}
                }
            }
        });
        Mock::given(method("GET"))
            .and(path("/v1/transit/keys/oidc"))
            .and(header("X-Vault-Token", "s.agent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;

        let token = Some("s.agent".to_string());
        let vault = VaultTransit::new(&server.uri(), token, Duration::from_secs(5))
            .expect("should build client");
        let info = vault
            .read_key("transit", "oidc")
            .await
            .expect("should read key");

        assert_eq!(info.key_type, "ecdsa-p256");
        assert_eq!(info.latest_version(), Some(1));
        server.verify().await;
    }

    #[tokio::test]
    async fn test_no_token_header_without_token() {
        let server = MockServer::start().await;
        let body = json!({"data": {"signature": "vault:v2:c2ln"}});
        Mock::given(method("POST"))
            .and(path("/v1/transit/sign/oidc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let vault = client(&server.uri());
        vault
            .sign("transit", "oidc", &sign_request())
            .await
            .expect("should sign");

        let requests = server.received_requests().await.expect("recording enabled");
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key(VAULT_TOKEN_HEADER));
    }

    #[tokio::test]
    async fn test_sign_posts_request_body() {
        let server = MockServer::start().await;
        let body = json!({"data": {"signature": "vault:v2:c2ln"}});
        Mock::given(method("POST"))
            .and(path("/v1/transit/sign/oidc"))
            .and(body_partial_json(json!({
                "input": "ZGlnZXN0",
                "prehashed": true,
                "hash_algorithm": "sha2-256",
                "marshaling_algorithm": "jws",
                "key_version": 2
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;

        let vault = client(&server.uri());
        let composite = vault
            .sign("transit", "oidc", &sign_request())
            .await
            .expect("should sign");

        assert_eq!(composite, "vault:v2:c2ln");
        server.verify().await;
    }

    #[tokio::test]
    async fn test_missing_signature_is_malformed() {
        let server = MockServer::start().await;
        let body = json!({"data": {}});
        Mock::given(method("POST"))
            .and(path("/v1/transit/sign/oidc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let vault = client(&server.uri());
        let err = vault
            .sign("transit", "oidc", &sign_request())
            .await
            .expect_err("no signature in response");
        assert!(matches!(
            err.current_context(),
            SignerError::MalformedRemoteSignature { .. }
        ));
    }

    #[tokio::test]
    async fn test_error_status_is_backend_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/transit/keys/oidc"))
            .respond_with(ResponseTemplate::new(503).set_body_string("sealed"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/transit/sign/oidc"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let vault = client(&server.uri());
        let err = vault
            .read_key("transit", "oidc")
            .await
            .expect_err("engine is sealed");
        assert!(matches!(
            err.current_context(),
            SignerError::BackendUnavailable { .. }
        ));

        let err = vault
            .sign("transit", "oidc", &sign_request())
            .await
            .expect_err("permission denied");
        assert!(matches!(
            err.current_context(),
            SignerError::BackendUnavailable { .. }
        ));
    }

    #[tokio::test]
    async fn test_transport_failure_is_backend_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("should bind");
        let address = format!("http://{}", listener.local_addr().expect("bound address"));
        drop(listener);

        let vault = client(&address);
        let err = vault
            .read_key("transit", "oidc")
            .await
            .expect_err("nothing listening");
        assert!(matches!(
            err.current_context(),
            SignerError::BackendUnavailable { .. }
        ));
    }

    #[tokio::test]
    async fn test_response_without_data_is_backend_unavailable() {
        let server = MockServer::start().await;
        let body = json!({"errors": []});
        Mock::given(method("GET"))
            .and(path("/v1/transit/keys/oidc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let vault = client(&server.uri());
        let err = vault
            .read_key("transit", "oidc")
            .await
            .expect_err("no data envelope");
        assert!(matches!(
            err.current_context(),
            SignerError::BackendUnavailable { .. }
        ));
    }
}
