//! Vault login methods: static token, AppRole, and the cloud IAM flows.

use std::collections::BTreeMap;
use std::env;
use std::time::SystemTime;

use aws_credential_types::provider::ProvideCredentials as _;
use aws_sigv4::http_request::{SignableBody, SignableRequest, SigningSettings, sign};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{DeployError, Result};
use crate::manifest::{Manifest, VaultConfig};

const STS_ENDPOINT: &str = "https://sts.amazonaws.com/";
const STS_BODY: &str = "Action=GetCallerIdentity&Version=2011-06-15";

#[derive(Debug, Deserialize)]
struct LoginResponse {
    auth: LoginAuth,
}

#[derive(Debug, Deserialize)]
struct LoginAuth {
    client_token: String,
}

/// Perform the configured login and return a client token.
pub async fn login(
    http: &reqwest::Client,
    address: &str,
    config: &VaultConfig,
    manifest: &Manifest,
) -> Result<String> {
    let method = config.auth.method.trim().to_ascii_lowercase();
    debug!(method = %method, "authenticating against vault");
    match method.as_str() {
        "token" => token_login(config),
        "approle" => approle_login(http, address, config).await,
        "aws-iam" => aws_iam_login(http, address, config).await,
        "gcp-iam" => gcp_iam_login(http, address, config, manifest).await,
        other => Err(DeployError::vault(
            "auth",
            format!("unsupported vault auth method '{other}'"),
        )),
    }
}

fn token_login(config: &VaultConfig) -> Result<String> {
    config
        .auth
        .token
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| env::var("VAULT_TOKEN").ok())
        .ok_or_else(|| {
            DeployError::vault("auth", "token auth requires vault.auth.token or VAULT_TOKEN")
        })
}

async fn approle_login(
    http: &reqwest::Client,
    address: &str,
    config: &VaultConfig,
) -> Result<String> {
    let role_id = config
        .auth
        .role_id
        .as_deref()
        .ok_or_else(|| DeployError::vault("auth/approle/login", "role_id is required"))?;
    let secret_id = config
        .auth
        .secret_id
        .as_deref()
        .ok_or_else(|| DeployError::vault("auth/approle/login", "secret_id is required"))?;

    post_login(
        http,
        address,
        "auth/approle/login",
        &json!({ "role_id": role_id, "secret_id": secret_id }),
    )
    .await
}

/// Vault `aws` auth backend, `iam` type: a signed `sts:GetCallerIdentity`
/// request is handed to Vault, which replays it against STS to prove the
/// caller's identity.
async fn aws_iam_login(
    http: &reqwest::Client,
    address: &str,
    config: &VaultConfig,
) -> Result<String> {
    let role = config
        .auth
        .role
        .as_deref()
        .ok_or_else(|| DeployError::vault("auth/aws/login", "role is required"))?;

    let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let provider = sdk_config.credentials_provider().ok_or_else(|| {
        DeployError::vault("auth/aws/login", "no AWS credentials available to sign with")
    })?;
    let credentials = provider
        .provide_credentials()
        .await
        .map_err(|err| DeployError::vault("auth/aws/login", err))?;
    let identity = Identity::from(credentials);

    let signing_params: v4::SigningParams<'_, SigningSettings> = v4::SigningParams::builder()
        .identity(&identity)
        .region("us-east-1")
        .name("sts")
        .time(SystemTime::now())
        .settings(SigningSettings::default())
        .build()
        .map_err(|err| DeployError::vault("auth/aws/login", err))?;

    let base_headers = [
        ("host", "sts.amazonaws.com"),
        (
            "content-type",
            "application/x-www-form-urlencoded; charset=utf-8",
        ),
    ];
    let signable = SignableRequest::new(
        "POST",
        STS_ENDPOINT,
        base_headers.iter().copied(),
        SignableBody::Bytes(STS_BODY.as_bytes()),
    )
    .map_err(|err| DeployError::vault("auth/aws/login", err))?;

    let (instructions, _signature) = sign(signable, &signing_params.into())
        .map_err(|err| DeployError::vault("auth/aws/login", err))?
        .into_parts();

    let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in base_headers {
        headers.insert(name.to_string(), vec![value.to_string()]);
    }
    for (name, value) in instructions.headers() {
        headers.insert(name.to_string(), vec![value.to_string()]);
    }

    let payload = json!({
        "role": role,
        "iam_http_request_method": "POST",
        "iam_request_url": BASE64.encode(STS_ENDPOINT),
        "iam_request_body": BASE64.encode(STS_BODY),
        "iam_request_headers": BASE64.encode(serde_json::to_vec(&headers)?),
    });

    post_login(http, address, "auth/aws/login", &payload).await
}

/// Vault `gcp` auth backend, `iam` type: a short-lived JWT self-signed by
/// the service account, audience pinned to the Vault role.
async fn gcp_iam_login(
    http: &reqwest::Client,
    address: &str,
    config: &VaultConfig,
    manifest: &Manifest,
) -> Result<String> {
    let role = config
        .auth
        .role
        .as_deref()
        .ok_or_else(|| DeployError::vault("auth/gcp/login", "role is required"))?;
    let key_json = service_account_key(manifest)?;

    #[derive(Deserialize)]
    struct ServiceAccountKey {
        client_email: String,
        private_key: String,
    }
    let key: ServiceAccountKey = serde_json::from_str(&key_json)
        .map_err(|err| DeployError::vault("auth/gcp/login", format!("invalid service account key: {err}")))?;

    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_err(|err| DeployError::vault("auth/gcp/login", err))?
        .as_secs() as i64;
    let claims = json!({
        "sub": key.client_email,
        "aud": format!("vault/{role}"),
        "exp": now + 900,
        "iat": now,
    });

    let encoding_key = jsonwebtoken::EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|err| DeployError::vault("auth/gcp/login", err))?;
    let jwt = jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256),
        &claims,
        &encoding_key,
    )
    .map_err(|err| DeployError::vault("auth/gcp/login", err))?;

    post_login(
        http,
        address,
        "auth/gcp/login",
        &json!({ "role": role, "jwt": jwt }),
    )
    .await
}

fn service_account_key(manifest: &Manifest) -> Result<String> {
    if let Some(key) = manifest
        .provider
        .credentials
        .service_account_key_json
        .as_deref()
        .filter(|k| !k.trim().is_empty())
    {
        return Ok(key.to_string());
    }
    if let Ok(path) = env::var("GOOGLE_APPLICATION_CREDENTIALS") {
        return Ok(std::fs::read_to_string(path)?);
    }
    Err(DeployError::vault(
        "auth/gcp/login",
        "no service account key available (manifest credentials or GOOGLE_APPLICATION_CREDENTIALS)",
    ))
}

async fn post_login(
    http: &reqwest::Client,
    address: &str,
    login_path: &str,
    payload: &serde_json::Value,
) -> Result<String> {
    let url = format!("{address}/v1/{login_path}");
    let response = http
        .post(&url)
        .json(payload)
        .send()
        .await
        .map_err(|err| DeployError::vault(login_path, err))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DeployError::vault(
            login_path,
            format!("login rejected with HTTP status {status}"),
        ));
    }
    let body: LoginResponse = response
        .json()
        .await
        .map_err(|err| DeployError::vault(login_path, err))?;
    Ok(body.auth.client_token)
}
