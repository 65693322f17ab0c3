//! OAuth2 password grant against the Cloud CMS token endpoint.

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use cmsgraph_shared::{CmsGraphError, Credentials, Result};

/// Token endpoint response. Only the access token is used.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Exchange user credentials for a bearer token.
pub(crate) async fn password_grant(
    client: &Client,
    base_url: &Url,
    creds: &Credentials,
) -> Result<TokenResponse> {
    let mut token_url = base_url.clone();
    token_url
        .path_segments_mut()
        .map_err(|_| CmsGraphError::config(format!("base_url cannot be a base: {base_url}")))?
        .pop_if_empty()
        .extend(["oauth", "token"]);

    debug!(%token_url, username = %creds.username, "requesting access token");

    let response = client
        .post(token_url.as_str())
        .basic_auth(&creds.client_key, Some(&creds.client_secret))
        .form(&[
            ("grant_type", "password"),
            ("username", creds.username.as_str()),
            ("password", creds.password.as_str()),
        ])
        .send()
        .await
        .map_err(|e| CmsGraphError::Transport(format!("{token_url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(CmsGraphError::Transport(format!(
            "{token_url}: authentication failed with HTTP {status}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| CmsGraphError::Transport(format!("{token_url}: invalid token response: {e}")))
}
