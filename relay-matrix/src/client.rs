//! Matrix client: an SDK [`Client`] holding the bot's session, plus the [`Transport`] impl.

use async_trait::async_trait;
use matrix_sdk::authentication::matrix::MatrixSession;
use matrix_sdk::config::RequestConfig;
use matrix_sdk::ruma::api::client::message::send_message_event;
use matrix_sdk::ruma::events::MessageLikeEventContent;
use matrix_sdk::ruma::{
    OwnedDeviceId, OwnedRoomAliasId, OwnedRoomId, OwnedRoomOrAliasId, OwnedUserId, TransactionId,
};
use matrix_sdk::{Client, SessionMeta, SessionTokens};
use relay_core::{OutboundMessage, SendResponse, Transport, TransportError};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::content::{message_content, reaction_content};
use crate::error::{error_from_response, from_http_error, from_sdk_error, network_error, parse_id};

#[derive(Debug, Deserialize)]
struct WhoAmIResponse {
    user_id: String,
    #[serde(default)]
    device_id: Option<String>,
}

#[derive(Clone)]
pub struct MatrixClient {
    inner: Client,
    user_id: OwnedUserId,
}

impl std::fmt::Debug for MatrixClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixClient")
            .field("homeserver", &self.inner.homeserver().as_str())
            .field("user_id", &self.user_id.as_str())
            .finish_non_exhaustive()
    }
}

impl MatrixClient {
    /// SDK client without a session. Retries are left to the relay's dispatcher.
    async fn build(homeserver: &str) -> Result<Client, TransportError> {
        Client::builder()
            .homeserver_url(homeserver.trim_end_matches('/'))
            .request_config(RequestConfig::new().disable_retry())
            .build()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))
    }

    /// Restores a session from an existing access token. The token's owner, as reported by
    /// `whoami`, becomes the bot's identity even when it differs from `configured_user_id`.
    #[instrument(skip(access_token))]
    pub async fn from_access_token(
        homeserver: &str,
        configured_user_id: &str,
        access_token: &str,
        device_id: Option<&str>,
    ) -> Result<Self, TransportError> {
        let whoami = whoami(homeserver, access_token.trim()).await?;
        if whoami.user_id != configured_user_id.trim() {
            warn!(
                token_user = %whoami.user_id,
                "Configured user id does not match the access token owner; using the token owner"
            );
        }

        let device_id: OwnedDeviceId = match (whoami.device_id, device_id) {
            (Some(reported), _) => reported.into(),
            (None, Some(configured)) => configured.trim().to_string().into(),
            (None, None) => {
                return Err(TransportError::InvalidResponse(
                    "whoami did not report a device id; set MATRIX_DEVICE_ID".to_string(),
                ))
            }
        };
        let user_id: OwnedUserId = parse_id(&whoami.user_id)?;

        let client = Self::build(homeserver).await?;
        let session = MatrixSession {
            meta: SessionMeta {
                user_id: user_id.clone(),
                device_id,
            },
            tokens: SessionTokens {
                access_token: access_token.trim().to_string(),
                refresh_token: None,
            },
        };
        client
            .restore_session(session)
            .await
            .map_err(|e| from_sdk_error(&e))?;
        info!(user_id = %user_id, "Matrix session restored");

        Ok(Self {
            inner: client,
            user_id,
        })
    }

    /// Password login (`m.login.password`).
    #[instrument(skip(password))]
    pub async fn login(
        homeserver: &str,
        user_id: &str,
        password: &str,
        device_id: Option<&str>,
        device_name: &str,
    ) -> Result<Self, TransportError> {
        let client = Self::build(homeserver).await?;
        let mut request = client
            .matrix_auth()
            .login_username(user_id.trim(), password)
            .initial_device_display_name(device_name);
        if let Some(device_id) = device_id {
            request = request.device_id(device_id);
        }

        let response = request.await.map_err(|e| from_sdk_error(&e))?;
        info!(user_id = %response.user_id, device_id = %response.device_id, "Logged in");

        Ok(Self {
            inner: client,
            user_id: response.user_id,
        })
    }

    pub fn user_id(&self) -> &str {
        self.user_id.as_str()
    }

    /// The underlying SDK client, used by the sync loop.
    pub fn inner(&self) -> &Client {
        &self.inner
    }

    async fn send_event<C>(&self, room_id: &str, content: &C) -> Result<SendResponse, TransportError>
    where
        C: MessageLikeEventContent + Sync,
    {
        let room_id: OwnedRoomId = parse_id(room_id)?;
        let request = send_message_event::v3::Request::new(room_id, TransactionId::new(), content)
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        let response = self.inner.send(request).await.map_err(|e| {
            let err = from_http_error(&e);
            debug!(error = %err, "Matrix send failed");
            err
        })?;
        Ok(SendResponse::new(response.event_id.to_string()))
    }
}

async fn whoami(homeserver: &str, access_token: &str) -> Result<WhoAmIResponse, TransportError> {
    let url = format!(
        "{}/_matrix/client/v3/account/whoami",
        homeserver.trim_end_matches('/')
    );
    let response = reqwest::Client::new()
        .get(&url)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(network_error)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(error_from_response(status, &body));
    }
    response.json().await.map_err(network_error)
}

#[async_trait]
impl Transport for MatrixClient {
    async fn send_message(&self, message: &OutboundMessage) -> Result<SendResponse, TransportError> {
        let content = message_content(message)?;
        self.send_event(&message.room_id, &content).await
    }

    async fn send_reaction(
        &self,
        room_id: &str,
        event_id: &str,
        key: &str,
    ) -> Result<SendResponse, TransportError> {
        let content = reaction_content(event_id, key)?;
        self.send_event(room_id, &content).await
    }

    async fn join_room(&self, room_id_or_alias: &str) -> Result<String, TransportError> {
        let target: OwnedRoomOrAliasId = parse_id(room_id_or_alias)?;
        let room = self
            .inner
            .join_room_by_id_or_alias(&target, &[])
            .await
            .map_err(|e| from_sdk_error(&e))?;
        Ok(room.room_id().to_string())
    }

    async fn resolve_room_alias(&self, alias: &str) -> Result<String, TransportError> {
        let alias: OwnedRoomAliasId = parse_id(alias)?;
        let response = self
            .inner
            .resolve_room_alias(&alias)
            .await
            .map_err(|e| from_http_error(&e))?;
        Ok(response.room_id.to_string())
    }

    async fn create_direct_room(&self, user_id: &str) -> Result<String, TransportError> {
        let user_id: OwnedUserId = parse_id(user_id)?;
        let room = self
            .inner
            .create_dm(&user_id)
            .await
            .map_err(|e| from_sdk_error(&e))?;
        Ok(room.room_id().to_string())
    }
}
