use super::{error::ClientError, state::ChatBackend};
use crate::{
    chat::{ChatReply, ChatRequest},
    entity::{LoginRequest, LoginResponse, PublicProfile, SignupRequest, SignupResponse, UserId},
};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize};
use std::{
    sync::{PoisonError, RwLock},
    time::Duration,
};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Image to upload as the new profile picture.
#[derive(Debug, Clone)]
pub struct AvatarFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<AvatarFile>,
}

/// HTTP client for the daemon. Holds the bearer token once logged in.
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_token(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn is_logged_in(&self) -> bool {
        self.token().is_some()
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, ClientError> {
        let token = self.token().ok_or(ClientError::NotLoggedIn)?;
        Ok(request.bearer_auth(token))
    }

    pub async fn signup(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<SignupResponse, ClientError> {
        let body = SignupRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self.client.post(self.url("/signup")).json(&body).send().await?;
        decode(response).await
    }

    /// Log in and keep the token for later calls.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ClientError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self.client.post(self.url("/login")).json(&body).send().await?;
        let login: LoginResponse = decode(response).await?;
        self.set_token(Some(login.token.clone()));
        debug!(user_id = %login.profile.id, "logged in");
        Ok(login)
    }

    pub fn logout(&self) {
        self.set_token(None);
    }

    pub async fn get_profile(&self, id: UserId) -> Result<PublicProfile, ClientError> {
        let request = self.authorized(self.client.get(self.url(&format!("/user/{id}"))))?;
        decode(request.send().await?).await
    }

    pub async fn update_profile(
        &self,
        id: UserId,
        changes: ProfileChanges,
    ) -> Result<PublicProfile, ClientError> {
        let mut form = multipart::Form::new();
        if let Some(username) = changes.username {
            form = form.text("username", username);
        }
        if let Some(email) = changes.email {
            form = form.text("email", email);
        }
        if let Some(avatar) = changes.avatar {
            let part = multipart::Part::bytes(avatar.bytes)
                .file_name(avatar.file_name)
                .mime_str(&avatar.content_type)?;
            form = form.part("profilePic", part);
        }

        let request = self.authorized(self.client.put(self.url(&format!("/user/{id}"))))?;
        decode(request.multipart(form).send().await?).await
    }
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn chat(&self, message: &str) -> Result<String, ClientError> {
        let body = ChatRequest {
            message: message.to_string(),
        };
        let request = self.authorized(self.client.post(self.url("/chat")))?;
        let reply: ChatReply = decode(request.json(&body).send().await?).await?;
        Ok(reply.response)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.message)
        .unwrap_or_else(|_| {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        });
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}
