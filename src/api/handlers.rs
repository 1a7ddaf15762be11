use super::{extract::BearerUser, server::ApiState};
use crate::{
    blob::AvatarUpload,
    chat::{ChatReply, ChatRequest},
    entity::{LoginRequest, LoginResponse, PublicProfile, SignupRequest, SignupResponse, UserId},
    error::{Error, Result},
    profile::ProfileUpdate,
};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        Multipart, Path, State,
    },
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::info;

fn bad_json(rejection: JsonRejection) -> Error {
    Error::Validation(rejection.body_text())
}

fn bad_upload(err: MultipartError) -> Error {
    Error::Validation(err.body_text())
}

pub async fn signup(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SignupResponse>)> {
    let Json(req) = body.map_err(bad_json)?;

    let user_id = state
        .manager
        .auth()
        .signup(&req.username, &req.email, &req.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            message: "User registered successfully".to_string(),
            user_id,
        }),
    ))
}

pub async fn login(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>> {
    let Json(req) = body.map_err(bad_json)?;

    // An unknown email is a rejected login here, not a missing resource.
    let session = state
        .manager
        .auth()
        .login(&req.email, &req.password)
        .await
        .map_err(|err| match err {
            Error::NotFound(message) => Error::Validation(message),
            other => other,
        })?;

    let profile = session
        .user
        .public_profile(state.manager.profiles().public_base_url());

    Ok(Json(LoginResponse {
        token: session.token,
        profile,
    }))
}

pub async fn get_user(
    State(state): State<Arc<ApiState>>,
    BearerUser(requester): BearerUser,
    Path(id): Path<String>,
) -> Result<Json<PublicProfile>> {
    let id: UserId = id.parse()?;
    let profile = state.manager.profiles().get_profile(requester, id).await?;
    Ok(Json(profile))
}

pub async fn update_user(
    State(state): State<Arc<ApiState>>,
    BearerUser(requester): BearerUser,
    Path(id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PublicProfile>> {
    let id: UserId = id.parse()?;
    let mut multipart = multipart.map_err(|rejection| Error::Validation(rejection.body_text()))?;

    let mut update = ProfileUpdate::default();
    while let Some(field) = multipart.next_field().await.map_err(bad_upload)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "username" => update.username = Some(field.text().await.map_err(bad_upload)?),
            "email" => update.email = Some(field.text().await.map_err(bad_upload)?),
            "profilePic" => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(bad_upload)?;
                // Browsers send an empty part when no file was picked.
                if !bytes.is_empty() {
                    update.avatar = Some(AvatarUpload {
                        file_name,
                        content_type,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            _ => {}
        }
    }

    let profile = state
        .manager
        .profiles()
        .update_profile(requester, id, update)
        .await?;
    Ok(Json(profile))
}

pub async fn chat(
    State(state): State<Arc<ApiState>>,
    BearerUser(user_id): BearerUser,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>> {
    let Json(req) = body.map_err(bad_json)?;

    let response = state.manager.chat(user_id, &req.message).await?;
    info!(user_id = %user_id, "chat reply sent");
    Ok(Json(ChatReply { response }))
}
