//! Album API endpoints
//!
//! Every route requires authentication and runs behind the body-limit
//! gate. Create, media upload and update also run the capacity gate.
//!
//! - POST   /api/v1/albums                      multipart, 201
//! - GET    /api/v1/albums                      ?sort_by&search&page&limit&user_id
//! - GET    /api/v1/albums/{id}                 ?sort_by&order_by
//! - PUT    /api/v1/albums/{id}                 multipart, 202
//! - DELETE /api/v1/albums/{id}
//! - PUT    /api/v1/albums/{id}/target-email
//! - POST   /api/v1/albums/media                ?album_id, multipart
//! - GET    /api/v1/albums/media/follower
//! - POST   /api/v1/albums/likes
//! - POST   /api/v1/albums/media/likes
//! - GET    /api/v1/albums/comments             ?album_id
//! - POST   /api/v1/albums/comments
//! - GET    /api/v1/albums/images/latest

use axum::{
    extract::{Multipart, Path, Query, State},
    handler::Handler,
    http::StatusCode,
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::api::auth::MessageResponse;
use crate::api::common::{default_limit, default_page, FormData};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::quota;
use crate::api::validation::{not_blank, ValidatedJson};
use crate::models::{AlbumSort, ListParams, MediaKind, MediaSort, PrivacyMode, SortOrder};
use crate::services::{
    AlbumChanges, AlbumListRequest, MediaChange, MediaUpload, NewAlbumRequest, Viewer,
};
use crate::storage::UploadedFile;

#[derive(Debug, Deserialize)]
pub struct AlbumListQuery {
    pub sort_by: Option<String>,
    pub search: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    pub user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AlbumViewQuery {
    pub sort_by: Option<String>,
    pub order_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AlbumIdQuery {
    pub album_id: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TargetEmailRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct LikeAlbumRequest {
    pub album_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct LikeMediaRequest {
    pub media_id: i64,
    pub media_type: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CommentRequest {
    pub album_id: i64,
    #[validate(length(max = 2000), custom(function = "not_blank"))]
    pub comment: String,
}

#[derive(Debug, Serialize)]
pub struct AlbumListResponse<T> {
    pub albums: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

pub fn router(state: AppState) -> Router<AppState> {
    let capacity = || axum_middleware::from_fn_with_state(state.clone(), quota::capacity);

    Router::new()
        .route(
            "/albums",
            get(list_albums).post(create_album.layer(capacity())),
        )
        .route("/albums/media", post(upload_media.layer(capacity())))
        .route("/albums/media/follower", get(follower_feed))
        .route("/albums/media/likes", post(like_media))
        .route("/albums/likes", post(like_album))
        .route("/albums/comments", get(list_comments).post(post_comment))
        .route("/albums/images/latest", get(latest_albums))
        .route(
            "/albums/{id}",
            get(get_album)
                .put(update_album.layer(capacity()))
                .delete(delete_album),
        )
        .route("/albums/{id}/target-email", put(update_target_email))
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            quota::body_limit,
        ))
}

fn parse_privacy(value: Option<String>) -> Result<Option<PrivacyMode>, ApiError> {
    value
        .map(|v| v.parse::<PrivacyMode>())
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))
}

/// Pair files with descriptions by index; a missing description is empty
fn pair_uploads(files: Vec<UploadedFile>, descriptions: &[String]) -> Vec<MediaUpload> {
    files
        .into_iter()
        .enumerate()
        .map(|(i, file)| MediaUpload {
            file,
            description: descriptions.get(i).cloned().unwrap_or_default(),
        })
        .collect()
}

/// Like [`pair_uploads`] but the counts must match
fn pair_exact(
    files: Vec<UploadedFile>,
    descriptions: &[String],
    kind: MediaKind,
) -> Result<Vec<MediaUpload>, ApiError> {
    if files.len() != descriptions.len() {
        return Err(ApiError::bad_request(format!(
            "Got {} {} files but {} descriptions",
            files.len(),
            kind,
            descriptions.len()
        )));
    }
    Ok(pair_uploads(files, descriptions))
}

/// Turn the parallel status/id/description lists of an update into changes.
/// `new` entries consume the uploaded files in order.
fn media_changes(
    statuses: &[String],
    ids: &[String],
    descriptions: &[String],
    files: Vec<UploadedFile>,
    kind: MediaKind,
) -> Result<Vec<MediaChange>, ApiError> {
    let mut files = files.into_iter();
    let mut changes = Vec::with_capacity(statuses.len());

    for (i, status) in statuses.iter().enumerate() {
        let description = descriptions.get(i).cloned().unwrap_or_default();
        let id = || {
            ids.get(i)
                .and_then(|id| id.trim().parse::<i64>().ok())
                .ok_or_else(|| {
                    ApiError::bad_request(format!("Missing or invalid {} id at position {}", kind, i))
                })
        };

        let change = match status.trim().to_lowercase().as_str() {
            "new" => {
                let file = files.next().ok_or_else(|| {
                    ApiError::bad_request(format!("Missing {} file for position {}", kind, i))
                })?;
                MediaChange::New(MediaUpload { file, description })
            }
            "delete" => MediaChange::Delete { id: id()? },
            "update" => MediaChange::Update {
                id: id()?,
                description,
            },
            other => {
                return Err(ApiError::bad_request(format!(
                    "Unknown {} status '{}'",
                    kind, other
                )))
            }
        };
        changes.push(change);
    }

    Ok(changes)
}

fn new_album_request(mut form: FormData) -> Result<NewAlbumRequest, ApiError> {
    let privacy = parse_privacy(form.text("album_privacy"))?.unwrap_or_default();
    let images = form.take_files("album_images");
    let videos = form.take_files("album_videos");

    Ok(NewAlbumRequest {
        title: form.text("title").unwrap_or_default(),
        description: form.text("description").unwrap_or_default(),
        target_emails: if privacy == PrivacyMode::Restricted {
            form.texts("target_emails")
        } else {
            Vec::new()
        },
        privacy,
        tags: form.texts("tags"),
        images: pair_uploads(images, &form.texts("image_descriptions")),
        videos: pair_uploads(videos, &form.texts("video_descriptions")),
    })
}

fn album_changes(mut form: FormData) -> Result<AlbumChanges, ApiError> {
    let images = form.take_files("album_images");
    let videos = form.take_files("album_videos");

    Ok(AlbumChanges {
        title: form.text("title"),
        description: form.text("description"),
        privacy: parse_privacy(form.text("album_privacy"))?,
        target_emails: form
            .has_text("target_emails")
            .then(|| form.texts("target_emails")),
        tags: form.texts("tags"),
        images: media_changes(
            &form.texts("image_statuses"),
            &form.texts("album_image_ids"),
            &form.texts("image_descriptions"),
            images,
            MediaKind::Image,
        )?,
        videos: media_changes(
            &form.texts("video_statuses"),
            &form.texts("album_video_ids"),
            &form.texts("video_descriptions"),
            videos,
            MediaKind::Video,
        )?,
    })
}

/// POST /api/v1/albums
async fn create_album(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let request = new_album_request(FormData::read(multipart).await?)?;
    let album = state.albums.create(&user, request).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "message": "Album created", "album": album })),
    ))
}

/// GET /api/v1/albums
async fn list_albums(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(query): Query<AlbumListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .albums
        .list(
            &Viewer::from(&user),
            AlbumListRequest {
                owner_id: query.user_id,
                search: query.search.filter(|s| !s.trim().is_empty()),
                sort: AlbumSort::parse(query.sort_by.as_deref()),
                params: ListParams::new(query.page, query.limit),
            },
        )
        .await?;

    let total_pages = page.total_pages();
    Ok(Json(AlbumListResponse {
        albums: page.items,
        total: page.total,
        page: page.page,
        limit: page.per_page,
        total_pages,
    }))
}

/// GET /api/v1/albums/{id}
async fn get_album(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    Query(query): Query<AlbumViewQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state
        .albums
        .get(
            &Viewer::from(&user),
            id,
            MediaSort::parse(query.sort_by.as_deref()),
            SortOrder::parse(query.order_by.as_deref()),
        )
        .await?;
    Ok(Json(detail))
}

/// PUT /api/v1/albums/{id}
async fn update_album(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let changes = album_changes(FormData::read(multipart).await?)?;
    let album = state.albums.update(&user, id, changes).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "message": "Album updated", "album": album })),
    ))
}

/// DELETE /api/v1/albums/{id}
async fn delete_album(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.albums.delete(&user, id).await?;
    Ok(MessageResponse::new("Album deleted"))
}

/// PUT /api/v1/albums/{id}/target-email
async fn update_target_email(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    ValidatedJson(body): ValidatedJson<TargetEmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let target_emails = state.albums.add_target_email(&user, id, &body.email).await?;
    Ok(Json(serde_json::json!({ "target_emails": target_emails })))
}

/// POST /api/v1/albums/media
async fn upload_media(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(query): Query<AlbumIdQuery>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut form = FormData::read(multipart).await?;
    let images = pair_exact(
        form.take_files("album_images"),
        &form.texts("image_descriptions"),
        MediaKind::Image,
    )?;
    let videos = pair_exact(
        form.take_files("album_videos"),
        &form.texts("video_descriptions"),
        MediaKind::Video,
    )?;

    let media = state
        .albums
        .upload_media(&user, query.album_id, images, videos)
        .await?;
    Ok(Json(serde_json::json!({ "message": "Media uploaded", "media": media })))
}

/// GET /api/v1/albums/media/follower
async fn follower_feed(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    let albums = state.albums.follower_feed(&Viewer::from(&user)).await?;
    Ok(Json(serde_json::json!({ "albums": albums })))
}

/// POST /api/v1/albums/likes
async fn like_album(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(body): Json<LikeAlbumRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .albums
        .toggle_like(&Viewer::from(&user), body.album_id)
        .await?;
    Ok(Json(outcome))
}

/// POST /api/v1/albums/media/likes
async fn like_media(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(body): Json<LikeMediaRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let kind: MediaKind = body
        .media_type
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid media type"))?;
    let outcome = state
        .albums
        .toggle_media_like(&Viewer::from(&user), body.media_id, kind)
        .await?;
    Ok(Json(outcome))
}

/// GET /api/v1/albums/comments
async fn list_comments(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(query): Query<AlbumIdQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let comments = state
        .albums
        .comments(&Viewer::from(&user), query.album_id)
        .await?;
    Ok(Json(serde_json::json!({ "comments": comments })))
}

/// POST /api/v1/albums/comments
async fn post_comment(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ValidatedJson(body): ValidatedJson<CommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = state
        .albums
        .add_comment(&Viewer::from(&user), body.album_id, &body.comment)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// GET /api/v1/albums/images/latest
async fn latest_albums(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    let albums = state.albums.latest(&Viewer::from(&user)).await?;
    Ok(Json(serde_json::json!({ "albums": albums })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> UploadedFile {
        UploadedFile::new(name, "image/png", vec![0u8; 4])
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_pair_uploads_fills_missing_descriptions() {
        let uploads = pair_uploads(vec![file("a.png"), file("b.png")], &strings(&["first"]));
        assert_eq!(uploads[0].description, "first");
        assert_eq!(uploads[1].description, "");
    }

    #[test]
    fn test_pair_exact_requires_matching_counts() {
        assert!(pair_exact(vec![file("a.png")], &strings(&["x"]), MediaKind::Image).is_ok());
        let err = pair_exact(vec![file("a.png")], &[], MediaKind::Image).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(pair_exact(vec![], &[], MediaKind::Video).unwrap().is_empty());
    }

    #[test]
    fn test_media_changes_consume_files_in_order() {
        let changes = media_changes(
            &strings(&["update", "new", "delete", "new"]),
            &strings(&["7", "", "9", ""]),
            &strings(&["caption", "fresh", "", "second"]),
            vec![file("one.png"), file("two.png")],
            MediaKind::Image,
        )
        .unwrap();

        assert_eq!(changes.len(), 4);
        assert!(matches!(&changes[0], MediaChange::Update { id: 7, description } if description == "caption"));
        assert!(matches!(&changes[1], MediaChange::New(u) if u.file.filename == "one.png" && u.description == "fresh"));
        assert!(matches!(&changes[2], MediaChange::Delete { id: 9 }));
        assert!(matches!(&changes[3], MediaChange::New(u) if u.file.filename == "two.png"));
    }

    #[test]
    fn test_media_changes_reject_bad_input() {
        let missing_file = media_changes(&strings(&["new"]), &[], &[], vec![], MediaKind::Video);
        assert!(missing_file.is_err());

        let bad_id = media_changes(&strings(&["delete"]), &strings(&["abc"]), &[], vec![], MediaKind::Image);
        assert!(bad_id.is_err());

        let unknown = media_changes(&strings(&["rotate"]), &strings(&["1"]), &[], vec![], MediaKind::Image);
        assert!(unknown.is_err());
    }

    #[test]
    fn test_new_album_request_drops_emails_unless_restricted() {
        let form = FormData::from_parts(
            vec![
                ("title", "Beach"),
                ("album_privacy", "public"),
                ("target_emails", "a@example.com"),
                ("tags", "sea"),
            ],
            vec![],
        );
        let request = new_album_request(form).unwrap();
        assert_eq!(request.privacy, PrivacyMode::Public);
        assert!(request.target_emails.is_empty());
        assert_eq!(request.tags, vec!["sea"]);

        let form = FormData::from_parts(
            vec![
                ("title", "Family"),
                ("album_privacy", "restricted"),
                ("target_emails", "a@example.com"),
                ("target_emails", "b@example.com"),
            ],
            vec![("album_images", file("x.png"))],
        );
        let request = new_album_request(form).unwrap();
        assert_eq!(request.target_emails.len(), 2);
        assert_eq!(request.images.len(), 1);
    }

    #[test]
    fn test_privacy_defaults_to_public_and_rejects_unknown() {
        let request = new_album_request(FormData::from_parts(vec![("title", "T")], vec![])).unwrap();
        assert_eq!(request.privacy, PrivacyMode::Public);

        let form = FormData::from_parts(vec![("title", "T"), ("album_privacy", "friends")], vec![]);
        assert!(new_album_request(form).is_err());
    }

    #[test]
    fn test_album_changes_only_replace_emails_when_sent() {
        let changes = album_changes(FormData::from_parts(vec![("title", "New")], vec![])).unwrap();
        assert_eq!(changes.title.as_deref(), Some("New"));
        assert!(changes.target_emails.is_none());
        assert!(changes.privacy.is_none());

        let changes = album_changes(FormData::from_parts(
            vec![("album_privacy", "restricted"), ("target_emails", "c@example.com")],
            vec![],
        ))
        .unwrap();
        assert_eq!(changes.privacy, Some(PrivacyMode::Restricted));
        assert_eq!(changes.target_emails, Some(vec!["c@example.com".to_string()]));
    }
}
