//! Album service
//!
//! Albums, their media, likes and comments. Every read of a single album
//! goes through [`ensure_visible`]; listings go through [`filter_visible`]
//! before they are paginated. Stored object URLs never leave this module
//! unsigned, except for thumbnails hosted outside the object store.

use crate::config::{Config, StorageConfig};
use crate::db::repositories::{AlbumRepository, CommentRepository, MediaRepository, UserRepository};
use crate::models::{
    sort_media, Album, AlbumQuery, AlbumSort, Comment, CommentWithAuthor, CreateAlbumInput,
    ListParams, MediaItem, MediaKind, MediaPatch, MediaSort, NewMedia, PagedResult, PrivacyMode,
    SortOrder, TempMedia, UpdateAlbumInput, User,
};
use crate::services::access::{ensure_visible, filter_visible, AccessError, Viewer};
use crate::services::notification::{NotificationKind, NotificationMessage, NotificationQueue};
use crate::storage::{
    album_media_key, presign_or_raw, temp_key, ObjectStorage, StorageError, UploadedFile,
};
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::ValidateEmail;

/// Albums shown on the "latest" strip
const LATEST_LIMIT: i64 = 4;

#[derive(Debug, thiserror::Error)]
pub enum AlbumError {
    #[error("Album not found")]
    NotFound,

    #[error("Media not found")]
    MediaNotFound,

    #[error(transparent)]
    Access(#[from] AccessError),

    /// Update attempted by someone other than the owner
    #[error("Album does not belong to user")]
    NotOwner,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// A file plus the description the client sent alongside it
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub file: UploadedFile,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewAlbumRequest {
    pub title: String,
    pub description: String,
    pub privacy: PrivacyMode,
    /// Only kept for restricted albums
    pub target_emails: Vec<String>,
    pub tags: Vec<String>,
    pub images: Vec<MediaUpload>,
    pub videos: Vec<MediaUpload>,
}

/// One entry of the per-media status list sent with an update
#[derive(Debug, Clone)]
pub enum MediaChange {
    New(MediaUpload),
    Delete { id: i64 },
    Update { id: i64, description: String },
}

#[derive(Debug, Clone, Default)]
pub struct AlbumChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub privacy: Option<PrivacyMode>,
    pub target_emails: Option<Vec<String>>,
    /// Appended to the existing tags
    pub tags: Vec<String>,
    pub images: Vec<MediaChange>,
    pub videos: Vec<MediaChange>,
}

#[derive(Debug, Clone, Default)]
pub struct AlbumListRequest {
    /// Owner whose albums to list; absent means the viewer's own
    pub owner_id: Option<i64>,
    pub search: Option<String>,
    pub sort: AlbumSort,
    pub params: ListParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct OwnerSummary {
    pub id: i64,
    pub name: String,
    pub user_name: Option<String>,
    pub profile_picture: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaView {
    #[serde(flatten)]
    pub item: MediaItem,
    pub user_has_like: bool,
    pub created_at_modified: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlbumDetail {
    #[serde(flatten)]
    pub album: Album,
    pub owner: OwnerSummary,
    pub tags: Vec<String>,
    pub image_count: usize,
    pub video_count: usize,
    pub media: Vec<MediaView>,
    /// Only returned to the owner
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_emails: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlbumSummary {
    #[serde(flatten)]
    pub album: Album,
    pub media_count: usize,
    pub image_count: usize,
    pub video_count: usize,
    pub last_update: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerSummary>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct LikeOutcome {
    pub liked: bool,
    pub likes_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentView {
    #[serde(flatten)]
    pub comment: CommentWithAuthor,
    pub user_picture: Option<String>,
    pub created_at_modified: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatestAlbum {
    pub id: i64,
    pub title: String,
    pub cover_url: Option<String>,
    pub media_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TempUpload {
    pub id: i64,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// "just now", "3 hours ago", "2 days ago", "1 weeks ago", "4 months ago"
pub fn humanize_since(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now - then;
    let hours = diff.num_hours();
    if diff < Duration::hours(1) {
        "just now".to_string()
    } else if diff < Duration::days(1) {
        format!("{} hours ago", hours)
    } else if diff < Duration::days(7) {
        format!("{} days ago", hours / 24)
    } else if diff < Duration::days(30) {
        format!("{} weeks ago", hours / (24 * 7))
    } else {
        format!("{} months ago", hours / (24 * 30))
    }
}

fn pick_random<T>(items: &[T]) -> Option<&T> {
    if items.is_empty() {
        return None;
    }
    let index = (Uuid::new_v4().as_u128() % items.len() as u128) as usize;
    items.get(index)
}

/// A random image URL, else a random video thumbnail
fn choose_cover(media: &[MediaItem]) -> Option<String> {
    let images: Vec<&MediaItem> = media.iter().filter(|m| m.kind == MediaKind::Image).collect();
    if let Some(image) = pick_random(&images) {
        return Some(image.url.clone());
    }
    let thumbnails: Vec<&String> = media
        .iter()
        .filter(|m| m.kind == MediaKind::Video)
        .filter_map(|m| m.thumbnail_url.as_ref())
        .collect();
    pick_random(&thumbnails).map(|t| (*t).clone())
}

fn count_kinds(media: &[MediaItem]) -> (usize, usize) {
    let images = media.iter().filter(|m| m.kind == MediaKind::Image).count();
    (images, media.len() - images)
}

/// Trim, drop blanks and validate every address
fn clean_emails(emails: &[String]) -> Result<Vec<String>, AlbumError> {
    let mut cleaned: Vec<String> = Vec::new();
    for email in emails.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
        if !email.validate_email() {
            return Err(AlbumError::Validation(format!("Invalid email address: {}", email)));
        }
        if !cleaned.iter().any(|e| e == email) {
            cleaned.push(email.to_string());
        }
    }
    Ok(cleaned)
}

fn serialize_emails(emails: &[String]) -> Result<String, AlbumError> {
    Ok(serde_json::to_string(emails).context("Failed to serialize target emails")?)
}

pub struct AlbumService {
    album_repo: Arc<dyn AlbumRepository>,
    media_repo: Arc<dyn MediaRepository>,
    comment_repo: Arc<dyn CommentRepository>,
    user_repo: Arc<dyn UserRepository>,
    storage: Arc<dyn ObjectStorage>,
    notifier: NotificationQueue,
    storage_config: StorageConfig,
    temp_ttl: Duration,
    app_base_url: String,
}

impl AlbumService {
    pub fn new(
        album_repo: Arc<dyn AlbumRepository>,
        media_repo: Arc<dyn MediaRepository>,
        comment_repo: Arc<dyn CommentRepository>,
        user_repo: Arc<dyn UserRepository>,
        storage: Arc<dyn ObjectStorage>,
        notifier: NotificationQueue,
        config: &Config,
    ) -> Self {
        Self {
            album_repo,
            media_repo,
            comment_repo,
            user_repo,
            storage,
            notifier,
            storage_config: config.storage.clone(),
            temp_ttl: Duration::minutes(config.jobs.temp_media_ttl_minutes),
            app_base_url: config.notification.app_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn presign(&self, url: &str) -> String {
        presign_or_raw(
            self.storage.as_ref(),
            url,
            std::time::Duration::from_secs(self.storage_config.presign_ttl_secs),
        )
    }

    async fn load(&self, album_id: i64) -> Result<Album, AlbumError> {
        self.album_repo
            .get_by_id(album_id)
            .await
            .context("Failed to load album")?
            .ok_or(AlbumError::NotFound)
    }

    fn check_type(&self, kind: MediaKind, content_type: &str) -> Result<(), AlbumError> {
        let family = match kind {
            MediaKind::Image => "image/",
            MediaKind::Video => "video/",
        };
        if !content_type.starts_with(family) || !self.storage_config.is_type_allowed(content_type) {
            return Err(AlbumError::Validation(format!(
                "Unsupported {} type: {}",
                kind, content_type
            )));
        }
        Ok(())
    }

    async fn store_media(&self, album_id: i64, kind: MediaKind, upload: MediaUpload) -> Result<MediaItem, AlbumError> {
        self.check_type(kind, &upload.file.content_type)?;

        let key = album_media_key(kind, album_id, &upload.file.extension());
        let stored = self
            .storage
            .put(&key, &upload.file.bytes, &upload.file.content_type)
            .await?;

        let thumbnail_url = match kind {
            MediaKind::Video => Some(self.storage_config.default_video_thumbnail.clone()),
            MediaKind::Image => None,
        };
        let item = self
            .media_repo
            .add(
                album_id,
                &NewMedia {
                    kind,
                    url: stored.url,
                    thumbnail_url,
                    description: upload.description,
                    size_mb: upload.file.size_mb(),
                    mime_type: upload.file.content_type,
                },
            )
            .await
            .context("Failed to save media")?;
        Ok(item)
    }

    async fn remove_object(&self, url: &str) {
        if let Err(e) = self.storage.delete(url).await {
            tracing::warn!("Failed to delete stored object {}: {}", url, e);
        }
    }

    /// Pick a new cover when there is none or it points at removed media
    async fn refresh_cover(&self, album: &Album) -> Result<(), AlbumError> {
        let media = self
            .media_repo
            .list_by_album(album.id)
            .await
            .context("Failed to list media")?;
        let current_is_live = album.cover_url.as_deref().is_some_and(|cover| {
            media
                .iter()
                .any(|m| m.url == cover || m.thumbnail_url.as_deref() == Some(cover))
        });
        if !current_is_live {
            self.album_repo
                .set_cover(album.id, choose_cover(&media).as_deref())
                .await
                .context("Failed to set album cover")?;
        }
        Ok(())
    }

    fn invite(&self, owner: &User, album: &Album, emails: &[String]) {
        for email in emails {
            self.notifier.submit(
                NotificationMessage::new(
                    NotificationKind::AlbumInvitation,
                    email,
                    format!("{} shared an album with you", owner.display_name()),
                )
                .body(format!("You have been invited to view \"{}\".", album.title))
                .meta("album_id", album.id)
                .meta("link", format!("{}/albums/{}", self.app_base_url, album.id)),
            );
        }
    }

    async fn owner_summary(&self, user_id: i64) -> Result<OwnerSummary, AlbumError> {
        let owner = self
            .user_repo
            .get_by_id(user_id)
            .await
            .context("Failed to load album owner")?
            .ok_or_else(|| anyhow::anyhow!("Album owner {} is missing", user_id))?;
        Ok(OwnerSummary {
            id: owner.id,
            name: owner.display_name(),
            user_name: owner.user_name.clone(),
            profile_picture: owner.profile_picture.as_deref().map(|u| self.presign(u)),
        })
    }

    async fn summarize(&self, mut album: Album, owner: Option<OwnerSummary>, now: DateTime<Utc>) -> Result<AlbumSummary, AlbumError> {
        let media = self
            .media_repo
            .list_by_album(album.id)
            .await
            .context("Failed to list media")?;
        let (image_count, video_count) = count_kinds(&media);
        album.cover_url = album.cover_url.as_deref().map(|u| self.presign(u));

        Ok(AlbumSummary {
            last_update: humanize_since(album.updated_at, now),
            media_count: media.len(),
            image_count,
            video_count,
            owner,
            album,
        })
    }

    /// Create an album with its first media.
    pub async fn create(&self, owner: &User, request: NewAlbumRequest) -> Result<Album, AlbumError> {
        let title = request.title.trim().to_string();
        if title.is_empty() {
            return Err(AlbumError::Validation("Title is required".to_string()));
        }
        for upload in &request.images {
            self.check_type(MediaKind::Image, &upload.file.content_type)?;
        }
        for upload in &request.videos {
            self.check_type(MediaKind::Video, &upload.file.content_type)?;
        }

        let targets = if request.privacy == PrivacyMode::Restricted {
            clean_emails(&request.target_emails)?
        } else {
            Vec::new()
        };

        let album = self
            .album_repo
            .create(&CreateAlbumInput {
                user_id: owner.id,
                title,
                description: request.description,
                privacy: request.privacy.clone(),
                target_emails: if targets.is_empty() {
                    None
                } else {
                    Some(serialize_emails(&targets)?)
                },
            })
            .await
            .context("Failed to create album")?;

        for upload in request.images {
            self.store_media(album.id, MediaKind::Image, upload).await?;
        }
        for upload in request.videos {
            self.store_media(album.id, MediaKind::Video, upload).await?;
        }
        self.album_repo
            .add_tags(album.id, &request.tags)
            .await
            .context("Failed to save tags")?;
        self.refresh_cover(&album).await?;

        tracing::info!("User {} created album {}", owner.id, album.id);
        self.invite(owner, &album, &targets);

        self.load(album.id).await
    }

    /// Full album view; counts one view after the visibility decision
    pub async fn get(
        &self,
        viewer: &Viewer,
        album_id: i64,
        sort: MediaSort,
        order: SortOrder,
    ) -> Result<AlbumDetail, AlbumError> {
        let mut album = self.load(album_id).await?;
        ensure_visible(Some(viewer), &album)?;

        self.album_repo
            .increment_view_count(album.id)
            .await
            .context("Failed to count view")?;
        album.view_count += 1;

        let mut media = self
            .media_repo
            .list_by_album(album.id)
            .await
            .context("Failed to list media")?;
        sort_media(&mut media, sort, order);
        let (image_count, video_count) = count_kinds(&media);

        let liked = self
            .media_repo
            .liked_ids(album.id, viewer.id)
            .await
            .context("Failed to load likes")?;
        let tags = self
            .album_repo
            .tags_for(album.id)
            .await
            .context("Failed to load tags")?;
        let owner = self.owner_summary(album.user_id).await?;

        let target_emails = if viewer.id == album.user_id {
            album.parse_target_emails().ok()
        } else {
            None
        };

        let now = Utc::now();
        let media = media
            .into_iter()
            .map(|mut item| {
                item.url = self.presign(&item.url);
                item.thumbnail_url = item.thumbnail_url.as_deref().map(|u| self.presign(u));
                MediaView {
                    user_has_like: liked.contains(&item.id),
                    created_at_modified: humanize_since(item.created_at, now),
                    item,
                }
            })
            .collect();
        album.cover_url = album.cover_url.as_deref().map(|u| self.presign(u));

        Ok(AlbumDetail {
            album,
            owner,
            tags,
            image_count,
            video_count,
            media,
            target_emails,
        })
    }

    /// One page of albums, filtered for the viewer before paging
    pub async fn list(&self, viewer: &Viewer, request: AlbumListRequest) -> Result<PagedResult<AlbumSummary>, AlbumError> {
        let own = request.owner_id.map_or(true, |id| id == viewer.id);
        let query = AlbumQuery {
            owner_id: Some(request.owner_id.unwrap_or(viewer.id)),
            include_private: own,
            search: request.search.filter(|s| !s.trim().is_empty()),
            sort: request.sort,
        };

        let candidates = self
            .album_repo
            .find(&query)
            .await
            .context("Failed to list albums")?;
        let page = PagedResult::from_filtered(filter_visible(Some(viewer), candidates), &request.params);

        let now = Utc::now();
        let mut items = Vec::with_capacity(page.items.len());
        for album in page.items {
            items.push(self.summarize(album, None, now).await?);
        }
        Ok(PagedResult {
            items,
            total: page.total,
            page: page.page,
            per_page: page.per_page,
        })
    }

    /// Albums of the users the viewer follows, newest update first
    pub async fn follower_feed(&self, viewer: &Viewer) -> Result<Vec<AlbumSummary>, AlbumError> {
        let following = self
            .user_repo
            .following_ids(viewer.id)
            .await
            .context("Failed to load followed users")?;
        let albums = self
            .album_repo
            .find_by_owners(&following)
            .await
            .context("Failed to list followed albums")?;

        let now = Utc::now();
        let mut owners: HashMap<i64, OwnerSummary> = HashMap::new();
        let mut feed = Vec::new();
        for album in filter_visible(Some(viewer), albums) {
            let owner = match owners.get(&album.user_id) {
                Some(owner) => owner.clone(),
                None => {
                    let owner = self.owner_summary(album.user_id).await?;
                    owners.insert(album.user_id, owner.clone());
                    owner
                }
            };
            feed.push(self.summarize(album, Some(owner), now).await?);
        }
        Ok(feed)
    }

    async fn apply_media_changes(&self, album_id: i64, kind: MediaKind, changes: Vec<MediaChange>) -> Result<(), AlbumError> {
        for change in changes {
            match change {
                MediaChange::New(upload) => {
                    self.store_media(album_id, kind, upload).await?;
                }
                MediaChange::Delete { id } => {
                    let item = self.owned_media(album_id, kind, id).await?;
                    self.media_repo
                        .delete(item.id)
                        .await
                        .context("Failed to delete media")?;
                    self.remove_object(&item.url).await;
                }
                MediaChange::Update { id, description } => {
                    let item = self.owned_media(album_id, kind, id).await?;
                    self.media_repo
                        .update(
                            item.id,
                            &MediaPatch {
                                description: Some(description),
                                object: None,
                            },
                        )
                        .await
                        .context("Failed to update media")?;
                }
            }
        }
        Ok(())
    }

    async fn owned_media(&self, album_id: i64, kind: MediaKind, id: i64) -> Result<MediaItem, AlbumError> {
        self.media_repo
            .get(id)
            .await
            .context("Failed to load media")?
            .filter(|m| m.album_id == album_id && m.kind == kind)
            .ok_or(AlbumError::MediaNotFound)
    }

    /// Owner-only edit of details, media and tags
    pub async fn update(&self, actor: &User, album_id: i64, changes: AlbumChanges) -> Result<Album, AlbumError> {
        let album = self.load(album_id).await?;
        if album.user_id != actor.id {
            return Err(AlbumError::NotOwner);
        }

        let title = match changes.title.map(|t| t.trim().to_string()) {
            Some(t) if t.is_empty() => {
                return Err(AlbumError::Validation("Title is required".to_string()))
            }
            other => other,
        };
        let privacy = changes.privacy.clone().unwrap_or_else(|| album.privacy.clone());

        let previous = album.parse_target_emails().unwrap_or_default();
        let mut invited = Vec::new();
        let target_emails = match (&privacy, changes.target_emails) {
            (PrivacyMode::Restricted, Some(emails)) => {
                let cleaned = clean_emails(&emails)?;
                invited = cleaned
                    .iter()
                    .filter(|e| !previous.contains(e))
                    .cloned()
                    .collect();
                Some(Some(serialize_emails(&cleaned)?))
            }
            // Only restricted albums keep an allow-list
            (PrivacyMode::Public | PrivacyMode::Private, _) => Some(None),
            _ => None,
        };

        let updated = self
            .album_repo
            .update(
                album.id,
                &UpdateAlbumInput {
                    title,
                    description: changes.description,
                    privacy: changes.privacy,
                    target_emails,
                },
            )
            .await
            .context("Failed to update album")?;

        self.apply_media_changes(album.id, MediaKind::Image, changes.images).await?;
        self.apply_media_changes(album.id, MediaKind::Video, changes.videos).await?;
        self.album_repo
            .add_tags(album.id, &changes.tags)
            .await
            .context("Failed to save tags")?;
        self.refresh_cover(&updated).await?;

        self.invite(actor, &updated, &invited);
        self.load(album.id).await
    }

    /// Add media to an existing album
    pub async fn upload_media(
        &self,
        actor: &User,
        album_id: i64,
        images: Vec<MediaUpload>,
        videos: Vec<MediaUpload>,
    ) -> Result<Vec<MediaItem>, AlbumError> {
        let album = self.load(album_id).await?;
        if album.user_id != actor.id {
            return Err(AlbumError::Forbidden("Album does not belong to user".to_string()));
        }
        if images.is_empty() && videos.is_empty() {
            return Err(AlbumError::Validation("No media uploaded".to_string()));
        }
        for upload in &images {
            self.check_type(MediaKind::Image, &upload.file.content_type)?;
        }
        for upload in &videos {
            self.check_type(MediaKind::Video, &upload.file.content_type)?;
        }

        let mut stored = Vec::with_capacity(images.len() + videos.len());
        for upload in images {
            stored.push(self.store_media(album.id, MediaKind::Image, upload).await?);
        }
        for upload in videos {
            stored.push(self.store_media(album.id, MediaKind::Video, upload).await?);
        }
        self.album_repo
            .touch(album.id)
            .await
            .context("Failed to touch album")?;
        self.refresh_cover(&album).await?;

        Ok(stored)
    }

    /// Invite one more address to a restricted album
    pub async fn add_target_email(&self, actor: &User, album_id: i64, email: &str) -> Result<Vec<String>, AlbumError> {
        let album = self.load(album_id).await?;
        if album.user_id != actor.id {
            return Err(AlbumError::Forbidden("Album does not belong to user".to_string()));
        }
        if album.privacy != PrivacyMode::Restricted {
            return Err(AlbumError::Validation("Album is not restricted".to_string()));
        }

        let email = email.trim();
        if !email.validate_email() {
            return Err(AlbumError::Validation(format!("Invalid email address: {}", email)));
        }

        let mut targets = album
            .parse_target_emails()
            .map_err(|source| AccessError::DataIntegrity {
                album_id: album.id,
                source,
            })?;
        if !targets.iter().any(|e| e == email) {
            targets.push(email.to_string());
            self.album_repo
                .update(
                    album.id,
                    &UpdateAlbumInput {
                        target_emails: Some(Some(serialize_emails(&targets)?)),
                        ..Default::default()
                    },
                )
                .await
                .context("Failed to update target emails")?;
            self.invite(actor, &album, &[email.to_string()]);
        }
        Ok(targets)
    }

    /// Delete stored objects (best effort), then the album and its children
    pub async fn remove_album(&self, album: &Album) -> Result<(), AlbumError> {
        let media = self
            .media_repo
            .list_by_album(album.id)
            .await
            .context("Failed to list media")?;
        for item in &media {
            self.remove_object(&item.url).await;
        }
        self.album_repo
            .delete(album.id)
            .await
            .context("Failed to delete album")?;
        Ok(())
    }

    pub async fn delete(&self, actor: &User, album_id: i64) -> Result<(), AlbumError> {
        let album = self.load(album_id).await?;
        if album.user_id != actor.id {
            return Err(AlbumError::Forbidden("Album does not belong to user".to_string()));
        }
        self.remove_album(&album).await?;
        tracing::info!("User {} deleted album {}", actor.id, album.id);
        Ok(())
    }

    pub async fn toggle_like(&self, viewer: &Viewer, album_id: i64) -> Result<LikeOutcome, AlbumError> {
        let album = self.load(album_id).await?;
        ensure_visible(Some(viewer), &album)?;

        let (liked, likes_count) = self
            .album_repo
            .toggle_like(album.id, viewer.id)
            .await
            .context("Failed to toggle album like")?;
        Ok(LikeOutcome { liked, likes_count })
    }

    pub async fn toggle_media_like(&self, viewer: &Viewer, media_id: i64, kind: MediaKind) -> Result<LikeOutcome, AlbumError> {
        let item = self
            .media_repo
            .get(media_id)
            .await
            .context("Failed to load media")?
            .filter(|m| m.kind == kind)
            .ok_or(AlbumError::MediaNotFound)?;
        let album = self.load(item.album_id).await?;
        ensure_visible(Some(viewer), &album)?;

        let (liked, likes_count) = self
            .media_repo
            .toggle_like(item.id, viewer.id)
            .await
            .context("Failed to toggle media like")?;
        Ok(LikeOutcome { liked, likes_count })
    }

    pub async fn comments(&self, viewer: &Viewer, album_id: i64) -> Result<Vec<CommentView>, AlbumError> {
        let album = self.load(album_id).await?;
        ensure_visible(Some(viewer), &album)?;

        let now = Utc::now();
        let comments = self
            .comment_repo
            .list_by_album(album.id)
            .await
            .context("Failed to list comments")?;
        Ok(comments
            .into_iter()
            .map(|comment| CommentView {
                user_picture: comment.author_picture.as_deref().map(|u| self.presign(u)),
                created_at_modified: humanize_since(comment.comment.created_at, now),
                comment,
            })
            .collect())
    }

    pub async fn add_comment(&self, viewer: &Viewer, album_id: i64, content: &str) -> Result<Comment, AlbumError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AlbumError::Validation("Comment cannot be empty".to_string()));
        }
        let album = self.load(album_id).await?;
        ensure_visible(Some(viewer), &album)?;

        Ok(self
            .comment_repo
            .create(album.id, viewer.id, content)
            .await
            .context("Failed to save comment")?)
    }

    /// The viewer's most recently created albums
    pub async fn latest(&self, viewer: &Viewer) -> Result<Vec<LatestAlbum>, AlbumError> {
        let albums = self
            .album_repo
            .latest_by_owner(viewer.id, LATEST_LIMIT)
            .await
            .context("Failed to list latest albums")?;

        let mut latest = Vec::with_capacity(albums.len());
        for album in albums {
            let media_count = self
                .media_repo
                .list_by_album(album.id)
                .await
                .context("Failed to list media")?
                .len();
            latest.push(LatestAlbum {
                id: album.id,
                cover_url: album.cover_url.as_deref().map(|u| self.presign(u)),
                title: album.title,
                media_count,
            });
        }
        Ok(latest)
    }

    /// Store an anonymous upload that expires after the configured TTL
    pub async fn upload_temp(&self, file: UploadedFile, ip_address: &str) -> Result<TempUpload, AlbumError> {
        if !self.storage_config.is_type_allowed(&file.content_type) {
            return Err(AlbumError::Validation(format!(
                "Unsupported file type: {}",
                file.content_type
            )));
        }

        let key = temp_key(&file.extension());
        let stored = self.storage.put(&key, &file.bytes, &file.content_type).await?;
        let now = Utc::now();
        let temp = self
            .media_repo
            .add_temp(&TempMedia {
                id: 0,
                url: stored.url,
                ip_address: ip_address.to_string(),
                size_mb: file.size_mb(),
                mime_type: file.content_type,
                expires_at: now + self.temp_ttl,
                created_at: now,
            })
            .await
            .context("Failed to record temporary upload")?;

        Ok(TempUpload {
            id: temp.id,
            url: self.presign(&temp.url),
            expires_at: temp.expires_at,
        })
    }

    /// Remove albums not updated since `cutoff`; returns how many went
    pub async fn purge_stale(&self, cutoff: DateTime<Utc>) -> Result<usize, AlbumError> {
        let stale = self
            .album_repo
            .stale_before(cutoff)
            .await
            .context("Failed to find stale albums")?;
        let mut removed = 0;
        for album in &stale {
            match self.remove_album(album).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Failed to remove stale album {}: {}", album.id, e),
            }
        }
        Ok(removed)
    }

    /// Drop expired temporary uploads; returns how many went
    pub async fn purge_expired_temp(&self, now: DateTime<Utc>) -> Result<usize, AlbumError> {
        let expired = self
            .media_repo
            .expired_temp(now)
            .await
            .context("Failed to find expired uploads")?;
        for temp in &expired {
            self.remove_object(&temp.url).await;
            self.media_repo
                .delete_temp(temp.id)
                .await
                .context("Failed to delete temporary upload")?;
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{
        SqlxAlbumRepository, SqlxCommentRepository, SqlxMediaRepository, SqlxUserRepository,
    };
    use crate::db::{create_test_pool, migrations};
    use crate::models::CreateUserInput;
    use crate::services::access::{decide, Visibility};
    use crate::services::notification::LogDispatcher;
    use crate::storage::LocalObjectStorage;
    use tempfile::TempDir;

    struct Fixture {
        service: AlbumService,
        users: Arc<dyn UserRepository>,
        albums: Arc<dyn AlbumRepository>,
        media: Arc<dyn MediaRepository>,
        dir: TempDir,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.path = dir.path().to_path_buf();
        config.storage.public_base_url = "http://cdn.test".to_string();

        let storage: Arc<dyn ObjectStorage> = Arc::new(LocalObjectStorage::from_config(&config.storage));
        let (notifier, _worker) =
            NotificationQueue::start(Arc::new(LogDispatcher), std::time::Duration::from_secs(1));

        let users = SqlxUserRepository::boxed(pool.clone());
        let albums = SqlxAlbumRepository::boxed(pool.clone());
        let media = SqlxMediaRepository::boxed(pool.clone());
        let service = AlbumService::new(
            albums.clone(),
            media.clone(),
            SqlxCommentRepository::boxed(pool.clone()),
            users.clone(),
            storage,
            notifier,
            &config,
        );
        Fixture {
            service,
            users,
            albums,
            media,
            dir,
        }
    }

    async fn user(users: &Arc<dyn UserRepository>, first: &str) -> User {
        users
            .create(&CreateUserInput {
                first_name: first.to_string(),
                last_name: "Doe".to_string(),
                email: format!("{}@example.com", first.to_lowercase()),
                password_hash: "hash".to_string(),
                subscription_tier_id: 1,
            })
            .await
            .unwrap()
    }

    fn image(name: &str, description: &str) -> MediaUpload {
        MediaUpload {
            file: UploadedFile::new(name, "image/png", vec![7; 2048]),
            description: description.to_string(),
        }
    }

    fn video(name: &str) -> MediaUpload {
        MediaUpload {
            file: UploadedFile::new(name, "video/mp4", vec![9; 4096]),
            description: String::new(),
        }
    }

    fn request(title: &str, privacy: PrivacyMode) -> NewAlbumRequest {
        NewAlbumRequest {
            title: title.to_string(),
            privacy,
            ..Default::default()
        }
    }

    #[test]
    fn test_humanize_since() {
        let now = Utc::now();
        assert_eq!(humanize_since(now - Duration::minutes(59), now), "just now");
        assert_eq!(humanize_since(now - Duration::hours(5), now), "5 hours ago");
        assert_eq!(humanize_since(now - Duration::days(3), now), "3 days ago");
        assert_eq!(humanize_since(now - Duration::days(15), now), "2 weeks ago");
        assert_eq!(humanize_since(now - Duration::days(65), now), "2 months ago");
    }

    #[test]
    fn test_clean_emails() {
        let cleaned = clean_emails(&[
            " a@example.com ".to_string(),
            "".to_string(),
            "a@example.com".to_string(),
        ])
        .unwrap();
        assert_eq!(cleaned, vec!["a@example.com"]);
        assert!(clean_emails(&["not-an-email".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_create_stores_media_and_picks_cover() {
        let f = setup().await;
        let owner = user(&f.users, "Olga").await;

        let mut req = request("Holiday", PrivacyMode::Public);
        req.images = vec![image("a.png", "beach"), image("b.png", "sunset")];
        req.videos = vec![video("c.mp4")];
        req.tags = vec!["travel".to_string()];
        let album = f.service.create(&owner, req).await.unwrap();

        let media = f.media.list_by_album(album.id).await.unwrap();
        assert_eq!(media.len(), 3);
        assert_eq!(media[0].size_mb, 2048.0 / 1_048_576.0);
        assert!(media[0].url.contains(&format!("/media/images/albums/album_{}/", album.id)));
        assert!(media[2].thumbnail_url.is_some());

        let cover = album.cover_url.unwrap();
        assert!(media.iter().any(|m| m.kind == MediaKind::Image && m.url == cover));
        assert!(std::fs::read_dir(f.dir.path().join("images/albums")).is_ok());
    }

    #[tokio::test]
    async fn test_create_rejects_blank_title_and_bad_types() {
        let f = setup().await;
        let owner = user(&f.users, "Olga").await;

        assert!(matches!(
            f.service.create(&owner, request("  ", PrivacyMode::Public)).await,
            Err(AlbumError::Validation(_))
        ));

        let mut req = request("Docs", PrivacyMode::Public);
        req.images = vec![MediaUpload {
            file: UploadedFile::new("x.pdf", "application/pdf", vec![1]),
            description: String::new(),
        }];
        assert!(matches!(
            f.service.create(&owner, req).await,
            Err(AlbumError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_get_respects_visibility_and_counts_views() {
        let f = setup().await;
        let owner = user(&f.users, "Olga").await;
        let guest = user(&f.users, "Gus").await;
        let stranger = user(&f.users, "Sam").await;

        let mut req = request("Secret", PrivacyMode::Restricted);
        req.target_emails = vec!["gus@example.com".to_string()];
        req.images = vec![image("a.png", "one")];
        let album = f.service.create(&owner, req).await.unwrap();

        let seen = f
            .service
            .get(&Viewer::from(&guest), album.id, MediaSort::Date, SortOrder::Desc)
            .await
            .unwrap();
        assert_eq!(seen.album.view_count, 1);
        assert_eq!(seen.image_count, 1);
        assert!(seen.target_emails.is_none());
        assert!(seen.media[0].item.url.contains("signature="));
        assert!(!seen.media[0].user_has_like);

        assert!(matches!(
            f.service
                .get(&Viewer::from(&stranger), album.id, MediaSort::Date, SortOrder::Desc)
                .await,
            Err(AlbumError::Access(AccessError::Denied))
        ));

        let own = f
            .service
            .get(&Viewer::from(&owner), album.id, MediaSort::Date, SortOrder::Desc)
            .await
            .unwrap();
        assert_eq!(own.album.view_count, 2);
        assert_eq!(own.target_emails.unwrap(), vec!["gus@example.com"]);

        assert!(matches!(
            f.service
                .get(&Viewer::from(&owner), 999, MediaSort::Date, SortOrder::Desc)
                .await,
            Err(AlbumError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_list_filters_before_paginating() {
        let f = setup().await;
        let owner = user(&f.users, "Olga").await;
        let viewer = user(&f.users, "Val").await;

        for i in 0..3 {
            f.service
                .create(&owner, request(&format!("public {}", i), PrivacyMode::Public))
                .await
                .unwrap();
        }
        f.service
            .create(&owner, request("hidden", PrivacyMode::Private))
            .await
            .unwrap();
        let mut restricted = request("not for val", PrivacyMode::Restricted);
        restricted.target_emails = vec!["someone@example.com".to_string()];
        f.service.create(&owner, restricted).await.unwrap();

        let page = f
            .service
            .list(
                &Viewer::from(&viewer),
                AlbumListRequest {
                    owner_id: Some(owner.id),
                    params: ListParams::new(1, 2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total_pages(), 2);
        assert_eq!(page.items[0].last_update, "just now");

        let own = f
            .service
            .list(&Viewer::from(&owner), AlbumListRequest::default())
            .await
            .unwrap();
        assert_eq!(own.total, 5);
    }

    #[tokio::test]
    async fn test_follower_feed_only_shows_visible_albums() {
        let f = setup().await;
        let owner = user(&f.users, "Olga").await;
        let fan = user(&f.users, "Fay").await;

        f.service
            .create(&owner, request("open", PrivacyMode::Public))
            .await
            .unwrap();
        f.service
            .create(&owner, request("closed", PrivacyMode::Private))
            .await
            .unwrap();

        assert!(f.service.follower_feed(&Viewer::from(&fan)).await.unwrap().is_empty());

        f.users.toggle_follow(fan.id, owner.id).await.unwrap();
        let feed = f.service.follower_feed(&Viewer::from(&fan)).await.unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].album.title, "open");
        assert_eq!(feed[0].owner.as_ref().unwrap().id, owner.id);
    }

    #[tokio::test]
    async fn test_update_is_owner_only_and_applies_media_changes() {
        let f = setup().await;
        let owner = user(&f.users, "Olga").await;
        let other = user(&f.users, "Otto").await;

        let mut req = request("Trip", PrivacyMode::Public);
        req.images = vec![image("a.png", "first"), image("b.png", "second")];
        let album = f.service.create(&owner, req).await.unwrap();
        let media = f.media.list_by_album(album.id).await.unwrap();

        assert!(matches!(
            f.service.update(&other, album.id, AlbumChanges::default()).await,
            Err(AlbumError::NotOwner)
        ));

        let changes = AlbumChanges {
            title: Some("Trip 2".to_string()),
            tags: vec!["summer".to_string()],
            images: vec![
                MediaChange::Delete { id: media[0].id },
                MediaChange::Update {
                    id: media[1].id,
                    description: "renamed".to_string(),
                },
                MediaChange::New(image("c.png", "third")),
            ],
            ..Default::default()
        };
        let updated = f.service.update(&owner, album.id, changes).await.unwrap();
        assert_eq!(updated.title, "Trip 2");

        let after = f.media.list_by_album(album.id).await.unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].description, "renamed");
        assert_eq!(after[1].description, "third");
        assert_ne!(updated.cover_url.as_deref(), Some(media[0].url.as_str()));
        assert_eq!(f.albums.tags_for(album.id).await.unwrap(), vec!["summer"]);

        let foreign = AlbumChanges {
            images: vec![MediaChange::Delete { id: 9999 }],
            ..Default::default()
        };
        assert!(matches!(
            f.service.update(&owner, album.id, foreign).await,
            Err(AlbumError::MediaNotFound)
        ));
    }

    #[tokio::test]
    async fn test_leaving_restricted_clears_invitees() {
        let f = setup().await;
        let owner = user(&f.users, "Olga").await;
        let invitee = Viewer::new(999, "old@example.com");

        let mut req = request("Guests", PrivacyMode::Restricted);
        req.target_emails = vec!["old@example.com".to_string()];
        let album = f.service.create(&owner, req).await.unwrap();
        assert_eq!(decide(Some(&invitee), &album).unwrap(), Visibility::Allow);

        let to_public = AlbumChanges {
            privacy: Some(PrivacyMode::Public),
            ..Default::default()
        };
        let public = f.service.update(&owner, album.id, to_public).await.unwrap();
        assert!(public.target_emails.is_none());

        let back = AlbumChanges {
            privacy: Some(PrivacyMode::Restricted),
            ..Default::default()
        };
        let restricted = f.service.update(&owner, album.id, back).await.unwrap();
        assert_eq!(restricted.privacy, PrivacyMode::Restricted);
        assert_eq!(decide(Some(&invitee), &restricted).unwrap(), Visibility::Deny);

        let stored = f.albums.get_by_id(album.id).await.unwrap().unwrap();
        assert!(stored.target_emails.is_none());
    }

    #[tokio::test]
    async fn test_upload_media_and_target_email() {
        let f = setup().await;
        let owner = user(&f.users, "Olga").await;
        let other = user(&f.users, "Otto").await;
        let album = f
            .service
            .create(&owner, request("Empty", PrivacyMode::Public))
            .await
            .unwrap();
        assert!(album.cover_url.is_none());

        assert!(matches!(
            f.service
                .upload_media(&other, album.id, vec![image("a.png", "")], vec![])
                .await,
            Err(AlbumError::Forbidden(_))
        ));
        let stored = f
            .service
            .upload_media(&owner, album.id, vec![image("a.png", "")], vec![video("v.mp4")])
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        let reloaded = f.albums.get_by_id(album.id).await.unwrap().unwrap();
        assert_eq!(reloaded.cover_url.as_deref(), Some(stored[0].url.as_str()));

        assert!(matches!(
            f.service.add_target_email(&owner, album.id, "x@example.com").await,
            Err(AlbumError::Validation(_))
        ));

        let restricted = f
            .service
            .create(&owner, request("Invite only", PrivacyMode::Restricted))
            .await
            .unwrap();
        assert!(matches!(
            f.service.add_target_email(&other, restricted.id, "x@example.com").await,
            Err(AlbumError::Forbidden(_))
        ));
        assert!(matches!(
            f.service.add_target_email(&owner, restricted.id, "nope").await,
            Err(AlbumError::Validation(_))
        ));
        f.service
            .add_target_email(&owner, restricted.id, "otto@example.com")
            .await
            .unwrap();
        let targets = f
            .service
            .add_target_email(&owner, restricted.id, "otto@example.com")
            .await
            .unwrap();
        assert_eq!(targets, vec!["otto@example.com"]);

        let detail = f
            .service
            .get(&Viewer::from(&other), restricted.id, MediaSort::Date, SortOrder::Desc)
            .await;
        assert!(detail.is_ok());
    }

    #[tokio::test]
    async fn test_delete_removes_album_and_objects() {
        let f = setup().await;
        let owner = user(&f.users, "Olga").await;
        let other = user(&f.users, "Otto").await;

        let mut req = request("Gone soon", PrivacyMode::Public);
        req.images = vec![image("a.png", "")];
        let album = f.service.create(&owner, req).await.unwrap();
        let key_dir = f.dir.path().join(format!("images/albums/album_{}", album.id));
        assert_eq!(std::fs::read_dir(&key_dir).unwrap().count(), 1);

        assert!(matches!(
            f.service.delete(&other, album.id).await,
            Err(AlbumError::Forbidden(_))
        ));
        f.service.delete(&owner, album.id).await.unwrap();

        assert!(f.albums.get_by_id(album.id).await.unwrap().is_none());
        assert_eq!(std::fs::read_dir(&key_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_likes_and_comments_require_visibility() {
        let f = setup().await;
        let owner = user(&f.users, "Olga").await;
        let fan = user(&f.users, "Fay").await;

        let mut req = request("Likeable", PrivacyMode::Public);
        req.images = vec![image("a.png", "")];
        let public = f.service.create(&owner, req).await.unwrap();
        let private = f
            .service
            .create(&owner, request("Mine", PrivacyMode::Private))
            .await
            .unwrap();
        let viewer = Viewer::from(&fan);

        let liked = f.service.toggle_like(&viewer, public.id).await.unwrap();
        assert_eq!(liked, LikeOutcome { liked: true, likes_count: 1 });
        let unliked = f.service.toggle_like(&viewer, public.id).await.unwrap();
        assert_eq!(unliked, LikeOutcome { liked: false, likes_count: 0 });
        assert!(matches!(
            f.service.toggle_like(&viewer, private.id).await,
            Err(AlbumError::Access(AccessError::Denied))
        ));

        let media_id = f.media.list_by_album(public.id).await.unwrap()[0].id;
        assert!(matches!(
            f.service.toggle_media_like(&viewer, media_id, MediaKind::Video).await,
            Err(AlbumError::MediaNotFound)
        ));
        let outcome = f
            .service
            .toggle_media_like(&viewer, media_id, MediaKind::Image)
            .await
            .unwrap();
        assert_eq!(outcome.likes_count, 1);

        assert!(matches!(
            f.service.add_comment(&viewer, public.id, "   ").await,
            Err(AlbumError::Validation(_))
        ));
        f.service.add_comment(&viewer, public.id, "Lovely").await.unwrap();
        assert!(f.service.add_comment(&viewer, private.id, "Hi").await.is_err());

        let comments = f.service.comments(&viewer, public.id).await.unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].comment.author_name, "Fay Doe");
        assert_eq!(comments[0].created_at_modified, "just now");
    }

    #[tokio::test]
    async fn test_latest_returns_four_newest() {
        let f = setup().await;
        let owner = user(&f.users, "Olga").await;
        for i in 0..6 {
            f.service
                .create(&owner, request(&format!("album {}", i), PrivacyMode::Private))
                .await
                .unwrap();
        }
        let latest = f.service.latest(&Viewer::from(&owner)).await.unwrap();
        assert_eq!(latest.len(), 4);
        assert_eq!(latest[0].media_count, 0);
    }

    #[tokio::test]
    async fn test_temp_upload_and_purge() {
        let f = setup().await;
        let file = UploadedFile::new("snap.jpg", "image/jpeg", vec![1; 10]);
        let temp = f.service.upload_temp(file, "10.1.1.1").await.unwrap();
        assert!(temp.url.contains("/media/temp/"));

        assert_eq!(f.service.purge_expired_temp(Utc::now()).await.unwrap(), 0);
        let later = Utc::now() + Duration::minutes(11);
        assert_eq!(f.service.purge_expired_temp(later).await.unwrap(), 1);
        assert_eq!(std::fs::read_dir(f.dir.path().join("temp")).unwrap().count(), 0);

        let bad = UploadedFile::new("x.exe", "application/octet-stream", vec![1]);
        assert!(f.service.upload_temp(bad, "ip").await.is_err());
    }

    #[tokio::test]
    async fn test_purge_stale_albums() {
        let f = setup().await;
        let owner = user(&f.users, "Olga").await;
        f.service
            .create(&owner, request("fresh", PrivacyMode::Public))
            .await
            .unwrap();

        assert_eq!(
            f.service.purge_stale(Utc::now() - Duration::days(60)).await.unwrap(),
            0
        );
        assert_eq!(
            f.service.purge_stale(Utc::now() + Duration::seconds(5)).await.unwrap(),
            1
        );
    }
}
