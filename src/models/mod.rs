//! Data models
//!
//! Database entities and the input types repositories accept.

mod album;
mod comment;
mod media;
mod subscription;
mod token;
mod user;

pub use album::{
    Album, AlbumQuery, AlbumSort, CreateAlbumInput, ListParams, PagedResult, PrivacyMode,
    UpdateAlbumInput,
};
pub use comment::{Comment, CommentWithAuthor};
pub use media::{
    sort_media, MediaItem, MediaKind, MediaPatch, MediaSort, NewMedia, SortOrder, TempMedia,
};
pub use subscription::{
    NewSubscription, SubscriptionHistoryEntry, SubscriptionHistoryFilter, SubscriptionStatus,
    SubscriptionTier, UserSubscription,
};
pub use token::{AccessToken, NewAccessToken};
pub use user::{AccountConfig, CreateUserInput, UpdateProfileInput, User, UserStats, UserStatus};
