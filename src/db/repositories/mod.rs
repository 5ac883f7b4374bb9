//! Database repositories
//!
//! One trait per aggregate, each with a sqlx implementation that dispatches
//! on the configured driver.

pub mod album;
pub mod comment;
pub mod media;
pub mod subscription;
pub mod token;
pub mod user;

pub use album::{AlbumRepository, SqlxAlbumRepository};
pub use comment::{CommentRepository, SqlxCommentRepository};
pub use media::{MediaRepository, SqlxMediaRepository};
pub use subscription::{SqlxSubscriptionRepository, SubscriptionRepository};
pub use token::{SqlxTokenRepository, TokenRepository};
pub use user::{SqlxUserRepository, UserRepository};
