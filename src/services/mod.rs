//! Services layer - Business logic
//!
//! Services enforce the rules that sit between the HTTP handlers and the
//! repositories:
//! - album visibility and storage quota
//! - account lifecycle and token issuing
//! - object storage and notification side effects

pub mod access;
pub mod album;
pub mod auth;
pub mod notification;
pub mod password;
pub mod quota;
pub mod rate_limiter;
pub mod token;
pub mod totp;
pub mod user;

pub use access::{decide, ensure_visible, filter_visible, AccessError, Viewer, Visibility};
pub use album::{
    AlbumChanges, AlbumDetail, AlbumError, AlbumListRequest, AlbumService, AlbumSummary,
    MediaChange, MediaUpload, NewAlbumRequest,
};
pub use auth::{AuthError, AuthService, LoginOutcome, SignupInput};
pub use notification::{
    dispatcher_from_config, NotificationDispatcher, NotificationKind, NotificationMessage,
    NotificationQueue,
};
pub use password::{hash_password, verify_password};
pub use quota::{QuotaError, QuotaService, StorageReport};
pub use rate_limiter::LoginRateLimiter;
pub use token::{TokenError, TokenKind, TokenSigner};
pub use totp::{TotpError, TotpService};
pub use user::{UserError, UserProfile, UserService};
