//! Album visibility
//!
//! A single decision function answers "may this viewer read this album".
//! Rules are evaluated in order and the first match wins:
//!
//! 1. the owner may always read their album;
//! 2. public albums are readable by anyone, signed in or not;
//! 3. private albums are readable by nobody else;
//! 4. restricted albums are readable by the emails on their allow-list
//!    (exact, case-sensitive match);
//! 5. any other stored mode is refused.
//!
//! A restricted album whose stored allow-list cannot be parsed is a data
//! integrity problem, reported as [`AccessError::DataIntegrity`] on the single
//! album path and silently excluded on the list path.

use crate::models::{Album, PrivacyMode, User};

/// The signed-in user asking to read an album
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub id: i64,
    pub email: String,
}

impl Viewer {
    pub fn new(id: i64, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
        }
    }
}

impl From<&User> for Viewer {
    fn from(user: &User) -> Self {
        Self::new(user.id, user.email.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Allow,
    Deny,
}

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("You do not have access to this album")]
    Denied,

    #[error("Album {album_id} has a malformed target email list: {source}")]
    DataIntegrity {
        album_id: i64,
        #[source]
        source: serde_json::Error,
    },
}

/// Decide whether `viewer` (None for anonymous) may read `album`.
pub fn decide(viewer: Option<&Viewer>, album: &Album) -> Result<Visibility, AccessError> {
    if viewer.is_some_and(|v| v.id == album.user_id) {
        return Ok(Visibility::Allow);
    }

    match &album.privacy {
        PrivacyMode::Public => Ok(Visibility::Allow),
        PrivacyMode::Private => Ok(Visibility::Deny),
        PrivacyMode::Restricted => {
            let targets = album
                .parse_target_emails()
                .map_err(|source| AccessError::DataIntegrity {
                    album_id: album.id,
                    source,
                })?;
            let listed = viewer.is_some_and(|v| targets.iter().any(|email| *email == v.email));
            Ok(if listed {
                Visibility::Allow
            } else {
                Visibility::Deny
            })
        }
        PrivacyMode::Unrecognized(mode) => {
            tracing::debug!("Album {} has unknown privacy mode '{}'", album.id, mode);
            Ok(Visibility::Deny)
        }
    }
}

/// Like [`decide`], but a denial is an error.
pub fn ensure_visible(viewer: Option<&Viewer>, album: &Album) -> Result<(), AccessError> {
    match decide(viewer, album) {
        Ok(Visibility::Allow) => Ok(()),
        Ok(Visibility::Deny) => Err(AccessError::Denied),
        Err(e) => {
            tracing::error!("{}", e);
            Err(e)
        }
    }
}

/// Keep the albums `viewer` may read, preserving input order.
pub fn filter_visible(viewer: Option<&Viewer>, albums: Vec<Album>) -> Vec<Album> {
    albums
        .into_iter()
        .filter(|album| match decide(viewer, album) {
            Ok(Visibility::Allow) => true,
            Ok(Visibility::Deny) => false,
            Err(e) => {
                tracing::warn!("Excluding album from listing: {}", e);
                false
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const OWNER: i64 = 1;

    fn album(id: i64, privacy: PrivacyMode, targets: Option<&str>) -> Album {
        let now = Utc::now();
        Album {
            id,
            user_id: OWNER,
            title: format!("album {}", id),
            description: String::new(),
            cover_url: None,
            privacy,
            target_emails: targets.map(str::to_string),
            like_count: 0,
            view_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn owner() -> Viewer {
        Viewer::new(OWNER, "owner@example.com")
    }

    fn stranger(email: &str) -> Viewer {
        Viewer::new(42, email)
    }

    #[test]
    fn test_owner_reads_every_mode() {
        for privacy in [
            PrivacyMode::Public,
            PrivacyMode::Private,
            PrivacyMode::Restricted,
            PrivacyMode::Unrecognized("friends".to_string()),
        ] {
            let a = album(1, privacy, Some("not json"));
            assert_eq!(decide(Some(&owner()), &a).unwrap(), Visibility::Allow);
        }
    }

    #[test]
    fn test_public_allows_anonymous() {
        let a = album(1, PrivacyMode::Public, None);
        assert_eq!(decide(None, &a).unwrap(), Visibility::Allow);
        assert_eq!(decide(Some(&stranger("x@y.z")), &a).unwrap(), Visibility::Allow);
    }

    #[test]
    fn test_private_denies_everyone_else() {
        let a = album(1, PrivacyMode::Private, Some(r#"["x@y.z"]"#));
        assert_eq!(decide(None, &a).unwrap(), Visibility::Deny);
        assert_eq!(decide(Some(&stranger("x@y.z")), &a).unwrap(), Visibility::Deny);
    }

    #[test]
    fn test_restricted_membership_is_case_sensitive() {
        let a = album(1, PrivacyMode::Restricted, Some(r#"["friend@example.com"]"#));
        assert_eq!(
            decide(Some(&stranger("friend@example.com")), &a).unwrap(),
            Visibility::Allow
        );
        assert_eq!(
            decide(Some(&stranger("Friend@example.com")), &a).unwrap(),
            Visibility::Deny
        );
        assert_eq!(decide(None, &a).unwrap(), Visibility::Deny);
    }

    #[test]
    fn test_restricted_empty_list_denies() {
        let a = album(1, PrivacyMode::Restricted, None);
        assert_eq!(decide(Some(&stranger("a@b.c")), &a).unwrap(), Visibility::Deny);
        let a = album(1, PrivacyMode::Restricted, Some("[]"));
        assert_eq!(decide(Some(&stranger("a@b.c")), &a).unwrap(), Visibility::Deny);
    }

    #[test]
    fn test_malformed_list_is_integrity_error() {
        let a = album(7, PrivacyMode::Restricted, Some("{oops"));
        let err = decide(Some(&stranger("a@b.c")), &a).unwrap_err();
        assert!(matches!(err, AccessError::DataIntegrity { album_id: 7, .. }));

        let err = ensure_visible(Some(&stranger("a@b.c")), &a).unwrap_err();
        assert!(matches!(err, AccessError::DataIntegrity { .. }));
    }

    #[test]
    fn test_unknown_mode_denies() {
        let a = album(1, PrivacyMode::Unrecognized("friends".to_string()), None);
        assert_eq!(decide(Some(&stranger("a@b.c")), &a).unwrap(), Visibility::Deny);
        assert!(matches!(
            ensure_visible(None, &a),
            Err(AccessError::Denied)
        ));
    }

    #[test]
    fn test_filter_excludes_malformed_and_keeps_order() {
        let viewer = stranger("friend@example.com");
        let albums = vec![
            album(1, PrivacyMode::Public, None),
            album(2, PrivacyMode::Restricted, Some("{bad")),
            album(3, PrivacyMode::Private, None),
            album(4, PrivacyMode::Restricted, Some(r#"["friend@example.com"]"#)),
            album(5, PrivacyMode::Public, None),
        ];

        let ids: Vec<i64> = filter_visible(Some(&viewer), albums)
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![1, 4, 5]);
    }

    #[test]
    fn test_filter_keeps_owner_shortcut() {
        let albums = vec![
            album(1, PrivacyMode::Private, None),
            album(2, PrivacyMode::Restricted, Some("{bad")),
        ];
        assert_eq!(filter_visible(Some(&owner()), albums).len(), 2);
    }
}
