//! Album model
//!
//! Albums are owned by one user and carry a privacy mode. Restricted albums
//! keep their allow-list serialized as a JSON array in `target_emails`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Album {
    pub id: i64,
    /// Owner
    pub user_id: i64,
    pub title: String,
    pub description: String,
    /// Stored object URL of the cover image
    pub cover_url: Option<String>,
    pub privacy: PrivacyMode,
    /// Raw serialized allow-list; only consulted when `privacy` is restricted
    #[serde(skip_serializing)]
    pub target_emails: Option<String>,
    pub like_count: i64,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Album {
    /// Parse the stored allow-list.
    ///
    /// A missing or blank column is an empty list. Anything else must be a
    /// JSON array of strings.
    pub fn parse_target_emails(&self) -> Result<Vec<String>, serde_json::Error> {
        match self.target_emails.as_deref().map(str::trim) {
            None | Some("") => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(raw),
        }
    }
}

/// Who may read an album besides its owner.
///
/// Values outside the three known modes are preserved as `Unrecognized` so
/// that the access check can refuse them explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivacyMode {
    Public,
    Private,
    Restricted,
    Unrecognized(String),
}

impl PrivacyMode {
    pub fn as_str(&self) -> &str {
        match self {
            PrivacyMode::Public => "public",
            PrivacyMode::Private => "private",
            PrivacyMode::Restricted => "restricted",
            PrivacyMode::Unrecognized(s) => s,
        }
    }

    /// Map a stored column value; never fails.
    pub fn from_stored(s: &str) -> Self {
        match s {
            "public" => PrivacyMode::Public,
            "private" => PrivacyMode::Private,
            "restricted" => PrivacyMode::Restricted,
            other => PrivacyMode::Unrecognized(other.to_string()),
        }
    }
}

impl Default for PrivacyMode {
    fn default() -> Self {
        PrivacyMode::Public
    }
}

impl fmt::Display for PrivacyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses client input; only the three known modes are accepted.
impl FromStr for PrivacyMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "public" => Ok(PrivacyMode::Public),
            "private" => Ok(PrivacyMode::Private),
            "restricted" => Ok(PrivacyMode::Restricted),
            _ => Err(anyhow::anyhow!("Invalid album privacy: {}", s)),
        }
    }
}

impl Serialize for PrivacyMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PrivacyMode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(PrivacyMode::from_stored(&s))
    }
}

/// Ordering for album listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlbumSort {
    /// Most recently updated first
    #[default]
    Recent,
    Oldest,
    /// Most liked first
    Popular,
}

impl AlbumSort {
    /// Unknown values fall back to `Recent`
    pub fn parse(s: Option<&str>) -> Self {
        match s.map(|s| s.to_lowercase()) {
            Some(s) if s == "oldest" => AlbumSort::Oldest,
            Some(s) if s == "popular" => AlbumSort::Popular,
            _ => AlbumSort::Recent,
        }
    }
}

/// Candidate selection for album listings; visibility is applied afterwards.
#[derive(Debug, Clone, Default)]
pub struct AlbumQuery {
    /// Restrict to one owner
    pub owner_id: Option<i64>,
    /// Include private albums (only for the owner's own listing)
    pub include_private: bool,
    /// Case-insensitive substring of the title
    pub search: Option<String>,
    pub sort: AlbumSort,
}

#[derive(Debug, Clone)]
pub struct CreateAlbumInput {
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub privacy: PrivacyMode,
    pub target_emails: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateAlbumInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub privacy: Option<PrivacyMode>,
    /// `Some(None)` clears the list
    pub target_emails: Option<Option<String>>,
}

/// Pagination parameters (1-indexed page)
#[derive(Debug, Clone, Copy)]
pub struct ListParams {
    pub page: u32,
    pub per_page: u32,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 10,
        }
    }
}

impl ListParams {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, 100),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize) * self.per_page as usize
    }
}

/// One page of results plus the total across all pages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> PagedResult<T> {
    /// Cut one page out of an already filtered and sorted list.
    pub fn from_filtered(all: Vec<T>, params: &ListParams) -> Self {
        let total = all.len() as i64;
        let items = all
            .into_iter()
            .skip(params.offset())
            .take(params.per_page as usize)
            .collect();
        Self {
            items,
            total,
            page: params.page,
            per_page: params.per_page,
        }
    }

    pub fn total_pages(&self) -> u32 {
        if self.per_page == 0 {
            return 0;
        }
        ((self.total as u64 + self.per_page as u64 - 1) / self.per_page as u64) as u32
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> PagedResult<U> {
        PagedResult {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn album_with_targets(raw: Option<&str>) -> Album {
        let now = Utc::now();
        Album {
            id: 1,
            user_id: 1,
            title: "t".to_string(),
            description: String::new(),
            cover_url: None,
            privacy: PrivacyMode::Restricted,
            target_emails: raw.map(str::to_string),
            like_count: 0,
            view_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_parse_target_emails() {
        assert!(album_with_targets(None).parse_target_emails().unwrap().is_empty());
        assert!(album_with_targets(Some(" ")).parse_target_emails().unwrap().is_empty());
        assert_eq!(
            album_with_targets(Some(r#"["a@x.com","b@x.com"]"#))
                .parse_target_emails()
                .unwrap(),
            vec!["a@x.com", "b@x.com"]
        );
        assert!(album_with_targets(Some("a@x.com,b@x.com"))
            .parse_target_emails()
            .is_err());
    }

    #[test]
    fn test_privacy_from_stored_keeps_unknown_values() {
        assert_eq!(PrivacyMode::from_stored("public"), PrivacyMode::Public);
        assert_eq!(
            PrivacyMode::from_stored("friends"),
            PrivacyMode::Unrecognized("friends".to_string())
        );
        assert_eq!(PrivacyMode::from_stored("friends").as_str(), "friends");
    }

    #[test]
    fn test_privacy_from_str_rejects_unknown_values() {
        assert_eq!("Restricted".parse::<PrivacyMode>().unwrap(), PrivacyMode::Restricted);
        assert!("friends".parse::<PrivacyMode>().is_err());
    }

    #[test]
    fn test_album_sort_parse() {
        assert_eq!(AlbumSort::parse(None), AlbumSort::Recent);
        assert_eq!(AlbumSort::parse(Some("POPULAR")), AlbumSort::Popular);
        assert_eq!(AlbumSort::parse(Some("oldest")), AlbumSort::Oldest);
        assert_eq!(AlbumSort::parse(Some("bogus")), AlbumSort::Recent);
    }

    #[test]
    fn test_paged_result_from_filtered() {
        let page = PagedResult::from_filtered((1..=25).collect::<Vec<_>>(), &ListParams::new(3, 10));
        assert_eq!(page.items, vec![21, 22, 23, 24, 25]);
        assert_eq!(page.total, 25);
        assert_eq!(page.total_pages(), 3);

        let beyond = PagedResult::from_filtered(vec![1, 2], &ListParams::new(5, 10));
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.total_pages(), 1);
    }

    #[test]
    fn test_list_params_clamp() {
        let params = ListParams::new(0, 1000);
        assert_eq!(params.page, 1);
        assert_eq!(params.per_page, 100);
        assert_eq!(params.offset(), 0);
    }
}
