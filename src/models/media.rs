//! Media items stored inside albums, and temporary uploads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Top-level storage prefix for this kind
    pub fn storage_prefix(&self) -> &'static str {
        match self {
            MediaKind::Image => "images",
            MediaKind::Video => "videos",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

impl FromStr for MediaKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            _ => Err(anyhow::anyhow!("Invalid media type: {}", s)),
        }
    }
}

/// An image or video belonging to exactly one album
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: i64,
    pub album_id: i64,
    pub kind: MediaKind,
    /// Stored object URL
    pub url: String,
    /// Videos only
    pub thumbnail_url: Option<String>,
    pub description: String,
    /// Size in MB (bytes / 1048576)
    pub size_mb: f64,
    pub mime_type: String,
    pub like_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMedia {
    pub kind: MediaKind,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub description: String,
    pub size_mb: f64,
    pub mime_type: String,
}

/// Replacement content for an existing media row
#[derive(Debug, Clone, Default)]
pub struct MediaPatch {
    pub description: Option<String>,
    /// New stored object: url, size in MB and MIME type
    pub object: Option<(String, f64, String)>,
}

/// Sort key for the media list of a single album
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaSort {
    #[default]
    Date,
    Popular,
    Title,
}

impl MediaSort {
    pub fn parse(s: Option<&str>) -> Self {
        match s.map(|s| s.to_lowercase()) {
            Some(s) if s == "popular" => MediaSort::Popular,
            Some(s) if s == "title" => MediaSort::Title,
            _ => MediaSort::Date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(s: Option<&str>) -> Self {
        match s.map(|s| s.to_uppercase()) {
            Some(s) if s == "ASC" => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }
}

/// Sort a merged image/video list in place.
///
/// Title ordering uses the description; ties keep insertion order.
pub fn sort_media(items: &mut [MediaItem], sort: MediaSort, order: SortOrder) {
    items.sort_by(|a, b| {
        let ord = match sort {
            MediaSort::Date => a.created_at.cmp(&b.created_at),
            MediaSort::Popular => a.like_count.cmp(&b.like_count),
            MediaSort::Title => a.description.to_lowercase().cmp(&b.description.to_lowercase()),
        };
        match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });
}

/// An anonymous upload kept only until `expires_at`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempMedia {
    pub id: i64,
    pub url: String,
    pub ip_address: String,
    pub mime_type: String,
    pub size_mb: f64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn item(id: i64, likes: i64, desc: &str, age_minutes: i64) -> MediaItem {
        let at = Utc::now() - Duration::minutes(age_minutes);
        MediaItem {
            id,
            album_id: 1,
            kind: MediaKind::Image,
            url: format!("u{}", id),
            thumbnail_url: None,
            description: desc.to_string(),
            size_mb: 1.0,
            mime_type: "image/png".to_string(),
            like_count: likes,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_sort_media_by_date_desc() {
        let mut items = vec![item(1, 0, "a", 30), item(2, 0, "b", 10), item(3, 0, "c", 20)];
        sort_media(&mut items, MediaSort::Date, SortOrder::Desc);
        let ids: Vec<i64> = items.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn test_sort_media_popular_and_title() {
        let mut items = vec![item(1, 5, "Zebra", 0), item(2, 9, "apple", 0), item(3, 1, "Mango", 0)];
        sort_media(&mut items, MediaSort::Popular, SortOrder::Desc);
        assert_eq!(items[0].id, 2);

        sort_media(&mut items, MediaSort::Title, SortOrder::Asc);
        let ids: Vec<i64> = items.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn test_parse_sort_params() {
        assert_eq!(MediaSort::parse(Some("title")), MediaSort::Title);
        assert_eq!(MediaSort::parse(None), MediaSort::Date);
        assert_eq!(SortOrder::parse(Some("asc")), SortOrder::Asc);
        assert_eq!(SortOrder::parse(Some("sideways")), SortOrder::Desc);
    }

    #[test]
    fn test_media_kind_parse() {
        assert_eq!("IMAGE".parse::<MediaKind>().unwrap(), MediaKind::Image);
        assert_eq!(MediaKind::Video.storage_prefix(), "videos");
        assert!("audio".parse::<MediaKind>().is_err());
    }
}
