use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = i64;

/// Name of the per-user auto-managed album that mirrors image favorites.
pub const FAVORITES_ALBUM: &str = "Favorites";

/// Who may see a piece of content, from most to least open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "privacy", rename_all = "lowercase")]
pub enum Privacy {
    Public,
    /// Any authenticated viewer.
    Users,
    /// Owner plus viewers following the owner.
    Followers,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "moderation_status", rename_all = "lowercase")]
pub enum ModerationStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "report_status", rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "report_type", rename_all = "lowercase")]
pub enum ReportType {
    Spam,
    Abuse,
    Other,
}

/// Listing order. `MostFavorited` sorts on favorite count rather than the
/// stored popularity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Newest,
    Oldest,
    MostLiked,
    MostFavorited,
}

impl Default for SortKey {
    fn default() -> Self {
        SortKey::Newest
    }
}

/// Derived popularity metric; recomputed whenever likes or views change,
/// never on first creation (both counts start at zero).
pub fn popularity_score(like_count: i64, view_count: i64) -> i64 {
    like_count * 2 + view_count
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Image {
    pub id: Id,
    pub owner_id: Id,
    pub title: String,
    pub description: Option<String>,
    pub alt_text: Option<String>,
    /// Opaque handle issued by the file store; serving bytes is not our job.
    pub file_handle: String,
    pub mime: String,
    pub uploaded_at: DateTime<Utc>,
    pub views: i64,
    pub privacy: Privacy,
    pub moderation_status: ModerationStatus,
    pub moderation_updated_at: Option<DateTime<Utc>>,
    pub moderated_by: Option<Id>,
    pub category_id: Option<Id>,
    pub popularity_score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewImage {
    pub title: String,
    pub description: Option<String>,
    pub alt_text: Option<String>,
    pub file_handle: String,
    pub mime: String,
    pub privacy: Privacy,
    pub category_id: Option<Id>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateImage {
    pub title: Option<String>,
    pub description: Option<String>,
    pub alt_text: Option<String>,
    pub privacy: Option<Privacy>,
    pub category_id: Option<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Album {
    pub id: Id,
    pub owner_id: Id,
    pub name: String,
    /// Weak reference; the image itself knows nothing about being a cover.
    pub cover_image_id: Option<Id>,
    pub privacy: Privacy,
    pub moderation_status: ModerationStatus,
    pub created_at: DateTime<Utc>,
    pub views: i64,
    pub popularity_score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewAlbum {
    pub name: String,
    #[serde(default = "default_privacy")]
    pub privacy: Privacy,
}

fn default_privacy() -> Privacy {
    Privacy::Public
}

/// Membership row tying an image into an album at an explicit position.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct AlbumMembership {
    pub album_id: Id,
    pub image_id: Id,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Comment {
    pub id: Id,
    pub image_id: Id,
    pub author_id: Id,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub moderation_status: ModerationStatus,
    pub moderation_updated_at: Option<DateTime<Utc>>,
    pub moderated_by: Option<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewComment {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Report {
    pub id: Id,
    pub reporter_id: Id,
    pub image_id: Option<Id>,
    pub comment_id: Option<Id>,
    pub report_type: ReportType,
    pub description: Option<String>,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
}

/// Exactly one of `image_id` / `comment_id` must be set.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewReport {
    pub image_id: Option<Id>,
    pub comment_id: Option<Id>,
    pub report_type: ReportType,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Tag {
    pub id: Id,
    pub name: String,
    pub moderation_status: ModerationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Category {
    pub id: Id,
    pub name: String,
}

/// Per-item interaction counts plus the requesting viewer's own flags,
/// used for both images and albums.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct InteractionStats {
    pub like_count: i64,
    pub dislike_count: i64,
    pub favorite_count: i64,
    pub viewer_has_liked: bool,
    pub viewer_has_disliked: bool,
    pub viewer_has_favorited: bool,
}

/// Server-side listing filter assembled from query parameters.
#[derive(Debug, Clone, Default)]
pub struct GalleryFilter {
    pub sort: SortKey,
    pub tag_id: Option<Id>,
    pub owner_id: Option<Id>,
    pub query: Option<String>,
}
