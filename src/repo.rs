use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::models::*;
use crate::visibility::{self, ItemMeta, Relation, Viewer};

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

#[async_trait]
pub trait ImageRepo: Send + Sync {
    async fn create_image(&self, owner_id: Id, new: NewImage) -> RepoResult<Image>;
    async fn get_image(&self, id: Id) -> RepoResult<Image>;
    async fn update_image(&self, id: Id, upd: UpdateImage) -> RepoResult<Image>;
    /// Removes the image together with its memberships, ledgers, comments
    /// and reports. The flag reports whether another image still references
    /// the same file handle, so callers know when the stored bytes may go.
    async fn delete_image(&self, id: Id) -> RepoResult<(Image, bool)>;
    /// Listing already filtered through the visibility rules for `viewer`.
    async fn list_images(&self, viewer: &Viewer, filter: &GalleryFilter) -> RepoResult<Vec<Image>>;
    async fn record_view(&self, id: Id) -> RepoResult<Image>;
    async fn set_image_moderation(
        &self,
        id: Id,
        status: ModerationStatus,
        moderator_id: Id,
    ) -> RepoResult<Image>;
    async fn list_pending_images(&self) -> RepoResult<Vec<Image>>;
    async fn image_tags(&self, id: Id) -> RepoResult<Vec<Tag>>;
    async fn image_stats(&self, viewer: &Viewer, id: Id) -> RepoResult<InteractionStats>;
}

#[async_trait]
pub trait AlbumRepo: Send + Sync {
    async fn create_album(&self, owner_id: Id, new: NewAlbum) -> RepoResult<Album>;
    async fn get_album(&self, id: Id) -> RepoResult<Album>;
    async fn list_albums(&self, viewer: &Viewer, sort: SortKey) -> RepoResult<Vec<Album>>;
    /// Find-or-insert of the per-user "Favorites" album.
    async fn favorites_album(&self, owner_id: Id) -> RepoResult<Album>;
    async fn add_album_image(&self, album_id: Id, image_id: Id) -> RepoResult<AlbumMembership>;
    async fn reorder_album(&self, album_id: Id, order: &[Id]) -> RepoResult<()>;
    async fn set_cover(&self, album_id: Id, image_id: Option<Id>) -> RepoResult<Album>;
    /// Images of an album in membership-position order.
    async fn album_images(&self, album_id: Id) -> RepoResult<Vec<Image>>;
    async fn record_album_view(&self, id: Id) -> RepoResult<Album>;
    async fn album_stats(&self, viewer: &Viewer, id: Id) -> RepoResult<InteractionStats>;
}

/// Toggle semantics throughout: create the row if absent (returning true),
/// delete it if present (returning false). Likes and dislikes are mutually
/// exclusive per (user, target).
#[async_trait]
pub trait InteractionRepo: Send + Sync {
    async fn toggle_image_like(&self, user_id: Id, image_id: Id) -> RepoResult<bool>;
    async fn toggle_image_dislike(&self, user_id: Id, image_id: Id) -> RepoResult<bool>;
    async fn toggle_image_favorite(&self, user_id: Id, image_id: Id) -> RepoResult<bool>;
    async fn toggle_album_like(&self, user_id: Id, album_id: Id) -> RepoResult<bool>;
    async fn toggle_album_dislike(&self, user_id: Id, album_id: Id) -> RepoResult<bool>;
    async fn toggle_album_favorite(&self, user_id: Id, album_id: Id) -> RepoResult<bool>;
}

#[async_trait]
pub trait FollowRepo: Send + Sync {
    async fn toggle_follow(&self, follower_id: Id, followed_id: Id) -> RepoResult<bool>;
    async fn is_following(&self, follower_id: Id, followed_id: Id) -> RepoResult<bool>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    async fn add_comment(&self, author_id: Id, image_id: Id, new: NewComment)
        -> RepoResult<Comment>;
    async fn get_comment(&self, id: Id) -> RepoResult<Comment>;
    /// Newest first; non-staff viewers get approved comments plus their own
    /// pending ones.
    async fn list_comments(&self, viewer: &Viewer, image_id: Id) -> RepoResult<Vec<Comment>>;
    async fn set_comment_moderation(
        &self,
        id: Id,
        status: ModerationStatus,
        moderator_id: Id,
    ) -> RepoResult<Comment>;
    async fn delete_comment(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait ReportRepo: Send + Sync {
    /// Fails with `Conflict` when the (reporter, target) pair already has a
    /// report, regardless of its status.
    async fn create_report(&self, reporter_id: Id, new: NewReport) -> RepoResult<Report>;
    async fn get_report(&self, id: Id) -> RepoResult<Report>;
    async fn list_open_reports(&self) -> RepoResult<Vec<Report>>;
    async fn set_report_status(&self, id: Id, status: ReportStatus) -> RepoResult<Report>;
}

#[async_trait]
pub trait TagRepo: Send + Sync {
    async fn list_tags(&self) -> RepoResult<Vec<Tag>>;
    async fn get_tag(&self, id: Id) -> RepoResult<Tag>;
    async fn set_tag_moderation(&self, id: Id, status: ModerationStatus) -> RepoResult<Tag>;
    async fn list_categories(&self) -> RepoResult<Vec<Category>>;
    async fn create_category(&self, name: &str) -> RepoResult<Category>;
}

pub trait Repo:
    ImageRepo + AlbumRepo + InteractionRepo + FollowRepo + CommentRepo + ReportRepo + TagRepo
{
}

impl<T> Repo for T where
    T: ImageRepo + AlbumRepo + InteractionRepo + FollowRepo + CommentRepo + ReportRepo + TagRepo
{
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::path::{Path, PathBuf};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        images: HashMap<Id, Image>,
        albums: HashMap<Id, Album>,
        memberships: Vec<AlbumMembership>,
        comments: HashMap<Id, Comment>,
        tags: HashMap<Id, Tag>,
        categories: HashMap<Id, Category>,
        // (image, tag)
        image_tags: HashSet<(Id, Id)>,
        // ledger rows, keyed (user, target); uniqueness falls out of the set
        image_likes: HashSet<(Id, Id)>,
        image_dislikes: HashSet<(Id, Id)>,
        image_favorites: HashSet<(Id, Id)>,
        album_likes: HashSet<(Id, Id)>,
        album_dislikes: HashSet<(Id, Id)>,
        album_favorites: HashSet<(Id, Id)>,
        // (follower, followed)
        follows: HashSet<(Id, Id)>,
        reports: HashMap<Id, Report>,
        next_id: Id,
    }

    impl State {
        fn image_like_count(&self, image_id: Id) -> i64 {
            self.image_likes.iter().filter(|(_, i)| *i == image_id).count() as i64
        }

        fn album_like_count(&self, album_id: Id) -> i64 {
            self.album_likes.iter().filter(|(_, a)| *a == album_id).count() as i64
        }

        fn image_favorite_count(&self, image_id: Id) -> i64 {
            self.image_favorites.iter().filter(|(_, i)| *i == image_id).count() as i64
        }

        fn album_favorite_count(&self, album_id: Id) -> i64 {
            self.album_favorites.iter().filter(|(_, a)| *a == album_id).count() as i64
        }

        fn recompute_image_score(&mut self, image_id: Id) {
            let likes = self.image_like_count(image_id);
            if let Some(img) = self.images.get_mut(&image_id) {
                img.popularity_score = popularity_score(likes, img.views);
            }
        }

        fn recompute_album_score(&mut self, album_id: Id) {
            let likes = self.album_like_count(album_id);
            if let Some(album) = self.albums.get_mut(&album_id) {
                album.popularity_score = popularity_score(likes, album.views);
            }
        }

        fn image_relation(&self, viewer: &Viewer, image_id: Id) -> Relation {
            let Some(vid) = viewer.id() else {
                return Relation::default();
            };
            let owner = self.images.get(&image_id).map(|i| i.owner_id);
            Relation {
                follows_owner: owner.map(|o| self.follows.contains(&(vid, o))).unwrap_or(false),
                has_reported: self
                    .reports
                    .values()
                    .any(|r| r.reporter_id == vid && r.image_id == Some(image_id)),
            }
        }

        fn album_relation(&self, viewer: &Viewer, album: &Album) -> Relation {
            let Some(vid) = viewer.id() else {
                return Relation::default();
            };
            Relation {
                follows_owner: self.follows.contains(&(vid, album.owner_id)),
                // reports target images and comments only
                has_reported: false,
            }
        }

        /// Find-or-insert of the user's "Favorites" album, done under the
        /// write lock so two concurrent togglers settle on a single row.
        fn favorites_album_id(&mut self, owner_id: Id) -> Id {
            if let Some(a) = self
                .albums
                .values()
                .find(|a| a.owner_id == owner_id && a.name == FAVORITES_ALBUM)
            {
                return a.id;
            }
            self.next_id += 1;
            let id = self.next_id;
            self.albums.insert(
                id,
                Album {
                    id,
                    owner_id,
                    name: FAVORITES_ALBUM.to_string(),
                    cover_image_id: None,
                    privacy: Privacy::Private,
                    moderation_status: ModerationStatus::Approved,
                    created_at: Utc::now(),
                    views: 0,
                    popularity_score: 0,
                },
            );
            id
        }

        fn membership_count(&self, album_id: Id) -> i32 {
            self.memberships.iter().filter(|m| m.album_id == album_id).count() as i32
        }

        /// Append a membership row; the first image into an album becomes its
        /// cover when none is set.
        fn attach_image(&mut self, album_id: Id, image_id: Id) {
            if self
                .memberships
                .iter()
                .any(|m| m.album_id == album_id && m.image_id == image_id)
            {
                return;
            }
            let position = self.membership_count(album_id);
            self.memberships.push(AlbumMembership {
                album_id,
                image_id,
                position,
            });
            if let Some(album) = self.albums.get_mut(&album_id) {
                if album.cover_image_id.is_none() {
                    album.cover_image_id = Some(image_id);
                }
            }
        }

        fn detach_image(&mut self, album_id: Id, image_id: Id) {
            self.memberships
                .retain(|m| !(m.album_id == album_id && m.image_id == image_id));
            if let Some(album) = self.albums.get_mut(&album_id) {
                if album.cover_image_id == Some(image_id) {
                    album.cover_image_id = None;
                }
            }
        }
    }

    fn image_meta(img: &Image) -> ItemMeta {
        ItemMeta {
            owner_id: img.owner_id,
            privacy: img.privacy,
            moderation_status: img.moderation_status,
        }
    }

    fn album_meta(album: &Album) -> ItemMeta {
        ItemMeta {
            owner_id: album.owner_id,
            privacy: album.privacy,
            moderation_status: album.moderation_status,
        }
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn snapshot_path() -> PathBuf {
            match std::env::var("GALLERIA_DATA_DIR") {
                Ok(dir) => {
                    let mut p = PathBuf::from(dir);
                    p.push("state.json");
                    p
                }
                Err(_) => PathBuf::from(SNAPSHOT_PATH),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        tracing::info!(path = %path.display(), "loaded snapshot");
                        s
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "snapshot unreadable, starting empty");
                        State::default()
                    }
                },
                Err(_) => State::default(),
            }
        }

        fn persist(&self) {
            let path = self.snapshot_path.clone();
            if let Ok(s) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(&*path, s) {
                    tracing::error!(path = %path.display(), error = %e, "failed to write snapshot");
                }
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ImageRepo for InMemRepo {
        async fn create_image(&self, owner_id: Id, new: NewImage) -> RepoResult<Image> {
            let mut s = self.state.write().unwrap();
            if let Some(cat) = new.category_id {
                if !s.categories.contains_key(&cat) {
                    return Err(RepoError::NotFound);
                }
            }
            let id = Self::next_id(&mut s);
            let image = Image {
                id,
                owner_id,
                title: new.title,
                description: new.description,
                alt_text: new.alt_text,
                file_handle: new.file_handle,
                mime: new.mime,
                uploaded_at: Utc::now(),
                views: 0,
                privacy: new.privacy,
                moderation_status: ModerationStatus::Pending,
                moderation_updated_at: None,
                moderated_by: None,
                category_id: new.category_id,
                popularity_score: 0,
            };
            s.images.insert(id, image.clone());
            for name in new.tags {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                let tag_id = match s.tags.values().find(|t| t.name == name) {
                    Some(t) => t.id,
                    None => {
                        let tid = Self::next_id(&mut s);
                        s.tags.insert(
                            tid,
                            Tag {
                                id: tid,
                                name: name.to_string(),
                                moderation_status: ModerationStatus::Pending,
                            },
                        );
                        tid
                    }
                };
                s.image_tags.insert((id, tag_id));
            }
            drop(s);
            self.persist();
            Ok(image)
        }

        async fn get_image(&self, id: Id) -> RepoResult<Image> {
            let s = self.state.read().unwrap();
            s.images.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn update_image(&self, id: Id, upd: UpdateImage) -> RepoResult<Image> {
            let mut s = self.state.write().unwrap();
            let img = s.images.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(title) = upd.title {
                img.title = title;
            }
            if let Some(description) = upd.description {
                img.description = Some(description);
            }
            if let Some(alt_text) = upd.alt_text {
                img.alt_text = Some(alt_text);
            }
            if let Some(privacy) = upd.privacy {
                img.privacy = privacy;
            }
            if let Some(cat) = upd.category_id {
                img.category_id = Some(cat);
            }
            s.recompute_image_score(id);
            let updated = s.images.get(&id).cloned().ok_or(RepoError::NotFound)?;
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_image(&self, id: Id) -> RepoResult<(Image, bool)> {
            let mut s = self.state.write().unwrap();
            let image = s.images.remove(&id).ok_or(RepoError::NotFound)?;
            s.memberships.retain(|m| m.image_id != id);
            for album in s.albums.values_mut() {
                if album.cover_image_id == Some(id) {
                    album.cover_image_id = None;
                }
            }
            s.image_tags.retain(|(i, _)| *i != id);
            s.image_likes.retain(|(_, i)| *i != id);
            s.image_dislikes.retain(|(_, i)| *i != id);
            s.image_favorites.retain(|(_, i)| *i != id);
            let removed_comments: Vec<Id> = s
                .comments
                .values()
                .filter(|c| c.image_id == id)
                .map(|c| c.id)
                .collect();
            for cid in &removed_comments {
                s.comments.remove(cid);
            }
            s.reports.retain(|_, r| {
                r.image_id != Some(id)
                    && r.comment_id.map_or(true, |c| !removed_comments.contains(&c))
            });
            let handle_in_use = s
                .images
                .values()
                .any(|i| i.file_handle == image.file_handle);
            drop(s);
            self.persist();
            Ok((image, handle_in_use))
        }

        async fn list_images(
            &self,
            viewer: &Viewer,
            filter: &GalleryFilter,
        ) -> RepoResult<Vec<Image>> {
            let s = self.state.read().unwrap();
            let query = filter.query.as_ref().map(|q| q.to_lowercase());
            let mut v: Vec<Image> = s
                .images
                .values()
                .filter(|img| {
                    let rel = s.image_relation(viewer, img.id);
                    visibility::visible_in_listing(viewer, &image_meta(img), &rel)
                })
                .filter(|img| filter.owner_id.map_or(true, |o| img.owner_id == o))
                .filter(|img| {
                    filter
                        .tag_id
                        .map_or(true, |t| s.image_tags.contains(&(img.id, t)))
                })
                .filter(|img| {
                    let Some(q) = &query else { return true };
                    img.title.to_lowercase().contains(q)
                        || img
                            .description
                            .as_ref()
                            .map_or(false, |d| d.to_lowercase().contains(q))
                        || s.image_tags.iter().any(|(i, t)| {
                            *i == img.id
                                && s.tags
                                    .get(t)
                                    .map_or(false, |tag| tag.name.to_lowercase().contains(q))
                        })
                        || img.category_id.map_or(false, |c| {
                            s.categories
                                .get(&c)
                                .map_or(false, |cat| cat.name.to_lowercase().contains(q))
                        })
                })
                .cloned()
                .collect();
            match filter.sort {
                SortKey::Newest => v.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at)),
                SortKey::Oldest => v.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at)),
                SortKey::MostLiked => v.sort_by(|a, b| b.popularity_score.cmp(&a.popularity_score)),
                SortKey::MostFavorited => v.sort_by(|a, b| {
                    s.image_favorite_count(b.id).cmp(&s.image_favorite_count(a.id))
                }),
            }
            Ok(v)
        }

        async fn record_view(&self, id: Id) -> RepoResult<Image> {
            let mut s = self.state.write().unwrap();
            {
                let img = s.images.get_mut(&id).ok_or(RepoError::NotFound)?;
                img.views += 1;
            }
            s.recompute_image_score(id);
            let img = s.images.get(&id).cloned().ok_or(RepoError::NotFound)?;
            drop(s);
            self.persist();
            Ok(img)
        }

        async fn set_image_moderation(
            &self,
            id: Id,
            status: ModerationStatus,
            moderator_id: Id,
        ) -> RepoResult<Image> {
            let mut s = self.state.write().unwrap();
            let img = s.images.get_mut(&id).ok_or(RepoError::NotFound)?;
            img.moderation_status = status;
            if status != ModerationStatus::Pending {
                img.moderation_updated_at = Some(Utc::now());
            }
            img.moderated_by = Some(moderator_id);
            let updated = img.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn list_pending_images(&self) -> RepoResult<Vec<Image>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<Image> = s
                .images
                .values()
                .filter(|i| i.moderation_status == ModerationStatus::Pending)
                .cloned()
                .collect();
            v.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
            Ok(v)
        }

        async fn image_tags(&self, id: Id) -> RepoResult<Vec<Tag>> {
            let s = self.state.read().unwrap();
            if !s.images.contains_key(&id) {
                return Err(RepoError::NotFound);
            }
            let mut v: Vec<Tag> = s
                .image_tags
                .iter()
                .filter(|(i, _)| *i == id)
                .filter_map(|(_, t)| s.tags.get(t).cloned())
                .collect();
            v.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(v)
        }

        async fn image_stats(&self, viewer: &Viewer, id: Id) -> RepoResult<InteractionStats> {
            let s = self.state.read().unwrap();
            if !s.images.contains_key(&id) {
                return Err(RepoError::NotFound);
            }
            let dislikes = s.image_dislikes.iter().filter(|(_, i)| *i == id).count() as i64;
            let vid = viewer.id();
            Ok(InteractionStats {
                like_count: s.image_like_count(id),
                dislike_count: dislikes,
                favorite_count: s.image_favorite_count(id),
                viewer_has_liked: vid.map_or(false, |u| s.image_likes.contains(&(u, id))),
                viewer_has_disliked: vid.map_or(false, |u| s.image_dislikes.contains(&(u, id))),
                viewer_has_favorited: vid.map_or(false, |u| s.image_favorites.contains(&(u, id))),
            })
        }
    }

    #[async_trait]
    impl AlbumRepo for InMemRepo {
        async fn create_album(&self, owner_id: Id, new: NewAlbum) -> RepoResult<Album> {
            let mut s = self.state.write().unwrap();
            let name = new.name.trim().to_string();
            if name.is_empty() {
                return Err(RepoError::Invalid("album name must not be empty".into()));
            }
            if s.albums
                .values()
                .any(|a| a.owner_id == owner_id && a.name == name)
            {
                return Err(RepoError::Conflict);
            }
            let id = Self::next_id(&mut s);
            let album = Album {
                id,
                owner_id,
                name,
                cover_image_id: None,
                privacy: new.privacy,
                moderation_status: ModerationStatus::Approved,
                created_at: Utc::now(),
                views: 0,
                popularity_score: 0,
            };
            s.albums.insert(id, album.clone());
            drop(s);
            self.persist();
            Ok(album)
        }

        async fn get_album(&self, id: Id) -> RepoResult<Album> {
            let s = self.state.read().unwrap();
            s.albums.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn list_albums(&self, viewer: &Viewer, sort: SortKey) -> RepoResult<Vec<Album>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<Album> = s
                .albums
                .values()
                .filter(|a| {
                    let rel = s.album_relation(viewer, a);
                    visibility::visible_in_listing(viewer, &album_meta(a), &rel)
                })
                .cloned()
                .collect();
            match sort {
                SortKey::Newest => v.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
                SortKey::Oldest => v.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
                SortKey::MostLiked => v.sort_by(|a, b| b.popularity_score.cmp(&a.popularity_score)),
                SortKey::MostFavorited => v.sort_by(|a, b| {
                    s.album_favorite_count(b.id).cmp(&s.album_favorite_count(a.id))
                }),
            }
            Ok(v)
        }

        async fn favorites_album(&self, owner_id: Id) -> RepoResult<Album> {
            let mut s = self.state.write().unwrap();
            let id = s.favorites_album_id(owner_id);
            let album = s.albums.get(&id).cloned().ok_or(RepoError::NotFound)?;
            drop(s);
            self.persist();
            Ok(album)
        }

        async fn add_album_image(&self, album_id: Id, image_id: Id) -> RepoResult<AlbumMembership> {
            let mut s = self.state.write().unwrap();
            if !s.albums.contains_key(&album_id) {
                return Err(RepoError::NotFound);
            }
            if !s.images.contains_key(&image_id) {
                return Err(RepoError::NotFound);
            }
            if s.memberships
                .iter()
                .any(|m| m.album_id == album_id && m.image_id == image_id)
            {
                return Err(RepoError::Conflict);
            }
            s.attach_image(album_id, image_id);
            let membership = s
                .memberships
                .iter()
                .find(|m| m.album_id == album_id && m.image_id == image_id)
                .cloned()
                .ok_or_else(|| RepoError::Internal("membership vanished".into()))?;
            drop(s);
            self.persist();
            Ok(membership)
        }

        async fn reorder_album(&self, album_id: Id, order: &[Id]) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            if !s.albums.contains_key(&album_id) {
                return Err(RepoError::NotFound);
            }
            for (index, image_id) in order.iter().enumerate() {
                if let Some(m) = s
                    .memberships
                    .iter_mut()
                    .find(|m| m.album_id == album_id && m.image_id == *image_id)
                {
                    m.position = index as i32;
                }
            }
            drop(s);
            self.persist();
            Ok(())
        }

        async fn set_cover(&self, album_id: Id, image_id: Option<Id>) -> RepoResult<Album> {
            let mut s = self.state.write().unwrap();
            if let Some(img) = image_id {
                if !s.images.contains_key(&img) {
                    return Err(RepoError::NotFound);
                }
            }
            let album = s.albums.get_mut(&album_id).ok_or(RepoError::NotFound)?;
            album.cover_image_id = image_id;
            let updated = album.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn album_images(&self, album_id: Id) -> RepoResult<Vec<Image>> {
            let s = self.state.read().unwrap();
            if !s.albums.contains_key(&album_id) {
                return Err(RepoError::NotFound);
            }
            let mut rows: Vec<&AlbumMembership> = s
                .memberships
                .iter()
                .filter(|m| m.album_id == album_id)
                .collect();
            rows.sort_by_key(|m| m.position);
            Ok(rows
                .into_iter()
                .filter_map(|m| s.images.get(&m.image_id).cloned())
                .collect())
        }

        async fn record_album_view(&self, id: Id) -> RepoResult<Album> {
            let mut s = self.state.write().unwrap();
            {
                let album = s.albums.get_mut(&id).ok_or(RepoError::NotFound)?;
                album.views += 1;
            }
            s.recompute_album_score(id);
            let album = s.albums.get(&id).cloned().ok_or(RepoError::NotFound)?;
            drop(s);
            self.persist();
            Ok(album)
        }

        async fn album_stats(&self, viewer: &Viewer, id: Id) -> RepoResult<InteractionStats> {
            let s = self.state.read().unwrap();
            if !s.albums.contains_key(&id) {
                return Err(RepoError::NotFound);
            }
            let dislikes = s.album_dislikes.iter().filter(|(_, a)| *a == id).count() as i64;
            let vid = viewer.id();
            Ok(InteractionStats {
                like_count: s.album_like_count(id),
                dislike_count: dislikes,
                favorite_count: s.album_favorite_count(id),
                viewer_has_liked: vid.map_or(false, |u| s.album_likes.contains(&(u, id))),
                viewer_has_disliked: vid.map_or(false, |u| s.album_dislikes.contains(&(u, id))),
                viewer_has_favorited: vid.map_or(false, |u| s.album_favorites.contains(&(u, id))),
            })
        }
    }

    #[async_trait]
    impl InteractionRepo for InMemRepo {
        async fn toggle_image_like(&self, user_id: Id, image_id: Id) -> RepoResult<bool> {
            let mut s = self.state.write().unwrap();
            if !s.images.contains_key(&image_id) {
                return Err(RepoError::NotFound);
            }
            let liked = if s.image_likes.remove(&(user_id, image_id)) {
                false
            } else {
                s.image_dislikes.remove(&(user_id, image_id));
                s.image_likes.insert((user_id, image_id));
                true
            };
            s.recompute_image_score(image_id);
            drop(s);
            self.persist();
            Ok(liked)
        }

        async fn toggle_image_dislike(&self, user_id: Id, image_id: Id) -> RepoResult<bool> {
            let mut s = self.state.write().unwrap();
            if !s.images.contains_key(&image_id) {
                return Err(RepoError::NotFound);
            }
            let disliked = if s.image_dislikes.remove(&(user_id, image_id)) {
                false
            } else {
                s.image_likes.remove(&(user_id, image_id));
                s.image_dislikes.insert((user_id, image_id));
                true
            };
            s.recompute_image_score(image_id);
            drop(s);
            self.persist();
            Ok(disliked)
        }

        async fn toggle_image_favorite(&self, user_id: Id, image_id: Id) -> RepoResult<bool> {
            let mut s = self.state.write().unwrap();
            if !s.images.contains_key(&image_id) {
                return Err(RepoError::NotFound);
            }
            let favorited = if s.image_favorites.remove(&(user_id, image_id)) {
                // Membership in "Favorites" stands for "no other album of
                // mine holds this image"; keep it when another album does.
                let fav_id = s.favorites_album_id(user_id);
                let elsewhere = s.memberships.iter().any(|m| {
                    m.image_id == image_id
                        && m.album_id != fav_id
                        && s.albums
                            .get(&m.album_id)
                            .map_or(false, |a| a.owner_id == user_id)
                });
                if !elsewhere {
                    s.detach_image(fav_id, image_id);
                }
                false
            } else {
                s.image_favorites.insert((user_id, image_id));
                let fav_id = s.favorites_album_id(user_id);
                s.attach_image(fav_id, image_id);
                true
            };
            drop(s);
            self.persist();
            Ok(favorited)
        }

        async fn toggle_album_like(&self, user_id: Id, album_id: Id) -> RepoResult<bool> {
            let mut s = self.state.write().unwrap();
            if !s.albums.contains_key(&album_id) {
                return Err(RepoError::NotFound);
            }
            let liked = if s.album_likes.remove(&(user_id, album_id)) {
                false
            } else {
                s.album_dislikes.remove(&(user_id, album_id));
                s.album_likes.insert((user_id, album_id));
                true
            };
            s.recompute_album_score(album_id);
            drop(s);
            self.persist();
            Ok(liked)
        }

        async fn toggle_album_dislike(&self, user_id: Id, album_id: Id) -> RepoResult<bool> {
            let mut s = self.state.write().unwrap();
            if !s.albums.contains_key(&album_id) {
                return Err(RepoError::NotFound);
            }
            let disliked = if s.album_dislikes.remove(&(user_id, album_id)) {
                false
            } else {
                s.album_likes.remove(&(user_id, album_id));
                s.album_dislikes.insert((user_id, album_id));
                true
            };
            s.recompute_album_score(album_id);
            drop(s);
            self.persist();
            Ok(disliked)
        }

        async fn toggle_album_favorite(&self, user_id: Id, album_id: Id) -> RepoResult<bool> {
            let mut s = self.state.write().unwrap();
            if !s.albums.contains_key(&album_id) {
                return Err(RepoError::NotFound);
            }
            let favorited = if s.album_favorites.remove(&(user_id, album_id)) {
                false
            } else {
                s.album_favorites.insert((user_id, album_id));
                true
            };
            drop(s);
            self.persist();
            Ok(favorited)
        }
    }

    #[async_trait]
    impl FollowRepo for InMemRepo {
        async fn toggle_follow(&self, follower_id: Id, followed_id: Id) -> RepoResult<bool> {
            if follower_id == followed_id {
                return Err(RepoError::Invalid("users cannot follow themselves".into()));
            }
            let mut s = self.state.write().unwrap();
            let following = if s.follows.remove(&(follower_id, followed_id)) {
                false
            } else {
                s.follows.insert((follower_id, followed_id));
                true
            };
            drop(s);
            self.persist();
            Ok(following)
        }

        async fn is_following(&self, follower_id: Id, followed_id: Id) -> RepoResult<bool> {
            let s = self.state.read().unwrap();
            Ok(s.follows.contains(&(follower_id, followed_id)))
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn add_comment(
            &self,
            author_id: Id,
            image_id: Id,
            new: NewComment,
        ) -> RepoResult<Comment> {
            let mut s = self.state.write().unwrap();
            if !s.images.contains_key(&image_id) {
                return Err(RepoError::NotFound);
            }
            let id = Self::next_id(&mut s);
            let comment = Comment {
                id,
                image_id,
                author_id,
                content: new.content,
                created_at: Utc::now(),
                moderation_status: ModerationStatus::Pending,
                moderation_updated_at: None,
                moderated_by: None,
            };
            s.comments.insert(id, comment.clone());
            drop(s);
            self.persist();
            Ok(comment)
        }

        async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
            let s = self.state.read().unwrap();
            s.comments.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn list_comments(&self, viewer: &Viewer, image_id: Id) -> RepoResult<Vec<Comment>> {
            let s = self.state.read().unwrap();
            if !s.images.contains_key(&image_id) {
                return Err(RepoError::NotFound);
            }
            let mut v: Vec<Comment> = s
                .comments
                .values()
                .filter(|c| c.image_id == image_id)
                .filter(|c| {
                    viewer.is_staff()
                        || c.moderation_status == ModerationStatus::Approved
                        || viewer.id() == Some(c.author_id)
                })
                .cloned()
                .collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(v)
        }

        async fn set_comment_moderation(
            &self,
            id: Id,
            status: ModerationStatus,
            moderator_id: Id,
        ) -> RepoResult<Comment> {
            let mut s = self.state.write().unwrap();
            let comment = s.comments.get_mut(&id).ok_or(RepoError::NotFound)?;
            comment.moderation_status = status;
            if status != ModerationStatus::Pending {
                comment.moderation_updated_at = Some(Utc::now());
            }
            comment.moderated_by = Some(moderator_id);
            let updated = comment.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_comment(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            if s.comments.remove(&id).is_none() {
                return Err(RepoError::NotFound);
            }
            // reports against the comment go with it
            s.reports.retain(|_, r| r.comment_id != Some(id));
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl ReportRepo for InMemRepo {
        async fn create_report(&self, reporter_id: Id, new: NewReport) -> RepoResult<Report> {
            let mut s = self.state.write().unwrap();
            match (new.image_id, new.comment_id) {
                (Some(img), None) => {
                    if !s.images.contains_key(&img) {
                        return Err(RepoError::NotFound);
                    }
                }
                (None, Some(c)) => {
                    if !s.comments.contains_key(&c) {
                        return Err(RepoError::NotFound);
                    }
                }
                _ => {
                    return Err(RepoError::Invalid(
                        "report must target exactly one of image or comment".into(),
                    ))
                }
            }
            let duplicate = s.reports.values().any(|r| {
                r.reporter_id == reporter_id
                    && ((new.image_id.is_some() && r.image_id == new.image_id)
                        || (new.comment_id.is_some() && r.comment_id == new.comment_id))
            });
            if duplicate {
                return Err(RepoError::Conflict);
            }
            let id = Self::next_id(&mut s);
            let report = Report {
                id,
                reporter_id,
                image_id: new.image_id,
                comment_id: new.comment_id,
                report_type: new.report_type,
                description: new.description,
                status: ReportStatus::Pending,
                created_at: Utc::now(),
            };
            s.reports.insert(id, report.clone());
            drop(s);
            self.persist();
            Ok(report)
        }

        async fn get_report(&self, id: Id) -> RepoResult<Report> {
            let s = self.state.read().unwrap();
            s.reports.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn list_open_reports(&self) -> RepoResult<Vec<Report>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<Report> = s
                .reports
                .values()
                .filter(|r| r.status == ReportStatus::Pending)
                .cloned()
                .collect();
            v.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(v)
        }

        async fn set_report_status(&self, id: Id, status: ReportStatus) -> RepoResult<Report> {
            let mut s = self.state.write().unwrap();
            let report = s.reports.get_mut(&id).ok_or(RepoError::NotFound)?;
            report.status = status;
            let updated = report.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }
    }

    #[async_trait]
    impl TagRepo for InMemRepo {
        async fn list_tags(&self) -> RepoResult<Vec<Tag>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<Tag> = s.tags.values().cloned().collect();
            v.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(v)
        }

        async fn get_tag(&self, id: Id) -> RepoResult<Tag> {
            let s = self.state.read().unwrap();
            s.tags.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn set_tag_moderation(&self, id: Id, status: ModerationStatus) -> RepoResult<Tag> {
            let mut s = self.state.write().unwrap();
            let tag = s.tags.get_mut(&id).ok_or(RepoError::NotFound)?;
            tag.moderation_status = status;
            let updated = tag.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn list_categories(&self) -> RepoResult<Vec<Category>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<Category> = s.categories.values().cloned().collect();
            v.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(v)
        }

        async fn create_category(&self, name: &str) -> RepoResult<Category> {
            let name = name.trim();
            if name.is_empty() {
                return Err(RepoError::Invalid("category name must not be empty".into()));
            }
            let mut s = self.state.write().unwrap();
            if s.categories.values().any(|c| c.name.eq_ignore_ascii_case(name)) {
                return Err(RepoError::Conflict);
            }
            let id = Self::next_id(&mut s);
            let category = Category {
                id,
                name: name.to_string(),
            };
            s.categories.insert(id, category.clone());
            drop(s);
            self.persist();
            Ok(category)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres, QueryBuilder};

    #[derive(Clone)]
    pub struct PgRepo {
        pool: Pool<Postgres>,
    }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self {
            Self { pool }
        }
    }

    fn internal(e: sqlx::Error) -> RepoError {
        RepoError::Internal(e.to_string())
    }

    /// Appends the moderation + privacy + reported-exclusion WHERE clauses
    /// for listings. `alias` is the table alias carrying owner_id / privacy /
    /// moderation_status columns; `reports_col` names the report FK to match
    /// against, or None when the entity cannot be reported.
    fn push_listing_gate(
        qb: &mut QueryBuilder<'_, Postgres>,
        viewer: &Viewer,
        alias: &str,
        reports_col: Option<&str>,
    ) {
        match viewer {
            Viewer::User { staff: true, .. } => {
                qb.push(" TRUE");
            }
            Viewer::Anonymous => {
                qb.push(format!(
                    " {a}.moderation_status = 'approved' AND {a}.privacy = 'public'",
                    a = alias
                ));
            }
            Viewer::User { id, staff: false } => {
                qb.push(format!(
                    " {a}.moderation_status = 'approved' AND ({a}.privacy IN ('public','users') \
                     OR ({a}.privacy = 'followers' AND ({a}.owner_id = ",
                    a = alias
                ));
                qb.push_bind(*id);
                qb.push(" OR EXISTS (SELECT 1 FROM follows f WHERE f.follower_id = ");
                qb.push_bind(*id);
                qb.push(format!(
                    " AND f.followed_id = {a}.owner_id))) OR ({a}.privacy = 'private' AND {a}.owner_id = ",
                    a = alias
                ));
                qb.push_bind(*id);
                qb.push("))");
                if let Some(col) = reports_col {
                    qb.push(" AND NOT EXISTS (SELECT 1 FROM reports r WHERE r.reporter_id = ");
                    qb.push_bind(*id);
                    qb.push(format!(" AND r.{col} = {a}.id)", col = col, a = alias));
                }
            }
        }
    }

    #[async_trait]
    impl ImageRepo for PgRepo {
        async fn create_image(&self, owner_id: Id, new: NewImage) -> RepoResult<Image> {
            let mut tx = self.pool.begin().await.map_err(internal)?;
            let image = sqlx::query_as::<_, Image>(
                "INSERT INTO images (owner_id, title, description, alt_text, file_handle, mime, privacy, category_id) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8) RETURNING *",
            )
            .bind(owner_id)
            .bind(&new.title)
            .bind(&new.description)
            .bind(&new.alt_text)
            .bind(&new.file_handle)
            .bind(&new.mime)
            .bind(new.privacy)
            .bind(new.category_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|_| RepoError::NotFound)?;
            for name in &new.tags {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                sqlx::query(
                    "INSERT INTO tags (name) VALUES ($1) ON CONFLICT (name) DO NOTHING",
                )
                .bind(name)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
                sqlx::query(
                    "INSERT INTO image_tags (image_id, tag_id) \
                     SELECT $1, t.id FROM tags t WHERE t.name = $2 \
                     ON CONFLICT DO NOTHING",
                )
                .bind(image.id)
                .bind(name)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
            }
            tx.commit().await.map_err(internal)?;
            Ok(image)
        }

        async fn get_image(&self, id: Id) -> RepoResult<Image> {
            sqlx::query_as::<_, Image>("SELECT * FROM images WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)
        }

        async fn update_image(&self, id: Id, upd: UpdateImage) -> RepoResult<Image> {
            sqlx::query_as::<_, Image>(
                "UPDATE images SET \
                   title = COALESCE($2, title), \
                   description = COALESCE($3, description), \
                   alt_text = COALESCE($4, alt_text), \
                   privacy = COALESCE($5, privacy), \
                   category_id = COALESCE($6, category_id), \
                   popularity_score = (SELECT COUNT(*) FROM image_likes l WHERE l.image_id = id) * 2 + views \
                 WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .bind(upd.title)
            .bind(upd.description)
            .bind(upd.alt_text)
            .bind(upd.privacy)
            .bind(upd.category_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?
            .ok_or(RepoError::NotFound)
        }

        async fn delete_image(&self, id: Id) -> RepoResult<(Image, bool)> {
            let mut tx = self.pool.begin().await.map_err(internal)?;
            let image =
                sqlx::query_as::<_, Image>("SELECT * FROM images WHERE id = $1 FOR UPDATE")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(internal)?
                    .ok_or(RepoError::NotFound)?;
            // memberships, ledgers, comments and reports cascade; album covers
            // fall back to NULL via the FK.
            sqlx::query("DELETE FROM images WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
            let (handle_in_use,): (bool,) =
                sqlx::query_as("SELECT EXISTS (SELECT 1 FROM images WHERE file_handle = $1)")
                    .bind(&image.file_handle)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(internal)?;
            tx.commit().await.map_err(internal)?;
            Ok((image, handle_in_use))
        }

        async fn list_images(
            &self,
            viewer: &Viewer,
            filter: &GalleryFilter,
        ) -> RepoResult<Vec<Image>> {
            let mut qb = QueryBuilder::<Postgres>::new("SELECT i.* FROM images i WHERE");
            push_listing_gate(&mut qb, viewer, "i", Some("image_id"));
            if let Some(owner) = filter.owner_id {
                qb.push(" AND i.owner_id = ");
                qb.push_bind(owner);
            }
            if let Some(tag) = filter.tag_id {
                qb.push(" AND EXISTS (SELECT 1 FROM image_tags it WHERE it.image_id = i.id AND it.tag_id = ");
                qb.push_bind(tag);
                qb.push(")");
            }
            if let Some(q) = &filter.query {
                let pattern = format!("%{}%", q);
                qb.push(" AND (i.title ILIKE ");
                qb.push_bind(pattern.clone());
                qb.push(" OR i.description ILIKE ");
                qb.push_bind(pattern.clone());
                qb.push(
                    " OR EXISTS (SELECT 1 FROM image_tags it JOIN tags t ON t.id = it.tag_id \
                     WHERE it.image_id = i.id AND t.name ILIKE ",
                );
                qb.push_bind(pattern.clone());
                qb.push(
                    ") OR EXISTS (SELECT 1 FROM categories c WHERE c.id = i.category_id AND c.name ILIKE ",
                );
                qb.push_bind(pattern);
                qb.push("))");
            }
            qb.push(match filter.sort {
                SortKey::Newest => " ORDER BY i.uploaded_at DESC",
                SortKey::Oldest => " ORDER BY i.uploaded_at ASC",
                SortKey::MostLiked => " ORDER BY i.popularity_score DESC",
                SortKey::MostFavorited => {
                    " ORDER BY (SELECT COUNT(*) FROM image_favorites fv WHERE fv.image_id = i.id) DESC"
                }
            });
            qb.build_query_as::<Image>()
                .fetch_all(&self.pool)
                .await
                .map_err(internal)
        }

        async fn record_view(&self, id: Id) -> RepoResult<Image> {
            sqlx::query_as::<_, Image>(
                "UPDATE images SET views = views + 1, \
                   popularity_score = (SELECT COUNT(*) FROM image_likes l WHERE l.image_id = id) * 2 + views + 1 \
                 WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?
            .ok_or(RepoError::NotFound)
        }

        async fn set_image_moderation(
            &self,
            id: Id,
            status: ModerationStatus,
            moderator_id: Id,
        ) -> RepoResult<Image> {
            sqlx::query_as::<_, Image>(
                "UPDATE images SET moderation_status = $2, moderated_by = $3, \
                   moderation_updated_at = CASE WHEN $2 = 'pending'::moderation_status THEN moderation_updated_at ELSE now() END \
                 WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .bind(status)
            .bind(moderator_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?
            .ok_or(RepoError::NotFound)
        }

        async fn list_pending_images(&self) -> RepoResult<Vec<Image>> {
            sqlx::query_as::<_, Image>(
                "SELECT * FROM images WHERE moderation_status = 'pending' ORDER BY uploaded_at ASC",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
        }

        async fn image_tags(&self, id: Id) -> RepoResult<Vec<Tag>> {
            sqlx::query_as::<_, Tag>(
                "SELECT t.* FROM tags t JOIN image_tags it ON it.tag_id = t.id \
                 WHERE it.image_id = $1 ORDER BY t.name",
            )
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
        }

        async fn image_stats(&self, viewer: &Viewer, id: Id) -> RepoResult<InteractionStats> {
            let uid = viewer.id().unwrap_or(-1);
            let row: (i64, i64, i64, bool, bool, bool) = sqlx::query_as(
                "SELECT \
                   (SELECT COUNT(*) FROM image_likes WHERE image_id = $1), \
                   (SELECT COUNT(*) FROM image_dislikes WHERE image_id = $1), \
                   (SELECT COUNT(*) FROM image_favorites WHERE image_id = $1), \
                   EXISTS (SELECT 1 FROM image_likes WHERE image_id = $1 AND user_id = $2), \
                   EXISTS (SELECT 1 FROM image_dislikes WHERE image_id = $1 AND user_id = $2), \
                   EXISTS (SELECT 1 FROM image_favorites WHERE image_id = $1 AND user_id = $2)",
            )
            .bind(id)
            .bind(uid)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
            Ok(InteractionStats {
                like_count: row.0,
                dislike_count: row.1,
                favorite_count: row.2,
                viewer_has_liked: row.3,
                viewer_has_disliked: row.4,
                viewer_has_favorited: row.5,
            })
        }
    }

    #[async_trait]
    impl AlbumRepo for PgRepo {
        async fn create_album(&self, owner_id: Id, new: NewAlbum) -> RepoResult<Album> {
            let name = new.name.trim().to_string();
            if name.is_empty() {
                return Err(RepoError::Invalid("album name must not be empty".into()));
            }
            sqlx::query_as::<_, Album>(
                "INSERT INTO albums (owner_id, name, privacy) VALUES ($1,$2,$3) RETURNING *",
            )
            .bind(owner_id)
            .bind(&name)
            .bind(new.privacy)
            .fetch_one(&self.pool)
            .await
            .map_err(|_| RepoError::Conflict)
        }

        async fn get_album(&self, id: Id) -> RepoResult<Album> {
            sqlx::query_as::<_, Album>("SELECT * FROM albums WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)
        }

        async fn list_albums(&self, viewer: &Viewer, sort: SortKey) -> RepoResult<Vec<Album>> {
            let mut qb = QueryBuilder::<Postgres>::new("SELECT a.* FROM albums a WHERE");
            push_listing_gate(&mut qb, viewer, "a", None);
            qb.push(match sort {
                SortKey::Newest => " ORDER BY a.created_at DESC",
                SortKey::Oldest => " ORDER BY a.created_at ASC",
                SortKey::MostLiked => " ORDER BY a.popularity_score DESC",
                SortKey::MostFavorited => {
                    " ORDER BY (SELECT COUNT(*) FROM album_favorites fv WHERE fv.album_id = a.id) DESC"
                }
            });
            qb.build_query_as::<Album>()
                .fetch_all(&self.pool)
                .await
                .map_err(internal)
        }

        async fn favorites_album(&self, owner_id: Id) -> RepoResult<Album> {
            // the unique (owner_id, name) key resolves racing creators to one row
            sqlx::query(
                "INSERT INTO albums (owner_id, name, privacy) VALUES ($1,$2,'private') \
                 ON CONFLICT (owner_id, name) DO NOTHING",
            )
            .bind(owner_id)
            .bind(FAVORITES_ALBUM)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            sqlx::query_as::<_, Album>("SELECT * FROM albums WHERE owner_id = $1 AND name = $2")
                .bind(owner_id)
                .bind(FAVORITES_ALBUM)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)
        }

        async fn add_album_image(&self, album_id: Id, image_id: Id) -> RepoResult<AlbumMembership> {
            let mut tx = self.pool.begin().await.map_err(internal)?;
            sqlx::query_as::<_, Album>("SELECT * FROM albums WHERE id = $1 FOR UPDATE")
                .bind(album_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)?;
            sqlx::query("SELECT 1 FROM images WHERE id = $1")
                .bind(image_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)?;
            let membership = sqlx::query_as::<_, AlbumMembership>(
                "INSERT INTO album_images (album_id, image_id, position) \
                 VALUES ($1, $2, (SELECT COUNT(*) FROM album_images WHERE album_id = $1)) \
                 RETURNING *",
            )
            .bind(album_id)
            .bind(image_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|_| RepoError::Conflict)?;
            sqlx::query(
                "UPDATE albums SET cover_image_id = $2 WHERE id = $1 AND cover_image_id IS NULL",
            )
            .bind(album_id)
            .bind(image_id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
            tx.commit().await.map_err(internal)?;
            Ok(membership)
        }

        async fn reorder_album(&self, album_id: Id, order: &[Id]) -> RepoResult<()> {
            let mut tx = self.pool.begin().await.map_err(internal)?;
            sqlx::query("SELECT 1 FROM albums WHERE id = $1 FOR UPDATE")
                .bind(album_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)?;
            for (index, image_id) in order.iter().enumerate() {
                sqlx::query(
                    "UPDATE album_images SET position = $3 WHERE album_id = $1 AND image_id = $2",
                )
                .bind(album_id)
                .bind(image_id)
                .bind(index as i32)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
            }
            tx.commit().await.map_err(internal)?;
            Ok(())
        }

        async fn set_cover(&self, album_id: Id, image_id: Option<Id>) -> RepoResult<Album> {
            if let Some(img) = image_id {
                sqlx::query("SELECT 1 FROM images WHERE id = $1")
                    .bind(img)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(internal)?
                    .ok_or(RepoError::NotFound)?;
            }
            sqlx::query_as::<_, Album>(
                "UPDATE albums SET cover_image_id = $2 WHERE id = $1 RETURNING *",
            )
            .bind(album_id)
            .bind(image_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?
            .ok_or(RepoError::NotFound)
        }

        async fn album_images(&self, album_id: Id) -> RepoResult<Vec<Image>> {
            sqlx::query("SELECT 1 FROM albums WHERE id = $1")
                .bind(album_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)?;
            sqlx::query_as::<_, Image>(
                "SELECT i.* FROM images i JOIN album_images ai ON ai.image_id = i.id \
                 WHERE ai.album_id = $1 ORDER BY ai.position ASC",
            )
            .bind(album_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
        }

        async fn record_album_view(&self, id: Id) -> RepoResult<Album> {
            sqlx::query_as::<_, Album>(
                "UPDATE albums SET views = views + 1, \
                   popularity_score = (SELECT COUNT(*) FROM album_likes l WHERE l.album_id = id) * 2 + views + 1 \
                 WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?
            .ok_or(RepoError::NotFound)
        }

        async fn album_stats(&self, viewer: &Viewer, id: Id) -> RepoResult<InteractionStats> {
            let uid = viewer.id().unwrap_or(-1);
            let row: (i64, i64, i64, bool, bool, bool) = sqlx::query_as(
                "SELECT \
                   (SELECT COUNT(*) FROM album_likes WHERE album_id = $1), \
                   (SELECT COUNT(*) FROM album_dislikes WHERE album_id = $1), \
                   (SELECT COUNT(*) FROM album_favorites WHERE album_id = $1), \
                   EXISTS (SELECT 1 FROM album_likes WHERE album_id = $1 AND user_id = $2), \
                   EXISTS (SELECT 1 FROM album_dislikes WHERE album_id = $1 AND user_id = $2), \
                   EXISTS (SELECT 1 FROM album_favorites WHERE album_id = $1 AND user_id = $2)",
            )
            .bind(id)
            .bind(uid)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
            Ok(InteractionStats {
                like_count: row.0,
                dislike_count: row.1,
                favorite_count: row.2,
                viewer_has_liked: row.3,
                viewer_has_disliked: row.4,
                viewer_has_favorited: row.5,
            })
        }
    }

    impl PgRepo {
        /// Shared create-or-delete toggle for the four plain reaction
        /// tables. `opposite` is cleared first so like/dislike stay mutually
        /// exclusive; everything runs in one transaction.
        async fn toggle_reaction(
            &self,
            table: &str,
            opposite: Option<&str>,
            target_col: &str,
            user_id: Id,
            target_id: Id,
            parent_table: &str,
        ) -> RepoResult<bool> {
            let mut tx = self.pool.begin().await.map_err(internal)?;
            sqlx::query(&format!("SELECT 1 FROM {parent_table} WHERE id = $1"))
                .bind(target_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)?;
            let deleted = sqlx::query(&format!(
                "DELETE FROM {table} WHERE user_id = $1 AND {target_col} = $2"
            ))
            .bind(user_id)
            .bind(target_id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?
            .rows_affected();
            let created = if deleted == 0 {
                if let Some(op) = opposite {
                    sqlx::query(&format!(
                        "DELETE FROM {op} WHERE user_id = $1 AND {target_col} = $2"
                    ))
                    .bind(user_id)
                    .bind(target_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                sqlx::query(&format!(
                    "INSERT INTO {table} (user_id, {target_col}) VALUES ($1,$2) \
                     ON CONFLICT DO NOTHING"
                ))
                .bind(user_id)
                .bind(target_id)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
                true
            } else {
                false
            };
            // keep the stored score in step with the like ledger
            if parent_table == "images" {
                sqlx::query(
                    "UPDATE images SET popularity_score = \
                       (SELECT COUNT(*) FROM image_likes l WHERE l.image_id = id) * 2 + views \
                     WHERE id = $1",
                )
                .bind(target_id)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
            } else {
                sqlx::query(
                    "UPDATE albums SET popularity_score = \
                       (SELECT COUNT(*) FROM album_likes l WHERE l.album_id = id) * 2 + views \
                     WHERE id = $1",
                )
                .bind(target_id)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
            }
            tx.commit().await.map_err(internal)?;
            Ok(created)
        }
    }

    #[async_trait]
    impl InteractionRepo for PgRepo {
        async fn toggle_image_like(&self, user_id: Id, image_id: Id) -> RepoResult<bool> {
            self.toggle_reaction(
                "image_likes",
                Some("image_dislikes"),
                "image_id",
                user_id,
                image_id,
                "images",
            )
            .await
        }

        async fn toggle_image_dislike(&self, user_id: Id, image_id: Id) -> RepoResult<bool> {
            self.toggle_reaction(
                "image_dislikes",
                Some("image_likes"),
                "image_id",
                user_id,
                image_id,
                "images",
            )
            .await
        }

        async fn toggle_image_favorite(&self, user_id: Id, image_id: Id) -> RepoResult<bool> {
            let mut tx = self.pool.begin().await.map_err(internal)?;
            sqlx::query("SELECT 1 FROM images WHERE id = $1")
                .bind(image_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)?;
            sqlx::query(
                "INSERT INTO albums (owner_id, name, privacy) VALUES ($1,$2,'private') \
                 ON CONFLICT (owner_id, name) DO NOTHING",
            )
            .bind(user_id)
            .bind(FAVORITES_ALBUM)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
            let fav_id: (Id,) = sqlx::query_as(
                "SELECT id FROM albums WHERE owner_id = $1 AND name = $2 FOR UPDATE",
            )
            .bind(user_id)
            .bind(FAVORITES_ALBUM)
            .fetch_one(&mut *tx)
            .await
            .map_err(internal)?;
            let fav_id = fav_id.0;
            let deleted = sqlx::query(
                "DELETE FROM image_favorites WHERE user_id = $1 AND image_id = $2",
            )
            .bind(user_id)
            .bind(image_id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?
            .rows_affected();
            let favorited = if deleted > 0 {
                let elsewhere: (bool,) = sqlx::query_as(
                    "SELECT EXISTS (SELECT 1 FROM album_images ai \
                       JOIN albums a ON a.id = ai.album_id \
                       WHERE ai.image_id = $1 AND a.owner_id = $2 AND ai.album_id <> $3)",
                )
                .bind(image_id)
                .bind(user_id)
                .bind(fav_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(internal)?;
                if !elsewhere.0 {
                    sqlx::query("DELETE FROM album_images WHERE album_id = $1 AND image_id = $2")
                        .bind(fav_id)
                        .bind(image_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(internal)?;
                    sqlx::query(
                        "UPDATE albums SET cover_image_id = NULL \
                         WHERE id = $1 AND cover_image_id = $2",
                    )
                    .bind(fav_id)
                    .bind(image_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                false
            } else {
                sqlx::query(
                    "INSERT INTO image_favorites (user_id, image_id) VALUES ($1,$2) \
                     ON CONFLICT DO NOTHING",
                )
                .bind(user_id)
                .bind(image_id)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
                sqlx::query(
                    "INSERT INTO album_images (album_id, image_id, position) \
                     VALUES ($1, $2, (SELECT COUNT(*) FROM album_images WHERE album_id = $1)) \
                     ON CONFLICT DO NOTHING",
                )
                .bind(fav_id)
                .bind(image_id)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
                sqlx::query(
                    "UPDATE albums SET cover_image_id = $2 WHERE id = $1 AND cover_image_id IS NULL",
                )
                .bind(fav_id)
                .bind(image_id)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
                true
            };
            tx.commit().await.map_err(internal)?;
            Ok(favorited)
        }

        async fn toggle_album_like(&self, user_id: Id, album_id: Id) -> RepoResult<bool> {
            self.toggle_reaction(
                "album_likes",
                Some("album_dislikes"),
                "album_id",
                user_id,
                album_id,
                "albums",
            )
            .await
        }

        async fn toggle_album_dislike(&self, user_id: Id, album_id: Id) -> RepoResult<bool> {
            self.toggle_reaction(
                "album_dislikes",
                Some("album_likes"),
                "album_id",
                user_id,
                album_id,
                "albums",
            )
            .await
        }

        async fn toggle_album_favorite(&self, user_id: Id, album_id: Id) -> RepoResult<bool> {
            self.toggle_reaction(
                "album_favorites",
                None,
                "album_id",
                user_id,
                album_id,
                "albums",
            )
            .await
        }
    }

    #[async_trait]
    impl FollowRepo for PgRepo {
        async fn toggle_follow(&self, follower_id: Id, followed_id: Id) -> RepoResult<bool> {
            if follower_id == followed_id {
                return Err(RepoError::Invalid("users cannot follow themselves".into()));
            }
            let mut tx = self.pool.begin().await.map_err(internal)?;
            let deleted = sqlx::query(
                "DELETE FROM follows WHERE follower_id = $1 AND followed_id = $2",
            )
            .bind(follower_id)
            .bind(followed_id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?
            .rows_affected();
            let following = if deleted == 0 {
                sqlx::query(
                    "INSERT INTO follows (follower_id, followed_id) VALUES ($1,$2) \
                     ON CONFLICT DO NOTHING",
                )
                .bind(follower_id)
                .bind(followed_id)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
                true
            } else {
                false
            };
            tx.commit().await.map_err(internal)?;
            Ok(following)
        }

        async fn is_following(&self, follower_id: Id, followed_id: Id) -> RepoResult<bool> {
            let row: (bool,) = sqlx::query_as(
                "SELECT EXISTS (SELECT 1 FROM follows WHERE follower_id = $1 AND followed_id = $2)",
            )
            .bind(follower_id)
            .bind(followed_id)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
            Ok(row.0)
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn add_comment(
            &self,
            author_id: Id,
            image_id: Id,
            new: NewComment,
        ) -> RepoResult<Comment> {
            sqlx::query_as::<_, Comment>(
                "INSERT INTO comments (image_id, author_id, content) VALUES ($1,$2,$3) RETURNING *",
            )
            .bind(image_id)
            .bind(author_id)
            .bind(&new.content)
            .fetch_one(&self.pool)
            .await
            .map_err(|_| RepoError::NotFound)
        }

        async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
            sqlx::query_as::<_, Comment>("SELECT * FROM comments WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)
        }

        async fn list_comments(&self, viewer: &Viewer, image_id: Id) -> RepoResult<Vec<Comment>> {
            sqlx::query("SELECT 1 FROM images WHERE id = $1")
                .bind(image_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)?;
            if viewer.is_staff() {
                return sqlx::query_as::<_, Comment>(
                    "SELECT * FROM comments WHERE image_id = $1 ORDER BY created_at DESC",
                )
                .bind(image_id)
                .fetch_all(&self.pool)
                .await
                .map_err(internal);
            }
            sqlx::query_as::<_, Comment>(
                "SELECT * FROM comments WHERE image_id = $1 \
                   AND (moderation_status = 'approved' OR author_id = $2) \
                 ORDER BY created_at DESC",
            )
            .bind(image_id)
            .bind(viewer.id().unwrap_or(-1))
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
        }

        async fn set_comment_moderation(
            &self,
            id: Id,
            status: ModerationStatus,
            moderator_id: Id,
        ) -> RepoResult<Comment> {
            sqlx::query_as::<_, Comment>(
                "UPDATE comments SET moderation_status = $2, moderated_by = $3, \
                   moderation_updated_at = CASE WHEN $2 = 'pending'::moderation_status THEN moderation_updated_at ELSE now() END \
                 WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .bind(status)
            .bind(moderator_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?
            .ok_or(RepoError::NotFound)
        }

        async fn delete_comment(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM comments WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ReportRepo for PgRepo {
        async fn create_report(&self, reporter_id: Id, new: NewReport) -> RepoResult<Report> {
            match (new.image_id, new.comment_id) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => {
                    return Err(RepoError::Invalid(
                        "report must target exactly one of image or comment".into(),
                    ))
                }
            }
            if let Some(img) = new.image_id {
                sqlx::query("SELECT 1 FROM images WHERE id = $1")
                    .bind(img)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(internal)?
                    .ok_or(RepoError::NotFound)?;
            }
            if let Some(c) = new.comment_id {
                sqlx::query("SELECT 1 FROM comments WHERE id = $1")
                    .bind(c)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(internal)?
                    .ok_or(RepoError::NotFound)?;
            }
            // partial unique indexes on (reporter, image) / (reporter, comment)
            sqlx::query_as::<_, Report>(
                "INSERT INTO reports (reporter_id, image_id, comment_id, report_type, description) \
                 VALUES ($1,$2,$3,$4,$5) RETURNING *",
            )
            .bind(reporter_id)
            .bind(new.image_id)
            .bind(new.comment_id)
            .bind(new.report_type)
            .bind(&new.description)
            .fetch_one(&self.pool)
            .await
            .map_err(|_| RepoError::Conflict)
        }

        async fn get_report(&self, id: Id) -> RepoResult<Report> {
            sqlx::query_as::<_, Report>("SELECT * FROM reports WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)
        }

        async fn list_open_reports(&self) -> RepoResult<Vec<Report>> {
            sqlx::query_as::<_, Report>(
                "SELECT * FROM reports WHERE status = 'pending' ORDER BY created_at ASC",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
        }

        async fn set_report_status(&self, id: Id, status: ReportStatus) -> RepoResult<Report> {
            sqlx::query_as::<_, Report>(
                "UPDATE reports SET status = $2 WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .bind(status)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?
            .ok_or(RepoError::NotFound)
        }
    }

    #[async_trait]
    impl TagRepo for PgRepo {
        async fn list_tags(&self) -> RepoResult<Vec<Tag>> {
            sqlx::query_as::<_, Tag>("SELECT * FROM tags ORDER BY name")
                .fetch_all(&self.pool)
                .await
                .map_err(internal)
        }

        async fn get_tag(&self, id: Id) -> RepoResult<Tag> {
            sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)
        }

        async fn set_tag_moderation(&self, id: Id, status: ModerationStatus) -> RepoResult<Tag> {
            sqlx::query_as::<_, Tag>(
                "UPDATE tags SET moderation_status = $2 WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .bind(status)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?
            .ok_or(RepoError::NotFound)
        }

        async fn list_categories(&self) -> RepoResult<Vec<Category>> {
            sqlx::query_as::<_, Category>("SELECT * FROM categories ORDER BY name")
                .fetch_all(&self.pool)
                .await
                .map_err(internal)
        }

        async fn create_category(&self, name: &str) -> RepoResult<Category> {
            let name = name.trim();
            if name.is_empty() {
                return Err(RepoError::Invalid("category name must not be empty".into()));
            }
            sqlx::query_as::<_, Category>(
                "INSERT INTO categories (name) VALUES ($1) RETURNING *",
            )
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|_| RepoError::Conflict)
        }
    }
}
