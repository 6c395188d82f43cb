use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use actix_multipart::Multipart;
use futures_util::TryStreamExt as _;
use sha2::{Digest, Sha256};

use crate::auth::{viewer_of, Auth, Role};
use crate::error::ApiError;
use crate::models::*;
use crate::moderation::{self, Decision, Outcome};
use crate::notify::{NotificationSink, ReportSummary};
use crate::rate_limit::RateLimiterFacade;
use crate::repo::Repo;
use crate::storage::{FileStore, FileStoreError};
use crate::visibility::{self, ItemMeta, Relation, Viewer};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::resource("/images")
                    .route(web::get().to(list_images))
                    .route(web::post().to(create_image)),
            )
            .service(
                web::resource("/images/{id}")
                    .route(web::get().to(get_image))
                    .route(web::patch().to(update_image))
                    .route(web::delete().to(delete_image)),
            )
            .service(web::resource("/images/{id}/like").route(web::post().to(like_image)))
            .service(web::resource("/images/{id}/dislike").route(web::post().to(dislike_image)))
            .service(web::resource("/images/{id}/favorite").route(web::post().to(favorite_image)))
            .service(
                web::resource("/images/{id}/comments")
                    .route(web::get().to(list_comments))
                    .route(web::post().to(create_comment)),
            )
            .service(
                web::resource("/albums")
                    .route(web::get().to(list_albums))
                    .route(web::post().to(create_album)),
            )
            .service(web::resource("/albums/{id}").route(web::get().to(get_album)))
            .service(web::resource("/albums/{id}/images").route(web::post().to(add_album_image)))
            .service(web::resource("/albums/{id}/order").route(web::post().to(reorder_album)))
            .service(web::resource("/albums/{id}/cover").route(web::put().to(set_cover_image)))
            .service(web::resource("/albums/{id}/like").route(web::post().to(like_album)))
            .service(web::resource("/albums/{id}/dislike").route(web::post().to(dislike_album)))
            .service(web::resource("/albums/{id}/favorite").route(web::post().to(favorite_album)))
            .service(web::resource("/users/{id}/follow").route(web::post().to(follow_user)))
            .service(web::resource("/tags").route(web::get().to(list_tags)))
            .service(web::resource("/categories").route(web::get().to(list_categories)))
            .service(web::resource("/reports").route(web::post().to(submit_report)))
            .service(web::resource("/files").route(web::post().to(upload_file)))
            // Staff moderation endpoints
            .service(
                web::resource("/admin/images/pending").route(web::get().to(admin_pending_images)),
            )
            .service(web::resource("/admin/reports").route(web::get().to(admin_open_reports)))
            .service(
                web::resource("/admin/reports/{id}/resolve")
                    .route(web::post().to(admin_resolve_report)),
            )
            .service(
                web::resource("/admin/images/{id}/moderate")
                    .route(web::post().to(admin_moderate_image)),
            )
            .service(
                web::resource("/admin/comments/{id}/moderate")
                    .route(web::post().to(admin_moderate_comment)),
            )
            .service(
                web::resource("/admin/tags/{id}/moderate")
                    .route(web::post().to(admin_moderate_tag)),
            )
            .service(
                web::resource("/admin/categories")
                    .route(web::post().to(admin_create_category)),
            ),
    );
    // public fetch route (no /api/v1 prefix so <img src="/files/{handle}"> works)
    cfg.route("/files/{handle}", web::get().to(get_file));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub file_store: Arc<dyn FileStore>,
    pub notifier: Arc<dyn NotificationSink>,
    pub rate_limits: RateLimiterFacade,
}

const PAGE_SIZE: usize = 20;

fn client_ip(req: &HttpRequest) -> String {
    req.peer_addr()
        .map(|a| a.ip().to_string())
        .unwrap_or_else(|| "unknown".into())
}

fn paginate<T>(items: Vec<T>, page: usize) -> (Vec<T>, usize, usize, usize) {
    let total = items.len();
    let total_pages = total.div_ceil(PAGE_SIZE).max(1);
    let page = page.clamp(1, total_pages);
    let start = (page - 1) * PAGE_SIZE;
    let page_items = items.into_iter().skip(start).take(PAGE_SIZE).collect();
    (page_items, page, total_pages, total)
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

async fn detail_relation(
    repo: &Arc<dyn Repo>,
    viewer: &Viewer,
    owner_id: Id,
) -> Result<Relation, ApiError> {
    let follows_owner = match viewer.id() {
        Some(vid) if vid != owner_id => repo.is_following(vid, owner_id).await?,
        _ => false,
    };
    Ok(Relation {
        follows_owner,
        // having reported an item never blocks direct access
        has_reported: false,
    })
}

async fn ensure_viewable(
    repo: &Arc<dyn Repo>,
    viewer: &Viewer,
    meta: &ItemMeta,
) -> Result<(), ApiError> {
    let rel = detail_relation(repo, viewer, meta.owner_id).await?;
    if !visibility::can_view_detail(viewer, meta, &rel) {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

macro_rules! ensure_staff {
    ($auth:expr) => {
        if !$auth.0.roles.iter().any(|r| matches!(r, Role::Staff)) {
            return Err(ApiError::Forbidden);
        }
    };
}

// ---------------- Images -----------------------------------------------

#[derive(Debug, serde::Deserialize)]
pub struct GalleryQuery {
    pub sort: Option<SortKey>,
    pub tag: Option<Id>,
    pub user: Option<Id>,
    pub q: Option<String>,
    pub page: Option<usize>,
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct ImageCard {
    pub image: Image,
    pub stats: InteractionStats,
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct ImagePage {
    pub items: Vec<ImageCard>,
    pub page: usize,
    pub total_pages: usize,
    pub total: usize,
}

#[utoipa::path(
    get,
    path = "/api/v1/images",
    params(
        ("sort" = Option<SortKey>, Query, description = "Listing order"),
        ("tag" = Option<Id>, Query, description = "Restrict to a tag"),
        ("user" = Option<Id>, Query, description = "Restrict to an uploader"),
        ("q" = Option<String>, Query, description = "Substring search"),
        ("page" = Option<usize>, Query, description = "1-based page")
    ),
    responses((status = 200, description = "Visible images", body = ImagePage))
)]
pub async fn list_images(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    query: web::Query<GalleryQuery>,
) -> Result<HttpResponse, ApiError> {
    let viewer = viewer_of(&auth);
    let filter = GalleryFilter {
        sort: query.sort.unwrap_or_default(),
        tag_id: query.tag,
        owner_id: query.user,
        query: query.q.clone().filter(|q| !q.trim().is_empty()),
    };
    let images = data.repo.list_images(&viewer, &filter).await?;
    let (page_items, page, total_pages, total) = paginate(images, query.page.unwrap_or(1));
    let mut items = Vec::with_capacity(page_items.len());
    for image in page_items {
        let stats = data.repo.image_stats(&viewer, image.id).await?;
        items.push(ImageCard { image, stats });
    }
    Ok(HttpResponse::Ok().json(ImagePage {
        items,
        page,
        total_pages,
        total,
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/images",
    request_body = NewImage,
    responses(
        (status = 201, description = "Image created, pending moderation", body = Image),
        (status = 400, description = "Invalid payload"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn create_image(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewImage>,
) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    if new.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".into()));
    }
    if new.file_handle.trim().is_empty() {
        return Err(ApiError::BadRequest("file_handle must not be empty".into()));
    }
    let image = data.repo.create_image(auth.0.uid, new).await?;
    Ok(HttpResponse::Created().json(image))
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct ImageDetail {
    pub image: Image,
    pub tags: Vec<Tag>,
    pub stats: InteractionStats,
}

#[utoipa::path(
    get,
    path = "/api/v1/images/{id}",
    params(("id" = Id, Path, description = "Image id")),
    responses(
        (status = 200, description = "Image detail", body = ImageDetail),
        (status = 403, description = "Not visible to this viewer"),
        (status = 404, description = "Image not found")
    )
)]
pub async fn get_image(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let viewer = viewer_of(&auth);
    let image = data.repo.get_image(path.into_inner()).await?;
    ensure_viewable(&data.repo, &viewer, &image_meta(&image)).await?;
    let image = data.repo.record_view(image.id).await?;
    let tags = data.repo.image_tags(image.id).await?;
    let stats = data.repo.image_stats(&viewer, image.id).await?;
    Ok(HttpResponse::Ok().json(ImageDetail { image, tags, stats }))
}

#[utoipa::path(
    patch,
    path = "/api/v1/images/{id}",
    request_body = UpdateImage,
    params(("id" = Id, Path, description = "Image id")),
    responses(
        (status = 200, description = "Image updated", body = Image),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Image not found")
    )
)]
pub async fn update_image(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateImage>,
) -> Result<HttpResponse, ApiError> {
    let image = data.repo.get_image(path.into_inner()).await?;
    if image.owner_id != auth.0.uid && !auth.0.is_staff() {
        return Err(ApiError::Forbidden);
    }
    let updated = data.repo.update_image(image.id, payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[utoipa::path(
    delete,
    path = "/api/v1/images/{id}",
    params(("id" = Id, Path, description = "Image id")),
    responses(
        (status = 200, description = "Image and its ledgers removed"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Image not found")
    )
)]
pub async fn delete_image(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let image = data.repo.get_image(path.into_inner()).await?;
    if image.owner_id != auth.0.uid && !auth.0.is_staff() {
        return Err(ApiError::Forbidden);
    }
    let (image, handle_in_use) = data.repo.delete_image(image.id).await?;
    // content-addressed storage: the bytes stay while any other image
    // still points at the same handle
    if !handle_in_use {
        if let Err(e) = data.file_store.delete(&image.file_handle).await {
            log::warn!("file cleanup failed for {}: {e}", image.file_handle);
        }
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "deleted": true })))
}

async fn viewable_image(
    data: &web::Data<AppState>,
    auth: &Auth,
    id: Id,
) -> Result<Image, ApiError> {
    let image = data.repo.get_image(id).await?;
    ensure_viewable(&data.repo, &auth.viewer(), &image_meta(&image)).await?;
    Ok(image)
}

#[utoipa::path(
    post,
    path = "/api/v1/images/{id}/like",
    params(("id" = Id, Path, description = "Image id")),
    responses((status = 200, description = "Toggled; any dislike is cleared"))
)]
pub async fn like_image(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let image = viewable_image(&data, &auth, path.into_inner()).await?;
    let liked = data.repo.toggle_image_like(auth.0.uid, image.id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "liked": liked })))
}

#[utoipa::path(
    post,
    path = "/api/v1/images/{id}/dislike",
    params(("id" = Id, Path, description = "Image id")),
    responses((status = 200, description = "Toggled; any like is cleared"))
)]
pub async fn dislike_image(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let image = viewable_image(&data, &auth, path.into_inner()).await?;
    let disliked = data.repo.toggle_image_dislike(auth.0.uid, image.id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "disliked": disliked })))
}

#[utoipa::path(
    post,
    path = "/api/v1/images/{id}/favorite",
    params(("id" = Id, Path, description = "Image id")),
    responses((status = 200, description = "Toggled; Favorites album kept in sync"))
)]
pub async fn favorite_image(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let image = viewable_image(&data, &auth, path.into_inner()).await?;
    let favorited = data.repo.toggle_image_favorite(auth.0.uid, image.id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "favorited": favorited })))
}

// ---------------- Comments ---------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/images/{id}/comments",
    params(("id" = Id, Path, description = "Image id")),
    responses(
        (status = 200, description = "Comments, newest first", body = [Comment]),
        (status = 404, description = "Image not found")
    )
)]
pub async fn list_comments(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let viewer = viewer_of(&auth);
    let image = data.repo.get_image(path.into_inner()).await?;
    ensure_viewable(&data.repo, &viewer, &image_meta(&image)).await?;
    let comments = data.repo.list_comments(&viewer, image.id).await?;
    Ok(HttpResponse::Ok().json(comments))
}

#[utoipa::path(
    post,
    path = "/api/v1/images/{id}/comments",
    request_body = NewComment,
    params(("id" = Id, Path, description = "Image id")),
    responses(
        (status = 201, description = "Comment created, pending moderation", body = Comment),
        (status = 404, description = "Image not found"),
        (status = 429, description = "Too many comments")
    )
)]
pub async fn create_comment(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    if !data.rate_limits.allow_comment(&client_ip(&req)) {
        return Err(ApiError::RateLimited);
    }
    let new = payload.into_inner();
    if new.content.trim().is_empty() {
        return Err(ApiError::BadRequest("comment must not be empty".into()));
    }
    let image = viewable_image(&data, &auth, path.into_inner()).await?;
    let comment = data.repo.add_comment(auth.0.uid, image.id, new).await?;
    Ok(HttpResponse::Created().json(comment))
}

// ---------------- Albums -----------------------------------------------

#[derive(Debug, serde::Deserialize)]
pub struct AlbumQuery {
    pub sort: Option<SortKey>,
    pub page: Option<usize>,
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct AlbumCard {
    pub album: Album,
    pub stats: InteractionStats,
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct AlbumPage {
    pub items: Vec<AlbumCard>,
    pub page: usize,
    pub total_pages: usize,
    pub total: usize,
}

#[utoipa::path(
    get,
    path = "/api/v1/albums",
    params(
        ("sort" = Option<SortKey>, Query, description = "Listing order"),
        ("page" = Option<usize>, Query, description = "1-based page")
    ),
    responses((status = 200, description = "Visible albums", body = AlbumPage))
)]
pub async fn list_albums(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    query: web::Query<AlbumQuery>,
) -> Result<HttpResponse, ApiError> {
    let viewer = viewer_of(&auth);
    let albums = data
        .repo
        .list_albums(&viewer, query.sort.unwrap_or_default())
        .await?;
    let (page_items, page, total_pages, total) = paginate(albums, query.page.unwrap_or(1));
    let mut items = Vec::with_capacity(page_items.len());
    for album in page_items {
        let stats = data.repo.album_stats(&viewer, album.id).await?;
        items.push(AlbumCard { album, stats });
    }
    Ok(HttpResponse::Ok().json(AlbumPage {
        items,
        page,
        total_pages,
        total,
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/albums",
    request_body = NewAlbum,
    responses(
        (status = 201, description = "Album created", body = Album),
        (status = 409, description = "Duplicate album name")
    )
)]
pub async fn create_album(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewAlbum>,
) -> Result<HttpResponse, ApiError> {
    let album = data.repo.create_album(auth.0.uid, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(album))
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct AlbumDetail {
    pub album: Album,
    /// In membership-position order, filtered per viewer.
    pub images: Vec<Image>,
    pub stats: InteractionStats,
}

#[utoipa::path(
    get,
    path = "/api/v1/albums/{id}",
    params(("id" = Id, Path, description = "Album id")),
    responses(
        (status = 200, description = "Album detail", body = AlbumDetail),
        (status = 403, description = "Not visible to this viewer"),
        (status = 404, description = "Album not found")
    )
)]
pub async fn get_album(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let viewer = viewer_of(&auth);
    let album = data.repo.get_album(path.into_inner()).await?;
    ensure_viewable(&data.repo, &viewer, &album_meta(&album)).await?;
    let album = data.repo.record_album_view(album.id).await?;
    // an album may be visible while some of its images are not
    let mut images = Vec::new();
    for image in data.repo.album_images(album.id).await? {
        let rel = detail_relation(&data.repo, &viewer, image.owner_id).await?;
        if visibility::visible_in_listing(&viewer, &image_meta(&image), &rel)
            || viewer.id() == Some(image.owner_id)
        {
            images.push(image);
        }
    }
    let stats = data.repo.album_stats(&viewer, album.id).await?;
    Ok(HttpResponse::Ok().json(AlbumDetail {
        album,
        images,
        stats,
    }))
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct AddAlbumImage {
    pub image_id: Id,
}

#[utoipa::path(
    post,
    path = "/api/v1/albums/{id}/images",
    request_body = AddAlbumImage,
    params(("id" = Id, Path, description = "Album id")),
    responses(
        (status = 201, description = "Image added", body = AlbumMembership),
        (status = 403, description = "Not the album owner"),
        (status = 404, description = "Album or image not found"),
        (status = 409, description = "Image already in album")
    )
)]
pub async fn add_album_image(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<AddAlbumImage>,
) -> Result<HttpResponse, ApiError> {
    let album = data.repo.get_album(path.into_inner()).await?;
    if album.owner_id != auth.0.uid {
        return Err(ApiError::Forbidden);
    }
    let image = viewable_image(&data, &auth, payload.image_id).await?;
    // the Favorites album is ledger-managed; route through the favorite toggle
    if album.name == FAVORITES_ALBUM {
        let stats = data.repo.image_stats(&auth.viewer(), image.id).await?;
        if stats.viewer_has_favorited {
            return Err(ApiError::Conflict);
        }
        data.repo.toggle_image_favorite(auth.0.uid, image.id).await?;
        return Ok(HttpResponse::Ok().json(serde_json::json!({ "favorited": true })));
    }
    let membership = data.repo.add_album_image(album.id, image.id).await?;
    Ok(HttpResponse::Created().json(membership))
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct ReorderRequest {
    pub order: Vec<Id>,
}

#[utoipa::path(
    post,
    path = "/api/v1/albums/{id}/order",
    request_body = ReorderRequest,
    params(("id" = Id, Path, description = "Album id")),
    responses(
        (status = 200, description = "Positions reassigned"),
        (status = 403, description = "Not the album owner"),
        (status = 404, description = "Album not found")
    )
)]
pub async fn reorder_album(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ReorderRequest>,
) -> Result<HttpResponse, ApiError> {
    let album = data.repo.get_album(path.into_inner()).await?;
    if album.owner_id != auth.0.uid && !auth.0.is_staff() {
        return Err(ApiError::Forbidden);
    }
    data.repo.reorder_album(album.id, &payload.order).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "ok" })))
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct SetCoverRequest {
    /// `null` clears the cover.
    pub image_id: Option<Id>,
}

#[utoipa::path(
    put,
    path = "/api/v1/albums/{id}/cover",
    request_body = SetCoverRequest,
    params(("id" = Id, Path, description = "Album id")),
    responses(
        (status = 200, description = "Cover updated", body = Album),
        (status = 403, description = "Not the album owner"),
        (status = 404, description = "Album or image not found")
    )
)]
pub async fn set_cover_image(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<SetCoverRequest>,
) -> Result<HttpResponse, ApiError> {
    let album = data.repo.get_album(path.into_inner()).await?;
    if album.owner_id != auth.0.uid && !auth.0.is_staff() {
        return Err(ApiError::Forbidden);
    }
    let updated = data.repo.set_cover(album.id, payload.image_id).await?;
    Ok(HttpResponse::Ok().json(updated))
}

async fn viewable_album(
    data: &web::Data<AppState>,
    auth: &Auth,
    id: Id,
) -> Result<Album, ApiError> {
    let album = data.repo.get_album(id).await?;
    ensure_viewable(&data.repo, &auth.viewer(), &album_meta(&album)).await?;
    Ok(album)
}

#[utoipa::path(
    post,
    path = "/api/v1/albums/{id}/like",
    params(("id" = Id, Path, description = "Album id")),
    responses((status = 200, description = "Toggled; any dislike is cleared"))
)]
pub async fn like_album(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let album = viewable_album(&data, &auth, path.into_inner()).await?;
    let liked = data.repo.toggle_album_like(auth.0.uid, album.id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "liked": liked })))
}

#[utoipa::path(
    post,
    path = "/api/v1/albums/{id}/dislike",
    params(("id" = Id, Path, description = "Album id")),
    responses((status = 200, description = "Toggled; any like is cleared"))
)]
pub async fn dislike_album(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let album = viewable_album(&data, &auth, path.into_inner()).await?;
    let disliked = data.repo.toggle_album_dislike(auth.0.uid, album.id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "disliked": disliked })))
}

#[utoipa::path(
    post,
    path = "/api/v1/albums/{id}/favorite",
    params(("id" = Id, Path, description = "Album id")),
    responses((status = 200, description = "Toggled"))
)]
pub async fn favorite_album(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let album = viewable_album(&data, &auth, path.into_inner()).await?;
    let favorited = data.repo.toggle_album_favorite(auth.0.uid, album.id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "favorited": favorited })))
}

// ---------------- Follow graph -----------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/users/{id}/follow",
    params(("id" = Id, Path, description = "User to follow/unfollow")),
    responses(
        (status = 200, description = "Toggled"),
        (status = 400, description = "Self-follow rejected")
    )
)]
pub async fn follow_user(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let following = data
        .repo
        .toggle_follow(auth.0.uid, path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "following": following })))
}

// ---------------- Tags & categories ------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/tags",
    responses((status = 200, description = "Tags (approved only for non-staff)", body = [Tag]))
)]
pub async fn list_tags(
    auth: Option<Auth>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let viewer = viewer_of(&auth);
    let mut tags = data.repo.list_tags().await?;
    if !viewer.is_staff() {
        tags.retain(|t| t.moderation_status == ModerationStatus::Approved);
    }
    Ok(HttpResponse::Ok().json(tags))
}

#[utoipa::path(
    get,
    path = "/api/v1/categories",
    responses((status = 200, description = "All categories", body = [Category]))
)]
pub async fn list_categories(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let categories = data.repo.list_categories().await?;
    Ok(HttpResponse::Ok().json(categories))
}

// ---------------- Reports ----------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/reports",
    request_body = NewReport,
    responses(
        (status = 201, description = "Report filed, staff notified", body = Report),
        (status = 404, description = "Target not found"),
        (status = 409, description = "Already reported by this user"),
        (status = 429, description = "Too many reports")
    )
)]
pub async fn submit_report(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewReport>,
) -> Result<HttpResponse, ApiError> {
    if !data.rate_limits.allow_report(&client_ip(&req)) {
        return Err(ApiError::RateLimited);
    }
    let report = data.repo.create_report(auth.0.uid, payload.into_inner()).await?;
    let target = match (report.image_id, report.comment_id) {
        (Some(id), _) => format!("image {id}"),
        (_, Some(id)) => format!("comment {id}"),
        _ => "unknown".into(),
    };
    data.notifier
        .report_filed(&ReportSummary {
            report_id: report.id,
            reporter_id: report.reporter_id,
            report_type: report.report_type,
            target,
        })
        .await;
    Ok(HttpResponse::Created().json(report))
}

// ---------------- Staff moderation -------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/admin/images/pending",
    responses(
        (status = 200, description = "Moderation queue, oldest first", body = [Image]),
        (status = 403, description = "Staff only")
    )
)]
pub async fn admin_pending_images(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    ensure_staff!(auth);
    let images = data.repo.list_pending_images().await?;
    Ok(HttpResponse::Ok().json(images))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/reports",
    responses(
        (status = 200, description = "Open reports, oldest first", body = [Report]),
        (status = 403, description = "Staff only")
    )
)]
pub async fn admin_open_reports(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    ensure_staff!(auth);
    let reports = data.repo.list_open_reports().await?;
    Ok(HttpResponse::Ok().json(reports))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/reports/{id}/resolve",
    params(("id" = Id, Path, description = "Report id")),
    responses(
        (status = 200, description = "Report resolved", body = Report),
        (status = 403, description = "Staff only"),
        (status = 404, description = "Report not found"),
        (status = 409, description = "Already resolved")
    )
)]
pub async fn admin_resolve_report(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let report = data.repo.get_report(path.into_inner()).await?;
    let next = moderation::resolve_report(report.status, auth.0.is_staff())?;
    let updated = data.repo.set_report_status(report.id, next).await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct ModerateRequest {
    pub decision: Decision,
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/images/{id}/moderate",
    request_body = ModerateRequest,
    params(("id" = Id, Path, description = "Image id")),
    responses(
        (status = 200, description = "Image moderated", body = Image),
        (status = 403, description = "Staff only"),
        (status = 404, description = "Image not found"),
        (status = 409, description = "Already moderated")
    )
)]
pub async fn admin_moderate_image(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ModerateRequest>,
) -> Result<HttpResponse, ApiError> {
    let image = data.repo.get_image(path.into_inner()).await?;
    let next = moderation::transition(
        image.moderation_status,
        payload.decision,
        auth.0.is_staff(),
    )?;
    let updated = data
        .repo
        .set_image_moderation(image.id, next, auth.0.uid)
        .await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/comments/{id}/moderate",
    request_body = ModerateRequest,
    params(("id" = Id, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Comment moderated (rejection deletes it)"),
        (status = 403, description = "Staff only"),
        (status = 404, description = "Comment not found"),
        (status = 409, description = "Already moderated")
    )
)]
pub async fn admin_moderate_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ModerateRequest>,
) -> Result<HttpResponse, ApiError> {
    let comment = data.repo.get_comment(path.into_inner()).await?;
    match moderation::transition_comment(
        comment.moderation_status,
        payload.decision,
        auth.0.is_staff(),
    )? {
        Outcome::Keep(status) => {
            let updated = data
                .repo
                .set_comment_moderation(comment.id, status, auth.0.uid)
                .await?;
            Ok(HttpResponse::Ok().json(updated))
        }
        Outcome::Delete => {
            data.repo.delete_comment(comment.id).await?;
            Ok(HttpResponse::Ok().json(serde_json::json!({ "deleted": true })))
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/tags/{id}/moderate",
    request_body = ModerateRequest,
    params(("id" = Id, Path, description = "Tag id")),
    responses(
        (status = 200, description = "Tag moderated", body = Tag),
        (status = 403, description = "Staff only"),
        (status = 404, description = "Tag not found"),
        (status = 409, description = "Already moderated")
    )
)]
pub async fn admin_moderate_tag(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ModerateRequest>,
) -> Result<HttpResponse, ApiError> {
    let tag = data.repo.get_tag(path.into_inner()).await?;
    let next = moderation::transition(tag.moderation_status, payload.decision, auth.0.is_staff())?;
    let updated = data.repo.set_tag_moderation(tag.id, next).await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct CreateCategoryRequest {
    pub name: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/categories",
    request_body = CreateCategoryRequest,
    responses(
        (status = 201, description = "Category created", body = Category),
        (status = 403, description = "Staff only"),
        (status = 409, description = "Category name already exists")
    )
)]
pub async fn admin_create_category(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<CreateCategoryRequest>,
) -> Result<HttpResponse, ApiError> {
    ensure_staff!(auth);
    let category = data.repo.create_category(&payload.name).await?;
    Ok(HttpResponse::Created().json(category))
}

// ---------------- File upload / serving --------------------------------

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct FileUploadResponse {
    pub handle: String,
    pub mime: String,
    pub size: usize,
    pub duplicate: bool,
}

const FILE_SIZE_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

const ALLOWED_MIME: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

#[utoipa::path(
    post,
    path = "/api/v1/files",
    responses(
        (status = 201, description = "File stored (new)", body = FileUploadResponse),
        (status = 200, description = "File already existed (idempotent)", body = FileUploadResponse),
        (status = 413, description = "Payload too large"),
        (status = 415, description = "Unsupported media type"),
        (status = 429, description = "Too many uploads")
    )
)]
pub async fn upload_file(
    req: HttpRequest,
    _auth: Auth,
    data: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    use actix_web::http::StatusCode;
    if !data.rate_limits.allow_upload(&client_ip(&req)) {
        return Err(ApiError::RateLimited);
    }
    let mut bytes: Vec<u8> = Vec::new();
    while let Some(field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::Internal
    })? {
        if field.content_disposition().get_name() != Some("file") {
            continue;
        }
        let mut field_stream = field;
        let mut hasher = Sha256::new();
        while let Some(chunk) = field_stream.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::Internal
        })? {
            if bytes.len() + chunk.len() > FILE_SIZE_LIMIT {
                return Ok(HttpResponse::build(StatusCode::PAYLOAD_TOO_LARGE).finish());
            }
            hasher.update(&chunk);
            bytes.extend_from_slice(&chunk);
        }
        let handle = format!("{:x}", hasher.finalize());
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        if !ALLOWED_MIME.contains(&mime.as_str()) {
            return Ok(HttpResponse::UnsupportedMediaType().finish());
        }
        let (status_code, duplicate) = match data.file_store.save(&handle, &mime, &bytes).await {
            Ok(()) => (StatusCode::CREATED, false),
            Err(FileStoreError::Duplicate) => (StatusCode::OK, true),
            Err(e) => {
                log::error!("file_store save error: {e}");
                return Err(ApiError::Internal);
            }
        };
        let resp = FileUploadResponse {
            handle,
            mime,
            size: bytes.len(),
            duplicate,
        };
        return Ok(HttpResponse::build(status_code).json(resp));
    }
    Ok(HttpResponse::BadRequest().finish())
}

#[utoipa::path(
    get,
    path = "/files/{handle}",
    params(("handle" = String, Path, description = "Content hash issued at upload")),
    responses(
        (status = 200, description = "Raw file bytes with the sniffed Content-Type"),
        (status = 404, description = "Unknown handle")
    )
)]
pub async fn get_file(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let handle = path.into_inner();
    if handle.len() < 2 {
        return Err(ApiError::NotFound);
    }
    match data.file_store.load(&handle).await {
        Ok((bytes, mime)) => Ok(HttpResponse::Ok()
            .insert_header(("Content-Type", mime))
            .body(bytes)),
        Err(FileStoreError::NotFound) => Err(ApiError::NotFound),
        Err(e) => {
            log::error!("file_store load error: {e}");
            Err(ApiError::Internal)
        }
    }
}
