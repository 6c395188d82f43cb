use crate::models::{
    Album, AlbumMembership, Category, Comment, Image, InteractionStats, ModerationStatus,
    NewAlbum, NewComment, NewImage, NewReport, Privacy, Report, ReportStatus, ReportType,
    SortKey, Tag, UpdateImage,
};
use crate::moderation::Decision;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_images,
        crate::routes::create_image,
        crate::routes::get_image,
        crate::routes::update_image,
        crate::routes::delete_image,
        crate::routes::like_image,
        crate::routes::dislike_image,
        crate::routes::favorite_image,
        crate::routes::list_comments,
        crate::routes::create_comment,
        crate::routes::list_albums,
        crate::routes::create_album,
        crate::routes::get_album,
        crate::routes::add_album_image,
        crate::routes::reorder_album,
        crate::routes::set_cover_image,
        crate::routes::like_album,
        crate::routes::dislike_album,
        crate::routes::favorite_album,
        crate::routes::follow_user,
        crate::routes::list_tags,
        crate::routes::list_categories,
        crate::routes::submit_report,
        crate::routes::upload_file,
        crate::routes::get_file,
        crate::routes::admin_pending_images,
        crate::routes::admin_open_reports,
        crate::routes::admin_resolve_report,
        crate::routes::admin_moderate_image,
        crate::routes::admin_moderate_comment,
        crate::routes::admin_moderate_tag,
        crate::routes::admin_create_category,
    ),
    components(schemas(
        Image, NewImage, UpdateImage, Album, NewAlbum, AlbumMembership,
        Comment, NewComment, Report, NewReport, Tag, Category, InteractionStats,
        Privacy, ModerationStatus, ReportStatus, ReportType, SortKey, Decision,
        crate::routes::ImageCard, crate::routes::ImagePage, crate::routes::ImageDetail,
        crate::routes::AlbumCard, crate::routes::AlbumPage, crate::routes::AlbumDetail,
        crate::routes::AddAlbumImage, crate::routes::ReorderRequest,
        crate::routes::SetCoverRequest, crate::routes::ModerateRequest,
        crate::routes::CreateCategoryRequest, crate::routes::FileUploadResponse,
    )),
    tags(
        (name = "images", description = "Image browsing, upload metadata and interactions"),
        (name = "albums", description = "Album management and ordering"),
        (name = "moderation", description = "Staff review queues and decisions"),
    )
)]
pub struct ApiDoc;
