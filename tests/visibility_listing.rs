#![cfg(feature = "inmem-store")]

use galleria::{
    models::{GalleryFilter, ModerationStatus, NewImage, NewReport, Privacy, ReportType},
    repo::inmem::InMemRepo,
    visibility::Viewer,
};
use galleria::repo::{FollowRepo, ImageRepo, ReportRepo};

fn repo() -> InMemRepo {
    std::env::set_var("GALLERIA_DATA_DIR", tempfile::tempdir().unwrap().path());
    InMemRepo::new()
}

fn new_image(title: &str, privacy: Privacy) -> NewImage {
    NewImage {
        title: title.into(),
        description: None,
        alt_text: None,
        file_handle: format!("handle-{title}"),
        mime: "image/png".into(),
        privacy,
        category_id: None,
        tags: vec![],
    }
}

const OWNER: i64 = 1;
const STRANGER: i64 = 2;
const STAFF_ID: i64 = 9;

async fn approved(r: &InMemRepo, title: &str, privacy: Privacy) -> i64 {
    let img = r.create_image(OWNER, new_image(title, privacy)).await.unwrap();
    r.set_image_moderation(img.id, ModerationStatus::Approved, STAFF_ID)
        .await
        .unwrap();
    img.id
}

async fn listing(r: &InMemRepo, viewer: &Viewer) -> Vec<String> {
    let mut titles: Vec<String> = r
        .list_images(viewer, &GalleryFilter::default())
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.title)
        .collect();
    titles.sort();
    titles
}

#[tokio::test]
async fn anonymous_viewers_see_only_public_approved_images() {
    let r = repo();
    approved(&r, "public", Privacy::Public).await;
    approved(&r, "users", Privacy::Users).await;
    approved(&r, "followers", Privacy::Followers).await;
    approved(&r, "private", Privacy::Private).await;
    // still pending, must stay hidden
    r.create_image(OWNER, new_image("fresh", Privacy::Public))
        .await
        .unwrap();

    assert_eq!(listing(&r, &Viewer::Anonymous).await, vec!["public"]);
}

#[tokio::test]
async fn authenticated_viewers_gain_users_content_and_followers_after_following() {
    let r = repo();
    approved(&r, "public", Privacy::Public).await;
    approved(&r, "users", Privacy::Users).await;
    approved(&r, "followers", Privacy::Followers).await;
    approved(&r, "private", Privacy::Private).await;

    let stranger = Viewer::User { id: STRANGER, staff: false };
    assert_eq!(listing(&r, &stranger).await, vec!["public", "users"]);

    r.toggle_follow(STRANGER, OWNER).await.unwrap();
    assert_eq!(
        listing(&r, &stranger).await,
        vec!["followers", "public", "users"]
    );
}

#[tokio::test]
async fn owners_see_their_private_content_but_not_their_pending_in_listings() {
    let r = repo();
    approved(&r, "private", Privacy::Private).await;
    r.create_image(OWNER, new_image("pending", Privacy::Public))
        .await
        .unwrap();

    let owner = Viewer::User { id: OWNER, staff: false };
    assert_eq!(listing(&r, &owner).await, vec!["private"]);
}

#[tokio::test]
async fn staff_see_everything_including_pending() {
    let r = repo();
    approved(&r, "private", Privacy::Private).await;
    r.create_image(OWNER, new_image("pending", Privacy::Public))
        .await
        .unwrap();

    let staff = Viewer::User { id: STAFF_ID, staff: true };
    assert_eq!(listing(&r, &staff).await, vec!["pending", "private"]);
}

#[tokio::test]
async fn reported_images_drop_out_of_the_reporters_listings() {
    let r = repo();
    let id = approved(&r, "public", Privacy::Public).await;
    approved(&r, "other", Privacy::Public).await;

    r.create_report(
        STRANGER,
        NewReport {
            image_id: Some(id),
            comment_id: None,
            report_type: ReportType::Spam,
            description: None,
        },
    )
    .await
    .unwrap();

    let reporter = Viewer::User { id: STRANGER, staff: false };
    assert_eq!(listing(&r, &reporter).await, vec!["other"]);
    // everyone else still sees it
    assert_eq!(listing(&r, &Viewer::Anonymous).await, vec!["other", "public"]);
    // and the reporter can still open it directly
    assert!(r.get_image(id).await.is_ok());
}

#[tokio::test]
async fn search_matches_title_and_tags() {
    let r = repo();
    let img = r
        .create_image(
            OWNER,
            NewImage {
                tags: vec!["sunset".into()],
                ..new_image("beach day", Privacy::Public)
            },
        )
        .await
        .unwrap();
    r.set_image_moderation(img.id, ModerationStatus::Approved, STAFF_ID)
        .await
        .unwrap();
    approved(&r, "mountain", Privacy::Public).await;

    let by_title = GalleryFilter { query: Some("beach".into()), ..Default::default() };
    let hits = r.list_images(&Viewer::Anonymous, &by_title).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, img.id);

    let by_tag = GalleryFilter { query: Some("SUNSET".into()), ..Default::default() };
    let hits = r.list_images(&Viewer::Anonymous, &by_tag).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, img.id);
}
