#![cfg(feature = "inmem-store")]

use galleria::{
    models::{
        ModerationStatus, NewComment, NewImage, NewReport, Privacy, ReportStatus, ReportType,
    },
    moderation::{self, Decision, Outcome},
    repo::{inmem::InMemRepo, RepoError},
    visibility::Viewer,
};
use galleria::repo::{CommentRepo, ImageRepo, ReportRepo};

fn repo() -> InMemRepo {
    std::env::set_var("GALLERIA_DATA_DIR", tempfile::tempdir().unwrap().path());
    InMemRepo::new()
}

fn new_image(title: &str) -> NewImage {
    NewImage {
        title: title.into(),
        description: None,
        alt_text: None,
        file_handle: format!("handle-{title}"),
        mime: "image/png".into(),
        privacy: Privacy::Public,
        category_id: None,
        tags: vec![],
    }
}

const OWNER: i64 = 1;
const REPORTER: i64 = 2;
const STAFF: i64 = 9;

#[tokio::test]
async fn images_start_pending_and_record_the_moderator() {
    let r = repo();
    let img = r.create_image(OWNER, new_image("a")).await.unwrap();
    assert_eq!(img.moderation_status, ModerationStatus::Pending);
    assert!(img.moderated_by.is_none());

    let next = moderation::transition(img.moderation_status, Decision::Approve, true).unwrap();
    let img = r.set_image_moderation(img.id, next, STAFF).await.unwrap();
    assert_eq!(img.moderation_status, ModerationStatus::Approved);
    assert_eq!(img.moderated_by, Some(STAFF));
    assert!(img.moderation_updated_at.is_some());
}

#[tokio::test]
async fn pending_queue_is_oldest_first() {
    let r = repo();
    let a = r.create_image(OWNER, new_image("a")).await.unwrap();
    let b = r.create_image(OWNER, new_image("b")).await.unwrap();
    r.set_image_moderation(a.id, ModerationStatus::Approved, STAFF)
        .await
        .unwrap();
    let c = r.create_image(OWNER, new_image("c")).await.unwrap();

    let queue = r.list_pending_images().await.unwrap();
    let ids: Vec<i64> = queue.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![b.id, c.id]);
}

#[tokio::test]
async fn rejecting_a_comment_deletes_it_and_its_reports() {
    let r = repo();
    let img = r.create_image(OWNER, new_image("a")).await.unwrap();
    let comment = r
        .add_comment(REPORTER, img.id, NewComment { content: "nice".into() })
        .await
        .unwrap();
    r.create_report(
        OWNER,
        NewReport {
            image_id: None,
            comment_id: Some(comment.id),
            report_type: ReportType::Spam,
            description: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(r.list_open_reports().await.unwrap().len(), 1);

    let outcome =
        moderation::transition_comment(comment.moderation_status, Decision::Reject, true).unwrap();
    assert_eq!(outcome, Outcome::Delete);
    r.delete_comment(comment.id).await.unwrap();

    assert!(matches!(
        r.get_comment(comment.id).await.unwrap_err(),
        RepoError::NotFound
    ));
    assert!(r.list_open_reports().await.unwrap().is_empty());
}

#[tokio::test]
async fn comment_listing_hides_other_peoples_pending_comments() {
    let r = repo();
    let img = r.create_image(OWNER, new_image("a")).await.unwrap();
    let mine = r
        .add_comment(REPORTER, img.id, NewComment { content: "mine".into() })
        .await
        .unwrap();
    let theirs = r
        .add_comment(OWNER, img.id, NewComment { content: "theirs".into() })
        .await
        .unwrap();
    r.set_comment_moderation(theirs.id, ModerationStatus::Approved, STAFF)
        .await
        .unwrap();

    let me = Viewer::User { id: REPORTER, staff: false };
    let seen = r.list_comments(&me, img.id).await.unwrap();
    let ids: Vec<i64> = seen.iter().map(|c| c.id).collect();
    assert!(ids.contains(&mine.id));
    assert!(ids.contains(&theirs.id));

    let stranger = Viewer::User { id: 77, staff: false };
    let seen = r.list_comments(&stranger, img.id).await.unwrap();
    let ids: Vec<i64> = seen.iter().map(|c| c.id).collect();
    assert!(!ids.contains(&mine.id));
    assert!(ids.contains(&theirs.id));
}

#[tokio::test]
async fn one_report_per_reporter_per_target() {
    let r = repo();
    let img = r.create_image(OWNER, new_image("a")).await.unwrap();
    let report = NewReport {
        image_id: Some(img.id),
        comment_id: None,
        report_type: ReportType::Abuse,
        description: Some("bad".into()),
    };
    let filed = r.create_report(REPORTER, report.clone()).await.unwrap();
    assert_eq!(filed.status, ReportStatus::Pending);

    let err = r.create_report(REPORTER, report.clone()).await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict));

    // resolving does not reopen the slot
    r.set_report_status(filed.id, ReportStatus::Resolved)
        .await
        .unwrap();
    let err = r.create_report(REPORTER, report).await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict));
}

#[tokio::test]
async fn report_must_target_exactly_one_thing() {
    let r = repo();
    let img = r.create_image(OWNER, new_image("a")).await.unwrap();
    let comment = r
        .add_comment(OWNER, img.id, NewComment { content: "x".into() })
        .await
        .unwrap();

    let both = NewReport {
        image_id: Some(img.id),
        comment_id: Some(comment.id),
        report_type: ReportType::Other,
        description: None,
    };
    assert!(matches!(
        r.create_report(REPORTER, both).await.unwrap_err(),
        RepoError::Invalid(_)
    ));

    let neither = NewReport {
        image_id: None,
        comment_id: None,
        report_type: ReportType::Other,
        description: None,
    };
    assert!(matches!(
        r.create_report(REPORTER, neither).await.unwrap_err(),
        RepoError::Invalid(_)
    ));
}

#[tokio::test]
async fn resolved_reports_leave_the_open_queue() {
    let r = repo();
    let img = r.create_image(OWNER, new_image("a")).await.unwrap();
    let filed = r
        .create_report(
            REPORTER,
            NewReport {
                image_id: Some(img.id),
                comment_id: None,
                report_type: ReportType::Spam,
                description: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(r.list_open_reports().await.unwrap().len(), 1);

    let next = moderation::resolve_report(filed.status, true).unwrap();
    r.set_report_status(filed.id, next).await.unwrap();
    assert!(r.list_open_reports().await.unwrap().is_empty());
}

#[tokio::test]
async fn deleting_an_image_clears_its_reports_from_the_queue() {
    let r = repo();
    let img = r.create_image(OWNER, new_image("a")).await.unwrap();
    r.create_report(
        REPORTER,
        NewReport {
            image_id: Some(img.id),
            comment_id: None,
            report_type: ReportType::Spam,
            description: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(r.list_open_reports().await.unwrap().len(), 1);

    r.delete_image(img.id).await.unwrap();
    assert!(r.list_open_reports().await.unwrap().is_empty());
}
