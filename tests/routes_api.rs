#![cfg(feature = "inmem-store")]

use actix_web::{test, App};
use async_trait::async_trait;
use galleria::{
    auth::{create_jwt, Role},
    notify::{LogSink, NotificationSink, ReportSummary},
    rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade},
    repo::inmem::InMemRepo,
    routes::{config, AppState},
    security::SecurityHeaders,
    storage::FsFileStore,
};
use serial_test::serial;
use std::sync::{Arc, Mutex};

/// Sink that remembers every summary it is handed.
#[derive(Default)]
struct RecordingSink(Mutex<Vec<ReportSummary>>);

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn report_filed(&self, summary: &ReportSummary) {
        self.0.lock().unwrap().push(summary.clone());
    }
}

// Helper to ensure JWT secret present & unique temp data dir per test
fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    let tmp = tempfile::tempdir().unwrap();
    std::env::set_var("GALLERIA_DATA_DIR", tmp.path().to_str().unwrap());
}

fn state() -> AppState {
    AppState {
        repo: Arc::new(InMemRepo::new()),
        file_store: Arc::new(FsFileStore::new()),
        notifier: Arc::new(LogSink),
        rate_limits: RateLimiterFacade::new(
            InMemoryRateLimiter::new(true),
            RateLimitConfig::from_env(),
        ),
    }
}

fn staff_token() -> String {
    create_jwt(9, "mod", vec![Role::Staff, Role::User]).unwrap()
}
fn owner_token() -> String {
    create_jwt(1, "owner", vec![Role::User]).unwrap()
}
fn other_token() -> String {
    create_jwt(2, "other", vec![Role::User]).unwrap()
}

fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}

fn image_payload(title: &str) -> serde_json::Value {
    serde_json::json!({
        "title": title,
        "file_handle": format!("handle-{title}"),
        "mime": "image/png",
        "privacy": "public",
        "tags": []
    })
}

#[actix_web::test]
#[serial]
async fn image_lifecycle_over_routes() {
    setup_env();
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_env())
            .app_data(actix_web::web::Data::new(state()))
            .configure(config),
    )
    .await;

    // unauthenticated upload metadata is rejected
    let req = test::TestRequest::post()
        .uri("/api/v1/images")
        .set_json(image_payload("one"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    // create as a normal user
    let req = test::TestRequest::post()
        .uri("/api/v1/images")
        .insert_header(bearer(&owner_token()))
        .set_json(image_payload("one"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let image: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let image_id = image["id"].as_i64().unwrap();
    assert_eq!(image["moderation_status"], "pending");

    // invisible to the anonymous gallery while pending
    let req = test::TestRequest::get().uri("/api/v1/images").to_request();
    let resp = test::call_service(&app, req).await;
    let page: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(page["items"].as_array().unwrap().len(), 0);

    // a non-staff user may not approve it
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/admin/images/{image_id}/moderate"))
        .insert_header(bearer(&other_token()))
        .set_json(serde_json::json!({"decision": "approve"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    // staff approve
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/admin/images/{image_id}/moderate"))
        .insert_header(bearer(&staff_token()))
        .set_json(serde_json::json!({"decision": "approve"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    // a second decision is a conflict
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/admin/images/{image_id}/moderate"))
        .insert_header(bearer(&staff_token()))
        .set_json(serde_json::json!({"decision": "reject"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);

    // now the anonymous gallery lists it
    let req = test::TestRequest::get().uri("/api/v1/images").to_request();
    let resp = test::call_service(&app, req).await;
    let page: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(page["items"].as_array().unwrap().len(), 1);

    // detail view counts a view
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/images/{image_id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let detail: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(detail["image"]["views"], 1);

    // like it, then check the stats the detail reports
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/images/{image_id}/like"))
        .insert_header(bearer(&other_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(body["liked"], true);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/images/{image_id}"))
        .insert_header(bearer(&other_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let detail: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(detail["stats"]["like_count"], 1);
    assert_eq!(detail["stats"]["viewer_has_liked"], true);
    // two views plus one like, doubled
    assert_eq!(detail["image"]["popularity_score"], 4);
}

#[actix_web::test]
#[serial]
async fn owners_can_open_their_pending_images_but_strangers_cannot() {
    setup_env();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state()))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/images")
        .insert_header(bearer(&owner_token()))
        .set_json(image_payload("draft"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let image: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let image_id = image["id"].as_i64().unwrap();

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/images/{image_id}"))
        .insert_header(bearer(&owner_token()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/images/{image_id}"))
        .insert_header(bearer(&other_token()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/images/{image_id}"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);
}

#[actix_web::test]
#[serial]
async fn follow_route_toggles_and_rejects_self_follow() {
    setup_env();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state()))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/users/1/follow")
        .insert_header(bearer(&other_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(body["following"], true);

    let req = test::TestRequest::post()
        .uri("/api/v1/users/1/follow")
        .insert_header(bearer(&other_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(body["following"], false);

    // token uid 2 following user 2
    let req = test::TestRequest::post()
        .uri("/api/v1/users/2/follow")
        .insert_header(bearer(&other_token()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}

#[actix_web::test]
#[serial]
async fn album_flow_over_routes() {
    setup_env();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state()))
            .configure(config),
    )
    .await;

    // two approved images to work with
    let mut ids = Vec::new();
    for title in ["a", "b"] {
        let req = test::TestRequest::post()
            .uri("/api/v1/images")
            .insert_header(bearer(&owner_token()))
            .set_json(image_payload(title))
            .to_request();
        let image: serde_json::Value =
            serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await)
                .unwrap();
        let id = image["id"].as_i64().unwrap();
        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/admin/images/{id}/moderate"))
            .insert_header(bearer(&staff_token()))
            .set_json(serde_json::json!({"decision": "approve"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);
        ids.push(id);
    }

    let req = test::TestRequest::post()
        .uri("/api/v1/albums")
        .insert_header(bearer(&owner_token()))
        .set_json(serde_json::json!({"name": "Trip"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let album: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let album_id = album["id"].as_i64().unwrap();

    // duplicate name for the same owner
    let req = test::TestRequest::post()
        .uri("/api/v1/albums")
        .insert_header(bearer(&owner_token()))
        .set_json(serde_json::json!({"name": "Trip"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);

    for id in &ids {
        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/albums/{album_id}/images"))
            .insert_header(bearer(&owner_token()))
            .set_json(serde_json::json!({"image_id": id}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 201);
    }

    // only the owner may touch membership
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/albums/{album_id}/images"))
        .insert_header(bearer(&other_token()))
        .set_json(serde_json::json!({"image_id": ids[0]}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    // reverse the order
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/albums/{album_id}/order"))
        .insert_header(bearer(&owner_token()))
        .set_json(serde_json::json!({"order": [ids[1], ids[0]]}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/albums/{album_id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let detail: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let listed: Vec<i64> = detail["images"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["id"].as_i64().unwrap())
        .collect();
    assert_eq!(listed, vec![ids[1], ids[0]]);
    // first image in became the cover
    assert_eq!(detail["album"]["cover_image_id"].as_i64(), Some(ids[0]));

    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/albums/{album_id}/cover"))
        .insert_header(bearer(&owner_token()))
        .set_json(serde_json::json!({"image_id": ids[1]}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let album: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(album["cover_image_id"].as_i64(), Some(ids[1]));
}

#[actix_web::test]
#[serial]
async fn report_flow_over_routes() {
    setup_env();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state()))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/images")
        .insert_header(bearer(&owner_token()))
        .set_json(image_payload("sketchy"))
        .to_request();
    let image: serde_json::Value =
        serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await)
            .unwrap();
    let image_id = image["id"].as_i64().unwrap();
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/admin/images/{image_id}/moderate"))
        .insert_header(bearer(&staff_token()))
        .set_json(serde_json::json!({"decision": "approve"}))
        .to_request();
    test::call_service(&app, req).await;

    let payload = serde_json::json!({"image_id": image_id, "report_type": "spam"});
    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(bearer(&other_token()))
        .set_json(&payload)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let report: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let report_id = report["id"].as_i64().unwrap();
    assert_eq!(report["status"], "pending");

    // duplicate report by the same user
    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(bearer(&other_token()))
        .set_json(&payload)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);

    // only staff see the queue
    let req = test::TestRequest::get()
        .uri("/api/v1/admin/reports")
        .insert_header(bearer(&other_token()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::get()
        .uri("/api/v1/admin/reports")
        .insert_header(bearer(&staff_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let queue: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(queue.as_array().unwrap().len(), 1);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/admin/reports/{report_id}/resolve"))
        .insert_header(bearer(&staff_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let resolved: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(resolved["status"], "resolved");

    // resolving twice is a conflict
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/admin/reports/{report_id}/resolve"))
        .insert_header(bearer(&staff_token()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);
}

#[actix_web::test]
#[serial]
async fn filing_a_report_reaches_the_notification_sink() {
    setup_env();
    let sink = Arc::new(RecordingSink::default());
    let mut st = state();
    st.notifier = sink.clone();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(st))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/images")
        .insert_header(bearer(&owner_token()))
        .set_json(image_payload("loud"))
        .to_request();
    let image: serde_json::Value =
        serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await)
            .unwrap();
    let image_id = image["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(bearer(&other_token()))
        .set_json(serde_json::json!({"image_id": image_id, "report_type": "spam"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let recorded = sink.0.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].reporter_id, 2);
    assert_eq!(recorded[0].target, format!("image {image_id}"));

    // a rejected duplicate must not notify again
    drop(recorded);
    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(bearer(&other_token()))
        .set_json(serde_json::json!({"image_id": image_id, "report_type": "spam"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);
    assert_eq!(sink.0.lock().unwrap().len(), 1);
}

#[actix_web::test]
#[serial]
async fn categories_are_staff_managed_and_searchable() {
    setup_env();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state()))
            .configure(config),
    )
    .await;

    // regular users may not create categories
    let req = test::TestRequest::post()
        .uri("/api/v1/admin/categories")
        .insert_header(bearer(&other_token()))
        .set_json(serde_json::json!({"name": "Wildlife"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::post()
        .uri("/api/v1/admin/categories")
        .insert_header(bearer(&staff_token()))
        .set_json(serde_json::json!({"name": "Wildlife"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let category: serde_json::Value =
        serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let category_id = category["id"].as_i64().unwrap();

    // duplicate name
    let req = test::TestRequest::post()
        .uri("/api/v1/admin/categories")
        .insert_header(bearer(&staff_token()))
        .set_json(serde_json::json!({"name": "Wildlife"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);

    let req = test::TestRequest::get().uri("/api/v1/categories").to_request();
    let resp = test::call_service(&app, req).await;
    let listed: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);

    // an approved image filed under the category turns up in a name search
    let mut payload = image_payload("heron");
    payload["category_id"] = serde_json::json!(category_id);
    let req = test::TestRequest::post()
        .uri("/api/v1/images")
        .insert_header(bearer(&owner_token()))
        .set_json(&payload)
        .to_request();
    let image: serde_json::Value =
        serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await)
            .unwrap();
    let image_id = image["id"].as_i64().unwrap();
    assert_eq!(image["category_id"].as_i64(), Some(category_id));
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/admin/images/{image_id}/moderate"))
        .insert_header(bearer(&staff_token()))
        .set_json(serde_json::json!({"decision": "approve"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::get()
        .uri("/api/v1/images?q=wildlife")
        .to_request();
    let resp = test::call_service(&app, req).await;
    let page: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    assert_eq!(page["items"][0]["image"]["id"].as_i64(), Some(image_id));
}

#[actix_web::test]
#[serial]
async fn image_deletion_is_owner_gated_and_removes_the_image() {
    setup_env();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state()))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/images")
        .insert_header(bearer(&owner_token()))
        .set_json(image_payload("fleeting"))
        .to_request();
    let image: serde_json::Value =
        serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await)
            .unwrap();
    let image_id = image["id"].as_i64().unwrap();

    // a stranger may not delete it
    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/images/{image_id}"))
        .insert_header(bearer(&other_token()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/images/{image_id}"))
        .insert_header(bearer(&owner_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(body["deleted"], true);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/images/{image_id}"))
        .insert_header(bearer(&owner_token()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}
