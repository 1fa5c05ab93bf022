use chrono::NaiveDate;
use lcm_core::memory::{InMemoryService, Operation};
use lcm_core::models::{
    ApplicationStatus, FaqPatch, NewApplication, NewFaq, NewProject, ProjectPatch,
};
use lcm_core::workflow::SubmitStep;
use lcm_core::{
    ApplicationSync, Attachment, Direction, Entity, FaqSync, Orphan, ProjectSync, RecordKey,
    RemoteService, Snapshot, SyncError, UploadSettings,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

async fn wait_until<E, F>(rx: &mut watch::Receiver<Snapshot<E>>, condition: F)
where
    F: FnMut(&Snapshot<E>) -> bool,
{
    timeout(Duration::from_secs(2), rx.wait_for(condition))
        .await
        .expect("timed out waiting for snapshot")
        .expect("synchronizer dropped");
}

fn new_faq(question: &str, order: i32) -> NewFaq {
    NewFaq {
        question: question.into(),
        answer: format!("Answer to {question}"),
        category: "General".into(),
        order,
    }
}

fn new_project(title: &str) -> NewProject {
    NewProject {
        title: title.into(),
        category: "Software Development".into(),
        description: "Internal tooling".into(),
        image: "https://img.example/p.jpg".into(),
        tags: vec!["Rust".into()],
    }
}

fn applicant() -> NewApplication {
    NewApplication {
        nik: "3201010101900001".into(),
        full_name: "Dewi Lestari".into(),
        email: "dewi@example.com".into(),
        phone: "+62 812 0000 0000".into(),
        education: "S1 Informatika".into(),
        birth_date: NaiveDate::from_ymd_opt(1995, 4, 12).unwrap(),
        positions: vec!["software-development".into()],
    }
}

async fn seed_faqs(service: &InMemoryService, faqs: &[(&str, i32)]) {
    for (question, order) in faqs {
        service
            .insert("faqs", serde_json::to_value(new_faq(question, *order)).unwrap())
            .await
            .unwrap();
    }
}

fn questions(snapshot: &Snapshot<lcm_core::Faq>) -> Vec<(String, i32)> {
    snapshot
        .records
        .iter()
        .map(|f| (f.question.clone(), f.order))
        .collect()
}

#[tokio::test]
async fn activation_mirrors_remote_in_sort_order() {
    let service = Arc::new(InMemoryService::for_site());
    seed_faqs(&service, &[("late", 2), ("first", 0), ("tied-old", 1), ("tied-new", 1)]).await;

    let mut faqs = FaqSync::new(service.clone());
    faqs.activate().await;

    let snapshot = faqs.snapshot();
    assert!(!snapshot.is_loading());
    assert_eq!(snapshot.error, None);
    assert_eq!(
        questions(&snapshot),
        vec![
            ("first".to_string(), 0),
            ("tied-new".to_string(), 1),
            ("tied-old".to_string(), 1),
            ("late".to_string(), 2),
        ]
    );
}

#[tokio::test]
async fn created_record_appears_once_after_notification() {
    let service = Arc::new(InMemoryService::for_site());
    let mut projects = ProjectSync::new(service.clone());
    projects.activate().await;
    let mut rx = projects.watch();

    let key = projects.create(&new_project("Campus Network")).await.unwrap();
    wait_until(&mut rx, |s| !s.records.is_empty()).await;

    let records = projects.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key(), key);
    assert_eq!(records[0].title, "Campus Network");
}

#[tokio::test]
async fn null_array_columns_do_not_fail_the_fetch() {
    let service = Arc::new(InMemoryService::for_site());
    service
        .insert("projects", serde_json::to_value(new_project("Tagged")).unwrap())
        .await
        .unwrap();
    service
        .insert(
            "projects",
            json!({
                "title": "Untagged",
                "category": "Multimedia",
                "description": "Company profile video",
                "image": "https://img.example/v.jpg",
                "tags": null
            }),
        )
        .await
        .unwrap();

    let mut projects = ProjectSync::new(service.clone());
    projects.activate().await;

    let snapshot = projects.snapshot();
    assert_eq!(snapshot.error, None);
    assert_eq!(snapshot.records.len(), 2);
    assert_eq!(snapshot.records[0].title, "Untagged");
    assert!(snapshot.records[0].tags.is_empty());
}

#[tokio::test]
async fn newest_projects_come_first() {
    let service = Arc::new(InMemoryService::for_site());
    let mut projects = ProjectSync::new(service.clone());
    projects.activate().await;
    let mut rx = projects.watch();

    projects.create(&new_project("older")).await.unwrap();
    projects.create(&new_project("newer")).await.unwrap();
    wait_until(&mut rx, |s| s.records.len() == 2).await;

    let titles: Vec<_> = projects.records().into_iter().map(|p| p.title).collect();
    assert_eq!(titles, vec!["newer", "older"]);
}

#[tokio::test]
async fn update_changes_only_the_patched_fields() {
    let service = Arc::new(InMemoryService::for_site());
    let mut projects = ProjectSync::new(service.clone());
    let key = projects.create(&new_project("Draft")).await.unwrap();
    projects.activate().await;
    let before = projects.snapshot().find(&key).cloned().unwrap();
    let mut rx = projects.watch();

    let patch = ProjectPatch {
        title: Some("Published".into()),
        ..Default::default()
    };
    projects.update(&key, &patch).await.unwrap();
    wait_until(&mut rx, |s| {
        s.find(&key).map(|p| p.title.as_str()) == Some("Published")
    })
    .await;

    let after = projects.snapshot().find(&key).cloned().unwrap();
    assert_eq!(after.id, before.id);
    assert_eq!(after.created_at, before.created_at);
    assert_eq!(after.description, before.description);
    assert_eq!(after.tags, before.tags);
}

#[tokio::test]
async fn delete_removes_exactly_one_record() {
    let service = Arc::new(InMemoryService::for_site());
    let mut faqs = FaqSync::new(service.clone());
    seed_faqs(&service, &[("keep", 0), ("drop", 1)]).await;
    faqs.activate().await;
    let doomed = faqs.records()[1].key();
    let mut rx = faqs.watch();

    faqs.delete(&doomed).await.unwrap();
    wait_until(&mut rx, |s| s.records.len() == 1).await;
    assert_eq!(questions(&faqs.snapshot()), vec![("keep".to_string(), 0)]);

    let err = faqs.delete(&doomed).await.unwrap_err();
    assert_eq!(err, SyncError::not_found("faqs", &doomed));
}

#[tokio::test]
async fn deactivate_is_idempotent_and_stops_refetching() {
    let service = Arc::new(InMemoryService::for_site());
    let mut faqs = FaqSync::new(service.clone());
    faqs.activate().await;
    assert_eq!(service.subscriber_count("faqs"), 1);

    faqs.deactivate();
    faqs.deactivate();
    assert_eq!(service.subscriber_count("faqs"), 0);
    assert!(!faqs.is_active());

    let generation = faqs.snapshot().generation;
    seed_faqs(&service, &[("after", 0)]).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(faqs.snapshot().generation, generation);
    assert!(faqs.records().is_empty());
}

#[tokio::test]
async fn dropping_a_synchronizer_unsubscribes() {
    let service = Arc::new(InMemoryService::for_site());
    {
        let mut projects = ProjectSync::new(service.clone());
        projects.activate().await;
        assert_eq!(service.subscriber_count("projects"), 1);
    }
    assert_eq!(service.subscriber_count("projects"), 0);
}

#[tokio::test]
async fn moving_a_faq_up_swaps_orders() {
    let service = Arc::new(InMemoryService::for_site());
    seed_faqs(&service, &[("A", 0), ("B", 1), ("C", 2)]).await;
    let mut faqs = FaqSync::new(service.clone());
    faqs.activate().await;
    let mut rx = faqs.watch();

    let b = faqs.records()[1].key();
    assert!(faqs.move_faq(&b, Direction::Up).await.unwrap());
    wait_until(&mut rx, |s| {
        questions(s)
            == vec![
                ("B".to_string(), 0),
                ("A".to_string(), 1),
                ("C".to_string(), 2),
            ]
    })
    .await;
    assert_eq!(service.calls(Operation::Update), 2);
}

#[tokio::test]
async fn failed_second_swap_update_leaves_shared_order() {
    let service = Arc::new(InMemoryService::for_site());
    seed_faqs(&service, &[("A", 0), ("B", 1), ("C", 2)]).await;
    let mut faqs = FaqSync::new(service.clone());
    faqs.activate().await;

    service.pass_next(Operation::Update);
    service.fail_next(Operation::Update, SyncError::Network("connection reset".into()));
    let b = faqs.records()[1].key();
    let err = faqs.move_faq(&b, Direction::Up).await.unwrap_err();
    assert_eq!(err, SyncError::Network("connection reset".into()));
    assert_eq!(service.calls(Operation::Update), 2);

    let remote: Vec<(String, i64)> = service
        .rows("faqs")
        .iter()
        .map(|row| {
            (
                row["question"].as_str().unwrap().to_string(),
                row["order"].as_i64().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        remote,
        vec![
            ("A".to_string(), 0),
            ("B".to_string(), 0),
            ("C".to_string(), 2),
        ]
    );
}

#[tokio::test]
async fn moves_past_the_ends_do_nothing() {
    let service = Arc::new(InMemoryService::for_site());
    seed_faqs(&service, &[("A", 0), ("B", 1), ("C", 2)]).await;
    let mut faqs = FaqSync::new(service.clone());
    faqs.activate().await;

    let records = faqs.records();
    assert!(!faqs.move_faq(&records[0].key(), Direction::Up).await.unwrap());
    assert!(!faqs.move_faq(&records[2].key(), Direction::Down).await.unwrap());
    assert!(!faqs.move_faq(&RecordKey::Int(404), Direction::Down).await.unwrap());
    assert_eq!(service.calls(Operation::Update), 0);
}

#[tokio::test]
async fn next_order_follows_the_largest() {
    let service = Arc::new(InMemoryService::for_site());
    let mut faqs = FaqSync::new(service.clone());
    faqs.activate().await;
    assert_eq!(faqs.next_order(), 0);

    let mut rx = faqs.watch();
    faqs.create(&new_faq("first", 3)).await.unwrap();
    faqs.create(&new_faq("second", 7)).await.unwrap();
    wait_until(&mut rx, |s| s.records.len() == 2).await;
    assert_eq!(faqs.next_order(), 8);

    let key = faqs.records()[0].key();
    faqs.update(&key, &FaqPatch::order(10)).await.unwrap();
    wait_until(&mut rx, |s| s.records.iter().any(|f| f.order == 10)).await;
    assert_eq!(faqs.next_order(), 11);
}

#[tokio::test]
async fn submitted_application_is_pending_and_linked() {
    let service = Arc::new(InMemoryService::new());
    let mut apps = ApplicationSync::new(service.clone());
    apps.activate().await;
    let mut rx = apps.watch();
    let settings = UploadSettings::default();

    let receipt = apps
        .submit_application(applicant(), Attachment::new("cv.pdf", b"%PDF-1.7".to_vec()), &settings)
        .await
        .unwrap();
    assert_eq!(
        receipt.completed,
        vec![
            SubmitStep::Validate,
            SubmitStep::GenerateKey,
            SubmitStep::Upload,
            SubmitStep::ResolveUrl,
            SubmitStep::InsertRecord,
        ]
    );
    assert!(receipt.storage_key.starts_with("public/"));
    assert_eq!(service.blob_keys("resumes"), vec![receipt.storage_key.clone()]);
    assert_eq!(
        service.blob_content_type("resumes", &receipt.storage_key).as_deref(),
        Some("application/pdf")
    );

    wait_until(&mut rx, |s| s.records.len() == 1).await;
    let app = apps.records().remove(0);
    assert_eq!(app.key(), receipt.key);
    assert_eq!(app.status, ApplicationStatus::Pending);
    assert_eq!(app.cv_url, receipt.cv_url);
    assert_eq!(
        app.cv_url,
        service.public_url("resumes", &receipt.storage_key)
    );
}

#[tokio::test]
async fn empty_attachment_is_rejected_before_any_remote_call() {
    let service = Arc::new(InMemoryService::new());
    let apps = ApplicationSync::new(service.clone());

    let failure = apps
        .submit_application(applicant(), Attachment::new("cv.pdf", Vec::new()), &UploadSettings::default())
        .await
        .unwrap_err();
    assert_eq!(failure.failed_at, SubmitStep::Validate);
    assert!(matches!(failure.error, SyncError::Validation(_)));
    assert_eq!(failure.orphan, None);
    assert_eq!(service.calls(Operation::Upload), 0);
    assert_eq!(service.calls(Operation::Insert), 0);
}

#[tokio::test]
async fn upload_failure_creates_no_record() {
    let service = Arc::new(InMemoryService::new());
    service.fail_next(Operation::Upload, SyncError::Network("connection reset".into()));
    let apps = ApplicationSync::new(service.clone());

    let failure = apps
        .submit_application(applicant(), Attachment::new("cv.docx", vec![1, 2, 3]), &UploadSettings::default())
        .await
        .unwrap_err();
    assert_eq!(failure.failed_at, SubmitStep::Upload);
    assert_eq!(
        failure.completed,
        vec![SubmitStep::Validate, SubmitStep::GenerateKey]
    );
    assert_eq!(failure.orphan, None);
    assert_eq!(service.calls(Operation::Insert), 0);
    assert!(service.rows("applications").is_empty());
    assert!(service.blob_keys("resumes").is_empty());
}

#[tokio::test]
async fn insert_failure_leaves_an_orphaned_blob() {
    let service = Arc::new(InMemoryService::new());
    service.fail_next(Operation::Insert, SyncError::Permission("row-level security".into()));
    let apps = ApplicationSync::new(service.clone());

    let failure = apps
        .submit_application(applicant(), Attachment::new("cv.pdf", vec![1]), &UploadSettings::default())
        .await
        .unwrap_err();
    assert_eq!(failure.failed_at, SubmitStep::InsertRecord);
    assert!(matches!(failure.error, SyncError::Permission(_)));
    let keys = service.blob_keys("resumes");
    assert_eq!(keys.len(), 1);
    assert_eq!(
        failure.orphan,
        Some(Orphan::BlobWithoutRecord {
            bucket: "resumes".into(),
            key: keys[0].clone(),
        })
    );
    assert!(service.rows("applications").is_empty());
}

#[tokio::test]
async fn deleting_an_application_removes_its_cv() {
    let service = Arc::new(InMemoryService::new());
    let mut apps = ApplicationSync::new(service.clone());
    apps.activate().await;
    let mut rx = apps.watch();
    let settings = UploadSettings::default();
    let receipt = apps
        .submit_application(applicant(), Attachment::new("cv.pdf", vec![1]), &settings)
        .await
        .unwrap();
    wait_until(&mut rx, |s| s.records.len() == 1).await;

    let report = apps
        .delete_application(&receipt.key, &receipt.cv_url, &settings)
        .await
        .unwrap();
    assert!(report.blob_removed);
    assert_eq!(report.orphan, None);
    assert!(service.blob_keys("resumes").is_empty());
    wait_until(&mut rx, |s| s.records.is_empty()).await;
}

#[tokio::test]
async fn blob_removal_failure_does_not_block_record_delete() {
    let service = Arc::new(InMemoryService::new());
    let apps = ApplicationSync::new(service.clone());
    let settings = UploadSettings::default();
    let receipt = apps
        .submit_application(applicant(), Attachment::new("cv.pdf", vec![1]), &settings)
        .await
        .unwrap();

    service.fail_next(Operation::DeleteBlob, SyncError::Service("storage unavailable".into()));
    let report = apps
        .delete_application(&receipt.key, &receipt.cv_url, &settings)
        .await
        .unwrap();
    assert!(!report.blob_removed);
    assert_eq!(
        report.orphan,
        Some(Orphan::BlobWithoutRecord {
            bucket: "resumes".into(),
            key: receipt.storage_key.clone(),
        })
    );
    assert!(service.rows("applications").is_empty());
}

#[tokio::test]
async fn record_delete_failure_reports_missing_blob() {
    let service = Arc::new(InMemoryService::new());
    let apps = ApplicationSync::new(service.clone());
    let settings = UploadSettings::default();
    let receipt = apps
        .submit_application(applicant(), Attachment::new("cv.pdf", vec![1]), &settings)
        .await
        .unwrap();

    service.fail_next(Operation::Delete, SyncError::Permission("denied".into()));
    let failure = apps
        .delete_application(&receipt.key, &receipt.cv_url, &settings)
        .await
        .unwrap_err();
    assert!(matches!(failure.error, SyncError::Permission(_)));
    assert!(matches!(failure.orphan, Some(Orphan::RecordWithoutBlob { .. })));
    assert_eq!(service.rows("applications").len(), 1);
}

#[tokio::test]
async fn status_updates_touch_only_status() {
    let service = Arc::new(InMemoryService::new());
    let mut apps = ApplicationSync::new(service.clone());
    let receipt = apps
        .submit_application(applicant(), Attachment::new("cv.pdf", vec![1]), &UploadSettings::default())
        .await
        .unwrap();
    apps.activate().await;
    let mut rx = apps.watch();

    apps.update_status(&receipt.key, ApplicationStatus::Accepted)
        .await
        .unwrap();
    wait_until(&mut rx, |s| {
        s.records.first().map(|a| a.status) == Some(ApplicationStatus::Accepted)
    })
    .await;

    let row = service.rows("applications").remove(0);
    assert_eq!(row["status"], json!("accepted"));
    assert_eq!(row["full_name"], json!("Dewi Lestari"));

    // any status can follow any other
    apps.update_status(&receipt.key, ApplicationStatus::Pending)
        .await
        .unwrap();
}

#[tokio::test]
async fn independent_synchronizers_see_each_others_writes() {
    let service = Arc::new(InMemoryService::for_site());
    let mut admin = FaqSync::new(service.clone());
    let mut public = FaqSync::new(service.clone());
    admin.activate().await;
    public.activate().await;
    let mut rx = public.watch();

    admin.create(&new_faq("Do you build mobile apps?", 0)).await.unwrap();
    wait_until(&mut rx, |s| s.records.len() == 1).await;
    assert_eq!(service.subscriber_count("faqs"), 2);
}
