use forum_import::config::ImportConfig;
use forum_import::destination::{Destination, MemoryDestination, MemoryPost};
use forum_import::error::ImportError;
use forum_import::import::{Importer, RunStats};
use forum_import::models::{CorrelationRecord, EntityKind};
use serde_json::{Value, json};

fn marker(kind: &str, count: usize) -> Value {
    json!({"type": "count", "object_type": kind, "count": count})
}

fn user(username: &str, email: &str) -> Value {
    json!({
        "username": username,
        "email": email,
        "name": format!("User {username}"),
        "avatar_url": format!("https://files.example.org/{username}.png"),
        "is_disabled": false,
    })
}

fn project(guid: &str, is_public: bool, is_deleted: bool, contributors: &[&str]) -> Value {
    json!({
        "guid": guid,
        "is_public": is_public,
        "is_deleted": is_deleted,
        "contributors": contributors,
    })
}

fn topic(guid: &str, project: &str, content: &str) -> Value {
    json!({
        "post_type": "topic",
        "topic_guid": guid,
        "title": format!("Topic {guid}"),
        "content": content,
        "date_created": "2015-03-04T10:00:00Z",
        "is_deleted": false,
        "parent_guids": [project],
        "type": "nodes",
    })
}

fn comment(guid: &str, reply_to: &str, author: &str) -> Value {
    json!({
        "post_type": "comment",
        "comment_guid": guid,
        "reply_to": reply_to,
        "content": format!("comment {guid}"),
        "user": author,
        "date_created": "2015-03-05T10:00:00Z",
        "is_deleted": false,
        "type": "nodes",
    })
}

fn export(lines: &[Value]) -> String {
    lines
        .iter()
        .map(|line| format!("{line}\n"))
        .collect::<String>()
}

fn scenario() -> String {
    export(&[
        marker("user", 1),
        user("u1abc", "u1@example.org"),
        marker("project", 1),
        project("p1abc", true, false, &["u1abc"]),
        marker("post", 2),
        topic("t1abc", "p1abc", "Hello [@User u1abc](https://osf.io/u1abc/)!"),
        comment("c1abc", "t1abc", "u1abc"),
    ])
}

async fn run_import(
    destination: &MemoryDestination,
    config: ImportConfig,
    input: &str,
) -> (Result<RunStats, ImportError>, Vec<CorrelationRecord>) {
    let mut output = Vec::new();
    let result = Importer::new(destination, config)
        .run(input.as_bytes(), &mut output)
        .await;
    let records = String::from_utf8(output)
        .expect("utf8 output")
        .lines()
        .map(|line| serde_json::from_str(line).expect("correlation record"))
        .collect();
    (result, records)
}

fn post_by_guid(posts: &[MemoryPost], guid: &str) -> MemoryPost {
    posts
        .iter()
        .find(|post| post.fields.get("import_guid").map(String::as_str) == Some(guid))
        .cloned()
        .unwrap_or_else(|| panic!("post {guid} not imported"))
}

#[tokio::test]
async fn end_to_end_scenario() {
    let destination = MemoryDestination::new();
    let (result, records) = run_import(&destination, ImportConfig::default(), &scenario()).await;
    let stats = result.expect("import succeeds");

    assert_eq!(stats.categories.created, 3);
    assert_eq!(stats.users.created, 1);
    assert_eq!(stats.projects.created, 1);
    assert_eq!(stats.posts.created, 2);
    assert_eq!(stats.correlations_written, 3);

    let [
        CorrelationRecord::User { guid: user_guid, user_id },
        CorrelationRecord::Project {
            guid: project_guid,
            group_id,
            group_public,
            group_users,
        },
        CorrelationRecord::Topic {
            guid: topic_guid,
            topic_id,
            topic_title,
            topic_parent_guids,
            topic_deleted,
            post_id,
        },
    ] = records.as_slice()
    else {
        panic!("unexpected correlation records: {records:?}");
    };

    assert_eq!(user_guid, "u1abc");
    assert_eq!(project_guid, "p1abc");
    assert!(*group_public);
    assert_eq!(group_users, &vec!["u1abc".to_string()]);
    assert_eq!(topic_guid, "t1abc");
    assert_eq!(topic_title, "Topic t1abc");
    assert_eq!(topic_parent_guids, &vec!["p1abc".to_string()]);
    assert!(!*topic_deleted);

    let group = destination.group(*group_id).expect("group exists");
    assert_eq!(group.members.into_iter().collect::<Vec<_>>(), vec![*user_id]);

    let account = destination.user(*user_id).expect("user exists");
    assert_eq!(
        account.avatar_url.as_deref(),
        Some("https://files.example.org/u1abc.png")
    );

    let stored = destination.topic(*topic_id).expect("topic exists");
    assert_eq!(stored.user_id, -1);
    assert_eq!(
        stored.fields.get("parent_guids").map(String::as_str),
        Some("-p1abc-")
    );
    assert_eq!(
        stored.fields.get("project_guid").map(String::as_str),
        Some("p1abc")
    );

    let posts = destination.posts_in_topic(*topic_id);
    assert_eq!(posts.len(), 2);
    let first = post_by_guid(&posts, "t1abc");
    assert_eq!(first.id, *post_id);
    assert_eq!(first.post_number, 1);
    assert_eq!(first.raw, "Hello @u1abc!");

    let reply = post_by_guid(&posts, "c1abc");
    assert_eq!(reply.post_number, 2);
    assert_eq!(reply.reply_to_post_number, Some(1));
    assert_eq!(reply.user_id, *user_id);
    assert!(reply.deleted_at.is_none());
}

#[tokio::test]
async fn second_run_is_idempotent() {
    let destination = MemoryDestination::new();
    let input = scenario();

    let (first, first_records) = run_import(&destination, ImportConfig::default(), &input).await;
    first.expect("first run succeeds");
    let correlations = destination.load_correlations().await.expect("load");

    let (second, second_records) = run_import(&destination, ImportConfig::default(), &input).await;
    let second = second.expect("second run succeeds");

    assert_eq!(second_records, first_records);
    assert_eq!(second.categories.created, 0);
    assert_eq!(second.users.created, 0);
    assert_eq!(second.users.skipped, 1);
    assert_eq!(second.projects.skipped, 1);
    assert_eq!(second.posts.created, 0);
    assert_eq!(second.posts.skipped, 2);

    let mut after = destination.load_correlations().await.expect("load");
    let mut before = correlations;
    before.sort_by_key(|entry| (entry.kind, entry.key));
    after.sort_by_key(|entry| (entry.kind, entry.key));
    assert_eq!(after, before);
    assert_eq!(destination.users().len(), 1);
    assert_eq!(destination.categories().len(), 3);
    assert_eq!(destination.topics().len(), 1);
    assert_eq!(destination.posts().len(), 2);
}

#[tokio::test]
async fn deleted_project_marks_threads_deleted() {
    let destination = MemoryDestination::new();
    let input = export(&[
        marker("user", 1),
        user("u1abc", "u1@example.org"),
        marker("project", 1),
        project("p1abc", false, true, &["u1abc"]),
        marker("post", 2),
        topic("t1abc", "p1abc", "body"),
        comment("c1abc", "t1abc", "u1abc"),
    ]);

    let (result, records) = run_import(&destination, ImportConfig::default(), &input).await;
    result.expect("import succeeds");

    let Some(CorrelationRecord::Topic {
        topic_id,
        topic_deleted,
        ..
    }) = records.last()
    else {
        panic!("missing topic record: {records:?}");
    };
    assert!(*topic_deleted);

    let stored = destination.topic(*topic_id).expect("topic exists");
    assert!(stored.deleted_at.is_some());
    for post in destination.posts_in_topic(*topic_id) {
        assert!(post.deleted_at.is_some(), "post {} not deleted", post.id);
        assert_eq!(post.fields.get("is_deleted").map(String::as_str), Some("f"));
    }
}

#[tokio::test]
async fn comment_chain_resolves_project_across_batches() {
    let destination = MemoryDestination::new();
    let input = export(&[
        marker("user", 1),
        user("u1abc", "u1@example.org"),
        marker("project", 1),
        project("p1abc", true, true, &["u1abc"]),
        marker("post", 4),
        topic("t1abc", "p1abc", "root"),
        comment("c1abc", "t1abc", "u1abc"),
        comment("c2abc", "c1abc", "u1abc"),
        comment("c3abc", "c2abc", "u1abc"),
    ]);
    let config = ImportConfig {
        batch_size: 2,
        ..ImportConfig::default()
    };

    let (result, _) = run_import(&destination, config, &input).await;
    let stats = result.expect("import succeeds");
    assert_eq!(stats.posts.created, 4);
    assert_eq!(stats.posts.orphaned, 0);

    let posts = destination.posts();
    let c2 = post_by_guid(&posts, "c2abc");
    let c3 = post_by_guid(&posts, "c3abc");
    assert_eq!(c3.topic_id, c2.topic_id);
    assert_eq!(c3.reply_to_post_number, Some(c2.post_number));
    assert_eq!(c3.post_number, 4);
    // Only the project marks c3 deleted; its own record does not.
    assert!(c3.deleted_at.is_some());
}

#[tokio::test]
async fn orphaned_comment_is_skipped() {
    let destination = MemoryDestination::new();
    let input = export(&[
        marker("user", 1),
        user("u1abc", "u1@example.org"),
        marker("project", 1),
        project("p1abc", true, false, &["u1abc"]),
        marker("post", 3),
        topic("t1abc", "p1abc", "root"),
        comment("c1abc", "zzzzz", "u1abc"),
        comment("c2abc", "t1abc", "u1abc"),
    ]);

    let (result, records) = run_import(&destination, ImportConfig::default(), &input).await;
    let stats = result.expect("orphans do not abort the run");
    assert_eq!(stats.posts.orphaned, 1);
    assert_eq!(stats.posts.created, 2);
    assert_eq!(records.len(), 3);

    let posts = destination.posts();
    assert_eq!(posts.len(), 2);
    post_by_guid(&posts, "c2abc");
}

#[tokio::test]
async fn existing_account_is_merged_by_email() {
    let destination = MemoryDestination::new();
    let existing = destination.seed_user("legacy", "a@x.com");
    let input = export(&[marker("user", 1), user("u1abc", "A@X.com")]);

    let (result, records) = run_import(&destination, ImportConfig::default(), &input).await;
    let stats = result.expect("merge succeeds");

    assert_eq!(stats.users.merged, 1);
    assert_eq!(stats.users.created, 0);
    assert_eq!(destination.users().len(), 1);
    assert_eq!(
        records,
        vec![CorrelationRecord::User {
            guid: "u1abc".to_string(),
            user_id: existing,
        }]
    );

    let account = destination.user(existing).expect("account kept");
    assert_eq!(account.username, "legacy");
    assert_eq!(
        account.fields.get("import_guid").map(String::as_str),
        Some("u1abc")
    );
    assert_eq!(
        account.fields.get("is_disabled").map(String::as_str),
        Some("f")
    );
}

#[tokio::test]
async fn shared_email_between_export_users_is_rejected() {
    let destination = MemoryDestination::new();
    let input = export(&[
        marker("user", 2),
        user("u1abc", "same@x.com"),
        user("u2abc", "SAME@x.com"),
    ]);

    for _ in 0..2 {
        let (result, records) = run_import(&destination, ImportConfig::default(), &input).await;
        let err = result.expect_err("second user cannot claim the account");
        let ImportError::Consistency(message) = err else {
            panic!("expected consistency error, got {err:?}");
        };
        assert!(message.contains("u1abc") && message.contains("u2abc"), "{message}");
        assert!(records.is_empty());

        assert_eq!(destination.users().len(), 1);
        let correlations = destination.load_correlations().await.expect("load");
        let users: Vec<_> = correlations
            .iter()
            .filter(|entry| entry.kind == EntityKind::User)
            .map(|entry| entry.external_id.as_str())
            .collect();
        assert_eq!(users, vec!["u1abc"]);
    }
}

#[tokio::test]
async fn unknown_contributor_is_a_dangling_reference() {
    let destination = MemoryDestination::new();
    let input = export(&[
        marker("project", 1),
        project("p1abc", true, false, &["nouse"]),
    ]);

    let (result, records) = run_import(&destination, ImportConfig::default(), &input).await;
    let err = result.expect_err("contributor must be imported first");
    assert!(matches!(
        err,
        ImportError::DanglingReference { kind: EntityKind::User, ref external_id } if external_id == "nouse"
    ));
    assert!(records.is_empty());
}

#[tokio::test]
async fn changed_visibility_fails_consistency_check() {
    let destination = MemoryDestination::new();
    let public = export(&[marker("project", 1), project("p1abc", true, false, &[])]);
    let private = export(&[marker("project", 1), project("p1abc", false, false, &[])]);

    let (first, _) = run_import(&destination, ImportConfig::default(), &public).await;
    first.expect("first run succeeds");

    let (second, _) = run_import(&destination, ImportConfig::default(), &private).await;
    assert!(matches!(second, Err(ImportError::Consistency(_))));
}

#[tokio::test]
async fn malformed_stream_keeps_completed_output() {
    let destination = MemoryDestination::new();
    let mut input = export(&[
        marker("user", 1),
        user("u1abc", "u1@example.org"),
        marker("project", 1),
    ]);
    input.push_str("{not json\n");

    let (result, records) = run_import(&destination, ImportConfig::default(), &input).await;
    assert!(matches!(result, Err(ImportError::Protocol { line: 4, .. })));
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn sso_records_are_cleared_before_import() {
    let destination = MemoryDestination::new();
    let existing = destination.seed_user("legacy", "legacy@example.org");
    destination.add_sso_record(existing);

    let (result, _) = run_import(&destination, ImportConfig::default(), "").await;
    let stats = result.expect("empty export imports");

    assert_eq!(stats.sso_records_cleared, 1);
    assert_eq!(destination.sso_record_count(), 0);
    assert_eq!(stats.categories.created, 3);
}

#[tokio::test]
async fn remove_imported_deletes_only_imported_entities() {
    let destination = MemoryDestination::new();
    let bystander = destination.seed_user("bystander", "b@example.org");

    let (result, _) = run_import(&destination, ImportConfig::default(), &scenario()).await;
    result.expect("import succeeds");

    let report = destination.remove_imported().await.expect("cleanup");
    assert_eq!(report.posts, 2);
    assert_eq!(report.topics, 1);
    assert_eq!(report.groups, 1);
    assert_eq!(report.categories, 3);
    assert_eq!(report.users, 1);
    assert_eq!(report.uploads, 1);

    assert!(destination.topics().is_empty());
    assert!(destination.categories().is_empty());
    let remaining: Vec<_> = destination.users().into_iter().map(|u| u.id).collect();
    assert_eq!(remaining, vec![bystander]);
    assert!(destination.load_correlations().await.expect("load").is_empty());
}
