//! Destination platform seam.
//!
//! The importer only talks to the discussion platform through
//! [`Destination`]: create-or-find primitives for categories, accounts,
//! groups, topics and posts, plus read-back of what was persisted. Every
//! imported entity carries its correlation in custom fields:
//!
//! - `import_id`: the internal key (the tag for categories)
//! - `import_guid`: the external id it came from
//! - kind-specific flags (`is_disabled`, `is_deleted`) stored as `t`/`f`
//!
//! Implementations:
//! - [`PgDestination`]: the platform's PostgreSQL database
//! - [`MemoryDestination`]: in-process state for tests and dry runs

pub mod memory;
pub mod postgres;

pub use memory::{
    MemoryCategory, MemoryDestination, MemoryGroup, MemoryPost, MemoryTopic, MemoryUser,
};
pub use postgres::PgDestination;

use crate::correlation::{CorrelationEntry, EntryMeta};
use crate::error::DestinationError;
use crate::ident::{self, InternalKey};
use crate::models::{DestinationId, EntityKind};
use chrono::{DateTime, Utc};

pub type DestinationResult<T> = Result<T, DestinationError>;

pub const IMPORT_ID: &str = "import_id";
pub const IMPORT_GUID: &str = "import_guid";
pub const IMPORT_AVATAR_URL: &str = "import_avatar_url";
pub const IS_DISABLED: &str = "is_disabled";
pub const IS_DELETED: &str = "is_deleted";
pub const PARENT_GUIDS: &str = "parent_guids";
pub const PROJECT_GUID: &str = "project_guid";
pub const TOPIC_GUID: &str = "topic_guid";

pub fn flag(value: bool) -> &'static str {
    if value { "t" } else { "f" }
}

pub fn is_flag_set(value: Option<&str>) -> bool {
    value == Some("t")
}

/// Rebuild a correlation entry from persisted custom fields.
///
/// Returns `None` (and logs) when the stored `import_id` is not a key this
/// importer could have written.
pub fn correlation_from_fields(
    kind: EntityKind,
    destination_id: DestinationId,
    import_id: &str,
    import_guid: Option<&str>,
    meta: EntryMeta,
) -> Option<CorrelationEntry> {
    let (key, external_id) = match kind {
        EntityKind::Category => (ident::encode(import_id).ok()?, import_id.to_string()),
        _ => {
            let Ok(value) = import_id.parse::<u64>() else {
                log::warn!(
                    "ignoring {} {} with unrecognised import_id `{}`",
                    kind,
                    destination_id,
                    import_id
                );
                return None;
            };
            let key = InternalKey::new(value);
            let external_id = import_guid
                .map(str::to_string)
                .unwrap_or_else(|| key.to_string());
            (key, external_id)
        }
    };

    Some(CorrelationEntry::new(
        kind,
        external_id,
        key,
        destination_id,
        meta,
    ))
}

#[derive(Debug, Clone)]
pub struct NewCategory<'a> {
    pub tag: &'a str,
    pub name: &'a str,
    pub color: &'a str,
}

#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub key: InternalKey,
    pub username: &'a str,
    pub name: Option<&'a str>,
    pub email: &'a str,
    pub avatar_url: Option<&'a str>,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserState {
    pub disabled: bool,
    pub has_avatar: bool,
}

#[derive(Debug, Clone)]
pub struct NewGroup<'a> {
    pub key: InternalKey,
    pub guid: &'a str,
    pub visible: bool,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupState {
    pub visible: bool,
    pub deleted: bool,
    pub member_ids: Vec<DestinationId>,
}

#[derive(Debug, Clone)]
pub struct NewTopic<'a> {
    pub key: InternalKey,
    pub guid: &'a str,
    pub title: &'a str,
    pub raw: &'a str,
    pub user_id: DestinationId,
    pub category_id: DestinationId,
    pub created_at: DateTime<Utc>,
    /// The record's own flag, independent of inherited deletion.
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewPost<'a> {
    pub key: InternalKey,
    pub guid: &'a str,
    pub raw: &'a str,
    pub user_id: DestinationId,
    pub topic_id: DestinationId,
    pub reply_to_post_number: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedPost {
    pub post_id: DestinationId,
    pub topic_id: DestinationId,
    pub post_number: i32,
}

/// Correlation metadata persisted on a topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicFields {
    pub parent_guids: Option<String>,
    pub project_guid: Option<String>,
    pub topic_guid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicState {
    pub title: String,
    pub category_name: Option<String>,
    pub deleted: bool,
    pub fields: TopicFields,
}

/// Rows removed by [`Destination::remove_imported`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalReport {
    pub posts: usize,
    pub topics: usize,
    pub groups: usize,
    pub categories: usize,
    pub users: usize,
    /// Avatar uploads owned by removed users.
    pub uploads: usize,
    pub sso_records: usize,
}

#[allow(async_fn_in_trait)]
pub trait Destination {
    /// Every correlation persisted by earlier runs.
    async fn load_correlations(&self) -> DestinationResult<Vec<CorrelationEntry>>;

    /// Remove all single-sign-on linkage records. Returns the count removed.
    async fn clear_sso_records(&self) -> DestinationResult<usize>;

    async fn create_category(&self, category: &NewCategory<'_>) -> DestinationResult<DestinationId>;

    async fn find_user_by_email(&self, email: &str) -> DestinationResult<Option<DestinationId>>;

    /// Attach correlation metadata to an account that was not created by the
    /// importer.
    async fn annotate_user(
        &self,
        user_id: DestinationId,
        key: InternalKey,
        guid: &str,
        disabled: bool,
    ) -> DestinationResult<()>;

    async fn create_user(&self, user: &NewUser<'_>) -> DestinationResult<DestinationId>;

    async fn user_state(&self, user_id: DestinationId) -> DestinationResult<Option<UserState>>;

    async fn attach_avatar(&self, user_id: DestinationId, url: &str) -> DestinationResult<()>;

    async fn create_group(&self, group: &NewGroup<'_>) -> DestinationResult<DestinationId>;

    /// Replace the group's membership with exactly `user_ids`.
    async fn set_group_members(
        &self,
        group_id: DestinationId,
        user_ids: &[DestinationId],
    ) -> DestinationResult<()>;

    async fn group_state(&self, group_id: DestinationId) -> DestinationResult<Option<GroupState>>;

    /// Create a topic and its first post.
    async fn create_topic(&self, topic: &NewTopic<'_>) -> DestinationResult<CreatedPost>;

    async fn create_post(&self, post: &NewPost<'_>) -> DestinationResult<CreatedPost>;

    async fn write_topic_fields(
        &self,
        topic_id: DestinationId,
        fields: &TopicFields,
    ) -> DestinationResult<()>;

    async fn topic_state(&self, topic_id: DestinationId) -> DestinationResult<Option<TopicState>>;

    /// Delete every entity carrying an `import_id`, in dependency order.
    async fn remove_imported(&self) -> DestinationResult<RemovalReport>;
}
