use super::{
    CreatedPost, Destination, DestinationResult, GroupState, IMPORT_AVATAR_URL, IMPORT_GUID,
    IMPORT_ID, IS_DELETED, IS_DISABLED, NewCategory, NewGroup, NewPost, NewTopic, NewUser,
    PARENT_GUIDS, PROJECT_GUID, RemovalReport, TOPIC_GUID, TopicFields, TopicState, UserState,
    correlation_from_fields, flag, is_flag_set,
};
use crate::correlation::{CorrelationEntry, EntryMeta};
use crate::error::DestinationError;
use crate::ident::InternalKey;
use crate::models::{DestinationId, EntityKind};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};

type Fields = HashMap<String, String>;

#[derive(Debug, Clone)]
pub struct MemoryUser {
    pub id: DestinationId,
    pub username: String,
    pub name: Option<String>,
    pub email: String,
    pub avatar_url: Option<String>,
    pub fields: Fields,
}

#[derive(Debug, Clone)]
pub struct MemoryGroup {
    pub id: DestinationId,
    pub name: String,
    pub visible: bool,
    pub members: BTreeSet<DestinationId>,
    pub fields: Fields,
}

#[derive(Debug, Clone)]
pub struct MemoryCategory {
    pub id: DestinationId,
    pub name: String,
    pub color: String,
    pub fields: Fields,
}

#[derive(Debug, Clone)]
pub struct MemoryTopic {
    pub id: DestinationId,
    pub title: String,
    pub user_id: DestinationId,
    pub category_id: DestinationId,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub fields: Fields,
}

#[derive(Debug, Clone)]
pub struct MemoryPost {
    pub id: DestinationId,
    pub topic_id: DestinationId,
    pub user_id: DestinationId,
    pub post_number: i32,
    pub raw: String,
    pub reply_to_post_number: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub fields: Fields,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: DestinationId,
    users: BTreeMap<DestinationId, MemoryUser>,
    groups: BTreeMap<DestinationId, MemoryGroup>,
    categories: BTreeMap<DestinationId, MemoryCategory>,
    topics: BTreeMap<DestinationId, MemoryTopic>,
    posts: BTreeMap<DestinationId, MemoryPost>,
    sso_records: Vec<DestinationId>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> DestinationId {
        self.next_id += 1;
        self.next_id
    }
}

fn correlation_fields(key: InternalKey, guid: &str) -> Fields {
    Fields::from([
        (IMPORT_ID.to_string(), key.to_string()),
        (IMPORT_GUID.to_string(), guid.to_string()),
    ])
}

fn field<'a>(fields: &'a Fields, name: &str) -> Option<&'a str> {
    fields.get(name).map(String::as_str)
}

/// In-memory destination.
///
/// Ids are allocated from one counter shared by every entity kind, starting
/// at 1.
#[derive(Debug, Default)]
pub struct MemoryDestination {
    state: Mutex<MemoryState>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an account the importer did not create (no correlation).
    pub fn seed_user(&self, username: &str, email: &str) -> DestinationId {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.users.insert(
            id,
            MemoryUser {
                id,
                username: username.to_string(),
                name: None,
                email: email.to_string(),
                avatar_url: None,
                fields: Fields::new(),
            },
        );
        id
    }

    pub fn add_sso_record(&self, user_id: DestinationId) {
        self.state.lock().sso_records.push(user_id);
    }

    pub fn sso_record_count(&self) -> usize {
        self.state.lock().sso_records.len()
    }

    pub fn user(&self, id: DestinationId) -> Option<MemoryUser> {
        self.state.lock().users.get(&id).cloned()
    }

    pub fn users(&self) -> Vec<MemoryUser> {
        self.state.lock().users.values().cloned().collect()
    }

    pub fn group(&self, id: DestinationId) -> Option<MemoryGroup> {
        self.state.lock().groups.get(&id).cloned()
    }

    pub fn categories(&self) -> Vec<MemoryCategory> {
        self.state.lock().categories.values().cloned().collect()
    }

    pub fn topic(&self, id: DestinationId) -> Option<MemoryTopic> {
        self.state.lock().topics.get(&id).cloned()
    }

    pub fn topics(&self) -> Vec<MemoryTopic> {
        self.state.lock().topics.values().cloned().collect()
    }

    pub fn posts(&self) -> Vec<MemoryPost> {
        self.state.lock().posts.values().cloned().collect()
    }

    pub fn posts_in_topic(&self, topic_id: DestinationId) -> Vec<MemoryPost> {
        self.state
            .lock()
            .posts
            .values()
            .filter(|post| post.topic_id == topic_id)
            .cloned()
            .collect()
    }
}

impl Destination for MemoryDestination {
    async fn load_correlations(&self) -> DestinationResult<Vec<CorrelationEntry>> {
        let state = self.state.lock();
        let mut entries = Vec::new();

        for category in state.categories.values() {
            if let Some(import_id) = field(&category.fields, IMPORT_ID) {
                entries.extend(correlation_from_fields(
                    EntityKind::Category,
                    category.id,
                    import_id,
                    None,
                    EntryMeta::None,
                ));
            }
        }
        for user in state.users.values() {
            if let Some(import_id) = field(&user.fields, IMPORT_ID) {
                entries.extend(correlation_from_fields(
                    EntityKind::User,
                    user.id,
                    import_id,
                    field(&user.fields, IMPORT_GUID),
                    EntryMeta::User {
                        disabled: is_flag_set(field(&user.fields, IS_DISABLED)),
                    },
                ));
            }
        }
        for group in state.groups.values() {
            if let Some(import_id) = field(&group.fields, IMPORT_ID) {
                entries.extend(correlation_from_fields(
                    EntityKind::Project,
                    group.id,
                    import_id,
                    field(&group.fields, IMPORT_GUID),
                    EntryMeta::Project {
                        deleted: is_flag_set(field(&group.fields, IS_DELETED)),
                    },
                ));
            }
        }
        for post in state.posts.values() {
            if let Some(import_id) = field(&post.fields, IMPORT_ID) {
                entries.extend(correlation_from_fields(
                    EntityKind::Post,
                    post.id,
                    import_id,
                    field(&post.fields, IMPORT_GUID),
                    EntryMeta::Post {
                        topic_id: post.topic_id,
                        post_number: post.post_number,
                    },
                ));
            }
        }

        Ok(entries)
    }

    async fn clear_sso_records(&self) -> DestinationResult<usize> {
        let mut state = self.state.lock();
        let removed = state.sso_records.len();
        state.sso_records.clear();
        Ok(removed)
    }

    async fn create_category(&self, category: &NewCategory<'_>) -> DestinationResult<DestinationId> {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.categories.insert(
            id,
            MemoryCategory {
                id,
                name: category.name.to_string(),
                color: category.color.to_string(),
                fields: Fields::from([(IMPORT_ID.to_string(), category.tag.to_string())]),
            },
        );
        Ok(id)
    }

    async fn find_user_by_email(&self, email: &str) -> DestinationResult<Option<DestinationId>> {
        let state = self.state.lock();
        Ok(state
            .users
            .values()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .map(|user| user.id))
    }

    async fn annotate_user(
        &self,
        user_id: DestinationId,
        key: InternalKey,
        guid: &str,
        disabled: bool,
    ) -> DestinationResult<()> {
        let mut state = self.state.lock();
        let user = state.users.get_mut(&user_id).ok_or(DestinationError::NotFound {
            entity: "user",
            id: user_id,
        })?;
        user.fields.extend(correlation_fields(key, guid));
        user.fields
            .insert(IS_DISABLED.to_string(), flag(disabled).to_string());
        Ok(())
    }

    async fn create_user(&self, user: &NewUser<'_>) -> DestinationResult<DestinationId> {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        let mut fields = correlation_fields(user.key, user.username);
        fields.insert(IS_DISABLED.to_string(), flag(user.disabled).to_string());
        if let Some(url) = user.avatar_url {
            fields.insert(IMPORT_AVATAR_URL.to_string(), url.to_string());
        }
        state.users.insert(
            id,
            MemoryUser {
                id,
                username: user.username.to_string(),
                name: user.name.map(str::to_string),
                email: user.email.to_string(),
                avatar_url: None,
                fields,
            },
        );
        Ok(id)
    }

    async fn user_state(&self, user_id: DestinationId) -> DestinationResult<Option<UserState>> {
        let state = self.state.lock();
        Ok(state.users.get(&user_id).map(|user| UserState {
            disabled: is_flag_set(field(&user.fields, IS_DISABLED)),
            has_avatar: user.avatar_url.is_some(),
        }))
    }

    async fn attach_avatar(&self, user_id: DestinationId, url: &str) -> DestinationResult<()> {
        let mut state = self.state.lock();
        let user = state.users.get_mut(&user_id).ok_or(DestinationError::NotFound {
            entity: "user",
            id: user_id,
        })?;
        user.avatar_url = Some(url.to_string());
        Ok(())
    }

    async fn create_group(&self, group: &NewGroup<'_>) -> DestinationResult<DestinationId> {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        let mut fields = correlation_fields(group.key, group.guid);
        fields.insert(IS_DELETED.to_string(), flag(group.deleted).to_string());
        state.groups.insert(
            id,
            MemoryGroup {
                id,
                name: group.guid.to_string(),
                visible: group.visible,
                members: BTreeSet::new(),
                fields,
            },
        );
        Ok(id)
    }

    async fn set_group_members(
        &self,
        group_id: DestinationId,
        user_ids: &[DestinationId],
    ) -> DestinationResult<()> {
        let mut state = self.state.lock();
        let group = state.groups.get_mut(&group_id).ok_or(DestinationError::NotFound {
            entity: "group",
            id: group_id,
        })?;
        group.members = user_ids.iter().copied().collect();
        Ok(())
    }

    async fn group_state(&self, group_id: DestinationId) -> DestinationResult<Option<GroupState>> {
        let state = self.state.lock();
        Ok(state.groups.get(&group_id).map(|group| GroupState {
            visible: group.visible,
            deleted: is_flag_set(field(&group.fields, IS_DELETED)),
            member_ids: group.members.iter().copied().collect(),
        }))
    }

    async fn create_topic(&self, topic: &NewTopic<'_>) -> DestinationResult<CreatedPost> {
        let mut state = self.state.lock();
        let topic_id = state.allocate_id();
        state.topics.insert(
            topic_id,
            MemoryTopic {
                id: topic_id,
                title: topic.title.to_string(),
                user_id: topic.user_id,
                category_id: topic.category_id,
                created_at: topic.created_at,
                deleted_at: topic.deleted_at,
                fields: Fields::new(),
            },
        );

        let post_id = state.allocate_id();
        let mut fields = correlation_fields(topic.key, topic.guid);
        fields.insert(IS_DELETED.to_string(), flag(topic.is_deleted).to_string());
        state.posts.insert(
            post_id,
            MemoryPost {
                id: post_id,
                topic_id,
                user_id: topic.user_id,
                post_number: 1,
                raw: topic.raw.to_string(),
                reply_to_post_number: None,
                created_at: topic.created_at,
                deleted_at: topic.deleted_at,
                fields,
            },
        );

        Ok(CreatedPost {
            post_id,
            topic_id,
            post_number: 1,
        })
    }

    async fn create_post(&self, post: &NewPost<'_>) -> DestinationResult<CreatedPost> {
        let mut state = self.state.lock();
        if !state.topics.contains_key(&post.topic_id) {
            return Err(DestinationError::NotFound {
                entity: "topic",
                id: post.topic_id,
            });
        }

        let post_number = state
            .posts
            .values()
            .filter(|existing| existing.topic_id == post.topic_id)
            .map(|existing| existing.post_number)
            .max()
            .unwrap_or(0)
            + 1;
        let post_id = state.allocate_id();
        let mut fields = correlation_fields(post.key, post.guid);
        fields.insert(IS_DELETED.to_string(), flag(post.is_deleted).to_string());
        state.posts.insert(
            post_id,
            MemoryPost {
                id: post_id,
                topic_id: post.topic_id,
                user_id: post.user_id,
                post_number,
                raw: post.raw.to_string(),
                reply_to_post_number: post.reply_to_post_number,
                created_at: post.created_at,
                deleted_at: post.deleted_at,
                fields,
            },
        );

        Ok(CreatedPost {
            post_id,
            topic_id: post.topic_id,
            post_number,
        })
    }

    async fn write_topic_fields(
        &self,
        topic_id: DestinationId,
        fields: &TopicFields,
    ) -> DestinationResult<()> {
        let mut state = self.state.lock();
        let topic = state.topics.get_mut(&topic_id).ok_or(DestinationError::NotFound {
            entity: "topic",
            id: topic_id,
        })?;
        for (name, value) in [
            (PARENT_GUIDS, &fields.parent_guids),
            (PROJECT_GUID, &fields.project_guid),
            (TOPIC_GUID, &fields.topic_guid),
        ] {
            match value {
                Some(value) => topic.fields.insert(name.to_string(), value.clone()),
                None => topic.fields.remove(name),
            };
        }
        Ok(())
    }

    async fn topic_state(&self, topic_id: DestinationId) -> DestinationResult<Option<TopicState>> {
        let state = self.state.lock();
        Ok(state.topics.get(&topic_id).map(|topic| TopicState {
            title: topic.title.clone(),
            category_name: state
                .categories
                .get(&topic.category_id)
                .map(|category| category.name.clone()),
            deleted: topic.deleted_at.is_some(),
            fields: TopicFields {
                parent_guids: topic.fields.get(PARENT_GUIDS).cloned(),
                project_guid: topic.fields.get(PROJECT_GUID).cloned(),
                topic_guid: topic.fields.get(TOPIC_GUID).cloned(),
            },
        }))
    }

    async fn remove_imported(&self) -> DestinationResult<RemovalReport> {
        let mut state = self.state.lock();
        let mut report = RemovalReport::default();

        let post_ids: Vec<DestinationId> = state
            .posts
            .values()
            .filter(|post| post.fields.contains_key(IMPORT_ID))
            .map(|post| post.id)
            .collect();
        let mut topic_ids = BTreeSet::new();
        for id in &post_ids {
            if let Some(post) = state.posts.remove(id) {
                topic_ids.insert(post.topic_id);
            }
        }
        report.posts = post_ids.len();
        for id in &topic_ids {
            state.topics.remove(id);
        }
        report.topics = topic_ids.len();

        let before = state.groups.len();
        state
            .groups
            .retain(|_, group| !group.fields.contains_key(IMPORT_ID));
        report.groups = before - state.groups.len();

        let before = state.categories.len();
        state
            .categories
            .retain(|_, category| !category.fields.contains_key(IMPORT_ID));
        report.categories = before - state.categories.len();

        let user_ids: BTreeSet<DestinationId> = state
            .users
            .values()
            .filter(|user| user.fields.contains_key(IMPORT_ID))
            .map(|user| user.id)
            .collect();
        report.uploads = state
            .users
            .values()
            .filter(|user| user_ids.contains(&user.id) && user.avatar_url.is_some())
            .count();
        state.users.retain(|id, _| !user_ids.contains(id));
        report.users = user_ids.len();

        let before = state.sso_records.len();
        state.sso_records.retain(|id| !user_ids.contains(id));
        report.sso_records = before - state.sso_records.len();

        Ok(report)
    }
}
