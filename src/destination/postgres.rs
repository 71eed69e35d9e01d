//! PostgreSQL-backed destination.
//!
//! Writes straight into the platform's tables. Each create call runs in its
//! own transaction so an entity and its correlation fields land together;
//! a crash between records leaves nothing half-correlated.

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
use sha2::{Digest, Sha256};
use sqlx::postgres::{PgConnection, PgPool};
use std::collections::BTreeSet;
use std::time::Duration;

pub struct PgDestination {
    pool: PgPool,
    http: reqwest::Client,
}

impl PgDestination {
    pub fn new(pool: PgPool, avatar_timeout: Duration) -> DestinationResult<Self> {
        let http = reqwest::Client::builder().timeout(avatar_timeout).build()?;
        Ok(Self { pool, http })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Replace the named custom fields of one entity.
///
/// `table` and `owner` are compile-time constants, never user input.
async fn replace_fields(
    conn: &mut PgConnection,
    table: &str,
    owner: &str,
    owner_id: DestinationId,
    fields: &[(&str, String)],
) -> Result<(), sqlx::Error> {
    if fields.is_empty() {
        return Ok(());
    }

    let names: Vec<String> = fields.iter().map(|(name, _)| name.to_string()).collect();
    let values: Vec<String> = fields.iter().map(|(_, value)| value.clone()).collect();

    sqlx::query(&format!(
        "DELETE FROM {table} WHERE {owner} = $1 AND name = ANY($2)"
    ))
    .bind(owner_id)
    .bind(&names)
    .execute(&mut *conn)
    .await?;

    sqlx::query(&format!(
        r#"INSERT INTO {table} ({owner}, name, value, created_at, updated_at)
           SELECT $1, name, value, NOW(), NOW()
           FROM UNNEST($2::text[], $3::text[]) AS t(name, value)"#
    ))
    .bind(owner_id)
    .bind(&names)
    .bind(&values)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn correlation_field_pairs(key: InternalKey, guid: &str) -> Vec<(&'static str, String)> {
    vec![(IMPORT_ID, key.to_string()), (IMPORT_GUID, guid.to_string())]
}

/// Ids of every row in `owner_table` whose custom fields carry an `import_id`.
async fn imported_ids(
    conn: &mut PgConnection,
    fields_table: &str,
    owner: &str,
) -> Result<Vec<DestinationId>, sqlx::Error> {
    sqlx::query_scalar(&format!(
        "SELECT DISTINCT {owner} FROM {fields_table} WHERE name = '{IMPORT_ID}' ORDER BY {owner}"
    ))
    .fetch_all(&mut *conn)
    .await
}

async fn delete_by_ids(
    conn: &mut PgConnection,
    table: &str,
    column: &str,
    ids: &[DestinationId],
) -> Result<u64, sqlx::Error> {
    if ids.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query(&format!("DELETE FROM {table} WHERE {column} = ANY($1)"))
        .bind(ids)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

impl Destination for PgDestination {
    async fn load_correlations(&self) -> DestinationResult<Vec<CorrelationEntry>> {
        let mut entries = Vec::new();

        let categories: Vec<(DestinationId, String)> = sqlx::query_as(
            "SELECT category_id, value FROM category_custom_fields WHERE name = $1",
        )
        .bind(IMPORT_ID)
        .fetch_all(&self.pool)
        .await?;
        for (id, import_id) in categories {
            entries.extend(correlation_from_fields(
                EntityKind::Category,
                id,
                &import_id,
                None,
                EntryMeta::None,
            ));
        }

        let users: Vec<(DestinationId, String, Option<String>, Option<String>)> = sqlx::query_as(
            r#"SELECT cf.user_id, cf.value, g.value, d.value
               FROM user_custom_fields cf
               LEFT JOIN user_custom_fields g ON g.user_id = cf.user_id AND g.name = $2
               LEFT JOIN user_custom_fields d ON d.user_id = cf.user_id AND d.name = $3
               WHERE cf.name = $1"#,
        )
        .bind(IMPORT_ID)
        .bind(IMPORT_GUID)
        .bind(IS_DISABLED)
        .fetch_all(&self.pool)
        .await?;
        for (id, import_id, guid, disabled) in users {
            entries.extend(correlation_from_fields(
                EntityKind::User,
                id,
                &import_id,
                guid.as_deref(),
                EntryMeta::User {
                    disabled: is_flag_set(disabled.as_deref()),
                },
            ));
        }

        let groups: Vec<(DestinationId, String, Option<String>, Option<String>)> = sqlx::query_as(
            r#"SELECT cf.group_id, cf.value, g.value, d.value
               FROM group_custom_fields cf
               LEFT JOIN group_custom_fields g ON g.group_id = cf.group_id AND g.name = $2
               LEFT JOIN group_custom_fields d ON d.group_id = cf.group_id AND d.name = $3
               WHERE cf.name = $1"#,
        )
        .bind(IMPORT_ID)
        .bind(IMPORT_GUID)
        .bind(IS_DELETED)
        .fetch_all(&self.pool)
        .await?;
        for (id, import_id, guid, deleted) in groups {
            entries.extend(correlation_from_fields(
                EntityKind::Project,
                id,
                &import_id,
                guid.as_deref(),
                EntryMeta::Project {
                    deleted: is_flag_set(deleted.as_deref()),
                },
            ));
        }

        let posts: Vec<(DestinationId, String, Option<String>, DestinationId, i32)> =
            sqlx::query_as(
                r#"SELECT cf.post_id, cf.value, g.value, p.topic_id, p.post_number
                   FROM post_custom_fields cf
                   JOIN posts p ON p.id = cf.post_id
                   LEFT JOIN post_custom_fields g ON g.post_id = cf.post_id AND g.name = $2
                   WHERE cf.name = $1"#,
            )
            .bind(IMPORT_ID)
            .bind(IMPORT_GUID)
            .fetch_all(&self.pool)
            .await?;
        for (id, import_id, guid, topic_id, post_number) in posts {
            entries.extend(correlation_from_fields(
                EntityKind::Post,
                id,
                &import_id,
                guid.as_deref(),
                EntryMeta::Post {
                    topic_id,
                    post_number,
                },
            ));
        }

        log::debug!("loaded {} existing correlations", entries.len());
        Ok(entries)
    }

    async fn clear_sso_records(&self) -> DestinationResult<usize> {
        let result = sqlx::query("DELETE FROM single_sign_on_records")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn create_category(&self, category: &NewCategory<'_>) -> DestinationResult<DestinationId> {
        let mut tx = self.pool.begin().await?;

        let id: DestinationId = sqlx::query_scalar(
            r#"INSERT INTO categories (name, slug, color, created_at, updated_at)
               VALUES ($1, $2, $3, NOW(), NOW())
               RETURNING id"#,
        )
        .bind(category.name)
        .bind(category.name.to_lowercase())
        .bind(category.color)
        .fetch_one(&mut *tx)
        .await?;

        replace_fields(
            &mut tx,
            "category_custom_fields",
            "category_id",
            id,
            &[(IMPORT_ID, category.tag.to_string())],
        )
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn find_user_by_email(&self, email: &str) -> DestinationResult<Option<DestinationId>> {
        let id = sqlx::query_scalar(
            "SELECT id FROM users WHERE lower(email) = lower($1) ORDER BY id LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn annotate_user(
        &self,
        user_id: DestinationId,
        key: InternalKey,
        guid: &str,
        disabled: bool,
    ) -> DestinationResult<()> {
        let mut fields = correlation_field_pairs(key, guid);
        fields.push((IS_DISABLED, flag(disabled).to_string()));

        let mut tx = self.pool.begin().await?;
        replace_fields(&mut tx, "user_custom_fields", "user_id", user_id, &fields).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_user(&self, user: &NewUser<'_>) -> DestinationResult<DestinationId> {
        let mut tx = self.pool.begin().await?;

        let id: DestinationId = sqlx::query_scalar(
            r#"INSERT INTO users (username, name, email, active, created_at, updated_at)
               VALUES ($1, $2, $3, TRUE, NOW(), NOW())
               RETURNING id"#,
        )
        .bind(user.username)
        .bind(user.name)
        .bind(user.email)
        .fetch_one(&mut *tx)
        .await?;

        let mut fields = correlation_field_pairs(user.key, user.username);
        fields.push((IS_DISABLED, flag(user.disabled).to_string()));
        if let Some(url) = user.avatar_url {
            fields.push((IMPORT_AVATAR_URL, url.to_string()));
        }
        replace_fields(&mut tx, "user_custom_fields", "user_id", id, &fields).await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn user_state(&self, user_id: DestinationId) -> DestinationResult<Option<UserState>> {
        let row: Option<(bool, Option<String>)> = sqlx::query_as(
            r#"SELECT u.uploaded_avatar_id IS NOT NULL, cf.value
               FROM users u
               LEFT JOIN user_custom_fields cf ON cf.user_id = u.id AND cf.name = $2
               WHERE u.id = $1"#,
        )
        .bind(user_id)
        .bind(IS_DISABLED)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(has_avatar, disabled)| UserState {
            disabled: is_flag_set(disabled.as_deref()),
            has_avatar,
        }))
    }

    async fn attach_avatar(&self, user_id: DestinationId, url: &str) -> DestinationResult<()> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        let sha = format!("{:x}", Sha256::digest(&bytes));
        let filename = url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').find(|segment| !segment.is_empty()))
            .unwrap_or("avatar")
            .to_string();

        let mut tx = self.pool.begin().await?;

        let upload_id: DestinationId = sqlx::query_scalar(
            r#"INSERT INTO uploads (user_id, original_filename, filesize, sha256, url, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
               RETURNING id"#,
        )
        .bind(user_id)
        .bind(&filename)
        .bind(bytes.len() as i64)
        .bind(&sha)
        .bind(url)
        .fetch_one(&mut *tx)
        .await?;

        let updated = sqlx::query(
            "UPDATE users SET uploaded_avatar_id = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(upload_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(DestinationError::NotFound {
                entity: "user",
                id: user_id,
            });
        }

        tx.commit().await?;
        log::trace!("attached avatar {} ({} bytes) to user {}", filename, bytes.len(), user_id);
        Ok(())
    }

    async fn create_group(&self, group: &NewGroup<'_>) -> DestinationResult<DestinationId> {
        let mut tx = self.pool.begin().await?;

        let id: DestinationId = sqlx::query_scalar(
            r#"INSERT INTO groups (name, visible, created_at, updated_at)
               VALUES ($1, $2, NOW(), NOW())
               RETURNING id"#,
        )
        .bind(group.guid)
        .bind(group.visible)
        .fetch_one(&mut *tx)
        .await?;

        let mut fields = correlation_field_pairs(group.key, group.guid);
        fields.push((IS_DELETED, flag(group.deleted).to_string()));
        replace_fields(&mut tx, "group_custom_fields", "group_id", id, &fields).await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn set_group_members(
        &self,
        group_id: DestinationId,
        user_ids: &[DestinationId],
    ) -> DestinationResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM group_users WHERE group_id = $1 AND NOT (user_id = ANY($2))")
            .bind(group_id)
            .bind(user_ids)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"INSERT INTO group_users (group_id, user_id, created_at, updated_at)
               SELECT $1, user_id, NOW(), NOW()
               FROM UNNEST($2::bigint[]) AS t(user_id)
               ON CONFLICT (group_id, user_id) DO NOTHING"#,
        )
        .bind(group_id)
        .bind(user_ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn group_state(&self, group_id: DestinationId) -> DestinationResult<Option<GroupState>> {
        let row: Option<(bool, Option<String>)> = sqlx::query_as(
            r#"SELECT g.visible, cf.value
               FROM groups g
               LEFT JOIN group_custom_fields cf ON cf.group_id = g.id AND cf.name = $2
               WHERE g.id = $1"#,
        )
        .bind(group_id)
        .bind(IS_DELETED)
        .fetch_optional(&self.pool)
        .await?;

        let Some((visible, deleted)) = row else {
            return Ok(None);
        };

        let member_ids: Vec<DestinationId> = sqlx::query_scalar(
            "SELECT user_id FROM group_users WHERE group_id = $1 ORDER BY user_id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(GroupState {
            visible,
            deleted: is_flag_set(deleted.as_deref()),
            member_ids,
        }))
    }

    async fn create_topic(&self, topic: &NewTopic<'_>) -> DestinationResult<CreatedPost> {
        let mut tx = self.pool.begin().await?;

        let topic_id: DestinationId = sqlx::query_scalar(
            r#"INSERT INTO topics (title, user_id, category_id, created_at, updated_at, deleted_at)
               VALUES ($1, $2, $3, $4, NOW(), $5)
               RETURNING id"#,
        )
        .bind(topic.title)
        .bind(topic.user_id)
        .bind(topic.category_id)
        .bind(topic.created_at)
        .bind(topic.deleted_at)
        .fetch_one(&mut *tx)
        .await?;

        let post_id: DestinationId = sqlx::query_scalar(
            r#"INSERT INTO posts (topic_id, user_id, post_number, raw, created_at, updated_at, deleted_at)
               VALUES ($1, $2, 1, $3, $4, NOW(), $5)
               RETURNING id"#,
        )
        .bind(topic_id)
        .bind(topic.user_id)
        .bind(topic.raw)
        .bind(topic.created_at)
        .bind(topic.deleted_at)
        .fetch_one(&mut *tx)
        .await?;

        let mut fields = correlation_field_pairs(topic.key, topic.guid);
        fields.push((IS_DELETED, flag(topic.is_deleted).to_string()));
        replace_fields(&mut tx, "post_custom_fields", "post_id", post_id, &fields).await?;

        tx.commit().await?;
        Ok(CreatedPost {
            post_id,
            topic_id,
            post_number: 1,
        })
    }

    async fn create_post(&self, post: &NewPost<'_>) -> DestinationResult<CreatedPost> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<DestinationId> =
            sqlx::query_scalar("SELECT id FROM topics WHERE id = $1 FOR UPDATE")
                .bind(post.topic_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(DestinationError::NotFound {
                entity: "topic",
                id: post.topic_id,
            });
        }

        let post_number: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(post_number), 0) + 1 FROM posts WHERE topic_id = $1",
        )
        .bind(post.topic_id)
        .fetch_one(&mut *tx)
        .await?;

        let post_id: DestinationId = sqlx::query_scalar(
            r#"INSERT INTO posts (topic_id, user_id, post_number, raw, reply_to_post_number, created_at, updated_at, deleted_at)
               VALUES ($1, $2, $3, $4, $5, $6, NOW(), $7)
               RETURNING id"#,
        )
        .bind(post.topic_id)
        .bind(post.user_id)
        .bind(post_number)
        .bind(post.raw)
        .bind(post.reply_to_post_number)
        .bind(post.created_at)
        .bind(post.deleted_at)
        .fetch_one(&mut *tx)
        .await?;

        let mut fields = correlation_field_pairs(post.key, post.guid);
        fields.push((IS_DELETED, flag(post.is_deleted).to_string()));
        replace_fields(&mut tx, "post_custom_fields", "post_id", post_id, &fields).await?;

        tx.commit().await?;
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
        let pairs: Vec<(&str, String)> = [
            (PARENT_GUIDS, &fields.parent_guids),
            (PROJECT_GUID, &fields.project_guid),
            (TOPIC_GUID, &fields.topic_guid),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.clone().map(|value| (name, value)))
        .collect();

        let mut tx = self.pool.begin().await?;
        replace_fields(&mut tx, "topic_custom_fields", "topic_id", topic_id, &pairs).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn topic_state(&self, topic_id: DestinationId) -> DestinationResult<Option<TopicState>> {
        let row: Option<(String, Option<String>, bool)> = sqlx::query_as(
            r#"SELECT t.title, c.name, t.deleted_at IS NOT NULL
               FROM topics t
               LEFT JOIN categories c ON c.id = t.category_id
               WHERE t.id = $1"#,
        )
        .bind(topic_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((title, category_name, deleted)) = row else {
            return Ok(None);
        };

        let names = vec![
            PARENT_GUIDS.to_string(),
            PROJECT_GUID.to_string(),
            TOPIC_GUID.to_string(),
        ];
        let stored: Vec<(String, String)> = sqlx::query_as(
            "SELECT name, value FROM topic_custom_fields WHERE topic_id = $1 AND name = ANY($2)",
        )
        .bind(topic_id)
        .bind(&names)
        .fetch_all(&self.pool)
        .await?;

        let mut fields = TopicFields::default();
        for (name, value) in stored {
            match name.as_str() {
                PARENT_GUIDS => fields.parent_guids = Some(value),
                PROJECT_GUID => fields.project_guid = Some(value),
                TOPIC_GUID => fields.topic_guid = Some(value),
                _ => {}
            }
        }

        Ok(Some(TopicState {
            title,
            category_name,
            deleted,
            fields,
        }))
    }

    async fn remove_imported(&self) -> DestinationResult<RemovalReport> {
        let mut tx = self.pool.begin().await?;
        let mut report = RemovalReport::default();

        let posts: Vec<(DestinationId, DestinationId)> = sqlx::query_as(
            r#"SELECT DISTINCT p.id, p.topic_id
               FROM posts p
               JOIN post_custom_fields cf ON cf.post_id = p.id
               WHERE cf.name = $1"#,
        )
        .bind(IMPORT_ID)
        .fetch_all(&mut *tx)
        .await?;
        let post_ids: Vec<DestinationId> = posts.iter().map(|(id, _)| *id).collect();
        let topic_ids: Vec<DestinationId> = posts
            .iter()
            .map(|(_, topic_id)| *topic_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        delete_by_ids(&mut tx, "posts", "id", &post_ids).await?;
        delete_by_ids(&mut tx, "post_custom_fields", "post_id", &post_ids).await?;
        report.posts = post_ids.len();
        log::info!("removed {} imported posts", report.posts);

        delete_by_ids(&mut tx, "topics", "id", &topic_ids).await?;
        delete_by_ids(&mut tx, "topic_custom_fields", "topic_id", &topic_ids).await?;
        report.topics = topic_ids.len();
        log::info!("removed {} imported topics", report.topics);

        let group_ids = imported_ids(&mut tx, "group_custom_fields", "group_id").await?;
        delete_by_ids(&mut tx, "groups", "id", &group_ids).await?;
        delete_by_ids(&mut tx, "group_custom_fields", "group_id", &group_ids).await?;
        delete_by_ids(&mut tx, "group_users", "group_id", &group_ids).await?;
        report.groups = group_ids.len();
        log::info!("removed {} imported groups", report.groups);

        let category_ids = imported_ids(&mut tx, "category_custom_fields", "category_id").await?;
        delete_by_ids(&mut tx, "categories", "id", &category_ids).await?;
        delete_by_ids(&mut tx, "category_custom_fields", "category_id", &category_ids).await?;
        report.categories = category_ids.len();
        log::info!("removed {} imported categories", report.categories);

        let user_ids = imported_ids(&mut tx, "user_custom_fields", "user_id").await?;
        delete_by_ids(&mut tx, "users", "id", &user_ids).await?;
        delete_by_ids(&mut tx, "user_custom_fields", "user_id", &user_ids).await?;
        report.users = user_ids.len();
        log::info!("removed {} imported users", report.users);

        report.uploads = delete_by_ids(&mut tx, "uploads", "user_id", &user_ids).await? as usize;

        report.sso_records =
            delete_by_ids(&mut tx, "single_sign_on_records", "user_id", &user_ids).await? as usize;

        tx.commit().await?;
        Ok(report)
    }
}
