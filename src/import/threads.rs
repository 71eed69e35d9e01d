//! Thread import.
//!
//! Topics and comments arrive flattened: a comment only names the post it
//! replies to. Every post record seen during the run is kept so a comment's
//! chain can be walked up to its topic even when the ancestors arrived in an
//! earlier batch. The topic's first ancestor is the owning project, whose
//! deletion flag propagates down to every post under it.

use super::ImportContext;
use super::categories::CategoryIds;
use super::stats::ImportStats;
use crate::correlation::{CorrelationEntry, EntryMeta};
use crate::destination::{Destination, NewPost, NewTopic, TopicFields};
use crate::error::{ImportError, ImportResult};
use crate::ident::{self, InternalKey};
use crate::mentions::rewrite_mentions;
use crate::models::{
    Category, CommentRecord, CorrelationRecord, DestinationId, EntityKind, PostRecord, TopicRecord,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::io::Write;

/// Persist an ancestor chain as `-a-b-c-`.
pub fn encode_chain(guids: &[String]) -> String {
    format!("-{}-", guids.join("-"))
}

pub fn decode_chain(value: &str) -> Vec<String> {
    value
        .split('-')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_date(kind: EntityKind, guid: &str, value: &str) -> ImportResult<DateTime<Utc>> {
    dateparser::parse(value).map_err(|err| ImportError::InvalidRecord {
        kind,
        external_id: guid.to_string(),
        message: format!("unparseable date_created `{}`: {}", value, err),
    })
}

fn project_guid(topic: &TopicRecord) -> ImportResult<&str> {
    topic
        .parent_guids
        .first()
        .map(String::as_str)
        .ok_or_else(|| ImportError::InvalidRecord {
            kind: EntityKind::Post,
            external_id: topic.topic_guid.clone(),
            message: "topic has no project in its parent chain".to_string(),
        })
}

pub struct ThreadImporter {
    posts: HashMap<InternalKey, PostRecord>,
    categories: CategoryIds,
    system_user_id: DestinationId,
}

impl ThreadImporter {
    pub fn new(categories: CategoryIds, system_user_id: DestinationId) -> Self {
        Self {
            posts: HashMap::new(),
            categories,
            system_user_id,
        }
    }

    /// Number of post records accumulated so far.
    pub fn known_posts(&self) -> usize {
        self.posts.len()
    }

    pub async fn import_batch<D: Destination, W: Write>(
        &mut self,
        ctx: &mut ImportContext<'_, D, W>,
        batch: Vec<PostRecord>,
    ) -> ImportResult<ImportStats> {
        let mut keys = Vec::with_capacity(batch.len());
        for post in batch {
            let key = ident::encode(post.guid())?;
            keys.push(key);
            self.posts.insert(key, post);
        }

        let mut stats = ImportStats::default();
        let mut topics = Vec::new();

        for key in keys {
            let Some(post) = self.posts.get(&key) else {
                continue;
            };
            match post {
                PostRecord::Topic(topic) => {
                    if self.import_topic(ctx, key, topic).await? {
                        stats.created += 1;
                    } else {
                        stats.skipped += 1;
                    }
                    topics.push(key);
                }
                PostRecord::Comment(comment) => {
                    let Some(root) = self.resolve_topic(comment)? else {
                        log::warn!(
                            "skipping orphaned comment {}: reply chain from {} never reaches a topic",
                            comment.comment_guid,
                            comment.reply_to
                        );
                        stats.orphaned += 1;
                        continue;
                    };
                    if self.import_comment(ctx, key, comment, root).await? {
                        stats.created += 1;
                    } else {
                        stats.skipped += 1;
                    }
                }
            }
        }

        for key in topics {
            if let Some(PostRecord::Topic(topic)) = self.posts.get(&key) {
                finish_topic(ctx, topic).await?;
            }
        }

        Ok(stats)
    }

    /// Follow reply-to links until a topic is reached.
    ///
    /// A missing link or a cycle leaves the comment orphaned.
    fn resolve_topic(&self, comment: &CommentRecord) -> ImportResult<Option<&TopicRecord>> {
        let mut visited = HashSet::from([ident::encode(&comment.comment_guid)?]);
        let mut next = comment.reply_to.as_str();

        loop {
            if next.is_empty() {
                return Ok(None);
            }
            let key = ident::encode(next)?;
            if !visited.insert(key) {
                log::debug!("reply cycle through {} at {}", comment.comment_guid, next);
                return Ok(None);
            }
            match self.posts.get(&key) {
                None => return Ok(None),
                Some(PostRecord::Topic(topic)) => return Ok(Some(topic)),
                Some(PostRecord::Comment(parent)) => next = parent.reply_to.as_str(),
            }
        }
    }

    async fn import_topic<D: Destination, W: Write>(
        &self,
        ctx: &mut ImportContext<'_, D, W>,
        key: InternalKey,
        topic: &TopicRecord,
    ) -> ImportResult<bool> {
        if ctx.store.lookup_by_key(EntityKind::Post, key).is_some() {
            return Ok(false);
        }

        let category_id =
            self.categories
                .for_tag(&topic.category)
                .ok_or_else(|| ImportError::InvalidRecord {
                    kind: EntityKind::Post,
                    external_id: topic.topic_guid.clone(),
                    message: format!("unknown category `{}`", topic.category),
                })?;
        let deleted = topic.is_deleted || project_deleted(ctx, topic)?;
        let created_at = parse_date(EntityKind::Post, &topic.topic_guid, &topic.date_created)?;
        let raw = rewrite_mentions(&topic.content);

        let created = ctx
            .destination
            .create_topic(&NewTopic {
                key,
                guid: &topic.topic_guid,
                title: &topic.title,
                raw: &raw,
                user_id: self.system_user_id,
                category_id,
                created_at,
                is_deleted: topic.is_deleted,
                deleted_at: deleted.then(Utc::now),
            })
            .await?;

        ctx.store.record_created(CorrelationEntry::new(
            EntityKind::Post,
            topic.topic_guid.as_str(),
            key,
            created.post_id,
            EntryMeta::Post {
                topic_id: created.topic_id,
                post_number: created.post_number,
            },
        ));
        log::debug!(
            "created topic {} ({}) deleted={}",
            topic.topic_guid,
            created.topic_id,
            deleted
        );
        Ok(true)
    }

    async fn import_comment<D: Destination, W: Write>(
        &self,
        ctx: &mut ImportContext<'_, D, W>,
        key: InternalKey,
        comment: &CommentRecord,
        root: &TopicRecord,
    ) -> ImportResult<bool> {
        if ctx.store.lookup_by_key(EntityKind::Post, key).is_some() {
            return Ok(false);
        }

        let deleted = comment.is_deleted || project_deleted(ctx, root)?;
        let user_id = ctx
            .store
            .require(EntityKind::User, &comment.user)?
            .destination_id;
        let parent = ctx.store.require(EntityKind::Post, &comment.reply_to)?;
        let EntryMeta::Post {
            topic_id,
            post_number,
        } = parent.meta
        else {
            return Err(ImportError::Consistency(format!(
                "post {} has no topic placement recorded",
                parent.external_id
            )));
        };
        let created_at = parse_date(
            EntityKind::Post,
            &comment.comment_guid,
            &comment.date_created,
        )?;
        let raw = rewrite_mentions(&comment.content);

        let created = ctx
            .destination
            .create_post(&NewPost {
                key,
                guid: &comment.comment_guid,
                raw: &raw,
                user_id,
                topic_id,
                reply_to_post_number: Some(post_number),
                created_at,
                is_deleted: comment.is_deleted,
                deleted_at: deleted.then(Utc::now),
            })
            .await?;

        ctx.store.record_created(CorrelationEntry::new(
            EntityKind::Post,
            comment.comment_guid.as_str(),
            key,
            created.post_id,
            EntryMeta::Post {
                topic_id: created.topic_id,
                post_number: created.post_number,
            },
        ));
        log::trace!(
            "created post {} as #{} in topic {}",
            comment.comment_guid,
            created.post_number,
            created.topic_id
        );
        Ok(true)
    }
}

fn project_deleted<D, W: Write>(
    ctx: &ImportContext<'_, D, W>,
    topic: &TopicRecord,
) -> ImportResult<bool> {
    let project = ctx
        .store
        .require(EntityKind::Project, project_guid(topic)?)?;
    Ok(matches!(project.meta, EntryMeta::Project { deleted: true }))
}

/// Persist the topic's correlation fields, read them back and emit the
/// topic's correlation record.
async fn finish_topic<D: Destination, W: Write>(
    ctx: &mut ImportContext<'_, D, W>,
    topic: &TopicRecord,
) -> ImportResult<()> {
    let entry = ctx.store.require(EntityKind::Post, &topic.topic_guid)?;
    let post_id = entry.destination_id;
    let EntryMeta::Post { topic_id, .. } = entry.meta else {
        return Err(ImportError::Consistency(format!(
            "topic {} has no topic id recorded",
            topic.topic_guid
        )));
    };

    let fields = TopicFields {
        parent_guids: Some(encode_chain(&topic.parent_guids)),
        project_guid: Some(project_guid(topic)?.to_string()),
        topic_guid: Some(topic.topic_guid.clone()),
    };
    ctx.destination.write_topic_fields(topic_id, &fields).await?;

    let state = ctx.destination.topic_state(topic_id).await?.ok_or_else(|| {
        ImportError::Consistency(format!(
            "topic {} ({}) is correlated but missing at the destination",
            topic.topic_guid, topic_id
        ))
    })?;
    if state.fields != fields {
        return Err(ImportError::Consistency(format!(
            "topic {} ({}) stored {:?}, expected {:?}",
            topic.topic_guid, topic_id, state.fields, fields
        )));
    }
    if state
        .category_name
        .as_deref()
        .and_then(Category::from_name)
        .is_none()
    {
        return Err(ImportError::Consistency(format!(
            "topic {} ({}) is in unexpected category {:?}",
            topic.topic_guid, topic_id, state.category_name
        )));
    }

    ctx.emitter.emit(&CorrelationRecord::Topic {
        guid: topic.topic_guid.clone(),
        topic_id,
        topic_title: state.title,
        topic_parent_guids: state
            .fields
            .parent_guids
            .as_deref()
            .map(decode_chain)
            .unwrap_or_default(),
        topic_deleted: state.deleted,
        post_id,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_encoding() {
        let chain = vec!["p1abc".to_string(), "p2abc".to_string()];
        assert_eq!(encode_chain(&chain), "-p1abc-p2abc-");
        assert_eq!(decode_chain("-p1abc-p2abc-"), chain);
        assert!(decode_chain("--").is_empty());
    }

    #[test]
    fn test_parse_date_reports_invalid_record() {
        assert!(parse_date(EntityKind::Post, "t1abc", "2015-06-01T12:30:00Z").is_ok());
        let err = parse_date(EntityKind::Post, "t1abc", "not a date").unwrap_err();
        assert!(matches!(
            err,
            ImportError::InvalidRecord { ref external_id, .. } if external_id == "t1abc"
        ));
    }

    fn comment(guid: &str, reply_to: &str) -> PostRecord {
        PostRecord::Comment(CommentRecord {
            comment_guid: guid.to_string(),
            reply_to: reply_to.to_string(),
            content: String::new(),
            user: "u1abc".to_string(),
            date_created: "2015-01-01".to_string(),
            is_deleted: false,
        })
    }

    fn importer_with(posts: Vec<PostRecord>) -> ThreadImporter {
        let mut importer = ThreadImporter::new(CategoryIds::default(), -1);
        for post in posts {
            importer
                .posts
                .insert(ident::encode(post.guid()).unwrap(), post);
        }
        importer
    }

    #[test]
    fn test_resolve_walks_to_topic() {
        let topic = PostRecord::Topic(TopicRecord {
            topic_guid: "t1abc".to_string(),
            title: "T".to_string(),
            content: String::new(),
            date_created: "2015-01-01".to_string(),
            is_deleted: false,
            parent_guids: vec!["p1abc".to_string()],
            category: "nodes".to_string(),
        });
        let importer = importer_with(vec![
            topic,
            comment("c1abc", "t1abc"),
            comment("c2abc", "c1abc"),
        ]);

        let PostRecord::Comment(leaf) = comment("c3abc", "c2abc") else {
            unreachable!()
        };
        let root = importer.resolve_topic(&leaf).unwrap().unwrap();
        assert_eq!(root.topic_guid, "t1abc");
        assert_eq!(project_guid(root).unwrap(), "p1abc");
    }

    #[test]
    fn test_resolve_treats_missing_links_and_cycles_as_orphans() {
        let importer = importer_with(vec![
            comment("c1abc", "c2abc"),
            comment("c2abc", "c1abc"),
        ]);

        let PostRecord::Comment(missing) = comment("c9abc", "zzzzz") else {
            unreachable!()
        };
        assert!(importer.resolve_topic(&missing).unwrap().is_none());

        let PostRecord::Comment(cyclic) = comment("c3abc", "c1abc") else {
            unreachable!()
        };
        assert!(importer.resolve_topic(&cyclic).unwrap().is_none());
    }
}
