use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier assigned by the destination platform.
pub type DestinationId = i64;

// ===== Entity kinds =====

/// Kinds of entity tracked in the correlation store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Category,
    User,
    Project,
    Post,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Category => "category",
            EntityKind::User => "user",
            EntityKind::Project => "project",
            EntityKind::Post => "post",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of record section that may appear in the export stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    User,
    Project,
    Post,
}

impl From<RecordKind> for EntityKind {
    fn from(kind: RecordKind) -> Self {
        match kind {
            RecordKind::User => EntityKind::User,
            RecordKind::Project => EntityKind::Project,
            RecordKind::Post => EntityKind::Post,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        EntityKind::from(*self).fmt(f)
    }
}

// ===== Categories =====

/// Fixed top-level classification buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Files,
    Wiki,
    Projects,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Files, Category::Wiki, Category::Projects];

    /// Tag used by post records (`type` field) to select the category.
    pub fn tag(self) -> &'static str {
        match self {
            Category::Files => "files",
            Category::Wiki => "wiki",
            Category::Projects => "nodes",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Category::Files => "Files",
            Category::Wiki => "Wikis",
            Category::Projects => "Projects",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Category::Files => "BF1E2E",
            Category::Wiki => "3AB54A",
            Category::Projects => "652D90",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Category> {
        Category::ALL.into_iter().find(|c| c.tag() == tag)
    }

    pub fn from_name(name: &str) -> Option<Category> {
        Category::ALL.into_iter().find(|c| c.name() == name)
    }
}

// ===== Export stream records =====

/// Section header: the records that follow are of `object_type`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CountMarker {
    pub object_type: RecordKind,
    #[serde(default)]
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_disabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectRecord {
    pub guid: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub contributors: Vec<String>,
}

/// First post of a discussion thread.
#[derive(Debug, Clone, Deserialize)]
pub struct TopicRecord {
    pub topic_guid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub date_created: String,
    #[serde(default)]
    pub is_deleted: bool,
    /// Ancestor project chain, root first.
    #[serde(default)]
    pub parent_guids: Vec<String>,
    /// Category tag.
    #[serde(rename = "type", default)]
    pub category: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentRecord {
    pub comment_guid: String,
    pub reply_to: String,
    #[serde(default)]
    pub content: String,
    pub user: String,
    pub date_created: String,
    #[serde(default)]
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "post_type", rename_all = "lowercase")]
pub enum PostRecord {
    Topic(TopicRecord),
    Comment(CommentRecord),
}

impl PostRecord {
    pub fn guid(&self) -> &str {
        match self {
            PostRecord::Topic(topic) => &topic.topic_guid,
            PostRecord::Comment(comment) => &comment.comment_guid,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            PostRecord::Topic(topic) => &topic.content,
            PostRecord::Comment(comment) => &comment.content,
        }
    }

    pub fn date_created(&self) -> &str {
        match self {
            PostRecord::Topic(topic) => &topic.date_created,
            PostRecord::Comment(comment) => &comment.date_created,
        }
    }

    pub fn is_deleted(&self) -> bool {
        match self {
            PostRecord::Topic(topic) => topic.is_deleted,
            PostRecord::Comment(comment) => comment.is_deleted,
        }
    }
}

// ===== Correlation output =====

/// One line of the correlation file read back by the source system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CorrelationRecord {
    User {
        guid: String,
        user_id: DestinationId,
    },
    Project {
        guid: String,
        group_id: DestinationId,
        group_public: bool,
        group_users: Vec<String>,
    },
    Topic {
        guid: String,
        topic_id: DestinationId,
        topic_title: String,
        topic_parent_guids: Vec<String>,
        topic_deleted: bool,
        post_id: DestinationId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_record_dispatches_on_post_type() {
        let topic: PostRecord = serde_json::from_str(
            r#"{"post_type":"topic","topic_guid":"t1abc","title":"Hi","content":"body","date_created":"2015-01-01T00:00:00Z","parent_guids":["p1abc"],"type":"nodes"}"#,
        )
        .unwrap();
        assert!(matches!(&topic, PostRecord::Topic(t) if t.category == "nodes"));
        assert_eq!(topic.guid(), "t1abc");

        let comment: PostRecord = serde_json::from_str(
            r#"{"post_type":"comment","comment_guid":"c1abc","reply_to":"t1abc","content":"x","user":"u1abc","date_created":"2015-01-01T00:00:00Z","is_deleted":true,"type":"nodes"}"#,
        )
        .unwrap();
        assert!(comment.is_deleted());
        assert_eq!(comment.guid(), "c1abc");
    }

    #[test]
    fn test_category_tags_and_names() {
        assert_eq!(Category::from_tag("nodes"), Some(Category::Projects));
        assert_eq!(Category::from_name("Wikis"), Some(Category::Wiki));
        assert_eq!(Category::from_tag("Files"), None);
    }

    #[test]
    fn test_correlation_record_wire_format() {
        let line = serde_json::to_string(&CorrelationRecord::User {
            guid: "u1abc".to_string(),
            user_id: 7,
        })
        .unwrap();
        assert_eq!(line, r#"{"type":"user","guid":"u1abc","user_id":7}"#);
    }
}
