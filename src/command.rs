//! Outgoing mutation model and persistence wrappers.

use serde::{Deserialize, Serialize};

use crate::{
    entity::{Comment, Entity, Post, Reply, SessionContext},
    types::{temp_handle, Action, CommandSeq, CommandStatus, EntityKind, Handle, UnixMs},
};

/// Version number for serialized [`StoredCommandEnvelope`] payloads.
pub const COMMAND_FORMAT_VERSION: u16 = 1;

/// Action and entity family of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandKind {
    /// What the command does.
    pub action: Action,
    /// What it does it to.
    pub entity: EntityKind,
}

/// A locally originated mutation awaiting remote confirmation.
///
/// Every variant carries the snapshot needed to replay it or build its
/// inverse, so neither depends on state outside the command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutgoingCommand {
    /// Publish a new topic.
    CreateTopic {
        /// Topic as created locally.
        topic: Post,
    },
    /// Edit a topic's content.
    UpdateTopic {
        /// Topic with the new content.
        topic: Post,
        /// Topic content before the edit.
        previous: Post,
    },
    /// Delete a topic.
    RemoveTopic {
        /// Topic snapshot at removal.
        topic: Post,
    },
    /// Like a topic.
    LikeTopic {
        /// Topic snapshot.
        topic: Post,
    },
    /// Withdraw a like from a topic.
    UnlikeTopic {
        /// Topic snapshot.
        topic: Post,
    },
    /// Pin a topic.
    PinTopic {
        /// Topic snapshot.
        topic: Post,
    },
    /// Unpin a topic.
    UnpinTopic {
        /// Topic snapshot.
        topic: Post,
    },
    /// Hide a topic from the user's feeds.
    HideTopic {
        /// Topic snapshot.
        topic: Post,
    },
    /// Undo a hide.
    UnhideTopic {
        /// Topic snapshot.
        topic: Post,
    },
    /// Post a comment.
    CreateComment {
        /// Comment as created locally.
        comment: Comment,
    },
    /// Edit a comment.
    UpdateComment {
        /// Comment with the new content.
        comment: Comment,
        /// Comment content before the edit.
        previous: Comment,
    },
    /// Delete a comment.
    RemoveComment {
        /// Comment snapshot at removal.
        comment: Comment,
    },
    /// Like a comment.
    LikeComment {
        /// Comment snapshot.
        comment: Comment,
    },
    /// Withdraw a like from a comment.
    UnlikeComment {
        /// Comment snapshot.
        comment: Comment,
    },
    /// Post a reply.
    CreateReply {
        /// Reply as created locally.
        reply: Reply,
    },
    /// Edit a reply.
    UpdateReply {
        /// Reply with the new content.
        reply: Reply,
        /// Reply content before the edit.
        previous: Reply,
    },
    /// Delete a reply.
    RemoveReply {
        /// Reply snapshot at removal.
        reply: Reply,
    },
    /// Like a reply.
    LikeReply {
        /// Reply snapshot.
        reply: Reply,
    },
    /// Withdraw a like from a reply.
    UnlikeReply {
        /// Reply snapshot.
        reply: Reply,
    },
}

/// Borrowed view of the entity snapshot a command carries.
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    /// Topic snapshot.
    Topic(&'a Post),
    /// Comment snapshot.
    Comment(&'a Comment),
    /// Reply snapshot.
    Reply(&'a Reply),
}

impl OutgoingCommand {
    /// Builds a topic creation with a temporary handle.
    pub fn create_topic(
        ctx: &SessionContext,
        title: Option<String>,
        text: Option<String>,
        image_url: Option<String>,
        now: UnixMs,
    ) -> Self {
        Self::CreateTopic {
            topic: Post {
                topic_handle: temp_handle(),
                author: ctx.me.clone(),
                title,
                text,
                image_url,
                created_ms: now,
                ..Post::default()
            },
        }
    }

    /// Builds a comment creation under `topic_handle` with a temporary handle.
    pub fn create_comment(
        ctx: &SessionContext,
        topic_handle: impl Into<Handle>,
        text: impl Into<String>,
        now: UnixMs,
    ) -> Self {
        Self::CreateComment {
            comment: Comment {
                comment_handle: temp_handle(),
                topic_handle: topic_handle.into(),
                author: ctx.me.clone(),
                text: Some(text.into()),
                created_ms: now,
                ..Comment::default()
            },
        }
    }

    /// Builds a reply creation under `comment` with a temporary handle.
    pub fn create_reply(
        ctx: &SessionContext,
        comment: &Comment,
        text: impl Into<String>,
        now: UnixMs,
    ) -> Self {
        Self::CreateReply {
            reply: Reply {
                reply_handle: temp_handle(),
                comment_handle: comment.comment_handle.clone(),
                topic_handle: comment.topic_handle.clone(),
                author: ctx.me.clone(),
                text: Some(text.into()),
                created_ms: now,
                ..Reply::default()
            },
        }
    }

    /// Like or unlike depending on the topic's current state.
    pub fn toggle_like_topic(topic: &Post) -> Self {
        let topic = topic.clone();
        if topic.liked {
            Self::UnlikeTopic { topic }
        } else {
            Self::LikeTopic { topic }
        }
    }

    /// Pin or unpin depending on the topic's current state.
    pub fn toggle_pin_topic(topic: &Post) -> Self {
        let topic = topic.clone();
        if topic.pinned {
            Self::UnpinTopic { topic }
        } else {
            Self::PinTopic { topic }
        }
    }

    /// Like or unlike depending on the comment's current state.
    pub fn toggle_like_comment(comment: &Comment) -> Self {
        let comment = comment.clone();
        if comment.liked {
            Self::UnlikeComment { comment }
        } else {
            Self::LikeComment { comment }
        }
    }

    /// Like or unlike depending on the reply's current state.
    pub fn toggle_like_reply(reply: &Reply) -> Self {
        let reply = reply.clone();
        if reply.liked {
            Self::UnlikeReply { reply }
        } else {
            Self::LikeReply { reply }
        }
    }

    /// Returns the action and entity family.
    pub fn kind(&self) -> CommandKind {
        let (action, entity) = match self {
            Self::CreateTopic { .. } => (Action::Create, EntityKind::Topic),
            Self::UpdateTopic { .. } => (Action::Update, EntityKind::Topic),
            Self::RemoveTopic { .. } => (Action::Remove, EntityKind::Topic),
            Self::LikeTopic { .. } => (Action::Like, EntityKind::Topic),
            Self::UnlikeTopic { .. } => (Action::Unlike, EntityKind::Topic),
            Self::PinTopic { .. } => (Action::Pin, EntityKind::Topic),
            Self::UnpinTopic { .. } => (Action::Unpin, EntityKind::Topic),
            Self::HideTopic { .. } => (Action::Hide, EntityKind::Topic),
            Self::UnhideTopic { .. } => (Action::Unhide, EntityKind::Topic),
            Self::CreateComment { .. } => (Action::Create, EntityKind::Comment),
            Self::UpdateComment { .. } => (Action::Update, EntityKind::Comment),
            Self::RemoveComment { .. } => (Action::Remove, EntityKind::Comment),
            Self::LikeComment { .. } => (Action::Like, EntityKind::Comment),
            Self::UnlikeComment { .. } => (Action::Unlike, EntityKind::Comment),
            Self::CreateReply { .. } => (Action::Create, EntityKind::Reply),
            Self::UpdateReply { .. } => (Action::Update, EntityKind::Reply),
            Self::RemoveReply { .. } => (Action::Remove, EntityKind::Reply),
            Self::LikeReply { .. } => (Action::Like, EntityKind::Reply),
            Self::UnlikeReply { .. } => (Action::Unlike, EntityKind::Reply),
        };
        CommandKind { action, entity }
    }

    /// The entity snapshot this command carries.
    pub fn subject(&self) -> Subject<'_> {
        match self {
            Self::CreateTopic { topic }
            | Self::UpdateTopic { topic, .. }
            | Self::RemoveTopic { topic }
            | Self::LikeTopic { topic }
            | Self::UnlikeTopic { topic }
            | Self::PinTopic { topic }
            | Self::UnpinTopic { topic }
            | Self::HideTopic { topic }
            | Self::UnhideTopic { topic } => Subject::Topic(topic),
            Self::CreateComment { comment }
            | Self::UpdateComment { comment, .. }
            | Self::RemoveComment { comment }
            | Self::LikeComment { comment }
            | Self::UnlikeComment { comment } => Subject::Comment(comment),
            Self::CreateReply { reply }
            | Self::UpdateReply { reply, .. }
            | Self::RemoveReply { reply }
            | Self::LikeReply { reply }
            | Self::UnlikeReply { reply } => Subject::Reply(reply),
        }
    }

    /// Handle of the entity the command acts on.
    pub fn entity_handle(&self) -> &str {
        match self.subject() {
            Subject::Topic(t) => t.handle(),
            Subject::Comment(c) => c.handle(),
            Subject::Reply(r) => r.handle(),
        }
    }

    /// True for commands whose confirmation carries a server-issued handle.
    pub fn creates_entity(&self) -> bool {
        self.kind().action == Action::Create
    }

    /// Parent scope used for ordering and handle resolution.
    pub fn related_handle(&self) -> Option<&str> {
        match self {
            Self::CreateTopic { .. } => None,
            Self::UpdateTopic { topic, .. }
            | Self::RemoveTopic { topic }
            | Self::LikeTopic { topic }
            | Self::UnlikeTopic { topic }
            | Self::PinTopic { topic }
            | Self::UnpinTopic { topic }
            | Self::HideTopic { topic }
            | Self::UnhideTopic { topic } => Some(&topic.topic_handle),
            Self::CreateComment { comment }
            | Self::UpdateComment { comment, .. }
            | Self::RemoveComment { comment } => Some(&comment.topic_handle),
            Self::LikeComment { comment } | Self::UnlikeComment { comment } => {
                Some(&comment.comment_handle)
            }
            Self::CreateReply { reply }
            | Self::UpdateReply { reply, .. }
            | Self::RemoveReply { reply } => Some(&reply.comment_handle),
            Self::LikeReply { reply } | Self::UnlikeReply { reply } => Some(&reply.reply_handle),
        }
    }

    /// Rewrites the snapshot field that [`Self::related_handle`] reads.
    pub fn set_related_handle(&mut self, handle: impl Into<Handle>) {
        let handle = handle.into();
        match self {
            Self::CreateTopic { .. } => {}
            Self::UpdateTopic { topic, previous } => {
                topic.topic_handle = handle.clone();
                previous.topic_handle = handle;
            }
            Self::RemoveTopic { topic }
            | Self::LikeTopic { topic }
            | Self::UnlikeTopic { topic }
            | Self::PinTopic { topic }
            | Self::UnpinTopic { topic }
            | Self::HideTopic { topic }
            | Self::UnhideTopic { topic } => topic.topic_handle = handle,
            Self::UpdateComment { comment, previous } => {
                comment.topic_handle = handle.clone();
                previous.topic_handle = handle;
            }
            Self::CreateComment { comment } | Self::RemoveComment { comment } => {
                comment.topic_handle = handle
            }
            Self::LikeComment { comment } | Self::UnlikeComment { comment } => {
                comment.comment_handle = handle
            }
            Self::UpdateReply { reply, previous } => {
                reply.comment_handle = handle.clone();
                previous.comment_handle = handle;
            }
            Self::CreateReply { reply } | Self::RemoveReply { reply } => reply.comment_handle = handle,
            Self::LikeReply { reply } | Self::UnlikeReply { reply } => reply.reply_handle = handle,
        }
    }

    /// Rewrites every handle reference to `old` in the carried snapshots.
    pub fn rewrite_handles(&mut self, old: &str, new: &str) -> bool {
        match self {
            Self::UpdateTopic { topic, previous } => {
                let a = topic.rewrite_handles(old, new);
                let b = previous.rewrite_handles(old, new);
                a || b
            }
            Self::UpdateComment { comment, previous } => {
                let a = comment.rewrite_handles(old, new);
                let b = previous.rewrite_handles(old, new);
                a || b
            }
            Self::UpdateReply { reply, previous } => {
                let a = reply.rewrite_handles(old, new);
                let b = previous.rewrite_handles(old, new);
                a || b
            }
            Self::CreateTopic { topic }
            | Self::RemoveTopic { topic }
            | Self::LikeTopic { topic }
            | Self::UnlikeTopic { topic }
            | Self::PinTopic { topic }
            | Self::UnpinTopic { topic }
            | Self::HideTopic { topic }
            | Self::UnhideTopic { topic } => topic.rewrite_handles(old, new),
            Self::CreateComment { comment }
            | Self::RemoveComment { comment }
            | Self::LikeComment { comment }
            | Self::UnlikeComment { comment } => comment.rewrite_handles(old, new),
            Self::CreateReply { reply }
            | Self::RemoveReply { reply }
            | Self::LikeReply { reply }
            | Self::UnlikeReply { reply } => reply.rewrite_handles(old, new),
        }
    }

    /// The command that undoes this one on every projection.
    pub fn inverse(&self) -> Self {
        match self.clone() {
            Self::CreateTopic { topic } => Self::RemoveTopic { topic },
            Self::RemoveTopic { topic } => Self::CreateTopic { topic },
            Self::UpdateTopic { topic, previous } => Self::UpdateTopic {
                topic: previous,
                previous: topic,
            },
            Self::LikeTopic { topic } => Self::UnlikeTopic { topic },
            Self::UnlikeTopic { topic } => Self::LikeTopic { topic },
            Self::PinTopic { topic } => Self::UnpinTopic { topic },
            Self::UnpinTopic { topic } => Self::PinTopic { topic },
            Self::HideTopic { topic } => Self::UnhideTopic { topic },
            Self::UnhideTopic { topic } => Self::HideTopic { topic },
            Self::CreateComment { comment } => Self::RemoveComment { comment },
            Self::RemoveComment { comment } => Self::CreateComment { comment },
            Self::UpdateComment { comment, previous } => Self::UpdateComment {
                comment: previous,
                previous: comment,
            },
            Self::LikeComment { comment } => Self::UnlikeComment { comment },
            Self::UnlikeComment { comment } => Self::LikeComment { comment },
            Self::CreateReply { reply } => Self::RemoveReply { reply },
            Self::RemoveReply { reply } => Self::CreateReply { reply },
            Self::UpdateReply { reply, previous } => Self::UpdateReply {
                reply: previous,
                previous: reply,
            },
            Self::LikeReply { reply } => Self::UnlikeReply { reply },
            Self::UnlikeReply { reply } => Self::LikeReply { reply },
        }
    }
}

/// Outbox row: sequence metadata plus the command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCommand {
    /// Monotonic outbox sequence.
    pub seq: CommandSeq,
    /// Enqueue timestamp in milliseconds.
    pub ts_ms: UnixMs,
    /// Upload state.
    pub status: CommandStatus,
    /// Transient submission failures so far.
    pub attempts: u32,
    /// Command body.
    pub command: OutgoingCommand,
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCommandEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped command row.
    pub stored: StoredCommand,
}

impl StoredCommandEnvelope {
    /// Constructs an envelope using [`COMMAND_FORMAT_VERSION`].
    pub fn new(stored: StoredCommand) -> Self {
        Self {
            format_version: COMMAND_FORMAT_VERSION,
            stored,
        }
    }
}
