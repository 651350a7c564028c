//! Social entities shown by projections and carried by commands.

use serde::{Deserialize, Serialize};

use crate::types::{Handle, UnixMs};

/// Common access to an entity's own handle and its handle references.
pub trait Entity: Clone {
    /// The entity's own handle.
    fn handle(&self) -> &str;

    /// Replaces every occurrence of `old` (own handle and parent handles).
    ///
    /// Returns true when anything was rewritten.
    fn rewrite_handles(&mut self, old: &str, new: &str) -> bool;
}

/// Author fields denormalised onto every entity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Author {
    /// Author's user handle.
    pub user_handle: Handle,
    /// Given name.
    pub first_name: Option<String>,
    /// Family name.
    pub last_name: Option<String>,
    /// Avatar url.
    pub photo_url: Option<String>,
}

/// Explicit session context handed to command constructors.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionContext {
    /// The signed-in user.
    pub me: Author,
}

impl SessionContext {
    /// Builds a context for the given user.
    pub fn new(me: Author) -> Self {
        Self { me }
    }
}

/// A topic (post).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Post {
    /// Topic handle.
    pub topic_handle: Handle,
    /// Author of the topic.
    pub author: Author,
    /// Optional title.
    pub title: Option<String>,
    /// Body text.
    pub text: Option<String>,
    /// Attached image url.
    pub image_url: Option<String>,
    /// Creation time.
    pub created_ms: UnixMs,
    /// Like counter.
    pub total_likes: u64,
    /// Comment counter.
    pub total_comments: u64,
    /// True when the current user liked the topic.
    pub liked: bool,
    /// True when the current user pinned the topic.
    pub pinned: bool,
}

/// A comment on a topic.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Comment {
    /// Comment handle.
    pub comment_handle: Handle,
    /// Parent topic.
    pub topic_handle: Handle,
    /// Author of the comment.
    pub author: Author,
    /// Body text.
    pub text: Option<String>,
    /// Attached image url.
    pub image_url: Option<String>,
    /// Creation time.
    pub created_ms: UnixMs,
    /// Like counter.
    pub total_likes: u64,
    /// Reply counter.
    pub total_replies: u64,
    /// True when the current user liked the comment.
    pub liked: bool,
}

/// A reply to a comment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Reply {
    /// Reply handle.
    pub reply_handle: Handle,
    /// Parent comment.
    pub comment_handle: Handle,
    /// Topic of the parent comment.
    pub topic_handle: Handle,
    /// Author of the reply.
    pub author: Author,
    /// Body text.
    pub text: Option<String>,
    /// Creation time.
    pub created_ms: UnixMs,
    /// Like counter.
    pub total_likes: u64,
    /// True when the current user liked the reply.
    pub liked: bool,
}

fn swap_handle(slot: &mut Handle, old: &str, new: &str) -> bool {
    if slot == old {
        *slot = new.to_string();
        true
    } else {
        false
    }
}

impl Entity for Post {
    fn handle(&self) -> &str {
        &self.topic_handle
    }

    fn rewrite_handles(&mut self, old: &str, new: &str) -> bool {
        swap_handle(&mut self.topic_handle, old, new)
    }
}

impl Entity for Comment {
    fn handle(&self) -> &str {
        &self.comment_handle
    }

    fn rewrite_handles(&mut self, old: &str, new: &str) -> bool {
        let own = swap_handle(&mut self.comment_handle, old, new);
        let parent = swap_handle(&mut self.topic_handle, old, new);
        own || parent
    }
}

impl Entity for Reply {
    fn handle(&self) -> &str {
        &self.reply_handle
    }

    fn rewrite_handles(&mut self, old: &str, new: &str) -> bool {
        let own = swap_handle(&mut self.reply_handle, old, new);
        let comment = swap_handle(&mut self.comment_handle, old, new);
        let topic = swap_handle(&mut self.topic_handle, old, new);
        own || comment || topic
    }
}

impl Post {
    /// Records a like; returns false if already liked.
    pub fn like(&mut self) -> bool {
        if self.liked {
            return false;
        }
        self.liked = true;
        self.total_likes += 1;
        true
    }

    /// Withdraws a like; the counter saturates at zero.
    pub fn unlike(&mut self) -> bool {
        if !self.liked {
            return false;
        }
        self.liked = false;
        self.total_likes = self.total_likes.saturating_sub(1);
        true
    }

    /// Overwrites user-editable content from `src`.
    pub fn copy_content_from(&mut self, src: &Post) -> bool {
        let changed =
            self.title != src.title || self.text != src.text || self.image_url != src.image_url;
        self.title = src.title.clone();
        self.text = src.text.clone();
        self.image_url = src.image_url.clone();
        changed
    }
}

impl Comment {
    /// Records a like; returns false if already liked.
    pub fn like(&mut self) -> bool {
        if self.liked {
            return false;
        }
        self.liked = true;
        self.total_likes += 1;
        true
    }

    /// Withdraws a like; the counter saturates at zero.
    pub fn unlike(&mut self) -> bool {
        if !self.liked {
            return false;
        }
        self.liked = false;
        self.total_likes = self.total_likes.saturating_sub(1);
        true
    }

    /// Overwrites user-editable content from `src`.
    pub fn copy_content_from(&mut self, src: &Comment) -> bool {
        let changed = self.text != src.text || self.image_url != src.image_url;
        self.text = src.text.clone();
        self.image_url = src.image_url.clone();
        changed
    }
}

impl Reply {
    /// Records a like; returns false if already liked.
    pub fn like(&mut self) -> bool {
        if self.liked {
            return false;
        }
        self.liked = true;
        self.total_likes += 1;
        true
    }

    /// Withdraws a like; the counter saturates at zero.
    pub fn unlike(&mut self) -> bool {
        if !self.liked {
            return false;
        }
        self.liked = false;
        self.total_likes = self.total_likes.saturating_sub(1);
        true
    }

    /// Overwrites user-editable content from `src`.
    pub fn copy_content_from(&mut self, src: &Reply) -> bool {
        let changed = self.text != src.text;
        self.text = src.text.clone();
        changed
    }
}
