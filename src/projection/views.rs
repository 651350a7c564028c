//! Live projection types.

use hashbrown::{HashMap, HashSet};

use crate::{
    entity::{Comment, Entity, Post, Reply},
    types::Handle,
};

/// Where a brand-new row lands in a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertAt {
    /// Newest first.
    Front,
    /// Chronological.
    Back,
}

/// Ordered rows plus the bookkeeping pending commands need to be undone.
///
/// Rows inserted by a pending command are remembered in `inserted`. Every row
/// removed by a pending command is kept aside with its former index, including
/// locally inserted ones, so that restoring it puts it back in place. The
/// bookkeeping is dropped by [`RowSet::settle`] once no queued command refers
/// to the row.
///
/// Equality compares the visible rows only.
#[derive(Debug, Clone)]
pub struct RowSet<T: Entity + PartialEq> {
    rows: Vec<T>,
    inserted: HashSet<Handle>,
    suppressed: HashMap<Handle, Suppressed<T>>,
}

#[derive(Debug, Clone)]
struct Suppressed<T> {
    index: usize,
    row: T,
    /// The row was added by a pending command, not fetched.
    inserted: bool,
}

impl<T: Entity + PartialEq> PartialEq for RowSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.rows == other.rows
    }
}

impl<T: Entity + Eq> Eq for RowSet<T> {}

impl<T: Entity + PartialEq> Default for RowSet<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            inserted: HashSet::new(),
            suppressed: HashMap::new(),
        }
    }
}

impl<T: Entity + PartialEq> RowSet<T> {
    /// Wraps server rows with empty bookkeeping.
    pub fn from_rows(rows: Vec<T>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Visible rows in display order.
    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    /// Number of visible rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no row is visible.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Looks up a visible row.
    pub fn get(&self, handle: &str) -> Option<&T> {
        self.rows.iter().find(|r| r.handle() == handle)
    }

    /// Mutable access to a visible row.
    pub fn get_mut(&mut self, handle: &str) -> Option<&mut T> {
        self.rows.iter_mut().find(|r| r.handle() == handle)
    }

    /// Applies `f` to every visible row, returning true if any call did.
    pub fn update_each(&mut self, mut f: impl FnMut(&mut T) -> bool) -> bool {
        let mut changed = false;
        for row in &mut self.rows {
            changed |= f(row);
        }
        changed
    }

    fn position(&self, handle: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.handle() == handle)
    }

    /// True when `handle` is held aside by a pending removal.
    pub fn is_suppressed(&self, handle: &str) -> bool {
        self.suppressed.contains_key(handle)
    }

    /// Restores a suppressed row at its former index.
    pub fn restore(&mut self, handle: &str) -> bool {
        let Some(held) = self.suppressed.remove(handle) else {
            return false;
        };
        if held.inserted {
            self.inserted.insert(handle.to_string());
        }
        let idx = held.index.min(self.rows.len());
        self.rows.insert(idx, held.row);
        true
    }

    /// Restores `row` if it was suppressed, otherwise inserts it as new.
    ///
    /// A row already visible is left untouched.
    pub fn insert(&mut self, row: T, at: InsertAt) -> bool {
        if self.restore(row.handle()) {
            return true;
        }
        if self.position(row.handle()).is_some() {
            return false;
        }
        self.inserted.insert(row.handle().to_string());
        match at {
            InsertAt::Front => self.rows.insert(0, row),
            InsertAt::Back => self.rows.push(row),
        }
        true
    }

    /// Removes a visible row and holds it aside at its index.
    pub fn remove(&mut self, handle: &str) -> bool {
        let Some(index) = self.position(handle) else {
            return false;
        };
        let row = self.rows.remove(index);
        let inserted = self.inserted.remove(handle);
        self.suppressed.insert(
            handle.to_string(),
            Suppressed {
                index,
                row,
                inserted,
            },
        );
        true
    }

    /// Forgets the bookkeeping for `handle` once nothing pending refers to it.
    pub fn settle(&mut self, handle: &str) -> bool {
        let a = self.inserted.remove(handle);
        let b = self.suppressed.remove(handle).is_some();
        a || b
    }

    /// Renames `old` to `new` in rows and bookkeeping.
    pub fn rewrite_handles(&mut self, old: &str, new: &str) -> bool {
        let mut changed = self.update_each(|row| row.rewrite_handles(old, new));
        if self.inserted.remove(old) {
            self.inserted.insert(new.to_string());
            changed = true;
        }
        if let Some(mut held) = self.suppressed.remove(old) {
            held.row.rewrite_handles(old, new);
            self.suppressed.insert(new.to_string(), held);
            changed = true;
        }
        for held in self.suppressed.values_mut() {
            changed |= held.row.rewrite_handles(old, new);
        }
        changed
    }

    /// Merges a window of rows that already reflect pending commands.
    ///
    /// Rows already visible are replaced in place, unseen rows are appended,
    /// rows absent from the window are kept. Rows that a pending command
    /// inserted into `incoming` are only taken when already visible here.
    pub fn merge(&mut self, incoming: RowSet<T>) -> bool {
        let mut changed = false;
        for row in incoming.rows {
            if let Some(existing) = self.get_mut(row.handle()) {
                if *existing != row {
                    *existing = row;
                    changed = true;
                }
                continue;
            }
            if incoming.inserted.contains(row.handle()) || self.is_suppressed(row.handle()) {
                continue;
            }
            self.rows.push(row);
            changed = true;
        }
        changed
    }
}

/// Feed flavours that decide which new topics a feed admits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeedKind {
    /// The user's home timeline.
    Home,
    /// Most recent topics.
    Recent,
    /// Server-curated popular topics.
    Popular,
    /// Topics authored by one user.
    User {
        /// Author whose topics are listed.
        user_handle: Handle,
    },
    /// Topics the current user pinned.
    Pins,
}

impl FeedKind {
    /// True if a topic created or pinned locally belongs in this feed.
    pub fn admits(&self, topic: &Post) -> bool {
        match self {
            Self::Home | Self::Recent => true,
            Self::Popular => false,
            Self::User { user_handle } => topic.author.user_handle == *user_handle,
            Self::Pins => topic.pinned,
        }
    }
}

/// A page-windowed topic list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFetchResult {
    /// Feed flavour.
    pub feed: FeedKind,
    /// Topics.
    pub posts: RowSet<Post>,
    /// Cursor for the next page.
    pub cursor: Option<String>,
}

impl FeedFetchResult {
    /// Builds a feed from server rows.
    pub fn new(feed: FeedKind, posts: Vec<Post>, cursor: Option<String>) -> Self {
        Self {
            feed,
            posts: RowSet::from_rows(posts),
            cursor,
        }
    }
}

/// Comments of one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentFetchResult {
    /// Topic the comments belong to.
    pub topic_handle: Handle,
    /// Comments.
    pub comments: RowSet<Comment>,
    /// Cursor for the next page.
    pub cursor: Option<String>,
}

impl CommentFetchResult {
    /// Builds a comment list from server rows.
    pub fn new(topic_handle: impl Into<Handle>, comments: Vec<Comment>, cursor: Option<String>) -> Self {
        Self {
            topic_handle: topic_handle.into(),
            comments: RowSet::from_rows(comments),
            cursor,
        }
    }
}

/// Replies of one comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepliesFetchResult {
    /// Comment the replies belong to.
    pub comment_handle: Handle,
    /// Replies.
    pub replies: RowSet<Reply>,
    /// Cursor for the next page.
    pub cursor: Option<String>,
}

impl RepliesFetchResult {
    /// Builds a reply list from server rows.
    pub fn new(comment_handle: impl Into<Handle>, replies: Vec<Reply>, cursor: Option<String>) -> Self {
        Self {
            comment_handle: comment_handle.into(),
            replies: RowSet::from_rows(replies),
            cursor,
        }
    }
}

/// Single-topic detail view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicView {
    /// The topic.
    pub topic: Post,
    /// True once a pending command removed the topic.
    pub removed: bool,
}

impl TopicView {
    /// Wraps a topic.
    pub fn new(topic: Post) -> Self {
        Self { topic, removed: false }
    }
}

/// Single-comment header view (shown above its replies).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentView {
    /// The comment.
    pub comment: Comment,
    /// True once a pending command removed the comment.
    pub removed: bool,
}

impl CommentView {
    /// Wraps a comment.
    pub fn new(comment: Comment) -> Self {
        Self {
            comment,
            removed: false,
        }
    }
}

/// Any live view a command can be applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Topic list.
    Feed(FeedFetchResult),
    /// Comment list.
    Comments(CommentFetchResult),
    /// Reply list.
    Replies(RepliesFetchResult),
    /// Single topic.
    Topic(TopicView),
    /// Single comment.
    Comment(CommentView),
}

impl Projection {
    /// Short name used in logs and errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Feed(_) => "feed",
            Self::Comments(_) => "comments",
            Self::Replies(_) => "replies",
            Self::Topic(_) => "topic",
            Self::Comment(_) => "comment",
        }
    }
}
