use hashbrown::HashMap;
use thiserror::Error;

use crate::{
    command::OutgoingCommand,
    entity::{Comment, Entity, Post, Reply},
    types::ViewId,
};

use super::views::{
    CommentFetchResult, CommentView, FeedFetchResult, Projection, RepliesFetchResult, TopicView,
};

/// Errors from view lookups and merges.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    /// No live view has this id.
    #[error("unknown view {0}")]
    UnknownView(ViewId),
    /// The page holds a different kind of row than the view.
    #[error("page of {page} cannot merge into a {view} view")]
    PageMismatch {
        /// Kind of the live view.
        view: &'static str,
        /// Kind of the fetched page.
        page: &'static str,
    },
}

/// Rows fetched from the remote service for one view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageItems {
    /// A feed window.
    Topics(Vec<Post>),
    /// A comment window.
    Comments(Vec<Comment>),
    /// A reply window.
    Replies(Vec<Reply>),
    /// One topic.
    Topic(Post),
    /// One comment.
    Comment(Comment),
}

impl PageItems {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::Topics(_) => "topics",
            Self::Comments(_) => "comments",
            Self::Replies(_) => "replies",
            Self::Topic(_) => "topic",
            Self::Comment(_) => "comment",
        }
    }
}

/// One fetched page plus the cursor for the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPage {
    /// Rows as the server reports them.
    pub items: PageItems,
    /// Cursor for the following page.
    pub cursor: Option<String>,
}

/// Registry of live projections.
///
/// A projection is server state with every pending command applied in
/// sequence order. The engine keeps that true as commands are enqueued,
/// rolled back, and as fresh server pages arrive.
#[derive(Debug, Default)]
pub struct ProjectionEngine {
    views: HashMap<ViewId, Projection>,
    next_view_id: ViewId,
}

impl ProjectionEngine {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            next_view_id: 1,
            ..Self::default()
        }
    }

    /// Registers a view built from server data and replays `pending` onto it.
    pub fn register<'a>(
        &mut self,
        mut projection: Projection,
        pending: impl IntoIterator<Item = &'a OutgoingCommand>,
    ) -> ViewId {
        for cmd in pending {
            projection.apply(cmd);
        }
        let id = self.next_view_id;
        self.next_view_id += 1;
        self.views.insert(id, projection);
        id
    }

    /// Stops tracking a view and hands it back.
    pub fn drop_view(&mut self, id: ViewId) -> Option<Projection> {
        self.views.remove(&id)
    }

    /// Current state of a view.
    pub fn get(&self, id: ViewId) -> Option<&Projection> {
        self.views.get(&id)
    }

    /// Ids of every live view, ascending.
    pub fn view_ids(&self) -> Vec<ViewId> {
        let mut ids: Vec<ViewId> = self.views.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Broadcasts `cmd` to every live view; returns the views that changed.
    pub fn apply_command(&mut self, cmd: &OutgoingCommand) -> Vec<ViewId> {
        let mut changed: Vec<ViewId> = self
            .views
            .iter_mut()
            .filter_map(|(id, view)| view.apply(cmd).then_some(*id))
            .collect();
        changed.sort_unstable();
        changed
    }

    /// Merges a fetched page into view `id`.
    ///
    /// The page is first brought up to date with `pending`, then merged by
    /// handle. Returns whether the view changed.
    pub fn merge_server_page<'a>(
        &mut self,
        id: ViewId,
        page: ServerPage,
        pending: impl IntoIterator<Item = &'a OutgoingCommand>,
    ) -> Result<bool, ProjectionError> {
        let view = self.views.get_mut(&id).ok_or(ProjectionError::UnknownView(id))?;
        let mut incoming = shell_for(view, page)?;
        for cmd in pending {
            incoming.apply(cmd);
        }

        let changed = match (view, incoming) {
            (Projection::Feed(live), Projection::Feed(fresh)) => {
                let cursor_changed = live.cursor != fresh.cursor;
                live.cursor = fresh.cursor;
                live.posts.merge(fresh.posts) || cursor_changed
            }
            (Projection::Comments(live), Projection::Comments(fresh)) => {
                let cursor_changed = live.cursor != fresh.cursor;
                live.cursor = fresh.cursor;
                live.comments.merge(fresh.comments) || cursor_changed
            }
            (Projection::Replies(live), Projection::Replies(fresh)) => {
                let cursor_changed = live.cursor != fresh.cursor;
                live.cursor = fresh.cursor;
                live.replies.merge(fresh.replies) || cursor_changed
            }
            (Projection::Topic(live), Projection::Topic(fresh)) => replace(live, fresh),
            (Projection::Comment(live), Projection::Comment(fresh)) => replace(live, fresh),
            _ => false,
        };
        Ok(changed)
    }

    /// Renames a resolved temporary handle everywhere; returns changed views.
    pub fn resolve_handle(&mut self, old: &str, new: &str) -> Vec<ViewId> {
        let mut changed: Vec<ViewId> = self
            .views
            .iter_mut()
            .filter_map(|(id, view)| rewrite_view(view, old, new).then_some(*id))
            .collect();
        changed.sort_unstable();
        changed
    }

    /// Drops undo bookkeeping for `handle` in every list view.
    pub fn settle(&mut self, handle: &str) {
        for view in self.views.values_mut() {
            match view {
                Projection::Feed(feed) => {
                    feed.posts.settle(handle);
                }
                Projection::Comments(list) => {
                    list.comments.settle(handle);
                }
                Projection::Replies(list) => {
                    list.replies.settle(handle);
                }
                Projection::Topic(_) | Projection::Comment(_) => {}
            }
        }
    }
}

fn replace<T: PartialEq>(live: &mut T, fresh: T) -> bool {
    if *live == fresh {
        return false;
    }
    *live = fresh;
    true
}

/// Builds an empty projection of the same shape as `view`, filled with `page`.
fn shell_for(view: &Projection, page: ServerPage) -> Result<Projection, ProjectionError> {
    let ServerPage { items, cursor } = page;
    let shell = match (view, items) {
        (Projection::Feed(live), PageItems::Topics(posts)) => {
            Projection::Feed(FeedFetchResult::new(live.feed.clone(), posts, cursor))
        }
        (Projection::Comments(live), PageItems::Comments(comments)) => Projection::Comments(
            CommentFetchResult::new(live.topic_handle.clone(), comments, cursor),
        ),
        (Projection::Replies(live), PageItems::Replies(replies)) => Projection::Replies(
            RepliesFetchResult::new(live.comment_handle.clone(), replies, cursor),
        ),
        (Projection::Topic(_), PageItems::Topic(topic)) => Projection::Topic(TopicView::new(topic)),
        (Projection::Comment(_), PageItems::Comment(comment)) => {
            Projection::Comment(CommentView::new(comment))
        }
        (view, items) => {
            return Err(ProjectionError::PageMismatch {
                view: view.kind_name(),
                page: items.kind_name(),
            });
        }
    };
    Ok(shell)
}

fn rewrite_view(view: &mut Projection, old: &str, new: &str) -> bool {
    match view {
        Projection::Feed(feed) => feed.posts.rewrite_handles(old, new),
        Projection::Comments(list) => {
            let parent = rewrite_slot(&mut list.topic_handle, old, new);
            list.comments.rewrite_handles(old, new) || parent
        }
        Projection::Replies(list) => {
            let parent = rewrite_slot(&mut list.comment_handle, old, new);
            list.replies.rewrite_handles(old, new) || parent
        }
        Projection::Topic(view) => view.topic.rewrite_handles(old, new),
        Projection::Comment(view) => view.comment.rewrite_handles(old, new),
    }
}

fn rewrite_slot(slot: &mut String, old: &str, new: &str) -> bool {
    if slot == old {
        *slot = new.to_string();
        true
    } else {
        false
    }
}
