//! Effect table: how each command variant changes each projection variant.
//!
//! Every function returns true when the projection changed. A command whose
//! target is not present in a projection leaves it untouched.

use crate::{
    command::OutgoingCommand,
    entity::{Comment, Post, Reply},
};

use super::views::{
    CommentFetchResult, CommentView, FeedFetchResult, FeedKind, InsertAt, Projection,
    RepliesFetchResult, TopicView,
};

impl Projection {
    /// Applies `cmd` to this projection.
    pub fn apply(&mut self, cmd: &OutgoingCommand) -> bool {
        match self {
            Self::Feed(feed) => apply_to_feed(feed, cmd),
            Self::Comments(list) => apply_to_comments(list, cmd),
            Self::Replies(list) => apply_to_replies(list, cmd),
            Self::Topic(view) => apply_to_topic(view, cmd),
            Self::Comment(view) => apply_to_comment(view, cmd),
        }
    }
}

fn set_flag(flag: &mut bool, value: bool) -> bool {
    let changed = *flag != value;
    *flag = value;
    changed
}

fn increment(counter: &mut u64) -> bool {
    *counter += 1;
    true
}

/// Decrements a counter, clamping at zero.
fn decrement(counter: &mut u64) -> bool {
    if *counter == 0 {
        return false;
    }
    *counter -= 1;
    true
}

/// Effects shared by every place a topic row is shown.
fn apply_to_post(post: &mut Post, cmd: &OutgoingCommand) -> bool {
    use OutgoingCommand as C;
    match cmd {
        C::UpdateTopic { topic, .. } if topic.topic_handle == post.topic_handle => {
            post.copy_content_from(topic)
        }
        C::LikeTopic { topic } if topic.topic_handle == post.topic_handle => post.like(),
        C::UnlikeTopic { topic } if topic.topic_handle == post.topic_handle => post.unlike(),
        C::PinTopic { topic } if topic.topic_handle == post.topic_handle => {
            set_flag(&mut post.pinned, true)
        }
        C::UnpinTopic { topic } if topic.topic_handle == post.topic_handle => {
            set_flag(&mut post.pinned, false)
        }
        C::CreateComment { comment } if comment.topic_handle == post.topic_handle => {
            increment(&mut post.total_comments)
        }
        C::RemoveComment { comment } if comment.topic_handle == post.topic_handle => {
            decrement(&mut post.total_comments)
        }
        _ => false,
    }
}

/// Effects shared by every place a comment row is shown.
fn apply_to_comment_row(row: &mut Comment, cmd: &OutgoingCommand) -> bool {
    use OutgoingCommand as C;
    match cmd {
        C::UpdateComment { comment, .. } if comment.comment_handle == row.comment_handle => {
            row.copy_content_from(comment)
        }
        C::LikeComment { comment } if comment.comment_handle == row.comment_handle => row.like(),
        C::UnlikeComment { comment } if comment.comment_handle == row.comment_handle => {
            row.unlike()
        }
        C::CreateReply { reply } if reply.comment_handle == row.comment_handle => {
            increment(&mut row.total_replies)
        }
        C::RemoveReply { reply } if reply.comment_handle == row.comment_handle => {
            decrement(&mut row.total_replies)
        }
        _ => false,
    }
}

fn apply_to_reply_row(row: &mut Reply, cmd: &OutgoingCommand) -> bool {
    use OutgoingCommand as C;
    match cmd {
        C::UpdateReply { reply, .. } if reply.reply_handle == row.reply_handle => {
            row.copy_content_from(reply)
        }
        C::LikeReply { reply } if reply.reply_handle == row.reply_handle => row.like(),
        C::UnlikeReply { reply } if reply.reply_handle == row.reply_handle => row.unlike(),
        _ => false,
    }
}

fn apply_to_feed(feed: &mut FeedFetchResult, cmd: &OutgoingCommand) -> bool {
    use OutgoingCommand as C;
    let is_pins = matches!(feed.feed, FeedKind::Pins);
    match cmd {
        C::CreateTopic { topic } => {
            if feed.posts.is_suppressed(&topic.topic_handle) || feed.feed.admits(topic) {
                feed.posts.insert(topic.clone(), InsertAt::Front)
            } else {
                false
            }
        }
        C::RemoveTopic { topic } | C::HideTopic { topic } => feed.posts.remove(&topic.topic_handle),
        C::UnhideTopic { topic } => feed.posts.restore(&topic.topic_handle),
        C::PinTopic { topic } => {
            let mut changed = false;
            if is_pins {
                let mut row = topic.clone();
                row.pinned = true;
                changed |= feed.posts.insert(row, InsertAt::Front);
            }
            changed | feed.posts.update_each(|post| apply_to_post(post, cmd))
        }
        C::UnpinTopic { topic } => {
            let changed = feed.posts.update_each(|post| apply_to_post(post, cmd));
            if is_pins {
                return feed.posts.remove(&topic.topic_handle) | changed;
            }
            changed
        }
        _ => feed.posts.update_each(|post| apply_to_post(post, cmd)),
    }
}

fn apply_to_topic(view: &mut TopicView, cmd: &OutgoingCommand) -> bool {
    use OutgoingCommand as C;
    match cmd {
        C::CreateTopic { topic } if topic.topic_handle == view.topic.topic_handle => {
            set_flag(&mut view.removed, false)
        }
        C::RemoveTopic { topic } if topic.topic_handle == view.topic.topic_handle => {
            set_flag(&mut view.removed, true)
        }
        _ => apply_to_post(&mut view.topic, cmd),
    }
}

fn apply_to_comments(list: &mut CommentFetchResult, cmd: &OutgoingCommand) -> bool {
    use OutgoingCommand as C;
    match cmd {
        C::CreateComment { comment } if comment.topic_handle == list.topic_handle => {
            list.comments.insert(comment.clone(), InsertAt::Back)
        }
        C::RemoveComment { comment } => list.comments.remove(&comment.comment_handle),
        _ => list.comments.update_each(|row| apply_to_comment_row(row, cmd)),
    }
}

fn apply_to_comment(view: &mut CommentView, cmd: &OutgoingCommand) -> bool {
    use OutgoingCommand as C;
    match cmd {
        C::CreateComment { comment } if comment.comment_handle == view.comment.comment_handle => {
            set_flag(&mut view.removed, false)
        }
        C::RemoveComment { comment } if comment.comment_handle == view.comment.comment_handle => {
            set_flag(&mut view.removed, true)
        }
        _ => apply_to_comment_row(&mut view.comment, cmd),
    }
}

fn apply_to_replies(list: &mut RepliesFetchResult, cmd: &OutgoingCommand) -> bool {
    use OutgoingCommand as C;
    match cmd {
        C::CreateReply { reply } if reply.comment_handle == list.comment_handle => {
            list.replies.insert(reply.clone(), InsertAt::Back)
        }
        C::RemoveReply { reply } => list.replies.remove(&reply.reply_handle),
        _ => list.replies.update_each(|row| apply_to_reply_row(row, cmd)),
    }
}
