use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use socialcache::{
    command::OutgoingCommand,
    config::{CacheConfig, UploaderConfig},
    entity::{Author, Comment, Post, SessionContext},
    network::NetworkStatus,
    persist::memory::MemoryCommandStore,
    projection::views::{CommentFetchResult, FeedFetchResult, FeedKind, Projection, TopicView},
    remote::{CommandError, RemoteError, RemoteService, ServerConfirmation},
    runtime::{
        events::CacheEvent,
        handle::{open_cache, CacheHandle, RuntimeError},
        uploader::{Uploader, UploaderState},
    },
    types::{CommandStatus, ViewId},
};

#[derive(Default)]
struct FakeService {
    responses: Mutex<VecDeque<Result<ServerConfirmation, RemoteError>>>,
    calls: Mutex<Vec<OutgoingCommand>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    hang: bool,
}

impl FakeService {
    fn scripted(responses: Vec<Result<ServerConfirmation, RemoteError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        })
    }

    fn calls(&self) -> Vec<OutgoingCommand> {
        self.calls.lock().expect("lock").clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().expect("lock").len()
    }
}

#[async_trait]
impl RemoteService for FakeService {
    async fn submit(&self, command: &OutgoingCommand) -> Result<ServerConfirmation, RemoteError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().expect("lock").push(command.clone());
        if self.hang {
            std::future::pending::<()>().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.responses
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Ok(ServerConfirmation::accepted()))
    }
}

fn fast_config() -> UploaderConfig {
    UploaderConfig {
        max_attempts: 3,
        backoff_base_ms: 1,
        backoff_max_ms: 5,
    }
}

fn ctx() -> SessionContext {
    SessionContext::new(Author {
        user_handle: "ME".to_string(),
        ..Author::default()
    })
}

fn post(handle: &str, likes: u64) -> Post {
    Post {
        topic_handle: handle.to_string(),
        total_likes: likes,
        ..Post::default()
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn feed_rows(cache: &CacheHandle, id: ViewId) -> Vec<Post> {
    match cache.view(id).await.expect("view") {
        Some(Projection::Feed(feed)) => feed.posts.rows().to_vec(),
        other => panic!("expected feed, got {other:?}"),
    }
}

async fn home_feed(cache: &CacheHandle, posts: Vec<Post>) -> ViewId {
    cache
        .register_view(Projection::Feed(FeedFetchResult::new(FeedKind::Home, posts, None)))
        .await
        .expect("register")
}

fn boot(store: &MemoryCommandStore, remote: Arc<FakeService>) -> (CacheHandle, Uploader) {
    let cache = open_cache(Box::new(store.clone()), CacheConfig::default()).expect("open cache");
    let uploader = Uploader::new(cache.clone(), remote, fast_config()).expect("uploader");
    (cache, uploader)
}

#[tokio::test]
async fn offline_like_survives_restart_and_uploads_once() {
    let store = MemoryCommandStore::new();
    let network = NetworkStatus::new(false);
    let remote = FakeService::scripted(vec![]);

    let (cache, uploader) = boot(&store, remote.clone());
    assert!(uploader.start(&network));
    let feed = home_feed(&cache, vec![post("P1", 3)]).await;

    let like = OutgoingCommand::toggle_like_topic(&post("P1", 3));
    cache.enqueue(like).await.expect("enqueue");

    let rows = feed_rows(&cache, feed).await;
    assert!(rows[0].liked);
    assert_eq!(rows[0].total_likes, 4);
    eventually(|| uploader.state() == UploaderState::WaitingForNetwork).await;
    assert_eq!(remote.call_count(), 0);

    uploader.stop().await;
    cache.shutdown().await.expect("shutdown");
    assert_eq!(store.len(), 1);

    // Process restart over the same store.
    let (cache, uploader) = boot(&store, remote.clone());
    assert_eq!(cache.pending().await.expect("pending").len(), 1);
    let feed = home_feed(&cache, vec![post("P1", 3)]).await;
    let rows = feed_rows(&cache, feed).await;
    assert!(rows[0].liked);
    assert_eq!(rows[0].total_likes, 4);

    uploader.start(&network);
    network.set_reachable(true);
    eventually(|| store.is_empty()).await;
    assert_eq!(remote.call_count(), 1);

    let rows = feed_rows(&cache, feed).await;
    assert!(rows[0].liked);
    assert_eq!(rows[0].total_likes, 4);

    network.set_reachable(false);
    network.set_reachable(true);
    tokio::time::sleep(Duration::from_millis(50)).await;
    eventually(|| uploader.state() == UploaderState::Idle).await;
    assert_eq!(remote.call_count(), 1);

    uploader.stop().await;
}

#[tokio::test]
async fn permanent_failure_rolls_back_and_reports() {
    let store = MemoryCommandStore::new();
    let network = NetworkStatus::new(true);
    let remote = FakeService::scripted(vec![Err(RemoteError::from_status(403, "forbidden"))]);

    let (cache, uploader) = boot(&store, remote.clone());
    let mut events = cache.subscribe();
    let feed = home_feed(&cache, vec![post("P1", 3)]).await;
    let before = feed_rows(&cache, feed).await;
    uploader.start(&network);

    let ticket = cache
        .enqueue(OutgoingCommand::toggle_like_topic(&post("P1", 3)))
        .await
        .expect("enqueue");
    let seq = ticket.seq;
    let outcome = ticket.outcome().await.expect("outcome");
    assert!(matches!(
        outcome,
        Err(CommandError::Rejected(RemoteError::Rejected { status: 403, .. }))
    ));

    assert_eq!(feed_rows(&cache, feed).await, before);
    assert!(cache.pending().await.expect("pending").is_empty());
    assert!(store.is_empty());

    let rejected = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match events.recv().await.expect("recv") {
                CacheEvent::CommandRejected { seq: s, .. } => break s,
                _ => continue,
            }
        }
    })
    .await
    .expect("rejection event");
    assert_eq!(rejected, seq);

    uploader.stop().await;
}

#[tokio::test]
async fn rejected_comment_removal_restores_row_and_counters() {
    let store = MemoryCommandStore::new();
    let network = NetworkStatus::new(false);
    let remote = FakeService::scripted(vec![Err(RemoteError::from_status(403, "not yours"))]);

    let (cache, uploader) = boot(&store, remote.clone());
    uploader.start(&network);

    let comments: Vec<Comment> = ["C6", "C7", "C8"]
        .into_iter()
        .map(|h| Comment {
            comment_handle: h.to_string(),
            topic_handle: "P1".to_string(),
            ..Comment::default()
        })
        .collect();
    let topic = Post {
        total_comments: 3,
        ..post("P1", 0)
    };
    let list = cache
        .register_view(Projection::Comments(CommentFetchResult::new(
            "P1",
            comments.clone(),
            None,
        )))
        .await
        .expect("register");
    let detail = cache
        .register_view(Projection::Topic(TopicView::new(topic.clone())))
        .await
        .expect("register");
    let feed = home_feed(&cache, vec![topic]).await;

    let comment_handles = |view: Option<Projection>| match view {
        Some(Projection::Comments(l)) => l
            .comments
            .rows()
            .iter()
            .map(|c| c.comment_handle.clone())
            .collect::<Vec<_>>(),
        other => panic!("expected comments, got {other:?}"),
    };
    let detail_count = |view: Option<Projection>| match view {
        Some(Projection::Topic(v)) => v.topic.total_comments,
        other => panic!("expected topic, got {other:?}"),
    };

    let ticket = cache
        .enqueue(OutgoingCommand::RemoveComment {
            comment: comments[1].clone(),
        })
        .await
        .expect("enqueue");

    assert_eq!(
        comment_handles(cache.view(list).await.expect("view")),
        vec!["C6", "C8"]
    );
    assert_eq!(detail_count(cache.view(detail).await.expect("view")), 2);
    assert_eq!(feed_rows(&cache, feed).await[0].total_comments, 2);

    network.set_reachable(true);
    assert!(matches!(
        ticket.outcome().await.expect("outcome"),
        Err(CommandError::Rejected(RemoteError::Rejected { status: 403, .. }))
    ));

    assert_eq!(
        comment_handles(cache.view(list).await.expect("view")),
        vec!["C6", "C7", "C8"]
    );
    assert_eq!(detail_count(cache.view(detail).await.expect("view")), 3);
    assert_eq!(feed_rows(&cache, feed).await[0].total_comments, 3);
    assert!(store.is_empty());

    uploader.stop().await;
}

#[tokio::test]
async fn rejected_hide_of_confirmed_topic_brings_it_back() {
    let store = MemoryCommandStore::new();
    let network = NetworkStatus::new(false);
    let remote = FakeService::scripted(vec![
        Ok(ServerConfirmation::created("T1")),
        Err(RemoteError::from_status(400, "cannot hide")),
    ]);

    let (cache, uploader) = boot(&store, remote.clone());
    let feed = home_feed(&cache, vec![post("P0", 0)]).await;
    uploader.start(&network);

    let create = OutgoingCommand::create_topic(&ctx(), None, Some("mine".to_string()), None, 1);
    let OutgoingCommand::CreateTopic { topic } = &create else {
        panic!("unexpected {create:?}");
    };
    let hide = OutgoingCommand::HideTopic {
        topic: topic.clone(),
    };
    let created = cache.enqueue(create.clone()).await.expect("enqueue create");
    let hidden = cache.enqueue(hide).await.expect("enqueue hide");

    let handles = |rows: Vec<Post>| rows.into_iter().map(|p| p.topic_handle).collect::<Vec<_>>();
    assert_eq!(handles(feed_rows(&cache, feed).await), vec!["P0"]);

    network.set_reachable(true);
    assert_eq!(
        created.outcome().await.expect("outcome"),
        Ok(ServerConfirmation::created("T1"))
    );
    assert!(matches!(
        hidden.outcome().await.expect("outcome"),
        Err(CommandError::Rejected(RemoteError::Rejected { status: 400, .. }))
    ));

    assert_eq!(handles(feed_rows(&cache, feed).await), vec!["T1", "P0"]);
    assert!(store.is_empty());

    uploader.stop().await;
}

#[tokio::test]
async fn created_topic_handle_flows_into_queued_comment() {
    let store = MemoryCommandStore::new();
    let network = NetworkStatus::new(false);
    let remote = FakeService::scripted(vec![
        Ok(ServerConfirmation::created("T1")),
        Ok(ServerConfirmation::created("C1")),
    ]);

    let (cache, uploader) = boot(&store, remote.clone());
    let mut events = cache.subscribe();
    let feed = home_feed(&cache, vec![]).await;
    uploader.start(&network);

    let topic = cache
        .enqueue(OutgoingCommand::create_topic(
            &ctx(),
            None,
            Some("hello".to_string()),
            None,
            1,
        ))
        .await
        .expect("enqueue topic");
    let temp = topic.handle.clone();
    let comment = cache
        .enqueue(OutgoingCommand::create_comment(&ctx(), temp.clone(), "first", 2))
        .await
        .expect("enqueue comment");

    network.set_reachable(true);
    assert_eq!(
        topic.outcome().await.expect("outcome"),
        Ok(ServerConfirmation::created("T1"))
    );
    assert!(comment.outcome().await.expect("outcome").is_ok());

    let calls = remote.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].related_handle(), Some("T1"));

    let rows = feed_rows(&cache, feed).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].topic_handle, "T1");
    assert_eq!(rows[0].total_comments, 1);

    let mut resolved = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CacheEvent::HandleResolved { temporary, server } = event {
            resolved.push((temporary, server));
        }
    }
    assert!(resolved.contains(&(temp, "T1".to_string())));

    uploader.stop().await;
}

#[tokio::test]
async fn rejected_parent_rolls_back_dependents() {
    let store = MemoryCommandStore::new();
    let network = NetworkStatus::new(false);
    let remote = FakeService::scripted(vec![Err(RemoteError::from_status(422, "bad topic"))]);

    let (cache, uploader) = boot(&store, remote.clone());
    let feed = home_feed(&cache, vec![]).await;
    uploader.start(&network);

    let topic = cache
        .enqueue(OutgoingCommand::create_topic(&ctx(), None, None, None, 1))
        .await
        .expect("enqueue topic");
    let temp = topic.handle.clone();
    let comment = cache
        .enqueue(OutgoingCommand::create_comment(&ctx(), temp.clone(), "orphan", 2))
        .await
        .expect("enqueue comment");
    assert_eq!(feed_rows(&cache, feed).await.len(), 1);

    network.set_reachable(true);
    assert!(matches!(
        topic.outcome().await.expect("outcome"),
        Err(CommandError::Rejected(_))
    ));
    assert_eq!(
        comment.outcome().await.expect("outcome"),
        Err(CommandError::UnresolvedParent(temp))
    );

    assert_eq!(remote.call_count(), 1);
    assert!(feed_rows(&cache, feed).await.is_empty());
    assert!(store.is_empty());

    uploader.stop().await;
}

#[tokio::test]
async fn command_with_unresolved_parent_is_dropped_at_head() {
    let store = MemoryCommandStore::new();
    let network = NetworkStatus::new(false);
    let remote = FakeService::scripted(vec![]);

    let (cache, uploader) = boot(&store, remote.clone());
    uploader.start(&network);

    let ghost = Comment {
        comment_handle: "local-ghost".to_string(),
        topic_handle: "P1".to_string(),
        ..Comment::default()
    };
    let like = cache
        .enqueue(OutgoingCommand::toggle_like_comment(&ghost))
        .await
        .expect("enqueue");
    let follow = cache
        .enqueue(OutgoingCommand::toggle_like_topic(&post("P1", 0)))
        .await
        .expect("enqueue");

    network.set_reachable(true);
    assert_eq!(
        like.outcome().await.expect("outcome"),
        Err(CommandError::UnresolvedParent("local-ghost".to_string()))
    );
    assert!(follow.outcome().await.expect("outcome").is_ok());
    assert_eq!(remote.call_count(), 1);

    uploader.stop().await;
}

#[tokio::test]
async fn transient_failures_exhaust_retries_then_roll_back() {
    let store = MemoryCommandStore::new();
    let network = NetworkStatus::new(true);
    let remote = FakeService::scripted(vec![
        Err(RemoteError::from_status(503, "busy")),
        Err(RemoteError::Timeout),
        Err(RemoteError::from_status(500, "boom")),
    ]);

    let (cache, uploader) = boot(&store, remote.clone());
    let feed = home_feed(&cache, vec![post("P1", 1)]).await;
    let before = feed_rows(&cache, feed).await;
    uploader.start(&network);

    let ticket = cache
        .enqueue(OutgoingCommand::toggle_like_topic(&post("P1", 1)))
        .await
        .expect("enqueue");
    let outcome = ticket.outcome().await.expect("outcome");
    assert!(matches!(
        outcome,
        Err(CommandError::RetriesExhausted { attempts: 3, .. })
    ));
    assert_eq!(remote.call_count(), 3);
    assert_eq!(feed_rows(&cache, feed).await, before);

    uploader.stop().await;
}

#[tokio::test]
async fn connectivity_failure_waits_for_next_reachability_event() {
    let store = MemoryCommandStore::new();
    let network = NetworkStatus::new(true);
    let remote = FakeService::scripted(vec![Err(RemoteError::Offline("dns".to_string()))]);

    let (cache, uploader) = boot(&store, remote.clone());
    uploader.start(&network);

    let ticket = cache
        .enqueue(OutgoingCommand::toggle_like_topic(&post("P1", 0)))
        .await
        .expect("enqueue");

    eventually(|| {
        remote.call_count() == 1 && uploader.state() == UploaderState::WaitingForNetwork
    })
    .await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(remote.call_count(), 1);

    let pending = cache.pending().await.expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, CommandStatus::Failed);
    assert_eq!(pending[0].attempts, 1);

    network.set_reachable(false);
    network.set_reachable(true);
    assert!(ticket.outcome().await.expect("outcome").is_ok());
    assert_eq!(remote.call_count(), 2);

    uploader.stop().await;
}

#[tokio::test]
async fn stop_cancels_in_flight_submission_and_unsubscribes() {
    let store = MemoryCommandStore::new();
    let network = NetworkStatus::new(true);
    let remote = Arc::new(FakeService {
        hang: true,
        ..FakeService::default()
    });

    let (cache, uploader) = boot(&store, remote.clone());
    assert!(uploader.start(&network));
    assert!(!uploader.start(&network));
    assert_eq!(network.listener_count(), 1);

    cache
        .enqueue(OutgoingCommand::toggle_like_topic(&post("P1", 0)))
        .await
        .expect("enqueue");
    eventually(|| remote.in_flight.load(Ordering::SeqCst) == 1).await;

    assert!(uploader.stop().await);
    assert!(!uploader.stop().await);
    assert_eq!(uploader.state(), UploaderState::Stopped);
    assert_eq!(network.listener_count(), 0);
    assert!(!uploader.restart());

    let pending = cache.pending().await.expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, CommandStatus::Pending);
    assert_eq!(store.snapshot()[0].status, CommandStatus::Pending);
}

#[tokio::test]
async fn one_submission_in_flight_under_repeated_triggers() {
    let store = MemoryCommandStore::new();
    let network = NetworkStatus::new(true);
    let remote = Arc::new(FakeService {
        delay: Duration::from_millis(5),
        ..FakeService::default()
    });

    let (cache, uploader) = boot(&store, remote.clone());
    uploader.start(&network);

    for i in 0..5 {
        cache
            .enqueue(OutgoingCommand::toggle_like_topic(&post(&format!("P{i}"), 0)))
            .await
            .expect("enqueue");
        uploader.restart();
        network.set_reachable(false);
        network.set_reachable(true);
    }

    eventually(|| store.is_empty()).await;
    assert_eq!(remote.max_in_flight.load(Ordering::SeqCst), 1);

    let order: Vec<_> = remote
        .calls()
        .iter()
        .map(|c| c.entity_handle().to_string())
        .collect();
    assert_eq!(order, vec!["P0", "P1", "P2", "P3", "P4"]);

    uploader.stop().await;
}

#[tokio::test]
async fn failed_enqueue_leaves_views_untouched() {
    let store = MemoryCommandStore::new();
    let remote = FakeService::scripted(vec![]);
    let (cache, _uploader) = boot(&store, remote);
    let feed = home_feed(&cache, vec![post("P1", 2)]).await;
    let before = feed_rows(&cache, feed).await;

    store.set_fail_writes(true);
    let err = cache
        .enqueue(OutgoingCommand::toggle_like_topic(&post("P1", 2)))
        .await
        .expect_err("write should fail");
    assert!(matches!(err, RuntimeError::Persist(_)));

    assert_eq!(feed_rows(&cache, feed).await, before);
    assert!(cache.pending().await.expect("pending").is_empty());
}

#[tokio::test]
async fn merge_after_enqueue_keeps_optimistic_state() {
    let store = MemoryCommandStore::new();
    let remote = FakeService::scripted(vec![]);
    let (cache, _uploader) = boot(&store, remote);
    let feed = home_feed(&cache, vec![post("P1", 2)]).await;

    cache
        .enqueue(OutgoingCommand::toggle_like_topic(&post("P1", 2)))
        .await
        .expect("enqueue");
    cache
        .merge_server_page(
            feed,
            socialcache::projection::engine::ServerPage {
                items: socialcache::projection::engine::PageItems::Topics(vec![
                    post("P1", 2),
                    post("P2", 0),
                ]),
                cursor: None,
            },
        )
        .await
        .expect("merge");

    let rows = feed_rows(&cache, feed).await;
    assert_eq!(rows.len(), 2);
    assert!(rows[0].liked);
    assert_eq!(rows[0].total_likes, 3);
}
