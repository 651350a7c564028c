//! Offline command cache for social-graph mutations.
//!
//! Mutations are built as [`command::OutgoingCommand`]s, durably queued in an
//! ordered outbox, applied optimistically to every live projection, and
//! replayed against the remote service by an uploader that retries transient
//! failures and rolls back permanent ones.
//!
//! # Examples
//!
//! Optimistic apply and rollback on a single projection:
//! ```
//! use socialcache::{
//!     command::OutgoingCommand,
//!     entity::Post,
//!     projection::views::{FeedFetchResult, FeedKind, Projection},
//! };
//!
//! let post = Post {
//!     topic_handle: "P1".to_string(),
//!     total_likes: 3,
//!     ..Post::default()
//! };
//! let mut feed = Projection::Feed(FeedFetchResult::new(FeedKind::Home, vec![post.clone()], None));
//! let before = feed.clone();
//!
//! let like = OutgoingCommand::toggle_like_topic(&post);
//! assert!(feed.apply(&like));
//! assert!(feed.apply(&like.inverse()));
//! assert_eq!(feed, before);
//! ```
//!
//! Runtime usage with a SQLite outbox:
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use socialcache::{
//!     command::OutgoingCommand,
//!     config::{CacheConfig, UploaderConfig},
//!     entity::{Author, SessionContext},
//!     network::NetworkStatus,
//!     persist::sqlite::SqliteCommandStore,
//!     remote::{RemoteError, RemoteService, ServerConfirmation},
//!     runtime::{handle::open_cache, uploader::Uploader},
//!     types::now_ms,
//! };
//!
//! struct Service;
//!
//! #[async_trait]
//! impl RemoteService for Service {
//!     async fn submit(&self, _: &OutgoingCommand) -> Result<ServerConfirmation, RemoteError> {
//!         Ok(ServerConfirmation::created("P1"))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = SqliteCommandStore::open("outbox.db").expect("open sqlite");
//! let cache = open_cache(Box::new(store), CacheConfig::default()).expect("open cache");
//! let network = NetworkStatus::new(true);
//! let uploader = Uploader::new(cache.clone(), Arc::new(Service), UploaderConfig::default())
//!     .expect("uploader");
//! uploader.start(&network);
//!
//! let ctx = SessionContext::new(Author::default());
//! let cmd = OutgoingCommand::create_topic(&ctx, None, Some("hi".into()), None, now_ms());
//! let ticket = cache.enqueue(cmd).await.expect("enqueue");
//! let _ = ticket.outcome().await;
//! uploader.stop().await;
//! cache.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Outgoing mutation model and stored outbox rows.
pub mod command;
/// Runtime and uploader settings.
pub mod config;
/// Ordered in-memory outbox.
pub mod core;
/// Social entities and session context.
pub mod entity;
/// Reachability notifications.
pub mod network;
/// Outbox persistence abstraction with SQLite and in-memory stores.
pub mod persist;
/// Live projections and the engine that keeps them current.
pub mod projection;
/// Remote service seam and failure classification.
pub mod remote;
/// Single-writer cache actor, events, and uploader daemon.
pub mod runtime;
/// Shared primitive types and enums.
pub mod types;
