//! # QuickChat Redis
//!
//! Low-level Redis plumbing for the broadcast fabric.
//!
//! ## Design Principles
//!
//! - **No chat logic** - channels and payloads are opaque here
//! - **No dependencies** on other quickchat-* crates
//!
//! ## Features
//!
//! - Publishing over a `ConnectionManager` with automatic reconnection
//! - A managed Pub/Sub subscription whose channel set can change at runtime
//!   and survives reconnects
//!
//! ## Example
//!
//! ```rust,no_run
//! use quickchat_redis::{RedisClient, RedisSubscriber};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = RedisClient::connect("redis://localhost:6379").await?;
//!     let (subscriber, mut deliveries) =
//!         RedisSubscriber::spawn("redis://localhost:6379", Duration::from_secs(1))?;
//!
//!     subscriber.subscribe("quickchat:room:abc");
//!     client.publish("quickchat:room:abc", b"hello").await?;
//!
//!     if let Some(msg) = deliveries.recv().await {
//!         println!("{}: {} bytes", msg.channel, msg.payload.len());
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod pubsub;

pub use client::RedisClient;
pub use pubsub::{PubSubMessage, RedisSubscriber};

// Re-export commonly used types
pub use redis::RedisError;

/// Result type for Redis operations
pub type Result<T> = std::result::Result<T, RedisError>;
