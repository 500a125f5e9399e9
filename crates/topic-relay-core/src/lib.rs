//! Topic matching and payload hydration for queue-to-HTTP relays.
//!
//! A [`RelayConfig`] maps topic patterns to actions. For every incoming
//! `(topic, payload)` the [`Dispatcher`] finds the matching actions, gathers
//! extra data through chained GETs, renders the request bodies and hands back
//! [`RunnableAction`]s. [`handle_message`] drives that for one queue message.

pub mod accumulator;
pub mod coerce;
pub mod config;
pub mod data_map;
pub mod dispatcher;
pub mod error;
pub mod expr;
pub mod handlers;
pub mod http;
pub mod matcher;
pub mod message;
pub mod payload;
pub mod runnable;
pub mod template;

#[cfg(test)]
mod testing;

/// One accumulation entry: level name → fetched (or original) value.
pub type Entry = serde_json::Map<String, serde_json::Value>;

pub use config::{ActionDef, ConfigWarning, Method, RelayConfig, Settings, WarnLevel};
pub use dispatcher::Dispatcher;
pub use error::{RelayError, Result};
pub use handlers::{CustomHandler, HandlerRegistry, HandlerResult};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use message::{handle_message, ActionState, LocalMessage, MessageReport, QueueMessage};
pub use runnable::RunnableAction;
