//! Logscope - buffered log search and tail backend for operational dashboards
//!
//! The [`logs`] module holds the search engine and the registry of viewable
//! logs; [`service`] is the request-level surface a web or RPC front-end
//! calls into.

pub mod config;
pub mod host;
pub mod logs;
pub mod service;

pub use logs::{LogError, LogHandle, LogRegistry, SearchDirection, SearchResult};
pub use service::{LogService, SearchResponse};
