//! # confsync
//!
//! A configuration-data synchronization engine. A schema document describes
//! both where configuration lives (query templates against a relational
//! source) and what shape it takes (an attribute tree); the engine
//! materializes it into a document, keeps a local copy current, and serves
//! reads from whichever side is reachable.
//!
//! ```text
//!                      +------------------+
//!   relational source  |    Repository    |   file copy
//!  ----------------->  |                  | ----------------->
//!     SqlFactory       |  refresh/mirror  |    FileBuilder
//!                      |                  |
//!  <-----------------  |  read/is_empty   | <-----------------
//!     SqlBuilder       |                  |    FileFactory
//!                      +------------------+
//!                               ^
//!                               | refresh_and_mirror on a cadence
//!                       +---------------+
//!                       | Synchronizer  |
//!                       +---------------+
//! ```
//!
//! The [`Repository`] is the state machine: it stores the latest document,
//! tracks whether the copy is up to date, and falls back to the copy factory
//! when the main source fails. [`Factory`] and [`Builder`] are the seams;
//! the relational and file implementations are interchangeable, so the same
//! repository can also push documents back into a database with
//! [`SqlBuilder`].

pub mod config;
pub mod document;
pub mod error;
pub mod eval;
pub mod factory;
pub mod file;
pub mod path;
pub mod repository;
pub mod resolver;
pub mod retry;
pub mod schema;
pub mod session;
pub mod shutdown;
pub mod sql;
pub mod synchronizer;
pub mod xml;

pub use config::SynchronizerConfig;
pub use document::{Attr, Document, NodeId};
pub use error::SyncError;
pub use factory::{Builder, Factory};
pub use file::{FileBuilder, FileFactory, StringFactory};
pub use repository::{DataSource, Repository};
pub use resolver::SchemaResolver;
pub use schema::{ConnectionParameters, SchemaDocument, SCHEMA_NS, SCHEMA_PREFIX};
pub use session::{KeyValueSession, KeyValueTable, LockedTableScope};
pub use shutdown::{ShutdownController, ShutdownToken};
pub use sql::{SqlBuilder, SqlFactory};
pub use synchronizer::Synchronizer;
