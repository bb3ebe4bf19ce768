//! # Riak PBC Sync Client
//!
//! Purpose: Provide a synchronous client for a Riak-compatible key/value store
//! over its length-prefixed protobuf protocol, with pooled connections,
//! sibling resolution and typed helpers on top of plain objects.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: A fixed set of TCP connections is shared by
//!    every handle cloned from one `Client`.
//! 2. **Explicit Conflicts**: Fetching an object never hides its siblings;
//!    a `Resolver` decides how they collapse into one value.
//! 3. **Strict Replies**: Each request names the response code it accepts and
//!    anything else is an error, never a guess.
//! 4. **Layered Helpers**: Counters, data types, chunked files and documents
//!    are built from the same object and executor primitives.

pub mod bucket;
pub mod client;
pub mod config;
pub mod conflict;
pub mod counter;
pub mod datatype;
pub mod error;
pub mod executor;
pub mod file;
pub mod mapreduce;
pub mod model;
pub mod object;
pub mod options;
pub mod pool;
pub mod search;

pub use bucket::{Bucket, BucketProps};
pub use client::{Client, ServerInfo};
pub use config::{ClientConfig, DEFAULT_ADDR};
pub use conflict::{ConflictState, NoResolver, Resolver};
pub use counter::Counter;
pub use datatype::{
    CounterDt, CounterValue, DataTypeObject, DataTypeValue, Flag, MapDt, MapItem, MapKey,
    MapValue, Register, SetDt, SetValue, DEFAULT_BUCKET_TYPE,
};
pub use error::{ClientError, ClientResult};
pub use executor::{Paginated, PendingRequest, RequestExecutor};
pub use file::{RFile, MAX_CHUNK_SIZE};
pub use mapreduce::MapReduce;
pub use model::{
    Conflict, Document, FieldDescriptor, FieldKind, FieldValue, Many, Model, One,
};
pub use object::{Link, RObject, Sibling};
pub use options::{Options, Quorum};
pub use pool::{ConnectionPool, PoolPhase, PooledConnection};
pub use rpb_common::messages::MapFieldType;
pub use search::{Search, SearchResult, DEFAULT_ROWS};
