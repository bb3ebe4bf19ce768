//! # Client Facade
//!
//! Purpose: Expose the blocking API applications hold on to: connection
//! lifecycle, server housekeeping calls and entry points into buckets.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides pooling, framing and decoding.
//! 2. **Explicit Context**: There is no global default client; callers build
//!    one and pass it (or a clone) to whatever needs it.
//! 3. **Cheap Clones**: Every handle (`Bucket`, `RObject`, models) keeps a
//!    clone of the client, which only bumps a reference count.

use rpb_common::messages::{
    RpbGetClientIdResp, RpbGetServerInfoResp, RpbListBucketsReq, RpbListBucketsResp,
    RpbSetClientIdReq,
};
use rpb_common::MessageCode;
use tracing::info;

use crate::bucket::Bucket;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::executor::RequestExecutor;
use crate::object::{lossy, RObject};
use crate::options::Options;
use crate::pool::ConnectionPool;

/// Node name and software version reported by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub node: String,
    pub version: String,
}

/// Blocking client with a pool of connections to one store node.
#[derive(Debug, Clone)]
pub struct Client {
    executor: RequestExecutor,
}

impl Client {
    /// Creates a client without dialing. The first request connects.
    pub fn new(config: ClientConfig) -> Self {
        Client {
            executor: RequestExecutor::new(ConnectionPool::new(config)),
        }
    }

    /// Connects a single-connection client to `addr`.
    pub fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        Self::with_config(ClientConfig::new(addr))
    }

    /// Connects a client that keeps `pool_size` connections open.
    pub fn with_pool(addr: impl Into<String>, pool_size: usize) -> ClientResult<Self> {
        Self::with_config(ClientConfig::new(addr).with_pool_size(pool_size))
    }

    /// Creates a client and opens every pooled connection up front.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        let client = Self::new(config);
        client.reconnect()?;
        Ok(client)
    }

    /// Closes the pool (if open) and dials it again.
    pub fn reconnect(&self) -> ClientResult<()> {
        self.executor.pool().connect()
    }

    /// Closes every connection. Safe to call more than once.
    pub fn close(&self) {
        self.executor.pool().close();
    }

    pub fn config(&self) -> &ClientConfig {
        self.executor.pool().config()
    }

    pub fn pool(&self) -> &ConnectionPool {
        self.executor.pool()
    }

    pub(crate) fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn ping(&self) -> ClientResult<()> {
        self.executor.execute_empty(MessageCode::PingReq)?.read_ack()
    }

    /// Returns the client id the store uses for this connection's writes.
    pub fn client_id(&self) -> ClientResult<Vec<u8>> {
        let resp: RpbGetClientIdResp = self
            .executor
            .execute_empty(MessageCode::GetClientIdReq)?
            .read_single()?;
        Ok(resp.client_id)
    }

    pub fn set_client_id(&self, id: impl Into<Vec<u8>>) -> ClientResult<()> {
        self.executor.request_ack(&RpbSetClientIdReq {
            client_id: id.into(),
        })
    }

    pub fn server_info(&self) -> ClientResult<ServerInfo> {
        let resp: RpbGetServerInfoResp = self
            .executor
            .execute_empty(MessageCode::GetServerInfoReq)?
            .read_single()?;
        Ok(ServerInfo {
            node: lossy(resp.node.unwrap_or_default()),
            version: lossy(resp.server_version.unwrap_or_default()),
        })
    }

    /// Lists every bucket holding at least one key.
    ///
    /// This walks the whole keyspace on the store and is meant for
    /// development and administration, not for request paths.
    pub fn list_buckets(&self) -> ClientResult<Vec<String>> {
        let request = RpbListBucketsReq {
            stream: Some(true),
            ..Default::default()
        };
        let buckets = self
            .executor
            .execute(&request)?
            .read_paginated::<RpbListBucketsResp>()?;
        info!(count = buckets.len(), "listed buckets");
        Ok(buckets.into_iter().map(lossy).collect())
    }

    /// Returns a bucket handle with its properties loaded.
    pub fn bucket(&self, name: &str) -> ClientResult<Bucket> {
        let mut bucket = self.bucket_handle(name, None)?;
        bucket.refresh()?;
        Ok(bucket)
    }

    /// Returns a handle on a bucket under a bucket type, as needed for the
    /// convergent data types. Properties are not fetched.
    pub fn bucket_type(&self, bucket_type: &str, name: &str) -> ClientResult<Bucket> {
        self.bucket_handle(name, Some(bucket_type.to_string()))
    }

    /// Fetches `key` from `bucket` without loading bucket properties.
    pub fn get_from(&self, bucket: &str, key: &str, options: Options) -> ClientResult<RObject> {
        self.bucket_handle(bucket, None)?.get(key, options)
    }

    pub fn delete_from(&self, bucket: &str, key: &str, options: Options) -> ClientResult<()> {
        self.bucket_handle(bucket, None)?.delete(key, options)
    }

    /// Creates an unsaved object. An empty key lets the store assign one.
    pub fn new_object_in(&self, bucket: &str, key: &str) -> RObject {
        RObject::new(self.clone(), bucket, None, key)
    }

    pub fn exists_in(&self, bucket: &str, key: &str, options: Options) -> ClientResult<bool> {
        self.bucket_handle(bucket, None)?.exists(key, options)
    }

    fn bucket_handle(&self, name: &str, bucket_type: Option<String>) -> ClientResult<Bucket> {
        if name.is_empty() {
            return Err(ClientError::EmptyBucketName);
        }
        Ok(Bucket::new(self.clone(), name, bucket_type))
    }
}
