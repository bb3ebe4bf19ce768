//! # Buckets
//!
//! Purpose: Name a keyspace on the store and carry the operations scoped to
//! it: property management, object access, index queries and key listing.
//!
//! Property setters send only the field being changed, then update the
//! local copy once the store acknowledges.

use rpb_common::messages::{
    IndexQueryType, RpbBucketProps, RpbGetBucketReq, RpbGetBucketResp, RpbGetReq, RpbGetResp,
    RpbIndexReq, RpbIndexResp, RpbListKeysReq, RpbListKeysResp, RpbResetBucketReq,
    RpbSetBucketReq,
};
use tracing::{debug, info};

use crate::client::Client;
use crate::error::ClientResult;
use crate::object::{lossy, RObject};
use crate::options::Options;

/// The bucket properties this client reads and writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketProps {
    pub n_val: u32,
    pub allow_mult: bool,
    pub last_write_wins: bool,
    pub search: bool,
}

impl BucketProps {
    fn from_wire(props: &RpbBucketProps) -> Self {
        BucketProps {
            n_val: props.n_val.unwrap_or_default(),
            allow_mult: props.allow_mult.unwrap_or(false),
            last_write_wins: props.last_write_wins.unwrap_or(false),
            search: props.search.unwrap_or(false),
        }
    }
}

/// Handle on one bucket, optionally under a bucket type.
#[derive(Debug, Clone)]
pub struct Bucket {
    client: Client,
    name: String,
    bucket_type: Option<String>,
    props: BucketProps,
}

impl Bucket {
    pub(crate) fn new(client: Client, name: impl Into<String>, bucket_type: Option<String>) -> Self {
        Bucket {
            client,
            name: name.into(),
            bucket_type,
            props: BucketProps::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bucket_type(&self) -> Option<&str> {
        self.bucket_type.as_deref()
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Properties as of the last `refresh` or setter call.
    pub fn props(&self) -> BucketProps {
        self.props
    }

    pub fn n_val(&self) -> u32 {
        self.props.n_val
    }

    pub fn allow_mult(&self) -> bool {
        self.props.allow_mult
    }

    pub fn last_write_wins(&self) -> bool {
        self.props.last_write_wins
    }

    pub fn search(&self) -> bool {
        self.props.search
    }

    pub(crate) fn type_bytes(&self) -> Option<Vec<u8>> {
        self.bucket_type.as_ref().map(|t| t.as_bytes().to_vec())
    }

    /// Reloads the bucket properties from the store.
    pub fn refresh(&mut self) -> ClientResult<()> {
        let request = RpbGetBucketReq {
            bucket: self.name.as_bytes().to_vec(),
            r#type: self.type_bytes(),
        };
        let resp: RpbGetBucketResp = self.client.executor().request(&request)?;
        self.props = BucketProps::from_wire(&resp.props);
        debug!(bucket = %self.name, props = ?self.props, "bucket properties loaded");
        Ok(())
    }

    pub fn set_n_val(&mut self, n_val: u32) -> ClientResult<()> {
        self.set_props(RpbBucketProps {
            n_val: Some(n_val),
            ..Default::default()
        })?;
        self.props.n_val = n_val;
        Ok(())
    }

    pub fn set_allow_mult(&mut self, allow_mult: bool) -> ClientResult<()> {
        self.set_props(RpbBucketProps {
            allow_mult: Some(allow_mult),
            ..Default::default()
        })?;
        self.props.allow_mult = allow_mult;
        Ok(())
    }

    pub fn set_last_write_wins(&mut self, last_write_wins: bool) -> ClientResult<()> {
        self.set_props(RpbBucketProps {
            last_write_wins: Some(last_write_wins),
            ..Default::default()
        })?;
        self.props.last_write_wins = last_write_wins;
        Ok(())
    }

    pub fn set_search(&mut self, search: bool) -> ClientResult<()> {
        self.set_props(RpbBucketProps {
            search: Some(search),
            ..Default::default()
        })?;
        self.props.search = search;
        Ok(())
    }

    /// Restores the store's default properties and reloads them.
    pub fn reset_properties(&mut self) -> ClientResult<()> {
        self.client.executor().request_ack(&RpbResetBucketReq {
            bucket: self.name.as_bytes().to_vec(),
            r#type: self.type_bytes(),
        })?;
        info!(bucket = %self.name, "bucket properties reset");
        self.refresh()
    }

    fn set_props(&self, props: RpbBucketProps) -> ClientResult<()> {
        self.client.executor().request_ack(&RpbSetBucketReq {
            bucket: self.name.as_bytes().to_vec(),
            props,
            r#type: self.type_bytes(),
        })
    }

    /// Creates an unsaved object in this bucket.
    pub fn new_object(&self, key: &str) -> RObject {
        RObject::new(self.client.clone(), &self.name, self.bucket_type.clone(), key)
    }

    /// Fetches an object.
    ///
    /// Fails with `NotFound` when the key holds no value; the error carries
    /// the object with any tombstone clock the store returned.
    pub fn get(&self, key: &str, options: Options) -> ClientResult<RObject> {
        RObject::fetch(self, key, options)
    }

    /// Checks for a value without transferring it.
    pub fn exists(&self, key: &str, options: Options) -> ClientResult<bool> {
        let request = RpbGetReq {
            bucket: self.name.as_bytes().to_vec(),
            key: key.as_bytes().to_vec(),
            r: options.wire_r(),
            pr: options.wire_pr(),
            notfound_ok: Some(true),
            head: Some(true),
            r#type: self.type_bytes(),
            ..Default::default()
        };
        let resp: RpbGetResp = self.client.executor().request(&request)?;
        Ok(!resp.content.is_empty())
    }

    /// Deletes `key` without a vector clock.
    pub fn delete(&self, key: &str, options: Options) -> ClientResult<()> {
        self.new_object(key).with_options(options).delete()
    }

    /// Keys whose `index` holds exactly `value`.
    pub fn index_query(&self, index: &str, value: &str) -> ClientResult<Vec<String>> {
        self.query_index(RpbIndexReq {
            qtype: IndexQueryType::Eq as i32,
            key: Some(value.as_bytes().to_vec()),
            ..self.index_request(index)
        })
    }

    /// Keys whose `index` lies in `min..=max`.
    pub fn index_query_range(&self, index: &str, min: &str, max: &str) -> ClientResult<Vec<String>> {
        self.query_index(RpbIndexReq {
            qtype: IndexQueryType::Range as i32,
            range_min: Some(min.as_bytes().to_vec()),
            range_max: Some(max.as_bytes().to_vec()),
            ..self.index_request(index)
        })
    }

    fn index_request(&self, index: &str) -> RpbIndexReq {
        RpbIndexReq {
            bucket: self.name.as_bytes().to_vec(),
            index: index.as_bytes().to_vec(),
            r#type: self.type_bytes(),
            ..Default::default()
        }
    }

    fn query_index(&self, request: RpbIndexReq) -> ClientResult<Vec<String>> {
        let resp: RpbIndexResp = self.client.executor().request(&request)?;
        Ok(resp.keys.into_iter().map(lossy).collect())
    }

    /// Lists every key in the bucket. Expensive on the store side.
    pub fn list_keys(&self) -> ClientResult<Vec<Vec<u8>>> {
        let request = RpbListKeysReq {
            bucket: self.name.as_bytes().to_vec(),
            r#type: self.type_bytes(),
            ..Default::default()
        };
        let keys = self
            .client
            .executor()
            .execute(&request)?
            .read_paginated::<RpbListKeysResp>()?;
        debug!(bucket = %self.name, count = keys.len(), "listed keys");
        Ok(keys)
    }
}
