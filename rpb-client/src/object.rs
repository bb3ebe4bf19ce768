//! # Stored Objects
//!
//! Purpose: Represent one key's value together with its metadata, vector
//! clock and, when the store reports concurrent writes, its siblings.
//!
//! ## Design Principles
//! 1. **Lossless Conflicts**: More than one content entry in a reply turns
//!    the object into a conflicted one holding every sibling; the client
//!    never picks one on its own.
//! 2. **Clock Echo**: The last vector clock seen is sent back on every write
//!    and delete so the store can order them.
//! 3. **Tombstones Keep Clocks**: A missing key still yields an object with
//!    whatever clock the store returned, inside `ClientError::NotFound`.

use std::collections::{BTreeMap, BTreeSet};

use rpb_common::messages::{
    RpbContent, RpbDelReq, RpbGetReq, RpbGetResp, RpbLink, RpbPair, RpbPutReq, RpbPutResp,
};
use tracing::{debug, info, trace};

use crate::bucket::Bucket;
use crate::client::Client;
use crate::conflict::ConflictState;
use crate::error::{ClientError, ClientResult};
use crate::options::Options;

/// A link from one object to another, tagged with its role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Link {
    pub bucket: String,
    pub key: String,
    pub tag: String,
}

impl Link {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, tag: impl Into<String>) -> Self {
        Link {
            bucket: bucket.into(),
            key: key.into(),
            tag: tag.into(),
        }
    }

    fn from_wire(link: RpbLink) -> Self {
        Link {
            bucket: lossy(link.bucket.unwrap_or_default()),
            key: lossy(link.key.unwrap_or_default()),
            tag: lossy(link.tag.unwrap_or_default()),
        }
    }

    fn to_wire(&self) -> RpbLink {
        RpbLink {
            bucket: Some(self.bucket.as_bytes().to_vec()),
            key: Some(self.key.as_bytes().to_vec()),
            tag: Some(self.tag.as_bytes().to_vec()),
        }
    }
}

/// One independent version of a conflicted value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sibling {
    pub content_type: String,
    pub data: Vec<u8>,
    pub links: Vec<Link>,
    pub meta: BTreeMap<String, String>,
    pub indexes: BTreeMap<String, BTreeSet<String>>,
    pub vtag: String,
    pub last_mod: u32,
    pub last_mod_usecs: u32,
    pub deleted: bool,
}

impl Sibling {
    /// Tombstone siblings carry no data and do not count towards resolution.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn from_wire(content: RpbContent) -> Self {
        let mut indexes: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for pair in content.indexes {
            indexes
                .entry(lossy(pair.key))
                .or_default()
                .insert(lossy(pair.value.unwrap_or_default()));
        }
        Sibling {
            content_type: lossy(content.content_type.unwrap_or_default()),
            data: content.value,
            links: content.links.into_iter().map(Link::from_wire).collect(),
            meta: content
                .usermeta
                .into_iter()
                .map(|pair| (lossy(pair.key), lossy(pair.value.unwrap_or_default())))
                .collect(),
            indexes,
            vtag: lossy(content.vtag.unwrap_or_default()),
            last_mod: content.last_mod.unwrap_or_default(),
            last_mod_usecs: content.last_mod_usecs.unwrap_or_default(),
            deleted: content.deleted.unwrap_or(false),
        }
    }
}

/// An object that is, or can be, stored under a bucket and key.
///
/// While `conflict()` is true the single-value fields (`data`,
/// `content_type`, `links`, `meta`, `indexes`) are meaningless and
/// `siblings` holds every version the store returned.
#[derive(Debug, Clone)]
pub struct RObject {
    client: Client,
    bucket: String,
    bucket_type: Option<String>,
    /// Empty until stored when the store should pick the key.
    pub key: String,
    /// Opaque causality token; empty before the first store.
    pub vclock: Vec<u8>,
    pub content_type: String,
    pub data: Vec<u8>,
    pub links: Vec<Link>,
    pub meta: BTreeMap<String, String>,
    pub indexes: BTreeMap<String, BTreeSet<String>>,
    pub vtag: String,
    pub last_mod: u32,
    pub last_mod_usecs: u32,
    pub siblings: Vec<Sibling>,
    /// Quorum options applied to later store, reload and delete calls.
    pub options: Options,
    pub(crate) state: ConflictState,
}

impl RObject {
    pub(crate) fn new(
        client: Client,
        bucket: impl Into<String>,
        bucket_type: Option<String>,
        key: impl Into<String>,
    ) -> Self {
        RObject {
            client,
            bucket: bucket.into(),
            bucket_type,
            key: key.into(),
            vclock: Vec::new(),
            content_type: String::new(),
            data: Vec::new(),
            links: Vec::new(),
            meta: BTreeMap::new(),
            indexes: BTreeMap::new(),
            vtag: String::new(),
            last_mod: 0,
            last_mod_usecs: 0,
            siblings: Vec::new(),
            options: Options::default(),
            state: ConflictState::Clean,
        }
    }

    /// Fetches `key`, returning `NotFound` with the tombstone clock when the
    /// store holds no value.
    pub(crate) fn fetch(bucket: &Bucket, key: &str, options: Options) -> ClientResult<RObject> {
        let request = RpbGetReq {
            bucket: bucket.name().as_bytes().to_vec(),
            key: key.as_bytes().to_vec(),
            r: options.wire_r(),
            pr: options.wire_pr(),
            notfound_ok: Some(true),
            deletedvclock: Some(true),
            r#type: bucket.type_bytes(),
            ..Default::default()
        };
        let resp: RpbGetResp = bucket.client().executor().request(&request)?;

        let mut object = bucket.new_object(key);
        object.options = options;
        object.vclock = resp.vclock.unwrap_or_default();
        if resp.content.is_empty() {
            debug!(bucket = bucket.name(), key, "object not found");
            return Err(ClientError::NotFound(Box::new(object)));
        }
        object.set_content(resp.content);
        Ok(object)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn bucket_type(&self) -> Option<&str> {
        self.bucket_type.as_deref()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Adds one value to a secondary index.
    pub fn add_index(&mut self, index: impl Into<String>, value: impl Into<String>) {
        self.indexes.entry(index.into()).or_default().insert(value.into());
    }

    /// Links this object to `target`. Ignored while the target has no key.
    pub fn link_to(&mut self, target: &RObject, tag: impl Into<String>) {
        if target.bucket.is_empty() || target.key.is_empty() {
            return;
        }
        self.links.push(Link::new(&target.bucket, &target.key, tag));
    }

    /// Adds a link unless an identical one is present. Returns false if it was.
    pub fn add_link(&mut self, link: Link) -> bool {
        if self.links.contains(&link) {
            return false;
        }
        self.links.push(link);
        true
    }

    /// Writes the object, echoing the last known vector clock.
    ///
    /// An empty key lets the store choose one; the chosen key is captured.
    pub fn store(&mut self) -> ClientResult<()> {
        let request = RpbPutReq {
            bucket: self.bucket.as_bytes().to_vec(),
            key: non_empty(self.key.as_bytes()),
            vclock: non_empty(&self.vclock),
            content: self.to_content(),
            w: self.options.wire_w(),
            dw: self.options.wire_dw(),
            pw: self.options.wire_pw(),
            return_head: Some(true),
            r#type: self.bucket_type.as_ref().map(|t| t.as_bytes().to_vec()),
            ..Default::default()
        };
        let resp: RpbPutResp = self.client.executor().request(&request)?;

        self.vclock = resp.vclock.unwrap_or_default();
        if self.key.is_empty() {
            if let Some(key) = resp.key {
                self.key = lossy(key);
            }
        }
        if let [head] = resp.content.as_slice() {
            self.vtag = String::from_utf8_lossy(head.vtag.as_deref().unwrap_or_default()).into_owned();
            self.last_mod = head.last_mod.unwrap_or_default();
            self.last_mod_usecs = head.last_mod_usecs.unwrap_or_default();
        }
        trace!(bucket = %self.bucket, key = %self.key, "object stored");
        Ok(())
    }

    /// Deletes this causal version of the object.
    pub fn delete(&self) -> ClientResult<()> {
        if self.key.is_empty() {
            return Err(ClientError::EmptyKey);
        }
        let request = RpbDelReq {
            bucket: self.bucket.as_bytes().to_vec(),
            key: self.key.as_bytes().to_vec(),
            vclock: non_empty(&self.vclock),
            r: self.options.wire_r(),
            pr: self.options.wire_pr(),
            rw: self.options.wire_rw(),
            w: self.options.wire_w(),
            dw: self.options.wire_dw(),
            pw: self.options.wire_pw(),
            r#type: self.bucket_type.as_ref().map(|t| t.as_bytes().to_vec()),
            ..Default::default()
        };
        self.client.executor().request_ack(&request)
    }

    /// Refreshes the object if the store holds a newer version.
    ///
    /// When the store reports the value unchanged, nothing is touched.
    pub fn reload(&mut self) -> ClientResult<()> {
        if self.key.is_empty() {
            return Err(ClientError::EmptyKey);
        }
        let request = RpbGetReq {
            bucket: self.bucket.as_bytes().to_vec(),
            key: self.key.as_bytes().to_vec(),
            r: self.options.wire_r(),
            pr: self.options.wire_pr(),
            if_modified: non_empty(&self.vclock),
            deletedvclock: Some(true),
            r#type: self.bucket_type.as_ref().map(|t| t.as_bytes().to_vec()),
            ..Default::default()
        };
        let resp: RpbGetResp = self.client.executor().request(&request)?;
        if resp.unchanged.unwrap_or(false) {
            trace!(bucket = %self.bucket, key = %self.key, "object unchanged");
            return Ok(());
        }

        self.vclock = resp.vclock.unwrap_or_default();
        if resp.content.is_empty() {
            self.clear_value();
            self.siblings.clear();
            self.state = ConflictState::Clean;
            return Err(ClientError::NotFound(Box::new(self.clone())));
        }
        self.set_content(resp.content);
        Ok(())
    }

    pub(crate) fn set_content(&mut self, contents: Vec<RpbContent>) {
        let mut siblings: Vec<Sibling> = contents.into_iter().map(Sibling::from_wire).collect();
        if siblings.len() > 1 {
            info!(
                bucket = %self.bucket,
                key = %self.key,
                siblings = siblings.len(),
                "conflict detected"
            );
            self.clear_value();
            self.siblings = siblings;
            self.state = ConflictState::Conflicted;
        } else if let Some(single) = siblings.pop() {
            self.siblings.clear();
            self.state = ConflictState::Clean;
            self.adopt(single);
        }
    }

    /// Makes `sibling` the object's single value.
    pub(crate) fn adopt(&mut self, sibling: Sibling) {
        self.content_type = sibling.content_type;
        self.data = sibling.data;
        self.links = sibling.links;
        self.meta = sibling.meta;
        self.indexes = sibling.indexes;
        self.vtag = sibling.vtag;
        self.last_mod = sibling.last_mod;
        self.last_mod_usecs = sibling.last_mod_usecs;
    }

    fn clear_value(&mut self) {
        self.content_type.clear();
        self.data.clear();
        self.links.clear();
        self.meta.clear();
        self.indexes.clear();
    }

    fn to_content(&self) -> RpbContent {
        RpbContent {
            value: self.data.clone(),
            content_type: non_empty(self.content_type.as_bytes()),
            links: self.links.iter().map(Link::to_wire).collect(),
            usermeta: self
                .meta
                .iter()
                .map(|(key, value)| RpbPair::new(key.as_bytes(), value.as_bytes()))
                .collect(),
            indexes: self
                .indexes
                .iter()
                .flat_map(|(index, values)| {
                    values
                        .iter()
                        .map(move |value| RpbPair::new(index.as_bytes(), value.as_bytes()))
                })
                .collect(),
            ..Default::default()
        }
    }
}

pub(crate) fn lossy(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
}

pub(crate) fn non_empty(bytes: &[u8]) -> Option<Vec<u8>> {
    (!bytes.is_empty()).then(|| bytes.to_vec())
}
