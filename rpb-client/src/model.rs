//! # Document Mapper
//!
//! Purpose: Store application records as JSON documents, with relations to
//! other records kept as tagged links.
//!
//! ## Design Principles
//! 1. **Declared Fields**: Each record type lists its fields once in a
//!    static `FieldDescriptor` table; the binder walks that table.
//! 2. **Explicit Resolution**: Record types opt into conflict handling by
//!    overriding `Document::resolve`; the default refuses.
//! 3. **Portable Bodies**: Bodies carry `_type` so other clients reading the
//!    same bucket can tell records apart.
//!
//! ## Body Layout
//! ```text
//! {"_type": "User", "name": "ann", "age": 31}
//! links: (people, bob, "friends"), (people, eve, "friends")
//! ```

use std::ops::{Deref, DerefMut};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::client::Client;
use crate::conflict::Resolver;
use crate::error::{ClientError, ClientResult};
use crate::object::{Link, RObject};
use crate::options::Options;

const TYPE_FIELD: &str = "_type";
const JSON_CONTENT_TYPE: &str = "application/json";

/// How a field is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A JSON value in the body.
    Scalar,
    /// At most one link.
    One,
    /// Any number of links.
    Many,
}

/// One entry of a document's field table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    /// Name used in the body or as link tag, when it differs from `name`.
    pub wire_name: Option<&'static str>,
    pub kind: FieldKind,
}

impl FieldDescriptor {
    pub const fn scalar(name: &'static str) -> Self {
        FieldDescriptor {
            name,
            wire_name: None,
            kind: FieldKind::Scalar,
        }
    }

    pub const fn one(name: &'static str) -> Self {
        FieldDescriptor {
            name,
            wire_name: None,
            kind: FieldKind::One,
        }
    }

    pub const fn many(name: &'static str) -> Self {
        FieldDescriptor {
            name,
            wire_name: None,
            kind: FieldKind::Many,
        }
    }

    pub const fn renamed(self, wire_name: &'static str) -> Self {
        FieldDescriptor {
            wire_name: Some(wire_name),
            ..self
        }
    }

    pub fn wire(&self) -> &'static str {
        self.wire_name.unwrap_or(self.name)
    }
}

/// A field's value as exchanged with the binder.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(Value),
    One(One),
    Many(Many),
}

impl FieldValue {
    pub fn scalar<V: Serialize>(value: &V) -> ClientResult<Self> {
        Ok(FieldValue::Scalar(serde_json::to_value(value)?))
    }

    /// Decodes a scalar, reporting `field` on a shape mismatch.
    pub fn into_scalar<V: DeserializeOwned>(self, field: &str) -> ClientResult<V> {
        match self {
            FieldValue::Scalar(value) => {
                serde_json::from_value(value).map_err(|err| ClientError::TypeMismatch {
                    field: field.to_string(),
                    reason: err.to_string(),
                })
            }
            other => Err(mismatch(field, "scalar", &other)),
        }
    }

    pub fn into_one(self, field: &str) -> ClientResult<One> {
        match self {
            FieldValue::One(one) => Ok(one),
            other => Err(mismatch(field, "one", &other)),
        }
    }

    pub fn into_many(self, field: &str) -> ClientResult<Many> {
        match self {
            FieldValue::Many(many) => Ok(many),
            other => Err(mismatch(field, "many", &other)),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Scalar(_) => "scalar",
            FieldValue::One(_) => "one",
            FieldValue::Many(_) => "many",
        }
    }
}

fn mismatch(field: &str, expected: &str, actual: &FieldValue) -> ClientError {
    ClientError::TypeMismatch {
        field: field.to_string(),
        reason: format!("expected {expected}, got {}", actual.kind_name()),
    }
}

/// Relation to a single other document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct One {
    link: Option<Link>,
}

impl One {
    /// Points the relation at a saved document.
    pub fn set<U: Document>(&mut self, target: &Model<U>) -> ClientResult<()> {
        self.link = Some(target.link_target()?);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.link = None;
    }

    pub fn link(&self) -> Option<&Link> {
        self.link.as_ref()
    }

    pub fn is_set(&self) -> bool {
        self.link.is_some()
    }

    /// Loads the related document.
    pub fn load<U: Document>(&self, client: &Client) -> ClientResult<Model<U>> {
        let link = self.link.as_ref().ok_or(ClientError::ModelNotInitialized)?;
        client.load(&link.bucket, &link.key, Options::default())
    }
}

/// Relation to any number of other documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Many {
    links: Vec<Link>,
}

impl Many {
    pub fn add<U: Document>(&mut self, target: &Model<U>) -> ClientResult<()> {
        let link = target.link_target()?;
        if !self.links.contains(&link) {
            self.links.push(link);
        }
        Ok(())
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn load_all<U: Document>(&self, client: &Client) -> ClientResult<Vec<Model<U>>> {
        self.links
            .iter()
            .map(|link| client.load(&link.bucket, &link.key, Options::default()))
            .collect()
    }
}

/// An application record stored as a JSON document.
///
/// ```ignore
/// #[derive(Default)]
/// struct Device { ip: String, owner: One }
///
/// impl Document for Device {
///     const TYPE_NAME: &'static str = "Device";
///     const FIELDS: &'static [FieldDescriptor] =
///         &[FieldDescriptor::scalar("ip"), FieldDescriptor::one("owner")];
///
///     fn read_field(&self, name: &str) -> ClientResult<Option<FieldValue>> {
///         match name {
///             "ip" => FieldValue::scalar(&self.ip).map(Some),
///             "owner" => Ok(Some(FieldValue::One(self.owner.clone()))),
///             _ => Ok(None),
///         }
///     }
///
///     fn write_field(&mut self, name: &str, value: FieldValue) -> ClientResult<()> {
///         match name {
///             "ip" => self.ip = value.into_scalar(name)?,
///             "owner" => self.owner = value.into_one(name)?,
///             _ => {}
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Document: Default {
    /// Stored as `_type` in the body.
    const TYPE_NAME: &'static str;
    const FIELDS: &'static [FieldDescriptor];

    fn read_field(&self, name: &str) -> ClientResult<Option<FieldValue>>;

    fn write_field(&mut self, name: &str, value: FieldValue) -> ClientResult<()>;

    /// Merges conflicting versions into `self`, which starts as `Default`.
    fn resolve(&mut self, sibling_count: usize, conflict: &Conflict<'_>) -> ClientResult<()> {
        let _ = (sibling_count, conflict);
        Err(ClientError::ResolveNotImplemented)
    }
}

/// Read access to the siblings of a conflicted document.
#[derive(Debug, Clone, Copy)]
pub struct Conflict<'a> {
    object: &'a RObject,
}

impl<'a> Conflict<'a> {
    pub fn object(&self) -> &'a RObject {
        self.object
    }

    pub fn sibling_count(&self) -> usize {
        self.object.sibling_count()
    }

    /// Decodes every non-empty sibling.
    pub fn siblings<T: Document>(&self) -> ClientResult<Vec<T>> {
        self.object
            .non_empty_siblings()
            .map(|sibling| decode_document(&sibling.data, &sibling.links))
            .collect()
    }

    /// Decodes the siblings into `dest`, which must have one slot per
    /// non-empty sibling.
    pub fn siblings_into<T: Document>(&self, dest: &mut [T]) -> ClientResult<()> {
        let expected = self.sibling_count();
        if dest.len() != expected {
            return Err(ClientError::SiblingCountMismatch {
                expected,
                actual: dest.len(),
            });
        }
        for (slot, sibling) in dest.iter_mut().zip(self.object.non_empty_siblings()) {
            *slot = decode_document(&sibling.data, &sibling.links)?;
        }
        Ok(())
    }
}

/// A document bound to the object that stores it.
#[derive(Debug, Clone)]
pub struct Model<T> {
    object: RObject,
    doc: T,
}

impl<T: Document> Model<T> {
    pub fn key(&self) -> &str {
        self.object.key()
    }

    /// Changes the key used by the next save.
    pub fn set_key(&mut self, key: impl Into<String>) {
        self.object.key = key.into();
    }

    pub fn object(&self) -> &RObject {
        &self.object
    }

    pub fn into_inner(self) -> T {
        self.doc
    }

    /// Encodes the document and stores it, echoing the object's clock.
    pub fn save(&mut self) -> ClientResult<()> {
        let (body, links) = encode_document(&self.doc)?;
        let relation_tags: Vec<&str> = T::FIELDS
            .iter()
            .filter(|field| field.kind != FieldKind::Scalar)
            .map(FieldDescriptor::wire)
            .collect();
        self.object
            .links
            .retain(|link| !relation_tags.contains(&link.tag.as_str()));
        for link in links {
            self.object.add_link(link);
        }
        self.object.data = body;
        self.object.content_type = JSON_CONTENT_TYPE.to_string();
        self.object.store()
    }

    /// Saves under `key`. An empty key lets the store pick one.
    pub fn save_as(&mut self, key: impl Into<String>) -> ClientResult<()> {
        self.set_key(key);
        self.save()
    }

    pub fn delete(&self) -> ClientResult<()> {
        self.object.delete()
    }

    /// Siblings of the underlying object, decoded. Empty unless conflicted.
    pub fn siblings(&self) -> ClientResult<Vec<T>> {
        Conflict {
            object: &self.object,
        }
        .siblings()
    }

    pub fn siblings_into(&self, dest: &mut [T]) -> ClientResult<()> {
        Conflict {
            object: &self.object,
        }
        .siblings_into(dest)
    }

    fn link_target(&self) -> ClientResult<Link> {
        if self.object.key.is_empty() {
            return Err(ClientError::ModelNotInitialized);
        }
        Ok(Link::new(self.object.bucket(), self.object.key(), ""))
    }
}

impl<T> Deref for Model<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.doc
    }
}

impl<T> DerefMut for Model<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.doc
    }
}

/// Adapts `Document::resolve` to the object-level resolver hook.
struct DocumentResolver<'a, T> {
    doc: &'a mut T,
}

impl<T: Document> Resolver for DocumentResolver<'_, T> {
    fn resolve(&mut self, object: &mut RObject, sibling_count: usize) -> ClientResult<()> {
        self.doc.resolve(sibling_count, &Conflict { object: &*object })
    }
}

impl Client {
    /// Binds `doc` to a new, unsaved object. An empty key lets the store
    /// pick one on save.
    pub fn new_model<T: Document>(&self, bucket: &str, key: &str, doc: T) -> Model<T> {
        let mut object = self.new_object_in(bucket, key);
        object.content_type = JSON_CONTENT_TYPE.to_string();
        Model { object, doc }
    }

    /// Loads a document, resolving siblings through `Document::resolve`.
    pub fn load<T: Document>(&self, bucket: &str, key: &str, options: Options) -> ClientResult<Model<T>> {
        let mut object = self.get_from(bucket, key, options)?;
        let doc = if object.conflict() {
            let mut doc = T::default();
            object.resolve(&mut DocumentResolver { doc: &mut doc })?;
            doc
        } else {
            decode_document(&object.data, &object.links)?
        };
        Ok(Model { object, doc })
    }
}

fn encode_document<T: Document>(doc: &T) -> ClientResult<(Vec<u8>, Vec<Link>)> {
    let mut body = Map::new();
    body.insert(TYPE_FIELD.to_string(), Value::String(T::TYPE_NAME.to_string()));
    let mut links = Vec::new();
    for field in T::FIELDS {
        let tag = field.wire();
        match doc.read_field(field.name)? {
            Some(FieldValue::Scalar(value)) => {
                body.insert(tag.to_string(), value);
            }
            Some(FieldValue::One(one)) => {
                if let Some(link) = one.link {
                    links.push(Link { tag: tag.to_string(), ..link });
                }
            }
            Some(FieldValue::Many(many)) => {
                links.extend(many.links.into_iter().map(|link| Link {
                    tag: tag.to_string(),
                    ..link
                }));
            }
            None => {}
        }
    }
    Ok((serde_json::to_vec(&Value::Object(body))?, links))
}

fn decode_document<T: Document>(data: &[u8], links: &[Link]) -> ClientResult<T> {
    let mut body = match serde_json::from_slice::<Value>(data)? {
        Value::Object(body) => body,
        _ => {
            return Err(ClientError::TypeMismatch {
                field: TYPE_FIELD.to_string(),
                reason: "document body is not a JSON object".to_string(),
            })
        }
    };
    if body.get(TYPE_FIELD).and_then(Value::as_str) != Some(T::TYPE_NAME) {
        warn!(expected = T::TYPE_NAME, found = ?body.get(TYPE_FIELD), "document type does not match");
    }

    let mut doc = T::default();
    for field in T::FIELDS {
        let tag = field.wire();
        let tagged = links.iter().filter(|link| link.tag == tag).cloned();
        let value = match field.kind {
            FieldKind::Scalar => match body.remove(tag) {
                Some(value) => FieldValue::Scalar(value),
                None => continue,
            },
            FieldKind::One => match tagged.last() {
                Some(link) => FieldValue::One(One { link: Some(link) }),
                None => continue,
            },
            FieldKind::Many => FieldValue::Many(Many {
                links: tagged.collect(),
            }),
        };
        doc.write_field(field.name, value)?;
    }
    Ok(doc)
}
