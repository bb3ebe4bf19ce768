//! # Chunked Files
//!
//! Purpose: Store values too large for a single object as a sequence of
//! fixed-size chunk objects, behind the standard `Read`/`Write`/`Seek` traits.
//!
//! ## Layout
//! ```text
//! <key>            root: content type + meta {chunk_size, chunk_count}, no data
//! <key>-000000     bytes [0, chunk_size)
//! <key>-000001     bytes [chunk_size, 2 * chunk_size)
//! ...
//! ```
//!
//! Every write stores the touched chunk immediately; the root is rewritten
//! only when the file grows into a new chunk.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::client::Client;
use crate::error::{ClientError, ClientResult};
use crate::object::RObject;
use crate::options::Options;

/// Largest accepted chunk, 100 MiB.
pub const MAX_CHUNK_SIZE: usize = 100 * 1024 * 1024;

const META_CHUNK_SIZE: &str = "chunk_size";
const META_CHUNK_COUNT: &str = "chunk_count";

fn chunk_key(key: &str, index: usize) -> String {
    format!("{key}-{index:06}")
}

/// A file-like value split across chunk objects.
#[derive(Debug)]
pub struct RFile {
    client: Client,
    root: RObject,
    chunk: Option<RObject>,
    chunk_size: usize,
    pos: usize,
    size: usize,
}

impl Client {
    /// Creates an empty file, truncating any file stored under `key`.
    pub fn create_file(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        chunk_size: usize,
        options: Options,
    ) -> ClientResult<RFile> {
        if !(1..=MAX_CHUNK_SIZE).contains(&chunk_size) || key.is_empty() {
            return Err(ClientError::NotFile(key.to_string()));
        }
        let mut root = self.new_object_in(bucket, key).with_options(options);
        root.content_type = content_type.to_string();
        root.meta.insert(META_CHUNK_SIZE.to_string(), chunk_size.to_string());
        root.meta.insert(META_CHUNK_COUNT.to_string(), "0".to_string());
        root.store()?;
        debug!(bucket, key, chunk_size, "file created");
        Ok(RFile {
            client: self.clone(),
            root,
            chunk: None,
            chunk_size,
            pos: 0,
            size: 0,
        })
    }

    /// Opens a stored file. Fails with `NotFile` when the object lacks valid
    /// chunk metadata.
    pub fn open_file(&self, bucket: &str, key: &str, options: Options) -> ClientResult<RFile> {
        let root = self.get_from(bucket, key, options)?;
        let not_file = || ClientError::NotFile(key.to_string());
        let chunk_size: usize = root
            .meta
            .get(META_CHUNK_SIZE)
            .and_then(|v| v.parse().ok())
            .filter(|size| (1..=MAX_CHUNK_SIZE).contains(size))
            .ok_or_else(not_file)?;
        let chunk_count: usize = root
            .meta
            .get(META_CHUNK_COUNT)
            .and_then(|v| v.parse().ok())
            .ok_or_else(not_file)?;

        let mut file = RFile {
            client: self.clone(),
            root,
            chunk: None,
            chunk_size,
            pos: 0,
            size: 0,
        };
        if chunk_count > 0 {
            let last = file.chunk_at(chunk_count - 1, false)?.data.len();
            file.size = (chunk_count - 1) * chunk_size + last;
        }
        debug!(bucket, key, chunk_count, size = file.size, "file opened");
        Ok(file)
    }
}

impl RFile {
    pub fn key(&self) -> &str {
        self.root.key()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn content_type(&self) -> &str {
        &self.root.content_type
    }

    pub fn vtag(&self) -> &str {
        &self.root.vtag
    }

    /// Last modification of the root object.
    pub fn last_modified(&self) -> SystemTime {
        UNIX_EPOCH
            + Duration::from_secs(u64::from(self.root.last_mod))
            + Duration::from_micros(u64::from(self.root.last_mod_usecs))
    }

    /// Returns chunk `index`, loading it or starting a new one as needed.
    fn chunk_at(&mut self, index: usize, create: bool) -> ClientResult<&mut RObject> {
        let key = chunk_key(self.root.key(), index);
        let chunk = match self.chunk.take() {
            Some(chunk) if chunk.key == key => chunk,
            _ if create => {
                let mut chunk = self
                    .client
                    .new_object_in(self.root.bucket(), &key)
                    .with_options(self.root.options);
                chunk.content_type = self.root.content_type.clone();
                chunk
            }
            _ => self.client.get_from(self.root.bucket(), &key, self.root.options)?,
        };
        Ok(self.chunk.insert(chunk))
    }

    fn write_chunk(&mut self, buf: &[u8]) -> ClientResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let index = self.pos / self.chunk_size;
        let offset = self.pos % self.chunk_size;
        let len = buf.len().min(self.chunk_size - offset);
        let exists = index * self.chunk_size < self.size;

        let chunk = self.chunk_at(index, !exists)?;
        let end = offset + len;
        if chunk.data.len() < end {
            chunk.data.resize(end, 0);
        }
        chunk.data[offset..end].copy_from_slice(&buf[..len]);
        chunk.store()?;

        self.pos += len;
        if self.pos > self.size {
            if !exists {
                self.root
                    .meta
                    .insert(META_CHUNK_COUNT.to_string(), (index + 1).to_string());
                self.root.store()?;
            }
            self.size = self.pos;
        }
        Ok(len)
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> ClientResult<usize> {
        if buf.is_empty() || self.pos >= self.size {
            return Ok(0);
        }
        let index = self.pos / self.chunk_size;
        let offset = self.pos % self.chunk_size;
        let chunk = self.chunk_at(index, false)?;
        let available = chunk.data.len().saturating_sub(offset);
        let len = buf.len().min(available);
        buf[..len].copy_from_slice(&chunk.data[offset..offset + len]);
        self.pos += len;
        Ok(len)
    }
}

fn to_io(err: ClientError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

impl Read for RFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_chunk(buf).map_err(to_io)
    }
}

impl Write for RFile {
    /// Writes up to the end of the current chunk.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_chunk(buf).map_err(to_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for RFile {
    /// Positions past the end of the file are rejected.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(offset) => self.pos as i128 + i128::from(offset),
            SeekFrom::End(offset) => self.size as i128 + i128::from(offset),
        };
        if target < 0 || target > self.size as i128 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek to {target} outside file of {} bytes", self.size),
            ));
        }
        self.pos = target as usize;
        Ok(self.pos as u64)
    }
}
