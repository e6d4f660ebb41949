//! In-memory remote directory for tests.

use async_trait::async_trait;
use bytes::Bytes;
use ferry_core::{Area, RemoteEntry};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::directory::{Relocation, RemoteDirectory, RemoteStream};
use crate::error::{RemoteError, RemoteResult};

struct State {
    /// Folder name -> entries in listing order.
    folders: HashMap<String, Vec<RemoteEntry>>,
    contents: HashMap<String, Bytes>,
    failing_relocations: HashSet<String>,
    /// Entries whose relocation reports `AlreadyInPlace` without moving them.
    stuck_relocations: HashSet<String>,
    /// Identity -> number of bytes served before the stream breaks.
    read_faults: HashMap<String, usize>,
    failing_listings: usize,
    /// Size of the pieces the body stream is cut into.
    piece_size: usize,
    relocations: Vec<(String, Area)>,
    opened_streams: usize,
}

/// Remote directory backed by a map of folders. Areas map to folders named
/// after them (`duplicates`, `documents`, `download`).
#[derive(Clone)]
pub struct MemoryDirectory {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                folders: HashMap::new(),
                contents: HashMap::new(),
                failing_relocations: HashSet::new(),
                stuck_relocations: HashSet::new(),
                read_faults: HashMap::new(),
                failing_listings: 0,
                piece_size: 4096,
                relocations: Vec::new(),
                opened_streams: 0,
            })),
        }
    }
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Folder name an area maps to.
    pub fn area_folder(area: Area) -> String {
        area.to_string()
    }

    /// Add a file with content; its listed size is the content length.
    pub fn add_file(
        &self,
        folder: &str,
        identity_key: &str,
        name: &str,
        mime_type: &str,
        content: impl Into<Bytes>,
    ) {
        let content = content.into();
        let entry = RemoteEntry::new(identity_key, name, Some(content.len() as u64), mime_type);
        let mut state = self.lock();
        state.folders.entry(folder.to_string()).or_default().push(entry);
        state.contents.insert(identity_key.to_string(), content);
    }

    /// Add an entry exactly as given. Content is `size_bytes` zero bytes.
    pub fn add_entry(&self, folder: &str, entry: RemoteEntry) {
        let content = Bytes::from(vec![0u8; entry.size_bytes.unwrap_or(0) as usize]);
        let mut state = self.lock();
        state
            .contents
            .insert(entry.identity_key.clone(), content);
        state.folders.entry(folder.to_string()).or_default().push(entry);
    }

    pub fn entries(&self, folder: &str) -> Vec<RemoteEntry> {
        self.lock().folders.get(folder).cloned().unwrap_or_default()
    }

    /// Every successful move, in call order.
    pub fn relocations(&self) -> Vec<(String, Area)> {
        self.lock().relocations.clone()
    }

    pub fn relocations_to(&self, area: Area) -> usize {
        self.lock().relocations.iter().filter(|(_, a)| *a == area).count()
    }

    pub fn opened_streams(&self) -> usize {
        self.lock().opened_streams
    }

    pub fn fail_relocation(&self, identity_key: &str) {
        self.lock().failing_relocations.insert(identity_key.to_string());
    }

    pub fn heal_relocation(&self, identity_key: &str) {
        self.lock().failing_relocations.remove(identity_key);
    }

    /// Make relocation of `identity_key` answer `AlreadyInPlace` while the
    /// entry stays where it is, like a Drive file with several parents.
    pub fn stick_relocation(&self, identity_key: &str) {
        self.lock().stuck_relocations.insert(identity_key.to_string());
    }

    /// Break the content stream of `identity_key` after `bytes` bytes.
    pub fn fail_reads_after(&self, identity_key: &str, bytes: usize) {
        self.lock().read_faults.insert(identity_key.to_string(), bytes);
    }

    pub fn heal_reads(&self, identity_key: &str) {
        self.lock().read_faults.remove(identity_key);
    }

    /// Make the next `count` listings fail with a 503.
    pub fn fail_listings(&self, count: usize) {
        self.lock().failing_listings = count;
    }

    pub fn set_piece_size(&self, piece_size: usize) {
        self.lock().piece_size = piece_size.max(1);
    }
}

#[async_trait]
impl RemoteDirectory for MemoryDirectory {
    async fn list(&self, location: &str) -> RemoteResult<Vec<RemoteEntry>> {
        let mut state = self.lock();
        if state.failing_listings > 0 {
            state.failing_listings -= 1;
            return Err(RemoteError::Status {
                status: 503,
                message: "injected listing failure".to_string(),
            });
        }
        Ok(state.folders.get(location).cloned().unwrap_or_default())
    }

    async fn relocate(&self, identity_key: &str, area: Area) -> RemoteResult<Relocation> {
        let mut state = self.lock();
        if state.failing_relocations.contains(identity_key) {
            return Err(RemoteError::Status {
                status: 500,
                message: format!("injected relocation failure for {identity_key}"),
            });
        }
        if state.stuck_relocations.contains(identity_key) {
            return Ok(Relocation::AlreadyInPlace);
        }

        let destination = Self::area_folder(area);
        let mut found: Option<(String, usize)> = None;
        for (folder, entries) in state.folders.iter() {
            if let Some(index) = entries.iter().position(|e| e.identity_key == identity_key) {
                found = Some((folder.clone(), index));
                break;
            }
        }

        match found {
            None => Ok(Relocation::Missing),
            Some((folder, _)) if folder == destination => Ok(Relocation::AlreadyInPlace),
            Some((folder, index)) => {
                let entry = match state.folders.get_mut(&folder) {
                    Some(entries) => entries.remove(index),
                    None => return Ok(Relocation::Missing),
                };
                state.folders.entry(destination).or_default().push(entry);
                state.relocations.push((identity_key.to_string(), area));
                Ok(Relocation::Moved)
            }
        }
    }

    async fn open_stream(&self, identity_key: &str) -> RemoteResult<RemoteStream> {
        let mut state = self.lock();
        let content = state
            .contents
            .get(identity_key)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(identity_key.to_string()))?;
        state.opened_streams += 1;

        let piece_size = state.piece_size;
        let break_after = state.read_faults.get(identity_key).copied();
        let content_length = Some(content.len() as u64);

        let mut items: Vec<RemoteResult<Bytes>> = Vec::new();
        let mut offset = 0usize;
        while offset < content.len() {
            if let Some(limit) = break_after {
                if offset >= limit {
                    break;
                }
            }
            let end = (offset + piece_size).min(content.len());
            let end = match break_after {
                Some(limit) if limit > offset => end.min(limit),
                _ => end,
            };
            items.push(Ok(content.slice(offset..end)));
            offset = end;
        }
        if let Some(limit) = break_after {
            items.push(Err(RemoteError::Stream {
                bytes_read: limit.min(content.len()) as u64,
                message: "injected connection reset".to_string(),
            }));
        }

        Ok(RemoteStream {
            content_length,
            body: futures::stream::iter(items).boxed(),
        })
    }
}
