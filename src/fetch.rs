//! Content-fetch collaborator interface and an in-memory implementation.
//!
//! The store owns resource transfer and locality; the queue controller only
//! ever requests a fetch, watches status/data streams, and hands a fully
//! local path to the player. Fetch subscriptions are cancellable and
//! disposing one is idempotent.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::protocol::ResourceRef;

/// Locality of a resource as reported by the content store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResourceStatus {
    /// Fully available on disk.
    Local,
    /// Known upstream but not being transferred.
    Remote,
    /// Transfer in flight.
    Fetching { progress: f32 },
}

/// On-disk availability snapshot for a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceData {
    pub complete: bool,
    pub path: PathBuf,
}

/// Cancellable handle for one in-flight fetch request.
///
/// Dropping the subscription cancels the transfer. `dispose` may be called
/// any number of times, including when nothing is in flight.
pub struct FetchSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl FetchSubscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Subscription with nothing in flight.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn dispose(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for FetchSubscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// External collaborator owning resource transfer and local storage.
pub trait ContentStore: Send + Sync {
    /// Starts (or joins) a transfer for the resource.
    fn fetch(&self, resource: &ResourceRef) -> FetchSubscription;

    /// Stream of locality changes; the current status is emitted first.
    fn resource_status(&self, resource: &ResourceRef) -> Receiver<ResourceStatus>;

    /// Stream of availability snapshots; a complete resource is emitted
    /// immediately.
    fn resource_data(&self, resource: &ResourceRef) -> Receiver<ResourceData>;
}

struct ResourceState {
    path: PathBuf,
    local: bool,
    fetching: Option<f32>,
    status_watchers: Vec<Sender<ResourceStatus>>,
    data_watchers: Vec<Sender<ResourceData>>,
}

impl ResourceState {
    fn status(&self) -> ResourceStatus {
        if self.local {
            ResourceStatus::Local
        } else if let Some(progress) = self.fetching {
            ResourceStatus::Fetching { progress }
        } else {
            ResourceStatus::Remote
        }
    }

    fn broadcast_status(&mut self) {
        let status = self.status();
        self.status_watchers
            .retain(|watcher| watcher.send(status).is_ok());
    }

    fn broadcast_data(&mut self) {
        let data = ResourceData {
            complete: self.local,
            path: self.path.clone(),
        };
        self.data_watchers
            .retain(|watcher| watcher.send(data.clone()).is_ok());
    }
}

type ResourceMap = Arc<Mutex<HashMap<ResourceRef, ResourceState>>>;

fn with_state(
    resources: &ResourceMap,
    resource: &ResourceRef,
    apply: impl FnOnce(&mut ResourceState),
) {
    let mut resources = resources.lock().expect("content store poisoned");
    let state = resources
        .entry(resource.clone())
        .or_insert_with(|| ResourceState {
            path: PathBuf::new(),
            local: false,
            fetching: None,
            status_watchers: Vec::new(),
            data_watchers: Vec::new(),
        });
    apply(state);
}

/// In-process content store with manually driven transfers.
///
/// Local resources resolve immediately; remote resources report `Remote`
/// until fetched, then progress through the stages pushed via
/// [`MemoryContentStore::advance_fetch`] and
/// [`MemoryContentStore::complete_fetch`].
pub struct MemoryContentStore {
    resources: ResourceMap,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self {
            resources: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers a resource already complete on disk.
    pub fn add_local(&self, resource: ResourceRef, path: impl Into<PathBuf>) {
        with_state(&self.resources, &resource, |state| {
            state.path = path.into();
            state.local = true;
        });
    }

    /// Registers a resource that must be fetched before playback.
    pub fn add_remote(&self, resource: ResourceRef, path: impl Into<PathBuf>) {
        with_state(&self.resources, &resource, |state| {
            state.path = path.into();
            state.local = false;
        });
    }

    /// Reports transfer progress to status watchers.
    pub fn advance_fetch(&self, resource: &ResourceRef, progress: f32) {
        with_state(&self.resources, resource, |state| {
            if !state.local {
                state.fetching = Some(progress);
                state.broadcast_status();
            }
        });
    }

    /// Marks the transfer finished and the resource local.
    pub fn complete_fetch(&self, resource: &ResourceRef) {
        with_state(&self.resources, resource, |state| {
            state.fetching = None;
            state.local = true;
            state.broadcast_status();
            state.broadcast_data();
        });
    }
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentStore for MemoryContentStore {
    fn fetch(&self, resource: &ResourceRef) -> FetchSubscription {
        let mut already_local = false;
        with_state(&self.resources, resource, |state| {
            if state.local {
                already_local = true;
            } else if state.fetching.is_none() {
                state.fetching = Some(0.0);
                state.broadcast_status();
            }
        });
        if already_local {
            return FetchSubscription::noop();
        }

        debug!("MemoryContentStore: fetch started for {:?}", resource);
        let resources = Arc::clone(&self.resources);
        let resource = resource.clone();
        FetchSubscription::new(move || {
            with_state(&resources, &resource, |state| {
                if !state.local && state.fetching.is_some() {
                    state.fetching = None;
                    state.broadcast_status();
                }
            });
        })
    }

    fn resource_status(&self, resource: &ResourceRef) -> Receiver<ResourceStatus> {
        let (sender, receiver) = mpsc::channel();
        with_state(&self.resources, resource, |state| {
            let _ = sender.send(state.status());
            state.status_watchers.push(sender);
        });
        receiver
    }

    fn resource_data(&self, resource: &ResourceRef) -> Receiver<ResourceData> {
        let (sender, receiver) = mpsc::channel();
        with_state(&self.resources, resource, |state| {
            if state.local {
                let _ = sender.send(ResourceData {
                    complete: true,
                    path: state.path.clone(),
                });
            }
            state.data_watchers.push(sender);
        });
        receiver
    }
}
