use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use futures::{StreamExt, future, stream};
use kube::ResourceExt;
use tokio::sync::{Mutex, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, object_key};
use crate::store::{ListParams, ObjectStore, StoreObject, WatchEvent, WatchStream};

const DEFAULT_HISTORY: usize = 1024;

struct State<K> {
    objects: BTreeMap<(String, String), K>,
    version: u64,
    /// Recent events, oldest first, tagged with the version they committed at.
    history: VecDeque<(u64, WatchEvent<K>)>,
    /// Highest version dropped from `history`.
    compacted: u64,
}

/// In-process store with api-server semantics: monotonically increasing
/// resource versions, optimistic concurrency and resumable watches.
pub struct MemoryStore<K: StoreObject> {
    state: Mutex<State<K>>,
    sender: broadcast::Sender<WatchEvent<K>>,
    history_limit: usize,
}

impl<K: StoreObject> Default for MemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: StoreObject> MemoryStore<K> {
    pub fn new() -> Self {
        Self::with_history(DEFAULT_HISTORY)
    }

    pub fn with_history(history_limit: usize) -> Self {
        let (sender, _) = broadcast::channel(history_limit.max(1));
        Self {
            state: Mutex::new(State {
                objects: BTreeMap::new(),
                version: 0,
                history: VecDeque::new(),
                compacted: 0,
            }),
            sender,
            history_limit: history_limit.max(1),
        }
    }

    /// Number of open watch streams.
    pub fn watcher_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn kind() -> String {
        K::kind(&()).to_string()
    }

    fn commit(&self, state: &mut State<K>, version: u64, event: WatchEvent<K>) {
        state.history.push_back((version, event.clone()));
        while state.history.len() > self.history_limit {
            if let Some((v, _)) = state.history.pop_front() {
                state.compacted = v;
            }
        }
        // no receivers is fine
        let _ = self.sender.send(event);
    }

    /// Optimistic replace of either the main resource or its status.
    async fn write(&self, obj: K, status_only: bool) -> Result<K, StoreError> {
        let mut state = self.state.lock().await;
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.meta().name.clone().unwrap_or_default();
        let key = (namespace.clone(), name.clone());

        let current = state.objects.get(&key).ok_or_else(|| StoreError::NotFound {
            kind: Self::kind(),
            key: object_key(&namespace, &name),
        })?;

        if let Some(expected) = obj.meta().resource_version.as_deref()
            && current.meta().resource_version.as_deref() != Some(expected)
        {
            return Err(StoreError::Conflict {
                kind: Self::kind(),
                key: object_key(&namespace, &name),
                message: format!(
                    "expected resource version {}, found {}",
                    expected,
                    current.meta().resource_version.as_deref().unwrap_or("")
                ),
            });
        }

        let generation = current.meta().generation.unwrap_or(1);
        let mut next = if status_only {
            with_status_of(current, Some(&obj))?
        } else {
            let mut next = with_status_of(&obj, Some(current))?;
            let meta = next.meta_mut();
            meta.uid = current.meta().uid.clone();
            meta.generation = Some(generation + 1);
            next
        };

        state.version += 1;
        let version = state.version;
        next.meta_mut().resource_version = Some(version.to_string());

        state.objects.insert(key, next.clone());
        self.commit(&mut state, version, WatchEvent::Modified(next.clone()));

        Ok(next)
    }
}

fn generated_suffix() -> String {
    Uuid::new_v4().as_simple().to_string().chars().take(5).collect()
}

/// `obj` carrying the status of `source`, or no status at all.
///
/// The api server keeps the status subresource apart from the rest of the
/// object, so every write goes through here to take one side from each.
fn with_status_of<K: StoreObject>(obj: &K, source: Option<&K>) -> Result<K, StoreError> {
    let invalid = |e: serde_json::Error| StoreError::Invalid(e.to_string());

    let mut value = serde_json::to_value(obj).map_err(invalid)?;
    let status = match source {
        Some(source) => serde_json::to_value(source)
            .map_err(invalid)?
            .get_mut("status")
            .map(serde_json::Value::take),
        None => None,
    };

    if let Some(fields) = value.as_object_mut() {
        match status {
            Some(status) if !status.is_null() => {
                fields.insert("status".to_string(), status);
            }
            _ => {
                fields.remove("status");
            }
        }
    }

    serde_json::from_value(value).map_err(invalid)
}

fn parse_version(rv: &str) -> Result<u64, StoreError> {
    rv.parse::<u64>()
        .map_err(|_| StoreError::Invalid(format!("malformed resource version {:?}", rv)))
}

#[async_trait]
impl<K: StoreObject> ObjectStore<K> for MemoryStore<K> {
    async fn create(&self, obj: K) -> Result<K, StoreError> {
        let mut obj = with_status_of(&obj, None)?;
        let mut state = self.state.lock().await;
        let namespace = obj.namespace().unwrap_or_default();

        let name = match obj.meta().name.clone().filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => {
                let prefix = obj.meta().generate_name.clone().ok_or_else(|| {
                    StoreError::Invalid("name or generateName is required".to_string())
                })?;
                loop {
                    let candidate = format!("{}{}", prefix, generated_suffix());
                    if !state
                        .objects
                        .contains_key(&(namespace.clone(), candidate.clone()))
                    {
                        break candidate;
                    }
                }
            }
        };

        let key = (namespace.clone(), name.clone());
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: Self::kind(),
                key: object_key(&namespace, &name),
            });
        }

        state.version += 1;
        let version = state.version;
        let meta = obj.meta_mut();
        meta.name = Some(name);
        meta.uid = Some(Uuid::new_v4().to_string());
        meta.resource_version = Some(version.to_string());
        meta.generation = Some(1);

        state.objects.insert(key, obj.clone());
        self.commit(&mut state, version, WatchEvent::Added(obj.clone()));

        Ok(obj)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        let state = self.state.lock().await;
        state
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: Self::kind(),
                key: object_key(namespace, name),
            })
    }

    async fn list(&self, params: &ListParams) -> Result<Vec<K>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .objects
            .values()
            .filter(|o| params.matches(*o))
            .cloned()
            .collect())
    }

    async fn update(&self, obj: K) -> Result<K, StoreError> {
        self.write(obj, false).await
    }

    async fn update_status(&self, obj: K) -> Result<K, StoreError> {
        self.write(obj, true).await
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let mut removed = state
            .objects
            .remove(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| StoreError::NotFound {
                kind: Self::kind(),
                key: object_key(namespace, name),
            })?;

        state.version += 1;
        let version = state.version;
        removed.meta_mut().resource_version = Some(version.to_string());
        self.commit(&mut state, version, WatchEvent::Deleted(removed));

        Ok(())
    }

    async fn watch(&self, params: &ListParams) -> Result<WatchStream<K>, StoreError> {
        let state = self.state.lock().await;

        let since = match params.resource_version.as_deref() {
            Some(rv) => parse_version(rv)?,
            None => state.version,
        };
        if since < state.compacted {
            return Err(StoreError::Expired(format!(
                "version {} is older than the oldest retained version {}",
                since,
                state.compacted + 1
            )));
        }

        let replay: Vec<_> = state
            .history
            .iter()
            .filter(|(v, ev)| *v > since && params.matches(ev.object()))
            .map(|(_, ev)| Ok(ev.clone()))
            .collect();

        // subscribed under the lock, so nothing falls between replay and live
        let receiver = self.sender.subscribe();
        drop(state);

        debug!(
            "Opened {} watch at version {} replaying {} events",
            Self::kind(),
            since,
            replay.len()
        );

        let filter = params.clone();
        let live = BroadcastStream::new(receiver).filter_map(move |item| {
            let out = match item {
                Ok(ev) => {
                    let newer = ev
                        .object()
                        .meta()
                        .resource_version
                        .as_deref()
                        .and_then(|rv| rv.parse::<u64>().ok())
                        .is_none_or(|v| v > since);
                    (newer && filter.matches(ev.object())).then_some(Ok(ev))
                }
                Err(BroadcastStreamRecvError::Lagged(n)) => Some(Err(StoreError::WatchLagged(n))),
            };
            future::ready(out)
        });

        Ok(stream::iter(replay).chain(live).boxed())
    }
}
