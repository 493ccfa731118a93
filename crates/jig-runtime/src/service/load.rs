//! Loading objects by ledger location.
//!
//! Resolution order: arena, then state cache, then fetch and import the
//! transaction that created the location. Callers hold the load queue.

use super::Inner;
use crate::domain::entities::{CodeRecord, JigState};
use crate::domain::state::CachedState;
use crate::domain::value::{wire_tokens, Value};
use crate::domain::value_objects::{CodeId, Handle, Location};
use crate::errors::JigError;
use futures::future::{BoxFuture, FutureExt};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

impl Inner {
    /// Loads the object at `location`. Must run under the load queue.
    pub(super) fn load_inner(self: &Arc<Self>, location: Location) -> BoxFuture<'_, Result<Handle, JigError>> {
        async move {
            if !location.is_ledger() {
                return Err(JigError::validation(format!("cannot load {location}")));
            }
            if let Some(handle) = self.kernel.lock().arena.lookup_location(&location) {
                return Ok(handle);
            }
            if let Some(state) = self.cache.get(&location).await? {
                debug!(location = %location, "loading from cache");
                return self.install(location, state).await;
            }
            let (txid, _) = location
                .outpoint()
                .ok_or_else(|| JigError::validation(format!("cannot load {location}")))?;
            let fetched = self.ledger.fetch(&txid).await?;
            self.import_fetched(&fetched).await?;
            self.kernel
                .lock()
                .arena
                .lookup_location(&location)
                .ok_or_else(|| JigError::UnknownObject(location.to_string()))
        }
        .boxed()
    }

    /// Loads every ledger location among `tokens`.
    pub(super) async fn load_tokens(
        self: &Arc<Self>,
        tokens: impl IntoIterator<Item = String>,
    ) -> Result<HashMap<String, Handle>, JigError> {
        let mut out = HashMap::new();
        for token in tokens {
            if out.contains_key(&token) {
                continue;
            }
            let location: Location = token.parse()?;
            if location.is_ledger() {
                let handle = self.load_inner(location).await?;
                out.insert(token, handle);
            }
        }
        Ok(out)
    }

    async fn install(self: &Arc<Self>, location: Location, state: CachedState) -> Result<Handle, JigError> {
        match state {
            CachedState::Code {
                text,
                deps,
                props,
                owner,
            } => self.install_code(location, text, deps, props, owner).await,
            CachedState::Jig {
                class,
                origin,
                owner,
                satoshis,
                props,
            } => {
                let handle = {
                    let mut kernel = self.kernel.lock();
                    if let Some(Handle::Jig(existing)) = kernel.arena.lookup_origin(&origin) {
                        let current = kernel.arena.jig(existing)?.location.clone();
                        return Err(JigError::conflict(format!(
                            "{origin} is loaded at {current}, not {location}"
                        )));
                    }
                    let handle = Handle::Jig(kernel.arena.alloc_jig());
                    kernel.arena.reserve_location(location.clone(), handle);
                    handle
                };
                let result = self
                    .install_jig(handle, location.clone(), class, origin, owner, satoshis, props)
                    .await;
                if result.is_err() {
                    self.kernel.lock().arena.release_location(&location, handle);
                }
                result.map(|()| handle)
            }
        }
    }

    async fn install_code(
        self: &Arc<Self>,
        location: Location,
        text: String,
        dep_locations: BTreeMap<String, Location>,
        props: serde_json::Value,
        owner: String,
    ) -> Result<Handle, JigError> {
        let mut deps = BTreeMap::new();
        for (name, dep) in dep_locations {
            let id = self
                .load_inner(dep)
                .await?
                .as_code()
                .ok_or_else(|| JigError::validation(format!("dependency {name} is not code")))?;
            deps.insert(name, id);
        }
        let fields = self.decode_fields(&props).await?;
        let env: BTreeSet<String> = deps.keys().cloned().collect();
        let class = self.evaluator.evaluate(&text, &env)?;
        let parent = class
            .parent()
            .map(|p| {
                deps.get(p)
                    .copied()
                    .ok_or_else(|| JigError::validation(format!("parent {p} not provided")))
            })
            .transpose()?;

        let mut kernel = self.kernel.lock();
        if let Some(handle) = kernel.arena.lookup_location(&location) {
            return Ok(handle);
        }
        let id: CodeId = kernel.arena.alloc_code();
        kernel.arena.put_code(
            id,
            CodeRecord {
                class,
                parent,
                deps,
                props: fields,
                origin: location.clone(),
                location,
                owner,
            },
        );
        debug!(code = %id, name = %kernel.arena.class_name(id), "code installed from cache");
        Ok(Handle::Code(id))
    }

    #[allow(clippy::too_many_arguments)]
    async fn install_jig(
        self: &Arc<Self>,
        handle: Handle,
        location: Location,
        class: Location,
        origin: Location,
        owner: String,
        satoshis: u64,
        props: serde_json::Value,
    ) -> Result<(), JigError> {
        let class = self
            .load_inner(class)
            .await?
            .as_code()
            .ok_or_else(|| JigError::validation(format!("class of {location} is not code")))?;
        let fields = self.decode_fields(&props).await?;
        let id = handle
            .as_jig()
            .ok_or_else(|| JigError::Internal("jig reservation holds code".to_string()))?;
        let mut kernel = self.kernel.lock();
        kernel.arena.put_jig(
            id,
            JigState {
                class,
                origin,
                location,
                owner,
                satoshis,
                fields,
            },
        );
        debug!(jig = %id, "jig installed from cache");
        Ok(())
    }

    async fn decode_fields(self: &Arc<Self>, props: &serde_json::Value) -> Result<BTreeMap<String, Value>, JigError> {
        let mut tokens = Vec::new();
        wire_tokens(props, &mut tokens);
        let handles = self.load_tokens(tokens).await?;
        let value = Value::from_wire(props, &mut |token| {
            handles
                .get(token)
                .copied()
                .ok_or_else(|| JigError::validation(format!("cached reference {token} is not absolute")))
        })?;
        match value {
            Value::Map(fields) => Ok(fields),
            _ => Err(JigError::validation("cached props must be a map")),
        }
    }
}
