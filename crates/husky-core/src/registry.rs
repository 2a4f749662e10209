//! Message id → typed handler bindings.
//!
//! Each binding fixes its argument type when it is registered. Resolving an
//! inbound envelope deserializes `Data` into that type once and yields a
//! ready-to-run [`DispatchItem`].

use crate::context::Context;
use crate::dispatch::DispatchItem;
use crate::error::{HuskyError, HuskyResult};
use crate::route::split;
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Runs before a handler; may call [`Context::fail`] to skip it.
pub type Hook = Arc<dyn Fn(&mut Context) + Send + Sync>;

type Job = Box<dyn FnOnce(&mut Context) + Send>;
type Binder = Arc<dyn Fn(&str) -> HuskyResult<Job> + Send + Sync>;

struct Binding {
    binder: Binder,
    hook: Option<Hook>,
}

/// Registered handlers, keyed by message name.
#[derive(Default)]
pub struct HandlerRegistry {
    bindings: HashMap<String, Binding>,
    /// Service names this process answers to (`<service>.<message>` ids).
    services: Vec<String>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also accept ids prefixed with `name`, e.g. `gateway.HeartBeat`.
    pub fn serve_as(&mut self, name: impl Into<String>) -> &mut Self {
        self.services.push(name.into());
        self
    }

    /// Bind `handler` to `id`. Its arguments are deserialized from `Data`;
    /// a missing or `null` body is read as `{}`.
    pub fn bind<A, F>(&mut self, id: impl Into<String>, handler: F) -> &mut Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(&mut Context, A) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let binder: Binder = Arc::new(move |data: &str| {
            let args: A = serde_json::from_str(data)?;
            let handler = handler.clone();
            Ok(Box::new(move |ctx: &mut Context| (*handler)(ctx, args)) as Job)
        });

        let id = id.into();
        if self.bindings.contains_key(&id) {
            warn!(msg_id = %id, "handler rebound");
        }
        self.bindings.insert(id, Binding { binder, hook: None });
        self
    }

    /// Attach a hook to an already bound id.
    pub fn hook<F>(&mut self, id: &str, hook: F) -> &mut Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        match self.bindings.get_mut(id) {
            Some(binding) => binding.hook = Some(Arc::new(hook)),
            None => warn!(msg_id = %id, "hook for unbound message ignored"),
        }
        self
    }

    /// Whether `id` resolves to a binding, directly or through a local
    /// service prefix.
    pub fn contains(&self, id: &str) -> bool {
        self.lookup(id).is_some()
    }

    /// Build the dispatch item for `ctx.msg_id` with the given body.
    ///
    /// Sets `ctx.match_server` when the id matched through a local service
    /// prefix.
    pub fn resolve(&self, mut ctx: Context, data: Option<&RawValue>) -> HuskyResult<DispatchItem> {
        let (binding, matched) = self
            .lookup(&ctx.msg_id)
            .ok_or_else(|| HuskyError::UnknownMessage(ctx.msg_id.clone()))?;

        let text = match data.map(RawValue::get) {
            None | Some("null") => "{}",
            Some(text) => text,
        };
        let job = (binding.binder)(text)?;

        if let Some(server) = matched {
            ctx.match_server = server;
        }
        let item = DispatchItem::new(ctx, job);
        Ok(match &binding.hook {
            Some(hook) => item.with_hook(hook.clone()),
            None => item,
        })
    }

    fn lookup(&self, id: &str) -> Option<(&Binding, Option<String>)> {
        if let Some(binding) = self.bindings.get(id) {
            return Some((binding, None));
        }
        let (server, message) = split(id);
        if server.is_empty() || !self.services.iter().any(|s| s == server) {
            return None;
        }
        self.bindings
            .get(message)
            .map(|binding| (binding, Some(server.to_string())))
    }
}
