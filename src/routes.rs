use crate::{Error, HandlerResult, PeerContext, Request};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Content handler for a location
pub type Handler<D> = dyn Fn(&mut Request<'_, D>) -> HandlerResult + Send + Sync + 'static;

/// Peer resolver for an upstream.  `Ok(None)` declines the request.
pub type PeerResolver<D> =
    dyn Fn(&PeerContext<'_, D>) -> anyhow::Result<Option<SocketAddr>> + Send + Sync + 'static;

/// Immutable table of application callbacks
///
/// Built once at startup with [`RoutesBuilder`], then shared through an
/// `Arc` by every worker.  Handlers are keyed by the engine's location
/// id and resolvers by the engine's upstream id.
///
/// [`RoutesBuilder`]: struct.RoutesBuilder.html
pub struct Routes<D: 'static> {
    handlers: HashMap<u64, Box<Handler<D>>>,
    resolvers: HashMap<u64, Box<PeerResolver<D>>>,
}

impl<D: 'static> Routes<D> {
    pub fn builder() -> RoutesBuilder<D> {
        RoutesBuilder {
            routes: Routes {
                handlers: HashMap::new(),
                resolvers: HashMap::new(),
            },
            duplicate: None,
        }
    }

    pub fn handler(&self, location_id: u64) -> Option<&Handler<D>> {
        self.handlers.get(&location_id).map(|h| &**h)
    }

    pub fn resolver(&self, upstream_id: u64) -> Option<&PeerResolver<D>> {
        self.resolvers.get(&upstream_id).map(|r| &**r)
    }
}

/// Builder for [`Routes`]
///
/// [`Routes`]: struct.Routes.html
pub struct RoutesBuilder<D: 'static> {
    routes: Routes<D>,
    duplicate: Option<Error>,
}

impl<D: 'static> RoutesBuilder<D> {
    /// Register the content handler for a location id
    pub fn handler(
        mut self,
        location_id: u64,
        f: impl Fn(&mut Request<'_, D>) -> HandlerResult + Send + Sync + 'static,
    ) -> Self {
        if self.routes.handlers.insert(location_id, Box::new(f)).is_some() {
            self.note_duplicate("handler", location_id);
        }
        self
    }

    /// Register the peer resolver for an upstream id
    pub fn resolver(
        mut self,
        upstream_id: u64,
        f: impl Fn(&PeerContext<'_, D>) -> anyhow::Result<Option<SocketAddr>> + Send + Sync + 'static,
    ) -> Self {
        if self.routes.resolvers.insert(upstream_id, Box::new(f)).is_some() {
            self.note_duplicate("resolver", upstream_id);
        }
        self
    }

    fn note_duplicate(&mut self, kind: &'static str, id: u64) {
        if self.duplicate.is_none() {
            self.duplicate = Some(Error::DuplicateRoute { kind, id });
        }
    }

    /// Freeze the table.  Fails on the first id registered twice.
    pub fn build(self) -> Result<Arc<Routes<D>>, Error> {
        match self.duplicate {
            Some(e) => Err(e),
            None => Ok(Arc::new(self.routes)),
        }
    }
}
