//! Context properties and the sink capabilities they may offer.

use std::sync::Arc;

use super::Context;
use crate::object::RemoteObject;
use crate::sink::SinkRef;

/// A named policy attached to a [`Context`].
///
/// A property opts into chain construction by returning a contributor from
/// one of the accessors. A contributor that then produces no sink is a
/// configuration error.
pub trait ContextProperty: Send + Sync {
	fn name(&self) -> &str;

	/// Called once when the owning context is frozen.
	fn freeze(&self, _context: &Context) {}

	fn server_contributor(&self) -> Option<&dyn ContributeServerContextSink> {
		None
	}

	fn client_contributor(&self) -> Option<&dyn ContributeClientContextSink> {
		None
	}

	fn envoy_contributor(&self) -> Option<&dyn ContributeEnvoySink> {
		None
	}

	fn object_contributor(&self) -> Option<&dyn ContributeObjectSink> {
		None
	}
}

/// Intercepts calls entering the context.
pub trait ContributeServerContextSink {
	fn server_context_sink(&self, next: SinkRef) -> Option<SinkRef>;
}

/// Intercepts calls leaving the context.
pub trait ContributeClientContextSink {
	fn client_context_sink(&self, next: SinkRef) -> Option<SinkRef>;
}

/// Intercepts calls on the client side of a proxy to an object in the context.
pub trait ContributeEnvoySink {
	fn envoy_sink(&self, object: &Arc<dyn RemoteObject>, next: SinkRef) -> Option<SinkRef>;
}

/// Intercepts calls to one object in the context.
pub trait ContributeObjectSink {
	fn object_sink(&self, object: &Arc<dyn RemoteObject>, next: SinkRef) -> Option<SinkRef>;
}
