//! Marshaling services: publishing objects and obtaining proxies to them.

use std::sync::Arc;

use tracing::{debug, info};

use crate::channel::CrossContextSink;
use crate::channel::cross_domain;
use crate::context::Context;
use crate::domain::Domain;
use crate::error::{RemotingError, Result};
use crate::identity::{IdOps, IdentityFlags};
use crate::message::{Message, MethodCall, ReturnMessage};
use crate::object::RemoteObject;
use crate::objref::ObjRef;
use crate::proxy::Proxy;
use crate::sink::SinkRef;
use crate::terminator::ServerObjectTerminatorSink;

impl Domain {
	/// Publishes `object` from the current context (or this domain's default
	/// context when the current context belongs elsewhere).
	pub fn marshal(&self, object: &Arc<dyn RemoteObject>, uri: Option<&str>) -> Result<ObjRef> {
		let current = Context::current();
		let context = if current.domain_id() == self.id() {
			current
		} else {
			self.default_context().clone()
		};
		self.marshal_in(object, uri, &context)
	}

	/// Publishes `object` as hosted in `context`.
	///
	/// The returned reference carries fresh channel data on every call.
	pub fn marshal_in(&self, object: &Arc<dyn RemoteObject>, uri: Option<&str>, context: &Arc<Context>) -> Result<ObjRef> {
		if context.domain_id() != self.id() {
			return Err(RemotingError::InvalidArgument(format!(
				"context {} belongs to domain {}, not {}",
				context.id(),
				context.domain_id(),
				self.id()
			)));
		}
		let identity = self
			.identities()
			.find_or_create_server_identity(object, context, uri, IdOps::STRONG_IDENTITY | IdOps::GENERATE_URI)?;
		let uri = identity.uri().ok_or(RemotingError::Internal)?;
		let hosting = identity.server().map_or(context, |server| server.context());
		let objref = ObjRef {
			uri: uri.clone(),
			type_name: object.type_descriptor().name().to_string(),
			channel_data: self.channels().channel_data(hosting),
			well_known: identity.is_well_known(),
		};
		identity.set_object_ref(objref.clone());
		debug!(domain = %self.id(), uri, "remoting.marshal");
		Ok(objref)
	}

	/// Creates a proxy from a marshaled reference.
	///
	/// References into this domain resolve to the local identity; others get
	/// a client identity whose channel sink comes from the registered channels.
	pub fn unmarshal(&self, objref: &ObjRef) -> Result<Proxy> {
		if objref.uri.is_empty() {
			return Err(RemotingError::NullArgument("uri".into()));
		}
		let local = match objref.cross_domain_data() {
			Some(data) => data.domain_id == self.id() && data.is_local_process(),
			None => self.identities().resolve(&objref.uri)?.is_some_and(|id| id.is_server()),
		};

		if local {
			let identity = self
				.identities()
				.resolve(&objref.uri)?
				.filter(|id| id.is_server())
				.ok_or_else(|| RemotingError::Disconnected(objref.uri.clone()))?;
			identity.race_set_channel_sink(Arc::new(CrossContextSink::new(self.id())));
			return Proxy::new(identity);
		}

		if let Some(data) = objref.cross_domain_data()
			&& !data.is_local_process()
		{
			return Err(RemotingError::CrossProcessUnsupported(data.process_id));
		}

		let url = objref.cross_domain_data().map(|data| cross_domain::url_for(data.domain_id, &objref.uri));
		let identity = self
			.identities()
			.find_or_create_identity(Some(&objref.uri), url.as_deref(), Some(objref.clone()))?;
		if identity.channel_sink().is_none() {
			let (sink, _) = self
				.channels()
				.create_message_sink(None, &objref.channel_data)
				.ok_or_else(|| RemotingError::CantCreateChannelSink(objref.uri.clone()))?;
			identity.race_set_channel_sink(sink);
		}
		Proxy::new(identity)
	}

	/// Creates a proxy to the object published at `url`.
	pub fn connect(&self, url: &str) -> Result<Proxy> {
		if url.is_empty() {
			return Err(RemotingError::NullArgument("url".into()));
		}
		let (sink, object_uri) = self
			.channels()
			.create_message_sink(Some(url), &[])
			.ok_or_else(|| RemotingError::CantCreateChannelSink(url.to_string()))?;
		let identity = self.identities().find_or_create_identity(Some(&object_uri), Some(url), None)?;
		identity.race_set_channel_sink(sink);
		Proxy::new(identity)
	}

	/// Withdraws a published object. Later calls to its URI fail with
	/// [`RemotingError::Disconnected`].
	///
	/// Returns `false` when the object was never published.
	pub fn disconnect(&self, object: &Arc<dyn RemoteObject>) -> Result<bool> {
		let Some(identity) = object.identity_slot().get() else {
			return Ok(false);
		};
		let Some(uri) = identity.uri() else {
			return Ok(false);
		};
		if !identity.is_server() {
			return Err(RemotingError::CantDisconnectClientProxy(uri));
		}
		identity.set_flags(IdentityFlags::DISCONNECTED);
		let removed = self.identities().remove_identity(&uri, !identity.is_well_known())?;
		info!(domain = %self.id(), uri, removed, "remoting.disconnect");
		Ok(removed)
	}

	/// URI `object` is published under.
	pub fn get_object_uri(&self, object: &Arc<dyn RemoteObject>) -> Option<String> {
		object.identity_slot().get().and_then(|id| id.uri())
	}

	/// Chooses the URI `object` will be published under on its next marshal.
	pub fn set_object_uri_for_marshal(&self, object: &Arc<dyn RemoteObject>, uri: &str) -> Result<()> {
		if uri.is_empty() {
			return Err(RemotingError::NullArgument("uri".into()));
		}
		object.identity_slot().set_requested_uri(uri)
	}

	/// Type name of the object at `uri`, whether activated or only registered.
	pub fn server_type_for_uri(&self, uri: &str) -> Result<Option<String>> {
		if let Some(identity) = self.identities().resolve(uri)?
			&& identity.is_server()
		{
			return Ok(identity.type_name());
		}
		Ok(self.well_known().server_type_for_uri(uri))
	}

	/// Whether the method `call` targets is one-way.
	pub fn is_one_way(&self, call: &MethodCall) -> Result<bool> {
		let identity = self
			.identities()
			.resolve(&call.uri)?
			.ok_or_else(|| RemotingError::Disconnected(call.uri.clone()))?;
		let server = identity.server().ok_or_else(|| RemotingError::Disconnected(call.uri.clone()))?;
		Ok(server
			.object()
			.type_descriptor()
			.method(&call.method_name)
			.is_some_and(|method| method.is_one_way()))
	}

	/// Invokes `call` directly on `object`, skipping every chain.
	pub fn execute_message(&self, object: &Arc<dyn RemoteObject>, call: MethodCall) -> Result<ReturnMessage> {
		let identity = self
			.identities()
			.find_or_create_server_identity(object, self.default_context(), None, IdOps::empty())?;
		let mut msg = Message::Call(call);
		msg.set_target(Some(identity));
		let stack_builder: SinkRef = Arc::new(ServerObjectTerminatorSink);
		match stack_builder.sync_process_message(msg) {
			Message::Return(reply) => Ok(reply),
			other => Err(RemotingError::InvalidArgument(format!("unexpected reply for `{}`", other.uri()))),
		}
	}
}
