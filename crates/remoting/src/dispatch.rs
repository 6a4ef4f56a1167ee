//! Inbound dispatch: from a request message to the target's server context chain.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, error, warn};

use crate::channel::cross_domain::in_cross_domain_dispatch;
use crate::context::ContextScope;
use crate::domain::DomainId;
use crate::error::{RemotingError, Result, panic_message};
use crate::identity::{Identity, IdentityTable};
use crate::message::{Message, ReturnMessage};
use crate::object::TypeKind;
use crate::sink::{MessageSink, SinkRef, deliver};
use crate::well_known::WellKnownActivator;

/// How a dispatched message was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingKind {
	/// Processed synchronously; a reply is available.
	Complete,
	/// Fire-and-forget; no reply will be produced.
	OneWay,
	/// Processing continues asynchronously; the reply goes to the reply sink.
	Async,
}

/// A message that passed admission, with its target resolved.
struct Admitted {
	chain: SinkRef,
	identity: Arc<Identity>,
	one_way: bool,
}

/// Entry point for calls arriving in a domain.
pub struct DispatchRouter {
	domain_id: DomainId,
	identities: Arc<IdentityTable>,
	activator: Arc<dyn WellKnownActivator>,
	custom_errors: bool,
	inbound: AtomicU64,
}

impl DispatchRouter {
	pub(crate) fn new(domain_id: DomainId, identities: Arc<IdentityTable>, activator: Arc<dyn WellKnownActivator>, custom_errors: bool) -> Self {
		Self {
			domain_id,
			identities,
			activator,
			custom_errors,
			inbound: AtomicU64::new(0),
		}
	}

	/// Calls that reached admission since the domain was created.
	pub fn inbound_calls(&self) -> u64 {
		self.inbound.load(Ordering::Relaxed)
	}

	/// Dispatches `msg` and reports how it was processed.
	///
	/// Never panics: a failure that escapes everything else is logged and
	/// answered without a reply.
	pub fn dispatch_message(&self, msg: Message) -> (ProcessingKind, Option<Message>) {
		let uri = msg.uri().to_string();
		let method = msg.method_name().to_string();
		match catch_unwind(AssertUnwindSafe(|| self.dispatch_inner(msg))) {
			Ok(outcome) => outcome,
			Err(payload) => {
				let reason = panic_message(payload);
				let reply = catch_unwind(AssertUnwindSafe(|| {
					Message::Return(ReturnMessage::fault(uri.as_str(), method.as_str(), RemotingError::Panicked(reason)))
				}));
				match reply {
					Ok(reply) => (ProcessingKind::Complete, Some(self.finish(reply))),
					Err(_) => {
						error!(domain = %self.domain_id, uri, "remoting.dispatch.fault_reply_failed");
						(ProcessingKind::Complete, None)
					}
				}
			}
		}
	}

	fn dispatch_inner(&self, mut msg: Message) -> (ProcessingKind, Option<Message>) {
		let admitted = match self.admit(&mut msg) {
			Ok(admitted) => admitted,
			Err(err) => {
				debug!(domain = %self.domain_id, uri = msg.uri(), %err, "remoting.dispatch.rejected");
				return (ProcessingKind::Complete, Some(self.finish(msg.fault_reply(err))));
			}
		};
		let _scope = Self::enter_target_context(&admitted.identity);
		if admitted.one_way {
			admitted.chain.async_process_message(msg, Some(Arc::new(OneWayFaultLogger)));
			return (ProcessingKind::OneWay, None);
		}
		let reply = admitted.chain.sync_process_message(msg);
		(ProcessingKind::Complete, Some(self.finish(reply)))
	}

	/// Dispatches `msg` and always returns a reply.
	///
	/// One-way calls answer with an empty reply once they are queued.
	pub fn sync_dispatch_message(&self, msg: Message) -> Message {
		let uri = msg.uri().to_string();
		let method = msg.method_name().to_string();
		match self.dispatch_message(msg) {
			(_, Some(reply)) => reply,
			(_, None) => Message::Return(ReturnMessage {
				uri,
				method_name: method,
				..ReturnMessage::default()
			}),
		}
	}

	/// Dispatches `msg` without waiting; the reply goes to `reply_sink`.
	pub fn async_dispatch_message(&self, mut msg: Message, reply_sink: Option<SinkRef>) -> ProcessingKind {
		let admitted = match self.admit(&mut msg) {
			Ok(admitted) => admitted,
			Err(err) => {
				debug!(domain = %self.domain_id, uri = msg.uri(), %err, "remoting.dispatch.rejected");
				deliver(reply_sink.as_ref(), self.finish(msg.fault_reply(err)));
				return ProcessingKind::Complete;
			}
		};
		let _scope = Self::enter_target_context(&admitted.identity);
		if admitted.one_way {
			admitted.chain.async_process_message(msg, Some(Arc::new(OneWayFaultLogger)));
			return ProcessingKind::OneWay;
		}
		admitted.chain.async_process_message(msg, reply_sink);
		ProcessingKind::Async
	}

	fn enter_target_context(identity: &Identity) -> Option<ContextScope> {
		identity.server().map(|server| ContextScope::enter(server.context().clone()))
	}

	fn admit(&self, msg: &mut Message) -> Result<Admitted> {
		if msg.uri().is_empty() {
			return Err(RemotingError::NullArgument("message uri".into()));
		}
		self.inbound.fetch_add(1, Ordering::Relaxed);

		let identity = self.resolve_or_activate(msg.uri())?;
		let server = match identity.server() {
			Some(server) if !identity.is_disconnected() => server,
			_ => return Err(RemotingError::Disconnected(msg.uri().to_string())),
		};

		let descriptor = server.object().type_descriptor();
		if descriptor.kind() == TypeKind::DomainObject {
			return Err(RemotingError::DomainObjectRejected(descriptor.name().to_string()));
		}

		let one_way = match &*msg {
			Message::Raw(_) => {
				if server.object().as_message_sink().is_none() {
					return Err(RemotingError::RawDispatchUnsupported(descriptor.name().to_string()));
				}
				false
			}
			Message::Call(call) => {
				let method = descriptor.method(&call.method_name).ok_or_else(|| RemotingError::MethodNotFound {
					type_name: descriptor.name().to_string(),
					method: call.method_name.clone(),
				})?;
				if !method.is_remotely_callable() {
					return Err(RemotingError::NotRemotelyCallable {
						type_name: descriptor.name().to_string(),
						method: call.method_name.clone(),
					});
				}
				method.is_one_way()
			}
			Message::Return(_) => {
				return Err(RemotingError::InvalidArgument("a reply cannot be dispatched".into()));
			}
		};

		let chain = server.context().server_context_chain()?;
		msg.set_target(Some(identity.clone()));
		Ok(Admitted { chain, identity, one_way })
	}

	fn resolve_or_activate(&self, uri: &str) -> Result<Arc<Identity>> {
		if let Some(identity) = self.identities.resolve(uri)? {
			return Ok(identity);
		}
		if let Some(identity) = self.activator.activate(uri)? {
			return Ok(identity);
		}
		Err(RemotingError::Disconnected(uri.to_string()))
	}

	/// Masks fault details for callers in other domains when configured to.
	fn finish(&self, mut reply: Message) -> Message {
		if self.custom_errors
			&& in_cross_domain_dispatch()
			&& let Message::Return(ret) = &mut reply
			&& let Some(fault) = ret.fault.as_mut()
		{
			warn!(domain = %self.domain_id, uri = %ret.uri, %fault, "remoting.dispatch.fault_masked");
			*fault = RemotingError::Internal;
		}
		reply
	}
}

/// Reply sink for one-way calls: failures are logged and dropped.
struct OneWayFaultLogger;

impl MessageSink for OneWayFaultLogger {
	fn sync_process_message(&self, reply: Message) -> Message {
		if let Some(fault) = reply.fault() {
			warn!(uri = reply.uri(), %fault, "remoting.dispatch.one_way_failed");
		}
		reply
	}
}
