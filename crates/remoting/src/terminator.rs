//! Fixed sinks that end each chain and hand the call to the next stage.
//!
//! Client side: envoy chain, then the current context's client chain, then
//! the target identity's channel sink. Server side: the server context
//! chain, then the identity's object chain, then the object itself.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::trace;

use crate::call_context::{self, CallContextScope};
use crate::context::Context;
use crate::error::{RemotingError, Result, panic_message};
use crate::message::{Message, ReturnMessage};
use crate::sink::{DynamicSink, MessageSink, SinkRef, deliver};

/// End of an envoy chain: forwards into the caller's client context chain.
pub struct EnvoyTerminatorSink;

impl MessageSink for EnvoyTerminatorSink {
	fn sync_process_message(&self, msg: Message) -> Message {
		match Context::current().client_context_chain() {
			Ok(chain) => chain.sync_process_message(msg),
			Err(err) => msg.fault_reply(err),
		}
	}

	fn async_process_message(&self, msg: Message, reply_sink: Option<SinkRef>) {
		match Context::current().client_context_chain() {
			Ok(chain) => chain.async_process_message(msg, reply_sink),
			Err(err) => deliver(reply_sink.as_ref(), msg.fault_reply(err)),
		}
	}
}

/// End of a client context chain: forwards into the target's channel sink.
pub struct ClientContextTerminatorSink;

impl ClientContextTerminatorSink {
	fn channel_sink(msg: &Message) -> Result<SinkRef> {
		msg.target()
			.and_then(|identity| identity.channel_sink())
			.ok_or_else(|| RemotingError::NoChannelSink(msg.uri().to_string()))
	}
}

impl MessageSink for ClientContextTerminatorSink {
	fn sync_process_message(&self, msg: Message) -> Message {
		match Self::channel_sink(&msg) {
			Ok(sink) => sink.sync_process_message(msg),
			Err(err) => msg.fault_reply(err),
		}
	}

	fn async_process_message(&self, msg: Message, reply_sink: Option<SinkRef>) {
		match Self::channel_sink(&msg) {
			Ok(sink) => sink.async_process_message(msg, reply_sink),
			Err(err) => deliver(reply_sink.as_ref(), msg.fault_reply(err)),
		}
	}
}

fn server_stage(msg: &Message) -> Result<(SinkRef, Vec<Arc<dyn DynamicSink>>)> {
	let server = msg
		.target()
		.and_then(|identity| identity.server())
		.ok_or_else(|| RemotingError::Disconnected(msg.uri().to_string()))?;
	Ok((server.object_chain()?, server.dynamic_sinks()))
}

/// End of a server context chain: notifies dynamic sinks and enters the
/// target identity's object chain.
pub struct ServerContextTerminatorSink;

impl MessageSink for ServerContextTerminatorSink {
	fn sync_process_message(&self, msg: Message) -> Message {
		let (chain, dynamic) = match server_stage(&msg) {
			Ok(stage) => stage,
			Err(err) => return msg.fault_reply(err),
		};
		for sink in &dynamic {
			sink.process_start(&msg);
		}
		let reply = chain.sync_process_message(msg);
		for sink in &dynamic {
			sink.process_finish(&reply);
		}
		reply
	}

	fn async_process_message(&self, msg: Message, reply_sink: Option<SinkRef>) {
		let (chain, dynamic) = match server_stage(&msg) {
			Ok(stage) => stage,
			Err(err) => return deliver(reply_sink.as_ref(), msg.fault_reply(err)),
		};
		if dynamic.is_empty() {
			return chain.async_process_message(msg, reply_sink);
		}
		for sink in &dynamic {
			sink.process_start(&msg);
		}
		let finish: SinkRef = Arc::new(DynamicFinishSink { sinks: dynamic, next: reply_sink });
		chain.async_process_message(msg, Some(finish));
	}
}

struct DynamicFinishSink {
	sinks: Vec<Arc<dyn DynamicSink>>,
	next: Option<SinkRef>,
}

impl MessageSink for DynamicFinishSink {
	fn sync_process_message(&self, reply: Message) -> Message {
		for sink in &self.sinks {
			sink.process_finish(&reply);
		}
		match &self.next {
			Some(next) => next.sync_process_message(reply),
			None => reply,
		}
	}

	fn next_sink(&self) -> Option<&SinkRef> {
		self.next.as_ref()
	}
}

/// End of a server object chain: invokes the object.
///
/// The request's call context is installed on the executing thread while
/// the method runs and whatever the method leaves there is copied into the
/// reply. Errors and panics become fault replies.
pub struct ServerObjectTerminatorSink;

impl MessageSink for ServerObjectTerminatorSink {
	fn sync_process_message(&self, msg: Message) -> Message {
		let Some(identity) = msg.target().cloned() else {
			return msg.fault_reply(RemotingError::Disconnected(msg.uri().to_string()));
		};
		let Some(server) = identity.server() else {
			return msg.fault_reply(RemotingError::Disconnected(msg.uri().to_string()));
		};
		let object = server.instance_for_call();

		match msg {
			Message::Call(call) => {
				let _scope = CallContextScope::enter(call.call_context.clone());
				trace!(uri = %call.uri, method = %call.method_name, "remoting.object.invoke");
				let outcome = catch_unwind(AssertUnwindSafe(|| object.invoke(&call)));
				let mut reply = match outcome {
					Ok(Ok(ret)) => ReturnMessage::ok(&call, ret.value, ret.out_args),
					Ok(Err(err)) => ReturnMessage::fault(&call.uri, &call.method_name, err),
					Err(payload) => ReturnMessage::fault(&call.uri, &call.method_name, RemotingError::Panicked(panic_message(payload))),
				};
				reply.call_context = call_context::current();
				Message::Return(reply)
			}
			Message::Raw(raw) => match object.as_message_sink() {
				Some(sink) => {
					let _scope = CallContextScope::enter(raw.call_context.clone());
					let uri = raw.uri.clone();
					catch_unwind(AssertUnwindSafe(|| sink.sync_process_message(Message::Raw(raw))))
						.unwrap_or_else(|payload| Message::Return(ReturnMessage::fault(uri, "", RemotingError::Panicked(panic_message(payload)))))
				}
				None => {
					let type_name = object.type_descriptor().name().to_string();
					Message::Raw(raw).fault_reply(RemotingError::RawDispatchUnsupported(type_name))
				}
			},
			Message::Return(reply) => {
				let uri = reply.uri.clone();
				Message::Return(reply).fault_reply(RemotingError::InvalidArgument(format!("reply for `{uri}` dispatched as a call")))
			}
		}
	}
}
