//! Client-side handles to remote objects.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::call_context;
use crate::error::{RemotingError, Result};
use crate::identity::Identity;
use crate::message::{Message, MethodCall, ReturnMessage};
use crate::sink::{MessageSink, SinkRef};
use crate::value::Value;

/// A handle that turns method invocations into messages.
///
/// Calls enter the identity's envoy chain with a copy of the calling
/// thread's call context. After a synchronous call the reply's context
/// becomes the thread's context.
#[derive(Clone)]
pub struct Proxy {
	identity: Arc<Identity>,
	uri: String,
	type_name: String,
}

impl Proxy {
	pub(crate) fn new(identity: Arc<Identity>) -> Result<Self> {
		let uri = identity.uri().ok_or_else(|| RemotingError::Disconnected(identity.url().unwrap_or_default().to_string()))?;
		let type_name = identity.type_name().unwrap_or_default();
		Ok(Self { identity, uri, type_name })
	}

	pub fn uri(&self) -> &str {
		&self.uri
	}

	pub fn type_name(&self) -> &str {
		&self.type_name
	}

	pub fn identity(&self) -> &Arc<Identity> {
		&self.identity
	}

	fn build_call(&self, method: &str, args: Vec<Value>) -> Message {
		let mut call = MethodCall::new(self.uri.clone(), method)
			.with_type_name(self.type_name.clone())
			.with_args(args)
			.with_call_context(call_context::current());
		call.target = Some(self.identity.clone());
		Message::Call(call)
	}

	/// Invokes `method` and waits for its return value.
	pub fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value> {
		self.invoke_message(method, args)?.into_result()
	}

	/// Invokes `method` and returns the whole reply, out arguments included.
	pub fn invoke_message(&self, method: &str, args: Vec<Value>) -> Result<ReturnMessage> {
		let chain = self.identity.envoy_chain()?;
		match chain.sync_process_message(self.build_call(method, args)) {
			Message::Return(reply) => {
				call_context::replace(reply.call_context.clone());
				Ok(reply)
			}
			other => Err(RemotingError::InvalidArgument(format!("expected a reply from `{}`", other.uri()))),
		}
	}

	/// Sends `method` without waiting for or observing its outcome.
	pub fn invoke_one_way(&self, method: &str, args: Vec<Value>) -> Result<()> {
		let chain = self.identity.envoy_chain()?;
		chain.async_process_message(self.build_call(method, args), None);
		Ok(())
	}

	/// Starts `method` and returns a handle to collect its reply.
	pub fn begin_invoke(&self, method: &str, args: Vec<Value>) -> Result<AsyncResult> {
		let chain = self.identity.envoy_chain()?;
		let result = AsyncResult::new();
		chain.async_process_message(self.build_call(method, args), Some(result.reply_sink()));
		Ok(result)
	}
}

impl fmt::Debug for Proxy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Proxy").field("uri", &self.uri).field("type_name", &self.type_name).finish()
	}
}

/// Pending reply of a call started with [`Proxy::begin_invoke`].
#[derive(Clone)]
pub struct AsyncResult {
	slot: Arc<ReplySlot>,
}

#[derive(Default)]
struct ReplySlot {
	reply: Mutex<Option<Message>>,
	done: Condvar,
}

impl MessageSink for ReplySlot {
	fn sync_process_message(&self, msg: Message) -> Message {
		*self.reply.lock() = Some(msg.clone());
		self.done.notify_all();
		msg
	}
}

impl AsyncResult {
	fn new() -> Self {
		Self {
			slot: Arc::new(ReplySlot::default()),
		}
	}

	fn reply_sink(&self) -> SinkRef {
		self.slot.clone()
	}

	pub fn is_completed(&self) -> bool {
		self.slot.reply.lock().is_some()
	}

	/// Waits for the reply, forever when `timeout` is `None`.
	///
	/// Timing out abandons the wait only; the call keeps running.
	pub fn end_invoke_message(&self, timeout: Option<Duration>) -> Result<ReturnMessage> {
		let deadline = timeout.map(|t| Instant::now() + t);
		let mut reply = self.slot.reply.lock();
		while reply.is_none() {
			match deadline {
				Some(deadline) => {
					if self.slot.done.wait_until(&mut reply, deadline).timed_out() && reply.is_none() {
						return Err(RemotingError::Timeout);
					}
				}
				None => self.slot.done.wait(&mut reply),
			}
		}
		match reply.clone() {
			Some(Message::Return(ret)) => Ok(ret),
			Some(other) => Err(RemotingError::InvalidArgument(format!("expected a reply from `{}`", other.uri()))),
			None => Err(RemotingError::Timeout),
		}
	}

	/// Waits for the reply and returns the method's return value.
	pub fn end_invoke(&self, timeout: Option<Duration>) -> Result<Value> {
		self.end_invoke_message(timeout)?.into_result()
	}
}
