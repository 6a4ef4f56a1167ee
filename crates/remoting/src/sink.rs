//! Message sinks: the nodes of every interceptor chain.

use std::sync::Arc;

use crate::message::Message;

/// Shared handle to a sink.
pub type SinkRef = Arc<dyn MessageSink>;

/// One node of a call-processing chain.
///
/// Failures never escape as Rust errors: a sink that cannot process a
/// message answers with a reply carrying the fault.
pub trait MessageSink: Send + Sync {
	/// Processes `msg` and returns the reply.
	fn sync_process_message(&self, msg: Message) -> Message;

	/// Processes `msg` and hands the reply to `reply_sink`.
	///
	/// A missing reply sink marks a one-way call whose outcome nobody
	/// observes. The default runs the synchronous path on the calling thread.
	fn async_process_message(&self, msg: Message, reply_sink: Option<SinkRef>) {
		let reply = self.sync_process_message(msg);
		if let Some(sink) = reply_sink {
			sink.sync_process_message(reply);
		}
	}

	/// The next sink in the chain, when there is one.
	fn next_sink(&self) -> Option<&SinkRef> {
		None
	}
}

/// Observer notified around every call dispatched to a server identity.
///
/// Multiple dynamic sinks are notified in registration order.
pub trait DynamicSink: Send + Sync {
	fn name(&self) -> &str;
	fn process_start(&self, msg: &Message);
	fn process_finish(&self, reply: &Message);
}

/// Delivers a reply to `reply_sink` when one was supplied.
pub(crate) fn deliver(reply_sink: Option<&SinkRef>, reply: Message) {
	if let Some(sink) = reply_sink {
		sink.sync_process_message(reply);
	}
}
