use std::sync::Arc;

use super::SyncDomain;
use super::work_item::WorkItem;
use crate::call_context::LogicalCallId;
use crate::error::RemotingError;
use crate::message::{Message, ReturnMessage};
use crate::sink::{MessageSink, SinkRef};

fn lost_reply(uri: String, method: String) -> Message {
	Message::Return(ReturnMessage::fault(uri, method, RemotingError::Internal))
}

/// Admits incoming calls through the domain's queue.
pub(crate) struct SynchronizedServerContextSink {
	domain: Arc<SyncDomain>,
	next: SinkRef,
}

impl SynchronizedServerContextSink {
	pub(crate) fn new(domain: Arc<SyncDomain>, next: SinkRef) -> Self {
		Self { domain, next }
	}
}

impl MessageSink for SynchronizedServerContextSink {
	fn sync_process_message(&self, msg: Message) -> Message {
		let (uri, method) = (msg.uri().to_string(), msg.method_name().to_string());
		let item = WorkItem::sync(msg, self.next.clone());
		self.domain.handle_work_request(&item);
		item.take_reply().unwrap_or_else(|| lost_reply(uri, method))
	}

	fn async_process_message(&self, msg: Message, reply_sink: Option<SinkRef>) {
		let item = WorkItem::asynchronous(msg, self.next.clone(), reply_sink);
		self.domain.handle_work_request(&item);
	}

	fn next_sink(&self) -> Option<&SinkRef> {
		Some(&self.next)
	}
}

/// Tags or brackets calls leaving the domain.
///
/// Non-reentrant domains tag each call-out with a logical call id so that a
/// callback carrying it is recognized as nested. Reentrant domains release
/// the domain for the duration of the call-out.
pub(crate) struct SynchronizedClientContextSink {
	domain: Arc<SyncDomain>,
	next: SinkRef,
}

impl SynchronizedClientContextSink {
	pub(crate) fn new(domain: Arc<SyncDomain>, next: SinkRef) -> Self {
		Self { domain, next }
	}
}

impl MessageSink for SynchronizedClientContextSink {
	fn sync_process_message(&self, mut msg: Message) -> Message {
		if self.domain.is_reentrant() {
			self.domain.handle_thread_exit();
			let reply = self.next.sync_process_message(msg);
			self.domain.handle_thread_re_entry();
			return reply;
		}

		let (id, generated) = match msg.call_context().call_id() {
			Some(id) => (id, false),
			None => {
				let id = LogicalCallId::new();
				msg.call_context_mut().set_call_id(Some(id));
				(id, true)
			}
		};
		let installed = self.domain.begin_sync_call_out(id);
		let mut reply = self.next.sync_process_message(msg);
		if installed {
			self.domain.end_sync_call_out();
		}
		if generated {
			reply.call_context_mut().set_call_id(None);
		}
		reply
	}

	fn async_process_message(&self, mut msg: Message, reply_sink: Option<SinkRef>) {
		if self.domain.is_reentrant() {
			self.domain.handle_thread_exit();
			let reply_sink = reply_sink.map(|next| AsyncReplySink::wrap(self.domain.clone(), next, None));
			self.next.async_process_message(msg, reply_sink);
			self.domain.handle_thread_re_entry();
			return;
		}

		let Some(reply_sink) = reply_sink else {
			self.next.async_process_message(msg, None);
			return;
		};
		let id = LogicalCallId::new();
		msg.call_context_mut().set_call_id(Some(id));
		self.domain.add_async_call_out(id);
		let reply_sink = AsyncReplySink::wrap(self.domain.clone(), reply_sink, Some(id));
		self.next.async_process_message(msg, Some(reply_sink));
	}

	fn next_sink(&self) -> Option<&SinkRef> {
		Some(&self.next)
	}
}

/// Routes the reply of an asynchronous call-out back through the domain.
struct AsyncReplySink {
	domain: Arc<SyncDomain>,
	next: SinkRef,
	call_id: Option<LogicalCallId>,
}

impl AsyncReplySink {
	fn wrap(domain: Arc<SyncDomain>, next: SinkRef, call_id: Option<LogicalCallId>) -> SinkRef {
		Arc::new(Self { domain, next, call_id })
	}
}

impl MessageSink for AsyncReplySink {
	fn sync_process_message(&self, reply: Message) -> Message {
		let (uri, method) = (reply.uri().to_string(), reply.method_name().to_string());
		let item = WorkItem::sync(reply, self.next.clone());
		self.domain.handle_work_request(&item);
		if let Some(id) = self.call_id {
			self.domain.remove_async_call_out(id);
		}
		item.take_reply().unwrap_or_else(|| lost_reply(uri, method))
	}

	fn next_sink(&self) -> Option<&SinkRef> {
		Some(&self.next)
	}
}
