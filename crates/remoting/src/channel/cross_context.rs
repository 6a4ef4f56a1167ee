use remora_worker::TaskClass;

use crate::call_context::{self, CallContextScope};
use crate::domain::{Domain, DomainId};
use crate::error::RemotingError;
use crate::message::Message;
use crate::sink::{MessageSink, SinkRef, deliver};

/// Channel sink for objects hosted in the caller's own domain.
///
/// Calls go straight to the domain's dispatch router without serialization.
/// Asynchronous calls run on the shared worker pool.
pub struct CrossContextSink {
	domain_id: DomainId,
}

impl CrossContextSink {
	pub fn new(domain_id: DomainId) -> Self {
		Self { domain_id }
	}

	fn dispatch(domain_id: DomainId, msg: Message) -> Message {
		let Some(domain) = Domain::lookup(domain_id) else {
			return msg.fault_reply(RemotingError::DomainUnavailable(domain_id.0));
		};
		let fallback = msg.fault_reply(RemotingError::DomainUnavailable(domain_id.0));
		domain.execute_in(|| domain.router().sync_dispatch_message(msg)).unwrap_or(fallback)
	}
}

impl MessageSink for CrossContextSink {
	fn sync_process_message(&self, msg: Message) -> Message {
		Self::dispatch(self.domain_id, msg)
	}

	fn async_process_message(&self, msg: Message, reply_sink: Option<SinkRef>) {
		let domain_id = self.domain_id;
		let captured = call_context::current();
		remora_worker::spawn_blocking(TaskClass::AsyncDispatch, move || {
			let _scope = CallContextScope::enter(captured);
			let reply = Self::dispatch(domain_id, msg);
			deliver(reply_sink.as_ref(), reply);
		});
	}
}
