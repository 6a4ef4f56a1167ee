//! Call and reply messages passed through sink chains.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::call_context::LogicalCallContext;
use crate::error::{RemotingError, Result};
use crate::identity::Identity;
use crate::value::Value;

/// A typed method invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodCall {
	pub uri: String,
	pub type_name: String,
	pub method_name: String,
	pub args: Vec<Value>,
	pub call_context: LogicalCallContext,
	/// Identity resolved for this call in the current domain.
	#[serde(skip)]
	pub(crate) target: Option<Arc<Identity>>,
}

impl MethodCall {
	pub fn new(uri: impl Into<String>, method_name: impl Into<String>) -> Self {
		Self {
			uri: uri.into(),
			type_name: String::new(),
			method_name: method_name.into(),
			args: Vec::new(),
			call_context: LogicalCallContext::default(),
			target: None,
		}
	}

	pub fn with_args(mut self, args: Vec<Value>) -> Self {
		self.args = args;
		self
	}

	pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
		self.type_name = type_name.into();
		self
	}

	pub fn with_call_context(mut self, ctx: LogicalCallContext) -> Self {
		self.call_context = ctx;
		self
	}

	pub fn arg(&self, index: usize) -> Option<&Value> {
		self.args.get(index)
	}
}

/// The outcome of a call: a value and out arguments, or a fault.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReturnMessage {
	pub uri: String,
	pub method_name: String,
	pub return_value: Value,
	pub out_args: Vec<Value>,
	pub fault: Option<RemotingError>,
	pub call_context: LogicalCallContext,
}

impl ReturnMessage {
	/// A successful reply to `call`.
	pub fn ok(call: &MethodCall, return_value: Value, out_args: Vec<Value>) -> Self {
		Self {
			uri: call.uri.clone(),
			method_name: call.method_name.clone(),
			return_value,
			out_args,
			fault: None,
			call_context: call.call_context.clone(),
		}
	}

	/// A reply carrying `fault` for the given target.
	pub fn fault(uri: impl Into<String>, method_name: impl Into<String>, fault: RemotingError) -> Self {
		Self {
			uri: uri.into(),
			method_name: method_name.into(),
			fault: Some(fault),
			..Self::default()
		}
	}

	/// Converts the reply into the caller-facing result.
	pub fn into_result(self) -> Result<Value> {
		match self.fault {
			Some(err) => Err(err),
			None => Ok(self.return_value),
		}
	}
}

/// An untyped message processed by objects that act as message sinks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMessage {
	pub uri: String,
	pub properties: BTreeMap<String, Value>,
	pub call_context: LogicalCallContext,
	#[serde(skip)]
	pub(crate) target: Option<Arc<Identity>>,
}

impl RawMessage {
	pub fn new(uri: impl Into<String>) -> Self {
		Self {
			uri: uri.into(),
			..Self::default()
		}
	}
}

/// Any message that flows through a sink chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
	Call(MethodCall),
	Return(ReturnMessage),
	Raw(RawMessage),
}

impl Message {
	pub fn uri(&self) -> &str {
		match self {
			Self::Call(m) => &m.uri,
			Self::Return(m) => &m.uri,
			Self::Raw(m) => &m.uri,
		}
	}

	/// Method name for calls and replies; empty for raw messages.
	pub fn method_name(&self) -> &str {
		match self {
			Self::Call(m) => &m.method_name,
			Self::Return(m) => &m.method_name,
			Self::Raw(_) => "",
		}
	}

	pub fn call_context(&self) -> &LogicalCallContext {
		match self {
			Self::Call(m) => &m.call_context,
			Self::Return(m) => &m.call_context,
			Self::Raw(m) => &m.call_context,
		}
	}

	pub fn call_context_mut(&mut self) -> &mut LogicalCallContext {
		match self {
			Self::Call(m) => &mut m.call_context,
			Self::Return(m) => &mut m.call_context,
			Self::Raw(m) => &mut m.call_context,
		}
	}

	pub fn target(&self) -> Option<&Arc<Identity>> {
		match self {
			Self::Call(m) => m.target.as_ref(),
			Self::Raw(m) => m.target.as_ref(),
			Self::Return(_) => None,
		}
	}

	pub(crate) fn set_target(&mut self, identity: Option<Arc<Identity>>) {
		match self {
			Self::Call(m) => m.target = identity,
			Self::Raw(m) => m.target = identity,
			Self::Return(_) => {}
		}
	}

	pub fn fault(&self) -> Option<&RemotingError> {
		match self {
			Self::Return(m) => m.fault.as_ref(),
			_ => None,
		}
	}

	/// Builds a reply to this message carrying `fault`.
	///
	/// The reply keeps the request's call context so ambient data still
	/// flows back to the caller.
	pub fn fault_reply(&self, fault: RemotingError) -> Message {
		let mut reply = ReturnMessage::fault(self.uri(), self.method_name(), fault);
		reply.call_context = self.call_context().clone();
		Message::Return(reply)
	}

	/// Returns whether the whole message can be handed across a domain
	/// boundary without serialization.
	pub fn is_smuggleable(&self) -> bool {
		let payload = match self {
			Self::Call(m) => m.args.iter().all(Value::is_smuggleable),
			Self::Return(m) => m.return_value.is_smuggleable() && m.out_args.iter().all(Value::is_smuggleable),
			Self::Raw(m) => m.properties.values().all(Value::is_smuggleable),
		};
		payload && self.call_context().is_smuggleable()
	}

	/// Converts a reply into the caller-facing result.
	pub fn into_result(self) -> Result<Value> {
		match self {
			Self::Return(reply) => reply.into_result(),
			other => Err(RemotingError::InvalidArgument(format!("expected a reply for `{}`", other.uri()))),
		}
	}
}

impl From<MethodCall> for Message {
	fn from(call: MethodCall) -> Self {
		Self::Call(call)
	}
}

impl From<ReturnMessage> for Message {
	fn from(reply: ReturnMessage) -> Self {
		Self::Return(reply)
	}
}

impl From<RawMessage> for Message {
	fn from(raw: RawMessage) -> Self {
		Self::Raw(raw)
	}
}
