//! Error types for remoting operations.
//!
//! [`RemotingError`] is serializable so a failure raised on the far side of
//! a domain boundary travels back inside a reply and is reconstructed as the
//! same variant on the caller's side.

use std::any::Any;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by identity management, chain construction and dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RemotingError {
	/// A required argument was empty.
	#[error("argument `{0}` must not be empty")]
	NullArgument(String),

	/// An argument was present but unusable.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// A different identity is already registered under this URI.
	#[error("uri `{0}` is already registered to a different object")]
	UriClash(String),

	/// The object already carries a URI that differs from the requested one.
	#[error("object is already marshaled as `{existing}`, cannot use `{requested}`")]
	UriAlreadyAssigned {
		/// URI the object is currently registered under.
		existing: String,
		/// URI the caller asked for.
		requested: String,
	},

	/// A channel with this name is already registered.
	#[error("channel `{0}` is already registered")]
	DuplicateChannel(String),

	/// No channel with this name is registered.
	#[error("channel `{0}` is not registered")]
	ChannelNotFound(String),

	/// A context already holds a property with this name.
	#[error("context already has a property named `{0}`")]
	DuplicateProperty(String),

	/// Properties cannot be added to a frozen context.
	#[error("context is frozen")]
	ContextFrozen,

	/// Chains are only built for frozen contexts.
	#[error("context must be frozen before its chains are built")]
	ContextNotFrozen,

	/// A property advertised a sink capability but produced no sink.
	#[error("context property `{0}` did not produce a sink")]
	BadContextProperty(String),

	/// The target object is not available at this URI.
	#[error("object `{0}` has been disconnected or does not exist")]
	Disconnected(String),

	/// The method exists but may not be invoked through remoting.
	#[error("method `{type_name}::{method}` is not remotely callable")]
	NotRemotelyCallable {
		/// Server type name.
		type_name: String,
		/// Method name.
		method: String,
	},

	/// The target type has no method with this name.
	#[error("type `{type_name}` has no method `{method}`")]
	MethodNotFound {
		/// Server type name.
		type_name: String,
		/// Method name.
		method: String,
	},

	/// Calls into domain objects are not serviced by the dispatch router.
	#[error("calls to domain object `{0}` are rejected")]
	DomainObjectRejected(String),

	/// The target cannot process untyped messages.
	#[error("object `{0}` does not accept raw messages")]
	RawDispatchUnsupported(String),

	/// The target lives in another process.
	#[error("target process {0} is not reachable from this process")]
	CrossProcessUnsupported(u32),

	/// Only server identities can be disconnected.
	#[error("cannot disconnect client proxy for `{0}`")]
	CantDisconnectClientProxy(String),

	/// No registered channel accepted the target.
	#[error("no channel can reach `{0}`")]
	CantCreateChannelSink(String),

	/// The message had no resolved target carrying a channel sink.
	#[error("no channel sink for `{0}`")]
	NoChannelSink(String),

	/// Encoding or decoding a message failed.
	#[error("serialization failed: {0}")]
	Serialization(String),

	/// The target domain was unloaded or never existed.
	#[error("domain {0} is unavailable")]
	DomainUnavailable(u32),

	/// The invoked method reported a failure.
	#[error("{type_name}: {message}")]
	Application {
		/// Caller-chosen failure type.
		type_name: String,
		/// Human-readable failure message.
		message: String,
	},

	/// The invoked method panicked.
	#[error("remote method panicked: {0}")]
	Panicked(String),

	/// Details withheld from a remote caller.
	#[error("the server encountered an internal error")]
	Internal,

	/// A reply did not arrive in time.
	#[error("timed out waiting for reply")]
	Timeout,
}

impl RemotingError {
	/// Builds an application failure.
	pub fn application(type_name: impl Into<String>, message: impl Into<String>) -> Self {
		Self::Application {
			type_name: type_name.into(),
			message: message.into(),
		}
	}
}

impl From<postcard::Error> for RemotingError {
	fn from(error: postcard::Error) -> Self {
		Self::Serialization(error.to_string())
	}
}

/// Result type for remoting operations.
pub type Result<T> = std::result::Result<T, RemotingError>;

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		return (*msg).to_string();
	}
	match payload.downcast::<String>() {
		Ok(msg) => *msg,
		Err(_) => "unknown panic payload".to_string(),
	}
}
