//! Location-transparent remote object invocation.
//!
//! Callers hold a [`Proxy`] and invoke methods on it as if the target were
//! local. Each call becomes a [`Message`] that travels through a chain of
//! [`MessageSink`]s: the proxy's envoy chain, the caller context's client
//! chain, a channel sink, the target context's server chain and finally the
//! object's own chain, which invokes the method.
//!
//! # Layout
//!
//! - [`identity`] - Identities and the URI-keyed identity table
//! - [`context`] - Contexts, their properties and chain construction
//! - [`terminator`] - The fixed sinks at the end of every chain
//! - [`channel`] - Channel registry, cross-context and cross-domain channels
//! - [`serializer`] - Byte encoding for messages leaving a domain
//! - [`dispatch`] - Admission and dispatch of inbound messages
//! - [`sync_domain`] - The synchronization context property
//! - [`domain`] - Domains, the per-process isolation units
//!
//! Publishing and unmarshaling live on [`Domain`]; well-known activation in
//! [`well_known`].

pub mod call_context;
pub mod channel;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod identity;
pub mod message;
pub mod object;
pub mod objref;
pub mod proxy;
pub mod serializer;
mod services;
pub mod sink;
pub mod sync_domain;
pub mod terminator;
pub mod value;
pub mod well_known;

pub use call_context::{CallContextScope, LogicalCallContext, LogicalCallId, Principal};
pub use channel::{Channel, ChannelServices, CrossContextSink, CrossDomainChannel, CrossDomainSink};
pub use config::{ConfigError, RemotingConfig, TypeCatalog, WellKnownConfig};
pub use context::{Context, ContextId, ContextProperty, ContextScope};
pub use dispatch::{DispatchRouter, ProcessingKind};
pub use domain::{Domain, DomainId, DomainScope};
pub use error::{RemotingError, Result};
pub use identity::{Identity, IdentityFlags, IdentityTable};
pub use message::{Message, MethodCall, RawMessage, ReturnMessage};
pub use object::{DelegateObject, IdentitySlot, MethodDescriptor, MethodReturn, ObjectFactory, RemoteObject, TypeDescriptor, TypeKind};
pub use objref::{ChannelData, CrossDomainData, ObjRef};
pub use proxy::{AsyncResult, Proxy};
pub use serializer::{PostcardSerializer, Serializer};
pub use sink::{DynamicSink, MessageSink, SinkRef};
pub use sync_domain::SynchronizationProperty;
pub use value::Value;
pub use well_known::{WellKnownMode, WellKnownRegistry};
