//! Argument and return values carried by messages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::objref::ObjRef;

/// A value that can be passed to or returned from a remote method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
	#[default]
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(String),
	Bytes(Vec<u8>),
	List(Vec<Value>),
	Map(BTreeMap<String, Value>),
	/// A marshaled reference to another remotable object.
	ObjRef(ObjRef),
}

impl Value {
	/// Returns whether this value can cross a domain boundary without being
	/// serialized.
	///
	/// Plain data always qualifies. Object references qualify only when all
	/// of their channel data is cross-domain data.
	pub fn is_smuggleable(&self) -> bool {
		match self {
			Self::Null | Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::Str(_) | Self::Bytes(_) => true,
			Self::List(items) => items.iter().all(Self::is_smuggleable),
			Self::Map(entries) => entries.values().all(Self::is_smuggleable),
			Self::ObjRef(objref) => objref.is_smuggleable(),
		}
	}

	pub fn as_int(&self) -> Option<i64> {
		match self {
			Self::Int(v) => Some(*v),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::Str(v) => Some(v),
			_ => None,
		}
	}

	pub fn as_obj_ref(&self) -> Option<&ObjRef> {
		match self {
			Self::ObjRef(v) => Some(v),
			_ => None,
		}
	}
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Self::Bool(v)
	}
}

impl From<i32> for Value {
	fn from(v: i32) -> Self {
		Self::Int(i64::from(v))
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Self::Int(v)
	}
}

impl From<f64> for Value {
	fn from(v: f64) -> Self {
		Self::Float(v)
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Self::Str(v.to_string())
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Self::Str(v)
	}
}

impl From<Vec<u8>> for Value {
	fn from(v: Vec<u8>) -> Self {
		Self::Bytes(v)
	}
}

impl From<ObjRef> for Value {
	fn from(v: ObjRef) -> Self {
		Self::ObjRef(v)
	}
}
