//! Shared fixtures for remoting integration tests.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use remora_remoting::call_context;
use remora_remoting::{DelegateObject, Domain, MethodDescriptor, MethodReturn, ObjRef, Proxy, RemoteObject, RemotingError, Value};

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// An object exercising values, faults, panics and the call context.
pub fn calculator() -> Arc<dyn RemoteObject> {
	DelegateObject::builder("Calculator")
		.method(MethodDescriptor::new("add"), |call| {
			let a = call.arg(0).and_then(Value::as_int).unwrap_or_default();
			let b = call.arg(1).and_then(Value::as_int).unwrap_or_default();
			Ok(MethodReturn::value(a + b).with_out_args(vec![Value::Int(a), Value::Int(b)]))
		})
		.method(MethodDescriptor::new("describe"), |call| {
			let uri = call.arg(0).and_then(Value::as_obj_ref).map(|r| r.uri.clone()).unwrap_or_default();
			Ok(MethodReturn::value(uri))
		})
		.method(MethodDescriptor::new("fail"), |_| Err(RemotingError::application("Overdraft", "insufficient funds")))
		.method(MethodDescriptor::new("explode"), |_| panic!("boom"))
		.method(MethodDescriptor::new("stamp"), |_| {
			let tenant = call_context::with_current(|ctx| {
				ctx.set_data("visited", true);
				ctx.get_data("tenant").cloned().unwrap_or_default()
			});
			Ok(MethodReturn::value(tenant))
		})
		.method(MethodDescriptor::new("whoami"), |call| {
			let name = call.call_context.principal().map(|p| p.name().to_string());
			Ok(MethodReturn::value(name.map_or(Value::Null, Value::from)))
		})
		.method(MethodDescriptor::new("sleep"), |call| {
			let millis = call.arg(0).and_then(Value::as_int).unwrap_or_default();
			thread::sleep(Duration::from_millis(millis.unsigned_abs()));
			Ok(MethodReturn::value(millis))
		})
		.method(MethodDescriptor::new("internal").non_public(), |_| Ok(MethodReturn::void()))
		.build()
}

/// Publishes `object` in `server` and returns a proxy to it usable from `client`.
pub fn publish(server: &Arc<Domain>, client: &Arc<Domain>, object: &Arc<dyn RemoteObject>, uri: &str) -> Proxy {
	let objref = server.marshal(object, Some(uri)).expect("marshal");
	proxy_in(client, &objref)
}

pub fn proxy_in(domain: &Arc<Domain>, objref: &ObjRef) -> Proxy {
	domain.execute_in(|| domain.unmarshal(objref)).expect("enter domain").expect("unmarshal")
}

/// Invokes `method` with `domain` current on the calling thread.
pub fn invoke_in(domain: &Arc<Domain>, proxy: &Proxy, method: &str, args: Vec<Value>) -> Result<Value, RemotingError> {
	domain.execute_in(|| proxy.invoke(method, args)).expect("enter domain")
}

pub fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
	let deadline = Instant::now() + Duration::from_secs(5);
	while !cond() {
		assert!(Instant::now() < deadline, "timed out waiting for {what}");
		thread::sleep(Duration::from_millis(2));
	}
}
