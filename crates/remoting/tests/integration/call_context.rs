use std::sync::Arc;

use pretty_assertions::assert_eq;
use remora_remoting::call_context::{self, CallContextScope};
use remora_remoting::{Domain, LogicalCallContext, Principal, Value};

use crate::common::{calculator, init_tracing, invoke_in, proxy_in, publish};

#[derive(Debug)]
struct User(&'static str);

impl Principal for User {
	fn name(&self) -> &str {
		self.0
	}
}

fn context_with_principal() -> LogicalCallContext {
	let mut ctx = LogicalCallContext::default();
	ctx.set_principal(Some(Arc::new(User("alice"))));
	ctx
}

#[test]
fn ambient_data_flows_out_and_back() {
	init_tracing();
	let server = Domain::create("ctx-data-server");
	let client = Domain::create("ctx-data-client");
	let proxy = publish(&server, &client, &calculator(), "calc.rem");

	let mut ctx = LogicalCallContext::default();
	ctx.set_data("tenant", "acme");
	let _scope = CallContextScope::enter(ctx);

	assert_eq!(invoke_in(&client, &proxy, "stamp", vec![]), Ok(Value::from("acme")));
	let after = call_context::current();
	assert_eq!(after.get_data("visited"), Some(&Value::Bool(true)));
	assert_eq!(after.get_data("tenant"), Some(&Value::from("acme")));
}

#[test]
fn principal_stays_behind_when_crossing_domains() {
	init_tracing();
	let server = Domain::create("ctx-principal-server");
	let client = Domain::create("ctx-principal-client");
	let proxy = publish(&server, &client, &calculator(), "calc.rem");

	let _scope = CallContextScope::enter(context_with_principal());
	assert_eq!(invoke_in(&client, &proxy, "whoami", vec![]), Ok(Value::Null));

	let restored = call_context::current();
	assert_eq!(restored.principal().map(|p| p.name().to_string()), Some("alice".to_string()));
}

#[test]
fn principal_is_visible_within_one_domain() {
	init_tracing();
	let domain = Domain::create("ctx-principal-local");
	let object = calculator();
	let objref = domain.marshal(&object, Some("calc.rem")).expect("marshal");
	let proxy = proxy_in(&domain, &objref);

	let _scope = CallContextScope::enter(context_with_principal());
	assert_eq!(invoke_in(&domain, &proxy, "whoami", vec![]), Ok(Value::from("alice")));
}

#[test]
fn failed_calls_still_return_the_context() {
	init_tracing();
	let server = Domain::create("ctx-fault-server");
	let client = Domain::create("ctx-fault-client");
	let proxy = publish(&server, &client, &calculator(), "calc.rem");

	let mut ctx = LogicalCallContext::default();
	ctx.set_data("trace", 7);
	let _scope = CallContextScope::enter(ctx);

	assert!(invoke_in(&client, &proxy, "fail", vec![]).is_err());
	assert_eq!(call_context::current().get_data("trace"), Some(&Value::Int(7)));
}
