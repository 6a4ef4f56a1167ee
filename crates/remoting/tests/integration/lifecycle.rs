use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use remora_remoting::dispatch::ProcessingKind;
use remora_remoting::{
	ConfigError, DelegateObject, Domain, DomainId, DynamicSink, Message, MessageSink, MethodCall, MethodDescriptor,
	MethodReturn, RawMessage, RemoteObject, RemotingConfig, RemotingError, ReturnMessage, TypeCatalog, Value,
	WellKnownMode,
};

use crate::common::{calculator, init_tracing, invoke_in, proxy_in, publish};

#[test]
fn disconnected_objects_reject_calls() {
	init_tracing();
	let server = Domain::create("life-disconnect-server");
	let client = Domain::create("life-disconnect-client");
	let object = calculator();
	let remote = publish(&server, &client, &object, "calc.rem");
	let local = proxy_in(&server, &server.marshal(&object, None).expect("marshal"));

	assert_eq!(server.disconnect(&object), Ok(true));
	assert_eq!(server.get_object_uri(&object), None);
	assert!(matches!(invoke_in(&client, &remote, "add", vec![]), Err(RemotingError::Disconnected(_))));
	assert!(matches!(invoke_in(&server, &local, "add", vec![]), Err(RemotingError::Disconnected(_))));
	assert_eq!(server.disconnect(&object), Ok(false));
}

#[test]
fn unpublished_objects_have_nothing_to_disconnect() {
	init_tracing();
	let server = Domain::create("life-proxy-server");
	let client = Domain::create("life-proxy-client");
	let proxy = publish(&server, &client, &calculator(), "calc.rem");
	assert!(!proxy.identity().is_server());
	assert!(client.identities().resolve(&remora_remoting::channel::cross_domain::url_for(server.id(), "calc.rem")).expect("resolve").is_some());

	let stranger: Arc<dyn RemoteObject> = DelegateObject::builder("Stranger").build();
	assert_eq!(client.disconnect(&stranger), Ok(false));
	assert_eq!(client.get_object_uri(&stranger), None);
}

#[test]
fn requested_uri_is_used_on_next_marshal() {
	init_tracing();
	let domain = Domain::create("life-uri");
	let object = calculator();
	domain.set_object_uri_for_marshal(&object, "chosen.rem").expect("request uri");
	let objref = domain.marshal(&object, None).expect("marshal");

	assert_eq!(objref.uri, "chosen.rem");
	assert_eq!(domain.get_object_uri(&object).as_deref(), Some("chosen.rem"));
	assert_eq!(domain.server_type_for_uri("CHOSEN.rem"), Ok(Some("Calculator".to_string())));
	assert!(matches!(
		domain.set_object_uri_for_marshal(&object, "other.rem"),
		Err(RemotingError::UriAlreadyAssigned { .. })
	));
}

#[test]
fn unloaded_domain_is_unreachable() {
	init_tracing();
	let server = Domain::create("life-unload-server");
	let client = Domain::create("life-unload-client");
	let proxy = publish(&server, &client, &calculator(), "calc.rem");
	assert_eq!(invoke_in(&client, &proxy, "add", vec![1.into(), 2.into()]), Ok(Value::Int(3)));

	server.unload();
	assert!(server.is_unloaded());
	assert!(Domain::lookup(server.id()).is_none());
	assert_eq!(
		invoke_in(&client, &proxy, "add", vec![1.into(), 2.into()]),
		Err(RemotingError::DomainUnavailable(server.id().0))
	);
	assert!(matches!(server.execute_in(|| ()), Err(RemotingError::DomainUnavailable(_))));
}

fn multiply((a, b): (i64, i64)) -> i64 {
	a * b
}

fn current_domain(_: ()) -> u32 {
	Domain::current().id().0
}

#[test]
fn do_callback_runs_in_the_target_domain() {
	init_tracing();
	let target = Domain::create("life-callback");

	assert_eq!(Domain::do_callback(target.id(), (6, 7), multiply), Ok(42));
	assert_eq!(Domain::do_callback(target.id(), (), current_domain), Ok(target.id().0));
	assert_eq!(
		Domain::do_callback(DomainId(u32::MAX), (), current_domain),
		Err(RemotingError::DomainUnavailable(u32::MAX))
	);
}

#[test]
fn context_do_callback_enters_the_context() {
	init_tracing();
	let domain = Domain::create("life-context-callback");
	let ctx = domain.new_context();
	ctx.freeze();

	let seen = ctx.do_callback(|| remora_remoting::Context::current().id()).expect("callback");
	assert_eq!(seen, ctx.id());
}

#[test]
fn configured_well_known_objects_are_served() {
	init_tracing();
	let config = RemotingConfig::from_toml_str(
		r#"
		application_name = "shop"
		sweep_interval = 8

		[[well_known]]
		uri = "calc.rem"
		type_name = "Calculator"
		mode = "single_call"
		"#,
	)
	.expect("config");
	assert_eq!(config.well_known[0].mode, WellKnownMode::SingleCall);

	let server = Domain::with_config("life-config-server", config);
	let client = Domain::create("life-config-client");
	let mut catalog = TypeCatalog::new();
	catalog.register("Calculator", Arc::new(calculator));
	server.apply_config(&catalog).expect("apply");

	let url = remora_remoting::channel::cross_domain::url_for(server.id(), "/shop/calc.rem");
	let proxy = client.connect(&url).expect("connect");
	assert_eq!(invoke_in(&client, &proxy, "add", vec![1.into(), 1.into()]), Ok(Value::Int(2)));

	let empty = Domain::with_config(
		"life-config-unknown",
		RemotingConfig::from_toml_str("[[well_known]]\nuri = \"x.rem\"\ntype_name = \"Nope\"\n").expect("config"),
	);
	assert!(matches!(empty.apply_config(&catalog), Err(ConfigError::UnknownType(name)) if name == "Nope"));
}

#[test]
fn one_way_calls_do_not_wait() {
	init_tracing();
	let (tx, rx) = mpsc::channel::<i64>();
	let tx = Mutex::new(tx);
	let object: Arc<dyn RemoteObject> = DelegateObject::builder("Log")
		.method(MethodDescriptor::new("record").one_way(), move |call| {
			let value = call.arg(0).and_then(Value::as_int).unwrap_or_default();
			let _ = tx.lock().send(value);
			Err(RemotingError::application("Log", "nobody sees this"))
		})
		.build();
	let server = Domain::create("life-oneway-server");
	let client = Domain::create("life-oneway-client");
	let proxy = publish(&server, &client, &object, "log.rem");

	client
		.execute_in(|| proxy.invoke_one_way("record", vec![7.into()]))
		.expect("enter")
		.expect("send");
	assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(7));

	// A synchronous call to a one-way method answers with an empty reply.
	assert_eq!(invoke_in(&client, &proxy, "record", vec![8.into()]), Ok(Value::Null));
	assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(8));
	assert_eq!(server.is_one_way(&MethodCall::new("log.rem", "record")), Ok(true));
}

#[derive(Default)]
struct Counting {
	started: AtomicUsize,
	finished: AtomicUsize,
}

struct CountingSink(Arc<Counting>);

impl DynamicSink for CountingSink {
	fn name(&self) -> &str {
		"counting"
	}

	fn process_start(&self, _msg: &Message) {
		self.0.started.fetch_add(1, Ordering::SeqCst);
	}

	fn process_finish(&self, _reply: &Message) {
		self.0.finished.fetch_add(1, Ordering::SeqCst);
	}
}

#[test]
fn dynamic_sinks_observe_every_dispatch() {
	init_tracing();
	let domain = Domain::create("life-dynamic");
	let object = calculator();
	let proxy = proxy_in(&domain, &domain.marshal(&object, Some("calc.rem")).expect("marshal"));
	let counts = Arc::new(Counting::default());
	let server = proxy.identity().server().expect("server identity");
	server.add_dynamic_sink(Arc::new(CountingSink(counts.clone())));

	invoke_in(&domain, &proxy, "add", vec![]).expect("call");
	invoke_in(&domain, &proxy, "fail", vec![]).expect_err("fault");
	assert_eq!(counts.started.load(Ordering::SeqCst), 2);
	assert_eq!(counts.finished.load(Ordering::SeqCst), 2);

	assert!(server.remove_dynamic_sink("counting"));
	invoke_in(&domain, &proxy, "add", vec![]).expect("call");
	assert_eq!(counts.started.load(Ordering::SeqCst), 2);
}

struct Echo;

impl MessageSink for Echo {
	fn sync_process_message(&self, msg: Message) -> Message {
		let Message::Raw(raw) = msg else {
			return msg.fault_reply(RemotingError::InvalidArgument("raw only".into()));
		};
		let value = raw.properties.get("ping").cloned().unwrap_or_default();
		Message::Return(ReturnMessage {
			uri: raw.uri,
			return_value: value,
			..ReturnMessage::default()
		})
	}
}

#[test]
fn router_admission_rules() {
	init_tracing();
	let domain = Domain::create("life-router");
	let router = domain.router();

	let raw_object: Arc<dyn RemoteObject> = DelegateObject::builder("Echo").raw_sink(Echo).build();
	domain.marshal(&raw_object, Some("echo.rem")).expect("marshal");
	let mut raw = RawMessage::new("echo.rem");
	raw.properties.insert("ping".into(), Value::from("pong"));
	let (kind, reply) = router.dispatch_message(raw.into());
	assert_eq!(kind, ProcessingKind::Complete);
	assert_eq!(reply.expect("reply").into_result(), Ok(Value::from("pong")));

	domain.marshal(&calculator(), Some("calc.rem")).expect("marshal");
	let raw_to_plain = router.sync_dispatch_message(RawMessage::new("calc.rem").into());
	assert!(matches!(raw_to_plain.fault(), Some(RemotingError::RawDispatchUnsupported(_))));

	let domain_object: Arc<dyn RemoteObject> = DelegateObject::builder("Host")
		.method(MethodDescriptor::new("run"), |_| Ok(MethodReturn::void()))
		.domain_object()
		.build();
	domain.marshal(&domain_object, Some("host.rem")).expect("marshal");
	let rejected = router.sync_dispatch_message(MethodCall::new("host.rem", "run").into());
	assert!(matches!(rejected.fault(), Some(RemotingError::DomainObjectRejected(_))));

	let unknown = router.sync_dispatch_message(MethodCall::new("nobody.rem", "run").into());
	assert!(matches!(unknown.fault(), Some(RemotingError::Disconnected(_))));

	let empty = router.sync_dispatch_message(MethodCall::new("", "run").into());
	assert!(matches!(empty.fault(), Some(RemotingError::NullArgument(_))));

	let reply = router.sync_dispatch_message(ReturnMessage::default().into());
	assert!(reply.fault().is_some());
}
