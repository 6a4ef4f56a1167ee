use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use pretty_assertions::assert_eq;
use remora_remoting::channel::cross_domain;
use remora_remoting::{DelegateObject, Domain, MethodDescriptor, MethodReturn, ObjectFactory, RemoteObject, RemotingError, Value, WellKnownMode};

use crate::common::{init_tracing, invoke_in};

/// Factory whose objects report which instance served the call.
fn numbered(created: Arc<AtomicUsize>) -> ObjectFactory {
	static NEXT: AtomicI64 = AtomicI64::new(1);
	Arc::new(move || -> Arc<dyn RemoteObject> {
		created.fetch_add(1, Ordering::SeqCst);
		let instance = NEXT.fetch_add(1, Ordering::SeqCst);
		DelegateObject::builder("Counter")
			.method(MethodDescriptor::new("instance"), move |_| Ok(MethodReturn::value(instance)))
			.build()
	})
}

#[test]
fn singleton_is_activated_once_under_concurrency() {
	const CALLERS: usize = 8;
	init_tracing();
	let server = Domain::create("wk-singleton-server");
	let client = Domain::create("wk-singleton-client");
	let created = Arc::new(AtomicUsize::new(0));
	server
		.well_known()
		.register("counter.rem", "Counter", WellKnownMode::Singleton, numbered(created.clone()))
		.expect("register");
	assert_eq!(server.server_type_for_uri("counter.rem"), Ok(Some("Counter".to_string())));

	let url = cross_domain::url_for(server.id(), "counter.rem");
	let barrier = Arc::new(Barrier::new(CALLERS));
	let handles: Vec<_> = (0..CALLERS)
		.map(|_| {
			let (client, url, barrier) = (client.clone(), url.clone(), barrier.clone());
			thread::spawn(move || {
				let proxy = client.connect(&url).expect("connect");
				barrier.wait();
				invoke_in(&client, &proxy, "instance", vec![])
			})
		})
		.collect();
	let instances: Vec<Value> = handles
		.into_iter()
		.map(|h| h.join().expect("caller").expect("call"))
		.collect();

	assert_eq!(created.load(Ordering::SeqCst), 1);
	assert!(instances.windows(2).all(|pair| pair[0] == pair[1]), "{instances:?}");
	let identity = server.identities().resolve("counter.rem").expect("resolve").expect("activated");
	assert!(identity.is_well_known());
}

#[test]
fn single_call_serves_each_call_with_a_fresh_instance() {
	init_tracing();
	let server = Domain::create("wk-single-call-server");
	let client = Domain::create("wk-single-call-client");
	server
		.well_known()
		.register("fresh.rem", "Counter", WellKnownMode::SingleCall, numbered(Arc::new(AtomicUsize::new(0))))
		.expect("register");

	let proxy = client.connect(&cross_domain::url_for(server.id(), "fresh.rem")).expect("connect");
	let first = invoke_in(&client, &proxy, "instance", vec![]).expect("first");
	let second = invoke_in(&client, &proxy, "instance", vec![]).expect("second");
	assert_ne!(first, second);
}

#[test]
fn registrations_are_unique_per_uri() {
	init_tracing();
	let domain = Domain::create("wk-unique");
	let registry = domain.well_known();
	let factory = numbered(Arc::new(AtomicUsize::new(0)));
	registry
		.register("dup.rem", "Counter", WellKnownMode::Singleton, factory.clone())
		.expect("register");

	assert_eq!(
		registry.register("/DUP.rem", "Counter", WellKnownMode::Singleton, factory.clone()),
		Err(RemotingError::UriClash("/DUP.rem".into()))
	);
	assert_eq!(registry.entries().len(), 1);
	assert!(registry.unregister("dup.rem"));
	assert!(registry.lookup("dup.rem").is_none());
	assert_eq!(domain.server_type_for_uri("dup.rem"), Ok(None));
}

#[test]
fn disconnecting_a_singleton_allows_reactivation() {
	init_tracing();
	let domain = Domain::create("wk-reactivate");
	let created = Arc::new(AtomicUsize::new(0));
	domain
		.well_known()
		.register("again.rem", "Counter", WellKnownMode::Singleton, numbered(created.clone()))
		.expect("register");

	let proxy = domain.connect(&cross_domain::url_for(domain.id(), "again.rem")).expect("connect");
	let first = invoke_in(&domain, &proxy, "instance", vec![]).expect("first");
	let identity = domain.identities().resolve("again.rem").expect("resolve").expect("activated");
	let object = identity.server().expect("server").object().clone();

	assert_eq!(domain.disconnect(&object), Ok(true));
	let second = invoke_in(&domain, &proxy, "instance", vec![]).expect("second");
	assert_ne!(first, second);
	assert_eq!(created.load(Ordering::SeqCst), 2);
}
