use std::time::Duration;

use pretty_assertions::assert_eq;
use remora_remoting::channel::cross_domain;
use remora_remoting::{ChannelData, Domain, MethodCall, ObjRef, RemotingConfig, RemotingError, Value};

use crate::common::{calculator, init_tracing, invoke_in, publish};

#[test]
fn cross_domain_call_matches_direct_invocation() {
	init_tracing();
	let server = Domain::create("xd-direct-server");
	let client = Domain::create("xd-direct-client");
	let object = calculator();
	let proxy = publish(&server, &client, &object, "calc.rem");

	let remote = client
		.execute_in(|| proxy.invoke_message("add", vec![2.into(), 3.into()]))
		.expect("enter")
		.expect("call");
	let direct = server
		.execute_message(&object, MethodCall::new("calc.rem", "add").with_args(vec![2.into(), 3.into()]))
		.expect("direct");

	assert_eq!(remote.return_value, Value::Int(5));
	assert_eq!(remote.return_value, direct.return_value);
	assert_eq!(remote.out_args, direct.out_args);
}

#[test]
fn plain_data_is_smuggled_and_everything_else_serialized() {
	init_tracing();
	let server = Domain::create("xd-envelope-server");
	let client = Domain::create("xd-envelope-client");
	let proxy = publish(&server, &client, &calculator(), "calc.rem");
	let sink = cross_domain::sink_for(server.id());

	assert_eq!(invoke_in(&client, &proxy, "add", vec![1.into(), 1.into()]), Ok(Value::Int(2)));
	assert_eq!((sink.smuggled_count(), sink.serialized_count()), (2, 0));

	let external = ObjRef {
		uri: "ext.rem".into(),
		type_name: "External".into(),
		channel_data: vec![ChannelData::Opaque {
			channel: "tcp".into(),
			data: vec![1, 2, 3],
		}],
		well_known: false,
	};
	let described = invoke_in(&client, &proxy, "describe", vec![external.into()]);
	assert_eq!(described, Ok(Value::from("ext.rem")));
	assert_eq!((sink.smuggled_count(), sink.serialized_count()), (3, 1));
}

#[test]
fn faults_and_panics_come_back_as_errors() {
	init_tracing();
	let server = Domain::create("xd-fault-server");
	let client = Domain::create("xd-fault-client");
	let proxy = publish(&server, &client, &calculator(), "calc.rem");

	assert_eq!(
		invoke_in(&client, &proxy, "fail", vec![]),
		Err(RemotingError::application("Overdraft", "insufficient funds"))
	);
	match invoke_in(&client, &proxy, "explode", vec![]) {
		Err(RemotingError::Panicked(reason)) => assert!(reason.contains("boom"), "{reason}"),
		other => panic!("expected a panic fault, got {other:?}"),
	}
	assert!(matches!(
		invoke_in(&client, &proxy, "missing", vec![]),
		Err(RemotingError::MethodNotFound { .. })
	));
	assert!(matches!(
		invoke_in(&client, &proxy, "internal", vec![]),
		Err(RemotingError::NotRemotelyCallable { .. })
	));

	// The channel still works after failures.
	assert_eq!(invoke_in(&client, &proxy, "add", vec![4.into(), 4.into()]), Ok(Value::Int(8)));
}

#[test]
fn custom_errors_mask_faults_only_across_domains() {
	init_tracing();
	let config = RemotingConfig {
		custom_errors: true,
		..RemotingConfig::default()
	};
	let server = Domain::with_config("xd-masked-server", config);
	let client = Domain::create("xd-masked-client");
	let object = calculator();
	let remote = publish(&server, &client, &object, "calc.rem");
	let local = crate::common::proxy_in(&server, &object_ref(&server, &object));

	assert_eq!(invoke_in(&client, &remote, "fail", vec![]), Err(RemotingError::Internal));
	assert_eq!(
		invoke_in(&server, &local, "fail", vec![]),
		Err(RemotingError::application("Overdraft", "insufficient funds"))
	);
}

fn object_ref(domain: &Domain, object: &std::sync::Arc<dyn remora_remoting::RemoteObject>) -> ObjRef {
	domain.marshal(object, None).expect("marshal")
}

#[test]
fn begin_invoke_delivers_the_reply_later() {
	init_tracing();
	let server = Domain::create("xd-async-server");
	let client = Domain::create("xd-async-client");
	let proxy = publish(&server, &client, &calculator(), "calc.rem");

	let pending = client
		.execute_in(|| proxy.begin_invoke("add", vec![20.into(), 22.into()]))
		.expect("enter")
		.expect("begin");
	assert_eq!(pending.end_invoke(Some(Duration::from_secs(5))), Ok(Value::Int(42)));
	assert!(pending.is_completed());

	let slow = client
		.execute_in(|| proxy.begin_invoke("sleep", vec![200.into()]))
		.expect("enter")
		.expect("begin");
	assert_eq!(slow.end_invoke(Some(Duration::from_millis(1))), Err(RemotingError::Timeout));
	assert_eq!(slow.end_invoke(None), Ok(Value::Int(200)));
}

#[test]
fn foreign_process_references_are_refused() {
	init_tracing();
	let domain = Domain::create("xd-foreign");
	let mut objref = domain.marshal(&calculator(), Some("calc.rem")).expect("marshal");
	for data in &mut objref.channel_data {
		if let ChannelData::CrossDomain(target) = data {
			target.process_id = target.process_id.wrapping_add(1);
		}
	}
	let other = Domain::create("xd-foreign-client");
	let err = other.unmarshal(&objref).err();
	assert!(matches!(err, Some(RemotingError::CrossProcessUnsupported(_))), "{err:?}");
}

#[test]
fn connect_by_url_reaches_a_published_object() {
	init_tracing();
	let server = Domain::create("xd-url-server");
	let client = Domain::create("xd-url-client");
	server.marshal(&calculator(), Some("calc.rem")).expect("marshal");

	let url = cross_domain::url_for(server.id(), "calc.rem");
	let proxy = client.connect(&url).expect("connect");
	assert_eq!(proxy.uri(), "calc.rem");
	assert_eq!(invoke_in(&client, &proxy, "add", vec![5.into(), 6.into()]), Ok(Value::Int(11)));

	assert!(matches!(client.connect("nowhere://x"), Err(RemotingError::CantCreateChannelSink(_))));
}
