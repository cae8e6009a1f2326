//! Exercises `Resolver::bootstrap` against a real local gRPC server, rather
//! than only unit-testing the descriptor-closure walk. The server advertises
//! a fake `testpkg.Greeter/SayHello` service through `tonic-reflection` and
//! nothing else; bootstrap must still be able to discover and decode it.

use extractor::error::ExtractError;
use extractor::peer::PeerClient;
use extractor::reflect::Resolver;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    MethodDescriptorProto, ServiceDescriptorProto,
};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

fn greeter_file_descriptor_set() -> FileDescriptorSet {
    let name_field = FieldDescriptorProto {
        name: Some("name".to_string()),
        number: Some(1),
        label: Some(Label::Optional as i32),
        r#type: Some(Type::String as i32),
        ..Default::default()
    };
    let greeting_field = FieldDescriptorProto {
        name: Some("greeting".to_string()),
        number: Some(1),
        label: Some(Label::Optional as i32),
        r#type: Some(Type::String as i32),
        ..Default::default()
    };

    let request = DescriptorProto {
        name: Some("SayHelloRequest".to_string()),
        field: vec![name_field],
        ..Default::default()
    };
    let response = DescriptorProto {
        name: Some("SayHelloResponse".to_string()),
        field: vec![greeting_field],
        ..Default::default()
    };

    let method = MethodDescriptorProto {
        name: Some("SayHello".to_string()),
        input_type: Some(".testpkg.SayHelloRequest".to_string()),
        output_type: Some(".testpkg.SayHelloResponse".to_string()),
        ..Default::default()
    };
    let service = ServiceDescriptorProto {
        name: Some("Greeter".to_string()),
        method: vec![method],
        ..Default::default()
    };

    let file = FileDescriptorProto {
        name: Some("testpkg/greeter.proto".to_string()),
        package: Some("testpkg".to_string()),
        message_type: vec![request, response],
        service: vec![service],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    };

    FileDescriptorSet { file: vec![file] }
}

async fn spawn_reflection_only_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");

    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_file_descriptor_set(greeter_file_descriptor_set())
        .build_v1()
        .expect("build reflection service");

    tokio::spawn(async move {
        Server::builder()
            .add_service(reflection_service)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .expect("server");
    });

    format!("http://{addr}")
}

#[tokio::test]
async fn bootstrap_discovers_service_advertised_only_via_reflection() {
    let addr = spawn_reflection_only_server().await;
    let peer = PeerClient::connect(&addr, true, 16 * 1024 * 1024)
        .await
        .expect("connect");

    let resolver = Resolver::bootstrap(&peer).await.expect("bootstrap");

    // The server implements no business RPC, only reflection, so invoking
    // the discovered method must fail at the transport layer (the server
    // returns "unimplemented") rather than fail to resolve the method at
    // all. Reaching a `Transport` error proves the descriptor walk found
    // `testpkg.Greeter.SayHello` and built a valid request from JSON.
    let result = resolver
        .invoke_json(
            &peer,
            "testpkg.Greeter.SayHello",
            &serde_json::json!({"name": "world"}),
        )
        .await;

    match result {
        Err(ExtractError::Transport { method, .. }) => {
            assert_eq!(method, "testpkg.Greeter/SayHello");
        }
        other => panic!("expected a transport error from the unimplemented method, got {other:?}"),
    }
}

#[tokio::test]
async fn invoke_json_rejects_a_method_the_reflection_walk_never_discovered() {
    let addr = spawn_reflection_only_server().await;
    let peer = PeerClient::connect(&addr, true, 16 * 1024 * 1024)
        .await
        .expect("connect");

    let resolver = Resolver::bootstrap(&peer).await.expect("bootstrap");

    let result = resolver
        .invoke_json(&peer, "testpkg.Greeter.NoSuchMethod", &serde_json::json!({}))
        .await;

    match result {
        Err(ExtractError::UnknownMethod(method)) => {
            assert_eq!(method, "testpkg.Greeter.NoSuchMethod");
        }
        other => panic!("expected UnknownMethod, got {other:?}"),
    }
}
