use std::collections::{HashMap, HashSet};

use base64::Engine;
use prost::Message as _;
use prost_reflect::{DescriptorPool, DynamicMessage, FieldDescriptor, Kind, MapKey, ReflectMessage, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tracing::{debug, warn};

use crate::error::ExtractError;
use crate::peer::PeerClient;

mod v1 {
    pub use tonic_reflection::pb::v1::server_reflection_client::ServerReflectionClient;
    pub use tonic_reflection::pb::v1::server_reflection_request::MessageRequest;
    pub use tonic_reflection::pb::v1::server_reflection_response::MessageResponse;
    pub use tonic_reflection::pb::v1::{ServerReflectionRequest, ServerReflectionResponse};
}

mod v1alpha {
    pub use tonic_reflection::pb::v1alpha::server_reflection_client::ServerReflectionClient;
    pub use tonic_reflection::pb::v1alpha::server_reflection_request::MessageRequest;
    pub use tonic_reflection::pb::v1alpha::server_reflection_response::MessageResponse;
    pub use tonic_reflection::pb::v1alpha::{ServerReflectionRequest, ServerReflectionResponse};
}

/// A bidirectional reflection session abstracting over the v1/v1alpha
/// protocol difference (§9 "Open question — reflection version": try v1,
/// fall back to v1alpha).
enum Session {
    V1 {
        tx: mpsc::Sender<v1::ServerReflectionRequest>,
        rx: tonic::Streaming<v1::ServerReflectionResponse>,
    },
    V1Alpha {
        tx: mpsc::Sender<v1alpha::ServerReflectionRequest>,
        rx: tonic::Streaming<v1alpha::ServerReflectionResponse>,
    },
}

impl Session {
    async fn open(channel: Channel) -> Result<Self, ExtractError> {
        let (tx, rx) = mpsc::channel::<v1::ServerReflectionRequest>(1);
        let mut client = v1::ServerReflectionClient::new(channel.clone());
        match client
            .server_reflection_info(ReceiverStream::new(rx))
            .await
        {
            Ok(response) => {
                return Ok(Session::V1 {
                    tx,
                    rx: response.into_inner(),
                })
            }
            Err(err) => debug!(%err, "v1 reflection unavailable, trying v1alpha"),
        }

        let (tx, rx) = mpsc::channel::<v1alpha::ServerReflectionRequest>(1);
        let mut client = v1alpha::ServerReflectionClient::new(channel);
        let response = client
            .server_reflection_info(ReceiverStream::new(rx))
            .await
            .map_err(|_| ExtractError::ReflectionUnavailable)?;

        Ok(Session::V1Alpha {
            tx,
            rx: response.into_inner(),
        })
    }

    async fn file_by_filename(&mut self, name: &str) -> Result<Vec<Vec<u8>>, ExtractError> {
        self.request(
            |_| v1::MessageRequest::FileByFilename(name.to_string()),
            |_| v1alpha::MessageRequest::FileByFilename(name.to_string()),
        )
        .await
    }

    async fn file_containing_symbol(&mut self, symbol: &str) -> Result<Vec<Vec<u8>>, ExtractError> {
        self.request(
            |_| v1::MessageRequest::FileContainingSymbol(symbol.to_string()),
            |_| v1alpha::MessageRequest::FileContainingSymbol(symbol.to_string()),
        )
        .await
    }

    async fn list_services(&mut self) -> Result<Vec<String>, ExtractError> {
        match self {
            Session::V1 { tx, rx } => {
                tx.send(v1::ServerReflectionRequest {
                    host: String::new(),
                    message_request: Some(v1::MessageRequest::ListServices(String::new())),
                })
                .await
                .map_err(|_| ExtractError::ReflectionUnavailable)?;
                let resp = rx
                    .message()
                    .await
                    .map_err(|_| ExtractError::ReflectionUnavailable)?
                    .ok_or(ExtractError::ReflectionUnavailable)?;
                match resp.message_response {
                    Some(v1::MessageResponse::ListServicesResponse(list)) => {
                        Ok(list.service.into_iter().map(|s| s.name).collect())
                    }
                    _ => Err(ExtractError::ReflectionUnavailable),
                }
            }
            Session::V1Alpha { tx, rx } => {
                tx.send(v1alpha::ServerReflectionRequest {
                    host: String::new(),
                    message_request: Some(v1alpha::MessageRequest::ListServices(String::new())),
                })
                .await
                .map_err(|_| ExtractError::ReflectionUnavailable)?;
                let resp = rx
                    .message()
                    .await
                    .map_err(|_| ExtractError::ReflectionUnavailable)?
                    .ok_or(ExtractError::ReflectionUnavailable)?;
                match resp.message_response {
                    Some(v1alpha::MessageResponse::ListServicesResponse(list)) => {
                        Ok(list.service.into_iter().map(|s| s.name).collect())
                    }
                    _ => Err(ExtractError::ReflectionUnavailable),
                }
            }
        }
    }

    async fn request(
        &mut self,
        v1_req: impl FnOnce(&str) -> v1::MessageRequest,
        v1alpha_req: impl FnOnce(&str) -> v1alpha::MessageRequest,
    ) -> Result<Vec<Vec<u8>>, ExtractError> {
        match self {
            Session::V1 { tx, rx } => {
                tx.send(v1::ServerReflectionRequest {
                    host: String::new(),
                    message_request: Some(v1_req("")),
                })
                .await
                .map_err(|_| ExtractError::ReflectionUnavailable)?;
                let resp = rx
                    .message()
                    .await
                    .map_err(|_| ExtractError::ReflectionUnavailable)?
                    .ok_or(ExtractError::ReflectionUnavailable)?;
                match resp.message_response {
                    Some(v1::MessageResponse::FileDescriptorResponse(f)) => {
                        Ok(f.file_descriptor_proto)
                    }
                    Some(v1::MessageResponse::ErrorResponse(e)) => {
                        warn!(code = e.error_code, msg = %e.error_message, "reflection error response");
                        Ok(Vec::new())
                    }
                    _ => Ok(Vec::new()),
                }
            }
            Session::V1Alpha { tx, rx } => {
                tx.send(v1alpha::ServerReflectionRequest {
                    host: String::new(),
                    message_request: Some(v1alpha_req("")),
                })
                .await
                .map_err(|_| ExtractError::ReflectionUnavailable)?;
                let resp = rx
                    .message()
                    .await
                    .map_err(|_| ExtractError::ReflectionUnavailable)?
                    .ok_or(ExtractError::ReflectionUnavailable)?;
                match resp.message_response {
                    Some(v1alpha::MessageResponse::FileDescriptorResponse(f)) => {
                        Ok(f.file_descriptor_proto)
                    }
                    Some(v1alpha::MessageResponse::ErrorResponse(e)) => {
                        warn!(code = e.error_code, msg = %e.error_message, "reflection error response");
                        Ok(Vec::new())
                    }
                    _ => Ok(Vec::new()),
                }
            }
        }
    }
}

/// Holds the descriptor pool built from a peer's reflection service and
/// converts dynamic messages to/from JSON the way CosmosSDK's REST gateway
/// would (lowerCamelCase field names, `@type`-tagged `Any` values).
pub struct Resolver {
    pool: DescriptorPool,
}

impl Resolver {
    pub async fn bootstrap(peer: &PeerClient) -> Result<Self, ExtractError> {
        let mut session = Session::open(peer.channel()).await?;
        let services = session.list_services().await?;

        let mut seen_files: HashSet<String> = HashSet::new();
        let mut files: HashMap<String, prost_types::FileDescriptorProto> = HashMap::new();
        let mut pending: Vec<String> = Vec::new();

        for service in &services {
            if service == "grpc.reflection.v1.ServerReflection"
                || service == "grpc.reflection.v1alpha.ServerReflection"
            {
                continue;
            }
            let raw = session.file_containing_symbol(service).await?;
            ingest(&raw, &mut files, &mut seen_files, &mut pending);
        }

        while let Some(filename) = pending.pop() {
            if seen_files.contains(&filename) {
                continue;
            }
            let raw = session.file_by_filename(&filename).await?;
            ingest(&raw, &mut files, &mut seen_files, &mut pending);
        }

        let mut pool = DescriptorPool::new();
        pool.add_file_descriptor_protos(files.into_values())
            .map_err(|e| ExtractError::DecodeFailure {
                method: "reflection bootstrap".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    /// Calls `method_fqn` (`package.Service.Method`) with a JSON request
    /// body and returns the JSON-decoded response.
    pub async fn invoke_json(
        &self,
        peer: &PeerClient,
        method_fqn: &str,
        request_json: &serde_json::Value,
    ) -> Result<serde_json::Value, ExtractError> {
        let (service, method) = method_fqn
            .rsplit_once('.')
            .ok_or_else(|| ExtractError::UnknownMethod(method_fqn.to_string()))?;

        let service_desc = self
            .pool
            .get_service_by_name(service)
            .ok_or_else(|| ExtractError::UnknownMethod(method_fqn.to_string()))?;
        let method_desc = service_desc
            .methods()
            .find(|m| m.name() == method)
            .ok_or_else(|| ExtractError::UnknownMethod(method_fqn.to_string()))?;

        let input_desc = method_desc.input();
        let request = DynamicMessage::deserialize(input_desc, request_json.clone()).map_err(|e| {
            ExtractError::DecodeFailure {
                method: method_fqn.to_string(),
                reason: e.to_string(),
            }
        })?;

        let request_bytes = request.encode_to_vec();
        let wire_path = format!("{}/{}", service, method);
        let response_bytes = peer.invoke(&wire_path, request_bytes).await?;

        let output_desc = method_desc.output();
        let response = DynamicMessage::decode(output_desc, response_bytes.as_slice()).map_err(|e| {
            ExtractError::DecodeFailure {
                method: method_fqn.to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut path = HashSet::new();
        Ok(message_to_json(&response, &mut path))
    }
}

fn ingest(
    raw_files: &[Vec<u8>],
    files: &mut HashMap<String, prost_types::FileDescriptorProto>,
    seen: &mut HashSet<String>,
    pending: &mut Vec<String>,
) {
    for bytes in raw_files {
        let Ok(file) = prost_types::FileDescriptorProto::decode(bytes.as_slice()) else {
            continue;
        };
        let Some(name) = file.name.clone() else { continue };
        if seen.contains(&name) {
            continue;
        }
        for dep in &file.dependency {
            if !seen.contains(dep) {
                pending.push(dep.clone());
            }
        }
        seen.insert(name.clone());
        files.insert(name, file);
    }
}

/// Converts a [`DynamicMessage`] to `serde_json::Value` using each field's
/// `json_name()` for casing, with an explicit cycle guard on `Any`
/// resolution (a `type_url` already in `any_path` is emitted unresolved
/// rather than recursed into).
fn message_to_json(message: &DynamicMessage, any_path: &mut HashSet<String>) -> serde_json::Value {
    if message.descriptor().full_name() == "google.protobuf.Any" {
        return any_to_json(message, any_path);
    }

    let mut map = serde_json::Map::new();
    for (field, value) in message.fields() {
        map.insert(field.json_name().to_string(), value_to_json(&field, value, any_path));
    }
    serde_json::Value::Object(map)
}

fn any_to_json(message: &DynamicMessage, any_path: &mut HashSet<String>) -> serde_json::Value {
    let type_url = message
        .get_field_by_name("type_url")
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    let value_bytes = message
        .get_field_by_name("value")
        .and_then(|v| v.as_bytes().map(|b| b.to_vec()))
        .unwrap_or_default();

    if any_path.contains(&type_url) {
        return serde_json::json!({
            "@type": type_url,
            "value_base64": base64::engine::general_purpose::STANDARD.encode(&value_bytes),
        });
    }

    let message_name = type_url
        .rsplit_once('/')
        .map(|(_, name)| name)
        .unwrap_or(&type_url);

    let Some(inner_desc) = message.descriptor().parent_pool().get_message_by_name(message_name) else {
        return serde_json::json!({
            "@type": type_url,
            "value_base64": base64::engine::general_purpose::STANDARD.encode(&value_bytes),
        });
    };

    let Ok(inner) = DynamicMessage::decode(inner_desc, value_bytes.as_slice()) else {
        return serde_json::json!({
            "@type": type_url,
            "value_base64": base64::engine::general_purpose::STANDARD.encode(&value_bytes),
        });
    };

    any_path.insert(type_url.clone());
    let mut inner_json = message_to_json(&inner, any_path);
    any_path.remove(&type_url);

    if let serde_json::Value::Object(ref mut map) = inner_json {
        map.insert("@type".to_string(), serde_json::Value::String(type_url));
    }
    inner_json
}

fn value_to_json(field: &FieldDescriptor, value: &Value, any_path: &mut HashSet<String>) -> serde_json::Value {
    match value {
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::I32(n) => serde_json::Value::from(*n),
        Value::I64(n) => serde_json::Value::String(n.to_string()),
        Value::U32(n) => serde_json::Value::from(*n),
        Value::U64(n) => serde_json::Value::String(n.to_string()),
        Value::F32(n) => serde_json::Value::from(*n),
        Value::F64(n) => serde_json::Value::from(*n),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b)),
        Value::EnumNumber(n) => enum_to_json(field, *n),
        Value::Message(m) => message_to_json(m, any_path),
        Value::List(items) => {
            serde_json::Value::Array(items.iter().map(|v| value_to_json(field, v, any_path)).collect())
        }
        Value::Map(entries) => {
            let mut map = serde_json::Map::new();
            for (k, v) in entries {
                map.insert(map_key_to_string(k), value_to_json(field, v, any_path));
            }
            serde_json::Value::Object(map)
        }
    }
}

fn enum_to_json(field: &FieldDescriptor, number: i32) -> serde_json::Value {
    if let Kind::Enum(enum_desc) = field.kind() {
        if let Some(value_desc) = enum_desc.get_value(number) {
            return serde_json::Value::String(value_desc.name().to_string());
        }
    }
    serde_json::Value::from(number)
}

fn map_key_to_string(key: &MapKey) -> String {
    match key {
        MapKey::Bool(b) => b.to_string(),
        MapKey::I32(n) => n.to_string(),
        MapKey::I64(n) => n.to_string(),
        MapKey::U32(n) => n.to_string(),
        MapKey::U64(n) => n.to_string(),
        MapKey::String(s) => s.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::field_descriptor_proto::{Label, Type};
    use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto};

    fn field(name: &str, number: i32, ty: Type, label: Label, type_name: Option<&str>) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(label as i32),
            r#type: Some(ty as i32),
            type_name: type_name.map(str::to_string),
            ..Default::default()
        }
    }

    /// A self-contained pool: our own `google.protobuf.Any` stand-in (no
    /// well-known-types dependency, since nothing here decodes a real one)
    /// plus a `testpkg.Leaf` message with an `Any` field, used both for
    /// plain-value conversion and for the cycle-guard test below.
    fn build_pool() -> DescriptorPool {
        let any_file = FileDescriptorProto {
            name: Some("google/protobuf/any.proto".to_string()),
            package: Some("google.protobuf".to_string()),
            message_type: vec![DescriptorProto {
                name: Some("Any".to_string()),
                field: vec![
                    field("type_url", 1, Type::String, Label::Optional, None),
                    field("value", 2, Type::Bytes, Label::Optional, None),
                ],
                ..Default::default()
            }],
            syntax: Some("proto3".to_string()),
            ..Default::default()
        };

        let leaf_file = FileDescriptorProto {
            name: Some("testpkg/leaf.proto".to_string()),
            package: Some("testpkg".to_string()),
            dependency: vec!["google/protobuf/any.proto".to_string()],
            message_type: vec![DescriptorProto {
                name: Some("Leaf".to_string()),
                field: vec![
                    field("label", 1, Type::String, Label::Optional, None),
                    field(
                        "tags",
                        2,
                        Type::String,
                        Label::Repeated,
                        None,
                    ),
                    field(
                        "child",
                        3,
                        Type::Message,
                        Label::Optional,
                        Some(".google.protobuf.Any"),
                    ),
                ],
                ..Default::default()
            }],
            syntax: Some("proto3".to_string()),
            ..Default::default()
        };

        let mut pool = DescriptorPool::new();
        pool.add_file_descriptor_protos(vec![any_file, leaf_file])
            .expect("valid descriptor set");
        pool
    }

    #[test]
    fn converts_scalar_and_repeated_fields_with_camel_case_names() {
        let pool = build_pool();
        let leaf_desc = pool.get_message_by_name("testpkg.Leaf").unwrap();

        let mut leaf = DynamicMessage::new(leaf_desc);
        leaf.set_field_by_name("label", Value::String("root".to_string()));
        leaf.set_field_by_name(
            "tags",
            Value::List(vec![Value::String("a".to_string()), Value::String("b".to_string())]),
        );

        let json = message_to_json(&leaf, &mut HashSet::new());
        assert_eq!(json, serde_json::json!({"label": "root", "tags": ["a", "b"]}));
    }

    #[test]
    fn any_cycle_guard_stops_at_the_second_occurrence_of_a_type_url() {
        let pool = build_pool();
        let leaf_desc = pool.get_message_by_name("testpkg.Leaf").unwrap();
        let any_desc = pool.get_message_by_name("google.protobuf.Any").unwrap();

        let type_url = "type.googleapis.com/testpkg.Leaf".to_string();

        // The innermost `Any` shares `type_url` with the one enclosing it,
        // simulating a cyclic reference; its `value` bytes are irrelevant
        // because the guard short-circuits before any decode is attempted.
        let mut inner_any = DynamicMessage::new(any_desc.clone());
        inner_any.set_field_by_name("type_url", Value::String(type_url.clone()));
        inner_any.set_field_by_name("value", Value::Bytes(Vec::new().into()));

        let mut leaf = DynamicMessage::new(leaf_desc.clone());
        leaf.set_field_by_name("label", Value::String("inner".to_string()));
        leaf.set_field_by_name("child", Value::Message(inner_any));

        let leaf_bytes = leaf.encode_to_vec();

        let mut outer_any = DynamicMessage::new(any_desc);
        outer_any.set_field_by_name("type_url", Value::String(type_url.clone()));
        outer_any.set_field_by_name("value", Value::Bytes(leaf_bytes.into()));

        let json = message_to_json(&outer_any, &mut HashSet::new());

        assert_eq!(
            json,
            serde_json::json!({
                "label": "inner",
                "child": {"@type": type_url.clone(), "value_base64": ""},
                "@type": type_url,
            })
        );
    }
}
