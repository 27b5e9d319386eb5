use tonic_build::manual::{Builder, Method, Service};

// rust-protobuf messages are exchanged through `crate::codec::ProtobufCodec`,
// so the service stubs are described by hand instead of through prost.
fn p4runtime_service() -> Service {
    let method = |name: &str, route: &str, input: &str, output: &str| {
        Method::builder()
            .name(name)
            .route_name(route)
            .input_type(format!("crate::p4runtime::{}", input))
            .output_type(format!("crate::p4runtime::{}", output))
            .codec_path("crate::codec::ProtobufCodec")
    };
    Service::builder()
        .name("P4Runtime")
        .package("p4.v1")
        .method(method("write", "Write", "WriteRequest", "WriteResponse").build())
        .method(
            method("read", "Read", "ReadRequest", "ReadResponse")
                .server_streaming()
                .build(),
        )
        .method(
            method(
                "set_forwarding_pipeline_config",
                "SetForwardingPipelineConfig",
                "SetForwardingPipelineConfigRequest",
                "SetForwardingPipelineConfigResponse",
            )
            .build(),
        )
        .method(
            method(
                "get_forwarding_pipeline_config",
                "GetForwardingPipelineConfig",
                "GetForwardingPipelineConfigRequest",
                "GetForwardingPipelineConfigResponse",
            )
            .build(),
        )
        .method(
            method(
                "stream_channel",
                "StreamChannel",
                "StreamMessageRequest",
                "StreamMessageResponse",
            )
            .client_streaming()
            .server_streaming()
            .build(),
        )
        .method(
            method(
                "capabilities",
                "Capabilities",
                "CapabilitiesRequest",
                "CapabilitiesResponse",
            )
            .build(),
        )
        .build()
}

fn main() {
    let protos = [
        ("p4runtime/proto", "p4/v1/p4runtime.proto"),
        ("p4runtime/proto", "p4/v1/p4data.proto"),
        ("p4runtime/proto", "p4/config/v1/p4info.proto"),
        ("p4runtime/proto", "p4/config/v1/p4types.proto"),
        ("googleapis", "google/rpc/status.proto"),
        ("googleapis", "google/rpc/code.proto"),
    ];
    for proto in &protos {
        println!("cargo:rerun-if-changed={}/{}", proto.0, proto.1);
    }
    println!("cargo:rerun-if-changed=build.rs");

    protobuf_codegen_pure::Codegen::new()
        .out_dir("src/")
        .inputs(protos.iter().map(|x| format!("{}/{}", x.0, x.1)))
        .includes(&["p4runtime/proto", "googleapis"])
        .run()
        .expect("Failed to compile P4Runtime protobuf definitions!");

    Builder::new().compile(&[p4runtime_service()]);
}
