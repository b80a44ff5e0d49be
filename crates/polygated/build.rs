//! Build script for polygated
//!
//! Generates the `polygate.v1.Gateway` client and server plumbing around
//! the hand-written prost messages in `src/proto.rs`.

use tonic_build::manual::{Builder, Method, Service};

fn method(name: &str, route: &str, input: &str, output: &str) -> tonic_build::manual::MethodBuilder {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::proto::{}", input))
        .output_type(format!("crate::proto::{}", output))
        .codec_path("tonic::codec::ProstCodec")
}

fn main() {
    let gateway = Service::builder()
        .name("Gateway")
        .package("polygate.v1")
        .method(method("read_rows", "ReadRows", "ReadRowsRequest", "WireBatch").server_streaming().build())
        .method(method("write_rows", "WriteRows", "WireBatch", "WriteAck").client_streaming().build())
        .method(method("get_table_info", "GetTableInfo", "TableInfoRequest", "TableInfo").build())
        .method(
            method("get_group_count", "GetGroupCount", "GroupCountRequest", "GroupCountResponse")
                .build(),
        )
        .method(method("upload_object", "UploadObject", "ObjectChunk", "ObjectAck").client_streaming().build())
        .build();

    println!("cargo:rerun-if-changed=build.rs");
    Builder::new().compile(&[gateway]);
}
