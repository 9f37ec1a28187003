use std::env;
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
	let out_dir = PathBuf::from(env::var("OUT_DIR")?);
	let descriptor_path = out_dir.join("policy_proto_descriptor.bin");

	let mut config = prost_build::Config::new();
	config.type_attribute(
		".",
		"#[derive(serde::Serialize, serde::Deserialize)]\n#[serde(rename_all = \"camelCase\")]",
	);
	config.extern_path(".google.protobuf.Struct", "::prost_wkt_types::Struct");
	config.extern_path(".google.protobuf.Value", "::prost_wkt_types::Value");
	config.extern_path(".google.protobuf.StringValue", "::prost_wkt_types::StringValue");
	config.extern_path(".google.protobuf.UInt32Value", "::prost_wkt_types::UInt32Value");
	config.file_descriptor_set_path(&descriptor_path);

	tonic_prost_build::configure()
		.build_server(true)
		.build_client(true)
		.out_dir(&out_dir)
		.compile_protos_with_config(
			config,
			&["proto/policy_ext_proc.proto", "proto/policy_discovery.proto"],
			&["proto"],
		)?;

	let descriptor_bytes = std::fs::read(&descriptor_path)?;
	let descriptor = <prost_wkt_build::FileDescriptorSet as prost::Message>::decode(
		descriptor_bytes.as_slice(),
	)?;
	prost_wkt_build::add_serde(out_dir, descriptor);

	Ok(())
}
