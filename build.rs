fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 节点间 ForwardMessage RPC 的 proto 定义
    println!("cargo:rerun-if-changed=proto/peer.proto");
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }
    tonic_build::compile_protos("proto/peer.proto")?;
    Ok(())
}
