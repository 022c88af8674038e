fn main() -> std::io::Result<()> {
    println!("cargo:rerun-if-changed=proto/daemon.proto");
    prost_build::compile_protos(&["proto/daemon.proto"], &["proto"])
}
