fn main() {
    println!("cargo:rerun-if-env-changed=DTLS_VERSION");
    if let Ok(version) = std::env::var("DTLS_VERSION") {
        println!("cargo:rustc-env=CARGO_PKG_VERSION={version}");
    }
}
