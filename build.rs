fn main() {
    println!("cargo:rerun-if-env-changed=ATRACSYS_SDK_DIR");
    println!("cargo:rerun-if-changed=src/ffi.rs");

    if std::env::var_os("CARGO_FEATURE_SDK").is_some() {
        if let Ok(dir) = std::env::var("ATRACSYS_SDK_DIR") {
            println!("cargo:rustc-link-search=native={}", dir);
        }
    }

    let crate_dir = match std::env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => dir,
        Err(_) => return,
    };
    let config = cbindgen::Config::from_file("cbindgen.toml").unwrap_or_default();

    if let Ok(bindings) = cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
    {
        bindings.write_to_file(format!("{}/include/atracsys_igtl.h", crate_dir));
    }
}
