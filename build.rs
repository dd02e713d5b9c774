fn main() {
    println!("cargo:rerun-if-changed=src/ffi.rs");
    println!("cargo:rerun-if-changed=src/types.rs");

    let Ok(crate_dir) = std::env::var("CARGO_MANIFEST_DIR") else {
        return;
    };

    let config = cbindgen::Config {
        language: cbindgen::Language::C,
        include_guard: Some("PENTRACK_H".to_string()),
        cpp_compat: true,
        ..Default::default()
    };

    match cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
    {
        Ok(bindings) => {
            bindings.write_to_file(format!("{}/include/pentrack.h", crate_dir));
        }
        Err(e) => println!("cargo:warning=pentrack.h not regenerated: {}", e),
    }
}
