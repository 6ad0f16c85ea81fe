use std::env;

fn main() {
  println!("cargo:rerun-if-env-changed=OPENIAP_LIB_DIR");
  if env::var_os("CARGO_FEATURE_NATIVE").is_none() {
    return;
  }

  if let Ok(dir) = env::var("OPENIAP_LIB_DIR") {
    println!("cargo:rustc-link-search=native={}", dir);
  }

  let os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
  let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
  let platform = match (os.as_str(), arch.as_str()) {
    ("linux", "x86_64") => "linux-x64",
    ("linux", "aarch64") => "linux-arm64",
    ("macos", "x86_64") => "macos-x64",
    ("macos", "aarch64") => "macos-arm64",
    ("windows", "x86_64") => "windows-x64",
    ("windows", "x86") => "windows-i686",
    _ => panic!("no prebuilt openiap library for {}-{}", os, arch),
  };
  println!("cargo:rustc-link-lib=dylib=openiap-{}", platform);
}
