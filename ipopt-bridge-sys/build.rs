//   Copyright 2018 Egor Larionov
//
//   Licensed under the Apache License, Version 2.0 (the "License");
//   you may not use this file except in compliance with the License.
//   You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
//   Unless required by applicable law or agreed to in writing, software
//   distributed under the License is distributed on an "AS IS" BASIS,
//   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//   See the License for the specific language governing permissions and
//   limitations under the License.

/**
 * # Build Process
 *
 * Nothing is linked unless the `native` feature is enabled. In that case:
 *
 * 1. Use pkg-config to find a preinstalled ipopt library that is recent enough to expose the
 *    C interface this crate declares.
 * 2. If pkg-config has nothing to say, fall back to a plain `-lipopt`, optionally searching
 *    the directory given in `IPOPT_LIB_DIR`, and link the C++ runtime Ipopt depends on.
 */
use std::env;

const LIBRARY: &str = "ipopt";
const MIN_VERSION: &str = "3.12.8";

fn main() {
    println!("cargo:rerun-if-env-changed=IPOPT_LIB_DIR");

    if env::var_os("CARGO_FEATURE_NATIVE").is_none() {
        return;
    }

    // Try to find Ipopt preinstalled.
    match pkg_config::Config::new()
        .atleast_version(MIN_VERSION)
        .probe(LIBRARY)
    {
        Ok(lib) => {
            println!(
                "cargo:warning=linking {} {} found by pkg-config",
                LIBRARY, lib.version
            );
        }
        Err(_) => link_fallback(),
    }
}

fn link_fallback() {
    if let Ok(dir) = env::var("IPOPT_LIB_DIR") {
        println!("cargo:rustc-link-search=native={}", dir);
    }
    println!("cargo:rustc-link-lib={}", LIBRARY);

    // Ipopt is a C++ library, so it depends on the C++ standard library.
    if env::var("CARGO_CFG_TARGET_OS").map_or(false, |os| os == "macos") {
        println!("cargo:rustc-link-lib=c++");
    } else {
        println!("cargo:rustc-link-lib=stdc++");
    }
}
