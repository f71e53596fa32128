//! anchor: the CNI IPAM plugin binary
//!
//! The container runtime invokes this binary with the net conf on stdin
//! and the invocation context in the environment:
//!
//! ```bash
//! CNI_COMMAND=ADD \
//! CNI_CONTAINERID=abc123 \
//! CNI_ARGS='K8S_POD_NAMESPACE=default;K8S_POD_NAME=web-0' \
//! anchor < /etc/cni/net.d/10-anchor.conf
//! ```
//!
//! On success ADD prints the CNI result JSON on stdout and DEL prints
//! nothing. Any failure prints a CNI error JSON and exits non-zero.
//! Logs go to stderr; stdout belongs to the runtime.

use std::io::Read;

use tracing_subscriber::EnvFilter;

use anchor_ipam::cni::types::CniError;
use anchor_ipam::cni::{cmd_add, cmd_del};
use anchor_ipam::error::{AnchorError, ConfigError};

/// CNI config versions this plugin accepts
const SUPPORTED_VERSIONS: &[&str] = &["0.1.0", "0.2.0", "0.3.0", "0.3.1"];

fn env(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let command = env("CNI_COMMAND");
    let container_id = env("CNI_CONTAINERID");
    let cni_args = env("CNI_ARGS");

    if command == "VERSION" {
        println!(
            r#"{{"cniVersion":"0.3.1","supportedVersions":{}}}"#,
            serde_json::to_string(SUPPORTED_VERSIONS).unwrap_or_default()
        );
        return;
    }

    let mut stdin = Vec::new();
    if let Err(e) = std::io::stdin().read_to_end(&mut stdin) {
        fail(&AnchorError::Io(e));
    }

    match command.as_str() {
        "ADD" => match cmd_add(&stdin, &container_id, &cni_args).await {
            Ok((result, cni_version)) => match result.render(&cni_version) {
                Ok(json) => println!("{json}"),
                Err(e) => fail(&e),
            },
            Err(e) => fail(&e),
        },
        "DEL" => {
            if let Err(e) = cmd_del(&stdin, &container_id, &cni_args).await {
                fail(&e);
            }
        }
        // CHECK arrived after this plugin's config versions; treat it as a
        // successful no-op so newer runtimes can probe
        "CHECK" => {}
        other => {
            let err: AnchorError =
                ConfigError::invalid_args("CNI_COMMAND", format!("unknown command {other:?}"))
                    .into();
            fail(&err);
        }
    }
}

/// Print the CNI error object and exit non-zero
fn fail(err: &AnchorError) -> ! {
    tracing::error!("{err}");
    let cni_err = CniError::from_error(err, "0.3.1");
    match serde_json::to_string(&cni_err) {
        Ok(json) => println!("{json}"),
        Err(_) => println!(r#"{{"cniVersion":"0.3.1","code":999,"msg":"internal error"}}"#),
    }
    std::process::exit(1);
}
