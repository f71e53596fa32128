//! anchor-admin: the pool and gateway editor
//!
//! Serves the admin HTTP API over the same etcd cluster the plugin
//! allocates from.
//!
//! ```bash
//! # Read the first .conf/.json in the current directory
//! anchor-admin
//!
//! # Explicit config file or directory
//! anchor-admin -c /etc/anchor/admin.conf
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use anchor_ipam::admin::{self, AdminState};
use anchor_ipam::store::etcd::{EtcdStore, EtcdTls};

/// Command-line arguments
struct Args {
    /// Config file or directory
    config_path: PathBuf,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from(".");

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("anchor-admin v{}", anchor_ipam::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self { config_path }
    }
}

fn print_help() {
    println!(
        r#"anchor-admin v{}

Pool and gateway editor for the anchor IPAM plugin.

USAGE:
    anchor-admin [OPTIONS]

OPTIONS:
    -c, --config <PATH>   Config file, or a directory whose first
                          .conf/.json file is used (default: .)
    -h, --help            Print help
    -v, --version         Print version
"#,
        anchor_ipam::VERSION
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let conf = if args.config_path.is_dir() {
        admin::load_conf_dir(&args.config_path)
    } else {
        admin::load_conf_file(&args.config_path)
    }
    .with_context(|| format!("loading config from {:?}", args.config_path))?;

    let tls = conf.wants_tls().then(|| EtcdTls {
        cert_file: conf.etcd_cert_file.clone(),
        key_file: conf.etcd_key_file.clone(),
        ca_file: conf.etcd_ca_cert_file.clone(),
    });
    let store = EtcdStore::connect(&conf.endpoint_list(), tls)
        .await
        .context("Failed to connect to etcd")?;

    let state = AdminState {
        store: Arc::new(store),
        admin_role: conf.admin_role,
    };

    tokio::select! {
        result = admin::serve(state, &conf.listen) => {
            result.context("admin server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }
    Ok(())
}
