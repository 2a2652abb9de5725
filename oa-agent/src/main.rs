mod supervisor;

use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use oa_core::conf::AgentConf;
use oa_core::config::{
    attach_to_config_map,
    ConfigStore,
    FileWatcher,
};
use oa_core::k8s::ClusterCache;
use oa_core::logging;
use oa_core::prelude::*;
use oa_pipeline::transport::TcpTransport;
use tracing::*;

use crate::supervisor::Supervisor;

const SCRAPE_CONFIGMAP_NAME: &str = "whatap-open-agent";

#[derive(Debug, Parser)]
#[command(version, about = "Prometheus-compatible metrics collection agent")]
struct Options {
    // directory holding whatap.conf (defaults to $WHATAP_HOME)
    #[arg(long)]
    home: Option<PathBuf>,

    // directory holding scrape_config.yaml (defaults to $WHATAP_OPEN_HOME)
    #[arg(long)]
    open_home: Option<PathBuf>,

    // skip the Kubernetes client entirely and discover from file config only
    #[arg(long)]
    standalone: bool,

    #[arg(short, long, default_value = "info")]
    verbosity: String,
}

fn resolve_dir(explicit: Option<PathBuf>, env_var: &str) -> PathBuf {
    explicit
        .or_else(|| env::var(env_var).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn pod_namespace() -> String {
    if let Ok(ns) = env::var(POD_NAMESPACE_ENV_VAR) {
        return ns;
    }
    // Downward API wasn't wired up; the serviceaccount mount knows too
    fs::read_to_string(SERVICE_ACCOUNT_NS_PATH)
        .map(|ns| ns.trim().to_string())
        .unwrap_or_else(|_| DEFAULT_NAMESPACE.into())
}

async fn run(args: Options) -> EmptyResult {
    let home = resolve_dir(args.home, WHATAP_HOME_ENV_VAR);
    let conf = AgentConf::load(&home)?;

    let (license, hosts) = match (conf.license(), conf.hosts()) {
        (Ok(license), Ok(hosts)) if !hosts.is_empty() => (license, hosts),
        _ => {
            eprintln!(
                "WHATAP_LICENSE, WHATAP_HOST, and WHATAP_PORT must be set in {} or the environment",
                home.join(AGENT_CONF_FILE).display()
            );
            std::process::exit(1);
        },
    };
    let transport = Arc::new(TcpTransport::new(license, hosts, conf.port()));

    let open_home = resolve_dir(args.open_home, WHATAP_OPEN_HOME_ENV_VAR);
    let config_path = open_home.join(SCRAPE_CONFIG_FILE);

    let cache = if args.standalone {
        None
    } else {
        let client = kube::Client::try_default().await?;
        let cache = Arc::new(ClusterCache::start(client).await?);
        info!("waiting for cluster cache to sync");
        cache.wait_ready().await;
        Some(cache)
    };

    // Standalone mode requires the config file; in-cluster the ConfigMap can
    // stand in for a missing file.
    let (config_store, file_watcher) = match FileWatcher::new(config_path.clone()) {
        Ok((store, watcher)) => (store, Some(watcher)),
        Err(err) if cache.is_some() => {
            info!("no scrape config file at {} ({err}), using the configmap", config_path.display());
            (Arc::new(ConfigStore::new(Default::default())), None)
        },
        Err(err) => return Err(err),
    };
    if let Some(cache) = &cache {
        attach_to_config_map(config_store.clone(), cache, &pod_namespace(), SCRAPE_CONFIGMAP_NAME)?;
    }

    let supervisor = Supervisor::boot(conf, config_store, file_watcher, cache.clone(), transport);

    tokio::signal::ctrl_c().await?;
    supervisor.shutdown().await;
    if let Some(cache) = &cache {
        cache.shutdown();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> EmptyResult {
    let args = Options::parse();
    logging::setup(&args.verbosity);
    run(args).await
}

#[cfg(test)]
mod tests;
