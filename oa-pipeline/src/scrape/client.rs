use std::fs;

use lazy_static::lazy_static;
use oa_core::config::{
    CredentialSource,
    EndpointConfig,
    TlsConfig,
};
use oa_core::k8s::ClusterCache;
use oa_core::prelude::*;
use tracing::*;

// Per-target TLS means per-scheduler clients; each one either skips
// verification outright or trusts the system roots plus the in-cluster CA.
pub(crate) fn build_scrape_client(tls: Option<&TlsConfig>) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();

    if tls.is_some_and(|t| t.insecure_skip_verify) {
        builder = builder.danger_accept_invalid_certs(true);
    } else {
        if let Some(cert) = load_certificate(SERVICE_ACCOUNT_CA_PATH) {
            builder = builder.add_root_certificate(cert);
        }
        if let Some(tls) = tls
            && !tls.ca_file.is_empty()
        {
            match load_certificate(&tls.ca_file) {
                Some(cert) => builder = builder.add_root_certificate(cert),
                None => warn!("could not load CA override {}", tls.ca_file),
            }
        }
    }

    // Local client certs are a development convenience only
    if let Some(tls) = tls
        && !tls.cert_file.is_empty()
        && !tls.key_file.is_empty()
        && let (Ok(mut pem), Ok(key)) = (fs::read(&tls.cert_file), fs::read(&tls.key_file))
    {
        pem.extend_from_slice(&key);
        match reqwest::Identity::from_pem(&pem) {
            Ok(identity) => builder = builder.identity(identity),
            Err(err) => warn!("could not load client certificate {}: {err}", tls.cert_file),
        }
    }

    Ok(builder.build()?)
}

fn load_certificate(path: &str) -> Option<reqwest::Certificate> {
    let pem = fs::read(path).ok()?;
    reqwest::Certificate::from_pem(&pem).ok()
}

lazy_static! {
    // The in-cluster service-account token, read once on first use.  Outside
    // a cluster the file simply isn't there and requests go out
    // unauthenticated.
    static ref SERVICE_ACCOUNT_TOKEN: Option<String> = fs::read_to_string(SERVICE_ACCOUNT_TOKEN_PATH)
        .ok()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
}

pub(crate) fn service_account_token() -> Option<&'static str> {
    SERVICE_ACCOUNT_TOKEN.as_deref()
}

pub(crate) fn resolve_basic_auth(
    endpoint: &EndpointConfig,
    ns: &str,
    cache: Option<&ClusterCache>,
) -> Option<(String, String)> {
    let basic_auth = endpoint.basic_auth.as_ref()?;
    let username = resolve_credential(&basic_auth.username, ns, cache)?;
    let password = resolve_credential(&basic_auth.password, ns, cache)?;
    Some((username, password))
}

fn resolve_credential(source: &CredentialSource, ns: &str, cache: Option<&ClusterCache>) -> Option<String> {
    match source {
        CredentialSource::Literal(value) => Some(value.clone()),
        CredentialSource::FromSecret { secret_key_ref } => {
            let Some(secret) = cache?.get_secret(ns, &secret_key_ref.name) else {
                warn!("secret {ns}/{} not found for basic auth", secret_key_ref.name);
                return None;
            };
            let bytes = secret.data.as_ref()?.get(&secret_key_ref.key)?;
            String::from_utf8(bytes.0.clone()).ok()
        },
    }
}
