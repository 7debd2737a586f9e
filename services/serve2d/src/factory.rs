//! Builds protocol handlers from configuration.
//!
//! Every file a handler needs (certificates, 404 bodies) is loaded here, so
//! a configuration that builds cleanly cannot fail later for want of one.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use serve2::proto::{
    load_certs, load_private_key, server_config, Discard, DialStrategy, Echo, HttpFile,
    MultiProxy, Proxy, TlsMatcher, TlsTermination, DEFAULT_FILE, DEFAULT_NOT_FOUND,
};
use serve2::{Dialer, Server, SharedHandler};

use crate::config::{Config, ProtocolSpec};
use crate::error::ConfigError;

/// A magic pattern, or several.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Magic {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct ProxyOptions {
    magic: Magic,
    target: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TlsOptions {
    cert: PathBuf,
    key: PathBuf,
    protos: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TlsMatcherOptions {
    target: String,
    #[serde(default, rename = "dialTLS")]
    dial_tls: bool,
    server_names: Option<Vec<String>>,
    negotiated_protocols: Option<Vec<String>>,
    negotiated_protocol_is_mutual: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpOptions {
    path: PathBuf,
    default_file: Option<String>,
    not_found_msg: Option<String>,
    not_found_file: Option<PathBuf>,
}

/// Builds handlers, sharing one backend dialer between them.
pub struct HandlerFactory {
    dialer: Arc<Dialer>,
}

impl HandlerFactory {
    pub fn new(dialer: Arc<Dialer>) -> Self {
        Self { dialer }
    }

    /// Build the handler for the protocol at `index`.
    pub fn build(&self, index: usize, spec: &ProtocolSpec) -> Result<SharedHandler, ConfigError> {
        let ctx = SpecContext { index, spec };

        let handler: SharedHandler = match spec.kind.as_str() {
            "proxy" => {
                let opts: ProxyOptions = ctx.options()?;
                match opts.magic {
                    Magic::One(magic) => {
                        if magic.is_empty() {
                            return Err(ctx.invalid("magic must not be empty"));
                        }
                        Arc::new(Proxy::new(magic, opts.target, Arc::clone(&self.dialer)))
                    }
                    Magic::Many(magics) => {
                        if magics.is_empty() || magics.iter().any(String::is_empty) {
                            return Err(ctx.invalid("magic must be non-empty strings"));
                        }
                        let magics = magics.into_iter().map(String::into_bytes).collect();
                        Arc::new(MultiProxy::new(
                            magics,
                            opts.target,
                            Arc::clone(&self.dialer),
                        ))
                    }
                }
            }
            "tls" => {
                let opts: TlsOptions = ctx.options()?;
                let certs = load_certs(&opts.cert)
                    .map_err(|source| ctx.file_load(opts.cert.clone(), source))?;
                let key = load_private_key(&opts.key)
                    .map_err(|source| ctx.file_load(opts.key.clone(), source))?;
                // A key that does not belong to the chain is reported against the key.
                let config = server_config(certs, key, &opts.protos)
                    .map_err(|source| ctx.file_load(opts.key.clone(), source))?;
                Arc::new(TlsTermination::new(config))
            }
            "tlsmatcher" => {
                let opts: TlsMatcherOptions = ctx.options()?;
                let mut matcher = TlsMatcher::new(
                    opts.target,
                    DialStrategy::from_dial_tls(opts.dial_tls),
                    Arc::clone(&self.dialer),
                );
                if let Some(names) = opts.server_names {
                    matcher = matcher.with_server_names(names);
                }
                if let Some(protocols) = opts.negotiated_protocols {
                    matcher = matcher.with_negotiated_protocols(protocols);
                }
                if let Some(mutual) = opts.negotiated_protocol_is_mutual {
                    matcher = matcher.with_negotiated_protocol_is_mutual(mutual);
                }
                Arc::new(matcher)
            }
            "http" => {
                let opts: HttpOptions = ctx.options()?;
                let not_found = match (opts.not_found_msg, opts.not_found_file) {
                    (Some(_), Some(_)) => {
                        return Err(ctx.invalid("notFoundMsg and notFoundFile are mutually exclusive"))
                    }
                    (Some(msg), None) => msg.into_bytes(),
                    (None, Some(path)) => {
                        std::fs::read(&path).map_err(|source| ctx.file_load(path, source))?
                    }
                    (None, None) => DEFAULT_NOT_FOUND.as_bytes().to_vec(),
                };
                let default_file = opts
                    .default_file
                    .unwrap_or_else(|| DEFAULT_FILE.to_string());
                if !is_plain_file_name(&default_file) {
                    return Err(ctx.invalid("defaultFile must be a plain file name"));
                }
                Arc::new(HttpFile::new(opts.path, default_file, not_found))
            }
            "echo" => Arc::new(Echo::new()),
            "discard" => Arc::new(Discard::new()),
            other => {
                return Err(ConfigError::UnknownKind {
                    index,
                    kind: other.to_string(),
                })
            }
        };

        Ok(handler)
    }
}

/// A single path component naming an entry of the directory it is joined to.
fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\', '\0'])
}

/// Error construction for one protocol entry.
struct SpecContext<'a> {
    index: usize,
    spec: &'a ProtocolSpec,
}

impl SpecContext<'_> {
    fn options<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        let conf = match &self.spec.conf {
            Value::Null => Value::Object(Default::default()),
            conf => conf.clone(),
        };
        serde_json::from_value(conf).map_err(|source| ConfigError::InvalidOptions {
            index: self.index,
            kind: self.spec.kind.clone(),
            source,
        })
    }

    fn invalid(&self, message: &str) -> ConfigError {
        ConfigError::Invalid {
            index: self.index,
            kind: self.spec.kind.clone(),
            message: message.to_string(),
        }
    }

    fn file_load(&self, path: PathBuf, source: std::io::Error) -> ConfigError {
        ConfigError::FileLoad {
            index: self.index,
            kind: self.spec.kind.clone(),
            path,
            source,
        }
    }
}

/// Build the dispatcher for a configuration.
///
/// Protocols keep their configured order. A protocol marked `default` is
/// not a detector; when several are, the last one wins.
pub fn build_server(config: &Config) -> Result<Server, ConfigError> {
    let dialer = Dialer::with_timeout(config.dial_timeout()).map_err(ConfigError::Dialer)?;
    let factory = HandlerFactory::new(Arc::new(dialer));
    let mut server = Server::with_max_read(config.max_read);

    for (index, spec) in config.protocols.iter().enumerate() {
        let handler = factory.build(index, spec)?;
        if spec.default {
            if let Some(previous) = server.set_default(handler) {
                warn!(index = index, replaced = %previous, "Multiple default protocols, using the last");
            }
        } else {
            info!(index = index, handler = %handler, "Protocol registered");
            server.add_handler(handler);
        }
    }

    if let Some(default) = server.default_handler() {
        info!(handler = %default, "Default protocol set");
    }

    Ok(server)
}
