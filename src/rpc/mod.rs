//! RPC endpoint model, provider classification and transports

mod defaults;
mod endpoint;
mod transport;

pub use defaults::{default_networks, default_provider_classes, default_quotas};
pub use endpoint::{parse_endpoint_url, Endpoint, ProviderClassifier, TransportKind};
pub use transport::{RpcTransport, Transport};
