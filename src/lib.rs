//! grpc-wrapper - resilient gRPC client connections
//!
//! Spreads short calls round-robin over a fixed pool of pre-dialed
//! connections with bounded exponential-backoff retries, and keeps one
//! managed stream connection alive by reconnecting when the stream logic
//! fails.
//!
//! ```no_run
//! use grpc_wrapper::{Config, WrapperClient};
//! use tonic_health::pb::{health_client::HealthClient, HealthCheckRequest};
//!
//! # async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
//! let client = WrapperClient::connect("localhost:50051", config).await?;
//! let status = client
//!     .short_call(|ctx, channel| async move {
//!         let request = ctx.request(HealthCheckRequest { service: String::new() });
//!         HealthClient::new(channel).check(request).await
//!     })
//!     .await?;
//! println!("{:?}", status.into_inner().status());
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod pool;
pub mod stream;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use client::WrapperClient;
pub use config::{Config, Settings, TlsSettings};
pub use context::CallContext;
pub use error::{CallError, DialError, StreamError, WrapperError};
pub use transport::{Connection, Connector, DialOptions, TonicConnector};
