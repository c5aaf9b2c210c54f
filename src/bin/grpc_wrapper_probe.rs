//! grpc-wrapper-probe: gRPC health probe through a wrapper client
//!
//! Runs a `grpc.health.v1.Health/Check` as a short call, then optionally
//! follows `Health/Watch` as a managed stream until interrupted.
//!
//! ## Usage
//! ```text
//! grpc-wrapper-probe [--watch] [--service NAME] [CONFIG_PATH]
//! ```
//!
//! ## Configuration
//! - grpc-wrapper.yaml, CONFIG_PATH or GRPC_WRAPPER_CONFIG: YAML settings
//! - GRPC_WRAPPER__ADDRESS, GRPC_WRAPPER__CLIENT__POOL_SIZE, ...: overrides
//! - GRPC_WRAPPER_LOG: log filter (default: info)

use tokio_util::sync::CancellationToken;
use tonic::Status;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tracing::{error, info, warn};

use grpc_wrapper::utils::bootstrap::init_tracing;
use grpc_wrapper::{Settings, StreamError, WrapperClient};

#[derive(Debug, Default, PartialEq)]
struct ProbeArgs {
    watch: bool,
    service: String,
    config_path: Option<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<ProbeArgs, String> {
    let mut parsed = ProbeArgs::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--watch" => parsed.watch = true,
            "--service" => {
                parsed.service = args
                    .next()
                    .ok_or_else(|| "--service requires a value".to_string())?;
            }
            flag if flag.starts_with("--") => return Err(format!("unknown flag {}", flag)),
            path => {
                if parsed.config_path.replace(path.to_string()).is_some() {
                    return Err("only one config path may be given".to_string());
                }
            }
        }
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args = parse_args(std::env::args().skip(1))?;
    let settings = Settings::load(args.config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(address = %settings.address, service = %args.service, "Starting grpc-wrapper-probe");

    let client = WrapperClient::connect_with_options(
        settings.address.clone(),
        settings.client.clone(),
        settings.dial_options()?,
    )
    .await?;

    let service = args.service.clone();
    let checked = client
        .short_call(|ctx, channel| {
            let request = ctx.request(HealthCheckRequest {
                service: service.clone(),
            });
            async move { HealthClient::new(channel).check(request).await }
        })
        .await;

    let status = match checked {
        Ok(response) => response.into_inner().status(),
        Err(e) => {
            error!(error = %e, "Health check failed");
            client.close().await;
            return Err(e.into());
        }
    };
    info!(status = ?status, "Health check");

    if args.watch {
        let token = CancellationToken::new();
        let interrupt = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.cancel();
            }
        });

        let watched = client
            .stream_call_with_cancellation(token, |_ctx, channel| {
                let request = HealthCheckRequest {
                    service: service.clone(),
                };
                async move {
                    let mut updates = HealthClient::new(channel).watch(request).await?.into_inner();
                    while let Some(update) = updates.message().await? {
                        info!(status = ?update.status(), "Health changed");
                    }
                    Err(Status::unavailable("health watch ended"))
                }
            })
            .await;

        match watched {
            Ok(()) | Err(StreamError::Cancelled) => info!("Stopped watching"),
            Err(e) => {
                warn!(error = %e, "Health watch failed");
                client.close().await;
                return Err(e.into());
            }
        }
    }

    client.close().await;

    if status != ServingStatus::Serving {
        return Err(format!("service reported {:?}", status).into());
    }
    Ok(())
}
