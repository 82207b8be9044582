use std::{path::PathBuf, process, sync::Arc};

use anyhow::Context;
use hefl::{
    crypto::{encoding::FixedPoint, paillier::KeyPair, Paillier},
    model::DenseNetwork,
    settings::{NodeSettings, Settings},
    transport::TcpTransport,
    Node,
    NodeHandle,
    PeerAddress,
    Protocol,
    SessionState,
};
use structopt::StructOpt;
use tokio::signal;
use tracing_subscriber::*;

#[macro_use]
extern crate tracing;

#[derive(Debug, StructOpt)]
#[structopt(name = "hefl-node")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();

    let settings = Settings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let Settings {
        node:
            NodeSettings {
                address,
                roles,
                coordinator,
                rounds,
            },
        transport: transport_settings,
        crypto: crypto_settings,
        model: hyperparameters,
        log: log_settings,
    } = settings;

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(log_settings.filter)
        .with_ansi(true)
        .init();

    info!("deriving the session keys");
    let keys = KeyPair::derive(&crypto_settings.key_seed, crypto_settings.modulus_bits)
        .context("failed to derive the session keys")?;
    let encoding = FixedPoint::new(crypto_settings.precision)?;
    let crypto = if roles.is_participant() {
        Paillier::new(keys, encoding)
    } else {
        // a pure coordinator never decrypts
        Paillier::public_only(keys.public, encoding)
    };

    let transport = TcpTransport::bind(&transport_settings)
        .await
        .context("failed to bind the transport")?;
    let protocol = Protocol::new(
        address,
        roles,
        hyperparameters,
        crypto,
        DenseNetwork::new(),
    );
    let (node, handle) = Node::new(protocol, Arc::new(transport));
    let mut node = tokio::spawn(node.run());

    let participation = async {
        match coordinator {
            Some(coordinator) if roles.is_participant() => {
                participate(&handle, coordinator, rounds).await
            }
            _ => futures::future::pending::<anyhow::Result<()>>().await,
        }
    };

    tokio::select! {
        result = participation => {
            result?;
            if !roles.is_coordinator() {
                info!("shutting down: all rounds completed");
                handle.shutdown().await?;
            } else {
                info!("all rounds completed, serving the session until interrupted");
                signal::ctrl_c().await?;
                handle.shutdown().await?;
            }
        }
        _ = &mut node => {
            warn!("shutting down: node terminated");
            return Ok(());
        }
        _ = signal::ctrl_c() => {
            handle.shutdown().await?;
        }
    }

    node.await?;
    Ok(())
}

async fn participate(
    handle: &NodeHandle,
    coordinator: PeerAddress,
    rounds: u32,
) -> anyhow::Result<()> {
    handle.join(coordinator.clone()).await?;
    handle.wait_for(SessionState::Ready).await?;
    info!("received the hyperparameters of {}", coordinator);

    for round in 1..=rounds {
        handle.contribute(coordinator.clone()).await?;
        handle.wait_for(SessionState::Ready).await?;
        let weights = handle.weights().await?;
        info!(
            "round {}/{}: applied an aggregate of {} weights",
            round,
            rounds,
            weights.len()
        );
        debug!("weights: {:?}", weights);
    }
    Ok(())
}
