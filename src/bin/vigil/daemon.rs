use std::path::PathBuf;
use std::time::Duration;

use miette::{bail, Context, IntoDiagnostic};
use tracing::{error, info};

use vigil::config::RootConfig;
use vigil::distributor::engines::Engines;
use vigil::distributor::DistributorController;
use vigil::prelude::*;
use vigil::rewards::RewardsController;
use vigil::sources::beacon::BeaconClient;
use vigil::sources::graph::GraphClient;
use vigil::sources::ipfs::IpfsClient;
use vigil::sources::pools::PoolsSource;
use vigil::sources::protocol::ProtocolSource;
use vigil::sources::store::VoteStore;
use vigil::validators::ValidatorsController;
use vigil::vote::VotePublisher;

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Config file to use instead of the default lookup.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
pub async fn run(args: &Args) -> miette::Result<()> {
    let config = RootConfig::load(&args.config).into_diagnostic()?;

    crate::common::setup_tracing(&config.logging)?;

    let Some(private_key) = config.oracle.private_key.clone() else {
        bail!("oracle private key must be configured");
    };

    let graph = GraphClient::new(config.retries.clone()).into_diagnostic()?;
    let protocol = ProtocolSource::new(
        graph.clone(),
        &config.protocol_graph,
        config.network.confirmation_blocks,
    );
    let pools = PoolsSource::new(graph, &config.pools_graph);
    let beacon = BeaconClient::new(&config.beacon, config.retries.clone()).into_diagnostic()?;
    let ipfs = IpfsClient::new(&config.ipfs, config.retries.clone()).into_diagnostic()?;
    let store = VoteStore::new(&config.store, config.retries.clone()).into_diagnostic()?;
    let publisher = VotePublisher::new(&private_key, store).into_diagnostic()?;

    // fail fast while the upstreams are reachable and we are a member
    let tip = protocol
        .finalized_block()
        .await
        .into_diagnostic()
        .context("checking protocol subgraph connection")?;

    let genesis = beacon
        .genesis()
        .await
        .into_diagnostic()
        .context("checking beacon api connection")?;

    beacon.finalized_epoch().await.into_diagnostic()?;

    let oracle = publisher.address();
    if !protocol
        .is_oracle_member(oracle, tip.number)
        .await
        .into_diagnostic()?
    {
        bail!("{oracle} is not a member of the oracles set");
    }

    let cancel = CancelToken::default();
    tokio::spawn(watch_shutdown(cancel.clone()));

    let rewards = RewardsController::new(
        beacon,
        protocol.clone(),
        publisher.clone(),
        config.network.clone(),
        config.beacon.validators_chunk_size,
        genesis.genesis_time,
        cancel.clone(),
    );
    let distributor = DistributorController::new(
        protocol.clone(),
        ipfs.clone(),
        Engines::new(protocol.clone(), pools),
        config.pools.clone(),
        publisher.clone(),
    );
    let validators = ValidatorsController::new(protocol.clone(), ipfs, publisher);

    let interval = Duration::from_secs(config.oracle.process_interval);
    info!(%oracle, "oracle daemon started");

    while !cancel.is_cancelled() {
        if let Err(err) = tick(&protocol, &rewards, &distributor, &validators).await {
            error!(%err, "tick failed, retrying on the next interval");
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("oracle daemon stopped");

    Ok(())
}

async fn tick(
    protocol: &ProtocolSource,
    rewards: &RewardsController,
    distributor: &DistributorController<Engines>,
    validators: &ValidatorsController,
) -> Result<(), Error> {
    let tip = protocol.finalized_block().await?;

    if !protocol.has_synced(tip.number).await? {
        info!(block = tip.number, "protocol subgraph is still catching up");
        return Ok(());
    }

    let params = protocol.voting_parameters(tip.number).await?;

    let (rewards_out, distributor_out, validators_out) = tokio::join!(
        rewards.process(&params.rewards, &tip),
        distributor.process(&params.distributor),
        validators.process(&params.validators, tip.number),
    );

    // one controller failing must not block the others; each retries on
    // the next tick from untouched state
    if let Err(err) = rewards_out {
        error!(%err, "rewards controller failed");
    }
    if let Err(err) = distributor_out {
        error!(%err, "distributor controller failed");
    }
    if let Err(err) = validators_out {
        error!(%err, "validators controller failed");
    }

    Ok(())
}

async fn watch_shutdown(cancel: CancelToken) {
    let interrupt = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }

    info!("received interrupt signal, exiting after the current tick");
    cancel.cancel();
}
