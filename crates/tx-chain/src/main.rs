use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tx_chain::{BitcoindRpc, ChainOrchestrator, ConfirmationMode, Recorder, Settings, TxChainError};

const CONFIG_FILE: &str = "Settings.toml";

#[tokio::main]
async fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tx_chain=info")),
        )
        .try_init();

    let path = std::env::args().nth(1).unwrap_or_else(|| CONFIG_FILE.to_string());
    match run(&path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "tx-chain failed");
            eprintln!("error: {e}");
            let mut source = std::error::Error::source(&*e);
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_toml(path)?;
    info!(config = path, network = %settings.rpc.network, url = %settings.rpc.url, "loaded settings");

    let plans = settings.plans()?;
    let policy = settings.fee.policy()?;
    let mode = settings.confirmation.mode()?;
    if matches!(mode, ConfirmationMode::Mine { .. }) && !settings.rpc.network.supports_mining() {
        return Err(TxChainError::Config(format!(
            "confirmation mode mine needs regtest, not {}",
            settings.rpc.network
        ))
        .into());
    }

    let service = Arc::new(BitcoindRpc::new(&settings.rpc, &settings.chain.wallet)?);
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let mut orchestrator = ChainOrchestrator::new(
        service,
        policy,
        settings.chain.window(),
        mode,
        Recorder::new(&settings.chain.data_dir),
    )
    .with_strategy(settings.chain.strategy())
    .with_cancellation(cancel);

    for plan in &plans {
        let done = orchestrator.run(plan).await?;
        info!(
            run = %plan.name,
            path = %done.artifact.path.display(),
            hops = done.record.hops.len(),
            "chain complete"
        );
    }
    Ok(())
}
