//! vos-bridge: pace a prompt file to a telephony endpoint
//!
//! Usage: vos-bridge <host> <port> <file.wav|file.raw>
//!
//! Raw files must already be G.711 in the configured codec.

use std::path::Path;

use anyhow::{bail, Context};
use vos_bridge::vos::AudioConverter;
use vos_bridge::{DialerEvent, DialerService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("vos_bridge=info".parse()?))
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 4 {
        let program = args.first().map(String::as_str).unwrap_or("vos-bridge");
        bail!("usage: {} <host> <port> <file.wav|file.raw>", program);
    }
    let host = &args[1];
    let port: u16 = args[2].parse().with_context(|| format!("invalid port: {}", args[2]))?;
    let path = Path::new(&args[3]);
    let call_id = std::env::var("VOS_CALL_ID").unwrap_or_else(|_| "vos-bridge-1".to_string());

    let (dialer, mut events) = DialerService::from_env()?;
    tracing::info!(
        "Using {} with {}Hz wideband side",
        dialer.converter().codec().codec_type(),
        dialer.converter().wideband_rate().hz()
    );

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                DialerEvent::SendFailed { call_id, error } => {
                    tracing::error!("Send on {} failed: {}", call_id, error)
                }
                other => tracing::debug!("Dialer event: {:?}", other),
            }
        }
    });

    let is_wav = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("wav"))
        .unwrap_or(false);
    let audio = if is_wav {
        let (samples, rate) = AudioConverter::load_wav_file(&args[3]).await?;
        dialer.converter().pcm_to_telephony(&samples, rate)?
    } else {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?
    };

    dialer.create_session(&call_id, host, port).await?;

    let result = tokio::select! {
        result = dialer.send_audio_with_precise_timing(&call_id, audio) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    dialer.close_all_sessions().await;

    match result {
        Some(Ok(complete)) => {
            println!("{}", serde_json::to_string_pretty(&complete)?);
            Ok(())
        }
        Some(Err(e)) => Err(e.into()),
        None => {
            tracing::info!("Interrupted, sessions closed");
            Ok(())
        }
    }
}
