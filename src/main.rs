use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use intercom::media::{
    pcm, AudioPlayout, CaptureDevice, DiscardPlayout, SilenceDevice, WavFileDevice, WavRecorder,
};
use intercom::{Collaborators, IntercomConfig, IntercomController, MiddlewareClient, SessionState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "intercom", version, about = "Two-way audio with a local-network doorbell")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open a two-way audio session until Ctrl-C or until the connection drops
    Talk {
        /// Doorbell middleware, e.g. http://192.168.1.40:8080
        #[arg(long)]
        server: String,
        /// WAV file to send instead of the microphone
        #[arg(long, conflicts_with = "mute")]
        input: Option<PathBuf>,
        /// Repeat the input file
        #[arg(long, requires = "input")]
        loop_input: bool,
        /// Send silence instead of the microphone
        #[arg(long)]
        mute: bool,
        /// Save the doorbell's audio to this WAV file
        #[arg(long)]
        record: Option<PathBuf>,
        /// Seconds to wait for ICE gathering
        #[arg(long, default_value_t = IntercomConfig::default().gathering_timeout_secs)]
        gathering_timeout: u64,
        /// Seconds to wait for HTTP responses
        #[arg(long, default_value_t = IntercomConfig::default().request_timeout_secs)]
        request_timeout: u64,
    },
    /// Probe the middleware health endpoint
    Health {
        #[arg(long)]
        server: String,
    },
    /// Abort play-file jobs and WebRTC sessions on the middleware
    Abort {
        #[arg(long)]
        server: String,
    },
    /// Play a WAV file on the doorbell speaker
    PlayFile {
        #[arg(long)]
        server: String,
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    intercom::logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Talk {
            server,
            input,
            loop_input,
            mute,
            record,
            gathering_timeout,
            request_timeout,
        } => {
            let config = IntercomConfig {
                gathering_timeout_secs: gathering_timeout,
                request_timeout_secs: request_timeout,
                ..Default::default()
            };
            let device: Arc<dyn CaptureDevice> = match input {
                Some(path) => Arc::new(WavFileDevice::new(path).looped(loop_input)),
                None if mute => Arc::new(SilenceDevice),
                None => microphone(),
            };
            let playout: Arc<dyn AudioPlayout> = match record {
                Some(path) => Arc::new(WavRecorder::new(path)),
                None => Arc::new(DiscardPlayout),
            };
            talk(config, &server, device, playout).await
        }
        Command::Health { server } => {
            let client = middleware(&server)?;
            if client.health_check().await? {
                println!("{} is healthy", client.base_url());
                Ok(())
            } else {
                bail!("{} is not healthy", client.base_url())
            }
        }
        Command::Abort { server } => {
            middleware(&server)?.abort_operations().await?;
            println!("all operations aborted");
            Ok(())
        }
        Command::PlayFile { server, file } => {
            let audio = pcm::prepare_announcement(&file)
                .with_context(|| format!("converting {}", file.display()))?;
            middleware(&server)?.play_file(audio).await?;
            println!("sent {}", file.display());
            Ok(())
        }
    }
}

#[cfg(feature = "microphone")]
fn microphone() -> Arc<dyn CaptureDevice> {
    Arc::new(intercom::media::CpalMicrophone)
}

#[cfg(not(feature = "microphone"))]
fn microphone() -> Arc<dyn CaptureDevice> {
    tracing::warn!("built without the microphone feature, sending silence");
    Arc::new(SilenceDevice)
}

fn middleware(server: &str) -> Result<MiddlewareClient> {
    let timeout = IntercomConfig::default().request_timeout();
    Ok(MiddlewareClient::new(server, timeout)?)
}

async fn talk(
    config: IntercomConfig,
    server: &str,
    device: Arc<dyn CaptureDevice>,
    playout: Arc<dyn AudioPlayout>,
) -> Result<()> {
    let parts = Collaborators::webrtc(&config, device, playout)?;
    let controller = IntercomController::spawn(config, parts);
    let mut status = controller.subscribe();
    controller.start(server).await?;

    let mut failure = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("stopping...");
                controller.stop().await?;
            }
            event = status.recv() => match event {
                Ok(ev) => {
                    let at = ev.at.format("%H:%M:%S%.3f");
                    println!("[{at}] {:<11} {}", ev.state, ev.message);
                    if ev.is_error {
                        failure = Some(ev.message.clone());
                    }
                    if ev.state == SessionState::Idle {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    }

    match failure {
        Some(message) => bail!(message),
        None => Ok(()),
    }
}
