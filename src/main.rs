use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use peercall_lib::config::{default_recordings_dir, SessionConfig, DEFAULT_STUN_SERVERS};

#[derive(Parser)]
#[command(name = "peercall", about = "One-to-one video/voice/chat with copy-paste signaling")]
struct Cli {
    /// API server port
    #[arg(long, default_value = "9850")]
    port: u16,

    /// Display name announced to the peer (random guest name if omitted)
    #[arg(long)]
    name: Option<String>,

    /// STUN/TURN server URL; repeat for several
    #[arg(long = "stun")]
    stun: Vec<String>,

    /// Where finished recordings are saved
    #[arg(long)]
    recordings_dir: Option<PathBuf>,

    /// IVF (VP8) file looped as the camera feed
    #[arg(long)]
    camera_ivf: Option<PathBuf>,

    /// IVF (VP8) file played as the screen-share feed
    #[arg(long)]
    screen_ivf: Option<PathBuf>,

    /// Upper bound on waiting for ICE gathering, in milliseconds
    #[arg(long, default_value = "5000")]
    gather_timeout_ms: u64,

    /// Page URL encoded into the invite QR code
    #[arg(long)]
    public_url: Option<String>,
}

impl Cli {
    fn into_config(self) -> SessionConfig {
        let defaults = SessionConfig::default();
        SessionConfig {
            display_name: self.name.unwrap_or(defaults.display_name),
            ice_servers: if self.stun.is_empty() {
                DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect()
            } else {
                self.stun
            },
            gather_timeout: Duration::from_millis(self.gather_timeout_ms),
            recordings_dir: self.recordings_dir.unwrap_or_else(default_recordings_dir),
            camera_ivf: self.camera_ivf,
            screen_ivf: self.screen_ivf,
            public_url: self
                .public_url
                .unwrap_or_else(|| format!("http://127.0.0.1:{}/", self.port)),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let port = cli.port;

    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    if let Err(e) = rt.block_on(peercall_lib::run_headless(cli.into_config(), port)) {
        eprintln!("peercall: {}", e);
        std::process::exit(1);
    }
}
