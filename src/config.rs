use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use rand::Rng;

pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Default bound on waiting for ICE gathering before a blob is exposed.
pub const DEFAULT_GATHER_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime settings for one engine instance.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name announced to the remote peer in the presence message.
    pub display_name: String,
    pub ice_servers: Vec<String>,
    pub gather_timeout: Duration,
    pub recordings_dir: PathBuf,
    /// Optional IVF (VP8) file looped as the camera feed.
    pub camera_ivf: Option<PathBuf>,
    /// Optional IVF (VP8) file played once as the screen feed.
    pub screen_ivf: Option<PathBuf>,
    /// Page URL a joining peer opens (rendered as a QR code by the UI).
    pub public_url: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display_name: guest_name(),
            ice_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            gather_timeout: DEFAULT_GATHER_TIMEOUT,
            recordings_dir: default_recordings_dir(),
            camera_ivf: None,
            screen_ivf: None,
            public_url: "http://127.0.0.1:9850/".to_string(),
        }
    }
}

impl SessionConfig {
    /// URL encoded into the invite QR code. The blob exchange still happens manually.
    pub fn invite_url(&self) -> String {
        let sep = if self.public_url.contains('?') { '&' } else { '?' };
        format!("{}{}join=1", self.public_url, sep)
    }
}

fn guest_name() -> String {
    let n: u16 = rand::thread_rng().gen_range(1000..10000);
    format!("Guest-{}", n)
}

pub fn default_recordings_dir() -> PathBuf {
    ProjectDirs::from("com", "peercall", "Peercall")
        .map(|p| p.data_dir().join("recordings"))
        .unwrap_or_else(|| PathBuf::from(".peercall").join("recordings"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_names_are_prefixed() {
        let cfg = SessionConfig::default();
        assert!(cfg.display_name.starts_with("Guest-"));
        assert_eq!(cfg.display_name.len(), "Guest-1234".len());
    }

    #[test]
    fn invite_url_appends_join_flag() {
        let mut cfg = SessionConfig::default();
        cfg.public_url = "https://class.example/room".into();
        assert_eq!(cfg.invite_url(), "https://class.example/room?join=1");

        cfg.public_url = "https://class.example/room?lang=en".into();
        assert_eq!(cfg.invite_url(), "https://class.example/room?lang=en&join=1");
    }
}
