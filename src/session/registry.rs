use tracing::debug;

use super::protocol::ControlMessage;
use crate::models::Participant;

const LOCAL_ID: &str = "local";
const REMOTE_ID: &str = "remote";

/// Roster of the two call ends. Only reacts to inbound control messages and
/// local toggles; it never sends anything.
#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    local: Option<Participant>,
    remote: Option<Participant>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the local entry at session start.
    pub fn join(&mut self, display_name: &str) -> Participant {
        let local = Participant {
            id: LOCAL_ID.to_string(),
            display_name: display_name.to_string(),
            is_local: true,
            is_muted: false,
            hand_raised: false,
        };
        self.local = Some(local.clone());
        local
    }

    pub fn local(&self) -> Option<&Participant> {
        self.local.as_ref()
    }

    pub fn remote(&self) -> Option<&Participant> {
        self.remote.as_ref()
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.local.iter().chain(self.remote.iter()).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.local.is_some() as usize + self.remote.is_some() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply an inbound message. Returns the updated remote entry, if any.
    pub fn apply(&mut self, message: &ControlMessage) -> Option<Participant> {
        match message {
            ControlMessage::Presence(p) => {
                let remote = self.remote_entry(&p.name);
                remote.display_name = p.name.clone();
                Some(remote.clone())
            }
            ControlMessage::HandRaise(h) => {
                let remote = self.remote_entry(&h.name);
                remote.hand_raised = h.raised;
                Some(remote.clone())
            }
            ControlMessage::Chat(_) => None,
        }
    }

    /// Existing remote entry, or a placeholder until presence arrives.
    fn remote_entry(&mut self, name: &str) -> &mut Participant {
        self.remote.get_or_insert_with(|| {
            debug!("Creating remote participant entry for {}", name);
            Participant {
                id: REMOTE_ID.to_string(),
                display_name: name.to_string(),
                is_local: false,
                is_muted: false,
                hand_raised: false,
            }
        })
    }

    pub fn set_local_muted(&mut self, muted: bool) -> Option<Participant> {
        let local = self.local.as_mut()?;
        local.is_muted = muted;
        Some(local.clone())
    }

    pub fn set_local_hand(&mut self, raised: bool) -> Option<Participant> {
        let local = self.local.as_mut()?;
        local.hand_raised = raised;
        Some(local.clone())
    }

    pub fn clear(&mut self) {
        self.local = None;
        self.remote = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_creates_then_renames_remote() {
        let mut reg = ParticipantRegistry::new();
        reg.join("Ada");
        assert_eq!(reg.len(), 1);

        reg.apply(&ControlMessage::presence("Bob"));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.remote().unwrap().display_name, "Bob");

        reg.apply(&ControlMessage::presence("Robert"));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.remote().unwrap().display_name, "Robert");
    }

    #[test]
    fn hand_raise_before_presence_creates_placeholder() {
        let mut reg = ParticipantRegistry::new();
        reg.join("Ada");

        let remote = reg.apply(&ControlMessage::hand_raise(true, "Bob")).unwrap();
        assert!(remote.hand_raised);
        assert!(!remote.is_local);

        reg.apply(&ControlMessage::presence("Bob"));
        let remote = reg.remote().unwrap();
        assert!(remote.hand_raised);
        assert_eq!(remote.display_name, "Bob");
    }

    #[test]
    fn repeated_hand_raise_is_idempotent() {
        let mut reg = ParticipantRegistry::new();
        reg.apply(&ControlMessage::hand_raise(true, "Bob"));
        reg.apply(&ControlMessage::hand_raise(true, "Bob"));
        assert!(reg.remote().unwrap().hand_raised);
        reg.apply(&ControlMessage::hand_raise(false, "Bob"));
        assert!(!reg.remote().unwrap().hand_raised);
    }

    #[test]
    fn chat_does_not_touch_roster() {
        let mut reg = ParticipantRegistry::new();
        assert!(reg.apply(&ControlMessage::chat("Bob", "hi")).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn clear_empties_roster() {
        let mut reg = ParticipantRegistry::new();
        reg.join("Ada");
        reg.set_local_muted(true);
        reg.apply(&ControlMessage::presence("Bob"));
        reg.clear();
        assert_eq!(reg.len(), 0);
        assert!(reg.set_local_hand(true).is_none());
    }
}
