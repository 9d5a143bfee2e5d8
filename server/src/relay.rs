//! Command relay policy: execute locally, forward, or both sender- and
//! host-filtered fan-out.

use crate::peer_set::PeerSet;
use shared::{ClientId, Command, CommandOptions, CommandRegistry};
use std::sync::Arc;

/// What the server does with a command received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayDecision {
    /// Surface the command to the server's session layer; no relay traffic.
    Execute,
    /// Forward the command unchanged to these peers; do not execute locally.
    Forward { targets: Vec<ClientId> },
}

/// Decides, per received command, between local execution and fan-out.
///
/// The registry configures the choice per command kind. Forwarded
/// commands never go back to their sender, and the "skip host" delivery
/// flag additionally excludes whichever peer currently holds the host
/// designation.
pub struct RelayPolicy {
    registry: Arc<dyn CommandRegistry>,
}

impl RelayPolicy {
    pub fn new(registry: Arc<dyn CommandRegistry>) -> Self {
        Self { registry }
    }

    pub fn decide(
        &self,
        command: &Command,
        options: CommandOptions,
        sender: ClientId,
        peers: &PeerSet,
    ) -> RelayDecision {
        if self.registry.configuration(command.kind()).execute_on_server {
            return RelayDecision::Execute;
        }

        let host = peers.host();
        let targets = peers
            .client_ids()
            .into_iter()
            .filter(|id| *id != sender)
            .filter(|id| !(options.skip_host && Some(*id) == host))
            .collect();
        RelayDecision::Forward { targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer_set::Peer;
    use shared::DefaultCommandRegistry;
    use tokio::sync::mpsc;

    fn policy() -> RelayPolicy {
        RelayPolicy::new(Arc::new(DefaultCommandRegistry::new()))
    }

    fn add_peer(peers: &mut PeerSet, token: u64) -> ClientId {
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = Peer::new(
            ClientId::new(),
            "127.0.0.1:9051".parse().unwrap(),
            token,
            tx,
        );
        let id = peer.id;
        peers.register(peer);
        id
    }

    fn cursor_command() -> Command {
        Command::MoveCursor {
            player: "B".to_string(),
            x: 1.0,
            y: 2.0,
        }
    }

    #[test]
    fn test_execute_on_server_produces_no_relay() {
        let mut peers = PeerSet::new();
        let sender = add_peer(&mut peers, 1);
        add_peer(&mut peers, 2);

        let decision = policy().decide(
            &Command::RequestWorldSnapshot,
            CommandOptions::NONE,
            sender,
            &peers,
        );
        assert_eq!(decision, RelayDecision::Execute);
    }

    #[test]
    fn test_relay_excludes_sender() {
        let mut peers = PeerSet::new();
        let host = add_peer(&mut peers, 1);
        let sender = add_peer(&mut peers, 2);
        let other = add_peer(&mut peers, 3);

        let decision = policy().decide(&cursor_command(), CommandOptions::NONE, sender, &peers);
        match decision {
            RelayDecision::Forward { mut targets } => {
                targets.sort_by_key(|id| id.to_string());
                let mut expected = vec![host, other];
                expected.sort_by_key(|id| id.to_string());
                assert_eq!(targets, expected);
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn test_skip_host_excludes_host_and_sender() {
        let mut peers = PeerSet::new();
        let host = add_peer(&mut peers, 1);
        let sender = add_peer(&mut peers, 2);
        let other = add_peer(&mut peers, 3);
        assert_eq!(peers.host(), Some(host));

        let decision =
            policy().decide(&cursor_command(), CommandOptions::SKIP_HOST, sender, &peers);
        assert_eq!(
            decision,
            RelayDecision::Forward {
                targets: vec![other]
            }
        );
    }

    #[test]
    fn test_skip_host_without_host_only_excludes_sender() {
        let mut peers = PeerSet::new();
        let host = add_peer(&mut peers, 1);
        let sender = add_peer(&mut peers, 2);
        let other = add_peer(&mut peers, 3);
        peers.remove(&host);

        let decision =
            policy().decide(&cursor_command(), CommandOptions::SKIP_HOST, sender, &peers);
        assert_eq!(
            decision,
            RelayDecision::Forward {
                targets: vec![other]
            }
        );
    }

    #[test]
    fn test_relay_with_no_other_peers_is_empty() {
        let mut peers = PeerSet::new();
        let sender = add_peer(&mut peers, 1);

        let decision = policy().decide(&cursor_command(), CommandOptions::NONE, sender, &peers);
        assert_eq!(decision, RelayDecision::Forward { targets: vec![] });
    }
}
