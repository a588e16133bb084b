use std::{
    collections::{HashMap, HashSet},
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
};

use chained_hotstuff::networking::{messages::Message, network::Network};
use ed25519_dalek::VerifyingKey;

/// A mock network stub which passes messages from and to threads using channels.
///
/// Messages sent to or from a peer in the shared `muted` set are silently dropped, which lets tests
/// simulate crashed or partitioned replicas.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_verifying_key: VerifyingKey,
    all_peers: HashMap<VerifyingKey, Sender<(VerifyingKey, Message)>>,
    inbox: Arc<Mutex<Receiver<(VerifyingKey, Message)>>>,
    muted: Arc<Mutex<HashSet<VerifyingKey>>>,
}

impl NetworkStub {
    fn deliver(&self, peer: &VerifyingKey, message: Message) {
        let muted = self.muted.lock().unwrap();
        if muted.contains(&self.my_verifying_key) || muted.contains(peer) {
            return;
        }
        if let Some(inbox) = self.all_peers.get(peer) {
            let _ = inbox.send((self.my_verifying_key, message));
        }
    }
}

impl Network for NetworkStub {
    fn broadcast(&mut self, message: Message) {
        for peer in self.all_peers.keys() {
            self.deliver(peer, message.clone());
        }
    }

    fn send(&mut self, peer: VerifyingKey, message: Message) {
        self.deliver(&peer, message);
    }

    fn recv(&mut self) -> Option<(VerifyingKey, Message)> {
        self.inbox.lock().unwrap().try_recv().ok()
    }
}

/// Handle for cutting peers off the mock network.
#[derive(Clone)]
pub(crate) struct NetworkControl {
    muted: Arc<Mutex<HashSet<VerifyingKey>>>,
}

impl NetworkControl {
    pub(crate) fn mute(&self, peer: VerifyingKey) {
        self.muted.lock().unwrap().insert(peer);
    }

    pub(crate) fn unmute(&self, peer: &VerifyingKey) {
        self.muted.lock().unwrap().remove(peer);
    }
}

pub(crate) fn mock_network(
    peers: impl Iterator<Item = VerifyingKey>,
) -> (Vec<NetworkStub>, NetworkControl) {
    let muted = Arc::new(Mutex::new(HashSet::new()));
    let mut all_peers = HashMap::new();
    let peer_and_inboxes: Vec<(VerifyingKey, Receiver<(VerifyingKey, Message)>)> = peers
        .map(|peer| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer, sender);

            (peer, receiver)
        })
        .collect();

    let stubs = peer_and_inboxes
        .into_iter()
        .map(|(my_verifying_key, inbox)| NetworkStub {
            my_verifying_key,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
            muted: Arc::clone(&muted),
        })
        .collect();

    (stubs, NetworkControl { muted })
}
