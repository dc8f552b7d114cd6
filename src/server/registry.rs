use std::net::IpAddr;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::server::transmission::Transmission;

/// The process-wide map from client IP to its live transmission. At most one transmission
///  exists per client IP at any instant; a new insert for the same IP displaces and closes
///  the old entry.
///
/// `remove` is the sole closer of transmission resources: every code path that decides a
///  transmission must end (DONE, disconnect, displacement) goes through here.
pub struct TransmissionRegistry {
    transmissions: RwLock<FxHashMap<IpAddr, Arc<Transmission>>>,
}

impl TransmissionRegistry {
    pub fn new() -> TransmissionRegistry {
        TransmissionRegistry {
            transmissions: RwLock::new(FxHashMap::default()),
        }
    }

    pub async fn insert(&self, client_ip: IpAddr, transmission: Arc<Transmission>) {
        let displaced = {
            let mut transmissions = self.transmissions.write().await;
            transmissions.insert(client_ip, transmission)
        };
        if let Some(displaced) = displaced {
            debug!(client_ip = %client_ip, filename = displaced.filename(), "displacing previous transmission");
            displaced.close().await;
        }
    }

    pub async fn get(&self, client_ip: IpAddr) -> Option<Arc<Transmission>> {
        self.transmissions.read().await.get(&client_ip).cloned()
    }

    /// Removes and closes the entry for this client IP. Idempotent.
    pub async fn remove(&self, client_ip: IpAddr) {
        let removed = {
            let mut transmissions = self.transmissions.write().await;
            transmissions.remove(&client_ip)
        };
        if let Some(removed) = removed {
            removed.close().await;
        }
    }

    pub async fn contains(&self, client_ip: IpAddr) -> bool {
        self.transmissions.read().await.contains_key(&client_ip)
    }
}

impl Default for TransmissionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
