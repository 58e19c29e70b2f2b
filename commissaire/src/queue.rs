use tokio::sync::mpsc;

use crate::models::Host;

/// One pending investigation: the freshly created Host record plus the
/// base64 SSH private key needed to reach it (never persisted on the Host
/// itself — it only ever lives in this queue and in the investigator's
/// temporary key file).
#[derive(Debug, Clone)]
pub struct InvestigateItem {
    pub host: Host,
    pub ssh_priv_key: String,
}

pub type InvestigateSender = mpsc::Sender<InvestigateItem>;
pub type InvestigateReceiver = mpsc::Receiver<InvestigateItem>;

/// Builds the bounded investigate queue shared between the HTTP handlers
/// (producer) and the investigator worker (sole consumer).
pub fn channel(capacity: usize) -> (InvestigateSender, InvestigateReceiver) {
    mpsc::channel(capacity)
}
