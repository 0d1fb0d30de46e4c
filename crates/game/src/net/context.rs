use std::net::{Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::error::InitError;

static ACTIVE_CONTEXTS: AtomicUsize = AtomicUsize::new(0);

/// Proof that the network subsystem is up.
///
/// The first context probes that a UDP socket can be opened; dropping the
/// last one tears the subsystem down. Sessions keep a clone, so teardown
/// cannot run while any session is alive.
#[derive(Debug)]
pub struct NetworkContext {
    _private: (),
}

impl NetworkContext {
    pub fn initialize() -> Result<Self, InitError> {
        if ACTIVE_CONTEXTS.fetch_add(1, Ordering::SeqCst) == 0 {
            if let Err(e) = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)) {
                ACTIVE_CONTEXTS.fetch_sub(1, Ordering::SeqCst);
                return Err(InitError::Unavailable(e));
            }
            log::debug!("Network subsystem initialized");
        }

        Ok(Self { _private: () })
    }

    pub fn is_active() -> bool {
        ACTIVE_CONTEXTS.load(Ordering::SeqCst) > 0
    }
}

impl Clone for NetworkContext {
    fn clone(&self) -> Self {
        ACTIVE_CONTEXTS.fetch_add(1, Ordering::SeqCst);
        Self { _private: () }
    }
}

impl Drop for NetworkContext {
    fn drop(&mut self) {
        if ACTIVE_CONTEXTS.fetch_sub(1, Ordering::SeqCst) == 1 {
            log::debug!("Network subsystem shut down");
        }
    }
}
