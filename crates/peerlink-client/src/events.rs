//! Callback registry for lifecycle and message events.
//!
//! Callbacks may be invoked from any worker task; user code must not
//! assume a single dispatcher thread.

use std::sync::{Arc, RwLock};

use peerlink_common::Error;

use crate::types::{ConnectionState, Message};

pub(crate) type Slot<T> = RwLock<Option<Arc<T>>>;

pub(crate) fn store<T: ?Sized>(slot: &Slot<T>, f: Arc<T>) {
    if let Ok(mut guard) = slot.write() {
        *guard = Some(f);
    }
}

pub(crate) fn load<T: ?Sized>(slot: &Slot<T>) -> Option<Arc<T>> {
    slot.read().ok().and_then(|guard| guard.clone())
}

#[derive(Default)]
pub(crate) struct Callbacks {
    pub on_connected: Slot<dyn Fn() + Send + Sync>,
    pub on_disconnected: Slot<dyn Fn(Option<Error>) + Send + Sync>,
    pub on_peer_connected: Slot<dyn Fn(String) + Send + Sync>,
    pub on_peer_disconnected: Slot<dyn Fn(String) + Send + Sync>,
    pub on_text_message: Slot<dyn Fn(String, String) + Send + Sync>,
    pub on_binary_message: Slot<dyn Fn(String, Vec<u8>) + Send + Sync>,
    pub on_message: Slot<dyn Fn(String, Message) + Send + Sync>,
    pub on_peer_list: Slot<dyn Fn(Vec<String>) + Send + Sync>,
    pub on_error: Slot<dyn Fn(Error) + Send + Sync>,
    pub on_state_change: Slot<dyn Fn(ConnectionState) + Send + Sync>,
    pub on_relay_auth_result: Slot<dyn Fn(bool, String) + Send + Sync>,
    pub on_relay_connected: Slot<dyn Fn(String) + Send + Sync>,
    pub on_relay_disconnected: Slot<dyn Fn(String) + Send + Sync>,
}
