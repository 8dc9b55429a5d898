//! Expedited SDO client with timeouts and retries
use log::{debug, warn};
use motocan_common::{
    messages::{CanId, CanMessage, SDO_REQ_BASE, SDO_RESP_BASE},
    objects::Address,
    sdo::{AbortCode, SdoErrorCode, SdoRequest, SdoResponse},
    value::Value,
};
use parking_lot::Mutex;
use serde::Deserialize;

/// Callback receiving the value of a completed read: `(node, address, value)`
pub type ValueCallback = Box<dyn FnOnce(u8, Address, Value) + Send>;

/// Callback receiving the outcome of completed writes, aborts and timeouts:
/// `(node, address, code)`
pub type CompletionCallback = Box<dyn FnMut(u8, Address, AbortCode) + Send>;

/// Client timing configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SdoClientConfig {
    /// Time to wait for a response before resending a request
    pub timeout_us: u64,
    /// Number of times a request is sent before it is given up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for SdoClientConfig {
    fn default() -> Self {
        Self {
            timeout_us: 100_000,
            max_attempts: None,
        }
    }
}

/// Decodes and stores uploaded values for reads requested without a [`ValueCallback`]
pub trait UploadTarget {
    /// Decode an upload payload for `address` on `node`
    fn to_value(&self, node: u8, address: Address, data: &[u8], size: Option<usize>)
        -> Option<Value>;

    /// Store a decoded value
    fn store(&mut self, node: u8, address: Address, value: Value);
}

struct InFlight {
    node: u8,
    address: Address,
    is_read: bool,
    sent_us: u64,
    frame: CanMessage,
    on_value: Option<ValueCallback>,
    attempts: u32,
}

impl core::fmt::Debug for InFlight {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InFlight")
            .field("node", &self.node)
            .field("address", &self.address)
            .field("is_read", &self.is_read)
            .field("sent_us", &self.sent_us)
            .field("attempts", &self.attempts)
            .finish()
    }
}

/// An SDO client serving any number of remote nodes
///
/// Requests are sent as soon as they are made, and tracked until a response arrives. Requests
/// may be made concurrently from several threads; [`SdoClient::update`] and
/// [`SdoClient::process_message`] are expected to be driven from one control loop.
pub struct SdoClient {
    config: SdoClientConfig,
    in_flight: Mutex<Vec<InFlight>>,
    on_complete: Mutex<Option<CompletionCallback>>,
}

impl core::fmt::Debug for SdoClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SdoClient")
            .field("config", &self.config)
            .field("in_flight", &*self.in_flight.lock())
            .finish()
    }
}

impl Default for SdoClient {
    fn default() -> Self {
        Self::new(SdoClientConfig::default())
    }
}

impl SdoClient {
    /// Create a client
    pub fn new(config: SdoClientConfig) -> Self {
        Self {
            config,
            in_flight: Mutex::new(Vec::new()),
            on_complete: Mutex::new(None),
        }
    }

    /// The client configuration
    pub fn config(&self) -> &SdoClientConfig {
        &self.config
    }

    /// Set the callback invoked when a write completes, or any request is aborted or times out
    pub fn set_completion_callback(&self, callback: CompletionCallback) {
        *self.on_complete.lock() = Some(callback);
    }

    /// Request a read of `address` on `node`
    ///
    /// The value is passed to `on_value` if given, otherwise it is decoded and stored by the
    /// [`UploadTarget`] passed to [`SdoClient::process_message`].
    pub fn request_read(
        &self,
        node: u8,
        address: Address,
        on_value: Option<ValueCallback>,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) {
        let frame = SdoRequest::upload(address).to_can_message(request_id(node));
        self.enqueue(node, address, true, frame, on_value, now_us, send);
    }

    /// Request a write of `value` to `address` on `node`
    ///
    /// Values larger than four bytes cannot be sent expedited and are rejected with
    /// `UnsupportedAccess`.
    pub fn request_write(
        &self,
        node: u8,
        address: Address,
        value: &Value,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> SdoErrorCode {
        let mut buf = [0u8; 4];
        if value.data_type().size() > buf.len() {
            return SdoErrorCode::UnsupportedAccess;
        }
        let len = value.to_bytes(&mut buf);
        let frame =
            SdoRequest::expedited_download(address, &buf[..len]).to_can_message(request_id(node));
        self.enqueue(node, address, false, frame, None, now_us, send);
        SdoErrorCode::NoError
    }

    #[allow(clippy::too_many_arguments)]
    fn enqueue(
        &self,
        node: u8,
        address: Address,
        is_read: bool,
        frame: CanMessage,
        on_value: Option<ValueCallback>,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) {
        self.in_flight.lock().push(InFlight {
            node,
            address,
            is_read,
            sent_us: now_us,
            frame,
            on_value,
            attempts: 1,
        });
        send(frame);
    }

    /// Returns true if any request is outstanding
    pub fn waiting(&self) -> bool {
        !self.in_flight.lock().is_empty()
    }

    /// Returns true if a request to `node` is outstanding
    pub fn waiting_on(&self, node: u8) -> bool {
        self.in_flight.lock().iter().any(|r| r.node == node)
    }

    /// Resend requests which have timed out, and give up those out of attempts
    pub fn update(&self, now_us: u64, send: &mut dyn FnMut(CanMessage)) {
        let mut expired = Vec::new();
        let mut resend = Vec::new();
        {
            let mut in_flight = self.in_flight.lock();
            let timeout = self.config.timeout_us;
            let max_attempts = self.config.max_attempts;
            in_flight.retain_mut(|request| {
                if now_us.saturating_sub(request.sent_us) < timeout {
                    return true;
                }
                if max_attempts.is_some_and(|max| request.attempts >= max) {
                    warn!(
                        "SDO request to node {} for {} timed out after {} attempts",
                        request.node, request.address, request.attempts
                    );
                    expired.push((request.node, request.address));
                    return false;
                }
                warn!(
                    "Resending SDO request to node {} for {} (attempt {})",
                    request.node,
                    request.address,
                    request.attempts + 1
                );
                request.attempts += 1;
                request.sent_us = now_us;
                resend.push(request.frame);
                true
            });
        }
        for frame in resend {
            send(frame);
        }
        for (node, address) in expired {
            self.complete(
                node,
                address,
                AbortCode::Standard(SdoErrorCode::SDOProtocolTimedOut),
            );
        }
    }

    /// Handle a received frame
    ///
    /// Returns true if the frame was a response to an outstanding request.
    pub fn process_message(&self, msg: &CanMessage, target: &mut dyn UploadTarget) -> bool {
        let Some(node) = response_node(msg) else {
            return false;
        };
        let Ok(response) = SdoResponse::try_from(msg) else {
            debug!("Dropping malformed SDO response from node {}", node);
            return false;
        };
        let address = response.address();
        let request = {
            let mut in_flight = self.in_flight.lock();
            let Some(pos) = in_flight
                .iter()
                .position(|r| r.node == node && r.address == address)
            else {
                return false;
            };
            in_flight.remove(pos)
        };

        match response {
            SdoResponse::Upload { size, data, .. } if request.is_read => {
                let size = size.map(usize::from);
                let len = size.unwrap_or(data.len());
                match target.to_value(node, address, &data[..len], size) {
                    Some(value) => match request.on_value {
                        Some(callback) => callback(node, address, value),
                        None => target.store(node, address, value),
                    },
                    None => {
                        debug!("Node {} returned an undecodable value for {}", node, address);
                        self.complete(
                            node,
                            address,
                            AbortCode::Standard(SdoErrorCode::DataTypeDoesNotMatchLengthDoesNotMatch),
                        );
                    }
                }
            }
            SdoResponse::Download { .. } if !request.is_read => {
                self.complete(node, address, AbortCode::Standard(SdoErrorCode::NoError));
            }
            SdoResponse::Abort { code, .. } => {
                debug!("Node {} aborted SDO for {}: 0x{:08X}", node, address, code);
                self.complete(node, address, AbortCode::from(code));
            }
            _ => {
                debug!("Unexpected SDO response from node {} for {}", node, address);
                self.complete(
                    node,
                    address,
                    AbortCode::Standard(SdoErrorCode::InvalidCommand),
                );
            }
        }
        true
    }

    /// Run the completion callback without holding its lock, so it may issue new requests or
    /// replace itself
    fn complete(&self, node: u8, address: Address, code: AbortCode) {
        let Some(mut callback) = self.on_complete.lock().take() else {
            return;
        };
        callback(node, address, code);
        let mut slot = self.on_complete.lock();
        if slot.is_none() {
            *slot = Some(callback);
        }
    }
}

fn request_id(node: u8) -> CanId {
    CanId::std(SDO_REQ_BASE + node as u16)
}

/// The node a frame is an SDO response from, if it is one
fn response_node(msg: &CanMessage) -> Option<u8> {
    if msg.id().is_extended() || msg.is_rtr() || msg.data().len() != 8 {
        return None;
    }
    let raw = msg.id().raw();
    let node = raw.checked_sub(SDO_RESP_BASE as u32)?;
    (1..=127).contains(&node).then_some(node as u8)
}
