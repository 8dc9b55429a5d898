//! Expedited SDO server
//!
//! Only expedited transfers are served: an upload request is answered with up to 4 bytes, and a
//! download request carries its whole payload in the request frame. Everything else is aborted.
use defmt_or_log::debug;
use motocan_common::{
    messages::{CanId, CanMessage, SDO_REQ_BASE, SDO_RESP_BASE},
    objects::Address,
    sdo::{SdoErrorCode, SdoRequest, SdoResponse},
    value::Value,
};

/// The dictionary access the SDO server needs
///
/// Implemented by the device, which wraps its [`HandlerMap`](crate::HandlerMap) to track changed
/// values, and by the handler map itself.
pub trait ObjectAccess {
    /// Read an object
    fn read(&mut self, address: Address) -> Result<Value, SdoErrorCode>;

    /// Write an object from its little-endian encoding, with an optional declared size
    fn write_bytes(&mut self, address: Address, data: &[u8], size: Option<usize>) -> SdoErrorCode;
}

impl ObjectAccess for crate::HandlerMap {
    fn read(&mut self, address: Address) -> Result<Value, SdoErrorCode> {
        crate::HandlerMap::read(self, address)
    }

    fn write_bytes(&mut self, address: Address, data: &[u8], size: Option<usize>) -> SdoErrorCode {
        crate::HandlerMap::write_bytes(self, address, data, size)
    }
}

/// Serves SDO requests addressed to one node
#[derive(Debug, Clone, Copy)]
pub struct SdoServer {
    node_id: u8,
}

impl SdoServer {
    /// Create a server for `node_id`
    pub fn new(node_id: u8) -> Self {
        Self { node_id }
    }

    /// The COB-ID requests are received on
    pub fn rx_cob_id(&self) -> CanId {
        CanId::Std(SDO_REQ_BASE + self.node_id as u16)
    }

    /// The COB-ID responses are sent on
    pub fn tx_cob_id(&self) -> CanId {
        CanId::Std(SDO_RESP_BASE + self.node_id as u16)
    }

    /// Handle a received frame
    ///
    /// Returns the response frame, or None if the frame is not a request for this server.
    pub fn handle_message(
        &self,
        msg: &CanMessage,
        objects: &mut dyn ObjectAccess,
    ) -> Option<CanMessage> {
        if msg.id() != self.rx_cob_id() {
            return None;
        }
        let request = match SdoRequest::try_from(msg) {
            Ok(req) => req,
            Err(_) => {
                debug!("Dropping malformed SDO request for node {}", self.node_id);
                return None;
            }
        };
        let response = self.handle_request(request, objects);
        if let SdoResponse::Abort { address, code } = response {
            debug!(
                "SDO abort 0x{:X} for {:X}sub{}",
                code, address.index, address.sub
            );
        }
        Some(response.to_can_message(self.tx_cob_id()))
    }

    fn handle_request(&self, request: SdoRequest, objects: &mut dyn ObjectAccess) -> SdoResponse {
        match request {
            SdoRequest::Upload { address } => match objects.read(address) {
                Ok(value) => {
                    if !value.data_type().supports_expedited() || value.size() == 0 {
                        return SdoResponse::abort(address, SdoErrorCode::UnsupportedAccess);
                    }
                    let mut buf = [0u8; 4];
                    let len = value.to_bytes(&mut buf);
                    SdoResponse::expedited_upload(address, &buf[..len])
                }
                Err(code) => SdoResponse::abort(address, code),
            },
            SdoRequest::Download {
                address,
                size,
                data,
            } => {
                let result = objects.write_bytes(address, &data, size.map(usize::from));
                if result.is_ok() {
                    SdoResponse::download_acknowledge(address)
                } else {
                    SdoResponse::abort(address, result)
                }
            }
            SdoRequest::Unsupported { address, .. } => {
                SdoResponse::abort(address, SdoErrorCode::UnsupportedAccess)
            }
        }
    }
}
