use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use nodemux_frame::Packet;
use nodemux_sink::StreamHandle;
use tracing::warn;

use crate::engine::Engine;

/// What a packet callback wants done with the packet it was handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handled; nothing more to do.
    Finished,
    /// Route it onward: to the node named by its destination id, or to the
    /// subscribers of its topic for publications.
    Forward,
}

pub(crate) type PollinCallback = Rc<RefCell<dyn FnMut(&mut Engine, StreamHandle, &[u8]) -> usize>>;
pub(crate) type AcceptCallback = Rc<RefCell<dyn FnMut(&mut Engine, StreamHandle, StreamHandle)>>;
pub(crate) type CloseCallback = Rc<RefCell<dyn FnMut(&mut Engine, StreamHandle)>>;
pub(crate) type PacketCallback =
    Rc<RefCell<dyn FnMut(&mut Engine, StreamHandle, &Packet) -> Disposition>>;

/// The four single-use callback slots of a stream.
#[derive(Default)]
pub(crate) struct Callbacks {
    pub pollin: Option<PollinCallback>,
    pub accept: Option<AcceptCallback>,
    pub close: Option<CloseCallback>,
    pub packet: Option<PacketCallback>,
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("pollin", &self.pollin.is_some())
            .field("accept", &self.accept.is_some())
            .field("close", &self.close.is_some())
            .field("packet", &self.packet.is_some())
            .finish()
    }
}

/// Run a callback unless it is already running further up the stack.
pub(crate) fn invoke<F: ?Sized, R>(
    callback: &Rc<RefCell<F>>,
    call: impl FnOnce(&mut F) -> R,
) -> Option<R> {
    match callback.try_borrow_mut() {
        Ok(mut f) => Some(call(&mut *f)),
        Err(_) => {
            warn!("callback re-entered, skipping nested invocation");
            None
        }
    }
}
