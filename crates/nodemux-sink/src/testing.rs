use std::collections::BTreeMap;

use crate::traits::{StreamHandle, StreamRegistry, StreamRole};

/// Minimal registry that records everything a sink reports.
#[derive(Default)]
pub(crate) struct RecordingRegistry {
    next: u32,
    pub roles: BTreeMap<StreamHandle, (StreamRole, Option<StreamHandle>)>,
    pub received: BTreeMap<StreamHandle, Vec<u8>>,
    pub accepted: Vec<(StreamHandle, StreamHandle)>,
    pub hangups: Vec<StreamHandle>,
}

impl StreamRegistry for RecordingRegistry {
    fn register(
        &mut self,
        _sink: &str,
        role: StreamRole,
        parent: Option<StreamHandle>,
    ) -> StreamHandle {
        self.next += 1;
        let handle = StreamHandle::new(self.next);
        self.roles.insert(handle, (role, parent));
        handle
    }

    fn deliver(&mut self, handle: StreamHandle, data: &[u8]) {
        self.received.entry(handle).or_default().extend_from_slice(data);
    }

    fn accepted(&mut self, listener: StreamHandle, handle: StreamHandle) {
        self.accepted.push((listener, handle));
    }

    fn hangup(&mut self, handle: StreamHandle) {
        self.hangups.push(handle);
    }
}
