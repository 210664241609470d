use nodemux_frame::{Leader, Packet};
use nodemux_sink::StreamHandle;
use tracing::{debug, trace, warn};

use crate::callback::{invoke, Disposition};
use crate::engine::Engine;
use crate::message::{MessageState, PendingMessage};
use crate::reply::Reply;

impl Engine {
    /// Evaluate every pending message once, then reclaim them.
    pub(crate) fn route_pending(&mut self) {
        let mut batch = std::mem::take(&mut self.pending);
        for msg in batch.iter_mut() {
            if !msg.is_finished() {
                self.route(msg);
            }
        }
        batch.retain(|msg| !msg.is_finished());
        batch.append(&mut self.pending);
        self.pending = batch;
    }

    fn route(&mut self, msg: &mut PendingMessage) {
        let origin = msg.origin();
        let Some(stream) = self.streams.get(origin) else {
            debug!(
                stream = %origin,
                leader = %msg.packet().leader(),
                anchor = msg.packet().anchor(),
                "origin stream closed, dropping message"
            );
            msg.finish();
            return;
        };
        let remote_id = stream.remote_id();
        let leader = msg.packet().leader();
        trace!(
            stream = %origin,
            %leader,
            anchor = msg.packet().anchor(),
            src = msg.packet().src(),
            dst = msg.packet().dst(),
            "routing"
        );

        if leader == Leader::Control {
            self.handle_control(origin, msg.packet());
            msg.finish();
            return;
        }

        if remote_id == 0 {
            self.reply(origin, msg.packet(), Reply::not_synced());
            msg.finish();
            return;
        }

        match leader {
            Leader::Subscribe => {
                self.handle_subscribe(origin, msg.packet());
                msg.finish();
                return;
            }
            Leader::Unsubscribe => {
                self.handle_unsubscribe(origin, msg.packet());
                msg.finish();
                return;
            }
            _ => {}
        }

        if msg.state() != MessageState::Forward {
            self.dispatch_local(origin, msg);
        }
        if msg.state() == MessageState::Forward {
            self.forward(origin, msg.packet());
        }
        msg.finish();
    }

    fn handle_subscribe(&mut self, origin: StreamHandle, packet: &Packet) {
        if let Some(stream) = self.streams.get_mut(origin) {
            if stream.subscriptions.insert(packet.anchor().to_string()) {
                debug!(stream = %origin, topic = packet.anchor(), "subscribed");
            }
        }
        self.reply(origin, packet, Reply::ok());
    }

    fn handle_unsubscribe(&mut self, origin: StreamHandle, packet: &Packet) {
        if let Some(stream) = self.streams.get_mut(origin) {
            if stream.subscriptions.remove(packet.anchor()) {
                debug!(stream = %origin, topic = packet.anchor(), "unsubscribed");
            }
        }
        self.reply(origin, packet, Reply::ok());
    }

    /// Hand the packet to the origin stream's own packet callback.
    fn dispatch_local(&mut self, origin: StreamHandle, msg: &mut PendingMessage) {
        let callback = self
            .streams
            .get(origin)
            .and_then(|s| s.callbacks.packet.clone());
        let Some(callback) = callback else {
            debug!(stream = %origin, anchor = msg.packet().anchor(), "no packet handler");
            self.reply(origin, msg.packet(), Reply::internal());
            return;
        };
        let packet = msg.packet();
        if invoke(&callback, |f| f(self, origin, packet)) == Some(Disposition::Forward) {
            msg.mark_forward();
        }
    }

    fn forward(&mut self, origin: StreamHandle, packet: &Packet) {
        match packet.leader() {
            Leader::Request | Leader::Response => self.forward_addressed(origin, packet),
            Leader::Publish => self.fan_out(packet),
            other => debug!(stream = %origin, leader = %other, "leader cannot be forwarded"),
        }
    }

    /// Local id match first, then remote id, else 404.
    fn forward_addressed(&mut self, origin: StreamHandle, packet: &Packet) {
        let dst = packet.dst();

        if let Some(target) = self.streams.find_by_local_id(dst) {
            let callback = self
                .streams
                .get(target)
                .and_then(|s| s.callbacks.packet.clone());
            match callback {
                Some(callback) => {
                    debug!(stream = %origin, target = %target, anchor = packet.anchor(), "delivering to local node");
                    invoke(&callback, |f| f(self, origin, packet));
                }
                None => {
                    debug!(target = %target, "local node has no packet handler");
                    self.reply(origin, packet, Reply::internal());
                }
            }
            return;
        }

        if let Some(target) = self.streams.find_by_remote_id(dst) {
            debug!(stream = %origin, target = %target, anchor = packet.anchor(), "forwarding to peer");
            if let Err(err) = self.queue_packet(target, packet) {
                warn!(target = %target, error = %err, "failed to forward packet");
            }
            return;
        }

        debug!(
            stream = %origin,
            dst = format_args!("0x{dst:08x}"),
            "destination not found"
        );
        self.reply(origin, packet, Reply::not_found());
    }

    fn fan_out(&mut self, packet: &Packet) {
        let subscribers: Vec<StreamHandle> = self
            .streams
            .iter()
            .filter(|s| s.is_subscribed(packet.anchor()))
            .map(|s| s.handle())
            .collect();
        debug!(
            topic = packet.anchor(),
            subscribers = subscribers.len(),
            "publishing"
        );
        for target in subscribers {
            if let Err(err) = self.queue_packet(target, packet) {
                warn!(target = %target, error = %err, "failed to deliver publication");
            }
        }
    }

    /// Answer `request` on `origin` with a synthesized reply.
    pub(crate) fn reply(&mut self, origin: StreamHandle, request: &Packet, reply: Reply) {
        debug!(
            stream = %origin,
            anchor = request.anchor(),
            err = reply.err,
            "synthesized reply"
        );
        let response = request.reply(reply.to_payload());
        if let Err(err) = self.send_packet(origin, &response) {
            debug!(stream = %origin, error = %err, "reply could not be sent");
        }
    }
}
