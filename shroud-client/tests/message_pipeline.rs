//! Drives a [`MessageSender`]/[`MessageReceiver`] pair across a loopback
//! [`Transport`] double: packets are serialized, pushed through an
//! `std::sync::mpsc` pipe, and parsed back on the other side, exercising
//! the wire framing the two pipelines would otherwise only see through a
//! real `Connection`.

use std::io::Read;
use std::sync::mpsc;
use std::sync::Arc;

use shroud_client::{Dispatcher, Message, MessageReceiver, MessageSender, Resource};
use shroud_proto::{Packet, MAX_PACKET_BODY};
use shroud_store::{ResourceType, Store};
use shroud_value::{Object, Value};

/// One end of an in-memory byte pipe. `send` pushes a serialized frame;
/// `Read` pulls from an internal buffer fed by the channel, so
/// `Packet::read_from` can treat it like a socket.
struct Transport {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

fn loopback_pair() -> (Transport, Transport) {
    let (tx_a, rx_b) = mpsc::channel();
    let (tx_b, rx_a) = mpsc::channel();
    (Transport { tx: tx_a, rx: rx_a, pending: Vec::new() }, Transport { tx: tx_b, rx: rx_b, pending: Vec::new() })
}

impl Transport {
    fn send(&self, packet: &Packet) {
        self.tx.send(packet.serialize()).unwrap();
    }

    fn recv_packet(&mut self) -> Packet {
        Packet::read_from(self).unwrap()
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.pending.len() < buf.len() {
            match self.rx.recv() {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(_) => break,
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

fn temp_store(account_id: u32, label: &str) -> (Arc<Store>, tempfile::NamedTempFile) {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::remove_file(file.path()).unwrap();
    let store = Store::init(file.path(), "hunter2", account_id, label, &Value::Null).unwrap();
    (Arc::new(store), file)
}

fn contact_value(public_key: &shroud_crypto::rsa::PublicKey) -> Value {
    let (e, n, size) = public_key.to_hex_parts();
    let mut obj = Object::new();
    obj.insert("e", Value::from(e));
    obj.insert("n", Value::from(n));
    obj.insert("size", Value::from(size as i32));
    Value::Object(obj)
}

#[test]
fn sender_and_receiver_exchange_packets_over_a_loopback_transport() {
    let (sender_store, _f1) = temp_store(1, "alice");
    let (receiver_store, _f2) = temp_store(2, "bob");

    let (sender_pub, sender_priv) = shroud_crypto::rsa::generate(1024).unwrap();
    let (receiver_pub, receiver_priv) = shroud_crypto::rsa::generate(1024).unwrap();

    sender_store.add_contact(2, "bob", "", "", Some(&contact_value(&receiver_pub))).unwrap();
    receiver_store.add_contact(1, "alice", "", "", Some(&contact_value(&sender_pub))).unwrap();

    let mut message = Message::new(0, 1, 2);
    let mut note = Resource::new(ResourceType::Text, "note.txt");
    note.set_data(b"meet at dawn".to_vec());
    message.add_resource(note);
    let mut attachment = Resource::new(ResourceType::File, "map.bin");
    attachment.set_data(vec![0x42u8; MAX_PACKET_BODY + 500]);
    message.add_resource(attachment);

    let mut sender =
        MessageSender::init(sender_store, 1, &sender_pub, &sender_priv, message, &[(2, receiver_pub.clone())]).unwrap();

    let (mut sender_side, mut receiver_side) = loopback_pair();
    let dispatcher = Dispatcher::new();

    let mut packet_count = 0;
    while let Some(packet) = sender.process(&dispatcher).unwrap() {
        sender_side.send(&packet);
        packet_count += 1;
    }
    assert!(sender.is_done());
    assert!(packet_count > 1, "the oversized attachment should span more than one packet");

    let first = receiver_side.recv_packet();
    let first_head = Value::decode(&first.head).unwrap().as_object().cloned().unwrap();
    let mut receiver =
        MessageReceiver::new(receiver_store.clone(), 2, &receiver_priv, &sender_pub, 1, &first_head, &dispatcher).unwrap();

    receiver.process(&first_head, &first.body, &dispatcher).unwrap();
    for _ in 1..packet_count {
        let packet = receiver_side.recv_packet();
        let head = Value::decode(&packet.head).unwrap().as_object().cloned().unwrap();
        receiver.process(&head, &packet.body, &dispatcher).unwrap();
    }

    assert!(receiver.is_complete());
    assert_eq!(receiver.message_id(), sender.message_id());

    let resources = receiver_store.get_resources().unwrap();
    assert_eq!(resources.len(), 2);
    let attachment_stored = resources.iter().find(|r| r.name == "map.bin").unwrap();
    assert_eq!(attachment_stored.data, vec![0x42u8; MAX_PACKET_BODY + 500]);
}
