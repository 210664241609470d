use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use nodemux_engine::reply::{JSON_TAG, TEXT_TAG};
use nodemux_engine::Packet;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct PacketOutput<'a> {
    kind: &'static str,
    leader: &'static str,
    anchor: &'a str,
    src: String,
    dst: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    req_crc: Option<u16>,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

pub fn print_packet(packet: &Packet, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = PacketOutput {
                kind: "packet",
                leader: packet.leader().name(),
                anchor: packet.anchor(),
                src: node_id(packet.src()),
                dst: node_id(packet.dst()),
                req_crc: packet.req_crc(),
                payload_size: packet.payload().len(),
                payload: payload_preview(packet.payload()),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["LEADER", "ANCHOR", "SRC", "DST", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    packet.leader().name().to_string(),
                    packet.anchor().to_string(),
                    node_id(packet.src()),
                    node_id(packet.dst()),
                    packet.payload().len().to_string(),
                    payload_preview(packet.payload()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} {} src={} dst={} size={} payload={}",
                packet.leader().name(),
                packet.anchor(),
                node_id(packet.src()),
                node_id(packet.dst()),
                packet.payload().len(),
                payload_preview(packet.payload())
            );
        }
        OutputFormat::Raw => {
            print_raw(packet.payload());
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn node_id(id: u32) -> String {
    format!("0x{id:08x}")
}

/// Text form of a payload, without its `j:`/`t:` type tag.
fn payload_preview(payload: &[u8]) -> String {
    let body = payload
        .strip_prefix(JSON_TAG)
        .or_else(|| payload.strip_prefix(TEXT_TAG))
        .unwrap_or(payload);
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
