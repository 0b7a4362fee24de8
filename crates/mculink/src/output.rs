use std::fmt;
use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use mculink_channel::LinkStats;
use mculink_update::UpdateReport;
use serde::Serialize;
use serialport::{SerialPortInfo, SerialPortType};

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

/// A decoded parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Unsigned(u32),
    Float(f32),
    Text(String),
    /// Raw payload, hex encoded.
    Bytes(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsigned(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) | Self::Bytes(v) => f.write_str(v),
        }
    }
}

#[derive(Serialize)]
pub struct Reading<'a> {
    pub id: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
    pub value: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<u64>,
}

#[derive(Serialize)]
pub struct AckOutput<'a> {
    pub kind: &'a str,
    pub id: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
    pub code: Option<u8>,
    pub payload: String,
}

pub fn print_reading(reading: &Reading<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(reading),
        OutputFormat::Table => {
            let mut row = vec![
                reading.id.to_string(),
                reading.name.unwrap_or("-").to_string(),
                reading.value.to_string(),
            ];
            let mut header = vec!["ID", "NAME", "VALUE"];
            if let Some(sample) = reading.sample {
                header.insert(0, "SAMPLE");
                row.insert(0, sample.to_string());
            }
            print_table(header, vec![row]);
        }
        OutputFormat::Pretty => {
            let sample = reading
                .sample
                .map(|s| format!("#{s} "))
                .unwrap_or_default();
            println!(
                "{sample}id={} ({}) value={}",
                reading.id,
                reading.name.unwrap_or("unnamed"),
                reading.value
            );
        }
        OutputFormat::Raw => println!("{}", reading.value),
    }
}

pub fn print_ack(ack: &AckOutput<'_>, format: OutputFormat) {
    let code = ack
        .code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "-".to_string());
    match format {
        OutputFormat::Json => print_json(ack),
        OutputFormat::Table => print_table(
            vec!["KIND", "ID", "NAME", "CODE"],
            vec![vec![
                ack.kind.to_string(),
                ack.id.to_string(),
                ack.name.unwrap_or("-").to_string(),
                code,
            ]],
        ),
        OutputFormat::Pretty => println!(
            "{} id={} ({}) code={code} payload={}",
            ack.kind,
            ack.id,
            ack.name.unwrap_or("unnamed"),
            ack.payload
        ),
        OutputFormat::Raw => println!("{code}"),
    }
}

pub fn print_report(report: &UpdateReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let rows = report
                .attempts
                .iter()
                .map(|a| {
                    vec![
                        a.attempt.to_string(),
                        format!("{:?}", a.outcome),
                        format!("{} ms", a.elapsed_ms),
                        a.error.clone().unwrap_or_default(),
                    ]
                })
                .collect();
            print_table(vec!["ATTEMPT", "OUTCOME", "ELAPSED", "ERROR"], rows);
            println!("{} update: {:?}", report.family, report.outcome);
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for a in &report.attempts {
                println!(
                    "attempt {} {:?} after {} ms{}",
                    a.attempt,
                    a.outcome,
                    a.elapsed_ms,
                    a.error
                        .as_deref()
                        .map(|e| format!(": {e}"))
                        .unwrap_or_default()
                );
            }
            println!("{} update: {:?}", report.family, report.outcome);
        }
    }
}

pub fn print_stats(stats: &LinkStats, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(stats),
        OutputFormat::Table => print_table(
            vec!["REQUESTS", "REPLY TIMEOUTS", "FRAME ERRORS", "UNSOLICITED", "DROPPED"],
            vec![vec![
                stats.requests.to_string(),
                stats.reply_timeouts.to_string(),
                stats.frames.total_errors().to_string(),
                stats.unsolicited.to_string(),
                stats.dropped_replies.to_string(),
            ]],
        ),
        OutputFormat::Pretty | OutputFormat::Raw => println!(
            "requests={} comm_errors={} unsolicited={} dropped={} forced_releases={}",
            stats.requests,
            stats.communication_errors(),
            stats.unsolicited,
            stats.dropped_replies,
            stats.forced_releases
        ),
    }
}

#[derive(Serialize)]
struct PortOutput<'a> {
    name: &'a str,
    kind: String,
}

pub fn print_ports(ports: &[SerialPortInfo], format: OutputFormat) {
    let entries: Vec<PortOutput<'_>> = ports
        .iter()
        .map(|p| PortOutput {
            name: &p.port_name,
            kind: port_kind(&p.port_type),
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&entries),
        OutputFormat::Table => print_table(
            vec!["PORT", "TYPE"],
            entries
                .iter()
                .map(|e| vec![e.name.to_string(), e.kind.clone()])
                .collect(),
        ),
        OutputFormat::Pretty => {
            for e in &entries {
                println!("{} ({})", e.name, e.kind);
            }
        }
        OutputFormat::Raw => {
            for e in &entries {
                println!("{}", e.name);
            }
        }
    }
}

fn port_kind(kind: &SerialPortType) -> String {
    match kind {
        SerialPortType::UsbPort(usb) => format!("usb {:04x}:{:04x}", usb.vid, usb.pid),
        SerialPortType::PciPort => "pci".to_string(),
        SerialPortType::BluetoothPort => "bluetooth".to_string(),
        SerialPortType::Unknown => "unknown".to_string(),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn print_table(header: Vec<&str>, rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}

/// Lowercase hex, no separators.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
