//! LAN device discovery
//!
//! Blocking, bounded-duration ARP sweep of the local /24: one broadcast
//! request per host address, replies collected until the timeout
//! elapses. Needs raw-socket privileges on the capture interface.

use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::time::{Duration, Instant};

use pnet::datalink::{self, Channel, NetworkInterface};
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::Packet;
use pnet::util::MacAddr;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;

const ETHERNET_HEADER_LEN: usize = 14;
const ARP_PACKET_LEN: usize = 28;

/// One discovered host.
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub traffic: f32,
    pub status: String,
    pub vulnerabilities: Vec<String>,
}

impl Device {
    fn from_reply(ip: Ipv4Addr, mac: MacAddr) -> Self {
        Self {
            id: mac.to_string().replace(':', ""),
            name: format!("Device_{ip}"),
            // Placeholder until per-device metering exists
            traffic: rand::thread_rng().gen_range(5.0..15.0),
            status: "Unknown".to_string(),
            vulnerabilities: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("local address is not IPv4")]
    NotIpv4,

    #[error("no interface carries the local address {0}")]
    NoInterface(Ipv4Addr),

    #[error("interface {0} has no MAC address")]
    NoMac(String),

    #[error("failed to open datalink channel: {0}")]
    Channel(String),

    #[error("scan worker failed: {0}")]
    Worker(String),
}

/// Run one blocking discovery sweep over the local /24.
pub fn discover(timeout: Duration) -> Result<Vec<Device>, ScanError> {
    let local_ip = local_ipv4()?;
    tracing::info!("Scanning subnet: {}/24", subnet_base(local_ip));

    let interface = find_interface(local_ip)?;
    let replies = arp_sweep(&interface, local_ip, timeout)?;

    Ok(replies
        .into_iter()
        .map(|(ip, mac)| Device::from_reply(ip, mac))
        .collect())
}

/// Local IPv4 discovered by routing a UDP socket towards a public
/// resolver; nothing is actually sent.
fn local_ipv4() -> Result<Ipv4Addr, ScanError> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.connect(("8.8.8.8", 80))?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(ip) => Ok(ip),
        IpAddr::V6(_) => Err(ScanError::NotIpv4),
    }
}

fn subnet_base(ip: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) & 0xffff_ff00)
}

fn find_interface(local_ip: Ipv4Addr) -> Result<NetworkInterface, ScanError> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.ips.iter().any(|net| net.ip() == IpAddr::V4(local_ip)))
        .ok_or(ScanError::NoInterface(local_ip))
}

fn arp_sweep(
    interface: &NetworkInterface,
    src_ip: Ipv4Addr,
    timeout: Duration,
) -> Result<Vec<(Ipv4Addr, MacAddr)>, ScanError> {
    let src_mac = interface
        .mac
        .ok_or_else(|| ScanError::NoMac(interface.name.clone()))?;

    let config = datalink::Config {
        read_timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let (mut tx, mut rx) = match datalink::channel(interface, config) {
        Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
        Ok(_) => return Err(ScanError::Channel("unsupported channel type".to_string())),
        Err(e) => return Err(ScanError::Channel(e.to_string())),
    };

    let base = u32::from(subnet_base(src_ip));
    for host in 1..255u32 {
        let target = Ipv4Addr::from(base | host);
        if target == src_ip {
            continue;
        }
        let Some(frame) = build_arp_request(src_mac, src_ip, target) else {
            continue;
        };
        if let Some(Err(e)) = tx.send_to(&frame, None) {
            return Err(ScanError::Io(e));
        }
    }

    let mut seen = HashSet::new();
    let mut replies = Vec::new();
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        let packet = match rx.next() {
            Ok(packet) => packet,
            // A read timeout just means no frame arrived in this slice
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                continue
            }
            Err(e) => return Err(ScanError::Io(e)),
        };

        let Some(ethernet) = EthernetPacket::new(packet) else {
            continue;
        };
        if ethernet.get_ethertype() != EtherTypes::Arp {
            continue;
        }
        let Some(arp) = ArpPacket::new(ethernet.payload()) else {
            continue;
        };
        if arp.get_operation() != ArpOperations::Reply {
            continue;
        }

        let ip = arp.get_sender_proto_addr();
        if seen.insert(ip) {
            replies.push((ip, arp.get_sender_hw_addr()));
        }
    }

    Ok(replies)
}

/// Broadcast ARP request for `target`, ethernet-framed.
fn build_arp_request(src_mac: MacAddr, src_ip: Ipv4Addr, target: Ipv4Addr) -> Option<Vec<u8>> {
    let mut buffer = vec![0u8; ETHERNET_HEADER_LEN + ARP_PACKET_LEN];

    // Ethernet header
    {
        let mut eth = MutableEthernetPacket::new(&mut buffer[..ETHERNET_HEADER_LEN])?;
        eth.set_destination(MacAddr::broadcast());
        eth.set_source(src_mac);
        eth.set_ethertype(EtherTypes::Arp);
    }

    // ARP request
    {
        let mut arp = MutableArpPacket::new(&mut buffer[ETHERNET_HEADER_LEN..])?;
        arp.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp.set_protocol_type(EtherTypes::Ipv4);
        arp.set_hw_addr_len(6);
        arp.set_proto_addr_len(4);
        arp.set_operation(ArpOperations::Request);
        arp.set_sender_hw_addr(src_mac);
        arp.set_sender_proto_addr(src_ip);
        arp.set_target_hw_addr(MacAddr::zero());
        arp.set_target_proto_addr(target);
    }

    Some(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_base_masks_the_host_octet() {
        let base = subnet_base(Ipv4Addr::new(192, 168, 1, 77));
        assert_eq!(base, Ipv4Addr::new(192, 168, 1, 0));
    }

    #[test]
    fn arp_request_frame_parses_back() {
        let src_mac = MacAddr::new(0xde, 0xad, 0xbe, 0xef, 0x00, 0x01);
        let src_ip = Ipv4Addr::new(192, 168, 1, 5);
        let target = Ipv4Addr::new(192, 168, 1, 20);

        let frame = build_arp_request(src_mac, src_ip, target).unwrap();
        assert_eq!(frame.len(), ETHERNET_HEADER_LEN + ARP_PACKET_LEN);

        let ethernet = EthernetPacket::new(&frame).unwrap();
        assert_eq!(ethernet.get_destination(), MacAddr::broadcast());
        assert_eq!(ethernet.get_source(), src_mac);
        assert_eq!(ethernet.get_ethertype(), EtherTypes::Arp);

        let arp = ArpPacket::new(ethernet.payload()).unwrap();
        assert_eq!(arp.get_operation(), ArpOperations::Request);
        assert_eq!(arp.get_sender_proto_addr(), src_ip);
        assert_eq!(arp.get_target_proto_addr(), target);
        assert_eq!(arp.get_target_hw_addr(), MacAddr::zero());
    }

    #[test]
    fn device_fields_match_the_wire_contract() {
        let mac = MacAddr::new(0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22);
        let device = Device::from_reply(Ipv4Addr::new(10, 0, 0, 9), mac);

        assert!(!device.id.contains(':'));
        assert_eq!(device.name, "Device_10.0.0.9");
        assert!(device.traffic >= 5.0 && device.traffic < 15.0);
        assert_eq!(device.status, "Unknown");
        assert!(device.vulnerabilities.is_empty());
    }
}
