// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP multicast discovery substrate.
//!
//! Every process periodically multicasts its local records to a well-known
//! group and caches what it hears from others. Remote records expire when
//! not refreshed within the lease; withdrawing a record sends an explicit
//! goodbye so browsers forget it immediately.
//!
//! ```text
//! +------+-----+------+--------------+----------+-------+------------------+
//! | ZPSD | ver | kind | service type | instance | count | (key, value) ... |
//! +------+-----+------+--------------+----------+-------+------------------+
//!   4B     1B    1B     u16 + utf8     u16+utf8   u16     u16+utf8 each
//! ```

use super::{Discovery, DiscoveryRecord};
use crate::config::{
    DISCOVERY_ANNOUNCE_PERIOD, DISCOVERY_LEASE, DISCOVERY_MULTICAST_ADDR,
    DISCOVERY_MULTICAST_PORT,
};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

const PACKET_MAGIC: &[u8; 4] = b"ZPSD";
const PACKET_VERSION: u8 = 1;
const KIND_ANNOUNCE: u8 = 1;
const KIND_GOODBYE: u8 = 2;

/// Receive timeout so the worker notices shutdown promptly.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Largest datagram accepted.
const MAX_PACKET: usize = 65_507;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Packet {
    goodbye: bool,
    service_type: String,
    instance: String,
    properties: Vec<(String, String)>,
}

impl Packet {
    fn encode(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(PACKET_MAGIC);
        buf.push(PACKET_VERSION);
        buf.push(if self.goodbye {
            KIND_GOODBYE
        } else {
            KIND_ANNOUNCE
        });
        put_str(&mut buf, &self.service_type)?;
        put_str(&mut buf, &self.instance)?;
        let count = u16::try_from(self.properties.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many properties"))?;
        buf.extend_from_slice(&count.to_be_bytes());
        for (key, value) in &self.properties {
            put_str(&mut buf, key)?;
            put_str(&mut buf, value)?;
        }
        if buf.len() > MAX_PACKET {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "announcement does not fit a datagram",
            ));
        }
        Ok(buf)
    }

    fn decode(data: &[u8]) -> Option<Self> {
        let mut reader = Reader { data, pos: 0 };
        if reader.take(4)? != PACKET_MAGIC || reader.u8()? != PACKET_VERSION {
            return None;
        }
        let goodbye = match reader.u8()? {
            KIND_ANNOUNCE => false,
            KIND_GOODBYE => true,
            _ => return None,
        };
        let service_type = reader.string()?;
        let instance = reader.string()?;
        let count = reader.u16()?;
        let mut properties = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            properties.push((reader.string()?, reader.string()?));
        }
        Some(Self {
            goodbye,
            service_type,
            instance,
            properties,
        })
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) -> io::Result<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string too long"))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let slice = self.data.get(self.pos..self.pos.checked_add(n)?)?;
        self.pos += n;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn string(&mut self) -> Option<String> {
        let len = usize::from(self.u16()?);
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).ok()
    }
}

#[derive(Debug)]
struct LocalRecord {
    service_type: String,
    properties: Vec<(String, String)>,
}

#[derive(Debug)]
struct RemoteRecord {
    service_type: String,
    properties: HashMap<String, String>,
    last_seen: Instant,
}

#[derive(Debug)]
struct Shared {
    socket: UdpSocket,
    group: SocketAddrV4,
    running: AtomicBool,
    local: RwLock<HashMap<String, LocalRecord>>,
    remote: RwLock<HashMap<String, RemoteRecord>>,
}

impl Shared {
    fn send(&self, packet: &Packet) {
        let result = packet
            .encode()
            .and_then(|bytes| self.socket.send_to(&bytes, self.group));
        if let Err(e) = result {
            log::debug!(
                "[discovery] Failed to send {} for {}: {}",
                if packet.goodbye { "goodbye" } else { "announce" },
                packet.instance,
                e
            );
        }
    }

    fn announce_all(&self) {
        let local = self.local.read();
        for (instance, record) in local.iter() {
            self.send(&Packet {
                goodbye: false,
                service_type: record.service_type.clone(),
                instance: instance.clone(),
                properties: record.properties.clone(),
            });
        }
    }

    fn handle_packet(&self, data: &[u8], from: SocketAddr) {
        let Some(packet) = Packet::decode(data) else {
            log::trace!("[discovery] Ignoring malformed packet from {}", from);
            return;
        };
        let mut remote = self.remote.write();
        if packet.goodbye {
            if remote.remove(&packet.instance).is_some() {
                log::debug!("[discovery] {} said goodbye", packet.instance);
            }
            return;
        }
        let fresh = !remote.contains_key(&packet.instance);
        remote.insert(
            packet.instance.clone(),
            RemoteRecord {
                service_type: packet.service_type,
                properties: packet.properties.into_iter().collect(),
                last_seen: Instant::now(),
            },
        );
        if fresh {
            log::debug!("[discovery] Discovered {} from {}", packet.instance, from);
        }
    }

    fn expire(&self) {
        let mut remote = self.remote.write();
        remote.retain(|instance, record| {
            let alive = record.last_seen.elapsed() < DISCOVERY_LEASE;
            if !alive {
                log::debug!("[discovery] Lease expired for {}", instance);
            }
            alive
        });
    }

    fn run(&self) {
        let mut buf = vec![0u8; MAX_PACKET];
        let mut last_announce: Option<Instant> = None;

        while self.running.load(Ordering::SeqCst) {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => self.handle_packet(&buf[..n], from),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    log::debug!("[discovery] recv failed: {}", e);
                    thread::sleep(RECV_TIMEOUT);
                }
            }

            if last_announce.map_or(true, |t| t.elapsed() >= DISCOVERY_ANNOUNCE_PERIOD) {
                self.announce_all();
                self.expire();
                last_announce = Some(Instant::now());
            }
        }
    }
}

/// Discovery over UDP multicast on the local network.
///
/// Owns one background thread that receives announcements and re-announces
/// local records every second. Dropping the substrate withdraws every local
/// record and stops the thread.
#[derive(Debug)]
pub struct MulticastDiscovery {
    shared: Arc<Shared>,
    thread: Option<thread::JoinHandle<()>>,
}

static PROCESS_DISCOVERY: OnceLock<std::result::Result<Arc<MulticastDiscovery>, String>> =
    OnceLock::new();

impl MulticastDiscovery {
    /// Join the default discovery group.
    pub fn new() -> Result<Self> {
        Self::with_group(DISCOVERY_MULTICAST_ADDR, DISCOVERY_MULTICAST_PORT)
    }

    /// Join a specific group (isolated test networks).
    pub fn with_group(addr: Ipv4Addr, port: u16) -> Result<Self> {
        let socket = open_socket(addr, port).map_err(|e| {
            Error::Discovery(format!("cannot join {}:{}: {}", addr, port, e))
        })?;
        let shared = Arc::new(Shared {
            socket,
            group: SocketAddrV4::new(addr, port),
            running: AtomicBool::new(true),
            local: RwLock::new(HashMap::new()),
            remote: RwLock::new(HashMap::new()),
        });

        let worker = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("zpubsub-discovery".to_string())
            .spawn(move || {
                log::debug!("[discovery] Listening on {}", worker.group);
                worker.run();
                log::debug!("[discovery] Stopped");
            })
            .map_err(|e| Error::Discovery(format!("cannot spawn discovery thread: {}", e)))?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Process-wide substrate used by default contexts, started on first use.
    pub fn shared() -> Result<Arc<Self>> {
        PROCESS_DISCOVERY
            .get_or_init(|| Self::new().map(Arc::new).map_err(|e| e.to_string()))
            .clone()
            .map_err(Error::Discovery)
    }

    /// Group this substrate announces to.
    pub fn group(&self) -> SocketAddrV4 {
        self.shared.group
    }
}

fn open_socket(addr: Ipv4Addr, port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
    socket.join_multicast_v4(&addr, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_multicast_loop_v4(true)?;
    socket.set_multicast_ttl_v4(1)?;
    socket.set_read_timeout(Some(RECV_TIMEOUT))?;
    Ok(socket.into())
}

impl Discovery for MulticastDiscovery {
    fn announce(&self, service_type: &str, record: &DiscoveryRecord) -> Result<()> {
        let properties = record.properties();
        let packet = Packet {
            goodbye: false,
            service_type: service_type.to_string(),
            instance: record.instance.clone(),
            properties: properties.clone(),
        };
        packet
            .encode()
            .map_err(|e| Error::Discovery(format!("cannot announce {}: {}", record.instance, e)))?;

        self.shared.local.write().insert(
            record.instance.clone(),
            LocalRecord {
                service_type: service_type.to_string(),
                properties,
            },
        );
        self.shared.send(&packet);
        log::debug!("[discovery] Announced {}", record.instance);
        Ok(())
    }

    fn withdraw(&self, instance: &str) -> Result<()> {
        let removed = self.shared.local.write().remove(instance);
        if let Some(record) = removed {
            self.shared.send(&Packet {
                goodbye: true,
                service_type: record.service_type,
                instance: instance.to_string(),
                properties: Vec::new(),
            });
            log::debug!("[discovery] Withdrew {}", instance);
        }
        self.shared.remote.write().remove(instance);
        Ok(())
    }

    fn browse(&self, service_type: &str) -> Result<Vec<String>> {
        let mut instances: Vec<String> = self
            .shared
            .local
            .read()
            .iter()
            .filter(|(_, r)| r.service_type == service_type)
            .map(|(name, _)| name.clone())
            .collect();
        instances.extend(
            self.shared
                .remote
                .read()
                .iter()
                .filter(|(_, r)| {
                    r.service_type == service_type && r.last_seen.elapsed() < DISCOVERY_LEASE
                })
                .map(|(name, _)| name.clone()),
        );
        instances.sort();
        instances.dedup();
        Ok(instances)
    }

    fn get(&self, instance: &str, key: &str) -> Option<String> {
        if let Some(record) = self.shared.local.read().get(instance) {
            return record
                .properties
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone());
        }
        self.shared
            .remote
            .read()
            .get(instance)
            .and_then(|r| r.properties.get(key).cloned())
    }

    fn is_available(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

impl Drop for MulticastDiscovery {
    fn drop(&mut self) {
        let instances: Vec<String> = self.shared.local.read().keys().cloned().collect();
        for instance in instances {
            let _ = self.withdraw(&instance);
        }
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}
