//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the Roon core (SOOD discovery, MOO/1 messaging,
//! service names) and changing them would break interoperability.

// ─────────────────────────────────────────────────────────────────────────────
// SOOD Discovery
// ─────────────────────────────────────────────────────────────────────────────

/// Multicast group the core listens on for SOOD queries.
pub const SOOD_MULTICAST_IP: [u8; 4] = [239, 255, 90, 90];

/// UDP port for SOOD queries.
pub const SOOD_PORT: u16 = 9003;

/// Magic marker at the start of every SOOD datagram.
pub const SOOD_MAGIC: &[u8; 4] = b"SOOD";

/// SOOD protocol version byte.
pub const SOOD_VERSION: u8 = 2;

/// Opcode of a query datagram.
pub const SOOD_OPCODE_QUERY: u8 = b'Q';

/// Opcode of a reply datagram.
pub const SOOD_OPCODE_REPLY: u8 = b'R';

/// Service id advertised by Roon cores.
pub const ROON_CORE_SERVICE_ID: &str = "00720724-5143-4a9b-abac-0e50cba674bb";

/// Multicast TTL for SOOD queries.
pub const SOOD_MULTICAST_TTL: u32 = 4;

// ─────────────────────────────────────────────────────────────────────────────
// MOO/1 Messaging
// ─────────────────────────────────────────────────────────────────────────────

/// Protocol tag on the first line of every frame.
pub const MOO_PROTOCOL: &str = "MOO/1";

/// Largest body a frame may announce. Image replies are the biggest.
pub const MAX_FRAME_BODY: usize = 32 * 1024 * 1024;

/// Largest header block accepted before the blank line.
pub const MAX_FRAME_HEADER: usize = 64 * 1024;

/// Content type used for text bodies unless the caller picks another one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Path of the WebSocket endpoint on the core's HTTP port.
pub const WS_API_PATH: &str = "/api";

// ─────────────────────────────────────────────────────────────────────────────
// Service Names
// ─────────────────────────────────────────────────────────────────────────────

pub const SERVICE_REGISTRY: &str = "com.roonlabs.registry:1";
pub const SERVICE_TRANSPORT: &str = "com.roonlabs.transport:2";
pub const SERVICE_STATUS: &str = "com.roonlabs.status:1";
pub const SERVICE_PAIRING: &str = "com.roonlabs.pairing:1";
pub const SERVICE_PING: &str = "com.roonlabs.ping:1";
pub const SERVICE_IMAGE: &str = "com.roonlabs.image:1";

// ─────────────────────────────────────────────────────────────────────────────
// Persistence
// ─────────────────────────────────────────────────────────────────────────────

/// File name of the settings document inside the data directory.
pub const CONFIG_FILE_NAME: &str = "Configuration.json";

/// Settings bucket holding issued tokens and the paired core id.
pub const PAIRING_STATE_KEY: &str = "RoonState";
