//! Tunnel registry: port allocation, tunnel lifecycle, and expiration
//!
//! The registry owns the mapping from public internet port to live tunnel.
//! It allocates real OS ports, provisions relay instances through the
//! [`RelayEngine`] collaborator, and tears tunnels down on authorized delete,
//! TTL expiry, or full shutdown.

pub mod allocator;
pub mod registry;
pub mod relay;
pub mod tunnel;

pub use allocator::{AllocatorError, PortAllocator};
pub use registry::{RegistryError, RegistrySettings, TunnelOptions, TunnelRegistry};
pub use relay::{PortPair, RelayEngine, RelayError, RelayHandle, RelayOptions};
pub use tunnel::{Secret, Tunnel, TunnelDescriptor};
