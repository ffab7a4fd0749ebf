//! Local interface handling for the switchyard node runtime.
//!
//! This crate enumerates physical interface addresses, probes and searches for
//! bindable ports, models the virtual network interface ("tap") a joined
//! network presents to the host, and coordinates background task shutdown.

pub mod error;
pub mod netif;
pub mod ports;
pub mod shutdown;
pub mod tap;

pub use error::InterfaceError;
pub use netif::{AddressFilter, PhysicalAddress};
pub use ports::PortSearchOutcome;
pub use shutdown::{ShutdownToken, TaskGuard};
pub use tap::{MemoryTap, Tap};
