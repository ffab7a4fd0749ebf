//! Virtual network interface ("tap") abstraction.
//!
//! A tap is the host-side interface through which a joined network's frames
//! enter and leave. Taps are created by the engine on join and configured by
//! the node as network configurations arrive.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use switchyard_core::{InetAddress, Mac, Route};

use crate::error::InterfaceError;

/// Object-safe trait implemented by virtual network interfaces.
///
/// Methods are synchronous and may be called from any thread.
pub trait Tap: Send + Sync {
    // -- Identity --

    /// OS device name (e.g. "zt3jnd7v").
    fn device_name(&self) -> String;

    /// Hardware address presented to the host.
    fn mac(&self) -> Mac;

    // -- Addresses --

    /// IPs currently assigned to the device. The port holds prefix bits.
    fn ips(&self) -> Vec<InetAddress>;

    fn add_ip(&self, ip: &InetAddress) -> Result<(), InterfaceError>;

    fn remove_ip(&self, ip: &InetAddress) -> Result<(), InterfaceError>;

    // -- Routes --

    fn add_route(&self, route: &Route) -> Result<(), InterfaceError>;

    fn remove_route(&self, route: &Route) -> Result<(), InterfaceError>;

    // -- Lifecycle --

    fn set_enabled(&self, enabled: bool);

    fn enabled(&self) -> bool;

    /// Tear down the device. Later calls on a closed tap fail with `Closed`.
    fn close(&self);
}

/// A tap that keeps its state in memory without touching the host.
///
/// Used for headless nodes and in tests.
pub struct MemoryTap {
    name: String,
    mac: Mac,
    ips: Mutex<BTreeSet<InetAddress>>,
    routes: Mutex<BTreeSet<Route>>,
    enabled: AtomicBool,
    closed: AtomicBool,
}

impl MemoryTap {
    pub fn new(name: impl Into<String>, mac: Mac) -> Self {
        Self {
            name: name.into(),
            mac,
            ips: Mutex::new(BTreeSet::new()),
            routes: Mutex::new(BTreeSet::new()),
            enabled: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    /// Routes currently installed.
    pub fn routes(&self) -> Vec<Route> {
        self.routes.lock().iter().copied().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), InterfaceError> {
        if self.is_closed() {
            return Err(InterfaceError::Closed);
        }
        Ok(())
    }
}

impl Tap for MemoryTap {
    fn device_name(&self) -> String {
        self.name.clone()
    }

    fn mac(&self) -> Mac {
        self.mac
    }

    fn ips(&self) -> Vec<InetAddress> {
        self.ips.lock().iter().copied().collect()
    }

    fn add_ip(&self, ip: &InetAddress) -> Result<(), InterfaceError> {
        self.ensure_open()?;
        self.ips.lock().insert(*ip);
        Ok(())
    }

    fn remove_ip(&self, ip: &InetAddress) -> Result<(), InterfaceError> {
        self.ensure_open()?;
        self.ips.lock().remove(ip);
        Ok(())
    }

    fn add_route(&self, route: &Route) -> Result<(), InterfaceError> {
        self.ensure_open()?;
        self.routes.lock().insert(*route);
        Ok(())
    }

    fn remove_route(&self, route: &Route) -> Result<(), InterfaceError> {
        self.ensure_open()?;
        self.routes.lock().remove(route);
        Ok(())
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
        self.ips.lock().clear();
        self.routes.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inet(s: &str) -> InetAddress {
        s.parse().unwrap()
    }

    #[test]
    fn ips_are_tracked_and_sorted() {
        let tap = MemoryTap::new("zt0", Mac::new(0x02aa_0000_0001));
        tap.add_ip(&inet("10.0.0.9/24")).unwrap();
        tap.add_ip(&inet("10.0.0.5/24")).unwrap();
        tap.add_ip(&inet("10.0.0.5/24")).unwrap();
        assert_eq!(tap.ips(), vec![inet("10.0.0.5/24"), inet("10.0.0.9/24")]);

        tap.remove_ip(&inet("10.0.0.9/24")).unwrap();
        assert_eq!(tap.ips(), vec![inet("10.0.0.5/24")]);
    }

    #[test]
    fn routes_are_tracked() {
        let tap = MemoryTap::new("zt0", Mac::new(1));
        let route = Route {
            target: inet("10.1.0.0/16"),
            via: Some("10.0.0.1".parse().unwrap()),
            flags: 0,
            metric: 0,
        };
        tap.add_route(&route).unwrap();
        assert_eq!(tap.routes(), vec![route]);
        tap.remove_route(&route).unwrap();
        assert!(tap.routes().is_empty());
    }

    #[test]
    fn closed_tap_rejects_changes() {
        let tap = MemoryTap::new("zt0", Mac::new(1));
        tap.add_ip(&inet("10.0.0.5/24")).unwrap();
        tap.close();
        assert!(tap.is_closed());
        assert!(!tap.enabled());
        assert!(tap.ips().is_empty());
        assert!(matches!(
            tap.add_ip(&inet("10.0.0.6/24")),
            Err(InterfaceError::Closed)
        ));
    }

    #[test]
    fn usable_as_trait_object() {
        let tap: std::sync::Arc<dyn Tap> = std::sync::Arc::new(MemoryTap::new("zt7", Mac::new(7)));
        assert_eq!(tap.device_name(), "zt7");
        assert_eq!(tap.mac(), Mac::new(7));
        tap.set_enabled(false);
        assert!(!tap.enabled());
    }
}
