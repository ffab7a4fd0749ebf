//! Port availability probing and startup port search.
//!
//! A port is usable only if it can be bound for both UDP and TCP on both the
//! IPv4 and IPv6 wildcard addresses. The probe sockets are closed before
//! returning, so a successful probe leaves nothing bound.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use rand::Rng;
use socket2::{Domain, Protocol, Socket, Type};

/// Maximum number of ports tried before a search gives up.
pub const PORT_SEARCH_ATTEMPTS: usize = 256;

/// Number of secondary-port attempts drawn from [`UNASSIGNED_PRIVILEGED_PORTS`]
/// before falling back to random high ports.
pub const SECONDARY_PRIVILEGED_ATTEMPTS: usize = 64;

/// Privileged ports with no IANA assignment. They are rarely filtered and
/// rarely in use, which makes them good secondary port candidates.
pub const UNASSIGNED_PRIVILEGED_PORTS: &[u16] = &[
    4, 6, 8, 10, 12, 14, 15, 16, 26, 28, 30, 32, 34, 36, 40, 60, 269, 270, 271, 272, 273, 274,
    275, 276, 277, 278, 279, 285, 288, 289, 290, 291, 292, 293, 294, 295, 296, 297, 298, 299, 300,
    301, 302, 303, 304, 305, 306, 307, 308, 309, 310, 323, 324, 325, 326, 327, 328, 329, 330, 331,
    332, 334, 335, 336, 337, 338, 339, 340, 341, 342, 343, 703, 708, 713, 714, 715, 716, 717, 718,
    719, 720, 721, 722, 723, 724, 725, 726, 727, 728, 732, 733, 734, 735, 736, 737, 738, 739, 740,
    743, 745, 746, 755, 756, 766, 768, 778, 779, 781, 782, 783, 784, 785, 786, 787, 788, 789, 790,
    791, 792, 793, 794, 795, 796, 797, 798, 799, 802, 803, 804, 805, 806, 807, 808, 809, 811, 812,
    813, 814, 815, 816, 817, 818, 819, 820, 821, 822, 823, 824, 825, 826, 827, 834, 835, 836, 837,
    838, 839, 840, 841, 842, 843, 844, 845, 846, 849, 850, 851, 852, 853, 854, 855, 856, 857, 858,
    859, 862, 863, 864, 865, 866, 867, 868, 869, 870, 871, 872, 874, 875, 876, 877, 878, 879, 880,
    881, 882, 883, 884, 885, 889, 890, 891, 892, 893, 894, 895, 896, 897, 898, 899, 904, 905, 906,
    907, 908, 909, 910, 911, 914, 915, 916, 917, 918, 919, 920, 921, 922, 923, 924, 925, 926, 927,
    928, 929, 930, 931, 932, 933, 934, 935, 936, 937, 938, 939, 940, 941, 942, 943, 944, 945, 946,
    947, 948, 949, 950, 951, 952, 953, 954, 955, 956, 957, 958, 959, 960, 961, 962, 963, 964, 965,
    966, 967, 968, 969, 970, 971, 972, 973, 974, 975, 976, 977, 978, 979, 980, 981, 982, 983, 984,
    985, 986, 987, 988, 1001, 1002, 1003, 1004, 1005, 1006, 1007, 1008, 1009, 1023,
];

/// Whether `port` can be bound for UDP and TCP on both IPv4 and IPv6.
///
/// On hosts without IPv6 only the IPv4 probes count.
pub fn check_port(port: u16) -> bool {
    if port == 0 {
        return false;
    }
    let v4 = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let v6 = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));

    let probes = [
        (v4, Type::DGRAM, Protocol::UDP),
        (v6, Type::DGRAM, Protocol::UDP),
        (v4, Type::STREAM, Protocol::TCP),
        (v6, Type::STREAM, Protocol::TCP),
    ];

    // Hold every probe socket until all four have bound.
    let mut held = Vec::with_capacity(probes.len());
    for (addr, ty, proto) in probes {
        match probe_bind(addr, ty, proto) {
            Ok(socket) => held.push(socket),
            Err(Probe::Unsupported(e)) => {
                tracing::trace!(port, %addr, "skipping probe: {e}");
            }
            Err(Probe::Failed(e)) => {
                tracing::debug!(port, %addr, "port probe failed: {e}");
                return false;
            }
        }
    }
    true
}

enum Probe {
    /// The address family is not available on this host.
    Unsupported(std::io::Error),
    Failed(std::io::Error),
}

fn probe_bind(addr: SocketAddr, ty: Type, proto: Protocol) -> Result<Socket, Probe> {
    let socket = Socket::new(Domain::for_address(addr), ty, Some(proto)).map_err(|e| {
        if addr.is_ipv6() {
            Probe::Unsupported(e)
        } else {
            Probe::Failed(e)
        }
    })?;
    if addr.is_ipv6() {
        socket.set_only_v6(true).map_err(Probe::Unsupported)?;
    }
    socket.bind(&addr.into()).map_err(|e| {
        if addr.is_ipv6() && e.kind() == ErrorKind::AddrNotAvailable {
            Probe::Unsupported(e)
        } else {
            Probe::Failed(e)
        }
    })?;
    if ty == Type::STREAM {
        socket.listen(1).map_err(Probe::Failed)?;
    }
    Ok(socket)
}

/// Result of a successful port search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSearchOutcome {
    pub port: u16,
    /// Whether the chosen port differs from the configured one.
    pub changed: bool,
    /// Number of ports probed, including the successful one.
    pub attempts: usize,
}

/// Search for a usable primary port, starting with `configured`.
///
/// After each failure the next candidate is drawn from `4096..20480`.
/// Returns `None` when [`PORT_SEARCH_ATTEMPTS`] ports have failed.
pub fn search_primary_port(
    configured: u16,
    mut probe: impl FnMut(u16) -> bool,
    rng: &mut impl Rng,
) -> Option<PortSearchOutcome> {
    search(configured, &mut probe, |_| 4096 + rng.gen_range(0..16384))
}

/// Search for a usable secondary port, starting with `configured`.
///
/// The first [`SECONDARY_PRIVILEGED_ATTEMPTS`] fallbacks come from
/// [`UNASSIGNED_PRIVILEGED_PORTS`], later ones from `16384..32768`.
pub fn search_secondary_port(
    configured: u16,
    mut probe: impl FnMut(u16) -> bool,
    rng: &mut impl Rng,
) -> Option<PortSearchOutcome> {
    search(configured, &mut probe, |attempt| {
        if attempt <= SECONDARY_PRIVILEGED_ATTEMPTS {
            UNASSIGNED_PRIVILEGED_PORTS[rng.gen_range(0..UNASSIGNED_PRIVILEGED_PORTS.len())]
        } else {
            16384 + rng.gen_range(0..16384)
        }
    })
}

fn search(
    configured: u16,
    probe: &mut impl FnMut(u16) -> bool,
    mut next_candidate: impl FnMut(usize) -> u16,
) -> Option<PortSearchOutcome> {
    let mut port = configured;
    for attempt in 1..=PORT_SEARCH_ATTEMPTS {
        if probe(port) {
            return Some(PortSearchOutcome {
                port,
                changed: port != configured,
                attempts: attempt,
            });
        }
        port = next_candidate(attempt);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn configured_port_kept_when_available() {
        let outcome = search_primary_port(9993, |_| true, &mut rng()).unwrap();
        assert_eq!(
            outcome,
            PortSearchOutcome {
                port: 9993,
                changed: false,
                attempts: 1
            }
        );
    }

    #[test]
    fn primary_fallbacks_stay_in_range() {
        let mut tried = Vec::new();
        let outcome = search_primary_port(
            9993,
            |p| {
                tried.push(p);
                tried.len() == 5
            },
            &mut rng(),
        )
        .unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.attempts, 5);
        assert_eq!(tried[0], 9993);
        assert!(tried[1..].iter().all(|p| (4096..20480).contains(p)));
    }

    #[test]
    fn primary_gives_up_after_256_attempts() {
        let mut count = 0;
        let outcome = search_primary_port(
            9993,
            |_| {
                count += 1;
                false
            },
            &mut rng(),
        );
        assert!(outcome.is_none());
        assert_eq!(count, PORT_SEARCH_ATTEMPTS);
    }

    #[test]
    fn secondary_prefers_privileged_then_high_ports() {
        let mut tried = Vec::new();
        let outcome = search_secondary_port(
            30000,
            |p| {
                tried.push(p);
                false
            },
            &mut rng(),
        );
        assert!(outcome.is_none());
        assert_eq!(tried.len(), PORT_SEARCH_ATTEMPTS);
        assert!(
            tried[1..=SECONDARY_PRIVILEGED_ATTEMPTS]
                .iter()
                .all(|p| UNASSIGNED_PRIVILEGED_PORTS.contains(p))
        );
        assert!(
            tried[SECONDARY_PRIVILEGED_ATTEMPTS + 1..]
                .iter()
                .all(|p| (16384..32768).contains(p))
        );
    }

    #[test]
    fn check_port_zero_is_never_usable() {
        assert!(!check_port(0));
    }

    #[test]
    fn check_port_detects_tcp_listener() {
        let listener = std::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!check_port(port));
    }

    #[test]
    fn privileged_list_is_sorted_and_privileged() {
        assert!(UNASSIGNED_PRIVILEGED_PORTS.windows(2).all(|w| w[0] < w[1]));
        assert!(UNASSIGNED_PRIVILEGED_PORTS.iter().all(|p| *p < 1024));
    }
}
